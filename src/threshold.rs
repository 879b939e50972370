//! C3 + C7: per-PPA threshold rules and the stateless-per-event monitor that
//! evaluates them with per-(PPA,rule) cooldown.
//!
//! Grounded on `domain/thresholds.py::ThresholdRule` (the operator set and
//! `math.isclose` tolerance semantics) and `app/threshold_monitor.py`
//! (cooldown bookkeeping, emit order matching rule-list order).

use std::collections::HashMap;

use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    fn label(self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThresholdRule {
    pub op: CompareOp,
    pub value: f64,
    pub rule_id: String,
    /// Absolute tolerance used for `==`/`!=` closeness; `0.0` means strict.
    pub atol: f64,
}

impl ThresholdRule {
    pub fn new(op: CompareOp, value: f64, rule_id: impl Into<String>, atol: f64) -> Self {
        Self {
            op,
            value,
            rule_id: rule_id.into(),
            atol,
        }
    }

    /// Mirrors `ThresholdRule.violated`: `==`/`!=` use absolute-tolerance
    /// closeness when `atol > 0`, otherwise strict comparison.
    pub fn violated(&self, x: f64) -> bool {
        match self.op {
            CompareOp::Gt => x > self.value,
            CompareOp::Lt => x < self.value,
            CompareOp::Ge => x >= self.value,
            CompareOp::Le => x <= self.value,
            CompareOp::Eq => {
                if self.atol > 0.0 {
                    (x - self.value).abs() <= self.atol
                } else {
                    x == self.value
                }
            }
            CompareOp::Ne => {
                if self.atol > 0.0 {
                    (x - self.value).abs() > self.atol
                } else {
                    x != self.value
                }
            }
        }
    }

    /// Human-readable label used in the violations CSV `rule` column, e.g.
    /// `"> 0.0"`. Mirrors Python's `f"{op} {value}"`, which for a `float`
    /// always keeps the decimal point (`str(0.0) == "0.0"`) rather than
    /// collapsing whole numbers to integers.
    pub fn label(&self) -> String {
        format!("{} {}", self.op.label(), fmt_value(self.value))
    }
}

fn fmt_value(v: f64) -> String {
    if v.fract() == 0.0 && v.is_finite() {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViolationEvent {
    pub t_epoch: f64,
    pub ppa: i64,
    pub value: f64,
    pub rule_id: String,
    pub rule_label: String,
}

pub struct ThresholdMonitor {
    rules_by_ppa: HashMap<i64, Vec<ThresholdRule>>,
    cooldown_sec: f64,
    /// `(ppa, rule_id) -> last emit epoch`. A `DashMap` so `check` stays
    /// callable concurrently if the transport ever hands measurements to the
    /// ingress path from more than one thread (§5).
    last_emit: DashMap<(i64, String), f64>,
}

impl ThresholdMonitor {
    pub fn new(rules_by_ppa: HashMap<i64, Vec<ThresholdRule>>, cooldown_sec: f64) -> Self {
        Self {
            rules_by_ppa,
            cooldown_sec,
            last_emit: DashMap::new(),
        }
    }

    pub fn monitored_ppas(&self) -> impl Iterator<Item = &i64> {
        self.rules_by_ppa.keys()
    }

    /// Evaluate every rule registered for `ppa` against `value`, in rule-list
    /// order. Cooldown suppresses duplicate emissions of the same
    /// `(ppa, rule_id)` inside `cooldown_sec`; `cooldown_sec == 0` always emits.
    pub fn check(&self, now_epoch: f64, ppa: i64, value: f64) -> Vec<ViolationEvent> {
        let Some(rules) = self.rules_by_ppa.get(&ppa) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for rule in rules {
            if !rule.violated(value) {
                continue;
            }

            if self.cooldown_sec > 0.0 {
                let key = (ppa, rule.rule_id.clone());
                let mut suppress = false;
                match self.last_emit.get(&key) {
                    Some(last) if now_epoch - *last < self.cooldown_sec => suppress = true,
                    _ => {}
                }
                if suppress {
                    continue;
                }
                self.last_emit.insert(key, now_epoch);
            }

            out.push(ViolationEvent {
                t_epoch: now_epoch,
                ppa,
                value,
                rule_id: rule.rule_id.clone(),
                rule_label: rule.label(),
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_suppresses_within_window_s5() {
        // S5: rule {>, 0, "R", cooldown=10}; values 1@100, 1@105, 1@111.
        let rules = HashMap::from([(9999, vec![ThresholdRule::new(CompareOp::Gt, 0.0, "R", 0.0)])]);
        let monitor = ThresholdMonitor::new(rules, 10.0);

        let v1 = monitor.check(100.0, 9999, 1.0);
        assert_eq!(v1.len(), 1);

        let v2 = monitor.check(105.0, 9999, 1.0);
        assert!(v2.is_empty());

        let v3 = monitor.check(111.0, 9999, 1.0);
        assert_eq!(v3.len(), 1);
    }

    #[test]
    fn zero_cooldown_always_emits() {
        let rules = HashMap::from([(1, vec![ThresholdRule::new(CompareOp::Gt, 0.0, "R", 0.0)])]);
        let monitor = ThresholdMonitor::new(rules, 0.0);
        assert_eq!(monitor.check(1.0, 1, 5.0).len(), 1);
        assert_eq!(monitor.check(1.1, 1, 5.0).len(), 1);
    }

    #[test]
    fn equality_with_tolerance() {
        let rule = ThresholdRule::new(CompareOp::Eq, 10.0, "R", 0.05);
        assert!(rule.violated(10.03));
        assert!(!rule.violated(10.10));
    }

    #[test]
    fn equality_without_tolerance_is_strict() {
        let rule = ThresholdRule::new(CompareOp::Eq, 10.0, "R", 0.0);
        assert!(rule.violated(10.0));
        assert!(!rule.violated(10.0001));
    }

    #[test]
    fn emit_order_matches_rule_list_order() {
        let rules = HashMap::from([(
            1,
            vec![
                ThresholdRule::new(CompareOp::Gt, 0.0, "A", 0.0),
                ThresholdRule::new(CompareOp::Lt, 100.0, "B", 0.0),
            ],
        )]);
        let monitor = ThresholdMonitor::new(rules, 0.0);
        let out = monitor.check(1.0, 1, 5.0);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].rule_id, "A");
        assert_eq!(out[1].rule_id, "B");
    }

    #[test]
    fn unmonitored_ppa_yields_no_violations() {
        let monitor = ThresholdMonitor::new(HashMap::new(), 0.0);
        assert!(monitor.check(1.0, 42, 5.0).is_empty());
    }

    #[test]
    fn label_keeps_decimal_point_for_whole_numbers() {
        let rule = ThresholdRule::new(CompareOp::Gt, 0.0, "R", 0.0);
        assert_eq!(rule.label(), "> 0.0");
    }

    #[test]
    fn label_preserves_fractional_values() {
        let rule = ThresholdRule::new(CompareOp::Le, 10.5, "R", 0.0);
        assert_eq!(rule.label(), "<= 10.5");
    }
}
