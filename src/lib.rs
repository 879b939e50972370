pub mod clock;
pub mod config;
pub mod errors;
pub mod ingress;
pub mod pipeline;
pub mod ppa_mapper;
pub mod report;
pub mod sharded_processor;
pub mod threshold;
pub mod tick_publisher;
pub mod time_format;
pub mod transport;
pub mod violation_writer;
pub mod window_stats;
