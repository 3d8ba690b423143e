pub mod logger;
pub mod metrics;

pub use metrics::Metrics;
