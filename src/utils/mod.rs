pub mod metrics;
pub mod request_log;
