//! Prometheus metrics

mod prometheus;

pub use self::prometheus::*;
