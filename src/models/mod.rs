//! Data models for the WebSub hub and subscriber

mod error;
mod subscription;

pub use error::*;
pub use subscription::*;
