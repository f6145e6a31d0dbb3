//! Protocol engines and the plumbing they share

mod events;
mod fetcher;
mod hub_service;
mod subscriber_service;
mod tasks;

pub use events::*;
pub use fetcher::*;
pub use hub_service::*;
pub use subscriber_service::*;
pub use tasks::*;
