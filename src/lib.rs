//! WebSub Hub - Hub and Subscriber Engine
//!
//! A Rust implementation of the WebSub protocol, providing:
//! - A hub accepting subscriptions with intent verification and signed fan-out
//! - A subscriber engine with discovery, confirmation and lease renewal
//! - Publisher helpers advertising the hub on topic responses
//! - REST endpoints for both sides

pub mod config;
pub mod models;
pub mod crypto;
pub mod store;
pub mod services;
pub mod discovery;
pub mod publisher;
pub mod api;
pub mod metrics;

// Re-export commonly used types
pub use config::Settings;
pub use models::{HubSubscription, Mode, SubscriberSubscription, WebSubError, WebSubResult};
pub use crypto::{sign, verify, SignatureAlgorithm};
pub use store::{MemoryStore, RocksStore, Store};
pub use services::{HubService, SubscriberService, TokioRunner};
pub use discovery::{Discovered, DiscoveryResolver};
pub use publisher::{Publisher, PublisherLinks};

/// Version of the websub-hub
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
