//! HTTP surface of the hub
//!
//! Serves the WebSub protocol endpoints (hub, subscriber callbacks and a
//! demo topic) next to a JSON management API.

mod rest;
mod health;
mod responses;

pub use rest::*;
pub use health::*;
pub use responses::*;
