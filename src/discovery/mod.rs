//! Topic and hub discovery
//!
//! Resolves the canonical topic URL and hub URL of a resource from its
//! `Link` headers, falling back to `<link>` elements in the body.

mod links;
mod resolver;

pub use links::*;
pub use resolver::*;
