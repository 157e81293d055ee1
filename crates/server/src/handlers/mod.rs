//! HTTP request handlers.

pub mod events;
pub mod health;
pub mod sitemaps;

pub use events::*;
pub use health::*;
pub use sitemaps::*;
