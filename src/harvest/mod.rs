//! Harvest API access: the authenticated session, typed operations and the
//! cached client used by commands.

pub mod api_types;
pub mod cache;
pub mod cached_client;
pub mod client;
pub mod session;
pub mod types;

pub use cached_client::CachedHarvestClient;
pub use client::HarvestClient;
pub use session::{Credentials, Session};
