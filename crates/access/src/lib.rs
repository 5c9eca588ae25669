//! Rate-limited access node pool with spork-pinned routing.
//!
//! Upstream calls go through [`AccessPool`], which owns one token bucket per
//! endpoint, routes historic heights to spork-pinned node sets, quarantines
//! endpoints after repeated transport failures and retries transient errors
//! across alternate endpoints with jittered exponential backoff. The wire
//! protocol lives behind the [`AccessApi`] trait; production uses the HTTP
//! client in [`http`], tests use the scripted chain in [`mock`].

mod api;
mod endpoint;
mod error;
mod pool;

pub mod http;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use api::AccessApi;
pub use endpoint::Endpoint;
pub use error::AccessError;
pub use pool::AccessPool;

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockAccessApi, MockChain};

/// Result alias for upstream calls.
pub type AccessResult<T> = Result<T, AccessError>;
