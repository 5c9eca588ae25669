//! Forward and backward raw chain ingesters.
//!
//! The forward instance follows the sealed tip, detects reorgs by parent-id
//! comparison and feeds the observer bus and the live deriver. The backward
//! instance backfills history below the earliest ingested height down to
//! the configured start block. Both write through the same idempotent
//! fetch-and-persist path, so overlapping or repeated work is harmless.

mod backward;
mod forward;
mod policy;

pub use backward::HistoryIngester;
pub use forward::ForwardIngester;
pub use policy::prepare_bundle;

/// Errors raised by the ingesters.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Upstream call failure that exhausted its retries.
    #[error(transparent)]
    Access(#[from] flowidx_access::AccessError),
    /// Store failure.
    #[error(transparent)]
    Store(#[from] flowidx_store::StoreError),
    /// The canonical chain diverged deeper than the configured bound. The
    /// forward ingester stops; an operator must intervene.
    #[error("reorg at height {height} exceeds maximum depth {max_depth}")]
    ReorgTooDeep {
        /// Height at which the divergence was detected.
        height: u64,
        /// The configured depth bound.
        max_depth: u64,
    },
}
