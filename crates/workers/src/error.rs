use flowidx_primitives::cadence::CadenceError;

/// Errors raised while running a processor.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Store failure.
    #[error(transparent)]
    Store(#[from] flowidx_store::StoreError),
    /// Upstream call failure (token metadata fetches).
    #[error(transparent)]
    Access(#[from] flowidx_access::AccessError),
    /// Coordinator failure.
    #[error(transparent)]
    Coordinator(#[from] flowidx_coordinator::CoordinatorError),
    /// An event payload did not decode as JSON-Cadence.
    #[error("payload decode failure: {0}")]
    Payload(#[from] CadenceError),
    /// The worker observed shutdown mid-lease and released it.
    #[error("worker cancelled")]
    Cancelled,
}

impl WorkerError {
    /// A synthetic stack string for error dedup hashing: stable per error
    /// shape, independent of timing.
    pub fn stack(&self) -> String {
        match self {
            Self::Store(_) => "worker::store".to_owned(),
            Self::Access(_) => "worker::access".to_owned(),
            Self::Coordinator(_) => "worker::coordinator".to_owned(),
            Self::Payload(_) => "worker::payload".to_owned(),
            Self::Cancelled => "worker::cancelled".to_owned(),
        }
    }
}
