/// Errors raised by upstream access calls.
///
/// The retryable kinds ([`AccessError::is_retryable`]) are retried across
/// alternate endpoints by the pool; everything else surfaces to the caller.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// Connection-level failure: refused, reset, DNS, TLS.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The node reported rate exhaustion.
    #[error("upstream resource exhausted")]
    ResourceExhausted,
    /// The per-call deadline elapsed.
    #[error("upstream call deadline elapsed")]
    Deadline,
    /// The requested height exists but is not sealed yet. Expected at the
    /// forward head; the caller waits rather than erroring.
    #[error("height {height} is not sealed yet")]
    HeightNotSealed {
        /// The requested height.
        height: u64,
    },
    /// No historic node covers the requested height.
    #[error("no historic access node covers height {height}")]
    HistoryUnavailable {
        /// The requested height.
        height: u64,
    },
    /// The node reported NOT_FOUND for data that must exist (a sealed
    /// height, a referenced collection). Indicates upstream corruption.
    #[error("upstream is missing sealed data: {0}")]
    NotFound(String),
    /// The response body could not be decoded.
    #[error("failed to decode upstream response: {0}")]
    Decode(String),
    /// All endpoints of the eligible set are quarantined.
    #[error("no healthy access node available")]
    NoHealthyEndpoint,
}

impl AccessError {
    /// Returns `true` if the pool should retry the call on an alternate
    /// endpoint.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::ResourceExhausted | Self::Deadline | Self::NoHealthyEndpoint
        )
    }

    /// Returns `true` if the failure counts against endpoint health.
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Deadline)
    }
}

impl From<reqwest::Error> for AccessError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Deadline
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
