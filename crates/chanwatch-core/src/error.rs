use std::time::Duration;

/// Failures reported by a worker's protocol session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// Credentials revoked, expired or the account was deactivated.
    #[error("authorization failed: {0}")]
    Auth(String),

    /// The session could not be established at all.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Upstream asked us to wait before the next request.
    #[error("rate limited for {}s", .0.as_secs())]
    RateLimited(Duration),

    /// Transient transport trouble. Retried next cycle.
    #[error("network error: {0}")]
    Network(String),

    /// The channel reference does not resolve or is not readable.
    #[error("cannot resolve channel: {0}")]
    Resolve(String),
}

impl SessionError {
    /// Errors that take the whole worker out of rotation.
    pub fn is_account_failure(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Connect(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited(wait) => Some(*wait),
            _ => None,
        }
    }
}

/// Why a single channel fetch did not complete.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Session(#[from] SessionError),

    /// No reference of the channel resolved. Skip it this run.
    #[error("channel {0} could not be resolved")]
    Unresolvable(i64),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}
