use thiserror::Error;

/// Failure taxonomy for a `get_token` call.
///
/// `RefreshInProgress` is the only transient kind: callers are expected to
/// retry with backoff rather than queue behind the in-flight refresh. The
/// broker itself never retries any of these.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("token refresh already in progress, retry later")]
    RefreshInProgress,

    #[error("microsoft login flow failed: {0:#}")]
    LoginFailed(anyhow::Error),

    #[error("id_token not found in session storage")]
    TokenExtractionFailed,

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl BrokerError {
    /// Stable label for logs and failure metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::RefreshInProgress => "refresh_in_progress",
            BrokerError::LoginFailed(_) => "login_failed",
            BrokerError::TokenExtractionFailed => "token_extraction_failed",
            BrokerError::Unexpected(_) => "unexpected",
        }
    }
}
