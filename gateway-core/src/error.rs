use thiserror::Error;

/// Taxonomy of errors the gateway surfaces, per subsystem.
///
/// This mirrors the one-variant-per-subsystem shape used throughout the
/// gateway's internal crates: each carries enough context to log and to
/// render a `{detail}` HTTP body without leaking backend internals.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("request queue is full")]
    QueueFull,

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("classified failure: {0}")]
    Classified(#[from] FailureClass),
}

impl GatewayError {
    /// HTTP-status-agnostic detail string for the `{detail: string}` body
    /// every error path must emit (spec §7).
    pub fn detail(&self) -> String {
        self.to_string()
    }
}

/// Classification of a single backend failure (spec §4.8).
///
/// `RetryExecutor` assigns one of these to every failed attempt; the
/// variant drives both the retry policy and, wrapped in
/// [`GatewayError::Classified`], the final user-visible error when no
/// fallback succeeds.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FailureClass {
    #[error("transient error: {0}")]
    RetryableTransient(String),

    #[error("rate limited: {0}")]
    RetryableRateLimit(String),

    #[error("authentication failure: {0}")]
    NonRetryableAuth(String),

    #[error("client error: {0}")]
    NonRetryableClient(String),

    #[error("permanent failure: {0}")]
    NonRetryablePermanent(String),
}

impl FailureClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureClass::RetryableTransient(_) | FailureClass::RetryableRateLimit(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, FailureClass::NonRetryableAuth(_))
    }

    /// A short label for metrics label values (`retries_total{classification}`).
    pub fn label(&self) -> &'static str {
        match self {
            FailureClass::RetryableTransient(_) => "RetryableTransient",
            FailureClass::RetryableRateLimit(_) => "RetryableRateLimit",
            FailureClass::NonRetryableAuth(_) => "NonRetryableAuth",
            FailureClass::NonRetryableClient(_) => "NonRetryableClient",
            FailureClass::NonRetryablePermanent(_) => "NonRetryablePermanent",
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_class_retryable() {
        assert!(FailureClass::RetryableTransient("timeout".into()).is_retryable());
        assert!(FailureClass::RetryableRateLimit("429".into()).is_retryable());
        assert!(!FailureClass::NonRetryableAuth("401".into()).is_retryable());
        assert!(!FailureClass::NonRetryableClient("400".into()).is_retryable());
        assert!(!FailureClass::NonRetryablePermanent("fatal".into()).is_retryable());
    }

    #[test]
    fn failure_class_is_auth() {
        assert!(FailureClass::NonRetryableAuth("401".into()).is_auth());
        assert!(!FailureClass::RetryableTransient("x".into()).is_auth());
    }

    #[test]
    fn gateway_error_detail_is_displayable() {
        let e = GatewayError::NotFound("request abc123".into());
        assert_eq!(e.detail(), "not found: request abc123");
    }
}
