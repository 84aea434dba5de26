//! Five-way failure classification shared by backend adapters and the
//! `RetryExecutor` (§4.8).

use gateway_core::FailureClass;

/// Classifies a backend failure from an optional HTTP status and the raw
/// error text. Backend adapters call this so every provider integration
/// produces a [`FailureClass`] the same way.
pub fn classify_error(status_code: Option<u16>, message: &str) -> FailureClass {
    let lower = message.to_lowercase();
    match status_code {
        Some(429) => FailureClass::RetryableRateLimit(message.to_string()),
        Some(401) | Some(403) => FailureClass::NonRetryableAuth(message.to_string()),
        Some(s) if (500..600).contains(&s) => FailureClass::RetryableTransient(message.to_string()),
        Some(s) if (400..500).contains(&s) => FailureClass::NonRetryableClient(message.to_string()),
        _ => {
            if lower.contains("rate limit") || lower.contains("too many requests") {
                FailureClass::RetryableRateLimit(message.to_string())
            } else if lower.contains("401")
                || lower.contains("403")
                || lower.contains("invalid api key")
                || lower.contains("unauthorized")
                || lower.contains("forbidden")
            {
                FailureClass::NonRetryableAuth(message.to_string())
            } else if lower.contains("timeout")
                || lower.contains("timed out")
                || lower.contains("connection reset")
                || lower.contains("network")
            {
                FailureClass::RetryableTransient(message.to_string())
            } else {
                FailureClass::NonRetryablePermanent(message.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_takes_precedence() {
        assert!(matches!(
            classify_error(Some(500), "ok"),
            FailureClass::RetryableTransient(_)
        ));
        assert!(matches!(
            classify_error(Some(429), "ok"),
            FailureClass::RetryableRateLimit(_)
        ));
        assert!(matches!(
            classify_error(Some(401), "ok"),
            FailureClass::NonRetryableAuth(_)
        ));
        assert!(matches!(
            classify_error(Some(404), "ok"),
            FailureClass::NonRetryableClient(_)
        ));
    }

    #[test]
    fn message_based_fallback() {
        assert!(matches!(
            classify_error(None, "connection reset by peer"),
            FailureClass::RetryableTransient(_)
        ));
        assert!(matches!(
            classify_error(None, "invalid api key provided"),
            FailureClass::NonRetryableAuth(_)
        ));
        assert!(matches!(
            classify_error(None, "rate limit exceeded"),
            FailureClass::RetryableRateLimit(_)
        ));
        assert!(matches!(
            classify_error(None, "disk is on fire"),
            FailureClass::NonRetryablePermanent(_)
        ));
    }
}
