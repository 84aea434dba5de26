use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing api key")]
    MissingKey,

    #[error("invalid api key")]
    InvalidKey,

    #[error("api key revoked")]
    Revoked,

    #[error("api key not found")]
    NotFound,

    #[error("rate limit exceeded, retry after {retry_after_s}s")]
    RateLimited { retry_after_s: u64 },

    #[error("hashing error: {0}")]
    Hash(String),
}
