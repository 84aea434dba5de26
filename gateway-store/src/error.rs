use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,

    #[error("store backend error: {0}")]
    Backend(String),

    #[cfg(feature = "database")]
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
}
