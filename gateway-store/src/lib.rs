//! The gateway's `StateStore` contract (C1): the only mutation point for
//! persisted rows, with an in-memory default and an optional `sqlx`-backed
//! durable implementation.

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(feature = "database")]
pub mod sql;

pub use error::StoreError;
pub use memory::InMemoryStateStore;
#[cfg(feature = "database")]
pub use sql::SqlStateStore;
pub use traits::{CacheStats, CostSummary, RequestFilter, SortOrder, StateStore, StoreResult};
