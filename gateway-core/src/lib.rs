//! Core types shared by every gateway crate: the request/response data
//! model, the `Backend`/`MemoryHooks` collaborator traits, the error
//! taxonomy, and the configuration tree.

pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod model;

pub use backend::{Backend, BackendChunk, BackendOutput, BackendResult, MemoryHooks};
pub use config::GatewayConfig;
pub use error::{FailureClass, GatewayError, Result};
pub use events::GatewayEvent;
