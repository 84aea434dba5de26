//! External collaborator contracts: provider backends and the optional
//! memory hooks (§6, §9 null-object pattern).

use async_trait::async_trait;

use crate::error::FailureClass;

/// A single completed call to a provider backend.
#[derive(Debug, Clone)]
pub struct BackendOutput {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
}

pub type BackendResult = Result<BackendOutput, FailureClass>;

/// One chunk surfaced by a streaming backend call.
#[derive(Debug, Clone)]
pub struct BackendChunk {
    pub content: String,
    pub is_final: bool,
}

/// A provider integration. Implementors wrap whatever transport talks to
/// the actual model (HTTP, gRPC, local process); the gateway only ever
/// sees this trait.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, message: &str) -> BackendResult;

    /// Streaming variant. Backends that can't stream natively should
    /// return a single final chunk wrapping [`Backend::call`]'s output.
    async fn call_streaming(
        &self,
        message: &str,
        on_chunk: &(dyn Fn(BackendChunk) + Send + Sync),
    ) -> BackendResult {
        let out = self.call(message).await?;
        on_chunk(BackendChunk {
            content: out.content.clone(),
            is_final: true,
        });
        Ok(out)
    }
}

/// Optional pre/post hooks into an external memory subsystem. Both methods
/// default to a no-op so the absence of a memory backend requires no
/// branching at call sites beyond the presence check performed once at
/// startup (§9).
#[async_trait]
pub trait MemoryHooks: Send + Sync {
    /// Called before dispatch; may return text to prepend to the message.
    async fn pre_call(&self, _request_id: uuid::Uuid, _message: &str) -> Option<String> {
        None
    }

    /// Called after a successful response; fire-and-forget.
    async fn post_call(&self, _request_id: uuid::Uuid, _message: &str, _response: &str) {}
}
