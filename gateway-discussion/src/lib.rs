//! DiscussionOrchestrator (C11): three fixed rounds per session,
//! partial-failure tolerant, summary call, and continuations via
//! condensed context (§4.11).

pub mod export;
pub mod templates;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gateway_core::model::{DiscussionMessage, DiscussionSession, DiscussionStatus, MessageRole, MessageStatus};
use gateway_core::Backend;
use gateway_store::StateStore;
use tokio::time::timeout;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DiscussionConfig {
    pub rounds: u32,
    pub min_providers: usize,
    pub round_timeout: Duration,
    pub provider_timeout: Duration,
    pub summary_provider_override: Option<String>,
}

impl Default for DiscussionConfig {
    fn default() -> Self {
        Self {
            rounds: 3,
            min_providers: 2,
            round_timeout: Duration::from_secs(60),
            provider_timeout: Duration::from_secs(20),
            summary_provider_override: None,
        }
    }
}

pub struct DiscussionOrchestrator {
    store: Arc<dyn StateStore>,
    backends: HashMap<String, Arc<dyn Backend>>,
    config: DiscussionConfig,
}

impl DiscussionOrchestrator {
    pub fn new(
        store: Arc<dyn StateStore>,
        backends: HashMap<String, Arc<dyn Backend>>,
        config: DiscussionConfig,
    ) -> Self {
        Self {
            store,
            backends,
            config,
        }
    }

    /// Starts a fresh session and runs it to completion (or failure).
    pub async fn start(&self, topic: String, providers: Vec<String>) -> Uuid {
        let session = DiscussionSession {
            id: Uuid::new_v4(),
            topic: topic.clone(),
            providers: providers.clone(),
            status: DiscussionStatus::Active,
            parent_session_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let id = session.id;
        let _ = self.store.create_session(session).await;
        self.run(id, &topic, &providers).await;
        id
    }

    /// Builds a condensed context (topic + summary + up to three round-3
    /// proposals) and starts a fresh, linked session.
    pub async fn continue_session(&self, parent_id: Uuid, follow_up_topic: String) -> Option<Uuid> {
        let parent = self.store.get_session(parent_id).await.ok().flatten()?;
        let messages = self.store.get_messages(parent_id, None, None).await.ok()?;
        let summary = messages
            .iter()
            .find(|m| m.round == 0)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let round3: Vec<String> = messages
            .iter()
            .filter(|m| m.round == 3)
            .take(3)
            .map(|m| m.content.clone())
            .collect();

        let condensed_topic = format!(
            "{follow_up_topic}\n\nPrior topic: {}\nSummary: {summary}\nRound 3 proposals:\n{}",
            parent.topic,
            round3.join("\n")
        );

        let session = DiscussionSession {
            id: Uuid::new_v4(),
            topic: condensed_topic.clone(),
            providers: parent.providers.clone(),
            status: DiscussionStatus::Active,
            parent_session_id: Some(parent_id),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let id = session.id;
        let _ = self.store.create_session(session).await;
        self.run(id, &condensed_topic, &parent.providers).await;
        Some(id)
    }

    async fn run(&self, session_id: Uuid, topic: &str, providers: &[String]) {
        for round in 1..=self.config.rounds {
            let prompt = self.build_prompt(session_id, topic, round).await;
            let succeeded = self.run_round(session_id, round, providers, &prompt).await;
            if round == 1 && succeeded < self.config.min_providers {
                self.fail_session(session_id).await;
                return;
            }
        }
        self.summarize(session_id, topic, providers).await;
    }

    async fn build_prompt(&self, session_id: Uuid, topic: &str, round: u32) -> String {
        if round == 1 {
            return format!("Topic: {topic}\n\nPropose your position.");
        }
        let prior_rounds: Vec<u32> = (1..round).collect();
        let mut context = format!("Topic: {topic}\n\n");
        for r in prior_rounds {
            if let Ok(messages) = self.store.get_messages(session_id, Some(r), None).await {
                for m in messages {
                    let who = m.provider.as_deref().unwrap_or("unknown");
                    context.push_str(&format!("[Round {r}] {who}: {}\n", m.content));
                }
            }
        }
        let stage = if round == 2 { "Review the proposals above." } else { "Revise given the reviews above." };
        context.push_str(stage);
        context
    }

    async fn run_round(&self, session_id: Uuid, round: u32, providers: &[String], prompt: &str) -> usize {
        let mut handles = Vec::new();
        for provider in providers {
            let Some(backend) = self.backends.get(provider).cloned() else {
                continue;
            };
            let provider = provider.clone();
            let prompt = prompt.to_string();
            let provider_timeout = self.config.provider_timeout;
            handles.push(tokio::spawn(async move {
                let result = timeout(provider_timeout, backend.call(&prompt)).await;
                (provider, result)
            }));
        }

        let mut succeeded = 0usize;
        let results = futures_join_all(handles).await;
        for (provider, result) in results {
            let (content, status) = match result {
                Ok(Ok(output)) => {
                    succeeded += 1;
                    (output.content, MessageStatus::Delivered)
                }
                Ok(Err(e)) => (e.to_string(), MessageStatus::Failed),
                Err(_) => ("round timed out".to_string(), MessageStatus::Failed),
            };
            let message = DiscussionMessage {
                id: Uuid::new_v4(),
                session_id,
                round,
                provider: Some(provider),
                role: MessageRole::Provider,
                content,
                status,
                created_at: Utc::now(),
            };
            let _ = self.store.create_message(message).await;
        }
        succeeded
    }

    async fn summarize(&self, session_id: Uuid, topic: &str, providers: &[String]) {
        let summary_provider = self
            .config
            .summary_provider_override
            .clone()
            .or_else(|| providers.first().cloned());

        let Some(provider) = summary_provider else {
            self.fail_session(session_id).await;
            return;
        };
        let Some(backend) = self.backends.get(&provider).cloned() else {
            self.fail_session(session_id).await;
            return;
        };

        let transcript = self.full_transcript(session_id, topic).await;
        let summary_text = match timeout(self.config.provider_timeout, backend.call(&transcript)).await {
            Ok(Ok(output)) => output.content,
            _ => {
                warn!(session_id = %session_id, "summary provider failed");
                self.fail_session(session_id).await;
                return;
            }
        };

        let message = DiscussionMessage {
            id: Uuid::new_v4(),
            session_id,
            round: 0,
            provider: Some(provider),
            role: MessageRole::Summary,
            content: summary_text,
            status: MessageStatus::Delivered,
            created_at: Utc::now(),
        };
        let _ = self.store.create_message(message).await;

        if let Ok(Some(mut session)) = self.store.get_session(session_id).await {
            session.status = DiscussionStatus::Completed;
            session.updated_at = Utc::now();
            let _ = self.store.update_session(session).await;
        }
    }

    async fn full_transcript(&self, session_id: Uuid, topic: &str) -> String {
        let mut out = format!("Topic: {topic}\n\n");
        if let Ok(messages) = self.store.get_messages(session_id, None, None).await {
            for m in messages {
                let who = m.provider.as_deref().unwrap_or("unknown");
                out.push_str(&format!("[Round {}] {who}: {}\n", m.round, m.content));
            }
        }
        out.push_str("\nSynthesize the discussion above into a final answer.");
        out
    }

    async fn fail_session(&self, session_id: Uuid) {
        if let Ok(Some(mut session)) = self.store.get_session(session_id).await {
            session.status = DiscussionStatus::Failed;
            session.updated_at = Utc::now();
            let _ = self.store.update_session(session).await;
        }
    }
}

async fn futures_join_all<T>(
    handles: Vec<tokio::task::JoinHandle<T>>,
) -> Vec<T> {
    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        if let Ok(v) = handle.await {
            out.push(v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gateway_core::{BackendOutput, BackendResult, FailureClass};
    use gateway_store::InMemoryStateStore;

    struct Echo(String);
    #[async_trait]
    impl Backend for Echo {
        fn name(&self) -> &str {
            &self.0
        }
        async fn call(&self, message: &str) -> BackendResult {
            Ok(BackendOutput {
                content: format!("{}: reply to [{message}]", self.0),
                input_tokens: 1,
                output_tokens: 1,
                latency_ms: 1,
            })
        }
    }

    struct AlwaysFails;
    #[async_trait]
    impl Backend for AlwaysFails {
        fn name(&self) -> &str {
            "broken"
        }
        async fn call(&self, _message: &str) -> BackendResult {
            Err(FailureClass::NonRetryablePermanent("down".into()))
        }
    }

    fn orchestrator(backends: HashMap<String, Arc<dyn Backend>>) -> DiscussionOrchestrator {
        DiscussionOrchestrator::new(
            Arc::new(InMemoryStateStore::new()),
            backends,
            DiscussionConfig {
                round_timeout: Duration::from_secs(5),
                provider_timeout: Duration::from_secs(5),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn completes_three_rounds_and_summary() {
        let mut backends: HashMap<String, Arc<dyn Backend>> = HashMap::new();
        backends.insert("a".into(), Arc::new(Echo("a".into())));
        backends.insert("b".into(), Arc::new(Echo("b".into())));
        let orch = orchestrator(backends);
        let id = orch.start("should we use Rust".into(), vec!["a".into(), "b".into()]).await;
        let session = orch.store.get_session(id).await.unwrap().unwrap();
        assert_eq!(session.status, DiscussionStatus::Completed);
        let messages = orch.store.get_messages(id, None, None).await.unwrap();
        assert!(messages.iter().any(|m| m.round == 0));
        assert!(messages.iter().filter(|m| m.round == 3).count() == 2);
    }

    #[tokio::test]
    async fn fails_when_round_one_below_min_providers() {
        let mut backends: HashMap<String, Arc<dyn Backend>> = HashMap::new();
        backends.insert("broken".into(), Arc::new(AlwaysFails));
        let orch = orchestrator(backends);
        let id = orch.start("topic".into(), vec!["broken".into()]).await;
        let session = orch.store.get_session(id).await.unwrap().unwrap();
        assert_eq!(session.status, DiscussionStatus::Failed);
    }

    #[tokio::test]
    async fn continuation_links_parent_session() {
        let mut backends: HashMap<String, Arc<dyn Backend>> = HashMap::new();
        backends.insert("a".into(), Arc::new(Echo("a".into())));
        backends.insert("b".into(), Arc::new(Echo("b".into())));
        let orch = orchestrator(backends);
        let parent = orch.start("topic one".into(), vec!["a".into(), "b".into()]).await;
        let child = orch.continue_session(parent, "topic two".into()).await.unwrap();
        let child_session = orch.store.get_session(child).await.unwrap().unwrap();
        assert_eq!(child_session.parent_session_id, Some(parent));
    }
}
