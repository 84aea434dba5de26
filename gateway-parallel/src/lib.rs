//! ParallelExecutor (C9): fan-out across a provider group with
//! `FirstSuccess`/`Fastest`/`All`/`Consensus` aggregation (§4.9).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gateway_core::model::AggregationStrategy;
use gateway_core::{Backend, FailureClass};
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct BranchResult {
    pub provider: String,
    pub outcome: Result<String, String>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ParallelOutcome {
    pub chosen: Option<BranchResult>,
    pub all_responses: Vec<BranchResult>,
}

pub struct ParallelExecutor {
    per_provider_timeout: Duration,
}

impl ParallelExecutor {
    pub fn new(per_provider_timeout: Duration) -> Self {
        Self { per_provider_timeout }
    }

    async fn run_one(
        backend: Arc<dyn Backend>,
        provider: String,
        message: String,
        per_provider_timeout: Duration,
    ) -> BranchResult {
        let start = Instant::now();
        let outcome = match timeout(per_provider_timeout, backend.call(&message)).await {
            Ok(Ok(out)) => Ok(out.content),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(FailureClass::RetryableTransient("per-provider timeout".into()).to_string()),
        };
        BranchResult {
            provider,
            outcome,
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// `timeout_s` is the request's declared per-call timeout; each branch
    /// is bounded by whichever of it and the executor's own
    /// `per_provider_timeout` ceiling is tighter.
    pub async fn execute(
        &self,
        providers: &[String],
        backends: &HashMap<String, Arc<dyn Backend>>,
        message: &str,
        strategy: AggregationStrategy,
        timeout_s: u64,
    ) -> ParallelOutcome {
        let branch_timeout = Duration::from_secs(timeout_s.max(1)).min(self.per_provider_timeout);
        let mut handles = Vec::new();
        for provider in providers {
            let Some(backend) = backends.get(provider).cloned() else {
                continue;
            };
            let provider = provider.clone();
            let message = message.to_string();
            handles.push(tokio::spawn(Self::run_one(
                backend,
                provider,
                message,
                branch_timeout,
            )));
        }

        match strategy {
            AggregationStrategy::FirstSuccess => {
                let mut all_responses = Vec::new();
                let mut remaining = handles;
                let mut chosen = None;
                while !remaining.is_empty() {
                    let (result, _idx, rest) = futures::future::select_all(remaining).await;
                    remaining = rest;
                    if let Ok(branch) = result {
                        let is_success = branch.outcome.is_ok();
                        all_responses.push(branch.clone());
                        if is_success && chosen.is_none() {
                            chosen = Some(branch);
                            break;
                        }
                    }
                }
                for handle in remaining {
                    handle.abort();
                }
                ParallelOutcome { chosen, all_responses }
            }
            AggregationStrategy::Fastest => {
                let all_responses = Self::join_all(handles).await;
                let chosen = all_responses
                    .iter()
                    .filter(|b| b.outcome.is_ok())
                    .min_by_key(|b| b.latency_ms)
                    .cloned();
                ParallelOutcome { chosen, all_responses }
            }
            AggregationStrategy::All => {
                let all_responses = Self::join_all(handles).await;
                ParallelOutcome {
                    chosen: all_responses.first().cloned(),
                    all_responses,
                }
            }
            AggregationStrategy::Consensus => {
                let all_responses = Self::join_all(handles).await;
                let chosen = Self::consensus(&all_responses);
                ParallelOutcome { chosen, all_responses }
            }
        }
    }

    async fn join_all(handles: Vec<tokio::task::JoinHandle<BranchResult>>) -> Vec<BranchResult> {
        futures::future::join_all(handles)
            .await
            .into_iter()
            .filter_map(Result::ok)
            .collect()
    }

    /// Majority vote by a normalized-text hash, per §4.9/§9 (hash-based
    /// consensus was chosen over semantic similarity).
    fn consensus(all_responses: &[BranchResult]) -> Option<BranchResult> {
        let mut counts: HashMap<u64, (usize, &BranchResult)> = HashMap::new();
        for branch in all_responses.iter().filter(|b| b.outcome.is_ok()) {
            let text = branch.outcome.as_ref().unwrap().trim().to_lowercase();
            let key = seahash(&text);
            let entry = counts.entry(key).or_insert((0, branch));
            entry.0 += 1;
        }
        counts
            .into_values()
            .max_by_key(|(count, _)| *count)
            .map(|(_, branch)| branch.clone())
    }
}

fn seahash(text: &str) -> u64 {
    // Simple FNV-1a; adequate for grouping identical normalized text, not
    // for cryptographic uniqueness.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in text.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gateway_core::BackendOutput;
    use gateway_core::BackendResult;

    struct Canned {
        name: String,
        reply: Result<&'static str, &'static str>,
        delay_ms: u64,
    }

    #[async_trait]
    impl Backend for Canned {
        fn name(&self) -> &str {
            &self.name
        }
        async fn call(&self, _message: &str) -> BackendResult {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            match self.reply {
                Ok(text) => Ok(BackendOutput {
                    content: text.to_string(),
                    input_tokens: 1,
                    output_tokens: 1,
                    latency_ms: self.delay_ms,
                }),
                Err(e) => Err(FailureClass::NonRetryablePermanent(e.to_string())),
            }
        }
    }

    fn backends(entries: Vec<(&str, Result<&'static str, &'static str>, u64)>) -> HashMap<String, Arc<dyn Backend>> {
        entries
            .into_iter()
            .map(|(name, reply, delay_ms)| {
                (
                    name.to_string(),
                    Arc::new(Canned {
                        name: name.to_string(),
                        reply,
                        delay_ms,
                    }) as Arc<dyn Backend>,
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn first_success_returns_first_ok() {
        let backends = backends(vec![("slow", Ok("slow-reply"), 50), ("fast", Ok("fast-reply"), 5)]);
        let exec = ParallelExecutor::new(Duration::from_secs(1));
        let providers = vec!["slow".to_string(), "fast".to_string()];
        let outcome = exec
            .execute(&providers, &backends, "hi", AggregationStrategy::FirstSuccess, 5)
            .await;
        assert_eq!(outcome.chosen.unwrap().provider, "fast");
    }

    #[tokio::test]
    async fn fastest_ignores_failures() {
        let backends = backends(vec![("bad", Err("boom"), 1), ("good", Ok("ok"), 20)]);
        let exec = ParallelExecutor::new(Duration::from_secs(1));
        let providers = vec!["bad".to_string(), "good".to_string()];
        let outcome = exec
            .execute(&providers, &backends, "hi", AggregationStrategy::Fastest, 5)
            .await;
        assert_eq!(outcome.chosen.unwrap().provider, "good");
    }

    #[tokio::test]
    async fn all_strategy_collects_every_branch() {
        let backends = backends(vec![("a", Ok("x"), 1), ("b", Err("boom"), 1)]);
        let exec = ParallelExecutor::new(Duration::from_secs(1));
        let providers = vec!["a".to_string(), "b".to_string()];
        let outcome = exec
            .execute(&providers, &backends, "hi", AggregationStrategy::All, 5)
            .await;
        assert_eq!(outcome.all_responses.len(), 2);
    }

    #[tokio::test]
    async fn consensus_picks_majority_text() {
        let backends = backends(vec![
            ("a", Ok("Yes please proceed"), 1),
            ("b", Ok("yes please proceed "), 1),
            ("c", Ok("no, stop"), 1),
        ]);
        let exec = ParallelExecutor::new(Duration::from_secs(1));
        let providers = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let outcome = exec
            .execute(&providers, &backends, "hi", AggregationStrategy::Consensus, 5)
            .await;
        let chosen = outcome.chosen.unwrap();
        assert_eq!(chosen.outcome.unwrap().trim().to_lowercase(), "yes please proceed");
    }
}
