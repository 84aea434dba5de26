//! Router (C6): priority-sorted keyword rules combined with a live
//! performance score to pick a provider (§4.6). Normalization constants
//! and weights are taken verbatim from
//! `original_source/lib/gateway/router.py`'s `ProviderPerformance`.

use std::collections::HashMap;
use std::sync::Arc;

use gateway_health::HealthChecker;
use tokio::sync::RwLock;

const LATENCY_WEIGHT: f64 = 0.3;
const SUCCESS_WEIGHT: f64 = 0.5;
const COST_WEIGHT: f64 = 0.2;
const LATENCY_NORM_MS: f64 = 30_000.0;
const COST_NORM_USD: f64 = 0.10;
const PERFORMANCE_WEIGHT: f64 = 0.4;
const HEALTHY_MULTIPLIER: f64 = 1.0;
const UNHEALTHY_MULTIPLIER: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub keywords: Vec<String>,
    pub target_provider: String,
    pub model_hint: Option<String>,
    pub priority: i32,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub provider: String,
    pub model: Option<String>,
    pub confidence: f64,
    pub matched_keywords: Vec<String>,
    pub rule_description: String,
    pub performance_score: f64,
}

/// Rolling latency/success/cost EMA per provider, feeding the routing
/// score. `calculate_score` mirrors `router.py` exactly.
#[derive(Debug, Clone)]
struct ProviderPerformance {
    success_rate_ema: f64,
    avg_latency_ms_ema: f64,
    avg_cost_usd_ema: f64,
}

impl Default for ProviderPerformance {
    fn default() -> Self {
        Self {
            success_rate_ema: 1.0,
            avg_latency_ms_ema: 0.0,
            avg_cost_usd_ema: 0.0,
        }
    }
}

const PERF_ALPHA: f64 = 0.1;

impl ProviderPerformance {
    fn record_request(&mut self, success: bool, latency_ms: f64, cost_usd: f64) {
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate_ema = PERF_ALPHA * outcome + (1.0 - PERF_ALPHA) * self.success_rate_ema;
        self.avg_latency_ms_ema = PERF_ALPHA * latency_ms + (1.0 - PERF_ALPHA) * self.avg_latency_ms_ema;
        self.avg_cost_usd_ema = PERF_ALPHA * cost_usd + (1.0 - PERF_ALPHA) * self.avg_cost_usd_ema;
    }

    fn calculate_score(&self, healthy: bool) -> f64 {
        let latency_score = 1.0 - (self.avg_latency_ms_ema / LATENCY_NORM_MS).min(1.0);
        let cost_score = 1.0 - (self.avg_cost_usd_ema / COST_NORM_USD).min(1.0);
        let raw = LATENCY_WEIGHT * latency_score
            + SUCCESS_WEIGHT * self.success_rate_ema
            + COST_WEIGHT * cost_score;
        raw * if healthy { HEALTHY_MULTIPLIER } else { UNHEALTHY_MULTIPLIER }
    }
}

pub struct Router {
    rules: Vec<RoutingRule>,
    default_provider: String,
    provider_groups: HashMap<String, Vec<String>>,
    all_providers: Vec<String>,
    performance: RwLock<HashMap<String, ProviderPerformance>>,
    health: Option<Arc<HealthChecker>>,
}

impl Router {
    pub fn new(
        rules: Vec<RoutingRule>,
        default_provider: String,
        provider_groups: HashMap<String, Vec<String>>,
        all_providers: Vec<String>,
        health: Option<Arc<HealthChecker>>,
    ) -> Self {
        let mut sorted = rules;
        sorted.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self {
            rules: sorted,
            default_provider,
            provider_groups,
            all_providers,
            performance: RwLock::new(HashMap::new()),
            health,
        }
    }

    pub async fn record_request(&self, provider: &str, success: bool, latency_ms: f64, cost_usd: f64) {
        let mut perf = self.performance.write().await;
        perf.entry(provider.to_string())
            .or_default()
            .record_request(success, latency_ms, cost_usd);
    }

    pub fn all_providers(&self) -> &[String] {
        &self.all_providers
    }

    pub fn provider_groups(&self) -> &HashMap<String, Vec<String>> {
        &self.provider_groups
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// Resolves `@name` group tokens (and `@all`) to a provider list.
    pub fn resolve_group(&self, token: &str) -> Vec<String> {
        let Some(name) = token.strip_prefix('@') else {
            return vec![token.to_string()];
        };
        if name == "all" {
            return self.all_providers.clone();
        }
        self.provider_groups.get(name).cloned().unwrap_or_default()
    }

    async fn is_healthy(&self, provider: &str) -> bool {
        match &self.health {
            Some(h) => h.is_available(provider).await,
            None => true,
        }
    }

    pub async fn route(&self, message: &str) -> RoutingDecision {
        let lower = message.to_lowercase();
        let mut best: Option<(i32, f64, RoutingDecision)> = None;

        for rule in &self.rules {
            if !self.is_healthy(&rule.target_provider).await {
                continue;
            }
            let matched: Vec<String> = rule
                .keywords
                .iter()
                .filter(|k| lower.contains(&k.to_lowercase()))
                .cloned()
                .collect();
            if matched.is_empty() {
                continue;
            }
            let keyword_conf = (matched.len() as f64 / rule.keywords.len() as f64
                * (rule.priority as f64 / 100.0))
                .min(1.0);
            let healthy = self.is_healthy(&rule.target_provider).await;
            let perf_score = {
                let perf = self.performance.read().await;
                perf.get(&rule.target_provider)
                    .cloned()
                    .unwrap_or_default()
                    .calculate_score(healthy)
            };
            let final_score =
                keyword_conf * (1.0 - PERFORMANCE_WEIGHT) + perf_score * PERFORMANCE_WEIGHT;

            let decision = RoutingDecision {
                provider: rule.target_provider.clone(),
                model: rule.model_hint.clone(),
                confidence: final_score,
                matched_keywords: matched,
                rule_description: rule.description.clone(),
                performance_score: perf_score,
            };

            match &best {
                Some((best_priority, best_final, _)) => {
                    if (rule.priority, final_score) > (*best_priority, *best_final) {
                        best = Some((rule.priority, final_score, decision));
                    }
                }
                None => best = Some((rule.priority, final_score, decision)),
            }
        }

        match best {
            Some((_, _, decision)) => decision,
            None => RoutingDecision {
                provider: self.default_provider.clone(),
                model: None,
                confidence: 0.5,
                matched_keywords: Vec::new(),
                rule_description: "default provider".into(),
                performance_score: 0.0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(keywords: &[&str], provider: &str, priority: i32) -> RoutingRule {
        RoutingRule {
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            target_provider: provider.into(),
            model_hint: None,
            priority,
            description: format!("{provider} rule"),
        }
    }

    #[tokio::test]
    async fn matches_keyword_rule() {
        let router = Router::new(
            vec![rule(&["code", "rust"], "anthropic", 80)],
            "openai".into(),
            HashMap::new(),
            vec!["anthropic".into(), "openai".into()],
            None,
        );
        let decision = router.route("please review this rust function").await;
        assert_eq!(decision.provider, "anthropic");
        assert!(decision.matched_keywords.contains(&"rust".to_string()));
    }

    #[tokio::test]
    async fn falls_back_to_default_when_no_match() {
        let router = Router::new(
            vec![rule(&["code"], "anthropic", 80)],
            "openai".into(),
            HashMap::new(),
            vec!["anthropic".into(), "openai".into()],
            None,
        );
        let decision = router.route("what's the weather today").await;
        assert_eq!(decision.provider, "openai");
        assert_eq!(decision.confidence, 0.5);
    }

    #[tokio::test]
    async fn higher_priority_rule_wins_on_tie() {
        let router = Router::new(
            vec![rule(&["data"], "low_pri", 10), rule(&["data"], "high_pri", 90)],
            "openai".into(),
            HashMap::new(),
            vec!["low_pri".into(), "high_pri".into()],
            None,
        );
        let decision = router.route("analyze this data set").await;
        assert_eq!(decision.provider, "high_pri");
    }

    #[test]
    fn group_token_resolves_to_members() {
        let mut groups = HashMap::new();
        groups.insert("fast".to_string(), vec!["a".into(), "b".into()]);
        let router = Router::new(vec![], "openai".into(), groups, vec!["a".into(), "b".into(), "c".into()], None);
        assert_eq!(router.resolve_group("@fast"), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(router.resolve_group("@all"), vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(router.resolve_group("openai"), vec!["openai".to_string()]);
    }

    #[tokio::test]
    async fn performance_score_recovers_after_failures_then_successes() {
        let router = Router::new(
            vec![rule(&["code"], "anthropic", 50)],
            "openai".into(),
            HashMap::new(),
            vec!["anthropic".into()],
            None,
        );
        for _ in 0..20 {
            router.record_request("anthropic", false, 25_000.0, 0.09).await;
        }
        let degraded = router.route("write some code").await.performance_score;
        for _ in 0..40 {
            router.record_request("anthropic", true, 50.0, 0.0005).await;
        }
        let recovered = router.route("write some code").await.performance_score;
        assert!(recovered > degraded);
    }
}
