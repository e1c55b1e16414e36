//! Task → provider routing with health checks, bounded retry, and failover.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use brandlens_shared::{
    AppConfig, BrandlensError, MAX_ATTEMPTS_CEILING, ModelTarget, ModelTaskConfig, Result,
    RoutingConfig,
};

use crate::provider::{Generation, GenerationRequest, ModelProvider, ProviderError};
use crate::registry::ProviderRegistry;

/// Prompt pair handed to the router by a model-backed step.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Which side of a task's pair served (or was tried for) a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteRole {
    Primary,
    Fallback,
}

impl RouteRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }
}

/// The provider/model that answered a routed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDecision {
    pub task: String,
    pub role: RouteRole,
    pub provider: String,
    pub model: String,
    /// Generation attempts spent on the serving target.
    pub attempts: u32,
}

impl RouteDecision {
    /// `provider/model`, as recorded on step records.
    pub fn served_by(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

/// A routed value together with the decision that produced it.
#[derive(Debug, Clone)]
pub struct Routed<T> {
    pub value: T,
    pub decision: RouteDecision,
}

/// Health of one configured target, as reported by [`ModelRouter::check_health`].
#[derive(Debug, Clone, Serialize)]
pub struct TargetHealth {
    pub task: String,
    pub role: RouteRole,
    pub target: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Retry and timeout policy applied to every health check and generation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub call_timeout: Duration,
    pub health_timeout: Duration,
}

impl From<&RoutingConfig> for RetryPolicy {
    fn from(config: &RoutingConfig) -> Self {
        Self {
            max_attempts: config.attempts(),
            backoff: config.backoff(),
            call_timeout: config.call_timeout(),
            health_timeout: config.health_timeout(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RoutingConfig::default())
    }
}

/// Resolves a task to a provider/model and applies uniform failover.
///
/// For each request the primary target is health-checked and, if healthy,
/// invoked. Any failure moves to the fallback target, which goes through the
/// same sequence. When both fail the request ends in
/// [`BrandlensError::ModelUnavailable`].
#[derive(Clone)]
pub struct ModelRouter {
    registry: ProviderRegistry,
    tasks: BTreeMap<String, ModelTaskConfig>,
    policy: RetryPolicy,
}

impl ModelRouter {
    pub fn new(
        registry: ProviderRegistry,
        tasks: BTreeMap<String, ModelTaskConfig>,
        policy: RetryPolicy,
    ) -> Self {
        let policy = RetryPolicy {
            max_attempts: policy.max_attempts.clamp(1, MAX_ATTEMPTS_CEILING),
            ..policy
        };
        Self {
            registry,
            tasks,
            policy,
        }
    }

    /// Build providers and routing from the application config.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self::new(
            ProviderRegistry::from_config(config)?,
            config.tasks.clone(),
            RetryPolicy::from(&config.routing),
        ))
    }

    pub fn task_config(&self, task: &str) -> Result<&ModelTaskConfig> {
        self.tasks
            .get(task)
            .ok_or_else(|| BrandlensError::config(format!("no [tasks.{task}] configured")))
    }

    /// Run `prompt` for `task` against the primary target, failing over to the fallback.
    #[instrument(skip_all, fields(task = %task))]
    pub async fn generate(&self, task: &str, prompt: &Prompt) -> Result<Routed<Generation>> {
        let config = self.task_config(task)?;
        let mut failures = Vec::with_capacity(2);

        for (role, target) in [
            (RouteRole::Primary, &config.primary),
            (RouteRole::Fallback, &config.fallback),
        ] {
            match self.try_target(task, role, target, config, prompt).await {
                Ok(routed) => return Ok(routed),
                Err(reason) => {
                    warn!(
                        task,
                        role = role.as_str(),
                        target = %target,
                        reason = %reason,
                        "route target failed"
                    );
                    failures.push(format!("{} {target}: {reason}", role.as_str()));
                }
            }
        }

        Err(BrandlensError::model_unavailable(task, failures.join("; ")))
    }

    async fn try_target(
        &self,
        task: &str,
        role: RouteRole,
        target: &ModelTarget,
        config: &ModelTaskConfig,
        prompt: &Prompt,
    ) -> std::result::Result<Routed<Generation>, String> {
        let provider = self
            .registry
            .get(&target.provider)
            .ok_or_else(|| format!("provider `{}` is not configured", target.provider))?;

        self.health(&*provider, &target.model)
            .await
            .map_err(|e| format!("health check failed: {e}"))?;

        let request = GenerationRequest {
            system: prompt.system.clone(),
            prompt: prompt.user.clone(),
            model: target.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            json_mode: true,
        };

        let (outcome, attempts) = with_retry(&self.policy, self.policy.call_timeout, || {
            provider.generate(&request)
        })
        .await;
        let generation = outcome.map_err(|e| format!("generation failed: {e}"))?;

        let decision = RouteDecision {
            task: task.to_string(),
            role,
            provider: target.provider.clone(),
            model: target.model.clone(),
            attempts,
        };
        info!(
            task,
            role = role.as_str(),
            provider = %decision.provider,
            model = %decision.model,
            attempts,
            tokens_in = generation.tokens_in,
            tokens_out = generation.tokens_out,
            "route served"
        );

        Ok(Routed {
            value: generation,
            decision,
        })
    }

    async fn health(
        &self,
        provider: &dyn ModelProvider,
        model: &str,
    ) -> std::result::Result<(), ProviderError> {
        let (outcome, attempts) = with_retry(&self.policy, self.policy.health_timeout, || {
            provider.health_check(model)
        })
        .await;
        debug!(provider = provider.id(), model, attempts, ok = outcome.is_ok(), "health check");
        outcome
    }

    /// Health-check every configured target of every task.
    pub async fn check_health(&self) -> Vec<TargetHealth> {
        let mut report = Vec::new();
        for (task, config) in &self.tasks {
            for (role, target) in [
                (RouteRole::Primary, &config.primary),
                (RouteRole::Fallback, &config.fallback),
            ] {
                let error = match self.registry.get(&target.provider) {
                    None => Some(format!("provider `{}` is not configured", target.provider)),
                    Some(provider) => self
                        .health(&*provider, &target.model)
                        .await
                        .err()
                        .map(|e| e.to_string()),
                };
                report.push(TargetHealth {
                    task: task.clone(),
                    role,
                    target: target.to_string(),
                    healthy: error.is_none(),
                    error,
                });
            }
        }
        report
    }
}

/// Run `op` up to `policy.max_attempts` times with exponential backoff.
///
/// Each attempt is bounded by `timeout`; a timeout counts as a retryable
/// failure. Non-retryable errors stop immediately. Returns the final outcome
/// and the number of attempts made.
async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    mut op: F,
) -> (std::result::Result<T, ProviderError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, ProviderError>>,
{
    let mut attempt = 0;
    let mut delay = policy.backoff;

    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(Some(timeout))),
        };

        match outcome {
            Ok(value) => return (Ok(value), attempt),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                debug!(attempt, error = %e, "retrying after {:?}", delay);
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(e) => return (Err(e), attempt),
        }
    }
}
