//! Step scripts replayed against one cache and one breaker.
//!
//! Time only moves on `advance` steps, so a script produces the same
//! output on every run.
//!
//! ```yaml
//! cache: { max_size: 2 }
//! breaker: { failure_threshold: 2, timeout: 10s }
//! steps:
//!   - put: { key: a, value: 1 }
//!   - get: a
//!   - call: { operation: fetch_feed, ok: false }
//!   - advance: 10s
//!   - state
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use flowguard_core::config::duration;
use flowguard_core::{
    BreakerConfig, CacheConfig, CacheProfile, CallContext, PutOptions, ResilienceConfig,
};
use flowguard_runtime::{
    CircuitBreaker, ExecuteError, ExpiringCache, GuardedCache, ManualTimer, RuntimeError,
    TimerSource,
};

/// A replay script.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    /// Overrides the cache section picked from the config
    #[serde(default)]
    pub cache: Option<CacheConfig>,

    /// Overrides the config's breaker section
    #[serde(default)]
    pub breaker: Option<BreakerConfig>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Script {
    /// Parse a script. JSON is accepted as YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(yaml).context("Script is not valid YAML")?;
        serde_json::from_value(value).context("Script does not match the step format")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("Invalid script {}", path.display()))
    }
}

/// One script step.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Put(PutStep),
    Get(String),
    Delete(String),
    Clear,
    Advance(#[serde(deserialize_with = "duration::required::deserialize")] Duration),
    Call(CallStep),
    State,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PutStep {
    pub key: String,
    pub value: Value,

    /// Durable unless set to false
    #[serde(default = "yes")]
    pub strong: bool,

    #[serde(default, deserialize_with = "duration::optional::deserialize")]
    pub ttl: Option<Duration>,
}

/// A breaker call whose outcome is fixed by the script.
///
/// With a `key` the call goes through the cache first and a successful
/// value is stored under that key.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallStep {
    #[serde(default)]
    pub operation: Option<String>,

    #[serde(default = "yes")]
    pub ok: bool,

    #[serde(default)]
    pub value: Value,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub key: Option<String>,
}

fn yes() -> bool {
    true
}

/// Cache and breaker on a shared virtual clock.
pub struct Replay {
    timer: Arc<ManualTimer>,
    guarded: GuardedCache<String, Value>,
}

impl Replay {
    pub fn new(
        name: &str,
        cache: CacheConfig,
        breaker: BreakerConfig,
    ) -> Result<Self, RuntimeError> {
        let timer = Arc::new(ManualTimer::new());
        let cache = ExpiringCache::named(name, cache, timer.clone())?;
        let breaker = CircuitBreaker::named(name, breaker, timer.clone())?;

        Ok(Self {
            timer,
            guarded: GuardedCache::new(Arc::new(cache), Arc::new(breaker)),
        })
    }

    /// Resolve the cache and breaker settings for a script.
    ///
    /// Script sections win; otherwise the profile's cache section and the
    /// API breaker section of `config` are used.
    pub fn from_script(
        script: &Script,
        config: &ResilienceConfig,
        profile: CacheProfile,
    ) -> Result<Self, RuntimeError> {
        let cache = script.cache.clone().unwrap_or_else(|| match profile {
            CacheProfile::General => CacheConfig::default(),
            CacheProfile::Video => config.video_cache.clone(),
            CacheProfile::Image => config.image_cache.clone(),
        });
        let breaker = script
            .breaker
            .clone()
            .unwrap_or_else(|| config.api_breaker.clone());

        Self::new(&profile.to_string(), cache, breaker)
    }

    /// Run every step, one output object per step.
    pub async fn run(&self, steps: &[Step]) -> Vec<Value> {
        let mut lines = Vec::with_capacity(steps.len());
        for step in steps {
            lines.push(self.step(step).await);
        }
        lines
    }

    pub async fn step(&self, step: &Step) -> Value {
        let cache = self.guarded.cache();

        match step {
            Step::Put(put) => {
                let options = PutOptions {
                    ttl: put.ttl,
                    strong: put.strong,
                };
                cache.put(put.key.clone(), put.value.clone(), options);
                json!({ "step": "put", "key": put.key, "len": cache.len() })
            }
            Step::Get(key) => {
                json!({ "step": "get", "key": key, "value": cache.get(key.as_str()) })
            }
            Step::Delete(key) => {
                json!({ "step": "delete", "key": key, "removed": cache.delete(key.as_str()) })
            }
            Step::Clear => {
                cache.clear();
                json!({ "step": "clear", "len": cache.len() })
            }
            Step::Advance(by) => {
                self.timer.advance(*by);
                json!({ "step": "advance", "elapsed_ms": millis(self.timer.elapsed()) })
            }
            Step::Call(call) => self.call(call).await,
            Step::State => self.state(),
        }
    }

    async fn call(&self, call: &CallStep) -> Value {
        let context = match &call.operation {
            Some(name) => CallContext::named(name.clone()),
            None => CallContext::default(),
        };
        let outcome = if call.ok {
            Ok(call.value.clone())
        } else {
            Err(call
                .error
                .clone()
                .unwrap_or_else(|| "operation failed".to_string()))
        };

        let result = match &call.key {
            Some(key) => {
                self.guarded
                    .fetch(key.clone(), &context, PutOptions::strong(), move || async move {
                        outcome
                    })
                    .await
            }
            None => {
                self.guarded
                    .breaker()
                    .execute(&context, move || async move { outcome })
                    .await
            }
        };

        let operation = context.operation_name();
        match result {
            Ok(value) => json!({
                "step": "call",
                "operation": operation,
                "outcome": "ok",
                "value": value
            }),
            Err(ExecuteError::Open(open)) => json!({
                "step": "call",
                "operation": operation,
                "outcome": "rejected",
                "error": open.to_string(),
                "retry_in_ms": millis(open.retry_in)
            }),
            Err(ExecuteError::Operation(error)) => json!({
                "step": "call",
                "operation": operation,
                "outcome": "failed",
                "error": error
            }),
        }
    }

    fn state(&self) -> Value {
        let now = self.timer.now();
        let breaker = self.guarded.breaker().state();
        let stats = self.guarded.cache().stats();

        json!({
            "step": "state",
            "elapsed_ms": millis(self.timer.elapsed()),
            "breaker": {
                "state": breaker.state,
                "failure_count": breaker.failure_count,
                "success_count": breaker.success_count,
                "retry_in_ms": breaker
                    .next_attempt_at
                    .map(|at| millis(at.saturating_duration_since(now)))
            },
            "cache": {
                "len": stats.len,
                "hits": stats.hits,
                "ephemeral_hits": stats.ephemeral_hits,
                "misses": stats.misses,
                "evictions": stats.evictions,
                "expirations": stats.expirations,
                "swept": stats.swept
            }
        })
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn replay(yaml: &str) -> Vec<Value> {
        let script = Script::from_yaml(yaml).unwrap();
        let replay = Replay::from_script(
            &script,
            &ResilienceConfig::default(),
            CacheProfile::General,
        )
        .unwrap();
        replay.run(&script.steps).await
    }

    #[tokio::test]
    async fn test_eviction_scenario() {
        let lines = replay(
            r#"
cache: { max_size: 2 }
steps:
  - put: { key: a, value: 1 }
  - put: { key: b, value: 2 }
  - get: a
  - put: { key: c, value: 3 }
  - get: b
  - get: a
  - get: c
"#,
        )
        .await;

        assert_eq!(lines[3]["len"], 2);
        assert_eq!(lines[4]["value"], Value::Null);
        assert_eq!(lines[5]["value"], 1);
        assert_eq!(lines[6]["value"], 3);
    }

    #[tokio::test]
    async fn test_breaker_scenario() {
        let lines = replay(
            r#"
breaker: { failure_threshold: 2, timeout: 10s }
steps:
  - call: { operation: fetch_feed, ok: false, error: "HTTP 503" }
  - call: { operation: fetch_feed, ok: false }
  - state
  - call: { operation: fetch_feed }
  - advance: 10001
  - call: { operation: fetch_feed, value: [1, 2] }
  - state
"#,
        )
        .await;

        assert_eq!(lines[0]["outcome"], "failed");
        assert_eq!(lines[0]["error"], "HTTP 503");
        assert_eq!(lines[1]["error"], "operation failed");
        assert_eq!(lines[2]["breaker"]["state"], "OPEN");
        assert_eq!(lines[2]["breaker"]["retry_in_ms"], 10_000);

        assert_eq!(lines[3]["outcome"], "rejected");
        assert_eq!(lines[3]["error"], "Circuit breaker is OPEN for fetch_feed");

        assert_eq!(lines[5]["outcome"], "ok");
        assert_eq!(lines[5]["value"], json!([1, 2]));
        assert_eq!(lines[6]["breaker"]["state"], "HALF_OPEN");
        assert_eq!(lines[6]["breaker"]["retry_in_ms"], Value::Null);
    }

    #[tokio::test]
    async fn test_keyed_call_fills_cache() {
        let lines = replay(
            r#"
steps:
  - call: { operation: load_post, key: post_1, value: hello }
  - call: { operation: load_post, key: post_1, ok: false }
  - get: post_1
  - state
"#,
        )
        .await;

        assert_eq!(lines[0]["value"], "hello");
        // Served from cache; the failing loader never runs
        assert_eq!(lines[1]["outcome"], "ok");
        assert_eq!(lines[2]["value"], "hello");
        assert_eq!(lines[3]["breaker"]["failure_count"], 0);
    }

    #[tokio::test]
    async fn test_ttl_and_advance() {
        let lines = replay(
            r#"
steps:
  - put: { key: session, value: x, ttl: 5s }
  - put: { key: scratch, value: y, strong: false }
  - advance: 5s
  - get: session
  - get: scratch
  - delete: scratch
  - clear
  - state
"#,
        )
        .await;

        assert_eq!(lines[1]["len"], 1);
        assert_eq!(lines[2]["elapsed_ms"], 5_000);
        assert_eq!(lines[3]["value"], Value::Null);
        assert_eq!(lines[4]["value"], "y");
        assert_eq!(lines[5]["removed"], false);
        assert_eq!(lines[7]["cache"]["expirations"], 1);
        assert_eq!(lines[7]["cache"]["ephemeral_hits"], 1);
    }

    #[tokio::test]
    async fn test_huge_advance_finishes() {
        let lines = replay(
            r#"
steps:
  - put: { key: pinned, value: x, ttl: 0s }
  - advance: 500000000000years
  - state
"#,
        )
        .await;

        assert_eq!(lines[1]["elapsed_ms"], u64::MAX);
        assert_eq!(lines[2]["cache"]["len"], 0);
        assert_eq!(lines[2]["cache"]["swept"], 1);
    }

    #[test]
    fn test_profile_picks_config_section() {
        let script = Script::from_yaml("steps: []").unwrap();
        let replay =
            Replay::from_script(&script, &ResilienceConfig::default(), CacheProfile::Video)
                .unwrap();
        assert_eq!(replay.guarded.cache().config().max_size, 50);
        assert_eq!(replay.guarded.cache().name(), "video");
    }

    #[test]
    fn test_rejects_unknown_step() {
        let error = Script::from_yaml("steps:\n  - explode: now\n").unwrap_err();
        assert!(error.to_string().contains("step format"));
    }

    #[test]
    fn test_invalid_cache_section() {
        let script = Script::from_yaml("cache: { max_size: 0 }").unwrap();
        let result =
            Replay::from_script(&script, &ResilienceConfig::default(), CacheProfile::General);
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }
}
