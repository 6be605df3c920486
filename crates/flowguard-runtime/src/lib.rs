//! # flowguard-runtime
//!
//! Live resilience components for the feed application.
//!
//! This crate wires the deterministic pieces from `flowguard-core` to a
//! clock, a scheduler and per-instance locks:
//! - [`ExpiringCache`]: durable tier with TTL, eviction and sweep, plus an
//!   ephemeral tier that may be reclaimed silently
//! - [`CircuitBreaker`]: async `execute` guarding a fallible operation
//! - [`GuardedCache`]: cache first, else breaker, store on success
//! - [`ResilienceSuite`]: the application's video cache, image cache and
//!   API breaker built from one config
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use flowguard_runtime::{CallContext, PutOptions, ResilienceSuite};
//!
//! let suite = ResilienceSuite::<Arc<[u8]>>::builder().build()?;
//! let videos = suite.videos();
//!
//! let clip = videos
//!     .fetch(
//!         "video_42".to_string(),
//!         &CallContext::named("load_video"),
//!         PutOptions::strong(),
//!         || async { fetch_clip(42).await },
//!     )
//!     .await?;
//!
//! suite.shutdown();
//! ```

use thiserror::Error;

pub mod breaker;
pub mod cache;
pub mod facade;
pub mod suite;
pub mod timer;

pub use breaker::{CircuitBreaker, CircuitOpenError, ExecuteError};
pub use cache::{CacheStats, ExpiringCache};
pub use facade::GuardedCache;
pub use suite::{ResilienceSuite, ResilienceSuiteBuilder};
pub use timer::{ManualTimer, SharedTimer, TimerHandle, TimerSource, TokioTimer};

pub use flowguard_core::{
    BreakerConfig, BreakerSnapshot, CacheConfig, CacheProfile, CallContext, CircuitState,
    ConfigError, PutOptions, ResilienceConfig,
};

/// Errors from the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("No Tokio runtime available: build inside a runtime or pass a timer")]
    NoAsyncRuntime,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
