//! # flowguard-core
//!
//! Deterministic building blocks of the flowguard resilience core.
//!
//! This crate holds everything that can be decided without a clock of its
//! own or a scheduler:
//! - Configuration for caches and circuit breakers (YAML/JSON, schema-checked)
//! - The circuit breaker state machine, driven by caller-supplied instants
//! - Victim selection for capacity eviction
//!
//! Live components (timers, locking, the async `execute`) are in
//! `flowguard-runtime`.
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: every decision is a pure function of the inputs and
//!    the `Instant` passed in
//! 2. **No I/O**: apart from explicit `*_file` constructors
//! 3. **No timers**: scheduling is the runtime's job
//!
//! ## Example
//!
//! ```rust
//! use std::time::{Duration, Instant};
//! use flowguard_core::{Admission, BreakerConfig, BreakerMachine, CircuitState};
//!
//! let config = BreakerConfig {
//!     failure_threshold: 2,
//!     ..BreakerConfig::default()
//! };
//! let mut machine = BreakerMachine::new(config);
//! let now = Instant::now();
//!
//! machine.record_failure(now);
//! machine.record_failure(now);
//! assert_eq!(machine.snapshot().state, CircuitState::Open);
//! assert!(matches!(machine.admit(now), Admission::Rejected { .. }));
//! assert!(matches!(machine.admit(now + Duration::from_secs(11)), Admission::Trial));
//! ```

pub mod breaker;
pub mod config;
pub mod eviction;
pub mod time;
pub mod types;

// Re-export main types at crate root
pub use breaker::{Admission, BreakerMachine, BreakerSnapshot, CircuitState, Opened};
pub use config::{BreakerConfig, CacheConfig, CacheProfile, ConfigError, ResilienceConfig};
pub use eviction::{select_victim, EntryStats};
pub use types::{CallContext, PutOptions};
