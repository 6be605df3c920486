//! Configuration parsing and validation.
//!
//! Resilience configuration is structured data validated against an
//! embedded JSON Schema, then checked semantically. This module handles
//! parsing YAML/JSON documents, resolving each section over its preset,
//! and validating the result.

pub mod duration;
mod parser;
mod profile;
mod schema;

pub use parser::{BreakerConfig, CacheConfig, ConfigError, ResilienceConfig, MAX_DURATION};
pub use profile::CacheProfile;
pub use schema::validate_config_schema;

pub(crate) use duration::optional as duration_opt;
