//! Core types and utilities for infra-reconcile
//!
//! # Modules
//!
//! - `config`: Integration configuration, retry policy, engine config loading
//! - `error`: Error taxonomy and Result alias
//! - `logging`: Tracing subscriber bootstrap
//! - `types`: Resource, Action, ApplyResult and friends
//! - `value`: Typed configuration values

pub mod config;
pub mod error;
pub mod logging;
pub mod types;
pub mod value;

// Re-exports
pub use config::{Authentication, EngineConfig, IntegrationConfiguration, RetryPolicy};
pub use error::{ErrorKind, IntegrationError, Result, Severity};
pub use types::*;
pub use value::{ConfigValue, Configuration};
