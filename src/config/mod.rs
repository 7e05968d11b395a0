//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for the service and for
//! standalone plan files.

mod error;
mod yaml;

pub use error::ConfigError;
pub use yaml::{
    ApiConfig, ConfigLoader, LearningConfig, OverseerConfig, RateLimitConfig, StoreConfig,
};
