//! Core types, errors, and configuration for the working-copy status cache.
//!
//! This crate provides the foundational types used across the workspace:
//!
//! - [`StatusKind`] and its severity order
//! - Path normalization for cache keys
//! - Configuration structures ([`Config`], [`CacheConfig`], [`WatchConfig`])
//! - [`ConfigError`] for configuration failures

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;

pub use config::{CacheConfig, Config, DEFAULT_ENTRY_TTL_MS, WatchConfig};
pub use error::ConfigError;
pub use types::{StatusKind, is_within, normalize_path, relative_name};
