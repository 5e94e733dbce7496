//! Unified error type hierarchy for frostd
//!
//! Provides structured error handling with BackendError, SourceError,
//! RpcError and ConfigError.

use std::io;
use thiserror::Error;

/// Freezer backend write errors.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("write to {path} failed: {source}")]
    WriteFailed { path: String, source: io::Error },
}

/// Foreground source errors (shell dump or socket query).
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to spawn '{cmd}': {reason}")]
    SpawnFailed { cmd: String, reason: String },

    #[error("hook RPC failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("IO error while reading dump: {0}")]
    IoError(#[from] io::Error),
}

/// Local-socket RPC errors against the companion hook.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("hook socket unreachable: {0}")]
    Unreachable(io::Error),

    #[error("malformed reply ({reason}), dump: {dump}")]
    Malformed { reason: String, dump: String },

    #[error("IO error during hook RPC: {0}")]
    IoError(#[from] io::Error),
}

/// Settings and registry file parsing errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("invalid TOML in settings: {0}")]
    InvalidToml(#[from] toml::de::Error),

    #[error("invalid JSON in registry: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Top-level result type for operations that may fail.
/// Use this as the return type for all fallible functions.
/// Example: `fn risky_operation() -> Result<String>`
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;
