//! Dispatch configuration aggregated from option strings and environment
//! variables.
//!
//! Resolved once at startup, then read without locking for every call.
//!
//! # Sources
//!
//! Later sources win:
//!
//! 1. defaults
//! 2. `MOSAIC_*` environment variables (skipped with `ignore_environment`)
//! 3. `-X`-style option strings, in order

use thiserror::Error;

/// Default polymorphic bound of a call-site cache.
pub const DEFAULT_IC_ENTRIES: usize = 4;

/// Largest accepted polymorphic bound.
pub const MAX_IC_ENTRIES: usize = 8;

// =============================================================================
// Errors
// =============================================================================

/// Bad option string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown dispatch option `{0}`")]
    UnknownOption(String),

    #[error("invalid value `{value}` for dispatch option `{option}`")]
    InvalidValue { option: String, value: String },
}

// =============================================================================
// Block Policy
// =============================================================================

/// What to do with a block passed to an overload that never takes one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockPolicy {
    /// Ignore the block.
    #[default]
    Permissive,
    /// Reject the overload with `UnexpectedBlock`.
    Strict,
}

// =============================================================================
// Dispatch Configuration
// =============================================================================

/// Complete dispatch configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Use per-call-site inline caches.
    pub inline_caching: bool,
    /// Entries a call site holds before going megamorphic (1..=8).
    pub ic_entries: usize,
    /// Memoize name lookups per (type, name).
    pub method_cache: bool,
    pub block_policy: BlockPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            inline_caching: true,
            ic_entries: DEFAULT_IC_ENTRIES,
            method_cache: true,
            block_policy: BlockPolicy::Permissive,
        }
    }
}

impl DispatchConfig {
    /// Resolve from environment variables and option strings.
    ///
    /// Environment variables are only consulted when `ignore_environment` is
    /// false. Options are applied after the environment, so they win.
    pub fn resolve<S: AsRef<str>>(options: &[S], ignore_environment: bool) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if !ignore_environment {
            config.apply_environment();
        }
        for option in options {
            config.apply_option(option.as_ref())?;
        }
        Ok(config)
    }

    /// Apply one option string.
    ///
    /// Accepted: `ic=on|off`, `noic`, `ic_entries=N`, `method_cache=on|off`,
    /// `blocks=strict|permissive`.
    pub fn apply_option(&mut self, option: &str) -> Result<(), ConfigError> {
        let (key, value) = match option.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (option.trim(), ""),
        };

        match key {
            "ic" => self.inline_caching = parse_switch(key, value)?,
            "noic" if value.is_empty() => self.inline_caching = false,
            "ic_entries" => self.ic_entries = parse_entries(key, value)?,
            "method_cache" => self.method_cache = parse_switch(key, value)?,
            "blocks" => {
                self.block_policy = match value {
                    "strict" => BlockPolicy::Strict,
                    "permissive" => BlockPolicy::Permissive,
                    _ => return Err(invalid(key, value)),
                }
            }
            _ => return Err(ConfigError::UnknownOption(option.to_string())),
        }
        Ok(())
    }

    fn apply_environment(&mut self) {
        if Self::env_bool("MOSAIC_NO_INLINE_CACHE") {
            self.inline_caching = false;
        }
        if let Some(entries) = Self::env_ic_entries() {
            self.ic_entries = entries;
        }
        if Self::env_bool("MOSAIC_NO_METHOD_CACHE") {
            self.method_cache = false;
        }
        if Self::env_bool("MOSAIC_STRICT_BLOCKS") {
            self.block_policy = BlockPolicy::Strict;
        }
    }

    /// Check if an environment variable is set to a non-empty, truthy value.
    #[inline]
    fn env_bool(var: &str) -> bool {
        std::env::var(var)
            .map(|v| !v.is_empty() && v != "0")
            .unwrap_or(false)
    }

    /// Polymorphic bound from `MOSAIC_IC_ENTRIES`; unparsable values are ignored.
    fn env_ic_entries() -> Option<usize> {
        std::env::var("MOSAIC_IC_ENTRIES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .map(clamp_entries)
    }
}

fn parse_switch(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "on" | "1" | "true" => Ok(true),
        "off" | "0" | "false" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn parse_entries(key: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .parse::<usize>()
        .map(clamp_entries)
        .map_err(|_| invalid(key, value))
}

#[inline]
fn clamp_entries(entries: usize) -> usize {
    entries.clamp(1, MAX_IC_ENTRIES)
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        option: key.to_string(),
        value: value.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================
