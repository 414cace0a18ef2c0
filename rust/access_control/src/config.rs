//! Access store configuration.

use std::env;
use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AccessError, Result};

pub const DEFAULT_CACHE_CAPACITY: usize = 50;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration of an [`AccessStore`](crate::AccessStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessStoreConfig {
    /// Cache resolved AccessSets; when false every lookup recomputes.
    pub cache_results: bool,
    /// Maximum number of cached AccessSets.
    pub cache_capacity: NonZeroUsize,
    /// Lifetime of a cached AccessSet.
    pub cache_ttl: Duration,
}

impl Default for AccessStoreConfig {
    fn default() -> Self {
        Self {
            cache_results: true,
            cache_capacity: NonZeroUsize::new(DEFAULT_CACHE_CAPACITY)
                .unwrap_or(NonZeroUsize::MIN),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

/// JSON form; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawConfig {
    cache_results: Option<bool>,
    cache_capacity: Option<usize>,
    cache_ttl_secs: Option<u64>,
}

impl AccessStoreConfig {
    /// Config with caching turned off.
    pub fn uncached() -> Self {
        Self {
            cache_results: false,
            ..Default::default()
        }
    }

    /// Read `ACCESS_CACHE_RESULTS`, `ACCESS_CACHE_CAPACITY` and
    /// `ACCESS_CACHE_TTL_SECS`; unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let raw = RawConfig {
            cache_results: parse_var(&lookup, "ACCESS_CACHE_RESULTS")?,
            cache_capacity: parse_var(&lookup, "ACCESS_CACHE_CAPACITY")?,
            cache_ttl_secs: parse_var(&lookup, "ACCESS_CACHE_TTL_SECS")?,
        };
        raw.into_config()
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AccessError::Config(format!("{name}: invalid value {value:?}"))),
    }
}

impl RawConfig {
    fn into_config(self) -> Result<AccessStoreConfig> {
        let defaults = AccessStoreConfig::default();
        let cache_capacity = match self.cache_capacity {
            None => defaults.cache_capacity,
            Some(n) => NonZeroUsize::new(n)
                .ok_or_else(|| AccessError::Config("cache capacity must be positive".to_string()))?,
        };
        Ok(AccessStoreConfig {
            cache_results: self.cache_results.unwrap_or(defaults.cache_results),
            cache_capacity,
            cache_ttl: self
                .cache_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
        })
    }
}

/// Parse an access store config from a JSON string.
pub fn parse_config(json: &str) -> Result<AccessStoreConfig> {
    let raw: RawConfig = serde_json::from_str(json)?;
    raw.into_config()
}
