//! Runner configuration.

use crate::workflow::{DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Repository the checkout step fetches from.
    pub source: PathBuf,

    /// Root of the keyed build caches.
    pub cache_dir: PathBuf,

    /// Directory coordinating concurrency groups between processes.
    /// Groups are private to this process when unset.
    pub lock_dir: Option<PathBuf>,

    /// Parent directory for per-run working directories (system temp if unset).
    pub work_root: Option<PathBuf>,

    /// Keep each run's working directory instead of deleting it.
    pub keep_workdir: bool,

    /// Timeout applied to steps that do not set one (0 = none).
    pub step_timeout_secs: u64,

    /// Delay before the first retry of a network-bound step.
    pub backoff_base_ms: u64,

    /// Upper bound on any single retry delay.
    pub backoff_max_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("."),
            cache_dir: std::env::temp_dir().join("motec-ci-cache"),
            lock_dir: None,
            work_root: None,
            keep_workdir: false,
            step_timeout_secs: 0,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

impl RunnerConfig {
    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_lock_dir(mut self, lock_dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(lock_dir.into());
        self
    }

    pub fn with_work_root(mut self, work_root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(work_root.into());
        self
    }

    pub fn with_backoff(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_max_ms = max_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.source, PathBuf::from("."));
        assert_eq!(config.backoff_base_ms, 1_000);
        assert!(!config.keep_workdir);
        assert!(config.cache_dir.ends_with("motec-ci-cache"));
        assert!(config.lock_dir.is_none());
    }

    #[test]
    fn test_builders() {
        let config = RunnerConfig::default()
            .with_source("/src")
            .with_cache_dir("/cache")
            .with_lock_dir("/cache/groups")
            .with_backoff(10, 20);
        assert_eq!(config.source, PathBuf::from("/src"));
        assert_eq!(config.lock_dir, Some(PathBuf::from("/cache/groups")));
        assert_eq!(config.cache_dir, PathBuf::from("/cache"));
        assert_eq!((config.backoff_base_ms, config.backoff_max_ms), (10, 20));
    }
}
