//! Engine configuration.

use crate::error::Result;
use anyhow::Context;
use std::path::PathBuf;
use std::time::Duration;

/// How long a transaction waits for its path locks by default.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on time spent waiting for path locks.
    pub lock_timeout: Duration,
    /// Simulate the whole batch before locking and reject existence
    /// violations as validation errors. When off, executors enforce
    /// existence at apply time and a violation triggers rollback.
    pub strict_preflight: bool,
    /// Directory relative operation paths are resolved against. Defaults to
    /// the process working directory.
    pub base_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            strict_preflight: false,
            base_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_strict_preflight(mut self, strict: bool) -> Self {
        self.strict_preflight = strict;
        self
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// Canonical form of the base directory.
    pub fn resolve_base_dir(&self) -> Result<PathBuf> {
        let base = match &self.base_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("Failed to read the working directory")?,
        };
        let resolved = base
            .canonicalize()
            .with_context(|| format!("Base directory {} is not accessible", base.display()))?;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TxnError;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_base_dir_is_canonical() {
        let temp = TempDir::new().unwrap();
        let config = EngineConfig::default().with_base_dir(temp.path().join("."));

        assert_eq!(
            config.resolve_base_dir().unwrap(),
            temp.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_missing_base_dir_names_the_directory() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("gone");
        let err = EngineConfig::default()
            .with_base_dir(&missing)
            .resolve_base_dir()
            .unwrap_err();

        assert!(matches!(err, TxnError::Other(_)));
        assert!(err.to_string().contains("gone"));
    }
}
