//! # Configuration
//!
//! Runtime settings, read from the environment by the binaries and built in
//! code by tests.
//!
//! | Variable                    | Default               | Meaning                        |
//! |-----------------------------|-----------------------|--------------------------------|
//! | `FORUMDB_PATH`              | `forum.db`            | SQLite database file           |
//! | `FORUMDB_READER_THREADS`    | available parallelism | reader pool size, 1..=16       |
//! | `FORUMDB_PACKET_SIZE`       | 30                    | posts per insert statement     |
//! | `FORUMDB_FLUSH_INTERVAL_MS` | unset                 | periodic forum count flush     |
//!
//! An unset or zero flush interval flushes only on demand.

use std::env;
use std::path::PathBuf;
use std::thread::available_parallelism;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::packet::{DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE};
use crate::writer::WriterConfig;

pub const PATH_ENV_VAR: &str = "FORUMDB_PATH";
pub const READER_THREADS_ENV_VAR: &str = "FORUMDB_READER_THREADS";
pub const PACKET_SIZE_ENV_VAR: &str = "FORUMDB_PACKET_SIZE";
pub const FLUSH_INTERVAL_ENV_VAR: &str = "FORUMDB_FLUSH_INTERVAL_MS";

/// Minimum number of reader threads.
pub const MIN_READ_THREADS: usize = 1;

/// Maximum number of reader threads.
pub const MAX_READ_THREADS: usize = 16;

const DEFAULT_DB_PATH: &str = "forum.db";

/// Settings for [`crate::ForumDb`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForumConfig {
    /// SQLite database file, created if missing.
    pub db_path: PathBuf,

    /// Reader pool size.
    pub reader_threads: usize,

    /// Posts per multi-row insert statement.
    pub packet_size: usize,

    /// When set, pending forum post counts are also flushed on this period.
    pub flush_interval: Option<Duration>,
}

impl Default for ForumConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            reader_threads: default_reader_threads(),
            packet_size: DEFAULT_PACKET_SIZE,
            flush_interval: None,
        }
    }
}

impl ForumConfig {
    /// Default settings for a database at `path`.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: path.into(),
            ..Self::default()
        }
    }

    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// `Error::Config` if a variable is set but invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads settings through `lookup`, so tests need not touch the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = lookup(PATH_ENV_VAR).filter(|p| !p.is_empty()) {
            config.db_path = PathBuf::from(path);
        }
        if let Some(n) = parse_var::<usize>(&lookup, READER_THREADS_ENV_VAR)? {
            config.reader_threads = n.clamp(MIN_READ_THREADS, MAX_READ_THREADS);
        }
        if let Some(n) = parse_var::<usize>(&lookup, PACKET_SIZE_ENV_VAR)? {
            if !(1..=MAX_PACKET_SIZE).contains(&n) {
                return Err(Error::Config(format!(
                    "{PACKET_SIZE_ENV_VAR} must be between 1 and {MAX_PACKET_SIZE} (got {n})"
                )));
            }
            config.packet_size = n;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, FLUSH_INTERVAL_ENV_VAR)? {
            config.flush_interval = (ms > 0).then(|| Duration::from_millis(ms));
        }

        Ok(config)
    }

    /// The writer thread's share of the settings.
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            packet_size: self.packet_size,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid {key} '{raw}': {e}"))),
    }
}

fn default_reader_threads() -> usize {
    available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MIN_READ_THREADS)
        .clamp(MIN_READ_THREADS, MAX_READ_THREADS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn load(vars: &[(&str, &str)]) -> Result<ForumConfig> {
        ForumConfig::from_lookup(lookup(vars))
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("forum.db"));
        assert_eq!(config.packet_size, 30);
        assert_eq!(config.flush_interval, None);
        let bounds = MIN_READ_THREADS..=MAX_READ_THREADS;
        assert!(bounds.contains(&config.reader_threads));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            (PATH_ENV_VAR, "/tmp/x.db"),
            (READER_THREADS_ENV_VAR, "64"),
            (PACKET_SIZE_ENV_VAR, " 50 "),
            (FLUSH_INTERVAL_ENV_VAR, "250"),
        ])
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.reader_threads, MAX_READ_THREADS);
        assert_eq!(config.writer_config().packet_size, 50);
        assert_eq!(config.flush_interval, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_invalid_values() {
        let err = load(&[(PACKET_SIZE_ENV_VAR, "0")]).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains(PACKET_SIZE_ENV_VAR)));

        let err = load(&[(READER_THREADS_ENV_VAR, "many")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let config = load(&[(FLUSH_INTERVAL_ENV_VAR, "0")]).unwrap();
        assert_eq!(config.flush_interval, None);
    }
}
