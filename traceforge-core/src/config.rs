// Copyright 2025 TraceForge Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Configuration keys shared by the ingest pipeline and the store.
//! Loaded straight from the environment (`env::var` with typed defaults),
//! not a generic config-file builder.

use std::time::Duration;

/// How the ingest service dispatches work: inline (sync) or via the worker
/// pool (async). See C7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    Sync,
    Async,
}

impl std::str::FromStr for IngestMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(IngestMode::Sync),
            "async" => Ok(IngestMode::Async),
            other => Err(crate::Error::invalid(format!("invalid INGEST_MODE: {other}"))),
        }
    }
}

/// Which repository backend to use. See C4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Row,
    Column,
}

impl std::str::FromStr for StoreBackend {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "row" => Ok(StoreBackend::Row),
            "column" => Ok(StoreBackend::Column),
            other => Err(crate::Error::invalid(format!("invalid STORE_BACKEND: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub mode: IngestMode,
    pub buffer_size: usize,
    pub workers: usize,
    pub job_timeout: Duration,
    pub pricing_table_path: Option<String>,
    pub store_backend: StoreBackend,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mode: IngestMode::Async,
            buffer_size: 1024,
            workers: 4,
            job_timeout: Duration::from_secs(30),
            pricing_table_path: None,
            store_backend: StoreBackend::Row,
        }
    }
}

impl IngestConfig {
    /// Build from the process environment, falling back to defaults for any
    /// key that is absent or fails to parse.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(mode) = std::env::var("INGEST_MODE") {
            if let Ok(parsed) = mode.parse() {
                config.mode = parsed;
            }
        }
        if let Ok(size) = std::env::var("INGEST_BUFFER_SIZE") {
            if let Ok(parsed) = size.parse() {
                config.buffer_size = parsed;
            }
        }
        if let Ok(workers) = std::env::var("INGEST_WORKERS") {
            if let Ok(parsed) = workers.parse() {
                config.workers = parsed;
            }
        }
        if let Ok(timeout) = std::env::var("INGEST_JOB_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                config.job_timeout = Duration::from_secs(secs);
            }
        }
        if let Ok(path) = std::env::var("PRICING_TABLE_PATH") {
            config.pricing_table_path = Some(path);
        }
        if let Ok(backend) = std::env::var("STORE_BACKEND") {
            if let Ok(parsed) = backend.parse() {
                config.store_backend = parsed;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = IngestConfig::default();
        assert_eq!(config.mode, IngestMode::Async);
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.workers, 4);
        assert_eq!(config.job_timeout, Duration::from_secs(30));
        assert_eq!(config.store_backend, StoreBackend::Row);
    }

    #[test]
    fn ingest_mode_parses_case_insensitively() {
        assert_eq!("SYNC".parse::<IngestMode>().unwrap(), IngestMode::Sync);
        assert!("bogus".parse::<IngestMode>().is_err());
    }
}
