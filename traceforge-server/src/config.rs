// Copyright 2025 TraceForge Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Server configuration, layered file > env > defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use traceforge_core::IngestConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub server: HttpServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub ingest: IngestSettings,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Controls the `tracing_subscriber` formatter the process installs at
/// startup. Plain text is easier to read in a terminal; JSON is what a log
/// aggregator expects in production.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

/// Connection strings for whichever backend `ingest.store_backend` selects;
/// only the relevant one is read at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_sqlite_url")]
    pub sqlite_url: String,
    #[serde(default)]
    pub postgres_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_url: default_sqlite_url(),
            postgres_url: None,
        }
    }
}

fn default_sqlite_url() -> String {
    "sqlite://traceforge.db?mode=rwc".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_addr")]
    pub listen_addr: String,

    /// Request handling deadline at the boundary, default 60s.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Oversize ingest bodies are rejected with 413.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl HttpServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Disabled by default, for local development.
    #[serde(default)]
    pub enabled: bool,

    /// `apiKey -> projectId`. The sole mapping the auth boundary consults.
    #[serde(default)]
    pub api_keys: std::collections::HashMap<String, String>,
}

/// Mirrors [`IngestConfig`]'s shape so it round-trips through TOML/env the
/// same way the rest of this struct does; converted via [`IngestSettings::resolve`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IngestSettings {
    pub mode: Option<String>,
    pub buffer_size: Option<usize>,
    pub workers: Option<usize>,
    pub job_timeout_secs: Option<u64>,
    pub pricing_table_path: Option<String>,
    pub store_backend: Option<String>,
}

impl IngestSettings {
    pub fn resolve(&self) -> Result<IngestConfig> {
        let mut config = IngestConfig::default();
        if let Some(mode) = &self.mode {
            config.mode = mode.parse().map_err(|e| anyhow::anyhow!("{e}"))?;
        }
        if let Some(size) = self.buffer_size {
            config.buffer_size = size;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(secs) = self.job_timeout_secs {
            config.job_timeout = Duration::from_secs(secs);
        }
        if self.pricing_table_path.is_some() {
            config.pricing_table_path = self.pricing_table_path.clone();
        }
        if let Some(backend) = &self.store_backend {
            config.store_backend = backend.parse().map_err(|e| anyhow::anyhow!("{e}"))?;
        }
        Ok(config)
    }
}

fn default_http_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_enable_cors() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: HttpServerConfig {
                listen_addr: default_http_addr(),
                request_timeout_secs: default_request_timeout_secs(),
                max_body_bytes: default_max_body_bytes(),
                enable_cors: default_enable_cors(),
                cors_origins: Vec::new(),
            },
            auth: AuthConfig {
                enabled: false,
                api_keys: std::collections::HashMap::new(),
            },
            ingest: IngestSettings::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Overlays environment variables onto whatever was loaded from file
    /// (or the defaults), env taking priority.
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("TRACEFORGE_HTTP_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Ok(timeout) = std::env::var("TRACEFORGE_REQUEST_TIMEOUT_SECS") {
            if let Ok(v) = timeout.parse() {
                self.server.request_timeout_secs = v;
            }
        }
        if let Ok(max_body) = std::env::var("TRACEFORGE_MAX_BODY_BYTES") {
            if let Ok(v) = max_body.parse() {
                self.server.max_body_bytes = v;
            }
        }
        if let Ok(cors) = std::env::var("TRACEFORGE_ENABLE_CORS") {
            if let Ok(v) = cors.parse() {
                self.server.enable_cors = v;
            }
        }
        if let Ok(enabled) = std::env::var("TRACEFORGE_AUTH_ENABLED") {
            if let Ok(v) = enabled.parse() {
                self.auth.enabled = v;
            }
        }
        if let Ok(keys) = std::env::var("TRACEFORGE_API_KEYS") {
            // "key1:project1,key2:project2"
            for pair in keys.split(',').filter(|p| !p.is_empty()) {
                if let Some((key, project)) = pair.split_once(':') {
                    self.auth.api_keys.insert(key.to_string(), project.to_string());
                }
            }
        }
        if let Ok(mode) = std::env::var("INGEST_MODE") {
            self.ingest.mode = Some(mode);
        }
        if let Ok(size) = std::env::var("INGEST_BUFFER_SIZE") {
            if let Ok(v) = size.parse() {
                self.ingest.buffer_size = Some(v);
            }
        }
        if let Ok(workers) = std::env::var("INGEST_WORKERS") {
            if let Ok(v) = workers.parse() {
                self.ingest.workers = Some(v);
            }
        }
        if let Ok(backend) = std::env::var("STORE_BACKEND") {
            self.ingest.store_backend = Some(backend);
        }
        if let Ok(url) = std::env::var("SQLITE_URL") {
            self.storage.sqlite_url = url;
        }
        if let Ok(url) = std::env::var("POSTGRES_URL") {
            self.storage.postgres_url = Some(url);
        }
        if let Ok(json) = std::env::var("TRACEFORGE_LOG_JSON") {
            if let Ok(v) = json.parse() {
                self.logging.json = v;
            }
        }
    }

    /// File > env > defaults.
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let mut config = match config_file {
            Some(path) if path.exists() => {
                tracing::info!(?path, "loading configuration from file");
                Self::from_file(&path)?
            }
            Some(path) => {
                tracing::warn!(?path, "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(self.server.listen_addr.parse()?)
    }

    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        if self.auth.enabled && self.auth.api_keys.is_empty() {
            anyhow::bail!("authentication enabled but no api keys configured");
        }
        let ingest = self.ingest.resolve()?;
        if ingest.store_backend == traceforge_core::StoreBackend::Column && self.storage.postgres_url.is_none() {
            anyhow::bail!("STORE_BACKEND=column requires postgres_url");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.listen_addr, "127.0.0.1:8787");
        assert!(!config.logging.json);
    }

    #[test]
    fn env_log_json_flag_parses() {
        std::env::set_var("TRACEFORGE_LOG_JSON", "true");
        let mut config = ServerConfig::default();
        config.apply_env();
        std::env::remove_var("TRACEFORGE_LOG_JSON");

        assert!(config.logging.json);
    }

    #[test]
    fn auth_enabled_without_keys_fails_validation() {
        let mut config = ServerConfig::default();
        config.auth.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_api_keys_parse_into_map() {
        std::env::set_var("TRACEFORGE_API_KEYS", "sk-abc:proj-1,sk-def:proj-2");
        let mut config = ServerConfig::default();
        config.apply_env();
        std::env::remove_var("TRACEFORGE_API_KEYS");

        assert_eq!(config.auth.api_keys.get("sk-abc"), Some(&"proj-1".to_string()));
        assert_eq!(config.auth.api_keys.get("sk-def"), Some(&"proj-2".to_string()));
    }
}
