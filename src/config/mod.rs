use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8089/api/verve/accept";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub target: TargetConfig,
    pub pool: PoolConfig,
    pub batch: BatchConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TargetConfig {
    pub endpoint: String,
    /// Passed through as the `endpoint` query parameter when set.
    pub secondary_endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PoolConfig {
    pub size: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BatchConfig {
    pub size: usize,
    pub interval_ms: u64,
    pub max_in_flight: Option<usize>,
    pub max_batches: Option<u64>,
    pub seed: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            secondary_endpoint: None,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { size: 100 }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 500,
            interval_ms: 10,
            max_in_flight: None,
            max_batches: None,
            seed: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "idburst=info,warn".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid target endpoint {endpoint:?}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported scheme {0:?}, only http endpoints are supported")]
    UnsupportedScheme(String),
    #[error("{0} must be at least 1")]
    Zero(&'static str),
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.size == 0 {
            return Err(ConfigError::Zero("pool.size"));
        }
        if self.batch.size == 0 {
            return Err(ConfigError::Zero("batch.size"));
        }
        if self.batch.max_in_flight == Some(0) {
            return Err(ConfigError::Zero("batch.max_in_flight"));
        }
        self.target.endpoint_url()?;
        Ok(())
    }
}

impl TargetConfig {
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.endpoint).map_err(|source| ConfigError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            source,
        })?;
        if url.scheme() != "http" {
            return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
        }
        Ok(url)
    }
}

impl BatchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Never more than the batch itself, never less than one.
    pub fn effective_max_in_flight(&self) -> usize {
        self.max_in_flight
            .unwrap_or(self.size)
            .clamp(1, self.size.max(1))
    }
}
