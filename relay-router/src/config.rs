use coordinator::StoreConfig;
use engine::EngineConfig;
use serde::Deserialize;
use std::fs::File;
use tracing_subscriber::EnvFilter;

fn default_level() -> String {
    "info".to_string()
}

#[derive(Deserialize, Debug)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug)]
pub struct LoggingConfig {
    #[serde(default)]
    pub sentry_dsn: Option<String>,
    /// Filter directive used when RUST_LOG is not set
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            sentry_dsn: None,
            level: default_level(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
    pub store: StoreConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(logging) = &self.logging {
            EnvFilter::try_new(&logging.level)
                .map_err(|_| ConfigError::InvalidLogLevel(logging.level.clone()))?;
            if let Some(dsn) = &logging.sentry_dsn {
                dsn.parse::<sentry::types::Dsn>()
                    .map_err(|e| ConfigError::InvalidSentryDsn(e.to_string()))?;
            }
        }
        self.store.validate()?;
        self.engine.validate()?;
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid store config: {0}")]
    Store(#[from] coordinator::config::ValidationError),
    #[error("invalid engine config: {0}")]
    Engine(#[from] engine::ValidationError),
    #[error("invalid log level {0:?}")]
    InvalidLogLevel(String),
    #[error("invalid sentry dsn: {0}")]
    InvalidSentryDsn(String),
}
