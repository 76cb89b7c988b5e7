use serde::Deserialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use widget::config::{Config as WidgetConfig, ValidationError};

#[derive(Deserialize, Debug)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Deserialize, Debug)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    #[serde(default)]
    pub widget: WidgetConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.widget.validate()?;

        Ok(config)
    }

    /// The inline key, or else the trimmed contents of the key file.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        let upstream = &self.widget.upstream;
        let key = match (&upstream.api_key, &upstream.api_key_file) {
            (Some(key), _) => key.trim().to_string(),
            (None, Some(path)) => fs::read_to_string(path)
                .map_err(|source| ConfigError::ApiKeyFile {
                    path: path.into(),
                    source,
                })?
                .trim()
                .to_string(),
            (None, None) => String::new(),
        };

        if key.is_empty() {
            return Err(ValidationError::MissingApiKey.into());
        }
        Ok(key)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
    #[error("could not read api key from {path:?}: {source}")]
    ApiKeyFile {
        path: PathBuf,
        source: std::io::Error,
    },
}
