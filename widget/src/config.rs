use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("{0} cannot be 0")]
    Zero(&'static str),

    #[error("Either upstream.api_key or upstream.api_key_file must be set")]
    MissingApiKey,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    fn with_port(port: u16) -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

impl Default for Listener {
    fn default() -> Self {
        Listener::with_port(8080)
    }
}

fn default_admin_listener() -> Listener {
    Listener::with_port(8081)
}

/// Connection settings for the CurseForge API.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Upstream {
    pub url: String,
    pub api_key: Option<String>,
    /// Read at startup. Takes effect only when `api_key` is unset.
    pub api_key_file: Option<String>,
    pub timeout_secs: u64,
}

impl Default for Upstream {
    fn default() -> Self {
        Upstream {
            url: curseforge::client::DEFAULT_BASE_URL.into(),
            api_key: None,
            api_key_file: None,
            timeout_secs: 30,
        }
    }
}

impl Upstream {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Cache {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// Upper bound on cached responses. Least recently used entries are
    /// evicted first.
    pub max_entries: u64,
}

impl Default for Cache {
    fn default() -> Self {
        Cache {
            ttl_secs: 3600,
            sweep_interval_secs: 60,
            max_entries: 10_000,
        }
    }
}

impl Cache {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Background project synchronization.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProjectSync {
    /// Age after which an Ok or Forbidden project is synchronized again.
    pub staleness_secs: u64,
    /// Maximum projects requeued per scan.
    pub batch_size: usize,
    pub scan_interval_secs: u64,
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for ProjectSync {
    fn default() -> Self {
        ProjectSync {
            staleness_secs: 3600,
            batch_size: 100,
            scan_interval_secs: 60,
            workers: 4,
            queue_capacity: 500,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthorSync {
    pub staleness_secs: u64,
    pub batch_size: usize,
    pub scan_interval_secs: u64,
    pub queue_capacity: usize,
}

impl Default for AuthorSync {
    fn default() -> Self {
        AuthorSync {
            staleness_secs: 3600,
            batch_size: 500,
            scan_interval_secs: 60,
            queue_capacity: 500,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Resolver {
    pub queue_capacity: usize,
}

impl Default for Resolver {
    fn default() -> Self {
        Resolver {
            queue_capacity: 100,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Reference {
    pub refresh_interval_secs: u64,
}

impl Default for Reference {
    fn default() -> Self {
        Reference {
            refresh_interval_secs: 3600,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for the widget API
    #[serde(default)]
    pub listener: Listener,
    /// Listener for health and readiness probes
    #[serde(default = "default_admin_listener")]
    pub admin_listener: Listener,
    #[serde(default)]
    pub upstream: Upstream,
    #[serde(default)]
    pub cache: Cache,
    #[serde(default)]
    pub sync: ProjectSync,
    #[serde(default)]
    pub authors: AuthorSync,
    #[serde(default)]
    pub resolver: Resolver,
    #[serde(default)]
    pub reference: Reference,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::default(),
            admin_listener: default_admin_listener(),
            upstream: Upstream::default(),
            cache: Cache::default(),
            sync: ProjectSync::default(),
            authors: AuthorSync::default(),
            resolver: Resolver::default(),
            reference: Reference::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.upstream.api_key.is_none() && self.upstream.api_key_file.is_none() {
            return Err(ValidationError::MissingApiKey);
        }

        let non_zero = [
            ("cache.ttl_secs", self.cache.ttl_secs),
            ("cache.sweep_interval_secs", self.cache.sweep_interval_secs),
            ("cache.max_entries", self.cache.max_entries),
            ("sync.workers", self.sync.workers as u64),
            ("sync.queue_capacity", self.sync.queue_capacity as u64),
            ("sync.scan_interval_secs", self.sync.scan_interval_secs),
            ("authors.queue_capacity", self.authors.queue_capacity as u64),
            ("authors.scan_interval_secs", self.authors.scan_interval_secs),
            ("resolver.queue_capacity", self.resolver.queue_capacity as u64),
            ("reference.refresh_interval_secs", self.reference.refresh_interval_secs),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ValidationError::Zero(name));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let yaml = r#"
upstream:
    api_key: secret
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.listener, Listener::with_port(8080));
        assert_eq!(config.admin_listener.port, 8081);
        assert_eq!(config.upstream.url, "https://api.curseforge.com");
        assert_eq!(config.upstream.timeout(), Duration::from_secs(30));
        assert_eq!(config.cache.ttl(), Duration::from_secs(3600));
        assert_eq!(config.cache.max_entries, 10_000);
        assert_eq!(config.sync.workers, 4);
        assert_eq!(config.authors.batch_size, 500);
        assert_eq!(config.resolver.queue_capacity, 100);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
listener:
    host: "0.0.0.0"
    port: 3000
admin_listener:
    host: "0.0.0.0"
    port: 3001
upstream:
    url: "http://127.0.0.1:9000"
    api_key_file: /run/secrets/curseforge
    timeout_secs: 5
cache:
    ttl_secs: 60
    max_entries: 500
sync:
    workers: 8
    batch_size: 20
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.listener.port, 3000);
        assert_eq!(
            config.upstream.api_key_file.as_deref(),
            Some("/run/secrets/curseforge")
        );
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.sweep_interval_secs, 60);
        assert_eq!(config.cache.max_entries, 500);
        assert_eq!(config.sync.workers, 8);
        assert_eq!(config.sync.queue_capacity, 500);
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert_eq!(config.validate(), Err(ValidationError::MissingApiKey));

        config.upstream.api_key = Some("secret".into());
        assert!(config.validate().is_ok());

        config.listener.port = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));
        config.listener.port = 8080;

        config.sync.workers = 0;
        assert_eq!(
            config.validate(),
            Err(ValidationError::Zero("sync.workers"))
        );
        config.sync.workers = 1;

        config.cache.ttl_secs = 0;
        assert_eq!(
            config.validate(),
            Err(ValidationError::Zero("cache.ttl_secs"))
        );
        config.cache.ttl_secs = 60;

        config.cache.max_entries = 0;
        assert_eq!(
            config.validate(),
            Err(ValidationError::Zero("cache.max_entries"))
        );
    }
}
