use runbridge_adapter::{DeliveryMode, ListenerOptions, ResponseConstructor};
use runbridge_observability::{LogFormat, LoggingConfig, Metrics};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Host every invocation is validated against; the request's `Host`
    /// header is used when unset
    #[serde(default)]
    pub trusted_hostname: Option<String>,

    #[serde(default)]
    pub delivery: DeliveryMode,

    #[serde(default)]
    pub response_constructor: ResponseConstructor,

    /// Upper bound for buffering a streamed response body
    #[serde(default)]
    pub max_buffer_bytes: Option<usize>,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            trusted_hostname: None,
            delivery: DeliveryMode::default(),
            response_constructor: ResponseConstructor::default(),
            max_buffer_bytes: None,
            metrics_enabled: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        self.merge_vars(|name| std::env::var(name).ok());
    }

    fn merge_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("RUNBRIDGE_HOST") {
            self.host = val;
        }

        if let Some(val) = var("RUNBRIDGE_PORT") {
            match val.parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => eprintln!("Warning: Invalid RUNBRIDGE_PORT '{}', ignoring", val),
            }
        }

        if let Some(val) = var("RUNBRIDGE_TRUSTED_HOSTNAME") {
            self.trusted_hostname = Some(val).filter(|v| !v.is_empty());
        }

        if let Some(val) = var("RUNBRIDGE_DELIVERY") {
            match val.to_lowercase().as_str() {
                "streaming" => self.delivery = DeliveryMode::Streaming,
                "buffered" => self.delivery = DeliveryMode::Buffered,
                _ => eprintln!("Warning: Invalid RUNBRIDGE_DELIVERY '{}', using default", val),
            }
        }

        if let Some(val) = var("RUNBRIDGE_RESPONSE_CONSTRUCTOR") {
            match val.to_lowercase().as_str() {
                "lightweight" => self.response_constructor = ResponseConstructor::Lightweight,
                "standard" => self.response_constructor = ResponseConstructor::Standard,
                _ => eprintln!(
                    "Warning: Invalid RUNBRIDGE_RESPONSE_CONSTRUCTOR '{}', using default",
                    val
                ),
            }
        }

        if let Some(val) = var("RUNBRIDGE_MAX_BUFFER_BYTES")
            && let Ok(max) = val.parse::<usize>()
        {
            self.max_buffer_bytes = Some(max);
        }

        if let Some(val) = var("RUNBRIDGE_METRICS_ENABLED")
            && let Ok(enabled) = val.parse::<bool>()
        {
            self.metrics_enabled = enabled;
        }

        if let Some(val) = var("RUNBRIDGE_LOG_LEVEL") {
            self.logging.level = val;
        }

        if let Some(val) = var("RUNBRIDGE_LOG_FORMAT") {
            match val.to_lowercase().as_str() {
                "pretty" => self.logging.format = LogFormat::Pretty,
                "json" => self.logging.format = LogFormat::Json,
                _ => eprintln!("Warning: Invalid RUNBRIDGE_LOG_FORMAT '{}', using default", val),
            }
        }
    }

    pub fn listener_options(&self, metrics: &Arc<Metrics>) -> ListenerOptions {
        ListenerOptions {
            hostname: self.trusted_hostname.clone(),
            error_handler: None,
            delivery: self.delivery,
            response_constructor: self.response_constructor,
            max_buffer_bytes: self.max_buffer_bytes,
            metrics: self.metrics_enabled.then(|| metrics.clone()),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert_eq!(config.delivery, DeliveryMode::Streaming);
        assert_eq!(config.response_constructor, ResponseConstructor::Lightweight);
        assert!(config.metrics_enabled);
        assert!(config.trusted_hostname.is_none());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            concat!(
                "port: 8080\n",
                "trusted_hostname: api.example.com\n",
                "delivery: buffered\n",
                "logging:\n",
                "  level: debug\n",
                "  format: json",
            )
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.trusted_hostname.as_deref(), Some("api.example.com"));
        assert_eq!(config.delivery, DeliveryMode::Buffered);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            concat!(
                "host = \"0.0.0.0\"\n",
                "response_constructor = \"standard\"\n",
                "max_buffer_bytes = 1048576\n",
                "metrics_enabled = false",
            )
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.response_constructor, ResponseConstructor::Standard);
        assert_eq!(config.max_buffer_bytes, Some(1_048_576));
        assert!(!config.metrics_enabled);
    }

    #[test]
    fn test_invalid_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "port = \"not a port\"").unwrap();
        assert!(matches!(
            ServerConfig::from_file(file.path()),
            Err(ConfigError::Toml(_))
        ));

        assert!(matches!(
            ServerConfig::from_file("/nonexistent/runbridge.yaml"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("RUNBRIDGE_HOST", "0.0.0.0"),
            ("RUNBRIDGE_PORT", "9000"),
            ("RUNBRIDGE_TRUSTED_HOSTNAME", "fn.example.com"),
            ("RUNBRIDGE_DELIVERY", "Buffered"),
            ("RUNBRIDGE_MAX_BUFFER_BYTES", "4096"),
            ("RUNBRIDGE_METRICS_ENABLED", "false"),
            ("RUNBRIDGE_LOG_LEVEL", "trace"),
            ("RUNBRIDGE_LOG_FORMAT", "json"),
        ]);

        let mut config = ServerConfig::default();
        config.merge_vars(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.trusted_hostname.as_deref(), Some("fn.example.com"));
        assert_eq!(config.delivery, DeliveryMode::Buffered);
        assert_eq!(config.max_buffer_bytes, Some(4096));
        assert!(!config.metrics_enabled);
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_env_values_ignored() {
        let mut config = ServerConfig::default();
        config.merge_vars(|name| match name {
            "RUNBRIDGE_PORT" => Some("eighty".to_string()),
            "RUNBRIDGE_DELIVERY" => Some("sometimes".to_string()),
            _ => None,
        });

        assert_eq!(config.port, 3000);
        assert_eq!(config.delivery, DeliveryMode::Streaming);
    }

    #[test]
    fn test_listener_options() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let config = ServerConfig {
            trusted_hostname: Some("api.example.com".to_string()),
            metrics_enabled: false,
            ..Default::default()
        };

        let options = config.listener_options(&metrics);
        assert_eq!(options.hostname.as_deref(), Some("api.example.com"));
        assert!(options.metrics.is_none());
    }
}
