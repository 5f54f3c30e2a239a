use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_sample_interval_seconds")]
    pub sample_interval_seconds: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_subscriber_queue_capacity")]
    pub subscriber_queue_capacity: usize,
    #[serde(default = "default_subscriber_send_timeout", with = "humantime_duration")]
    pub subscriber_send_timeout: Duration,
    #[serde(default = "default_sample_timeout", with = "humantime_duration")]
    pub sample_timeout: Duration,
    #[serde(default = "default_provider_timeout", with = "humantime_duration")]
    pub provider_timeout: Duration,
    #[serde(default = "default_shutdown_grace", with = "humantime_duration")]
    pub shutdown_grace: Duration,
    #[serde(default)]
    pub status_provider: Option<StatusProviderConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusProviderConfig {
    pub url: String,
    #[serde(default = "default_status_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            sample_interval_seconds: default_sample_interval_seconds(),
            history_capacity: default_history_capacity(),
            subscriber_queue_capacity: default_subscriber_queue_capacity(),
            subscriber_send_timeout: default_subscriber_send_timeout(),
            sample_timeout: default_sample_timeout(),
            provider_timeout: default_provider_timeout(),
            shutdown_grace: default_shutdown_grace(),
            status_provider: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation(
                "поле listen обязательно".to_string(),
            ));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "поле listen должно быть корректным адресом host:port".to_string(),
            ));
        }
        if self.sample_interval_seconds < 1 {
            return Err(ConfigError::Validation(
                "sample_interval_seconds должно быть >= 1".to_string(),
            ));
        }
        if self.history_capacity < 1 {
            return Err(ConfigError::Validation(
                "history_capacity должно быть >= 1".to_string(),
            ));
        }
        if self.subscriber_queue_capacity < 1 {
            return Err(ConfigError::Validation(
                "subscriber_queue_capacity должно быть >= 1".to_string(),
            ));
        }
        if self.subscriber_send_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "subscriber_send_timeout должен быть > 0".to_string(),
            ));
        }
        if self.sample_timeout.is_zero() || self.sample_timeout >= self.sample_interval() {
            return Err(ConfigError::Validation(
                "sample_timeout должен быть > 0 и меньше sample_interval_seconds".to_string(),
            ));
        }
        if self.provider_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "provider_timeout должен быть > 0".to_string(),
            ));
        }
        if self.shutdown_grace.is_zero() {
            return Err(ConfigError::Validation(
                "shutdown_grace должен быть > 0".to_string(),
            ));
        }
        if let Some(provider) = &self.status_provider {
            validate_status_provider(provider)?;
        }

        Ok(())
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_seconds)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_status_provider(cfg: &StatusProviderConfig) -> Result<(), ConfigError> {
    if cfg.url.trim().is_empty() {
        return Err(ConfigError::Validation(
            "status_provider.url не должен быть пустым".to_string(),
        ));
    }
    if !(cfg.url.starts_with("http://") || cfg.url.starts_with("https://")) {
        return Err(ConfigError::Validation(format!(
            "status_provider.url '{}' должен начинаться с http:// или https://",
            cfg.url
        )));
    }
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "status_provider.timeout_ms должен быть > 0".to_string(),
        ));
    }
    Ok(())
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

const fn default_sample_interval_seconds() -> u64 {
    1
}

const fn default_history_capacity() -> usize {
    60
}

const fn default_subscriber_queue_capacity() -> usize {
    8
}

const fn default_subscriber_send_timeout() -> Duration {
    Duration::from_millis(500)
}

const fn default_sample_timeout() -> Duration {
    Duration::from_millis(800)
}

const fn default_provider_timeout() -> Duration {
    Duration::from_millis(500)
}

const fn default_shutdown_grace() -> Duration {
    Duration::from_secs(2)
}

const fn default_status_timeout_ms() -> u64 {
    500
}

/// Durations written the humantime way: `500ms`, `2s`, `1m 30s`.
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().expect("конфигурация по умолчанию должна быть валидной");
        assert_eq!(cfg.sample_interval_seconds, 1);
        assert_eq!(cfg.history_capacity, 60);
        assert_eq!(cfg.subscriber_queue_capacity, 8);
        assert!(cfg.subscriber_send_timeout < Duration::from_secs(1));
    }

    #[test]
    fn example_yaml_parses_and_validates() {
        let cfg: Config = serde_yaml::from_str(Config::example_yaml()).expect("пример разбирается");
        cfg.validate().expect("пример валиден");
        assert!(cfg.status_provider.is_some());
    }

    #[test]
    fn minimal_yaml_uses_defaults() {
        let cfg: Config = serde_yaml::from_str("listen: \"0.0.0.0:9000\"\n").unwrap();
        assert_eq!(cfg.listen, "0.0.0.0:9000");
        assert_eq!(cfg.subscriber_send_timeout, Duration::from_millis(500));
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(2));
        assert!(cfg.status_provider.is_none());
    }

    #[test]
    fn humantime_durations_are_parsed() {
        let text = "subscriber_send_timeout: 250ms\nshutdown_grace: 1m 30s\n";
        let cfg: Config = serde_yaml::from_str(text).unwrap();
        assert_eq!(cfg.subscriber_send_timeout, Duration::from_millis(250));
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(90));

        assert!(serde_yaml::from_str::<Config>("sample_timeout: soon\n").is_err());
    }

    #[test]
    fn durations_serialize_back_to_humantime() {
        let text = serde_yaml::to_string(&Config::default()).unwrap();
        assert!(text.contains("500ms"), "{text}");
        let parsed: Config = serde_yaml::from_str(&text).unwrap();
        assert_eq!(parsed.sample_timeout, Duration::from_millis(800));
    }

    #[test]
    fn rejects_invalid_values() {
        let cases: Vec<fn(&mut Config)> = vec![
            |c| c.listen = "not an address".to_string(),
            |c| c.listen = " ".to_string(),
            |c| c.sample_interval_seconds = 0,
            |c| c.history_capacity = 0,
            |c| c.subscriber_queue_capacity = 0,
            |c| c.subscriber_send_timeout = Duration::ZERO,
            |c| c.sample_timeout = Duration::from_secs(1),
            |c| c.provider_timeout = Duration::ZERO,
            |c| c.shutdown_grace = Duration::ZERO,
            |c| {
                c.status_provider = Some(StatusProviderConfig {
                    url: "ftp://bot".to_string(),
                    timeout_ms: 100,
                })
            },
            |c| {
                c.status_provider = Some(StatusProviderConfig {
                    url: "http://127.0.0.1:1/status".to_string(),
                    timeout_ms: 0,
                })
            },
        ];

        for (i, mutate) in cases.into_iter().enumerate() {
            let mut cfg = Config::default();
            mutate(&mut cfg);
            assert!(
                matches!(cfg.validate(), Err(ConfigError::Validation(_))),
                "case {i} must be rejected"
            );
        }
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = Config::load_from_file("/nonexistent/statusd.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
