use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    #[serde(default = "default_shutdown_timeout", with = "duration_ms")]
    pub shutdown_timeout: Duration,

    #[serde(default)]
    pub resource: ResourceConfig,

    #[serde(default)]
    pub actor: ActorConfig,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: default_event_buffer_size(),
            shutdown_timeout: default_shutdown_timeout(),
            resource: ResourceConfig::default(),
            actor: ActorConfig::default(),
        }
    }
}

impl MarketConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.event_buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "event_buffer_size",
                message: "must be greater than 0".to_string(),
            });
        }
        self.resource.validate()?;
        self.actor.validate()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let config: Self = from_file(path)?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

impl ResourceConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "mailbox_capacity",
                message: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Per-actor tick parameters.
///
/// `status_timeout` bounds the attribute fetch after a successful claim. When
/// unset it follows `interval`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    #[serde(default = "default_tick_interval", with = "duration_ms")]
    pub interval: Duration,

    #[serde(default)]
    pub exit_probability: f64,

    #[serde(default, with = "option_duration_ms")]
    pub status_timeout: Option<Duration>,

    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            interval: default_tick_interval(),
            exit_probability: 0.0,
            status_timeout: None,
            seed: None,
        }
    }
}

impl ActorConfig {
    pub fn new(interval: Duration, exit_probability: f64) -> Self {
        Self {
            interval,
            exit_probability,
            ..Default::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_status_timeout(mut self, timeout: Duration) -> Self {
        self.status_timeout = Some(timeout);
        self
    }

    pub fn status_timeout(&self) -> Duration {
        self.status_timeout.unwrap_or(self.interval)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "interval",
                message: "tick interval must be greater than 0".to_string(),
            });
        }
        // NaN fails the range check too
        if !(0.0..=1.0).contains(&self.exit_probability) {
            return Err(ConfigError::InvalidValue {
                field: "exit_probability",
                message: format!("{} is outside [0, 1]", self.exit_probability),
            });
        }
        if matches!(self.status_timeout, Some(t) if t.is_zero()) {
            return Err(ConfigError::InvalidValue {
                field: "status_timeout",
                message: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> ConfigResult<T> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> ConfigResult<T> {
    let config = serde_json::from_str(s)?;
    Ok(config)
}

fn default_event_buffer_size() -> usize {
    1000
}
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_mailbox_capacity() -> usize {
    256
}
fn default_tick_interval() -> Duration {
    Duration::from_millis(100)
}

pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

pub mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
