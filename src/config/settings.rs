use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::paging::PagingConfig;

/// Worker-thread knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatcherSettings {
    /// Thread-name prefix for confined workers
    #[serde(default = "default_dispatcher_tag")]
    pub tag: String,
}

fn default_dispatcher_tag() -> String {
    "tileflow-worker".to_string()
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            tag: default_dispatcher_tag(),
        }
    }
}

/// Channel sizing for snapshot delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Bounded capacity of the snapshot delivery channel. Bursts beyond it
    /// coalesce upstream: the latest snapshot wins.
    #[serde(default = "default_snapshot_buffer")]
    pub snapshot_buffer: usize,
}

fn default_snapshot_buffer() -> usize {
    2
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            snapshot_buffer: default_snapshot_buffer(),
        }
    }
}

/// Root settings for embedding applications.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub dispatcher: DispatcherSettings,

    #[serde(default)]
    pub channel: ChannelSettings,

    #[serde(default)]
    pub paging: PagingConfig,
}

impl Settings {
    /// Loads `config/default` if present, then `TILEFLOW_`-prefixed
    /// environment overrides (nested keys joined with `__`, e.g.
    /// `TILEFLOW_CHANNEL__SNAPSHOT_BUFFER=8`).
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_file("config/default")
    }

    pub fn from_file(config_path: &str) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::with_name(config_path).required(false))
            .add_source(
                Environment::with_prefix("tileflow")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher.tag.is_empty() {
            return Err(ConfigError::Message(
                "dispatcher.tag must not be empty".into(),
            ));
        }
        if self.channel.snapshot_buffer == 0 {
            return Err(ConfigError::Message(
                "channel.snapshot_buffer must be non-zero".into(),
            ));
        }
        if self.paging.page_size == 0 {
            return Err(ConfigError::Message("paging.page_size must be non-zero".into()));
        }
        if self.paging.initial_load_size == 0 {
            return Err(ConfigError::Message(
                "paging.initial_load_size must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
