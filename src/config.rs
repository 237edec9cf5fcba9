use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::mqtt::config::MqttConfig;
use crate::sync::history::DEFAULT_HISTORY_CAPACITY;
use crate::sync::topics::{default_topic_table, TopicBinding};
use crate::sync::transient::DEFAULT_SIGNAL_DURATION;

const CONFIG_DIR: &str = "homesync";
const CONFIG_FILE: &str = "config.toml";

/// The one login accepted by the dashboard gate.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct CredentialConfig {
    pub username: String,
    /// Hex SHA-256 of the password. Empty disables login.
    pub password_hash: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password_hash: String::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct SignalConfig {
    pub camera_visible_ms: u64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            camera_visible_ms: DEFAULT_SIGNAL_DURATION.as_millis() as u64,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Motion topics also drive the door/window fields
    pub mirror_door_from_motion: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub credential: CredentialConfig,
    pub signals: SignalConfig,
    pub history: HistoryConfig,
    pub policy: PolicyConfig,
    /// Overrides the built-in topic table when non-empty
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<TopicBinding>,
}

impl AppConfig {
    /// `<config dir>/homesync/config.toml`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub fn topic_table(&self) -> Vec<TopicBinding> {
        if self.topics.is_empty() {
            default_topic_table(self.policy.mirror_door_from_motion)
        } else {
            self.topics.clone()
        }
    }

    pub fn signal_duration(&self) -> Duration {
        Duration::from_millis(self.signals.camera_visible_ms)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| eyre!("Failed to serialize config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file: {}", e))?;
        Ok(())
    }

    /// Write the default config unless a file already exists.
    pub async fn ensure_default(path: &Path) -> Result<()> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?;

        if !exists {
            info!("Creating default config at {}", path.display());
            AppConfig::default().save(path).await?;
        }
        Ok(())
    }

    pub async fn load_or_default(path: &Path) -> Result<Self> {
        Self::ensure_default(path).await?;
        Self::load(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::state_store::Field;
    use crate::sync::topics::TopicAction;

    #[tokio::test]
    async fn writes_and_reads_back_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let config = AppConfig::load_or_default(&path).await.unwrap();

        assert_eq!(config, AppConfig::default());
        assert_eq!(config.signal_duration(), Duration::from_millis(5000));
        assert_eq!(config.history.capacity, 10);
        assert_eq!(config.topic_table(), default_topic_table(false));
    }

    #[tokio::test]
    async fn existing_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "[policy]\nmirror_door_from_motion = true\n")
            .await
            .unwrap();

        let config = AppConfig::load_or_default(&path).await.unwrap();

        assert!(config.policy.mirror_door_from_motion);
        assert_eq!(config.topic_table(), default_topic_table(true));
    }

    #[test]
    fn configured_topics_replace_the_default_table() {
        let config: AppConfig = toml::from_str(
            r#"
            [mqtt]
            client_id = "kitchen"

            [[topics]]
            topic = "flat/door"
            action = "flag"
            key = "open"
            fields = ["door_open"]
            "#,
        )
        .unwrap();

        let table = config.topic_table();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].action, TopicAction::Flag);
        assert_eq!(table[0].fields, vec![Field::DoorOpen]);
        assert_eq!(config.mqtt.client_id, "kitchen");
        assert_eq!(config.mqtt.keep_alive_secs, 5);
    }

    #[tokio::test]
    async fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "[history\ncapacity = ").await.unwrap();

        assert!(AppConfig::load(&path).await.is_err());
    }
}
