use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::TimeDelta;
use serde::Deserialize;
use tracing::info;

use crate::attachments::CloudinaryCredentials;

/// Top-level server configuration, loaded from hall.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub presence: PresenceSection,
    pub storage: StorageSection,
    pub attachments: AttachmentsSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub web_address: String,
    /// Public origin of the web client; drives the CORS policy.
    pub public_url: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            web_address: "0.0.0.0:8080".into(),
            public_url: "http://localhost:8080".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite:hall.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PresenceSection {
    /// How often stale presence records are swept.
    pub sweep_interval_secs: u64,
    /// Presence records not refreshed for this long are swept.
    pub stale_timeout_secs: u64,
}

impl Default for PresenceSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            stale_timeout_secs: 300,
        }
    }
}

impl PresenceSection {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn stale_timeout(&self) -> TimeDelta {
        i64::try_from(self.stale_timeout_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Longest accepted message content, in bytes.
    pub max_message_length: usize,
    /// Largest accepted WebSocket frame, in bytes.
    pub max_frame_bytes: usize,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            max_message_length: 4000,
            max_frame_bytes: 64 * 1024,
        }
    }
}

/// Object storage holding uploaded attachments. Deletion on purge is enabled
/// only when all three credentials are present.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AttachmentsSection {
    pub cloud_name: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for AttachmentsSection {
    fn default() -> Self {
        Self {
            cloud_name: None,
            api_key: None,
            api_secret: None,
            request_timeout_secs: 10,
        }
    }
}

impl AttachmentsSection {
    pub fn credentials(&self) -> Option<CloudinaryCredentials> {
        match (&self.cloud_name, &self.api_key, &self.api_secret) {
            (Some(cloud_name), Some(api_key), Some(api_secret))
                if !cloud_name.is_empty() && !api_key.is_empty() && !api_secret.is_empty() =>
            {
                Some(CloudinaryCredentials {
                    cloud_name: cloud_name.clone(),
                    api_key: api_key.clone(),
                    api_secret: api_secret.clone(),
                })
            }
            _ => None,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl ServerConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            Self::from_toml(&contents).with_context(|| format!("failed to parse config file {path}"))?
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("WEB_ADDRESS") {
            self.server.web_address = v;
        }
        if let Some(v) = var("PUBLIC_URL") {
            self.server.public_url = v;
        }
        if let Some(v) = var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = var("PRESENCE_SWEEP_INTERVAL_SECS")
            && let Ok(secs) = v.parse()
        {
            self.presence.sweep_interval_secs = secs;
        }
        if let Some(v) = var("PRESENCE_STALE_TIMEOUT_SECS")
            && let Ok(secs) = v.parse()
        {
            self.presence.stale_timeout_secs = secs;
        }
        if let Some(v) = var("MAX_MESSAGE_LENGTH")
            && let Ok(len) = v.parse()
        {
            self.storage.max_message_length = len;
        }
        if let Some(v) = var("CLOUDINARY_CLOUD_NAME") {
            self.attachments.cloud_name = Some(v);
        }
        if let Some(v) = var("CLOUDINARY_API_KEY") {
            self.attachments.api_key = Some(v);
        }
        if let Some(v) = var("CLOUDINARY_API_SECRET") {
            self.attachments.api_secret = Some(v);
        }
    }
}
