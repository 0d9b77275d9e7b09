//! Load configuration via `config` crate with env-override support.

use std::{ops::Deref, sync::Arc};

use serde::Deserialize;

use super::types::Res;

/// Default marketplace API base URL.
fn default_opensea_api_url() -> String {
    "https://api.opensea.io".to_string()
}

/// Default location of the persisted state snapshot.
fn default_state_file() -> String {
    ".hidden/state.json".to_string()
}

/// Persist state by default.
fn default_persist_state() -> bool {
    true
}

/// Configuration for the nft-card-bot application.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConfigInner {
    /// Slack app token (`CARD_BOT_SLACK_APP_TOKEN`).
    pub slack_app_token: String,
    /// Slack bot token (`CARD_BOT_SLACK_BOT_TOKEN`).
    pub slack_bot_token: String,
    /// Marketplace API key, sent as `x-api-key` (`CARD_BOT_OPENSEA_API_KEY`).
    pub opensea_api_key: String,
    /// Marketplace API base URL (`CARD_BOT_OPENSEA_API_URL`).
    #[serde(default = "default_opensea_api_url")]
    pub opensea_api_url: String,
    /// Multi-collection configuration string (`CARD_BOT_COLLECTIONS`).
    ///
    /// `[prefix:]address:name:minId:maxId[:chain[:color[:description/image]]]`, comma-separated.
    #[serde(default)]
    pub collections: Option<String>,
    /// Legacy single-collection contract address (`CARD_BOT_CONTRACT_ADDRESS`).
    #[serde(default)]
    pub contract_address: Option<String>,
    /// Legacy single-collection display name (`CARD_BOT_COLLECTION_NAME`).
    #[serde(default)]
    pub collection_name: Option<String>,
    /// Legacy lowest token id (`CARD_BOT_MIN_TOKEN_ID`).
    #[serde(default)]
    pub min_token_id: Option<String>,
    /// Legacy highest token id, or `*` for dynamic supply (`CARD_BOT_MAX_TOKEN_ID`).
    #[serde(default)]
    pub max_token_id: Option<String>,
    /// Legacy chain identifier (`CARD_BOT_CHAIN`).
    #[serde(default)]
    pub chain: Option<String>,
    /// Legacy card accent color (`CARD_BOT_EMBED_COLOR`).
    #[serde(default)]
    pub embed_color: Option<String>,
    /// Legacy description template with `{id}` (`CARD_BOT_CUSTOM_DESCRIPTION`).
    #[serde(default)]
    pub custom_description: Option<String>,
    /// Legacy image URL template with `{id}` (`CARD_BOT_CUSTOM_IMAGE_URL`).
    #[serde(default)]
    pub custom_image_url: Option<String>,
    /// Periodic posting schedule, `channelId=minutes[:selector]` comma-separated (`CARD_BOT_RANDOM_POST_CHANNELS`).
    #[serde(default)]
    pub random_post_channels: Option<String>,
    /// Path of the JSON state snapshot (`CARD_BOT_STATE_FILE`).
    #[serde(default = "default_state_file")]
    pub state_file: String,
    /// Whether the recency state is written to disk (`CARD_BOT_PERSIST_STATE`).
    #[serde(default = "default_persist_state")]
    pub persist_state: bool,
}

impl Config {
    pub fn load(explicit_path: Option<&std::path::Path>) -> Res<Self> {
        let mut cfg = config::Config::builder().add_source(config::Environment::default().prefix("CARD_BOT"));

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if std::path::Path::new(".hidden/config.toml").exists() {
            cfg = cfg.add_source(config::File::with_name(".hidden/config.toml"));
        }

        let result = Config {
            inner: Arc::new(cfg.build()?.try_deserialize()?),
        };

        result.validate()?;

        Ok(result)
    }

    /// Check the values that cannot be expressed by serde defaults.
    pub fn validate(&self) -> Res<()> {
        if self.opensea_api_key.trim().is_empty() {
            return Err(anyhow::anyhow!("OpenSea API key must not be empty."));
        }

        if self.persist_state && self.state_file.trim().is_empty() {
            return Err(anyhow::anyhow!("State file path must be set when state persistence is enabled."));
        }

        Ok(())
    }
}

// Tests.
