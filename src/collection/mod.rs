//! Configured collections and the registry that resolves triggers against them.
//!
//! A collection is identified in chat by an optional prefix (`art#12`); the
//! unprefixed slot belongs to the default collection. The registry owns the
//! compiled trigger patterns, which are rebuilt from the set of prefixes every
//! time a registry is constructed.

pub mod matcher;
pub mod parse;
pub mod selector;

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use anyhow::anyhow;
use rand::Rng;
use tracing::{info, instrument, warn};

use crate::{
    base::{
        config::Config,
        types::{FetchLog, Res},
    },
    service::marketplace::MarketplaceClient,
};

use matcher::{TokenMatch, TriggerPatterns, UsernameMatch};

/// Chain assumed when a collection entry omits it.
pub const DEFAULT_CHAIN: &str = "ethereum";

/// Card accent used when a collection entry omits it.
pub const DEFAULT_COLOR: &str = "#2081e2";

/// One configured collection.
#[derive(Debug)]
pub struct CollectionConfig {
    /// Lowercase trigger prefix; empty for the default collection.
    pub prefix: String,
    /// Contract address.
    pub address: String,
    /// Display name.
    pub name: String,
    /// Network identifier (e.g., `ethereum`, `base`).
    pub chain: String,
    /// Lowest valid token id (inclusive).
    pub min_token_id: u64,
    /// Highest valid token id (inclusive). Only ever raised.
    max_token_id: AtomicU64,
    /// Whether the upper bound tracks the remote total supply.
    pub dynamic_supply: bool,
    /// Card accent color.
    pub color: String,
    /// Description template; `{id}` is substituted.
    pub custom_description: Option<String>,
    /// Image URL template; `{id}` is substituted.
    pub custom_image_url: Option<String>,
}

impl CollectionConfig {
    pub fn new(prefix: impl Into<String>, address: impl Into<String>, name: impl Into<String>, min_token_id: u64, max_token_id: u64) -> Self {
        Self {
            prefix: prefix.into().to_lowercase(),
            address: address.into(),
            name: name.into(),
            chain: DEFAULT_CHAIN.to_string(),
            min_token_id,
            max_token_id: AtomicU64::new(max_token_id),
            dynamic_supply: false,
            color: DEFAULT_COLOR.to_string(),
            custom_description: None,
            custom_image_url: None,
        }
    }

    /// A collection whose upper bound is fetched from the marketplace; `0` until then.
    pub fn dynamic(prefix: impl Into<String>, address: impl Into<String>, name: impl Into<String>, min_token_id: u64) -> Self {
        Self {
            dynamic_supply: true,
            ..Self::new(prefix, address, name, min_token_id, 0)
        }
    }

    pub fn with_chain(mut self, chain: impl Into<String>) -> Self {
        self.chain = chain.into();
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn with_custom_description(mut self, description: Option<String>) -> Self {
        self.custom_description = description;
        self
    }

    pub fn with_custom_image_url(mut self, image_url: Option<String>) -> Self {
        self.custom_image_url = image_url;
        self
    }

    pub fn max_token_id(&self) -> u64 {
        self.max_token_id.load(Ordering::Acquire)
    }

    /// Raise the upper bound to `max_token_id`; lower values are ignored.
    ///
    /// Returns whether the bound changed.
    pub fn raise_max_token_id(&self, max_token_id: u64) -> bool {
        self.max_token_id.fetch_max(max_token_id, Ordering::AcqRel) < max_token_id
    }

    pub fn is_default(&self) -> bool {
        self.prefix.is_empty()
    }

    /// Whether `token_id` lies within `[min_token_id, max_token_id]`.
    pub fn is_valid_token_id(&self, token_id: u64) -> bool {
        token_id >= self.min_token_id && token_id <= self.max_token_id()
    }

    /// Uniformly pick a token id within the current bounds.
    pub fn random_token_id(&self) -> u64 {
        let max = self.max_token_id();

        if max <= self.min_token_id {
            return self.min_token_id;
        }

        rand::thread_rng().gen_range(self.min_token_id..=max)
    }

    /// Substitute `{id}` into the description template, if any.
    pub fn description_for(&self, token_id: u64) -> Option<String> {
        self.custom_description.as_ref().map(|t| t.replace("{id}", &token_id.to_string()))
    }

    /// Substitute `{id}` into the image URL template, if any.
    pub fn image_url_for(&self, token_id: u64) -> Option<String> {
        self.custom_image_url.as_ref().map(|t| t.replace("{id}", &token_id.to_string()))
    }

    /// Check `token_id` against the bounds, refreshing the supply for dynamic collections.
    ///
    /// Ids above the current bound of a dynamic collection trigger a total
    /// supply lookup; the bound is raised when the new supply covers the id.
    #[instrument(skip(self, marketplace, log), fields(collection = %self.name))]
    pub async fn check_dynamic_token_id(&self, token_id: u64, marketplace: &MarketplaceClient, log: &FetchLog) -> bool {
        if self.is_valid_token_id(token_id) {
            return true;
        }

        if !self.dynamic_supply || token_id < self.min_token_id {
            return false;
        }

        if !self.refresh_supply(marketplace, log).await {
            return false;
        }

        self.is_valid_token_id(token_id)
    }

    /// Fetch the total supply and raise the upper bound to cover it.
    async fn refresh_supply(&self, marketplace: &MarketplaceClient, log: &FetchLog) -> bool {
        let Some(slug) = marketplace.fetch_collection_slug(self, log).await else {
            return false;
        };

        let Some(supply) = marketplace.fetch_total_supply(&slug, log).await else {
            return false;
        };

        if supply == 0 {
            return false;
        }

        let max_token_id = self.min_token_id.saturating_add(supply - 1);
        if self.raise_max_token_id(max_token_id) {
            info!("Raised `{}` max token id to {}.", self.name, max_token_id);
        }

        true
    }
}

/// Registry of configured collections.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct CollectionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    collections: Vec<Arc<CollectionConfig>>,
    patterns: TriggerPatterns,
}

impl CollectionRegistry {
    /// Build a registry, compiling trigger patterns for the given prefixes.
    ///
    /// Fails on duplicate prefixes.
    pub fn new(collections: Vec<CollectionConfig>) -> Res<Self> {
        for (i, c) in collections.iter().enumerate() {
            if collections[..i].iter().any(|other| other.prefix == c.prefix) {
                return Err(anyhow!("Duplicate collection prefix `{}`.", c.prefix));
            }
        }

        let collections: Vec<_> = collections.into_iter().map(Arc::new).collect();
        let patterns = TriggerPatterns::new(collections.iter().map(|c| c.prefix.as_str()))?;

        Ok(Self {
            inner: Arc::new(RegistryInner { collections, patterns }),
        })
    }

    /// Parse the configured collections.
    ///
    /// Uses the multi-collection string when present, otherwise the legacy
    /// single-collection fields. Zero resolved collections is a startup error.
    #[instrument(name = "CollectionRegistry::from_config", skip_all)]
    pub fn from_config(config: &Config) -> Res<Self> {
        let collections = match config.collections.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(raw) => parse::parse_collections(raw),
            None => match parse::legacy_collection(config) {
                Some(Ok(collection)) => vec![collection],
                Some(Err(err)) => {
                    warn!("Skipping legacy collection configuration: {}", err);
                    Vec::new()
                }
                None => Vec::new(),
            },
        };

        if collections.is_empty() {
            return Err(anyhow!(
                "No valid collections configured. Expected `CARD_BOT_COLLECTIONS` as {}, e.g. `{}`.",
                parse::CONFIG_GRAMMAR,
                parse::CONFIG_EXAMPLE
            ));
        }

        for c in &collections {
            info!(
                "Loaded collection `{}` (prefix `{}`, {} {}, ids {}..={}{}).",
                c.name,
                c.prefix,
                c.chain,
                c.address,
                c.min_token_id,
                c.max_token_id(),
                if c.dynamic_supply { ", dynamic" } else { "" }
            );
        }

        Self::new(collections)
    }

    pub fn collections(&self) -> &[Arc<CollectionConfig>] {
        &self.inner.collections
    }

    pub(crate) fn patterns(&self) -> &TriggerPatterns {
        &self.inner.patterns
    }

    /// The unprefixed collection, else the first configured one.
    pub fn default_collection(&self) -> Option<&Arc<CollectionConfig>> {
        self.inner.collections.iter().find(|c| c.is_default()).or_else(|| self.inner.collections.first())
    }

    /// Case-insensitive prefix lookup. The empty prefix resolves to the default collection.
    pub fn collection_by_prefix(&self, prefix: &str) -> Option<&Arc<CollectionConfig>> {
        let prefix = prefix.to_lowercase();

        if prefix.is_empty() {
            return self.default_collection();
        }

        self.inner.collections.iter().find(|c| c.prefix == prefix)
    }

    /// Find the collection owning a contract on a chain.
    pub fn collection_by_contract(&self, chain: &str, address: &str) -> Option<&Arc<CollectionConfig>> {
        self.inner
            .collections
            .iter()
            .find(|c| c.chain.eq_ignore_ascii_case(chain) && c.address.eq_ignore_ascii_case(address))
    }

    /// Token triggers in `text`, in order of appearance.
    pub fn parse_message_matches(&self, text: &str) -> Vec<TokenMatch> {
        matcher::parse_message_matches(self, text)
    }

    /// Username triggers in `text`, in order of appearance.
    pub fn parse_username_matches(&self, text: &str) -> Vec<UsernameMatch> {
        matcher::parse_username_matches(self, text)
    }

    /// Resolve the upper bound of every dynamic-supply collection.
    #[instrument(name = "CollectionRegistry::resolve_dynamic_supply", skip_all)]
    pub async fn resolve_dynamic_supply(&self, marketplace: &MarketplaceClient) {
        for collection in self.collections().iter().filter(|c| c.dynamic_supply) {
            let log = FetchLog::new();

            if !collection.refresh_supply(marketplace, &log).await {
                warn!("Could not resolve total supply for `{}`; keeping max token id {}.", collection.name, collection.max_token_id());
            }

            for line in log.lines() {
                warn!("{}", line);
            }
        }
    }

    /// Human-readable listing of the collections and their triggers.
    pub fn help_text(&self) -> String {
        let mut text = String::from("*Available collections*\n");

        for c in self.collections() {
            let range = if c.dynamic_supply && c.max_token_id() < c.min_token_id {
                format!("{}+", c.min_token_id)
            } else {
                format!("{}-{}", c.min_token_id, c.max_token_id())
            };

            let (label, p) = if c.is_default() { (" (default)".to_string(), "") } else { (format!(" (prefix `{}`)", c.prefix), c.prefix.as_str()) };

            text.push_str(&format!(
                "• *{}*{} ids {}: `{p}#{}`, `{p}#random`, `{p}#username`\n",
                c.name, label, range, c.min_token_id
            ));
        }

        text.push_str("\n`#rand` and `#?` also pick a random item.");
        text
    }
}

// Tests.
