//! Periodic posting of a random item to configured channels.
//!
//! Each schedule is `channelId=minutes[:selector]`. The selector names the
//! collections to rotate through: empty or `*` for all of them, otherwise
//! prefixes joined by `+`, where `default` names the unprefixed collection.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{task::JoinHandle, time::Instant};
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

use crate::{
    base::types::{FetchLog, Res, Void},
    collection::{CollectionConfig, CollectionRegistry, selector::get_unique_random_token},
    runtime::Services,
    service::chat::ChatClient,
};

use super::card::build_token_card;

/// Which collections a schedule draws from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionSelector {
    All,
    /// Lowercase prefixes; the empty string is the unprefixed collection.
    Prefixes(Vec<String>),
}

impl CollectionSelector {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        if raw.is_empty() || raw == "*" {
            return Self::All;
        }

        let prefixes = raw
            .split('+')
            .map(|p| p.trim().to_lowercase())
            .map(|p| if p == "default" { String::new() } else { p })
            .collect();

        Self::Prefixes(prefixes)
    }

    /// The configured collections this selector names, in selector order.
    ///
    /// Unknown prefixes are logged and ignored.
    pub fn resolve(&self, registry: &CollectionRegistry) -> Vec<Arc<CollectionConfig>> {
        match self {
            Self::All => registry.collections().to_vec(),
            Self::Prefixes(prefixes) => prefixes
                .iter()
                .filter_map(|prefix| {
                    let found = if prefix.is_empty() {
                        registry.collections().iter().find(|c| c.is_default())
                    } else {
                        registry.collection_by_prefix(prefix)
                    };

                    if found.is_none() {
                        warn!("Ignoring unknown collection prefix `{}` in random post schedule.", prefix);
                    }

                    found.cloned()
                })
                .collect(),
        }
    }
}

/// One channel's posting schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomPostSchedule {
    pub channel_id: String,
    pub interval: Duration,
    pub selector: CollectionSelector,
}

/// Parse comma-separated `channelId=minutes[:selector]` entries, skipping malformed ones.
pub fn parse_random_post_channels(raw: &str) -> Vec<RandomPostSchedule> {
    raw.split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .filter_map(|entry| match parse_schedule(entry) {
            Ok(schedule) => Some(schedule),
            Err(err) => {
                warn!("Skipping random post entry `{}`: {}", entry, err);
                None
            }
        })
        .collect()
}

fn parse_schedule(entry: &str) -> Res<RandomPostSchedule> {
    let (channel_id, rest) = entry.split_once('=').ok_or_else(|| anyhow::anyhow!("expected `channelId=minutes[:selector]`"))?;

    let channel_id = channel_id.trim();
    if channel_id.is_empty() {
        return Err(anyhow::anyhow!("missing channel id"));
    }

    let (minutes, selector) = rest.split_once(':').unwrap_or((rest, ""));
    let minutes: u64 = minutes.trim().parse().map_err(|_| anyhow::anyhow!("`{}` is not a number of minutes", minutes.trim()))?;

    if minutes == 0 {
        return Err(anyhow::anyhow!("interval must be at least one minute"));
    }

    Ok(RandomPostSchedule {
        channel_id: channel_id.to_string(),
        interval: Duration::from_secs(minutes * 60),
        selector: CollectionSelector::parse(selector),
    })
}

/// In-memory round-robin position per channel.
#[derive(Debug, Default)]
pub struct ChannelRotation {
    positions: Mutex<HashMap<String, usize>>,
}

impl ChannelRotation {
    /// The next index in `0..len` for `channel_id`.
    pub fn next(&self, channel_id: &str, len: usize) -> usize {
        if len == 0 {
            return 0;
        }

        let mut positions = self.positions.lock().unwrap_or_else(|e| e.into_inner());
        let position = positions.entry(channel_id.to_string()).or_default();

        let index = *position % len;
        *position = (index + 1) % len;

        index
    }
}

/// Pick, render, and post one random item, then record it for the channel.
#[instrument(skip(services, chat, collection), fields(collection = %collection.name))]
pub async fn post_random_token(services: &Services, chat: &ChatClient, channel_id: &str, collection: &CollectionConfig) -> Void {
    let token_id = get_unique_random_token(collection, channel_id, &services.state);
    let log = FetchLog::new();

    let card = build_token_card(&services.marketplace, collection, token_id, &log).await;

    for line in log.lines() {
        debug!("{}", line);
    }

    chat.send_cards(channel_id, "", &[card?]).await?;

    info!("Posted {} #{} to {}.", collection.name, token_id, channel_id);

    services.state.add_recent_token(channel_id, token_id);
    services.state.save().await;

    Ok(())
}

/// Start one timer task per configured schedule.
#[instrument(skip_all)]
pub fn spawn_random_posters(services: &Services, chat: &ChatClient) -> Vec<JoinHandle<()>> {
    let Some(raw) = services.config.random_post_channels.as_deref() else {
        return Vec::new();
    };

    let rotation = Arc::new(ChannelRotation::default());
    let mut handles = Vec::new();

    for schedule in parse_random_post_channels(raw) {
        let collections = schedule.selector.resolve(&services.registry);

        if collections.is_empty() {
            warn!("No collections for random posts in {}; skipping.", schedule.channel_id);
            continue;
        }

        info!("Posting a random item to {} every {} minute(s) from {} collection(s).", schedule.channel_id, schedule.interval.as_secs() / 60, collections.len());

        let services = services.clone();
        let chat = chat.clone();
        let rotation = rotation.clone();
        let span = info_span!("random_post", channel_id = %schedule.channel_id);

        let handle = tokio::spawn(
            async move {
                let mut interval = tokio::time::interval_at(Instant::now() + schedule.interval, schedule.interval);

                loop {
                    interval.tick().await;

                    let collection = &collections[rotation.next(&schedule.channel_id, collections.len())];

                    if let Err(err) = post_random_token(&services, &chat, &schedule.channel_id, collection).await {
                        error!("Error while posting random item: {}", err);
                    }
                }
            }
            .instrument(span),
        );

        handles.push(handle);
    }

    handles
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::{config::Config, types::Card},
        service::{
            chat::GenericChatClient,
            marketplace::{
                GenericMarketplaceApi, MarketplaceClient,
                types::{Account, CollectionInfo, Contract, Listing, Nft, NftPage, Offer, SaleEvent},
            },
            state::StateClient,
        },
    };
    use async_trait::async_trait;
    use mockall::{mock, predicate::eq};

    mock! {
        pub Chat {}

        #[async_trait]
        impl GenericChatClient for Chat {
            fn bot_user_id(&self) -> &str;
            async fn start(&self) -> Void;
            async fn send_message(&self, channel_id: &str, thread_ts: &str, text: &str) -> Void;
            async fn send_cards(&self, channel_id: &str, thread_ts: &str, cards: &[Card]) -> Void;
        }
    }

    mock! {
        pub Api {}

        #[async_trait]
        impl GenericMarketplaceApi for Api {
            async fn get_account(&self, address_or_username: &str) -> Res<Option<Account>>;
            async fn get_nft(&self, chain: &str, address: &str, token_id: u64) -> Res<Option<Nft>>;
            async fn get_contract(&self, chain: &str, address: &str) -> Res<Option<Contract>>;
            async fn get_collection(&self, slug: &str) -> Res<Option<CollectionInfo>>;
            async fn get_last_sale(&self, chain: &str, address: &str, token_id: u64) -> Res<Option<SaleEvent>>;
            async fn get_best_offer(&self, slug: &str, token_id: u64) -> Res<Option<Offer>>;
            async fn get_best_listing(&self, slug: &str, token_id: u64) -> Res<Option<Listing>>;
            async fn get_account_nfts(&self, chain: &str, address: &str, collection_slug: Option<String>, cursor: Option<String>) -> Res<NftPage>;
        }
    }

    fn registry() -> CollectionRegistry {
        CollectionRegistry::new(vec![CollectionConfig::new("", "0xabc", "GlyphBots", 1, 100), CollectionConfig::new("art", "0xdef", "Artifacts", 1, 50)]).unwrap()
    }

    #[test]
    fn test_parse_random_post_channels() {
        let schedules = parse_random_post_channels("C1=60, C2=15:art, C3=5:default+art, C4=30:*");

        assert_eq!(schedules.len(), 4);
        assert_eq!(schedules[0].channel_id, "C1");
        assert_eq!(schedules[0].interval, Duration::from_secs(3600));
        assert_eq!(schedules[0].selector, CollectionSelector::All);
        assert_eq!(schedules[1].selector, CollectionSelector::Prefixes(vec!["art".to_string()]));
        assert_eq!(schedules[2].selector, CollectionSelector::Prefixes(vec![String::new(), "art".to_string()]));
        assert_eq!(schedules[3].selector, CollectionSelector::All);
    }

    #[test]
    fn test_parse_skips_malformed_entries() {
        let schedules = parse_random_post_channels("C1, C2=abc, C3=0, =10, C4=10");

        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].channel_id, "C4");
    }

    #[test]
    fn test_selector_resolve_ignores_unknown() {
        let registry = registry();

        let names = |selector: &CollectionSelector| selector.resolve(&registry).iter().map(|c| c.name.clone()).collect::<Vec<_>>();

        assert_eq!(names(&CollectionSelector::All), vec!["GlyphBots", "Artifacts"]);
        assert_eq!(names(&CollectionSelector::parse("art+nope+default")), vec!["Artifacts", "GlyphBots"]);
        assert!(names(&CollectionSelector::parse("nope")).is_empty());
    }

    #[test]
    fn test_rotation_is_per_channel() {
        let rotation = ChannelRotation::default();

        assert_eq!((0..5).map(|_| rotation.next("C1", 2)).collect::<Vec<_>>(), vec![0, 1, 0, 1, 0]);
        assert_eq!(rotation.next("C2", 3), 0);
        assert_eq!(rotation.next("C1", 2), 1);
        assert_eq!(rotation.next("C3", 0), 0);
    }

    #[tokio::test]
    async fn test_post_random_token_records_recent() {
        let mut api = MockApi::new();
        api.expect_get_contract().returning(|_, _| Ok(None));
        api.expect_get_last_sale().returning(|_, _, _| Ok(None));
        api.expect_get_nft().with(eq("ethereum"), eq("0xabc"), eq(7u64)).returning(|_, _, _| {
            Ok(Some(Nft {
                identifier: "7".to_string(),
                ..Default::default()
            }))
        });

        let mut chat = MockChat::new();
        chat.expect_send_cards()
            .withf(|channel_id, thread_ts, cards| channel_id == "C1" && thread_ts.is_empty() && cards.len() == 1 && cards[0].title == "GlyphBots #7")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let services = Services {
            config: Config::default(),
            registry: CollectionRegistry::new(vec![CollectionConfig::new("", "0xabc", "GlyphBots", 7, 7)]).unwrap(),
            marketplace: MarketplaceClient::new(Arc::new(api)).unwrap(),
            state: StateClient::in_memory(),
        };
        let chat = ChatClient::new(Arc::new(chat));
        let collection = services.registry.default_collection().unwrap().clone();

        post_random_token(&services, &chat, "C1", &collection).await.unwrap();

        assert_eq!(services.state.recent_tokens("C1"), vec![7]);
    }

    #[tokio::test]
    async fn test_failed_post_is_not_recorded() {
        let mut api = MockApi::new();
        api.expect_get_contract().returning(|_, _| Ok(None));
        api.expect_get_last_sale().returning(|_, _, _| Ok(None));
        api.expect_get_nft().returning(|_, _, _| Ok(None));

        let services = Services {
            config: Config::default(),
            registry: CollectionRegistry::new(vec![CollectionConfig::new("", "0xabc", "GlyphBots", 7, 7)]).unwrap(),
            marketplace: MarketplaceClient::new(Arc::new(api)).unwrap(),
            state: StateClient::in_memory(),
        };
        let chat = ChatClient::new(Arc::new(MockChat::new()));
        let collection = services.registry.default_collection().unwrap().clone();

        assert!(post_random_token(&services, &chat, "C1", &collection).await.is_err());
        assert!(services.state.recent_tokens("C1").is_empty());
    }
}
