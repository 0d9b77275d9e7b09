//! Marketplace service: raw API trait plus the caching metadata resolver.
//!
//! `GenericMarketplaceApi` is the thin REST surface; `MarketplaceClient` wraps it
//! with the slug and username caches and the failure policy. Every `fetch_*`
//! method swallows errors into `None`, recording a user-facing line in the
//! caller's [`FetchLog`], except [`MarketplaceClient::fetch_nft`] which fails
//! with [`ResolveError::NotFound`].

pub mod opensea;
pub mod types;

use std::{
    ops::Deref,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::{
    base::{
        cache::LruCache,
        types::{FetchLog, Res},
    },
    collection::CollectionConfig,
};

use types::{Account, CollectionInfo, Contract, Listing, Nft, NftPage, Offer, SaleEvent, UserNft};

/// Capacity of the `(chain, address)` to slug cache.
pub const SLUG_CACHE_CAPACITY: usize = 10;

/// Capacity of the address to display-name cache.
pub const USERNAME_CACHE_CAPACITY: usize = 100;

/// Upper bound on account pages walked for a single lookup.
pub const MAX_ACCOUNT_PAGES: usize = 5;

// Errors.

#[derive(Debug, Error)]
pub enum ResolveError {
    /// Item metadata could not be fetched; a card cannot be built.
    #[error("`{collection}` #{token_id} not found: {reason}")]
    NotFound { collection: String, token_id: u64, reason: String },
}

// Traits.

/// Generic marketplace REST surface that clients must implement.
///
/// `Ok(None)` means the remote reported the resource absent (HTTP 404).
#[async_trait]
pub trait GenericMarketplaceApi: Send + Sync + 'static {
    /// Look up an account by address or username.
    async fn get_account(&self, address_or_username: &str) -> Res<Option<Account>>;

    /// Fetch item metadata.
    async fn get_nft(&self, chain: &str, address: &str, token_id: u64) -> Res<Option<Nft>>;

    /// Fetch contract details, including the collection slug.
    async fn get_contract(&self, chain: &str, address: &str) -> Res<Option<Contract>>;

    /// Fetch collection details, including the total supply.
    async fn get_collection(&self, slug: &str) -> Res<Option<CollectionInfo>>;

    /// Most recent sale of an item.
    async fn get_last_sale(&self, chain: &str, address: &str, token_id: u64) -> Res<Option<SaleEvent>>;

    /// Best active offer on an item.
    async fn get_best_offer(&self, slug: &str, token_id: u64) -> Res<Option<Offer>>;

    /// Best active listing of an item.
    async fn get_best_listing(&self, slug: &str, token_id: u64) -> Res<Option<Listing>>;

    /// One page of items held by an account, optionally limited to a collection.
    async fn get_account_nfts(&self, chain: &str, address: &str, collection_slug: Option<String>, cursor: Option<String>) -> Res<NftPage>;
}

// Structs.

/// Marketplace client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct MarketplaceClient {
    inner: Arc<dyn GenericMarketplaceApi>,
    slug_cache: Arc<Mutex<LruCache<(String, String), String>>>,
    username_cache: Arc<Mutex<LruCache<String, String>>>,
}

impl Deref for MarketplaceClient {
    type Target = dyn GenericMarketplaceApi;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Canonical short form of an address: `0x1234...abcd`.
pub fn shorten_address(address: &str) -> String {
    if address.len() <= 10 || !address.is_ascii() {
        return address.to_string();
    }

    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}

impl MarketplaceClient {
    pub fn new(inner: Arc<dyn GenericMarketplaceApi>) -> Res<Self> {
        Ok(Self {
            inner,
            slug_cache: Arc::new(Mutex::new(LruCache::new(SLUG_CACHE_CAPACITY)?)),
            username_cache: Arc::new(Mutex::new(LruCache::new(USERNAME_CACHE_CAPACITY)?)),
        })
    }

    /// Record a failed fetch for the user and for diagnostics.
    fn report(log: &FetchLog, what: &str, err: impl std::fmt::Display) {
        warn!("Failed to fetch {}: {}", what, err);
        log.push(format!("Could not fetch {what}."));
    }

    /// Collection slug for the contract, cached on `(chain, address)`.
    ///
    /// Only found slugs are cached, so a transient failure is retried on the next request.
    #[instrument(skip(self, collection, log), fields(collection = %collection.name))]
    pub async fn fetch_collection_slug(&self, collection: &CollectionConfig, log: &FetchLog) -> Option<String> {
        let key = (collection.chain.to_lowercase(), collection.address.to_lowercase());

        if let Some(slug) = lock(&self.slug_cache).get(&key) {
            return Some(slug.clone());
        }

        match self.inner.get_contract(&collection.chain, &collection.address).await {
            Ok(Some(Contract { collection: Some(slug), .. })) if !slug.is_empty() => {
                debug!("Resolved slug `{}` for `{}`.", slug, collection.name);
                lock(&self.slug_cache).put(key, slug.clone());
                Some(slug)
            }
            Ok(_) => {
                log.push(format!("No marketplace collection found for {}.", collection.name));
                None
            }
            Err(err) => {
                Self::report(log, &format!("collection slug for {}", collection.name), err);
                None
            }
        }
    }

    /// Total supply of a collection.
    #[instrument(skip(self, log))]
    pub async fn fetch_total_supply(&self, slug: &str, log: &FetchLog) -> Option<u64> {
        match self.inner.get_collection(slug).await {
            Ok(Some(info)) => info.total_supply,
            Ok(None) => {
                log.push(format!("Collection `{slug}` not found."));
                None
            }
            Err(err) => {
                Self::report(log, &format!("total supply for `{slug}`"), err);
                None
            }
        }
    }

    /// Item metadata. Absence and failures are both a [`ResolveError::NotFound`].
    #[instrument(skip(self, collection, log), fields(collection = %collection.name))]
    pub async fn fetch_nft(&self, collection: &CollectionConfig, token_id: u64, log: &FetchLog) -> Result<Nft, ResolveError> {
        let reason = match self.inner.get_nft(&collection.chain, &collection.address, token_id).await {
            Ok(Some(nft)) => return Ok(nft),
            Ok(None) => "no such item".to_string(),
            Err(err) => err.to_string(),
        };

        log.push(format!("{} #{} not found.", collection.name, token_id));

        Err(ResolveError::NotFound {
            collection: collection.name.clone(),
            token_id,
            reason,
        })
    }

    /// Most recent sale; `None` when the item never sold.
    #[instrument(skip(self, collection, log), fields(collection = %collection.name))]
    pub async fn fetch_last_sale(&self, collection: &CollectionConfig, token_id: u64, log: &FetchLog) -> Option<SaleEvent> {
        match self.inner.get_last_sale(&collection.chain, &collection.address, token_id).await {
            Ok(sale) => sale,
            Err(err) => {
                Self::report(log, &format!("last sale of {} #{}", collection.name, token_id), err);
                None
            }
        }
    }

    /// Best active offer; `None` when there is none.
    #[instrument(skip(self, log))]
    pub async fn fetch_best_offer(&self, slug: &str, token_id: u64, log: &FetchLog) -> Option<Offer> {
        match self.inner.get_best_offer(slug, token_id).await {
            Ok(offer) => offer,
            Err(err) => {
                Self::report(log, &format!("best offer on `{slug}` #{token_id}"), err);
                None
            }
        }
    }

    /// Best active listing; `None` when there is none.
    #[instrument(skip(self, log))]
    pub async fn fetch_best_listing(&self, slug: &str, token_id: u64, log: &FetchLog) -> Option<Listing> {
        match self.inner.get_best_listing(slug, token_id).await {
            Ok(listing) => listing,
            Err(err) => {
                Self::report(log, &format!("best listing of `{slug}` #{token_id}"), err);
                None
            }
        }
    }

    /// Display name for an address, cached on the lowercase address.
    ///
    /// Falls back to the shortened address when the account has no username or
    /// the lookup fails; only the former is cached.
    #[instrument(skip(self, log))]
    pub async fn get_username(&self, address: &str, log: &FetchLog) -> String {
        let key = address.to_lowercase();

        if let Some(name) = lock(&self.username_cache).get(&key) {
            return name.clone();
        }

        let name = match self.inner.get_account(address).await {
            Ok(account) => account.and_then(|a| a.username).filter(|u| !u.is_empty()).unwrap_or_else(|| shorten_address(address)),
            Err(err) => {
                Self::report(log, &format!("account {}", shorten_address(address)), err);
                return shorten_address(address);
            }
        };

        lock(&self.username_cache).put(key, name.clone());
        name
    }

    /// Address of the account with the given username.
    #[instrument(skip(self, log))]
    pub async fn fetch_account_address(&self, username: &str, log: &FetchLog) -> Option<String> {
        match self.inner.get_account(username).await {
            Ok(Some(Account { address, .. })) if !address.is_empty() => Some(address),
            Ok(_) => {
                log.push(format!("User `{username}` not found."));
                None
            }
            Err(err) => {
                Self::report(log, &format!("account `{username}`"), err);
                None
            }
        }
    }

    /// Items held by an address, walking at most [`MAX_ACCOUNT_PAGES`] pages.
    ///
    /// A failed page ends the walk and keeps what was gathered.
    #[instrument(skip(self, log))]
    pub async fn fetch_account_nfts(&self, address: &str, chain: &str, log: &FetchLog, collection_slug: Option<&str>) -> Vec<Nft> {
        let mut nfts = Vec::new();
        let mut cursor = None;

        for _ in 0..MAX_ACCOUNT_PAGES {
            let page = match self.inner.get_account_nfts(chain, address, collection_slug.map(str::to_string), cursor.take()).await {
                Ok(page) => page,
                Err(err) => {
                    Self::report(log, &format!("items held by {}", shorten_address(address)), err);
                    break;
                }
            };

            nfts.extend(page.nfts);

            match page.next.filter(|n| !n.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        nfts
    }

    /// A uniformly chosen item held by `username`.
    #[instrument(skip(self, log))]
    pub async fn fetch_random_user_nft(&self, username: &str, chain: &str, log: &FetchLog, collection_slug: Option<&str>) -> Option<UserNft> {
        let address = self.fetch_account_address(username, log).await?;
        let nfts = self.fetch_account_nfts(&address, chain, log, collection_slug).await;

        let picked = pick_user_nft(nfts);
        if picked.is_none() {
            log.push(format!("`{username}` holds no matching items."));
        }

        picked
    }
}

/// Uniformly pick an item with a numeric identifier.
pub fn pick_user_nft(nfts: Vec<Nft>) -> Option<UserNft> {
    let candidates: Vec<UserNft> = nfts.into_iter().filter_map(|nft| nft.token_id().map(|token_id| UserNft { nft, token_id })).collect();

    candidates.choose(&mut rand::thread_rng()).cloned()
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::{mock, predicate::eq};

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

    fn client(api: MockApi) -> MarketplaceClient {
        MarketplaceClient::new(Arc::new(api)).unwrap()
    }

    fn nft(id: &str) -> Nft {
        Nft {
            identifier: id.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_shorten_address() {
        assert_eq!(shorten_address("0x1234567890abcdef1234567890abcdef12345678"), "0x1234...5678");
        assert_eq!(shorten_address("0xabc"), "0xabc");
    }

    #[tokio::test]
    async fn test_slug_is_cached_per_contract() {
        let mut api = MockApi::new();
        api.expect_get_contract().times(1).returning(|_, _| {
            Ok(Some(Contract {
                collection: Some("glyphbots".to_string()),
                ..Default::default()
            }))
        });

        let marketplace = client(api);
        let collection = CollectionConfig::new("", "0xABC", "GlyphBots", 1, 10);
        let log = FetchLog::new();

        assert_eq!(marketplace.fetch_collection_slug(&collection, &log).await.as_deref(), Some("glyphbots"));
        assert_eq!(marketplace.fetch_collection_slug(&collection, &log).await.as_deref(), Some("glyphbots"));
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_missing_slug_is_not_cached() {
        let mut api = MockApi::new();
        api.expect_get_contract().times(2).returning(|_, _| Err(anyhow::anyhow!("boom")));

        let marketplace = client(api);
        let collection = CollectionConfig::new("", "0xabc", "GlyphBots", 1, 10);
        let log = FetchLog::new();

        assert!(marketplace.fetch_collection_slug(&collection, &log).await.is_none());
        assert!(marketplace.fetch_collection_slug(&collection, &log).await.is_none());
        assert_eq!(log.lines().len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_nft_absent_is_not_found() {
        let mut api = MockApi::new();
        api.expect_get_nft().with(eq("ethereum"), eq("0xabc"), eq(7u64)).returning(|_, _, _| Ok(None));

        let marketplace = client(api);
        let collection = CollectionConfig::new("", "0xabc", "GlyphBots", 1, 10);
        let log = FetchLog::new();

        let err = marketplace.fetch_nft(&collection, 7, &log).await.unwrap_err();

        let ResolveError::NotFound { collection, token_id, .. } = err;
        assert_eq!(collection, "GlyphBots");
        assert_eq!(token_id, 7);
        assert_eq!(log.lines(), vec!["GlyphBots #7 not found.".to_string()]);
    }

    #[tokio::test]
    async fn test_offer_and_listing_absent_or_failed_are_none() {
        let mut api = MockApi::new();
        api.expect_get_best_offer().returning(|_, _| Ok(None));
        api.expect_get_best_listing().returning(|_, _| Err(anyhow::anyhow!("HTTP 500")));

        let marketplace = client(api);
        let log = FetchLog::new();

        assert!(marketplace.fetch_best_offer("glyphbots", 1, &log).await.is_none());
        assert!(log.is_empty(), "absent offer is not an error");

        assert!(marketplace.fetch_best_listing("glyphbots", 1, &log).await.is_none());
        assert_eq!(log.lines().len(), 1);
    }

    #[tokio::test]
    async fn test_username_is_cached_and_shortened() {
        let mut api = MockApi::new();
        api.expect_get_account().with(eq("0x1111111111111111111111111111111111111111")).times(1).returning(|_| {
            Ok(Some(Account {
                address: "0x1111111111111111111111111111111111111111".to_string(),
                username: Some("alice".to_string()),
            }))
        });
        api.expect_get_account().with(eq("0x2222222222222222222222222222222222222222")).times(1).returning(|a| {
            Ok(Some(Account {
                address: a.to_string(),
                username: Some(String::new()),
            }))
        });

        let marketplace = client(api);
        let log = FetchLog::new();

        assert_eq!(marketplace.get_username("0x1111111111111111111111111111111111111111", &log).await, "alice");
        assert_eq!(marketplace.get_username("0x1111111111111111111111111111111111111111", &log).await, "alice");
        assert_eq!(marketplace.get_username("0x2222222222222222222222222222222222222222", &log).await, "0x2222...2222");
        assert_eq!(marketplace.get_username("0x2222222222222222222222222222222222222222", &log).await, "0x2222...2222");
    }

    #[tokio::test]
    async fn test_username_failure_degrades() {
        let mut api = MockApi::new();
        api.expect_get_account().returning(|_| Err(anyhow::anyhow!("timeout")));

        let marketplace = client(api);
        let log = FetchLog::new();

        assert_eq!(marketplace.get_username("0x3333333333333333333333333333333333333333", &log).await, "0x3333...3333");
        assert_eq!(log.lines().len(), 1);
    }

    #[tokio::test]
    async fn test_account_nfts_follow_cursor() {
        let mut api = MockApi::new();
        api.expect_get_account_nfts().with(eq("ethereum"), eq("0xowner"), eq(Some("glyphbots".to_string())), eq(None::<String>)).returning(|_, _, _, _| {
            Ok(NftPage {
                nfts: vec![nft("1"), nft("2")],
                next: Some("page2".to_string()),
            })
        });
        api.expect_get_account_nfts()
            .with(eq("ethereum"), eq("0xowner"), eq(Some("glyphbots".to_string())), eq(Some("page2".to_string())))
            .returning(|_, _, _, _| Ok(NftPage { nfts: vec![nft("3")], next: None }));

        let marketplace = client(api);
        let log = FetchLog::new();

        let nfts = marketplace.fetch_account_nfts("0xowner", "ethereum", &log, Some("glyphbots")).await;

        assert_eq!(nfts.iter().map(|n| n.identifier.as_str()).collect::<Vec<_>>(), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_random_user_nft_unknown_user() {
        let mut api = MockApi::new();
        api.expect_get_account().returning(|_| Ok(None));

        let marketplace = client(api);
        let log = FetchLog::new();

        assert!(marketplace.fetch_random_user_nft("nobody", "ethereum", &log, None).await.is_none());
        assert_eq!(log.lines(), vec!["User `nobody` not found.".to_string()]);
    }

    #[tokio::test]
    async fn test_random_user_nft_picks_held_item() {
        let mut api = MockApi::new();
        api.expect_get_account().returning(|_| {
            Ok(Some(Account {
                address: "0xowner".to_string(),
                username: Some("alice".to_string()),
            }))
        });
        api.expect_get_account_nfts().returning(|_, _, _, _| {
            Ok(NftPage {
                nfts: vec![nft("not-a-number"), nft("42")],
                next: None,
            })
        });

        let marketplace = client(api);
        let log = FetchLog::new();

        let picked = marketplace.fetch_random_user_nft("alice", "ethereum", &log, None).await.unwrap();

        assert_eq!(picked.token_id, 42);
    }
}
