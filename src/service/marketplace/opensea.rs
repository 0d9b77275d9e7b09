//! OpenSea REST (v2) implementation of the marketplace API.
//!
//! Every request carries the `x-api-key` header. A 404 is reported as `Ok(None)`
//! so callers can decide whether "absent" is an error (item metadata) or a
//! normal outcome (no active offer or listing).

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{StatusCode, header::ACCEPT};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::base::{
    config::Config,
    types::Res,
};

use super::{
    GenericMarketplaceApi, MarketplaceClient,
    types::{Account, CollectionInfo, Contract, EventsResponse, Listing, Nft, NftPage, NftResponse, Offer, SaleEvent},
};

/// Items requested per page of an account listing.
const ACCOUNT_PAGE_LIMIT: u32 = 200;

// Extra methods on `MarketplaceClient` applied by the opensea implementation.

impl MarketplaceClient {
    /// Creates a new OpenSea-backed marketplace client.
    pub fn opensea(config: &Config) -> Res<Self> {
        let api = OpenSeaApi::new(config)?;
        Self::new(Arc::new(api))
    }
}

// Specific implementations.

/// OpenSea API client.
#[derive(Clone)]
pub struct OpenSeaApi {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenSeaApi {
    /// Create a new OpenSea API client.
    #[instrument(name = "OpenSeaApi::new", skip_all)]
    pub fn new(config: &Config) -> Res<Self> {
        let http = reqwest::Client::builder().user_agent(concat!("nft-card-bot/", env!("CARGO_PKG_VERSION"))).build()?;

        Ok(Self {
            http,
            base_url: config.opensea_api_url.trim_end_matches('/').to_string(),
            api_key: config.opensea_api_key.clone(),
        })
    }

    /// GET `/api/v2/{path}` and decode the body; `None` on 404.
    async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> Res<Option<T>>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}/api/v2/{}", self.base_url, path);

        let response = self.http.get(&url).header("x-api-key", &self.api_key).header(ACCEPT, "application/json").query(query).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            debug!("`{}` returned 404.", path);
            return Ok(None);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("OpenSea `{}` returned HTTP {}: {}", path, status, body.trim()));
        }

        Ok(Some(response.json::<T>().await?))
    }
}

#[async_trait]
impl GenericMarketplaceApi for OpenSeaApi {
    #[instrument(skip(self))]
    async fn get_account(&self, address_or_username: &str) -> Res<Option<Account>> {
        self.get_json(&format!("accounts/{address_or_username}"), &[]).await
    }

    #[instrument(skip(self))]
    async fn get_nft(&self, chain: &str, address: &str, token_id: u64) -> Res<Option<Nft>> {
        let response: Option<NftResponse> = self.get_json(&format!("chain/{chain}/contract/{address}/nfts/{token_id}"), &[]).await?;
        Ok(response.map(|r| r.nft))
    }

    #[instrument(skip(self))]
    async fn get_contract(&self, chain: &str, address: &str) -> Res<Option<Contract>> {
        self.get_json(&format!("chain/{chain}/contract/{address}"), &[]).await
    }

    #[instrument(skip(self))]
    async fn get_collection(&self, slug: &str) -> Res<Option<CollectionInfo>> {
        self.get_json(&format!("collections/{slug}"), &[]).await
    }

    #[instrument(skip(self))]
    async fn get_last_sale(&self, chain: &str, address: &str, token_id: u64) -> Res<Option<SaleEvent>> {
        let query = [("event_type", "sale".to_string()), ("limit", "1".to_string())];
        let response: Option<EventsResponse> = self.get_json(&format!("events/chain/{chain}/contract/{address}/nfts/{token_id}"), &query).await?;

        Ok(response.and_then(|r| r.asset_events.into_iter().next()))
    }

    #[instrument(skip(self))]
    async fn get_best_offer(&self, slug: &str, token_id: u64) -> Res<Option<Offer>> {
        self.get_json(&format!("offers/collection/{slug}/nfts/{token_id}/best"), &[]).await
    }

    #[instrument(skip(self))]
    async fn get_best_listing(&self, slug: &str, token_id: u64) -> Res<Option<Listing>> {
        self.get_json(&format!("listings/collection/{slug}/nfts/{token_id}/best"), &[]).await
    }

    #[instrument(skip(self))]
    async fn get_account_nfts(&self, chain: &str, address: &str, collection_slug: Option<String>, cursor: Option<String>) -> Res<NftPage> {
        let mut query = vec![("limit", ACCOUNT_PAGE_LIMIT.to_string())];

        if let Some(slug) = collection_slug {
            query.push(("collection", slug));
        }

        if let Some(cursor) = cursor {
            query.push(("next", cursor));
        }

        let page: Option<NftPage> = self.get_json(&format!("chain/{chain}/account/{address}/nfts"), &query).await?;

        Ok(page.unwrap_or_default())
    }
}
