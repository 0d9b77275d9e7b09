use futures::future::join_all;
use tracing::{Instrument, debug, error, info, instrument, warn};

use crate::{
    base::types::{Card, FetchLog, Void},
    collection::matcher::{TokenMatch, UsernameMatch},
    runtime::Services,
    service::{chat::ChatClient, marketplace::pick_user_nft},
};

use super::card::{build_token_card, build_user_card};

/// Most cards sent in reply to one message.
pub const MAX_CARDS_PER_REPLY: usize = 6;

/// One trigger found in a message.
#[derive(Debug, Clone)]
pub enum CardRequest {
    Token(TokenMatch),
    User(UsernameMatch),
}

#[instrument(skip_all)]
pub fn handle_chat_event(text: String, channel_id: String, thread_ts: String, services: Services, chat: ChatClient) {
    tokio::spawn(
        async move {
            // Process the event.
            let result = handle_chat_event_internal(&text, &channel_id, &thread_ts, &services, &chat).await;

            // Log any errors.
            if let Err(err) = &result {
                error!("Error while handling: {}", err);
            }
        }
        .in_current_span(),
    );
}

#[instrument(skip_all)]
pub fn handle_help(channel_id: String, thread_ts: String, services: Services, chat: ChatClient) {
    tokio::spawn(
        async move {
            let result = chat.send_message(&channel_id, &thread_ts, &services.registry.help_text()).await;

            if let Err(err) = &result {
                error!("Error while sending help: {}", err);
            }
        }
        .in_current_span(),
    );
}

#[instrument(skip_all, fields(channel_id = %channel_id))]
async fn handle_chat_event_internal(text: &str, channel_id: &str, thread_ts: &str, services: &Services, chat: &ChatClient) -> Void {
    let log = FetchLog::new();
    let cards = resolve_message_cards(services, text, &log).await;

    for line in log.lines() {
        debug!("{}", line);
    }

    // Stay silent when nothing resolved.
    if cards.is_empty() {
        return Ok(());
    }

    info!("Replying with {} card(s) ...", cards.len());

    chat.send_cards(channel_id, thread_ts, &cards).await
}

/// Triggers in `text`: token triggers first, then username triggers, capped at [`MAX_CARDS_PER_REPLY`].
pub fn collect_requests(services: &Services, text: &str) -> Vec<CardRequest> {
    let tokens = services.registry.parse_message_matches(text).into_iter().map(CardRequest::Token);
    let users = services.registry.parse_username_matches(text).into_iter().map(CardRequest::User);

    tokens.chain(users).take(MAX_CARDS_PER_REPLY).collect()
}

/// Resolve every trigger in `text` into a card, in request order.
///
/// Requests that fail to resolve are skipped.
#[instrument(skip_all)]
pub async fn resolve_message_cards(services: &Services, text: &str, log: &FetchLog) -> Vec<Card> {
    let requests = collect_requests(services, text);

    if requests.is_empty() {
        return Vec::new();
    }

    debug!("Resolving {} request(s) ...", requests.len());

    let cards = join_all(requests.into_iter().map(|request| resolve_request(services, request, log))).await;

    cards.into_iter().flatten().collect()
}

async fn resolve_request(services: &Services, request: CardRequest, log: &FetchLog) -> Option<Card> {
    match request {
        CardRequest::Token(m) => resolve_token(services, m, log).await,
        CardRequest::User(m) => resolve_user(services, m, log).await,
    }
}

async fn resolve_token(services: &Services, request: TokenMatch, log: &FetchLog) -> Option<Card> {
    let TokenMatch { collection, token_id } = request;

    if !collection.check_dynamic_token_id(token_id, &services.marketplace, log).await {
        debug!("Dropping out-of-range id {} for `{}`.", token_id, collection.name);
        return None;
    }

    match build_token_card(&services.marketplace, &collection, token_id, log).await {
        Ok(card) => Some(card),
        Err(err) => {
            warn!("Skipping card: {}", err);
            None
        }
    }
}

async fn resolve_user(services: &Services, request: UsernameMatch, log: &FetchLog) -> Option<Card> {
    let marketplace = &services.marketplace;

    match request.collection {
        Some(collection) => {
            let Some(slug) = marketplace.fetch_collection_slug(&collection, log).await else {
                return None;
            };

            let item = marketplace.fetch_random_user_nft(&request.username, &collection.chain, log, Some(&slug)).await?;

            Some(build_user_card(marketplace, &collection, &request.username, item, log).await)
        }
        None => {
            // Search every configured collection on the default chain.
            let chain = services.registry.default_collection()?.chain.clone();

            let address = marketplace.fetch_account_address(&request.username, log).await?;
            let held = marketplace.fetch_account_nfts(&address, &chain, log, None).await;

            let held: Vec<_> = held.into_iter().filter(|nft| services.registry.collection_by_contract(&chain, &nft.contract).is_some()).collect();

            let Some(item) = pick_user_nft(held) else {
                log.push(format!("`{}` holds nothing from the configured collections.", request.username));
                return None;
            };

            let collection = services.registry.collection_by_contract(&chain, &item.nft.contract)?.clone();

            Some(build_user_card(marketplace, &collection, &request.username, item, log).await)
        }
    }
}

// Tests.
