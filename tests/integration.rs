#![cfg(test)]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use mockall::mock;
use nft_card_bot::{
    base::{
        config::{Config, ConfigInner},
        types::{Card, FetchLog, Res, Void},
    },
    collection::CollectionRegistry,
    interaction::chat_event::{handle_chat_event, handle_help, resolve_message_cards},
    runtime::Services,
    service::{
        chat::{ChatClient, GenericChatClient},
        marketplace::{
            GenericMarketplaceApi, MarketplaceClient,
            types::{Account, CollectionInfo, Contract, Listing, ListingPrice, Nft, NftPage, Offer, Owner, Price, SaleEvent},
        },
        state::StateClient,
    },
};
use tokio::sync::mpsc;

// Mocks.

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

/// A marketplace where every item of `0xabc` below 1000 exists, owned by `alice`, and listed at 0.5 ETH.
fn get_mock_api() -> MockApi {
    let mut api = MockApi::new();

    api.expect_get_contract().returning(|_, address| {
        Ok(Some(Contract {
            address: address.to_string(),
            chain: "ethereum".to_string(),
            collection: Some(if address == "0xabc" { "glyphbots" } else { "artifacts" }.to_string()),
            name: None,
        }))
    });
    api.expect_get_collection().returning(|slug| {
        Ok(Some(CollectionInfo {
            collection: slug.to_string(),
            name: None,
            total_supply: Some(200),
        }))
    });
    api.expect_get_nft().returning(|_, address, token_id| {
        if token_id >= 1000 {
            return Ok(None);
        }

        Ok(Some(Nft {
            identifier: token_id.to_string(),
            contract: address.to_string(),
            image_url: Some(format!("https://img/{token_id}.png")),
            owners: vec![Owner {
                address: "0x1111111111111111111111111111111111111111".to_string(),
                quantity: 1,
            }],
            ..Default::default()
        }))
    });
    api.expect_get_account().returning(|_| {
        Ok(Some(Account {
            address: "0x1111111111111111111111111111111111111111".to_string(),
            username: Some("alice".to_string()),
        }))
    });
    api.expect_get_last_sale().returning(|_, _, _| Ok(None));
    api.expect_get_best_offer().returning(|_, _| Ok(None));
    api.expect_get_best_listing().returning(|_, _| {
        Ok(Some(Listing {
            order_hash: None,
            price: ListingPrice {
                current: Price {
                    currency: "ETH".to_string(),
                    decimals: 18,
                    value: 500_000_000_000_000_000,
                },
            },
        }))
    });

    api
}

/// A chat client that forwards every send to a channel.
fn get_mock_chat() -> (MockChat, mpsc::UnboundedReceiver<(String, Vec<Card>)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut mock = MockChat::new();

    mock.expect_bot_user_id().return_const("U12345".to_string());
    mock.expect_start().returning(|| Ok(()));

    let cards_tx = tx.clone();
    mock.expect_send_cards().returning(move |channel_id, _, cards| {
        let _ = cards_tx.send((channel_id.to_string(), cards.to_vec()));
        Ok(())
    });
    mock.expect_send_message().returning(move |channel_id, _, text| {
        let card = Card {
            title: text.to_string(),
            ..Default::default()
        };
        let _ = tx.send((channel_id.to_string(), vec![card]));
        Ok(())
    });

    (mock, rx)
}

/// Helper function to setup the test environment.
fn setup_test_environment(api: MockApi) -> Services {
    let config = Config {
        inner: Arc::new(ConfigInner {
            slack_app_token: "xapp-test".to_string(),
            slack_bot_token: "xoxb-test".to_string(),
            opensea_api_key: "test_key".to_string(),
            collections: Some("0xabc:GlyphBots:1:500,art:0xdef:Artifacts:1:*:base:#00ff88".to_string()),
            persist_state: false,
            ..Default::default()
        }),
    };

    let registry = CollectionRegistry::from_config(&config).expect("collections should parse");
    let marketplace = MarketplaceClient::new(Arc::new(api)).expect("marketplace client");

    Services {
        config,
        registry,
        marketplace,
        state: StateClient::in_memory(),
    }
}

#[tokio::test]
async fn test_message_reply_contains_cards_in_order() {
    let services = setup_test_environment(get_mock_api());
    let (chat, mut rx) = get_mock_chat();
    let chat = ChatClient::new(Arc::new(chat));

    handle_chat_event("look at art#5 and #42".to_string(), "C01TEST".to_string(), String::new(), services, chat);

    let (channel_id, cards) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.expect("reply should be sent").expect("channel open");

    assert_eq!(channel_id, "C01TEST");
    assert_eq!(cards.len(), 2);
    assert_eq!(cards[0].title, "Artifacts #5");
    assert_eq!(cards[0].color, "#00ff88");
    assert_eq!(cards[1].title, "GlyphBots #42");

    let fields: Vec<(&str, &str)> = cards[1].fields.iter().map(|f| (f.name.as_str(), f.value.as_str())).collect();
    assert_eq!(fields, vec![("Owner", "alice"), ("Listed For", "0.5 ETH")]);
}

#[tokio::test]
async fn test_no_reply_when_nothing_resolves() {
    let services = setup_test_environment(get_mock_api());
    let (chat, mut rx) = get_mock_chat();
    let chat = ChatClient::new(Arc::new(chat));

    // `#999` is out of range for a fixed-supply collection, `unknown#1` has no such prefix.
    handle_chat_event("what about #999 or unknown#1?".to_string(), "C01TEST".to_string(), String::new(), services, chat);

    // The handler drops its sender when done, so a closed channel also means silence.
    let reply = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(!matches!(reply, Ok(Some(_))));
}

#[tokio::test]
async fn test_dynamic_supply_is_refreshed_for_high_ids() {
    let services = setup_test_environment(get_mock_api());
    let log = FetchLog::new();

    let artifacts = services.registry.collection_by_prefix("art").unwrap().clone();
    assert_eq!(artifacts.max_token_id(), 0);

    // Supply is 200: `art#150` resolves after a refresh, `art#250` does not.
    let cards = resolve_message_cards(&services, "art#150 art#250", &log).await;

    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].title, "Artifacts #150");
    assert_eq!(artifacts.max_token_id(), 200);
}

#[tokio::test]
async fn test_startup_resolves_dynamic_supply() {
    let services = setup_test_environment(get_mock_api());

    services.registry.resolve_dynamic_supply(&services.marketplace).await;

    assert_eq!(services.registry.collection_by_prefix("art").unwrap().max_token_id(), 200);
    assert_eq!(services.registry.default_collection().unwrap().max_token_id(), 500);
}

#[tokio::test]
async fn test_username_trigger_picks_held_item() {
    let mut api = get_mock_api();
    api.expect_get_account_nfts().returning(|_, _, _, _| {
        Ok(NftPage {
            nfts: vec![Nft {
                identifier: "77".to_string(),
                contract: "0xabc".to_string(),
                ..Default::default()
            }],
            next: None,
        })
    });

    let services = setup_test_environment(api);
    let log = FetchLog::new();

    let cards = resolve_message_cards(&services, "#alice", &log).await;

    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].title, "GlyphBots #77");
    assert_eq!(cards[0].fields[0].value, "alice");
}

#[tokio::test]
async fn test_help_lists_collections() {
    let services = setup_test_environment(get_mock_api());
    let (chat, mut rx) = get_mock_chat();
    let chat = ChatClient::new(Arc::new(chat));

    handle_help("C01TEST".to_string(), "1234567890.123456".to_string(), services, chat);

    let (_, cards) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.expect("help should be sent").expect("channel open");

    assert!(cards[0].title.contains("GlyphBots"));
    assert!(cards[0].title.contains("`art#random`"));
}
