//! Runtime services and shared state for the card bot.

use tracing::{info, instrument};

use crate::{
    base::{
        config::Config,
        types::{Res, Void},
    },
    collection::CollectionRegistry,
    interaction::random_post,
    service::{chat::ChatClient, marketplace::MarketplaceClient, state::StateClient},
};

/// Services shared by every handler.
///
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct Services {
    /// The configuration for the application.
    pub config: Config,
    /// The configured collections and their trigger patterns.
    pub registry: CollectionRegistry,
    /// The marketplace client instance.
    pub marketplace: MarketplaceClient,
    /// The recency state.
    pub state: StateClient,
}

impl Services {
    /// Build the services from configuration, resolving dynamic supplies once.
    #[instrument(name = "Services::new", skip_all)]
    pub async fn new(config: Config) -> Res<Self> {
        // Parse the collections.
        let registry = CollectionRegistry::from_config(&config)?;

        // Initialize the marketplace client.
        let marketplace = MarketplaceClient::opensea(&config)?;

        // Resolve the upper bound of dynamic collections.
        registry.resolve_dynamic_supply(&marketplace).await;

        // Load the recency state.
        let state = StateClient::load(&config.state_file, config.persist_state).await;

        Ok(Self {
            config,
            registry,
            marketplace,
            state,
        })
    }
}

/// Runtime service context that can be shared across the application.
#[derive(Clone)]
pub struct Runtime {
    /// The shared services.
    pub services: Services,
    /// The chat client instance.
    pub chat: ChatClient,
}

impl Runtime {
    /// Create a new runtime instance.
    #[instrument(skip_all)]
    pub async fn new(config: Config) -> Res<Self> {
        let services = Services::new(config).await?;

        // Initialize the slack client.
        let chat = ChatClient::slack(&services.config, services.clone()).await?;

        Ok(Self { services, chat })
    }

    pub async fn start(&self) -> Void {
        let posters = random_post::spawn_random_posters(&self.services, &self.chat);
        info!("Started {} random poster(s).", posters.len());

        let result = self.chat.start().await;

        for poster in posters {
            poster.abort();
        }

        // Flush anything recorded since the last post.
        self.services.state.save().await;

        result
    }
}
