//! Slack integration for the card bot.
//!
//! Listens over socket mode for channel messages and app mentions, and renders
//! reply cards as colored attachments built from Block Kit sections.

use std::{
    ops::Deref,
    sync::{Arc, OnceLock},
};

use async_trait::async_trait;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use regex::Regex;
use serde_json::{Value, json};
use slack_morphism::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::{
    base::{
        config::Config,
        types::{Card, Res, Void},
    },
    interaction,
    runtime::Services,
};

use super::{ChatClient, GenericChatClient};

// Type aliases.

type FullClient = slack_morphism::SlackClient<SlackClientHyperConnector<HttpsConnector<HttpConnector>>>;

// Extra methods on `ChatClient` applied by the slack implementation.

impl ChatClient {
    /// Creates a new Slack chat client.
    pub async fn slack(config: &Config, services: Services) -> Res<Self> {
        let client = SlackChatClient::new(config, services).await?;
        Ok(Self { inner: Arc::new(client) })
    }
}

impl From<SlackChatClient> for ChatClient {
    fn from(client: SlackChatClient) -> Self {
        Self { inner: Arc::new(client) }
    }
}

// Structs.

/// User state for the slack socket client.
struct SlackUserState {
    services: Services,
    chat: ChatClient,
    bot_user_id: String,
}

/// Slack client implementation.
#[derive(Clone)]
struct SlackChatClient {
    pub app_token: SlackApiToken,
    pub bot_token: SlackApiToken,
    pub bot_user_id: String,
    pub client: Arc<FullClient>,
    pub services: Services,
}

impl Deref for SlackChatClient {
    type Target = FullClient;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl SlackChatClient {
    /// Create a new Slack chat client.
    #[instrument(name = "SlackChatClient::new", skip_all)]
    pub async fn new(config: &Config, services: Services) -> Res<Self> {
        // Initialize tokens.

        let app_token = SlackApiToken::new(SlackApiTokenValue(config.slack_app_token.clone()));
        let bot_token = SlackApiToken::new(SlackApiTokenValue(config.slack_bot_token.clone()));

        // Initialize the Slack client.

        let https_connector = HttpsConnector::<HttpConnector>::builder().with_native_roots()?.https_only().enable_all_versions().build();
        let connector = SlackClientHyperConnector::with_connector(https_connector);
        let client = Arc::new(slack_morphism::SlackClient::new(connector));

        // Get the bot's user ID.

        let session = client.open_session(&bot_token);
        let bot_user = session.auth_test().await?;
        let bot_user_id = bot_user.user_id.0;

        info!("Slack bot user ID: {}", bot_user_id);

        Ok(Self {
            app_token,
            bot_token,
            bot_user_id,
            client,
            services,
        })
    }

    async fn post(&self, channel_id: &str, thread_ts: &str, content: SlackMessageContent) -> Void {
        let mut request = SlackApiChatPostMessageRequest::new(SlackChannelId(channel_id.to_string()), content).with_unfurl_links(false);

        if !thread_ts.is_empty() {
            request = request.with_thread_ts(SlackTs(thread_ts.to_string()));
        }

        let session = self.client.open_session(&self.bot_token);

        let _ = session.chat_post_message(&request).await.map_err(|e| anyhow::anyhow!("Failed to send message: {}", e))?;

        Ok(())
    }
}

#[async_trait]
impl GenericChatClient for SlackChatClient {
    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    async fn start(&self) -> Void {
        // Initialize the socket mode listener.

        let socket_mode_callbacks = SlackSocketModeListenerCallbacks::new().with_push_events(handle_push_event);

        // Initialize the socket mode listener environment.

        let listener_environment = Arc::new(SlackClientEventsListenerEnvironment::new(self.client.clone()).with_user_state(SlackUserState {
            services: self.services.clone(),
            chat: ChatClient::from(self.clone()),
            bot_user_id: self.bot_user_id.clone(),
        }));

        let socket_mode_listener = Arc::new(SlackClientSocketModeListener::new(
            &SlackClientSocketModeConfig::new(),
            listener_environment.clone(),
            socket_mode_callbacks,
        ));

        // Register an app token to listen for events.
        socket_mode_listener.listen_for(&self.app_token).await?;

        // Serve until Ctrl-C.
        socket_mode_listener.serve().await;

        Ok(())
    }

    #[instrument(skip(self, text))]
    async fn send_message(&self, channel_id: &str, thread_ts: &str, text: &str) -> Void {
        self.post(channel_id, thread_ts, SlackMessageContent::new().with_text(text.to_string())).await
    }

    #[instrument(skip(self, cards), fields(cards = cards.len()))]
    async fn send_cards(&self, channel_id: &str, thread_ts: &str, cards: &[Card]) -> Void {
        let attachments = cards
            .iter()
            .map(|card| serde_json::from_value::<SlackMessageAttachment>(card_attachment_json(card)))
            .collect::<Result<Vec<_>, _>>()?;

        let fallback = cards.iter().map(|c| c.title.as_str()).collect::<Vec<_>>().join(", ");
        let content = SlackMessageContent::new().with_text(fallback).with_attachments(attachments);

        self.post(channel_id, thread_ts, content).await
    }
}

// Rendering.

/// Convert markdown links to Slack's `<url|text>` form.
pub fn markdown_links_to_slack(text: &str) -> String {
    static LINK: OnceLock<Option<Regex>> = OnceLock::new();

    match LINK.get_or_init(|| Regex::new(r"\[([^\]]+)\]\((https?://[^)\s]+)\)").ok()) {
        Some(link) => link.replace_all(text, "<$2|$1>").into_owned(),
        None => text.to_string(),
    }
}

/// Remove Slack entity markup (`<@U123>`, `<#C123|general>`, `<https://...>`) from message text.
pub fn strip_slack_markup(text: &str) -> String {
    static ENTITY: OnceLock<Option<Regex>> = OnceLock::new();

    match ENTITY.get_or_init(|| Regex::new(r"<[^>]*>").ok()) {
        Some(entity) => entity.replace_all(text, " ").into_owned(),
        None => text.to_string(),
    }
}

/// Render a card as a Slack attachment.
pub fn card_attachment_json(card: &Card) -> Value {
    let mut header = format!("*<{}|{}>*", card.url, card.title);
    if let Some(description) = card.description.as_deref().filter(|d| !d.is_empty()) {
        header.push('\n');
        header.push_str(&markdown_links_to_slack(description));
    }

    let mut blocks = vec![json!({
        "type": "section",
        "text": { "type": "mrkdwn", "text": header },
    })];

    if !card.fields.is_empty() {
        let fields: Vec<Value> = card
            .fields
            .iter()
            .map(|f| json!({ "type": "mrkdwn", "text": format!("*{}*\n{}", f.name, f.value) }))
            .collect();

        blocks.push(json!({ "type": "section", "fields": fields }));
    }

    if let Some(image_url) = card.image_url.as_deref().filter(|u| u.starts_with("http")) {
        blocks.push(json!({ "type": "image", "image_url": image_url, "alt_text": card.title }));
    }

    json!({
        "color": card.color,
        "fallback": card.title,
        "blocks": blocks,
    })
}

// Socket mode listener callbacks for Slack.

/// Handles push events from Slack.
#[instrument(skip_all)]
async fn handle_push_event(event_callback: SlackPushEventCallback, _client: Arc<SlackHyperClient>, states: SlackClientEventsUserState) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let event = event_callback.event;
    let states = states.read().await;
    let user_state = states.get_user_state::<SlackUserState>().ok_or(anyhow::anyhow!("Failed to get user state"))?;

    match event {
        SlackEventCallbackBody::Message(slack_message_event) => {
            debug!("Received message event ...");

            // Never answer bots, including ourselves.
            if slack_message_event.sender.bot_id.is_some() || slack_message_event.sender.user.as_ref().is_some_and(|u| u.0 == user_state.bot_user_id) {
                return Ok(());
            }

            // Edits, joins, and other subtypes carry no fresh triggers.
            if slack_message_event.subtype.is_some() {
                return Ok(());
            }

            let text = slack_message_event.content.as_ref().and_then(|c| c.text.as_deref()).unwrap_or_default();

            // If the message @mentions the bot, skip, and let the app mention handler take care of it.
            if text.contains(&user_state.bot_user_id) {
                return Ok(());
            }

            let text = strip_slack_markup(text);
            if text.trim().is_empty() {
                return Ok(());
            }

            let channel_id = slack_message_event.origin.channel.as_ref().ok_or(anyhow::anyhow!("Failed to get channel ID"))?.0.to_owned();
            let thread_ts = slack_message_event.origin.thread_ts.as_ref().map(|ts| ts.0.clone()).unwrap_or_default();

            interaction::chat_event::handle_chat_event(text, channel_id, thread_ts, user_state.services.clone(), user_state.chat.clone());
        }
        SlackEventCallbackBody::AppMention(slack_app_mention_event) => {
            info!("Received app mention event ...");

            let channel_id = slack_app_mention_event.channel.0.to_owned();
            let thread_ts = slack_app_mention_event.origin.thread_ts.as_ref().map(|ts| ts.0.clone()).unwrap_or_default();
            let text = strip_slack_markup(slack_app_mention_event.content.text.as_deref().unwrap_or_default());

            if text.to_lowercase().split_whitespace().any(|w| w.trim_matches(|c: char| !c.is_alphanumeric()) == "help") {
                interaction::chat_event::handle_help(channel_id, thread_ts, user_state.services.clone(), user_state.chat.clone());
            } else {
                interaction::chat_event::handle_chat_event(text, channel_id, thread_ts, user_state.services.clone(), user_state.chat.clone());
            }
        }
        _ => {
            warn!("Received unhandled push event.")
        }
    }

    Ok(())
}

// Tests.
