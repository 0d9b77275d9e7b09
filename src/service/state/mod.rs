//! Persisted bot state: per-channel recency lists and a free-form custom map.
//!
//! The state is held in memory and written to a versioned JSON snapshot only
//! when something changed since the last save. Read and write failures are
//! logged and never reach the message-handling path.

pub mod json;

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, instrument, warn};

use json::JsonStateStore;

/// Current snapshot format version.
pub const STATE_VERSION: u32 = 1;

/// Recently selected ids remembered per channel.
pub const RECENT_TOKEN_LIMIT: usize = 50;

/// Versioned state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotState {
    pub version: u32,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// Channel id to recently selected token ids, most recent first.
    #[serde(default)]
    pub recent_tokens: HashMap<String, Vec<u64>>,
    #[serde(default)]
    pub custom: Map<String, Value>,
}

impl Default for BotState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            recent_tokens: HashMap::new(),
            custom: Map::new(),
        }
    }
}

/// State client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct StateClient {
    inner: Arc<StateInner>,
}

struct StateInner {
    /// `None` when persistence is disabled.
    store: Option<JsonStateStore>,
    state: Mutex<BotState>,
    dirty: AtomicBool,
    /// Serializes snapshot writes through the shared temp file.
    save_lock: AsyncMutex<()>,
}

impl StateClient {
    /// Load the snapshot at `path`, or start fresh.
    ///
    /// With `persist` disabled no file is read or written. A missing or corrupt
    /// file yields a fresh state.
    #[instrument(name = "StateClient::load", skip_all)]
    pub async fn load(path: impl Into<PathBuf>, persist: bool) -> Self {
        if !persist {
            info!("State persistence disabled; keeping state in memory.");
            return Self::in_memory();
        }

        let store = JsonStateStore::new(path);

        let state = match store.read().await {
            Ok(Some(state)) => {
                info!("Loaded state from `{}` ({} channels).", store.path().display(), state.recent_tokens.len());
                state
            }
            Ok(None) => {
                info!("No state file at `{}`; starting fresh.", store.path().display());
                BotState::default()
            }
            Err(err) => {
                error!("Failed to read state file `{}`, starting fresh: {}", store.path().display(), err);
                BotState::default()
            }
        };

        if state.version != STATE_VERSION {
            warn!("State file version {} differs from {}.", state.version, STATE_VERSION);
        }

        Self::with_state(Some(store), state)
    }

    /// A state client that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self::with_state(None, BotState::default())
    }

    fn with_state(store: Option<JsonStateStore>, state: BotState) -> Self {
        Self {
            inner: Arc::new(StateInner {
                store,
                state: Mutex::new(state),
                dirty: AtomicBool::new(false),
                save_lock: AsyncMutex::new(()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BotState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether `token_id` is in the recency list of `channel_id`.
    pub fn was_recently_sent(&self, channel_id: &str, token_id: u64) -> bool {
        self.state().recent_tokens.get(channel_id).is_some_and(|ids| ids.contains(&token_id))
    }

    /// Record `token_id` as the most recent selection for `channel_id`.
    ///
    /// A prior occurrence is moved to the front; the list is capped at [`RECENT_TOKEN_LIMIT`].
    pub fn add_recent_token(&self, channel_id: &str, token_id: u64) {
        {
            let mut state = self.state();
            let ids = state.recent_tokens.entry(channel_id.to_string()).or_default();

            ids.retain(|id| *id != token_id);
            ids.insert(0, token_id);
            ids.truncate(RECENT_TOKEN_LIMIT);
        }

        self.inner.dirty.store(true, Ordering::Release);
    }

    /// Recency list of `channel_id`, most recent first.
    pub fn recent_tokens(&self, channel_id: &str) -> Vec<u64> {
        self.state().recent_tokens.get(channel_id).cloned().unwrap_or_default()
    }

    pub fn custom(&self, key: &str) -> Option<Value> {
        self.state().custom.get(key).cloned()
    }

    pub fn set_custom(&self, key: &str, value: Value) {
        self.state().custom.insert(key.to_string(), value);
        self.inner.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::Acquire)
    }

    /// Write the snapshot if it changed since the last save.
    ///
    /// Returns whether a write happened. Failures are logged and leave the state dirty.
    #[instrument(name = "StateClient::save", skip_all)]
    pub async fn save(&self) -> bool {
        let Some(store) = &self.inner.store else {
            return false;
        };

        let _guard = self.inner.save_lock.lock().await;

        if !self.inner.dirty.swap(false, Ordering::AcqRel) {
            return false;
        }

        let snapshot = {
            let mut state = self.state();
            state.version = STATE_VERSION;
            state.updated_at = Utc::now();
            state.clone()
        };

        match store.write(&snapshot).await {
            Ok(()) => {
                debug!("Saved state to `{}`.", store.path().display());
                true
            }
            Err(err) => {
                error!("Failed to save state to `{}`: {}", store.path().display(), err);
                self.inner.dirty.store(true, Ordering::Release);
                false
            }
        }
    }
}

// Tests.
