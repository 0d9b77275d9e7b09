//! Random token selection that avoids recent repeats per channel.

use tracing::debug;

use crate::service::state::StateClient;

use super::CollectionConfig;

/// Draws attempted before accepting a repeat.
pub const MAX_UNIQUE_ATTEMPTS: usize = 10;

/// Draw a random token id for `collection`, preferring ids not recently sent to `channel_id`.
///
/// Makes at most [`MAX_UNIQUE_ATTEMPTS`] draws and returns the first id absent
/// from the channel's recency list; when every draw collides the last one is
/// returned. Callers record the id with [`StateClient::add_recent_token`] once
/// it has actually been posted.
pub fn get_unique_random_token(collection: &CollectionConfig, channel_id: &str, state: &StateClient) -> u64 {
    let mut token_id = collection.random_token_id();

    for attempt in 1..=MAX_UNIQUE_ATTEMPTS {
        if !state.was_recently_sent(channel_id, token_id) {
            return token_id;
        }

        if attempt < MAX_UNIQUE_ATTEMPTS {
            token_id = collection.random_token_id();
        }
    }

    debug!("All {} draws for `{}` in {} were recent; accepting repeat {}.", MAX_UNIQUE_ATTEMPTS, collection.name, channel_id, token_id);

    token_id
}

// Tests.
