//! Event handling and user interactions for the card bot.
//!
//! This module provides functionality for handling chat events:
//! - Turning message triggers into reply cards
//! - Assembling cards from marketplace data
//! - Periodically posting random items to configured channels

pub mod card;
pub mod chat_event;
pub mod random_post;
