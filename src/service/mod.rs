//! Service integrations for external APIs and clients.
//!
//! This module contains implementations for various services used by the card bot:
//! - Chat services (e.g., Slack)
//! - Marketplace services (e.g., OpenSea)
//! - State persistence (JSON snapshot)
//!
//! Each remote service module defines both generic traits and concrete implementations,
//! allowing for extensibility and easy testing.

pub mod chat;
pub mod marketplace;
pub mod state;
