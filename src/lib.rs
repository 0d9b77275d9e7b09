//! Library root for `nft-card-bot`.
//!
//! The card bot watches Slack channels for inline triggers that reference items
//! of one or more NFT collections and answers with rich cards:
//! - `#1234`, `art#1234` for a specific item
//! - `#random`, `#rand`, `#?` for a random one
//! - `#username` for a random item held by a marketplace user
//!
//! It can also post a random item to configured channels on a timer, avoiding
//! recent repeats per channel. Item data comes from the OpenSea API.

pub mod base;
pub mod collection;
pub mod interaction;
pub mod runtime;
pub mod service;

use base::{config::Config, types::Void};
use rustls::crypto;
use tracing::info;

/// Public async entry for the binary crate.
///
/// Sets up necessary services and starts the card bot runtime:
/// - Initializes the crypto provider
/// - Parses the collections and creates the marketplace, state, and chat clients
/// - Starts the random posters and the main event loop
pub async fn start(config: Config) -> Void {
    info!("Starting nft-card-bot ...");

    // Start the crypto provider.
    crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install the rustls crypto provider."))?;

    // Initialize the runtime.
    let runtime = runtime::Runtime::new(config).await?;

    // Start the runtime.
    runtime.start().await?;

    Ok(())
}
