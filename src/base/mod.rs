//! Core components, types, and utilities for the nft-card-bot.
//!
//! This module contains fundamental building blocks used throughout the application:
//! - Configuration handling and environment variables.
//! - The bounded LRU cache backing remote lookups.
//! - Common types and result handling.

pub mod cache;
pub mod config;
pub mod types;
