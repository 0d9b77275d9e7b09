//! Trigger-pattern matching over free-form chat text.
//!
//! Token triggers are `[prefix]#(random|rand|?|digits)`; username triggers are
//! `[prefix]#handle` with a 3-15 character handle starting with a letter. Both
//! must be preceded by the start of the text or a non-word character and
//! followed by a non-word character or the end of the text, so `foo#12` with an
//! unknown `foo` prefix does not fall back to the default collection.

use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::base::types::Res;

use super::{CollectionConfig, CollectionRegistry};

/// Keywords that request a random token id.
const RANDOM_KEYWORDS: [&str; 3] = ["random", "rand", "?"];

/// A resolved request for one token of a collection.
#[derive(Debug, Clone)]
pub struct TokenMatch {
    pub collection: Arc<CollectionConfig>,
    pub token_id: u64,
}

/// A resolved request for a random item owned by a user.
///
/// `collection` is `None` for unprefixed handles, meaning any configured collection.
#[derive(Debug, Clone)]
pub struct UsernameMatch {
    pub collection: Option<Arc<CollectionConfig>>,
    pub username: String,
}

/// Compiled trigger patterns for one set of prefixes.
#[derive(Debug, Clone)]
pub struct TriggerPatterns {
    token: Regex,
    username: Regex,
}

impl TriggerPatterns {
    /// Compile the token and username patterns with an alternation of the non-empty prefixes.
    pub fn new<'a>(prefixes: impl Iterator<Item = &'a str>) -> Res<Self> {
        let mut prefixes: Vec<String> = prefixes.filter(|p| !p.is_empty()).map(regex::escape).collect();

        // Longest first, so `artx` is preferred over `art`.
        prefixes.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let prefix_group = if prefixes.is_empty() { "()".to_string() } else { format!("((?:{})?)", prefixes.join("|")) };

        let token = Regex::new(&format!(r"(?i)(?:^|[^\w]){prefix_group}#(random|rand|\?|\d+)"))?;
        let username = Regex::new(&format!(r"(?i)(?:^|[^\w]){prefix_group}#((?-i:[A-Za-z][A-Za-z0-9_]{{2,14}}))"))?;

        Ok(Self { token, username })
    }

    /// Iterate `(prefix, value)` pairs for token triggers.
    fn tokens<'t>(&'t self, text: &'t str) -> impl Iterator<Item = (&'t str, &'t str)> + 't {
        captures_at_boundary(&self.token, text)
    }

    /// Iterate `(prefix, handle)` pairs for username triggers.
    fn usernames<'t>(&'t self, text: &'t str) -> impl Iterator<Item = (&'t str, &'t str)> + 't {
        captures_at_boundary(&self.username, text)
    }
}

/// Captures whose match is followed by a non-word character or the end of `text`.
fn captures_at_boundary<'t>(re: &'t Regex, text: &'t str) -> impl Iterator<Item = (&'t str, &'t str)> + 't {
    re.captures_iter(text).filter_map(move |caps| {
        let whole = caps.get(0)?;

        let at_boundary = match text[whole.end()..].chars().next() {
            None => true,
            Some(c) => !(c.is_alphanumeric() || c == '_'),
        };

        if !at_boundary {
            return None;
        }

        let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let value = caps.get(2)?.as_str();

        Some((prefix, value))
    })
}

/// Resolve the collection named by a matched prefix.
fn resolve_prefix<'r>(registry: &'r CollectionRegistry, prefix: &str) -> Option<&'r Arc<CollectionConfig>> {
    if prefix.is_empty() { registry.default_collection() } else { registry.collection_by_prefix(prefix) }
}

/// Token triggers in `text`, in order of appearance.
///
/// Random keywords draw an id per occurrence. Explicit ids outside the bounds
/// are dropped unless the collection has a dynamic supply and the id lies above
/// the current upper bound; those are kept for the caller to verify.
pub fn parse_message_matches(registry: &CollectionRegistry, text: &str) -> Vec<TokenMatch> {
    let mut matches = Vec::new();

    for (prefix, value) in registry.patterns().tokens(text) {
        let Some(collection) = resolve_prefix(registry, prefix) else {
            continue;
        };

        let token_id = if RANDOM_KEYWORDS.contains(&value.to_lowercase().as_str()) {
            collection.random_token_id()
        } else {
            let Ok(token_id) = value.parse::<u64>() else {
                debug!("Ignoring unparsable token id `{}`.", value);
                continue;
            };

            let provisional = collection.dynamic_supply && token_id > collection.max_token_id();

            if !collection.is_valid_token_id(token_id) && !provisional {
                debug!("Ignoring out-of-range id {} for `{}`.", token_id, collection.name);
                continue;
            }

            token_id
        };

        matches.push(TokenMatch {
            collection: collection.clone(),
            token_id,
        });
    }

    matches
}

/// Username triggers in `text`, in order of appearance.
pub fn parse_username_matches(registry: &CollectionRegistry, text: &str) -> Vec<UsernameMatch> {
    let mut matches = Vec::new();

    for (prefix, handle) in registry.patterns().usernames(text) {
        let lower = handle.to_lowercase();
        if RANDOM_KEYWORDS.contains(&lower.as_str()) {
            continue;
        }

        let collection = if prefix.is_empty() {
            None
        } else {
            match registry.collection_by_prefix(prefix) {
                Some(collection) => Some(collection.clone()),
                None => continue,
            }
        };

        matches.push(UsernameMatch {
            collection,
            username: handle.to_string(),
        });
    }

    matches
}

// Tests.
