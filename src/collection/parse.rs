//! Parsing of the compact collection configuration string.
//!
//! Entries are comma-separated and their fields colon-separated:
//! `[prefix:]address:name:minId:maxId[:chain[:color[:description/image]]]`.
//! Only the first entry may omit its prefix, which makes it the default
//! collection. Because descriptions may contain colons (URLs, markdown links,
//! times of day), everything after the color field is re-joined and split into
//! a description and an image URL by [`parse_tail`].

use std::sync::OnceLock;

use anyhow::anyhow;
use regex::Regex;
use tracing::warn;

use crate::base::{config::ConfigInner, types::Res};

use super::{CollectionConfig, DEFAULT_CHAIN, DEFAULT_COLOR};

/// Expected shape of one configuration entry.
pub const CONFIG_GRAMMAR: &str = "`[prefix:]address:name:minId:maxId[:chain[:color[:description][:imageUrl]]]` entries separated by commas (only the first entry may omit its prefix; use `*` as maxId for dynamic supply)";

/// A valid two-collection configuration.
pub const CONFIG_EXAMPLE: &str = "0xAB...:GlyphBots:1:11111:ethereum:#00ff88,art:0xCD...:Artifacts:1:150:ethereum:#ff6b35";

/// Marker that identifies a field as a contract address rather than a prefix.
const ADDRESS_MARKER: &str = "0x";

/// Description and image URL recovered from the trailing free-form field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TailFields {
    pub description: Option<String>,
    pub image_url: Option<String>,
}

/// Parse every entry of `raw`, logging and skipping malformed ones.
pub fn parse_collections(raw: &str) -> Vec<CollectionConfig> {
    let mut collections: Vec<CollectionConfig> = Vec::new();

    for (index, entry) in raw.split(',').enumerate() {
        let entry = entry.trim();

        if entry.is_empty() {
            continue;
        }

        match parse_entry(entry, index == 0) {
            Ok(collection) => {
                if collections.iter().any(|c| c.prefix == collection.prefix) {
                    warn!("Skipping collection entry {} (`{}`): prefix `{}` is already in use.", index + 1, collection.name, collection.prefix);
                    continue;
                }

                collections.push(collection);
            }
            Err(err) => warn!("Skipping collection entry {} (`{}`): {}", index + 1, entry, err),
        }
    }

    collections
}

/// Parse a single entry. The first entry may omit its prefix.
pub fn parse_entry(entry: &str, is_first: bool) -> Res<CollectionConfig> {
    let fields: Vec<&str> = entry.split(':').collect();

    let (prefix, rest) = if is_first && fields[0].trim().to_lowercase().starts_with(ADDRESS_MARKER) {
        ("", &fields[..])
    } else {
        (fields[0].trim(), &fields[1..])
    };

    if rest.len() < 4 {
        return Err(anyhow!("expected at least address, name, minId and maxId"));
    }

    if prefix.contains('#') || prefix.contains(char::is_whitespace) {
        return Err(anyhow!("prefix `{prefix}` may not contain `#` or whitespace"));
    }

    let address = rest[0].trim();
    let name = rest[1].trim();

    if address.is_empty() {
        return Err(anyhow!("missing contract address"));
    }

    if name.is_empty() {
        return Err(anyhow!("missing collection name"));
    }

    let chain = rest.get(4).map(|s| s.trim()).filter(|s| !s.is_empty()).unwrap_or(DEFAULT_CHAIN);
    let color = rest.get(5).map(|s| s.trim()).filter(|s| !s.is_empty()).unwrap_or(DEFAULT_COLOR);
    let tail = if rest.len() > 6 { parse_tail(&rest[6..].join(":")) } else { TailFields::default() };

    let collection = build_collection(prefix, address, name, rest[2], rest[3])?
        .with_chain(chain)
        .with_color(color)
        .with_custom_description(tail.description)
        .with_custom_image_url(tail.image_url);

    Ok(collection)
}

/// Build the single collection described by the legacy discrete fields.
///
/// Returns `None` when no legacy contract address is configured.
pub fn legacy_collection(config: &ConfigInner) -> Option<Res<CollectionConfig>> {
    let address = config.contract_address.as_deref().map(str::trim).filter(|a| !a.is_empty())?;

    let result = (|| -> Res<CollectionConfig> {
        let name = config.collection_name.as_deref().map(str::trim).filter(|n| !n.is_empty()).ok_or(anyhow!("missing collection name"))?;
        let min = config.min_token_id.as_deref().unwrap_or("1");
        let max = config.max_token_id.as_deref().ok_or(anyhow!("missing max token id"))?;

        let chain = config.chain.as_deref().map(str::trim).filter(|s| !s.is_empty()).unwrap_or(DEFAULT_CHAIN);
        let color = config.embed_color.as_deref().map(str::trim).filter(|s| !s.is_empty()).unwrap_or(DEFAULT_COLOR);

        Ok(build_collection("", address, name, min, max)?
            .with_chain(chain)
            .with_color(color)
            .with_custom_description(config.custom_description.clone().filter(|d| !d.trim().is_empty()))
            .with_custom_image_url(config.custom_image_url.clone().filter(|u| !u.trim().is_empty())))
    })();

    Some(result)
}

/// Validate the id bounds and construct the collection.
fn build_collection(prefix: &str, address: &str, name: &str, min: &str, max: &str) -> Res<CollectionConfig> {
    let min_token_id: u64 = min.trim().parse().map_err(|_| anyhow!("minId `{}` is not a non-negative integer", min.trim()))?;

    if max.trim() == "*" {
        return Ok(CollectionConfig::dynamic(prefix, address, name, min_token_id));
    }

    let max_token_id: u64 = max.trim().parse().map_err(|_| anyhow!("maxId `{}` is not a non-negative integer or `*`", max.trim()))?;

    if min_token_id > max_token_id {
        return Err(anyhow!("minId {min_token_id} is greater than maxId {max_token_id}"));
    }

    Ok(CollectionConfig::new(prefix, address, name, min_token_id, max_token_id))
}

/// Split the free-form tail into a description and an image URL.
///
/// The image URL is the last `http(s)://` URL standing on its own (at the start,
/// after a `:` separator, or after whitespace); URLs inside markdown link
/// parentheses belong to the description. Without such a URL the whole tail is
/// the description.
pub fn parse_tail(tail: &str) -> TailFields {
    let tail = tail.trim();

    if tail.is_empty() {
        return TailFields::default();
    }

    let Some(start) = find_standalone_url(tail) else {
        return TailFields {
            description: Some(repair_link_schemes(tail)),
            image_url: None,
        };
    };

    let url = &tail[start..];
    let end = url.find(|c: char| c.is_whitespace() || c == ']' || c == ')').unwrap_or(url.len());
    let image_url = &url[..end];

    let before = tail[..start].trim_end();
    let before = before.strip_suffix(':').unwrap_or(before).trim();

    TailFields {
        description: (!before.is_empty()).then(|| repair_link_schemes(before)),
        image_url: (!image_url.is_empty()).then(|| image_url.to_string()),
    }
}

/// Byte offset of the last standalone `http://` or `https://` URL.
fn find_standalone_url(tail: &str) -> Option<usize> {
    tail.match_indices("http")
        .map(|(i, _)| i)
        .filter(|&i| tail[i..].starts_with("http://") || tail[i..].starts_with("https://"))
        .filter(|&i| match tail[..i].chars().next_back() {
            None => true,
            Some(c) => c == ':' || c.is_whitespace(),
        })
        .last()
}

/// Restore `://` after link schemes inside markdown parentheses, e.g. `(http:x.com` or `(https:/x.com`.
fn repair_link_schemes(text: &str) -> String {
    static SCHEME: OnceLock<Option<Regex>> = OnceLock::new();

    match SCHEME.get_or_init(|| Regex::new(r"\((https?):/{0,2}").ok()) {
        Some(scheme) => scheme.replace_all(text, "(${1}://").into_owned(),
        None => text.to_string(),
    }
}

// Tests.
