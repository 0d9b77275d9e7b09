//! Marketplace response types, limited to the fields the bot consumes.

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};

/// An account, resolved from an address or a username.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// A holder of an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub address: String,
    #[serde(default)]
    pub quantity: u64,
}

/// Item metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nft {
    pub identifier: String,
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub contract: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub display_image_url: Option<String>,
    #[serde(default)]
    pub opensea_url: Option<String>,
    #[serde(default)]
    pub owners: Vec<Owner>,
}

impl Nft {
    pub fn token_id(&self) -> Option<u64> {
        self.identifier.parse().ok()
    }

    /// Preferred image for display.
    pub fn image(&self) -> Option<&str> {
        self.display_image_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or(self.image_url.as_deref().filter(|u| !u.is_empty()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NftResponse {
    pub nft: Nft,
}

/// A page of items held by an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftPage {
    #[serde(default)]
    pub nfts: Vec<Nft>,
    #[serde(default)]
    pub next: Option<String>,
}

/// Contract details; `collection` is the collection slug.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub chain: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Collection details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub total_supply: Option<u64>,
}

/// A token amount in its smallest unit.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub decimals: u32,
    #[serde_as(as = "DisplayFromStr")]
    pub value: u128,
}

/// Payment attached to a sale event.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    #[serde_as(as = "DisplayFromStr")]
    pub quantity: u128,
    #[serde(default)]
    pub token_address: String,
    #[serde(default)]
    pub decimals: u32,
    #[serde(default)]
    pub symbol: String,
}

/// A sale of an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleEvent {
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub payment: Option<Payment>,
    #[serde(default)]
    pub closing_date: Option<i64>,
    #[serde(default)]
    pub seller: Option<String>,
    #[serde(default)]
    pub buyer: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsResponse {
    #[serde(default)]
    pub asset_events: Vec<SaleEvent>,
}

/// Best offer on an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    #[serde(default)]
    pub order_hash: Option<String>,
    pub price: Price,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingPrice {
    pub current: Price,
}

/// Best listing of an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    #[serde(default)]
    pub order_hash: Option<String>,
    pub price: ListingPrice,
}

/// An item picked from an account's holdings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNft {
    pub nft: Nft,
    pub token_id: u64,
}

/// Render a smallest-unit amount as a decimal with at most four fractional digits.
///
/// E.g., `1_500_000_000_000_000_000` with 18 decimals and `ETH` is `1.5 ETH`.
pub fn format_amount(value: u128, decimals: u32, symbol: &str) -> String {
    let Some(scale) = 10u128.checked_pow(decimals) else {
        return format!("{value} {symbol}").trim().to_string();
    };

    let whole = value / scale;
    let fraction = value % scale;

    // Truncate to four fractional digits.
    let digits = decimals.min(4);
    let fraction = fraction / 10u128.pow(decimals - digits);

    let mut amount = whole.to_string();
    if digits > 0 && fraction > 0 {
        let fraction = format!("{:0width$}", fraction, width = digits as usize);
        amount.push('.');
        amount.push_str(fraction.trim_end_matches('0'));
    }

    format!("{amount} {symbol}").trim().to_string()
}

impl Price {
    pub fn display(&self) -> String {
        format_amount(self.value, self.decimals, &self.currency)
    }
}

impl Payment {
    pub fn display(&self) -> String {
        format_amount(self.quantity, self.decimals, &self.symbol)
    }
}

// Tests.
