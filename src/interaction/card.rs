//! Reply card assembly from marketplace data.

use futures::join;
use tracing::instrument;

use crate::{
    base::types::{Card, FetchLog},
    collection::CollectionConfig,
    service::marketplace::{
        MarketplaceClient, ResolveError,
        types::{Listing, Nft, Offer, SaleEvent, UserNft},
    },
};

/// Marketplace data gathered for one item.
struct ItemData {
    nft: Nft,
    owner: Option<String>,
    last_sale: Option<SaleEvent>,
    offer: Option<Offer>,
    listing: Option<Listing>,
}

/// Fallback link for an item without a marketplace URL.
pub fn asset_url(collection: &CollectionConfig, token_id: u64) -> String {
    format!("https://opensea.io/assets/{}/{}/{}", collection.chain, collection.address, token_id)
}

/// Sale, offer, and listing for an item, fetched concurrently.
async fn fetch_market_data(marketplace: &MarketplaceClient, collection: &CollectionConfig, slug: Option<&str>, token_id: u64, log: &FetchLog) -> (Option<SaleEvent>, Option<Offer>, Option<Listing>) {
    join!(
        marketplace.fetch_last_sale(collection, token_id, log),
        async {
            match slug {
                Some(slug) => marketplace.fetch_best_offer(slug, token_id, log).await,
                None => None,
            }
        },
        async {
            match slug {
                Some(slug) => marketplace.fetch_best_listing(slug, token_id, log).await,
                None => None,
            }
        },
    )
}

/// Build the card for one token.
///
/// Item metadata is required; every other lookup only adds a field when it succeeds.
#[instrument(skip(marketplace, collection, log), fields(collection = %collection.name))]
pub async fn build_token_card(marketplace: &MarketplaceClient, collection: &CollectionConfig, token_id: u64, log: &FetchLog) -> Result<Card, ResolveError> {
    let slug = marketplace.fetch_collection_slug(collection, log).await;

    let (nft, (last_sale, offer, listing)) = join!(
        marketplace.fetch_nft(collection, token_id, log),
        fetch_market_data(marketplace, collection, slug.as_deref(), token_id, log),
    );
    let nft = nft?;

    let owner = match nft.owners.first() {
        Some(owner) => Some(marketplace.get_username(&owner.address, log).await),
        None => None,
    };

    Ok(render_card(
        collection,
        token_id,
        ItemData {
            nft,
            owner,
            last_sale,
            offer,
            listing,
        },
    ))
}

/// Build the card for an item picked from `username`'s holdings.
#[instrument(skip(marketplace, collection, item, log), fields(collection = %collection.name, token_id = item.token_id))]
pub async fn build_user_card(marketplace: &MarketplaceClient, collection: &CollectionConfig, username: &str, item: UserNft, log: &FetchLog) -> Card {
    let slug = marketplace.fetch_collection_slug(collection, log).await;
    let (last_sale, offer, listing) = fetch_market_data(marketplace, collection, slug.as_deref(), item.token_id, log).await;

    render_card(
        collection,
        item.token_id,
        ItemData {
            nft: item.nft,
            owner: Some(username.to_string()),
            last_sale,
            offer,
            listing,
        },
    )
}

fn render_card(collection: &CollectionConfig, token_id: u64, data: ItemData) -> Card {
    let url = data.nft.opensea_url.clone().filter(|u| !u.is_empty()).unwrap_or_else(|| asset_url(collection, token_id));
    let image_url = collection.image_url_for(token_id).or_else(|| data.nft.image().map(str::to_string));

    let mut card = Card {
        title: format!("{} #{}", collection.name, token_id),
        url,
        color: collection.color.clone(),
        description: collection.description_for(token_id),
        image_url,
        fields: Vec::new(),
    };

    card.push_field("Owner", data.owner);
    card.push_field("Last Sale", data.last_sale.and_then(|s| s.payment).map(|p| p.display()));
    card.push_field("Listed For", data.listing.map(|l| l.price.current.display()));
    card.push_field("Best Offer", data.offer.map(|o| o.price.display()));

    card
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::marketplace::types::{ListingPrice, Owner, Payment, Price};

    fn eth(value: u128) -> Price {
        Price {
            currency: "ETH".to_string(),
            decimals: 18,
            value,
        }
    }

    #[test]
    fn test_render_card_full() {
        let collection = CollectionConfig::new("", "0xabc", "GlyphBots", 1, 100)
            .with_color("#00ff88")
            .with_custom_description(Some("Bot {id}".to_string()));

        let card = render_card(
            &collection,
            42,
            ItemData {
                nft: Nft {
                    identifier: "42".to_string(),
                    image_url: Some("https://img/42.png".to_string()),
                    owners: vec![Owner {
                        address: "0xowner".to_string(),
                        quantity: 1,
                    }],
                    ..Default::default()
                },
                owner: Some("alice".to_string()),
                last_sale: Some(SaleEvent {
                    payment: Some(Payment {
                        quantity: 1_500_000_000_000_000_000,
                        decimals: 18,
                        symbol: "ETH".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                offer: Some(Offer {
                    order_hash: None,
                    price: eth(100_000_000_000_000_000),
                }),
                listing: Some(Listing {
                    order_hash: None,
                    price: ListingPrice { current: eth(2_000_000_000_000_000_000) },
                }),
            },
        );

        assert_eq!(card.title, "GlyphBots #42");
        assert_eq!(card.url, "https://opensea.io/assets/ethereum/0xabc/42");
        assert_eq!(card.color, "#00ff88");
        assert_eq!(card.description.as_deref(), Some("Bot 42"));
        assert_eq!(card.image_url.as_deref(), Some("https://img/42.png"));

        let fields: Vec<(&str, &str)> = card.fields.iter().map(|f| (f.name.as_str(), f.value.as_str())).collect();
        assert_eq!(fields, vec![("Owner", "alice"), ("Last Sale", "1.5 ETH"), ("Listed For", "2 ETH"), ("Best Offer", "0.1 ETH")]);
    }

    #[test]
    fn test_render_card_omits_absent_fields() {
        let collection = CollectionConfig::new("", "0xabc", "GlyphBots", 1, 100).with_custom_image_url(Some("https://cdn/{id}.png".to_string()));

        let card = render_card(
            &collection,
            7,
            ItemData {
                nft: Nft {
                    identifier: "7".to_string(),
                    image_url: Some("https://img/7.png".to_string()),
                    opensea_url: Some("https://opensea.io/item/7".to_string()),
                    ..Default::default()
                },
                owner: None,
                last_sale: None,
                offer: None,
                listing: None,
            },
        );

        assert_eq!(card.url, "https://opensea.io/item/7");
        assert_eq!(card.image_url.as_deref(), Some("https://cdn/7.png"));
        assert!(card.description.is_none());
        assert!(card.fields.is_empty());
    }
}
