use serde::Deserialize;
use serde_json::Value;

/// OAuth grant response, shared by both credential flows.
#[derive(Deserialize, Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Lifetime in seconds reported by the token endpoint.
    pub expires_in: i64,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Shipping {
    pub mode: Option<String>,
    pub logistic_type: Option<String>,
    #[serde(default)]
    pub free_shipping: bool,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Picture {
    pub url: Option<String>,
    pub secure_url: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Attribute {
    pub id: Option<String>,
    pub value_name: Option<String>,
}

/// A single listing as returned by the listing-detail endpoint.
#[derive(Deserialize, Debug, Clone)]
pub struct Item {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub price: f64,
    pub status: Option<String>,
    pub catalog_product_id: Option<String>,
    #[serde(default)]
    pub seller_id: u64,
    #[serde(default)]
    pub category_id: String,
    #[serde(default)]
    pub sold_quantity: u64,
    #[serde(default)]
    pub available_quantity: u64,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub pictures: Vec<Picture>,
    pub listing_type_id: Option<String>,
    pub shipping: Option<Shipping>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl Item {
    pub fn is_active(&self) -> bool {
        self.status.as_deref() == Some("active")
    }

    /// Value of an attribute by upstream attribute id (e.g. "BRAND").
    pub fn attr(&self, attr_id: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.id.as_deref() == Some(attr_id))
            .and_then(|a| a.value_name.as_deref())
    }

    pub fn picture_urls(&self) -> Vec<String> {
        self.pictures
            .iter()
            .filter_map(|p| p.secure_url.clone().or_else(|| p.url.clone()))
            .collect()
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct BuyBoxWinner {
    pub item_id: Option<String>,
    pub price: Option<f64>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PriceRange {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CatalogVariation {
    pub item_id: Option<String>,
}

/// A catalog-level product entry. The upstream payload is much larger; only
/// the fields the cascade consumes are typed, the rest travels as raw JSON
/// in `CatalogFetch`.
#[derive(Deserialize, Debug, Clone)]
pub struct CatalogProduct {
    pub id: String,
    pub name: Option<String>,
    pub status: Option<String>,
    pub category_id: Option<String>,
    pub buy_box_winner: Option<BuyBoxWinner>,
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub variations: Vec<CatalogVariation>,
    #[serde(default)]
    pub children_ids: Vec<String>,
    pub buy_box_winner_price_range: Option<PriceRange>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl CatalogProduct {
    pub fn attr(&self, attr_id: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.id.as_deref() == Some(attr_id))
            .and_then(|a| a.value_name.as_deref())
    }

    /// Midpoint of the buy-box price range, when both bounds are present.
    pub fn price_range_midpoint(&self) -> Option<f64> {
        let range = self.buy_box_winner_price_range.as_ref()?;
        match (range.min_price, range.max_price) {
            (Some(min), Some(max)) => Some((min + max) / 2.0),
            _ => None,
        }
    }
}

/// Typed catalog product plus the untouched upstream payload, which the
/// resolver hands back to callers verbatim.
#[derive(Debug, Clone)]
pub struct CatalogFetch {
    pub product: CatalogProduct,
    pub raw: Value,
}

impl CatalogFetch {
    pub fn from_value(raw: Value) -> Result<Self, serde_json::Error> {
        let product: CatalogProduct = serde_json::from_value(raw.clone())?;
        Ok(Self { product, raw })
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct SearchSeller {
    pub id: Option<u64>,
}

/// One row of a search-results page. Far thinner than a listing detail.
#[derive(Deserialize, Debug, Clone)]
pub struct SearchItem {
    pub id: String,
    pub title: Option<String>,
    pub price: Option<f64>,
    pub catalog_product_id: Option<String>,
    pub seller: Option<SearchSeller>,
    pub category_id: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SellerTransactions {
    pub completed: Option<u64>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SellerReputation {
    pub level_id: Option<String>,
    pub transactions: Option<SellerTransactions>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Seller {
    pub id: u64,
    pub nickname: Option<String>,
    pub seller_reputation: Option<SellerReputation>,
}
