use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Which resolution path produced the result.
///
/// `Approximate` marks a placeholder synthesized from catalog data alone,
/// with no confirmed active listing behind it. Consumers that care about the
/// difference must branch on this tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Item,
    Catalog,
    Search,
    Approximate,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Item => "item",
            Source::Catalog => "catalog",
            Source::Search => "search",
            Source::Approximate => "approximate",
        }
    }
}

/// Condensed seller profile attached to a resolved product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SellerSummary {
    pub id: u64,
    /// Reputation tier reported by the marketplace, "unknown" when the
    /// profile could not be fetched.
    pub reputation: String,
    pub completed_sales: u64,
}

impl Default for SellerSummary {
    fn default() -> Self {
        Self {
            id: 0,
            reputation: "unknown".into(),
            completed_sales: 0,
        }
    }
}

/// One rival listing for the same catalog product. Recomputed per request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompetitorInfo {
    pub item_id: String,
    pub seller_id: u64,
    pub price: f64,
    pub available_quantity: u64,
    pub sold_quantity: u64,
    pub listing_type: Option<String>,
    pub shipping_mode: Option<String>,
    pub logistic_type: Option<String>,
    pub free_shipping: bool,
    pub total_visits: Option<u64>,
    pub seller_reputation: Option<String>,
    pub is_buy_box_winner: bool,
}

/// The assembled, denormalized resolution result.
///
/// `resolved_item_id` denotes a listing that returned a successful detail
/// fetch at resolution time; nothing guarantees it stays valid afterwards.
/// For `Source::Approximate` it carries the catalog identifier instead,
/// since no concrete listing exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedProduct {
    pub original_id: String,
    pub resolved_item_id: String,
    pub catalog_product_id: Option<String>,
    pub title: String,
    pub price: f64,
    pub description: String,
    pub brand: Option<String>,
    pub category_id: String,
    pub sold_quantity: u64,
    pub available_quantity: u64,
    pub condition: String,
    pub permalink: String,
    pub thumbnail: String,
    pub pictures: Vec<String>,
    pub daily_visits: u64,
    pub monthly_visits: u64,
    /// sold quantity over monthly visits, percent, two decimals; 0 when
    /// visits are 0.
    pub conversion_rate: f64,
    pub seller: SellerSummary,
    pub competitors: Vec<CompetitorInfo>,
    pub catalog_payload: Option<Value>,
    pub source: Source,
}

/// Request-level failure taxonomy. Optional enrichment failures never show
/// up here; they degrade individual fields instead.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid product identifier '{0}': expected a listing id, catalog id, numeric id or product URL")]
    InvalidIdentifier(String),
    #[error("product '{original}' could not be resolved to an active listing (tried: {trail})")]
    NotFound { original: String, trail: String },
    #[error("marketplace application credentials were rejected: {0}")]
    Credentials(String),
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

/// sold quantity ÷ monthly visits, as a percentage rounded to two decimals.
pub fn conversion_rate(sold_quantity: u64, monthly_visits: u64) -> f64 {
    if monthly_visits == 0 {
        return 0.0;
    }
    let rate = sold_quantity as f64 / monthly_visits as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}
