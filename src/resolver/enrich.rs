//! Post-resolution enrichment. Every step here is optional: a failure
//! degrades its own field to a documented default and never aborts the
//! request.
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::strategies::StrategyCx;
use crate::meli::model::{CatalogFetch, Item};
use crate::model::{CompetitorInfo, SellerSummary};

/// Sentinel surfaced when the description endpoint fails or is empty.
pub const NO_DESCRIPTION: &str = "No description available";

/// How many significant title words feed similar-listing searches.
const TITLE_QUERY_WORDS: usize = 4;
/// Assumed sales-to-visit percentage when the category has no entry.
const DEFAULT_ASSUMED_RATE: f64 = 1.5;
/// Months the cumulative sold counter is assumed to span.
const SOLD_WINDOW_MONTHS: f64 = 24.0;

pub async fn description(cx: &StrategyCx<'_>, item: &Item) -> String {
    match cx.api.get_description(cx.app_token, &item.id).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => NO_DESCRIPTION.to_string(),
        Err(err) => {
            warn!(?err, item_id = %item.id, "description fetch failed");
            NO_DESCRIPTION.to_string()
        }
    }
}

pub async fn seller_summary(cx: &StrategyCx<'_>, item: &Item) -> SellerSummary {
    match cx.api.get_seller(cx.app_token, item.seller_id).await {
        Ok(seller) => {
            let reputation = seller
                .seller_reputation
                .as_ref()
                .and_then(|r| r.level_id.clone())
                .unwrap_or_else(|| "unknown".into());
            let completed_sales = seller
                .seller_reputation
                .and_then(|r| r.transactions)
                .and_then(|t| t.completed)
                .unwrap_or(0);
            SellerSummary {
                id: seller.id,
                reputation,
                completed_sales,
            }
        }
        Err(err) => {
            warn!(?err, seller_id = item.seller_id, "seller fetch failed");
            SellerSummary {
                id: item.seller_id,
                ..Default::default()
            }
        }
    }
}

fn title_query(title: &str) -> String {
    title
        .split_whitespace()
        .filter(|w| w.chars().count() >= 3)
        .take(TITLE_QUERY_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Candidate rival listing ids. Catalog products get their sibling listings
/// (dedicated endpoint, then review-derived ids, then public keyword search
/// as last resort); standalone listings get keyword+category lookalikes with
/// the resolved listing itself excluded.
async fn competitor_candidates(cx: &StrategyCx<'_>, item: &Item) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();

    if let Some(catalog_id) = item.catalog_product_id.as_deref() {
        match cx.api.get_catalog_items(cx.app_token, catalog_id).await {
            Ok(listed) if !listed.is_empty() => {
                ids.extend(listed.into_iter().map(|s| s.id));
            }
            Ok(_) => debug!(catalog_id, "catalog items endpoint empty"),
            Err(err) => warn!(?err, catalog_id, "catalog items endpoint failed"),
        }

        if ids.is_empty() {
            match cx.api.review_item_ids(cx.app_token, catalog_id).await {
                Ok(from_reviews) => ids.extend(from_reviews),
                Err(err) => warn!(?err, catalog_id, "review-derived discovery failed"),
            }
        }

        if ids.is_empty() {
            match cx.api.public_search(cx.site, &title_query(&item.title)).await {
                Ok(hits) => ids.extend(hits.into_iter().map(|s| s.id)),
                Err(err) => warn!(?err, catalog_id, "public keyword discovery failed"),
            }
        }
    } else {
        let query = title_query(&item.title);
        match cx
            .api
            .search_keyword(
                cx.search_token(),
                cx.site,
                &query,
                Some(item.category_id.as_str()).filter(|c| !c.is_empty()),
            )
            .await
        {
            Ok(hits) => ids.extend(hits.into_iter().map(|s| s.id).filter(|id| id != &item.id)),
            Err(err) => warn!(?err, "similar-listing search failed"),
        }
    }

    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
    ids.truncate(cx.limits.competitor_candidates);
    ids
}

pub async fn competitors(cx: &StrategyCx<'_>, item: &Item) -> Vec<CompetitorInfo> {
    let candidate_ids = competitor_candidates(cx, item).await;
    if candidate_ids.is_empty() {
        return Vec::new();
    }

    let details = match cx.api.get_items(cx.app_token, &candidate_ids).await {
        Ok(details) => details,
        Err(err) => {
            warn!(?err, "competitor multi-get failed");
            return Vec::new();
        }
    };

    let visit_totals = match cx.api.visits_totals(cx.app_token, &candidate_ids).await {
        Ok(totals) => totals,
        Err(err) => {
            warn!(?err, "competitor visit totals failed");
            HashMap::new()
        }
    };

    // Seller reputation fan-out is the expensive part; cap it and run the
    // capped set concurrently.
    let mut seller_ids: Vec<u64> = details.iter().map(|d| d.seller_id).filter(|id| *id != 0).collect();
    let mut seen = std::collections::HashSet::new();
    seller_ids.retain(|id| seen.insert(*id));
    seller_ids.truncate(cx.limits.seller_fanout);

    let reputations: HashMap<u64, String> = stream::iter(seller_ids)
        .map(|seller_id| async move {
            match cx.api.get_seller(cx.app_token, seller_id).await {
                Ok(seller) => seller
                    .seller_reputation
                    .and_then(|r| r.level_id)
                    .map(|level| (seller_id, level)),
                Err(err) => {
                    debug!(?err, seller_id, "competitor seller fetch failed");
                    None
                }
            }
        })
        .buffer_unordered(cx.limits.seller_fanout)
        .filter_map(|entry| async move { entry })
        .collect()
        .await;

    details
        .into_iter()
        .map(|detail| {
            let shipping = detail.shipping.clone().unwrap_or_default();
            CompetitorInfo {
                is_buy_box_winner: detail.id == item.id,
                total_visits: visit_totals.get(&detail.id).copied(),
                seller_reputation: reputations.get(&detail.seller_id).cloned(),
                item_id: detail.id,
                seller_id: detail.seller_id,
                price: detail.price,
                available_quantity: detail.available_quantity,
                sold_quantity: detail.sold_quantity,
                listing_type: detail.listing_type_id,
                shipping_mode: shipping.mode,
                logistic_type: shipping.logistic_type,
                free_shipping: shipping.free_shipping,
            }
        })
        .collect()
}

/// Assumed sales-to-visit percentage for the visit-estimate fallback,
/// keyed by category family.
fn assumed_conversion_rate(category_id: &str) -> f64 {
    match category_id {
        c if c.starts_with("MLB1051") => 2.0,  // phones
        c if c.starts_with("MLB1648") => 1.8,  // computing
        c if c.starts_with("MLB1574") => 1.2,  // home
        c if c.starts_with("MLB1430") => 1.0,  // apparel
        _ => DEFAULT_ASSUMED_RATE,
    }
}

/// Estimated (daily, monthly) visit counts, best available tier first.
pub async fn visits(
    cx: &StrategyCx<'_>,
    item: &Item,
    competitors: &[CompetitorInfo],
) -> (u64, u64) {
    // (a) public cumulative total over the two-year window.
    match cx.api.total_visits(&item.id).await {
        Ok(Some(total)) if total > 0 => {
            let monthly = total / 24;
            info!(item_id = %item.id, tier = "total-window", monthly, "visit estimate");
            return (monthly / 30, monthly);
        }
        Ok(_) => {}
        Err(err) => debug!(?err, "total visits unavailable"),
    }

    // (b) detailed 30-day window, actor privilege required.
    if let Some(actor_token) = cx.actor_token {
        match cx.api.visits_window(actor_token, &item.id, 30).await {
            Ok(Some(monthly)) if monthly > 0 => {
                info!(item_id = %item.id, tier = "actor-window", monthly, "visit estimate");
                return (monthly / 30, monthly);
            }
            Ok(_) => {}
            Err(err) => debug!(?err, "actor visit window unavailable"),
        }
    }

    // (c) the winning competitor's cumulative total.
    if let Some(total) = competitors
        .iter()
        .find(|c| c.is_buy_box_winner)
        .and_then(|c| c.total_visits)
        .filter(|t| *t > 0)
    {
        let monthly = total / 24;
        info!(item_id = %item.id, tier = "competitor-total", monthly, "visit estimate");
        return (monthly / 30, monthly);
    }

    // (d) heuristic from sold quantity and an assumed conversion rate.
    let rate = assumed_conversion_rate(&item.category_id);
    let monthly_sales = item.sold_quantity as f64 / SOLD_WINDOW_MONTHS;
    let monthly = (monthly_sales / (rate / 100.0)).round() as u64;
    info!(item_id = %item.id, tier = "heuristic", monthly, "visit estimate");
    (monthly / 30, monthly)
}

/// The price shown to callers: the catalog winning offer when a competitor
/// set was found, the listing's own price otherwise.
pub fn effective_price(
    item: &Item,
    catalog: Option<&CatalogFetch>,
    competitors: &[CompetitorInfo],
) -> f64 {
    if !competitors.is_empty() {
        if let Some(winner_price) = catalog
            .and_then(|c| c.product.buy_box_winner.as_ref())
            .and_then(|w| w.price)
        {
            return winner_price;
        }
    }
    item.price
}
