//! Identifier resolution pipeline: normalize, run the strategy cascade,
//! enrich, assemble.
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::config::Limits;
use crate::db::Pool;
use crate::meli::model::CatalogFetch;
use crate::meli::MeliApi;
use crate::model::{conversion_rate, ResolveError, ResolvedProduct, SellerSummary, Source};
use crate::normalize;
use crate::token::{actor_token, AppTokenCache};

pub mod enrich;
pub mod strategies;

use strategies::{default_strategies, Resolution, StrategyCx, Trail};

/// Walk the strategy chain in order until one yields a resolution. Strategy
/// errors are recorded in the trail and the cascade moves on; only
/// exhaustion is terminal.
async fn run_cascade(
    cx: &StrategyCx<'_>,
    normalized: &str,
    trail: &mut Trail,
) -> Option<Resolution> {
    for strategy in default_strategies() {
        match strategy.attempt(cx, normalized, trail).await {
            Ok(Some(resolution)) => {
                info!(strategy = strategy.name(), id = normalized, "cascade resolved");
                return Some(resolution);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(?err, strategy = strategy.name(), "strategy errored; continuing");
                trail.note(strategy.name(), format!("error: {:#}", err));
            }
        }
    }
    None
}

/// Resolve a raw caller-supplied identifier into a fully-enriched product.
///
/// `raw_id` may be a canonical listing/catalog id, a hyphenated variant, a
/// bare numeric string, or a marketplace URL. `student_id`, when present,
/// unlocks actor-privileged search and visit endpoints; its absence (or a
/// broken linked account) degrades accuracy but never fails the request.
#[instrument(skip_all)]
pub async fn resolve_product(
    api: &dyn MeliApi,
    pool: &Pool,
    app_tokens: &AppTokenCache,
    default_site: &str,
    limits: &Limits,
    raw_id: &str,
    student_id: Option<&str>,
) -> Result<ResolvedProduct, ResolveError> {
    let normalized = normalize::normalize(raw_id, default_site)
        .map_err(|_| ResolveError::InvalidIdentifier(raw_id.to_string()))?;

    let now = Utc::now();
    let app_token = app_tokens.bearer(api, now).await?;

    let actor = match student_id {
        Some(student_id) => match actor_token(pool, api, student_id, now).await {
            Ok(token) => token,
            Err(err) => {
                warn!(?err, student_id, "proceeding without actor privilege");
                None
            }
        },
        None => None,
    };

    let site = &normalized[..3];
    let cx = StrategyCx {
        api,
        app_token: &app_token,
        actor_token: actor.as_deref(),
        site,
        limits,
    };

    let mut trail = Trail::default();
    let resolution = run_cascade(&cx, &normalized, &mut trail).await;

    match resolution {
        Some(Resolution::Listing {
            item,
            catalog,
            source,
        }) => {
            let description = enrich::description(&cx, &item).await;
            let seller = enrich::seller_summary(&cx, &item).await;
            let competitors = enrich::competitors(&cx, &item).await;
            let (daily_visits, monthly_visits) = enrich::visits(&cx, &item, &competitors).await;
            let price = enrich::effective_price(&item, catalog.as_ref(), &competitors);

            let brand = item
                .attr("BRAND")
                .map(str::to_string)
                .or_else(|| {
                    catalog
                        .as_ref()
                        .and_then(|c| c.product.attr("BRAND"))
                        .map(str::to_string)
                });
            let catalog_product_id = item
                .catalog_product_id
                .clone()
                .or_else(|| catalog.as_ref().map(|c| c.product.id.clone()));

            Ok(ResolvedProduct {
                original_id: raw_id.to_string(),
                resolved_item_id: item.id.clone(),
                catalog_product_id,
                title: item.title.clone(),
                price,
                description,
                brand,
                category_id: item.category_id.clone(),
                sold_quantity: item.sold_quantity,
                available_quantity: item.available_quantity,
                condition: item.condition.clone(),
                permalink: item.permalink.clone(),
                thumbnail: item.thumbnail.clone(),
                pictures: item.picture_urls(),
                daily_visits,
                monthly_visits,
                conversion_rate: conversion_rate(item.sold_quantity, monthly_visits),
                seller,
                competitors,
                catalog_payload: catalog.map(|c| c.raw),
                source,
            })
        }
        Some(Resolution::Approximate { catalog }) => Ok(approximate_result(raw_id, catalog)),
        None => Err(ResolveError::NotFound {
            original: raw_id.to_string(),
            trail: trail.summary(),
        }),
    }
}

/// Placeholder assembled from catalog data alone when no listing could be
/// confirmed anywhere. Quantities are zero and the price is the midpoint of
/// the catalog's buy-box range; the provenance tag makes the imprecision
/// visible to callers.
fn approximate_result(raw_id: &str, catalog: CatalogFetch) -> ResolvedProduct {
    let product = &catalog.product;
    ResolvedProduct {
        original_id: raw_id.to_string(),
        resolved_item_id: product.id.clone(),
        catalog_product_id: Some(product.id.clone()),
        title: product.name.clone().unwrap_or_default(),
        price: product.price_range_midpoint().unwrap_or(0.0),
        description: enrich::NO_DESCRIPTION.to_string(),
        brand: product.attr("BRAND").map(str::to_string),
        category_id: product.category_id.clone().unwrap_or_default(),
        sold_quantity: 0,
        available_quantity: 0,
        condition: String::new(),
        permalink: String::new(),
        thumbnail: String::new(),
        pictures: Vec::new(),
        daily_visits: 0,
        monthly_visits: 0,
        conversion_rate: 0.0,
        seller: SellerSummary::default(),
        competitors: Vec::new(),
        catalog_payload: Some(catalog.raw),
        source: Source::Approximate,
    }
}
