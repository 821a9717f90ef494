//! The ordered strategy chain behind identifier resolution.
//!
//! Each strategy exposes the same narrow contract: given a normalized
//! identifier, either produce a `Resolution` or step aside. The driver in
//! `resolver::mod` walks the chain in order; adding or removing a tier is a
//! one-line change to `default_strategies`.
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::config::Limits;
use crate::meli::model::{CatalogFetch, Item};
use crate::meli::MeliApi;
use crate::model::Source;
use crate::normalize::split_canonical;

/// Everything a strategy may consult. Search endpoints prefer the actor
/// token when one is available; detail endpoints always use the
/// application token.
pub struct StrategyCx<'a> {
    pub api: &'a dyn MeliApi,
    pub app_token: &'a str,
    pub actor_token: Option<&'a str>,
    pub site: &'a str,
    pub limits: &'a Limits,
}

impl StrategyCx<'_> {
    pub(crate) fn search_token(&self) -> &str {
        self.actor_token.unwrap_or(self.app_token)
    }
}

/// Outcome of a successful cascade run.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// A confirmed, currently-active listing.
    Listing {
        item: Item,
        catalog: Option<CatalogFetch>,
        source: Source,
    },
    /// No listing could be confirmed, but the catalog entry carries enough
    /// pricing data for a placeholder.
    Approximate { catalog: CatalogFetch },
}

/// Breadcrumbs for the not-found diagnostic. Every attempted lookup leaves
/// a short note so operators can see which paths were tried.
#[derive(Debug, Default)]
pub struct Trail {
    steps: Vec<String>,
}

impl Trail {
    pub fn note(&mut self, strategy: &str, detail: impl AsRef<str>) {
        self.steps.push(format!("{}: {}", strategy, detail.as_ref()));
    }

    pub fn summary(&self) -> String {
        if self.steps.is_empty() {
            return "no lookups attempted".into();
        }
        self.steps.join("; ")
    }
}

#[async_trait]
pub trait ResolveStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means "no match here, try the next tier". Errors are
    /// recorded by the driver and do not abort the cascade.
    async fn attempt(
        &self,
        cx: &StrategyCx<'_>,
        id: &str,
        trail: &mut Trail,
    ) -> Result<Option<Resolution>>;
}

/// The cascade, in mandated order.
pub fn default_strategies() -> Vec<Box<dyn ResolveStrategy>> {
    vec![
        Box::new(DirectItem),
        Box::new(CatalogLookup),
        Box::new(NumericRetry),
        Box::new(UniversalCatalogSearch),
        Box::new(CatalogItemsSubresource),
        Box::new(GlobalSearch),
    ]
}

/// Fetch a listing detail and accept it only when it is currently active.
async fn fetch_active_item(
    cx: &StrategyCx<'_>,
    strategy: &str,
    item_id: &str,
    trail: &mut Trail,
) -> Result<Option<Item>> {
    match cx.api.get_item(cx.app_token, item_id).await? {
        Some(item) if item.is_active() => Ok(Some(item)),
        Some(item) => {
            trail.note(
                strategy,
                format!(
                    "{} is {}",
                    item_id,
                    item.status.as_deref().unwrap_or("statusless")
                ),
            );
            Ok(None)
        }
        None => {
            trail.note(strategy, format!("{} not found", item_id));
            Ok(None)
        }
    }
}

/// Candidate listing ids embedded in a catalog payload, in priority order.
fn candidate_item_ids(catalog: &CatalogFetch) -> Vec<String> {
    let product = &catalog.product;
    let mut ids: Vec<String> = Vec::new();
    if let Some(winner) = product.buy_box_winner.as_ref().and_then(|w| w.item_id.clone()) {
        ids.push(winner);
    }
    ids.extend(product.items.iter().cloned());
    ids.extend(
        product
            .variations
            .iter()
            .filter_map(|v| v.item_id.clone()),
    );
    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
    ids
}

/// First four significant words of a phrase, for keyword queries. Short
/// connective words carry no search signal and are skipped.
fn significant_words(phrase: &str, take: usize) -> String {
    phrase
        .split_whitespace()
        .filter(|w| w.chars().count() >= 3)
        .take(take)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Shared candidate-extraction and search-fallback logic for every strategy
/// that lands on a catalog entry (direct lookup, numeric retry, universal
/// search).
async fn resolve_from_catalog(
    cx: &StrategyCx<'_>,
    strategy: &str,
    catalog: CatalogFetch,
    trail: &mut Trail,
) -> Result<Option<Resolution>> {
    let product_id = catalog.product.id.clone();

    // Candidates embedded in the payload itself.
    for candidate in candidate_item_ids(&catalog) {
        if let Some(item) = fetch_active_item(cx, strategy, &candidate, trail).await? {
            return Ok(Some(Resolution::Listing {
                item,
                catalog: Some(catalog),
                source: Source::Catalog,
            }));
        }
    }

    // A parent grouping exposes children instead of listings; the first
    // child's winning offer stands in for the whole family.
    if let Some(child_id) = catalog.product.children_ids.first() {
        if let Some(child) = cx.api.get_catalog_product(cx.app_token, child_id).await? {
            if let Some(winner) = child
                .product
                .buy_box_winner
                .as_ref()
                .and_then(|w| w.item_id.clone())
            {
                if let Some(item) = fetch_active_item(cx, strategy, &winner, trail).await? {
                    return Ok(Some(Resolution::Listing {
                        item,
                        catalog: Some(catalog),
                        source: Source::Catalog,
                    }));
                }
            }
        } else {
            trail.note(strategy, format!("child {} not found", child_id));
        }
    }

    // Catalog-scoped listing search.
    let scoped = cx
        .api
        .search_by_catalog_product_id(cx.search_token(), cx.site, &product_id)
        .await?;
    if let Some(hit) = scoped.first() {
        if let Some(item) = fetch_active_item(cx, strategy, &hit.id, trail).await? {
            return Ok(Some(Resolution::Listing {
                item,
                catalog: Some(catalog),
                source: Source::Catalog,
            }));
        }
    } else {
        trail.note(strategy, "catalog-scoped search empty");
    }

    // Keyword search from brand + model attributes, wanting an exact
    // catalog-product match.
    let brand_model = format!(
        "{} {}",
        catalog.product.attr("BRAND").unwrap_or_default(),
        catalog.product.attr("MODEL").unwrap_or_default()
    );
    let keyword_query = significant_words(&brand_model, 4);
    if !keyword_query.is_empty() {
        let hits = cx
            .api
            .search_keyword(cx.search_token(), cx.site, &keyword_query, None)
            .await?;
        let exact = hits
            .iter()
            .find(|h| h.catalog_product_id.as_deref() == Some(product_id.as_str()));
        if let Some(hit) = exact {
            if let Some(item) = fetch_active_item(cx, strategy, &hit.id, trail).await? {
                return Ok(Some(Resolution::Listing {
                    item,
                    catalog: Some(catalog),
                    source: Source::Catalog,
                }));
            }
        }
    }

    // Broader title search; exact catalog match preferred, first hit
    // accepted as a best-effort substitute.
    if let Some(name) = catalog.product.name.clone().filter(|n| !n.trim().is_empty()) {
        let query = significant_words(&name, 4);
        let hits = match cx
            .api
            .search_keyword(cx.search_token(), cx.site, &query, None)
            .await
        {
            Ok(hits) => hits,
            Err(err) => {
                debug!(?err, "authenticated title search failed, going public");
                cx.api.public_search(cx.site, &query).await?
            }
        };
        let chosen = hits
            .iter()
            .find(|h| h.catalog_product_id.as_deref() == Some(product_id.as_str()))
            .map(|h| (h.id.clone(), Source::Catalog))
            .or_else(|| hits.first().map(|h| (h.id.clone(), Source::Search)));
        if let Some((hit_id, source)) = chosen {
            if let Some(item) = fetch_active_item(cx, strategy, &hit_id, trail).await? {
                return Ok(Some(Resolution::Listing {
                    item,
                    catalog: Some(catalog),
                    source,
                }));
            }
        } else {
            trail.note(strategy, "title search empty");
        }
    }

    // Nothing purchasable anywhere, but the catalog entry prices itself:
    // degrade to a placeholder instead of failing the whole request.
    if catalog.product.price_range_midpoint().is_some() {
        trail.note(strategy, format!("{} synthesized from price range", product_id));
        return Ok(Some(Resolution::Approximate { catalog }));
    }

    trail.note(strategy, format!("{} had no resolvable listing", product_id));
    Ok(None)
}

/// Tier 1: the identifier is a listing id.
struct DirectItem;

#[async_trait]
impl ResolveStrategy for DirectItem {
    fn name(&self) -> &'static str {
        "direct-item"
    }

    async fn attempt(
        &self,
        cx: &StrategyCx<'_>,
        id: &str,
        trail: &mut Trail,
    ) -> Result<Option<Resolution>> {
        Ok(fetch_active_item(cx, self.name(), id, trail)
            .await?
            .map(|item| Resolution::Listing {
                item,
                catalog: None,
                source: Source::Item,
            }))
    }
}

/// Tier 2: the identifier is a catalog product.
struct CatalogLookup;

#[async_trait]
impl ResolveStrategy for CatalogLookup {
    fn name(&self) -> &'static str {
        "catalog"
    }

    async fn attempt(
        &self,
        cx: &StrategyCx<'_>,
        id: &str,
        trail: &mut Trail,
    ) -> Result<Option<Resolution>> {
        match cx.api.get_catalog_product(cx.app_token, id).await? {
            Some(catalog) => resolve_from_catalog(cx, self.name(), catalog, trail).await,
            None => {
                trail.note(self.name(), format!("{} is not a catalog entry", id));
                Ok(None)
            }
        }
    }
}

/// Tier 3: some endpoint families only accept the bare numeric form.
struct NumericRetry;

#[async_trait]
impl ResolveStrategy for NumericRetry {
    fn name(&self) -> &'static str {
        "numeric-retry"
    }

    async fn attempt(
        &self,
        cx: &StrategyCx<'_>,
        id: &str,
        trail: &mut Trail,
    ) -> Result<Option<Resolution>> {
        let Some((_, digits)) = split_canonical(id) else {
            return Ok(None);
        };

        if let Some(catalog) = cx.api.get_catalog_product(cx.app_token, digits).await? {
            if let Some(resolution) =
                resolve_from_catalog(cx, self.name(), catalog, trail).await?
            {
                return Ok(Some(resolution));
            }
        }
        if let Some(catalog) = cx
            .api
            .get_catalog_product_bare(cx.app_token, digits)
            .await?
        {
            return resolve_from_catalog(cx, self.name(), catalog, trail).await;
        }
        trail.note(self.name(), format!("{} unknown in either family", digits));
        Ok(None)
    }
}

/// Tier 4: free-text search over catalog entries with the numeric id.
struct UniversalCatalogSearch;

#[async_trait]
impl ResolveStrategy for UniversalCatalogSearch {
    fn name(&self) -> &'static str {
        "catalog-search"
    }

    async fn attempt(
        &self,
        cx: &StrategyCx<'_>,
        id: &str,
        trail: &mut Trail,
    ) -> Result<Option<Resolution>> {
        let digits = split_canonical(id).map(|(_, d)| d).unwrap_or(id);
        let found = cx
            .api
            .search_catalog_products(cx.search_token(), cx.site, digits)
            .await?;
        let Some(product_id) = found.first() else {
            trail.note(self.name(), "no catalog entry matched");
            return Ok(None);
        };
        match cx.api.get_catalog_product(cx.app_token, product_id).await? {
            Some(catalog) => resolve_from_catalog(cx, self.name(), catalog, trail).await,
            None => {
                trail.note(self.name(), format!("{} vanished after search", product_id));
                Ok(None)
            }
        }
    }
}

/// Tier 5: the "listings under this catalog product" sub-resource.
struct CatalogItemsSubresource;

#[async_trait]
impl ResolveStrategy for CatalogItemsSubresource {
    fn name(&self) -> &'static str {
        "catalog-items"
    }

    async fn attempt(
        &self,
        cx: &StrategyCx<'_>,
        id: &str,
        trail: &mut Trail,
    ) -> Result<Option<Resolution>> {
        let listed = cx.api.get_catalog_items(cx.app_token, id).await?;
        let Some(first) = listed.first() else {
            trail.note(self.name(), "sub-resource empty");
            return Ok(None);
        };
        Ok(fetch_active_item(cx, self.name(), &first.id, trail)
            .await?
            .map(|item| Resolution::Listing {
                item,
                catalog: None,
                source: Source::Catalog,
            }))
    }
}

/// Tier 6: last resort, marketplace-wide search by product id.
struct GlobalSearch;

#[async_trait]
impl ResolveStrategy for GlobalSearch {
    fn name(&self) -> &'static str {
        "global-search"
    }

    async fn attempt(
        &self,
        cx: &StrategyCx<'_>,
        id: &str,
        trail: &mut Trail,
    ) -> Result<Option<Resolution>> {
        let hits = cx
            .api
            .search_by_product_id(cx.search_token(), cx.site, id)
            .await?;
        let Some(first) = hits.first() else {
            trail.note(self.name(), "no search hits");
            return Ok(None);
        };
        Ok(fetch_active_item(cx, self.name(), &first.id, trail)
            .await?
            .map(|item| Resolution::Listing {
                item,
                catalog: None,
                source: Source::Search,
            }))
    }
}
