use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use meli_resolver::config::Limits;
use meli_resolver::meli::model::{CatalogFetch, Item, SearchItem, Seller, TokenGrant};
use meli_resolver::meli::MeliApi;
use meli_resolver::model::{ResolveError, Source};
use meli_resolver::resolver::resolve_product;
use meli_resolver::token::AppTokenCache;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// Scripted upstream: fixed payloads per endpoint plus a record of every
/// lookup, so tests can assert both results and traffic.
#[derive(Default)]
struct ScriptedMeli {
    items: HashMap<String, Value>,
    catalogs: HashMap<String, Value>,
    catalogs_bare: HashMap<String, Value>,
    catalog_items: HashMap<String, Vec<Value>>,
    review_items: HashMap<String, Vec<String>>,
    search_product_id: HashMap<String, Vec<Value>>,
    search_catalog_product_id: HashMap<String, Vec<Value>>,
    keyword_results: Vec<Value>,
    catalog_search: HashMap<String, Vec<String>>,
    descriptions: HashMap<String, String>,
    fail_descriptions: bool,
    sellers: HashMap<u64, Value>,
    total_visits: HashMap<String, u64>,
    visit_windows: HashMap<String, u64>,
    calls: Mutex<Vec<String>>,
    app_grants: AtomicUsize,
}

impl ScriptedMeli {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn parse_search(values: &[Value]) -> Vec<SearchItem> {
        values
            .iter()
            .map(|v| serde_json::from_value(v.clone()).unwrap())
            .collect()
    }
}

#[async_trait]
impl MeliApi for ScriptedMeli {
    async fn client_credentials_grant(&self) -> Result<TokenGrant> {
        self.app_grants.fetch_add(1, Ordering::SeqCst);
        Ok(TokenGrant {
            access_token: "app-token".into(),
            refresh_token: None,
            expires_in: 21600,
        })
    }

    async fn refresh_grant(&self, _refresh_token: &str) -> Result<TokenGrant> {
        Ok(TokenGrant {
            access_token: "actor-token".into(),
            refresh_token: Some("refresh".into()),
            expires_in: 21600,
        })
    }

    async fn get_item(&self, _token: &str, item_id: &str) -> Result<Option<Item>> {
        self.record(format!("get_item:{}", item_id));
        Ok(self
            .items
            .get(item_id)
            .map(|v| serde_json::from_value(v.clone()).unwrap()))
    }

    async fn get_items(&self, _token: &str, ids: &[String]) -> Result<Vec<Item>> {
        self.record(format!("get_items:{}", ids.join(",")));
        Ok(ids
            .iter()
            .filter_map(|id| self.items.get(id))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
            .collect())
    }

    async fn get_description(&self, _token: &str, item_id: &str) -> Result<String> {
        if self.fail_descriptions {
            return Err(anyhow!("marketplace error 500 on items/{}/description", item_id));
        }
        Ok(self.descriptions.get(item_id).cloned().unwrap_or_default())
    }

    async fn get_catalog_product(
        &self,
        _token: &str,
        product_id: &str,
    ) -> Result<Option<CatalogFetch>> {
        self.record(format!("get_catalog_product:{}", product_id));
        Ok(self
            .catalogs
            .get(product_id)
            .map(|v| CatalogFetch::from_value(v.clone()).unwrap()))
    }

    async fn get_catalog_product_bare(
        &self,
        _token: &str,
        numeric_id: &str,
    ) -> Result<Option<CatalogFetch>> {
        self.record(format!("get_catalog_product_bare:{}", numeric_id));
        Ok(self
            .catalogs_bare
            .get(numeric_id)
            .map(|v| CatalogFetch::from_value(v.clone()).unwrap()))
    }

    async fn get_catalog_items(&self, _token: &str, product_id: &str) -> Result<Vec<SearchItem>> {
        Ok(self
            .catalog_items
            .get(product_id)
            .map(|v| Self::parse_search(v))
            .unwrap_or_default())
    }

    async fn search_catalog_products(
        &self,
        _token: &str,
        _site: &str,
        query: &str,
    ) -> Result<Vec<String>> {
        Ok(self.catalog_search.get(query).cloned().unwrap_or_default())
    }

    async fn review_item_ids(&self, _token: &str, product_id: &str) -> Result<Vec<String>> {
        Ok(self.review_items.get(product_id).cloned().unwrap_or_default())
    }

    async fn search_by_product_id(
        &self,
        _token: &str,
        _site: &str,
        product_id: &str,
    ) -> Result<Vec<SearchItem>> {
        Ok(self
            .search_product_id
            .get(product_id)
            .map(|v| Self::parse_search(v))
            .unwrap_or_default())
    }

    async fn search_by_catalog_product_id(
        &self,
        _token: &str,
        _site: &str,
        catalog_product_id: &str,
    ) -> Result<Vec<SearchItem>> {
        Ok(self
            .search_catalog_product_id
            .get(catalog_product_id)
            .map(|v| Self::parse_search(v))
            .unwrap_or_default())
    }

    async fn search_keyword(
        &self,
        _token: &str,
        _site: &str,
        _query: &str,
        _category: Option<&str>,
    ) -> Result<Vec<SearchItem>> {
        Ok(Self::parse_search(&self.keyword_results))
    }

    async fn public_search(&self, _site: &str, _query: &str) -> Result<Vec<SearchItem>> {
        Ok(Self::parse_search(&self.keyword_results))
    }

    async fn get_seller(&self, _token: &str, seller_id: u64) -> Result<Seller> {
        self.sellers
            .get(&seller_id)
            .map(|v| serde_json::from_value(v.clone()).unwrap())
            .ok_or_else(|| anyhow!("seller {} not found", seller_id))
    }

    async fn total_visits(&self, item_id: &str) -> Result<Option<u64>> {
        Ok(self.total_visits.get(item_id).copied())
    }

    async fn visits_window(
        &self,
        _actor_token: &str,
        item_id: &str,
        _days: u32,
    ) -> Result<Option<u64>> {
        Ok(self.visit_windows.get(item_id).copied())
    }

    async fn visits_totals(&self, _token: &str, ids: &[String]) -> Result<HashMap<String, u64>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.total_visits.get(id).map(|n| (id.clone(), *n)))
            .collect())
    }
}

fn item_json(id: &str, price: f64, sold: u64, catalog: Option<&str>) -> Value {
    json!({
        "id": id,
        "title": "Fone Bluetooth Pro Max",
        "price": price,
        "status": "active",
        "catalog_product_id": catalog,
        "seller_id": 42,
        "category_id": "MLB1051A",
        "sold_quantity": sold,
        "available_quantity": 5,
        "condition": "new",
        "permalink": format!("https://produto.example/{}", id),
        "thumbnail": "https://cdn.example/thumb.jpg",
        "pictures": [{"secure_url": "https://cdn.example/1.jpg"}],
        "listing_type_id": "gold_special",
        "shipping": {"mode": "me2", "logistic_type": "fulfillment", "free_shipping": true},
        "attributes": [{"id": "BRAND", "value_name": "Acme"}]
    })
}

async fn resolve(
    api: &ScriptedMeli,
    pool: &sqlx::SqlitePool,
    raw_id: &str,
) -> Result<meli_resolver::model::ResolvedProduct, ResolveError> {
    let cache = AppTokenCache::new();
    resolve_product(api, pool, &cache, "MLB", &Limits::default(), raw_id, None).await
}

#[tokio::test]
async fn direct_item_resolves_with_item_source() {
    let pool = setup_pool().await;
    let mut api = ScriptedMeli::default();
    api.items
        .insert("MLB1234567890".into(), item_json("MLB1234567890", 99.9, 0, None));

    let result = resolve(&api, &pool, "MLB1234567890").await.unwrap();
    assert_eq!(result.source, Source::Item);
    assert_eq!(result.resolved_item_id, "MLB1234567890");
    assert_eq!(result.original_id, "MLB1234567890");
    assert_eq!(result.price, 99.9);
    assert_eq!(result.brand.as_deref(), Some("Acme"));
    assert_eq!(result.pictures, vec!["https://cdn.example/1.jpg"]);
}

#[tokio::test]
async fn url_input_is_normalized_before_any_upstream_call() {
    let pool = setup_pool().await;
    let mut api = ScriptedMeli::default();
    api.items.insert("MLB9999".into(), item_json("MLB9999", 10.0, 0, None));

    let result = resolve(&api, &pool, "https://marketplace.example/p/MLB-9999")
        .await
        .unwrap();
    assert_eq!(result.resolved_item_id, "MLB9999");
    assert_eq!(result.original_id, "https://marketplace.example/p/MLB-9999");

    let calls = api.calls();
    assert_eq!(calls.first().map(String::as_str), Some("get_item:MLB9999"));
    assert!(calls.iter().all(|c| !c.contains("http")));
}

#[tokio::test]
async fn unresolvable_catalog_with_price_range_synthesizes_placeholder() {
    let pool = setup_pool().await;
    let mut api = ScriptedMeli::default();
    api.catalogs.insert(
        "MLB19955767".into(),
        json!({
            "id": "MLB19955767",
            "name": "Fone Bluetooth Pro Max",
            "status": "active",
            "category_id": "MLB1051A",
            "buy_box_winner_price_range": {"min_price": 100.0, "max_price": 200.0},
            "attributes": [{"id": "BRAND", "value_name": "Acme"}]
        }),
    );

    let result = resolve(&api, &pool, "MLB19955767").await.unwrap();
    assert_eq!(result.source, Source::Approximate);
    assert_eq!(result.price, 150.0);
    assert_eq!(result.sold_quantity, 0);
    assert_eq!(result.available_quantity, 0);
    assert_eq!(result.resolved_item_id, "MLB19955767");
    assert_eq!(result.brand.as_deref(), Some("Acme"));
    assert!(result.catalog_payload.is_some());
}

#[tokio::test]
async fn exhausted_cascade_fails_with_original_identifier() {
    let pool = setup_pool().await;
    let api = ScriptedMeli::default();

    let err = resolve(&api, &pool, "MLB404404").await.unwrap_err();
    match &err {
        ResolveError::NotFound { original, trail } => {
            assert_eq!(original, "MLB404404");
            assert!(trail.contains("direct-item"));
        }
        other => panic!("expected NotFound, got {:?}", other),
    }
    assert!(err.to_string().contains("MLB404404"));
}

#[tokio::test]
async fn description_failure_degrades_only_description() {
    let pool = setup_pool().await;
    let mut api = ScriptedMeli::default();
    api.items.insert("MLB77".into(), item_json("MLB77", 49.0, 3, None));
    api.fail_descriptions = true;

    let result = resolve(&api, &pool, "MLB77").await.unwrap();
    assert_eq!(result.description, "No description available");
    assert_eq!(result.title, "Fone Bluetooth Pro Max");
    assert_eq!(result.price, 49.0);
    assert_eq!(result.sold_quantity, 3);
}

#[tokio::test]
async fn resolution_is_idempotent_against_stable_upstream() {
    let pool = setup_pool().await;
    let mut api = ScriptedMeli::default();
    // Not a listing; a catalog entry whose winning offer is MLB889.
    api.catalogs.insert(
        "MLB888".into(),
        json!({
            "id": "MLB888",
            "name": "Fone Bluetooth Pro Max",
            "buy_box_winner": {"item_id": "MLB889", "price": 80.0}
        }),
    );
    api.items.insert("MLB889".into(), item_json("MLB889", 80.0, 1, None));

    let first = resolve(&api, &pool, "MLB888").await.unwrap();
    let second = resolve(&api, &pool, "MLB888").await.unwrap();
    assert_eq!(first.resolved_item_id, second.resolved_item_id);
    assert_eq!(first.source, second.source);
    assert_eq!(first.source, Source::Catalog);
    assert_eq!(first.catalog_product_id.as_deref(), Some("MLB888"));
}

#[tokio::test]
async fn exactly_one_competitor_is_buy_box_winner() {
    let pool = setup_pool().await;
    let mut api = ScriptedMeli::default();
    api.items
        .insert("MLB100".into(), item_json("MLB100", 50.0, 10, Some("MLB555")));
    api.items
        .insert("MLB200".into(), item_json("MLB200", 52.0, 4, Some("MLB555")));
    api.items
        .insert("MLB300".into(), item_json("MLB300", 55.0, 2, Some("MLB555")));
    api.catalog_items.insert(
        "MLB555".into(),
        vec![
            json!({"id": "MLB100"}),
            json!({"id": "MLB200"}),
            json!({"id": "MLB300"}),
        ],
    );
    api.sellers.insert(
        42,
        json!({"id": 42, "nickname": "LOJA", "seller_reputation": {"level_id": "5_green", "transactions": {"completed": 120}}}),
    );

    let result = resolve(&api, &pool, "MLB100").await.unwrap();
    assert_eq!(result.competitors.len(), 3);
    let winners: Vec<_> = result
        .competitors
        .iter()
        .filter(|c| c.is_buy_box_winner)
        .collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].item_id, result.resolved_item_id);
    assert_eq!(result.seller.reputation, "5_green");
    assert_eq!(result.seller.completed_sales, 120);
    assert_eq!(
        result.competitors[0].seller_reputation.as_deref(),
        Some("5_green")
    );
}

#[tokio::test]
async fn conversion_rate_from_two_year_visit_totals() {
    let pool = setup_pool().await;
    let mut api = ScriptedMeli::default();
    api.items.insert("MLB500".into(), item_json("MLB500", 20.0, 50, None));
    // 24_000 visits over two years averages to 1_000 per month.
    api.total_visits.insert("MLB500".into(), 24_000);

    let result = resolve(&api, &pool, "MLB500").await.unwrap();
    assert_eq!(result.monthly_visits, 1_000);
    assert_eq!(result.daily_visits, 33);
    assert_eq!(result.conversion_rate, 5.00);
}

#[tokio::test]
async fn zero_visits_yield_zero_conversion_rate() {
    let pool = setup_pool().await;
    let mut api = ScriptedMeli::default();
    // Nothing sold: the heuristic tier also lands on zero.
    api.items.insert("MLB600".into(), item_json("MLB600", 20.0, 0, None));

    let result = resolve(&api, &pool, "MLB600").await.unwrap();
    assert_eq!(result.monthly_visits, 0);
    assert_eq!(result.conversion_rate, 0.0);
}

#[tokio::test]
async fn inactive_listing_falls_through_to_global_search() {
    let pool = setup_pool().await;
    let mut api = ScriptedMeli::default();
    let mut paused = item_json("MLB700", 10.0, 0, None);
    paused["status"] = json!("paused");
    api.items.insert("MLB700".into(), paused);
    api.items.insert("MLB701".into(), item_json("MLB701", 12.0, 0, None));
    api.search_product_id
        .insert("MLB700".into(), vec![json!({"id": "MLB701"})]);

    let result = resolve(&api, &pool, "MLB700").await.unwrap();
    assert_eq!(result.resolved_item_id, "MLB701");
    assert_eq!(result.source, Source::Search);
}

#[tokio::test]
async fn bare_digits_are_prefixed_with_default_site() {
    let pool = setup_pool().await;
    let mut api = ScriptedMeli::default();
    api.items.insert("MLB123456".into(), item_json("MLB123456", 5.0, 0, None));

    let result = resolve(&api, &pool, "123456").await.unwrap();
    assert_eq!(result.resolved_item_id, "MLB123456");
    assert_eq!(result.original_id, "123456");
}

#[tokio::test]
async fn invalid_identifier_rejected_before_upstream() {
    let pool = setup_pool().await;
    let api = ScriptedMeli::default();

    let err = resolve(&api, &pool, "definitely not an id").await.unwrap_err();
    assert!(matches!(err, ResolveError::InvalidIdentifier(_)));
    assert!(api.calls().is_empty());
    assert_eq!(api.app_grants.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn numeric_retry_reaches_bare_catalog_endpoint() {
    let pool = setup_pool().await;
    let mut api = ScriptedMeli::default();
    // Known only to the catalog_products endpoint family, under the bare
    // numeric form.
    api.catalogs_bare.insert(
        "31337".into(),
        json!({
            "id": "MLB31337",
            "name": "Caixa de Som Portatil",
            "buy_box_winner": {"item_id": "MLB31338", "price": 60.0}
        }),
    );
    api.items.insert("MLB31338".into(), item_json("MLB31338", 60.0, 7, None));

    let result = resolve(&api, &pool, "MLB31337").await.unwrap();
    assert_eq!(result.resolved_item_id, "MLB31338");
    assert_eq!(result.source, Source::Catalog);
    assert!(api
        .calls()
        .iter()
        .any(|c| c == "get_catalog_product_bare:31337"));
}
