use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::{header, Client, StatusCode, Url};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

use crate::config::Config;
use crate::meli::model::{CatalogFetch, Item, SearchItem, Seller, TokenGrant};

pub mod model;

/// The upstream filters plain API clients aggressively; a browser-like
/// header set keeps the public endpoints reachable.
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Surface of the marketplace HTTP API consumed by the resolver. Kept as a
/// trait so tests can script upstream behavior without a network.
#[async_trait]
pub trait MeliApi: Send + Sync {
    /// Application-level client-credentials grant.
    async fn client_credentials_grant(&self) -> Result<TokenGrant>;
    /// Actor-level refresh-token grant.
    async fn refresh_grant(&self, refresh_token: &str) -> Result<TokenGrant>;

    /// Listing detail. `Ok(None)` when the listing does not exist.
    async fn get_item(&self, token: &str, item_id: &str) -> Result<Option<Item>>;
    /// Batched listing details; missing ids are silently dropped.
    async fn get_items(&self, token: &str, ids: &[String]) -> Result<Vec<Item>>;
    /// Plain-text listing description.
    async fn get_description(&self, token: &str, item_id: &str) -> Result<String>;

    /// Catalog-product detail. `Ok(None)` when the id is not a catalog entry.
    async fn get_catalog_product(&self, token: &str, product_id: &str)
        -> Result<Option<CatalogFetch>>;
    /// Same lookup against the `catalog_products` endpoint family, which
    /// accepts bare numeric identifiers.
    async fn get_catalog_product_bare(
        &self,
        token: &str,
        numeric_id: &str,
    ) -> Result<Option<CatalogFetch>>;
    /// Listings published under a catalog product.
    async fn get_catalog_items(&self, token: &str, product_id: &str) -> Result<Vec<SearchItem>>;
    /// Free-text search over catalog entries; returns catalog product ids.
    async fn search_catalog_products(
        &self,
        token: &str,
        site: &str,
        query: &str,
    ) -> Result<Vec<String>>;
    /// Listing ids referenced by reviews of a catalog product.
    async fn review_item_ids(&self, token: &str, product_id: &str) -> Result<Vec<String>>;

    async fn search_by_product_id(
        &self,
        token: &str,
        site: &str,
        product_id: &str,
    ) -> Result<Vec<SearchItem>>;
    async fn search_by_catalog_product_id(
        &self,
        token: &str,
        site: &str,
        catalog_product_id: &str,
    ) -> Result<Vec<SearchItem>>;
    async fn search_keyword(
        &self,
        token: &str,
        site: &str,
        query: &str,
        category: Option<&str>,
    ) -> Result<Vec<SearchItem>>;
    /// Unauthenticated site search, reachable without any token.
    async fn public_search(&self, site: &str, query: &str) -> Result<Vec<SearchItem>>;

    async fn get_seller(&self, token: &str, seller_id: u64) -> Result<Seller>;

    /// Cumulative visits over the public two-year window.
    async fn total_visits(&self, item_id: &str) -> Result<Option<u64>>;
    /// Day-bucketed visit window; needs an actor token.
    async fn visits_window(&self, actor_token: &str, item_id: &str, days: u32)
        -> Result<Option<u64>>;
    /// Batched cumulative visit totals.
    async fn visits_totals(&self, token: &str, ids: &[String]) -> Result<HashMap<String, u64>>;
}

#[derive(Clone)]
pub struct MeliClient {
    http: Client,
    base_url: Url,
    client_id: String,
    client_secret: String,
}

impl fmt::Debug for MeliClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeliClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl MeliClient {
    pub fn from_config(cfg: &Config) -> Self {
        let base_url = Url::parse(&cfg.marketplace.api_base).expect("valid marketplace base URL");
        Self::with_base_url(
            cfg.marketplace.client_id.clone(),
            cfg.marketplace.client_secret.clone(),
            base_url,
            cfg.limits.http_timeout_secs,
        )
    }

    pub fn with_base_url(
        client_id: String,
        client_secret: String,
        base_url: Url,
        timeout_secs: u64,
    ) -> Self {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, "application/json".parse().unwrap());
        headers.insert(
            header::ACCEPT_LANGUAGE,
            "pt-BR,pt;q=0.9,en;q=0.8".parse().unwrap(),
        );
        let http = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            client_id,
            client_secret,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid marketplace endpoint path '{}'", path))
    }

    /// GET a JSON document. `Ok(None)` on 404 so lookup cascades can fall
    /// through; any other non-2xx becomes an error carrying status + body.
    async fn get_json(&self, path: &str, token: Option<&str>) -> Result<Option<Value>> {
        let url = self.endpoint(path)?;
        debug!(%url, "marketplace GET");
        let mut req = self.http.get(url);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await.context("failed to reach marketplace")?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("marketplace error {} on {}: {}", status, path, body));
        }
        Ok(Some(res.json::<Value>().await.context("invalid marketplace JSON")?))
    }

    /// Extract the `results` array common to search-shaped responses.
    fn results_array(payload: Value) -> Vec<Value> {
        match payload {
            Value::Object(mut map) => match map.remove("results") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            Value::Array(items) => items,
            _ => Vec::new(),
        }
    }

    fn parse_search_items(payload: Value) -> Vec<SearchItem> {
        Self::results_array(payload)
            .into_iter()
            .filter_map(|v| match serde_json::from_value::<SearchItem>(v) {
                Ok(item) => Some(item),
                Err(err) => {
                    warn!(?err, "skipping malformed search result");
                    None
                }
            })
            .collect()
    }

    async fn token_grant(&self, form: &[(&str, &str)]) -> Result<TokenGrant> {
        let url = self.endpoint("oauth/token")?;
        let res = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .context("failed to reach token endpoint")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("token grant rejected {}: {}", status, body));
        }
        res.json::<TokenGrant>()
            .await
            .context("invalid token grant response")
    }
}

#[async_trait]
impl MeliApi for MeliClient {
    async fn client_credentials_grant(&self) -> Result<TokenGrant> {
        self.token_grant(&[
            ("grant_type", "client_credentials"),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ])
        .await
    }

    async fn refresh_grant(&self, refresh_token: &str) -> Result<TokenGrant> {
        self.token_grant(&[
            ("grant_type", "refresh_token"),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn get_item(&self, token: &str, item_id: &str) -> Result<Option<Item>> {
        let payload = self
            .get_json(&format!("items/{}?include_attributes=all", item_id), Some(token))
            .await?;
        match payload {
            Some(v) => Ok(Some(
                serde_json::from_value(v).context("invalid listing detail payload")?,
            )),
            None => Ok(None),
        }
    }

    async fn get_items(&self, token: &str, ids: &[String]) -> Result<Vec<Item>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let payload = self
            .get_json(&format!("items?ids={}", ids.join(",")), Some(token))
            .await?
            .unwrap_or(Value::Array(Vec::new()));
        // Multi-get responses come as [{code, body}, ...]; only 200 entries
        // carry a listing.
        let mut items = Vec::new();
        if let Value::Array(entries) = payload {
            for entry in entries {
                let code = entry.get("code").and_then(Value::as_u64).unwrap_or(0);
                if code != 200 {
                    continue;
                }
                if let Some(body) = entry.get("body") {
                    match serde_json::from_value::<Item>(body.clone()) {
                        Ok(item) => items.push(item),
                        Err(err) => warn!(?err, "skipping malformed multi-get entry"),
                    }
                }
            }
        }
        Ok(items)
    }

    async fn get_description(&self, token: &str, item_id: &str) -> Result<String> {
        let payload = self
            .get_json(&format!("items/{}/description", item_id), Some(token))
            .await?
            .ok_or_else(|| anyhow!("no description for {}", item_id))?;
        Ok(payload
            .get("plain_text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn get_catalog_product(
        &self,
        token: &str,
        product_id: &str,
    ) -> Result<Option<CatalogFetch>> {
        let payload = self
            .get_json(&format!("products/{}", product_id), Some(token))
            .await?;
        match payload {
            Some(v) => Ok(Some(
                CatalogFetch::from_value(v).context("invalid catalog product payload")?,
            )),
            None => Ok(None),
        }
    }

    async fn get_catalog_product_bare(
        &self,
        token: &str,
        numeric_id: &str,
    ) -> Result<Option<CatalogFetch>> {
        let payload = self
            .get_json(&format!("catalog_products/{}", numeric_id), Some(token))
            .await?;
        match payload {
            Some(v) => Ok(Some(
                CatalogFetch::from_value(v).context("invalid catalog product payload")?,
            )),
            None => Ok(None),
        }
    }

    async fn get_catalog_items(&self, token: &str, product_id: &str) -> Result<Vec<SearchItem>> {
        let payload = self
            .get_json(&format!("products/{}/items", product_id), Some(token))
            .await?
            .unwrap_or(Value::Null);
        Ok(Self::parse_search_items(payload))
    }

    async fn search_catalog_products(
        &self,
        token: &str,
        site: &str,
        query: &str,
    ) -> Result<Vec<String>> {
        let payload = self
            .get_json(
                &format!(
                    "products/search?status=active&site_id={}&q={}",
                    site,
                    urlencode(query)
                ),
                Some(token),
            )
            .await?
            .unwrap_or(Value::Null);
        Ok(Self::results_array(payload)
            .into_iter()
            .filter_map(|v| v.get("id").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    async fn review_item_ids(&self, token: &str, product_id: &str) -> Result<Vec<String>> {
        let payload = self
            .get_json(&format!("products/{}/reviews", product_id), Some(token))
            .await?
            .unwrap_or(Value::Null);
        let reviews = match payload.get("reviews") {
            Some(Value::Array(reviews)) => reviews.clone(),
            _ => Vec::new(),
        };
        let mut ids: Vec<String> = reviews
            .into_iter()
            .filter_map(|r| r.get("item_id").and_then(Value::as_str).map(str::to_string))
            .collect();
        let mut seen = std::collections::HashSet::new();
        ids.retain(|id| seen.insert(id.clone()));
        Ok(ids)
    }

    async fn search_by_product_id(
        &self,
        token: &str,
        site: &str,
        product_id: &str,
    ) -> Result<Vec<SearchItem>> {
        let payload = self
            .get_json(
                &format!("sites/{}/search?product_id={}", site, urlencode(product_id)),
                Some(token),
            )
            .await?
            .unwrap_or(Value::Null);
        Ok(Self::parse_search_items(payload))
    }

    async fn search_by_catalog_product_id(
        &self,
        token: &str,
        site: &str,
        catalog_product_id: &str,
    ) -> Result<Vec<SearchItem>> {
        let payload = self
            .get_json(
                &format!(
                    "sites/{}/search?catalog_product_id={}",
                    site,
                    urlencode(catalog_product_id)
                ),
                Some(token),
            )
            .await?
            .unwrap_or(Value::Null);
        Ok(Self::parse_search_items(payload))
    }

    async fn search_keyword(
        &self,
        token: &str,
        site: &str,
        query: &str,
        category: Option<&str>,
    ) -> Result<Vec<SearchItem>> {
        let mut path = format!("sites/{}/search?q={}", site, urlencode(query));
        if let Some(category) = category {
            path.push_str(&format!("&category={}", urlencode(category)));
        }
        let payload = self.get_json(&path, Some(token)).await?.unwrap_or(Value::Null);
        Ok(Self::parse_search_items(payload))
    }

    async fn public_search(&self, site: &str, query: &str) -> Result<Vec<SearchItem>> {
        let payload = self
            .get_json(&format!("sites/{}/search?q={}", site, urlencode(query)), None)
            .await?
            .unwrap_or(Value::Null);
        Ok(Self::parse_search_items(payload))
    }

    async fn get_seller(&self, token: &str, seller_id: u64) -> Result<Seller> {
        let payload = self
            .get_json(&format!("users/{}", seller_id), Some(token))
            .await?
            .ok_or_else(|| anyhow!("seller {} not found", seller_id))?;
        serde_json::from_value(payload).context("invalid seller payload")
    }

    async fn total_visits(&self, item_id: &str) -> Result<Option<u64>> {
        let to = Utc::now();
        let from = to - Duration::days(730);
        let payload = self
            .get_json(
                &format!(
                    "items/visits?ids={}&date_from={}&date_to={}",
                    item_id,
                    from.format("%Y-%m-%dT00:00:00Z"),
                    to.format("%Y-%m-%dT00:00:00Z")
                ),
                None,
            )
            .await?;
        Ok(payload.and_then(|v| match &v {
            Value::Array(entries) => entries
                .first()
                .and_then(|e| e.get("total_visits"))
                .and_then(Value::as_u64),
            Value::Object(map) => map.get(item_id).and_then(Value::as_u64),
            _ => None,
        }))
    }

    async fn visits_window(
        &self,
        actor_token: &str,
        item_id: &str,
        days: u32,
    ) -> Result<Option<u64>> {
        let payload = self
            .get_json(
                &format!("items/{}/visits/time_window?last={}&unit=day", item_id, days),
                Some(actor_token),
            )
            .await?;
        Ok(payload.map(|v| {
            Self::results_array(v)
                .iter()
                .filter_map(|bucket| bucket.get("total").and_then(Value::as_u64))
                .sum()
        }))
    }

    async fn visits_totals(&self, token: &str, ids: &[String]) -> Result<HashMap<String, u64>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let payload = self
            .get_json(&format!("visits/items?ids={}", ids.join(",")), Some(token))
            .await?
            .unwrap_or(Value::Null);
        let mut totals = HashMap::new();
        if let Value::Object(map) = payload {
            for (id, count) in map {
                if let Some(count) = count.as_u64() {
                    totals.insert(id, count);
                }
            }
        }
        Ok(totals)
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push_str("%20"),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
