//! LegiScan `getBill` client and a cache-backed wrapper around it.

use crate::cache::{cache_key, CacheStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const LEGISCAN_API_BASE: &str = "https://api.legiscan.com/";

/// Something that can return the full record for a bill id
#[async_trait]
pub trait BillSource: Send + Sync {
    async fn fetch_bill(&self, bill_id: &str) -> Result<Value>;
}

/// HTTP client for the LegiScan API
#[derive(Debug, Clone)]
pub struct LegiScanClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl LegiScanClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_options(api_key, LEGISCAN_API_BASE, Duration::from_secs(30))
    }

    pub fn with_options(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl BillSource for LegiScanClient {
    async fn fetch_bill(&self, bill_id: &str) -> Result<Value> {
        info!("Fetching bill {} from LegiScan API", bill_id);
        let response: Value = self
            .client
            .get(&self.base_url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("op", "getBill"),
                ("id", bill_id),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_get_bill_response(response)
    }
}

/// Pull the `bill` object out of a `getBill` response
pub fn parse_get_bill_response(mut response: Value) -> Result<Value> {
    if response.get("status").and_then(Value::as_str) != Some("OK") {
        let message = response
            .pointer("/alert/message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error");
        return Err(Error::Api(format!("LegiScan API error: {}", message)));
    }

    match response.get_mut("bill").map(Value::take) {
        Some(bill) if bill.is_object() => Ok(bill),
        _ => Err(Error::Api("LegiScan response has no bill object".to_string())),
    }
}

/// Serves bills from a store, fetching and storing on a miss under `bill_{id}`
pub struct CachedBillSource<S> {
    inner: S,
    store: Arc<dyn CacheStore>,
}

impl<S: BillSource> CachedBillSource<S> {
    pub fn new(inner: S, store: Arc<dyn CacheStore>) -> Self {
        Self { inner, store }
    }
}

#[async_trait]
impl<S: BillSource> BillSource for CachedBillSource<S> {
    async fn fetch_bill(&self, bill_id: &str) -> Result<Value> {
        let key = cache_key("bill", bill_id);
        match self.store.get(&key) {
            Ok(Some(bill)) => {
                info!("Loaded bill {} from cache", bill_id);
                return Ok(bill);
            }
            Ok(None) => {}
            Err(e) => warn!("Error reading cached bill {}, fetching: {}", bill_id, e),
        }

        let bill = self.inner.fetch_bill(bill_id).await?;
        if let Err(e) = self.store.put(&key, &bill) {
            warn!("Could not save bill {} to cache: {}", bill_id, e);
        }
        Ok(bill)
    }
}
