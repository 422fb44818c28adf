use super::{EnrichmentFailure, Hook, HookContext, HookPayload};
use crate::cache::{cache_key, FileCacheStore};
use crate::config::HookDescriptor;
use crate::error::Result;
use crate::legiscan::{BillSource, CachedBillSource, LegiScanClient, LEGISCAN_API_BASE};
use crate::selectors::{append_enrichment, render_bill_text, LEGISCAN_HEADING};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable holding the LegiScan API key
pub const LEGISCAN_API_KEY_ENV: &str = "LEGISCAN_API_KEY";

/// Fetches the full LegiScan record for a bill and appends a readable summary.
///
/// The LegiScan id comes from the `bill_id` context extra, falling back to the
/// item identifier. Text payloads get the summary appended under
/// [`LEGISCAN_HEADING`]; record payloads get `legiscan_full_text` and
/// `legiscan_raw` fields.
pub struct BillTextHook {
    source: Option<Arc<dyn BillSource>>,
}

impl BillTextHook {
    pub fn new(source: Arc<dyn BillSource>) -> Self {
        Self {
            source: Some(source),
        }
    }

    /// A hook with no API access. Every call fails and the original data is kept.
    pub fn unconfigured() -> Self {
        Self { source: None }
    }

    /// Build from config params: `api_key` (else `LEGISCAN_API_KEY`),
    /// `base_url`, `timeout_secs` and `cache_dir` for raw bill responses.
    pub fn from_descriptor(descriptor: &HookDescriptor) -> Result<Self> {
        let api_key = descriptor
            .param_str("api_key")
            .map(str::to_string)
            .or_else(|| std::env::var(LEGISCAN_API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty());

        let Some(api_key) = api_key else {
            warn!(
                "{} not set; legiscan hook will leave items unenriched",
                LEGISCAN_API_KEY_ENV
            );
            return Ok(Self::unconfigured());
        };

        let base_url = descriptor.param_str("base_url").unwrap_or(LEGISCAN_API_BASE);
        let timeout = descriptor
            .params
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .unwrap_or(30);
        let client = LegiScanClient::with_options(api_key, base_url, Duration::from_secs(timeout))?;

        let source: Arc<dyn BillSource> = match descriptor.param_str("cache_dir") {
            Some(dir) => {
                info!("LegiScan bill cache: {}", dir);
                Arc::new(CachedBillSource::new(
                    client,
                    Arc::new(FileCacheStore::new(dir)?),
                ))
            }
            None => Arc::new(client),
        };

        Ok(Self::new(source))
    }

    fn bill_id(context: &HookContext) -> String {
        context
            .extra_str("bill_id")
            .filter(|id| !id.is_empty())
            .unwrap_or(&context.item_identifier)
            .to_string()
    }
}

#[async_trait]
impl Hook for BillTextHook {
    fn name(&self) -> &str {
        "legiscan"
    }

    fn cache_key(&self, _payload: &HookPayload, context: &HookContext) -> Option<String> {
        let bill_id = Self::bill_id(context);
        if bill_id.is_empty() {
            return None;
        }
        Some(cache_key(self.name(), &bill_id))
    }

    async fn process(
        &self,
        payload: &HookPayload,
        context: &HookContext,
    ) -> std::result::Result<HookPayload, EnrichmentFailure> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| EnrichmentFailure::new("LegiScan API key not configured"))?;

        let bill_id = Self::bill_id(context);
        if bill_id.is_empty() {
            return Err(EnrichmentFailure::new("no LegiScan bill id available"));
        }

        let bill = source.fetch_bill(&bill_id).await?;
        let rendered = render_bill_text(&bill);
        info!("Enriched {} with LegiScan bill {}", context.item_identifier, bill_id);

        Ok(match payload {
            HookPayload::Text(text) => {
                HookPayload::Text(append_enrichment(text, LEGISCAN_HEADING, &rendered))
            }
            HookPayload::Record(record) => {
                let mut record = record.clone();
                record.insert("legiscan_full_text".into(), Value::String(rendered));
                record.insert("legiscan_raw".into(), bill);
                HookPayload::Record(record)
            }
        })
    }
}
