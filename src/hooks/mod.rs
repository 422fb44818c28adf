//! Pluggable enrichment hooks executed at named pipeline stages.
//!
//! A [`Hook`] maps a payload to an enriched payload of the same kind. The
//! [`HookManager`] runs the hooks registered for a stage in order, memoizes
//! results by [`Hook::cache_key`], and turns every hook failure into "keep the
//! original payload and log a warning". Failures never reach the caller.

pub mod bill_text;
pub mod manager;
pub mod registry;

pub use bill_text::BillTextHook;
pub use manager::{HookManager, HookRun, HookRunStats};
pub use registry::{HookFactory, HookRegistry};

use crate::cache::cache_key;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Pipeline points at which hooks run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStage {
    PreFilter,
    PostFilter,
    PreAnalysis,
    PostAnalysis,
}

impl HookStage {
    pub const ALL: [HookStage; 4] = [
        HookStage::PreFilter,
        HookStage::PostFilter,
        HookStage::PreAnalysis,
        HookStage::PostAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookStage::PreFilter => "pre_filter",
            HookStage::PostFilter => "post_filter",
            HookStage::PreAnalysis => "pre_analysis",
            HookStage::PostAnalysis => "post_analysis",
        }
    }
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookStage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        HookStage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| Error::Config(format!("Unknown hook stage '{}'", s)))
    }
}

/// Which payload variant a hook works on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Text,
    Record,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::Text => f.write_str("text"),
            PayloadKind::Record => f.write_str("record"),
        }
    }
}

/// Data flowing through a hook chain
#[derive(Debug, Clone, PartialEq)]
pub enum HookPayload {
    Text(String),
    Record(Map<String, Value>),
}

impl HookPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            HookPayload::Text(_) => PayloadKind::Text,
            HookPayload::Record(_) => PayloadKind::Record,
        }
    }

    /// JSON form used for caching
    pub fn to_value(&self) -> Value {
        match self {
            HookPayload::Text(text) => Value::String(text.clone()),
            HookPayload::Record(record) => Value::Object(record.clone()),
        }
    }

    /// Inverse of [`to_value`](Self::to_value). Other JSON shapes are not payloads.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::String(text) => Some(HookPayload::Text(text)),
            Value::Object(record) => Some(HookPayload::Record(record)),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            HookPayload::Text(text) => Some(text),
            HookPayload::Record(_) => None,
        }
    }

    pub fn as_record(&self) -> Option<&Map<String, Value>> {
        match self {
            HookPayload::Record(record) => Some(record),
            HookPayload::Text(_) => None,
        }
    }

    /// Render for a prompt: text as-is, records as pretty JSON
    pub fn render(&self) -> String {
        match self {
            HookPayload::Text(text) => text.clone(),
            HookPayload::Record(record) => serde_json::to_string_pretty(record)
                .unwrap_or_else(|_| format!("{:?}", record)),
        }
    }
}

/// Context accompanying one hook invocation
#[derive(Debug, Clone, PartialEq)]
pub struct HookContext {
    pub item_identifier: String,
    pub stage: HookStage,
    pub extras: BTreeMap<String, Value>,
}

impl HookContext {
    pub fn new(item_identifier: impl Into<String>, stage: HookStage) -> Self {
        Self {
            item_identifier: item_identifier.into(),
            stage,
            extras: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extras.get(key).and_then(Value::as_str)
    }

    /// Copy of this context for another stage
    pub fn at_stage(&self, stage: HookStage) -> Self {
        Self {
            stage,
            ..self.clone()
        }
    }
}

/// Why a hook could not enrich its input. The manager substitutes the original
/// payload and never caches anything for the attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct EnrichmentFailure {
    pub message: String,
}

impl EnrichmentFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<Error> for EnrichmentFailure {
    fn from(err: Error) -> Self {
        EnrichmentFailure::new(err.to_string())
    }
}

/// A pluggable enrichment step
#[async_trait]
pub trait Hook: Send + Sync {
    /// Short name used in logs and default cache keys
    fn name(&self) -> &str;

    /// Payload kinds this hook can process. The manager rejects anything else
    /// before dispatch.
    fn accepts(&self) -> &[PayloadKind] {
        &[PayloadKind::Text, PayloadKind::Record]
    }

    /// Key under which this invocation's result is memoized. `None` means the
    /// result must never be cached. `Some("")` is an ordinary key.
    fn cache_key(&self, _payload: &HookPayload, context: &HookContext) -> Option<String> {
        if context.item_identifier.is_empty() {
            return None;
        }
        Some(cache_key(self.name(), &context.item_identifier))
    }

    async fn process(
        &self,
        payload: &HookPayload,
        context: &HookContext,
    ) -> std::result::Result<HookPayload, EnrichmentFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stage_names_round_trip() {
        for stage in HookStage::ALL {
            assert_eq!(stage.as_str().parse::<HookStage>().unwrap(), stage);
        }
        assert!("during_analysis".parse::<HookStage>().is_err());
    }

    #[test]
    fn test_payload_from_value_rejects_scalars() {
        assert_eq!(
            HookPayload::from_value(json!("text")),
            Some(HookPayload::Text("text".into()))
        );
        assert!(matches!(
            HookPayload::from_value(json!({"a": 1})),
            Some(HookPayload::Record(_))
        ));
        assert_eq!(HookPayload::from_value(json!(42)), None);
        assert_eq!(HookPayload::from_value(json!(null)), None);
    }
}
