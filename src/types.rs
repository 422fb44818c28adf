use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Source-format-specific fields preserved on a candidate
pub type Provenance = Map<String, Value>;

/// Field names owned by [`CandidateItem`] itself. Provenance never overwrites these
/// when a candidate is flattened into an output record.
pub const CANONICAL_FIELDS: &[&str] = &["bill_number", "title", "description", "url"];

/// A normalized unit of work produced by the filter pass or supplied externally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    /// Bill number, stable and unique within a run
    pub identifier: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default)]
    pub provenance: Provenance,
}

impl CandidateItem {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            title: String::new(),
            description: String::new(),
            source_url: None,
            provenance: Provenance::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_provenance(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.provenance.insert(key.into(), value.into());
        self
    }

    /// The filter-pass reason, when the source format carried one
    pub fn reason(&self) -> Option<&str> {
        self.provenance.get("reason").and_then(Value::as_str)
    }

    /// LegiScan bill id, if the source format or a backfill provided one
    pub fn bill_id(&self) -> Option<String> {
        self.provenance.get("bill_id").and_then(value_as_string)
    }

    /// Flatten into an output record: canonical fields first, then provenance
    /// fields that do not collide with them.
    pub fn to_record(&self) -> Map<String, Value> {
        let mut record = Map::new();
        record.insert("bill_number".into(), Value::String(self.identifier.clone()));
        record.insert("title".into(), Value::String(self.title.clone()));
        record.insert("description".into(), Value::String(self.description.clone()));
        if let Some(url) = &self.source_url {
            record.insert("url".into(), Value::String(url.clone()));
        }
        for (key, value) in &self.provenance {
            if CANONICAL_FIELDS.contains(&key.as_str()) {
                continue;
            }
            record.entry(key.clone()).or_insert_with(|| value.clone());
        }
        record
    }
}

/// A bill as it appears in a raw source dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillRecord {
    #[serde(
        default,
        deserialize_with = "optional_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub bill_id: Option<String>,
    pub bill_number: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    /// Any other fields the source carried
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BillRecord {
    pub fn new(bill_number: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            bill_id: None,
            bill_number: bill_number.into(),
            title: title.into(),
            description: String::new(),
            url: String::new(),
            extra: Map::new(),
        }
    }
}

/// One relevance judgment returned by the filter classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterDecision {
    pub bill_identifier: String,
    #[serde(default)]
    pub relevant: bool,
    #[serde(default = "default_reason")]
    pub reason: String,
}

fn default_reason() -> String {
    "No reason provided".to_string()
}

/// Read a JSON scalar as a string; numbers are rendered without quotes
pub(crate) fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn optional_string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_string))
}
