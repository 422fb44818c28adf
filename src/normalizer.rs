//! Filter-result format detection and normalization.
//!
//! Two shapes are known:
//!
//! - AI-filtered: `{"summary": {...}, "relevant_bills": [{"bill_number", "title", "url", "reason"}]}`
//! - Similarity-filtered: `{"total_results": n, "results": [{"bill_id", "number", "title", "url",
//!   "similarity_score", "distance", ...}]}`
//!
//! Both map onto [`CandidateItem`]. Fields that have no canonical slot are kept
//! verbatim in the candidate's provenance. A document of neither shape is an
//! error, never an empty list.

use crate::error::{Error, Result};
use crate::types::{value_as_string, BillRecord, CandidateItem, Provenance};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Known filter-result document shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterFormat {
    /// `relevant_bills` array produced by the AI filter pass
    AiFiltered,
    /// `results` array produced by a vector similarity search
    Similarity,
}

impl FilterFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterFormat::AiFiltered => "ai_filtered",
            FilterFormat::Similarity => "similarity",
        }
    }

    fn items_key(&self) -> &'static str {
        match self {
            FilterFormat::AiFiltered => "relevant_bills",
            FilterFormat::Similarity => "results",
        }
    }

    /// Source field holding the bill number
    fn identifier_key(&self) -> &'static str {
        match self {
            FilterFormat::AiFiltered => "bill_number",
            FilterFormat::Similarity => "number",
        }
    }
}

/// Summary of a filter-result document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatInfo {
    pub format: FilterFormat,
    pub bill_count: usize,
    pub has_summary: bool,
    pub has_similarity_scores: bool,
    /// Field names of the first item
    pub fields: Vec<String>,
}

/// Parse raw text, reporting the byte offset of a syntax error
pub fn parse_document(input: &str) -> Result<Value> {
    serde_json::from_str(input).map_err(|e| Error::MalformedInput {
        offset: byte_offset(input, e.line(), e.column()),
        line: e.line(),
        column: e.column(),
        message: e.to_string(),
    })
}

/// serde_json reports 1-based line and column; convert to a byte offset
fn byte_offset(input: &str, line: usize, column: usize) -> usize {
    let line_start: usize = input
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    (line_start + column.saturating_sub(1)).min(input.len())
}

/// Work out which shape a document uses from its top-level keys
pub fn detect_format(document: &Value) -> Result<FilterFormat> {
    match document {
        // A bare list is treated as the items of an AI-filtered document
        Value::Array(_) => Ok(FilterFormat::AiFiltered),
        Value::Object(map) => {
            if map.get("relevant_bills").is_some_and(Value::is_array) {
                Ok(FilterFormat::AiFiltered)
            } else if map.get("results").is_some_and(Value::is_array) {
                Ok(FilterFormat::Similarity)
            } else {
                Err(Error::FormatDetection {
                    keys: map.keys().cloned().collect(),
                })
            }
        }
        _ => Err(Error::FormatDetection { keys: Vec::new() }),
    }
}

fn items<'a>(document: &'a Value, format: FilterFormat) -> &'a [Value] {
    let list = match document {
        Value::Array(items) => Some(items),
        Value::Object(map) => map.get(format.items_key()).and_then(Value::as_array),
        _ => None,
    };
    list.map(Vec::as_slice).unwrap_or(&[])
}

/// Describe a document without normalizing it
pub fn format_info(document: &Value) -> Result<FormatInfo> {
    let format = detect_format(document)?;
    let bills = items(document, format);

    let fields = bills
        .first()
        .and_then(Value::as_object)
        .map(|first| first.keys().cloned().collect())
        .unwrap_or_default();

    Ok(FormatInfo {
        format,
        bill_count: bills.len(),
        has_summary: document.get("summary").is_some(),
        has_similarity_scores: format == FilterFormat::Similarity,
        fields,
    })
}

/// Normalize a filter-result document into candidates, in input order.
///
/// When `source` is given, every candidate is looked up by identifier to backfill
/// empty descriptive fields and the LegiScan `bill_id`. A lookup miss is recorded
/// in provenance as `source_lookup: "miss"` and the candidate is still emitted.
pub fn normalize(document: &Value, source: Option<&SourceIndex>) -> Result<Vec<CandidateItem>> {
    let format = detect_format(document)?;
    let bills = items(document, format);
    info!(
        "Detected filter format: {} ({} bills)",
        format.as_str(),
        bills.len()
    );
    if format == FilterFormat::Similarity {
        if let Some(total) = document.get("total_results") {
            debug!("Similarity document reports total_results={}", total);
        }
    }

    let candidates = bills
        .iter()
        .enumerate()
        .map(|(position, bill)| {
            let mut candidate = normalize_item(bill, format, position);
            if let Some(index) = source {
                backfill(&mut candidate, index);
            }
            candidate
        })
        .collect();

    Ok(candidates)
}

/// Normalize several documents and keep the first candidate for each identifier
pub fn aggregate(documents: &[Value], source: Option<&SourceIndex>) -> Result<Vec<CandidateItem>> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for document in documents {
        for candidate in normalize(document, source)? {
            if candidate.identifier.is_empty() || seen.insert(candidate.identifier.clone()) {
                merged.push(candidate);
            } else {
                debug!("Skipping duplicate candidate {}", candidate.identifier);
            }
        }
    }
    Ok(merged)
}

fn normalize_item(bill: &Value, format: FilterFormat, position: usize) -> CandidateItem {
    let Some(fields) = bill.as_object() else {
        warn!("Filter result item {} is not an object", position);
        let mut candidate = CandidateItem::new("");
        candidate
            .provenance
            .insert("raw_item".into(), bill.clone());
        candidate.provenance.insert(
            "normalization_note".into(),
            Value::String(format!("item {} is not an object", position)),
        );
        return candidate;
    };

    let id_key = format.identifier_key();
    let identifier = fields.get(id_key).and_then(value_as_string);
    let mut candidate = CandidateItem::new(identifier.clone().unwrap_or_default());
    candidate.title = text_field(fields, "title");
    candidate.description = text_field(fields, "description");
    candidate.source_url = fields
        .get("url")
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(str::to_string);

    let mut provenance = Provenance::new();
    for (key, value) in fields {
        if key == id_key || matches!(key.as_str(), "title" | "description" | "url") {
            continue;
        }
        provenance.insert(key.clone(), value.clone());
    }

    if format == FilterFormat::Similarity && !provenance.contains_key("reason") {
        let score = fields
            .get("similarity_score")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let distance = fields.get("distance").and_then(Value::as_f64).unwrap_or(0.0);
        provenance.insert(
            "reason".into(),
            Value::String(format!(
                "Vector similarity match (score: {:.4}, distance: {:.4})",
                score, distance
            )),
        );
    }

    if identifier.is_none() {
        warn!("Filter result item {} has no '{}'", position, id_key);
        provenance.insert(
            "normalization_note".into(),
            Value::String(format!("missing '{}'", id_key)),
        );
    }

    candidate.provenance = provenance;
    candidate
}

fn text_field(fields: &Map<String, Value>, key: &str) -> String {
    fields
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn backfill(candidate: &mut CandidateItem, index: &SourceIndex) {
    let Some(bill) = index.get(&candidate.identifier) else {
        warn!(
            "Bill {} not found in source dataset; keeping partial data",
            candidate.identifier
        );
        candidate
            .provenance
            .insert("source_lookup".into(), Value::String("miss".into()));
        return;
    };

    let mut filled = Vec::new();
    if candidate.title.is_empty() && !bill.title.is_empty() {
        candidate.title = bill.title.clone();
        filled.push("title");
    }
    if candidate.description.is_empty() && !bill.description.is_empty() {
        candidate.description = bill.description.clone();
        filled.push("description");
    }
    if candidate.source_url.is_none() && !bill.url.is_empty() {
        candidate.source_url = Some(bill.url.clone());
        filled.push("url");
    }
    if !candidate.provenance.contains_key("bill_id") {
        if let Some(bill_id) = &bill.bill_id {
            candidate
                .provenance
                .insert("bill_id".into(), Value::String(bill_id.clone()));
        }
    }

    if !filled.is_empty() {
        debug!("Backfilled {:?} for {}", filled, candidate.identifier);
        candidate.provenance.insert(
            "backfilled_fields".into(),
            Value::Array(filled.into_iter().map(Value::from).collect()),
        );
    }
}

/// Raw source dataset indexed by bill number
#[derive(Debug, Clone, Default)]
pub struct SourceIndex {
    bills: HashMap<String, BillRecord>,
}

impl SourceIndex {
    /// Later records with the same bill number replace earlier ones
    pub fn from_records(records: impl IntoIterator<Item = BillRecord>) -> Self {
        let bills = records
            .into_iter()
            .map(|bill| (bill.bill_number.clone(), bill))
            .collect();
        Self { bills }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(Self::from_records(parse_bills(value)?))
    }

    pub fn get(&self, bill_number: &str) -> Option<&BillRecord> {
        self.bills.get(bill_number)
    }

    pub fn len(&self) -> usize {
        self.bills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bills.is_empty()
    }
}

/// Read bills from a raw dataset: either a plain array of bills or a LegiScan
/// search response whose `searchresult` holds bills under numbered keys.
pub fn parse_bills(value: &Value) -> Result<Vec<BillRecord>> {
    match value {
        Value::Array(items) => Ok(items
            .iter()
            .enumerate()
            .filter_map(|(position, item)| {
                match serde_json::from_value::<BillRecord>(item.clone()) {
                    Ok(bill) => Some(bill),
                    Err(e) => {
                        warn!("Skipping source item {}: {}", position, e);
                        None
                    }
                }
            })
            .collect()),
        Value::Object(map) if map.get("searchresult").is_some_and(Value::is_object) => {
            if map.get("status").and_then(Value::as_str) != Some("OK") {
                warn!("LegiScan search response status is not OK");
            }
            let mut bills = Vec::new();
            if let Some(results) = map.get("searchresult").and_then(Value::as_object) {
                for (key, entry) in results {
                    if key == "summary" || entry.get("bill_number").is_none() {
                        continue;
                    }
                    let mut bill: BillRecord = serde_json::from_value(entry.clone())?;
                    if bill.description.is_empty() {
                        bill.description = bill.title.clone();
                    }
                    bills.push(bill);
                }
            }
            Ok(bills)
        }
        Value::Object(map) => Err(Error::FormatDetection {
            keys: map.keys().cloned().collect(),
        }),
        _ => Err(Error::FormatDetection { keys: Vec::new() }),
    }
}
