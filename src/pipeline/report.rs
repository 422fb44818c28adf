use super::CandidateState;
use crate::hooks::HookRunStats;
use crate::types::CANONICAL_FIELDS;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Final record for a candidate that reached classification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AnalyzedBill {
    pub record: Map<String, Value>,
}

impl AnalyzedBill {
    /// Candidate record with analysis fields merged in. Canonical fields are
    /// never replaced by the analysis.
    pub fn new(mut record: Map<String, Value>, analysis: Map<String, Value>) -> Self {
        for (key, value) in analysis {
            if CANONICAL_FIELDS.contains(&key.as_str()) {
                continue;
            }
            record.insert(key, value);
        }
        Self { record }
    }

    pub fn identifier(&self) -> &str {
        self.record
            .get("bill_number")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn is_relevant(&self) -> bool {
        self.record
            .get("is_relevant")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Category names from the analysis `categories` list
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.record
            .get("categories")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
    }
}

/// A candidate that could not be classified
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErroredCandidate {
    pub identifier: String,
    pub title: String,
    /// Where the candidate was when it failed
    pub stage: CandidateState,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub total: usize,
    pub relevant: usize,
    pub not_relevant: usize,
    pub errored: usize,
}

/// Result of one analysis run. Every input candidate lands in exactly one bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub relevant: Vec<AnalyzedBill>,
    pub not_relevant: Vec<AnalyzedBill>,
    pub errored: Vec<ErroredCandidate>,
    pub hook_stats: HookRunStats,
    /// Counts of analysis categories across relevant bills
    pub category_counts: BTreeMap<String, usize>,
}

impl RunReport {
    pub fn new(total: usize) -> Self {
        Self {
            generated_at: Utc::now(),
            total,
            relevant: Vec::new(),
            not_relevant: Vec::new(),
            errored: Vec::new(),
            hook_stats: HookRunStats::default(),
            category_counts: BTreeMap::new(),
        }
    }

    pub fn counts(&self) -> RunCounts {
        RunCounts {
            total: self.total,
            relevant: self.relevant.len(),
            not_relevant: self.not_relevant.len(),
            errored: self.errored.len(),
        }
    }

    pub fn add_relevant(&mut self, bill: AnalyzedBill) {
        for category in bill.categories() {
            *self.category_counts.entry(category.to_string()).or_default() += 1;
        }
        self.relevant.push(bill);
    }

    /// JSON summary written alongside the buckets
    pub fn summary(&self) -> Value {
        let counts = self.counts();
        json!({
            "generated_at": self.generated_at.to_rfc3339(),
            "total": counts.total,
            "relevant_count": counts.relevant,
            "not_relevant_count": counts.not_relevant,
            "errored_count": counts.errored,
            "errored": self.errored,
            "hook_stats": self.hook_stats,
            "category_counts": self.category_counts,
        })
    }
}
