use crate::types::CandidateItem;
use serde_json::Value;

/// Marker separating original content from appended enrichment
pub const LEGISCAN_HEADING: &str = "## Full Bill Details from LegiScan API:";

/// Text representation of a candidate handed to pre-analysis hooks
pub fn candidate_text(candidate: &CandidateItem) -> String {
    let mut text = format!(
        "**Bill Number**: {}\n**Title**: {}\n**URL**: {}",
        candidate.identifier,
        candidate.title,
        candidate.source_url.as_deref().unwrap_or("N/A")
    );
    if !candidate.description.is_empty() && candidate.description != candidate.title {
        text.push_str(&format!("\n**Description**: {}", candidate.description));
    }
    if let Some(reason) = candidate.reason() {
        text.push_str(&format!("\n**Initial Filter Reason**: {}", reason));
    }
    text
}

/// Append enrichment under a delimited heading rather than interleaving it
pub fn append_enrichment(original: &str, heading: &str, enrichment: &str) -> String {
    format!("{}\n\n{}\n\n{}", original, heading, enrichment)
}

/// Readable summary of a LegiScan bill record.
/// Extracts number, title, description, status, the latest text version,
/// the first three sponsors and the subjects.
pub fn render_bill_text(bill: &Value) -> String {
    let mut parts = Vec::new();

    let field = |key: &str| -> Option<String> {
        match bill.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    };

    if let Some(number) = field("bill_number") {
        parts.push(format!("Bill Number: {}", number));
    }
    if let Some(title) = field("title") {
        parts.push(format!("Title: {}", title));
    }
    if let Some(description) = field("description") {
        parts.push(format!("Description: {}", description));
    }
    if let Some(status) = field("status") {
        parts.push(format!("Status: {}", status));
    }
    if let Some(date) = field("status_date") {
        parts.push(format!("Status Date: {}", date));
    }

    // Most recent text version is last
    if let Some(latest) = bill
        .get("texts")
        .and_then(Value::as_array)
        .and_then(|texts| texts.last())
    {
        if let Some(doc_id) = latest.get("doc_id").filter(|id| !id.is_null()) {
            let version = latest
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("Unknown");
            parts.push(format!("\nBill Text (Version: {}):", version));
            parts.push(format!("[Full text document ID: {}]", plain(doc_id)));
        }
    }

    if let Some(sponsors) = bill.get("sponsors").and_then(Value::as_array) {
        let names: Vec<&str> = sponsors
            .iter()
            .take(3)
            .map(|s| s.get("name").and_then(Value::as_str).unwrap_or("Unknown"))
            .collect();
        if !names.is_empty() {
            parts.push(format!("Sponsors: {}", names.join(", ")));
        }
    }

    if let Some(subjects) = bill.get("subjects").and_then(Value::as_array) {
        let names: Vec<&str> = subjects
            .iter()
            .map(|s| s.get("subject_name").and_then(Value::as_str).unwrap_or(""))
            .collect();
        if !names.is_empty() {
            parts.push(format!("Subjects: {}", names.join(", ")));
        }
    }

    parts.join("\n")
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
