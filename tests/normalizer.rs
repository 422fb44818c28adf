use bill_triage::normalizer::{self, FilterFormat, SourceIndex};
use bill_triage::types::BillRecord;
use bill_triage::Error;
use serde_json::json;

#[test]
fn test_ai_filtered_document_yields_one_candidate_per_bill() {
    let document = json!({
        "summary": {"total_analyzed": 120, "relevant_count": 3},
        "relevant_bills": [
            {"bill_number": "SB01071", "title": "Palliative care", "url": "https://cga.ct.gov/SB01071", "reason": "Hospice"},
            {"bill_number": "HB05002", "title": "Medical aid in dying", "url": "", "reason": "End of life"},
            {"bill_number": "HB06100", "title": "Advance directives", "reason": "Planning"}
        ]
    });

    let candidates = normalizer::normalize(&document, None).unwrap();
    assert_eq!(candidates.len(), 3);
    let identifiers: Vec<&str> = candidates.iter().map(|c| c.identifier.as_str()).collect();
    assert_eq!(identifiers, vec!["SB01071", "HB05002", "HB06100"]);

    for candidate in &candidates {
        assert!(candidate.provenance.contains_key("reason"));
    }
    assert_eq!(candidates[0].source_url.as_deref(), Some("https://cga.ct.gov/SB01071"));
    assert_eq!(candidates[1].source_url, None);
}

#[test]
fn test_similarity_document_maps_number_and_keeps_metrics() {
    let document = json!({
        "total_results": 1,
        "results": [{
            "bill_id": "1932259",
            "number": "SB01071",
            "title": "An Act Concerning Palliative Care",
            "url": "https://legiscan.com/CT/bill/SB01071/2025",
            "similarity_score": 0.52,
            "distance": 0.907,
            "status_date": "2025-03-04",
            "last_action": "Referred to Joint Committee on Public Health",
            "year": "2025",
            "session": "2025 General Assembly"
        }]
    });

    assert_eq!(normalizer::detect_format(&document).unwrap(), FilterFormat::Similarity);
    let candidates = normalizer::normalize(&document, None).unwrap();
    let candidate = &candidates[0];

    assert_eq!(candidate.identifier, "SB01071");
    assert_eq!(candidate.provenance["similarity_score"], json!(0.52));
    assert_eq!(candidate.provenance["distance"], json!(0.907));
    assert_eq!(candidate.provenance["session"], json!("2025 General Assembly"));
    assert_eq!(candidate.bill_id().as_deref(), Some("1932259"));
    assert!(!candidate.provenance.contains_key("number"));

    let record = candidate.to_record();
    assert_eq!(record["bill_number"], json!("SB01071"));
    assert_eq!(record["year"], json!("2025"));
}

#[test]
fn test_unknown_format_fails_loud() {
    let result = normalizer::normalize(&json!({"foo": []}), None);
    match result {
        Err(Error::FormatDetection { keys }) => assert_eq!(keys, vec!["foo".to_string()]),
        other => panic!("expected a format detection error, got {:?}", other),
    }
}

#[test]
fn test_known_key_that_is_not_an_array_is_unknown() {
    let err = normalizer::normalize(&json!({"relevant_bills": "none"}), None).unwrap_err();
    assert!(err.is_input_contract_violation());
}

#[test]
fn test_backfill_fills_only_missing_fields() {
    let document = json!({
        "relevant_bills": [
            {"bill_number": "SB01071", "title": "", "reason": "Hospice"},
            {"bill_number": "SB02000", "title": "Kept title", "reason": "Palliative"}
        ]
    });
    let mut source_bill = BillRecord::new("SB01071", "An Act Concerning Palliative Care");
    source_bill.url = "https://legiscan.com/CT/bill/SB01071/2025".into();
    source_bill.bill_id = Some("1932259".into());
    let mut other = BillRecord::new("SB02000", "Source title");
    other.description = "Source description".into();
    let index = SourceIndex::from_records([source_bill, other]);

    let candidates = normalizer::normalize(&document, Some(&index)).unwrap();

    assert_eq!(candidates[0].title, "An Act Concerning Palliative Care");
    assert_eq!(candidates[0].bill_id().as_deref(), Some("1932259"));
    assert_eq!(
        candidates[0].provenance["backfilled_fields"],
        json!(["title", "url"])
    );
    assert_eq!(candidates[1].title, "Kept title");
    assert_eq!(candidates[1].description, "Source description");
}

#[test]
fn test_aggregate_across_formats() {
    let ai = json!({"relevant_bills": [{"bill_number": "SB01071", "reason": "Hospice"}]});
    let similarity = json!({"results": [
        {"number": "SB01071", "similarity_score": 0.5, "distance": 1.0},
        {"number": "HB00042", "similarity_score": 0.4, "distance": 1.2}
    ]});

    let merged = normalizer::aggregate(&[ai, similarity], None).unwrap();
    let identifiers: Vec<&str> = merged.iter().map(|c| c.identifier.as_str()).collect();
    assert_eq!(identifiers, vec!["SB01071", "HB00042"]);
    assert_eq!(merged[0].reason(), Some("Hospice"));
}
