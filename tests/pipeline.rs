use async_trait::async_trait;
use bill_triage::classify::{AnalysisClassifier, FilterClassifier};
use bill_triage::config::{AnalysisPassConfig, FilterPassConfig};
use bill_triage::hooks::{
    BillTextHook, EnrichmentFailure, Hook, HookContext, HookManager, HookPayload, HookStage,
};
use bill_triage::legiscan::BillSource;
use bill_triage::normalizer::{self, SourceIndex};
use bill_triage::pipeline::{AnalysisPass, CandidateState, FilterPass};
use bill_triage::types::{BillRecord, CandidateItem, FilterDecision};
use bill_triage::{Error, Result};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

/// Relevant unless the identifier starts with `NO`; `BAD` fails the call.
/// Records every payload it was shown.
#[derive(Default)]
struct RecordingClassifier {
    seen: Mutex<Vec<(String, String)>>,
}

impl RecordingClassifier {
    /// Content shown to the classifier for one identifier
    fn seen_for(&self, identifier: &str) -> String {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| id == identifier)
            .map(|(_, content)| content.clone())
            .unwrap_or_else(|| panic!("{} was never classified", identifier))
    }
}

#[async_trait]
impl AnalysisClassifier for RecordingClassifier {
    async fn analyze(&self, candidate: &CandidateItem, content: &HookPayload) -> Result<Value> {
        self.seen
            .lock()
            .unwrap()
            .push((candidate.identifier.clone(), content.render()));
        if candidate.identifier.starts_with("BAD") {
            return Err(Error::Classification("HTTP 500 from gateway".into()));
        }
        Ok(json!({
            "is_relevant": !candidate.identifier.starts_with("NO"),
            "categories": ["end_of_life"],
        }))
    }
}

fn analysis_pass(classifier: Arc<RecordingClassifier>, hooks: HookManager) -> AnalysisPass {
    AnalysisPass::new(
        AnalysisPassConfig {
            timeout_secs: 5,
            concurrency: 4,
        },
        classifier,
        Arc::new(hooks),
    )
}

#[tokio::test]
async fn test_analysis_overrules_filter_pass() {
    let document = json!({
        "relevant_bills": [
            {"bill_number": "NO100", "title": "Road funding", "reason": "Mentions hospitals"}
        ]
    });
    let candidates = normalizer::normalize(&document, None).unwrap();

    let classifier = Arc::new(RecordingClassifier::default());
    let report = analysis_pass(classifier, HookManager::without_cache())
        .run(candidates)
        .await;

    assert!(report.relevant.is_empty());
    assert_eq!(report.not_relevant.len(), 1);
    assert_eq!(report.not_relevant[0].identifier(), "NO100");
    assert_eq!(report.not_relevant[0].record["reason"], json!("Mentions hospitals"));
}

#[tokio::test]
async fn test_errored_candidates_are_counted() {
    let candidates: Vec<CandidateItem> = (0..10)
        .map(|i| {
            let id = match i {
                3 => "BAD3".to_string(),
                7 | 8 => format!("NO{}", i),
                _ => format!("SB{}", i),
            };
            CandidateItem::new(id)
        })
        .collect();

    let classifier = Arc::new(RecordingClassifier::default());
    let report = analysis_pass(classifier, HookManager::without_cache())
        .run(candidates)
        .await;

    let counts = report.counts();
    assert_eq!(counts.total, 10);
    assert_eq!(counts.relevant + counts.not_relevant + counts.errored, 10);
    assert_eq!(counts.errored, 1);
    assert_eq!(counts.not_relevant, 2);

    let errored = &report.errored[0];
    assert_eq!(errored.identifier, "BAD3");
    assert_eq!(errored.stage, CandidateState::Classifying);
    assert!(errored.message.contains("HTTP 500"));
    assert_eq!(report.category_counts["end_of_life"], 7);
}

#[tokio::test]
async fn test_backfilled_titles_reach_analysis() {
    let document = json!({
        "summary": {"total_analyzed": 2, "relevant_count": 2},
        "relevant_bills": [
            {"bill_number": "SB01071", "title": "", "url": "https://cga.ct.gov/SB01071", "reason": "Hospice"},
            {"bill_number": "SB02000", "title": "An Act Concerning Home Care", "url": "https://cga.ct.gov/SB02000", "reason": "Home care"}
        ]
    });
    let source = SourceIndex::from_value(&json!([
        {"bill_id": 1932259, "bill_number": "SB01071", "title": "An Act Concerning Palliative Care"}
    ]))
    .unwrap();

    let candidates = normalizer::normalize(&document, Some(&source)).unwrap();
    assert!(candidates.iter().all(|c| !c.title.is_empty()));

    let classifier = Arc::new(RecordingClassifier::default());
    let report = analysis_pass(classifier.clone(), HookManager::without_cache())
        .run(candidates)
        .await;

    assert_eq!(report.relevant.len(), 2);
    assert!(classifier
        .seen_for("SB01071")
        .contains("**Title**: An Act Concerning Palliative Care"));
    assert!(classifier
        .seen_for("SB02000")
        .contains("**Title**: An Act Concerning Home Care"));
}

/// Serves one canned bill, failing for anything else
struct CannedBills;

#[async_trait]
impl BillSource for CannedBills {
    async fn fetch_bill(&self, bill_id: &str) -> Result<Value> {
        if bill_id != "1932259" {
            return Err(Error::Api(format!("LegiScan API error: unknown bill {}", bill_id)));
        }
        Ok(json!({
            "bill_id": 1932259,
            "bill_number": "SB01071",
            "title": "An Act Concerning Palliative Care",
            "status": 1,
            "texts": [{"doc_id": 3123456, "type": "Introduced"}],
            "sponsors": [{"name": "Public Health Committee"}]
        }))
    }
}

#[tokio::test]
async fn test_enrichment_is_appended_and_failures_fall_back() {
    let document = json!({"results": [
        {"bill_id": "1932259", "number": "SB01071", "title": "Palliative care", "similarity_score": 0.52, "distance": 0.907},
        {"bill_id": "999", "number": "HB00001", "title": "Unrelated", "similarity_score": 0.31, "distance": 1.2}
    ]});
    let candidates = normalizer::normalize(&document, None).unwrap();

    let mut hooks = HookManager::without_cache();
    hooks.register(
        HookStage::PreAnalysis,
        Arc::new(BillTextHook::new(Arc::new(CannedBills))),
    );

    let classifier = Arc::new(RecordingClassifier::default());
    let pass = analysis_pass(classifier.clone(), hooks);
    let report = pass.run(candidates).await;

    assert_eq!(report.counts().errored, 0);
    assert_eq!(report.hook_stats.executed, 1);
    assert_eq!(report.hook_stats.failed, 1);

    insta::assert_snapshot!(classifier.seen_for("SB01071"), @r"
    **Bill Number**: SB01071
    **Title**: Palliative care
    **URL**: N/A
    **Initial Filter Reason**: Vector similarity match (score: 0.5200, distance: 0.9070)

    ## Full Bill Details from LegiScan API:

    Bill Number: SB01071
    Title: An Act Concerning Palliative Care
    Status: 1

    Bill Text (Version: Introduced):
    [Full text document ID: 3123456]
    Sponsors: Public Health Committee
    ");
    assert!(!classifier.seen_for("HB00001").contains("## Full Bill Details"));
}

/// Records the ids it was asked for and serves a minimal bill for each
#[derive(Default)]
struct IdRecorder {
    requested: Mutex<Vec<String>>,
}

#[async_trait]
impl BillSource for IdRecorder {
    async fn fetch_bill(&self, bill_id: &str) -> Result<Value> {
        self.requested.lock().unwrap().push(bill_id.to_string());
        Ok(json!({"bill_id": bill_id, "bill_number": "SB01071", "title": "Palliative care"}))
    }
}

struct AllRelevant;

#[async_trait]
impl FilterClassifier for AllRelevant {
    async fn classify_batch(&self, bills: &[BillRecord]) -> Result<Vec<FilterDecision>> {
        Ok(bills
            .iter()
            .map(|b| FilterDecision {
                bill_identifier: b.bill_number.clone(),
                relevant: true,
                reason: "Hospice".into(),
            })
            .collect())
    }
}

#[tokio::test]
async fn test_post_filter_enrichment_uses_dataset_bill_id() {
    let source = Arc::new(IdRecorder::default());
    let mut hooks = HookManager::without_cache();
    hooks.register(
        HookStage::PostFilter,
        Arc::new(BillTextHook::new(source.clone())),
    );

    let config = FilterPassConfig {
        batch_size: 10,
        timeout_secs: 5,
        batch_delay_ms: 0,
    };
    let pass = FilterPass::new(config, Arc::new(AllRelevant), Arc::new(hooks));
    let mut bill = BillRecord::new("SB01071", "Palliative care");
    bill.bill_id = Some("1932259".into());
    let outcome = pass.run(&[bill]).await;

    assert_eq!(*source.requested.lock().unwrap(), vec!["1932259".to_string()]);
    assert_eq!(outcome.relevant[0]["legiscan_raw"]["bill_id"], json!("1932259"));
}

/// Rewrites the analysis record after classification
struct Tagger;

#[async_trait]
impl Hook for Tagger {
    fn name(&self) -> &str {
        "tagger"
    }

    fn cache_key(&self, _payload: &HookPayload, _context: &HookContext) -> Option<String> {
        None
    }

    async fn process(
        &self,
        payload: &HookPayload,
        context: &HookContext,
    ) -> std::result::Result<HookPayload, EnrichmentFailure> {
        let mut record = payload
            .as_record()
            .cloned()
            .ok_or_else(|| EnrichmentFailure::new("expected a record"))?;
        record.insert("reviewed_stage".into(), json!(context.stage.as_str()));
        Ok(HookPayload::Record(record))
    }
}

#[tokio::test]
async fn test_post_analysis_hooks_see_the_reply() {
    let mut hooks = HookManager::without_cache();
    hooks.register(HookStage::PostAnalysis, Arc::new(Tagger));

    let classifier = Arc::new(RecordingClassifier::default());
    let report = analysis_pass(classifier, hooks)
        .run(vec![CandidateItem::new("SB1").with_title("Hospice")])
        .await;

    assert_eq!(report.relevant[0].record["reviewed_stage"], json!("post_analysis"));
}

#[test]
fn test_raw_dataset_bill_ids_are_strings() {
    let bills = normalizer::parse_bills(&json!([{"bill_id": 42, "bill_number": "HB1"}])).unwrap();
    assert_eq!(bills, vec![BillRecord {
        bill_id: Some("42".into()),
        ..BillRecord::new("HB1", "")
    }]);
}
