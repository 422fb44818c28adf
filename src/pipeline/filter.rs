use crate::classify::FilterClassifier;
use crate::config::FilterPassConfig;
use crate::error::{Error, Result};
use crate::hooks::{HookContext, HookManager, HookPayload, HookStage};
use crate::types::{BillRecord, FilterDecision};
use async_stream::stream;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A batch whose classification call failed or timed out
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedBatch {
    /// Zero-based batch number
    pub index: usize,
    pub bill_numbers: Vec<String>,
    pub reason: String,
}

/// Everything the filter pass produced for one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOutcome {
    pub total_analyzed: usize,
    pub relevant: Vec<Map<String, Value>>,
    pub not_relevant: Vec<Map<String, Value>>,
    pub failed_batches: Vec<FailedBatch>,
    /// Bills in successful batches that received no decision
    pub unclassified: Vec<String>,
    /// Label of the input dataset, copied into the summary
    pub source: String,
}

impl FilterOutcome {
    /// Filter-result artifact in the AI-filtered (`relevant_bills`) format
    pub fn to_document(&self) -> Value {
        let mut document = json!({
            "summary": {
                "total_analyzed": self.total_analyzed,
                "relevant_count": self.relevant.len(),
                "not_relevant_count": self.not_relevant.len(),
                "failed_batches": self.failed_batches.len(),
                "source": self.source,
            },
            "relevant_bills": self.relevant,
            "not_relevant_bills": self.not_relevant,
        });
        if !self.failed_batches.is_empty() {
            document["failed_batches"] = json!(self.failed_batches);
        }
        if !self.unclassified.is_empty() {
            document["unclassified"] = json!(self.unclassified);
        }
        document
    }
}

struct BatchResult<'a> {
    index: usize,
    bills: &'a [BillRecord],
    result: Result<Vec<FilterDecision>>,
}

/// Batch relevance screening over raw bills
pub struct FilterPass {
    config: FilterPassConfig,
    classifier: Arc<dyn FilterClassifier>,
    hooks: Arc<HookManager>,
    source: String,
}

impl FilterPass {
    pub fn new(
        config: FilterPassConfig,
        classifier: Arc<dyn FilterClassifier>,
        hooks: Arc<HookManager>,
    ) -> Self {
        Self {
            config,
            classifier,
            hooks,
            source: String::new(),
        }
    }

    /// Label recorded as `summary.source`
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub async fn run(&self, bills: &[BillRecord]) -> FilterOutcome {
        let bills = self.pre_filter(bills).await;
        let by_number: HashMap<&str, &BillRecord> = bills
            .iter()
            .map(|bill| (bill.bill_number.as_str(), bill))
            .collect();

        let mut outcome = FilterOutcome {
            total_analyzed: bills.len(),
            source: self.source.clone(),
            ..Default::default()
        };

        let batch_count = bills.len().div_ceil(self.batch_size());
        info!(
            "Filtering {} bills in {} batches of up to {}",
            bills.len(),
            batch_count,
            self.batch_size()
        );

        let mut batches = Box::pin(self.classify_batches(&bills));
        while let Some(batch) = batches.next().await {
            let decisions = match batch.result {
                Ok(decisions) => decisions,
                Err(e) => {
                    warn!("Batch {}/{} failed: {}", batch.index + 1, batch_count, e);
                    outcome.failed_batches.push(FailedBatch {
                        index: batch.index,
                        bill_numbers: batch.bills.iter().map(|b| b.bill_number.clone()).collect(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let decided: HashSet<&str> = decisions
                .iter()
                .map(|d| d.bill_identifier.as_str())
                .collect();
            for bill in batch.bills {
                if !decided.contains(bill.bill_number.as_str()) {
                    warn!("No decision returned for {}", bill.bill_number);
                    outcome.unclassified.push(bill.bill_number.clone());
                }
            }

            let mut joined: HashSet<String> = HashSet::new();
            for decision in decisions {
                if !joined.insert(decision.bill_identifier.clone()) {
                    warn!(
                        "Ignoring repeated decision for {} in batch {}",
                        decision.bill_identifier,
                        batch.index + 1
                    );
                    continue;
                }
                let bill = by_number.get(decision.bill_identifier.as_str()).copied();
                let record = verdict_record(&decision, bill);
                let record = self.post_filter(&decision.bill_identifier, bill, record).await;
                if decision.relevant {
                    outcome.relevant.push(record);
                } else {
                    outcome.not_relevant.push(record);
                }
            }
        }

        info!(
            "Filter pass complete: {} relevant, {} not relevant, {} failed batches",
            outcome.relevant.len(),
            outcome.not_relevant.len(),
            outcome.failed_batches.len()
        );
        outcome
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }

    /// Classify consecutive chunks, pausing between calls
    fn classify_batches<'a>(
        &'a self,
        bills: &'a [BillRecord],
    ) -> impl Stream<Item = BatchResult<'a>> + 'a {
        stream! {
            for (index, chunk) in bills.chunks(self.batch_size()).enumerate() {
                if index > 0 && self.config.batch_delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(self.config.batch_delay_ms)).await;
                }

                info!("Classifying batch {} ({} bills)", index + 1, chunk.len());
                let timeout = self.config.timeout();
                let result = match tokio::time::timeout(timeout, self.classifier.classify_batch(chunk)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Classification(format!(
                        "batch timed out after {}s",
                        timeout.as_secs()
                    ))),
                };

                yield BatchResult { index, bills: chunk, result };
            }
        }
    }

    async fn pre_filter(&self, bills: &[BillRecord]) -> Vec<BillRecord> {
        let mut prepared = Vec::with_capacity(bills.len());
        for bill in bills {
            let Ok(Value::Object(record)) = serde_json::to_value(bill) else {
                prepared.push(bill.clone());
                continue;
            };
            let mut context = HookContext::new(bill.bill_number.clone(), HookStage::PreFilter);
            if let Some(bill_id) = &bill.bill_id {
                context = context.with_extra("bill_id", bill_id.clone());
            }

            let enriched = self
                .hooks
                .run(HookStage::PreFilter, HookPayload::Record(record), &context)
                .await;
            let bill = match enriched {
                HookPayload::Record(record) => serde_json::from_value(Value::Object(record))
                    .unwrap_or_else(|e| {
                        warn!("pre_filter output for {} is not a bill: {}", bill.bill_number, e);
                        bill.clone()
                    }),
                HookPayload::Text(_) => bill.clone(),
            };
            prepared.push(bill);
        }
        prepared
    }

    async fn post_filter(
        &self,
        identifier: &str,
        bill: Option<&BillRecord>,
        record: Map<String, Value>,
    ) -> Map<String, Value> {
        let mut context = HookContext::new(identifier, HookStage::PostFilter);
        if let Some(bill_id) = bill.and_then(|b| b.bill_id.as_ref()) {
            context = context.with_extra("bill_id", bill_id.clone());
        }
        match self
            .hooks
            .run(HookStage::PostFilter, HookPayload::Record(record.clone()), &context)
            .await
        {
            HookPayload::Record(enriched) => enriched,
            HookPayload::Text(_) => record,
        }
    }
}

/// Join a decision back to its bill. Unknown identifiers keep placeholder fields.
fn verdict_record(decision: &FilterDecision, bill: Option<&BillRecord>) -> Map<String, Value> {
    let mut record = Map::new();
    record.insert("bill_number".into(), json!(decision.bill_identifier));
    match bill {
        Some(bill) => {
            if let Some(bill_id) = &bill.bill_id {
                record.insert("bill_id".into(), json!(bill_id));
            }
            record.insert("title".into(), json!(bill.title));
            record.insert("description".into(), json!(bill.description));
            record.insert("url".into(), json!(bill.url));
        }
        None => {
            warn!("Classifier returned unknown bill {}", decision.bill_identifier);
            record.insert("title".into(), json!("Unknown"));
            record.insert("url".into(), json!("N/A"));
        }
    }
    record.insert("relevant".into(), json!(decision.relevant));
    record.insert("reason".into(), json!(decision.reason));
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Marks bills whose number ends in an odd digit relevant; fails the batch
    /// containing `FAIL`.
    struct ParityClassifier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FilterClassifier for ParityClassifier {
        async fn classify_batch(&self, bills: &[BillRecord]) -> Result<Vec<FilterDecision>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if bills.iter().any(|b| b.bill_number == "FAIL") {
                return Err(Error::Classification("gateway returned 502".into()));
            }
            Ok(bills
                .iter()
                .map(|b| FilterDecision {
                    bill_identifier: b.bill_number.clone(),
                    relevant: b.bill_number.ends_with(['1', '3', '5', '7', '9']),
                    reason: "parity".into(),
                })
                .collect())
        }
    }

    fn pass(batch_size: usize) -> (FilterPass, Arc<ParityClassifier>) {
        let classifier = Arc::new(ParityClassifier {
            calls: AtomicUsize::new(0),
        });
        let config = FilterPassConfig {
            batch_size,
            timeout_secs: 5,
            batch_delay_ms: 0,
        };
        let pass = FilterPass::new(config, classifier.clone(), Arc::new(HookManager::without_cache()))
            .with_source("test.json");
        (pass, classifier)
    }

    #[tokio::test]
    async fn test_failed_batch_is_recorded_and_run_continues() {
        let bills = vec![
            BillRecord::new("HB1", "One"),
            BillRecord::new("FAIL", "Bad"),
            BillRecord::new("HB3", "Three"),
            BillRecord::new("HB4", "Four"),
        ];
        let (pass, classifier) = pass(2);
        let outcome = pass.run(&bills).await;

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.failed_batches.len(), 1);
        assert_eq!(outcome.failed_batches[0].bill_numbers, vec!["HB1", "FAIL"]);
        assert_eq!(outcome.relevant.len(), 1);
        assert_eq!(outcome.not_relevant.len(), 1);
        assert_eq!(outcome.relevant[0]["bill_number"], json!("HB3"));
    }

    #[tokio::test]
    async fn test_document_normalizes_back() {
        let mut bill = BillRecord::new("SB01071", "Hospice care");
        bill.bill_id = Some("1932259".into());
        let (pass, _) = pass(50);
        let document = pass.run(&[bill, BillRecord::new("SB2", "Roads")]).await.to_document();

        assert_eq!(document["summary"]["total_analyzed"], json!(2));
        assert_eq!(document["summary"]["relevant_count"], json!(1));
        assert_eq!(document["summary"]["source"], json!("test.json"));

        let candidates = normalizer::normalize(&document, None).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].identifier, "SB01071");
        assert_eq!(candidates[0].reason(), Some("parity"));
        assert_eq!(candidates[0].bill_id().as_deref(), Some("1932259"));
    }

    /// Answers every bill twice, first relevant then not
    struct StutteringClassifier;

    #[async_trait]
    impl FilterClassifier for StutteringClassifier {
        async fn classify_batch(&self, bills: &[BillRecord]) -> Result<Vec<FilterDecision>> {
            Ok(bills
                .iter()
                .flat_map(|b| {
                    [true, false].map(|relevant| FilterDecision {
                        bill_identifier: b.bill_number.clone(),
                        relevant,
                        reason: format!("relevant={}", relevant),
                    })
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_repeated_decision_keeps_the_first() {
        let config = FilterPassConfig {
            batch_size: 10,
            timeout_secs: 5,
            batch_delay_ms: 0,
        };
        let pass = FilterPass::new(
            config,
            Arc::new(StutteringClassifier),
            Arc::new(HookManager::without_cache()),
        );
        let outcome = pass
            .run(&[BillRecord::new("HB1", "One"), BillRecord::new("HB2", "Two")])
            .await;

        assert_eq!(outcome.relevant.len(), 2);
        assert!(outcome.not_relevant.is_empty());
        assert_eq!(outcome.relevant[0]["reason"], json!("relevant=true"));

        let document = outcome.to_document();
        assert_eq!(document["summary"]["relevant_count"], json!(2));
        assert_eq!(document["summary"]["not_relevant_count"], json!(0));
    }

    #[test]
    fn test_unknown_decision_gets_placeholders() {
        let decision = FilterDecision {
            bill_identifier: "ZZ9".into(),
            relevant: true,
            reason: "hallucinated".into(),
        };
        let record = verdict_record(&decision, None);
        assert_eq!(record["title"], json!("Unknown"));
        assert_eq!(record["url"], json!("N/A"));
    }
}
