use super::report::{AnalyzedBill, ErroredCandidate, RunReport};
use crate::classify::AnalysisClassifier;
use crate::config::AnalysisPassConfig;
use crate::hooks::{HookContext, HookManager, HookPayload, HookStage};
use crate::selectors::candidate_text;
use crate::types::CandidateItem;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Non-terminal states a candidate passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateState {
    Pending,
    Enriching,
    Classifying,
}

impl fmt::Display for CandidateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateState::Pending => f.write_str("pending"),
            CandidateState::Enriching => f.write_str("enriching"),
            CandidateState::Classifying => f.write_str("classifying"),
        }
    }
}

/// Terminal state of one candidate
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateOutcome {
    Relevant(AnalyzedBill),
    NotRelevant(AnalyzedBill),
    Errored(ErroredCandidate),
}

impl CandidateOutcome {
    pub fn identifier(&self) -> &str {
        match self {
            CandidateOutcome::Relevant(bill) | CandidateOutcome::NotRelevant(bill) => {
                bill.identifier()
            }
            CandidateOutcome::Errored(errored) => &errored.identifier,
        }
    }
}

/// Per-candidate deep classification over hook-enriched content.
///
/// The classifier's `is_relevant` is authoritative: a candidate the filter pass
/// kept is still bucketed as not relevant when analysis disagrees.
pub struct AnalysisPass {
    config: AnalysisPassConfig,
    classifier: Arc<dyn AnalysisClassifier>,
    hooks: Arc<HookManager>,
}

impl AnalysisPass {
    pub fn new(
        config: AnalysisPassConfig,
        classifier: Arc<dyn AnalysisClassifier>,
        hooks: Arc<HookManager>,
    ) -> Self {
        Self {
            config,
            classifier,
            hooks,
        }
    }

    /// Outcomes in input order. Up to `concurrency` candidates are in flight.
    pub fn stream(
        &self,
        candidates: Vec<CandidateItem>,
    ) -> impl Stream<Item = CandidateOutcome> + '_ {
        futures::stream::iter(candidates)
            .map(move |candidate| self.analyze_candidate(candidate))
            .buffered(self.config.concurrency.max(1))
    }

    /// Analyze every candidate and bucket the outcomes
    pub async fn run(&self, candidates: Vec<CandidateItem>) -> RunReport {
        let mut report = RunReport::new(candidates.len());
        info!(
            "Analyzing {} candidates (concurrency {})",
            report.total,
            self.config.concurrency.max(1)
        );

        let mut outcomes = Box::pin(self.stream(candidates));
        while let Some(outcome) = outcomes.next().await {
            match outcome {
                CandidateOutcome::Relevant(bill) => report.add_relevant(bill),
                CandidateOutcome::NotRelevant(bill) => report.not_relevant.push(bill),
                CandidateOutcome::Errored(errored) => report.errored.push(errored),
            }
        }

        report.hook_stats = self.hooks.stats();
        let counts = report.counts();
        info!(
            "Analysis complete: {} relevant, {} not relevant, {} errored of {}",
            counts.relevant, counts.not_relevant, counts.errored, counts.total
        );
        report
    }

    /// Drive one candidate from `Pending` to a terminal outcome
    pub async fn analyze_candidate(&self, candidate: CandidateItem) -> CandidateOutcome {
        let mut state = CandidateState::Pending;
        if candidate.identifier.is_empty() {
            return errored(&candidate, state, "candidate has no identifier");
        }

        state = CandidateState::Enriching;
        debug!("{}: {}", candidate.identifier, state);
        let context = analysis_context(&candidate);
        let content = self
            .hooks
            .run(
                HookStage::PreAnalysis,
                HookPayload::Text(candidate_text(&candidate)),
                &context,
            )
            .await;

        state = CandidateState::Classifying;
        debug!("{}: {}", candidate.identifier, state);
        let timeout = self.config.timeout();
        let reply = match tokio::time::timeout(timeout, self.classifier.analyze(&candidate, &content))
            .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return errored(&candidate, state, e.to_string()),
            Err(_) => {
                return errored(
                    &candidate,
                    state,
                    format!("classification timed out after {}s", timeout.as_secs()),
                )
            }
        };

        let analysis = match reply {
            Value::Object(analysis) => analysis,
            other => {
                return errored(
                    &candidate,
                    state,
                    format!("classification reply is not an object: {}", other),
                )
            }
        };
        if let Some(error) = analysis.get("error") {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return errored(&candidate, state, message);
        }

        let analysis = self.post_analysis(&context, analysis).await;
        let bill = AnalyzedBill::new(candidate.to_record(), analysis);
        if bill.is_relevant() {
            info!("{} is relevant", candidate.identifier);
            CandidateOutcome::Relevant(bill)
        } else {
            if candidate.reason().is_some() {
                info!(
                    "{} kept by filter pass but judged not relevant on analysis",
                    candidate.identifier
                );
            }
            CandidateOutcome::NotRelevant(bill)
        }
    }

    async fn post_analysis(
        &self,
        context: &HookContext,
        analysis: Map<String, Value>,
    ) -> Map<String, Value> {
        let context = context.at_stage(HookStage::PostAnalysis);
        match self
            .hooks
            .run(
                HookStage::PostAnalysis,
                HookPayload::Record(analysis.clone()),
                &context,
            )
            .await
        {
            HookPayload::Record(enriched) => enriched,
            HookPayload::Text(_) => analysis,
        }
    }
}

fn analysis_context(candidate: &CandidateItem) -> HookContext {
    let mut context = HookContext::new(candidate.identifier.clone(), HookStage::PreAnalysis)
        .with_extra("title", candidate.title.clone());
    if let Some(bill_id) = candidate.bill_id() {
        context = context.with_extra("bill_id", bill_id);
    }
    context
}

fn errored(
    candidate: &CandidateItem,
    stage: CandidateState,
    message: impl Into<String>,
) -> CandidateOutcome {
    let message = message.into();
    warn!(
        "{} errored while {}: {}",
        if candidate.identifier.is_empty() {
            "<unidentified>"
        } else {
            candidate.identifier.as_str()
        },
        stage,
        message
    );
    CandidateOutcome::Errored(ErroredCandidate {
        identifier: candidate.identifier.clone(),
        title: candidate.title.clone(),
        stage,
        message,
    })
}
