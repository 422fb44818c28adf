//! Two-pass orchestration: a cheap batch filter followed by per-candidate
//! analysis over hook-enriched content.

pub mod analysis;
pub mod filter;
pub mod report;

pub use analysis::{AnalysisPass, CandidateOutcome, CandidateState};
pub use filter::{FailedBatch, FilterOutcome, FilterPass};
pub use report::{AnalyzedBill, ErroredCandidate, RunCounts, RunReport};
