//! A two-pass legislative bill classification pipeline.
//!
//! Bills are screened in batches by a cheap filter pass. The resulting
//! filter-result document (in any supported format) is normalized into
//! candidates, enriched through pluggable, cache-memoized hooks and analyzed
//! one by one.

pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod hooks;
pub mod legiscan;
pub mod normalizer;
pub mod pipeline;
pub mod publish;
pub mod selectors;
pub mod types;

pub use cache::{CacheStore, FileCacheStore, MemoryCacheStore, NoopCacheStore};
pub use classify::{AnalysisClassifier, ChatClassifier, FilterClassifier};
pub use config::{ConfigBuilder, HookDescriptor, HooksConfig, PipelineConfig};
pub use error::{Error, Result};
pub use hooks::{
    EnrichmentFailure, Hook, HookContext, HookManager, HookPayload, HookRegistry, HookRunStats,
    HookStage, PayloadKind,
};
pub use normalizer::{FilterFormat, FormatInfo, SourceIndex};
pub use pipeline::{AnalysisPass, CandidateOutcome, CandidateState, FilterPass, RunReport};
pub use types::{BillRecord, CandidateItem, FilterDecision};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::cache::CacheStore;
    pub use crate::config::{ConfigBuilder, PipelineConfig};
    pub use crate::error::{Error, Result};
    pub use crate::hooks::{Hook, HookContext, HookManager, HookPayload, HookStage};
    pub use crate::pipeline::{AnalysisPass, FilterPass};
    pub use crate::types::{BillRecord, CandidateItem};
    pub use futures::StreamExt;
}
