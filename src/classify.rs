//! Boundary to the external classification model.
//!
//! The pipeline only sees the two traits. [`ChatClassifier`] implements both
//! against an OpenAI-compatible `/chat/completions` gateway.

use crate::config::ClassifierConfig;
use crate::error::{Error, Result};
use crate::hooks::HookPayload;
use crate::types::{BillRecord, CandidateItem, FilterDecision};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, error};

/// Environment variable holding the gateway API key
pub const PORTKEY_API_KEY_ENV: &str = "PORTKEY_API_KEY";

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a policy analyst. Respond only with valid JSON.";

pub const DEFAULT_FILTER_PROMPT: &str = "Decide which of the following bills are relevant to \
the configured topic. Reply with JSON of the form \
{\"results\": [{\"bill_identifier\": \"...\", \"relevant\": true, \"reason\": \"...\"}]}.\n\n{bills}";

pub const DEFAULT_ANALYSIS_PROMPT: &str = "Analyze the bill below. Reply with a JSON object \
containing at least \"is_relevant\" (boolean) and \"categories\" (list of strings).\n\n{bill}";

/// Cheap relevance screening over a batch of raw bills
#[async_trait]
pub trait FilterClassifier: Send + Sync {
    async fn classify_batch(&self, bills: &[BillRecord]) -> Result<Vec<FilterDecision>>;
}

/// Deep analysis of one enriched candidate
#[async_trait]
pub trait AnalysisClassifier: Send + Sync {
    async fn analyze(&self, candidate: &CandidateItem, content: &HookPayload) -> Result<Value>;
}

/// Prompt templates. `{bills}` and `{bill}` are substituted.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompts {
    pub system: String,
    pub filter: String,
    pub analysis: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            filter: DEFAULT_FILTER_PROMPT.to_string(),
            analysis: DEFAULT_ANALYSIS_PROMPT.to_string(),
        }
    }
}

impl Prompts {
    /// Defaults overridden by any prompt files named in config
    pub fn load(config: &ClassifierConfig) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            system: read_prompt(config.system_prompt.as_deref(), defaults.system)?,
            filter: read_prompt(config.filter_prompt.as_deref(), defaults.filter)?,
            analysis: read_prompt(config.analysis_prompt.as_deref(), defaults.analysis)?,
        })
    }
}

fn read_prompt(path: Option<&Path>, default: String) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read prompt {}: {}", path.display(), e))
        }),
        None => Ok(default),
    }
}

/// Client for an OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone)]
pub struct ChatClassifier {
    client: reqwest::Client,
    api_key: String,
    config: ClassifierConfig,
    prompts: Prompts,
}

impl ChatClassifier {
    pub fn new(config: ClassifierConfig, api_key: impl Into<String>) -> Result<Self> {
        let prompts = Prompts::load(&config)?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            config,
            prompts,
        })
    }

    /// Read the API key from `PORTKEY_API_KEY`
    pub fn from_env(config: ClassifierConfig) -> Result<Self> {
        let api_key = std::env::var(PORTKEY_API_KEY_ENV)
            .map_err(|_| Error::Config(format!("{} is not set", PORTKEY_API_KEY_ENV)))?;
        Self::new(config, api_key)
    }

    async fn complete(&self, user_prompt: String, max_tokens: u32) -> Result<Value> {
        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": self.prompts.system},
                {"role": "user", "content": user_prompt}
            ],
            "temperature": self.config.temperature,
            "max_tokens": max_tokens,
        });

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response: Value = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let content = response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Classification("Unexpected response format: no message content".into())
            })?;

        parse_model_reply(content)
    }
}

#[async_trait]
impl FilterClassifier for ChatClassifier {
    async fn classify_batch(&self, bills: &[BillRecord]) -> Result<Vec<FilterDecision>> {
        let listing: Vec<Value> = bills
            .iter()
            .map(|bill| {
                json!({
                    "bill_number": bill.bill_number,
                    "title": bill.title,
                    "description": bill.description,
                })
            })
            .collect();
        let prompt = self
            .prompts
            .filter
            .replace("{bills}", &serde_json::to_string_pretty(&listing)?);

        let reply = self.complete(prompt, self.config.filter_max_tokens).await?;
        parse_batch_reply(reply)
    }
}

#[async_trait]
impl AnalysisClassifier for ChatClassifier {
    async fn analyze(&self, candidate: &CandidateItem, content: &HookPayload) -> Result<Value> {
        debug!("Requesting analysis for {}", candidate.identifier);
        let prompt = self.prompts.analysis.replace("{bill}", &content.render());
        self.complete(prompt, self.config.analysis_max_tokens).await
    }
}

fn code_fence() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)^```[A-Za-z]*\s*(.*?)\s*```$").ok())
        .as_ref()
}

/// Parse a model reply as JSON, stripping a surrounding Markdown code fence
pub fn parse_model_reply(content: &str) -> Result<Value> {
    let trimmed = content.trim();
    let cleaned = code_fence()
        .and_then(|fence| fence.captures(trimmed))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed);

    serde_json::from_str(cleaned).map_err(|e| {
        let preview: String = content.chars().take(500).collect();
        error!("Failed to parse model reply as JSON: {}", e);
        debug!("Raw reply: {}", preview);
        Error::Classification(format!("reply is not valid JSON: {}", e))
    })
}

/// Extract filter decisions from a batch reply's `results` array
pub fn parse_batch_reply(reply: Value) -> Result<Vec<FilterDecision>> {
    let Some(results) = reply.get("results").and_then(Value::as_array) else {
        return Err(Error::Classification(
            "batch reply has no 'results' array".to_string(),
        ));
    };

    results
        .iter()
        .map(|item| {
            serde_json::from_value(item.clone())
                .map_err(|e| Error::Classification(format!("invalid decision {}: {}", item, e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_with_json_fence() {
        let reply = "```json\n{\"is_relevant\": true}\n```";
        assert_eq!(parse_model_reply(reply).unwrap(), json!({"is_relevant": true}));
    }

    #[test]
    fn test_reply_with_bare_fence_and_whitespace() {
        let reply = "  ```\n[1, 2]\n```  ";
        assert_eq!(parse_model_reply(reply).unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_plain_reply() {
        assert_eq!(parse_model_reply("{\"a\": 1}").unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_non_json_reply_is_classification_error() {
        let err = parse_model_reply("Sorry, I cannot help").unwrap_err();
        assert!(matches!(err, Error::Classification(_)));
    }

    #[test]
    fn test_batch_reply_requires_results() {
        assert!(parse_batch_reply(json!({"bills": []})).is_err());

        let decisions = parse_batch_reply(json!({
            "results": [
                {"bill_identifier": "HB1", "relevant": true, "reason": "Hospice"},
                {"bill_identifier": "HB2"}
            ]
        }))
        .unwrap();
        assert_eq!(decisions.len(), 2);
        assert!(decisions[0].relevant);
        assert!(!decisions[1].relevant);
    }

    #[test]
    fn test_prompts_load_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter.txt");
        std::fs::write(&path, "Custom {bills}").unwrap();

        let config = ClassifierConfig {
            filter_prompt: Some(path),
            ..Default::default()
        };
        let prompts = Prompts::load(&config).unwrap();
        assert_eq!(prompts.filter, "Custom {bills}");
        assert_eq!(prompts.analysis, DEFAULT_ANALYSIS_PROMPT);
    }
}
