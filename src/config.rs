use crate::error::{Error, Result};
use crate::hooks::HookStage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Filter pass tunables. The orchestrator exposes these but never computes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterPassConfig {
    pub batch_size: usize,
    pub timeout_secs: u64,
    /// Pause between batches to stay under gateway rate limits
    pub batch_delay_ms: u64,
}

impl Default for FilterPassConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            timeout_secs: 180,
            batch_delay_ms: 1000,
        }
    }
}

impl FilterPassConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisPassConfig {
    pub timeout_secs: u64,
    /// Candidates analyzed in parallel. Hook chains stay sequential per candidate.
    pub concurrency: usize,
}

impl Default for AnalysisPassConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 90,
            concurrency: 1,
        }
    }
}

impl AnalysisPassConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Settings for the chat-completions classification gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub filter_max_tokens: u32,
    pub analysis_max_tokens: u32,
    pub filter_prompt: Option<PathBuf>,
    pub analysis_prompt: Option<PathBuf>,
    pub system_prompt: Option<PathBuf>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.portkey.ai/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            filter_max_tokens: 8000,
            analysis_max_tokens: 2000,
            filter_prompt: None,
            analysis_prompt: None,
            system_prompt: None,
        }
    }
}

/// One configured hook: a registry type name plus constructor parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookDescriptor {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub hook_type: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl HookDescriptor {
    pub fn new(hook_type: impl Into<String>) -> Self {
        Self {
            hook_type: Some(hook_type.into()),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// String parameter lookup
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub enabled: bool,
    pub cache_directory: Option<PathBuf>,
    pub hook_timeout_secs: Option<u64>,
    pub pre_filter: Vec<HookDescriptor>,
    pub post_filter: Vec<HookDescriptor>,
    pub pre_analysis: Vec<HookDescriptor>,
    pub post_analysis: Vec<HookDescriptor>,
}

impl HooksConfig {
    /// Descriptors configured for a stage, in execution order
    pub fn descriptors(&self, stage: HookStage) -> &[HookDescriptor] {
        match stage {
            HookStage::PreFilter => &self.pre_filter,
            HookStage::PostFilter => &self.post_filter,
            HookStage::PreAnalysis => &self.pre_analysis,
            HookStage::PostAnalysis => &self.post_analysis,
        }
    }

    fn descriptors_mut(&mut self, stage: HookStage) -> &mut Vec<HookDescriptor> {
        match stage {
            HookStage::PreFilter => &mut self.pre_filter,
            HookStage::PostFilter => &mut self.post_filter,
            HookStage::PreAnalysis => &mut self.pre_analysis,
            HookStage::PostAnalysis => &mut self.post_analysis,
        }
    }

    pub fn hook_timeout(&self) -> Option<Duration> {
        self.hook_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data/analyzed"),
        }
    }
}

/// Configuration for the whole two-pass pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub filter_pass: FilterPassConfig,
    pub analysis_pass: AnalysisPassConfig,
    pub classifier: ClassifierConfig,
    pub hooks: HooksConfig,
    pub output: OutputConfig,
}

impl PipelineConfig {
    /// Load a YAML pipeline file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_yaml_str(&contents)?;
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.filter_pass.batch_size == 0 {
            return Err(Error::Config(
                "filter_pass.batch_size must be at least 1".to_string(),
            ));
        }

        if self.analysis_pass.concurrency == 0 {
            return Err(Error::Config(
                "analysis_pass.concurrency must be at least 1".to_string(),
            ));
        }

        if self.classifier.model.trim().is_empty() {
            return Err(Error::Config("classifier.model is empty".to_string()));
        }

        if self.hooks.hook_timeout_secs == Some(0) {
            return Err(Error::Config(
                "hooks.hook_timeout_secs must be positive when set".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for creating configurations
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: PipelineConfig,
}

impl ConfigBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter pass batch size
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.filter_pass.batch_size = size;
        self
    }

    /// Set the per-batch classification timeout
    pub fn filter_timeout_secs(mut self, secs: u64) -> Self {
        self.config.filter_pass.timeout_secs = secs;
        self
    }

    pub fn batch_delay_ms(mut self, millis: u64) -> Self {
        self.config.filter_pass.batch_delay_ms = millis;
        self
    }

    pub fn analysis_timeout_secs(mut self, secs: u64) -> Self {
        self.config.analysis_pass.timeout_secs = secs;
        self
    }

    pub fn analysis_concurrency(mut self, concurrency: usize) -> Self {
        self.config.analysis_pass.concurrency = concurrency;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.classifier.model = model.into();
        self
    }

    /// Enable hooks and store their results under the given directory
    pub fn hook_cache_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.hooks.enabled = true;
        self.config.hooks.cache_directory = Some(dir.into());
        self
    }

    pub fn hook_timeout_secs(mut self, secs: u64) -> Self {
        self.config.hooks.hook_timeout_secs = Some(secs);
        self
    }

    /// Append a hook descriptor to a stage; enables hooks
    pub fn add_hook(mut self, stage: HookStage, descriptor: HookDescriptor) -> Self {
        self.config.hooks.enabled = true;
        self.config.hooks.descriptors_mut(stage).push(descriptor);
        self
    }

    pub fn output_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output.directory = dir.into();
        self
    }

    /// Build the final configuration
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
