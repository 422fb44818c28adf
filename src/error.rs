use thiserror::Error;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The filter-result document is not valid JSON.
    #[error("Malformed input at byte {offset} (line {line}, column {column}): {message}")]
    MalformedInput {
        offset: usize,
        line: usize,
        column: usize,
        message: String,
    },

    /// The document parsed but matches none of the known filter-result shapes.
    #[error("Unknown filter format: expected 'relevant_bills' or 'results', found keys {keys:?}")]
    FormatDetection { keys: Vec<String> },

    #[error("Hook '{hook}' expects a {expected} payload but was given {found}")]
    PayloadMismatch {
        hook: String,
        expected: String,
        found: String,
    },

    #[error("Hook '{hook}' failed: {message}")]
    HookExecution { hook: String, message: String },

    #[error("Hook '{hook}' timed out after {timeout:?}")]
    HookTimeout {
        hook: String,
        timeout: std::time::Duration,
    },

    #[error("Cache store error: {0}")]
    CacheStore(String),

    #[error("External API error: {0}")]
    Api(String),

    #[error("Classification call failed: {0}")]
    Classification(String),

    #[error("Unknown hook type '{name}'. Available types: {}", available.join(", "))]
    UnknownHookType { name: String, available: Vec<String> },

    #[error("Hook descriptor at {0} is missing 'type'")]
    MissingHookType(String),
}

impl Error {
    /// True for errors that mean the input contract itself was violated.
    /// These abort a file or run; everything else degrades per item.
    pub fn is_input_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::MalformedInput { .. } | Error::FormatDetection { .. }
        )
    }
}
