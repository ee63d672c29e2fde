//! Error types for configuration loading and mode resolution.

use thiserror::Error;

/// Fatal, startup-only configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration is inconsistent. Every problem found is listed.
    #[error("invalid configuration:\n  - {}", problems.join("\n  - "))]
    Invalid { problems: Vec<String> },

    /// A secret could not be resolved from its environment variable or file.
    #[error("failed to resolve secret {name}: {reason}")]
    Secret { name: String, reason: String },

    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the configuration file.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl ConfigError {
    /// Build an `Invalid` error from collected problems.
    pub fn invalid(problems: Vec<String>) -> Self {
        Self::Invalid { problems }
    }

    /// Problems enumerated by an `Invalid` error; empty for other variants.
    pub fn problems(&self) -> &[String] {
        match self {
            Self::Invalid { problems } => problems,
            _ => &[],
        }
    }
}
