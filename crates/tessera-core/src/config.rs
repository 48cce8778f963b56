//! Engine configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How much the shell reports after each snippet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    #[default]
    Normal,
    Concise,
    Silent,
}

impl std::str::FromStr for Feedback {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normal" => Ok(Feedback::Normal),
            "concise" => Ok(Feedback::Concise),
            "silent" => Ok(Feedback::Silent),
            other => Err(Error::Config(format!("unknown feedback mode '{other}'"))),
        }
    }
}

/// Settings for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Execution control spec; empty means the registry's default chain.
    pub execution: String,
    /// Bound on waiting for a remote worker to connect.
    pub launch_timeout_ms: u64,
    /// Worker binary override.
    pub worker_path: Option<PathBuf>,
    pub feedback: Feedback,
    /// Snippets evaluated when the engine starts.
    pub startup: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution: String::new(),
            launch_timeout_ms: 5000,
            worker_path: None,
            feedback: Feedback::Normal,
            startup: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"execution": "direct", "feedback": "concise"}}"#).unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.execution, "direct");
        assert_eq!(config.feedback, Feedback::Concise);
        assert_eq!(config.launch_timeout_ms, 5000);
    }

    #[test]
    fn test_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(EngineConfig::load(file.path()), Err(Error::Config(_))));
    }

    #[test]
    fn test_feedback_from_str() {
        assert_eq!("silent".parse::<Feedback>().unwrap(), Feedback::Silent);
        assert!("loud".parse::<Feedback>().is_err());
    }
}
