//! Compiler options, loadable from a TOML file.
//!
//! ```toml
//! [checker]
//! undefined_names = "strict"
//!
//! [graph]
//! require_acyclic = false
//! ```

use pllm_checker::LookupPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompileOptions {
    pub checker: CheckerOptions,
    pub graph: GraphOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckerOptions {
    /// What an undefined name does: `permissive` types it as `any`,
    /// `strict` also reports it
    pub undefined_names: LookupPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphOptions {
    /// A cyclic `connect` graph aborts compilation instead of being
    /// reported as a diagnostic
    pub require_acyclic: bool,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            require_acyclic: true,
        }
    }
}

impl CompileOptions {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let options = CompileOptions::default();
        assert_eq!(options.checker.undefined_names, LookupPolicy::Permissive);
        assert!(options.graph.require_acyclic);
        assert_eq!(CompileOptions::from_toml_str("").unwrap(), options);
    }

    #[test]
    fn test_partial_file() {
        let options = CompileOptions::from_toml_str("[checker]\nundefined_names = \"strict\"\n").unwrap();
        assert_eq!(options.checker.undefined_names, LookupPolicy::Strict);
        assert!(options.graph.require_acyclic);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let err = CompileOptions::from_toml_str("[graph]\nacyclic = false\n").unwrap_err();
        assert!(err.to_string().starts_with("invalid config:"), "{err}");
        assert!(CompileOptions::from_toml_str("[checker]\nundefined_names = \"loose\"\n").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = CompileOptions::from_file("definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
