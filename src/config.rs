use crate::errors::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Analyzer configuration document.
///
/// The schema is closed: every recognized key is enumerated here with its
/// default, and an external document carrying an unknown key is rejected
/// instead of silently becoming an ad-hoc field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzerConfig {
    pub allowed_imports: HashSet<String>,
    pub blacklist_imports: HashSet<String>,
    pub allowed_calls: HashSet<String>,
    pub blacklist_calls: HashSet<String>,
    pub allowed_statements: HashSet<String>,
    pub blacklist_statements: HashSet<String>,
    /// Informational ceiling: the report flags programs above it, nothing
    /// blocks execution.
    pub max_complexity: u32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            allowed_imports: HashSet::new(),
            blacklist_imports: ["os", "sys"].iter().map(|s| s.to_string()).collect(),
            allowed_calls: HashSet::new(),
            blacklist_calls: ["open"].iter().map(|s| s.to_string()).collect(),
            allowed_statements: HashSet::new(),
            blacklist_statements: HashSet::new(),
            max_complexity: 4,
        }
    }
}

impl AnalyzerConfig {
    /// Load a configuration document from a JSON file. Keys present in
    /// the document override the same-named defaults; unknown keys fail.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| SandboxError::BadConfig(e.to_string()))
    }
}

/// Immutable policy derived from a configuration.
///
/// `unified_blacklist` is computed once at construction as the union of
/// the blacklisted imports, statements, and calls. The value is read-only
/// afterwards and can be shared by reference across any number of
/// analysis passes; per-pass growth happens on the analyzer's working
/// copy, never here.
#[derive(Debug, Clone)]
pub struct Policy {
    config: AnalyzerConfig,
    unified_blacklist: HashSet<String>,
}

impl Policy {
    pub fn new(config: AnalyzerConfig) -> Self {
        let mut unified_blacklist = HashSet::new();
        unified_blacklist.extend(config.blacklist_imports.iter().cloned());
        unified_blacklist.extend(config.blacklist_statements.iter().cloned());
        unified_blacklist.extend(config.blacklist_calls.iter().cloned());
        Self {
            config,
            unified_blacklist,
        }
    }

    pub fn blacklist_imports(&self) -> &HashSet<String> {
        &self.config.blacklist_imports
    }

    pub fn blacklist_calls(&self) -> &HashSet<String> {
        &self.config.blacklist_calls
    }

    pub fn blacklist_statements(&self) -> &HashSet<String> {
        &self.config.blacklist_statements
    }

    pub fn allowed_imports(&self) -> &HashSet<String> {
        &self.config.allowed_imports
    }

    pub fn allowed_calls(&self) -> &HashSet<String> {
        &self.config.allowed_calls
    }

    pub fn allowed_statements(&self) -> &HashSet<String> {
        &self.config.allowed_statements
    }

    pub fn unified_blacklist(&self) -> &HashSet<String> {
        &self.unified_blacklist
    }

    pub fn max_complexity(&self) -> u32 {
        self.config.max_complexity
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AnalyzerConfig::default();
        assert!(config.blacklist_imports.contains("os"));
        assert!(config.blacklist_imports.contains("sys"));
        assert!(config.blacklist_calls.contains("open"));
        assert!(config.allowed_imports.is_empty());
        assert_eq!(config.max_complexity, 4);
    }

    #[test]
    fn unified_blacklist_is_the_union() {
        let mut config = AnalyzerConfig::default();
        config.blacklist_statements.insert("exec".to_string());
        let policy = Policy::new(config);
        for name in ["os", "sys", "open", "exec"] {
            assert!(policy.unified_blacklist().contains(name), "missing {name}");
        }
        assert_eq!(policy.unified_blacklist().len(), 4);
    }

    #[test]
    fn document_keys_override_defaults() {
        let config = AnalyzerConfig::from_json_str(
            r#"{"blacklist_imports": ["socket"], "max_complexity": 9}"#,
        )
        .unwrap();
        assert_eq!(config.blacklist_imports.len(), 1);
        assert!(config.blacklist_imports.contains("socket"));
        assert_eq!(config.max_complexity, 9);
        // untouched keys keep their defaults
        assert!(config.blacklist_calls.contains("open"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = AnalyzerConfig::from_json_str(r#"{"blacklst_imports": ["os"]}"#).unwrap_err();
        assert!(matches!(err, SandboxError::BadConfig(_)));
    }
}
