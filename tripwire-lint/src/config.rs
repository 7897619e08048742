//! Analyzer configuration.

use std::collections::HashMap;

use crate::diagnostic::{RuleId, Severity};

/// Which rules run, at what severity, and which names the analyzer treats as special.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintConfig {
    pub severities: HashMap<RuleId, Severity>,
    /// Last path segments naming a Result type (`Result`, `io::Result`, `Outcome`, ...).
    pub result_types: Vec<String>,
    /// Paths of the "no error" sentinel, matched against the tail of a path
    /// (`Error::none` matches `tripwire::Error::none`).
    pub none_sentinels: Vec<String>,
    /// Analyze `#[test]` functions and `#[cfg(test)]` modules too.
    pub include_tests: bool,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            severities: HashMap::new(),
            result_types: vec!["Result".into(), "Outcome".into()],
            none_sentinels: vec!["Error::none".into(), "Error::NONE".into()],
            include_tests: false,
        }
    }
}

impl LintConfig {
    pub fn severity(&self, rule: RuleId) -> Severity {
        self.severities.get(&rule).copied().unwrap_or_else(|| rule.default_severity())
    }

    pub fn set_severity(&mut self, rule: RuleId, severity: Severity) {
        self.severities.insert(rule, severity);
    }

    /// Builder form of [`set_severity`](Self::set_severity).
    pub fn with_severity(mut self, rule: RuleId, severity: Severity) -> Self {
        self.set_severity(rule, severity);
        self
    }

    pub fn is_enabled(&self, rule: RuleId) -> bool {
        self.severity(rule) != Severity::Allow
    }

    pub(crate) fn is_result_type(&self, name: &str) -> bool {
        self.result_types.iter().any(|t| t == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_take_precedence() {
        let config = LintConfig::default()
            .with_severity(RuleId::UncheckedAccess, Severity::Error)
            .with_severity(RuleId::NestedResult, Severity::Allow);

        assert_eq!(config.severity(RuleId::UncheckedAccess), Severity::Error);
        assert!(!config.is_enabled(RuleId::NestedResult));
        assert_eq!(config.severity(RuleId::UnconsumedResult), Severity::Warning);
    }

    #[test]
    fn default_result_types() {
        let config = LintConfig::default();
        assert!(config.is_result_type("Result"));
        assert!(config.is_result_type("Outcome"));
        assert!(!config.is_result_type("Option"));
    }
}
