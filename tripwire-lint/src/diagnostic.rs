//! Rule identifiers, severities and the diagnostics the rules emit.

use std::fmt;
use std::str::FromStr;

/// The checks this crate knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleId {
    /// `TRW001`: a Result-typed expression statement whose value is dropped.
    UnconsumedResult,
    /// `TRW002`: `.unwrap()` / `.expect()` on a Result not proven `Ok`.
    UncheckedAccess,
    /// `TRW003`: `.map` with a Result-returning function, producing `Result<Result<..>>`.
    NestedResult,
    /// `TRW004`: a failure built from the "no error" sentinel.
    FailureWithoutError,
}

impl RuleId {
    pub const ALL: [RuleId; 4] = [
        RuleId::UnconsumedResult,
        RuleId::UncheckedAccess,
        RuleId::NestedResult,
        RuleId::FailureWithoutError,
    ];

    pub fn code(self) -> &'static str {
        match self {
            RuleId::UnconsumedResult => "TRW001",
            RuleId::UncheckedAccess => "TRW002",
            RuleId::NestedResult => "TRW003",
            RuleId::FailureWithoutError => "TRW004",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RuleId::UnconsumedResult => "unconsumed-result",
            RuleId::UncheckedAccess => "unchecked-access",
            RuleId::NestedResult => "nested-result",
            RuleId::FailureWithoutError => "failure-without-error",
        }
    }

    /// Severity used when the configuration does not override it.
    pub fn default_severity(self) -> Severity {
        match self {
            RuleId::FailureWithoutError => Severity::Error,
            _ => Severity::Warning,
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown rule '{0}' (expected TRW001..TRW004 or a rule name)")]
pub struct ParseRuleError(pub String);

impl FromStr for RuleId {
    type Err = ParseRuleError;

    /// Accepts the code (`TRW002`, any case) or the name (`unchecked-access`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleId::ALL
            .into_iter()
            .find(|rule| rule.code().eq_ignore_ascii_case(s) || rule.name() == s)
            .ok_or_else(|| ParseRuleError(s.to_string()))
    }
}

/// How a diagnostic is reported. `Allow` disables the rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Allow,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Allow => "allow",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// One finding. `line` and `column` are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub rule: RuleId,
    pub severity: Severity,
    pub message: String,
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}[{}]: {}",
            self.file, self.line, self.column, self.severity, self.rule, self.message
        )
    }
}
