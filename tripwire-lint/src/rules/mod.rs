//! The individual checks. Each one inspects a single syntax node with the context the walker
//! provides and returns at most one diagnostic.

pub(crate) mod failure_without_error;
pub(crate) mod nested_result;
pub(crate) mod unchecked_access;
pub(crate) mod unconsumed;

use proc_macro2::Span;

use crate::config::LintConfig;
use crate::diagnostic::{Diagnostic, RuleId, Severity};
use crate::semantic::SemanticModel;

/// What every check needs besides the node itself.
pub(crate) struct Context<'a> {
    pub config: &'a LintConfig,
    pub model: &'a SemanticModel,
    pub file: &'a str,
}

impl Context<'_> {
    /// A diagnostic at `span`, or `None` when the rule is disabled.
    pub fn diagnostic(&self, rule: RuleId, span: Span, message: String) -> Option<Diagnostic> {
        let severity = self.config.severity(rule);
        if severity == Severity::Allow {
            return None;
        }
        let start = span.start();
        Some(Diagnostic {
            rule,
            severity,
            message,
            file: self.file.to_string(),
            line: start.line,
            column: start.column + 1,
        })
    }
}

/// Short human name for the callee of a call-like expression.
pub(crate) fn describe(expr: &syn::Expr) -> String {
    match expr {
        syn::Expr::Call(call) => match &*call.func {
            syn::Expr::Path(p) => p
                .path
                .segments
                .iter()
                .map(|s| s.ident.to_string())
                .collect::<Vec<_>>()
                .join("::"),
            _ => "call".to_string(),
        },
        syn::Expr::MethodCall(m) => m.method.to_string(),
        syn::Expr::Await(a) => describe(&a.base),
        syn::Expr::Paren(p) => describe(&p.expr),
        syn::Expr::Path(p) => p
            .path
            .segments
            .iter()
            .map(|s| s.ident.to_string())
            .collect::<Vec<_>>()
            .join("::"),
        _ => "expression".to_string(),
    }
}
