//! `TRW002`: `.unwrap()` / `.expect()` on a Result that is not proven successful.

use syn::ExprMethodCall;

use super::Context;
use crate::diagnostic::{Diagnostic, RuleId};
use crate::guard::{self, Facts};
use crate::semantic::{Shape, TypeEnv};

pub(crate) fn check(
    cx: &Context<'_>,
    env: &TypeEnv<'_>,
    call: &ExprMethodCall,
    facts: &Facts,
) -> Option<Diagnostic> {
    let method = call.method.to_string();
    if method != "unwrap" && method != "expect" {
        return None;
    }
    if env.shape(&call.receiver) != Shape::Result {
        return None;
    }
    let key = guard::key(&call.receiver);
    if key.as_ref().is_some_and(|k| facts.contains(k)) {
        return None;
    }
    let subject = match key {
        Some(k) => format!("`{k}`"),
        None => "a Result".to_string(),
    };
    cx.diagnostic(
        RuleId::UncheckedAccess,
        call.method.span(),
        format!(
            "`.{method}()` on {subject} that is not known to be `Ok`; check `is_ok()`/`is_err()` first or handle the error"
        ),
    )
}
