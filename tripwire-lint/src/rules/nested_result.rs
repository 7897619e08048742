//! `TRW003`: `.map` with a function that itself returns a Result yields `Result<Result<..>>`.

use syn::ExprMethodCall;

use super::Context;
use crate::diagnostic::{Diagnostic, RuleId};
use crate::semantic::{Shape, TypeEnv};

pub(crate) fn check(cx: &Context<'_>, env: &TypeEnv<'_>, call: &ExprMethodCall) -> Option<Diagnostic> {
    let expected = match call.method.to_string().as_str() {
        "map" => Shape::Result,
        "map_ok" => Shape::FutureOfResult,
        _ => return None,
    };
    if call.args.len() != 1 || env.shape(&call.receiver) != expected {
        return None;
    }
    if !env.returns_result(&call.args[0]) {
        return None;
    }
    cx.diagnostic(
        RuleId::NestedResult,
        call.method.span(),
        format!(
            "`.{}` with a function returning a Result nests one Result in another; use `.and_then` instead",
            call.method
        ),
    )
}
