//! `TRW001`: a Result-typed expression statement drops the outcome on the floor.
//!
//! `save(&order);` compiles (with at most a `must_use` warning that is easy to silence), and a
//! failed save goes unnoticed. Binding, returning, `?`, passing as an argument and `let _ =` all
//! count as consuming the value.

use syn::spanned::Spanned;
use syn::Expr;

use super::{describe, Context};
use crate::diagnostic::{Diagnostic, RuleId};
use crate::semantic::{Shape, TypeEnv};

/// `expr` is the expression of an `expr;` statement.
pub(crate) fn check(cx: &Context<'_>, env: &TypeEnv<'_>, expr: &Expr) -> Option<Diagnostic> {
    if env.shape(expr) != Shape::Result {
        return None;
    }
    cx.diagnostic(
        RuleId::UnconsumedResult,
        expr.span(),
        format!(
            "result of `{}` is not used; handle it, propagate it with `?`, or discard it with `let _ =`",
            describe(expr)
        ),
    )
}
