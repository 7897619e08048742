//! `TRW004`: `Err(Error::none())` is a failure that carries no error at all.

use syn::spanned::Spanned;
use syn::{Expr, ExprCall, Path};

use super::Context;
use crate::diagnostic::{Diagnostic, RuleId};

pub(crate) fn check(cx: &Context<'_>, call: &ExprCall) -> Option<Diagnostic> {
    let Expr::Path(func) = &*call.func else {
        return None;
    };
    if func.path.segments.last()?.ident != "Err" || call.args.len() != 1 {
        return None;
    }
    let path = sentinel_candidate(&call.args[0])?;
    let sentinel = cx.config.none_sentinels.iter().find(|s| ends_with(path, s))?;
    cx.diagnostic(
        RuleId::FailureWithoutError,
        call.span(),
        format!("failure built from the \"no error\" sentinel `{sentinel}`; use an error with a real kind"),
    )
}

/// The path an error argument is built from: `Error::none()`, `Error::NONE`, possibly decorated
/// with `.with_inner(..)` or `.clone()`.
fn sentinel_candidate(arg: &Expr) -> Option<&Path> {
    match arg {
        Expr::Paren(e) => sentinel_candidate(&e.expr),
        Expr::Group(e) => sentinel_candidate(&e.expr),
        Expr::MethodCall(m) if matches!(m.method.to_string().as_str(), "with_inner" | "clone") => {
            sentinel_candidate(&m.receiver)
        }
        Expr::Call(c) if c.args.is_empty() => match &*c.func {
            Expr::Path(p) => Some(&p.path),
            _ => None,
        },
        Expr::Path(p) => Some(&p.path),
        _ => None,
    }
}

fn ends_with(path: &Path, sentinel: &str) -> bool {
    let wanted: Vec<&str> = sentinel.split("::").collect();
    let have: Vec<String> = path.segments.iter().map(|s| s.ident.to_string()).collect();
    have.len() >= wanted.len()
        && have[have.len() - wanted.len()..].iter().zip(&wanted).all(|(h, w)| h == w)
}
