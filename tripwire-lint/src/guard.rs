//! Success facts for the unchecked-access check.
//!
//! A fact is the key of a receiver (`r`, `self.last`) proven to hold `Ok` at a program point.
//! Facts come from conditions (`is_ok`, `is_err`, `is_ok_and`, `if let Ok(..)`, combined with
//! `!`, `&&` and `||`), from `assert!`, and from assigning `Ok(..)`. Any other assignment or a
//! `&mut` borrow of the receiver kills its fact. At a join point the facts are those holding on
//! every path that reaches it; a path that diverged does not reach it.

use std::collections::BTreeSet;

use syn::visit::{self, Visit};
use syn::{Expr, Lifetime, Macro, Member, Pat};

pub(crate) type Facts = BTreeSet<String>;

/// State after evaluating a statement or expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Flow {
    Reachable(Facts),
    /// Control never continues past this point.
    Diverged,
}

impl Flow {
    /// Join of two paths.
    pub fn meet(self, other: Flow) -> Flow {
        match (self, other) {
            (Flow::Diverged, other) | (other, Flow::Diverged) => other,
            (Flow::Reachable(a), Flow::Reachable(b)) => {
                Flow::Reachable(a.intersection(&b).cloned().collect())
            }
        }
    }

    pub fn kill(&mut self, key: &str) {
        if let Flow::Reachable(facts) = self {
            kill(facts, key);
        }
    }
}

/// Forget `key` and everything reached through it (`self` also forgets `self.last`).
pub(crate) fn kill(facts: &mut Facts, key: &str) {
    facts.retain(|fact| {
        fact != key && !(fact.starts_with(key) && fact[key.len()..].starts_with('.'))
    });
}

pub(crate) fn union(a: &Facts, b: &Facts) -> Facts {
    a.union(b).cloned().collect()
}

const DIVERGING_MACROS: &[&str] = &["panic", "unreachable", "todo", "unimplemented"];

pub(crate) fn is_diverging_macro(mac: &Macro) -> bool {
    mac.path
        .segments
        .last()
        .is_some_and(|seg| DIVERGING_MACROS.contains(&seg.ident.to_string().as_str()))
}

/// `std::process::exit(..)` and `std::process::abort()`.
pub(crate) fn is_diverging_call(func: &Expr) -> bool {
    let Expr::Path(p) = func else {
        return false;
    };
    let segments: Vec<String> = p.path.segments.iter().map(|s| s.ident.to_string()).collect();
    match segments.as_slice() {
        [.., module, func] => module == "process" && (func == "exit" || func == "abort"),
        _ => false,
    }
}

/// Stable key of a receiver expression, if it names a place.
pub(crate) fn key(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Path(p) if p.qself.is_none() => p.path.get_ident().map(ToString::to_string),
        Expr::Field(f) => {
            let base = key(&f.base)?;
            let member = match &f.member {
                Member::Named(ident) => ident.to_string(),
                Member::Unnamed(index) => index.index.to_string(),
            };
            Some(format!("{base}.{member}"))
        }
        Expr::Paren(e) => key(&e.expr),
        Expr::Group(e) => key(&e.expr),
        Expr::Reference(r) if r.mutability.is_none() => key(&r.expr),
        // views of the same Result share its variant
        Expr::MethodCall(m)
            if m.args.is_empty()
                && matches!(m.method.to_string().as_str(), "as_ref" | "as_mut" | "clone") =>
        {
            key(&m.receiver)
        }
        _ => None,
    }
}

/// Whether `expr` is `Ok(..)` (any path ending in `Ok`).
pub(crate) fn is_ok_constructor(expr: &Expr) -> bool {
    match expr {
        Expr::Call(call) => matches!(
            &*call.func,
            Expr::Path(p) if p.path.segments.last().is_some_and(|s| s.ident == "Ok")
        ),
        Expr::Paren(e) => is_ok_constructor(&e.expr),
        _ => false,
    }
}

/// Facts holding when `cond` evaluates to `true` and to `false`.
pub(crate) fn condition(cond: &Expr) -> (Facts, Facts) {
    match cond {
        Expr::Paren(e) => condition(&e.expr),
        Expr::Group(e) => condition(&e.expr),
        Expr::Unary(u) if matches!(u.op, syn::UnOp::Not(_)) => {
            let (t, f) = condition(&u.expr);
            (f, t)
        }
        Expr::Binary(b) => match b.op {
            syn::BinOp::And(_) => {
                let (lt, lf) = condition(&b.left);
                let (rt, rf) = condition(&b.right);
                (union(&lt, &rt), lf.intersection(&rf).cloned().collect())
            }
            syn::BinOp::Or(_) => {
                let (lt, lf) = condition(&b.left);
                let (rt, rf) = condition(&b.right);
                (lt.intersection(&rt).cloned().collect(), union(&lf, &rf))
            }
            _ => Default::default(),
        },
        Expr::MethodCall(m) => {
            let Some(k) = key(&m.receiver) else {
                return Default::default();
            };
            match m.method.to_string().as_str() {
                "is_ok" => (Facts::from([k]), Facts::new()),
                "is_err" => (Facts::new(), Facts::from([k])),
                "is_ok_and" => (Facts::from([k]), Facts::new()),
                _ => Default::default(),
            }
        }
        Expr::Let(l) => match key(&l.expr) {
            Some(k) => let_condition(&l.pat, k),
            None => Default::default(),
        },
        _ => Default::default(),
    }
}

/// `Ok(..)` proves success where it matches. An `Err` pattern proves success where it does not
/// match, but only if it matches every error.
fn let_condition(pat: &Pat, k: String) -> (Facts, Facts) {
    match pat {
        Pat::Paren(p) => let_condition(&p.pat, k),
        Pat::TupleStruct(ts) => match ts.path.segments.last() {
            Some(s) if s.ident == "Ok" => (Facts::from([k]), Facts::new()),
            Some(s) if s.ident == "Err" && ts.elems.iter().all(matches_anything) => {
                (Facts::new(), Facts::from([k]))
            }
            _ => Default::default(),
        },
        _ => Default::default(),
    }
}

fn matches_anything(pat: &Pat) -> bool {
    match pat {
        Pat::Wild(_) | Pat::Rest(_) => true,
        // `Err(NotFound)` names a constant or unit variant
        Pat::Ident(p) if p.ident.to_string().starts_with(char::is_uppercase) => false,
        Pat::Ident(p) => p.subpat.as_ref().map_or(true, |(_, sub)| matches_anything(sub)),
        Pat::Paren(p) => matches_anything(&p.pat),
        Pat::Type(t) => matches_anything(&t.pat),
        _ => false,
    }
}

/// Keys possibly written anywhere inside `block` (assignment or `&mut` borrow).
pub(crate) fn assigned_in_block(block: &syn::Block) -> Facts {
    let mut collector = Assigned(Facts::new());
    collector.visit_block(block);
    collector.0
}

pub(crate) fn assigned_in_expr(expr: &Expr) -> Facts {
    let mut collector = Assigned(Facts::new());
    collector.visit_expr(expr);
    collector.0
}

struct Assigned(Facts);

impl<'ast> Visit<'ast> for Assigned {
    fn visit_expr_assign(&mut self, e: &'ast syn::ExprAssign) {
        if let Some(k) = key(&e.left) {
            self.0.insert(k);
        }
        visit::visit_expr_assign(self, e);
    }

    fn visit_expr_reference(&mut self, e: &'ast syn::ExprReference) {
        if e.mutability.is_some() {
            if let Some(k) = key(&e.expr) {
                self.0.insert(k);
            }
        }
        visit::visit_expr_reference(self, e);
    }

    fn visit_item(&mut self, _: &'ast syn::Item) {}
}

/// Whether a `break` inside `body` leaves the loop labelled `label`.
pub(crate) fn breaks_out(body: &syn::Block, label: Option<&Lifetime>) -> bool {
    let mut finder = BreakFinder { label: label.map(|l| l.ident.to_string()), depth: 0, found: false };
    finder.visit_block(body);
    finder.found
}

struct BreakFinder {
    label: Option<String>,
    /// Nesting of inner loops; unlabelled breaks there target the inner loop.
    depth: usize,
    found: bool,
}

impl BreakFinder {
    fn nested(&mut self, f: impl FnOnce(&mut Self)) {
        self.depth += 1;
        f(self);
        self.depth -= 1;
    }
}

impl<'ast> Visit<'ast> for BreakFinder {
    fn visit_expr_break(&mut self, e: &'ast syn::ExprBreak) {
        match (&e.label, &self.label) {
            (None, _) if self.depth == 0 => self.found = true,
            (Some(l), Some(ours)) if l.ident == ours.as_str() => self.found = true,
            _ => {}
        }
        visit::visit_expr_break(self, e);
    }

    fn visit_expr_loop(&mut self, e: &'ast syn::ExprLoop) {
        self.nested(|v| visit::visit_expr_loop(v, e));
    }

    fn visit_expr_while(&mut self, e: &'ast syn::ExprWhile) {
        self.nested(|v| visit::visit_expr_while(v, e));
    }

    fn visit_expr_for_loop(&mut self, e: &'ast syn::ExprForLoop) {
        self.nested(|v| visit::visit_expr_for_loop(v, e));
    }

    // breaks cannot cross these
    fn visit_expr_closure(&mut self, _: &'ast syn::ExprClosure) {}
    fn visit_expr_async(&mut self, _: &'ast syn::ExprAsync) {}
    fn visit_item(&mut self, _: &'ast syn::Item) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(keys: &[&str]) -> Facts {
        keys.iter().map(|k| k.to_string()).collect()
    }

    fn cond(src: &str) -> (Facts, Facts) {
        condition(&syn::parse_str::<Expr>(src).unwrap())
    }

    #[test]
    fn conditions_produce_branch_facts() {
        assert_eq!(cond("r.is_ok()"), (facts(&["r"]), facts(&[])));
        assert_eq!(cond("!r.is_ok()"), (facts(&[]), facts(&["r"])));
        assert_eq!(cond("self.last.is_err()"), (facts(&[]), facts(&["self.last"])));
        assert_eq!(cond("a.is_ok() && b.is_ok()"), (facts(&["a", "b"]), facts(&[])));
        assert_eq!(cond("a.is_err() || b.is_err()"), (facts(&[]), facts(&["a", "b"])));
        assert_eq!(cond("a.is_ok() || b.is_ok()"), (facts(&[]), facts(&[])));
        let if_let = |src: &str| {
            let Expr::If(e) = syn::parse_str::<Expr>(src).unwrap() else {
                panic!("not an if");
            };
            condition(&e.cond)
        };
        assert_eq!(if_let("if let Ok(v) = &r {}"), (facts(&["r"]), facts(&[])));
        assert_eq!(if_let("if let Err(_) = &r {}"), (facts(&[]), facts(&["r"])));
        assert_eq!(if_let("if let Err(e) = &self.last {}"), (facts(&[]), facts(&["self.last"])));
        assert_eq!(if_let("if let Err(..) = r {}"), (facts(&[]), facts(&["r"])));
        assert_eq!(if_let("if let Err(NotFound) = &r {}"), (facts(&[]), facts(&[])));
        assert_eq!(if_let("if let Err(Error { .. }) = &r {}"), (facts(&[]), facts(&[])));
        assert_eq!(cond("r.as_ref().is_ok()"), (facts(&["r"]), facts(&[])));
    }

    #[test]
    fn meet_ignores_diverged_paths() {
        let a = Flow::Reachable(facts(&["r", "s"]));
        let b = Flow::Reachable(facts(&["s"]));
        assert_eq!(a.clone().meet(b), Flow::Reachable(facts(&["s"])));
        assert_eq!(a.clone().meet(Flow::Diverged), a);
        assert_eq!(Flow::Diverged.meet(Flow::Diverged), Flow::Diverged);
    }

    #[test]
    fn kill_removes_paths_through_the_key() {
        let mut f = facts(&["self", "self.last", "selfish", "other"]);
        kill(&mut f, "self");
        assert_eq!(f, facts(&["selfish", "other"]));
    }

    #[test]
    fn assignments_and_mut_borrows_are_collected() {
        let block: syn::Block =
            syn::parse_str("{ r = fetch(); refresh(&mut self.cache); let t = &s; }").unwrap();
        assert_eq!(assigned_in_block(&block), facts(&["r", "self.cache"]));
    }

    #[test]
    fn break_targets_are_resolved() {
        let body = |src: &str| syn::parse_str::<syn::Block>(src).unwrap();
        assert!(breaks_out(&body("{ if x { break; } }"), None));
        assert!(!breaks_out(&body("{ for i in v { break; } }"), None));
        let outer: Lifetime = syn::parse_str("'outer").unwrap();
        assert!(breaks_out(&body("{ for i in v { break 'outer; } }"), Some(&outer)));
        assert!(!breaks_out(&body("{ let f = || loop { break }; }"), None));
    }

    #[test]
    fn process_exit_diverges() {
        assert!(is_diverging_call(&syn::parse_str("std::process::exit").unwrap()));
        assert!(!is_diverging_call(&syn::parse_str("exit").unwrap()));
    }
}
