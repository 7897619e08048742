//! Flow-sensitive walk over one file.
//!
//! Statements are visited in execution order while two pieces of state are threaded through:
//! the lexical scopes (for expression shapes) and the success facts of [`guard`]. Each check in
//! [`rules`] runs at the node it cares about with the state that holds there.

use syn::punctuated::Punctuated;
use syn::{
    Attribute, Block, Expr, ExprAssign, ExprBinary, ExprCall, ExprClosure, ExprForLoop, ExprIf,
    ExprLoop, ExprMatch, ExprMethodCall, ExprWhile, ImplItem, Item, Local, Macro, Pat, Signature,
    Stmt, TraitItem,
};

use crate::config::LintConfig;
use crate::diagnostic::Diagnostic;
use crate::guard::{self, Facts, Flow};
use crate::rules::{self, Context};
use crate::semantic::{pattern_names, Scopes, SemanticModel, Shape, TypeEnv};

pub(crate) fn check_file(
    file: &syn::File,
    model: &SemanticModel,
    config: &LintConfig,
    path: &str,
) -> Vec<Diagnostic> {
    let mut walker = Walker {
        cx: Context { config, model, file: path },
        scopes: Scopes::default(),
        diagnostics: Vec::new(),
    };
    for item in &file.items {
        walker.item(item);
    }
    walker.diagnostics
}

struct Walker<'a> {
    cx: Context<'a>,
    scopes: Scopes,
    diagnostics: Vec<Diagnostic>,
}

fn is_test_only(attrs: &[Attribute]) -> bool {
    attrs.iter().any(|attr| {
        let path = attr.path();
        if path.segments.last().is_some_and(|s| s.ident == "test") {
            return true;
        }
        match &attr.meta {
            syn::Meta::List(list) if path.is_ident("cfg") => list.tokens.to_string() == "test",
            _ => false,
        }
    })
}

impl Walker<'_> {
    fn report(&mut self, diagnostic: Option<Diagnostic>) {
        if let Some(d) = diagnostic {
            tracing::trace!(rule = %d.rule, line = d.line, "diagnostic");
            self.diagnostics.push(d);
        }
    }

    fn env(&self) -> TypeEnv<'_> {
        TypeEnv { model: self.cx.model, scopes: &self.scopes }
    }

    fn skipped(&self, attrs: &[Attribute]) -> bool {
        !self.cx.config.include_tests && is_test_only(attrs)
    }

    fn item(&mut self, item: &Item) {
        match item {
            Item::Fn(f) if !self.skipped(&f.attrs) => self.function(&f.sig, &f.block),
            Item::Impl(imp) if !self.skipped(&imp.attrs) => {
                for member in &imp.items {
                    if let ImplItem::Fn(f) = member {
                        if !self.skipped(&f.attrs) {
                            self.function(&f.sig, &f.block);
                        }
                    }
                }
            }
            Item::Trait(t) if !self.skipped(&t.attrs) => {
                for member in &t.items {
                    if let TraitItem::Fn(f) = member {
                        if let Some(block) = &f.default {
                            self.function(&f.sig, block);
                        }
                    }
                }
            }
            Item::Mod(m) if !self.skipped(&m.attrs) => {
                if let Some((_, items)) = &m.content {
                    for item in items {
                        self.item(item);
                    }
                }
            }
            Item::Const(c) => self.detached(|w| w.expr(&c.expr, &Facts::new())),
            Item::Static(s) => self.detached(|w| w.expr(&s.expr, &Facts::new())),
            _ => {}
        }
    }

    /// Run `f` with fresh scopes; items do not see the locals around them.
    fn detached(&mut self, f: impl FnOnce(&mut Self) -> Flow) {
        let saved = std::mem::take(&mut self.scopes);
        self.scopes.push();
        let _ = f(self);
        self.scopes = saved;
    }

    fn function(&mut self, sig: &Signature, body: &Block) {
        self.detached(|w| {
            let mut facts = Facts::new();
            for input in &sig.inputs {
                if let syn::FnArg::Typed(param) = input {
                    let shape = w.cx.model.type_shape(&param.ty);
                    w.bind_pattern(&param.pat, shape, &mut facts);
                }
            }
            w.block(body, facts)
        });
    }

    /// Run `f` in a new scope; facts about names bound there do not survive it.
    fn scoped(&mut self, f: impl FnOnce(&mut Self) -> Flow) -> Flow {
        self.scopes.push();
        let mut flow = f(self);
        for name in self.scopes.pop() {
            flow.kill(&name);
        }
        flow
    }

    fn bind_pattern(&mut self, pat: &Pat, shape: Shape, facts: &mut Facts) {
        match pat {
            Pat::Type(typed) => {
                let shape = self.cx.model.type_shape(&typed.ty);
                self.bind_pattern(&typed.pat, shape, facts);
            }
            Pat::Ident(ident) if ident.subpat.is_none() => {
                let name = ident.ident.to_string();
                guard::kill(facts, &name);
                self.scopes.bind(name, shape);
            }
            _ => {
                for name in pattern_names(pat) {
                    guard::kill(facts, &name);
                    self.scopes.bind(name, Shape::Other);
                }
            }
        }
    }

    /// Bindings introduced by `let` conditions of an `if` or `while`.
    fn bind_condition(&mut self, cond: &Expr, facts: &mut Facts) {
        match cond {
            Expr::Let(l) => self.bind_pattern(&l.pat, Shape::Other, facts),
            Expr::Binary(b) if matches!(b.op, syn::BinOp::And(_)) => {
                self.bind_condition(&b.left, facts);
                self.bind_condition(&b.right, facts);
            }
            _ => {}
        }
    }

    fn block(&mut self, block: &Block, facts: Facts) -> Flow {
        self.scoped(|w| {
            let mut facts = facts;
            let mut diverged = false;
            for stmt in &block.stmts {
                match w.stmt(stmt, &facts) {
                    Flow::Reachable(next) => facts = next,
                    Flow::Diverged => diverged = true,
                }
            }
            if diverged {
                Flow::Diverged
            } else {
                Flow::Reachable(facts)
            }
        })
    }

    fn stmt(&mut self, stmt: &Stmt, facts: &Facts) -> Flow {
        match stmt {
            Stmt::Local(local) => self.local(local, facts),
            Stmt::Item(item) => {
                self.item(item);
                Flow::Reachable(facts.clone())
            }
            Stmt::Expr(expr, semi) => {
                if semi.is_some() {
                    let d = rules::unconsumed::check(&self.cx, &self.env(), expr);
                    self.report(d);
                }
                self.expr(expr, facts)
            }
            Stmt::Macro(m) => self.mac(&m.mac, facts),
        }
    }

    fn local(&mut self, local: &Local, facts: &Facts) -> Flow {
        let mut facts = facts.clone();
        let mut shape = Shape::Other;
        let mut diverged = false;
        if let Some(init) = &local.init {
            if init.diverge.is_none() {
                shape = self.env().shape(&init.expr);
            }
            match self.expr(&init.expr, &facts) {
                Flow::Reachable(next) => facts = next,
                Flow::Diverged => diverged = true,
            }
            if let Some((_, otherwise)) = &init.diverge {
                let _ = self.expr(otherwise, &facts);
            }
        }
        self.bind_pattern(&local.pat, shape, &mut facts);
        if diverged {
            Flow::Diverged
        } else {
            Flow::Reachable(facts)
        }
    }

    fn sequence<'e>(&mut self, exprs: impl IntoIterator<Item = &'e Expr>, facts: &Facts) -> Flow {
        let mut facts = facts.clone();
        for expr in exprs {
            match self.expr(expr, &facts) {
                Flow::Reachable(next) => facts = next,
                Flow::Diverged => return Flow::Diverged,
            }
        }
        Flow::Reachable(facts)
    }

    fn expr(&mut self, expr: &Expr, facts: &Facts) -> Flow {
        match expr {
            Expr::If(e) => self.if_expr(e, facts),
            Expr::Match(e) => self.match_expr(e, facts),
            Expr::Block(e) => self.block(&e.block, facts.clone()),
            Expr::Unsafe(e) => self.block(&e.block, facts.clone()),
            Expr::Const(e) => self.block(&e.block, facts.clone()),
            Expr::Loop(e) => self.loop_expr(e, facts),
            Expr::While(e) => self.while_expr(e, facts),
            Expr::ForLoop(e) => self.for_expr(e, facts),
            Expr::Closure(e) => {
                self.closure(e, facts);
                Flow::Reachable(facts.clone())
            }
            Expr::Async(e) => {
                let _ = self.block(&e.block, facts.clone());
                Flow::Reachable(facts.clone())
            }
            Expr::TryBlock(e) => {
                let _ = self.block(&e.block, facts.clone());
                Flow::Reachable(facts.clone())
            }
            Expr::Return(e) => {
                if let Some(value) = &e.expr {
                    let _ = self.expr(value, facts);
                }
                Flow::Diverged
            }
            Expr::Break(e) => {
                if let Some(value) = &e.expr {
                    let _ = self.expr(value, facts);
                }
                Flow::Diverged
            }
            Expr::Continue(_) => Flow::Diverged,
            Expr::Macro(e) => self.mac(&e.mac, facts),
            Expr::Assign(e) => self.assign(e, facts),
            Expr::Binary(e) => self.binary(e, facts),
            Expr::MethodCall(e) => self.method_call(e, facts),
            Expr::Call(e) => self.call(e, facts),
            Expr::Reference(e) => {
                let mut flow = self.expr(&e.expr, facts);
                if e.mutability.is_some() {
                    if let Some(k) = guard::key(&e.expr) {
                        flow.kill(&k);
                    }
                }
                flow
            }
            Expr::Let(e) => self.expr(&e.expr, facts),
            Expr::Array(e) => self.sequence(&e.elems, facts),
            Expr::Tuple(e) => self.sequence(&e.elems, facts),
            Expr::Await(e) => self.expr(&e.base, facts),
            Expr::Cast(e) => self.expr(&e.expr, facts),
            Expr::Field(e) => self.expr(&e.base, facts),
            Expr::Index(e) => self.sequence([&*e.expr, &*e.index], facts),
            Expr::Paren(e) => self.expr(&e.expr, facts),
            Expr::Group(e) => self.expr(&e.expr, facts),
            Expr::Range(e) => {
                self.sequence(e.start.iter().chain(e.end.iter()).map(|b| &**b), facts)
            }
            Expr::Repeat(e) => self.sequence([&*e.expr, &*e.len], facts),
            Expr::Struct(e) => self.sequence(
                e.fields.iter().map(|f| &f.expr).chain(e.rest.iter().map(|r| &**r)),
                facts,
            ),
            Expr::Try(e) => self.expr(&e.expr, facts),
            Expr::Unary(e) => self.expr(&e.expr, facts),
            Expr::Yield(e) => self.sequence(e.expr.iter().map(|b| &**b), facts),
            _ => Flow::Reachable(facts.clone()),
        }
    }

    fn if_expr(&mut self, e: &ExprIf, facts: &Facts) -> Flow {
        let Flow::Reachable(after_cond) = self.expr(&e.cond, facts) else {
            return Flow::Diverged;
        };
        let (when_true, when_false) = guard::condition(&e.cond);

        let then_flow = self.scoped(|w| {
            let mut facts = guard::union(&after_cond, &when_true);
            w.bind_condition(&e.cond, &mut facts);
            w.block(&e.then_branch, facts)
        });
        let else_facts = guard::union(&after_cond, &when_false);
        let else_flow = match &e.else_branch {
            Some((_, otherwise)) => self.expr(otherwise, &else_facts),
            None => Flow::Reachable(else_facts),
        };
        then_flow.meet(else_flow)
    }

    fn match_expr(&mut self, e: &ExprMatch, facts: &Facts) -> Flow {
        let Flow::Reachable(after) = self.expr(&e.expr, facts) else {
            return Flow::Diverged;
        };
        let mut joined: Option<Flow> = None;
        for arm in &e.arms {
            let flow = self.scoped(|w| {
                let mut facts = after.clone();
                w.bind_pattern(&arm.pat, Shape::Other, &mut facts);
                if let Some((_, guard_expr)) = &arm.guard {
                    let (when_true, _) = guard::condition(guard_expr);
                    match w.expr(guard_expr, &facts) {
                        Flow::Reachable(next) => facts = guard::union(&next, &when_true),
                        Flow::Diverged => return Flow::Diverged,
                    }
                }
                w.expr(&arm.body, &facts)
            });
            joined = Some(match joined {
                None => flow,
                Some(acc) => acc.meet(flow),
            });
        }
        // a match without arms is on an uninhabited type
        joined.unwrap_or(Flow::Diverged)
    }

    fn loop_expr(&mut self, e: &ExprLoop, facts: &Facts) -> Flow {
        let mut entry = facts.clone();
        for k in guard::assigned_in_block(&e.body) {
            guard::kill(&mut entry, &k);
        }
        let _ = self.block(&e.body, entry.clone());
        if guard::breaks_out(&e.body, e.label.as_ref().map(|l| &l.name)) {
            Flow::Reachable(entry)
        } else {
            Flow::Diverged
        }
    }

    fn while_expr(&mut self, e: &ExprWhile, facts: &Facts) -> Flow {
        let mut entry = facts.clone();
        for k in guard::assigned_in_block(&e.body).into_iter().chain(guard::assigned_in_expr(&e.cond)) {
            guard::kill(&mut entry, &k);
        }
        let Flow::Reachable(after_cond) = self.expr(&e.cond, &entry) else {
            return Flow::Diverged;
        };
        let (when_true, when_false) = guard::condition(&e.cond);
        let _ = self.scoped(|w| {
            let mut facts = guard::union(&after_cond, &when_true);
            w.bind_condition(&e.cond, &mut facts);
            w.block(&e.body, facts)
        });
        if guard::breaks_out(&e.body, e.label.as_ref().map(|l| &l.name)) {
            Flow::Reachable(after_cond)
        } else {
            // the only way out is the condition turning false
            Flow::Reachable(guard::union(&after_cond, &when_false))
        }
    }

    fn for_expr(&mut self, e: &ExprForLoop, facts: &Facts) -> Flow {
        let Flow::Reachable(after_iter) = self.expr(&e.expr, facts) else {
            return Flow::Diverged;
        };
        let mut entry = after_iter;
        for k in guard::assigned_in_block(&e.body) {
            guard::kill(&mut entry, &k);
        }
        let _ = self.scoped(|w| {
            let mut facts = entry.clone();
            w.bind_pattern(&e.pat, Shape::Other, &mut facts);
            w.block(&e.body, facts)
        });
        Flow::Reachable(entry)
    }

    fn closure(&mut self, e: &ExprClosure, facts: &Facts) {
        let _ = self.scoped(|w| {
            let mut facts = facts.clone();
            for input in &e.inputs {
                w.bind_pattern(input, Shape::Other, &mut facts);
            }
            w.expr(&e.body, &facts)
        });
    }

    fn mac(&mut self, mac: &Macro, facts: &Facts) -> Flow {
        let args = mac.parse_body_with(Punctuated::<Expr, syn::Token![,]>::parse_terminated).ok();
        let flow = match &args {
            Some(args) => self.sequence(args, facts),
            None => Flow::Reachable(facts.clone()),
        };
        if guard::is_diverging_macro(mac) {
            return Flow::Diverged;
        }
        match (flow, args.as_ref().and_then(|a| a.first())) {
            // `assert!` only continues when its condition held
            (Flow::Reachable(mut after), Some(cond)) if mac.path.is_ident("assert") => {
                after.extend(guard::condition(cond).0);
                Flow::Reachable(after)
            }
            (flow, _) => flow,
        }
    }

    fn assign(&mut self, e: &ExprAssign, facts: &Facts) -> Flow {
        let Flow::Reachable(mut after) = self.expr(&e.right, facts) else {
            return Flow::Diverged;
        };
        match guard::key(&e.left) {
            Some(k) => {
                guard::kill(&mut after, &k);
                if guard::is_ok_constructor(&e.right) {
                    after.insert(k);
                }
                Flow::Reachable(after)
            }
            None => self.expr(&e.left, &after),
        }
    }

    fn binary(&mut self, e: &ExprBinary, facts: &Facts) -> Flow {
        let Flow::Reachable(after_left) = self.expr(&e.left, facts) else {
            return Flow::Diverged;
        };
        let short_circuit = match e.op {
            syn::BinOp::And(_) => Some(guard::condition(&e.left).0),
            syn::BinOp::Or(_) => Some(guard::condition(&e.left).1),
            _ => None,
        };
        match short_circuit {
            Some(extra) => {
                let _ = self.expr(&e.right, &guard::union(&after_left, &extra));
                // the right side may not run at all
                let mut after = after_left;
                for k in guard::assigned_in_expr(&e.right) {
                    guard::kill(&mut after, &k);
                }
                Flow::Reachable(after)
            }
            None => self.expr(&e.right, &after_left),
        }
    }

    fn method_call(&mut self, e: &ExprMethodCall, facts: &Facts) -> Flow {
        let Flow::Reachable(after_receiver) = self.expr(&e.receiver, facts) else {
            return Flow::Diverged;
        };
        let flow = self.sequence(&e.args, &after_receiver);
        let (unchecked, nested) = {
            let env = self.env();
            (
                rules::unchecked_access::check(&self.cx, &env, e, &after_receiver),
                rules::nested_result::check(&self.cx, &env, e),
            )
        };
        self.report(unchecked);
        self.report(nested);
        flow
    }

    fn call(&mut self, e: &ExprCall, facts: &Facts) -> Flow {
        let flow = self.sequence(std::iter::once(&*e.func).chain(&e.args), facts);
        let d = rules::failure_without_error::check(&self.cx, e);
        self.report(d);
        if guard::is_diverging_call(&e.func) {
            return Flow::Diverged;
        }
        flow
    }
}
