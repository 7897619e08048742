//! Per-file semantic model.
//!
//! The analyzer has no type checker, so "is this expression a Result" is answered from what the
//! file itself declares: signatures of functions and methods, named struct fields, and the local
//! bindings in scope at the point of use. Names declared more than once with different shapes
//! are treated as unknown. Unknown never produces a diagnostic.
//!
//! Method and field signatures are keyed by name only, so they are consulted only when the
//! receiver is `self` or a value of a type the file declares. `map.insert(k, v)` on a std map
//! stays unknown even when some local type has a Result-returning `insert`.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use syn::punctuated::Punctuated;
use syn::visit::{self, Visit};
use syn::{
    Expr, Field, GenericArgument, ImplItemFn, ItemEnum, ItemFn, ItemStruct, ItemTrait, ItemType,
    ItemUnion, Pat, PathArguments, ReturnType, Signature, Stmt, TraitItemFn, Type, TypeParamBound,
};

use crate::config::LintConfig;

/// What the analyzer knows about a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// A Result value.
    Result,
    /// A future that resolves to a Result once awaited.
    FutureOfResult,
    /// A value of a type declared in the analyzed file (or `self`).
    Declared,
    /// Anything else, including "not known".
    Other,
}

/// Combinators that turn a Result into another Result.
const RESULT_PRESERVING: &[&str] = &[
    "map",
    "map_err",
    "and_then",
    "or_else",
    "inspect",
    "inspect_err",
    "or",
    "and",
    "as_ref",
    "as_mut",
    "as_deref",
    "as_deref_mut",
    "clone",
    "cloned",
    "copied",
    "context",
    "with_context",
];

/// `TryFutureExt` combinators that keep a future of a Result.
const FUTURE_RESULT_PRESERVING: &[&str] =
    &["map_ok", "map_err", "and_then", "or_else", "inspect_ok", "inspect_err", "err_into"];

/// Declarations collected from one file.
#[derive(Debug, Clone)]
pub struct SemanticModel {
    functions: HashMap<String, Shape>,
    methods: HashMap<String, Shape>,
    fields: HashMap<String, Shape>,
    types: HashSet<String>,
    config: LintConfig,
}

impl SemanticModel {
    pub fn build(file: &syn::File, config: &LintConfig) -> Self {
        let mut model = Self {
            functions: HashMap::new(),
            methods: HashMap::new(),
            fields: HashMap::new(),
            types: HashSet::new(),
            config: config.clone(),
        };
        // type names first: field and signature shapes depend on them
        let mut names = TypeNames(&mut model.types);
        names.visit_file(file);
        let mut collector = Collector { model: &mut model };
        collector.visit_file(file);
        tracing::trace!(
            types = model.types.len(),
            functions = model.functions.len(),
            methods = model.methods.len(),
            fields = model.fields.len(),
            "semantic model built"
        );
        model
    }

    pub fn function(&self, name: &str) -> Shape {
        self.functions.get(name).copied().unwrap_or(Shape::Other)
    }

    pub fn method(&self, name: &str) -> Shape {
        self.methods.get(name).copied().unwrap_or(Shape::Other)
    }

    pub fn field(&self, name: &str) -> Shape {
        self.fields.get(name).copied().unwrap_or(Shape::Other)
    }

    /// Whether `name` is `Self` or a struct, enum, union, trait or alias declared in the file.
    pub fn is_declared_type(&self, name: &str) -> bool {
        name == "Self" || self.types.contains(name)
    }

    /// Shape of values of type `ty`.
    pub fn type_shape(&self, ty: &Type) -> Shape {
        match ty {
            Type::Paren(p) => self.type_shape(&p.elem),
            Type::Group(g) => self.type_shape(&g.elem),
            Type::Reference(r) => match self.type_shape(&r.elem) {
                Shape::Declared => Shape::Declared,
                _ => Shape::Other,
            },
            Type::Path(p) if p.qself.is_none() => {
                let Some(last) = p.path.segments.last() else {
                    return Shape::Other;
                };
                let name = last.ident.to_string();
                if self.config.is_result_type(&name) {
                    return Shape::Result;
                }
                if self.is_declared_type(&name) {
                    return Shape::Declared;
                }
                let PathArguments::AngleBracketed(args) = &last.arguments else {
                    return Shape::Other;
                };
                let mut types = args.args.iter().filter_map(|arg| match arg {
                    GenericArgument::Type(ty) => Some(ty),
                    _ => None,
                });
                match name.as_str() {
                    "BoxFuture" | "LocalBoxFuture" => match types.next() {
                        Some(out) if self.type_shape(out) == Shape::Result => Shape::FutureOfResult,
                        _ => Shape::Other,
                    },
                    "Pin" | "Box" | "Arc" | "Rc" => match types.next().map(|t| self.type_shape(t)) {
                        Some(Shape::FutureOfResult) if matches!(name.as_str(), "Pin" | "Box") => {
                            Shape::FutureOfResult
                        }
                        Some(Shape::Declared) => Shape::Declared,
                        _ => Shape::Other,
                    },
                    _ => Shape::Other,
                }
            }
            Type::ImplTrait(t) => self.bounds_shape(&t.bounds),
            Type::TraitObject(t) => self.bounds_shape(&t.bounds),
            _ => Shape::Other,
        }
    }

    /// `impl Future<Output = Result<..>>`, or a trait object of a trait the file declares.
    fn bounds_shape(&self, bounds: &Punctuated<TypeParamBound, syn::Token![+]>) -> Shape {
        let mut shape = Shape::Other;
        for bound in bounds {
            let TypeParamBound::Trait(bound) = bound else {
                continue;
            };
            let Some(seg) = bound.path.segments.last() else {
                continue;
            };
            if seg.ident != "Future" {
                if self.types.contains(&seg.ident.to_string()) {
                    shape = Shape::Declared;
                }
                continue;
            }
            let PathArguments::AngleBracketed(args) = &seg.arguments else {
                continue;
            };
            for arg in &args.args {
                if let GenericArgument::AssocType(assoc) = arg {
                    if assoc.ident == "Output" && self.type_shape(&assoc.ty) == Shape::Result {
                        return Shape::FutureOfResult;
                    }
                }
            }
        }
        shape
    }

    /// Shape of a call to a function with this signature.
    pub fn signature_shape(&self, sig: &Signature) -> Shape {
        let ReturnType::Type(_, ty) = &sig.output else {
            return Shape::Other;
        };
        match (sig.asyncness.is_some(), self.type_shape(ty)) {
            (true, Shape::Result) => Shape::FutureOfResult,
            (true, _) => Shape::Other,
            (false, shape) => shape,
        }
    }
}

fn record(map: &mut HashMap<String, Shape>, name: String, shape: Shape) {
    match map.entry(name) {
        Entry::Vacant(slot) => {
            slot.insert(shape);
        }
        Entry::Occupied(mut slot) => {
            if *slot.get() != shape {
                slot.insert(Shape::Other);
            }
        }
    }
}

struct TypeNames<'m>(&'m mut HashSet<String>);

impl<'ast> Visit<'ast> for TypeNames<'_> {
    fn visit_item_struct(&mut self, i: &'ast ItemStruct) {
        self.0.insert(i.ident.to_string());
        visit::visit_item_struct(self, i);
    }

    fn visit_item_enum(&mut self, i: &'ast ItemEnum) {
        self.0.insert(i.ident.to_string());
        visit::visit_item_enum(self, i);
    }

    fn visit_item_union(&mut self, i: &'ast ItemUnion) {
        self.0.insert(i.ident.to_string());
        visit::visit_item_union(self, i);
    }

    fn visit_item_trait(&mut self, i: &'ast ItemTrait) {
        self.0.insert(i.ident.to_string());
        visit::visit_item_trait(self, i);
    }

    fn visit_item_type(&mut self, i: &'ast ItemType) {
        self.0.insert(i.ident.to_string());
        visit::visit_item_type(self, i);
    }
}

struct Collector<'m> {
    model: &'m mut SemanticModel,
}

impl<'ast> Visit<'ast> for Collector<'_> {
    fn visit_item_fn(&mut self, f: &'ast ItemFn) {
        let shape = self.model.signature_shape(&f.sig);
        record(&mut self.model.functions, f.sig.ident.to_string(), shape);
        visit::visit_item_fn(self, f);
    }

    fn visit_impl_item_fn(&mut self, f: &'ast ImplItemFn) {
        let shape = self.model.signature_shape(&f.sig);
        record(&mut self.model.methods, f.sig.ident.to_string(), shape);
        visit::visit_impl_item_fn(self, f);
    }

    fn visit_trait_item_fn(&mut self, f: &'ast TraitItemFn) {
        let shape = self.model.signature_shape(&f.sig);
        record(&mut self.model.methods, f.sig.ident.to_string(), shape);
        visit::visit_trait_item_fn(self, f);
    }

    fn visit_field(&mut self, f: &'ast Field) {
        if let Some(ident) = &f.ident {
            let shape = self.model.type_shape(&f.ty);
            record(&mut self.model.fields, ident.to_string(), shape);
        }
        visit::visit_field(self, f);
    }
}

/// Lexical scopes of local bindings.
#[derive(Debug, Default)]
pub(crate) struct Scopes {
    frames: Vec<Vec<(String, Shape)>>,
}

impl Scopes {
    pub fn push(&mut self) {
        self.frames.push(Vec::new());
    }

    /// Leave the innermost scope, returning the names it bound.
    pub fn pop(&mut self) -> Vec<String> {
        self.frames
            .pop()
            .map(|frame| frame.into_iter().map(|(name, _)| name).collect())
            .unwrap_or_default()
    }

    pub fn bind(&mut self, name: String, shape: Shape) {
        if self.frames.is_empty() {
            self.push();
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.push((name, shape));
        }
    }

    /// Innermost binding of `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<Shape> {
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev())
            .find(|(bound, _)| bound == name)
            .map(|(_, shape)| *shape)
    }
}

/// Answers "what shape is this expression" at one point of the walk.
pub(crate) struct TypeEnv<'a> {
    pub model: &'a SemanticModel,
    pub scopes: &'a Scopes,
}

impl TypeEnv<'_> {
    pub fn shape(&self, expr: &Expr) -> Shape {
        self.shape_shadowed(expr, &[])
    }

    /// Shape of `expr` where `shadowed` names are bound to unknown values.
    fn shape_shadowed(&self, expr: &Expr, shadowed: &[String]) -> Shape {
        match expr {
            Expr::Paren(e) => self.shape_shadowed(&e.expr, shadowed),
            Expr::Group(e) => self.shape_shadowed(&e.expr, shadowed),
            Expr::Path(p) if p.qself.is_none() => match p.path.get_ident() {
                Some(ident) => {
                    let name = ident.to_string();
                    if shadowed.contains(&name) {
                        Shape::Other
                    } else if let Some(shape) = self.scopes.lookup(&name) {
                        shape
                    } else if name == "self" {
                        Shape::Declared
                    } else {
                        Shape::Other
                    }
                }
                None => Shape::Other,
            },
            Expr::Field(f) => match (&f.member, self.shape_shadowed(&f.base, shadowed)) {
                (syn::Member::Named(ident), Shape::Declared) => {
                    self.model.field(&ident.to_string())
                }
                _ => Shape::Other,
            },
            Expr::Struct(s) => match s.path.segments.last() {
                Some(seg) if self.model.is_declared_type(&seg.ident.to_string()) => Shape::Declared,
                _ => Shape::Other,
            },
            Expr::Call(call) => self.call_shape(&call.func),
            Expr::MethodCall(m) => {
                let name = m.method.to_string();
                match self.shape_shadowed(&m.receiver, shadowed) {
                    Shape::Result if RESULT_PRESERVING.contains(&name.as_str()) => Shape::Result,
                    Shape::FutureOfResult if FUTURE_RESULT_PRESERVING.contains(&name.as_str()) => {
                        Shape::FutureOfResult
                    }
                    Shape::Declared => self.model.method(&name),
                    _ => Shape::Other,
                }
            }
            Expr::Await(a) => match self.shape_shadowed(&a.base, shadowed) {
                Shape::FutureOfResult => Shape::Result,
                _ => Shape::Other,
            },
            Expr::Block(b) => self.tail_shape(&b.block, shadowed),
            Expr::If(i) => {
                let then_shape = self.tail_shape(&i.then_branch, shadowed);
                match &i.else_branch {
                    Some((_, else_expr))
                        if then_shape == Shape::Result
                            && self.shape_shadowed(else_expr, shadowed) == Shape::Result =>
                    {
                        Shape::Result
                    }
                    _ => Shape::Other,
                }
            }
            Expr::Match(m) => {
                let mut any_result = false;
                for arm in &m.arms {
                    match self.shape_shadowed(&arm.body, shadowed) {
                        Shape::Result => any_result = true,
                        _ if diverges_trivially(&arm.body) => {}
                        _ => return Shape::Other,
                    }
                }
                if any_result {
                    Shape::Result
                } else {
                    Shape::Other
                }
            }
            _ => Shape::Other,
        }
    }

    fn tail_shape(&self, block: &syn::Block, shadowed: &[String]) -> Shape {
        let mut shadowed = shadowed.to_vec();
        for stmt in &block.stmts {
            if let Stmt::Local(local) = stmt {
                shadowed.extend(pattern_names(&local.pat));
            }
        }
        match block.stmts.last() {
            Some(Stmt::Expr(tail, None)) => self.shape_shadowed(tail, &shadowed),
            _ => Shape::Other,
        }
    }

    fn call_shape(&self, func: &Expr) -> Shape {
        let Expr::Path(p) = func else {
            return Shape::Other;
        };
        let Some(last) = p.path.segments.last() else {
            return Shape::Other;
        };
        let name = last.ident.to_string();
        if name == "Ok" || name == "Err" {
            return Shape::Result;
        }
        if p.path.segments.len() == 1 {
            // a local closure or fn pointer with the same name hides the item
            if self.scopes.lookup(&name).is_some() {
                return Shape::Other;
            }
            return self.model.function(&name);
        }
        let segments = &p.path.segments;
        let qualifier = segments[segments.len() - 2].ident.to_string();
        if self.model.is_declared_type(&qualifier) {
            // `Repo::open(..)`, `Self::new()`
            self.model.method(&name)
        } else if qualifier.starts_with(char::is_uppercase) {
            // associated function of a type this file does not declare
            Shape::Other
        } else {
            self.model.function(&name)
        }
    }

    /// Whether `callee`, used as the argument of `.map`, produces a Result.
    pub fn returns_result(&self, callee: &Expr) -> bool {
        match callee {
            Expr::Paren(e) => self.returns_result(&e.expr),
            Expr::Closure(closure) => {
                if let ReturnType::Type(_, ty) = &closure.output {
                    return self.model.type_shape(ty) == Shape::Result;
                }
                let params: Vec<String> = closure.inputs.iter().flat_map(pattern_names).collect();
                self.shape_shadowed(&closure.body, &params) == Shape::Result
            }
            Expr::Path(_) => self.call_shape(callee) == Shape::Result,
            _ => false,
        }
    }
}

/// `return`, `break`, `continue` and panicking macros.
pub(crate) fn diverges_trivially(expr: &Expr) -> bool {
    match expr {
        Expr::Return(_) | Expr::Break(_) | Expr::Continue(_) => true,
        Expr::Macro(m) => crate::guard::is_diverging_macro(&m.mac),
        _ => false,
    }
}

/// Every identifier a pattern binds.
pub(crate) fn pattern_names(pat: &Pat) -> Vec<String> {
    struct Names(Vec<String>);
    impl<'ast> Visit<'ast> for Names {
        fn visit_pat_ident(&mut self, p: &'ast syn::PatIdent) {
            self.0.push(p.ident.to_string());
            visit::visit_pat_ident(self, p);
        }
    }
    let mut names = Names(Vec::new());
    names.visit_pat(pat);
    names.0
}
