//! Name resolution and type checking over the syntax tree.
//!
//! The checker binds names, calls and constructors in place so the runtime
//! can execute the tree without a second lookup pass. Implicit primitive
//! widening is made explicit by wrapping the converted expression in a
//! `Cast` node.

use rustc_hash::FxHashMap;

use super::library::{self, Lookup};
use super::{
    CompileContext, Declaration, Diagnostic, FieldSig, MethodSig, Site, Symbol, Ty, TypeSig,
    Unresolved, builtin_super, is_builtin_throwable,
};
use crate::syntax::Span;
use crate::syntax::ast::*;
use crate::syntax::parser::is_primitive;

/// Enclosing type of the code being checked.
#[derive(Debug, Clone)]
pub(super) struct ClassFrame {
    pub name: String,
    pub is_static: bool,
    pub in_ctor: bool,
}

/// What a checker found, ready to be folded into a `CompileOutcome`.
#[derive(Debug, Default)]
pub(super) struct Findings {
    pub diagnostics: Vec<Diagnostic>,
    pub references: Vec<Symbol>,
    pub unresolved: Vec<Unresolved>,
}

/// A name used to the left of `.` that denotes a type rather than a value.
enum Qualifier {
    User(String),
    Builtin(String),
    Library(String),
    Unresolved,
}

/// Receiver of a method call after qualifier detection.
enum Receiver {
    Implicit,
    Stream(String),
    Type(Qualifier),
    Value(Ty),
}

pub(super) struct Checker {
    ctx: CompileContext,
    diagnostics: Vec<Diagnostic>,
    unresolved: Vec<Unresolved>,
    references: Vec<Symbol>,
    site: Site,
    scopes: Vec<FxHashMap<String, Ty>>,
    class: Option<ClassFrame>,
    /// Return type of the enclosing method; `None` at snippet level.
    ret: Option<Ty>,
    loops: usize,
    type_params: Vec<String>,
    own: Option<Symbol>,
    report_unresolved: bool,
}

impl Checker {
    pub(super) fn new(ctx: &CompileContext, own: Option<Symbol>, report_unresolved: bool) -> Self {
        Self {
            ctx: ctx.clone(),
            diagnostics: Vec::new(),
            unresolved: Vec::new(),
            references: Vec::new(),
            site: Site::Body,
            scopes: vec![FxHashMap::default()],
            class: None,
            ret: None,
            loops: 0,
            type_params: Vec::new(),
            own,
            report_unresolved,
        }
    }

    /// Make a declaration visible to the rest of the check.
    pub(super) fn declare(&mut self, decl: Declaration) {
        self.ctx.insert(decl);
    }

    pub(super) fn set_site(&mut self, site: Site) {
        self.site = site;
    }

    pub(super) fn error(&mut self, code: &str, message: impl Into<String>, span: Span) {
        self.diagnostics.push(Diagnostic::error(code, message, span));
    }

    pub(super) fn finish(self) -> Findings {
        let mut raw = self.unresolved;
        raw.sort_by_key(|u| u.span.start);
        let mut unresolved: Vec<Unresolved> = Vec::new();
        for u in raw {
            match unresolved.iter_mut().find(|p| p.symbol == u.symbol) {
                Some(prev) => {
                    if u.site == Site::Header {
                        prev.site = Site::Header;
                    }
                }
                None => unresolved.push(u),
            }
        }

        let mut diagnostics = self.diagnostics;
        if self.report_unresolved {
            for u in &unresolved {
                diagnostics.push(Diagnostic::error(
                    "cant.resolve",
                    format!("cannot find symbol\n  symbol:   {}", u.symbol.describe()),
                    u.span,
                ));
            }
        }
        diagnostics.sort_by_key(|d| d.start);

        Findings {
            diagnostics,
            references: self.references,
            unresolved,
        }
    }

    fn reference(&mut self, symbol: Symbol) {
        if self.own.as_ref() == Some(&symbol) || self.references.contains(&symbol) {
            return;
        }
        self.references.push(symbol);
    }

    fn missing(&mut self, symbol: Symbol, span: Span) {
        self.unresolved.push(Unresolved {
            symbol,
            site: self.site,
            span,
        });
    }

    // ---- types ---------------------------------------------------------

    pub(super) fn resolve_type(&mut self, t: &TypeRef) -> Ty {
        for arg in &t.args {
            self.resolve_type(arg);
        }
        let mut ty = self.resolve_base(t);
        for _ in 0..t.dims {
            ty = Ty::Array(Box::new(ty));
        }
        ty
    }

    fn resolve_base(&mut self, t: &TypeRef) -> Ty {
        let name = t.name.as_str();
        if name == "?" {
            return Ty::Opaque(name.to_string());
        }
        if is_primitive(name) {
            return Ty::builtin(name).unwrap_or(Ty::Error);
        }
        if name.contains('.') {
            if let Some(builtin) = name.strip_prefix("java.lang.").and_then(Ty::builtin) {
                return builtin;
            }
            return Ty::Opaque(t.base().to_string());
        }
        if self.type_params.iter().any(|p| p == name) {
            return Ty::Opaque(name.to_string());
        }
        if self.ctx.type_sig(name).is_some() {
            self.reference(Symbol::Type(name.to_string()));
            return Ty::Class(name.to_string());
        }
        if let Some(builtin) = Ty::builtin(name) {
            return builtin;
        }
        if self.imported_type(name) {
            return Ty::Opaque(name.to_string());
        }
        self.missing(Symbol::Type(name.to_string()), t.span);
        Ty::Error
    }

    fn imported_type(&mut self, name: &str) -> bool {
        let single = self
            .ctx
            .imports()
            .iter()
            .any(|i| !i.is_static && i.simple_name() == Some(name));
        if single {
            self.reference(Symbol::Type(name.to_string()));
            return true;
        }
        self.ctx.imports().iter().any(|i| !i.is_static && i.on_demand)
    }

    /// The type and its supertypes, nearest first. User types only.
    fn lineage(&self, class: &str) -> Vec<TypeSig> {
        let mut out: Vec<TypeSig> = Vec::new();
        let mut queue = vec![class.to_string()];
        while !queue.is_empty() {
            let name = queue.remove(0);
            if out.iter().any(|t| t.name == name) {
                continue;
            }
            if let Some(sig) = self.ctx.type_sig(&name) {
                queue.extend(sig.superclass.iter().cloned());
                queue.extend(sig.interfaces.iter().cloned());
                out.push(sig.clone());
            }
        }
        out
    }

    fn is_subclass(&self, from: &str, to: &str) -> bool {
        let mut seen: Vec<String> = Vec::new();
        let mut stack = vec![from.to_string()];
        while let Some(name) = stack.pop() {
            if name == to {
                return true;
            }
            if seen.contains(&name) {
                continue;
            }
            if let Some(sig) = self.ctx.type_sig(&name) {
                stack.extend(sig.superclass.iter().cloned());
                stack.extend(sig.interfaces.iter().cloned());
            } else if let Some(Some(sup)) = builtin_super(&name) {
                stack.push(sup.to_string());
            }
            seen.push(name);
        }
        false
    }

    fn is_throwable(&self, ty: &Ty) -> bool {
        match ty {
            Ty::Class(name) => self.is_subclass(name, "Throwable"),
            Ty::Null => true,
            other => other.is_lenient(),
        }
    }

    fn assignable(&self, from: &Ty, to: &Ty) -> bool {
        if from.is_lenient() || to.is_lenient() || from == to {
            return true;
        }
        if *from == Ty::Void || *to == Ty::Void {
            return false;
        }
        if from.widens_to(to) {
            return true;
        }
        match (from, to) {
            (Ty::Null, to) => to.is_reference(),
            (_, Ty::Object) => true,
            (Ty::Class(a), Ty::Class(b)) => self.is_subclass(a, b),
            (Ty::Array(a), Ty::Array(b)) => {
                a.is_reference() && b.is_reference() && self.assignable(a, b)
            }
            _ => false,
        }
    }

    /// Check `from` converts to `to`, making widening explicit.
    fn coerce(&mut self, e: &mut Expr, from: &Ty, to: &Ty) {
        if !self.assignable(from, to) {
            self.error(
                "incompatible.types",
                format!("incompatible types: {from} cannot be converted to {to}"),
                e.span,
            );
        } else if from != to && from.widens_to(to) {
            wrap_cast(e, to);
        }
    }

    fn require_boolean(&mut self, ty: &Ty, span: Span) {
        if *ty != Ty::Boolean && !ty.is_lenient() {
            self.error(
                "incompatible.types",
                format!("incompatible types: {ty} cannot be converted to boolean"),
                span,
            );
        }
    }

    // ---- members -------------------------------------------------------

    fn find_field(&self, class: &str, name: &str) -> Option<FieldSig> {
        for sig in self.lineage(class) {
            if let Some(f) = sig.fields.iter().chain(&sig.components).find(|f| f.name == name) {
                return Some(f.clone());
            }
            if sig.constants.iter().any(|c| c == name) {
                return Some(FieldSig {
                    name: name.to_string(),
                    ty: Ty::Class(sig.name.clone()),
                    is_static: true,
                });
            }
        }
        None
    }

    /// Every overload of `name` visible in `class`, paired with its declaring
    /// type. Overrides hide the overridden method.
    fn find_methods(&self, class: &str, name: &str) -> Vec<(String, MethodSig)> {
        let mut out: Vec<(String, MethodSig)> = Vec::new();
        for sig in self.lineage(class) {
            for m in sig.methods.iter().filter(|m| m.name == name) {
                if !out.iter().any(|(_, o)| o.sig == m.sig) {
                    out.push((sig.name.clone(), m.clone()));
                }
            }
        }
        out
    }

    fn choose(&self, cands: &[(String, MethodSig)], args: &[Ty]) -> Option<(String, MethodSig)> {
        let arity = |m: &MethodSig| m.params.len() == args.len();
        let exact = cands.iter().find(|(_, m)| {
            arity(m)
                && m.params
                    .iter()
                    .zip(args)
                    .all(|(p, a)| p == a || a.is_lenient() || p.is_lenient())
        });
        exact
            .or_else(|| {
                cands.iter().find(|(_, m)| {
                    arity(m) && m.params.iter().zip(args).all(|(p, a)| self.assignable(a, p))
                })
            })
            .cloned()
    }

    fn apply_args(&mut self, args: &mut [Expr], tys: &[Ty], params: &[Ty]) {
        for ((arg, ty), param) in args.iter_mut().zip(tys).zip(params) {
            self.coerce(arg, ty, param);
        }
    }

    fn cant_apply(&mut self, what: &str, params: Option<&[Ty]>, args: &[Ty], span: Span) {
        let found: Vec<_> = args.iter().map(Ty::to_string).collect();
        let required = match params {
            Some(p) if p.is_empty() => "no arguments".to_string(),
            Some(p) => p.iter().map(Ty::to_string).collect::<Vec<_>>().join(","),
            None => "(none)".to_string(),
        };
        let found = if found.is_empty() {
            "no arguments".to_string()
        } else {
            found.join(",")
        };
        self.error(
            "cant.apply",
            format!(
                "{what} cannot be applied to given types;\n  required: {required}\n  found:    {found}"
            ),
            span,
        );
    }

    fn cant_resolve(&mut self, what: String, span: Span) {
        self.error(
            "cant.resolve",
            format!("cannot find symbol\n  symbol:   {what}"),
            span,
        );
    }

    // ---- declarations --------------------------------------------------

    pub(super) fn method_sig(&mut self, m: &MethodDecl, in_interface: bool) -> MethodSig {
        let saved = self.type_params.len();
        self.type_params.extend(m.type_params.iter().cloned());
        let params = m.params.iter().map(|p| self.resolve_type(&p.ty)).collect();
        let ret = self.resolve_type(&m.ret);
        for t in &m.throws {
            self.resolve_type(t);
        }
        self.type_params.truncate(saved);
        MethodSig {
            name: m.name.clone(),
            params,
            ret,
            sig: m.param_sig(),
            is_static: m.modifiers.is_static,
            is_abstract: m.body.is_none() || (in_interface && m.modifiers.is_abstract),
        }
    }

    /// Signature of a type declaration. Resolves at the header site.
    pub(super) fn type_sig(&mut self, decl: &TypeDecl) -> TypeSig {
        self.site = Site::Header;
        self.type_params = decl.type_params.clone();
        let is_interface = matches!(
            decl.kind,
            TypeDeclKind::Interface | TypeDeclKind::Annotation
        );

        let (class_refs, iface_refs): (&[TypeRef], &[TypeRef]) = match decl.kind {
            TypeDeclKind::Class => (decl.extends.as_slice(), decl.implements.as_slice()),
            TypeDeclKind::Interface | TypeDeclKind::Annotation => (&[], decl.extends.as_slice()),
            TypeDeclKind::Enum | TypeDeclKind::Record => (&[], decl.implements.as_slice()),
        };

        let mut superclass = None;
        for r in class_refs {
            match self.resolve_type(r) {
                Ty::Class(name) if name == decl.name => self.error(
                    "cyclic.inheritance",
                    format!("cyclic inheritance involving {name}"),
                    r.span,
                ),
                Ty::Class(name) => {
                    let is_iface = self
                        .ctx
                        .type_sig(&name)
                        .is_some_and(|t| t.kind == TypeDeclKind::Interface);
                    if is_iface {
                        self.error("intf.expected", "no interface expected here", r.span);
                    } else {
                        superclass = Some(name);
                    }
                }
                Ty::Object | Ty::Error | Ty::Opaque(_) => {}
                other => self.error(
                    "cant.inherit",
                    format!("unexpected type\n  required: class\n  found:    {other}"),
                    r.span,
                ),
            }
        }

        let mut interfaces = Vec::new();
        for r in iface_refs {
            if let Ty::Class(name) = self.resolve_type(r) {
                let is_iface = self
                    .ctx
                    .type_sig(&name)
                    .is_some_and(|t| t.kind == TypeDeclKind::Interface);
                if is_iface {
                    interfaces.push(name);
                } else {
                    self.error("intf.expected", "interface expected here", r.span);
                }
            }
        }

        let mut fields: Vec<FieldSig> = Vec::new();
        for f in &decl.fields {
            let ty = match &f.var.ty {
                Some(t) => self.resolve_type(t),
                None => {
                    self.error("var.not.allowed", "'var' is not allowed here", f.var.span);
                    Ty::Error
                }
            };
            if fields.iter().any(|o| o.name == f.var.name) {
                self.error(
                    "already.defined",
                    format!(
                        "variable {} is already defined in {} {}",
                        f.var.name,
                        decl.kind.keyword(),
                        decl.name
                    ),
                    f.var.span,
                );
            }
            fields.push(FieldSig {
                name: f.var.name.clone(),
                ty,
                is_static: f.modifiers.is_static || is_interface,
            });
        }

        let components = decl
            .components
            .iter()
            .map(|p| FieldSig {
                name: p.name.clone(),
                ty: self.resolve_type(&p.ty),
                is_static: false,
            })
            .collect();

        let mut methods: Vec<MethodSig> = Vec::new();
        for m in &decl.methods {
            let sig = self.method_sig(m, is_interface);
            if methods.iter().any(|o| o.name == sig.name && o.sig == sig.sig) {
                self.error(
                    "already.defined",
                    format!(
                        "method {} is already defined in {} {}",
                        sig.display(),
                        decl.kind.keyword(),
                        decl.name
                    ),
                    m.span,
                );
            }
            methods.push(sig);
        }

        let ctors = decl
            .ctors
            .iter()
            .map(|c| MethodSig {
                name: decl.name.clone(),
                params: c.params.iter().map(|p| self.resolve_type(&p.ty)).collect(),
                ret: Ty::Void,
                sig: param_sig(&c.params),
                is_static: false,
                is_abstract: false,
            })
            .collect();

        TypeSig {
            name: decl.name.clone(),
            kind: decl.kind,
            is_abstract: decl.modifiers.is_abstract || is_interface,
            superclass,
            interfaces,
            fields,
            methods,
            ctors,
            components,
            constants: decl.constants.clone(),
        }
    }

    /// Check initializers, constructors and method bodies of a type whose
    /// signature is already declared.
    pub(super) fn type_bodies(&mut self, decl: &mut TypeDecl) {
        self.site = Site::Body;
        self.type_params = decl.type_params.clone();
        let Some(sig) = self.ctx.type_sig(&decl.name).cloned() else {
            return;
        };
        let is_interface = sig.kind == TypeDeclKind::Interface;

        for f in &mut decl.fields {
            let field = sig.fields.iter().find(|s| s.name == f.var.name).cloned();
            let ty = field.map_or(Ty::Error, |s| s.ty);
            if let Some(init) = &mut f.var.init {
                self.enter(
                    Some(ClassFrame {
                        name: sig.name.clone(),
                        is_static: f.modifiers.is_static || is_interface,
                        in_ctor: false,
                    }),
                    None,
                    Vec::new(),
                );
                self.expr_expecting(init, &ty);
            }
            f.var.ty = Some(ty.to_type_ref(f.var.span));
        }

        for c in &mut decl.ctors {
            let key = param_sig(&c.params);
            let params = sig
                .ctors
                .iter()
                .find(|s| s.sig == key)
                .map(|s| s.params.clone())
                .unwrap_or_default();
            let bound = c.params.iter().map(|p| p.name.clone()).zip(params).collect();
            self.enter(
                Some(ClassFrame {
                    name: sig.name.clone(),
                    is_static: false,
                    in_ctor: true,
                }),
                Some(Ty::Void),
                bound,
            );
            self.block(&mut c.body);
        }

        for m in &mut decl.methods {
            let key = m.param_sig();
            let Some(msig) = sig
                .methods
                .iter()
                .find(|s| s.name == m.name && s.sig == key)
                .cloned()
            else {
                continue;
            };
            let frame = ClassFrame {
                name: sig.name.clone(),
                is_static: m.modifiers.is_static,
                in_ctor: false,
            };
            self.method_body(m, &msig, Some(frame));
        }
    }

    /// Check a method body against its already resolved signature.
    pub(super) fn method_body(
        &mut self,
        m: &mut MethodDecl,
        sig: &MethodSig,
        frame: Option<ClassFrame>,
    ) {
        self.site = Site::Body;
        let saved = self.type_params.len();
        self.type_params.extend(m.type_params.iter().cloned());
        let mut bound = Vec::new();
        for (p, ty) in m.params.iter().zip(&sig.params) {
            if bound.iter().any(|(n, _): &(String, Ty)| *n == p.name) {
                self.error(
                    "already.defined",
                    format!("variable {} is already defined in method {}", p.name, m.name),
                    p.ty.span,
                );
            }
            bound.push((p.name.clone(), ty.clone()));
        }
        if let Some(body) = &mut m.body {
            self.enter(frame, Some(sig.ret.clone()), bound);
            self.block(body);
            if sig.ret != Ty::Void && can_complete(body) {
                let end = m.span.end;
                self.error(
                    "missing.ret.stmt",
                    "missing return statement",
                    Span::new(end.saturating_sub(1), end),
                );
            }
        }
        self.type_params.truncate(saved);
    }

    fn enter(&mut self, frame: Option<ClassFrame>, ret: Option<Ty>, params: Vec<(String, Ty)>) {
        self.class = frame;
        self.ret = ret;
        self.loops = 0;
        self.scopes = vec![params.into_iter().collect()];
    }

    /// A snippet-level variable. Returns its declared or inferred type.
    pub(super) fn top_var(&mut self, decl: &mut VarDecl) -> Ty {
        self.enter(None, None, Vec::new());
        let declared = decl.ty.as_ref().map(|t| {
            self.site = Site::Header;
            self.resolve_type(t)
        });
        self.site = if declared.is_some() {
            Site::Body
        } else {
            Site::Header
        };
        let ty = self.var_type(decl, declared);
        self.site = Site::Body;
        ty
    }

    pub(super) fn top_expression(&mut self, e: &mut Expr) -> Ty {
        self.enter(None, None, Vec::new());
        self.site = Site::Body;
        self.expr(e)
    }

    pub(super) fn top_statement(&mut self, s: &mut Stmt) {
        self.enter(None, None, Vec::new());
        self.site = Site::Body;
        self.stmt(s);
    }

    fn var_type(&mut self, decl: &mut VarDecl, declared: Option<Ty>) -> Ty {
        let ty = match (declared, &mut decl.init) {
            (Some(ty), Some(init)) => {
                self.expr_expecting(init, &ty);
                ty
            }
            (Some(ty), None) => ty,
            (None, Some(init)) => {
                let ty = self.expr(init);
                match ty {
                    Ty::Null => {
                        self.error(
                            "cant.infer.local.var.type",
                            format!(
                                "cannot infer type for local variable {}\n  (variable initializer is 'null')",
                                decl.name
                            ),
                            decl.span,
                        );
                        Ty::Error
                    }
                    Ty::Void => {
                        self.error(
                            "cant.infer.local.var.type",
                            format!(
                                "cannot infer type for local variable {}\n  (variable initializer is 'void')",
                                decl.name
                            ),
                            decl.span,
                        );
                        Ty::Error
                    }
                    other => other,
                }
            }
            (None, None) => Ty::Error,
        };
        if ty == Ty::Void {
            self.error("void.not.allowed.here", "'void' type not allowed here", decl.span);
        }
        decl.ty = Some(ty.to_type_ref(decl.span));
        ty
    }

    // ---- statements ----------------------------------------------------

    fn block(&mut self, stmts: &mut [Stmt]) {
        self.scopes.push(FxHashMap::default());
        for s in stmts {
            self.stmt(s);
        }
        self.scopes.pop();
    }

    fn nested(&mut self, s: &mut Stmt) {
        self.scopes.push(FxHashMap::default());
        self.stmt(s);
        self.scopes.pop();
    }

    fn loop_body(&mut self, s: &mut Stmt) {
        self.loops += 1;
        self.nested(s);
        self.loops -= 1;
    }

    fn local_var(&mut self, decl: &mut VarDecl) {
        let declared = decl.ty.as_ref().map(|t| self.resolve_type(t));
        let ty = self.var_type(decl, declared);
        if self.scopes.iter().any(|s| s.contains_key(&decl.name)) {
            self.error(
                "already.defined",
                format!("variable {} is already defined", decl.name),
                decl.span,
            );
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(decl.name.clone(), ty);
        }
    }

    fn stmt(&mut self, s: &mut Stmt) {
        let span = s.span;
        match &mut s.kind {
            StmtKind::Empty | StmtKind::Break | StmtKind::Continue if self.loops > 0 => {}
            StmtKind::Empty => {}
            StmtKind::Break => self.error("break.outside.switch.loop", "break outside switch or loop", span),
            StmtKind::Continue => self.error("cont.outside.loop", "continue outside of loop", span),
            StmtKind::Block(stmts) => self.block(stmts),
            StmtKind::Local(decls) => {
                for decl in decls {
                    self.local_var(decl);
                }
            }
            StmtKind::Expr(e) => {
                self.expr(e);
            }
            StmtKind::If { cond, then, other } => {
                let ct = self.expr(cond);
                self.require_boolean(&ct, cond.span);
                self.nested(then);
                if let Some(other) = other {
                    self.nested(other);
                }
            }
            StmtKind::While { cond, body } => {
                let ct = self.expr(cond);
                self.require_boolean(&ct, cond.span);
                self.loop_body(body);
            }
            StmtKind::DoWhile { body, cond } => {
                self.loop_body(body);
                let ct = self.expr(cond);
                self.require_boolean(&ct, cond.span);
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                self.scopes.push(FxHashMap::default());
                for s in init.iter_mut() {
                    self.stmt(s);
                }
                if let Some(cond) = cond {
                    let ct = self.expr(cond);
                    self.require_boolean(&ct, cond.span);
                }
                for u in update.iter_mut() {
                    self.expr(u);
                }
                self.loop_body(body);
                self.scopes.pop();
            }
            StmtKind::ForEach {
                var,
                iterable,
                body,
            } => {
                let it = self.expr(iterable);
                let elem = match it {
                    Ty::Array(elem) => *elem,
                    other if other.is_lenient() => Ty::Error,
                    other => {
                        self.error(
                            "foreach.not.applicable.to.type",
                            format!("for-each not applicable to expression type\n  required: array\n  found:    {other}"),
                            iterable.span,
                        );
                        Ty::Error
                    }
                };
                let ty = match &var.ty {
                    Some(t) => {
                        let declared = self.resolve_type(t);
                        if !self.assignable(&elem, &declared) {
                            self.error(
                                "incompatible.types",
                                format!("incompatible types: {elem} cannot be converted to {declared}"),
                                var.span,
                            );
                        }
                        declared
                    }
                    None => elem,
                };
                var.ty = Some(ty.to_type_ref(var.span));
                self.scopes.push(FxHashMap::from_iter([(var.name.clone(), ty)]));
                self.loop_body(body);
                self.scopes.pop();
            }
            StmtKind::Return(value) => self.return_stmt(value.as_mut(), span),
            StmtKind::Throw(e) => {
                let ty = self.expr(e);
                if !self.is_throwable(&ty) {
                    self.error(
                        "incompatible.types",
                        format!("incompatible types: {ty} cannot be converted to Throwable"),
                        e.span,
                    );
                }
            }
            StmtKind::Try {
                body,
                catches,
                finally,
            } => {
                self.block(body);
                for c in catches.iter_mut() {
                    let mut caught = Vec::new();
                    for t in c.types.iter_mut() {
                        let ty = self.resolve_type(t);
                        if !self.is_throwable(&ty) {
                            self.error(
                                "incompatible.types",
                                format!("incompatible types: {ty} cannot be converted to Throwable"),
                                t.span,
                            );
                        }
                        *t = ty.to_type_ref(t.span);
                        caught.push(ty);
                    }
                    let ty = match caught.as_slice() {
                        [single] => single.clone(),
                        _ => Ty::Class("Throwable".to_string()),
                    };
                    self.scopes.push(FxHashMap::from_iter([(c.name.clone(), ty)]));
                    self.block(&mut c.body);
                    self.scopes.pop();
                }
                if let Some(finally) = finally {
                    self.block(finally);
                }
            }
        }
    }

    fn return_stmt(&mut self, value: Option<&mut Expr>, span: Span) {
        match (self.ret.clone(), value) {
            (None, _) => self.error("ret.outside.meth", "return outside method", span),
            (Some(Ty::Void), Some(e)) => {
                self.expr(e);
                self.error(
                    "incompatible.types",
                    "incompatible types: unexpected return value",
                    e.span,
                );
            }
            (Some(Ty::Void), None) => {}
            (Some(_), None) => self.error("missing.ret.val", "missing return value", span),
            (Some(ret), Some(e)) => {
                self.expr_expecting(e, &ret);
            }
        }
    }

    // ---- expressions ---------------------------------------------------

    /// Check `e` where a value of type `expected` is required. Array
    /// initializers are only legal here.
    fn expr_expecting(&mut self, e: &mut Expr, expected: &Ty) -> Ty {
        let span = e.span;
        if let ExprKind::ArrayLiteral(elems) = &mut e.kind {
            let mut elems = std::mem::take(elems);
            let elem = match expected {
                Ty::Array(elem) => (**elem).clone(),
                other if other.is_lenient() => Ty::Error,
                other => {
                    self.error(
                        "illegal.initializer.for.type",
                        format!("illegal initializer for {other}"),
                        span,
                    );
                    Ty::Error
                }
            };
            for x in &mut elems {
                self.expr_expecting(x, &elem);
            }
            e.kind = ExprKind::NewArray {
                elem: elem.to_type_ref(span),
                lengths: Vec::new(),
                init: Some(elems),
            };
            return Ty::Array(Box::new(elem));
        }
        let ty = self.expr(e);
        self.coerce(e, &ty, expected);
        ty
    }

    fn local(&self, name: &str) -> Option<Ty> {
        self.scopes.iter().rev().find_map(|s| s.get(name).cloned())
    }

    fn member_field(&self, name: &str) -> Option<FieldSig> {
        let frame = self.class.as_ref()?;
        self.find_field(&frame.name, name)
    }

    fn in_static_context(&self) -> bool {
        self.class.as_ref().is_none_or(|f| f.is_static)
    }

    fn expr(&mut self, e: &mut Expr) -> Ty {
        match e.kind {
            ExprKind::Call { .. } => return self.call(e),
            ExprKind::New { .. } => return self.new_object(e),
            ExprKind::Field { .. } => return self.field(e),
            _ => {}
        }
        let span = e.span;
        match &mut e.kind {
            ExprKind::Literal(lit) => match lit {
                Literal::Int(_) => Ty::Int,
                Literal::Long(_) => Ty::Long,
                Literal::Double(_) => Ty::Double,
                Literal::Bool(_) => Ty::Boolean,
                Literal::Char(_) => Ty::Char,
                Literal::Str(_) => Ty::Str,
                Literal::Null => Ty::Null,
            },
            ExprKind::Name { name, binding } => {
                let name = name.clone();
                let (ty, bound) = self.name(&name, span);
                *binding = bound;
                ty
            }
            ExprKind::This => match &self.class {
                Some(frame) if !self.in_static_context() => Ty::Class(frame.name.clone()),
                _ => {
                    self.error(
                        "non-static.cant.be.ref",
                        "non-static variable this cannot be referenced from a static context",
                        span,
                    );
                    Ty::Error
                }
            },
            ExprKind::Index { target, index } => {
                let tt = self.expr(target);
                let it = self.expr(index);
                if !it.is_lenient() && !matches!(it, Ty::Int | Ty::Char) {
                    self.error(
                        "incompatible.types",
                        format!("incompatible types: {it} cannot be converted to int"),
                        index.span,
                    );
                }
                match tt {
                    Ty::Array(elem) => *elem,
                    other if other.is_lenient() => Ty::Error,
                    other => {
                        self.error(
                            "array.req.but.found",
                            format!("array required, but {other} found"),
                            span,
                        );
                        Ty::Error
                    }
                }
            }
            ExprKind::NewArray {
                elem,
                lengths,
                init,
            } => {
                let elem_ty = self.resolve_type(elem);
                for len in lengths.iter_mut() {
                    let lt = self.expr(len);
                    if !lt.is_lenient() && !matches!(lt, Ty::Int | Ty::Char) {
                        self.error(
                            "incompatible.types",
                            format!("incompatible types: {lt} cannot be converted to int"),
                            len.span,
                        );
                    }
                }
                if let Some(items) = init {
                    for x in items.iter_mut() {
                        self.expr_expecting(x, &elem_ty);
                    }
                }
                *elem = elem_ty.to_type_ref(elem.span);
                Ty::Array(Box::new(elem_ty))
            }
            ExprKind::ArrayLiteral(items) => {
                for x in items.iter_mut() {
                    self.expr(x);
                }
                self.error(
                    "illegal.start.of.expr",
                    "array initializer is not allowed here",
                    span,
                );
                Ty::Error
            }
            ExprKind::Unary { op, operand } => {
                let op = *op;
                let t = self.expr(operand);
                self.unary_type(op, &t, span)
            }
            ExprKind::Step { target, .. } => {
                if !target.is_assignable() {
                    self.error("unexpected.type", "unexpected type\n  required: variable\n  found:    value", target.span);
                }
                let t = self.expr(target);
                if !t.is_numeric() && !t.is_lenient() {
                    self.error(
                        "operator.cant.be.applied",
                        format!("bad operand type {t} for unary operator '++'"),
                        span,
                    );
                }
                t
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let op = *op;
                let lt = self.expr(lhs);
                let rt = self.expr(rhs);
                self.binary_type(op, &lt, &rt, span)
            }
            ExprKind::Assign { target, op, value } => {
                if !target.is_assignable() {
                    self.error("unexpected.type", "unexpected type\n  required: variable\n  found:    value", target.span);
                }
                let tt = self.expr(target);
                match op {
                    None => {
                        self.expr_expecting(value, &tt);
                    }
                    Some(op) => {
                        let vt = self.expr(value);
                        let result = self.binary_type(*op, &tt, &vt, span);
                        let fits = result.is_lenient()
                            || tt.is_lenient()
                            || result == tt
                            || (result.is_numeric() && tt.is_numeric());
                        if !fits {
                            self.error(
                                "incompatible.types",
                                format!("incompatible types: {result} cannot be converted to {tt}"),
                                span,
                            );
                        }
                    }
                }
                tt
            }
            ExprKind::Conditional { cond, then, other } => {
                let ct = self.expr(cond);
                self.require_boolean(&ct, cond.span);
                let a = self.expr(then);
                let b = self.expr(other);
                self.conditional_type(a, b, then, other, span)
            }
            ExprKind::Cast { ty, expr } => {
                let target = self.resolve_type(ty);
                let et = self.expr(expr);
                let ok = et == target
                    || et.is_lenient()
                    || target.is_lenient()
                    || (et.is_numeric() && target.is_numeric())
                    || (et.is_reference() && target.is_reference())
                    || (et == Ty::Object && target.is_primitive())
                    || (et.is_primitive() && target == Ty::Object);
                if !ok {
                    self.error(
                        "incompatible.types",
                        format!("incompatible types: {et} cannot be converted to {target}"),
                        span,
                    );
                }
                *ty = target.to_type_ref(ty.span);
                target
            }
            ExprKind::InstanceOf { expr, ty } => {
                let et = self.expr(expr);
                let target = self.resolve_type(ty);
                if !et.is_reference() && !et.is_lenient() {
                    self.error(
                        "unexpected.type",
                        format!("unexpected type\n  required: reference\n  found:    {et}"),
                        expr.span,
                    );
                }
                *ty = target.to_type_ref(ty.span);
                Ty::Boolean
            }
            ExprKind::Call { .. } | ExprKind::New { .. } | ExprKind::Field { .. } => Ty::Error,
        }
    }

    fn name(&mut self, name: &str, span: Span) -> (Ty, NameRef) {
        if let Some(ty) = self.local(name) {
            return (ty, NameRef::Local);
        }
        if let Some(field) = self.member_field(name) {
            if self.in_static_context() && !field.is_static {
                self.error(
                    "non-static.cant.be.ref",
                    format!("non-static variable {name} cannot be referenced from a static context"),
                    span,
                );
            }
            return (field.ty, NameRef::Field);
        }
        if let Some(var) = self.ctx.var(name) {
            let ty = var.ty.clone();
            self.reference(Symbol::Var(name.to_string()));
            return (ty, NameRef::Global);
        }
        self.missing(Symbol::Var(name.to_string()), span);
        (Ty::Error, NameRef::Unbound)
    }

    /// Detect a type name on the left of `.`. Returns `None` when the name
    /// denotes a value.
    fn qualifier(&mut self, e: &mut Expr) -> Option<Qualifier> {
        let span = e.span;
        let ExprKind::Name { name, binding } = &mut e.kind else {
            return None;
        };
        if self.local(name).is_some()
            || self.member_field(name).is_some()
            || self.ctx.var(name).is_some()
        {
            return None;
        }
        let name = name.clone();
        if self.ctx.type_sig(&name).is_some() {
            self.reference(Symbol::Type(name.clone()));
            *binding = NameRef::Type;
            return Some(Qualifier::User(name));
        }
        if library::is_builtin_class(&name) {
            *binding = NameRef::Builtin;
            return Some(Qualifier::Builtin(name));
        }
        if is_builtin_throwable(&name) || self.imported_type(&name) {
            *binding = NameRef::Type;
            return Some(Qualifier::Library(name));
        }
        if name.starts_with(|c: char| c.is_ascii_uppercase()) {
            self.missing(Symbol::Type(name), span);
            return Some(Qualifier::Unresolved);
        }
        None
    }

    fn field(&mut self, e: &mut Expr) -> Ty {
        let span = e.span;
        let ExprKind::Field { target, name } = &mut e.kind else {
            return Ty::Error;
        };
        let name = name.clone();
        if let Some(q) = self.qualifier(target) {
            return match q {
                Qualifier::User(class) => match self.find_field(&class, &name) {
                    Some(f) if f.is_static => f.ty,
                    Some(f) => {
                        self.error(
                            "non-static.cant.be.ref",
                            format!("non-static variable {name} cannot be referenced from a static context"),
                            span,
                        );
                        f.ty
                    }
                    None => {
                        self.cant_resolve(format!("variable {name}"), span);
                        Ty::Error
                    }
                },
                Qualifier::Builtin(class) => match library::static_field(&class, &name) {
                    Some(ty) => ty,
                    None => {
                        self.cant_resolve(format!("variable {name}"), span);
                        Ty::Error
                    }
                },
                Qualifier::Library(class) => {
                    self.error(
                        "unsupported",
                        format!("library member {class}.{name} is not available"),
                        span,
                    );
                    Ty::Error
                }
                Qualifier::Unresolved => Ty::Error,
            };
        }
        let tt = self.expr(target);
        match tt {
            Ty::Array(_) if name == "length" => Ty::Int,
            Ty::Class(class) if self.ctx.type_sig(&class).is_some() => {
                match self.find_field(&class, &name) {
                    Some(f) => f.ty,
                    None => {
                        self.cant_resolve(format!("variable {name}"), span);
                        Ty::Error
                    }
                }
            }
            other if other.is_lenient() => Ty::Error,
            _ => {
                self.cant_resolve(format!("variable {name}"), span);
                Ty::Error
            }
        }
    }

    fn call(&mut self, e: &mut Expr) -> Ty {
        let span = e.span;
        let ExprKind::Call {
            target,
            name,
            args,
            resolved,
        } = &mut e.kind
        else {
            return Ty::Error;
        };
        let name = name.clone();

        let receiver = match target.as_deref_mut() {
            None => Receiver::Implicit,
            Some(t) => match system_stream(t) {
                Some(stream) => Receiver::Stream(stream),
                None => match self.qualifier(t) {
                    Some(q) => Receiver::Type(q),
                    None => Receiver::Value(self.expr(t)),
                },
            },
        };
        let tys: Vec<Ty> = args.iter_mut().map(|a| self.expr(a)).collect();

        let (bound, ty) = match receiver {
            Receiver::Implicit => self.implicit_call(&name, args, &tys, span),
            Receiver::Stream(stream) => {
                let lookup = library::static_method(&stream, &name, &tys);
                self.library_call(lookup, &format!("{stream}.{name}"), &tys, span)
            }
            Receiver::Type(Qualifier::Builtin(class)) => {
                let lookup = library::static_method(&class, &name, &tys);
                self.library_call(lookup, &format!("{class}.{name}"), &tys, span)
            }
            Receiver::Type(Qualifier::User(class)) => {
                self.static_user_call(&class, &name, args, &tys, span)
            }
            Receiver::Type(Qualifier::Library(class)) => {
                self.error(
                    "unsupported",
                    format!("library method {class}.{name} is not available"),
                    span,
                );
                (CallTarget::Unbound, Ty::Error)
            }
            Receiver::Type(Qualifier::Unresolved) => (CallTarget::Unbound, Ty::Error),
            Receiver::Value(rt) => self.instance_call(&rt, &name, args, &tys, span),
        };
        *resolved = bound;
        ty
    }

    fn library_call(
        &mut self,
        lookup: Lookup,
        what: &str,
        tys: &[Ty],
        span: Span,
    ) -> (CallTarget, Ty) {
        match lookup {
            Lookup::Found { key, ty } => (CallTarget::Builtin(key), ty),
            Lookup::Inapplicable => {
                self.cant_apply(&format!("method {what}"), None, tys, span);
                (CallTarget::Unbound, Ty::Error)
            }
            Lookup::Missing => {
                self.cant_resolve(format!("method {what}"), span);
                (CallTarget::Unbound, Ty::Error)
            }
        }
    }

    fn implicit_call(
        &mut self,
        name: &str,
        args: &mut [Expr],
        tys: &[Ty],
        span: Span,
    ) -> (CallTarget, Ty) {
        if name == "super" {
            return self.super_call(args, tys, span);
        }
        if let Some(frame) = self.class.clone() {
            let cands = self.find_methods(&frame.name, name);
            if !cands.is_empty() {
                return match self.choose(&cands, tys) {
                    Some((_, sig)) => {
                        if frame.is_static && !sig.is_static {
                            self.error(
                                "non-static.cant.be.ref",
                                format!(
                                    "non-static method {} cannot be referenced from a static context",
                                    sig.display()
                                ),
                                span,
                            );
                        }
                        self.apply_args(args, tys, &sig.params);
                        (CallTarget::Member { sig: sig.sig }, sig.ret)
                    }
                    None => {
                        let params = cands[0].1.params.clone();
                        self.cant_apply(&format!("method {name}"), Some(params.as_slice()), tys, span);
                        (CallTarget::Unbound, Ty::Error)
                    }
                };
            }
        }

        let globals: Vec<(String, MethodSig)> = self
            .ctx
            .methods(name)
            .iter()
            .map(|m| (String::new(), m.clone()))
            .collect();
        if let Some((_, sig)) = self.choose(&globals, tys) {
            self.reference(Symbol::Method(name.to_string()));
            self.apply_args(args, tys, &sig.params);
            return (CallTarget::Global { sig: sig.sig }, sig.ret);
        }

        if let Some(lookup) = self.static_import_call(name, tys) {
            return self.library_call(lookup, name, tys, span);
        }

        // A missing overload is an unresolved reference: declaring it later
        // makes the caller valid again.
        self.missing(Symbol::Method(name.to_string()), span);
        (CallTarget::Unbound, Ty::Error)
    }

    fn static_import_call(&self, name: &str, tys: &[Ty]) -> Option<Lookup> {
        for import in self.ctx.imports().iter().filter(|i| i.is_static) {
            let class_path = if import.on_demand {
                import.path.as_str()
            } else {
                match import.path.rsplit_once('.') {
                    Some((class_path, member)) if member == name => class_path,
                    _ => continue,
                }
            };
            let class = class_path.rsplit('.').next().unwrap_or(class_path);
            if library::is_builtin_class(class) {
                match library::static_method(class, name, tys) {
                    Lookup::Missing => {}
                    found => return Some(found),
                }
            }
        }
        None
    }

    fn super_call(&mut self, args: &mut [Expr], tys: &[Ty], span: Span) -> (CallTarget, Ty) {
        let frame = match &self.class {
            Some(frame) if frame.in_ctor => frame.clone(),
            _ => {
                self.error(
                    "call.must.be.first.stmt.in.ctor",
                    "call to super must be first statement in constructor",
                    span,
                );
                return (CallTarget::Unbound, Ty::Void);
            }
        };
        let superclass = self
            .ctx
            .type_sig(&frame.name)
            .and_then(|t| t.superclass.clone());
        let Some(superclass) = superclass else {
            if !tys.is_empty() {
                self.cant_apply("constructor Object", Some(&[] as &[Ty]), tys, span);
            }
            return (
                CallTarget::Super {
                    class: None,
                    sig: None,
                },
                Ty::Void,
            );
        };

        match self.ctx.type_sig(&superclass).cloned() {
            Some(sig) if sig.ctors.is_empty() => {
                if !tys.is_empty() {
                    self.cant_apply(&format!("constructor {superclass}"), Some(&[] as &[Ty]), tys, span);
                }
                (
                    CallTarget::Super {
                        class: Some(superclass),
                        sig: None,
                    },
                    Ty::Void,
                )
            }
            Some(sig) => {
                let cands: Vec<_> = sig
                    .ctors
                    .iter()
                    .map(|c| (superclass.clone(), c.clone()))
                    .collect();
                match self.choose(&cands, tys) {
                    Some((_, ctor)) => {
                        self.apply_args(args, tys, &ctor.params);
                        (
                            CallTarget::Super {
                                class: Some(superclass),
                                sig: Some(ctor.sig),
                            },
                            Ty::Void,
                        )
                    }
                    None => {
                        let params = sig.ctors[0].params.clone();
                        self.cant_apply(&format!("constructor {superclass}"), Some(params.as_slice()), tys, span);
                        (CallTarget::Unbound, Ty::Void)
                    }
                }
            }
            None => {
                if !self.throwable_ctor_args(tys) {
                    self.cant_apply(&format!("constructor {superclass}"), None, tys, span);
                }
                (
                    CallTarget::Super {
                        class: None,
                        sig: None,
                    },
                    Ty::Void,
                )
            }
        }
    }

    fn throwable_ctor_args(&self, tys: &[Ty]) -> bool {
        match tys {
            [] => true,
            [one] => self.assignable(one, &Ty::Str) || self.is_throwable(one),
            [msg, cause] => self.assignable(msg, &Ty::Str) && self.is_throwable(cause),
            _ => false,
        }
    }

    fn static_user_call(
        &mut self,
        class: &str,
        name: &str,
        args: &mut [Expr],
        tys: &[Ty],
        span: Span,
    ) -> (CallTarget, Ty) {
        let cands = self.find_methods(class, name);
        if cands.is_empty() {
            self.cant_resolve(format!("method {name}"), span);
            return (CallTarget::Unbound, Ty::Error);
        }
        match self.choose(&cands, tys) {
            Some((owner, sig)) => {
                if !sig.is_static {
                    self.error(
                        "non-static.cant.be.ref",
                        format!(
                            "non-static method {} cannot be referenced from a static context",
                            sig.display()
                        ),
                        span,
                    );
                }
                self.apply_args(args, tys, &sig.params);
                (
                    CallTarget::Static {
                        class: owner,
                        sig: sig.sig,
                    },
                    sig.ret,
                )
            }
            None => {
                let params = cands[0].1.params.clone();
                self.cant_apply(&format!("method {name}"), Some(params.as_slice()), tys, span);
                (CallTarget::Unbound, Ty::Error)
            }
        }
    }

    fn instance_call(
        &mut self,
        rt: &Ty,
        name: &str,
        args: &mut [Expr],
        tys: &[Ty],
        span: Span,
    ) -> (CallTarget, Ty) {
        let what = format!("method {name}");
        match rt {
            Ty::Str => {
                let lookup = library::string_method(name, tys);
                self.library_call(lookup, &what, tys, span)
            }
            Ty::Class(class) if self.ctx.type_sig(class).is_some() => {
                let cands = self.find_methods(class, name);
                if !cands.is_empty() {
                    return match self.choose(&cands, tys) {
                        Some((owner, sig)) => {
                            self.apply_args(args, tys, &sig.params);
                            let target = if sig.is_static {
                                CallTarget::Static {
                                    class: owner,
                                    sig: sig.sig,
                                }
                            } else {
                                CallTarget::Virtual { sig: sig.sig }
                            };
                            (target, sig.ret)
                        }
                        None => {
                            let params = cands[0].1.params.clone();
                            self.cant_apply(&what, Some(params.as_slice()), tys, span);
                            (CallTarget::Unbound, Ty::Error)
                        }
                    };
                }
                let lineage = self.lineage(class);
                if let Some(own) = lineage.first() {
                    if own.kind == TypeDeclKind::Record && tys.is_empty() {
                        if let Some(c) = own.components.iter().find(|c| c.name == name) {
                            return (
                                CallTarget::Virtual { sig: String::new() },
                                c.ty.clone(),
                            );
                        }
                    }
                }
                let is_enum = lineage.first().is_some_and(|t| t.kind == TypeDeclKind::Enum);
                let lookup = if is_enum {
                    library::enum_method(name, tys)
                } else if self.is_subclass(class, "Throwable") {
                    library::throwable_method(name, tys)
                } else {
                    Lookup::Missing
                };
                let lookup = match lookup {
                    Lookup::Missing => library::object_method(name, tys),
                    found => found,
                };
                self.library_call(lookup, &what, tys, span)
            }
            Ty::Class(_) => {
                let lookup = match library::throwable_method(name, tys) {
                    Lookup::Missing => library::object_method(name, tys),
                    found => found,
                };
                self.library_call(lookup, &what, tys, span)
            }
            Ty::Object | Ty::Array(_) => {
                let lookup = library::object_method(name, tys);
                self.library_call(lookup, &what, tys, span)
            }
            other if other.is_lenient() => (CallTarget::Unbound, Ty::Error),
            other => {
                self.error(
                    "cant.deref",
                    format!("{other} cannot be dereferenced"),
                    span,
                );
                (CallTarget::Unbound, Ty::Error)
            }
        }
    }

    fn new_object(&mut self, e: &mut Expr) -> Ty {
        let span = e.span;
        let ExprKind::New {
            class,
            args,
            resolved,
        } = &mut e.kind
        else {
            return Ty::Error;
        };
        let ty = self.resolve_type(class);
        let tys: Vec<Ty> = args.iter_mut().map(|a| self.expr(a)).collect();

        let target = match &ty {
            Ty::Class(name) => match self.ctx.type_sig(name).cloned() {
                Some(sig) => self.user_ctor(&sig, args, &tys, span),
                None => {
                    if !self.throwable_ctor_args(&tys) {
                        self.cant_apply(&format!("constructor {name}"), None, &tys, span);
                    }
                    CtorTarget::Builtin
                }
            },
            Ty::Object => {
                if !tys.is_empty() {
                    self.cant_apply("constructor Object", Some(&[] as &[Ty]), &tys, span);
                }
                CtorTarget::Builtin
            }
            Ty::Error => CtorTarget::Unbound,
            other => {
                self.error(
                    "unsupported",
                    format!("cannot instantiate {other}"),
                    span,
                );
                CtorTarget::Unbound
            }
        };
        if let Ty::Class(name) = &ty {
            class.name = name.clone();
        }
        *resolved = target;
        ty
    }

    fn user_ctor(&mut self, sig: &TypeSig, args: &mut [Expr], tys: &[Ty], span: Span) -> CtorTarget {
        let name = &sig.name;
        match sig.kind {
            TypeDeclKind::Enum => {
                self.error(
                    "enum.cant.be.instantiated",
                    "enum classes may not be instantiated",
                    span,
                );
                return CtorTarget::Unbound;
            }
            _ if sig.is_abstract => {
                self.error(
                    "abstract.cant.be.instantiated",
                    format!("{name} is abstract; cannot be instantiated"),
                    span,
                );
                return CtorTarget::Unbound;
            }
            TypeDeclKind::Record => {
                let params: Vec<Ty> = sig.components.iter().map(|c| c.ty.clone()).collect();
                let fits = params.len() == tys.len()
                    && params.iter().zip(tys).all(|(p, a)| self.assignable(a, p));
                if !fits {
                    self.cant_apply(&format!("constructor {name}"), Some(params.as_slice()), tys, span);
                    return CtorTarget::Unbound;
                }
                self.apply_args(args, tys, &params);
                return CtorTarget::Record;
            }
            _ => {}
        }
        if sig.ctors.is_empty() {
            if !tys.is_empty() {
                self.cant_apply(&format!("constructor {name}"), Some(&[] as &[Ty]), tys, span);
                return CtorTarget::Unbound;
            }
            return CtorTarget::User { sig: None };
        }
        let cands: Vec<_> = sig.ctors.iter().map(|c| (name.clone(), c.clone())).collect();
        match self.choose(&cands, tys) {
            Some((_, ctor)) => {
                self.apply_args(args, tys, &ctor.params);
                CtorTarget::User {
                    sig: Some(ctor.sig),
                }
            }
            None => {
                let params = sig.ctors[0].params.clone();
                self.cant_apply(&format!("constructor {name}"), Some(params.as_slice()), tys, span);
                CtorTarget::Unbound
            }
        }
    }

    fn unary_type(&mut self, op: UnaryOp, t: &Ty, span: Span) -> Ty {
        let (ok, result, symbol) = match op {
            UnaryOp::Neg => (t.is_numeric(), Ty::promote(t, &Ty::Int), "-"),
            UnaryOp::Plus => (t.is_numeric(), Ty::promote(t, &Ty::Int), "+"),
            UnaryOp::Not => (*t == Ty::Boolean, Ty::Boolean, "!"),
            UnaryOp::BitNot => (t.is_integral(), Ty::promote(t, &Ty::Int), "~"),
        };
        if ok {
            result
        } else if t.is_lenient() {
            if op == UnaryOp::Not {
                Ty::Boolean
            } else {
                Ty::Error
            }
        } else {
            self.error(
                "operator.cant.be.applied",
                format!("bad operand type {t} for unary operator '{symbol}'"),
                span,
            );
            Ty::Error
        }
    }

    fn binary_type(&mut self, op: BinaryOp, lt: &Ty, rt: &Ty, span: Span) -> Ty {
        use BinaryOp::*;
        let numeric = lt.is_numeric() && rt.is_numeric();
        let integral = lt.is_integral() && rt.is_integral();
        let booleans = *lt == Ty::Boolean && *rt == Ty::Boolean;
        let is_str = *lt == Ty::Str || *rt == Ty::Str;
        let result = match op {
            Add if is_str => (*lt != Ty::Void && *rt != Ty::Void).then_some(Ty::Str),
            Add | Sub | Mul | Div | Rem => numeric.then(|| Ty::promote(lt, rt)),
            Lt | Le | Gt | Ge => numeric.then_some(Ty::Boolean),
            Eq | Ne => {
                let refs = lt.is_reference() && rt.is_reference();
                (numeric || booleans || refs).then_some(Ty::Boolean)
            }
            And | Or => booleans.then_some(Ty::Boolean),
            BitAnd | BitOr | BitXor if booleans => Some(Ty::Boolean),
            BitAnd | BitOr | BitXor => integral.then(|| Ty::promote(lt, rt)),
            Shl | Shr | UShr => integral.then(|| Ty::promote(lt, &Ty::Int)),
        };
        match result {
            Some(ty) => ty,
            None if lt.is_lenient() || rt.is_lenient() => match op {
                Lt | Le | Gt | Ge | Eq | Ne | And | Or => Ty::Boolean,
                _ => Ty::Error,
            },
            None => {
                self.error(
                    "operator.cant.be.applied.1",
                    format!(
                        "bad operand types for binary operator '{}'\n  first type:  {lt}\n  second type: {rt}",
                        op.symbol()
                    ),
                    span,
                );
                Ty::Error
            }
        }
    }

    fn conditional_type(&mut self, a: Ty, b: Ty, then: &mut Expr, other: &mut Expr, span: Span) -> Ty {
        if a == b {
            return a;
        }
        if a.is_lenient() || b.is_lenient() {
            return Ty::Error;
        }
        if a.is_numeric() && b.is_numeric() {
            let ty = Ty::promote(&a, &b);
            if a != ty {
                wrap_cast(then, &ty);
            }
            if b != ty {
                wrap_cast(other, &ty);
            }
            return ty;
        }
        if a == Ty::Null && b.is_reference() {
            return b;
        }
        if b == Ty::Null && a.is_reference() {
            return a;
        }
        if a.is_reference() && b.is_reference() {
            if self.assignable(&a, &b) {
                return b;
            }
            if self.assignable(&b, &a) {
                return a;
            }
            return Ty::Object;
        }
        self.error(
            "incompatible.types",
            format!("incompatible types in conditional expression: {a} and {b}"),
            span,
        );
        Ty::Error
    }
}

/// `System.out` or `System.err` as a call receiver.
fn system_stream(e: &mut Expr) -> Option<String> {
    let ExprKind::Field { target, name } = &mut e.kind else {
        return None;
    };
    if name != "out" && name != "err" {
        return None;
    }
    let ExprKind::Name { name: class, binding } = &mut target.kind else {
        return None;
    };
    if class != "System" {
        return None;
    }
    *binding = NameRef::Builtin;
    Some(format!("System.{name}"))
}

fn wrap_cast(e: &mut Expr, to: &Ty) {
    let span = e.span;
    let inner = std::mem::replace(e, Expr::new(ExprKind::Literal(Literal::Null), span));
    *e = Expr::new(
        ExprKind::Cast {
            ty: to.to_type_ref(span),
            expr: Box::new(inner),
        },
        span,
    );
}

/// True if control can fall off the end of `stmts`.
pub(super) fn can_complete(stmts: &[Stmt]) -> bool {
    stmts.iter().all(stmt_can_complete)
}

fn stmt_can_complete(s: &Stmt) -> bool {
    match &s.kind {
        StmtKind::Return(_) | StmtKind::Throw(_) | StmtKind::Break | StmtKind::Continue => false,
        StmtKind::Block(stmts) => can_complete(stmts),
        StmtKind::If {
            then,
            other: Some(other),
            ..
        } => stmt_can_complete(then) || stmt_can_complete(other),
        StmtKind::While { cond, body } | StmtKind::DoWhile { body, cond } => {
            !is_true(cond) || breaks(body)
        }
        StmtKind::For { cond, body, .. } => cond.as_ref().is_some_and(|c| !is_true(c)) || breaks(body),
        StmtKind::Try {
            body,
            catches,
            finally,
        } => {
            let main = can_complete(body) || catches.iter().any(|c| can_complete(&c.body));
            main && finally.as_deref().is_none_or(can_complete)
        }
        _ => true,
    }
}

fn is_true(e: &Expr) -> bool {
    matches!(e.kind, ExprKind::Literal(Literal::Bool(true)))
}

/// A `break` that exits the loop whose body is `s`.
fn breaks(s: &Stmt) -> bool {
    match &s.kind {
        StmtKind::Break => true,
        StmtKind::Block(stmts) => stmts.iter().any(breaks),
        StmtKind::If { then, other, .. } => breaks(then) || other.as_deref().is_some_and(breaks),
        StmtKind::Try {
            body,
            catches,
            finally,
        } => {
            body.iter().any(breaks)
                || catches.iter().any(|c| c.body.iter().any(breaks))
                || finally.as_ref().is_some_and(|f| f.iter().any(breaks))
        }
        _ => false,
    }
}
