//! Compilation of snippets against the current program snapshot.
//!
//! The engine only depends on the [`Compiler`] trait: a unit plus a
//! [`CompileContext`] go in, a [`CompileOutcome`] (diagnostics, declared
//! signature, referenced and unresolved symbols, executable artifact) comes
//! out. [`SketchCompiler`] is the bundled implementation for the reference
//! language.

mod artifact;
mod check;
mod library;
mod sketch;
mod types;

pub use artifact::{ClassBytecode, ExecBody, INIT_METHOD, Member, RUN_METHOD, class_name_for};
pub use library::{BUILTIN_CLASSES, static_members};
pub use sketch::SketchCompiler;
pub use types::{BUILTIN_THROWABLES, Ty, builtin_super, is_builtin_throwable, qualified_exception_name};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::analysis::{SnippetKind, VarKind};
use crate::syntax::Span;
use crate::syntax::ast::TypeDeclKind;

/// Compiles one unit against a snapshot of the accepted program.
pub trait Compiler: Send {
    fn compile(&self, unit: &CompileUnit, ctx: &CompileContext) -> CompileOutcome;
}

/// Unit handed to a [`Compiler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileUnit {
    pub snippet_id: String,
    pub source: String,
    pub kind: SnippetKind,
    /// Declared name; the synthesized name for temporaries.
    pub name: Option<String>,
}

/// A message attached to a snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: String,
    pub message: String,
    pub is_error: bool,
    pub start: usize,
    pub end: usize,
    pub position: usize,
}

impl Diagnostic {
    pub fn error(code: &str, message: impl Into<String>, span: Span) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            is_error: true,
            start: span.start,
            end: span.end,
            position: span.start,
        }
    }

    pub fn warning(code: &str, message: impl Into<String>, span: Span) -> Self {
        Self {
            is_error: false,
            ..Self::error(code, message, span)
        }
    }
}

/// A named program element that snippets declare and reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Symbol {
    Var(String),
    Method(String),
    Type(String),
}

impl Symbol {
    pub fn name(&self) -> &str {
        match self {
            Symbol::Var(n) | Symbol::Method(n) | Symbol::Type(n) => n,
        }
    }

    /// Human form, e.g. `variable x`.
    pub fn describe(&self) -> String {
        match self {
            Symbol::Var(n) => format!("variable {n}"),
            Symbol::Method(n) => format!("method {n}()"),
            Symbol::Type(n) => format!("class {n}"),
        }
    }
}

/// Where an unresolved reference occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Site {
    /// Declared type, method signature, supertypes or member signatures.
    Header,
    /// Method bodies, constructors and initializers.
    Body,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unresolved {
    pub symbol: Symbol,
    pub site: Site,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarSig {
    pub name: String,
    pub ty: Ty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSig {
    pub name: String,
    pub params: Vec<Ty>,
    pub ret: Ty,
    /// Written parameter types, the overload identity (`int,String`).
    pub sig: String,
    pub is_static: bool,
    pub is_abstract: bool,
}

impl MethodSig {
    pub fn display(&self) -> String {
        let params: Vec<_> = self.params.iter().map(Ty::to_string).collect();
        format!("{}({})", self.name, params.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSig {
    pub name: String,
    pub ty: Ty,
    pub is_static: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSig {
    pub name: String,
    pub kind: TypeDeclKind,
    pub is_abstract: bool,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<FieldSig>,
    pub methods: Vec<MethodSig>,
    pub ctors: Vec<MethodSig>,
    pub components: Vec<FieldSig>,
    pub constants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSig {
    pub path: String,
    pub is_static: bool,
    pub on_demand: bool,
}

impl ImportSig {
    pub fn simple_name(&self) -> Option<&str> {
        if self.on_demand {
            None
        } else {
            self.path.rsplit('.').next()
        }
    }
}

/// Signature a persistent snippet contributes to the program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Declaration {
    Import(ImportSig),
    Type(TypeSig),
    Method(MethodSig),
    Var(VarSig),
}

impl Declaration {
    /// Symbol other snippets reference this declaration by.
    pub fn provides(&self) -> Option<Symbol> {
        match self {
            Declaration::Var(v) => Some(Symbol::Var(v.name.clone())),
            Declaration::Method(m) => Some(Symbol::Method(m.name.clone())),
            Declaration::Type(t) => Some(Symbol::Type(t.name.clone())),
            Declaration::Import(i) if !i.is_static => {
                i.simple_name().map(|n| Symbol::Type(n.to_string()))
            }
            Declaration::Import(_) => None,
        }
    }

    /// Display signature, e.g. `int mu()` or `class Point`.
    pub fn signature(&self) -> String {
        match self {
            Declaration::Var(v) => format!("{} {}", v.ty, v.name),
            Declaration::Method(m) => format!("{} {}", m.ret, m.display()),
            Declaration::Type(t) => format!("{} {}", t.kind.keyword(), t.name),
            Declaration::Import(i) => {
                let stat = if i.is_static { "static " } else { "" };
                let star = if i.on_demand { ".*" } else { "" };
                format!("import {stat}{}{star}", i.path)
            }
        }
    }
}

/// Immutable view of the declarations visible to a compilation.
#[derive(Debug, Clone, Default)]
pub struct CompileContext {
    vars: FxHashMap<String, VarSig>,
    methods: FxHashMap<String, Vec<MethodSig>>,
    types: FxHashMap<String, TypeSig>,
    imports: Vec<ImportSig>,
}

impl CompileContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_declarations<'a>(decls: impl IntoIterator<Item = &'a Declaration>) -> Self {
        let mut ctx = Self::new();
        for decl in decls {
            ctx.insert(decl.clone());
        }
        ctx
    }

    /// Add a declaration, replacing one with the same identity.
    pub fn insert(&mut self, decl: Declaration) {
        match decl {
            Declaration::Var(v) => {
                self.vars.insert(v.name.clone(), v);
            }
            Declaration::Method(m) => {
                let overloads = self.methods.entry(m.name.clone()).or_default();
                overloads.retain(|o| o.sig != m.sig);
                overloads.push(m);
            }
            Declaration::Type(t) => {
                self.types.insert(t.name.clone(), t);
            }
            Declaration::Import(i) => {
                if !self.imports.contains(&i) {
                    self.imports.push(i);
                }
            }
        }
    }

    /// Snapshot without the given symbols.
    pub fn without(&self, removed: &[Symbol]) -> CompileContext {
        let mut ctx = self.clone();
        for symbol in removed {
            match symbol {
                Symbol::Var(n) => {
                    ctx.vars.remove(n);
                }
                Symbol::Method(n) => {
                    ctx.methods.remove(n);
                }
                Symbol::Type(n) => {
                    ctx.types.remove(n);
                    ctx.imports.retain(|i| i.simple_name() != Some(n.as_str()));
                }
            }
        }
        ctx
    }

    pub fn var(&self, name: &str) -> Option<&VarSig> {
        self.vars.get(name)
    }

    pub fn methods(&self, name: &str) -> &[MethodSig] {
        self.methods.get(name).map_or(&[], Vec::as_slice)
    }

    pub fn type_sig(&self, name: &str) -> Option<&TypeSig> {
        self.types.get(name)
    }

    pub fn imports(&self) -> &[ImportSig] {
        &self.imports
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
            && self.methods.is_empty()
            && self.types.is_empty()
            && self.imports.is_empty()
    }
}

/// Everything a compilation produces.
#[derive(Debug, Clone, Default)]
pub struct CompileOutcome {
    pub diagnostics: Vec<Diagnostic>,
    pub declaration: Option<Declaration>,
    /// Resolved references to program symbols, in source order.
    pub references: Vec<Symbol>,
    /// Unresolved references, in source order, deduplicated.
    pub unresolved: Vec<Unresolved>,
    pub artifact: Option<ClassBytecode>,
    /// Static type of expressions and temporaries; `Void` marks an
    /// expression that is really a statement.
    pub value_type: Option<Ty>,
}

impl CompileOutcome {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.is_error)
    }

    pub fn unresolved_names(&self) -> Vec<String> {
        self.unresolved
            .iter()
            .map(|u| u.symbol.name().to_string())
            .collect()
    }

    pub fn has_header_unresolved(&self) -> bool {
        self.unresolved.iter().any(|u| u.site == Site::Header)
    }
}

/// True for kinds whose unresolved references are errors.
pub fn unresolved_is_error(kind: SnippetKind) -> bool {
    matches!(
        kind,
        SnippetKind::Expression(_)
            | SnippetKind::Statement
            | SnippetKind::Erroneous
            | SnippetKind::Var(VarKind::TempVarExpression)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, ty: Ty) -> Declaration {
        Declaration::Var(VarSig {
            name: name.into(),
            ty,
        })
    }

    fn method(name: &str, sig: &str) -> Declaration {
        Declaration::Method(MethodSig {
            name: name.into(),
            params: Vec::new(),
            ret: Ty::Int,
            sig: sig.into(),
            is_static: true,
            is_abstract: false,
        })
    }

    #[test]
    fn test_overloads_replace_by_signature() {
        let mut ctx = CompileContext::new();
        ctx.insert(method("f", ""));
        ctx.insert(method("f", "int"));
        ctx.insert(method("f", ""));
        assert_eq!(ctx.methods("f").len(), 2);
    }

    #[test]
    fn test_without_is_pure() {
        let ctx = CompileContext::from_declarations(&[var("x", Ty::Int), var("y", Ty::Long)]);
        let reduced = ctx.without(&[Symbol::Var("x".into())]);
        assert!(reduced.var("x").is_none());
        assert!(reduced.var("y").is_some());
        assert!(ctx.var("x").is_some());
    }

    #[test]
    fn test_signatures() {
        assert_eq!(var("x", Ty::Int).signature(), "int x");
        assert_eq!(method("mu", "").signature(), "int mu()");
        assert_eq!(
            Declaration::Import(ImportSig {
                path: "java.util".into(),
                is_static: false,
                on_demand: true,
            })
            .signature(),
            "import java.util.*"
        );
    }

    #[test]
    fn test_import_provides_simple_name() {
        let import = Declaration::Import(ImportSig {
            path: "java.util.List".into(),
            is_static: false,
            on_demand: false,
        });
        assert_eq!(import.provides(), Some(Symbol::Type("List".into())));
    }
}
