//! The bundled compiler for the reference snippet language.

use tracing::debug;

use super::check::{Checker, Findings};
use super::{
    ClassBytecode, CompileContext, CompileOutcome, CompileUnit, Compiler, Declaration, Diagnostic,
    ExecBody, ImportSig, Member, Site, Symbol, Ty, TypeSig, VarSig, unresolved_is_error,
};
use crate::analysis::{SnippetKind, VarKind};
use crate::syntax::ast::{Stmt, StmtKind, TypeDecl};
use crate::syntax::parser::PResult;
use crate::syntax::{ParseError, Parser, Span};

/// Parses, resolves and type checks snippets, producing bound syntax trees
/// as artifacts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SketchCompiler;

impl SketchCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl Compiler for SketchCompiler {
    fn compile(&self, unit: &CompileUnit, ctx: &CompileContext) -> CompileOutcome {
        let result = match unit.kind {
            SnippetKind::Import(_) => import(unit),
            SnippetKind::TypeDecl(_) => type_decl(unit, ctx),
            SnippetKind::Method => method(unit, ctx),
            SnippetKind::Var(VarKind::TempVarExpression) => temp_var(unit, ctx),
            SnippetKind::Var(_) => var(unit, ctx),
            SnippetKind::Expression(_) => expression(unit, ctx),
            SnippetKind::Statement => statement(unit, ctx),
            SnippetKind::Erroneous => Err(erroneous(&unit.source)),
        };
        let outcome = result.unwrap_or_else(|err| CompileOutcome {
            diagnostics: vec![Diagnostic::error("syntax", err.message, err.span)],
            ..CompileOutcome::default()
        });
        debug!(
            snippet = %unit.snippet_id,
            errors = outcome.has_errors(),
            unresolved = ?outcome.unresolved_names(),
            "compiled"
        );
        outcome
    }
}

fn erroneous(source: &str) -> ParseError {
    Parser::new(source)
        .and_then(Parser::statement_unit)
        .err()
        .unwrap_or_else(|| ParseError::new("illegal start of expression", Span::new(0, source.len())))
}

/// Fold checker findings into an outcome. Units with errors get no
/// artifact; units with unresolved references get a corralled one.
fn outcome(
    unit: &CompileUnit,
    findings: Findings,
    declaration: Option<Declaration>,
    member: Member,
    value_type: Option<Ty>,
) -> CompileOutcome {
    let mut outcome = CompileOutcome {
        diagnostics: findings.diagnostics,
        declaration,
        references: findings.references,
        unresolved: findings.unresolved,
        artifact: None,
        value_type,
    };
    if !outcome.has_errors() {
        let mut artifact = ClassBytecode::new(&unit.snippet_id, member);
        artifact.unresolved = outcome.unresolved_names();
        outcome.artifact = Some(artifact);
    }
    outcome
}

fn import(unit: &CompileUnit) -> PResult<CompileOutcome> {
    let decl = Parser::new(&unit.source)?.import_unit()?;
    let sig = ImportSig {
        path: decl.path,
        is_static: decl.is_static,
        on_demand: decl.on_demand,
    };
    Ok(outcome(
        unit,
        Findings::default(),
        Some(Declaration::Import(sig)),
        Member::Import,
        None,
    ))
}

/// Placeholder visible while the type's own header is resolved, so members
/// may mention the type itself.
fn stub(decl: &TypeDecl) -> TypeSig {
    TypeSig {
        name: decl.name.clone(),
        kind: decl.kind,
        is_abstract: decl.modifiers.is_abstract,
        superclass: None,
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods: Vec::new(),
        ctors: Vec::new(),
        components: Vec::new(),
        constants: decl.constants.clone(),
    }
}

fn type_decl(unit: &CompileUnit, ctx: &CompileContext) -> PResult<CompileOutcome> {
    let mut decl = Parser::new(&unit.source)?.type_unit()?;
    let own = Symbol::Type(decl.name.clone());
    let mut checker = Checker::new(ctx, Some(own), unresolved_is_error(unit.kind));
    checker.declare(Declaration::Type(stub(&decl)));
    let sig = checker.type_sig(&decl);
    checker.declare(Declaration::Type(sig.clone()));
    checker.type_bodies(&mut decl);
    Ok(outcome(
        unit,
        checker.finish(),
        Some(Declaration::Type(sig)),
        Member::Type(decl),
        None,
    ))
}

fn method(unit: &CompileUnit, ctx: &CompileContext) -> PResult<CompileOutcome> {
    let mut decl = Parser::new(&unit.source)?.method_unit()?;
    let own = Symbol::Method(decl.name.clone());
    let mut checker = Checker::new(ctx, Some(own), unresolved_is_error(unit.kind));
    checker.set_site(Site::Header);
    let mut sig = checker.method_sig(&decl, false);
    // Snippet-level methods behave as static members of the session.
    sig.is_static = true;
    if decl.body.is_none() {
        checker.error(
            "missing.meth.body.or.decl.abstract",
            "missing method body, or declare abstract",
            decl.span,
        );
    }
    checker.declare(Declaration::Method(sig.clone()));
    checker.method_body(&mut decl, &sig, None);
    Ok(outcome(
        unit,
        checker.finish(),
        Some(Declaration::Method(sig)),
        Member::Method(decl),
        None,
    ))
}

fn var(unit: &CompileUnit, ctx: &CompileContext) -> PResult<CompileOutcome> {
    let Some(mut decl) = Parser::new(&unit.source)?.vars_unit()?.into_iter().next() else {
        return Err(ParseError::new("<identifier> expected", Span::new(0, unit.source.len())));
    };
    let own = Symbol::Var(decl.name.clone());
    let mut checker = Checker::new(ctx, Some(own), unresolved_is_error(unit.kind));
    let ty = checker.top_var(&mut decl);
    let declaration = Declaration::Var(VarSig {
        name: decl.name.clone(),
        ty: ty.clone(),
    });
    let member = Member::Var {
        name: decl.name,
        ty: ty.clone(),
        init: decl.init,
    };
    Ok(outcome(unit, checker.finish(), Some(declaration), member, Some(ty)))
}

fn temp_var(unit: &CompileUnit, ctx: &CompileContext) -> PResult<CompileOutcome> {
    let mut expr = Parser::new(&unit.source)?.expression_unit()?;
    let mut checker = Checker::new(ctx, None, unresolved_is_error(unit.kind));
    let ty = checker.top_expression(&mut expr);
    let findings = checker.finish();

    if ty == Ty::Void {
        let span = expr.span;
        let body = ExecBody::Stmt(Stmt::new(StmtKind::Expr(expr), span));
        return Ok(outcome(unit, findings, None, Member::Exec(body), Some(Ty::Void)));
    }

    let ty = if ty == Ty::Null { Ty::Object } else { ty };
    let name = unit.name.clone().unwrap_or_default();
    let declaration = Declaration::Var(VarSig {
        name: name.clone(),
        ty: ty.clone(),
    });
    let member = Member::Var {
        name,
        ty: ty.clone(),
        init: Some(expr),
    };
    Ok(outcome(unit, findings, Some(declaration), member, Some(ty)))
}

fn expression(unit: &CompileUnit, ctx: &CompileContext) -> PResult<CompileOutcome> {
    let mut expr = Parser::new(&unit.source)?.expression_unit()?;
    let mut checker = Checker::new(ctx, None, unresolved_is_error(unit.kind));
    let ty = checker.top_expression(&mut expr);
    Ok(outcome(
        unit,
        checker.finish(),
        None,
        Member::Exec(ExecBody::Expr(expr)),
        Some(ty),
    ))
}

fn statement(unit: &CompileUnit, ctx: &CompileContext) -> PResult<CompileOutcome> {
    let mut stmt = Parser::new(&unit.source)?.statement_unit()?;
    let mut checker = Checker::new(ctx, None, unresolved_is_error(unit.kind));
    checker.top_statement(&mut stmt);
    Ok(outcome(
        unit,
        checker.finish(),
        None,
        Member::Exec(ExecBody::Stmt(stmt)),
        None,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{ExpressionKind, TypeKind, classify};
    use crate::syntax::ast::{CallTarget, ExprKind};

    fn unit(source: &str) -> CompileUnit {
        let c = classify(source).remove(0);
        let name = match c.kind {
            SnippetKind::Var(VarKind::TempVarExpression) => Some("$1".to_string()),
            _ => c.name,
        };
        CompileUnit {
            snippet_id: "1".into(),
            source: c.source,
            kind: c.kind,
            name,
        }
    }

    fn compile(source: &str, ctx: &CompileContext) -> CompileOutcome {
        SketchCompiler::new().compile(&unit(source), ctx)
    }

    fn declare(ctx: &mut CompileContext, source: &str) {
        let outcome = compile(source, ctx);
        assert!(!outcome.has_errors(), "{:?}", outcome.diagnostics);
        ctx.insert(outcome.declaration.unwrap());
    }

    fn codes(outcome: &CompileOutcome) -> Vec<&str> {
        outcome.diagnostics.iter().map(|d| d.code.as_str()).collect()
    }

    #[test]
    fn test_variable_declaration() {
        let out = compile("int x = 10;", &CompileContext::new());
        assert!(!out.has_errors());
        assert_eq!(out.declaration.unwrap().signature(), "int x");
        assert!(out.artifact.is_some());
    }

    #[test]
    fn test_method_body_unresolved_is_recoverable() {
        let out = compile("int mu() { return x * 4; }", &CompileContext::new());
        assert!(!out.has_errors());
        assert_eq!(out.unresolved_names(), ["x"]);
        assert_eq!(out.unresolved[0].site, Site::Body);
        assert!(out.artifact.unwrap().is_corralled());
    }

    #[test]
    fn test_method_references_variable() {
        let mut ctx = CompileContext::new();
        declare(&mut ctx, "int x;");
        let out = compile("int mu() { return x * 4; }", &ctx);
        assert!(out.unresolved.is_empty());
        assert_eq!(out.references, [Symbol::Var("x".into())]);
    }

    #[test]
    fn test_supertype_unresolved_in_header() {
        let out = compile("class B extends A {}", &CompileContext::new());
        assert!(!out.has_errors());
        assert!(out.has_header_unresolved());
        assert_eq!(out.unresolved[0].symbol, Symbol::Type("A".into()));
    }

    #[test]
    fn test_expression_unresolved_is_error() {
        let out = compile("y + 1", &CompileContext::new());
        assert_eq!(codes(&out), ["cant.resolve"]);
        assert!(out.artifact.is_none());
    }

    #[test]
    fn test_type_errors_are_fatal() {
        let ctx = CompileContext::new();
        assert_eq!(codes(&compile("int x = \"s\";", &ctx)), ["incompatible.types"]);
        assert_eq!(codes(&compile("int f() { }", &ctx)), ["missing.ret.stmt"]);
        assert_eq!(codes(&compile("if (1) {}", &ctx)), ["incompatible.types"]);
        assert_eq!(
            codes(&compile("boolean b = true + 1;", &ctx)),
            ["operator.cant.be.applied.1"]
        );
    }

    #[test]
    fn test_wrong_arity_for_existing_method_is_unresolved() {
        let mut ctx = CompileContext::new();
        declare(&mut ctx, "int f(int a) { return a; }");
        let out = compile("int g() { return f(); }", &ctx);
        assert!(!out.has_errors());
        assert_eq!(out.unresolved_names(), ["f"]);
    }

    #[test]
    fn test_void_expression_is_statement() {
        let out = compile("System.out.println(\"hi\")", &CompileContext::new());
        assert!(!out.has_errors(), "{:?}", out.diagnostics);
        assert_eq!(out.value_type, Some(Ty::Void));
        assert!(out.declaration.is_none());
        let Some(ClassBytecode {
            member: Member::Exec(ExecBody::Stmt(_)),
            ..
        }) = out.artifact
        else {
            panic!("expected statement artifact");
        };
    }

    #[test]
    fn test_temp_var_takes_expression_type() {
        let out = compile("1 + 2L", &CompileContext::new());
        assert_eq!(out.value_type, Some(Ty::Long));
        assert_eq!(out.declaration.unwrap().signature(), "long $1");
    }

    #[test]
    fn test_record_and_class_usage() {
        let mut ctx = CompileContext::new();
        declare(&mut ctx, "record Point(int x, int y) {}");
        declare(&mut ctx, "class Counter { int n; void inc() { n++; } int get() { return n; } }");
        assert!(!compile("new Point(1, 2).x()", &ctx).has_errors());
        assert!(!compile("new Counter().get()", &ctx).has_errors());
        let out = compile("new Point(1)", &ctx);
        assert_eq!(codes(&out), ["cant.apply"]);
    }

    #[test]
    fn test_binds_global_call() {
        let mut ctx = CompileContext::new();
        declare(&mut ctx, "long twice(long v) { return v * 2; }");
        let out = compile("twice(21)", &ctx);
        let Some(ClassBytecode {
            member: Member::Var { init: Some(init), .. },
            ..
        }) = out.artifact
        else {
            panic!("expected temporary");
        };
        let ExprKind::Call { resolved, args, .. } = init.kind else {
            panic!("expected call");
        };
        assert_eq!(resolved, CallTarget::Global { sig: "long".into() });
        assert!(matches!(args[0].kind, ExprKind::Cast { .. }));
    }

    #[test]
    fn test_abstract_and_enum_instantiation() {
        let mut ctx = CompileContext::new();
        declare(&mut ctx, "interface Shape { double area(); }");
        declare(&mut ctx, "enum Color { RED, GREEN }");
        assert_eq!(codes(&compile("new Shape()", &ctx)), ["abstract.cant.be.instantiated"]);
        assert!(!compile("Color.RED.ordinal()", &ctx).has_errors());
    }

    #[test]
    fn test_kinds_of_expression_snippets() {
        let mut ctx = CompileContext::new();
        declare(&mut ctx, "int x = 1;");
        let value = unit("x");
        assert_eq!(value.kind, SnippetKind::Expression(ExpressionKind::VarValue));
        let out = SketchCompiler::new().compile(&value, &ctx);
        assert_eq!(out.value_type, Some(Ty::Int));
        assert_eq!(unit("class A {}").kind, SnippetKind::TypeDecl(TypeKind::Class));
    }

    #[test]
    fn test_syntax_error_diagnostic() {
        let out = compile("int = ;", &CompileContext::new());
        assert_eq!(codes(&out), ["syntax"]);
    }
}
