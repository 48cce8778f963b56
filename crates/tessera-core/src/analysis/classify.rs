//! Structural classification of complete units into snippet kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::syntax::ast::{Expr, ExprKind, TypeDeclKind};
use crate::syntax::parser::{DeclShape, ParseError, Parser};
use crate::syntax::{Span, lex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportKind {
    SingleType,
    OnDemand,
    SingleStatic,
    StaticOnDemand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Class,
    Interface,
    Enum,
    Record,
    Annotation,
}

impl From<TypeDeclKind> for TypeKind {
    fn from(kind: TypeDeclKind) -> Self {
        match kind {
            TypeDeclKind::Class => TypeKind::Class,
            TypeDeclKind::Interface => TypeKind::Interface,
            TypeDeclKind::Enum => TypeKind::Enum,
            TypeDeclKind::Record => TypeKind::Record,
            TypeDeclKind::Annotation => TypeKind::Annotation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VarKind {
    Declaration,
    DeclarationWithInitializer,
    /// An expression whose value is kept in a synthesized variable (`$1`).
    TempVarExpression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpressionKind {
    /// A bare variable name.
    VarValue,
    /// Assignment to a variable.
    Assignment,
}

/// Kind and sub-kind of a snippet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SnippetKind {
    Import(ImportKind),
    TypeDecl(TypeKind),
    Method,
    Var(VarKind),
    Expression(ExpressionKind),
    Statement,
    Erroneous,
}

impl SnippetKind {
    /// Declarations (temporaries included) stay part of the program across
    /// evaluations.
    pub fn is_persistent(self) -> bool {
        match self {
            SnippetKind::Import(_)
            | SnippetKind::TypeDecl(_)
            | SnippetKind::Method
            | SnippetKind::Var(_) => true,
            SnippetKind::Expression(_) | SnippetKind::Statement | SnippetKind::Erroneous => false,
        }
    }

    pub fn kind_name(self) -> &'static str {
        match self {
            SnippetKind::Import(_) => "IMPORT",
            SnippetKind::TypeDecl(_) => "TYPE_DECL",
            SnippetKind::Method => "METHOD",
            SnippetKind::Var(_) => "VAR",
            SnippetKind::Expression(_) => "EXPRESSION",
            SnippetKind::Statement => "STATEMENT",
            SnippetKind::Erroneous => "ERRONEOUS",
        }
    }

    pub fn sub_kind_name(self) -> &'static str {
        match self {
            SnippetKind::Import(ImportKind::SingleType) => "SINGLE_TYPE_IMPORT",
            SnippetKind::Import(ImportKind::OnDemand) => "TYPE_IMPORT_ON_DEMAND",
            SnippetKind::Import(ImportKind::SingleStatic) => "SINGLE_STATIC_IMPORT",
            SnippetKind::Import(ImportKind::StaticOnDemand) => "STATIC_IMPORT_ON_DEMAND",
            SnippetKind::TypeDecl(TypeKind::Class) => "CLASS",
            SnippetKind::TypeDecl(TypeKind::Interface) => "INTERFACE",
            SnippetKind::TypeDecl(TypeKind::Enum) => "ENUM",
            SnippetKind::TypeDecl(TypeKind::Record) => "RECORD",
            SnippetKind::TypeDecl(TypeKind::Annotation) => "ANNOTATION_TYPE",
            SnippetKind::Method => "METHOD",
            SnippetKind::Var(VarKind::Declaration) => "VAR_DECLARATION",
            SnippetKind::Var(VarKind::DeclarationWithInitializer) => {
                "VAR_DECLARATION_WITH_INITIALIZER"
            }
            SnippetKind::Var(VarKind::TempVarExpression) => "TEMP_VAR_EXPRESSION",
            SnippetKind::Expression(ExpressionKind::VarValue) => "VAR_VALUE",
            SnippetKind::Expression(ExpressionKind::Assignment) => "ASSIGNMENT",
            SnippetKind::Statement => "STATEMENT",
            SnippetKind::Erroneous => "UNKNOWN",
        }
    }
}

impl fmt::Display for SnippetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind_name(), self.sub_kind_name())
    }
}

/// One classified unit. Variable declarations with several declarators
/// classify into one entry per declarator.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub kind: SnippetKind,
    /// Declared or referenced name; `None` for temporaries and statements.
    pub name: Option<String>,
    pub source: String,
    /// Why the unit is erroneous.
    pub error: Option<ParseError>,
}

impl Classified {
    fn new(kind: SnippetKind, name: Option<String>, source: &str) -> Self {
        Self {
            kind,
            name,
            source: source.to_string(),
            error: None,
        }
    }

    fn erroneous(source: &str, error: ParseError) -> Self {
        Self {
            kind: SnippetKind::Erroneous,
            name: None,
            source: source.to_string(),
            error: Some(error),
        }
    }
}

const STATEMENT_WORDS: &[&str] = &[
    "if", "while", "for", "do", "try", "return", "break", "continue", "throw", "switch",
    "synchronized", "assert", "else", "catch", "finally",
];

/// Classify a complete unit.
pub fn classify(unit: &str) -> Vec<Classified> {
    let mut parser = match Parser::new(unit) {
        Ok(parser) => parser,
        Err(err) => return vec![Classified::erroneous(unit, err)],
    };

    match parser.declaration_shape() {
        Some(DeclShape::Import) => vec![classify_import(parser, unit)],
        Some(DeclShape::Type(_)) => vec![match parser.type_unit() {
            Ok(decl) => Classified::new(SnippetKind::TypeDecl(decl.kind.into()), Some(decl.name), unit),
            Err(err) => Classified::erroneous(unit, err),
        }],
        Some(DeclShape::Method) => vec![match parser.method_unit() {
            Ok(method) => Classified::new(SnippetKind::Method, Some(method.name), unit),
            Err(err) => Classified::erroneous(unit, err),
        }],
        Some(DeclShape::Var) => classify_vars(parser, unit),
        None => vec![classify_statement(unit)],
    }
}

fn classify_import(parser: Parser, unit: &str) -> Classified {
    match parser.import_unit() {
        Ok(import) => {
            let kind = match (import.is_static, import.on_demand) {
                (false, false) => ImportKind::SingleType,
                (false, true) => ImportKind::OnDemand,
                (true, false) => ImportKind::SingleStatic,
                (true, true) => ImportKind::StaticOnDemand,
            };
            Classified::new(SnippetKind::Import(kind), Some(import.full_name()), unit)
        }
        Err(err) => Classified::erroneous(unit, err),
    }
}

/// Split `int a = 1, b;` into `int a = 1;` and `int b;`.
fn classify_vars(parser: Parser, unit: &str) -> Vec<Classified> {
    let decls = match parser.vars_unit() {
        Ok(decls) => decls,
        Err(err) => return vec![Classified::erroneous(unit, err)],
    };
    let single = decls.len() == 1;
    let prefix = decls
        .first()
        .map_or("", |d| unit[..d.span.start].trim_end());
    decls
        .into_iter()
        .map(|decl| {
            let kind = if decl.init.is_some() {
                VarKind::DeclarationWithInitializer
            } else {
                VarKind::Declaration
            };
            let source = if single {
                unit.trim().to_string()
            } else {
                format!("{} {};", prefix, slice(unit, decl.span))
            };
            Classified {
                kind: SnippetKind::Var(kind),
                name: Some(decl.name),
                source,
                error: None,
            }
        })
        .collect()
}

fn slice(src: &str, span: Span) -> &str {
    src.get(span.start..span.end).unwrap_or_default()
}

fn classify_statement(unit: &str) -> Classified {
    let first = lex(unit).tokens.into_iter().next();
    let statement_like = first.as_ref().is_some_and(|t| {
        t.is_punct("{") || t.is_punct(";") || STATEMENT_WORDS.iter().any(|w| t.is_word(w))
    });

    if !statement_like {
        let expr_err = match Parser::new(unit).and_then(Parser::expression_unit) {
            Ok(expr) => return classify_expression(&expr, unit),
            Err(err) => err,
        };
        return match Parser::new(unit).and_then(Parser::statement_unit) {
            Ok(_) => Classified::new(SnippetKind::Statement, None, unit),
            Err(_) => Classified::erroneous(unit, expr_err),
        };
    }

    match Parser::new(unit).and_then(Parser::statement_unit) {
        Ok(_) => Classified::new(SnippetKind::Statement, None, unit),
        Err(err) => Classified::erroneous(unit, err),
    }
}

fn classify_expression(expr: &Expr, unit: &str) -> Classified {
    match &expr.kind {
        ExprKind::Name { name, .. } => Classified::new(
            SnippetKind::Expression(ExpressionKind::VarValue),
            Some(name.clone()),
            unit,
        ),
        ExprKind::Assign { target, .. } => match &target.kind {
            ExprKind::Name { name, .. } => Classified::new(
                SnippetKind::Expression(ExpressionKind::Assignment),
                Some(name.clone()),
                unit,
            ),
            _ => Classified::new(SnippetKind::Var(VarKind::TempVarExpression), None, unit),
        },
        _ => Classified::new(SnippetKind::Var(VarKind::TempVarExpression), None, unit),
    }
}

/// Allocates `$1`, `$2`, ... skipping names the user has taken.
#[derive(Debug, Clone, Default)]
pub struct TempNames {
    next: usize,
}

impl TempNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_name(&mut self, taken: impl Fn(&str) -> bool) -> String {
        loop {
            self.next += 1;
            let name = format!("${}", self.next);
            if !taken(&name) {
                return name;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(unit: &str) -> SnippetKind {
        classify(unit)[0].kind
    }

    #[test]
    fn test_imports() {
        assert_eq!(kind("import java.util.List;"), SnippetKind::Import(ImportKind::SingleType));
        assert_eq!(kind("import java.util.*;"), SnippetKind::Import(ImportKind::OnDemand));
        assert_eq!(
            kind("import static java.lang.Math.max;"),
            SnippetKind::Import(ImportKind::SingleStatic)
        );
        assert_eq!(
            kind("import static java.lang.Math.*;"),
            SnippetKind::Import(ImportKind::StaticOnDemand)
        );
        assert_eq!(classify("import java.util.*;")[0].name.as_deref(), Some("java.util.*"));
    }

    #[test]
    fn test_type_declarations() {
        assert_eq!(kind("class A {}"), SnippetKind::TypeDecl(TypeKind::Class));
        assert_eq!(kind("interface I {}"), SnippetKind::TypeDecl(TypeKind::Interface));
        assert_eq!(kind("enum E { X }"), SnippetKind::TypeDecl(TypeKind::Enum));
        assert_eq!(kind("record R(int a) {}"), SnippetKind::TypeDecl(TypeKind::Record));
        assert_eq!(kind("@interface Tag {}"), SnippetKind::TypeDecl(TypeKind::Annotation));
    }

    #[test]
    fn test_methods_and_vars() {
        let method = &classify("int mu() { return x * 4; }")[0];
        assert_eq!(method.kind, SnippetKind::Method);
        assert_eq!(method.name.as_deref(), Some("mu"));

        assert_eq!(kind("int x;"), SnippetKind::Var(VarKind::Declaration));
        assert_eq!(kind("int x = 10;"), SnippetKind::Var(VarKind::DeclarationWithInitializer));
    }

    #[test]
    fn test_multiple_declarators_split() {
        let parts = classify("final int a = 1, b;");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].source, "final int a = 1;");
        assert_eq!(parts[1].source, "final int b;");
        assert_eq!(parts[1].kind, SnippetKind::Var(VarKind::Declaration));
    }

    #[test]
    fn test_expressions() {
        assert_eq!(kind("x;"), SnippetKind::Expression(ExpressionKind::VarValue));
        assert_eq!(kind("x = 5;"), SnippetKind::Expression(ExpressionKind::Assignment));
        assert_eq!(kind("x + 1;"), SnippetKind::Var(VarKind::TempVarExpression));
        assert_eq!(kind("a[0] = 1;"), SnippetKind::Var(VarKind::TempVarExpression));
    }

    #[test]
    fn test_statements() {
        assert_eq!(kind("if (x > 1) x = 0;"), SnippetKind::Statement);
        assert_eq!(kind("for (int i = 0; i < 2; i++) {}"), SnippetKind::Statement);
        assert_eq!(kind("{ int y = 2; }"), SnippetKind::Statement);
    }

    #[test]
    fn test_erroneous() {
        let bad = &classify("int = ;")[0];
        assert_eq!(bad.kind, SnippetKind::Erroneous);
        assert!(bad.error.is_some());
        assert_eq!(kind("\"open"), SnippetKind::Erroneous);
    }

    #[test]
    fn test_temp_names_skip_taken() {
        let mut names = TempNames::new();
        assert_eq!(names.next_name(|_| false), "$1");
        assert_eq!(names.next_name(|n| n == "$2"), "$3");
    }
}
