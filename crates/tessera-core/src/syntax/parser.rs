//! Recursive-descent parser for the snippet language.
//!
//! A [`Parser`] is built over one snippet and consumed by exactly one of the
//! unit entry points (`import_unit`, `type_unit`, ...). The classifier picks
//! the entry point; [`Parser::declaration_shape`] is the cheap lookahead it
//! uses to do so.

use thiserror::Error;

use super::Span;
use super::ast::*;
use super::lexer::{LexEnd, Token, TokenKind, is_keyword, lex};

/// A syntax error with the offending source range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

pub type PResult<T> = std::result::Result<T, ParseError>;

/// Declaration shape detected by [`Parser::declaration_shape`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclShape {
    Import,
    Type(TypeDeclKind),
    Method,
    Var,
}

const PRIMITIVES: &[&str] = &[
    "int", "long", "double", "boolean", "char", "byte", "short", "float", "void",
];

const ASSIGN_OPS: &[(&str, Option<BinaryOp>)] = &[
    ("=", None),
    ("+=", Some(BinaryOp::Add)),
    ("-=", Some(BinaryOp::Sub)),
    ("*=", Some(BinaryOp::Mul)),
    ("/=", Some(BinaryOp::Div)),
    ("%=", Some(BinaryOp::Rem)),
    ("&=", Some(BinaryOp::BitAnd)),
    ("|=", Some(BinaryOp::BitOr)),
    ("^=", Some(BinaryOp::BitXor)),
    ("<<=", Some(BinaryOp::Shl)),
    (">>=", Some(BinaryOp::Shr)),
    (">>>=", Some(BinaryOp::UShr)),
];

const INSTANCEOF_PREC: u8 = 7;

fn binary_op(tok: &Token) -> Option<(BinaryOp, u8)> {
    if tok.kind != TokenKind::Punct {
        return None;
    }
    let entry = match tok.text.as_str() {
        "||" => (BinaryOp::Or, 1),
        "&&" => (BinaryOp::And, 2),
        "|" => (BinaryOp::BitOr, 3),
        "^" => (BinaryOp::BitXor, 4),
        "&" => (BinaryOp::BitAnd, 5),
        "==" => (BinaryOp::Eq, 6),
        "!=" => (BinaryOp::Ne, 6),
        "<" => (BinaryOp::Lt, 7),
        ">" => (BinaryOp::Gt, 7),
        "<=" => (BinaryOp::Le, 7),
        ">=" => (BinaryOp::Ge, 7),
        "<<" => (BinaryOp::Shl, 8),
        ">>" => (BinaryOp::Shr, 8),
        ">>>" => (BinaryOp::UShr, 8),
        "+" => (BinaryOp::Add, 9),
        "-" => (BinaryOp::Sub, 9),
        "*" => (BinaryOp::Mul, 10),
        "/" => (BinaryOp::Div, 10),
        "%" => (BinaryOp::Rem, 10),
        _ => return None,
    };
    Some(entry)
}

pub fn is_primitive(name: &str) -> bool {
    PRIMITIVES.contains(&name)
}

/// Saved parser position. Restoring also undoes `>>` splits made while
/// closing generic argument lists.
#[derive(Clone, Copy)]
struct Checkpoint {
    pos: usize,
    splits: usize,
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    eof: Span,
    splits: Vec<(usize, Token)>,
}

impl Parser {
    /// Lex `src`. Fails on unterminated or malformed literals and comments.
    pub fn new(src: &str) -> PResult<Self> {
        let lexed = lex(src);
        let eof = Span::new(src.len(), src.len());
        match lexed.end {
            LexEnd::Clean => {}
            LexEnd::OpenComment => return Err(ParseError::new("unclosed comment", eof)),
            LexEnd::OpenString { .. } | LexEnd::BrokenLiteral { .. } => {
                let at = match lexed.end {
                    LexEnd::BrokenLiteral { at } => at,
                    _ => src.len(),
                };
                return Err(ParseError::new(
                    "unclosed string literal",
                    Span::new(at, src.len()),
                ));
            }
            LexEnd::OpenChar => return Err(ParseError::new("unclosed character literal", eof)),
            LexEnd::OpenTextBlock => return Err(ParseError::new("unclosed text block", eof)),
        }
        if let Some(bad) = lexed.tokens.iter().find(|t| t.kind == TokenKind::Error) {
            return Err(ParseError::new(
                format!("illegal character: '{}'", bad.text),
                bad.span,
            ));
        }
        Ok(Self {
            tokens: lexed.tokens,
            pos: 0,
            eof,
            splits: Vec::new(),
        })
    }

    // ---- unit entry points -------------------------------------------

    pub fn import_unit(mut self) -> PResult<ImportDecl> {
        let start = self.span();
        self.expect_word("import")?;
        let is_static = self.eat_word("static");
        let (mut path, _) = self.expect_ident()?;
        let mut on_demand = false;
        while self.eat_punct(".") {
            if self.eat_punct("*") {
                on_demand = true;
                break;
            }
            let (seg, _) = self.expect_ident()?;
            path.push('.');
            path.push_str(&seg);
        }
        if !path.contains('.') && !on_demand {
            return Err(ParseError::new("'.' expected", self.span()));
        }
        let span = start.to(self.prev_span());
        self.finish()?;
        Ok(ImportDecl {
            is_static,
            path,
            on_demand,
            span,
        })
    }

    pub fn type_unit(mut self) -> PResult<TypeDecl> {
        let decl = self.type_decl()?;
        self.finish()?;
        Ok(decl)
    }

    pub fn method_unit(mut self) -> PResult<MethodDecl> {
        let start = self.span();
        let modifiers = self.modifiers()?;
        let type_params = if self.at_punct("<") {
            self.type_params()?
        } else {
            Vec::new()
        };
        let ret = self.parse_type()?;
        let (name, _) = self.expect_ident()?;
        if !self.at_punct("(") {
            return self.error("'(' expected");
        }
        let method = self.method_rest(modifiers, type_params, ret, name, start)?;
        if method.body.is_none() && !method.modifiers.is_abstract {
            return Err(ParseError::new(
                "missing method body, or declare abstract",
                method.span,
            ));
        }
        self.finish()?;
        Ok(method)
    }

    pub fn vars_unit(mut self) -> PResult<Vec<VarDecl>> {
        self.modifiers()?;
        let ty = self.var_type()?;
        let decls = self.declarators(ty)?;
        self.finish()?;
        Ok(decls)
    }

    pub fn statement_unit(mut self) -> PResult<Stmt> {
        let stmt = self.statement()?;
        self.finish()?;
        Ok(stmt)
    }

    pub fn expression_unit(mut self) -> PResult<Expr> {
        let expr = self.expression()?;
        self.finish()?;
        Ok(expr)
    }

    /// Structural lookahead: which declaration, if any, the snippet starts
    /// with. Does not consume input.
    pub fn declaration_shape(&mut self) -> Option<DeclShape> {
        if self.at_word("import") {
            return Some(DeclShape::Import);
        }
        let mark = self.checkpoint();
        let shape = self.shape_inner().ok();
        self.restore(mark);
        shape
    }

    fn shape_inner(&mut self) -> PResult<DeclShape> {
        self.modifiers()?;
        if let Some(kind) = self.type_keyword_ahead() {
            return Ok(DeclShape::Type(kind));
        }
        if self.at_punct("<") {
            self.type_params()?;
            return Ok(DeclShape::Method);
        }
        if self.at_word("var") && self.peek_at(1).is_some_and(Token::is_ident) {
            return Ok(DeclShape::Var);
        }
        self.parse_type()?;
        if !self.peek().is_some_and(Token::is_ident) {
            return self.error("<identifier> expected");
        }
        self.bump()?;
        if self.at_punct("(") {
            return Ok(DeclShape::Method);
        }
        if self.at_end() || ["=", ";", ",", "["].iter().any(|p| self.at_punct(p)) {
            return Ok(DeclShape::Var);
        }
        self.error("';' expected")
    }

    // ---- token helpers -----------------------------------------------

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn span(&self) -> Span {
        self.peek().map_or(self.eof, |t| t.span)
    }

    fn prev_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or(self.eof, |t| t.span)
    }

    fn at_punct(&self, p: &str) -> bool {
        self.peek().is_some_and(|t| t.is_punct(p))
    }

    fn at_word(&self, w: &str) -> bool {
        self.peek().is_some_and(|t| t.is_word(w))
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.at_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, w: &str) -> bool {
        if self.at_word(w) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn bump(&mut self) -> PResult<Token> {
        match self.tokens.get(self.pos) {
            Some(tok) => {
                let tok = tok.clone();
                self.pos += 1;
                Ok(tok)
            }
            None => Err(ParseError::new(
                "reached end of file while parsing",
                self.eof,
            )),
        }
    }

    fn expect_punct(&mut self, p: &str) -> PResult<Span> {
        if self.at_punct(p) {
            let span = self.span();
            self.pos += 1;
            Ok(span)
        } else if self.at_end() {
            Err(ParseError::new(
                "reached end of file while parsing",
                self.eof,
            ))
        } else {
            self.error(format!("'{p}' expected"))
        }
    }

    fn expect_word(&mut self, w: &str) -> PResult<Span> {
        if self.at_word(w) {
            let span = self.span();
            self.pos += 1;
            Ok(span)
        } else {
            self.error(format!("'{w}' expected"))
        }
    }

    fn expect_ident(&mut self) -> PResult<(String, Span)> {
        match self.peek() {
            Some(tok) if tok.is_ident() => {
                let out = (tok.text.clone(), tok.span);
                self.pos += 1;
                Ok(out)
            }
            _ => self.error("<identifier> expected"),
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> PResult<T> {
        Err(ParseError::new(message, self.span()))
    }

    /// Accept trailing semicolons and require end of input.
    fn finish(&mut self) -> PResult<()> {
        while self.eat_punct(";") {}
        if self.at_end() {
            Ok(())
        } else {
            self.error(format!("unexpected token '{}'", self.tokens[self.pos].text))
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            pos: self.pos,
            splits: self.splits.len(),
        }
    }

    fn restore(&mut self, mark: Checkpoint) {
        while self.splits.len() > mark.splits {
            if let Some((idx, tok)) = self.splits.pop() {
                self.tokens[idx] = tok;
            }
        }
        self.pos = mark.pos;
    }

    /// Run `f` and report whether it succeeded, always rewinding.
    fn lookahead(&mut self, f: impl FnOnce(&mut Self) -> PResult<bool>) -> bool {
        let mark = self.checkpoint();
        let ok = f(self).unwrap_or(false);
        self.restore(mark);
        ok
    }

    /// Close a generic argument list, splitting `>>` and `>>>`.
    fn close_angle(&mut self) -> PResult<()> {
        let idx = self.pos;
        let Some(tok) = self.tokens.get(idx) else {
            return self.error("'>' expected");
        };
        if tok.kind != TokenKind::Punct {
            return self.error("'>' expected");
        }
        let rest = match tok.text.as_str() {
            ">" => {
                self.pos += 1;
                return Ok(());
            }
            ">>" => ">",
            ">>>" => ">>",
            ">=" => "=",
            ">>=" => ">=",
            _ => return self.error("'>' expected"),
        };
        let original = tok.clone();
        let mut split = original.clone();
        split.text = rest.to_string();
        split.span.start += 1;
        self.splits.push((idx, original));
        self.tokens[idx] = split;
        Ok(())
    }

    fn skip_balanced(&mut self, open: &str, close: &str) -> PResult<()> {
        self.expect_punct(open)?;
        let mut depth = 1usize;
        while depth > 0 {
            let tok = self.bump()?;
            if tok.is_punct(open) {
                depth += 1;
            } else if tok.is_punct(close) {
                depth -= 1;
            }
        }
        Ok(())
    }

    // ---- types -------------------------------------------------------

    fn parse_type(&mut self) -> PResult<TypeRef> {
        let mut ty = self.type_base()?;
        while self.at_punct("[") && self.peek_at(1).is_some_and(|t| t.is_punct("]")) {
            self.pos += 2;
            ty.dims += 1;
        }
        ty.span = ty.span.to(self.prev_span());
        Ok(ty)
    }

    /// Type name and generic arguments, without array dimensions.
    fn type_base(&mut self) -> PResult<TypeRef> {
        let start = self.span();
        let Some(tok) = self.peek() else {
            return self.error("<identifier> expected");
        };
        if tok.kind == TokenKind::Ident && is_primitive(&tok.text) {
            let name = tok.text.clone();
            self.pos += 1;
            return Ok(TypeRef::simple(&name, start));
        }
        let (mut name, _) = self.expect_ident()?;
        while self.at_punct(".") && self.peek_at(1).is_some_and(Token::is_ident) {
            self.pos += 1;
            let (seg, _) = self.expect_ident()?;
            name.push('.');
            name.push_str(&seg);
        }
        let args = if self.at_punct("<") {
            self.type_args()?
        } else {
            Vec::new()
        };
        Ok(TypeRef {
            name,
            args,
            dims: 0,
            span: start.to(self.prev_span()),
        })
    }

    fn type_args(&mut self) -> PResult<Vec<TypeRef>> {
        self.expect_punct("<")?;
        let mut args = Vec::new();
        if self.at_punct(">") {
            self.close_angle()?;
            return Ok(args);
        }
        loop {
            if self.at_punct("?") {
                let span = self.span();
                self.pos += 1;
                if self.eat_word("extends") || self.eat_word("super") {
                    args.push(self.parse_type()?);
                } else {
                    args.push(TypeRef::simple("Object", span));
                }
            } else {
                args.push(self.parse_type()?);
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.close_angle()?;
        Ok(args)
    }

    fn type_params(&mut self) -> PResult<Vec<String>> {
        self.expect_punct("<")?;
        let mut names = Vec::new();
        loop {
            let (name, _) = self.expect_ident()?;
            names.push(name);
            if self.eat_word("extends") {
                self.parse_type()?;
                while self.eat_punct("&") {
                    self.parse_type()?;
                }
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.close_angle()?;
        Ok(names)
    }

    fn type_list(&mut self) -> PResult<Vec<TypeRef>> {
        let mut out = vec![self.parse_type()?];
        while self.eat_punct(",") {
            out.push(self.parse_type()?);
        }
        Ok(out)
    }

    /// `var` or an explicit type.
    fn var_type(&mut self) -> PResult<Option<TypeRef>> {
        if self.at_word("var") && self.peek_at(1).is_some_and(Token::is_ident) {
            self.pos += 1;
            Ok(None)
        } else {
            self.parse_type().map(Some)
        }
    }

    // ---- declarations ------------------------------------------------

    fn modifiers(&mut self) -> PResult<Modifiers> {
        let mut mods = Modifiers::default();
        loop {
            if self.at_punct("@") && !self.peek_at(1).is_some_and(|t| t.is_word("interface")) {
                self.pos += 1;
                self.expect_ident()?;
                while self.at_punct(".") && self.peek_at(1).is_some_and(Token::is_ident) {
                    self.pos += 2;
                }
                if self.at_punct("(") {
                    self.skip_balanced("(", ")")?;
                }
                continue;
            }
            let Some(tok) = self.peek() else { break };
            if tok.kind != TokenKind::Ident {
                break;
            }
            match tok.text.as_str() {
                "static" => mods.is_static = true,
                "abstract" => mods.is_abstract = true,
                "final" => mods.is_final = true,
                "public" | "private" | "protected" | "default" | "strictfp" | "synchronized"
                | "native" | "transient" | "volatile" => {}
                "sealed" if self.peek_at(1).is_some_and(|t| t.kind == TokenKind::Ident) => {}
                "non"
                    if self.peek_at(1).is_some_and(|t| t.is_punct("-"))
                        && self.peek_at(2).is_some_and(|t| t.is_word("sealed")) =>
                {
                    self.pos += 2;
                }
                _ => break,
            }
            self.pos += 1;
        }
        Ok(mods)
    }

    fn type_keyword_ahead(&self) -> Option<TypeDeclKind> {
        let tok = self.peek()?;
        if tok.is_word("class") {
            Some(TypeDeclKind::Class)
        } else if tok.is_word("interface") {
            Some(TypeDeclKind::Interface)
        } else if tok.is_word("enum") {
            Some(TypeDeclKind::Enum)
        } else if tok.is_word("record") && self.peek_at(1).is_some_and(Token::is_ident) {
            Some(TypeDeclKind::Record)
        } else if tok.is_punct("@") && self.peek_at(1).is_some_and(|t| t.is_word("interface")) {
            Some(TypeDeclKind::Annotation)
        } else {
            None
        }
    }

    fn type_decl(&mut self) -> PResult<TypeDecl> {
        let start = self.span();
        let mut modifiers = self.modifiers()?;
        let Some(kind) = self.type_keyword_ahead() else {
            return self.error("class, interface, enum, or record expected");
        };
        self.pos += if kind == TypeDeclKind::Annotation { 2 } else { 1 };
        let (name, _) = self.expect_ident()?;
        let type_params = if self.at_punct("<") {
            self.type_params()?
        } else {
            Vec::new()
        };
        let components = if kind == TypeDeclKind::Record {
            self.params()?
        } else {
            Vec::new()
        };
        let extends = if self.eat_word("extends") {
            let list = self.type_list()?;
            if kind != TypeDeclKind::Interface && list.len() > 1 {
                return Err(ParseError::new("'{' expected", list[1].span));
            }
            list
        } else {
            Vec::new()
        };
        let implements = if self.eat_word("implements") {
            self.type_list()?
        } else {
            Vec::new()
        };
        if self.eat_word("permits") {
            self.type_list()?;
        }
        if kind == TypeDeclKind::Interface {
            modifiers.is_abstract = true;
        }

        let mut decl = TypeDecl {
            kind,
            modifiers,
            name,
            type_params,
            extends,
            implements,
            components,
            constants: Vec::new(),
            fields: Vec::new(),
            ctors: Vec::new(),
            methods: Vec::new(),
            span: start,
        };
        self.type_body(&mut decl)?;
        decl.span = start.to(self.prev_span());
        Ok(decl)
    }

    fn type_body(&mut self, decl: &mut TypeDecl) -> PResult<()> {
        if decl.kind == TypeDeclKind::Annotation {
            return self.skip_balanced("{", "}");
        }
        self.expect_punct("{")?;
        if decl.kind == TypeDeclKind::Enum {
            loop {
                if self.at_punct(";") || self.at_punct("}") {
                    break;
                }
                self.modifiers()?;
                let (constant, _) = self.expect_ident()?;
                if self.at_punct("(") || self.at_punct("{") {
                    return self.error("enum constant bodies and arguments are not supported");
                }
                decl.constants.push(constant);
                if !self.eat_punct(",") {
                    break;
                }
            }
            if !self.eat_punct(";") {
                self.expect_punct("}")?;
                return Ok(());
            }
        }
        while !self.eat_punct("}") {
            if self.at_end() {
                return self.error("reached end of file while parsing");
            }
            self.member(decl)?;
        }
        Ok(())
    }

    fn member(&mut self, decl: &mut TypeDecl) -> PResult<()> {
        if self.eat_punct(";") {
            return Ok(());
        }
        let start = self.span();
        let mut modifiers = self.modifiers()?;
        if self.type_keyword_ahead().is_some() {
            return self.error("nested type declarations are not supported");
        }
        if self.at_punct("{") {
            return self.error("initializer blocks are not supported");
        }
        let type_params = if self.at_punct("<") {
            self.type_params()?
        } else {
            Vec::new()
        };

        let names_self = self.peek().is_some_and(|t| t.is_word(&decl.name));
        if names_self && self.peek_at(1).is_some_and(|t| t.is_punct("(")) {
            if decl.kind == TypeDeclKind::Interface {
                return self.error("interfaces cannot have constructors");
            }
            self.pos += 1;
            let params = self.params()?;
            if self.eat_word("throws") {
                self.type_list()?;
            }
            let body = self.block()?;
            decl.ctors.push(CtorDecl {
                params,
                body,
                span: start.to(self.prev_span()),
            });
            return Ok(());
        }
        if names_self && self.peek_at(1).is_some_and(|t| t.is_punct("{")) {
            return self.error("compact constructors are not supported");
        }

        let ty = self.parse_type()?;
        let (name, _) = self.expect_ident()?;
        if self.at_punct("(") {
            let mut method = self.method_rest(modifiers, type_params, ty, name, start)?;
            if method.body.is_none() {
                if decl.kind != TypeDeclKind::Interface && !method.modifiers.is_abstract {
                    return Err(ParseError::new(
                        "missing method body, or declare abstract",
                        method.span,
                    ));
                }
                method.modifiers.is_abstract = true;
            }
            decl.methods.push(method);
            return Ok(());
        }
        if decl.kind == TypeDeclKind::Interface {
            modifiers.is_static = true;
            modifiers.is_final = true;
        }
        // Rewind to the declarator name so the shared declarator loop sees it.
        self.pos -= 1;
        for var in self.declarators(Some(ty))? {
            decl.fields.push(FieldDecl { modifiers, var });
        }
        self.expect_punct(";")?;
        Ok(())
    }

    fn method_rest(
        &mut self,
        modifiers: Modifiers,
        type_params: Vec<String>,
        ret: TypeRef,
        name: String,
        start: Span,
    ) -> PResult<MethodDecl> {
        let params = self.params()?;
        let throws = if self.eat_word("throws") {
            self.type_list()?
        } else {
            Vec::new()
        };
        let body = if self.eat_punct(";") {
            None
        } else {
            Some(self.block()?)
        };
        Ok(MethodDecl {
            modifiers,
            type_params,
            ret,
            name,
            params,
            throws,
            body,
            span: start.to(self.prev_span()),
        })
    }

    fn params(&mut self) -> PResult<Vec<Param>> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        if self.eat_punct(")") {
            return Ok(params);
        }
        loop {
            self.modifiers()?;
            let mut ty = self.parse_type()?;
            if self.eat_punct("...") {
                ty.dims += 1;
            }
            let (name, _) = self.expect_ident()?;
            while self.at_punct("[") && self.peek_at(1).is_some_and(|t| t.is_punct("]")) {
                self.pos += 2;
                ty.dims += 1;
            }
            params.push(Param { ty, name });
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(params)
    }

    fn declarators(&mut self, ty: Option<TypeRef>) -> PResult<Vec<VarDecl>> {
        let mut out = Vec::new();
        loop {
            let (name, name_span) = self.expect_ident()?;
            let mut var_ty = ty.clone();
            while self.at_punct("[") && self.peek_at(1).is_some_and(|t| t.is_punct("]")) {
                match var_ty.as_mut() {
                    Some(t) => t.dims += 1,
                    None => return self.error("'var' is not allowed as an element type of an array"),
                }
                self.pos += 2;
            }
            let init = if self.eat_punct("=") {
                Some(self.var_init()?)
            } else {
                None
            };
            if var_ty.is_none() && init.is_none() {
                return Err(ParseError::new(
                    "cannot infer type for local variable without initializer",
                    name_span,
                ));
            }
            out.push(VarDecl {
                ty: var_ty,
                name,
                init,
                span: name_span.to(self.prev_span()),
            });
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(out)
    }

    fn var_init(&mut self) -> PResult<Expr> {
        if self.at_punct("{") {
            self.array_literal()
        } else {
            self.expression()
        }
    }

    fn array_literal(&mut self) -> PResult<Expr> {
        let start = self.expect_punct("{")?;
        let elems = self.array_elems()?;
        Ok(Expr::new(
            ExprKind::ArrayLiteral(elems),
            start.to(self.prev_span()),
        ))
    }

    /// Elements of `{...}` after the opening brace, through the closing one.
    fn array_elems(&mut self) -> PResult<Vec<Expr>> {
        let mut elems = Vec::new();
        loop {
            if self.at_punct("}") {
                break;
            }
            elems.push(self.var_init()?);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("}")?;
        Ok(elems)
    }

    // ---- statements --------------------------------------------------

    pub fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_punct("{")?;
        let mut stmts = Vec::new();
        while !self.eat_punct("}") {
            if self.at_end() {
                return self.error("reached end of file while parsing");
            }
            stmts.push(self.statement()?);
        }
        Ok(stmts)
    }

    fn statement(&mut self) -> PResult<Stmt> {
        let start = self.span();
        let Some(tok) = self.peek() else {
            return self.error("reached end of file while parsing");
        };
        if tok.is_punct("{") {
            let body = self.block()?;
            return Ok(Stmt::new(StmtKind::Block(body), start.to(self.prev_span())));
        }
        if tok.is_punct(";") {
            self.pos += 1;
            return Ok(Stmt::new(StmtKind::Empty, start));
        }
        let word = if tok.kind == TokenKind::Ident {
            tok.text.clone()
        } else {
            String::new()
        };
        let kind = match word.as_str() {
            "if" => {
                self.pos += 1;
                let cond = self.paren_expr()?;
                let then = Box::new(self.statement()?);
                let other = if self.eat_word("else") {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                StmtKind::If { cond, then, other }
            }
            "while" => {
                self.pos += 1;
                let cond = self.paren_expr()?;
                let body = Box::new(self.statement()?);
                StmtKind::While { cond, body }
            }
            "do" => {
                self.pos += 1;
                let body = Box::new(self.statement()?);
                self.expect_word("while")?;
                let cond = self.paren_expr()?;
                self.expect_punct(";")?;
                StmtKind::DoWhile { body, cond }
            }
            "for" => self.for_stmt()?,
            "return" => {
                self.pos += 1;
                let value = if self.at_punct(";") {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.expect_punct(";")?;
                StmtKind::Return(value)
            }
            "break" | "continue" => {
                self.pos += 1;
                if self.peek().is_some_and(Token::is_ident) {
                    return self.error("labeled statements are not supported");
                }
                self.expect_punct(";")?;
                if word == "break" {
                    StmtKind::Break
                } else {
                    StmtKind::Continue
                }
            }
            "throw" => {
                self.pos += 1;
                let value = self.expression()?;
                self.expect_punct(";")?;
                StmtKind::Throw(value)
            }
            "try" => self.try_stmt()?,
            "switch" | "synchronized" | "assert" => {
                return self.error(format!("'{word}' statements are not supported"));
            }
            "class" | "interface" | "enum" => {
                return self.error("local type declarations are not supported");
            }
            "else" => return self.error("'else' without 'if'"),
            "catch" | "finally" => return self.error(format!("'{word}' without 'try'")),
            _ if self.local_decl_ahead() => {
                self.modifiers()?;
                let ty = self.var_type()?;
                let decls = self.declarators(ty)?;
                self.expect_punct(";")?;
                StmtKind::Local(decls)
            }
            _ => {
                let expr = self.expression()?;
                if !is_statement_expression(&expr) {
                    return Err(ParseError::new("not a statement", expr.span));
                }
                self.expect_punct(";")?;
                StmtKind::Expr(expr)
            }
        };
        Ok(Stmt::new(kind, start.to(self.prev_span())))
    }

    fn local_decl_ahead(&mut self) -> bool {
        self.lookahead(|p| {
            let mods = p.modifiers()?;
            if p.at_word("var") && p.peek_at(1).is_some_and(Token::is_ident) {
                return Ok(true);
            }
            if mods.is_final && p.peek().is_some_and(|t| t.kind == TokenKind::Ident) {
                return Ok(true);
            }
            p.parse_type()?;
            Ok(p.peek().is_some_and(Token::is_ident)
                && p.peek_at(1).is_none_or(|t| {
                    ["=", ";", ",", ":", "["].iter().any(|s| t.is_punct(s))
                }))
        })
    }

    fn paren_expr(&mut self) -> PResult<Expr> {
        self.expect_punct("(")?;
        let expr = self.expression()?;
        self.expect_punct(")")?;
        Ok(expr)
    }

    fn for_stmt(&mut self) -> PResult<StmtKind> {
        self.expect_word("for")?;
        self.expect_punct("(")?;

        let for_each = self.lookahead(|p| {
            p.modifiers()?;
            p.var_type()?;
            p.expect_ident()?;
            Ok(p.at_punct(":"))
        });
        if for_each {
            self.modifiers()?;
            let ty = self.var_type()?;
            let (name, span) = self.expect_ident()?;
            self.expect_punct(":")?;
            let iterable = self.expression()?;
            self.expect_punct(")")?;
            let body = Box::new(self.statement()?);
            return Ok(StmtKind::ForEach {
                var: VarDecl {
                    ty,
                    name,
                    init: None,
                    span,
                },
                iterable,
                body,
            });
        }

        let mut init = Vec::new();
        if !self.at_punct(";") {
            let start = self.span();
            if self.local_decl_ahead() {
                self.modifiers()?;
                let ty = self.var_type()?;
                let decls = self.declarators(ty)?;
                init.push(Stmt::new(StmtKind::Local(decls), start.to(self.prev_span())));
            } else {
                for expr in self.expression_list()? {
                    let span = expr.span;
                    init.push(Stmt::new(StmtKind::Expr(expr), span));
                }
            }
        }
        self.expect_punct(";")?;
        let cond = if self.at_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.at_punct(")") {
            Vec::new()
        } else {
            self.expression_list()?
        };
        self.expect_punct(")")?;
        let body = Box::new(self.statement()?);
        Ok(StmtKind::For {
            init,
            cond,
            update,
            body,
        })
    }

    fn expression_list(&mut self) -> PResult<Vec<Expr>> {
        let mut out = vec![self.expression()?];
        while self.eat_punct(",") {
            out.push(self.expression()?);
        }
        Ok(out)
    }

    fn try_stmt(&mut self) -> PResult<StmtKind> {
        self.expect_word("try")?;
        if self.at_punct("(") {
            return self.error("try-with-resources is not supported");
        }
        let body = self.block()?;
        let mut catches = Vec::new();
        while self.eat_word("catch") {
            self.expect_punct("(")?;
            self.modifiers()?;
            let mut types = vec![self.parse_type()?];
            while self.eat_punct("|") {
                types.push(self.parse_type()?);
            }
            let (name, _) = self.expect_ident()?;
            self.expect_punct(")")?;
            let body = self.block()?;
            catches.push(CatchClause { types, name, body });
        }
        let finally = if self.eat_word("finally") {
            Some(self.block()?)
        } else {
            None
        };
        if catches.is_empty() && finally.is_none() {
            return self.error("'catch' or 'finally' expected");
        }
        Ok(StmtKind::Try {
            body,
            catches,
            finally,
        })
    }

    // ---- expressions -------------------------------------------------

    pub fn expression(&mut self) -> PResult<Expr> {
        let lhs = self.conditional()?;
        let op = self.peek().and_then(|tok| {
            ASSIGN_OPS
                .iter()
                .find(|(text, _)| tok.is_punct(text))
                .map(|(_, op)| *op)
        });
        let Some(op) = op else {
            return Ok(lhs);
        };
        if !lhs.is_assignable() {
            return Err(ParseError::new("unexpected type: variable required", lhs.span));
        }
        self.pos += 1;
        let value = self.expression()?;
        let span = lhs.span.to(value.span);
        Ok(Expr::new(
            ExprKind::Assign {
                target: Box::new(lhs),
                op,
                value: Box::new(value),
            },
            span,
        ))
    }

    fn conditional(&mut self) -> PResult<Expr> {
        let cond = self.binary(1)?;
        if !self.eat_punct("?") {
            return Ok(cond);
        }
        let then = self.expression()?;
        self.expect_punct(":")?;
        let other = self.conditional()?;
        let span = cond.span.to(other.span);
        Ok(Expr::new(
            ExprKind::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                other: Box::new(other),
            },
            span,
        ))
    }

    fn binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            if self.at_word("instanceof") && INSTANCEOF_PREC >= min_prec {
                self.pos += 1;
                let ty = self.parse_type()?;
                if self.peek().is_some_and(Token::is_ident) {
                    return self.error("pattern matching is not supported");
                }
                let span = lhs.span.to(ty.span);
                lhs = Expr::new(
                    ExprKind::InstanceOf {
                        expr: Box::new(lhs),
                        ty,
                    },
                    span,
                );
                continue;
            }
            let Some((op, prec)) = self.peek().and_then(binary_op) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(prec + 1)?;
            let span = lhs.span.to(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> PResult<Expr> {
        let start = self.span();
        let Some(tok) = self.peek() else {
            return self.error("illegal start of expression");
        };
        if tok.kind == TokenKind::Punct {
            let text = tok.text.clone();
            match text.as_str() {
                "++" | "--" => {
                    let delta = if text == "++" { 1 } else { -1 };
                    self.pos += 1;
                    let target = self.unary()?;
                    let span = start.to(target.span);
                    return Ok(Expr::new(
                        ExprKind::Step {
                            target: Box::new(target),
                            delta,
                            prefix: true,
                        },
                        span,
                    ));
                }
                "-" => {
                    self.pos += 1;
                    if let Some(lit) = self.min_value_literal() {
                        return Ok(Expr::new(
                            ExprKind::Literal(lit),
                            start.to(self.prev_span()),
                        ));
                    }
                    return self.unary_op(UnaryOp::Neg, start);
                }
                "+" => {
                    self.pos += 1;
                    return self.unary_op(UnaryOp::Plus, start);
                }
                "!" => {
                    self.pos += 1;
                    return self.unary_op(UnaryOp::Not, start);
                }
                "~" => {
                    self.pos += 1;
                    return self.unary_op(UnaryOp::BitNot, start);
                }
                "(" if self.cast_ahead() => {
                    self.pos += 1;
                    let ty = self.parse_type()?;
                    self.expect_punct(")")?;
                    let expr = self.unary()?;
                    let span = start.to(expr.span);
                    return Ok(Expr::new(
                        ExprKind::Cast {
                            ty,
                            expr: Box::new(expr),
                        },
                        span,
                    ));
                }
                _ => {}
            }
        }
        self.postfix()
    }

    fn unary_op(&mut self, op: UnaryOp, start: Span) -> PResult<Expr> {
        let operand = self.unary()?;
        let span = start.to(operand.span);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    /// `-2147483648` and `-9223372036854775808L` are only legal negated.
    fn min_value_literal(&mut self) -> Option<Literal> {
        let tok = self.peek()?;
        let lit = match (tok.kind, tok.text.as_str()) {
            (TokenKind::Int, "2147483648") => Literal::Int(i32::MIN),
            (TokenKind::Long, "9223372036854775808L" | "9223372036854775808l") => {
                Literal::Long(i64::MIN)
            }
            _ => return None,
        };
        self.pos += 1;
        Some(lit)
    }

    fn cast_ahead(&mut self) -> bool {
        self.lookahead(|p| {
            p.expect_punct("(")?;
            let primitive = p
                .peek()
                .is_some_and(|t| t.kind == TokenKind::Ident && is_primitive(&t.text));
            p.parse_type()?;
            p.expect_punct(")")?;
            if primitive {
                return Ok(true);
            }
            Ok(p.peek().is_some_and(|t| {
                t.is_ident()
                    || t.is_literal()
                    || t.is_word("this")
                    || t.is_word("new")
                    || t.is_punct("(")
                    || t.is_punct("!")
                    || t.is_punct("~")
            }))
        })
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct(".") {
                if self.at_word("new") || self.at_word("class") || self.at_word("this") {
                    return self.error("qualified 'new', 'this' and class literals are not supported");
                }
                if self.at_punct("<") {
                    return self.error("explicit type arguments are not supported");
                }
                let (name, name_span) = self.expect_ident()?;
                if self.at_punct("(") {
                    let args = self.args()?;
                    let span = expr.span.to(self.prev_span());
                    expr = Expr::new(
                        ExprKind::Call {
                            target: Some(Box::new(expr)),
                            name,
                            args,
                            resolved: CallTarget::Unbound,
                        },
                        span,
                    );
                } else {
                    let span = expr.span.to(name_span);
                    expr = Expr::new(
                        ExprKind::Field {
                            target: Box::new(expr),
                            name,
                        },
                        span,
                    );
                }
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                let span = expr.span.to(self.prev_span());
                expr = Expr::new(
                    ExprKind::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            } else if self.at_punct("++") || self.at_punct("--") {
                let delta = if self.at_punct("++") { 1 } else { -1 };
                self.pos += 1;
                let span = expr.span.to(self.prev_span());
                expr = Expr::new(
                    ExprKind::Step {
                        target: Box::new(expr),
                        delta,
                        prefix: false,
                    },
                    span,
                );
            } else if self.at_punct("::") {
                return self.error("method references are not supported");
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn args(&mut self) -> PResult<Vec<Expr>> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        if self.eat_punct(")") {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(args)
    }

    fn primary(&mut self) -> PResult<Expr> {
        let Some(tok) = self.peek().cloned() else {
            return self.error("illegal start of expression");
        };
        let span = tok.span;
        let literal = match tok.kind {
            TokenKind::Int => Some(parse_int(&tok)?),
            TokenKind::Long => Some(parse_long(&tok)?),
            TokenKind::Double => Some(parse_double(&tok)?),
            TokenKind::Char => match tok.text.chars().next() {
                Some(c) if tok.text.chars().count() == 1 => Some(Literal::Char(c)),
                Some(_) => return Err(ParseError::new("unclosed character literal", span)),
                None => return Err(ParseError::new("empty character literal", span)),
            },
            TokenKind::Str | TokenKind::TextBlock => Some(Literal::Str(tok.text.clone())),
            _ => None,
        };
        if let Some(lit) = literal {
            self.pos += 1;
            return Ok(Expr::new(ExprKind::Literal(lit), span));
        }

        if tok.kind == TokenKind::Punct {
            if tok.is_punct("(") {
                if self.lambda_ahead() {
                    return self.error("lambda expressions are not supported");
                }
                self.pos += 1;
                let inner = self.expression()?;
                self.expect_punct(")")?;
                return Ok(Expr::new(inner.kind, span.to(self.prev_span())));
            }
            return self.error("illegal start of expression");
        }

        match tok.text.as_str() {
            "true" | "false" => {
                self.pos += 1;
                Ok(Expr::new(
                    ExprKind::Literal(Literal::Bool(tok.text == "true")),
                    span,
                ))
            }
            "null" => {
                self.pos += 1;
                Ok(Expr::new(ExprKind::Literal(Literal::Null), span))
            }
            "this" => {
                self.pos += 1;
                if self.at_punct("(") {
                    return self.error("constructor chaining is not supported");
                }
                Ok(Expr::new(ExprKind::This, span))
            }
            "new" => self.creation(),
            "super" if self.peek_at(1).is_some_and(|t| t.is_punct("(")) => {
                self.pos += 1;
                let args = self.args()?;
                Ok(Expr::new(
                    ExprKind::Call {
                        target: None,
                        name: "super".to_string(),
                        args,
                        resolved: CallTarget::Unbound,
                    },
                    span.to(self.prev_span()),
                ))
            }
            "super" => self.error("'super' member access is not supported"),
            word if is_keyword(word) => self.error("illegal start of expression"),
            _ => {
                let (name, span) = self.expect_ident()?;
                if self.at_punct("->") {
                    return self.error("lambda expressions are not supported");
                }
                if self.at_punct("(") {
                    let args = self.args()?;
                    return Ok(Expr::new(
                        ExprKind::Call {
                            target: None,
                            name,
                            args,
                            resolved: CallTarget::Unbound,
                        },
                        span.to(self.prev_span()),
                    ));
                }
                Ok(Expr::new(
                    ExprKind::Name {
                        name,
                        binding: NameRef::Unbound,
                    },
                    span,
                ))
            }
        }
    }

    fn lambda_ahead(&mut self) -> bool {
        self.lookahead(|p| {
            p.skip_balanced("(", ")")?;
            Ok(p.at_punct("->"))
        })
    }

    fn creation(&mut self) -> PResult<Expr> {
        let start = self.expect_word("new")?;
        let base = self.type_base()?;
        if self.at_punct("[") {
            let mut lengths = Vec::new();
            let mut dims = 0usize;
            while self.eat_punct("[") {
                if self.eat_punct("]") {
                    dims += 1;
                    continue;
                }
                if dims > lengths.len() {
                    return self.error("']' expected");
                }
                lengths.push(self.expression()?);
                self.expect_punct("]")?;
                dims += 1;
            }
            let init = if self.at_punct("{") {
                if !lengths.is_empty() {
                    return self.error("array creation with both dimension expression and initialization is illegal");
                }
                self.pos += 1;
                Some(self.array_elems()?)
            } else {
                None
            };
            if lengths.is_empty() && init.is_none() {
                return self.error("array dimension missing");
            }
            let elem = TypeRef {
                dims: dims - 1,
                ..base
            };
            return Ok(Expr::new(
                ExprKind::NewArray {
                    elem,
                    lengths,
                    init,
                },
                start.to(self.prev_span()),
            ));
        }
        if is_primitive(&base.name) {
            return self.error("'[' expected");
        }
        let args = self.args()?;
        if self.at_punct("{") {
            return self.error("anonymous classes are not supported");
        }
        Ok(Expr::new(
            ExprKind::New {
                class: base,
                args,
                resolved: CtorTarget::Unbound,
            },
            start.to(self.prev_span()),
        ))
    }
}

fn is_statement_expression(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Assign { .. } | ExprKind::Step { .. } | ExprKind::Call { .. } | ExprKind::New { .. }
    )
}

fn radix_digits(text: &str) -> (u32, &str) {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        (16, hex)
    } else if text.len() > 1 && text.starts_with('0') {
        (8, &text[1..])
    } else {
        (10, text)
    }
}

fn parse_int(tok: &Token) -> PResult<Literal> {
    let too_large = || ParseError::new("integer number too large", tok.span);
    let (radix, digits) = radix_digits(&tok.text);
    if radix == 10 {
        digits.parse::<i32>().map(Literal::Int).map_err(|_| too_large())
    } else {
        u32::from_str_radix(digits, radix)
            .map(|v| Literal::Int(v as i32))
            .map_err(|_| too_large())
    }
}

fn parse_long(tok: &Token) -> PResult<Literal> {
    let too_large = || ParseError::new("long number too large", tok.span);
    let text = tok.text.trim_end_matches(['l', 'L']);
    let (radix, digits) = radix_digits(text);
    if radix == 10 {
        digits.parse::<i64>().map(Literal::Long).map_err(|_| too_large())
    } else {
        u64::from_str_radix(digits, radix)
            .map(|v| Literal::Long(v as i64))
            .map_err(|_| too_large())
    }
}

fn parse_double(tok: &Token) -> PResult<Literal> {
    tok.text
        .trim_end_matches(['d', 'D', 'f', 'F'])
        .parse::<f64>()
        .map(Literal::Double)
        .map_err(|_| ParseError::new("malformed floating-point literal", tok.span))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(src: &str) -> Expr {
        Parser::new(src).unwrap().expression_unit().unwrap()
    }

    fn stmt(src: &str) -> Stmt {
        Parser::new(src).unwrap().statement_unit().unwrap()
    }

    fn shape(src: &str) -> Option<DeclShape> {
        Parser::new(src).unwrap().declaration_shape()
    }

    #[test]
    fn test_precedence() {
        let e = expr("1 + 2 * 3");
        let ExprKind::Binary { op, rhs, .. } = e.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let e = expr("a = b = 3");
        let ExprKind::Assign { value, .. } = e.kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::Assign { .. }));
    }

    #[test]
    fn test_assignment_requires_variable() {
        let err = Parser::new("1 = 2").unwrap().expression_unit().unwrap_err();
        assert!(err.message.contains("variable required"));
    }

    #[test]
    fn test_casts() {
        assert!(matches!(expr("(int) 3.5").kind, ExprKind::Cast { .. }));
        assert!(matches!(expr("(String) o").kind, ExprKind::Cast { .. }));
        assert!(matches!(expr("(a) + b").kind, ExprKind::Binary { .. }));
    }

    #[test]
    fn test_min_value_literals() {
        assert_eq!(expr("-2147483648").kind, ExprKind::Literal(Literal::Int(i32::MIN)));
        assert!(Parser::new("2147483648").unwrap().expression_unit().is_err());
        assert_eq!(expr("0xFF").kind, ExprKind::Literal(Literal::Int(255)));
        assert_eq!(expr("010").kind, ExprKind::Literal(Literal::Int(8)));
    }

    #[test]
    fn test_nested_generics_split_shift() {
        let vars = Parser::new("List<List<String>> xs;")
            .unwrap()
            .vars_unit()
            .unwrap();
        let ty = vars[0].ty.as_ref().unwrap();
        assert_eq!(ty.display(), "List<List<String>>");
    }

    #[test]
    fn test_multiple_declarators() {
        let vars = Parser::new("int a = 1, b, c[] = {1, 2};")
            .unwrap()
            .vars_unit()
            .unwrap();
        assert_eq!(vars.len(), 3);
        assert_eq!(vars[2].ty.as_ref().unwrap().dims, 1);
        assert!(matches!(
            vars[2].init.as_ref().unwrap().kind,
            ExprKind::ArrayLiteral(_)
        ));
    }

    #[test]
    fn test_class_members() {
        let decl = Parser::new(
            "public class Point extends Base implements A, B {
                private int x;
                static final int ORIGIN = 0;
                Point(int x) { this.x = x; }
                int getX() { return x; }
            }",
        )
        .unwrap()
        .type_unit()
        .unwrap();
        assert_eq!(decl.kind, TypeDeclKind::Class);
        assert_eq!(decl.name, "Point");
        assert_eq!(decl.extends[0].name, "Base");
        assert_eq!(decl.implements.len(), 2);
        assert_eq!(decl.fields.len(), 2);
        assert!(decl.fields[1].modifiers.is_static);
        assert_eq!(decl.ctors.len(), 1);
        assert_eq!(decl.methods[0].name, "getX");
    }

    #[test]
    fn test_enum_record_interface() {
        let e = Parser::new("enum Color { RED, GREEN, }").unwrap().type_unit().unwrap();
        assert_eq!(e.constants, vec!["RED", "GREEN"]);

        let r = Parser::new("record P(int x, int y) {}").unwrap().type_unit().unwrap();
        assert_eq!(r.components.len(), 2);

        let i = Parser::new("interface Shape { double area(); default int sides() { return 0; } }")
            .unwrap()
            .type_unit()
            .unwrap();
        assert!(i.methods[0].modifiers.is_abstract);
        assert!(i.methods[1].body.is_some());
    }

    #[test]
    fn test_method_without_body_is_rejected() {
        let err = Parser::new("int f();").unwrap().method_unit().unwrap_err();
        assert!(err.message.contains("missing method body"));
    }

    #[test]
    fn test_generic_method() {
        let m = Parser::new("<T> T id(T t) { return t; }")
            .unwrap()
            .method_unit()
            .unwrap();
        assert_eq!(m.type_params, vec!["T"]);
        assert_eq!(m.param_sig(), "T");
    }

    #[test]
    fn test_statements() {
        assert!(matches!(stmt("for (int i = 0; i < 3; i++) x += i;").kind, StmtKind::For { .. }));
        assert!(matches!(stmt("for (var s : items) {}").kind, StmtKind::ForEach { .. }));
        assert!(matches!(
            stmt("try { f(); } catch (IllegalStateException | RuntimeException e) { } finally { }").kind,
            StmtKind::Try { .. }
        ));
        assert!(matches!(stmt("if (a) b(); else c();").kind, StmtKind::If { other: Some(_), .. }));
        assert!(matches!(stmt("do { i++; } while (i < 3);").kind, StmtKind::DoWhile { .. }));
    }

    #[test]
    fn test_not_a_statement() {
        let err = Parser::new("{ x + 1; }").unwrap().statement_unit().unwrap_err();
        assert_eq!(err.message, "not a statement");
    }

    #[test]
    fn test_local_declaration_vs_comparison() {
        let Stmt { kind: StmtKind::Block(body), .. } = stmt("{ int n = 3; n++; }") else {
            panic!("expected block");
        };
        assert!(matches!(body[0].kind, StmtKind::Local(_)));
        // `i < n;` is not a statement expression, so the block fails to parse.
        assert!(Parser::new("{ i < n; }").unwrap().statement_unit().is_err());
    }

    #[test]
    fn test_new_array() {
        let e = expr("new int[3][]");
        let ExprKind::NewArray { elem, lengths, .. } = e.kind else {
            panic!("expected array creation");
        };
        assert_eq!(elem.dims, 1);
        assert_eq!(lengths.len(), 1);
        assert!(matches!(expr("new int[] {1, 2}").kind, ExprKind::NewArray { init: Some(_), .. }));
    }

    #[test]
    fn test_declaration_shapes() {
        assert_eq!(shape("import java.util.List;"), Some(DeclShape::Import));
        assert_eq!(shape("public class A {}"), Some(DeclShape::Type(TypeDeclKind::Class)));
        assert_eq!(shape("record R(int a) {}"), Some(DeclShape::Type(TypeDeclKind::Record)));
        assert_eq!(shape("@interface Tag {}"), Some(DeclShape::Type(TypeDeclKind::Annotation)));
        assert_eq!(shape("int mu() { return 1; }"), Some(DeclShape::Method));
        assert_eq!(shape("int x;"), Some(DeclShape::Var));
        assert_eq!(shape("int x"), Some(DeclShape::Var));
        assert_eq!(shape("var y = 1;"), Some(DeclShape::Var));
        assert_eq!(shape("Map<String, Integer> m = null;"), Some(DeclShape::Var));
        assert_eq!(shape("x = 5;"), None);
        assert_eq!(shape("record = 5;"), None);
        assert_eq!(shape("foo(1);"), None);
        assert_eq!(shape("a < b"), None);
    }

    #[test]
    fn test_lex_failures_surface() {
        assert!(Parser::new("\"abc").is_err());
        assert!(Parser::new("int # x;").is_err());
    }
}
