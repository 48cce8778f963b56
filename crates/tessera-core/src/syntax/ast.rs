//! Syntax tree of the reference snippet language.
//!
//! The tree doubles as the executable form: the compiler fills in the
//! binding slots (`NameRef`, `CallTarget`, `CtorTarget`) and the runtime
//! interprets the bound tree. All nodes are `bincode` encodable so they can
//! cross the remote execution boundary.

use bincode::{Decode, Encode};

use super::Span;

/// A written type, e.g. `int`, `String`, `List<String>`, `int[]`.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct TypeRef {
    /// Possibly qualified name (`java.util.List`).
    pub name: String,
    pub args: Vec<TypeRef>,
    pub dims: usize,
    pub span: Span,
}

impl TypeRef {
    pub fn simple(name: &str, span: Span) -> Self {
        Self {
            name: name.to_string(),
            args: Vec::new(),
            dims: 0,
            span,
        }
    }

    /// Last segment of the written name.
    pub fn base(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// Element type of an array type.
    pub fn element(&self) -> TypeRef {
        TypeRef {
            dims: self.dims.saturating_sub(1),
            ..self.clone()
        }
    }

    pub fn display(&self) -> String {
        let mut out = self.base().to_string();
        if !self.args.is_empty() {
            let args: Vec<_> = self.args.iter().map(TypeRef::display).collect();
            out.push('<');
            out.push_str(&args.join(", "));
            out.push('>');
        }
        for _ in 0..self.dims {
            out.push_str("[]");
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum Literal {
    Int(i32),
    Long(i64),
    Double(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Null,
}

/// What a simple name was bound to by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum NameRef {
    Unbound,
    Local,
    /// Field of the enclosing object (or static field of the enclosing type).
    Field,
    /// Snippet-level variable.
    Global,
    /// A type name used as a qualifier (`Color.RED`, `Util.helper()`).
    Type,
    /// Builtin library class (`System`, `Math`).
    Builtin,
}

/// Call resolution filled in by the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum CallTarget {
    Unbound,
    /// Snippet-level method, identified by its parameter signature.
    Global { sig: String },
    /// Method of the enclosing type.
    Member { sig: String },
    /// Static method of a named user type.
    Static { class: String, sig: String },
    /// Instance method dispatched on the receiver's runtime class.
    Virtual { sig: String },
    /// `super(...)` in a constructor; `class` is `None` for builtin
    /// superclasses and `sig` is `None` for the implicit constructor.
    Super {
        class: Option<String>,
        sig: Option<String>,
    },
    /// Builtin library function. Keys containing `#` are instance methods
    /// whose receiver is evaluated first (`String#length`); the rest are
    /// static (`Math.max`, `System.out.println`).
    Builtin(String),
}

/// Constructor resolution filled in by the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum CtorTarget {
    Unbound,
    /// User class; `None` means the implicit no-argument constructor.
    User { sig: Option<String> },
    /// Canonical record constructor.
    Record,
    /// Builtin exception or `Object`.
    Builtin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::UShr => ">>>",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum ExprKind {
    Literal(Literal),
    Name {
        name: String,
        binding: NameRef,
    },
    This,
    Field {
        target: Box<Expr>,
        name: String,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        target: Option<Box<Expr>>,
        name: String,
        args: Vec<Expr>,
        resolved: CallTarget,
    },
    New {
        class: TypeRef,
        args: Vec<Expr>,
        resolved: CtorTarget,
    },
    NewArray {
        elem: TypeRef,
        lengths: Vec<Expr>,
        init: Option<Vec<Expr>>,
    },
    /// `{1, 2, 3}` in an initializer position.
    ArrayLiteral(Vec<Expr>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// `++x`, `x--` and friends.
    Step {
        target: Box<Expr>,
        delta: i32,
        prefix: bool,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        op: Option<BinaryOp>,
        value: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        other: Box<Expr>,
    },
    Cast {
        ty: TypeRef,
        expr: Box<Expr>,
    },
    InstanceOf {
        expr: Box<Expr>,
        ty: TypeRef,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// True if the expression may appear on the left of `=`.
    pub fn is_assignable(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Name { .. } | ExprKind::Field { .. } | ExprKind::Index { .. }
        )
    }
}

/// A variable declarator; `ty` is `None` for `var`.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct VarDecl {
    pub ty: Option<TypeRef>,
    pub name: String,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct CatchClause {
    pub types: Vec<TypeRef>,
    pub name: String,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum StmtKind {
    Empty,
    Block(Vec<Stmt>),
    Local(Vec<VarDecl>),
    Expr(Expr),
    If {
        cond: Expr,
        then: Box<Stmt>,
        other: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    For {
        init: Vec<Stmt>,
        cond: Option<Expr>,
        update: Vec<Expr>,
        body: Box<Stmt>,
    },
    ForEach {
        var: VarDecl,
        iterable: Expr,
        body: Box<Stmt>,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    Throw(Expr),
    Try {
        body: Vec<Stmt>,
        catches: Vec<CatchClause>,
        finally: Option<Vec<Stmt>>,
    },
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct Modifiers {
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Param {
    pub ty: TypeRef,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct MethodDecl {
    pub modifiers: Modifiers,
    pub type_params: Vec<String>,
    pub ret: TypeRef,
    pub name: String,
    pub params: Vec<Param>,
    pub throws: Vec<TypeRef>,
    /// `None` for abstract and interface methods.
    pub body: Option<Vec<Stmt>>,
    pub span: Span,
}

impl MethodDecl {
    /// Parameter signature used for overload identity, e.g. `int,String`.
    pub fn param_sig(&self) -> String {
        param_sig(&self.params)
    }
}

pub fn param_sig(params: &[Param]) -> String {
    params
        .iter()
        .map(|p| p.ty.display())
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct CtorDecl {
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct FieldDecl {
    pub modifiers: Modifiers,
    pub var: VarDecl,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode, serde::Serialize, serde::Deserialize,
)]
pub enum TypeDeclKind {
    Class,
    Interface,
    Enum,
    Record,
    Annotation,
}

impl TypeDeclKind {
    pub fn keyword(self) -> &'static str {
        match self {
            TypeDeclKind::Class => "class",
            TypeDeclKind::Interface => "interface",
            TypeDeclKind::Enum => "enum",
            TypeDeclKind::Record => "record",
            TypeDeclKind::Annotation => "@interface",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct TypeDecl {
    pub kind: TypeDeclKind,
    pub modifiers: Modifiers,
    pub name: String,
    pub type_params: Vec<String>,
    pub extends: Vec<TypeRef>,
    pub implements: Vec<TypeRef>,
    /// Record components.
    pub components: Vec<Param>,
    /// Enum constants.
    pub constants: Vec<String>,
    pub fields: Vec<FieldDecl>,
    pub ctors: Vec<CtorDecl>,
    pub methods: Vec<MethodDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct ImportDecl {
    pub is_static: bool,
    /// Dotted path without the trailing `.*`.
    pub path: String,
    pub on_demand: bool,
    pub span: Span,
}

impl ImportDecl {
    /// Simple name made visible by a single-name import.
    pub fn simple_name(&self) -> Option<&str> {
        if self.on_demand {
            None
        } else {
            self.path.rsplit('.').next()
        }
    }

    pub fn full_name(&self) -> String {
        if self.on_demand {
            format!("{}.*", self.path)
        } else {
            self.path.clone()
        }
    }
}

/// One parsed snippet.
#[derive(Debug, Clone, PartialEq)]
pub enum Unit {
    Import(ImportDecl),
    Type(TypeDecl),
    Method(MethodDecl),
    Vars(Vec<VarDecl>),
    Statement(Stmt),
    Expression(Expr),
}
