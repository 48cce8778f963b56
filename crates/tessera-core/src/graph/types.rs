//! Types for the snippet graph.

use std::fmt;

use crate::analysis::{SnippetKind, VarKind};
use crate::compile::{
    ClassBytecode, CompileUnit, Declaration, Diagnostic, INIT_METHOD, Member, RUN_METHOD, Symbol,
    Ty, class_name_for,
};
use crate::execute::RunException;

/// Opaque handle of a snippet within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnippetKey(pub(crate) usize);

impl SnippetKey {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Display for SnippetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snippet_{}", self.0)
    }
}

/// Lifecycle status of a snippet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Before the snippet was accepted.
    Nonexistent,
    Valid,
    /// Declared and usable by other snippets, but referencing undefined
    /// names in its body. Invoking it fails until they are declared.
    RecoverableDefined,
    /// Unresolved names in its signature; invisible to other snippets.
    RecoverableNotDefined,
    Rejected,
    Overwritten,
    Dropped,
}

impl Status {
    /// Part of the current program.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Status::Valid | Status::RecoverableDefined | Status::RecoverableNotDefined
        )
    }

    /// Visible to the compilation of other snippets.
    pub fn is_defined(self) -> bool {
        matches!(self, Status::Valid | Status::RecoverableDefined)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Nonexistent => "NONEXISTENT",
            Status::Valid => "VALID",
            Status::RecoverableDefined => "RECOVERABLE_DEFINED",
            Status::RecoverableNotDefined => "RECOVERABLE_NOT_DEFINED",
            Status::Rejected => "REJECTED",
            Status::Overwritten => "OVERWRITTEN",
            Status::Dropped => "DROPPED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the engine knows about one snippet.
#[derive(Debug, Clone)]
pub struct Snippet {
    pub key: SnippetKey,
    /// User-visible id (`1`, `s1`, `e1`).
    pub id: String,
    pub source: String,
    pub kind: SnippetKind,
    /// Declared name, or the synthesized name of a temporary.
    pub name: Option<String>,
    pub status: Status,
    pub declaration: Option<Declaration>,
    pub diagnostics: Vec<Diagnostic>,
    /// Unresolved names, in order of first occurrence.
    pub unresolved: Vec<Symbol>,
    /// Resolved references to other snippets' declarations.
    pub references: Vec<Symbol>,
    pub value_type: Option<Ty>,
    /// Entry point of the loaded artifact, if it has one.
    pub entry: Option<&'static str>,
}

impl Snippet {
    pub(crate) fn new(key: SnippetKey, unit: CompileUnit) -> Self {
        Self {
            key,
            id: unit.snippet_id,
            source: unit.source,
            kind: unit.kind,
            name: unit.name,
            status: Status::Nonexistent,
            declaration: None,
            diagnostics: Vec::new(),
            unresolved: Vec::new(),
            references: Vec::new(),
            value_type: None,
            entry: None,
        }
    }

    /// Name of the class its artifact is loaded under.
    pub fn class_name(&self) -> String {
        class_name_for(&self.id)
    }

    /// Declarations stay part of the program; a temporary whose expression
    /// has no value is run like a statement.
    pub fn is_persistent(&self) -> bool {
        match self.kind {
            SnippetKind::Var(VarKind::TempVarExpression) => self.value_type != Some(Ty::Void),
            kind => kind.is_persistent(),
        }
    }

    pub fn is_var(&self) -> bool {
        matches!(self.kind, SnippetKind::Var(_)) && self.is_persistent()
    }

    pub fn signature(&self) -> Option<String> {
        self.declaration.as_ref().map(Declaration::signature)
    }

    /// Symbol this snippet provides to others.
    pub fn provides(&self) -> Option<Symbol> {
        self.declaration.as_ref().and_then(Declaration::provides)
    }

    pub fn unresolved_names(&self) -> Vec<String> {
        self.unresolved.iter().map(|s| s.name().to_string()).collect()
    }

    /// Human description, e.g. `variable x` or `method mu()`.
    pub fn describe(&self) -> String {
        match &self.declaration {
            Some(Declaration::Var(v)) => format!("variable {}", v.name),
            Some(Declaration::Method(m)) => format!("method {}", m.display()),
            Some(Declaration::Type(t)) => format!("{} {}", t.kind.keyword(), t.name),
            Some(Declaration::Import(_)) => self.source.trim().trim_end_matches(';').to_string(),
            None => match &self.name {
                Some(name) => name.clone(),
                None => self.kind.kind_name().to_lowercase(),
            },
        }
    }

    pub(crate) fn identity(&self) -> Option<Identity> {
        Identity::of(self)
    }
}

/// Redeclaration identity: a new active snippet with the same identity
/// overwrites the old one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Identity {
    Var(String),
    /// Name plus written parameter types.
    Method(String, String),
    Type(String),
    /// Full normalized text.
    Import(String),
}

impl Identity {
    fn of(snippet: &Snippet) -> Option<Self> {
        if !snippet.is_persistent() {
            return None;
        }
        match &snippet.declaration {
            Some(Declaration::Var(v)) => Some(Identity::Var(v.name.clone())),
            Some(Declaration::Method(m)) => Some(Identity::Method(m.name.clone(), m.sig.clone())),
            Some(Declaration::Type(t)) => Some(Identity::Type(t.name.clone())),
            Some(decl @ Declaration::Import(_)) => Some(Identity::Import(decl.signature())),
            None => snippet.name.clone().map(|name| match snippet.kind {
                SnippetKind::TypeDecl(_) => Identity::Type(name),
                SnippetKind::Method => Identity::Method(name, String::new()),
                _ => Identity::Var(name),
            }),
        }
    }
}

/// Entry point of an artifact.
pub(crate) fn entry_point(artifact: &ClassBytecode) -> Option<&'static str> {
    match artifact.member {
        Member::Var { .. } => Some(INIT_METHOD),
        Member::Exec(_) => Some(RUN_METHOD),
        Member::Method(_) | Member::Type(_) | Member::Import => None,
    }
}

/// One status change caused by an evaluation or drop.
#[derive(Debug, Clone, PartialEq)]
pub struct SnippetEvent {
    pub snippet: SnippetKey,
    pub previous: Status,
    pub status: Status,
    pub is_signature_change: bool,
    /// Snippet whose change triggered this one; `None` for the snippet the
    /// caller evaluated or dropped.
    pub cause: Option<SnippetKey>,
    /// Display value of an executed expression or initialized variable.
    pub value: Option<String>,
    pub exception: Option<RunException>,
}

impl SnippetEvent {
    pub(crate) fn new(
        snippet: SnippetKey,
        previous: Status,
        status: Status,
        is_signature_change: bool,
        cause: Option<SnippetKey>,
    ) -> Self {
        Self {
            snippet,
            previous,
            status,
            is_signature_change,
            cause,
            value: None,
            exception: None,
        }
    }

    /// The status did not change.
    pub fn is_noop(&self) -> bool {
        self.previous == self.status && !self.is_signature_change
    }
}

/// What the graph asks of the execution backend after a change.
#[derive(Debug, Default)]
pub struct Transition {
    pub events: Vec<SnippetEvent>,
    /// Artifacts to install, in dependency order.
    pub load: Vec<ClassBytecode>,
    /// Classes of overwritten, dropped or broken snippets.
    pub retire: Vec<String>,
    /// Variables that became valid and still need their initializer run.
    pub initialize: Vec<SnippetKey>,
}
