//! Executable form of a compiled snippet.
//!
//! Each accepted snippet compiles to one [`ClassBytecode`]: a named wrapper
//! around the bound syntax tree of its single member. Artifacts cross the
//! remote execution boundary as `bincode` payloads.

use bincode::{Decode, Encode};

use super::Ty;
use crate::error::{Error, Result};
use crate::syntax::ast::{Expr, MethodDecl, Stmt, TypeDecl};

/// Entry point that runs a variable's initializer.
pub const INIT_METHOD: &str = "$init";
/// Entry point that runs an expression or statement.
pub const RUN_METHOD: &str = "$run";

/// Wrapper class name for a snippet id.
pub fn class_name_for(snippet_id: &str) -> String {
    format!("$S{snippet_id}")
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum ExecBody {
    Expr(Expr),
    Stmt(Stmt),
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum Member {
    Import,
    Var {
        name: String,
        ty: Ty,
        init: Option<Expr>,
    },
    Method(MethodDecl),
    Type(TypeDecl),
    Exec(ExecBody),
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct ClassBytecode {
    pub class_name: String,
    pub snippet_id: String,
    pub member: Member,
    /// Names still unresolved; invoking anything in the class fails with a
    /// resolution error naming them.
    pub unresolved: Vec<String>,
}

impl ClassBytecode {
    pub fn new(snippet_id: &str, member: Member) -> Self {
        Self {
            class_name: class_name_for(snippet_id),
            snippet_id: snippet_id.to_string(),
            member,
            unresolved: Vec::new(),
        }
    }

    pub fn is_corralled(&self) -> bool {
        !self.unresolved.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (class, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| Error::Deserialization(e.to_string()))?;
        Ok(class)
    }
}
