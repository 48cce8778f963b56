//! Source analysis that runs before compilation.
//!
//! - `completeness` decides whether a buffer holds a submittable unit
//! - `classify` assigns the unit its snippet kind and declared name
//! - `suggest` completes the word under the cursor

pub mod classify;
pub mod completeness;
pub mod suggest;

pub use classify::{
    Classified, ExpressionKind, ImportKind, SnippetKind, TempNames, TypeKind, VarKind, classify,
};
pub use completeness::{Completeness, CompletionInfo, analyze};
pub use suggest::{Suggestions, suggest};
