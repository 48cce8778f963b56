//! Snippet dependency graph and status state machine.
//!
//! This module provides:
//! - Snippet records with their lifecycle [`Status`]
//! - Redeclaration by identity (variables and types by name, methods by
//!   name and parameter types, imports by text)
//! - Cascading recompilation of dependents when a declaration changes,
//!   is dropped or appears
//! - The events and backend work each change produces

mod state;
mod types;

pub use state::{SnippetGraph, initial_status};
pub use types::{Snippet, SnippetEvent, SnippetKey, Status, Transition};
