//! Core engine for the tessera incremental snippet shell.
//!
//! This crate provides:
//! - Completeness analysis and classification of source units
//! - A reference compiler and interpreter for a small Java-flavoured language
//! - The snippet dependency graph with corralling, overwrite and drop cascades
//! - Execution control with failover between in-process and worker backends
//! - Byte pipes and the worker protocol that carry user I/O across them

pub mod analysis;
pub mod compile;
pub mod config;
pub mod engine;
pub mod error;
pub mod execute;
pub mod graph;
pub mod ids;
pub mod ipc;
pub mod runtime;
pub mod syntax;

pub use analysis::{Completeness, CompletionInfo, SnippetKind, Suggestions, analyze, classify};
pub use compile::{Compiler, Diagnostic, SketchCompiler};
pub use config::{EngineConfig, Feedback};
pub use engine::{Engine, EngineBuilder};
pub use error::{Error, FailoverAttempt, Result};
pub use execute::{
    BackendFactory, BackendRegistry, ExecutionControl, ExecutionSpec, RunException, StopHandle,
    UserIo,
};
pub use graph::{Snippet, SnippetEvent, SnippetKey, Status};
pub use ids::{IdGenerator, IdSpace, SequentialIds};
