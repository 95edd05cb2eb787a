//! Error taxonomy for the session engine.
//!
//! Each component's error enum expresses one or more of the six categories
//! named in the spec's error-handling design: InvalidTransition, NotFound,
//! Durability, Integrity, Concurrency, Validation. `CoreError` unifies them
//! so a caller at the session layer can match on category without caring
//! which component raised it.

use miette::Diagnostic;
use thiserror::Error;

/// Errors from the operation tracker (C1).
#[derive(Debug, Error, Diagnostic)]
pub enum TrackerError {
    #[error("operation {op_id} cannot transition from {from} via {action}")]
    #[diagnostic(code(tracker::invalid_transition))]
    InvalidTransition {
        op_id: String,
        from: String,
        action: &'static str,
    },

    #[error("operation {0} not found")]
    #[diagnostic(code(tracker::not_found))]
    NotFound(String),

    #[error("operations file for session {session_id} could not be persisted: {source}")]
    #[diagnostic(code(tracker::durability))]
    Durability {
        session_id: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the write-ahead log (C2).
#[derive(Debug, Error, Diagnostic)]
pub enum WalError {
    #[error("wal append failed for session {session_id}: {source}")]
    #[diagnostic(code(wal::durability))]
    Durability {
        session_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("wal record at {path}:{line} is malformed: {reason}")]
    #[diagnostic(code(wal::integrity), help("the record was skipped; recovery continues"))]
    Corrupt {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("no wal file found for session {0}")]
    #[diagnostic(code(wal::not_found))]
    NotFound(String),
}

/// Errors from the checkpoint manager (C3).
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error("checkpoint {0} not found")]
    #[diagnostic(code(checkpoint::not_found))]
    NotFound(String),

    #[error("checkpoint {0} failed checksum verification")]
    #[diagnostic(
        code(checkpoint::integrity),
        help("the checkpoint was rejected; an older checkpoint or WAL replay should be used instead")
    )]
    ChecksumMismatch(String),

    #[error("checkpoint for session {session_id} could not be persisted: {source}")]
    #[diagnostic(code(checkpoint::durability))]
    Durability {
        session_id: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the session manager (C4) and its auxiliary facets (C5).
#[derive(Debug, Error, Diagnostic)]
pub enum SessionError {
    #[error("session {0} not found")]
    #[diagnostic(code(session::not_found))]
    NotFound(String),

    #[error("no active session")]
    #[diagnostic(code(session::not_found))]
    NoActiveSession,

    #[error("document {0} not found")]
    #[diagnostic(code(session::not_found))]
    DocumentNotFound(String),

    #[error("template {0} not found")]
    #[diagnostic(code(session::not_found))]
    TemplateNotFound(String),

    #[error("cannot delete built-in template {0}")]
    #[diagnostic(code(session::validation))]
    BuiltinTemplate(String),

    #[error("invalid github repository url: {0}")]
    #[diagnostic(code(session::validation), help("expected https://github.com/<owner>/<repo>[.git]"))]
    InvalidGithubUrl(String),

    #[error("invalid operation filter: {0}")]
    #[diagnostic(code(session::validation))]
    InvalidFilter(String),

    #[error("session is persisted under a directory that could not be created or written: {source}")]
    #[diagnostic(code(session::durability))]
    Durability {
        #[source]
        source: std::io::Error,
    },
}

/// Top-level error returned across the engine's public API.
#[derive(Debug, Error, Diagnostic)]
pub enum CoreError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Wal(#[from] WalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Session(#[from] SessionError),

    #[error("io error: {0}")]
    #[diagnostic(code(core::io))]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    #[diagnostic(code(core::serde))]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
