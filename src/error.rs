use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeybankError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("System error: {0}")]
    Sys(#[from] nix::errno::Errno),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Expected {expected} files for {pattern} but got {actual}")]
    CountMismatch {
        pattern: String,
        expected: usize,
        actual: usize,
    },

    #[error(
        "Unexpected repository status '{code}' for {path}. Do not use git directly, use 'keybank commit' instead"
    )]
    ProtocolViolation { code: String, path: String },

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Identity error: {0}")]
    Identity(String),

    #[error("Command '{program}' failed with {status}: {output}")]
    Command {
        program: String,
        status: String,
        output: String,
    },

    #[error("Store not initialized: {}", .0.display())]
    NotInitialized(PathBuf),

    #[error("Store already initialized: {}", .0.display())]
    AlreadyInitialized(PathBuf),

    #[error("Keybank '{0}' is not attached. Use 'keybank attach' to attach it")]
    NotAttached(String),

    #[error("Keybank '{0}' is already attached")]
    AlreadyAttached(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, KeybankError>;
