use std::{io, path::PathBuf};

use thiserror::Error;

/// Flat error type for the whole crate, covering file access, format,
/// codec, logic and patch-flow failures in one enum rather than one per
/// subsystem.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to open {path:?}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("{path:?} is locked")]
    Locked { path: PathBuf },

    #[error("invalid magic in {0:?}")]
    InvalidMagic(PathBuf),

    #[error("unsupported version 0x{0:x}")]
    UnsupportedVersion(u32),

    #[error("corrupt header: {0}")]
    CorruptHeader(String),

    #[error("corrupt directory: {0}")]
    CorruptDirectory(String),

    #[error("invalid patch mode {0}")]
    InvalidMode(u16),

    #[error("decompression failed: {0}")]
    DecompressFailed(String),

    #[error("compression failed: {0}")]
    CompressFailed(String),

    #[error("entry not found: {0}")]
    EntryNotFound(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("target GRF mismatch: expected {expected}, got {actual}")]
    TargetMismatch { expected: String, actual: String },

    #[error("integrity check failed for {0}")]
    IntegrityFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to decode filename {0:?}")]
    NameDecodeError(Vec<u8>),

    #[error("failed to encode filename: {0}")]
    NameEncodeError(String),

    #[error("walkdir error: {0}")]
    WalkdirError(#[from] walkdir::Error),

    #[error("path strip prefix error: {0}")]
    StripPrefixError(#[from] std::path::StripPrefixError),

    #[error("cannot derive output path from {0:?}")]
    CannotDeriveOutputPath(PathBuf),
}

pub type Result<T> = std::result::Result<T, CoreError>;
