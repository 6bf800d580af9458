//! Error types for lambda-pack

use std::io;
use std::path::PathBuf;

use crate::storage::StoreError;

/// Result type for lambda-pack operations
pub type Result<T> = std::result::Result<T, PackError>;

/// Error types that can occur while packaging or uploading
#[derive(Debug)]
pub enum PackError {
    /// I/O error
    Io(io::Error),
    /// Invalid ZIP format or structure
    InvalidFormat(String),
    /// Entry not found in ZIP archive
    EntryNotFound(String),
    /// Unsupported compression method
    UnsupportedCompression(u16),
    /// Source path is missing or is not a directory
    InvalidDirectory(PathBuf),
    /// Function directory whose name is not valid UTF-8
    InvalidFunctionName(PathBuf),
    /// Directory walk failed
    Walk(walkdir::Error),
    /// Object storage request failed
    Store(StoreError),
}

impl std::fmt::Display for PackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackError::Io(e) => write!(f, "I/O error: {}", e),
            PackError::InvalidFormat(msg) => write!(f, "Invalid ZIP format: {}", msg),
            PackError::EntryNotFound(name) => write!(f, "Entry not found: {}", name),
            PackError::UnsupportedCompression(method) => {
                write!(f, "Unsupported compression method: {}", method)
            }
            PackError::InvalidDirectory(path) => {
                write!(f, "Not a directory: {}", path.display())
            }
            PackError::InvalidFunctionName(path) => {
                write!(f, "Function name is not valid UTF-8: {}", path.display())
            }
            PackError::Walk(e) => write!(f, "Directory walk failed: {}", e),
            PackError::Store(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for PackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PackError::Io(e) => Some(e),
            PackError::Walk(e) => Some(e),
            PackError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PackError {
    fn from(err: io::Error) -> Self {
        PackError::Io(err)
    }
}

impl From<walkdir::Error> for PackError {
    fn from(err: walkdir::Error) -> Self {
        PackError::Walk(err)
    }
}

impl From<StoreError> for PackError {
    fn from(err: StoreError) -> Self {
        PackError::Store(err)
    }
}

impl PackError {
    /// The storage error behind this failure, if it came from the object store
    pub fn as_store_error(&self) -> Option<&StoreError> {
        match self {
            PackError::Store(e) => Some(e),
            _ => None,
        }
    }
}
