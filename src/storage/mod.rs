//! Object storage seam.
//!
//! The deploy flow only needs four calls from a bucket: does it exist, create
//! it, what is stored under a key, and put bytes under a key. [`ObjectStore`]
//! captures exactly that so the flow can run against S3 or an in-process
//! [`MemoryStore`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

mod memory;

pub use memory::{MemoryStore, StoreCall};

/// User metadata key carrying the hex MD5 of an uploaded package
pub const CONTENT_HASH_METADATA: &str = "content-md5";

/// Error codes object stores use for "no such thing"
const NOT_FOUND_CODES: &[&str] = &["404", "NotFound", "NoSuchBucket", "NoSuchKey"];

/// Store operation that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    HeadBucket,
    CreateBucket,
    HeadObject,
    PutObject,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreOperation::HeadBucket => "HeadBucket",
            StoreOperation::CreateBucket => "CreateBucket",
            StoreOperation::HeadObject => "HeadObject",
            StoreOperation::PutObject => "PutObject",
        };
        f.write_str(name)
    }
}

/// Failure reported by an object store, with the HTTP status and service code
/// when the store supplied them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub operation: StoreOperation,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
}

impl StoreError {
    pub fn new(operation: StoreOperation, message: impl Into<String>) -> Self {
        Self {
            operation,
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// Error carrying an HTTP status whose service code is the status itself
    pub fn with_status(operation: StoreOperation, status: u16) -> Self {
        Self {
            operation,
            status: Some(status),
            code: Some(status.to_string()),
            message: format!("service returned HTTP {}", status),
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Whether the target bucket or key does not exist
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
            || self
                .code
                .as_deref()
                .is_some_and(|code| NOT_FOUND_CODES.contains(&code))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed", self.operation)?;
        match (&self.code, self.status) {
            (Some(code), Some(status)) => write!(f, " ({}, HTTP {})", code, status)?,
            (Some(code), None) => write!(f, " ({})", code)?,
            (None, Some(status)) => write!(f, " (HTTP {})", status)?,
            (None, None) => {}
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for StoreError {}

/// What the store reports about an existing object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHead {
    pub etag: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl ObjectHead {
    /// The MD5 the stored object was uploaded with, as lowercase hex.
    ///
    /// Prefers the `content-md5` metadata written on upload. Falls back to the
    /// ETag, which equals the MD5 only for single-part uploads; multipart
    /// ETags (`<hash>-<parts>`) give `None`.
    pub fn stored_hash(&self) -> Option<String> {
        if let Some(hash) = self.metadata.get(CONTENT_HASH_METADATA) {
            return Some(hash.trim().to_ascii_lowercase());
        }
        let etag = self.etag.as_deref()?.trim().trim_matches('"');
        if etag.is_empty() || etag.contains('-') {
            return None;
        }
        Some(etag.to_ascii_lowercase())
    }
}

/// Upload request for a single object
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub bucket: String,
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    /// Base64 MD5 for the `Content-MD5` integrity header
    pub content_md5: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Minimal blob-store surface used by the deploy flow
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Succeeds when the bucket exists and is reachable
    async fn head_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    /// `Ok(None)` when the key does not exist; other failures propagate
    async fn head_object(&self, bucket: &str, key: &str)
        -> Result<Option<ObjectHead>, StoreError>;

    async fn put_object(&self, request: PutRequest) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(etag: Option<&str>) -> ObjectHead {
        ObjectHead {
            etag: etag.map(str::to_string),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn not_found_by_status_or_code() {
        assert!(StoreError::with_status(StoreOperation::HeadBucket, 404).is_not_found());
        assert!(StoreError::new(StoreOperation::HeadObject, "gone")
            .code("NoSuchKey")
            .is_not_found());
        assert!(StoreError::new(StoreOperation::HeadBucket, "gone")
            .code("NotFound")
            .is_not_found());
        assert!(!StoreError::with_status(StoreOperation::HeadBucket, 401).is_not_found());
        assert!(!StoreError::with_status(StoreOperation::HeadBucket, 500).is_not_found());
        assert!(!StoreError::new(StoreOperation::HeadBucket, "timeout").is_not_found());
    }

    #[test]
    fn stored_hash_strips_etag_quotes() {
        let head = head(Some("\"F4ACD55A9E25A6C7A789DDBE52BC7521\""));
        assert_eq!(
            head.stored_hash().as_deref(),
            Some("f4acd55a9e25a6c7a789ddbe52bc7521")
        );
    }

    #[test]
    fn multipart_etag_has_no_hash() {
        assert_eq!(head(Some("\"9b2cf535f27731c974343645a3985328-3\"")).stored_hash(), None);
        assert_eq!(head(None).stored_hash(), None);
        assert_eq!(head(Some("\"\"")).stored_hash(), None);
    }

    #[test]
    fn metadata_hash_wins_over_etag() {
        let mut head = head(Some("\"abc-2\""));
        head.metadata.insert(
            CONTENT_HASH_METADATA.to_string(),
            "0123456789abcdef0123456789abcdef".to_string(),
        );
        assert_eq!(
            head.stored_hash().as_deref(),
            Some("0123456789abcdef0123456789abcdef")
        );
    }

    #[test]
    fn display_includes_code_and_status() {
        let err = StoreError::with_status(StoreOperation::HeadBucket, 500);
        assert_eq!(
            err.to_string(),
            "HeadBucket failed (500, HTTP 500): service returned HTTP 500"
        );
    }
}
