//! # lambda-pack: Deterministic Function Packaging
//!
//! `lambda-pack` zips serverless function directories and uploads them to an
//! object-storage bucket, skipping the upload when the stored object already
//! has the same content hash.
//!
//! ## Features
//!
//! - **Deterministic archives**: sorted entries, fixed timestamps, permission
//!   bits normalized to `0o755`/`0o644`, so unchanged code hashes the same
//! - **Idempotent uploads**: MD5 compared against the stored checksum first
//! - **Bucket bootstrap**: the target bucket is created when it is missing
//! - **Pluggable storage**: S3 (feature `cloud-s3`) or the in-memory store
//!
//! ## Quick Start
//!
//! ### Packaging a directory
//!
//! ```no_run
//! use lambda_pack::{build_archive, PackageOptions};
//! use std::path::Path;
//!
//! let package = build_archive(Path::new("lambda/api"), &PackageOptions::default())?;
//! println!("{} entries, md5 {}", package.entries.len(), package.content_hash);
//! # Ok::<(), lambda_pack::PackError>(())
//! ```
//!
//! ### Syncing functions to a bucket
//!
//! ```no_run
//! use lambda_pack::{upload_functions, FunctionSource, MemoryStore, PackageOptions};
//!
//! # async fn example() -> lambda_pack::Result<()> {
//! let store = MemoryStore::new();
//! let functions = [FunctionSource::new("api", "lambda/api")];
//!
//! for outcome in upload_functions(&store, "deploy", "functions", &functions, &PackageOptions::default()).await? {
//!     println!("{} -> {:?}", outcome.key, outcome.action);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod deploy;
pub mod error;
pub mod package;
pub mod reader;
pub mod storage;
pub mod writer;

#[cfg(feature = "cloud-s3")]
pub mod cloud;

pub use deploy::{
    discover_functions, ensure_bucket, object_key, upload_functions, upload_if_changed,
    FunctionSource, UploadAction, UploadOutcome,
};
pub use error::{PackError, Result};
pub use package::{build_archive, collect_files, content_hash, Package, PackageOptions, SourceFile};
pub use reader::{ArchiveReader, ZipEntry};
pub use storage::{MemoryStore, ObjectHead, ObjectStore, StoreError, StoreOperation};
pub use writer::{normalize_mode, ArchiveWriter, CompressionMethod};
