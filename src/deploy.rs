//! Build-and-upload flow.
//!
//! For every function directory: build the package, ask the store what it
//! already holds under the function's key, and upload only when nothing is
//! there or the stored hash differs. The target bucket is created on first
//! use when the store reports it as not found.

use crate::error::{PackError, Result};
use crate::package::{build_archive, Package, PackageOptions};
use crate::storage::{ObjectStore, PutRequest, CONTENT_HASH_METADATA};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A function name and the directory holding its code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSource {
    pub name: String,
    pub path: PathBuf,
}

impl FunctionSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// What happened to a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadAction {
    /// Key was missing or held different content
    Uploaded,
    /// Stored hash already matched
    Unchanged,
}

/// Result of syncing one function package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub function: String,
    #[serde(rename = "S3Bucket")]
    pub bucket: String,
    #[serde(rename = "S3Key")]
    pub key: String,
    pub content_hash: String,
    pub size: usize,
    pub action: UploadAction,
}

/// Object key for a function's package under `prefix`
pub fn object_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}.zip", name)
    } else {
        format!("{}/{}.zip", prefix, name)
    }
}

/// Every immediate subdirectory of `root` as a function, sorted by name.
///
/// Hidden directories such as `.git` or `.serverless` are skipped.
pub fn discover_functions(root: &Path) -> Result<Vec<FunctionSource>> {
    if !root.is_dir() {
        return Err(PackError::InvalidDirectory(root.to_path_buf()));
    }

    let mut functions = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() || entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => return Err(PackError::InvalidFunctionName(path)),
        };
        functions.push(FunctionSource::new(name, path));
    }

    functions.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(functions)
}

/// Make sure `bucket` exists, creating it when the store says it is missing.
///
/// Only a not-found answer leads to creation; access-denied, server errors
/// and anything else are returned untouched.
#[tracing::instrument(skip(store))]
pub async fn ensure_bucket<S: ObjectStore + ?Sized>(store: &S, bucket: &str) -> Result<()> {
    match store.head_bucket(bucket).await {
        Ok(()) => {
            debug!("bucket exists");
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            info!("bucket not found, creating");
            store.create_bucket(bucket).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Upload `package` to `bucket/key` unless the stored object has the same hash
#[tracing::instrument(skip(store, package), fields(hash = %package.content_hash))]
pub async fn upload_if_changed<S: ObjectStore + ?Sized>(
    store: &S,
    bucket: &str,
    key: &str,
    package: &Package,
) -> Result<UploadAction> {
    let stored = store.head_object(bucket, key).await?;

    match stored.as_ref().and_then(|head| head.stored_hash()) {
        Some(hash) if hash == package.content_hash => {
            info!("remote object unchanged, skipping upload");
            return Ok(UploadAction::Unchanged);
        }
        Some(hash) => debug!(remote = %hash, "remote object differs"),
        None if stored.is_some() => debug!("remote object has no comparable hash"),
        None => debug!("remote object missing"),
    }

    let metadata = HashMap::from([(
        CONTENT_HASH_METADATA.to_string(),
        package.content_hash.clone(),
    )]);
    store
        .put_object(PutRequest {
            bucket: bucket.to_string(),
            key: key.to_string(),
            body: package.bytes.clone(),
            content_type: "application/zip".to_string(),
            content_md5: Some(package.content_md5_base64()),
            metadata,
        })
        .await?;

    info!(size = package.len(), "uploaded package");
    Ok(UploadAction::Uploaded)
}

/// Package each function and sync it to `bucket` under `prefix`.
///
/// The bucket is ensured once up front. Functions are processed in the order
/// given and the first failure stops the run.
#[tracing::instrument(skip(store, functions, options), fields(functions = functions.len()))]
pub async fn upload_functions<S: ObjectStore + ?Sized>(
    store: &S,
    bucket: &str,
    prefix: &str,
    functions: &[FunctionSource],
    options: &PackageOptions,
) -> Result<Vec<UploadOutcome>> {
    ensure_bucket(store, bucket).await?;

    let mut outcomes = Vec::with_capacity(functions.len());
    for function in functions {
        let package = build_package(&function.path, options).await?;
        debug!(
            function = %function.name,
            entries = package.entries.len(),
            hash = %package.content_hash,
            "built package"
        );

        let key = object_key(prefix, &function.name);
        let action = upload_if_changed(store, bucket, &key, &package).await?;
        outcomes.push(UploadOutcome {
            function: function.name.clone(),
            bucket: bucket.to_string(),
            key,
            content_hash: package.content_hash,
            size: package.bytes.len(),
            action,
        });
    }

    Ok(outcomes)
}

/// Walk and compress off the async workers
async fn build_package(dir: &Path, options: &PackageOptions) -> Result<Package> {
    let dir = dir.to_path_buf();
    let options = *options;
    tokio::task::spawn_blocking(move || build_archive(&dir, &options))
        .await
        .map_err(|e| PackError::Io(std::io::Error::other(format!("packaging task failed: {}", e))))?
}
