//! In-process object store.
//!
//! Keeps buckets in a map, computes S3-style ETags and records every call, so
//! the deploy flow can be driven and asserted on without a network.

use super::{ObjectHead, ObjectStore, PutRequest, StoreError, StoreOperation};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// A call received by [`MemoryStore`], in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    HeadBucket { bucket: String },
    CreateBucket { bucket: String },
    HeadObject { bucket: String, key: String },
    PutObject { bucket: String, key: String },
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    etag: String,
    metadata: HashMap<String, String>,
}

#[derive(Default)]
struct State {
    buckets: HashMap<String, HashMap<String, StoredObject>>,
    calls: Vec<StoreCall>,
    failures: VecDeque<StoreError>,
}

/// Object store living entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with `bucket` already created
    pub fn with_bucket(bucket: &str) -> Self {
        let store = Self::new();
        store.lock().buckets.insert(bucket.to_string(), HashMap::new());
        store
    }

    /// Place an object directly, bypassing call recording and metadata.
    /// Creates the bucket if needed.
    pub fn insert_object(&self, bucket: &str, key: &str, body: Vec<u8>) {
        let object = StoredObject {
            etag: etag_for(&body),
            body,
            metadata: HashMap::new(),
        };
        self.lock()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), object);
    }

    /// Queue an error returned by the next call to `error.operation`.
    ///
    /// Queued errors are consumed in order, each by the first matching call.
    pub fn fail_next(&self, error: StoreError) {
        self.lock().failures.push_back(error);
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.lock().buckets.contains_key(bucket)
    }

    /// Body stored under `bucket/key`
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.body.clone())
    }

    /// Calls received so far
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Number of `put_object` calls received
    pub fn put_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, StoreCall::PutObject { .. }))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl State {
    fn take_failure(&mut self, operation: StoreOperation) -> Result<(), StoreError> {
        match self.failures.iter().position(|e| e.operation == operation) {
            Some(index) => Err(self
                .failures
                .remove(index)
                .unwrap_or_else(|| StoreError::new(operation, "injected failure"))),
            None => Ok(()),
        }
    }
}

/// Quoted hex MD5, as S3 reports for single-part uploads
fn etag_for(body: &[u8]) -> String {
    format!("\"{:x}\"", md5::compute(body))
}

fn no_such_bucket(operation: StoreOperation, bucket: &str) -> StoreError {
    StoreError::new(operation, format!("bucket {} does not exist", bucket))
        .status(404)
        .code("NoSuchBucket")
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn head_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::HeadBucket {
            bucket: bucket.to_string(),
        });
        state.take_failure(StoreOperation::HeadBucket)?;

        if state.buckets.contains_key(bucket) {
            Ok(())
        } else {
            Err(StoreError::with_status(StoreOperation::HeadBucket, 404))
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::CreateBucket {
            bucket: bucket.to_string(),
        });
        state.take_failure(StoreOperation::CreateBucket)?;

        if state.buckets.contains_key(bucket) {
            return Err(StoreError::new(
                StoreOperation::CreateBucket,
                format!("bucket {} already exists", bucket),
            )
            .status(409)
            .code("BucketAlreadyOwnedByYou"));
        }
        state.buckets.insert(bucket.to_string(), HashMap::new());
        Ok(())
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectHead>, StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::HeadObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        state.take_failure(StoreOperation::HeadObject)?;

        let objects = state
            .buckets
            .get(bucket)
            .ok_or_else(|| no_such_bucket(StoreOperation::HeadObject, bucket))?;
        Ok(objects.get(key).map(|object| ObjectHead {
            etag: Some(object.etag.clone()),
            metadata: object.metadata.clone(),
        }))
    }

    async fn put_object(&self, request: PutRequest) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::PutObject {
            bucket: request.bucket.clone(),
            key: request.key.clone(),
        });
        state.take_failure(StoreOperation::PutObject)?;

        let objects = state
            .buckets
            .get_mut(&request.bucket)
            .ok_or_else(|| no_such_bucket(StoreOperation::PutObject, &request.bucket))?;
        objects.insert(
            request.key,
            StoredObject {
                etag: etag_for(&request.body),
                body: request.body,
                metadata: request.metadata,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(bucket: &str, key: &str, body: &[u8]) -> PutRequest {
        PutRequest {
            bucket: bucket.to_string(),
            key: key.to_string(),
            body: body.to_vec(),
            content_type: "application/zip".to_string(),
            content_md5: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn etag_is_quoted_md5() {
        let store = MemoryStore::with_bucket("b");
        store.put_object(put("b", "k", b"hello")).await.unwrap();
        let head = store.head_object("b", "k").await.unwrap().unwrap();
        assert_eq!(
            head.etag.as_deref(),
            Some("\"5d41402abc4b2a76b9719d911017c592\"")
        );
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = MemoryStore::with_bucket("b");
        assert_eq!(store.head_object("b", "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_bucket_is_not_found() {
        let store = MemoryStore::new();
        let err = store.head_bucket("b").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.put_object(put("b", "k", b"")).await.is_err());
    }

    #[tokio::test]
    async fn injected_failures_hit_matching_operation_once() {
        let store = MemoryStore::with_bucket("b");
        store.fail_next(StoreError::with_status(StoreOperation::PutObject, 500));

        // head_bucket is unaffected by a queued put failure
        store.head_bucket("b").await.unwrap();
        assert!(store.put_object(put("b", "k", b"x")).await.is_err());
        store.put_object(put("b", "k", b"x")).await.unwrap();
        assert_eq!(store.put_count(), 2);
    }

    #[tokio::test]
    async fn create_existing_bucket_conflicts() {
        let store = MemoryStore::with_bucket("b");
        let err = store.create_bucket("b").await.unwrap_err();
        assert_eq!(err.status, Some(409));
    }
}
