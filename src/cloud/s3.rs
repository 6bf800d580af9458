//! AWS S3 implementation of [`ObjectStore`].
//!
//! Packages are small enough to go up in a single `PutObject`, which keeps the
//! object's ETag equal to the MD5 of its bytes. The hex MD5 is also written as
//! `content-md5` user metadata so the comparison survives objects that were
//! replaced by other tools.
//!
//! ## Example
//!
//! ```no_run
//! use lambda_pack::cloud::S3Store;
//! use lambda_pack::{upload_functions, FunctionSource, PackageOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = S3Store::builder().region("eu-west-1").build().await;
//! let functions = [FunctionSource::new("api", "lambda/api")];
//!
//! let outcomes = upload_functions(
//!     &store,
//!     "my-deploy-bucket",
//!     "functions",
//!     &functions,
//!     &PackageOptions::default(),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::storage::{ObjectHead, ObjectStore, PutRequest, StoreError, StoreOperation};
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use tracing::debug;

/// Region where `CreateBucket` must not carry a location constraint
const DEFAULT_REGION: &str = "us-east-1";

/// Object store backed by an S3 (or S3-compatible) endpoint
#[derive(Clone, Debug)]
pub struct S3Store {
    client: Client,
}

/// Builder for `S3Store` with configuration options.
#[derive(Debug, Default)]
pub struct S3StoreBuilder {
    region: Option<String>,
    endpoint_url: Option<String>,
    force_path_style: bool,
}

impl S3Store {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create a builder that loads credentials from the environment.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use lambda_pack::cloud::S3Store;
    /// # async fn example() {
    /// // MinIO
    /// let store = S3Store::builder()
    ///     .endpoint_url("http://localhost:9000")
    ///     .region("us-east-1")
    ///     .force_path_style(true)
    ///     .build()
    ///     .await;
    /// # }
    /// ```
    pub fn builder() -> S3StoreBuilder {
        S3StoreBuilder::default()
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn region(&self) -> Option<String> {
        self.client
            .config()
            .region()
            .map(|region| region.as_ref().to_string())
    }
}

impl S3StoreBuilder {
    /// Override the region from the environment
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Custom endpoint for S3-compatible services
    pub fn endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`
    pub fn force_path_style(mut self, enabled: bool) -> Self {
        self.force_path_style = enabled;
        self
    }

    /// Load the shared AWS configuration and build the client
    pub async fn build(self) -> S3Store {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = self.region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let sdk_config = loader.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(url) = self.endpoint_url {
            s3_config = s3_config.endpoint_url(url);
        }
        if self.force_path_style {
            s3_config = s3_config.force_path_style(true);
        }

        S3Store::new(Client::from_conf(s3_config.build()))
    }
}

/// Flatten an SDK error into status, service code and message
fn store_error<E>(operation: StoreOperation, err: SdkError<E, HttpResponse>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let status = err.raw_response().map(|response| response.status().as_u16());
    let code = err.code().map(str::to_string);
    let message = DisplayErrorContext(&err).to_string();

    StoreError {
        operation,
        status,
        code,
        message,
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn head_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| store_error(StoreOperation::HeadBucket, e))?;
        Ok(())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let mut request = self.client.create_bucket().bucket(bucket);

        // us-east-1 rejects an explicit constraint for itself
        if let Some(region) = self.region().filter(|r| r != DEFAULT_REGION) {
            debug!(%region, "creating bucket with location constraint");
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region.as_str()))
                    .build(),
            );
        }

        request
            .send()
            .await
            .map_err(|e| store_error(StoreOperation::CreateBucket, e))?;
        Ok(())
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectHead>, StoreError> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(output) => Ok(Some(ObjectHead {
                etag: output.e_tag().map(str::to_string),
                metadata: output.metadata().cloned().unwrap_or_default(),
            })),
            Err(e) => {
                let err = store_error(StoreOperation::HeadObject, e);
                if err.is_not_found() {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn put_object(&self, request: PutRequest) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(request.bucket)
            .key(request.key)
            .content_type(request.content_type)
            .set_content_md5(request.content_md5)
            .set_metadata(Some(request.metadata))
            .body(ByteStream::from(request.body))
            .send()
            .await
            .map_err(|e| store_error(StoreOperation::PutObject, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::ensure_bucket;
    use aws_sdk_s3::config::Region;
    use aws_sdk_s3::operation::create_bucket::CreateBucketOutput;
    use aws_smithy_mocks::{mock, mock_client, RuleMode};
    use aws_smithy_runtime_api::http::StatusCode;
    use aws_smithy_types::body::SdkBody;

    fn status(code: u16) -> HttpResponse {
        HttpResponse::new(StatusCode::try_from(code).unwrap(), SdkBody::empty())
    }

    #[tokio::test]
    async fn missing_bucket_is_created_without_constraint_in_us_east_1() {
        let head = mock!(Client::head_bucket).then_http_response(|| status(404));
        let create = mock!(Client::create_bucket)
            .match_requests(|req| {
                req.bucket() == Some("fns") && req.create_bucket_configuration().is_none()
            })
            .then_output(|| CreateBucketOutput::builder().build());
        let client = mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&head, &create]);
        let store = S3Store::new(client);

        ensure_bucket(&store, "fns").await.unwrap();
        assert_eq!(head.num_calls(), 1);
        assert_eq!(create.num_calls(), 1);
    }

    #[tokio::test]
    async fn missing_bucket_is_created_with_constraint_elsewhere() {
        let head = mock!(Client::head_bucket).then_http_response(|| status(404));
        let create = mock!(Client::create_bucket)
            .match_requests(|req| {
                req.create_bucket_configuration()
                    .and_then(|c| c.location_constraint())
                    == Some(&BucketLocationConstraint::EuWest1)
            })
            .then_output(|| CreateBucketOutput::builder().build());
        let client = mock_client!(
            aws_sdk_s3,
            RuleMode::MatchAny,
            [&head, &create],
            |conf: aws_sdk_s3::config::Builder| conf.region(Region::new("eu-west-1"))
        );
        let store = S3Store::new(client);

        ensure_bucket(&store, "fns").await.unwrap();
        assert_eq!(create.num_calls(), 1);
    }

    #[tokio::test]
    async fn head_bucket_forbidden_keeps_status() {
        let head = mock!(Client::head_bucket).then_http_response(|| status(403));
        let client = mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&head]);
        let store = S3Store::new(client);

        let err = store.head_bucket("fns").await.unwrap_err();
        assert_eq!(err.operation, StoreOperation::HeadBucket);
        assert_eq!(err.status, Some(403));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn head_object_not_found_is_none() {
        let head = mock!(Client::head_object)
            .match_requests(|req| req.key() == Some("api.zip"))
            .then_http_response(|| status(404));
        let client = mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&head]);
        let store = S3Store::new(client);

        assert!(store.head_object("fns", "api.zip").await.unwrap().is_none());
        assert_eq!(head.num_calls(), 1);
    }

    #[tokio::test]
    async fn head_object_forbidden_propagates() {
        let head = mock!(Client::head_object).then_http_response(|| status(403));
        let client = mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&head]);
        let store = S3Store::new(client);

        let err = store.head_object("fns", "api.zip").await.unwrap_err();
        assert_eq!(err.operation, StoreOperation::HeadObject);
        assert_eq!(err.status, Some(403));
    }

    #[tokio::test]
    async fn head_object_reads_etag_and_metadata() {
        let head = mock!(Client::head_object).then_output(|| {
            aws_sdk_s3::operation::head_object::HeadObjectOutput::builder()
                .e_tag("\"d41d8cd98f00b204e9800998ecf8427e\"")
                .metadata("content-md5", "0123456789abcdef0123456789abcdef")
                .build()
        });
        let client = mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&head]);
        let store = S3Store::new(client);

        let found = store.head_object("fns", "api.zip").await.unwrap().unwrap();
        assert_eq!(
            found.etag.as_deref(),
            Some("\"d41d8cd98f00b204e9800998ecf8427e\"")
        );
        assert_eq!(
            found.stored_hash().as_deref(),
            Some("0123456789abcdef0123456789abcdef")
        );
    }

    #[tokio::test]
    async fn put_object_sends_hash_metadata() {
        let put = mock!(Client::put_object)
            .match_requests(|req| {
                req.key() == Some("api.zip")
                    && req.content_md5() == Some("1B2M2Y8AsgTpgAmY7PhCfg==")
                    && req
                        .metadata()
                        .and_then(|m| m.get("content-md5"))
                        .map(String::as_str)
                        == Some("d41d8cd98f00b204e9800998ecf8427e")
            })
            .then_output(|| aws_sdk_s3::operation::put_object::PutObjectOutput::builder().build());
        let client = mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&put]);
        let store = S3Store::new(client);

        store
            .put_object(PutRequest {
                bucket: "fns".to_string(),
                key: "api.zip".to_string(),
                body: Vec::new(),
                content_type: "application/zip".to_string(),
                content_md5: Some("1B2M2Y8AsgTpgAmY7PhCfg==".to_string()),
                metadata: [(
                    "content-md5".to_string(),
                    "d41d8cd98f00b204e9800998ecf8427e".to_string(),
                )]
                .into(),
            })
            .await
            .unwrap();
        assert_eq!(put.num_calls(), 1);
    }
}
