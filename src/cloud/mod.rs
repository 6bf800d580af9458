//! Cloud storage backends for [`ObjectStore`](crate::storage::ObjectStore).
//!
//! ## Available Backends
//!
//! - **S3** - AWS S3 and S3-compatible services such as MinIO, Cloudflare R2
//!   or DigitalOcean Spaces via custom endpoint URLs (requires `cloud-s3` feature)

#[cfg(feature = "cloud-s3")]
pub mod s3;

#[cfg(feature = "cloud-s3")]
pub use s3::{S3Store, S3StoreBuilder};
