//! Runtime configuration shared by the command-line front end.

use crate::deploy::FunctionSource;
use crate::package::PackageOptions;
use crate::writer::CompressionMethod;
use std::env;
use std::path::PathBuf;

/// Where packages are stored
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageConfig {
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

impl StorageConfig {
    /// Read `AWS_REGION`, `LAMBDA_PACK_ENDPOINT_URL` and
    /// `LAMBDA_PACK_FORCE_PATH_STYLE` from the environment.
    pub fn from_env() -> Self {
        Self {
            region: env::var("AWS_REGION").ok().filter(|v| !v.is_empty()),
            endpoint_url: env::var("LAMBDA_PACK_ENDPOINT_URL")
                .ok()
                .filter(|v| !v.is_empty()),
            force_path_style: env::var("LAMBDA_PACK_FORCE_PATH_STYLE")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
        }
    }

    /// Build the S3 store this configuration describes
    #[cfg(feature = "cloud-s3")]
    pub async fn connect(&self) -> crate::cloud::S3Store {
        let mut builder = crate::cloud::S3Store::builder().force_path_style(self.force_path_style);
        if let Some(region) = &self.region {
            builder = builder.region(region.clone());
        }
        if let Some(url) = &self.endpoint_url {
            builder = builder.endpoint_url(url.clone());
        }
        builder.build().await
    }
}

/// Everything a deploy run needs
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub bucket: String,
    pub prefix: String,
    pub functions: Vec<FunctionSource>,
    pub package: PackageOptions,
    pub storage: StorageConfig,
}

/// Parse `name=path`, or a bare path named after its last component
pub fn parse_function_arg(arg: &str) -> Result<FunctionSource, String> {
    if let Some((name, path)) = arg.split_once('=') {
        let name = name.trim();
        if name.is_empty() || path.is_empty() {
            return Err(format!("expected NAME=PATH, got '{}'", arg));
        }
        return Ok(FunctionSource::new(name, path));
    }

    let path = PathBuf::from(arg);
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| format!("cannot derive a function name from '{}'", arg))?
        .to_string();
    Ok(FunctionSource::new(name, path))
}

/// Package options from command-line style knobs
pub fn package_options(stored: bool, level: u32, follow_symlinks: bool) -> PackageOptions {
    PackageOptions {
        compression: if stored {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflate
        },
        compression_level: level.min(9),
        follow_symlinks,
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
