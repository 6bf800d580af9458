use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use lambda_pack::config::{self, DeployConfig, StorageConfig};
use lambda_pack::{
    build_archive, discover_functions, upload_functions, ArchiveReader, FunctionSource,
    UploadAction,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "lambda-pack", version, about = "Package function directories and sync them to S3")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Package functions and upload the ones whose content changed
    Deploy(DeployArgs),
    /// Build a single package to a local file
    Package {
        /// Directory to package
        dir: PathBuf,
        /// Output zip path
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        archive: ArchiveArgs,
    },
    /// List the entries of a package
    Inspect {
        /// Zip file to read
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
struct DeployArgs {
    /// Target bucket, created when missing
    #[arg(long, env = "LAMBDA_PACK_BUCKET")]
    bucket: String,

    /// Key prefix for uploaded packages
    #[arg(long, env = "LAMBDA_PACK_PREFIX", default_value = "")]
    prefix: String,

    /// Package every subdirectory of this directory
    #[arg(long, conflicts_with = "function")]
    root: Option<PathBuf>,

    /// Function to package, as NAME=PATH or PATH (repeatable)
    #[arg(long = "function", value_parser = config::parse_function_arg)]
    function: Vec<FunctionSource>,

    /// Region override (defaults to the AWS environment)
    #[arg(long)]
    region: Option<String>,

    /// Custom endpoint for S3-compatible services
    #[arg(long)]
    endpoint_url: Option<String>,

    /// Use path-style bucket addressing
    #[arg(long)]
    force_path_style: bool,

    /// Print outcomes as JSON
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    archive: ArchiveArgs,
}

#[derive(Args, Debug)]
struct ArchiveArgs {
    /// Store entries without compression
    #[arg(long)]
    stored: bool,

    /// DEFLATE level (0-9)
    #[arg(long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(0..=9))]
    level: u32,

    /// Descend into symlinked directories
    #[arg(long)]
    follow_symlinks: bool,
}

impl ArchiveArgs {
    fn options(&self) -> lambda_pack::PackageOptions {
        config::package_options(self.stored, self.level, self.follow_symlinks)
    }
}

impl DeployArgs {
    fn into_config(self) -> anyhow::Result<DeployConfig> {
        let functions = match (&self.root, self.function.is_empty()) {
            (Some(root), _) => discover_functions(root)
                .with_context(|| format!("failed to list functions in {}", root.display()))?,
            (None, false) => self.function.clone(),
            (None, true) => bail!("nothing to deploy: pass --root or at least one --function"),
        };

        let mut storage = StorageConfig::from_env();
        if self.region.is_some() {
            storage.region = self.region.clone();
        }
        if self.endpoint_url.is_some() {
            storage.endpoint_url = self.endpoint_url.clone();
        }
        storage.force_path_style |= self.force_path_style;

        Ok(DeployConfig {
            bucket: self.bucket,
            prefix: self.prefix,
            functions,
            package: self.archive.options(),
            storage,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lambda_pack=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match Cli::parse().command {
        Command::Deploy(args) => {
            let json = args.json;
            deploy(args.into_config()?, json).await
        }
        Command::Package {
            dir,
            output,
            archive,
        } => {
            let package = build_archive(&dir, &archive.options())
                .with_context(|| format!("failed to package {}", dir.display()))?;
            std::fs::write(&output, &package.bytes)
                .with_context(|| format!("failed to write {}", output.display()))?;
            info!(
                entries = package.entries.len(),
                size = package.len(),
                "wrote {}",
                output.display()
            );
            println!("{}  {}", package.content_hash, output.display());
            Ok(())
        }
        Command::Inspect { file } => {
            let reader = ArchiveReader::open(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            for entry in reader.entries() {
                println!(
                    "{:o}  {:>10}  {:>10}  {}",
                    entry.unix_mode(),
                    entry.uncompressed_size,
                    entry.compressed_size,
                    entry.name
                );
            }
            Ok(())
        }
    }
}

async fn deploy(config: DeployConfig, json: bool) -> anyhow::Result<()> {
    let store = config.storage.connect().await;
    info!(
        bucket = %config.bucket,
        prefix = %config.prefix,
        functions = config.functions.len(),
        "deploying"
    );

    let outcomes = upload_functions(
        &store,
        &config.bucket,
        &config.prefix,
        &config.functions,
        &config.package,
    )
    .await
    .context("deploy failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
        return Ok(());
    }

    for outcome in &outcomes {
        let status = match outcome.action {
            UploadAction::Uploaded => "uploaded",
            UploadAction::Unchanged => "unchanged",
        };
        println!(
            "{:<9}  {}  s3://{}/{}",
            status, outcome.content_hash, outcome.bucket, outcome.key
        );
    }
    Ok(())
}
