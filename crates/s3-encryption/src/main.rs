//! `s3-crypt`: encrypt files into S3 and decrypt them back out.
//!
//! Startup sequence:
//! 1. Parse the command line.
//! 2. Load and validate [`Settings`] from environment variables.
//! 3. Initialise the telemetry pipeline.
//! 4. Initialise AWS SDK clients.
//! 5. Build the key materials (KMS or a local master key).
//! 6. Build the [`EncryptionClient`] and run the command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use s3_encryption::aws::AwsClients;
use s3_encryption::materials::EncryptionMaterials;
use s3_encryption::telemetry;
use s3_encryption::{
    EncryptionClient, GetObjectRequest, KmsMaterials, PutObjectRequest, S3Store, Settings,
    SymmetricMaterials,
};

#[derive(Debug, Parser)]
#[command(name = "s3-crypt", version, about = "Client-side encrypted S3 transfers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Encrypt a local file and upload it.
    Put {
        /// Destination object key.
        key: String,
        /// File to upload.
        file: PathBuf,
    },
    /// Download and decrypt an object into a local file.
    Get {
        /// Source object key.
        key: String,
        /// File to write the plaintext to.
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Command line
    // -----------------------------------------------------------------------
    let cli = Cli::parse();

    // -----------------------------------------------------------------------
    // 2. Configuration
    // -----------------------------------------------------------------------
    let settings = Settings::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 3. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(
        settings.otel_exporter_otlp_endpoint.as_deref(),
        &settings.log_level,
    )?;
    let config = settings.crypto_configuration();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        crypto_mode = ?config.crypto_mode,
        storage_mode = ?config.storage_mode,
        "s3-crypt starting"
    );

    // -----------------------------------------------------------------------
    // 4. AWS clients
    // -----------------------------------------------------------------------
    let aws = AwsClients::init(settings.s3_endpoint_url.as_deref()).await;

    // -----------------------------------------------------------------------
    // 5. Key materials
    // -----------------------------------------------------------------------
    let materials = build_materials(&settings, &aws)?;

    // -----------------------------------------------------------------------
    // 6. Client + command
    // -----------------------------------------------------------------------
    let store = S3Store::new(aws.s3.clone(), settings.s3_bucket.clone());
    let client = EncryptionClient::new(Arc::new(store), materials, config);

    let outcome = run(&client, cli.command).await;
    telemetry::shutdown_telemetry();
    outcome
}

fn build_materials(settings: &Settings, aws: &AwsClients) -> Result<Arc<dyn EncryptionMaterials>> {
    let kms_key_id = settings.kms_key_id.as_deref().filter(|k| !k.trim().is_empty());
    let master_key = settings.master_key.as_deref().filter(|k| !k.trim().is_empty());
    match (kms_key_id, master_key) {
        (Some(key_id), _) => Ok(Arc::new(KmsMaterials::new(aws.kms.clone(), key_id))),
        (None, Some(master_key)) => Ok(Arc::new(
            SymmetricMaterials::from_base64(master_key).context("MASTER_KEY is unusable")?,
        )),
        (None, None) => anyhow::bail!("one of KMS_KEY_ID or MASTER_KEY is required"),
    }
}

async fn run(client: &EncryptionClient, command: Command) -> Result<()> {
    match command {
        Command::Put { key, file } => {
            let body = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let result = client
                .put_object(PutObjectRequest::new(key.clone(), body))
                .await
                .with_context(|| format!("failed to store `{key}`"))?;
            info!(key = %key, e_tag = ?result.e_tag, "upload complete");
        }
        Command::Get { key, out } => {
            let object = client
                .get_object(GetObjectRequest::new(key.clone()))
                .await
                .with_context(|| format!("failed to fetch `{key}`"))?;
            tokio::fs::write(&out, &object.body)
                .await
                .with_context(|| format!("failed to write {}", out.display()))?;
            info!(key = %key, bytes = object.content_length, "download complete");
        }
    }
    Ok(())
}
