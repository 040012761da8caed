//! chunkdrop: upload a file in chunks to a pool of webhook endpoints.
//!
//! Events are printed to stdout as JSON lines; logs go to stderr.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use chunkdrop_protocol::Endpoint;
use chunkdrop_transfer::{UploadSource, WebhookSink};
use chunkdrop_uploader::{
    HttpMetadataStore, JsonFileStore, MetadataStore, UploadOutcome, UploadRequest, Uploader,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;

#[derive(Parser)]
#[command(name = "chunkdrop", version, about = "Chunked uploads to a pool of webhook endpoints")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file
    Upload {
        /// Path to the file to upload
        file: PathBuf,
        /// Endpoint URL; repeat for a pool. Overrides configured endpoints.
        #[arg(long = "endpoint")]
        endpoints: Vec<String>,
        /// Chunk size in bytes
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Maximum concurrent chunk transfers
        #[arg(long)]
        concurrency: Option<usize>,
        /// Content type recorded for the file
        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,
        /// Session id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
        /// Write the file record as JSON to this path instead of the metadata API
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Show the configuration path and endpoint ids
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chunkdrop=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(config::default_path);
    let config = CliConfig::load_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    match cli.command {
        Commands::Config => {
            println!("config: {}", config_path.display());
            if let Some(api_url) = &config.api_url {
                println!("api_url: {api_url}");
            }
            for e in &config.endpoints {
                println!("endpoint: {}", e.id);
            }
            Ok(())
        }
        Commands::Upload {
            file,
            endpoints,
            chunk_size,
            concurrency,
            content_type,
            id,
            output,
        } => {
            let mut config = config;
            if let Some(size) = chunk_size {
                config.scheduler.chunk_size = size;
            }
            if let Some(n) = concurrency {
                config.scheduler.max_concurrency = n;
            }
            let endpoints = if endpoints.is_empty() {
                config.endpoints.clone()
            } else {
                endpoints
                    .into_iter()
                    .enumerate()
                    .map(|(i, url)| Endpoint::new(format!("cli-{i}"), url))
                    .collect()
            };
            if endpoints.is_empty() {
                bail!(
                    "no endpoints: pass --endpoint or add [[endpoints]] to {}",
                    config_path.display()
                );
            }

            let store: Option<Arc<dyn MetadataStore>> = match (output, &config.api_url) {
                (Some(path), _) => Some(Arc::new(JsonFileStore::new(path))),
                (None, Some(api_url)) => Some(Arc::new(HttpMetadataStore::new(api_url.clone()))),
                (None, None) => None,
            };

            let mut request = UploadRequest::new(
                file_name(&file)?,
                UploadSource::from_path(&file),
                endpoints,
            )
            .with_content_type(content_type);
            if let Some(id) = id {
                request = request.with_id(id);
            }

            upload(config, store, request).await
        }
    }
}

fn file_name(path: &std::path::Path) -> anyhow::Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))
}

async fn upload(
    config: CliConfig,
    store: Option<Arc<dyn MetadataStore>>,
    request: UploadRequest,
) -> anyhow::Result<()> {
    let sink = Arc::new(WebhookSink::new()?);
    let mut uploader = Uploader::new(sink, config.scheduler);
    if let Some(store) = store {
        uploader = uploader.with_store(store);
    }
    let mut events = uploader
        .take_events()
        .context("event receiver already taken")?;

    let handle = uploader.start(request).await?;
    let id = handle.id().to_string();
    tracing::info!(upload_id = %id, "upload session started");

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "failed to encode event"),
            }
            if event.is_terminal() {
                break;
            }
        }
    });

    let wait = handle.wait();
    tokio::pin!(wait);
    let outcome = tokio::select! {
        outcome = &mut wait => outcome?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(upload_id = %id, "interrupted; cancelling upload");
            uploader.cancel(&id);
            wait.await?
        }
    };
    let _ = printer.await;

    match outcome {
        UploadOutcome::Completed {
            record,
            store_error,
        } => {
            tracing::info!(
                upload_id = %record.id,
                chunks = record.total_chunks,
                duration_ms = record.duration_ms,
                "upload completed"
            );
            if let Some(e) = store_error {
                bail!("upload completed but the file record was not stored: {e}");
            }
            Ok(())
        }
        UploadOutcome::Failed {
            failed_chunks,
            error,
        } => match error {
            Some(e) => bail!("upload failed: {e}"),
            None => bail!("upload failed: chunks {failed_chunks:?} exhausted their retries"),
        },
        UploadOutcome::Cancelled => bail!("upload cancelled"),
    }
}
