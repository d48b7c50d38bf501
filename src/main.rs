use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use cdcstore::datamodel::container::Compression;
use cdcstore::{server, Config, DedupStore, FjallBackend};
use clap::{Parser, ValueEnum};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Deduplicating file store served over HTTP.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    #[arg(long, env = "CDCSTORE_LISTEN", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Directory holding the keyspace
    #[arg(long, env = "CDCSTORE_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Payload bytes packed into one container
    #[arg(long, env = "CDCSTORE_CONTAINER_CAPACITY", default_value_t = 1024 * 1024)]
    container_capacity: u64,

    #[arg(long, env = "CDCSTORE_COMPRESSION", value_enum, default_value_t = Codec::None)]
    compression: Codec,

    #[arg(long, env = "CDCSTORE_ZSTD_LEVEL", default_value_t = 3)]
    zstd_level: i32,

    /// Largest accepted upload body in bytes
    #[arg(long, env = "CDCSTORE_MAX_UPLOAD", default_value_t = 512 * 1024 * 1024)]
    max_upload: usize,

    /// Fsync the keyspace after every commit
    #[arg(long, env = "CDCSTORE_SYNC")]
    sync: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Codec {
    None,
    Zstd,
}

impl From<Codec> for Compression {
    fn from(codec: Codec) -> Self {
        match codec {
            Codec::None => Compression::None,
            Codec::Zstd => Compression::Zstd,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config {
        container_capacity: args.container_capacity,
        compression: args.compression.into(),
        zstd_level: args.zstd_level,
        sync_commits: args.sync,
        ..Default::default()
    };
    let backend = FjallBackend::open(&args.data_dir)
        .with_context(|| format!("failed to open keyspace at {}", args.data_dir.display()))?
        .with_sync_commits(config.sync_commits);
    let store = DedupStore::with_config(backend, config).context("invalid configuration")?;
    let store = Arc::new(store);

    let app = server::router(store, args.max_upload);
    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    tracing::info!(listen = %args.listen, data_dir = %args.data_dir.display(), "serving");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}
