// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

// Sorrel splits every network cluster into address range features

use anyhow::{Context, Result};
use clap::Parser;
use hawthorn::config::SplitOptions;
use hawthorn::post::{PostOp, default_post};
use hawthorn::sink::OutputSink;
use hawthorn::store::{ConnectionParams, PgConnector, cluster_ids, connect_pool};
use hawthorn::worker::{WorkerPool, chunk_batches};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of split workers, defaults to the number of cpus
    #[arg(long)]
    workers: Option<usize>,

    /// Network clusters handed to a worker at a time
    #[arg(long, default_value_t = 5000)]
    batch_size: usize,

    /// Clusters processed concurrently inside each worker
    #[arg(long, default_value_t = 16)]
    jobs: usize,

    /// ISO 3166-1 country code added as carmen:geocoder_stack
    #[arg(long)]
    country: Option<String>,

    /// Post processing operations, comma separated
    #[arg(long, value_enum, value_delimiter = ',')]
    post: Option<Vec<PostOp>>,

    /// Keep interpolation debug properties on output
    #[arg(long)]
    debug: bool,

    /// Write features to this file instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let start = Instant::now();

    let connection = match args.database_url {
        Some(url) => ConnectionParams::new(url),
        None => ConnectionParams::from_env().context("DATABASE_URL must be set")?,
    };

    let pool = connect_pool(&connection)
        .await
        .context("failed to connect to postgres")?;
    let ids = cluster_ids(&pool)
        .await
        .context("failed to list network clusters")?;
    pool.close().await;

    let workers = args.workers.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });

    tracing::info!(
        clusters = ids.len(),
        workers,
        batch_size = args.batch_size,
        "splitting network clusters"
    );

    let sink = Arc::new(match &args.output {
        Some(path) => OutputSink::file(path)
            .await
            .with_context(|| format!("failed to create {}", path.display()))?,
        None => OutputSink::stdout(),
    });

    let options = SplitOptions {
        stdout: true,
        country: args.country,
        post: args.post.unwrap_or_else(default_post),
        debug: args.debug,
        jobs: args.jobs,
    };

    let mut pool = WorkerPool::start(workers, PgConnector, connection, options, Arc::clone(&sink))
        .await
        .context("failed to start split workers")?;

    let result = pool.run(chunk_batches(&ids, args.batch_size)).await;
    pool.shutdown().await;
    let summary = result.context("split workers failed")?;

    sink.flush().await.context("failed to flush output")?;

    for error in &summary.errors {
        tracing::warn!("batch error: {}", error);
    }

    tracing::info!(
        batches = summary.batches,
        jobs = summary.jobs,
        errors = summary.errors.len(),
        "split finished in {:?}",
        start.elapsed()
    );

    Ok(())
}
