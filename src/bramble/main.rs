// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

// Bramble compares new address data against the persistent address table

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use hawthorn::conflate::{self, BasicTokenizer, ConflateOptions, ConflateSummary};
use hawthorn::sink::OutputSink;
use hawthorn::store::{ConnectionParams, PgPersistentStore, connect_pool};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Newline delimited GeoJSON address features
    #[arg(long)]
    input: PathBuf,

    /// Number of conflation workers reading the input
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Write changes to this file instead of stdout
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

    let mut connection = match args.database_url {
        Some(url) => ConnectionParams::new(url),
        None => ConnectionParams::from_env().context("DATABASE_URL must be set")?,
    };
    let workers = args.workers.max(1);
    connection.max_connections = connection.max_connections.max(workers as u32);

    let pool = connect_pool(&connection)
        .await
        .context("failed to connect to postgres")?;

    let sink = Arc::new(match &args.output {
        Some(path) => OutputSink::file(path)
            .await
            .with_context(|| format!("failed to create {}", path.display()))?,
        None => OutputSink::stdout(),
    });

    let mut tasks: JoinSet<Result<ConflateSummary>> = JoinSet::new();

    for id in 0..workers {
        let options = ConflateOptions::new(id, workers)?;
        let store = PgPersistentStore::new(pool.clone());
        let sink = Arc::clone(&sink);
        let input = args.input.clone();

        tasks.spawn(async move {
            let file = tokio::fs::File::open(&input)
                .await
                .with_context(|| format!("failed to open {}", input.display()))?;

            let summary = conflate::run(
                options,
                BufReader::new(file),
                &store,
                &BasicTokenizer,
                sink.as_ref(),
            )
            .await
            .with_context(|| format!("conflation worker {id} failed"))?;

            Ok(summary)
        });
    }

    let mut total = ConflateSummary::default();
    while let Some(joined) = tasks.join_next().await {
        let summary = joined.map_err(|err| anyhow!("conflation worker panicked: {err}"))??;
        total.lines += summary.lines;
        total.created += summary.created;
        total.modified += summary.modified;
        total.unchanged += summary.unchanged;
        total.skipped += summary.skipped;
    }

    sink.flush().await.context("failed to flush output")?;
    pool.close().await;

    tracing::info!(
        lines = total.lines,
        created = total.created,
        modified = total.modified,
        unchanged = total.unchanged,
        skipped = total.skipped,
        "conflation finished"
    );

    Ok(())
}
