// scorewatch/src/main.rs
//
// Scorewatch: model-score monitoring and annotation dashboard backend
//
// Three operational modes:
//   serve     poll the prediction CSV and answer dashboard sessions over TCP
//   report    one-shot training report for one account (markdown or JSON)
//   simulate  write a synthetic prediction table to --path
//
// Usage:
//   scorewatch --mode simulate --path preds.csv --rows 20000 --seed 7
//   scorewatch --mode serve --path preds.csv --bind 127.0.0.1:50061
//   scorewatch --mode report --path preds.csv --account "Wolff Ltd" --metric pr --json

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use scorewatch::annotate::{self, AnnotationStore};
use scorewatch::api::QueryServer;
use scorewatch::model::{DateRange, MetricKind};
use scorewatch::report::TrainingReport;
use scorewatch::selection::{SelectionState, DEFAULT_SAMPLE};
use scorewatch::session::Session;
use scorewatch::simulate;
use scorewatch::source::DatasetSource;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "scorewatch",
    about   = "Model-score monitoring and annotation dashboard backend",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "serve")]
    mode: Mode,

    #[arg(long, default_value = "predictions.csv", help = "Backing prediction table")]
    path: PathBuf,

    #[arg(long, default_value = "200", help = "File poll interval in milliseconds")]
    poll_ms: u64,

    #[arg(long, default_value = "127.0.0.1:50061", help = "Query API listen address")]
    bind: SocketAddr,

    #[arg(long, help = "RNG seed for sampling and simulation")]
    seed: Option<u64>,

    #[arg(long, default_value_t = DEFAULT_SAMPLE, help = "Sample size drawn per session")]
    sample: usize,

    #[arg(long, default_value = "2023-01-01")]
    start: NaiveDate,

    #[arg(long, default_value = "2023-04-01")]
    end: NaiveDate,

    #[arg(long, help = "Account for report mode (default: first in file)")]
    account: Option<String>,

    #[arg(long, value_enum, default_value = "roc")]
    metric: MetricKind,

    #[arg(long, default_value = "5000", help = "Rows to generate (simulate mode)")]
    rows: usize,

    #[arg(long, help = "Emit JSON instead of markdown (report mode)")]
    json: bool,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Serve,     // poll loop + query API
    Report,    // headless training report
    Simulate,  // synthetic dataset
}

// ── Config ────────────────────────────────────────────────────────────────────

/// Validated flags handed to each mode.
struct DashConfig {
    path:      PathBuf,
    poll:      Duration,
    bind:      SocketAddr,
    seed:      Option<u64>,
    selection: SelectionState,
    account:   Option<String>,
    rows:      usize,
    json:      bool,
}

impl DashConfig {
    fn from_cli(cli: &Cli) -> Result<Self> {
        let mut selection = SelectionState::default();
        let range = DateRange::new(cli.start, cli.end)
            .with_context(|| format!("--start {} is after --end {}", cli.start, cli.end))?;
        selection.set_date_range(range);
        selection.set_sample_size(cli.sample)?;
        selection.set_metric(cli.metric);

        Ok(Self {
            path:      cli.path.clone(),
            poll:      Duration::from_millis(cli.poll_ms.max(1)),
            bind:      cli.bind,
            seed:      cli.seed,
            selection,
            account:   cli.account.clone(),
            rows:      cli.rows,
            json:      cli.json,
        })
    }
}

// ── Modes ─────────────────────────────────────────────────────────────────────

async fn print_stats_loop(server: Arc<QueryServer>, store: Arc<AnnotationStore>, start: Instant) {
    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        let status = store.source().status();
        println!(
            "\n\x1b[1m── stats  uptime={:.0}s  sessions={}  snapshot=v{}  rows={}  reloads={}  writes={} ──\x1b[0m",
            start.elapsed().as_secs_f64(), server.n_sessions(),
            status.version, status.rows, status.reloads,
            store.writes.load(Ordering::Relaxed),
        );
        if let Some(e) = status.last_error {
            println!("  \x1b[93mlast poll error: {}\x1b[0m", e);
        }
    }
}

async fn serve(cfg: DashConfig) -> Result<()> {
    let source = DatasetSource::open(&cfg.path, cfg.poll);
    let store  = Arc::new(AnnotationStore::new(Arc::clone(&source)));
    let server = Arc::new(QueryServer::new(Arc::clone(&store), cfg.bind, cfg.seed, cfg.selection.clone()));

    println!("  Mode: \x1b[96mSERVE\x1b[0m  |  {}  poll={}ms", cfg.path.display(), cfg.poll.as_millis());
    println!("  Query API: \x1b[90m{}\x1b[0m\n", cfg.bind);

    tokio::spawn(Arc::clone(&source).poll_loop());
    tokio::spawn(print_stats_loop(Arc::clone(&server), Arc::clone(&store), Instant::now()));

    server.serve().await
}

fn report(cfg: DashConfig) -> Result<()> {
    let source = DatasetSource::open(&cfg.path, cfg.poll);
    if let Some(e) = source.last_error() {
        anyhow::bail!("cannot load {}: {}", cfg.path.display(), e);
    }
    let store = Arc::new(AnnotationStore::new(source));

    let mut session = Session::new(0, store, cfg.seed).with_selection(cfg.selection.clone());
    if let Some(account) = &cfg.account {
        session.set_account(account)?;
    }

    let report = TrainingReport::build(&mut session)?;
    if cfg.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.to_markdown());
    }
    Ok(())
}

fn simulate(cfg: DashConfig) -> Result<()> {
    let seed    = cfg.seed.unwrap_or_else(rand::random);
    let dataset = simulate::generate(cfg.rows, seed);
    annotate::persist(&cfg.path, &dataset)
        .with_context(|| format!("writing {}", cfg.path.display()))?;
    info!("Wrote {} rows for {} accounts to {} (seed={})",
          dataset.len(), dataset.accounts().len(), cfg.path.display(), seed);
    Ok(())
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("scorewatch=info".parse()?))
        .compact().init();

    let cli = Cli::parse();
    let cfg = DashConfig::from_cli(&cli)?;

    match cli.mode {
        Mode::Serve    => serve(cfg).await,
        Mode::Report   => tokio::task::spawn_blocking(move || report(cfg)).await?,
        Mode::Simulate => simulate(cfg),
    }
}
