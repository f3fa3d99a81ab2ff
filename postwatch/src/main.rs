//! Postwatch: MTA log observability appliance
//!
//! Ingests MTA logs from a file, stdin, a directory or a socket, tracks
//! message lifecycles, and serves insights and dashboard aggregates over
//! an HTTP JSON API.

use anyhow::{bail, Context};
use chrono::Datelike;
use clap::Parser;
use postwatch::api::{build_router, AppState};
use postwatch::logsource::{self, Announcer, SocketSpec};
use postwatch::workspace::{migrations_for_database, Workspace};
use postwatch_common::db::{run_migrations_down_to, ConnPair};
use postwatch_common::time::WallClock;
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Postwatch - observability for your mail server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the directory where all working data is stored
    #[arg(long, value_name = "DIR", default_value = "/var/lib/postwatch_workspace")]
    workspace: PathBuf,

    /// Network address the HTTP API listens on
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0:8080")]
    listen: String,

    /// Be verbose
    #[arg(long)]
    verbose: bool,

    /// Read log lines from stdin
    #[arg(long)]
    stdin: bool,

    /// Directory where the MTA stores its log files
    #[arg(long, value_name = "DIR")]
    watch_dir: Option<PathBuf>,

    /// Receive logs via a socket, e.g. unix=/tmp/postwatch.sock or tcp=localhost:9999
    #[arg(long, value_name = "SPEC")]
    socket: Option<String>,

    /// Only import existing logs and exit, without running the full application
    #[arg(long)]
    importonly: bool,

    /// The log directory is updated by rsync
    #[arg(long)]
    rsync: bool,

    /// Expected log format from external sources
    #[arg(long, value_name = "NAME", default_value = "default")]
    log_format: String,

    /// Initial year, for when it cannot be derived from the logs themselves
    #[arg(long, value_name = "YEAR")]
    log_starting_year: Option<i32>,

    /// Reset the password for a user (requires --password)
    #[arg(long, value_name = "EMAIL")]
    email_reset: Option<String>,

    /// Password to reset (requires --email_reset)
    #[arg(long, value_name = "PASSWORD")]
    password: Option<String>,

    /// Only migrate down, then exit
    #[arg(long)]
    migrate_down_to_only: bool,

    /// Database name for the down migration
    #[arg(long, value_name = "NAME")]
    migrate_down_to_database: Option<String>,

    /// Version to migrate down to
    #[arg(long, value_name = "VERSION")]
    migrate_down_to_version: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("postwatch={},postwatch_common={}", log_level, log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.migrate_down_to_only {
        return migrate_down(&args).await;
    }

    if let Some(email) = &args.email_reset {
        return reset_password(&args, email).await;
    }

    run(args).await
}

async fn migrate_down(args: &Args) -> anyhow::Result<()> {
    let database = args
        .migrate_down_to_database
        .as_deref()
        .context("--migrate_down_to_database is required")?;
    let version = args
        .migrate_down_to_version
        .context("--migrate_down_to_version is required")?;

    if version < 0 {
        bail!("invalid migration version {}", version);
    }

    let migrations = migrations_for_database(database)
        .with_context(|| format!("unknown database {:?}", database))?;

    let pair = ConnPair::open(&args.workspace.join(format!("{}.db", database))).await?;
    run_migrations_down_to(pair.write(), database, &migrations, version as usize).await?;
    pair.close().await;

    info!(database, version, "down migration complete");
    Ok(())
}

async fn reset_password(args: &Args, email: &str) -> anyhow::Result<()> {
    let password = args
        .password
        .as_deref()
        .context("--password is required with --email_reset")?;

    let workspace = Workspace::open(&args.workspace)
        .await
        .context("opening workspace")?;

    postwatch::auth::reset_password(workspace.master_pool(), email, password).await?;
    workspace.close().await;

    Ok(())
}

enum LogSource {
    Stdin,
    Dir(PathBuf),
    Socket(SocketSpec),
}

fn select_source(args: &Args) -> anyhow::Result<LogSource> {
    let source_count =
        [args.stdin, args.watch_dir.is_some(), args.socket.is_some()]
            .iter()
            .filter(|&&v| v)
            .count();

    if source_count == 0 {
        bail!("no log source specified; use --stdin, --watch_dir or --socket");
    }
    if source_count > 1 {
        bail!("--stdin, --watch_dir and --socket are mutually exclusive");
    }
    if args.importonly && args.socket.is_some() {
        bail!("--importonly requires a finite source (--stdin or --watch_dir)");
    }

    if args.stdin {
        return Ok(LogSource::Stdin);
    }
    if let Some(dir) = &args.watch_dir {
        return Ok(LogSource::Dir(dir.clone()));
    }

    let spec = args.socket.as_deref().expect("socket flag must be set here");
    Ok(LogSource::Socket(SocketSpec::parse(spec)?))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let source = select_source(&args)?;

    let workspace = Workspace::open(&args.workspace).await.with_context(|| {
        format!(
            "error creating/opening workspace directory {}; specify a different \
             directory with --workspace, or check write permissions",
            args.workspace.display()
        )
    })?;

    let year = args
        .log_starting_year
        .unwrap_or_else(|| chrono::Utc::now().year());
    let transformer =
        logsource::transform::get(&args.log_format, year).context("setting up log parsing")?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (lines_tx, lines_rx) = mpsc::channel::<Vec<u8>>(4096);
    let (records_tx, records_rx) = mpsc::channel(4096);
    let (progress_tx, progress_rx) = mpsc::channel(256);

    // historical insights are replayed only on the very first import
    let announcer = match workspace.most_recent_log_time().await? {
        None => Announcer::new(progress_tx),
        Some(_) => Announcer::skipper(),
    };

    if args.rsync {
        info!("log directory is rsync-updated; importing current contents");
    }

    let source_handle = spawn_source(source, lines_tx, cancel_rx.clone());

    let reader_handle = tokio::spawn(async move {
        logsource::run_reader(lines_rx, transformer, records_tx, announcer, &WallClock).await
    });

    let pipeline = workspace
        .run(records_rx, progress_rx, cancel_rx.clone())
        .await?;

    if args.importonly {
        source_handle.await??;
        reader_handle.await??;

        // the tracker and delivery writers drain on their own once the
        // upstream channels close; only the engine needs a cancel
        pipeline.tracker.await??;
        pipeline.delivery.await??;
        let _ = cancel_tx.send(true);
        pipeline.engine.await??;

        workspace.close().await;
        info!("importing has finished. Bye!");
        return Ok(());
    }

    let state = AppState {
        dashboard: workspace.dashboard.clone(),
        fetcher: workspace.fetcher.clone(),
        timezone: chrono_tz::UTC,
    };

    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("binding to {}", args.listen))?;
    info!(address = %args.listen, "HTTP server listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("HTTP server died")?;

    let _ = cancel_tx.send(true);

    for handle in [pipeline.tracker, pipeline.delivery, pipeline.engine] {
        if let Err(e) = handle.await? {
            error!(error = %e, "pipeline task failed during shutdown");
        }
    }

    // a stdin source blocks on its read forever; don't wait for it
    source_handle.abort();
    reader_handle.abort();
    workspace.close().await;

    Ok(())
}

fn spawn_source(
    source: LogSource,
    lines_tx: mpsc::Sender<Vec<u8>>,
    cancel: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<postwatch_common::Result<()>> {
    match source {
        LogSource::Stdin => tokio::spawn(async move {
            logsource::file::feed_lines(tokio::io::stdin(), &lines_tx).await
        }),
        LogSource::Dir(dir) => {
            tokio::spawn(async move { logsource::file::feed_dir(&dir, &lines_tx).await })
        }
        LogSource::Socket(spec) => {
            tokio::spawn(async move { logsource::socket::serve(spec, lines_tx, cancel).await })
        }
    }
}
