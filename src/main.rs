//! Cyclic File Watcher - watch one file and print each new version.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use cyclic_file_watcher::config::SettingsLoader;
use cyclic_file_watcher::watcher::{
    BoxError, FileState, FileWatcher, LoggingHooks, WatchError, WatchParameters,
};

#[derive(Parser)]
#[command(
    name = "cyclic-watch",
    about = "Watch a file and keep a bounded history of its versions",
    version
)]
struct Cli {
    /// File to watch.
    file: PathBuf,

    /// Number of versions to keep.
    #[arg(short, long)]
    depth: Option<usize>,

    /// Poll interval in seconds.
    #[arg(short, long)]
    interval_secs: Option<u64>,

    /// Settings file to use instead of the default search paths.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

#[allow(clippy::ptr_arg)]
fn version_key(_path: &Path, _content: &String) -> Result<String, BoxError> {
    Ok(Uuid::new_v4().to_string())
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let loader = match cli.config {
        Some(path) => SettingsLoader::with_path(path),
        None => SettingsLoader::new(),
    };
    let mut settings = loader.load()?;
    if let Some(secs) = cli.interval_secs {
        settings.poll_interval_ms = secs.saturating_mul(1000);
    }
    let depth = cli.depth.unwrap_or(settings.default_depth);
    let poll_interval = Duration::from_millis(settings.poll_interval_ms);
    let config = settings.into_config(Arc::new(LoggingHooks))?;

    let watcher = FileWatcher::<String>::new(config);
    let cancel = CancellationToken::new();

    let params = WatchParameters::new(
        cli.file.clone(),
        depth,
        |path: PathBuf| async move { tokio::fs::read_to_string(path).await },
        version_key,
    );
    watcher.watch(params, &cancel).await?;

    watcher
        .subscribe(
            &cli.file,
            |state: Arc<FileState<String>>| async move {
                println!(
                    "changed: {} key={} modified={} bytes={}",
                    state.identifier(),
                    state.key(),
                    state.modified_at(),
                    state.content().len()
                );
                Ok::<_, WatchError>(())
            },
            &cancel,
        )
        .await?;

    tracing::info!(path = %cli.file.display(), depth, "Watching, press Ctrl-C to stop");

    loop {
        match watcher.get_latest(&cli.file, &cancel).await {
            Ok(latest) => println!("latest: key={} bytes={}", latest.key(), latest.content().len()),
            Err(e) => tracing::warn!(error = %e, "Failed to read latest state"),
        }

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            () = tokio::time::sleep(poll_interval) => {}
        }
    }

    cancel.cancel();
    watcher.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "cyclic-watch failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
