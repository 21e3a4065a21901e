mod cli;
mod commands;

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tunedl::ManagerConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URLs of preview files to download
    #[arg(index = 1)]
    urls: Vec<String>,

    /// Directory to save downloaded files (defaults to the local data dir)
    #[arg(short = 'd', long = "download-dir")]
    download_dir: Option<PathBuf>,

    /// Maximum number of concurrent downloads (defaults to number of logical CPUs)
    #[arg(short = 'c', long)]
    concurrency: Option<usize>,

    /// Global rate limit in bytes per second (e.g., 1048576 for 1MB/s)
    #[arg(short = 'r', long)]
    rate_limit: Option<u32>,

    /// List completed downloads in the download directory
    #[arg(short = 'l', long)]
    list: bool,

    /// Read start/pause/resume/cancel/status commands from stdin
    #[arg(short = 'i', long)]
    interactive: bool,

    /// Log engine and manager activity to stderr
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut download_dir = args.download_dir.unwrap_or_else(tunedl::config::default_store_root);
    // Output dir might not exist yet, so we resolve it relative to current dir
    if download_dir.is_relative() {
        if let Ok(cwd) = std::env::current_dir() {
            download_dir = cwd.join(&download_dir);
        }
    }

    let mut config = ManagerConfig::with_store_root(download_dir);
    if let Some(concurrency) = args.concurrency {
        config.max_concurrent = concurrency.max(1);
    }
    config.rate_limit = args.rate_limit;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        if args.list {
            crate::commands::list_downloads(config.store_root).await
        } else if args.interactive {
            crate::commands::run_interactive(config).await
        } else if args.urls.is_empty() {
            bail!("Nothing to do: pass one or more URLs, --interactive or --list")
        } else {
            crate::commands::run_downloads(args.urls, config).await
        }
    })
}

fn init_logging(verbose: bool) {
    let default = if verbose { "tunedl=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
