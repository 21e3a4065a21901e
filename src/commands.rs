use anyhow::{bail, Context, Result};
use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use tunedl::{DownloadManager, DownloadStatus, LocalStore, ManagerConfig, RecordSnapshot};

use crate::cli::{Request, HELP};

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent:>3}% {msg}";

/// Download every url, one progress bar each, until all of them settle.
pub async fn run_downloads(urls: Vec<String>, config: ManagerConfig) -> Result<()> {
    tokio::fs::create_dir_all(&config.store_root)
        .await
        .context("Failed to create download directory")?;

    let manager = DownloadManager::from_config(&config);
    let mut changes = manager.subscribe();

    let multi_progress = MultiProgress::new();
    multi_progress.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
    let style = ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)?
        .progress_chars("=>-");

    let mut bars: HashMap<String, ProgressBar> = HashMap::new();
    let mut rejected = 0usize;

    for url in urls {
        if bars.contains_key(&url) {
            continue;
        }

        if manager.is_downloaded(&url) {
            let pb = multi_progress.add(ProgressBar::new(100));
            pb.set_style(style.clone());
            pb.finish_with_message(format!("Skipped     {}", display_name(&manager, &url)));
            continue;
        }

        match manager.start_download(&url) {
            Ok(()) => {
                let pb = multi_progress.add(ProgressBar::new(100));
                pb.set_style(style.clone());
                pb.set_message(format!("Waiting     {}", display_name(&manager, &url)));
                bars.insert(url, pb);
            }
            Err(e) => {
                multi_progress.println(format!("Skipping {}: {}", url, e))?;
                rejected += 1;
            }
        }
    }

    let mut failed = Vec::new();
    while !bars.is_empty() {
        let urls: Vec<String> = match changes.recv().await {
            Ok(change) => vec![change.url],
            // fell behind: re-read everything still running
            Err(RecvError::Lagged(_)) => bars.keys().cloned().collect(),
            Err(RecvError::Closed) => break,
        };

        for url in urls {
            let Some(pb) = bars.get(&url) else { continue };
            let name = display_name(&manager, &url);
            let Some(snapshot) = manager.snapshot(&url).await else {
                // canceled downloads are no longer tracked
                pb.abandon_with_message(format!("Canceled    {}", name));
                failed.push(url.clone());
                bars.remove(&url);
                continue;
            };
            render(pb, &snapshot, &name);

            match snapshot.status {
                DownloadStatus::Completed => {
                    bars.remove(&url);
                }
                DownloadStatus::Failed => {
                    failed.push(url.clone());
                    bars.remove(&url);
                }
                _ => {}
            }
        }
    }

    manager.shutdown().await;

    if !failed.is_empty() || rejected > 0 {
        bail!("{} download(s) failed", failed.len() + rejected);
    }
    Ok(())
}

fn render(pb: &ProgressBar, snapshot: &RecordSnapshot, name: &str) {
    pb.set_position((snapshot.progress * 100.0).round() as u64);
    match snapshot.status {
        DownloadStatus::Completed => pb.finish_with_message(format!("Completed   {}", name)),
        DownloadStatus::Failed => pb.abandon_with_message(format!(
            "Failed      {} ({})",
            name,
            snapshot.failure.as_deref().unwrap_or("unknown error")
        )),
        DownloadStatus::Paused => pb.set_message(format!("Paused      {}", name)),
        DownloadStatus::Downloading if snapshot.pause_requested => pb.set_message(format!("Pausing     {}", name)),
        _ => pb.set_message(format!("Downloading {}", name)),
    }
}

fn display_name(manager: &DownloadManager, url: &str) -> String {
    manager
        .store()
        .path_for(url)
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| url.to_string())
}

/// Line-oriented control of the manager from stdin.
pub async fn run_interactive(config: ManagerConfig) -> Result<()> {
    tokio::fs::create_dir_all(&config.store_root)
        .await
        .context("Failed to create download directory")?;

    let manager = DownloadManager::from_config(&config);

    let watcher = manager.clone();
    let mut changes = manager.subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => {
                    if let Some(snapshot) = watcher.snapshot(&change.url).await {
                        if snapshot.status != DownloadStatus::Downloading || snapshot.progress >= 1.0 {
                            println!("{}", status_line(&snapshot));
                        }
                    } else {
                        println!("{:<12} {}", "Canceled", change.url);
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request = match line.parse::<Request>() {
            Ok(request) => request,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        match request {
            Request::Start(url) => {
                if let Err(e) = manager.start_download(&url) {
                    eprintln!("{}", e);
                }
            }
            Request::Pause(url) => manager.pause_download(&url),
            Request::Resume(url) => manager.resume_download(&url),
            Request::Cancel(url) => manager.cancel_download(&url),
            Request::Status(Some(url)) => match manager.snapshot(&url).await {
                Some(snapshot) => println!("{}", status_line(&snapshot)),
                None => println!("{:<12} {}", "Untracked", url),
            },
            Request::Status(None) => {
                let all = manager.snapshots().await;
                if all.is_empty() {
                    println!("No downloads tracked.");
                }
                for snapshot in all {
                    println!("{}", status_line(&snapshot));
                }
            }
            Request::Check(url) => {
                let stored = manager.is_downloaded(&url);
                println!("{:<12} {}", if stored { "Stored" } else { "Not stored" }, url);
            }
            Request::Help => println!("{}", HELP),
            Request::Quit => break,
        }
    }

    manager.shutdown().await;
    reporter.abort();
    Ok(())
}

fn status_line(snapshot: &RecordSnapshot) -> String {
    let mut line = format!(
        "{:<12} {:>7} {}",
        snapshot.status.to_string(),
        format!("{:.1}%", snapshot.progress * 100.0),
        snapshot.url
    );
    if let Some(reason) = &snapshot.failure {
        line.push_str(&format!(" ({})", reason));
    }
    line
}

pub async fn list_downloads(output: PathBuf) -> Result<()> {
    let store = LocalStore::new(output.clone());
    let files = store
        .list()
        .await
        .with_context(|| format!("Failed to read download directory {:?}", output))?;

    if files.is_empty() {
        println!("No completed downloads found in '{:?}'.", output);
        println!("Tip: If you used a custom download directory, please specify it with --download-dir");
        return Ok(());
    }

    let total: u64 = files.iter().map(|f| f.size).sum();
    println!("Summary: Files: {} | Stored: {}", files.len(), HumanBytes(total));
    println!();

    println!("{:<50} {:<15} {:<17}", "Filename", "Size", "Modified");
    println!("{:-<50} {:-<15} {:-<17}", "", "", "");
    for file in files {
        let modified = file
            .modified
            .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "{:<50} {:<15} {:<17}",
            file.name,
            format!("{}", HumanBytes(file.size)),
            modified
        );
    }

    Ok(())
}
