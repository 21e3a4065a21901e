use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{header, Client, Response, StatusCode};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::engine::{Control, ControlReceiver, EventSink, TransferEngine, TransferHandle};
use crate::error::{DownloadError, Result};
use crate::state::ResumeState;
use crate::store::LocalStore;

/// Global bandwidth limit shared by every transfer.
struct Throttle {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    burst: u32,
}

impl Throttle {
    fn new(bytes_per_sec: u32) -> Option<Self> {
        let burst = NonZeroU32::new(bytes_per_sec)?;
        Some(Self {
            limiter: RateLimiter::direct(Quota::per_second(burst)),
            burst: burst.get(),
        })
    }

    async fn consume(&self, len: usize) {
        let mut remaining = u32::try_from(len).unwrap_or(u32::MAX);
        while remaining > 0 {
            let n = remaining.min(self.burst);
            if let Some(nonzero) = NonZeroU32::new(n) {
                // n never exceeds the burst, so capacity is always sufficient
                let _ = self.limiter.until_n_ready(nonzero).await;
            }
            remaining -= n;
        }
    }
}

/// HTTP transfer engine: streams into a per-transfer partial file under the
/// local store and renames it into place on success. Pausing keeps the
/// partial file and hands back a [`ResumeState`]; resuming continues it with
/// a `Range` request.
pub struct HttpDownloader {
    client: Client,
    store: LocalStore,
    throttle: Option<Arc<Throttle>>,
    slots: Arc<Semaphore>,
    progress_step: f32,
}

impl HttpDownloader {
    pub fn new(config: &ManagerConfig) -> Self {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            store: LocalStore::new(config.store_root.clone()),
            throttle: config.rate_limit.and_then(Throttle::new).map(Arc::new),
            slots: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            progress_step: config.progress_step,
        }
    }
}

impl TransferEngine for HttpDownloader {
    fn start(&self, url: &str, resume_from: Option<Bytes>, sink: EventSink) -> Result<TransferHandle> {
        let filepath = self.store.path_for(url)?;
        let resume = match resume_from {
            Some(data) if !data.is_empty() => Some(ResumeState::decode(&data, url)?),
            _ => None,
        };
        let part_filepath = match &resume {
            Some(state) => state.part_path.clone(),
            None => self.store.part_path_for(url, sink.transfer_id())?,
        };

        let (handle, control) = TransferHandle::new(sink.transfer_id());
        let transfer = Transfer {
            client: self.client.clone(),
            url: url.to_string(),
            filepath,
            part_filepath,
            resume,
            throttle: self.throttle.clone(),
            slots: self.slots.clone(),
            progress_step: self.progress_step,
            control,
            sink,
        };
        tokio::spawn(transfer.run());
        Ok(handle)
    }

    fn discard(&self, resume_data: Bytes) -> BoxFuture<'static, ()> {
        async move {
            let Ok(state) = ResumeState::parse(&resume_data) else { return };
            // only ever remove what a transfer of ours wrote
            if state.part_path.extension().map_or(true, |ext| ext != "part") {
                return;
            }
            match fs::remove_file(&state.part_path).await {
                Ok(()) => debug!(part = ?state.part_path, "discarded partial file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(part = ?state.part_path, error = %e, "could not remove partial file"),
            }
        }
        .boxed()
    }
}

enum Outcome {
    Completed(PathBuf),
    Paused(Bytes),
    Canceled,
}

/// Everything one spawned transfer owns.
struct Transfer {
    client: Client,
    url: String,
    filepath: PathBuf,
    part_filepath: PathBuf,
    resume: Option<ResumeState>,
    throttle: Option<Arc<Throttle>>,
    slots: Arc<Semaphore>,
    progress_step: f32,
    control: ControlReceiver,
    sink: EventSink,
}

impl Transfer {
    async fn run(mut self) {
        debug!(url = %self.url, part = ?self.part_filepath, resuming = self.resume.is_some(), "transfer started");
        match self.execute().await {
            Ok(Outcome::Completed(path)) => {
                info!(url = %self.url, path = ?path, "transfer completed");
                self.sink.completed(path);
            }
            Ok(Outcome::Paused(resume_data)) => {
                info!(url = %self.url, resume_bytes = resume_data.len(), "transfer paused");
                self.sink.paused(resume_data);
            }
            Ok(Outcome::Canceled) => {
                self.discard_partial().await;
                debug!(url = %self.url, "transfer canceled");
            }
            Err(e) => {
                // cleaned up before reporting: the manager may restart right away
                self.discard_partial().await;
                warn!(url = %self.url, error = %e, "transfer failed");
                self.sink.failed(e);
            }
        }
    }

    async fn execute(&mut self) -> Result<Outcome> {
        let offset = self.resume.as_ref().map(|r| r.received).unwrap_or(0);

        let slots = self.slots.clone();
        let _permit = tokio::select! {
            biased;
            ctl = self.control.stopped() => return Ok(self.interrupted(ctl, offset, None, None).await),
            permit = slots.acquire_owned() => permit
                .map_err(|_| DownloadError::transport("transfer slots closed"))?,
        };

        if let Some(parent) = self.filepath.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::storage(format!("Failed to create directory {:?}: {}", parent, e)))?;
        }

        if offset > 0 {
            let on_disk = fs::metadata(&self.part_filepath).await.map(|m| m.len()).unwrap_or(0);
            if on_disk < offset {
                return Err(DownloadError::resume_unsupported(format!(
                    "partial file {:?} holds {} of {} bytes",
                    self.part_filepath, on_disk, offset
                )));
            }
        }

        let mut request = self.client.get(&self.url);
        if let Some(resume) = &self.resume {
            if resume.received > 0 {
                request = request.header(header::RANGE, format!("bytes={}-", resume.received));
                if let Some(validator) = &resume.validator {
                    request = request.header(header::IF_RANGE, validator.as_str());
                }
            }
        }

        let response = tokio::select! {
            biased;
            ctl = self.control.stopped() => return Ok(self.interrupted(ctl, offset, None, None).await),
            response = request.send() => response
                .map_err(|e| DownloadError::transport(format!("Failed to send request: {}", e)))?,
        };

        let status = response.status();
        if offset > 0 && status.is_success() && status != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::resume_unsupported(format!(
                "server answered {} to a range request",
                status
            )));
        }
        if !status.is_success() {
            return Err(DownloadError::transport(format!("HTTP error {}: {}", status, self.url)));
        }

        let validator = validator_of(&response).or_else(|| self.resume.as_ref().and_then(|r| r.validator.clone()));
        let total = response.content_length().map(|len| len + offset);
        let mut file = self.open_partial(offset).await?;

        let mut received = offset;
        let mut reported = fraction(received, total).unwrap_or(0.0);
        let mut stream = response.bytes_stream();

        loop {
            let item = tokio::select! {
                biased;
                ctl = self.control.stopped() => {
                    file.flush().await.map_err(|e| DownloadError::storage(format!("Failed to flush file: {}", e)))?;
                    drop(file);
                    return Ok(self.interrupted(ctl, received, total, validator).await);
                }
                item = stream.next() => item,
            };
            let Some(item) = item else { break };
            let chunk = item.map_err(|e| DownloadError::transport(format!("Error while downloading chunk: {}", e)))?;
            if chunk.is_empty() {
                continue;
            }

            if let Some(throttle) = &self.throttle {
                throttle.consume(chunk.len()).await;
            }

            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::storage(format!("Error while writing to file: {}", e)))?;
            received += chunk.len() as u64;

            if let Some(current) = fraction(received, total) {
                if current - reported >= self.progress_step || (current >= 1.0 && current > reported) {
                    reported = current;
                    self.sink.progress(current);
                }
            }
        }

        file.flush()
            .await
            .map_err(|e| DownloadError::storage(format!("Failed to flush file: {}", e)))?;
        drop(file);

        fs::rename(&self.part_filepath, &self.filepath)
            .await
            .map_err(|e| DownloadError::storage(format!("Failed to rename partial file: {}", e)))?;

        Ok(Outcome::Completed(self.filepath.clone()))
    }

    /// Fresh transfers truncate; resumed ones continue at `offset`.
    async fn open_partial(&self, offset: u64) -> Result<File> {
        if offset == 0 {
            return File::create(&self.part_filepath)
                .await
                .map_err(|e| DownloadError::storage(format!("Failed to create partial file: {}", e)));
        }

        let mut file = OpenOptions::new()
            .write(true)
            .open(&self.part_filepath)
            .await
            .map_err(|e| DownloadError::storage(format!("Failed to open partial file: {}", e)))?;
        file.set_len(offset)
            .await
            .map_err(|e| DownloadError::storage(format!("Failed to truncate partial file: {}", e)))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| DownloadError::storage(format!("Failed to seek partial file: {}", e)))?;
        Ok(file)
    }

    async fn interrupted(
        &self,
        ctl: Control,
        received: u64,
        total: Option<u64>,
        validator: Option<String>,
    ) -> Outcome {
        if ctl != Control::Paused {
            return Outcome::Canceled;
        }
        if received == 0 {
            self.discard_partial().await;
            return Outcome::Paused(Bytes::new());
        }

        let state = ResumeState {
            url: self.url.clone(),
            part_path: self.part_filepath.clone(),
            received,
            total: total.or_else(|| self.resume.as_ref().and_then(|r| r.total)),
            validator: validator.or_else(|| self.resume.as_ref().and_then(|r| r.validator.clone())),
        };
        Outcome::Paused(state.encode())
    }

    async fn discard_partial(&self) {
        if let Err(e) = fs::remove_file(&self.part_filepath).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(part = ?self.part_filepath, error = %e, "could not remove partial file");
            }
        }
    }
}

fn fraction(received: u64, total: Option<u64>) -> Option<f32> {
    match total {
        Some(total) if total > 0 => Some((received as f64 / total as f64).min(1.0) as f32),
        _ => None,
    }
}

fn validator_of(response: &Response) -> Option<String> {
    let headers = response.headers();
    headers
        .get(header::ETAG)
        .or_else(|| headers.get(header::LAST_MODIFIED))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
