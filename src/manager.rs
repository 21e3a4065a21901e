//! Download manager: the single owner of the url -> record registry.
//!
//! Public calls and engine events are both funneled into one task that applies
//! them in order, so record mutations never race. Engine events are polled
//! ahead of commands; an event sent before a query is always visible to it.

use bytes::Bytes;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ManagerConfig;
use crate::downloader::HttpDownloader;
use crate::engine::{EngineEvent, EngineEventKind, EventSink, TransferEngine};
use crate::error::Result;
use crate::state::{DownloadStatus, RecordSnapshot, TransferRecord};
use crate::store::LocalStore;

/// Sent to subscribers after any status or progress change of `url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordChanged {
    pub url: String,
}

enum Command {
    Start { url: String },
    Pause { url: String },
    Resume { url: String },
    Cancel { url: String },
    Snapshot { url: String, reply: oneshot::Sender<Option<RecordSnapshot>> },
    SnapshotAll { reply: oneshot::Sender<Vec<RecordSnapshot>> },
}

/// Cheap to clone; all clones talk to the same registry.
#[derive(Clone)]
pub struct DownloadManager {
    commands: mpsc::UnboundedSender<Command>,
    changes: broadcast::Sender<RecordChanged>,
    store: LocalStore,
    shutdown: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl DownloadManager {
    /// Spawn the registry task. Must be called inside a tokio runtime.
    pub fn new(engine: Arc<dyn TransferEngine>, store: LocalStore, event_capacity: usize) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (changes, _) = broadcast::channel(event_capacity.max(1));
        let shutdown = CancellationToken::new();

        let registry = Registry {
            engine,
            records: HashMap::new(),
            events,
            changes: changes.clone(),
        };
        let task = tokio::spawn(registry.run(commands_rx, events_rx, shutdown.clone()));

        Self {
            commands,
            changes,
            store,
            shutdown,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Manager backed by the HTTP engine.
    pub fn from_config(config: &ManagerConfig) -> Self {
        let engine = Arc::new(HttpDownloader::new(config));
        Self::new(engine, LocalStore::new(config.store_root.clone()), config.event_capacity)
    }

    /// Begin a new download cycle for `url`. A url that cannot name a local
    /// file is rejected here and leaves no record; a url already downloading
    /// or paused is left alone.
    pub fn start_download(&self, url: &str) -> Result<()> {
        self.store.path_for(url)?;
        self.send(Command::Start { url: url.to_string() });
        Ok(())
    }

    pub fn pause_download(&self, url: &str) {
        self.send(Command::Pause { url: url.to_string() });
    }

    pub fn resume_download(&self, url: &str) {
        self.send(Command::Resume { url: url.to_string() });
    }

    pub fn cancel_download(&self, url: &str) {
        self.send(Command::Cancel { url: url.to_string() });
    }

    pub async fn progress_for(&self, url: &str) -> Option<f32> {
        self.snapshot(url).await.map(|s| s.progress)
    }

    pub async fn status_for(&self, url: &str) -> Option<DownloadStatus> {
        self.snapshot(url).await.map(|s| s.status)
    }

    pub async fn snapshot(&self, url: &str) -> Option<RecordSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot {
            url: url.to_string(),
            reply,
        });
        rx.await.ok().flatten()
    }

    /// Every tracked record, sorted by url.
    pub async fn snapshots(&self) -> Vec<RecordSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SnapshotAll { reply });
        rx.await.unwrap_or_default()
    }

    /// Whether the content of `url` is in the local store, whether or not
    /// this process downloaded it.
    pub fn is_downloaded(&self, url: &str) -> bool {
        self.store.exists(url)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordChanged> {
        self.changes.subscribe()
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Cancel every running transfer and stop the registry task.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("download manager is shut down, request dropped");
        }
    }
}

struct Registry {
    engine: Arc<dyn TransferEngine>,
    records: HashMap<String, TransferRecord>,
    events: mpsc::UnboundedSender<EngineEvent>,
    changes: broadcast::Sender<RecordChanged>,
}

impl Registry {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(event) = events.recv() => self.handle_event(event),
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
            }
        }

        let mut leftovers = Vec::new();
        for record in self.records.values_mut() {
            if let Some(handle) = &record.engine {
                handle.cancel();
            }
            if let Some(resume_data) = record.resume_data.take().filter(|d| !d.is_empty()) {
                leftovers.push(self.engine.discard(resume_data));
            }
        }
        join_all(leftovers).await;
        debug!(tracked = self.records.len(), "download manager stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { url } => self.start(url),
            Command::Pause { url } => self.pause(&url),
            Command::Resume { url } => self.resume(&url),
            Command::Cancel { url } => self.cancel(&url),
            Command::Snapshot { url, reply } => {
                let _ = reply.send(self.records.get(&url).map(TransferRecord::snapshot));
            }
            Command::SnapshotAll { reply } => {
                let mut all: Vec<_> = self.records.values().map(TransferRecord::snapshot).collect();
                all.sort_by(|a, b| a.url.cmp(&b.url));
                let _ = reply.send(all);
            }
        }
    }

    fn start(&mut self, url: String) {
        let record = self
            .records
            .entry(url.clone())
            .or_insert_with(|| TransferRecord::new(&url));
        if !record.status.can_start() {
            debug!(url = %url, status = %record.status, "start ignored");
            return;
        }

        record.reset();
        info!(url = %url, "download started");
        self.launch(&url, None);
    }

    fn pause(&mut self, url: &str) {
        let Some(record) = self.records.get_mut(url) else { return };
        let Some(handle) = record.engine.as_ref() else { return };
        if record.status != DownloadStatus::Downloading || record.pause_requested {
            return;
        }

        handle.pause();
        record.pause_requested = true;
        record.touch();
        debug!(url = %url, "pause requested");
        self.notify(url);
    }

    fn resume(&mut self, url: &str) {
        let Some(record) = self.records.get_mut(url) else { return };
        if record.status != DownloadStatus::Paused {
            return;
        }

        let resume_data = record.resume_data.take().unwrap_or_default();
        info!(url = %url, resume_bytes = resume_data.len(), "download resumed");
        self.launch(url, Some(resume_data));
    }

    fn cancel(&mut self, url: &str) {
        let in_progress = self
            .records
            .get(url)
            .map(|r| r.status.is_in_progress())
            .unwrap_or(false);
        if !in_progress {
            return;
        }

        if let Some(record) = self.records.remove(url) {
            if let Some(handle) = &record.engine {
                handle.cancel();
            }
            // a paused transfer has no engine left to clean up after it
            if let Some(resume_data) = record.resume_data.filter(|d| !d.is_empty()) {
                tokio::spawn(self.engine.discard(resume_data));
            }
            info!(url = %url, "download canceled");
            self.notify(url);
        }
    }

    /// Start a fresh engine for a tracked url and make it the current one.
    /// Resume data the engine refuses is dropped in favor of a full restart.
    fn launch(&mut self, url: &str, resume_from: Option<Bytes>) {
        let sink = EventSink::new(url, Uuid::new_v4(), self.events.clone());
        let refused = resume_from.clone();
        let started = self.engine.start(url, resume_from, sink);

        let Some(record) = self.records.get_mut(url) else { return };
        record.pause_requested = false;
        record.resume_data = None;
        match started {
            Ok(handle) => {
                record.status = DownloadStatus::Downloading;
                record.engine = Some(handle);
            }
            Err(e) if refused.is_some() && e.is_resume_unsupported() => {
                warn!(url = %url, error = %e, "resume refused, restarting from scratch");
                record.progress = 0.0;
                if let Some(resume_data) = refused.filter(|d| !d.is_empty()) {
                    tokio::spawn(self.engine.discard(resume_data));
                }
                self.launch(url, None);
                return;
            }
            Err(e) => {
                warn!(url = %url, error = %e, "could not start transfer");
                record.status = DownloadStatus::Failed;
                record.engine = None;
                record.failure = Some(e.to_string());
            }
        }
        record.touch();
        self.notify(url);
    }

    fn handle_event(&mut self, event: EngineEvent) {
        let Some(record) = self.records.get_mut(&event.url) else {
            debug!(url = %event.url, "event for untracked url ignored");
            return;
        };
        if record.transfer_id() != Some(event.transfer) {
            debug!(url = %event.url, transfer = %event.transfer, "late event from a replaced transfer ignored");
            return;
        }

        match event.kind {
            EngineEventKind::Progress(fraction) => {
                let fraction = fraction.clamp(0.0, 1.0);
                if fraction <= record.progress {
                    return;
                }
                record.progress = fraction;
            }
            EngineEventKind::Completed(path) => {
                info!(url = %event.url, path = ?path, "download completed");
                record.status = DownloadStatus::Completed;
                record.progress = 1.0;
                record.local_path = Some(path);
                record.engine = None;
                record.pause_requested = false;
            }
            EngineEventKind::Failed(e) if e.is_resume_unsupported() => {
                warn!(url = %event.url, error = %e, "server cannot resume, restarting from scratch");
                record.engine = None;
                record.progress = 0.0;
                self.launch(&event.url, None);
                return;
            }
            EngineEventKind::Failed(e) => {
                warn!(url = %event.url, error = %e, "download failed");
                record.status = DownloadStatus::Failed;
                record.failure = Some(e.to_string());
                record.resume_data = None;
                record.engine = None;
                record.pause_requested = false;
            }
            EngineEventKind::Paused(resume_data) => {
                info!(url = %event.url, resume_bytes = resume_data.len(), "download paused");
                record.status = DownloadStatus::Paused;
                record.resume_data = Some(resume_data);
                record.engine = None;
                record.pause_requested = false;
            }
        }
        record.touch();
        self.notify(&event.url);
    }

    fn notify(&self, url: &str) {
        // no subscribers is fine
        let _ = self.changes.send(RecordChanged { url: url.to_string() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scripted::ScriptedEngine;
    use crate::error::DownloadError;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    const SONG: &str = "https://example.com/a/song.mp3";

    fn manager_with(engine: &ScriptedEngine) -> (DownloadManager, TempDir) {
        let dir = tempdir().unwrap();
        let manager = DownloadManager::new(Arc::new(engine.clone()), LocalStore::new(dir.path()), 64);
        (manager, dir)
    }

    /// Start and wait until the registry has handed the url to the engine.
    async fn start(manager: &DownloadManager, url: &str) {
        manager.start_download(url).unwrap();
        manager.snapshot(url).await;
    }

    async fn wait_for_status(manager: &DownloadManager, url: &str, status: DownloadStatus) -> RecordSnapshot {
        for _ in 0..200 {
            if let Some(snapshot) = manager.snapshot(url).await {
                if snapshot.status == status {
                    return snapshot;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{} never reached {}", url, status);
    }

    #[tokio::test]
    async fn test_start_creates_downloading_record() {
        let engine = ScriptedEngine::new();
        let (manager, _dir) = manager_with(&engine);

        start(&manager, SONG).await;
        let snapshot = manager.snapshot(SONG).await.unwrap();
        assert_eq!(snapshot.status, DownloadStatus::Downloading);
        assert_eq!(snapshot.progress, 0.0);
        assert!(snapshot.resume_data.is_none());
        assert_eq!(engine.start_count(), 1);
        assert_eq!(engine.url_of(0), SONG);
        assert!(engine.resume_from(0).is_none());
    }

    #[tokio::test]
    async fn test_second_start_while_downloading_is_noop() {
        let engine = ScriptedEngine::new();
        let (manager, _dir) = manager_with(&engine);

        start(&manager, SONG).await;
        manager.start_download(SONG).unwrap();
        assert_eq!(manager.status_for(SONG).await, Some(DownloadStatus::Downloading));
        assert_eq!(engine.start_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_url_creates_no_record() {
        let engine = ScriptedEngine::new();
        let (manager, _dir) = manager_with(&engine);

        let err = manager.start_download("not a url").unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl { .. }));
        assert!(manager.snapshot("not a url").await.is_none());
        assert!(manager.snapshots().await.is_empty());
        assert_eq!(engine.start_count(), 0);
    }

    #[tokio::test]
    async fn test_progress_then_completion() {
        let engine = ScriptedEngine::new();
        let (manager, dir) = manager_with(&engine);
        let mut changes = manager.subscribe();

        start(&manager, SONG).await;
        let sink = engine.sink(0);
        sink.progress(0.3);
        assert_eq!(manager.progress_for(SONG).await, Some(0.3));
        sink.progress(0.7);
        assert_eq!(manager.progress_for(SONG).await, Some(0.7));

        let dest = dir.path().join("song.mp3");
        std::fs::write(&dest, b"audio").unwrap();
        sink.completed(dest.clone());

        let snapshot = manager.snapshot(SONG).await.unwrap();
        assert_eq!(snapshot.status, DownloadStatus::Completed);
        assert!(snapshot.progress >= 0.7);
        assert_eq!(snapshot.local_path, Some(dest));
        assert!(manager.is_downloaded(SONG));
        assert!(manager.store().path_for(SONG).unwrap().ends_with("song.mp3"));

        // start, two progress events, completion
        for _ in 0..4 {
            assert_eq!(changes.recv().await.unwrap().url, SONG);
        }
    }

    #[tokio::test]
    async fn test_progress_never_goes_backwards() {
        let engine = ScriptedEngine::new();
        let (manager, _dir) = manager_with(&engine);

        start(&manager, SONG).await;
        let sink = engine.sink(0);
        sink.progress(0.6);
        sink.progress(0.2);
        sink.progress(1.7);
        assert_eq!(manager.progress_for(SONG).await, Some(1.0));
    }

    #[tokio::test]
    async fn test_pause_before_progress() {
        let engine = ScriptedEngine::new();
        let (manager, dir) = manager_with(&engine);

        start(&manager, SONG).await;
        manager.pause_download(SONG);

        let snapshot = wait_for_status(&manager, SONG, DownloadStatus::Paused).await;
        assert_eq!(snapshot.resume_data, Some(Bytes::new()));
        assert!(!snapshot.pause_requested);
        assert!(!dir.path().join("song.mp3").exists());
        assert!(!manager.is_downloaded(SONG));
    }

    #[tokio::test]
    async fn test_pause_is_pending_until_acknowledged() {
        let engine = ScriptedEngine::new().holding_pauses();
        let (manager, _dir) = manager_with(&engine);

        start(&manager, SONG).await;
        engine.sink(0).progress(0.5);
        manager.pause_download(SONG);

        let pending = manager.snapshot(SONG).await.unwrap();
        assert_eq!(pending.status, DownloadStatus::Downloading);
        assert!(pending.pause_requested);
        assert!(pending.resume_data.is_none());

        // still downloading, so another start changes nothing
        manager.start_download(SONG).unwrap();
        assert_eq!(engine.start_count(), 1);

        engine.sink(0).paused(Bytes::from_static(b"acknowledged"));
        let paused = manager.snapshot(SONG).await.unwrap();
        assert_eq!(paused.status, DownloadStatus::Paused);
        assert!(!paused.pause_requested);
        assert_eq!(paused.progress, 0.5);
        assert_eq!(paused.resume_data, Some(Bytes::from_static(b"acknowledged")));
    }

    #[tokio::test]
    async fn test_pause_then_resume_hands_over_resume_data() {
        let engine = ScriptedEngine::new().with_pause_data(b"partial-state");
        let (manager, _dir) = manager_with(&engine);

        start(&manager, SONG).await;
        engine.sink(0).progress(0.4);
        manager.pause_download(SONG);
        let paused = wait_for_status(&manager, SONG, DownloadStatus::Paused).await;
        assert_eq!(paused.resume_data, Some(Bytes::from_static(b"partial-state")));
        assert_eq!(paused.progress, 0.4);

        manager.resume_download(SONG);
        let resumed = manager.snapshot(SONG).await.unwrap();
        assert_eq!(resumed.status, DownloadStatus::Downloading);
        assert!(resumed.resume_data.is_none());
        assert_eq!(engine.start_count(), 2);
        assert_eq!(engine.resume_from(1), Some(Bytes::from_static(b"partial-state")));
    }

    #[tokio::test]
    async fn test_failure_after_resume_clears_resume_data() {
        let engine = ScriptedEngine::new().with_pause_data(b"partial-state");
        let (manager, _dir) = manager_with(&engine);

        start(&manager, SONG).await;
        manager.pause_download(SONG);
        wait_for_status(&manager, SONG, DownloadStatus::Paused).await;
        manager.resume_download(SONG);
        assert_eq!(manager.status_for(SONG).await, Some(DownloadStatus::Downloading));

        engine.sink(1).failed(DownloadError::transport("connection reset"));
        let snapshot = manager.snapshot(SONG).await.unwrap();
        assert_eq!(snapshot.status, DownloadStatus::Failed);
        assert!(snapshot.resume_data.is_none());
        assert_eq!(snapshot.failure.as_deref(), Some("transport failure: connection reset"));
    }

    #[tokio::test]
    async fn test_cancel_removes_record_and_ignores_late_events() {
        let engine = ScriptedEngine::new();
        let (manager, _dir) = manager_with(&engine);

        start(&manager, SONG).await;
        let old = engine.sink(0);
        old.progress(0.2);
        manager.cancel_download(SONG);
        assert!(manager.snapshot(SONG).await.is_none());

        old.progress(0.9);
        old.completed("/nowhere/song.mp3".into());
        assert!(manager.snapshot(SONG).await.is_none());

        // a new cycle is not disturbed by the old engine either
        manager.start_download(SONG).unwrap();
        old.progress(0.8);
        let snapshot = manager.snapshot(SONG).await.unwrap();
        assert_eq!(snapshot.status, DownloadStatus::Downloading);
        assert_eq!(snapshot.progress, 0.0);
    }

    #[tokio::test]
    async fn test_cancel_while_paused() {
        let engine = ScriptedEngine::new().with_pause_data(b"partial-state");
        let (manager, _dir) = manager_with(&engine);

        start(&manager, SONG).await;
        manager.pause_download(SONG);
        wait_for_status(&manager, SONG, DownloadStatus::Paused).await;

        manager.cancel_download(SONG);
        assert!(manager.snapshot(SONG).await.is_none());
        assert_eq!(engine.discarded(), vec![Bytes::from_static(b"partial-state")]);
        // resuming a purged record does nothing
        manager.resume_download(SONG);
        assert!(manager.snapshot(SONG).await.is_none());
        assert_eq!(engine.start_count(), 1);
    }

    #[tokio::test]
    async fn test_events_from_paused_engine_are_ignored_after_resume() {
        let engine = ScriptedEngine::new();
        let (manager, _dir) = manager_with(&engine);

        start(&manager, SONG).await;
        manager.pause_download(SONG);
        wait_for_status(&manager, SONG, DownloadStatus::Paused).await;
        manager.resume_download(SONG);

        engine.sink(0).completed("/nowhere/song.mp3".into());
        assert_eq!(manager.status_for(SONG).await, Some(DownloadStatus::Downloading));
    }

    #[tokio::test]
    async fn test_operations_outside_their_states_are_noops() {
        let engine = ScriptedEngine::new();
        let (manager, _dir) = manager_with(&engine);

        manager.pause_download(SONG);
        manager.resume_download(SONG);
        manager.cancel_download(SONG);
        assert!(manager.snapshot(SONG).await.is_none());

        start(&manager, SONG).await;
        manager.resume_download(SONG);
        engine.sink(0).completed("/nowhere/song.mp3".into());
        manager.pause_download(SONG);
        manager.cancel_download(SONG);
        assert_eq!(manager.status_for(SONG).await, Some(DownloadStatus::Completed));
        assert_eq!(engine.start_count(), 1);
    }

    #[tokio::test]
    async fn test_restart_after_failure_begins_new_cycle() {
        let engine = ScriptedEngine::new();
        let (manager, _dir) = manager_with(&engine);

        start(&manager, SONG).await;
        engine.sink(0).progress(0.5);
        engine.sink(0).failed(DownloadError::storage("disk full"));
        assert_eq!(manager.status_for(SONG).await, Some(DownloadStatus::Failed));

        manager.start_download(SONG).unwrap();
        let snapshot = manager.snapshot(SONG).await.unwrap();
        assert_eq!(snapshot.status, DownloadStatus::Downloading);
        assert_eq!(snapshot.progress, 0.0);
        assert!(snapshot.failure.is_none());
        assert_eq!(engine.start_count(), 2);
        assert!(engine.resume_from(1).is_none());
    }

    #[tokio::test]
    async fn test_refused_resume_restarts_from_scratch() {
        let engine = ScriptedEngine::new().with_pause_data(b"stale").rejecting_resume();
        let (manager, _dir) = manager_with(&engine);

        start(&manager, SONG).await;
        engine.sink(0).progress(0.5);
        manager.pause_download(SONG);
        wait_for_status(&manager, SONG, DownloadStatus::Paused).await;
        manager.resume_download(SONG);

        let snapshot = manager.snapshot(SONG).await.unwrap();
        assert_eq!(snapshot.status, DownloadStatus::Downloading);
        assert_eq!(snapshot.progress, 0.0);
        assert_eq!(engine.start_count(), 2);
        assert!(engine.resume_from(1).is_none());
        assert_eq!(engine.discarded(), vec![Bytes::from_static(b"stale")]);
    }

    #[tokio::test]
    async fn test_resume_unsupported_failure_restarts_from_scratch() {
        let engine = ScriptedEngine::new().with_pause_data(b"partial-state");
        let (manager, _dir) = manager_with(&engine);

        start(&manager, SONG).await;
        manager.pause_download(SONG);
        wait_for_status(&manager, SONG, DownloadStatus::Paused).await;
        manager.resume_download(SONG);
        assert_eq!(manager.status_for(SONG).await, Some(DownloadStatus::Downloading));

        engine.sink(1).failed(DownloadError::resume_unsupported("200 instead of 206"));
        let snapshot = manager.snapshot(SONG).await.unwrap();
        assert_eq!(snapshot.status, DownloadStatus::Downloading);
        assert!(snapshot.failure.is_none());
        assert_eq!(engine.start_count(), 3);
        assert!(engine.resume_from(2).is_none());
    }

    #[tokio::test]
    async fn test_urls_are_independent() {
        let engine = ScriptedEngine::new();
        let (manager, _dir) = manager_with(&engine);
        let other = "https://example.com/b/other.mp3";

        start(&manager, SONG).await;
        start(&manager, other).await;
        engine.sink(1).failed(DownloadError::transport("timeout"));

        let all = manager.snapshots().await;
        assert_eq!(all.len(), 2);
        assert_eq!(manager.status_for(SONG).await, Some(DownloadStatus::Downloading));
        assert_eq!(manager.status_for(other).await, Some(DownloadStatus::Failed));
    }

    #[tokio::test]
    async fn test_is_downloaded_ignores_registry() {
        let engine = ScriptedEngine::new();
        let (manager, dir) = manager_with(&engine);

        std::fs::write(dir.path().join("song.mp3"), b"from an earlier run").unwrap();
        assert!(manager.is_downloaded(SONG));
        assert!(manager.snapshot(SONG).await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_discards_paused_data() {
        let engine = ScriptedEngine::new().with_pause_data(b"partial-state");
        let (manager, _dir) = manager_with(&engine);

        start(&manager, SONG).await;
        start(&manager, "https://example.com/b/other.mp3").await;
        manager.pause_download(SONG);
        wait_for_status(&manager, SONG, DownloadStatus::Paused).await;

        manager.shutdown().await;
        assert_eq!(engine.discarded(), vec![Bytes::from_static(b"partial-state")]);
    }

    #[tokio::test]
    async fn test_canceling_a_running_download_leaves_cleanup_to_its_engine() {
        let engine = ScriptedEngine::new();
        let (manager, _dir) = manager_with(&engine);

        start(&manager, SONG).await;
        manager.cancel_download(SONG);
        assert!(manager.snapshot(SONG).await.is_none());
        assert!(engine.discarded().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_makes_requests_noops() {
        let engine = ScriptedEngine::new();
        let (manager, _dir) = manager_with(&engine);

        start(&manager, SONG).await;
        assert_eq!(manager.status_for(SONG).await, Some(DownloadStatus::Downloading));
        manager.shutdown().await;
        manager.shutdown().await;

        manager.start_download(SONG).unwrap();
        assert!(manager.snapshot(SONG).await.is_none());
        assert!(manager.snapshots().await.is_empty());
        assert_eq!(engine.start_count(), 1);
    }
}
