//! The seam between the manager and whatever moves bytes.
//!
//! An engine runs one url's transfer in the background and reports back only
//! through its [`EventSink`]. The manager keeps the [`TransferHandle`] and uses
//! it to pause or cancel; the engine watches the matching [`ControlReceiver`].

use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::error::{DownloadError, Result};

pub type TransferId = Uuid;

/// What the manager currently wants from a running transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Running,
    Paused,
    Canceled,
}

#[derive(Debug, Clone)]
pub enum EngineEventKind {
    Progress(f32),
    Completed(PathBuf),
    Failed(DownloadError),
    /// Pause acknowledged; carries resume data, possibly empty.
    Paused(Bytes),
}

#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub url: String,
    pub transfer: TransferId,
    pub kind: EngineEventKind,
}

/// Where an engine delivers its events. Tagged with the url and transfer id
/// so the manager can drop events from engines it no longer tracks.
#[derive(Debug, Clone)]
pub struct EventSink {
    url: String,
    transfer: TransferId,
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EventSink {
    pub fn new(url: &str, transfer: TransferId, tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self {
            url: url.to_string(),
            transfer,
            tx,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn transfer_id(&self) -> TransferId {
        self.transfer
    }

    pub fn progress(&self, fraction: f32) {
        self.emit(EngineEventKind::Progress(fraction));
    }

    pub fn completed(&self, path: PathBuf) {
        self.emit(EngineEventKind::Completed(path));
    }

    pub fn failed(&self, error: DownloadError) {
        self.emit(EngineEventKind::Failed(error));
    }

    pub fn paused(&self, resume_data: Bytes) {
        self.emit(EngineEventKind::Paused(resume_data));
    }

    fn emit(&self, kind: EngineEventKind) {
        // The manager may already be gone; nobody is left to tell.
        let _ = self.tx.send(EngineEvent {
            url: self.url.clone(),
            transfer: self.transfer,
            kind,
        });
    }
}

/// Manager-side handle of one running transfer.
#[derive(Debug)]
pub struct TransferHandle {
    id: TransferId,
    control: watch::Sender<Control>,
}

impl TransferHandle {
    pub fn new(id: TransferId) -> (Self, ControlReceiver) {
        let (control, rx) = watch::channel(Control::Running);
        (Self { id, control }, ControlReceiver { rx })
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    /// Ask the engine to stop and keep what it has. Ignored once canceled.
    pub fn pause(&self) {
        self.control.send_if_modified(|current| {
            if *current == Control::Running {
                *current = Control::Paused;
                true
            } else {
                false
            }
        });
    }

    /// Ask the engine to stop and throw its partial data away.
    pub fn cancel(&self) {
        self.control.send_if_modified(|current| {
            if *current == Control::Canceled {
                false
            } else {
                *current = Control::Canceled;
                true
            }
        });
    }
}

/// Engine-side view of a [`TransferHandle`].
#[derive(Debug)]
pub struct ControlReceiver {
    rx: watch::Receiver<Control>,
}

impl ControlReceiver {
    pub fn current(&self) -> Control {
        *self.rx.borrow()
    }

    /// Resolves once the transfer should stop. A dropped handle counts as a
    /// cancel. Cancel safe, so it can sit in a `select!` next to I/O.
    pub async fn stopped(&mut self) -> Control {
        loop {
            let current = *self.rx.borrow_and_update();
            if current != Control::Running {
                return current;
            }
            if self.rx.changed().await.is_err() {
                return match *self.rx.borrow() {
                    Control::Running => Control::Canceled,
                    other => other,
                };
            }
        }
    }
}

/// Performs transfers. `start` returns as soon as the transfer is under way;
/// everything after that arrives through `sink`.
pub trait TransferEngine: Send + Sync {
    fn start(&self, url: &str, resume_from: Option<Bytes>, sink: EventSink) -> Result<TransferHandle>;

    /// Release whatever `resume_data` keeps alive outside the manager, such as
    /// a partial file. Called for paused transfers that will never resume.
    fn discard(&self, resume_data: Bytes) -> BoxFuture<'static, ()> {
        let _ = resume_data;
        future::ready(()).boxed()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pause_then_cancel_ends_canceled() {
        let (handle, mut control) = TransferHandle::new(Uuid::new_v4());
        handle.pause();
        handle.cancel();
        assert_eq!(control.stopped().await, Control::Canceled);
    }

    #[tokio::test]
    async fn test_cancel_is_not_downgraded_to_pause() {
        let (handle, control) = TransferHandle::new(Uuid::new_v4());
        handle.cancel();
        handle.pause();
        assert_eq!(control.current(), Control::Canceled);
    }

    #[tokio::test]
    async fn test_dropped_handle_counts_as_cancel() {
        let (handle, mut control) = TransferHandle::new(Uuid::new_v4());
        drop(handle);
        assert_eq!(control.stopped().await, Control::Canceled);
    }

    #[tokio::test]
    async fn test_sink_tags_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let sink = EventSink::new("https://example.com/a.mp3", id, tx);

        sink.progress(0.5);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.url, "https://example.com/a.mp3");
        assert_eq!(event.transfer, id);
        assert!(matches!(event.kind, EngineEventKind::Progress(f) if f == 0.5));
    }
}
