//! Live views over the store.

use crate::error::StoreResult;
use room_types::{DirectoryEntry, RoomSnapshot};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A stream of updates fed by a background task.
///
/// Dropping the subscription stops the task.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    task: JoinHandle<()>,
}

/// Updates of one room; `Ok(None)` means the room does not exist.
pub type SnapshotSubscription = Subscription<StoreResult<Option<RoomSnapshot>>>;

/// Updates of the directory listing.
pub type DirectorySubscription = Subscription<StoreResult<Vec<DirectoryEntry>>>;

impl<T> Subscription<T> {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<T>, task: JoinHandle<()>) -> Self {
        Self { rx, task }
    }

    /// Wait for the next update. `None` once the feed has stopped.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take an update if one is already queued.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
