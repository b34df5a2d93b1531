//! Polls the browser profile's `Bookmarks` file and turns changes into tasks.

use std::{
    path::{Path, PathBuf},
    sync::mpsc::{Receiver, RecvTimeoutError},
    time::{Duration, SystemTime},
};

use anyhow::Context;

use crate::{
    app::task_runner::{Task, TaskQueue},
    bookmarks::{self, BookmarkEvent, BookmarkRecord, BookmarkTreeNode},
};

pub struct SnapshotWatcher {
    path: PathBuf,
    modified: Option<SystemTime>,
    snapshot: Vec<BookmarkRecord>,
}

fn modified_at(path: &Path) -> anyhow::Result<SystemTime> {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .with_context(|| format!("failed to stat {}", path.display()))
}

impl SnapshotWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            modified: None,
            snapshot: vec![],
        }
    }

    /// Read the current tree and remember it as the baseline.
    pub fn prime(&mut self) -> anyhow::Result<Vec<BookmarkTreeNode>> {
        let modified = modified_at(&self.path)?;
        let tree = bookmarks::load_tree(&self.path)?;

        self.snapshot = bookmarks::flatten(&tree);
        self.modified = Some(modified);

        Ok(tree)
    }

    /// Events since the previous snapshot, or nothing if the file is untouched.
    pub fn poll(&mut self) -> anyhow::Result<Vec<BookmarkEvent>> {
        let modified = modified_at(&self.path)?;
        if self.modified == Some(modified) {
            return Ok(vec![]);
        }

        // browsers rewrite the file in place, a half-written read is retried next tick
        let tree = match bookmarks::load_tree(&self.path) {
            Ok(tree) => tree,
            Err(err) => {
                log::warn!("{err:#}");
                return Ok(vec![]);
            }
        };

        let next = bookmarks::flatten(&tree);
        let events = bookmarks::diff_snapshots(&self.snapshot, &next);

        self.snapshot = next;
        self.modified = Some(modified);

        Ok(events)
    }
}

/// Runs until `shutdown` fires or its sender is dropped.
pub fn run(
    mut watcher: SnapshotWatcher,
    queue: &TaskQueue,
    interval: Duration,
    shutdown: Receiver<()>,
) -> anyhow::Result<()> {
    let tree = watcher.prime()?;
    log::info!("watching {}", watcher.path.display());
    queue.push(Task::Sync { tree: Some(tree) })?;

    loop {
        match shutdown.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::info!("stopping watcher");
                return Ok(());
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        for event in watcher.poll()? {
            log::info!("bookmark change: {event:?}");
            queue.push(event.into())?;
        }
    }
}
