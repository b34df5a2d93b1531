//! Single-consumer task queue.
//!
//! Bookmark events and sync requests from every entry point (cli, daemon,
//! watcher) are funneled into one thread that owns the [`Reconciler`], so they
//! are handled strictly in order and never overlap.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::mpsc,
    thread::JoinHandle,
};

use anyhow::anyhow;
use serde::Serialize;

use crate::bookmarks::{BookmarkEvent, BookmarkRecord, BookmarkTreeNode};

use super::{
    errors::AppError,
    reconciler::{DrainOutcome, Reconciler},
    state::SyncStatus,
};

#[derive(Clone, Debug)]
pub enum Task {
    /// a bookmark was created locally
    BookmarkCreated(BookmarkRecord),

    /// a bookmark was removed locally, `survivor` shares its url
    BookmarkRemoved {
        id: String,
        survivor: Option<BookmarkRecord>,
    },

    /// recompute the pending queue without draining it
    InitSync { tree: Vec<BookmarkTreeNode> },

    /// full sync against `tree`, or a plain drain of the current queue
    Sync { tree: Option<Vec<BookmarkTreeNode>> },

    /// request to gracefully shutdown task queue
    Shutdown,
}

impl From<BookmarkEvent> for Task {
    fn from(event: BookmarkEvent) -> Self {
        match event {
            BookmarkEvent::Created(record) => Task::BookmarkCreated(record),
            BookmarkEvent::Removed { id, survivor } => Task::BookmarkRemoved { id, survivor },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "report", rename_all = "snake_case")]
pub enum TaskReport {
    Diff { pending: usize },
    Drain(DrainOutcome),
    Removed { flagged: usize },
    Failed { error: String },
}

impl Task {
    pub fn run(self, reconciler: &Reconciler) -> TaskReport {
        let result = match self {
            Task::BookmarkCreated(record) => reconciler.enqueue(record).map(TaskReport::Drain),
            Task::BookmarkRemoved { id, survivor } => reconciler
                .remove(&id, survivor)
                .map(|flagged| TaskReport::Removed { flagged }),
            Task::InitSync { tree } => reconciler.store().user().and_then(|user| {
                let user = user.ok_or(AppError::NotSignedIn)?;
                let remote_urls = reconciler.remote().active_urls(&user.id)?;
                let pending = reconciler.compute_diff(&tree, &remote_urls)?;
                Ok(TaskReport::Diff {
                    pending: pending.len(),
                })
            }),
            Task::Sync { tree: Some(tree) } => reconciler.full_sync(&tree).map(TaskReport::Drain),
            Task::Sync { tree: None } => reconciler.drain_queue().map(TaskReport::Drain),
            Task::Shutdown => Err(AppError::Other(anyhow!(
                "shutdown is handled by the queue, not run as a task"
            ))),
        };

        result.unwrap_or_else(|err| {
            log::error!("task failed: {err}");
            TaskReport::Failed {
                error: err.to_string(),
            }
        })
    }
}

pub struct Job {
    task: Task,
    reply: Option<mpsc::Sender<TaskReport>>,
}

pub fn start_queue(job_rx: mpsc::Receiver<Job>, reconciler: Reconciler) {
    log::debug!("waiting for job");
    while let Ok(Job { task, reply }) = job_rx.recv() {
        // graceful shutdown
        if let Task::Shutdown = &task {
            log::info!("task queue stopped");
            return;
        }

        log::debug!("got the job: {task:?}");
        let report = match catch_unwind(AssertUnwindSafe(|| task.run(&reconciler))) {
            Ok(report) => report,
            Err(err) => {
                log::error!("task panicked: {err:?}");
                release_own_status(&reconciler);
                TaskReport::Failed {
                    error: "task panicked".to_string(),
                }
            }
        };

        if let Some(reply) = reply {
            // the requester may have given up waiting
            let _ = reply.send(report);
        }
    }
}

/// A panic mid-drain leaves this session's `running` flag behind.
fn release_own_status(reconciler: &Reconciler) {
    match reconciler.store().status() {
        Ok(SyncStatus::Running { session, .. }) if &session == reconciler.session() => {
            if let Err(err) = reconciler.reset_status() {
                log::error!("failed to release sync status: {err}");
            }
        }
        Ok(_) => {}
        Err(err) => log::error!("failed to read sync status: {err}"),
    }
}

/// Producer side of the queue.
#[derive(Clone)]
pub struct TaskQueue {
    job_tx: mpsc::Sender<Job>,
}

impl TaskQueue {
    pub fn start(reconciler: Reconciler) -> (TaskQueue, JoinHandle<()>) {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let handle = std::thread::spawn(move || start_queue(job_rx, reconciler));

        (TaskQueue { job_tx }, handle)
    }

    fn send(&self, job: Job) -> Result<(), AppError> {
        self.job_tx
            .send(job)
            .map_err(|_| AppError::Other(anyhow!("task queue is closed")))
    }

    /// Fire and forget.
    pub fn push(&self, task: Task) -> Result<(), AppError> {
        self.send(Job { task, reply: None })
    }

    /// Enqueue and wait for the task's report.
    pub fn request(&self, task: Task) -> Result<TaskReport, AppError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(Job {
            task,
            reply: Some(reply_tx),
        })?;

        reply_rx
            .recv()
            .map_err(|_| AppError::Other(anyhow!("task queue stopped before replying")))
    }

    pub fn shutdown(&self) {
        if self.push(Task::Shutdown).is_err() {
            log::warn!("task queue already stopped");
        }
    }
}
