//! Bookmark reconciliation.
//!
//! Keeps the remote index eventually consistent with the local bookmark tree
//! through a persisted pending-sync queue:
//! - `compute_diff` overwrites the queue with the local records missing remotely
//! - `drain_queue` writes queued records one at a time and stops at the first failure
//!
//! The persisted [`SyncStatus`] guards drains. A `running` status owned by
//! another session is never taken over silently: it has to be cleared with
//! [`Reconciler::reset_status`] first.

use std::{
    collections::HashSet,
    sync::Arc,
    thread::sleep,
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    bookmarks::{self, BookmarkRecord, BookmarkTreeNode},
    eid::Eid,
    enrichment::{EnrichmentService, KeyInfo},
};

use super::{
    backend::{NewRemoteEntry, RemoteBookmarkEntry, RemoteIndex},
    errors::AppError,
    state::{SyncStatus, SyncStore, UserIdentity},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DrainOutcome {
    /// This session is already draining.
    AlreadyRunning,
    /// The status flag is held by another session, possibly a crashed one.
    NeedsReset {
        session: Eid,
        started_at: DateTime<Utc>,
    },
    Empty,
    Completed {
        committed: Vec<BookmarkRecord>,
    },
    Aborted {
        committed: Vec<BookmarkRecord>,
        failed_at: BookmarkRecord,
        reason: String,
        remaining: usize,
    },
}

pub struct Reconciler {
    store: SyncStore,
    remote: Arc<dyn RemoteIndex>,
    enrichment: Arc<dyn EnrichmentService>,
    session: Eid,
    inter_record_delay: Duration,
}

impl Reconciler {
    pub fn new(
        store: SyncStore,
        remote: Arc<dyn RemoteIndex>,
        enrichment: Arc<dyn EnrichmentService>,
        inter_record_delay: Duration,
    ) -> Self {
        Self {
            store,
            remote,
            enrichment,
            session: Eid::new(),
            inter_record_delay,
        }
    }

    pub fn session(&self) -> &Eid {
        &self.session
    }

    pub fn store(&self) -> &SyncStore {
        &self.store
    }

    pub fn remote(&self) -> &dyn RemoteIndex {
        self.remote.as_ref()
    }

    /// Local records of `tree` that `remote_urls` lacks. Nothing is persisted.
    pub fn preview_diff(
        &self,
        tree: &[BookmarkTreeNode],
        remote_urls: &HashSet<String>,
    ) -> Vec<BookmarkRecord> {
        bookmarks::unsynced(bookmarks::flatten(tree), remote_urls)
    }

    /// [`Self::preview_diff`] persisted as the new pending queue. The previous
    /// queue is replaced, not merged.
    pub fn compute_diff(
        &self,
        tree: &[BookmarkTreeNode],
        remote_urls: &HashSet<String>,
    ) -> Result<Vec<BookmarkRecord>, AppError> {
        let pending = self.preview_diff(tree, remote_urls);
        log::info!("{} bookmarks waiting for sync", pending.len());

        self.store.set_pending(&pending)?;
        Ok(pending)
    }

    /// Returns the outcome to report when the status guard forbids a drain.
    fn guard(&self) -> Result<Option<DrainOutcome>, AppError> {
        match self.store.status()? {
            SyncStatus::Idle => Ok(None),
            SyncStatus::Running { session, .. } if session == self.session => {
                log::info!("sync already in progress");
                Ok(Some(DrainOutcome::AlreadyRunning))
            }
            SyncStatus::Running {
                session,
                started_at,
            } => {
                log::warn!(
                    "sync status held by session {session} since {started_at}, reset it before syncing"
                );
                Ok(Some(DrainOutcome::NeedsReset {
                    session,
                    started_at,
                }))
            }
        }
    }

    /// Fetch the remote url set, recompute the queue and drain it.
    pub fn full_sync(&self, tree: &[BookmarkTreeNode]) -> Result<DrainOutcome, AppError> {
        if let Some(outcome) = self.guard()? {
            return Ok(outcome);
        }

        let user = self.store.require_user()?;
        let remote_urls = self.remote.active_urls(&user.id)?;
        self.compute_diff(tree, &remote_urls)?;

        self.drain_queue()
    }

    pub fn drain_queue(&self) -> Result<DrainOutcome, AppError> {
        if let Some(outcome) = self.guard()? {
            return Ok(outcome);
        }

        let queue = self.store.pending()?;
        if queue.is_empty() {
            self.store.set_status(&SyncStatus::Idle)?;
            return Ok(DrainOutcome::Empty);
        }

        let user = self.store.require_user()?;

        self.store.set_status(&SyncStatus::Running {
            session: self.session.clone(),
            started_at: Utc::now(),
        })?;
        log::info!("draining {} pending bookmarks", queue.len());

        let mut committed = vec![];
        let mut failure = None;

        for (idx, record) in queue.iter().enumerate() {
            match self.sync_record(&user, record) {
                Ok(entry) => {
                    log::info!("synced {} as {}", record.url, entry.id);
                    committed.push(record.clone());

                    if idx + 1 < queue.len() && !self.inter_record_delay.is_zero() {
                        sleep(self.inter_record_delay);
                    }
                }
                Err(err) => {
                    log::error!("failed to sync {}: {err}", record.url);
                    failure = Some((record.clone(), err));
                    break;
                }
            }
        }

        let finished = self.finish(&committed);

        match failure {
            Some((failed_at, err)) => {
                let remaining = finished?;
                Ok(DrainOutcome::Aborted {
                    committed,
                    failed_at,
                    reason: err.to_string(),
                    remaining,
                })
            }
            None => {
                finished?;
                Ok(DrainOutcome::Completed { committed })
            }
        }
    }

    /// Drop committed records from the queue and flip the status back to idle.
    /// Records appended to the queue while draining survive.
    fn finish(&self, committed: &[BookmarkRecord]) -> Result<usize, AppError> {
        let persisted = self.store.pending().and_then(|pending| {
            let remaining: Vec<BookmarkRecord> = pending
                .into_iter()
                .filter(|record| !committed.contains(record))
                .collect();
            self.store.set_pending(&remaining)?;
            Ok(remaining.len())
        });

        // idle even if the queue could not be written, or the flag would strand
        self.store.set_status(&SyncStatus::Idle)?;

        persisted
    }

    fn sync_record(
        &self,
        user: &UserIdentity,
        record: &BookmarkRecord,
    ) -> Result<RemoteBookmarkEntry, AppError> {
        let (summary, key_info, embedding) = match self.remote.find_by_url(&record.url)? {
            Some(existing) if !existing.embedding.is_empty() => {
                log::debug!("reusing enrichment of {}", record.url);
                (existing.summary, existing.key_info, existing.embedding)
            }
            _ => {
                let summarized = self.enrichment.summarize(&record.url)?;
                if summarized.is_summarized == Some(false) {
                    log::warn!("{} has no summarizable content", record.url);
                }

                let embedding = self.enrichment.embed(&embedding_input(record, &summarized.summary))?;
                (summarized.summary, summarized.key_info, embedding)
            }
        };

        let entry = self.remote.upsert(NewRemoteEntry {
            user_id: user.id.clone(),
            url: record.url.clone(),
            title: record.title.clone(),
            summary,
            key_info: key_info.clone(),
            embedding,
            browser_bookmark_id: record.id.clone(),
            is_delete: false,
            updated_at: Utc::now(),
        })?;

        associate_keywords(self.remote.as_ref(), &entry, &user.id, &key_info)?;

        Ok(entry)
    }

    /// Queue a freshly created bookmark and drain. The record is queued even
    /// when the status guard refuses the drain, so a later drain picks it up.
    pub fn enqueue(&self, record: BookmarkRecord) -> Result<DrainOutcome, AppError> {
        let mut pending = self.store.pending()?;
        if pending.iter().any(|r| r.url == record.url) {
            log::debug!("{} already queued", record.url);
        } else {
            pending.push(record);
            self.store.set_pending(&pending)?;
        }

        self.drain_queue()
    }

    /// Propagate a local removal: forget it if still queued and soft-delete
    /// the remote entry.
    ///
    /// Remote rows are unique per url, so when `survivor` still carries the
    /// url locally the row is handed over to it and nothing is flagged.
    pub fn remove(
        &self,
        browser_bookmark_id: &str,
        survivor: Option<BookmarkRecord>,
    ) -> Result<usize, AppError> {
        let pending = self.store.pending()?;
        let before = pending.len();
        let pending: Vec<BookmarkRecord> = pending
            .into_iter()
            .filter(|r| r.id != browser_bookmark_id)
            .collect();
        if pending.len() != before {
            log::info!("dropped unsynced bookmark {browser_bookmark_id} from the queue");
            self.store.set_pending(&pending)?;
        }

        let user = self.store.require_user()?;

        if let Some(survivor) = survivor.filter(|r| r.id != browser_bookmark_id) {
            log::info!(
                "{} is still bookmarked as {}, keeping its remote entry",
                survivor.url,
                survivor.id
            );
            self.enqueue(survivor)?;
            return Ok(0);
        }

        let flagged = self.remote.soft_delete(browser_bookmark_id, &user.id)?;
        log::info!("flagged {flagged} remote entries of bookmark {browser_bookmark_id} as deleted");

        Ok(flagged)
    }

    /// Explicit recovery for a stranded `running` flag. Returns the previous status.
    pub fn reset_status(&self) -> Result<SyncStatus, AppError> {
        self.store.reset_status()
    }
}

fn associate_keywords(
    remote: &dyn RemoteIndex,
    entry: &RemoteBookmarkEntry,
    user_id: &str,
    key_info: &KeyInfo,
) -> Result<(), AppError> {
    if key_info.keywords.is_empty() {
        return Ok(());
    }
    remote.associate_tags(&entry.id, user_id, &key_info.keywords)
}

/// Text to embed: the summary, or title and url when the page had none.
fn embedding_input(record: &BookmarkRecord, summary: &str) -> String {
    if summary.trim().is_empty() {
        format!("{} {}", record.title, record.url).trim().to_string()
    } else {
        summary.to_string()
    }
}
