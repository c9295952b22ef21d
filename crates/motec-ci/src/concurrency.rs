//! Concurrency groups and run cancellation.
//!
//! At most one run per group holds the group's permit. A run entering a group
//! always supersedes a run that is still waiting there; with
//! `cancel-in-progress` it also cancels the run holding the permit.
//!
//! With a lock directory the same rules hold across processes sharing it.

use crate::error::Result;
use crate::group_files::HeldGroup;
use crate::ledger::RunId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Receiving side of a run's cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Sending side of a run's cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        cancel_pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the run is cancelled; pends forever if it never is.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[derive(Debug)]
struct Slot {
    run_id: RunId,
    handle: CancelHandle,
}

#[derive(Debug)]
struct GroupState {
    semaphore: Arc<Semaphore>,
    active: Option<Slot>,
    pending: Option<Slot>,
}

impl GroupState {
    fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
            active: None,
            pending: None,
        }
    }
}

type Groups = Arc<Mutex<HashMap<String, GroupState>>>;

fn lock(groups: &Groups) -> MutexGuard<'_, HashMap<String, GroupState>> {
    groups.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cancel `run_id` if it still holds `group`.
fn cancel_active(groups: &Groups, group: &str, run_id: &RunId) {
    if let Some(active) = lock(groups)
        .get(group)
        .and_then(|state| state.active.as_ref())
        .filter(|slot| slot.run_id == *run_id)
    {
        active.handle.cancel();
    }
}

/// Outcome of entering a concurrency group.
#[derive(Debug)]
pub enum Admission {
    /// The run holds the group until the permit is dropped.
    Admitted(GroupPermit),
    /// A newer run entered the group before this one started.
    Superseded,
}

/// Exclusive hold on a concurrency group.
#[derive(Debug)]
pub struct GroupPermit {
    group: String,
    run_id: RunId,
    token: CancelToken,
    groups: Groups,
    files: Option<HeldGroup>,
    watcher: Option<JoinHandle<()>>,
    _permit: OwnedSemaphorePermit,
}

impl GroupPermit {
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn group(&self) -> &str {
        &self.group
    }
}

impl Drop for GroupPermit {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        let mut groups = lock(&self.groups);
        let idle = match groups.get_mut(&self.group) {
            Some(state) => {
                if state.active.as_ref().map(|s| &s.run_id) == Some(&self.run_id) {
                    state.active = None;
                }
                state.active.is_none() && state.pending.is_none()
            }
            None => false,
        };
        if idle {
            groups.remove(&self.group);
        }
        debug!(group = %self.group, run_id = %self.run_id, "Released concurrency group");
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConcurrencyGroups {
    groups: Groups,
    lock_dir: Option<PathBuf>,
}

impl ConcurrencyGroups {
    /// Groups private to this process.
    pub fn new() -> Self {
        Self::default()
    }

    /// Groups shared with every process using `lock_dir`.
    pub fn with_lock_dir(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            groups: Groups::default(),
            lock_dir: Some(lock_dir.into()),
        }
    }

    pub fn lock_dir(&self) -> Option<&Path> {
        self.lock_dir.as_deref()
    }

    /// Enter `group` as `run_id`, waiting for the active run to release it.
    pub async fn admit(
        &self,
        group: &str,
        run_id: &RunId,
        cancel_in_progress: bool,
    ) -> Result<Admission> {
        let Some(mut permit) = self.admit_local(group, run_id, cancel_in_progress).await else {
            return Ok(Admission::Superseded);
        };

        if let Some(root) = &self.lock_dir {
            let Some(files) =
                HeldGroup::acquire(root, group, run_id, cancel_in_progress, &permit.token).await?
            else {
                return Ok(Admission::Superseded);
            };

            let groups = self.groups.clone();
            let dir = files.dir().to_path_buf();
            let group_name = group.to_string();
            let id = run_id.clone();
            permit.watcher = Some(tokio::spawn(async move {
                HeldGroup::cancel_requested(dir, id.clone()).await;
                info!(group = %group_name, run_id = %id, "Cancellation requested by a newer run");
                cancel_active(&groups, &group_name, &id);
            }));
            permit.files = Some(files);
        }

        debug!(group = %group, run_id = %run_id, "Entered concurrency group");
        Ok(Admission::Admitted(permit))
    }

    async fn admit_local(
        &self,
        group: &str,
        run_id: &RunId,
        cancel_in_progress: bool,
    ) -> Option<GroupPermit> {
        let (handle, token) = cancel_pair();
        let semaphore = {
            let mut groups = lock(&self.groups);
            let state = groups
                .entry(group.to_string())
                .or_insert_with(GroupState::new);

            if let Some(pending) = state.pending.take() {
                info!(group = %group, run_id = %pending.run_id, "Superseding pending run");
                pending.handle.cancel();
            }
            if cancel_in_progress {
                if let Some(active) = &state.active {
                    info!(group = %group, run_id = %active.run_id, "Cancelling in-progress run");
                    active.handle.cancel();
                }
            }
            state.pending = Some(Slot {
                run_id: run_id.clone(),
                handle,
            });
            state.semaphore.clone()
        };

        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => return None,
            permit = semaphore.acquire_owned() => permit.ok()?,
        };

        let mut groups = lock(&self.groups);
        let state = groups.get_mut(group)?;
        match state.pending.take() {
            Some(slot) if slot.run_id == *run_id && !token.is_cancelled() => {
                state.active = Some(slot);
            }
            other => {
                state.pending = other;
                return None;
            }
        }
        drop(groups);

        Some(GroupPermit {
            group: group.to_string(),
            run_id: run_id.clone(),
            token,
            groups: self.groups.clone(),
            files: None,
            watcher: None,
            _permit: permit,
        })
    }

    /// Run currently holding `group` in this process.
    pub fn active_run(&self, group: &str) -> Option<RunId> {
        lock(&self.groups)
            .get(group)
            .and_then(|s| s.active.as_ref().map(|slot| slot.run_id.clone()))
    }

    /// Number of groups with an active run in this process.
    pub fn active_count(&self) -> usize {
        lock(&self.groups)
            .values()
            .filter(|s| s.active.is_some())
            .count()
    }
}
