//! Concurrency groups shared between processes through a lock directory.
//!
//! Each group gets a directory named after the digest of the group name:
//!
//! - `lock`: advisory lock held by the active run for its whole lifetime
//! - `active`: id of the run holding the lock
//! - `pending`: id of the newest run waiting for the lock
//! - `cancel`: id of an active run a newer run asked to cancel
//!
//! Waiting runs poll these files, so the lock is released even if the
//! holding process dies.

use crate::concurrency::CancelToken;
use crate::error::Result;
use crate::ledger::RunId;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const LOCK: &str = "lock";
const ACTIVE: &str = "active";
const PENDING: &str = "pending";
const CANCEL: &str = "cancel";

pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Directory holding the files of `group` under `root`.
pub(crate) fn group_dir(root: &Path, group: &str) -> PathBuf {
    let digest = hex::encode(Sha256::digest(group.as_bytes()));
    root.join(&digest[..16])
}

async fn read_id(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => {
            let id = text.trim();
            Ok((!id.is_empty()).then(|| id.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Replace `dir/name` with `id` in one rename.
async fn write_id(dir: &Path, name: &str, id: &str) -> Result<()> {
    let tmp = dir.join(format!(".{}.{}", name, uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, id).await?;
    tokio::fs::rename(&tmp, dir.join(name)).await?;
    Ok(())
}

/// Lock on a group held by the active run of this process.
#[derive(Debug)]
pub(crate) struct HeldGroup {
    dir: PathBuf,
    run_id: RunId,
    _lock: File,
}

impl HeldGroup {
    /// Wait for the group lock as `run_id`.
    ///
    /// Returns `None` when a newer run replaced this one as pending, or when
    /// `token` fires while waiting.
    pub(crate) async fn acquire(
        root: &Path,
        group: &str,
        run_id: &RunId,
        cancel_in_progress: bool,
        token: &CancelToken,
    ) -> Result<Option<Self>> {
        let dir = group_dir(root, group);
        tokio::fs::create_dir_all(&dir).await?;
        write_id(&dir, PENDING, run_id.as_str()).await?;

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK))?;
        let mut cancel_sent: Option<String> = None;

        loop {
            if token.is_cancelled() {
                return Ok(None);
            }
            if read_id(&dir.join(PENDING)).await?.as_deref() != Some(run_id.as_str()) {
                info!(
                    group = %group,
                    run_id = %run_id,
                    "Superseded by a newer run in another process"
                );
                return Ok(None);
            }
            if cancel_in_progress {
                if let Some(active) = read_id(&dir.join(ACTIVE)).await? {
                    let already_sent = cancel_sent.as_deref() == Some(active.as_str());
                    if active != run_id.as_str() && !already_sent {
                        info!(
                            group = %group,
                            run_id = %active,
                            "Requesting cancellation of in-progress run"
                        );
                        write_id(&dir, CANCEL, &active).await?;
                        cancel_sent = Some(active);
                    }
                }
            }

            match lock.try_lock() {
                Ok(()) => break,
                Err(TryLockError::WouldBlock) => {}
                Err(TryLockError::Error(e)) => return Err(e.into()),
            }

            tokio::select! {
                _ = token.cancelled() => return Ok(None),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }

        write_id(&dir, ACTIVE, run_id.as_str()).await?;
        debug!(group = %group, run_id = %run_id, dir = %dir.display(), "Holding group lock");
        Ok(Some(Self {
            dir,
            run_id: run_id.clone(),
            _lock: lock,
        }))
    }

    /// Resolves once another process asks this run to stop.
    pub(crate) async fn cancel_requested(dir: PathBuf, run_id: RunId) {
        loop {
            if let Ok(Some(id)) = read_id(&dir.join(CANCEL)).await {
                if id == run_id.as_str() {
                    return;
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for HeldGroup {
    fn drop(&mut self) {
        let active = self.dir.join(ACTIVE);
        if std::fs::read_to_string(&active)
            .map(|id| id.trim() == self.run_id.as_str())
            .unwrap_or(false)
        {
            let _ = std::fs::remove_file(&active);
        }
        // The lock itself is released when the file closes.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::cancel_pair;

    #[test]
    fn test_group_dir_is_stable_per_group() {
        let root = Path::new("/locks");
        assert_eq!(
            group_dir(root, "CI-refs/heads/main"),
            group_dir(root, "CI-refs/heads/main")
        );
        assert_ne!(
            group_dir(root, "CI-refs/heads/main"),
            group_dir(root, "CI-refs/heads/dev")
        );
        assert_eq!(group_dir(root, "g").parent(), Some(root));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_until_dropped() {
        let root = tempfile::tempdir().unwrap();
        let token = CancelToken::never();
        let first = RunId::new();
        let held = HeldGroup::acquire(root.path(), "g", &first, false, &token)
            .await
            .unwrap()
            .expect("first run takes the lock");
        assert_eq!(
            read_id(&held.dir().join(ACTIVE)).await.unwrap().as_deref(),
            Some(first.as_str())
        );

        let second = RunId::new();
        let waiter = {
            let root = root.path().to_path_buf();
            let second = second.clone();
            tokio::spawn(async move {
                HeldGroup::acquire(&root, "g", &second, false, &CancelToken::never()).await
            })
        };
        tokio::time::sleep(POLL_INTERVAL * 4).await;
        assert!(!waiter.is_finished());

        drop(held);
        let held = waiter.await.unwrap().unwrap().expect("second run takes the lock");
        assert_eq!(
            read_id(&held.dir().join(ACTIVE)).await.unwrap().as_deref(),
            Some(second.as_str())
        );
    }

    #[tokio::test]
    async fn test_newer_waiter_supersedes_pending() {
        let root = tempfile::tempdir().unwrap();
        let held = HeldGroup::acquire(root.path(), "g", &RunId::new(), false, &CancelToken::never())
            .await
            .unwrap()
            .unwrap();

        let spawn = || {
            let root = root.path().to_path_buf();
            tokio::spawn(async move {
                HeldGroup::acquire(&root, "g", &RunId::new(), false, &CancelToken::never()).await
            })
        };
        let pending = spawn();
        tokio::time::sleep(POLL_INTERVAL * 4).await;
        let newest = spawn();

        assert!(pending.await.unwrap().unwrap().is_none());
        drop(held);
        assert!(newest.await.unwrap().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cancel_in_progress_writes_request() {
        let root = tempfile::tempdir().unwrap();
        let first = RunId::new();
        let held = HeldGroup::acquire(root.path(), "g", &first, true, &CancelToken::never())
            .await
            .unwrap()
            .unwrap();

        let (handle, token) = cancel_pair();
        let waiter = {
            let root = root.path().to_path_buf();
            tokio::spawn(async move {
                HeldGroup::acquire(&root, "g", &RunId::new(), true, &token).await
            })
        };

        tokio::time::timeout(
            Duration::from_secs(5),
            HeldGroup::cancel_requested(held.dir().to_path_buf(), first),
        )
        .await
        .expect("active run should be asked to cancel");

        // A waiter whose own token fires gives up.
        handle.cancel();
        assert!(waiter.await.unwrap().unwrap().is_none());
    }
}
