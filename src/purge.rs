//! Delayed, cancellable file deletion.
//!
//! Every artifact the service produces has to disappear eventually: after a
//! grace period once it has been delivered, or after a time-to-live if
//! nobody ever fetches it. [`PurgeScheduler`] owns those timers. Each one is
//! a `tokio::time::sleep` followed by best-effort `remove_file` calls, keyed
//! so it can be replaced or cancelled.
//!
//! Deletion failures are logged and never retried; a file that is already
//! gone is not a failure at all.
//!
//! Timers run on `tokio::time`, so tests drive them with a paused clock
//! (`#[tokio::test(start_paused = true)]` and `tokio::time::advance`).

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Pending {
    generation: u64,
    paths: Vec<PathBuf>,
    handle: JoinHandle<()>,
}

/// Keyed set of pending deletions.
#[derive(Clone, Default)]
pub struct PurgeScheduler {
    pending: Arc<Mutex<HashMap<String, Pending>>>,
    generation: Arc<AtomicU64>,
}

impl std::fmt::Debug for PurgeScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PurgeScheduler")
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl PurgeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Pending>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Delete `paths` after `delay`, replacing any timer already under `key`.
    ///
    /// Outside a tokio runtime the files are removed synchronously instead.
    pub fn schedule(&self, key: impl Into<String>, paths: Vec<PathBuf>, delay: Duration) {
        self.schedule_then(key, paths, delay, || {});
    }

    /// Like [`PurgeScheduler::schedule`], running `on_fire` once the files
    /// are gone. `on_fire` never runs for a cancelled or replaced timer.
    pub fn schedule_then<F>(
        &self,
        key: impl Into<String>,
        paths: Vec<PathBuf>,
        delay: Duration,
        on_fire: F,
    ) where
        F: FnOnce() + Send + 'static,
    {
        let key = key.into();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(key = %key, "No runtime, purging synchronously");
            self.cancel(&key);
            for path in &paths {
                log_removal(path, std::fs::remove_file(path));
            }
            on_fire();
            return;
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);
        let task_key = key.clone();
        let task_paths = paths.clone();
        // Measured from now, not from the task's first poll.
        let deadline = tokio::time::Instant::now() + delay;

        // Held across the spawn so a zero-delay task cannot finish before
        // its own entry is recorded.
        let mut map = self.lock();
        let handle = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            for path in &task_paths {
                log_removal(path, std::fs::remove_file(path));
            }
            {
                let mut map = pending.lock().unwrap_or_else(|e| e.into_inner());
                if map.get(&task_key).map(|p| p.generation) == Some(generation) {
                    map.remove(&task_key);
                }
            }
            on_fire();
        });

        debug!(key = %key, delay_ms = delay.as_millis() as u64, "Scheduled purge");
        if let Some(previous) = map.insert(
            key,
            Pending {
                generation,
                paths,
                handle,
            },
        ) {
            previous.handle.abort();
        }
    }

    /// Cancel the timer under `key`. Returns false if there was none.
    pub fn cancel(&self, key: &str) -> bool {
        match self.lock().remove(key) {
            Some(p) => {
                p.handle.abort();
                true
            }
            None => false,
        }
    }

    /// True if a timer is pending under `key`.
    pub fn is_scheduled(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Cancel every timer and delete its files now.
    pub fn flush(&self) -> usize {
        let drained: Vec<(String, Pending)> = self.lock().drain().collect();
        let count = drained.len();
        for (_, pending) in drained {
            pending.handle.abort();
            for path in &pending.paths {
                log_removal(path, std::fs::remove_file(path));
            }
        }
        if count > 0 {
            info!("Flushed {count} pending purge(s)");
        }
        count
    }
}

/// Best-effort deletion of `path` right away.
pub async fn purge_now(path: &std::path::Path) {
    log_removal(path, tokio::fs::remove_file(path).await);
}

fn log_removal(path: &std::path::Path, result: io::Result<()>) {
    match result {
        Ok(()) => debug!("Deleted {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Already gone: {}", path.display())
        }
        Err(e) => warn!("Failed to delete {}: {e}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let p = dir.path().join(name);
        std::fs::write(&p, b"x").unwrap();
        p
    }

    /// Let spawned timer tasks observe the advanced clock.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deletes_after_delay() {
        let dir = tempfile::tempdir().unwrap();
        let p = file(&dir, "a.xlsx");
        let s = PurgeScheduler::new();
        s.schedule("a", vec![p.clone()], Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(4)).await;
        settle().await;
        assert!(p.exists());

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(!p.exists());
        assert!(!s.is_scheduled("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = file(&dir, "b.xlsx");
        let s = PurgeScheduler::new();
        s.schedule("b", vec![p.clone()], Duration::from_secs(1));
        assert!(s.cancel("b"));
        assert!(!s.cancel("b"));

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert!(p.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_timer() {
        let dir = tempfile::tempdir().unwrap();
        let p = file(&dir, "c.xlsx");
        let s = PurgeScheduler::new();
        s.schedule("c", vec![p.clone()], Duration::from_secs(60));
        s.schedule("c", vec![p.clone()], Duration::from_secs(1));
        assert_eq!(s.pending_count(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(!p.exists());
        assert_eq!(s.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let s = PurgeScheduler::new();
        s.schedule("gone", vec![dir.path().join("never.xlsx")], Duration::ZERO);
        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(s.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_deletes_everything_now() {
        let dir = tempfile::tempdir().unwrap();
        let a = file(&dir, "a");
        let b = file(&dir, "b");
        let s = PurgeScheduler::new();
        s.schedule("a", vec![a.clone()], Duration::from_secs(900));
        s.schedule("b", vec![b.clone()], Duration::from_secs(900));
        assert_eq!(s.flush(), 2);
        assert!(!a.exists() && !b.exists());
        assert_eq!(s.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_counts_from_scheduling() {
        let dir = tempfile::tempdir().unwrap();
        let p = file(&dir, "d.xlsx");
        let s = PurgeScheduler::new();
        s.schedule("d", vec![p.clone()], Duration::from_secs(5));

        // The timer task has not been polled yet when the clock moves.
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert!(!p.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_fire_runs_after_deletion_only() {
        use std::sync::atomic::AtomicBool;

        let dir = tempfile::tempdir().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let cancelled = Arc::new(AtomicBool::new(false));
        let s = PurgeScheduler::new();

        let p = file(&dir, "e.xlsx");
        let (flag, path) = (Arc::clone(&fired), p.clone());
        s.schedule_then("e", vec![p.clone()], Duration::from_secs(1), move || {
            assert!(!path.exists());
            flag.store(true, Ordering::SeqCst);
        });
        let flag = Arc::clone(&cancelled);
        s.schedule_then("f", vec![file(&dir, "f.xlsx")], Duration::from_secs(1), move || {
            flag.store(true, Ordering::SeqCst)
        });
        assert!(s.cancel("f"));

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(fired.load(Ordering::SeqCst));
        assert!(!cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_without_runtime_deletes_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let p = file(&dir, "sync.docx");
        PurgeScheduler::new().schedule("s", vec![p.clone()], Duration::from_secs(5));
        assert!(!p.exists());
    }
}
