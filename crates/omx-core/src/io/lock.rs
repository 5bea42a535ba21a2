//! Directory-based advisory locking with stale-owner reclaim.
//!
//! A lock is a directory: `mkdir` is the atomic acquire primitive (it fails
//! with `AlreadyExists` if another process holds it). The acquirer writes an
//! `owner` file recording `{pid, ts}` so a later contender can judge
//! staleness without ever having held the lock itself.

use crate::error::{StateError, StateResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize, Deserialize)]
struct Owner {
    pid: u32,
    ts: u64,
}

/// RAII guard: the lock directory is removed when this value is dropped, on
/// every exit path (success, error, or panic unwind).
pub struct DirLock {
    path: PathBuf,
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    // Signal 0 performs no-op permission/existence checks only.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: u32) -> bool {
    // No portable liveness check; fall back to mtime-only staleness.
    true
}

fn try_create(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir(path)
}

fn write_owner(path: &Path) {
    let owner = Owner {
        pid: std::process::id(),
        ts: now_unix(),
    };
    if let Ok(bytes) = serde_json::to_vec(&owner) {
        let _ = std::fs::write(path.join("owner.json"), bytes);
    }
}

fn read_owner(path: &Path) -> Option<Owner> {
    let bytes = std::fs::read(path.join("owner.json")).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    let mtime_stale = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|mtime| {
            SystemTime::now()
                .duration_since(mtime)
                .map(|age| age > stale_after)
                .unwrap_or(false)
        })
        .unwrap_or(false);
    if mtime_stale {
        return true;
    }
    match read_owner(path) {
        Some(owner) => !pid_is_alive(owner.pid),
        // No owner file at all (e.g. interrupted acquire) is itself a sign
        // of a stale, half-created lock directory.
        None => true,
    }
}

/// Attempt to acquire the directory lock at `path`, retrying with jitter
/// until `timeout` elapses. A lock directory older than `stale_after` (by
/// mtime) or whose recorded pid is no longer alive is reclaimed by removing
/// and recreating it.
pub fn acquire_lock(path: &Path, timeout: Duration, stale_after: Duration) -> StateResult<DirLock> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| StateError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let deadline = Instant::now() + timeout;
    let mut attempt: u32 = 0;
    loop {
        match try_create(path) {
            Ok(()) => {
                write_owner(path);
                return Ok(DirLock {
                    path: path.to_path_buf(),
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                if is_stale(path, stale_after) {
                    let _ = std::fs::remove_dir_all(path);
                    continue;
                }
                if Instant::now() >= deadline {
                    return Err(StateError::LockTimeout {
                        path: path.to_path_buf(),
                        waited_ms: timeout.as_millis() as u64,
                    });
                }
                std::thread::sleep(backoff_with_jitter(attempt));
                attempt = attempt.saturating_add(1);
            }
            Err(source) => {
                return Err(StateError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let base_ms = 20u64.saturating_mul(1u64 << attempt.min(6));
    let base_ms = base_ms.min(500);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    // +/-25% jitter derived from the low bits of the current timestamp, no
    // external randomness source needed.
    let jitter_pct = (nanos % 50) as i64 - 25;
    let jittered = (base_ms as i64) + (base_ms as i64 * jitter_pct / 100);
    Duration::from_millis(jittered.max(1) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("foo.lock");
        {
            let _lock = acquire_lock(&lock_path, Duration::from_secs(1), Duration::from_secs(30))
                .unwrap();
            assert!(lock_path.exists());
        }
        assert!(!lock_path.exists());
    }

    #[test]
    fn second_acquire_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("foo.lock");
        let _lock = acquire_lock(&lock_path, Duration::from_secs(1), Duration::from_secs(30))
            .unwrap();
        let result = acquire_lock(&lock_path, Duration::from_millis(150), Duration::from_secs(30));
        assert!(matches!(result, Err(StateError::LockTimeout { .. })));
    }

    #[test]
    fn stale_lock_with_dead_pid_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("foo.lock");
        std::fs::create_dir(&lock_path).unwrap();
        let owner = Owner {
            pid: 999_999_999,
            ts: now_unix(),
        };
        std::fs::write(
            lock_path.join("owner.json"),
            serde_json::to_vec(&owner).unwrap(),
        )
        .unwrap();
        let lock = acquire_lock(&lock_path, Duration::from_secs(2), Duration::from_secs(300));
        assert!(lock.is_ok());
    }

    #[test]
    fn stale_lock_by_mtime_is_reclaimed_even_with_live_pid() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("foo.lock");
        std::fs::create_dir(&lock_path).unwrap();
        let owner = Owner {
            pid: std::process::id(),
            ts: now_unix(),
        };
        std::fs::write(
            lock_path.join("owner.json"),
            serde_json::to_vec(&owner).unwrap(),
        )
        .unwrap();
        let lock = acquire_lock(
            &lock_path,
            Duration::from_secs(2),
            Duration::from_millis(0),
        );
        assert!(lock.is_ok());
    }

    #[test]
    fn sequential_acquire_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("foo.lock");
        for _ in 0..3 {
            let _lock =
                acquire_lock(&lock_path, Duration::from_secs(1), Duration::from_secs(30)).unwrap();
        }
    }
}
