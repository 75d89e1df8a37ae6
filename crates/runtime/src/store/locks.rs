//! Advisory file locks with stale-lock reaping
//!
//! One exclusive lock per resource, implemented as a `<name>.lock` file
//! created with `create_new` semantics and carrying the owner's pid.
//! Acquisition polls with backoff up to a deadline and fails retryable.
//! Guards release on drop, so every exit path — including timeouts and
//! panics — frees the lock.
//!
//! Lock ordering: metadata > per-agent > knowledge. Operations that need
//! several locks must acquire in that order.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LockConfig;
use crate::types::{time, RetryableError, RuntimeError, StorageError};

use super::sanitize_component;

/// Contents of a lock file
#[derive(Debug, Serialize, Deserialize)]
struct LockOwner {
    pid: u32,
    #[serde(with = "time::iso")]
    acquired_at: DateTime<Utc>,
}

/// RAII guard over one acquired lock
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    resource: String,
}

impl LockGuard {
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    resource = %self.resource,
                    error = %e,
                    "failed to release lock file"
                );
            }
        }
    }
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // kill(pid, 0) probes for existence; EPERM still means the pid exists.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // Without a cheap liveness probe, never treat a lock as orphaned.
    true
}

/// Per-resource exclusive locks over the locks directory
#[derive(Debug, Clone)]
pub struct LockManager {
    locks_dir: PathBuf,
    cfg: LockConfig,
}

impl LockManager {
    pub fn new(locks_dir: impl Into<PathBuf>, cfg: LockConfig) -> Self {
        Self {
            locks_dir: locks_dir.into(),
            cfg,
        }
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.locks_dir
            .join(format!("{}.lock", sanitize_component(name)))
    }

    /// The shared metadata lock. Acquire before any per-agent lock.
    pub fn metadata(&self) -> Result<LockGuard, RuntimeError> {
        self.acquire("metadata")
    }

    /// Exclusive lock for one agent's state file.
    pub fn agent(&self, agent_id: &str) -> Result<LockGuard, RuntimeError> {
        self.acquire(&format!("agent_{agent_id}"))
    }

    /// Writer lock for the knowledge graph. Acquire last.
    pub fn knowledge(&self) -> Result<LockGuard, RuntimeError> {
        self.acquire("knowledge_graph")
    }

    /// Acquire a named lock, polling until the configured deadline.
    pub fn acquire(&self, name: &str) -> Result<LockGuard, RuntimeError> {
        let path = self.lock_path(name);
        let started = Instant::now();

        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(file) => {
                    let owner = LockOwner {
                        pid: std::process::id(),
                        acquired_at: time::now(),
                    };
                    serde_json::to_writer(&file, &owner).map_err(|e| {
                        StorageError::Io {
                            path: path.display().to_string(),
                            message: e.to_string(),
                        }
                    })?;
                    return Ok(LockGuard {
                        path,
                        resource: name.to_string(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.reap_if_stale(&path) {
                        continue;
                    }
                }
                Err(e) => {
                    return Err(StorageError::Io {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    }
                    .into())
                }
            }

            if started.elapsed() >= self.cfg.acquire_deadline {
                return Err(RetryableError::LockTimeout {
                    resource: name.to_string(),
                }
                .into());
            }
            std::thread::sleep(self.cfg.poll_interval);
        }
    }

    /// A lock is stale when its owner pid is gone and the file is older
    /// than the configured stale age. Unparseable lock files older than
    /// the stale age are reaped too.
    fn is_stale(&self, path: &Path) -> bool {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return false,
        };
        let age_exceeded = |acquired: DateTime<Utc>| {
            let age = time::now() - acquired;
            age.num_milliseconds() as u128 > self.cfg.stale_age.as_millis()
        };
        match serde_json::from_str::<LockOwner>(&raw) {
            Ok(owner) => !pid_alive(owner.pid) && age_exceeded(owner.acquired_at),
            Err(_) => std::fs::metadata(path)
                .and_then(|m| m.modified())
                .map(|m| m.elapsed().map(|e| e > self.cfg.stale_age).unwrap_or(false))
                .unwrap_or(false),
        }
    }

    fn reap_if_stale(&self, path: &Path) -> bool {
        if !self.is_stale(path) {
            return false;
        }
        match std::fs::remove_file(path) {
            Ok(()) => {
                tracing::warn!(path = %path.display(), "reaped stale lock");
                true
            }
            // Lost the race to another reaper; treat as progress either way.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(_) => false,
        }
    }

    /// Sweep the locks directory, removing every stale lock. Returns the
    /// number reaped. Run at startup and via `cleanup_stale_locks`.
    pub fn cleanup_stale(&self) -> Result<usize, StorageError> {
        let entries = std::fs::read_dir(&self.locks_dir).map_err(|e| StorageError::Io {
            path: self.locks_dir.display().to_string(),
            message: e.to_string(),
        })?;
        let mut reaped = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "lock") && self.reap_if_stale(&path) {
                reaped += 1;
            }
        }
        Ok(reaped)
    }
}
