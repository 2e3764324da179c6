//! Appending run output to files shared by many runs.
//!
//! Every write to a path happens inside one critical section made of an
//! in-process mutex (one per path) and a `<path>.lock` file created
//! exclusively on disk. The header check and the header write sit inside the
//! same section, so a header is produced at most once per path per dispatch.
//! A lock file orphaned by a hard kill is not reclaimed; remove it by hand.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct LockPolicy {
    pub poll: Duration,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    /// Wait after which a still-present lock file is reported as possibly stale.
    pub stale_warning: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(20),
            timeout: None,
            stale_warning: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default)]
struct PathState {
    header_written: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub header_written: bool,
}

/// Per-dispatch writer. Header bookkeeping lives only as long as the writer.
#[derive(Debug, Default)]
pub struct OutputWriter {
    paths: Mutex<HashMap<PathBuf, Arc<Mutex<PathState>>>>,
    policy: LockPolicy,
}

impl OutputWriter {
    pub fn new(policy: LockPolicy) -> Self {
        Self {
            paths: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// Appends `payload` and a newline to `path`.
    ///
    /// If the file does not exist yet, `header` is called inside the critical
    /// section and its result, when present, is written first.
    pub fn append<H>(&self, path: &Path, header: H, payload: &str) -> Result<WriteOutcome>
    where
        H: FnOnce() -> Result<Option<String>>,
    {
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        let state = self.path_state(path);
        let mut state = lock_recover(&state);
        let _file_lock = SoftLock::acquire(&lock_path(path), &self.policy)?;

        let mut header_written = false;
        let mut text = String::new();
        if !path.exists() && !state.header_written {
            if let Some(h) = header()? {
                text.push_str(&h);
                text.push('\n');
                header_written = true;
                state.header_written = true;
            }
        }
        text.push_str(payload);
        text.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.write_all(text.as_bytes())
            .with_context(|| format!("failed to append to {}", path.display()))?;
        file.flush()?;
        Ok(WriteOutcome { header_written })
    }

    fn path_state(&self, path: &Path) -> Arc<Mutex<PathState>> {
        let mut paths = lock_recover(&self.paths);
        paths.entry(path.to_path_buf()).or_default().clone()
    }
}

fn lock_recover<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))
}

pub fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// Exclusive lock file; removed when dropped.
#[derive(Debug)]
struct SoftLock {
    path: PathBuf,
}

impl Drop for SoftLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

impl SoftLock {
    fn acquire(lock_path: &Path, policy: &LockPolicy) -> Result<SoftLock> {
        let started = Instant::now();
        let mut warned = false;
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(lock_path)
            {
                Ok(mut file) => {
                    let payload = format!(
                        "{{\"pid\":{},\"acquired_at\":\"{}\"}}\n",
                        std::process::id(),
                        Utc::now().to_rfc3339()
                    );
                    let _ = file.write_all(payload.as_bytes());
                    return Ok(SoftLock {
                        path: lock_path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let waited = started.elapsed();
                    if let Some(limit) = policy.timeout {
                        if waited >= limit {
                            return Err(anyhow!(
                                "lock_timeout: {} still held after {:?}",
                                lock_path.display(),
                                waited
                            ));
                        }
                    }
                    if !warned && waited >= policy.stale_warning {
                        tracing::warn!(
                            lock = %lock_path.display(),
                            "still waiting for lock; delete it if no other run is writing"
                        );
                        warned = true;
                    }
                    thread::sleep(policy.poll);
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("failed to create {}", lock_path.display())))
                }
            }
        }
    }
}
