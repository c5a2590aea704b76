//! Repository-level exclusive lease, realized as a `.walgit/LOCK` file
//! holding the PID and acquisition time of its owner. A lease older than
//! `stale_after_secs` is assumed abandoned (its process crashed or was
//! killed without releasing) and is force-broken with a warning rather
//! than wedging the repository shut forever.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Result, WalgitError};
use crate::util::now_unix;

pub struct RepoLock {
    path: PathBuf,
    held: bool,
}

impl RepoLock {
    /// Acquire the lease at `path`, breaking it first if it is older than
    /// `stale_after_secs`.
    pub fn acquire(path: &Path, stale_after_secs: i64) -> Result<Self> {
        if let Some(existing) = read_lease(path)? {
            let age = now_unix() - existing.acquired_at;
            if age < stale_after_secs {
                return Err(WalgitError::Conflict(format!(
                    "repository is locked by pid {} ({age}s ago)",
                    existing.pid
                )));
            }

            warn!(pid = existing.pid, age_secs = age, "breaking stale repository lease");
            std::fs::remove_file(path)?;
        }

        let body = format!("{}\n{}\n", std::process::id(), now_unix());
        write_new_exclusive(path, &body)?;

        Ok(Self { path: path.to_path_buf(), held: true })
    }

    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.held {
            let _ = std::fs::remove_file(&self.path);
            self.held = false;
        }
        Ok(())
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        let _ = self.release_inner();
    }
}

struct Lease {
    pid: u32,
    acquired_at: i64,
}

fn read_lease(path: &Path) -> Result<Option<Lease>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut lines = content.lines();
    let pid = lines.next().and_then(|l| l.parse().ok()).unwrap_or(0);
    let acquired_at = lines.next().and_then(|l| l.parse().ok()).unwrap_or(0);
    Ok(Some(Lease { pid, acquired_at }))
}

/// Atomic create-if-absent: `O_EXCL` semantics so two racing acquirers
/// can't both believe they hold the lease.
fn write_new_exclusive(path: &Path, body: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(body.as_bytes())?;
    Ok(())
}
