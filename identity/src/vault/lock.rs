//! Writer lock and atomic file writes for a vault root.
//!
//! Two `Vault`s writing the same `vault.enc` will eventually interleave a
//! read-modify-write and lose a key. The lock file makes the second open
//! fail fast instead. It is created with `create_new`, so acquisition is a
//! single atomic filesystem operation, and it is removed when the holder
//! drops.
//!
//! A process that dies without unwinding leaves the lock behind. The lock
//! records its holder's pid; on Linux a lock whose pid is no longer running
//! is reclaimed. Elsewhere, removing a stale `vault.lock` by hand is safe
//! once no process has the vault open.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, VaultError};

/// Exclusive writer lock on a vault root. Released on drop.
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    /// Take the lock at `path`, or fail with [`VaultError::VaultLocked`].
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        match Self::try_create(&path) {
            Err(VaultError::VaultLocked(_)) if is_stale(&path) => {
                warn!(path = %path.display(), "reclaiming vault writer lock from exited process");
                fs::remove_file(&path)?;
                Self::try_create(&path)
            }
            other => other,
        }
    }

    fn try_create(path: &Path) -> Result<Self> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                file.sync_all()?;
                debug!(path = %path.display(), "vault writer lock acquired");
                Ok(Self {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn!(path = %path.display(), "vault writer lock already held");
                Err(VaultError::VaultLocked(path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release vault writer lock");
        }
    }
}

/// Holder pid recorded in the lock file, if it parses.
fn holder_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// A lock is stale only when its holder is known to have exited. An
/// unreadable pid counts as held.
fn is_stale(path: &Path) -> bool {
    holder_pid(path).is_some_and(|pid| !process_alive(pid))
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// Replace `path` with `bytes` so that a crash leaves either the old file
/// or the new one, never a torn write: temp file, fsync, rename, fsync dir.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(bytes)?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        sync_directory(parent)?;
    }
    Ok(())
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> io::Result<()> {
    File::open(path)?.sync_all()
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.lock");
        let _held = WriterLock::acquire(&path).unwrap();
        assert!(matches!(
            WriterLock::acquire(&path),
            Err(VaultError::VaultLocked(p)) if p == path
        ));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.lock");
        {
            let _held = WriterLock::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
        assert!(WriterLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_own_pid_is_never_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.lock");
        let _held = WriterLock::acquire(&path).unwrap();
        assert_eq!(holder_pid(&path), Some(std::process::id()));
        assert!(!is_stale(&path));
    }

    #[test]
    fn test_unreadable_pid_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.lock");
        fs::write(&path, "not-a-pid\n").unwrap();
        assert!(matches!(
            WriterLock::acquire(&path),
            Err(VaultError::VaultLocked(_))
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_lock_of_exited_process_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.lock");
        // Above any pid_max the kernel allows.
        fs::write(&path, format!("{}\n", u32::MAX)).unwrap();

        let held = WriterLock::acquire(&path).unwrap();
        assert_eq!(holder_pid(held.path()), Some(std::process::id()));
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!dir.path().join("vault.enc.tmp").exists());
    }
}
