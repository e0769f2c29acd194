//! Per-database lock file.
//!
//! The registry takes an exclusive advisory lock on `<name>.lock` without
//! blocking when a session opens and drops it when the session closes. A
//! second process opening the same name fails fast with `AlreadyOpen`
//! instead of queueing on the engine's busy handler.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;

use super::error::{SessionError, SessionResult};

/// An opened lock file for one database name.
#[derive(Debug)]
pub struct DatabaseLock {
    path: PathBuf,
    file: Arc<File>,
}

/// Holds the exclusive lock until dropped.
#[derive(Debug)]
pub struct DatabaseLockGuard {
    path: PathBuf,
    file: Arc<File>,
}

/// Result of one non-blocking lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Acquired,
    HeldElsewhere,
}

impl DatabaseLock {
    /// Opens or creates the lock file at `path`. The file itself is never
    /// truncated; only the advisory lock on it matters.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Lock`] if the file cannot be opened.
    pub fn open(path: &Path) -> SessionResult<Self> {
        let lock_err = |err: io::Error| lock_error(path, &err);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(lock_err)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(lock_err)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(file),
        })
    }

    /// Tries to take the exclusive lock. `Ok(None)` means another handle,
    /// in this process or another, holds it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Lock`] if the OS call fails for any other
    /// reason.
    pub fn try_lock(&self) -> SessionResult<Option<DatabaseLockGuard>> {
        match sys::try_exclusive(&self.file).map_err(|err| lock_error(&self.path, &err))? {
            Attempt::Acquired => Ok(Some(DatabaseLockGuard {
                path: self.path.clone(),
                file: Arc::clone(&self.file),
            })),
            Attempt::HeldElsewhere => Ok(None),
        }
    }
}

impl Drop for DatabaseLockGuard {
    fn drop(&mut self) {
        if let Err(err) = sys::release(&self.file) {
            warn!("failed to release lock {}: {err}", self.path.display());
        }
    }
}

fn lock_error(path: &Path, err: &io::Error) -> SessionError {
    SessionError::Lock(format!("{}: {err}", path.display()))
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::raw::c_int;
    use std::os::unix::io::AsRawFd;

    use super::Attempt;

    const LOCK_EX: c_int = 2;
    const LOCK_NB: c_int = 4;
    const LOCK_UN: c_int = 8;

    extern "C" {
        fn flock(fd: c_int, operation: c_int) -> c_int;
    }

    pub(super) fn try_exclusive(file: &File) -> io::Result<Attempt> {
        // SAFETY: the descriptor is owned by `file` and outlives the call.
        if unsafe { flock(file.as_raw_fd(), LOCK_EX | LOCK_NB) } == 0 {
            return Ok(Attempt::Acquired);
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => Ok(Attempt::HeldElsewhere),
            _ => Err(err),
        }
    }

    pub(super) fn release(file: &File) -> io::Result<()> {
        // SAFETY: as above.
        match unsafe { flock(file.as_raw_fd(), LOCK_UN) } {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }
}

#[cfg(windows)]
mod sys {
    use std::ffi::c_void;
    use std::fs::File;
    use std::io;
    use std::os::windows::io::AsRawHandle;

    use super::Attempt;

    type Handle = *mut c_void;

    #[repr(C)]
    struct Overlapped {
        internal: usize,
        internal_high: usize,
        offset: u32,
        offset_high: u32,
        event: Handle,
    }

    impl Overlapped {
        const fn at_start() -> Self {
            Self {
                internal: 0,
                internal_high: 0,
                offset: 0,
                offset_high: 0,
                event: std::ptr::null_mut(),
            }
        }
    }

    const LOCKFILE_FAIL_IMMEDIATELY: u32 = 0x1;
    const LOCKFILE_EXCLUSIVE_LOCK: u32 = 0x2;
    const ERROR_LOCK_VIOLATION: i32 = 33;

    extern "system" {
        fn LockFileEx(
            file: Handle,
            flags: u32,
            reserved: u32,
            len_low: u32,
            len_high: u32,
            overlapped: *mut Overlapped,
        ) -> i32;
        fn UnlockFileEx(
            file: Handle,
            reserved: u32,
            len_low: u32,
            len_high: u32,
            overlapped: *mut Overlapped,
        ) -> i32;
    }

    // Both calls lock the first byte of the file.
    pub(super) fn try_exclusive(file: &File) -> io::Result<Attempt> {
        let mut overlapped = Overlapped::at_start();
        // SAFETY: the handle is owned by `file`; `overlapped` lives across the call.
        let ok = unsafe {
            LockFileEx(
                file.as_raw_handle().cast(),
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                1,
                0,
                &mut overlapped,
            )
        };
        if ok != 0 {
            return Ok(Attempt::Acquired);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION) {
            Ok(Attempt::HeldElsewhere)
        } else {
            Err(err)
        }
    }

    pub(super) fn release(file: &File) -> io::Result<()> {
        let mut overlapped = Overlapped::at_start();
        // SAFETY: as above.
        let ok = unsafe { UnlockFileEx(file.as_raw_handle().cast(), 0, 1, 0, &mut overlapped) };
        if ok == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("employees.lock");
        let lock_a = DatabaseLock::open(&path).expect("open lock");
        let guard = lock_a.try_lock().expect("try lock").expect("acquire lock");

        let lock_b = DatabaseLock::open(&path).expect("open lock");
        let blocked = lock_b.try_lock().expect("try lock");
        assert!(blocked.is_none());

        drop(guard);
        let guard = lock_b.try_lock().expect("try lock");
        assert!(guard.is_some());
    }

    #[test]
    fn test_lock_is_exclusive_across_threads() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("employees.lock");

        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let path_clone = path.clone();
        let holder = std::thread::spawn(move || {
            let lock = DatabaseLock::open(&path_clone).expect("open lock");
            let guard = lock.try_lock().expect("try lock").expect("acquire lock");
            locked_tx.send(()).expect("signal locked");
            release_rx.recv().expect("wait release");
            drop(guard);
        });

        locked_rx.recv().expect("wait locked");
        let lock = DatabaseLock::open(&path).expect("open lock");
        assert!(lock.try_lock().expect("try lock").is_none());

        release_tx.send(()).expect("release");
        holder.join().expect("thread join");
        assert!(lock.try_lock().expect("try lock").is_some());
    }

    #[test]
    fn test_open_error_names_the_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"").expect("write file");
        let err = DatabaseLock::open(&blocker.join("employees.lock")).expect_err("parent is a file");
        assert!(matches!(&err, SessionError::Lock(message) if message.contains("not-a-dir")));
    }
}
