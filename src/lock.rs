//! Exclusive run lock
//!
//! A single lock file serializes entire runs: it is created with
//! `O_CREAT|O_EXCL` before any domain is touched and removed on all
//! exit paths when the guard drops. A second invocation fails fast
//! instead of interleaving with an in-progress run.

use crate::error::{Error, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Holds the run lock; releases it on drop
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Atomically create the lock file, writing our pid into it
    pub fn acquire(path: &Path) -> Result<RunLock> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::LockHeld(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        write!(file, "{}", std::process::id())?;
        Ok(RunLock {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // Removal failure leaves a stale lock; nothing useful to do here
        let _ = fs::remove_file(&self.path);
    }
}
