//! Working directory switching
//!
//! Model libraries resolve their input files relative to the directory of
//! their configuration file, so the process runs from there while a model
//! is initialized. The working directory is process state: at most one
//! guard can be active at a time.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};

use crate::error::{BmiError, BmiResult};

static ACTIVE: AtomicBool = AtomicBool::new(false);

/// Whether some guard currently holds the working directory
pub fn is_active() -> bool {
    ACTIVE.load(Ordering::SeqCst)
}

/// Switches into a directory and switches back exactly once
#[derive(Debug)]
pub struct WorkingDirGuard {
    original: PathBuf,
    restored: bool,
}

impl WorkingDirGuard {
    /// Change into `dir`, remembering `original` to come back to
    pub fn enter(original: &Path, dir: &Path) -> BmiResult<Self> {
        if ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BmiError::InvalidState {
                operation: format!("change directory to {}", dir.display()),
                reason: "another model already holds the working directory".to_string(),
            });
        }
        if let Err(e) = std::env::set_current_dir(dir) {
            ACTIVE.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        debug!("Working directory is now {}", dir.display());
        Ok(Self {
            original: original.to_path_buf(),
            restored: false,
        })
    }

    pub fn is_restored(&self) -> bool {
        self.restored
    }

    /// Go back to the original directory. Only the first call does
    /// anything; it returns `true`.
    pub fn restore(&mut self) -> BmiResult<bool> {
        if self.restored {
            return Ok(false);
        }
        self.restored = true;
        ACTIVE.store(false, Ordering::SeqCst);
        std::env::set_current_dir(&self.original)?;
        debug!("Working directory restored to {}", self.original.display());
        Ok(true)
    }
}

impl Drop for WorkingDirGuard {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!(
                "Could not restore working directory {}: {}",
                self.original.display(),
                e
            );
        }
    }
}
