// Copyright 2017-2019 Matthias Krüger. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-invocation object owning the advisory lock, the run-id, the metadata
//! directory layout, the optional [`TrashVault`], and the dry-run flag.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use tracing::info;

use crate::error::{Error, Result};
use crate::path_guard::PathGuard;
use crate::trash::TrashVault;

pub const METADATA_DIR_NAME: &str = ".btidy";

/// Which pipeline a run belongs to; part of the run-id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Flatten,
    Rename,
    Organize,
    Deduplicate,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::Flatten => "flatten",
            Command::Rename => "rename",
            Command::Organize => "organize",
            Command::Deduplicate => "deduplicate",
        };
        write!(f, "{s}")
    }
}

fn make_run_id(command: Command) -> String {
    format!("{command}-{}", Utc::now().format("%Y%m%dT%H%M%S"))
}

struct LockHandle {
    file: File,
    path: PathBuf,
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path); // best-effort, missing is fine
    }
}

pub struct RunContext {
    pub guard: PathGuard,
    pub run_id: String,
    pub dry_run: bool,
    pub use_trash: bool,
    metadata_dir: PathBuf,
    trash: Option<TrashVault>,
    _lock: LockHandle,
}

impl RunContext {
    pub fn new(root: impl AsRef<Path>, command: Command, dry_run: bool, use_trash: bool) -> Result<Self> {
        let guard = PathGuard::new(root)?;
        let metadata_dir = guard.root().join(METADATA_DIR_NAME);
        guard.safe_mkdir_all(&metadata_dir)?;
        guard.safe_mkdir_all(metadata_dir.join("trash"))?;
        guard.safe_mkdir_all(metadata_dir.join("journal"))?;
        guard.safe_mkdir_all(metadata_dir.join("manifests"))?;

        let lock = acquire_lock(&metadata_dir)?;

        let run_id = make_run_id(command);
        info!(root = %guard.root().display(), run_id = %run_id, dry_run, "run acquired");

        let trash = if use_trash {
            Some(TrashVault::new(guard.clone(), &run_id))
        } else {
            None
        };

        Ok(Self {
            guard,
            run_id,
            dry_run,
            use_trash,
            metadata_dir,
            trash,
            _lock: lock,
        })
    }

    pub fn metadata_dir(&self) -> &Path {
        &self.metadata_dir
    }

    pub fn trash(&self) -> Option<&TrashVault> {
        self.trash.as_ref()
    }

    /// Deletes `p` according to the run's trash policy: trashed if a
    /// `TrashVault` is configured and we are not dry-running, a real
    /// removal if trashing is disabled, or nothing at all in dry-run mode.
    /// Returns the trashed-to path when trashing occurred.
    pub fn remove(&self, p: &Path) -> Result<Option<PathBuf>> {
        if self.dry_run {
            return Ok(None);
        }
        match &self.trash {
            Some(vault) => vault.trash(p).map(Some),
            None => self.guard.safe_remove(p).map(|_| None),
        }
    }

    /// Validates a move from `src` to `dst` exactly as [`PathGuard::safe_rename`]
    /// would, but only performs the actual rename when the run is not a dry
    /// run. Errors (escape, `TargetExists`, I/O) surface identically either
    /// way, so dry-run classification matches a real run per-file.
    pub fn rename(&self, src: &Path, dst: &Path) -> Result<()> {
        self.guard.validate_rename(src, dst)?;
        if self.dry_run {
            return Ok(());
        }
        std::fs::rename(src, dst).map_err(|source| Error::Io {
            path: src.to_path_buf(),
            source,
        })
    }

    /// Validates `dir` exactly as [`PathGuard::safe_mkdir_all`] would, but
    /// only creates it when the run is not a dry run.
    pub fn mkdir_all(&self, dir: &Path) -> Result<()> {
        self.guard.validate_for_mutation(dir)?;
        if self.dry_run {
            return Ok(());
        }
        std::fs::create_dir_all(dir).map_err(|source| Error::Io {
            path: dir.to_path_buf(),
            source,
        })
    }
}

fn acquire_lock(metadata_dir: &Path) -> Result<LockHandle> {
    let path = metadata_dir.join("lock");
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = file.set_permissions(std::fs::Permissions::from_mode(0o600));
    }

    file.try_lock_exclusive()
        .map_err(|_| Error::LockHeld(path.clone()))?;

    Ok(LockHandle { file, path })
}
