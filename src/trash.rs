// Copyright 2017-2019 Matthias Krüger. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Turns a destructive operation into a reversible one for the duration of
//! the process and beyond: `<root>/.btidy/trash/<run-id>/` mirrors the
//! trashed file's path relative to root.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::path_guard::PathGuard;

#[derive(Debug, Clone)]
pub struct TrashVault {
    guard: PathGuard,
    trash_root: PathBuf,
}

impl TrashVault {
    pub fn new(guard: PathGuard, run_id: &str) -> Self {
        let trash_root = guard
            .root()
            .join(crate::run_context::METADATA_DIR_NAME)
            .join("trash")
            .join(run_id);
        Self { guard, trash_root }
    }

    pub fn trash_root(&self) -> &Path {
        &self.trash_root
    }

    /// Previews the destination for `p` without touching the filesystem.
    /// Requires `p` to be inside root.
    pub fn trash_path(&self, p: &Path) -> Result<PathBuf> {
        self.guard.validate_path(p)?;
        let rel = p.strip_prefix(self.guard.root()).map_err(|_| Error::PathEscape(p.to_path_buf()))?;
        Ok(self.trash_root.join(rel))
    }

    pub fn trash(&self, p: &Path) -> Result<PathBuf> {
        let dest = self.trash_path(p)?;
        if let Some(parent) = dest.parent() {
            self.guard.safe_mkdir_all(parent)?;
        }
        debug!(from = %p.display(), to = %dest.display(), "trashing file");
        self.guard.safe_rename(p, &dest)?;
        Ok(dest)
    }

    /// Computes the original path of a trashed entry and renames it back.
    /// Refuses to overwrite an occupied original location.
    pub fn restore(&self, trashed_p: &Path) -> Result<PathBuf> {
        let rel = trashed_p
            .strip_prefix(&self.trash_root)
            .map_err(|_| Error::PathEscape(trashed_p.to_path_buf()))?;
        let original = self.guard.root().join(rel);

        if fs::symlink_metadata(&original).is_ok() {
            return Err(Error::TargetExists(original));
        }
        if let Some(parent) = original.parent() {
            self.guard.safe_mkdir_all(parent)?;
        }
        self.guard.safe_rename(trashed_p, &original)?;
        Ok(original)
    }

    /// Restores every entry under the trash tree. Stops and reports on the
    /// first failure; unrelated entries are not retried automatically.
    pub fn restore_all(&self) -> Result<Vec<PathBuf>> {
        let mut restored = Vec::new();
        if !self.trash_root.exists() {
            return Ok(restored);
        }

        for entry in walkdir::WalkDir::new(&self.trash_root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let original = self.restore(entry.path())?;
            restored.push(original);
        }
        Ok(restored)
    }

    /// Recursively deletes the trash root, through `PathGuard`.
    pub fn purge(&self) -> Result<()> {
        if !self.trash_root.exists() {
            return Ok(());
        }
        self.guard.validate_for_mutation(&self.trash_root)?;
        fs::remove_dir_all(&self.trash_root).map_err(|source| Error::Io {
            path: self.trash_root.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn vault(dir: &TempDir) -> TrashVault {
        let guard = PathGuard::new(dir.path()).unwrap();
        TrashVault::new(guard, "flatten-20250101T000000")
    }

    #[test]
    fn trash_path_preserves_relative_layout() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/c.txt"), b"x").unwrap();
        let vault = vault(&dir);

        let dest = vault.trash_path(&dir.path().join("a/b/c.txt")).unwrap();
        assert_eq!(
            dest,
            vault
                .trash_root()
                .join("a")
                .join("b")
                .join("c.txt")
        );
    }

    #[test]
    fn trash_then_restore_is_identity() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("doc.txt");
        fs::write(&file, b"payload").unwrap();
        let vault = vault(&dir);

        let trashed = vault.trash(&file).unwrap();
        assert!(!file.exists());
        assert!(trashed.exists());

        let restored = vault.restore(&trashed).unwrap();
        assert_eq!(restored, file);
        assert_eq!(fs::read(&file).unwrap(), b"payload");
    }

    #[test]
    fn restore_refuses_occupied_original() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("doc.txt");
        fs::write(&file, b"payload").unwrap();
        let vault = vault(&dir);

        let trashed = vault.trash(&file).unwrap();
        fs::write(&file, b"new occupant").unwrap();

        assert!(matches!(vault.restore(&trashed), Err(Error::TargetExists(_))));
        assert!(trashed.exists());
    }

    #[test]
    fn restore_all_restores_every_entry() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();
        let vault = vault(&dir);
        vault.trash(&a).unwrap();
        vault.trash(&b).unwrap();

        let restored = vault.restore_all().unwrap();
        assert_eq!(restored.len(), 2);
        assert!(a.exists());
        assert!(b.exists());
    }

    #[test]
    fn purge_removes_trash_tree() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("doc.txt");
        fs::write(&file, b"payload").unwrap();
        let vault = vault(&dir);
        vault.trash(&file).unwrap();

        vault.purge().unwrap();
        assert!(!vault.trash_root().exists());
    }
}
