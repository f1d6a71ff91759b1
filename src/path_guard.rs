// Copyright 2017-2019 Matthias Krüger. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The only code in the crate allowed to read symlink targets, rename,
//! remove, or create directories. Every mutation is gated by containment;
//! every read that might follow a symlink is gated by symlink validation.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// Resolves `root` to its absolute, symlink-resolved, cleaned form and
    /// requires it to be an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let absolute = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|source| Error::Io {
                    path: root.to_path_buf(),
                    source,
                })?
                .join(root)
        };

        let canonical = fs::canonicalize(&absolute).map_err(|source| Error::InvalidRoot {
            path: absolute.clone(),
            reason: source.to_string(),
        })?;

        if !canonical.is_dir() {
            return Err(Error::InvalidRoot {
                path: canonical,
                reason: "not a directory".to_string(),
            });
        }

        Ok(Self { root: canonical })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Purely lexical: does `p`, once made absolute and cleaned, equal the
    /// root or have `root + separator` as a prefix?
    pub fn contains(&self, p: impl AsRef<Path>) -> bool {
        let cleaned = clean(p.as_ref());
        cleaned == self.root || cleaned.starts_with(&self.root)
    }

    pub fn validate_path(&self, p: impl AsRef<Path>) -> Result<()> {
        if self.contains(p.as_ref()) {
            Ok(())
        } else {
            Err(Error::PathEscape(p.as_ref().to_path_buf()))
        }
    }

    /// If `p` exists and is a symlink, require its (possibly relative, then
    /// joined to `p`'s parent) target to resolve inside the root. Missing
    /// paths and non-symlinks always succeed.
    pub fn validate_symlink(&self, p: impl AsRef<Path>) -> Result<()> {
        let p = p.as_ref();
        let meta = match fs::symlink_metadata(p) {
            Ok(meta) => meta,
            Err(_) => return Ok(()), // missing path: nothing to follow
        };
        if !meta.file_type().is_symlink() {
            return Ok(());
        }

        let target = fs::read_link(p).map_err(|source| Error::Io {
            path: p.to_path_buf(),
            source,
        })?;
        let resolved = if target.is_relative() {
            p.parent().unwrap_or_else(|| Path::new("")).join(target)
        } else {
            target
        };

        if self.contains(&resolved) {
            Ok(())
        } else {
            Err(Error::SymlinkEscape(p.to_path_buf()))
        }
    }

    pub fn validate_for_read(&self, p: impl AsRef<Path>) -> Result<()> {
        self.validate_path(&p)?;
        self.validate_symlink(&p)
    }

    /// Lexical containment, then resolve the longest *existing* ancestor of
    /// `p` through `canonicalize` and require the resolved chain to stay
    /// inside root. Catches a symlink anywhere in `p`'s ancestry, not just
    /// its final component.
    pub fn validate_for_mutation(&self, p: impl AsRef<Path>) -> Result<()> {
        let p = p.as_ref();
        self.validate_path(p)?;

        let mut ancestor = p.to_path_buf();
        loop {
            if ancestor.exists() {
                let resolved = fs::canonicalize(&ancestor).map_err(|source| Error::Io {
                    path: ancestor.clone(),
                    source,
                })?;
                return if self.contains(&resolved) {
                    Ok(())
                } else {
                    Err(Error::SymlinkEscape(p.to_path_buf()))
                };
            }
            match ancestor.parent() {
                Some(parent) => ancestor = parent.to_path_buf(),
                None => return Ok(()), // nothing exists yet; lexical check already passed
            }
        }
    }

    /// Validation half of [`Self::safe_rename`], exposed so callers that
    /// need to honor a dry-run flag can check safety without performing the
    /// actual rename.
    pub(crate) fn validate_rename(&self, src: &Path, dst: &Path) -> Result<()> {
        self.validate_for_mutation(src)?;
        self.validate_for_mutation(dst)?;

        if fs::symlink_metadata(dst).is_ok() {
            return Err(Error::TargetExists(dst.to_path_buf()));
        }
        Ok(())
    }

    /// Never overwrites: fails with `TargetExists` if `dst` is any kind of
    /// existing entry (file, directory, or symlink).
    pub fn safe_rename(&self, src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<()> {
        let (src, dst) = (src.as_ref(), dst.as_ref());
        self.validate_rename(src, dst)?;

        fs::rename(src, dst).map_err(|source| Error::Io {
            path: src.to_path_buf(),
            source,
        })
    }

    pub fn safe_remove(&self, p: impl AsRef<Path>) -> Result<()> {
        let p = p.as_ref();
        self.guard_remove_root(p)?;
        self.validate_for_mutation(p)?;
        fs::remove_file(p).map_err(|source| Error::Io {
            path: p.to_path_buf(),
            source,
        })
    }

    pub fn safe_remove_dir(&self, p: impl AsRef<Path>) -> Result<()> {
        let p = p.as_ref();
        self.guard_remove_root(p)?;
        self.validate_for_mutation(p)?;
        fs::remove_dir(p).map_err(|source| Error::Io {
            path: p.to_path_buf(),
            source,
        })
    }

    pub fn safe_mkdir_all(&self, p: impl AsRef<Path>) -> Result<()> {
        let p = p.as_ref();
        self.validate_for_mutation(p)?;
        fs::create_dir_all(p).map_err(|source| Error::Io {
            path: p.to_path_buf(),
            source,
        })
    }

    /// Joins `rel` onto `base` (or keeps it if already absolute), cleans the
    /// result, and requires containment.
    pub fn resolve_safe(&self, base: impl AsRef<Path>, rel: impl AsRef<Path>) -> Result<PathBuf> {
        let rel = rel.as_ref();
        let joined = if rel.is_absolute() {
            rel.to_path_buf()
        } else {
            base.as_ref().join(rel)
        };
        let cleaned = clean(&joined);
        self.validate_path(&cleaned)?;
        Ok(cleaned)
    }

    fn guard_remove_root(&self, p: &Path) -> Result<()> {
        if clean(p) == self.root {
            Err(Error::CannotRemoveRoot(p.to_path_buf()))
        } else {
            Ok(())
        }
    }
}

/// Lexically cleans `.`/`..` components without touching the filesystem
/// (unlike `canonicalize`, this must work on paths that don't exist yet).
fn clean(p: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in p.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn guard() -> (TempDir, PathGuard) {
        let dir = TempDir::new().unwrap();
        let guard = PathGuard::new(dir.path()).unwrap();
        (dir, guard)
    }

    #[test]
    fn contains_root_itself() {
        let (dir, guard) = guard();
        assert!(guard.contains(dir.path()));
    }

    #[test]
    fn does_not_contain_parent() {
        let (dir, guard) = guard();
        assert!(!guard.contains(dir.path().parent().unwrap()));
    }

    #[test]
    fn contains_nested_path() {
        let (dir, guard) = guard();
        assert!(guard.contains(dir.path().join("a/b/c.txt")));
    }

    #[test]
    fn validate_symlink_escape_detected() {
        let (dir, guard) = guard();
        let outside = TempDir::new().unwrap();
        let link = dir.path().join("escape_link.txt");
        #[cfg(unix)]
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), &link).unwrap();
        #[cfg(unix)]
        assert!(matches!(
            guard.validate_symlink(&link),
            Err(Error::SymlinkEscape(_))
        ));
    }

    #[test]
    fn validate_symlink_relative_inside_is_fine() {
        let (dir, guard) = guard();
        fs::write(dir.path().join("target.txt"), b"x").unwrap();
        let link = dir.path().join("link.txt");
        #[cfg(unix)]
        std::os::unix::fs::symlink("target.txt", &link).unwrap();
        #[cfg(unix)]
        assert!(guard.validate_symlink(&link).is_ok());
    }

    #[test]
    fn safe_rename_refuses_to_overwrite() {
        let (dir, guard) = guard();
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("dst.txt");
        fs::write(&src, b"x").unwrap();
        fs::write(&dst, b"y").unwrap();
        assert!(matches!(
            guard.safe_rename(&src, &dst),
            Err(Error::TargetExists(_))
        ));
    }

    #[test]
    fn safe_remove_refuses_root() {
        let (dir, guard) = guard();
        assert!(matches!(
            guard.safe_remove_dir(dir.path()),
            Err(Error::CannotRemoveRoot(_))
        ));
    }

    #[test]
    fn mutation_through_ancestor_symlink_is_caught() {
        let (dir, guard) = guard();
        let outside = TempDir::new().unwrap();
        let link_dir = dir.path().join("linked");
        #[cfg(unix)]
        std::os::unix::fs::symlink(outside.path(), &link_dir).unwrap();
        #[cfg(unix)]
        assert!(matches!(
            guard.validate_for_mutation(link_dir.join("file.txt")),
            Err(Error::SymlinkEscape(_))
        ));
    }
}
