// Copyright 2017-2019 Matthias Krüger. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! File discovery: walks the target root and returns a flat, deterministic
//! sequence of [`FileRecord`]s. Declared out of scope as a *design* by
//! spec.md §1, but implemented here so the crate runs end to end.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::run_context::METADATA_DIR_NAME;

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: PathBuf,
    pub dir: PathBuf,
    pub name: String,
    pub size: u64,
    pub mtime: DateTime<Utc>,
}

/// Walks `root` depth-first in lexicographic order, yielding one
/// [`FileRecord`] per regular file or symlink (the engine, not discovery,
/// decides whether a symlink is safe to touch). Hidden directories (names
/// starting with `.`) and the metadata directory are excluded.
pub fn discover(root: &Path) -> Vec<FileRecord> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_hidden_dir(entry, root))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() || entry.file_type().is_symlink())
        .filter_map(|entry| to_record(entry.path()))
        .collect()
}

fn is_hidden_dir(entry: &walkdir::DirEntry, root: &Path) -> bool {
    if entry.path() == root {
        return false;
    }
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || name == METADATA_DIR_NAME
}

fn to_record(path: &Path) -> Option<FileRecord> {
    let meta = std::fs::symlink_metadata(path).ok()?;
    let dir = path.parent()?.to_path_buf();
    let name = path.file_name()?.to_string_lossy().into_owned();
    let mtime: DateTime<Utc> = meta
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .into();

    Some(FileRecord {
        path: path.to_path_buf(),
        dir,
        name,
        size: meta.len(),
        mtime,
    })
}
