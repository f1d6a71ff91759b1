// Copyright 2017-2019 Matthias Krüger. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Closed error taxonomy for the safe-mutation engine.
//!
//! Pre-pipeline checks (root validation, read-safety pre-scan) return these
//! errors directly and abort the run. Per-file failures after pre-scan are
//! instead captured into an `errored` [`crate::operation::Operation`] and do
//! not propagate here; see [`crate::operation`].

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("path '{0}' escapes the root")]
    PathEscape(PathBuf),

    #[error("symlink at '{0}' resolves outside the root")]
    SymlinkEscape(PathBuf),

    #[error("target '{0}' already exists")]
    TargetExists(PathBuf),

    #[error("refusing to remove the root itself ('{0}')")]
    CannotRemoveRoot(PathBuf),

    #[error("invalid root '{path}': {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("failed to read '{path}'")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("content of '{0}' changed since it was planned")]
    ContentChanged(PathBuf),

    #[error("kept file '{0}' disappeared before the duplicate could be removed")]
    KeptFileMissing(PathBuf),

    #[error("another run already holds the lock at '{0}'")]
    LockHeld(PathBuf),

    #[error("I/O error on '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
