// Copyright 2017-2019 Matthias Krüger. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Safely flatten, rename, organize, and deduplicate a directory tree in
//! place. Every mutation goes through [`path_guard::PathGuard`]; every run
//! is scoped to a single [`run_context::RunContext`] holding the advisory
//! lock, the run-id, and the optional [`trash::TrashVault`].

pub mod discovery;
pub mod error;
pub mod hash;
pub mod operation;
pub mod path_guard;
pub mod pipelines;
pub mod run_context;
pub mod sanitize;
pub mod trash;

pub use error::{Error, Result};
pub use operation::{Operation, PipelineResult, Status};
pub use run_context::{Command, RunContext};
