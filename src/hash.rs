// Copyright 2017-2019 Matthias Krüger. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Content fingerprinting. Two files with equal digests are treated as
//! byte-equal.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Hex-encoded, lowercase, 64-character SHA-256 digest.
pub type Digest64 = String;

/// Size of each end window `partial_hash` reads for files larger than
/// `2 * PARTIAL_HASH_WINDOW`.
pub const PARTIAL_HASH_WINDOW: u64 = 8 * 1024;

const BUF_SIZE: usize = 64 * 1024;

pub fn full_hash(path: &Path) -> Result<Digest64> {
    let mut file = open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|source| read_failed(path, source))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex(hasher.finalize()))
}

/// Hashes the first and last `window` bytes (8 KiB by default). If
/// `size <= 2 * window`, hashes the whole file instead.
pub fn partial_hash(path: &Path, size: u64) -> Result<Digest64> {
    partial_hash_windowed(path, size, PARTIAL_HASH_WINDOW)
}

pub fn partial_hash_windowed(path: &Path, size: u64, window: u64) -> Result<Digest64> {
    if size <= window.saturating_mul(2) {
        return full_hash(path);
    }

    let mut file = open(path)?;
    let mut hasher = Sha256::new();

    let mut head = vec![0u8; window as usize];
    file.read_exact(&mut head)
        .map_err(|source| read_failed(path, source))?;
    hasher.update(&head);

    use std::io::{Seek, SeekFrom};
    file.seek(SeekFrom::End(-(window as i64)))
        .map_err(|source| read_failed(path, source))?;
    let mut tail = vec![0u8; window as usize];
    file.read_exact(&mut tail)
        .map_err(|source| read_failed(path, source))?;
    hasher.update(&tail);

    Ok(hex(hasher.finalize()))
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| read_failed(path, source))
}

fn read_failed(path: &Path, source: io::Error) -> Error {
    Error::ReadFailed {
        path: path.to_path_buf(),
        source,
    }
}

fn hex(bytes: impl AsRef<[u8]>) -> String {
    bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
}
