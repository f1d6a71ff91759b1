// Copyright 2017-2019 Matthias Krüger. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Filename sanitization and date-prefix formatting. The engine consumes
//! these as a collaborator capability; their string algebra is prescribed
//! exactly by spec.md §6 and reproduced here.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

fn other_chars_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9_\-.]").unwrap())
}

fn dash_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-{2,}").unwrap())
}

fn underscore_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_{2,}").unwrap())
}

fn mixed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[_\-]{2,}").unwrap())
}

/// Splits `name` into `(stem, extension-including-dot)`. The extension is
/// the substring from the last dot onward, lowercased separately by the
/// caller; dotfiles (`.gitignore`) and extensionless names get no
/// extension.
fn split_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) => (name, ""),       // ".gitignore": no stem before the dot
        Some(idx) => name.split_at(idx),
        None => (name, ""),
    }
}

fn fold_diacritics(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'ä' | 'Ä' => 'a',
            'ö' | 'Ö' => 'o',
            'å' | 'Å' => 'a',
            other => other,
        })
        .collect()
}

/// Sanitizes a base name (preserving and separately lowercasing the
/// extension): lowercase, fold `ä/ö/å`, spaces to `_`, delete bracket
/// characters, replace any other disallowed character with `-`, collapse
/// runs of `-`/`_`, collapse mixed `_-`/`-_` runs to `_`, trim leading and
/// trailing `-`/`_`, and substitute `unnamed` if the result is empty.
pub fn sanitize(name: &str) -> String {
    let (stem, ext) = split_ext(name);
    let ext = ext.to_lowercase();

    let mut s = fold_diacritics(stem).to_lowercase();
    s = s.replace(' ', "_");
    s.retain(|c| !matches!(c, '(' | ')' | '[' | ']' | '{' | '}'));
    s = other_chars_re().replace_all(&s, "-").into_owned();
    s = dash_run_re().replace_all(&s, "-").into_owned();
    s = underscore_run_re().replace_all(&s, "_").into_owned();
    s = mixed_re().replace_all(&s, "_").into_owned();
    s = s.trim_matches(|c| c == '-' || c == '_').to_string();

    if s.is_empty() {
        s = "unnamed".to_string();
    }

    format!("{s}{ext}")
}

/// Prepends `YYYY-MM-DD_` to `sanitize(name)`, unless the sanitized form
/// already begins with the correct prefix. Collapses a doubled date prefix
/// (`YYYY-MM-DD_YYYY-MM-DD_` -> `YYYY-MM-DD_`).
pub fn timestamp_prefix(name: &str, mtime: DateTime<Utc>) -> String {
    let sanitized = sanitize(name);
    let prefix = mtime.format("%Y-%m-%d_").to_string();

    let doubled = format!("{prefix}{prefix}");
    if let Some(rest) = sanitized.strip_prefix(&doubled) {
        return format!("{prefix}{rest}");
    }
    if sanitized.starts_with(&prefix) {
        return sanitized;
    }
    format!("{prefix}{sanitized}")
}

/// `Ext(name)` of spec.md §6: lowercased extension without the dot, or
/// `other` for extensionless names and dotfiles whose entire name is
/// `.xxx`.
pub fn ext_category(name: &str) -> String {
    let (stem, ext) = split_ext(name);
    if stem.is_empty() || ext.is_empty() {
        return "other".to_string();
    }
    ext.trim_start_matches('.').to_lowercase()
}
