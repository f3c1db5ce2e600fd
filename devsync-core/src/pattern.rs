//! Rule-key patterns.
//!
//! Three shapes are understood, decided by the key alone:
//!
//! ```text
//! deploy/package.json      exact path
//! deploy/*                 anything below deploy/, any depth
//! frontend/**/*.spec.js    anything below frontend/ ending in .spec.js
//! ```
//!
//! Any other use of `*` is rejected at parse time. Rejected keys keep their
//! reason and never match a path.

use std::fmt;

const RECURSIVE: &str = "**/*";
const DIRECTORY: &str = "/*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternKind {
    Exact(String),
    /// `prefix` keeps its trailing `/`.
    Directory { prefix: String },
    Recursive { prefix: String, suffix: String },
    Invalid { reason: String },
}

/// A compiled rule key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    kind: PatternKind,
}

impl Pattern {
    pub fn parse(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            kind: classify(raw),
        }
    }

    /// A pattern that never matches, e.g. for a rule whose commands failed to parse.
    pub fn invalid(raw: &str, reason: impl Into<String>) -> Self {
        Self {
            raw: raw.to_string(),
            kind: PatternKind::Invalid {
                reason: reason.into(),
            },
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> &PatternKind {
        &self.kind
    }

    pub fn invalid_reason(&self) -> Option<&str> {
        match &self.kind {
            PatternKind::Invalid { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match &self.kind {
            PatternKind::Exact(exact) => path == exact,
            PatternKind::Directory { prefix } => path.len() > prefix.len() && path.starts_with(prefix),
            PatternKind::Recursive { prefix, suffix } => {
                path.len() > prefix.len()
                    && path.len() >= prefix.len() + suffix.len()
                    && path.starts_with(prefix)
                    && path.ends_with(suffix)
            }
            PatternKind::Invalid { .. } => false,
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn classify(raw: &str) -> PatternKind {
    let key = raw.trim().strip_prefix("./").unwrap_or(raw.trim());
    if key.is_empty() {
        return invalid("empty pattern");
    }

    if let Some(at) = key.find(RECURSIVE) {
        let prefix = &key[..at];
        let suffix = &key[at + RECURSIVE.len()..];
        if prefix.contains('*') || suffix.contains('*') {
            return invalid("only one `**/*` wildcard is supported");
        }
        if !prefix.is_empty() && !prefix.ends_with('/') {
            return invalid("`**/*` must start a path segment");
        }
        return PatternKind::Recursive {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        };
    }

    if let Some(dir) = key.strip_suffix(DIRECTORY) {
        if dir.is_empty() {
            return invalid("directory wildcard needs a directory");
        }
        if dir.contains('*') {
            return invalid("wildcards are only allowed as `dir/*` or `dir/**/*`");
        }
        return PatternKind::Directory {
            prefix: format!("{dir}/"),
        };
    }

    if key.contains('*') {
        return invalid("wildcards are only allowed as `dir/*` or `dir/**/*`");
    }
    PatternKind::Exact(key.to_string())
}

fn invalid(reason: &str) -> PatternKind {
    PatternKind::Invalid {
        reason: reason.to_string(),
    }
}
