//! Page patterns used by protection rules.
//!
//! A configured page string is compiled once, by shape:
//!
//! - `^...$` is a regular expression that must match the whole path
//! - anything containing `*` is a glob, where `*` matches any run of
//!   characters (including `/`)
//! - everything else is an exact path
//!
//! ```
//! use armature_csrf::PatternSpec;
//!
//! let glob = PatternSpec::parse("/admin/*").unwrap();
//! assert!(glob.matches("/admin/users/7"));
//! assert!(glob.matches("/admin"));
//! assert!(!glob.matches("/administrator"));
//!
//! let regex = PatternSpec::parse(r"^/orders/\d+$").unwrap();
//! assert!(regex.matches("/orders/42"));
//! assert!(!regex.matches("/orders/42/items"));
//! ```

use crate::error::{ConfigError, ConfigResult};
use regex::Regex;
use std::fmt;

/// Pattern kind, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Exact,
    Glob,
    Regex,
}

/// A compiled page pattern.
#[derive(Debug, Clone)]
pub enum PatternSpec {
    /// Literal path, compared for equality
    Exact(String),
    /// `*` wildcard pattern
    Glob(String),
    /// Regular expression anchored at both ends
    Regex { source: String, regex: Regex },
}

impl PatternSpec {
    /// Compile a configured page string.
    pub fn parse(raw: &str) -> ConfigResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigError::Invalid {
                field: "pages",
                message: "page pattern cannot be empty".to_string(),
            });
        }

        if raw.len() >= 2 && raw.starts_with('^') && raw.ends_with('$') {
            let inner = &raw[1..raw.len() - 1];
            let regex =
                Regex::new(&format!("^(?:{})$", inner)).map_err(|source| ConfigError::Pattern {
                    pattern: raw.to_string(),
                    source,
                })?;
            return Ok(PatternSpec::Regex {
                source: raw.to_string(),
                regex,
            });
        }

        let path = if raw.starts_with('/') || raw.starts_with('*') {
            raw.to_string()
        } else {
            format!("/{}", raw)
        };

        if path.contains('*') {
            Ok(PatternSpec::Glob(path))
        } else {
            Ok(PatternSpec::Exact(path))
        }
    }

    /// Test a normalized path against this pattern.
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PatternSpec::Exact(exact) => exact == path,
            PatternSpec::Glob(glob) => {
                // `/admin/*` also covers `/admin` itself
                if let Some(prefix) = glob.strip_suffix("/*") {
                    if !prefix.contains('*') && prefix == path {
                        return true;
                    }
                }
                glob_match(glob.as_bytes(), path.as_bytes())
            }
            PatternSpec::Regex { regex, .. } => regex.is_match(path),
        }
    }

    /// The pattern text. Doubles as the resource identifier of the rule.
    pub fn as_str(&self) -> &str {
        match self {
            PatternSpec::Exact(s) | PatternSpec::Glob(s) => s,
            PatternSpec::Regex { source, .. } => source,
        }
    }

    pub fn kind(&self) -> PatternKind {
        match self {
            PatternSpec::Exact(_) => PatternKind::Exact,
            PatternSpec::Glob(_) => PatternKind::Glob,
            PatternSpec::Regex { .. } => PatternKind::Regex,
        }
    }
}

impl PartialEq for PatternSpec {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.as_str() == other.as_str()
    }
}

impl Eq for PatternSpec {}

impl fmt::Display for PatternSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wildcard match where `*` matches any (possibly empty) byte sequence.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            star = Some(p);
            p += 1;
            resume = t;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some(s) = star {
            p = s + 1;
            resume += 1;
            t = resume;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}
