//! Protection policy: decides whether a request needs a CSRF token.
//!
//! Rules are evaluated in a fixed order:
//!
//! 1. HTTP method lists (unprotected methods first, then the protected allow-list)
//! 2. unprotected file extensions
//! 3. unprotected page rules
//! 4. protected page rules
//! 5. the `protect_all` default
//!
//! # Examples
//!
//! ```
//! use armature_csrf::{CsrfConfig, ProtectionPolicy};
//! use http::Method;
//!
//! let config = CsrfConfig::default()
//!     .with_unprotected_pages(vec!["/public/*".to_string()])
//!     .with_protected_pages(vec!["/account/*".to_string()])
//!     .with_protect_all(false);
//! let policy = ProtectionPolicy::from_config(&config).unwrap();
//!
//! let result = policy.is_protected("/account/settings?tab=1", &Method::POST);
//! assert!(result.is_protected);
//! assert_eq!(result.resource_identifier, "/account/*");
//!
//! assert!(!policy.is_protected("/public/account/x", &Method::POST).is_protected);
//! ```

use crate::config::CsrfConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::pattern::PatternSpec;
use http::Method;
use std::collections::HashSet;

/// Outcome of a protection lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionResult {
    /// Whether the request must carry a valid token
    pub is_protected: bool,
    /// Key for per-page token lookup. For rule matches this is the rule's
    /// pattern, so every URI matching one rule shares one token.
    pub resource_identifier: String,
}

impl ProtectionResult {
    fn protected(resource_identifier: impl Into<String>) -> Self {
        Self {
            is_protected: true,
            resource_identifier: resource_identifier.into(),
        }
    }

    fn unprotected(path: String) -> Self {
        Self {
            is_protected: false,
            resource_identifier: path,
        }
    }
}

/// A single page rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRule {
    pub pattern: PatternSpec,
    pub is_protected: bool,
}

impl PageRule {
    pub fn new(pattern: PatternSpec, is_protected: bool) -> Self {
        Self {
            pattern,
            is_protected,
        }
    }

    /// Canonical identifier of the resources covered by this rule.
    pub fn resource_identifier(&self) -> &str {
        self.pattern.as_str()
    }
}

/// Compiled, immutable protection policy.
#[derive(Debug, Clone)]
pub struct ProtectionPolicy {
    unprotected_rules: Vec<PageRule>,
    protected_rules: Vec<PageRule>,
    protected_methods: HashSet<Method>,
    unprotected_methods: HashSet<Method>,
    unprotected_extensions: HashSet<String>,
    protect_all: bool,
    context_path: String,
}

impl ProtectionPolicy {
    /// Compile the policy described by `config`.
    ///
    /// Every pattern and method is checked here, so a bad regex or an
    /// unknown method fails at load time rather than on first match.
    pub fn from_config(config: &CsrfConfig) -> ConfigResult<Self> {
        Ok(Self {
            unprotected_rules: compile_rules(&config.unprotected_pages, false)?,
            protected_rules: compile_rules(&config.protected_pages, true)?,
            protected_methods: compile_methods(&config.protected_methods)?,
            unprotected_methods: compile_methods(&config.unprotected_methods)?,
            unprotected_extensions: config
                .unprotected_extensions
                .iter()
                .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
            protect_all: config.protect_all,
            context_path: config.context_path.trim_end_matches('/').to_string(),
        })
    }

    /// Decide whether `uri` requested with `method` is protected.
    pub fn is_protected(&self, uri: &str, method: &Method) -> ProtectionResult {
        let path = normalize_path(uri, &self.context_path);

        if !self.is_method_protected(method) {
            return ProtectionResult::unprotected(path);
        }

        if self.has_unprotected_extension(&path) {
            return ProtectionResult::unprotected(path);
        }

        if self
            .unprotected_rules
            .iter()
            .any(|rule| rule.pattern.matches(&path))
        {
            return ProtectionResult::unprotected(path);
        }

        if let Some(rule) = self
            .protected_rules
            .iter()
            .find(|rule| rule.pattern.matches(&path))
        {
            return ProtectionResult::protected(rule.resource_identifier());
        }

        if self.protect_all {
            ProtectionResult::protected(path)
        } else {
            ProtectionResult::unprotected(path)
        }
    }

    /// Whether requests with `method` are candidates for protection.
    ///
    /// The unprotected list is consulted first, so a method named in both
    /// lists is unprotected.
    pub fn is_method_protected(&self, method: &Method) -> bool {
        if self.unprotected_methods.contains(method) {
            return false;
        }
        if !self.protected_methods.is_empty() {
            return self.protected_methods.contains(method);
        }
        true
    }

    fn has_unprotected_extension(&self, path: &str) -> bool {
        if self.unprotected_extensions.is_empty() {
            return false;
        }
        let segment = path.rsplit('/').next().unwrap_or(path);
        match segment.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => self
                .unprotected_extensions
                .contains(&ext.to_ascii_lowercase()),
            _ => false,
        }
    }

    /// Resource identifiers of all protected rules, in configuration order.
    pub fn protected_resources(&self) -> Vec<String> {
        self.protected_rules
            .iter()
            .map(|rule| rule.resource_identifier().to_string())
            .collect()
    }

    pub fn protected_rules(&self) -> &[PageRule] {
        &self.protected_rules
    }

    pub fn unprotected_rules(&self) -> &[PageRule] {
        &self.unprotected_rules
    }

    pub fn protect_all(&self) -> bool {
        self.protect_all
    }
}

fn compile_rules(pages: &[String], is_protected: bool) -> ConfigResult<Vec<PageRule>> {
    pages
        .iter()
        .map(|page| PatternSpec::parse(page).map(|pattern| PageRule::new(pattern, is_protected)))
        .collect()
}

fn compile_methods(methods: &[String]) -> ConfigResult<HashSet<Method>> {
    methods
        .iter()
        .map(|name| {
            let upper = name.trim().to_ascii_uppercase();
            Method::from_bytes(upper.as_bytes())
                .map_err(|_| ConfigError::InvalidMethod(name.clone()))
        })
        .collect()
}

/// Normalize a request URI to a context-relative absolute path.
///
/// Drops the query string and fragment, strips the scheme and authority of
/// absolute URLs, removes the context path prefix, collapses empty and `.`
/// segments, resolves `..` (never above the root) and drops trailing slashes.
///
/// ```
/// use armature_csrf::normalize_path;
///
/// assert_eq!(normalize_path("/app/a//b/./c/../d?x=1", "/app"), "/a/b/d");
/// assert_eq!(normalize_path("https://example.com/app", "/app"), "/");
/// assert_eq!(normalize_path("../../etc/passwd", ""), "/etc/passwd");
/// ```
pub fn normalize_path(uri: &str, context_path: &str) -> String {
    let end = uri.find(['?', '#']).unwrap_or(uri.len());
    let mut path = &uri[..end];

    if let Some(idx) = path.find("://") {
        let rest = &path[idx + 3..];
        path = rest.find('/').map(|i| &rest[i..]).unwrap_or("/");
    }

    let context_path = context_path.trim_end_matches('/');
    if !context_path.is_empty() {
        if let Some(rest) = path.strip_prefix(context_path) {
            if rest.is_empty() || rest.starts_with('/') {
                path = rest;
            }
        }
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    format!("/{}", segments.join("/"))
}
