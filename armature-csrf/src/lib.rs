//! # Armature CSRF Protection
//!
//! Cross-Site Request Forgery (CSRF) protection for Armature applications,
//! using the synchronizer token pattern.
//!
//! ## Features
//!
//! - ✅ **Session Tokens** - One random master token per session
//! - ✅ **Per-Page Tokens** - Optional independent token per protected resource
//! - ✅ **Token Rotation** - Single-use tokens, rotation on every failure
//! - ✅ **Page Rules** - Exact, wildcard and regex page patterns
//! - ✅ **Method and Extension Rules** - Skip safe methods and static assets
//! - ✅ **Reject Actions** - Log, error status, redirect, request attribute
//! - ✅ **Hot Reload** - Configuration swapped atomically at runtime
//!
//! ## Quick Start
//!
//! ```rust
//! use armature_csrf::{CsrfConfig, CsrfGuard};
//! use http::Method;
//!
//! let config = CsrfConfig::default()
//!     .with_unprotected_methods(vec!["GET".to_string(), "HEAD".to_string()])
//!     .with_unprotected_extensions(vec!["css".to_string(), "js".to_string()]);
//! let guard = CsrfGuard::new(config).unwrap();
//!
//! let session = guard.memory_session("session-1");
//!
//! // Embed this in forms and links
//! let token = guard.master_token(&session).unwrap();
//!
//! assert!(guard.validate(Some(&session), "/transfer", &Method::POST, Some(&token)).is_accepted());
//! assert!(guard.validate(Some(&session), "/transfer", &Method::GET, None).is_accepted());
//! assert!(!guard.validate(Some(&session), "/transfer", &Method::POST, Some("forged")).is_accepted());
//! ```
//!
//! ## Per-Page Tokens
//!
//! ```rust
//! use armature_csrf::{CsrfConfig, CsrfGuard};
//! use http::Method;
//!
//! let config = CsrfConfig::default()
//!     .with_token_per_page(true)
//!     .with_protected_pages(vec!["/admin/*".to_string(), "/billing".to_string()]);
//! let guard = CsrfGuard::new(config).unwrap();
//! let session = guard.memory_session("session-1");
//!
//! let admin = guard.token_for(&session, "/admin/users", &Method::POST).unwrap();
//! let billing = guard.token_for(&session, "/billing", &Method::POST).unwrap();
//! assert_ne!(admin, billing);
//!
//! // A token is only valid for the resource it was issued for
//! assert!(!guard.validate(Some(&session), "/billing", &Method::POST, Some(&admin)).is_accepted());
//! ```
//!
//! ## Configuration Files
//!
//! ```rust,no_run
//! use armature_csrf::{ConfigLoader, CsrfGuard};
//!
//! # async fn run() -> Result<(), armature_csrf::ConfigError> {
//! // With `reload_interval_secs = 30` in the file, edits are picked up
//! // every 30 seconds
//! let guard = CsrfGuard::watch("csrfguard.toml", ConfigLoader::new())?;
//! # let _ = guard;
//! # Ok(())
//! # }
//! ```
//!
//! ## Sessions
//!
//! Tokens live in the host's session. Implement [`LogicalSession`] for the
//! framework's session type, or use [`MemorySession`].

pub mod action;
pub mod config;
pub mod error;
pub mod extract;
pub mod guard;
pub mod loader;
pub mod matcher;
pub mod pattern;
pub mod prng;
pub mod session;
pub mod store;
pub mod token;
pub mod validator;

pub use action::{ActionRegistry, Directive, RejectAction, RejectionContext};
pub use config::{ActionSpec, CsrfConfig};
pub use error::{ConfigError, ConfigResult, CsrfError, Result};
pub use extract::TokenExtractor;
pub use guard::{CsrfGuard, GuardDecision, GuardSnapshot};
pub use loader::{ConfigLoader, FileFormat};
pub use matcher::{ProtectionPolicy, ProtectionResult, normalize_path};
pub use pattern::{PatternKind, PatternSpec};
pub use prng::{PrngRegistry, SecureRandomSource};
pub use session::{LogicalSession, MemorySession, SessionKeys};
pub use store::{SessionLocks, TokenCheck, TokenScope, TokenStore};
pub use token::{TokenGenerator, generate_token, tokens_match};
pub use validator::{
    AcceptReason, RejectReason, TokenValidator, ValidationOutcome, ValidationSettings,
};
