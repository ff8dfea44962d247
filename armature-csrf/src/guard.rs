//! The CSRF guard: one entry point for request validation, token access for
//! page rendering, session lifecycle events and configuration reloads.
//!
//! All configuration-derived state (compiled policy, token generator, reject
//! actions) lives in an immutable [`GuardSnapshot`]. Requests clone the
//! current snapshot `Arc` and never see a half-applied reload.

use crate::action::{ActionRegistry, Directive, RejectAction, RejectionContext};
use crate::config::CsrfConfig;
use crate::error::{ConfigError, ConfigResult, Result};
use crate::extract::TokenExtractor;
use crate::loader::{ConfigLoader, FileFormat};
use crate::prng::PrngRegistry;
use crate::session::{LogicalSession, MemorySession, SessionKeys};
use crate::store::{SessionLocks, TokenStore};
use crate::token::TokenGenerator;
use crate::validator::{TokenValidator, ValidationOutcome};
use http::{HeaderMap, Method};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Everything built from one configuration generation.
#[derive(Debug)]
pub struct GuardSnapshot {
    config: CsrfConfig,
    validator: TokenValidator,
    actions: Vec<Arc<dyn RejectAction>>,
    extractor: TokenExtractor,
}

impl GuardSnapshot {
    fn build(
        config: CsrfConfig,
        prngs: &PrngRegistry,
        actions: &ActionRegistry,
        locks: Arc<SessionLocks>,
    ) -> ConfigResult<Self> {
        config.validate()?;

        let rng = prngs.create(&config.prng)?;
        let generator = Arc::new(TokenGenerator::new(rng, config.token_length));
        let validator = TokenValidator::from_config(&config, TokenStore::with_locks(generator, locks))?;
        let actions = actions.resolve(&config.actions)?;
        let extractor = TokenExtractor::from_config(&config);

        Ok(Self {
            config,
            validator,
            actions,
            extractor,
        })
    }

    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }

    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    pub fn store(&self) -> &TokenStore {
        self.validator.store()
    }

    pub fn actions(&self) -> &[Arc<dyn RejectAction>] {
        &self.actions
    }
}

/// Result of [`CsrfGuard::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardDecision {
    pub outcome: ValidationOutcome,
    /// Instructions from the reject actions, empty when accepted
    pub directives: Vec<Directive>,
}

impl GuardDecision {
    pub fn is_accepted(&self) -> bool {
        self.outcome.is_accepted()
    }
}

/// CSRF guard with hot-reloadable configuration.
///
/// ```
/// use armature_csrf::{CsrfConfig, CsrfGuard};
/// use http::Method;
///
/// let guard = CsrfGuard::new(CsrfConfig::default()).unwrap();
/// let session = guard.memory_session("session-1");
///
/// let token = guard.master_token(&session).unwrap();
/// assert!(guard.validate(Some(&session), "/transfer", &Method::POST, Some(&token)).is_accepted());
/// assert!(!guard.validate(Some(&session), "/transfer", &Method::POST, None).is_accepted());
/// ```
#[derive(Debug)]
pub struct CsrfGuard {
    snapshot: RwLock<Arc<GuardSnapshot>>,
    locks: Arc<SessionLocks>,
    prngs: PrngRegistry,
    actions: ActionRegistry,
}

impl CsrfGuard {
    /// Build a guard with the built-in random sources and actions.
    pub fn new(config: CsrfConfig) -> ConfigResult<Self> {
        Self::with_registries(config, PrngRegistry::new(), ActionRegistry::new())
    }

    /// Build a guard resolving names through custom registries.
    pub fn with_registries(
        config: CsrfConfig,
        prngs: PrngRegistry,
        actions: ActionRegistry,
    ) -> ConfigResult<Self> {
        let locks = Arc::new(SessionLocks::new());
        let snapshot = GuardSnapshot::build(config, &prngs, &actions, locks.clone())?;
        Ok(Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            locks,
            prngs,
            actions,
        })
    }

    /// Load the configuration file at `path` and build a guard from it.
    pub fn from_file(path: impl Into<PathBuf>, loader: &ConfigLoader) -> ConfigResult<Self> {
        Self::new(loader.load_file(path.into())?)
    }

    /// Load the configuration file at `path`, build a shared guard from it
    /// and, when the file sets `reload_interval_secs`, start reloading it at
    /// that interval.
    ///
    /// The interval is read once here; later changes to it take effect on
    /// the next call to `watch`. Reloading needs a Tokio runtime, so a
    /// configuration that enables it is rejected outside one.
    pub fn watch(path: impl Into<PathBuf>, loader: ConfigLoader) -> ConfigResult<Arc<Self>> {
        let path = path.into();
        let config = loader.load_file(&path)?;
        let interval = config.reload_interval();
        let guard = Arc::new(Self::new(config)?);

        if let Some(interval) = interval {
            if tokio::runtime::Handle::try_current().is_err() {
                return Err(ConfigError::Invalid {
                    field: "reload_interval_secs",
                    message: "reloading requires a running Tokio runtime".to_string(),
                });
            }
            guard.spawn_reload_task(path, interval, loader);
            info!(interval_secs = interval.as_secs(), "Watching CSRF configuration");
        }
        Ok(guard)
    }

    /// The current configuration generation.
    pub fn snapshot(&self) -> Arc<GuardSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn config(&self) -> CsrfConfig {
        self.snapshot().config.clone()
    }

    /// Attribute names the current configuration stores tokens under.
    pub fn session_keys(&self) -> SessionKeys {
        self.snapshot().config.session_keys()
    }

    /// Create an in-memory session using the configured attribute names.
    ///
    /// The names are fixed when the session is created. Sessions that exist
    /// before a reload changing `session_key` or `page_tokens_key` keep their
    /// old names, so the tokens they already carry stay valid.
    pub fn memory_session(&self, id: impl Into<String>) -> MemorySession {
        MemorySession::new(id, self.session_keys())
    }

    /// Validate a request whose token has already been extracted.
    pub fn validate(
        &self,
        session: Option<&dyn LogicalSession>,
        uri: &str,
        method: &Method,
        supplied: Option<&str>,
    ) -> GuardDecision {
        let snapshot = self.snapshot();
        Self::decide(&snapshot, session, uri, method, supplied)
    }

    /// Extract the token from request parts, then validate.
    ///
    /// `uri` may carry a query string; it is searched for the token after the
    /// headers. `body` is only inspected for form and JSON content types.
    pub fn validate_request(
        &self,
        session: Option<&dyn LogicalSession>,
        method: &Method,
        uri: &str,
        headers: &HeaderMap,
        body: Option<&[u8]>,
    ) -> GuardDecision {
        let snapshot = self.snapshot();
        let query = uri
            .split('#')
            .next()
            .and_then(|without_fragment| without_fragment.split_once('?'))
            .map(|(_, query)| query);
        let supplied = snapshot.extractor.extract(headers, query, body);
        Self::decide(&snapshot, session, uri, method, supplied.as_deref())
    }

    fn decide(
        snapshot: &GuardSnapshot,
        session: Option<&dyn LogicalSession>,
        uri: &str,
        method: &Method,
        supplied: Option<&str>,
    ) -> GuardDecision {
        let outcome = snapshot.validator.validate(session, uri, method, supplied);
        let directives = match outcome {
            ValidationOutcome::Accepted { .. } => Vec::new(),
            ValidationOutcome::Rejected { reason } => {
                let ctx = RejectionContext {
                    uri,
                    method,
                    reason,
                    token_name: &snapshot.config.token_name,
                };
                snapshot
                    .actions
                    .iter()
                    .filter_map(|action| action.execute(&ctx))
                    .collect()
            }
        };
        GuardDecision {
            outcome,
            directives,
        }
    }

    /// The master token to embed in outgoing pages, created if absent.
    pub fn master_token(&self, session: &dyn LogicalSession) -> Result<String> {
        self.snapshot().store().ensure_master_token(session)
    }

    /// The token a form or link targeting `uri` must carry.
    ///
    /// This is the page token of the matching resource when per-page tokens
    /// are enabled and `uri` is protected, and the master token otherwise.
    pub fn token_for(&self, session: &dyn LogicalSession, uri: &str, method: &Method) -> Result<String> {
        let snapshot = self.snapshot();
        let store = snapshot.store();
        if snapshot.config.token_per_page {
            let protection = snapshot.validator.policy().is_protected(uri, method);
            if protection.is_protected {
                return store.ensure_page_token(session, &protection.resource_identifier);
            }
        }
        store.ensure_master_token(session)
    }

    /// Prepare a new session: create its master token and, when configured,
    /// every page token.
    pub fn session_created(&self, session: &dyn LogicalSession) -> Result<()> {
        let snapshot = self.snapshot();
        let store = snapshot.store();
        store.ensure_master_token(session)?;
        if snapshot.config.precreates_page_tokens() {
            store.precreate_all_page_tokens(session, snapshot.validator.policy().protected_resources())?;
        }
        Ok(())
    }

    /// Forget per-session state of a session that ended.
    pub fn session_destroyed(&self, session_id: &str) {
        self.locks.release(session_id);
        debug!("Released CSRF session state");
    }

    /// Replace the configuration.
    ///
    /// The new snapshot is fully built before it is swapped in. On error the
    /// current configuration stays active.
    pub fn reload(&self, config: CsrfConfig) -> ConfigResult<()> {
        let snapshot = GuardSnapshot::build(config, &self.prngs, &self.actions, self.locks.clone())?;
        *self.snapshot.write() = Arc::new(snapshot);
        info!("CSRF configuration reloaded");
        Ok(())
    }

    /// Watch the configuration file at `path`, reloading when its content
    /// changes.
    ///
    /// The file is polled every `interval`. A file that fails to load is
    /// logged and skipped. The task stops once the guard is dropped.
    pub fn spawn_reload_task(
        self: &Arc<Self>,
        path: impl Into<PathBuf>,
        interval: Duration,
        loader: ConfigLoader,
    ) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let path = path.into();
        let mut last_content = std::fs::read_to_string(&path).ok();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let Some(guard) = weak.upgrade() else {
                    debug!("CSRF guard dropped, stopping configuration reload");
                    break;
                };

                let content = match tokio::fs::read_to_string(&path).await {
                    Ok(content) => content,
                    Err(err) => {
                        error!(path = %path.display(), error = %err, "Failed to read CSRF configuration");
                        continue;
                    }
                };
                if last_content.as_deref() == Some(content.as_str()) {
                    continue;
                }

                let result = FileFormat::from_path(&path)
                    .and_then(|format| loader.load_str(&content, format))
                    .and_then(|config| guard.reload(config));
                if let Err(err) = result {
                    error!(path = %path.display(), error = %err, "Keeping previous CSRF configuration");
                }
                last_content = Some(content);
            }
        })
    }
}
