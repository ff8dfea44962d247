//! Token storage on top of [`LogicalSession`].
//!
//! Check-then-create and rotation run inside a per-session critical section,
//! so two concurrent requests of one session never both create a "first"
//! token. Sessions never contend with each other.

use crate::error::{CsrfError, Result};
use crate::session::LogicalSession;
use crate::token::{TokenGenerator, tokens_match};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Per-session mutual exclusion, keyed by session identifier.
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        // The shard guard is dropped before the caller blocks on the mutex
        self.locks
            .entry(session_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Forget the lock of a finished session.
    pub fn release(&self, session_id: &str) -> bool {
        self.locks.remove(session_id).is_some()
    }

    /// Number of sessions currently tracked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Rotation gives up after this many draws that repeat the previous token.
const MAX_ROTATION_ATTEMPTS: usize = 16;

/// Which token a request is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScope<'a> {
    Master,
    Page(&'a str),
}

/// Result of [`TokenStore::check_token`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenCheck {
    /// The supplied token matched
    Matched,
    /// No token was supplied; the master token was rotated
    Missing,
    /// The supplied token did not match; the master token was rotated.
    /// `replayed_from` names the other resource whose page token was
    /// supplied, which was rotated as well.
    Mismatched { replayed_from: Option<String> },
}

/// Reads, creates and rotates the tokens kept in a session.
#[derive(Debug, Clone)]
pub struct TokenStore {
    generator: Arc<TokenGenerator>,
    locks: Arc<SessionLocks>,
}

impl TokenStore {
    /// Create a store with its own lock table.
    pub fn new(generator: TokenGenerator) -> Self {
        Self::with_locks(Arc::new(generator), Arc::new(SessionLocks::new()))
    }

    /// Create a store sharing an existing lock table.
    ///
    /// Stores built for successive configuration snapshots share one table so
    /// a reload never splits the critical section of a live session.
    pub fn with_locks(generator: Arc<TokenGenerator>, locks: Arc<SessionLocks>) -> Self {
        Self { generator, locks }
    }

    pub fn generator(&self) -> &TokenGenerator {
        &self.generator
    }

    pub fn locks(&self) -> &Arc<SessionLocks> {
        &self.locks
    }

    /// Current master token, or `None` if none was generated yet.
    pub fn get_master_token(&self, session: &dyn LogicalSession) -> Option<String> {
        session.master_token()
    }

    /// Return the master token, generating and storing it if absent.
    pub fn ensure_master_token(&self, session: &dyn LogicalSession) -> Result<String> {
        if let Some(token) = session.master_token() {
            return Ok(token);
        }

        let lock = self.locks.lock_for(session.id());
        let _guard = lock.lock();

        // Another request may have won the race while we waited
        self.ensure_master_locked(session)
    }

    /// Replace the master token with a fresh value and return it.
    pub fn rotate_master_token(&self, session: &dyn LogicalSession) -> Result<String> {
        let lock = self.locks.lock_for(session.id());
        let _guard = lock.lock();
        self.rotate_master_locked(session)
    }

    /// Current token of `resource`, or `None` if none was generated yet.
    pub fn get_page_token(&self, session: &dyn LogicalSession, resource: &str) -> Option<String> {
        session.page_tokens().get(resource).cloned()
    }

    /// Return the token of `resource`, generating and storing it if absent.
    pub fn ensure_page_token(&self, session: &dyn LogicalSession, resource: &str) -> Result<String> {
        if let Some(token) = self.get_page_token(session, resource) {
            return Ok(token);
        }

        let lock = self.locks.lock_for(session.id());
        let _guard = lock.lock();
        self.ensure_page_locked(session, resource)
    }

    /// Replace the token of `resource` with a fresh value and return it.
    pub fn rotate_page_token(&self, session: &dyn LogicalSession, resource: &str) -> Result<String> {
        let lock = self.locks.lock_for(session.id());
        let _guard = lock.lock();
        self.rotate_page_locked(session, resource)
    }

    /// Create tokens for every resource that does not have one yet.
    pub fn precreate_all_page_tokens<I, S>(&self, session: &dyn LogicalSession, resources: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let lock = self.locks.lock_for(session.id());
        let _guard = lock.lock();

        let mut tokens = session.page_tokens();
        let mut created = 0usize;
        for resource in resources {
            let resource = resource.as_ref();
            if !tokens.contains_key(resource) {
                tokens.insert(resource.to_string(), self.generator.generate()?);
                created += 1;
            }
        }

        if created > 0 {
            session.set_page_tokens(tokens);
            debug!(created, "Precreated page CSRF tokens");
        }
        Ok(())
    }

    /// Compare `supplied` with the expected token of `scope` and apply the
    /// outcome, all inside one critical section of the session.
    ///
    /// The expected token is created if absent. On a match the token is
    /// rotated when `rotate` is set, so of several concurrent requests
    /// carrying the same token at most one matches. On a failure the master
    /// token is rotated, along with any other page token equal to `supplied`.
    pub fn check_token(
        &self,
        session: &dyn LogicalSession,
        scope: TokenScope<'_>,
        supplied: Option<&str>,
        rotate: bool,
    ) -> Result<TokenCheck> {
        let lock = self.locks.lock_for(session.id());
        let _guard = lock.lock();

        let expected = match scope {
            TokenScope::Master => self.ensure_master_locked(session)?,
            TokenScope::Page(resource) => self.ensure_page_locked(session, resource)?,
        };

        let Some(token) = supplied.filter(|token| !token.is_empty()) else {
            self.rotate_master_locked(session)?;
            return Ok(TokenCheck::Missing);
        };

        if tokens_match(&expected, token) {
            if rotate {
                match scope {
                    TokenScope::Master => self.rotate_master_locked(session)?,
                    TokenScope::Page(resource) => self.rotate_page_locked(session, resource)?,
                };
            }
            return Ok(TokenCheck::Matched);
        }

        self.rotate_master_locked(session)?;
        let except = match scope {
            TokenScope::Master => None,
            TokenScope::Page(resource) => Some(resource),
        };
        let replayed_from = self.find_page_token_owner(session, token, except);
        if let Some(owner) = &replayed_from {
            self.rotate_page_locked(session, owner)?;
        }
        Ok(TokenCheck::Mismatched { replayed_from })
    }

    /// Find the resource, other than `except`, whose current page token
    /// equals `token`.
    pub fn find_page_token_owner(
        &self,
        session: &dyn LogicalSession,
        token: &str,
        except: Option<&str>,
    ) -> Option<String> {
        session
            .page_tokens()
            .into_iter()
            .find(|(resource, value)| Some(resource.as_str()) != except && tokens_match(value, token))
            .map(|(resource, _)| resource)
    }

    /// Drop the lock entry of a finished session.
    pub fn release_session(&self, session_id: &str) {
        self.locks.release(session_id);
    }

    // The `_locked` helpers expect the caller to hold the session lock.

    fn ensure_master_locked(&self, session: &dyn LogicalSession) -> Result<String> {
        if let Some(token) = session.master_token() {
            return Ok(token);
        }

        let token = self.generator.generate()?;
        session.set_master_token(token.clone());
        debug!("Generated master CSRF token");
        Ok(token)
    }

    fn rotate_master_locked(&self, session: &dyn LogicalSession) -> Result<String> {
        let previous = session.master_token();
        let token = self.fresh_token(previous.as_deref())?;
        session.set_master_token(token.clone());
        debug!("Rotated master CSRF token");
        Ok(token)
    }

    fn ensure_page_locked(&self, session: &dyn LogicalSession, resource: &str) -> Result<String> {
        let mut tokens = session.page_tokens();
        if let Some(token) = tokens.get(resource) {
            return Ok(token.clone());
        }

        let token = self.generator.generate()?;
        tokens.insert(resource.to_string(), token.clone());
        session.set_page_tokens(tokens);
        debug!(resource, "Generated page CSRF token");
        Ok(token)
    }

    fn rotate_page_locked(&self, session: &dyn LogicalSession, resource: &str) -> Result<String> {
        let mut tokens = session.page_tokens();
        let token = self.fresh_token(tokens.get(resource).map(String::as_str))?;
        tokens.insert(resource.to_string(), token.clone());
        session.set_page_tokens(tokens);
        debug!(resource, "Rotated page CSRF token");
        Ok(token)
    }

    fn fresh_token(&self, previous: Option<&str>) -> Result<String> {
        for _ in 0..MAX_ROTATION_ATTEMPTS {
            let token = self.generator.generate()?;
            if previous != Some(token.as_str()) {
                return Ok(token);
            }
        }
        Err(CsrfError::Generation(
            "random source keeps repeating the previous token".to_string(),
        ))
    }
}
