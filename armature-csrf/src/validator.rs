//! Request validation.
//!
//! For every request the validator walks
//! `protection check -> (master | page) token check -> accepted | rejected`.
//! A mismatch is an ordinary outcome, not an error, and any internal failure
//! while checking a protected request is reported as a rejection.

use crate::config::CsrfConfig;
use crate::error::{ConfigResult, Result};
use crate::matcher::ProtectionPolicy;
use crate::session::LogicalSession;
use crate::store::{TokenCheck, TokenScope, TokenStore};
use http::Method;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Why a request was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptReason {
    /// The resource does not require a token
    Unprotected,
    /// No session exists and validation without a session is disabled
    NoSession,
    /// The supplied token matched
    ValidToken,
}

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The request carried no token
    MissingToken,
    /// The request carried a token that does not match
    TokenMismatch,
    /// The resource is protected and no session exists
    NoSession,
    /// Validation could not be completed
    Internal,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingToken => "missing token",
            RejectReason::TokenMismatch => "token mismatch",
            RejectReason::NoSession => "no session",
            RejectReason::Internal => "internal error",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of validating one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted { reason: AcceptReason },
    Rejected { reason: RejectReason },
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted { .. })
    }

    pub fn is_rejected(&self) -> bool {
        !self.is_accepted()
    }

    fn accepted(reason: AcceptReason) -> Self {
        ValidationOutcome::Accepted { reason }
    }

    fn rejected(reason: RejectReason) -> Self {
        ValidationOutcome::Rejected { reason }
    }
}

/// Token policy switches used by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationSettings {
    pub rotate: bool,
    pub token_per_page: bool,
    pub validate_when_no_session_exists: bool,
}

impl From<&CsrfConfig> for ValidationSettings {
    fn from(config: &CsrfConfig) -> Self {
        Self {
            rotate: config.rotate,
            token_per_page: config.token_per_page,
            validate_when_no_session_exists: config.validate_when_no_session_exists,
        }
    }
}

/// Decides whether a request may proceed.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    policy: Arc<ProtectionPolicy>,
    store: TokenStore,
    settings: ValidationSettings,
}

impl TokenValidator {
    pub fn new(policy: Arc<ProtectionPolicy>, store: TokenStore, settings: ValidationSettings) -> Self {
        Self {
            policy,
            store,
            settings,
        }
    }

    /// Compile the policy of `config` and build a validator around `store`.
    pub fn from_config(config: &CsrfConfig, store: TokenStore) -> ConfigResult<Self> {
        config.validate()?;
        let policy = ProtectionPolicy::from_config(config)?;
        Ok(Self::new(Arc::new(policy), store, config.into()))
    }

    pub fn policy(&self) -> &ProtectionPolicy {
        &self.policy
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn settings(&self) -> ValidationSettings {
        self.settings
    }

    /// Validate a request.
    ///
    /// `supplied` is the token value extracted from the request, if any.
    pub fn validate(
        &self,
        session: Option<&dyn LogicalSession>,
        uri: &str,
        method: &Method,
        supplied: Option<&str>,
    ) -> ValidationOutcome {
        let protection = self.policy.is_protected(uri, method);
        if !protection.is_protected {
            debug!(uri, %method, "Unprotected resource, skipping CSRF check");
            return ValidationOutcome::accepted(AcceptReason::Unprotected);
        }

        let Some(session) = session else {
            if !self.settings.validate_when_no_session_exists {
                debug!(uri, %method, "No session, skipping CSRF check");
                return ValidationOutcome::accepted(AcceptReason::NoSession);
            }
            warn!(uri, %method, reason = %RejectReason::NoSession, "CSRF validation failed");
            return ValidationOutcome::rejected(RejectReason::NoSession);
        };

        let resource = protection.resource_identifier.as_str();
        match self.check(session, resource, supplied) {
            Ok(outcome) => {
                match outcome {
                    ValidationOutcome::Accepted { .. } => {
                        debug!(uri, %method, resource, "CSRF token accepted");
                    }
                    ValidationOutcome::Rejected { reason } => {
                        warn!(uri, %method, resource, %reason, "CSRF validation failed");
                    }
                }
                outcome
            }
            Err(err) => {
                error!(uri, %method, resource, error = %err, "CSRF validation aborted");
                ValidationOutcome::rejected(RejectReason::Internal)
            }
        }
    }

    fn check(
        &self,
        session: &dyn LogicalSession,
        resource: &str,
        supplied: Option<&str>,
    ) -> Result<ValidationOutcome> {
        let scope = if self.settings.token_per_page {
            TokenScope::Page(resource)
        } else {
            TokenScope::Master
        };

        let check = self
            .store
            .check_token(session, scope, supplied, self.settings.rotate)?;
        Ok(match check {
            TokenCheck::Matched => ValidationOutcome::accepted(AcceptReason::ValidToken),
            TokenCheck::Missing => ValidationOutcome::rejected(RejectReason::MissingToken),
            TokenCheck::Mismatched { replayed_from } => {
                if let Some(owner) = replayed_from {
                    warn!(resource, replayed_from = %owner, "Page token replayed on another resource");
                }
                ValidationOutcome::rejected(RejectReason::TokenMismatch)
            }
        })
    }
}
