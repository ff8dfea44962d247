use crate::error::{ConfigError, ConfigResult};
use crate::prng::DEFAULT_PRNG;
use crate::session::SessionKeys;
use crate::token::DEFAULT_TOKEN_LENGTH;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Shortest token length accepted by [`CsrfConfig::validate`].
pub const MIN_TOKEN_LENGTH: usize = 8;

/// Longest token length accepted by [`CsrfConfig::validate`].
pub const MAX_TOKEN_LENGTH: usize = 512;

/// CSRF protection configuration
///
/// Every field has a default, so a configuration file only needs the values
/// it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Request parameter (and header) carrying the token
    pub token_name: String,

    /// Fallback header checked when no `token_name` header is present
    pub header_name: String,

    /// Number of characters in generated tokens
    pub token_length: usize,

    /// Rotate a token after every successful validation
    pub rotate: bool,

    /// Use an independent token for each protected resource
    pub token_per_page: bool,

    /// Create all page tokens when the session starts
    pub token_per_page_precreate: bool,

    /// Reject protected requests that arrive without a session
    pub validate_when_no_session_exists: bool,

    /// Protect requests that match no page rule
    pub protect_all: bool,

    /// Pages that require a token
    pub protected_pages: Vec<String>,

    /// Pages that never require a token
    pub unprotected_pages: Vec<String>,

    /// When non-empty, only these methods can be protected
    pub protected_methods: Vec<String>,

    /// Methods that are never protected
    pub unprotected_methods: Vec<String>,

    /// File extensions that are never protected
    pub unprotected_extensions: Vec<String>,

    /// Session attribute holding the master token
    pub session_key: String,

    /// Session attribute holding the page token map
    pub page_tokens_key: String,

    /// Name of the random source, resolved through a `PrngRegistry`
    pub prng: String,

    /// Application context path stripped from request URIs
    pub context_path: String,

    /// Actions run when a request is rejected
    pub actions: Vec<ActionSpec>,

    /// Seconds between checks of the configuration file
    pub reload_interval_secs: Option<u64>,
}

/// A reject action and its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            token_name: "OWASP-CSRFTOKEN".to_string(),
            header_name: "X-CSRF-Token".to_string(),
            token_length: DEFAULT_TOKEN_LENGTH,
            rotate: false,
            token_per_page: false,
            token_per_page_precreate: false,
            validate_when_no_session_exists: true,
            protect_all: true,
            protected_pages: Vec::new(),
            unprotected_pages: Vec::new(),
            protected_methods: Vec::new(),
            unprotected_methods: Vec::new(),
            unprotected_extensions: Vec::new(),
            session_key: "OWASP_CSRFGUARD_KEY".to_string(),
            page_tokens_key: "Owasp_CsrfGuard_Pages_Tokens".to_string(),
            prng: DEFAULT_PRNG.to_string(),
            context_path: String::new(),
            actions: vec![ActionSpec::new("log")],
            reload_interval_secs: None,
        }
    }
}

impl CsrfConfig {
    /// Check required values and ranges.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.token_name.trim().is_empty() {
            return Err(ConfigError::Missing("token_name"));
        }
        if self.session_key.trim().is_empty() {
            return Err(ConfigError::Missing("session_key"));
        }
        if self.page_tokens_key.trim().is_empty() {
            return Err(ConfigError::Missing("page_tokens_key"));
        }
        if self.session_key == self.page_tokens_key {
            return Err(ConfigError::Invalid {
                field: "page_tokens_key",
                message: "must differ from session_key".to_string(),
            });
        }
        if self.prng.trim().is_empty() {
            return Err(ConfigError::Missing("prng"));
        }
        if !(MIN_TOKEN_LENGTH..=MAX_TOKEN_LENGTH).contains(&self.token_length) {
            return Err(ConfigError::Invalid {
                field: "token_length",
                message: format!(
                    "{} is outside {}..={}",
                    self.token_length, MIN_TOKEN_LENGTH, MAX_TOKEN_LENGTH
                ),
            });
        }
        if self.reload_interval_secs == Some(0) {
            return Err(ConfigError::Invalid {
                field: "reload_interval_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Whether page tokens should be created eagerly.
    pub fn precreates_page_tokens(&self) -> bool {
        self.token_per_page && self.token_per_page_precreate
    }

    /// Session attribute names for the tokens
    pub fn session_keys(&self) -> SessionKeys {
        SessionKeys {
            master: self.session_key.clone(),
            pages: self.page_tokens_key.clone(),
        }
    }

    pub fn reload_interval(&self) -> Option<Duration> {
        self.reload_interval_secs.map(Duration::from_secs)
    }

    /// Set token name
    pub fn with_token_name(mut self, name: impl Into<String>) -> Self {
        self.token_name = name.into();
        self
    }

    /// Set header name
    pub fn with_header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    /// Set token length
    pub fn with_token_length(mut self, length: usize) -> Self {
        self.token_length = length;
        self
    }

    /// Enable rotation after successful validation
    pub fn with_rotate(mut self, rotate: bool) -> Self {
        self.rotate = rotate;
        self
    }

    /// Enable per-page tokens
    pub fn with_token_per_page(mut self, enabled: bool) -> Self {
        self.token_per_page = enabled;
        self
    }

    /// Enable eager creation of page tokens
    pub fn with_token_per_page_precreate(mut self, enabled: bool) -> Self {
        self.token_per_page_precreate = enabled;
        self
    }

    pub fn with_validate_when_no_session_exists(mut self, enabled: bool) -> Self {
        self.validate_when_no_session_exists = enabled;
        self
    }

    /// Protect pages that match no rule
    pub fn with_protect_all(mut self, protect_all: bool) -> Self {
        self.protect_all = protect_all;
        self
    }

    pub fn with_protected_pages(mut self, pages: Vec<String>) -> Self {
        self.protected_pages = pages;
        self
    }

    pub fn with_unprotected_pages(mut self, pages: Vec<String>) -> Self {
        self.unprotected_pages = pages;
        self
    }

    pub fn with_protected_methods(mut self, methods: Vec<String>) -> Self {
        self.protected_methods = methods;
        self
    }

    pub fn with_unprotected_methods(mut self, methods: Vec<String>) -> Self {
        self.unprotected_methods = methods;
        self
    }

    pub fn with_unprotected_extensions(mut self, extensions: Vec<String>) -> Self {
        self.unprotected_extensions = extensions;
        self
    }

    /// Set the session attribute names
    pub fn with_session_keys(
        mut self,
        session_key: impl Into<String>,
        page_tokens_key: impl Into<String>,
    ) -> Self {
        self.session_key = session_key.into();
        self.page_tokens_key = page_tokens_key.into();
        self
    }

    /// Set random source name
    pub fn with_prng(mut self, prng: impl Into<String>) -> Self {
        self.prng = prng.into();
        self
    }

    pub fn with_context_path(mut self, context_path: impl Into<String>) -> Self {
        self.context_path = context_path.into();
        self
    }

    /// Replace the reject actions
    pub fn with_actions(mut self, actions: Vec<ActionSpec>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_reload_interval(mut self, interval: Duration) -> Self {
        self.reload_interval_secs = Some(interval.as_secs());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CsrfConfig::default();
        assert_eq!(config.token_name, "OWASP-CSRFTOKEN");
        assert_eq!(config.token_length, 32);
        assert_eq!(config.session_key, "OWASP_CSRFGUARD_KEY");
        assert_eq!(config.page_tokens_key, "Owasp_CsrfGuard_Pages_Tokens");
        assert!(config.protect_all);
        assert!(config.validate_when_no_session_exists);
        assert!(!config.rotate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = CsrfConfig::default()
            .with_token_name("_csrf")
            .with_token_length(64)
            .with_rotate(true)
            .with_token_per_page(true)
            .with_token_per_page_precreate(true);

        assert_eq!(config.token_name, "_csrf");
        assert_eq!(config.token_length, 64);
        assert!(config.rotate);
        assert!(config.precreates_page_tokens());
    }

    #[test]
    fn test_precreate_requires_token_per_page() {
        let config = CsrfConfig::default().with_token_per_page_precreate(true);
        assert!(!config.precreates_page_tokens());
    }

    #[test]
    fn test_missing_values() {
        let config = CsrfConfig::default().with_token_name("");
        assert!(matches!(config.validate(), Err(ConfigError::Missing("token_name"))));

        let config = CsrfConfig::default().with_prng(" ");
        assert!(matches!(config.validate(), Err(ConfigError::Missing("prng"))));
    }

    #[test]
    fn test_invalid_values() {
        assert!(CsrfConfig::default().with_token_length(4).validate().is_err());
        assert!(CsrfConfig::default().with_token_length(1024).validate().is_err());
        assert!(
            CsrfConfig::default()
                .with_session_keys("same", "same")
                .validate()
                .is_err()
        );
        assert!(
            CsrfConfig::default()
                .with_reload_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_partial_deserialization() {
        let config: CsrfConfig = serde_json::from_str(
            r#"{
                "token_length": 48,
                "unprotected_methods": ["GET", "HEAD"],
                "actions": [{ "name": "error", "params": { "code": "400" } }]
            }"#,
        )
        .unwrap();

        assert_eq!(config.token_length, 48);
        assert_eq!(config.token_name, "OWASP-CSRFTOKEN");
        assert_eq!(config.unprotected_methods, vec!["GET", "HEAD"]);
        assert_eq!(
            config.actions,
            vec![ActionSpec::new("error").with_param("code", "400")]
        );
    }
}
