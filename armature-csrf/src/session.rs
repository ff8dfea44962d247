//! Session abstraction used by the token store.
//!
//! The host framework owns sessions. The CSRF layer only needs to read and
//! write two attributes, so it talks to sessions through the narrow
//! [`LogicalSession`] trait. A session is shared by every concurrent request
//! of one browser, so implementations use interior mutability.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The view of a host session the CSRF layer works with.
pub trait LogicalSession: Send + Sync {
    /// Stable session identifier
    fn id(&self) -> &str;

    /// Current master token, if one has been generated
    fn master_token(&self) -> Option<String>;

    fn set_master_token(&self, token: String);

    /// Current per-page tokens keyed by resource identifier
    fn page_tokens(&self) -> HashMap<String, String>;

    fn set_page_tokens(&self, tokens: HashMap<String, String>);
}

/// Attribute names under which tokens are kept in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub master: String,
    pub pages: String,
}

impl Default for SessionKeys {
    fn default() -> Self {
        Self {
            master: "OWASP_CSRFGUARD_KEY".to_string(),
            pages: "Owasp_CsrfGuard_Pages_Tokens".to_string(),
        }
    }
}

/// In-memory session backed by an attribute bag.
///
/// Attributes are stored as JSON values, so the tokens live alongside any
/// other data the application keeps in the session.
///
/// ```
/// use armature_csrf::{LogicalSession, MemorySession, SessionKeys};
///
/// let session = MemorySession::new("abc", SessionKeys::default());
/// session.set_attribute("user_id", 42).unwrap();
/// session.set_master_token("token".to_string());
///
/// assert_eq!(session.attribute::<u32>("user_id"), Some(42));
/// assert_eq!(
///     session.attribute::<String>("OWASP_CSRFGUARD_KEY").as_deref(),
///     Some("token")
/// );
/// ```
pub struct MemorySession {
    id: String,
    keys: SessionKeys,
    attributes: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemorySession {
    pub fn new(id: impl Into<String>, keys: SessionKeys) -> Self {
        Self {
            id: id.into(),
            keys,
            attributes: RwLock::new(HashMap::new()),
        }
    }

    /// Get a value from the attribute bag.
    pub fn attribute<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.attributes
            .read()
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Set a value in the attribute bag.
    pub fn set_attribute<T: Serialize>(&self, key: &str, value: T) -> serde_json::Result<()> {
        let value = serde_json::to_value(value)?;
        self.attributes.write().insert(key.to_string(), value);
        Ok(())
    }

    /// Remove a value from the attribute bag.
    pub fn remove_attribute(&self, key: &str) -> Option<serde_json::Value> {
        self.attributes.write().remove(key)
    }

    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }
}

impl LogicalSession for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    fn master_token(&self) -> Option<String> {
        self.attribute(&self.keys.master)
    }

    fn set_master_token(&self, token: String) {
        self.attributes
            .write()
            .insert(self.keys.master.clone(), serde_json::Value::String(token));
    }

    fn page_tokens(&self) -> HashMap<String, String> {
        self.attribute(&self.keys.pages).unwrap_or_default()
    }

    fn set_page_tokens(&self, tokens: HashMap<String, String>) {
        let map = tokens
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        self.attributes
            .write()
            .insert(self.keys.pages.clone(), serde_json::Value::Object(map));
    }
}

impl fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Token values stay out of debug output
        f.debug_struct("MemorySession")
            .field("id", &self.id)
            .field("attributes", &self.attributes.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_token_round_trip() {
        let session = MemorySession::new("s1", SessionKeys::default());
        assert_eq!(session.master_token(), None);

        session.set_master_token("abc".to_string());
        assert_eq!(session.master_token().as_deref(), Some("abc"));
    }

    #[test]
    fn test_page_tokens_round_trip() {
        let session = MemorySession::new("s1", SessionKeys::default());
        assert!(session.page_tokens().is_empty());

        let mut tokens = HashMap::new();
        tokens.insert("/admin".to_string(), "P1".to_string());
        session.set_page_tokens(tokens.clone());
        assert_eq!(session.page_tokens(), tokens);
    }

    #[test]
    fn test_custom_keys() {
        let keys = SessionKeys {
            master: "csrf".to_string(),
            pages: "csrf_pages".to_string(),
        };
        let session = MemorySession::new("s1", keys);
        session.set_master_token("abc".to_string());

        assert_eq!(session.attribute::<String>("csrf").as_deref(), Some("abc"));
        assert!(session.attribute::<String>("OWASP_CSRFGUARD_KEY").is_none());
    }

    #[test]
    fn test_remove_attribute() {
        let session = MemorySession::new("s1", SessionKeys::default());
        session.set_master_token("abc".to_string());
        assert!(session.remove_attribute("OWASP_CSRFGUARD_KEY").is_some());
        assert_eq!(session.master_token(), None);
    }

    #[test]
    fn test_debug_hides_tokens() {
        let session = MemorySession::new("s1", SessionKeys::default());
        session.set_master_token("secret-value".to_string());
        assert!(!format!("{:?}", session).contains("secret-value"));
    }
}
