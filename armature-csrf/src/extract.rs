//! Locating the supplied token in a request.

use crate::config::CsrfConfig;
use http::HeaderMap;
use http::header::CONTENT_TYPE;

/// Pulls the supplied CSRF token out of request parts.
///
/// Sources are tried in order: the `token_name` header, the fallback header,
/// the query string, then the body (`application/x-www-form-urlencoded` or
/// `application/json`).
///
/// ```
/// use armature_csrf::{CsrfConfig, TokenExtractor};
/// use http::HeaderMap;
///
/// let extractor = TokenExtractor::from_config(&CsrfConfig::default());
/// let headers = HeaderMap::new();
///
/// let token = extractor.extract(&headers, Some("a=1&OWASP-CSRFTOKEN=abc"), None);
/// assert_eq!(token.as_deref(), Some("abc"));
/// ```
#[derive(Debug, Clone)]
pub struct TokenExtractor {
    token_name: String,
    header_name: String,
}

impl TokenExtractor {
    pub fn new(token_name: impl Into<String>, header_name: impl Into<String>) -> Self {
        Self {
            token_name: token_name.into(),
            header_name: header_name.into(),
        }
    }

    pub fn from_config(config: &CsrfConfig) -> Self {
        Self::new(config.token_name.clone(), config.header_name.clone())
    }

    pub fn token_name(&self) -> &str {
        &self.token_name
    }

    /// Find the supplied token, if any.
    pub fn extract(&self, headers: &HeaderMap, query: Option<&str>, body: Option<&[u8]>) -> Option<String> {
        self.header_value(headers, &self.token_name)
            .or_else(|| self.header_value(headers, &self.header_name))
            .or_else(|| query.and_then(|q| self.query_value(q)))
            .or_else(|| body.and_then(|b| self.body_value(headers, b)))
    }

    fn header_value(&self, headers: &HeaderMap, name: &str) -> Option<String> {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn query_value(&self, query: &str) -> Option<String> {
        let query = query.strip_prefix('?').unwrap_or(query);
        self.find_pair(serde_urlencoded::from_str::<Vec<(String, String)>>(query).ok()?)
    }

    fn body_value(&self, headers: &HeaderMap, body: &[u8]) -> Option<String> {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            let json = serde_json::from_slice::<serde_json::Value>(body).ok()?;
            return json
                .get(&self.token_name)
                .and_then(|token| token.as_str())
                .map(|token| token.to_string());
        }

        if content_type.starts_with("application/x-www-form-urlencoded") {
            return self.find_pair(serde_urlencoded::from_bytes::<Vec<(String, String)>>(body).ok()?);
        }

        None
    }

    fn find_pair(&self, pairs: Vec<(String, String)>) -> Option<String> {
        pairs
            .into_iter()
            .find(|(key, _)| *key == self.token_name)
            .map(|(_, value)| value)
    }
}
