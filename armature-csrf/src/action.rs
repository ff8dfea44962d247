//! Actions run when a request is rejected.
//!
//! Actions never write responses. They log, or hand the filter layer a
//! [`Directive`] describing what the response should be. Which actions run is
//! configured by name; names are resolved through an [`ActionRegistry`] when
//! a guard snapshot is built.
//!
//! | Name                | Parameters                                   | Directive   |
//! |---------------------|----------------------------------------------|-------------|
//! | `log`               | none                                         | none        |
//! | `error`             | `code` (default 403), `message`              | `Status`    |
//! | `redirect`          | `page` (required)                            | `Redirect`  |
//! | `request-attribute` | `name` (default `csrf-error`)                | `Attribute` |

use crate::config::ActionSpec;
use crate::error::{ConfigError, ConfigResult};
use crate::validator::RejectReason;
use http::{Method, StatusCode};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// What the filter layer should do with a rejected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Respond with this status and message
    Status { code: StatusCode, message: String },
    /// Redirect the client
    Redirect { location: String },
    /// Expose the failure to downstream handlers under `name`
    Attribute { name: String, value: String },
}

/// Details of a rejected request passed to actions.
#[derive(Debug, Clone, Copy)]
pub struct RejectionContext<'a> {
    pub uri: &'a str,
    pub method: &'a Method,
    pub reason: RejectReason,
    pub token_name: &'a str,
}

/// An action run for every rejected request.
pub trait RejectAction: Send + Sync + fmt::Debug {
    /// Registry key of the action
    fn name(&self) -> &'static str;

    fn execute(&self, ctx: &RejectionContext<'_>) -> Option<Directive>;
}

/// Builds an action from its configured parameters.
pub type ActionConstructor =
    Arc<dyn Fn(&HashMap<String, String>) -> ConfigResult<Arc<dyn RejectAction>> + Send + Sync>;

/// Maps action names to constructors.
///
/// ```
/// use armature_csrf::{ActionRegistry, ActionSpec};
///
/// let registry = ActionRegistry::new();
/// let actions = registry
///     .resolve(&[
///         ActionSpec::new("log"),
///         ActionSpec::new("redirect").with_param("page", "/csrf-error"),
///     ])
///     .unwrap();
/// assert_eq!(actions.len(), 2);
///
/// assert!(registry.resolve(&[ActionSpec::new("redirect")]).is_err());
/// assert!(registry.resolve(&[ActionSpec::new("email")]).is_err());
/// ```
#[derive(Clone)]
pub struct ActionRegistry {
    constructors: HashMap<String, ActionConstructor>,
}

impl ActionRegistry {
    /// Registry with the built-in actions.
    pub fn new() -> Self {
        Self::empty()
            .with(LogAction::NAME, |_| Ok(Arc::new(LogAction)))
            .with(ErrorAction::NAME, |params| {
                Ok(Arc::new(ErrorAction::from_params(params)?))
            })
            .with(RedirectAction::NAME, |params| {
                Ok(Arc::new(RedirectAction::from_params(params)?))
            })
            .with(RequestAttributeAction::NAME, |params| {
                Ok(Arc::new(RequestAttributeAction::from_params(params)))
            })
    }

    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Register a constructor under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&HashMap<String, String>) -> ConfigResult<Arc<dyn RejectAction>>
            + Send
            + Sync
            + 'static,
    {
        self.constructors
            .insert(name.to_ascii_lowercase(), Arc::new(constructor));
    }

    pub fn with<F>(mut self, name: &str, constructor: F) -> Self
    where
        F: Fn(&HashMap<String, String>) -> ConfigResult<Arc<dyn RejectAction>>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, constructor);
        self
    }

    /// Build the action described by `spec`.
    pub fn create(&self, spec: &ActionSpec) -> ConfigResult<Arc<dyn RejectAction>> {
        let constructor = self
            .constructors
            .get(&spec.name.to_ascii_lowercase())
            .ok_or_else(|| ConfigError::UnknownAction(spec.name.clone()))?;
        constructor(&spec.params)
    }

    /// Build every configured action, in order.
    pub fn resolve(&self, specs: &[ActionSpec]) -> ConfigResult<Vec<Arc<dyn RejectAction>>> {
        specs.iter().map(|spec| self.create(spec)).collect()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.constructors.keys().collect();
        names.sort();
        f.debug_struct("ActionRegistry").field("actions", &names).finish()
    }
}

/// Logs the rejected request.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAction;

impl LogAction {
    pub const NAME: &'static str = "log";
}

impl RejectAction for LogAction {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn execute(&self, ctx: &RejectionContext<'_>) -> Option<Directive> {
        warn!(
            uri = ctx.uri,
            method = %ctx.method,
            reason = %ctx.reason,
            token_name = ctx.token_name,
            "potential cross-site request forgery (CSRF) attack thwarted"
        );
        None
    }
}

/// Asks for an error response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorAction {
    pub code: StatusCode,
    pub message: String,
}

impl ErrorAction {
    pub const NAME: &'static str = "error";

    fn from_params(params: &HashMap<String, String>) -> ConfigResult<Self> {
        let code = match params.get("code") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .ok()
                .and_then(|code| StatusCode::from_u16(code).ok())
                .ok_or_else(|| ConfigError::Invalid {
                    field: "actions",
                    message: format!("error action has an invalid status code {:?}", raw),
                })?,
            None => StatusCode::FORBIDDEN,
        };
        let message = params
            .get("message")
            .cloned()
            .unwrap_or_else(|| "Security violation".to_string());
        Ok(Self { code, message })
    }
}

impl RejectAction for ErrorAction {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn execute(&self, _ctx: &RejectionContext<'_>) -> Option<Directive> {
        Some(Directive::Status {
            code: self.code,
            message: self.message.clone(),
        })
    }
}

/// Asks for a redirect to an error page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectAction {
    pub page: String,
}

impl RedirectAction {
    pub const NAME: &'static str = "redirect";

    fn from_params(params: &HashMap<String, String>) -> ConfigResult<Self> {
        let page = params
            .get("page")
            .map(|page| page.trim())
            .filter(|page| !page.is_empty())
            .ok_or(ConfigError::Missing("actions.redirect.page"))?;
        Ok(Self {
            page: page.to_string(),
        })
    }
}

impl RejectAction for RedirectAction {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn execute(&self, _ctx: &RejectionContext<'_>) -> Option<Directive> {
        Some(Directive::Redirect {
            location: self.page.clone(),
        })
    }
}

/// Exposes the rejection reason to downstream handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAttributeAction {
    pub attribute: String,
}

impl RequestAttributeAction {
    pub const NAME: &'static str = "request-attribute";

    fn from_params(params: &HashMap<String, String>) -> Self {
        Self {
            attribute: params
                .get("name")
                .cloned()
                .unwrap_or_else(|| "csrf-error".to_string()),
        }
    }
}

impl RejectAction for RequestAttributeAction {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn execute(&self, ctx: &RejectionContext<'_>) -> Option<Directive> {
        Some(Directive::Attribute {
            name: self.attribute.clone(),
            value: ctx.reason.to_string(),
        })
    }
}
