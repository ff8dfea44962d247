//! Secure random sources and the registry that resolves them by name.

use crate::error::{ConfigError, ConfigResult};
use rand::rngs::{OsRng, StdRng};
use rand::{CryptoRng, RngCore, SeedableRng};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A cryptographically secure random number generator that can be moved
/// between threads.
pub trait SecureRandomSource: RngCore + CryptoRng + Send {}

impl<T: RngCore + CryptoRng + Send> SecureRandomSource for T {}

/// Constructor stored in a [`PrngRegistry`].
pub type PrngConstructor =
    Arc<dyn Fn() -> ConfigResult<Box<dyn SecureRandomSource>> + Send + Sync>;

/// Name of the default random source.
pub const DEFAULT_PRNG: &str = "ChaCha";

/// Maps random-source names to constructors.
///
/// Names are matched case-insensitively. Resolution happens once, when a
/// guard snapshot is built; an unknown name is a configuration error.
///
/// ```
/// use armature_csrf::PrngRegistry;
///
/// let registry = PrngRegistry::new();
/// assert!(registry.create("ChaCha").is_ok());
/// assert!(registry.create("OsRng").is_ok());
/// assert!(registry.create("SHA1PRNG").is_err());
/// ```
#[derive(Clone)]
pub struct PrngRegistry {
    constructors: HashMap<String, PrngConstructor>,
}

impl PrngRegistry {
    /// Registry with the built-in sources: `ChaCha` (alias `StdRng`) and `OsRng`.
    pub fn new() -> Self {
        Self::empty()
            .with("ChaCha", seeded_std_rng)
            .with("StdRng", seeded_std_rng)
            .with("OsRng", || Ok(Box::new(OsRng)))
    }

    /// Registry without any sources.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Register a constructor under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn() -> ConfigResult<Box<dyn SecureRandomSource>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(name.to_ascii_lowercase(), Arc::new(constructor));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<F>(mut self, name: &str, constructor: F) -> Self
    where
        F: Fn() -> ConfigResult<Box<dyn SecureRandomSource>> + Send + Sync + 'static,
    {
        self.register(name, constructor);
        self
    }

    /// Instantiate the source registered under `name`.
    pub fn create(&self, name: &str) -> ConfigResult<Box<dyn SecureRandomSource>> {
        let constructor = self
            .constructors
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| ConfigError::UnknownPrng(name.to_string()))?;
        constructor()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(&name.to_ascii_lowercase())
    }
}

impl Default for PrngRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PrngRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.constructors.keys().collect();
        names.sort();
        f.debug_struct("PrngRegistry").field("sources", &names).finish()
    }
}

fn seeded_std_rng() -> ConfigResult<Box<dyn SecureRandomSource>> {
    let rng = StdRng::from_rng(OsRng).map_err(|e| ConfigError::Invalid {
        field: "prng",
        message: format!("failed to seed from the operating system: {}", e),
    })?;
    Ok(Box::new(rng))
}
