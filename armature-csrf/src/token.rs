use crate::error::Result;
use crate::prng::SecureRandomSource;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use parking_lot::Mutex;
use std::fmt;
use subtle::ConstantTimeEq;

/// Default number of characters in a generated token.
pub const DEFAULT_TOKEN_LENGTH: usize = 32;

/// Generate a random token of exactly `length` characters.
///
/// The characters come from the URL-safe base64 alphabet. Each character
/// carries six bits of entropy.
pub fn generate_token(rng: &mut dyn SecureRandomSource, length: usize) -> Result<String> {
    let mut bytes = vec![0u8; (length * 3).div_ceil(4)];
    rng.try_fill_bytes(&mut bytes)?;

    let mut value = URL_SAFE_NO_PAD.encode(&bytes);
    value.truncate(length);
    Ok(value)
}

/// Compare a supplied token with the expected one in constant time.
pub fn tokens_match(expected: &str, supplied: &str) -> bool {
    expected.as_bytes().ct_eq(supplied.as_bytes()).into()
}

/// Thread-safe token generator with a fixed token length.
pub struct TokenGenerator {
    rng: Mutex<Box<dyn SecureRandomSource>>,
    length: usize,
}

impl TokenGenerator {
    /// Create a generator drawing from `rng`.
    pub fn new(rng: Box<dyn SecureRandomSource>, length: usize) -> Self {
        Self {
            rng: Mutex::new(rng),
            length,
        }
    }

    /// Create a generator from a concrete random source.
    pub fn from_rng<R: SecureRandomSource + 'static>(rng: R, length: usize) -> Self {
        Self::new(Box::new(rng), length)
    }

    /// Configured token length.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Generate a new token.
    pub fn generate(&self) -> Result<String> {
        let mut rng = self.rng.lock();
        generate_token(&mut **rng, self.length)
    }
}

impl fmt::Debug for TokenGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGenerator")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}
