use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

/// The process-wide shared secret that gates the gateway.
///
/// Loaded once at startup and never mutated. Redacted in `Debug`.
#[derive(Clone)]
pub struct Credential(SecretString);

impl Credential {
    pub fn new(secret: SecretString) -> Self {
        Self(secret)
    }

    /// Compare a presented token against the configured secret in constant time.
    pub fn verify(&self, presented: &str) -> bool {
        verify(presented, self.0.expose_secret())
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }

    /// Length in bytes. Length is not secret.
    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }
}

impl From<String> for Credential {
    fn from(s: String) -> Self {
        Self(SecretString::from(s))
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

/// Constant-time token comparison.
///
/// A length mismatch returns `false` without touching the bytes. For equal
/// lengths the comparison time does not depend on where the first
/// differing byte sits.
pub fn verify(presented: &str, expected: &str) -> bool {
    let presented = presented.as_bytes();
    let expected = expected.as_bytes();
    if presented.len() != expected.len() {
        return false;
    }
    bool::from(presented.ct_eq(expected))
}
