//! Secret wrapper for credential values

use std::fmt;
use zeroize::Zeroize;

/// Maximum number of leading characters of a key shown in logs and errors.
pub const KEY_HINT_LEN: usize = 10;

/// Sensitive value - redacted in Debug/Display/logs, zeroized on drop
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// Render a credential as a truncated prefix followed by `...`.
///
/// Shows at most `KEY_HINT_LEN` characters and never more than half of the
/// key, so short keys are not revealed in full.
pub fn key_hint(key: &str) -> String {
    let visible = (key.chars().count() / 2).min(KEY_HINT_LEN);
    let prefix: String = key.chars().take(visible).collect();
    format!("{prefix}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_redacts_debug_and_display() {
        let secret = Secret::new(String::from("sk-live-0123456789"));
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
        assert_eq!(format!("{}", secret), "[REDACTED]");
    }

    #[test]
    fn secret_exposes_value() {
        let secret = Secret::new(String::from("sk-live-0123456789"));
        assert_eq!(secret.expose(), "sk-live-0123456789");
    }

    #[test]
    fn key_hint_truncates_long_keys() {
        assert_eq!(key_hint("sk-live-0123456789abcdef"), "sk-live-01...");
    }

    #[test]
    fn key_hint_never_reveals_short_keys() {
        assert_eq!(key_hint("k1"), "k...");
        assert_eq!(key_hint("abcd"), "ab...");
        assert_eq!(key_hint(""), "...");
    }

    #[test]
    fn key_hint_counts_characters_not_bytes() {
        assert_eq!(key_hint("ключключ"), "ключ...");
    }
}
