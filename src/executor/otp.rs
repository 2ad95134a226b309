//! Latest one-time passcode per bookie account.

use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

/// Newest code wins. A code stays stored across failed attempts and is
/// consumed once the sidecar has answered definitively.
#[derive(Default)]
pub struct OtpStore {
    codes: DashMap<String, SecretString>,
}

impl OtpStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bookie: &str, otp: String) {
        let replaced = self
            .codes
            .insert(bookie.to_string(), SecretString::new(otp))
            .is_some();
        debug!(bookie, replaced, "OTP stored");
    }

    /// Current code for `bookie`, left in place.
    pub fn peek(&self, bookie: &str) -> Option<SecretString> {
        self.codes.get(bookie).map(|code| code.value().clone())
    }

    /// Drop `used` for `bookie` unless a newer code has arrived since.
    pub fn consume(&self, bookie: &str, used: &SecretString) -> bool {
        self.codes
            .remove_if(bookie, |_, current| current.expose_secret() == used.expose_secret())
            .is_some()
    }

    pub fn has(&self, bookie: &str) -> bool {
        self.codes.contains_key(bookie)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Expose a taken code for a request body.
pub fn reveal(code: &SecretString) -> &str {
    code.expose_secret().as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_wins_and_consume_removes() {
        let store = OtpStore::new();
        store.put("A", "111111".into());
        store.put("A", "222222".into());
        assert_eq!(store.len(), 1);

        let code = store.peek("A").unwrap();
        assert_eq!(reveal(&code), "222222");
        assert!(store.has("A"));

        assert!(store.consume("A", &code));
        assert!(!store.has("A"));
        assert!(store.peek("A").is_none());
    }

    #[test]
    fn test_consume_keeps_newer_code() {
        let store = OtpStore::new();
        store.put("A", "111111".into());
        let used = store.peek("A").unwrap();
        store.put("A", "333333".into());

        assert!(!store.consume("A", &used));
        assert_eq!(reveal(&store.peek("A").unwrap()), "333333");
    }

    #[test]
    fn test_debug_does_not_leak() {
        let store = OtpStore::new();
        store.put("A", "987654".into());
        let code = store.peek("A").unwrap();
        assert!(!format!("{code:?}").contains("987654"));
    }
}
