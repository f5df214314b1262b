//! In-memory session token table with lazy expiry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::RngCore;

/// Default session lifetime, one hour.
pub const SESSION_TTL: Duration = Duration::from_secs(3600);

/// Issues, validates and expires opaque authentication tokens.
///
/// Tokens are 32 hex characters (128 bits) drawn from the OS random source;
/// on ESP-IDF that is the hardware RNG. Expiry is enforced lazily on the
/// next validity check, never by a background sweep, and re-validating a
/// token does not extend it. There is no cap on concurrent sessions: this
/// is a single-admin-identity system and the table prunes itself.
pub struct SessionManager {
    sessions: HashMap<String, Instant>,
    ttl: Duration,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SESSION_TTL)
    }
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            ttl,
        }
    }

    /// Generates a fresh token and records `now + ttl` as its expiry.
    pub fn create_session(&mut self) -> String {
        self.create_session_at(Instant::now())
    }

    /// False if the token is absent; an expired entry is evicted and
    /// reported invalid.
    pub fn is_session_valid(&mut self, token: &str) -> bool {
        self.is_session_valid_at(token, Instant::now())
    }

    /// Unconditional removal; a no-op if absent.
    pub fn remove_session(&mut self, token: &str) {
        self.sessions.remove(token);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn create_session_at(&mut self, now: Instant) -> String {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let mut token = String::with_capacity(32);
        for b in bytes {
            token.push_str(&format!("{b:02x}"));
        }
        self.sessions.insert(token.clone(), now + self.ttl);
        token
    }

    pub(crate) fn is_session_valid_at(&mut self, token: &str, now: Instant) -> bool {
        match self.sessions.get(token) {
            None => false,
            Some(&expiry) if now > expiry => {
                self.sessions.remove(token);
                false
            }
            Some(_) => true,
        }
    }
}
