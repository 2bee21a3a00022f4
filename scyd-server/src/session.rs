//! Login sessions and password hashing.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::http::HeaderMap;
use axum::http::header::COOKIE;
use rand::RngCore;
use rand::rngs::OsRng;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::UserConfig;

pub const SESSION_COOKIE: &str = "session_id";

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Upper bound on a session's lifetime (one year).
pub const MAX_SESSION_TTL: Duration = Duration::from_secs(365 * 24 * 3600);

#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub expires_at: Instant,
}

impl Session {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-memory session table. Sessions do not survive a restart.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.sessions.read().map(|s| s.len()).unwrap_or(0);
        write!(f, "SessionStore({count} sessions, ttl {:?})", self.ttl)
    }
}

impl SessionStore {
    /// `ttl` is clamped to [`MAX_SESSION_TTL`].
    pub fn new(ttl: Duration) -> Self {
        if ttl > MAX_SESSION_TTL {
            warn!(requested = ?ttl, max = ?MAX_SESSION_TTL, "session ttl clamped");
        }
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: ttl.min(MAX_SESSION_TTL),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Open a session for `username` and return its id.
    pub fn create(&self, username: &str) -> String {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let id = hex::encode(bytes);

        let session = Session {
            username: username.to_owned(),
            expires_at: Instant::now() + self.ttl,
        };
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), session);
        id
    }

    /// Resolve a session id. Expired sessions count as absent.
    pub fn authorize(&self, id: &str) -> Option<Session> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(id)
            .filter(|session| !session.is_expired(Instant::now()))
            .cloned()
    }

    pub fn remove(&self, id: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    /// Drop expired sessions. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(now));
        before - sessions.len()
    }

    /// Sweep expired sessions every hour for as long as the server runs.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = store.sweep();
                if removed > 0 {
                    debug!(removed, "expired sessions swept");
                }
            }
        })
    }
}

/// Check a username/password pair against the configured accounts.
pub fn check_credentials(users: &UserConfig, username: &str, password: &str) -> bool {
    users
        .users
        .get(username)
        .is_some_and(|account| verify_password(&account.password_hash, password))
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!(error = %e, "configured password hash is not a valid PHC string");
            false
        }
    }
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default().hash_password(password.as_bytes(), &salt)?.to_string())
}

/// Session id from the request's `Cookie` header, if present.
pub fn session_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_owned())
        .filter(|value| !value.is_empty())
}

/// `Set-Cookie` value that stores `id` for `max_age`.
pub fn session_cookie(id: &str, max_age: Duration, secure: bool) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE}={id}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        max_age.as_secs()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that clears the session cookie.
pub fn clear_session_cookie(secure: bool) -> String {
    session_cookie("", Duration::ZERO, secure)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::UserAccount;
    use axum::http::HeaderValue;

    #[test]
    fn created_sessions_authorize_until_removed() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = store.create("alice");
        assert_eq!(id.len(), 64);
        assert_eq!(store.authorize(&id).unwrap().username, "alice");
        assert!(store.authorize("bogus").is_none());

        assert!(store.remove(&id));
        assert!(!store.remove(&id));
        assert!(store.authorize(&id).is_none());
    }

    #[test]
    fn expired_sessions_are_rejected_and_swept() {
        let store = SessionStore::new(Duration::ZERO);
        let id = store.create("alice");
        assert!(store.authorize(&id).is_none());
        assert_eq!(store.sweep(), 1);
        assert_eq!(store.sweep(), 0);
    }

    #[test]
    fn oversized_ttl_is_clamped() {
        let store = SessionStore::new(Duration::from_secs(u64::MAX));
        assert_eq!(store.ttl(), MAX_SESSION_TTL);
        let id = store.create("alice");
        assert!(store.authorize(&id).is_some());
        let cookie = session_cookie(&id, store.ttl(), false);
        assert!(cookie.ends_with(&format!("Max-Age={}", MAX_SESSION_TTL.as_secs())));
    }

    #[test]
    fn session_ids_are_unique() {
        let store = SessionStore::new(Duration::from_secs(60));
        assert_ne!(store.create("a"), store.create("a"));
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&hash, "hunter2"));
        assert!(!verify_password(&hash, "hunter3"));
        assert!(!verify_password("not-a-phc-string", "hunter2"));
    }

    #[test]
    fn credentials_require_known_user() {
        let mut users = UserConfig::default();
        users.users.insert(
            "admin".into(),
            UserAccount { password_hash: hash_password("secret").unwrap() },
        );
        assert!(check_credentials(&users, "admin", "secret"));
        assert!(!check_credentials(&users, "admin", "wrong"));
        assert!(!check_credentials(&users, "nobody", "secret"));
    }

    #[test]
    fn cookie_header_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; session_id=abc123; x=1"));
        assert_eq!(session_id_from(&headers).as_deref(), Some("abc123"));

        headers.insert(COOKIE, HeaderValue::from_static("session_id="));
        assert!(session_id_from(&headers).is_none());
        assert!(session_id_from(&HeaderMap::new()).is_none());
    }

    #[test]
    fn cookie_attributes() {
        let cookie = session_cookie("abc", Duration::from_secs(90), true);
        assert_eq!(cookie, "session_id=abc; HttpOnly; SameSite=Lax; Path=/; Max-Age=90; Secure");
        assert!(clear_session_cookie(false).contains("Max-Age=0"));
    }
}
