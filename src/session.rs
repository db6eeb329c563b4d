//! In-memory session store and XSRF token handling.
//!
//! Sessions are keyed by a random 256-bit id handed to the client as a
//! `Set-Cookie`. Storage is a single table shared by every connection
//! (guarded by a `tokio::sync::Mutex`, per the multi-threaded runtime note
//! in the design doc), not per-connection state.

use crate::{crypto, errors::ErrorKind, limits::SessionLimits};
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

/// A single logged-in session: an expiring string -> string cache plus
/// the XSRF token minted for it.
#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub(crate) xsrf_token: String,
    vars: HashMap<String, String>,
    expires_at: Instant,
    lifespan: Duration,
}

impl Session {
    fn new(username: String, lifespan: Duration) -> Self {
        Self {
            username,
            xsrf_token: crypto::random_id(),
            vars: HashMap::new(),
            expires_at: Instant::now() + lifespan,
            lifespan,
        }
    }

    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get_var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    fn touch(&mut self) {
        self.expires_at = Instant::now() + self.lifespan;
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Shared table of live sessions, keyed by session id.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    limits: SessionLimits,
}

impl SessionStore {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            limits,
        }
    }

    /// Creates a new session for `username`, returning its id (to be sent
    /// as a `Set-Cookie` value) and XSRF token.
    pub async fn create(&self, username: impl Into<String>) -> Result<(String, String), ErrorKind> {
        let mut sessions = self.sessions.lock().await;
        self.sweep_locked(&mut sessions);

        if sessions.len() >= self.limits.max_sessions {
            return Err(ErrorKind::SessionStoreFull);
        }

        let id = crypto::random_id();
        let session = Session::new(username.into(), self.limits.lifespan);
        let xsrf = session.xsrf_token.clone();
        sessions.insert(id.clone(), session);

        Ok((id, xsrf))
    }

    /// Looks up a session by id, refreshing its expiry on success.
    pub async fn touch(&self, id: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();

        let session = sessions.get_mut(id)?;
        if session.is_expired(now) {
            sessions.remove(id);
            return None;
        }
        session.touch();
        Some(session.clone())
    }

    pub async fn set_var(&self, id: &str, key: impl Into<String>, value: impl Into<String>) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(id) {
            session.set_var(key, value);
        }
    }

    pub async fn destroy(&self, id: &str) {
        self.sessions.lock().await.remove(id);
    }

    /// Verifies a client-supplied XSRF token against the session's token
    /// using constant-time comparison.
    pub async fn verify_xsrf(&self, id: &str, token: &[u8]) -> bool {
        let sessions = self.sessions.lock().await;
        match sessions.get(id) {
            Some(session) => crypto::ct_eq(session.xsrf_token.as_bytes(), token),
            None => false,
        }
    }

    /// Mints a fresh XSRF token for the session, invalidating the old one.
    /// Called after a failed XSRF check, so a leaked or stale token can't
    /// be retried.
    pub async fn rotate_xsrf(&self, id: &str) {
        if let Some(session) = self.sessions.lock().await.get_mut(id) {
            session.xsrf_token = crypto::random_id();
        }
    }

    /// Drops every expired session. Intended to be driven by a background
    /// sweep task on `limits.sweep_interval`, mirroring the nonce-sweep
    /// pattern used for digest auth.
    pub async fn sweep(&self) {
        let mut sessions = self.sessions.lock().await;
        self.sweep_locked(&mut sessions);
    }

    pub(crate) fn sweep_interval(&self) -> Duration {
        self.limits.sweep_interval
    }

    pub(crate) fn lifespan(&self) -> Duration {
        self.limits.lifespan
    }

    /// Reads back a live session's XSRF token without refreshing its
    /// expiry (unlike [`touch`](Self::touch)).
    pub(crate) async fn xsrf_token(&self, id: &str) -> Option<String> {
        self.sessions.lock().await.get(id).map(|s| s.xsrf_token.clone())
    }

    fn sweep_locked(&self, sessions: &mut HashMap<String, Session>) {
        let now = Instant::now();
        sessions.retain(|_, session| !session.is_expired(now));
    }
}

/// Parses a `Cookie` header value into name/value pairs, per
/// [RFC 6265 §5.4](https://www.rfc-editor.org/rfc/rfc6265#section-5.4): pairs are
/// separated by `; `, tolerating a missing space and surrounding quotes.
pub(crate) fn parse_cookies(header: &[u8]) -> Vec<(&[u8], &[u8])> {
    let mut pairs = Vec::new();

    for pair in header.split(|&b| b == b';') {
        let pair = trim_ascii(pair);
        if pair.is_empty() {
            continue;
        }

        let Some(eq) = pair.iter().position(|&b| b == b'=') else {
            continue;
        };

        let name = trim_ascii(&pair[..eq]);
        let value = trim_ascii(unquote(&pair[eq + 1..]));
        if !name.is_empty() {
            pairs.push((name, value));
        }
    }

    pairs
}

pub(crate) fn cookie_value<'a>(pairs: &[(&'a [u8], &'a [u8])], name: &[u8]) -> Option<&'a [u8]> {
    pairs.iter().find(|&&(n, _)| n == name).map(|&(_, v)| v)
}

fn trim_ascii(mut s: &[u8]) -> &[u8] {
    while let [b' ', rest @ ..] = s {
        s = rest;
    }
    while let [rest @ .., b' '] = s {
        s = rest;
    }
    s
}

fn unquote(s: &[u8]) -> &[u8] {
    if s.len() >= 2 && s[0] == b'"' && s[s.len() - 1] == b'"' {
        &s[1..s.len() - 1]
    } else {
        s
    }
}
