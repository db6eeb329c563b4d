//! Authentication: session cookies, HTTP Basic, and HTTP Digest (RFC 7616),
//! plus the role/ability model routes are checked against.

use crate::{
    crypto::{self, Algorithm},
    limits::DigestLimits,
    route::AuthType,
};
use std::{
    collections::{HashMap, HashSet},
    time::Instant,
};
use tokio::sync::Mutex;

/// A configured account: username, pre-hashed password, and the single
/// role it belongs to.
#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    pub(crate) password_hash: String,
    pub(crate) algorithm: Algorithm,
    pub role: String,
}

impl User {
    pub fn new(
        username: impl Into<String>,
        password_hash: impl Into<String>,
        algorithm: Algorithm,
        role: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password_hash: password_hash.into(),
            algorithm,
            role: role.into(),
        }
    }

    fn verify_password(&self, password: &[u8]) -> bool {
        let candidate = self.algorithm.hex_digest(password);
        crypto::ct_eq(candidate.as_bytes(), self.password_hash.as_bytes())
    }
}

/// Role -> abilities map with single-level inheritance (`extends`), per
/// the role/ability model in the data model. Resolved once at
/// construction into a flat ability set per role.
#[derive(Debug, Clone, Default)]
pub struct RoleTable {
    abilities: HashMap<String, HashSet<String>>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a role with its directly-granted abilities and the roles
    /// it extends (whose abilities are unioned in, recursively, at the
    /// time this call resolves them — register parents before children).
    pub fn add_role(&mut self, name: impl Into<String>, own: &[&str], extends: &[&str]) -> &mut Self {
        let mut set: HashSet<String> = own.iter().map(|s| s.to_string()).collect();
        for parent in extends {
            if let Some(parent_set) = self.abilities.get(*parent) {
                set.extend(parent_set.iter().cloned());
            }
        }
        self.abilities.insert(name.into(), set);
        self
    }

    /// `webUserCan`: whether `role` carries `ability`.
    pub fn can(&self, role: &str, ability: &str) -> bool {
        self.abilities
            .get(role)
            .is_some_and(|set| set.contains(ability))
    }
}

/// A single outstanding digest nonce: issued at `issued_at`, tracked for
/// replay via the highest `nc` value seen, plus the opaque value handed
/// out alongside it (the client must echo both back unchanged).
struct NonceEntry {
    issued_at: Instant,
    max_nc: u64,
    opaque: String,
}

/// Per-`Host` authentication coordinator: user table, role table, and the
/// digest nonce table with its replay-protection sweep.
pub struct Authenticator {
    users: HashMap<String, User>,
    roles: RoleTable,
    realm: String,
    digest_secret: String,
    /// The server's authoritative digest algorithm; a client-supplied
    /// `algorithm=` that disagrees is rejected with a fresh challenge.
    digest_algorithm: Algorithm,
    nonces: Mutex<HashMap<String, NonceEntry>>,
    digest_limits: DigestLimits,
}

pub(crate) enum Outcome {
    Ok {
        username: String,
        role: String,
        /// Set only when the request authenticated via a session cookie;
        /// lets the dispatch pipeline attach the session's XSRF token to
        /// the response without a second cookie lookup.
        session_id: Option<String>,
    },
    Challenge(Challenge),
    Forbidden,
}

pub(crate) enum Challenge {
    Basic,
    Digest {
        nonce: String,
        opaque: String,
        algorithm: &'static str,
    },
}

impl Authenticator {
    pub fn new(realm: impl Into<String>, digest_secret: impl Into<String>, roles: RoleTable) -> Self {
        Self {
            users: HashMap::new(),
            roles,
            realm: realm.into(),
            digest_secret: digest_secret.into(),
            digest_algorithm: Algorithm::Sha256,
            nonces: Mutex::new(HashMap::new()),
            digest_limits: DigestLimits::default(),
        }
    }

    /// Overrides the server's authoritative digest algorithm (default
    /// `SHA-256`). A client-supplied `algorithm=` that disagrees with this
    /// gets a fresh challenge rather than being authenticated against it.
    pub fn with_digest_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.digest_algorithm = algorithm;
        self
    }

    pub fn add_user(&mut self, user: User) -> &mut Self {
        self.users.insert(user.username.clone(), user);
        self
    }

    pub(crate) fn can(&self, role: &str, ability: &str) -> bool {
        self.roles.can(role, ability)
    }

    /// The live role carried by `username`'s account, or `None` if no such
    /// account exists anymore. Used to re-verify a session-cached role
    /// against the current user table on every request, so a downgraded
    /// or deleted account doesn't keep its old privileges until the
    /// session expires on its own.
    pub(crate) fn current_role(&self, username: &str) -> Option<&str> {
        self.users.get(username).map(|user| user.role.as_str())
    }

    /// Verifies an `Authorization: Basic` header value (already stripped of
    /// the `Basic ` prefix).
    fn verify_basic(&self, credentials_b64: &[u8]) -> Option<&User> {
        let decoded = crypto::b64_decode_standard(credentials_b64)?;
        let colon = decoded.iter().position(|&b| b == b':')?;
        let (username, password) = (&decoded[..colon], &decoded[colon + 1..]);
        let username = std::str::from_utf8(username).ok()?;

        let user = self.users.get(username)?;
        user.verify_password(password).then_some(user)
    }

    pub(crate) fn check_basic(&self, header: Option<&[u8]>) -> Outcome {
        let Some(header) = header.and_then(|h| h.strip_prefix(b"Basic ")) else {
            return Outcome::Challenge(Challenge::Basic);
        };

        match self.verify_basic(header) {
            Some(user) => Outcome::Ok {
                username: user.username.clone(),
                role: user.role.clone(),
                session_id: None,
            },
            None => Outcome::Challenge(Challenge::Basic),
        }
    }

    /// HMAC binding a nonce's timestamp and random id to this realm and
    /// `algorithm`, so a tampered or forged nonce fails
    /// [`Self::verify_nonce_mac`]. `algorithm` is whatever was in force
    /// when the nonce was minted (the route override, or the host
    /// default), and must be supplied unchanged on validation.
    fn nonce_mac(&self, ts: &str, id: &str, algorithm: Algorithm) -> [u8; 32] {
        crypto::hmac_sha256(
            self.digest_secret.as_bytes(),
            format!("{}:{}:{}:{}", self.realm, algorithm.as_str(), ts, id).as_bytes(),
        )
    }

    /// Issues a fresh digest nonce and opaque value: the nonce is
    /// `base64(hex_ts:random_id:<raw 32-byte hmac>)`. If the nonce table is
    /// already at capacity after sweeping expired entries, the minted
    /// nonce is still returned but not registered, so its first real use
    /// will find no table entry and be rejected — overflow thus refuses
    /// new first-uses rather than evicting other live nonces.
    pub(crate) async fn issue_digest_nonce(&self, algorithm: Algorithm) -> (String, String) {
        let ts = format!("{:x}", unix_timestamp());
        let id = crypto::random_id();
        let mac = self.nonce_mac(&ts, &id, algorithm);

        let mut payload = format!("{ts}:{id}:").into_bytes();
        payload.extend_from_slice(&mac);
        let nonce = crypto::b64_encode(&payload);
        let opaque = crypto::random_id();

        let mut nonces = self.nonces.lock().await;
        self.sweep_nonces_locked(&mut nonces);
        if nonces.len() < self.digest_limits.max_nonces {
            nonces.insert(
                nonce.clone(),
                NonceEntry {
                    issued_at: Instant::now(),
                    max_nc: 0,
                    opaque: opaque.clone(),
                },
            );
        }

        (nonce, opaque)
    }

    /// Verifies a digest `Authorization` header per RFC 7616: nonce
    /// format/expiry/HMAC integrity, replay protection via `nc`, URI
    /// binding, opaque echoing, and the HA1/HA2/response computation.
    pub(crate) async fn check_digest(
        &self,
        header: Option<&[u8]>,
        method: &[u8],
        request_uri: &[u8],
        algorithm_override: Option<Algorithm>,
    ) -> Outcome {
        let algorithm = algorithm_override.unwrap_or(self.digest_algorithm);

        let Some(params) = header
            .and_then(|h| h.strip_prefix(b"Digest "))
            .map(parse_digest_params)
        else {
            return self.digest_challenge(algorithm).await;
        };

        let (
            Some(username),
            Some(realm),
            Some(nonce),
            Some(uri),
            Some(response),
            Some(nc),
            Some(cnonce),
            Some(qop),
            Some(opaque),
        ) = (
            params.get("username"),
            params.get("realm"),
            params.get("nonce"),
            params.get("uri"),
            params.get("response"),
            params.get("nc"),
            params.get("cnonce"),
            params.get("qop"),
            params.get("opaque"),
        )
        else {
            return self.digest_challenge(algorithm).await;
        };

        if let Some(client_algorithm) = params.get("algorithm") {
            if !client_algorithm.eq_ignore_ascii_case(algorithm.as_str()) {
                return self.digest_challenge(algorithm).await;
            }
        }

        if realm.as_bytes() != self.realm.as_bytes() {
            return self.digest_challenge(algorithm).await;
        }

        let uri_bound = uri.as_bytes() == request_uri
            || request_uri
                .strip_prefix(b"/")
                .is_some_and(|trimmed| trimmed == uri.as_bytes());
        if !uri_bound {
            self.nonces.lock().await.remove(nonce);
            return self.digest_challenge(algorithm).await;
        }

        if !self.validate_nonce(nonce, nc, algorithm).await {
            return self.digest_challenge(algorithm).await;
        }

        if !self.verify_opaque(nonce, opaque).await {
            return self.digest_challenge(algorithm).await;
        }

        let Some(user) = self.users.get(username) else {
            return self.digest_challenge(algorithm).await;
        };

        let ha1 = &user.password_hash;
        let ha2 = user
            .algorithm
            .hex_digest(format!("{}:{}", str_lossy(method), uri).as_bytes());
        let expected = user.algorithm.hex_digest(
            format!("{ha1}:{nonce}:{nc}:{cnonce}:{qop}:{ha2}").as_bytes(),
        );

        if crypto::ct_eq(expected.as_bytes(), response.as_bytes()) {
            Outcome::Ok {
                username: user.username.clone(),
                role: user.role.clone(),
                session_id: None,
            }
        } else {
            self.digest_challenge(algorithm).await
        }
    }

    async fn digest_challenge(&self, algorithm: Algorithm) -> Outcome {
        let (nonce, opaque) = self.issue_digest_nonce(algorithm).await;
        Outcome::Challenge(Challenge::Digest {
            nonce,
            opaque,
            algorithm: algorithm.as_str(),
        })
    }

    /// Recomputes and checks a nonce's embedded HMAC, rejecting any nonce
    /// that wasn't genuinely issued by this `Authenticator` (forged or
    /// tampered with).
    fn verify_nonce_mac(&self, nonce: &str, algorithm: Algorithm) -> bool {
        let Some(payload) = crypto::b64_decode(nonce.as_bytes()) else {
            return false;
        };
        if payload.len() <= 32 {
            return false;
        }
        let (prefix, mac) = payload.split_at(payload.len() - 32);
        let Some(prefix) = prefix.strip_suffix(b":") else {
            return false;
        };
        let Some(colon) = prefix.iter().position(|&b| b == b':') else {
            return false;
        };
        let (Ok(ts), Ok(id)) = (
            std::str::from_utf8(&prefix[..colon]),
            std::str::from_utf8(&prefix[colon + 1..]),
        ) else {
            return false;
        };

        crypto::ct_eq(&self.nonce_mac(ts, id, algorithm), mac)
    }

    async fn verify_opaque(&self, nonce: &str, opaque: &str) -> bool {
        match self.nonces.lock().await.get(nonce) {
            Some(entry) => crypto::ct_eq(entry.opaque.as_bytes(), opaque.as_bytes()),
            None => false,
        }
    }

    /// Checks nonce authenticity (embedded HMAC), freshness, and enforces
    /// monotonically increasing `nc` per nonce (replay protection).
    async fn validate_nonce(&self, nonce: &str, nc: &str, algorithm: Algorithm) -> bool {
        let Ok(nc) = u64::from_str_radix(nc, 16) else {
            return false;
        };
        if !self.verify_nonce_mac(nonce, algorithm) {
            return false;
        }

        let mut nonces = self.nonces.lock().await;
        self.sweep_nonces_locked(&mut nonces);

        let Some(entry) = nonces.get_mut(nonce) else {
            return false;
        };

        if entry.issued_at.elapsed() > self.digest_limits.nonce_lifetime {
            nonces.remove(nonce);
            return false;
        }

        if nc <= entry.max_nc {
            return false;
        }
        entry.max_nc = nc;
        true
    }

    /// Drops expired entries. Never evicts live nonces to make room for a
    /// new one — table overflow is handled by refusing to register the
    /// new nonce in [`Self::issue_digest_nonce`], not by evicting others.
    fn sweep_nonces_locked(&self, nonces: &mut HashMap<String, NonceEntry>) {
        let lifetime = self.digest_limits.nonce_lifetime;
        nonces.retain(|_, entry| entry.issued_at.elapsed() <= lifetime);
    }

    pub(crate) fn realm(&self) -> &str {
        &self.realm
    }
}

fn str_lossy(bytes: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Parses `key=value, key2="value2"` pairs from a Digest `Authorization`
/// header, per RFC 7616 §3.4.
fn parse_digest_params(src: &[u8]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let text = String::from_utf8_lossy(src);

    for part in text.split(',') {
        let part = part.trim();
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        map.insert(key.trim().to_string(), value.to_string());
    }

    map
}

/// Resolves which auth strategy to try first for a route, per the
/// session-first-then-Basic/Digest-fallback decision.
pub(crate) fn resolve_order(route_override: Option<AuthType>) -> &'static [AuthType] {
    match route_override {
        Some(AuthType::Session) => &[AuthType::Session],
        Some(AuthType::Basic) => &[AuthType::Basic],
        Some(AuthType::Digest) => &[AuthType::Digest],
        None => &[AuthType::Session, AuthType::Basic],
    }
}
