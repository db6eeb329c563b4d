//! Host configuration loading: a serde-deserializable tree mirroring the
//! `web.*` configuration surface, translated into [`limits`](crate::limits)
//! structs and a running [`Host`](crate::host::Host).

use crate::{
    auth::{Authenticator, RoleTable, User},
    crypto::Algorithm,
    host::Host,
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits, SessionLimits, UploadLimits},
    route::{AuthType, CacheControl, Route, RouteTable},
    Method,
};
use serde::Deserialize;
use std::{fmt, path::PathBuf, time::Duration};

#[derive(Debug, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    pub document_root: Option<PathBuf>,
    #[serde(default)]
    pub max_connections: Option<usize>,
    #[serde(default)]
    pub header_count: Option<usize>,
    #[serde(default)]
    pub body_size: Option<usize>,
    #[serde(default)]
    pub socket_read_timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_upload_size: Option<usize>,
    #[serde(default)]
    pub max_uploads: Option<usize>,
    /// `web.routes`: the ordered route table, matched in declaration order.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    /// `web.redirect`: unconditional redirects evaluated as routes ahead
    /// of `routes` (same declaration-order-wins rule).
    #[serde(default)]
    pub redirect: Vec<RedirectConfig>,
    /// `web.headers`: extra headers applied to every response this
    /// engine itself composes (redirects, routing/auth/upload/validation
    /// rejections). Handler-composed responses, including the built-in
    /// static file handler, set their own headers and are not touched.
    #[serde(default)]
    pub headers: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub signatures: SignaturesConfig,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_realm")]
    pub realm: String,
    #[serde(default)]
    pub digest_secret: Option<String>,
    #[serde(default)]
    pub roles: Vec<RoleConfig>,
    /// `web.auth.authType`: the host-wide fallback strategy a route tries
    /// when it carries no `authType` override and session auth didn't
    /// succeed. `None` keeps the coordinator's session-then-Basic default.
    #[serde(default)]
    pub auth_type: Option<String>,
    /// `web.auth.algorithm`: the server's authoritative digest algorithm.
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// `web.auth.requireTlsForBasic`: reject `Basic` credentials arriving
    /// over a plaintext connection.
    #[serde(default)]
    pub require_tls_for_basic: bool,
    /// `web.auth.track`: promote a successful Basic/Digest authentication
    /// into a session, so later requests can use the cheaper cookie path.
    #[serde(default)]
    pub track: bool,
}

fn default_realm() -> String {
    "embedweb".to_string()
}

#[derive(Debug, Deserialize)]
pub struct RoleConfig {
    pub name: String,
    #[serde(default)]
    pub abilities: Vec<String>,
    #[serde(default)]
    pub extends: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserConfig {
    pub username: String,
    pub password_hash: String,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    pub role: String,
}

fn default_algorithm() -> String {
    "SHA-256".to_string()
}

/// `web.routes[]`: mirrors [`Route`] field-for-field, as owned `String`s
/// (routes are only ever built once, at startup, so leaking them to
/// `'static` to populate the zero-copy [`Route`] struct is cheap and
/// matches how the route matcher already leaks test fixture paths).
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    #[serde(rename = "match")]
    pub path: String,
    #[serde(default)]
    pub exact: bool,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub redirect: Option<String>,
    #[serde(default)]
    pub trim: usize,
    #[serde(default)]
    pub validate: Option<String>,
    #[serde(default)]
    pub xsrf: bool,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub auth_type: Option<String>,
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub cache: Option<CacheConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub max_age: Option<u64>,
    #[serde(default)]
    pub directives: Vec<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
}

/// `web.redirect[]`: an unconditional redirect, matched exactly.
#[derive(Debug, Clone, Deserialize)]
pub struct RedirectConfig {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub status: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct SessionsConfig {
    #[serde(default)]
    pub cookie: Option<String>,
    #[serde(default = "default_same_site")]
    pub same_site: String,
    #[serde(default = "default_true")]
    pub http_only: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            cookie: None,
            same_site: default_same_site(),
            http_only: true,
        }
    }
}

fn default_same_site() -> String {
    "Lax".to_string()
}

fn default_true() -> bool {
    true
}

/// `web.signatures`: whether request/response body validation is active
/// and where its schema document lives. Schemas themselves are built in
/// Rust via [`crate::signature::Schema`] and registered with
/// [`Host::with_schema`]; this section only records the application's
/// declared intent, since this engine does not deserialize schemas.
#[derive(Debug, Default, Deserialize)]
pub struct SignaturesConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug)]
pub enum ConfigError {
    Parse(String),
    TlsUnsupported,
    UnknownAlgorithm(String),
    InvalidRoute(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(msg) => write!(f, "failed to parse configuration: {msg}"),
            ConfigError::TlsUnsupported => write!(f, "tls.enabled is not supported by this build"),
            ConfigError::UnknownAlgorithm(name) => write!(f, "unknown password algorithm: {name}"),
            ConfigError::InvalidRoute(msg) => write!(f, "invalid route configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl HostConfig {
    pub fn from_json(src: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(src).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Loads and validates the configuration document at `path`, falling
    /// back to `./web.config.json` when no path is given (mirroring the
    /// process's first CLI argument convention).
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_json(&contents)
    }

    /// `HostConfig::load`, defaulting the path to `./web.config.json` when
    /// the process was given no CLI argument.
    pub fn load_from_args() -> Result<Self, ConfigError> {
        let path = std::env::args().nth(1).unwrap_or_else(|| "web.config.json".to_string());
        Self::load(path)
    }

    /// Validates cross-field constraints not expressible in serde alone.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tls.enabled {
            return Err(ConfigError::TlsUnsupported);
        }
        for user in &self.users {
            if Algorithm::from_bytes(user.algorithm.as_bytes()).is_none() {
                return Err(ConfigError::UnknownAlgorithm(user.algorithm.clone()));
            }
        }
        Ok(())
    }

    pub fn server_limits(&self) -> ServerLimits {
        ServerLimits {
            max_connections: self.web.max_connections.unwrap_or_default().max(1),
            ..ServerLimits::default()
        }
    }

    pub fn connection_limits(&self) -> ConnLimits {
        let mut limits = ConnLimits::default();
        if let Some(ms) = self.web.socket_read_timeout_ms {
            limits.socket_read_timeout = Duration::from_millis(ms);
        }
        limits
    }

    pub fn request_limits(&self) -> ReqLimits {
        let mut limits = ReqLimits::default();
        if let Some(count) = self.web.header_count {
            limits.header_count = count;
        }
        if let Some(size) = self.web.body_size {
            limits.body_size = size;
        }
        limits
    }

    pub fn response_limits(&self) -> RespLimits {
        RespLimits::default()
    }

    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            max_upload_size: self.web.max_upload_size.unwrap_or(8 * 1024 * 1024),
            max_uploads: self.web.max_uploads.unwrap_or(16),
            ..UploadLimits::default()
        }
    }

    /// Builds a [`Host`] from the parsed configuration: role table, user
    /// table, a route table assembled from `web.redirect` then `web.routes`
    /// (in that order, so unconditional redirects always win), and the
    /// session cookie attributes from `web.sessions`.
    pub fn into_host(self) -> Result<Host, ConfigError> {
        self.validate()?;

        let mut roles = RoleTable::new();
        for role in &self.auth.roles {
            let own: Vec<&str> = role.abilities.iter().map(String::as_str).collect();
            let extends: Vec<&str> = role.extends.iter().map(String::as_str).collect();
            roles.add_role(role.name.clone(), &own, &extends);
        }

        let secret = self
            .auth
            .digest_secret
            .clone()
            .unwrap_or_else(crate::crypto::random_id);

        let digest_algorithm = Algorithm::from_bytes(self.auth.algorithm.as_bytes())
            .ok_or_else(|| ConfigError::UnknownAlgorithm(self.auth.algorithm.clone()))?;

        let mut auth = Authenticator::new(self.auth.realm.clone(), secret, roles)
            .with_digest_algorithm(digest_algorithm);
        for user in &self.users {
            let algorithm = Algorithm::from_bytes(user.algorithm.as_bytes())
                .ok_or_else(|| ConfigError::UnknownAlgorithm(user.algorithm.clone()))?;
            auth.add_user(User::new(
                user.username.clone(),
                user.password_hash.clone(),
                algorithm,
                user.role.clone(),
            ));
        }

        let mut routes = RouteTable::new();
        for redirect in &self.web.redirect {
            routes.push(redirect.clone().into_route());
        }
        for route in &self.web.routes {
            routes.push(route.clone().into_route()?);
        }

        let mut host = Host::new(routes, auth, SessionLimits::default());
        if let Some(root) = &self.web.document_root {
            host = host.with_document_root(root.clone());
        }

        if let Some(cookie) = &self.web.sessions.cookie {
            host = host.with_session_cookie_name(leak(cookie.clone()));
        }
        host = host
            .with_session_same_site(leak(self.web.sessions.same_site.clone()))
            .with_session_http_only(self.web.sessions.http_only);

        for (name, value) in &self.web.headers {
            host = host.with_default_header(leak(name.clone()), leak(value.clone()));
        }

        Ok(host)
    }
}

/// Leaks an owned `String` to `'static`. Configuration is parsed once at
/// process startup and lives for the process's lifetime, so this is the
/// same trade the route matcher's own test fixtures already make to hand
/// out zero-copy `&'static str` route data.
fn leak(s: String) -> &'static str {
    Box::leak(s.into_boxed_str())
}

/// Leaks `path` whole, then splits the leaked string into its segments,
/// so every segment borrows from the same single allocation.
fn leaked_path_segments(path: &str) -> Vec<&'static str> {
    let leaked: &'static str = leak(path.to_string());
    leaked.split('/').filter(|s| !s.is_empty()).collect()
}

fn parse_method(name: &str) -> Option<Method> {
    match name.to_ascii_uppercase().as_str() {
        "GET" => Some(Method::Get),
        "PUT" => Some(Method::Put),
        "POST" => Some(Method::Post),
        "HEAD" => Some(Method::Head),
        "PATCH" => Some(Method::Patch),
        "DELETE" => Some(Method::Delete),
        "OPTIONS" => Some(Method::Options),
        _ => None,
    }
}

fn parse_auth_type(name: &str) -> Option<AuthType> {
    match name.to_ascii_lowercase().as_str() {
        "session" => Some(AuthType::Session),
        "basic" => Some(AuthType::Basic),
        "digest" => Some(AuthType::Digest),
        _ => None,
    }
}

impl RedirectConfig {
    /// An unconditional redirect, expressed as an exact-match, any-method
    /// [`Route`] whose `redirect` short-circuits before handler dispatch.
    fn into_route(self) -> Route {
        Route {
            path: leaked_path_segments(&self.from),
            exact: true,
            methods: Vec::new(),
            role: None,
            handler: "",
            redirect: Some(leak(self.to)),
            trim_prefix: 0,
            validate: None,
            xsrf: false,
            auth_type: None,
            compressed: false,
            stream: false,
            cache_control: None,
            digest_algorithm: None,
        }
    }
}

impl RouteConfig {
    fn into_route(self) -> Result<Route, ConfigError> {
        let methods = self
            .methods
            .iter()
            .map(|m| parse_method(m).ok_or_else(|| ConfigError::InvalidRoute(format!("unknown method: {m}"))))
            .collect::<Result<Vec<_>, _>>()?;

        let auth_type = self
            .auth_type
            .as_deref()
            .map(|a| parse_auth_type(a).ok_or_else(|| ConfigError::InvalidRoute(format!("unknown authType: {a}"))))
            .transpose()?;

        let digest_algorithm = self
            .algorithm
            .as_deref()
            .map(|a| {
                Algorithm::from_bytes(a.as_bytes())
                    .ok_or_else(|| ConfigError::InvalidRoute(format!("unknown algorithm: {a}")))
            })
            .transpose()?;

        let handler = match (&self.redirect, &self.handler) {
            (Some(_), _) => "",
            (None, Some(handler)) => leak(handler.clone()),
            (None, None) => {
                return Err(ConfigError::InvalidRoute(format!("route {} has no handler", self.path)))
            }
        };

        Ok(Route {
            path: leaked_path_segments(&self.path),
            exact: self.exact,
            methods,
            role: self.role.map(leak),
            handler,
            redirect: self.redirect.map(leak),
            trim_prefix: self.trim,
            validate: self.validate.map(leak),
            xsrf: self.xsrf,
            auth_type,
            compressed: self.compressed,
            stream: self.stream,
            cache_control: self.cache.map(CacheConfig::into_cache_control),
            digest_algorithm,
        })
    }
}

impl CacheConfig {
    fn into_cache_control(self) -> CacheControl {
        CacheControl {
            max_age: self.max_age,
            directives: self.directives.into_iter().map(leak).collect(),
            extensions: self.extensions.into_iter().map(leak).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let config = HostConfig::from_json(
            r#"{
                "web": { "listen": "0.0.0.0:9000" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.web.listen, "0.0.0.0:9000");
        assert_eq!(config.auth.realm, "embedweb");
    }

    #[test]
    fn validate_rejects_tls_enabled() {
        let config = HostConfig::from_json(r#"{ "tls": { "enabled": true } }"#).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::TlsUnsupported)));
    }

    #[test]
    fn validate_rejects_unknown_algorithm() {
        let config = HostConfig::from_json(
            r#"{
                "users": [
                    {
                        "username": "alice",
                        "password_hash": "deadbeef",
                        "algorithm": "bcrypt",
                        "role": "admin"
                    }
                ]
            }"#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::UnknownAlgorithm(_))));
    }
}
