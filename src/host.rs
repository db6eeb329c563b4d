//! `Host`: the shared, per-server aggregate of routing, session, and
//! authentication state that every connection consults.

use crate::{
    auth::Authenticator,
    dispatch::RouteHandler,
    errors::ErrorKind,
    limits::{SessionLimits, UploadLimits},
    route::RouteTable,
    session::SessionStore,
    signature::Schema,
    Request, Response,
};
use std::collections::HashMap;

/// Cookie name used for the session id when a [`Host`] isn't configured
/// with [`Host::with_session_cookie_name`].
const DEFAULT_SESSION_COOKIE_NAME: &str = "WEB_SESSION";

/// Everything a connection needs to resolve and authorize a request,
/// shared across every worker task via `Arc`.
pub struct Host {
    pub(crate) routes: RouteTable,
    pub(crate) sessions: SessionStore,
    pub(crate) auth: Authenticator,
    mime_types: HashMap<&'static str, &'static str>,
    pub(crate) document_root: Option<std::path::PathBuf>,
    pub(crate) upload_limits: UploadLimits,
    pub(crate) handlers: HashMap<&'static str, RouteHandler>,
    pub(crate) schemas: HashMap<&'static str, Schema>,
    pub(crate) session_cookie_name: &'static str,
    session_http_only: bool,
    session_same_site: &'static str,
    session_secure: bool,
    pub(crate) default_headers: Vec<(&'static str, &'static str)>,
}

impl Host {
    pub fn new(routes: RouteTable, auth: Authenticator, session_limits: SessionLimits) -> Self {
        let mut handlers: HashMap<&'static str, RouteHandler> = HashMap::new();
        handlers.insert(crate::dispatch::STATIC_FILE_HANDLER, crate::dispatch::static_file_handler);

        Self {
            routes,
            sessions: SessionStore::new(session_limits),
            auth,
            mime_types: default_mime_types(),
            document_root: None,
            upload_limits: UploadLimits::default(),
            handlers,
            schemas: HashMap::new(),
            session_cookie_name: DEFAULT_SESSION_COOKIE_NAME,
            session_http_only: true,
            session_same_site: "Lax",
            session_secure: false,
            default_headers: Vec::new(),
        }
    }

    /// Adds a header applied to every response this engine composes itself
    /// (redirects, routing/auth/upload/xsrf/validation rejections). Handler
    /// responses, including the built-in static file handler, set their own
    /// headers and are not touched by this list.
    pub fn with_default_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.default_headers.push((name, value));
        self
    }

    /// Applies `status` and every configured default header to `response`,
    /// the shared first step of every response [`Host::dispatch`] composes
    /// on its own behalf.
    pub(crate) fn begin(&self, response: &mut Response, status: crate::StatusCode) -> &mut Response {
        response.status(status);
        for (name, value) in &self.default_headers {
            response.header(*name, *value);
        }
        response
    }

    pub fn with_document_root(mut self, root: impl Into<std::path::PathBuf>) -> Self {
        self.document_root = Some(root.into());
        self
    }

    /// Overrides the cookie name used to carry the session id (default
    /// `WEB_SESSION`).
    pub fn with_session_cookie_name(mut self, name: &'static str) -> Self {
        self.session_cookie_name = name;
        self
    }

    /// Sets the `SameSite` attribute on the session cookie (default `Lax`).
    pub fn with_session_same_site(mut self, same_site: &'static str) -> Self {
        self.session_same_site = same_site;
        self
    }

    /// Sets whether the session cookie carries `HttpOnly` (default `true`).
    pub fn with_session_http_only(mut self, http_only: bool) -> Self {
        self.session_http_only = http_only;
        self
    }

    /// Sets whether the session cookie carries `Secure` (default `false`,
    /// since embedded deployments frequently terminate HTTP, not HTTPS).
    pub fn with_session_secure(mut self, secure: bool) -> Self {
        self.session_secure = secure;
        self
    }

    pub fn with_mime_type(mut self, extension: &'static str, content_type: &'static str) -> Self {
        self.mime_types.insert(extension, content_type);
        self
    }

    pub fn with_upload_limits(mut self, limits: UploadLimits) -> Self {
        self.upload_limits = limits;
        self
    }

    /// Registers a named route handler, reachable from [`Route::handler`](crate::route::Route::handler).
    pub fn with_handler(mut self, name: &'static str, handler: RouteHandler) -> Self {
        self.handlers.insert(name, handler);
        self
    }

    /// Registers a named body-validation schema, reachable from
    /// [`Route::validate`](crate::route::Route::validate).
    pub fn with_schema(mut self, name: &'static str, schema: Schema) -> Self {
        self.schemas.insert(name, schema);
        self
    }

    /// Looks up the MIME type for a file extension (without the leading
    /// dot), falling back to `application/octet-stream`.
    pub(crate) fn mime_type(&self, extension: &str) -> &'static str {
        self.mime_types
            .get(extension)
            .copied()
            .unwrap_or("application/octet-stream")
    }

    /// Creates a session for `username` and writes the resulting
    /// `Set-Cookie` header onto `response`.
    ///
    /// Must be called after [`Response::status`] and before any body
    /// method, matching the response builder's own ordering: a handler
    /// logging a user in composes it between those two calls.
    ///
    /// ```no_run
    /// # use embedweb::{RequestContext, Response, StatusCode, Handled};
    /// # async fn handle<'a>(ctx: &'a RequestContext<'a>, resp: &'a mut Response) -> Handled {
    /// resp.status(StatusCode::Ok);
    /// ctx.host.login(resp, "alice").await.ok();
    /// resp.body("logged in")
    /// # }
    /// ```
    pub async fn login(&self, response: &mut Response, username: impl Into<String>) -> Result<(), ErrorKind> {
        let (session_id, _xsrf_token) = self.sessions.create(username).await?;
        self.write_session_cookie(response, &session_id);
        Ok(())
    }

    /// Stores a key/value pair on an existing session, e.g. the route's
    /// resolved role so later requests can authorize without re-deriving it.
    pub async fn set_session_var(&self, session_id: &str, key: impl Into<String>, value: impl Into<String>) {
        self.sessions.set_var(session_id, key, value).await;
    }

    /// Destroys the session identified by the request's session cookie (if
    /// any) and writes a `Set-Cookie` that expires it client-side.
    pub async fn logout(&self, request: &Request, response: &mut Response) {
        if let Some(session_id) = self.session_id_from(request) {
            self.sessions.destroy(&session_id).await;
        }
        self.clear_session_cookie(response);
    }

    /// Attaches the session's XSRF token to the `X-XSRF-TOKEN` response
    /// header. Call this for safe-method requests (GET/HEAD) on
    /// XSRF-protected routes, per [`Route::xsrf`](crate::route::Route::xsrf);
    /// a no-op if `session_id` doesn't name a live session.
    pub async fn attach_xsrf_token(&self, response: &mut Response, session_id: &str) {
        if let Some(token) = self.sessions.xsrf_token(session_id).await {
            response.header("x-xsrf-token", token);
        }
    }

    fn write_session_cookie(&self, response: &mut Response, session_id: &str) {
        let max_age = self.sessions.lifespan().as_secs();
        let mut cookie = format!(
            "{}={session_id}; Max-Age={max_age}; Path=/; SameSite={}",
            self.session_cookie_name, self.session_same_site
        );
        if self.session_http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.session_secure {
            cookie.push_str("; Secure");
        }
        response.header("set-cookie", cookie);
    }

    fn clear_session_cookie(&self, response: &mut Response) {
        let cookie = format!("{}=; Max-Age=0; Path=/", self.session_cookie_name);
        response.header("set-cookie", cookie);
    }

    /// Spawns the background session-expiry sweep that keeps the session
    /// table bounded. Digest nonce expiry doesn't need a background task:
    /// `Authenticator` sweeps its nonce table inline whenever a nonce is
    /// issued or checked. Intended to be called once per `Host`, after it
    /// is wrapped in an `Arc`.
    pub fn spawn_sweepers(self: &std::sync::Arc<Self>) {
        let host = std::sync::Arc::clone(self);
        let interval = host.sessions.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                host.sessions.sweep().await;
            }
        });
    }
}

fn default_mime_types() -> HashMap<&'static str, &'static str> {
    let mut map = HashMap::new();
    map.insert("html", "text/html; charset=utf-8");
    map.insert("htm", "text/html; charset=utf-8");
    map.insert("css", "text/css; charset=utf-8");
    map.insert("js", "text/javascript; charset=utf-8");
    map.insert("json", "application/json");
    map.insert("txt", "text/plain; charset=utf-8");
    map.insert("xml", "application/xml");
    map.insert("svg", "image/svg+xml");
    map.insert("png", "image/png");
    map.insert("jpg", "image/jpeg");
    map.insert("jpeg", "image/jpeg");
    map.insert("gif", "image/gif");
    map.insert("webp", "image/webp");
    map.insert("ico", "image/x-icon");
    map.insert("woff", "font/woff");
    map.insert("woff2", "font/woff2");
    map.insert("wasm", "application/wasm");
    map.insert("pdf", "application/pdf");
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::RoleTable;

    fn make_host() -> Host {
        let auth = Authenticator::new("realm", "secret", RoleTable::new());
        Host::new(RouteTable::new(), auth, SessionLimits::default())
    }

    #[test]
    fn mime_type_falls_back_to_octet_stream() {
        let host = make_host();
        assert_eq!(host.mime_type("html"), "text/html; charset=utf-8");
        assert_eq!(host.mime_type("unknown-ext"), "application/octet-stream");
    }

    #[test]
    fn custom_mime_type_overrides_default() {
        let host = make_host().with_mime_type("html", "text/x-custom");
        assert_eq!(host.mime_type("html"), "text/x-custom");
    }

    fn cookie_from(response: &Response) -> String {
        let text = std::str::from_utf8(response.buffer()).unwrap();
        text.lines()
            .find_map(|line| line.strip_prefix("set-cookie: "))
            .expect("set-cookie header missing")
            .to_string()
    }

    #[tokio::test]
    async fn login_writes_session_cookie_with_configured_attributes() {
        let host = make_host()
            .with_session_cookie_name("MY_SESSION")
            .with_session_secure(true);
        let mut response = Response::new(&crate::limits::RespLimits::default());
        response.status(crate::StatusCode::Ok);

        host.login(&mut response, "alice").await.unwrap();
        let cookie = cookie_from(&response);

        assert!(cookie.starts_with("MY_SESSION="));
        assert!(cookie.contains("Path=/"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=Lax"));
    }

    #[test]
    fn begin_applies_configured_default_headers() {
        let host = make_host().with_default_header("X-Frame-Options", "DENY");
        let mut response = Response::new(&crate::limits::RespLimits::default());
        host.begin(&mut response, crate::StatusCode::NotFound).body("not found");

        let text = std::str::from_utf8(response.buffer()).unwrap();
        assert!(text.contains("x-frame-options: DENY"));
    }

    #[tokio::test]
    async fn logout_clears_the_cookie_and_destroys_the_session() {
        let host = make_host();
        let mut response = Response::new(&crate::limits::RespLimits::default());
        response.status(crate::StatusCode::Ok);
        host.login(&mut response, "alice").await.unwrap();
        let session_id = cookie_from(&response)
            .split(['=', ';'])
            .nth(1)
            .unwrap()
            .to_string();

        assert!(host.sessions.touch(&session_id).await.is_some());

        let raw = format!("GET / HTTP/1.1\r\nHost: localhost\r\nCookie: WEB_SESSION={session_id}\r\n\r\n");
        let mut conn = crate::server::connection::HttpConnection::from_req(raw);
        conn.parse().unwrap();

        let mut logout_response = Response::new(&crate::limits::RespLimits::default());
        logout_response.status(crate::StatusCode::Ok);
        host.logout(&conn.request, &mut logout_response).await;

        assert!(host.sessions.touch(&session_id).await.is_none());
        assert!(cookie_from(&logout_response).contains("Max-Age=0"));
    }
}
