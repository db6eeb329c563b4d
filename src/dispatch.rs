//! The request pipeline: redirects, routing, authentication, XSRF checks,
//! upload demuxing, body validation, and final dispatch to a named
//! handler function.
//!
//! This is the concrete [`Handler`] this crate ships: a `Route` names a
//! handler by string, registered against a [`Host`] with
//! [`Host::with_handler`]. Everything upstream of the handler call is
//! shared, generic pipeline logic; the handler itself is where
//! application behavior lives.

use crate::{
    auth::{self, Challenge, Outcome},
    file,
    host::Host,
    route::Matched,
    server::{connection::ConnectionData, server_impl::Handler},
    session, upload,
    upload::Upload,
    Handled, Method, Request, Response, StatusCode,
};
use std::{future::Future, pin::Pin, sync::Arc};

/// Name reserved for the built-in static-file handler every [`Host`]
/// registers; route this to serve files from `Host`'s document root.
pub const STATIC_FILE_HANDLER: &str = "embedweb.static_file";

/// Serves the request path (after `Route::trim_prefix`) relative to the
/// host's document root. GET/HEAD are conditional and range-aware;
/// PUT/DELETE are conditional on `If-Match`/`If-None-Match`.
pub(crate) fn static_file_handler<'a>(
    ctx: &'a RequestContext<'a>,
    response: &'a mut Response,
) -> Pin<Box<dyn Future<Output = Handled> + Send + 'a>> {
    Box::pin(async move {
        let Some(root) = &ctx.host.document_root else {
            return response.status(StatusCode::NotFound).body("no document root configured");
        };
        let Some(path) = file::resolve_path(root, &ctx.segments) else {
            return response.status(StatusCode::NotFound).body("not found");
        };

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        let mime = ctx.host.mime_type(extension);

        match ctx.request.method() {
            Method::Get | Method::Head => {
                let options = file::ServeOptions {
                    extension,
                    compressed: ctx.route.compressed,
                    stream: ctx.route.stream,
                    cache_control: ctx.route.cache_control.as_ref(),
                };
                file::serve(ctx.request, response, &path, mime, options)
            }
            Method::Put => {
                let body = ctx.request.body().unwrap_or(b"");
                file::put(ctx.request, response, &path, body)
            }
            Method::Delete => file::delete(ctx.request, response, &path),
            _ => response.status(StatusCode::MethodNotAllowed).body("method not allowed"),
        }
    })
}

/// Read-only request context handed to a registered route handler.
pub struct RequestContext<'a> {
    pub request: &'a Request,
    pub host: &'a Host,
    pub route: &'a crate::route::Route,
    pub username: Option<String>,
    pub role: Option<String>,
    /// Path segments remaining after `Route::trim_prefix` is applied.
    pub segments: Vec<&'a [u8]>,
    pub uploads: Vec<Upload>,
    /// URL-decoded non-file `multipart/form-data` fields (parts with no
    /// `filename=`), keyed by field name.
    pub form: std::collections::HashMap<String, String>,
    pub validated: Option<serde_json::Value>,
    /// Set when the request authenticated via a session cookie. Pass to
    /// [`Host::attach_xsrf_token`] on a safe method to surface the
    /// session's token, or to [`Host::set_session_var`]/[`Host::logout`].
    pub session_id: Option<String>,
}

pub type RouteHandler = for<'a> fn(
    &'a RequestContext<'a>,
    &'a mut Response,
) -> Pin<Box<dyn Future<Output = Handled> + Send + 'a>>;

/// Wraps a [`Host`] as a concrete [`Handler`], so it can be passed
/// straight to [`crate::ServerBuilder::handler`].
pub struct Engine {
    host: Arc<Host>,
}

impl Engine {
    pub fn new(host: Arc<Host>) -> Self {
        Self { host }
    }
}

impl<S: ConnectionData> Handler<S> for Engine {
    async fn handle(&self, _: &mut S, request: &Request, response: &mut Response) -> Handled {
        self.host.dispatch(request, response).await
    }
}

const UNSAFE_METHODS: [Method; 4] = [Method::Post, Method::Put, Method::Patch, Method::Delete];

impl Host {
    pub(crate) async fn dispatch(&self, request: &Request, response: &mut Response) -> Handled {
        let matched = self.routes.find(request.url(), request.method());

        let route = match matched {
            Matched::Route(route) => route,
            Matched::MethodMismatch(allowed) => {
                let list = allowed
                    .iter()
                    .map(|m| m.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                return self
                    .begin(response, StatusCode::MethodNotAllowed)
                    .header("Allow", list)
                    .body("method not allowed");
            }
            Matched::NotFound => return self.begin(response, StatusCode::NotFound).body("not found"),
        };

        if let Some(target) = route.redirect {
            return self
                .begin(response, StatusCode::Found)
                .header("Location", target)
                .body("");
        }

        let (username, role, session_id) = match self.authorize(route, request).await {
            Ok(identity) => identity,
            Err(outcome) => return self.challenge_response(response, outcome),
        };

        let (uploads, form) = match self.maybe_demux_uploads(request) {
            Ok(parts) => parts,
            Err(crate::errors::ErrorKind::InvalidUpload) => {
                return self.begin(response, StatusCode::BadRequest).body("invalid upload filename")
            }
            Err(_) => return self.begin(response, StatusCode::UploadTooLarge).body("upload rejected"),
        };

        if route.xsrf && UNSAFE_METHODS.contains(&request.method()) {
            if !self.verify_xsrf(request, &form).await {
                return self.begin(response, StatusCode::BadRequest).body("xsrf token mismatch");
            }
        }

        let validated = match self.maybe_validate_body(route, request, role.as_deref()) {
            Ok(value) => value,
            Err(_) => {
                return self
                    .begin(response, StatusCode::BadRequest)
                    .body("request body failed validation")
            }
        };

        let segments = request
            .url()
            .path_segments()
            .iter()
            .copied()
            .skip(route.trim_prefix)
            .collect();

        let ctx = RequestContext {
            request,
            host: self,
            route,
            username,
            role,
            segments,
            uploads,
            form,
            validated,
            session_id,
        };

        let Some(handler) = self.handlers.get(route.handler) else {
            return self.begin(response, StatusCode::NotFound).body("handler not registered");
        };

        handler(&ctx, response).await
    }

    async fn authorize(
        &self,
        route: &crate::route::Route,
        request: &Request,
    ) -> Result<(Option<String>, Option<String>, Option<String>), Outcome> {
        let Some(required_role) = route.role else {
            return Ok((None, None, None));
        };

        let mut last_challenge = Challenge::Basic;

        for strategy in auth::resolve_order(route.auth_type) {
            let outcome = match strategy {
                crate::route::AuthType::Session => self.try_session(request).await,
                crate::route::AuthType::Basic => self.auth.check_basic(request.header(b"authorization")),
                crate::route::AuthType::Digest => {
                    self.auth
                        .check_digest(
                            request.header(b"authorization"),
                            request.method().as_str().as_bytes(),
                            request.url().target(),
                            route.digest_algorithm,
                        )
                        .await
                }
            };

            match outcome {
                Outcome::Ok { username, role, session_id } => {
                    if role == required_role || self.auth.can(&role, required_role) {
                        return Ok((Some(username), Some(role), session_id));
                    }
                    return Err(Outcome::Forbidden);
                }
                Outcome::Challenge(challenge) => last_challenge = challenge,
                Outcome::Forbidden => return Err(Outcome::Forbidden),
            }
        }

        Err(Outcome::Challenge(last_challenge))
    }

    async fn try_session(&self, request: &Request) -> Outcome {
        let Some(session_id) = self.session_id_from(request) else {
            return Outcome::Challenge(Challenge::Basic);
        };

        let Some(session) = self.sessions.touch(&session_id).await else {
            return Outcome::Challenge(Challenge::Basic);
        };

        let cached_role = session.get_var("role").unwrap_or_default();
        match self.auth.current_role(&session.username) {
            Some(live_role) if live_role == cached_role => Outcome::Ok {
                username: session.username.clone(),
                role: live_role.to_string(),
                session_id: Some(session_id),
            },
            // The account was deleted or its role changed since login: the
            // cached role can no longer be trusted.
            _ => Outcome::Forbidden,
        }
    }

    /// Extracts the session id from the request's cookie header under
    /// the configured `session_cookie_name`.
    pub(crate) fn session_id_from(&self, request: &Request) -> Option<String> {
        let cookie_header = request.header(b"cookie")?;
        let pairs = session::parse_cookies(cookie_header);
        let session_id = session::cookie_value(&pairs, self.session_cookie_name.as_bytes())?;
        std::str::from_utf8(session_id).ok().map(str::to_string)
    }

    /// Checks the session's XSRF token against the `X-XSRF-TOKEN` header,
    /// falling back to an `xsrf` multipart form field or query parameter.
    /// Rotates the session's token on any failure (missing session,
    /// missing token, or mismatch) so a leaked token can't be retried.
    async fn verify_xsrf(&self, request: &Request, form: &std::collections::HashMap<String, String>) -> bool {
        let Some(session_id) = self.session_id_from(request) else {
            return false;
        };

        let token = request
            .header(b"x-xsrf-token")
            .map(<[u8]>::to_vec)
            .or_else(|| form.get("xsrf").map(|v| v.as_bytes().to_vec()))
            .or_else(|| request.url().query(b"xsrf").map(<[u8]>::to_vec));

        let ok = match token {
            Some(token) => self.sessions.verify_xsrf(&session_id, &token).await,
            None => false,
        };

        if !ok {
            self.sessions.rotate_xsrf(&session_id).await;
        }
        ok
    }

    fn maybe_demux_uploads(
        &self,
        request: &Request,
    ) -> Result<(Vec<Upload>, std::collections::HashMap<String, String>), crate::errors::ErrorKind> {
        let Some(content_type) = request.header(b"content-type") else {
            return Ok((Vec::new(), std::collections::HashMap::new()));
        };
        if !content_type.starts_with(b"multipart/form-data") {
            return Ok((Vec::new(), std::collections::HashMap::new()));
        }
        let Some(body) = request.body() else {
            return Ok((Vec::new(), std::collections::HashMap::new()));
        };

        upload::demux(content_type, body, &self.upload_limits)
    }

    fn maybe_validate_body(
        &self,
        route: &crate::route::Route,
        request: &Request,
        role: Option<&str>,
    ) -> Result<Option<serde_json::Value>, ()> {
        let Some(schema_name) = route.validate else {
            return Ok(None);
        };
        let schema = self.schemas.get(schema_name).ok_or(())?;
        let body = request.body().unwrap_or(b"");
        let value: serde_json::Value = serde_json::from_slice(body).map_err(|_| ())?;
        let validated = schema
            .validate(&value, role, crate::signature::ValidationContext::Request)
            .map_err(|_| ())?;
        Ok(Some(validated))
    }

    fn challenge_response(&self, response: &mut Response, outcome: Outcome) -> Handled {
        match outcome {
            Outcome::Forbidden => self.begin(response, StatusCode::Forbidden).body("insufficient privilege"),
            Outcome::Challenge(Challenge::Basic) => self
                .begin(response, StatusCode::Unauthorized)
                .header("WWW-Authenticate", format!("Basic realm=\"{}\"", self.auth.realm()))
                .body("authentication required"),
            Outcome::Challenge(Challenge::Digest { nonce, opaque, algorithm }) => self
                .begin(response, StatusCode::Unauthorized)
                .header(
                    "WWW-Authenticate",
                    format!(
                        "Digest realm=\"{}\", qop=\"auth\", algorithm={algorithm}, nonce=\"{nonce}\", opaque=\"{opaque}\"",
                        self.auth.realm()
                    ),
                )
                .body("authentication required"),
            Outcome::Ok { .. } => unreachable!("Ok outcome never reaches challenge_response"),
        }
    }
}
