//! Route table: maps a method + path to a handler name, with redirect,
//! auth, and validation metadata attached per route.

use crate::{crypto::Algorithm, Method, Url};

/// Authentication strategy a route requires, overriding the server-wide
/// default resolution order (session first, then Basic/Digest fallback).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    Session,
    Basic,
    Digest,
}

/// `Cache-Control` directives a route wants applied to its responses,
/// optionally restricted to a set of file extensions (empty means "all").
#[derive(Debug, Clone, Default)]
pub struct CacheControl {
    pub max_age: Option<u64>,
    pub directives: Vec<&'static str>,
    pub extensions: Vec<&'static str>,
}

impl CacheControl {
    /// Whether these directives apply to a file with the given extension
    /// (without the leading dot).
    pub(crate) fn applies_to(&self, extension: &str) -> bool {
        self.extensions.is_empty() || self.extensions.iter().any(|e| *e == extension)
    }

    /// Renders the `Cache-Control` header value, or `None` if there's
    /// nothing to say (no max-age and no extra directives).
    pub(crate) fn header_value(&self) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();
        if let Some(max_age) = self.max_age {
            parts.push(format!("max-age={max_age}"));
        }
        parts.extend(self.directives.iter().map(|d| d.to_string()));
        (!parts.is_empty()).then(|| parts.join(", "))
    }
}

/// A single routing rule.
#[derive(Debug, Clone)]
pub struct Route {
    /// Path segments this route matches against (no leading/trailing slash parts).
    pub path: Vec<&'static str>,
    /// If `true`, `path` must match exactly; otherwise it is a prefix match.
    pub exact: bool,
    /// Methods this route accepts. Empty means "any method" (used for
    /// global redirects and static-file prefixes).
    pub methods: Vec<Method>,
    /// Role required to reach the handler (`None` means public).
    pub role: Option<&'static str>,
    /// Name of the handler this route dispatches to.
    pub handler: &'static str,
    /// Redirect target; when set, the matcher emits a redirect instead of
    /// dispatching to `handler`.
    pub redirect: Option<&'static str>,
    /// Number of leading path segments to strip before calling the handler
    /// (used by prefix routes serving a subtree, e.g. static file roots).
    pub trim_prefix: usize,
    /// Require the request body to pass signature validation before dispatch.
    pub validate: Option<&'static str>,
    /// Require a matching XSRF token for unsafe methods on this route.
    pub xsrf: bool,
    /// Auth strategy override; `None` uses the server default resolution.
    pub auth_type: Option<AuthType>,
    /// Only attempt `.br`/`.gz` precompressed variant negotiation for this
    /// route when `true`.
    pub compressed: bool,
    /// Stream the file body through the response's chunked `BodyWriter`
    /// instead of reading it into memory in one shot.
    pub stream: bool,
    /// `Cache-Control` directives to apply to this route's file responses.
    pub cache_control: Option<CacheControl>,
    /// Digest algorithm override for this route; `None` uses the host's
    /// configured authoritative algorithm.
    pub digest_algorithm: Option<Algorithm>,
}

impl Route {
    /// Whether `segments`/`method` match this route.
    pub(crate) fn matches(&self, url: &Url, method: Method) -> bool {
        if !self.methods.is_empty() && !self.methods.contains(&method) {
            return false;
        }

        let pattern: Vec<&[u8]> = self.path.iter().map(|s| s.as_bytes()).collect();

        if self.exact {
            url.matches(&pattern)
        } else {
            url.starts_with(&pattern)
        }
    }
}

/// Ordered collection of [`Route`]s, matched in declaration order.
///
/// Declaration order matters: the first matching route wins, mirroring
/// how most static-file-plus-API servers resolve overlapping prefixes.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

/// Outcome of a route lookup.
pub(crate) enum Matched<'a> {
    Route(&'a Route),
    /// A route matched the path but not the method: the caller should
    /// respond `405` with `Allow` built from these accepted methods.
    MethodMismatch(Vec<Method>),
    NotFound,
}

impl RouteTable {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn push(&mut self, route: Route) -> &mut Self {
        self.routes.push(route);
        self
    }

    pub(crate) fn find(&self, url: &Url, method: Method) -> Matched<'_> {
        let pattern_matches = |route: &Route| {
            let pattern: Vec<&[u8]> = route.path.iter().map(|s| s.as_bytes()).collect();
            if route.exact {
                url.matches(&pattern)
            } else {
                url.starts_with(&pattern)
            }
        };

        let mut allowed = Vec::new();
        let mut saw_path_match = false;

        for route in &self.routes {
            if !pattern_matches(route) {
                continue;
            }
            saw_path_match = true;

            if route.methods.is_empty() || route.methods.contains(&method) {
                return Matched::Route(route);
            }
            allowed.extend(route.methods.iter().copied());
        }

        if saw_path_match {
            Matched::MethodMismatch(allowed)
        } else {
            Matched::NotFound
        }
    }
}
