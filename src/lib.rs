//! embedweb - zero-allocation HTTP/1.1 server engine for embedded services
//!
//! A performance-oriented HTTP server with comprehensive configuration
//! for memory management, connection handling, and protocol support.
//! Designed for constrained devices requiring fine-grained control over
//! resources: fixed per-connection buffers, session/auth/upload handling,
//! and a JSON-schema request validator, all built on the same
//! zero-allocation parsing core.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: Full protocol with persistent connections and chunked encoding
//! - **HTTP/1.0**: Basic protocol support for legacy clients and simple requests
//! - **HTTP/0.9+**: [High-performance variant with keep-alive and query support](limits::Http09Limits)
//!
//! # Features
//!
//! ## 🔒 Security & Protection
//! - **Built-in DoS/DDoS protection** - enabled by default, with no performance penalty.
//! - **Fully configurable limits and timeouts** for requests, responses, and connections.
//! - **Custom connection filtering** - implement the [`ConnectionFilter`] trait to
//!   reject unwanted connections at the TCP level.
//!
//! ## 🚀 Performance & Memory
//! - **Zero-allocation** - no memory allocations after server startup.
//! - **Pre-allocated memory for each connection** - linear and transparent scaling.
//!
//! ## 🌐 Protocol & Management
//! - **Full HTTP stack** - `HTTP/1.1`, `HTTP/1.0`, [`HTTP/0.9+`
//!   ](https://docs.rs/embedweb/latest/embedweb/limits/struct.Http09Limits.html)
//!   with keep-alive.
//! - **Automatic protocol detection for each request** - keep-alive eliminates
//!   the need for manual protocol selection.
//! - **Storing data between requests** - ability to store data between requests in a
//!   single connection using the [`ConnectionData`] trait.
//!
//! ## 🏭 Production Ready
//! - **Graceful performance degradation** - automatic 503 responses when overloaded.
//! - [**Custom error format**
//!   ](https://docs.rs/embedweb/latest/embedweb/limits/struct.ServerLimits.html#structfield.json_errors) -
//!   structured JSON (with codes/descriptions) or a plain HTTP response.
//! - **Resource protection** - automatic closure of connections exceeding set limits.
//!
//! # Quick Start
//!
//! ## 1. Installation
//!
//! Add `embedweb` and [`tokio`](https://crates.io/crates/tokio) to your `Cargo.toml`:
//!
//! ```bash
//! cargo add embedweb tokio --features tokio/full
//! ```
//! Or manually:
//! ```toml
//! [dependencies]
//! embedweb = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ## 2. Usage example
//!
//! Routes, auth, sessions, uploads, and body validation are all resolved by
//! [`Host::dispatch`], wrapped as a [`Handler`] via [`Engine`]:
//!
//! ```no_run
//! use embedweb::{
//!     route::{Route, RouteTable}, Authenticator, Engine, Host, RoleTable,
//!     RequestContext, Response, Handled, StatusCode, Server,
//! };
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! fn hello<'a>(
//!     _ctx: &'a RequestContext<'a>,
//!     resp: &'a mut Response,
//! ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Handled> + Send + 'a>> {
//!     Box::pin(async move { resp.status(StatusCode::Ok).body("Hello World!") })
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut routes = RouteTable::new();
//!     routes.push(Route {
//!         path: vec![],
//!         exact: true,
//!         methods: vec![],
//!         role: None,
//!         handler: "hello",
//!         redirect: None,
//!         trim_prefix: 0,
//!         validate: None,
//!         xsrf: false,
//!         auth_type: None,
//!         compressed: false,
//!         stream: false,
//!         cache_control: None,
//!         digest_algorithm: None,
//!     });
//!
//!     let auth = Authenticator::new("embedweb", "change-me", RoleTable::new());
//!     let host = Host::new(routes, auth, Default::default()).with_handler("hello", hello);
//!     let host = Arc::new(host);
//!     host.spawn_sweepers();
//!
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler(Engine::new(host))
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//!
//! Or load the same setup from a config file with [`HostConfig`]:
//!
//! ```no_run
//! use embedweb::HostConfig;
//!
//! let config = HostConfig::load("web.config.json").unwrap();
//! let host = config.into_host().unwrap();
//! ```
//!
//! # Use Cases
//!
//! - **Embedded HTTP endpoints** - configuration portals, IoT device APIs
//! - **Resource-constrained environments** - predictable memory usage
//! - **Internal APIs** - security-conscious defaults
//! - **Performance-critical applications** - zero-allocation design
//! - **Legacy system integration** - HTTP/1.0 and HTTP/0.9+ compatibility
pub(crate) mod http {
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
}
pub(crate) mod auth;
pub(crate) mod config;
pub(crate) mod crypto;
pub mod dispatch;
pub(crate) mod errors;
pub(crate) mod file;
pub(crate) mod host;
pub mod limits;
pub(crate) mod logging;
pub mod route;
pub(crate) mod session;
pub mod signature;
pub(crate) mod upload;

pub use crate::{
    auth::{Authenticator, RoleTable, User},
    config::{ConfigError, HostConfig},
    crypto::Algorithm,
    dispatch::{Engine, RequestContext, RouteHandler},
    host::Host,
    http::{
        query,
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Handled, Response,
        },
        types::{Method, StatusCode, Url, Version},
    },
    logging::{init_logging, init_logging_with_level},
    route::{AuthType, Route, RouteTable},
    server::{
        connection::{ConnectionData, ConnectionFilter},
        server_impl::{Handler, Server, ServerBuilder},
    },
    signature::{DropRule, ElementSpec, Field, FieldType, Schema, ValidationContext},
    upload::Upload,
};

#[doc(hidden)]
pub fn run_test<F: FnOnce(&Request, &mut Response) -> Handled>(f: F) {
    f(
        &Request::new(&crate::limits::ReqLimits::default()),
        &mut Response::new(&crate::limits::RespLimits::default()),
    );
}

#[doc(hidden)]
#[macro_export]
macro_rules! impt_default_handler {
    ($name:ident) => {
        use embedweb::{Handled, Handler, Request, Response, StatusCode};
        struct $name;

        // `<()>` to check functionality
        impl Handler<()> for $name {
            async fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
                resp.status(StatusCode::Ok).body("Hello world!")
            }
        }
    };
}
