//! Structured logging setup via `tracing`/`tracing-subscriber`.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

/// Initializes a global `tracing` subscriber reading level filters from
/// `RUST_LOG`, defaulting to `info` when unset.
pub fn init_logging() {
    init_logging_with_level("info");
}

/// Same as [`init_logging`] but with an explicit default filter directive,
/// still overridable via `RUST_LOG`.
pub fn init_logging_with_level(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Bits parsed from the `WEB_SHOW` environment variable: `H`/`B` toggle
/// request header/body wire tracing, `h`/`b` toggle the response side.
/// Kept as a separate knob from `RUST_LOG` so raw wire dumps don't fight
/// with application-level log filtering.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ShowFlags {
    pub(crate) request_headers: bool,
    pub(crate) request_body: bool,
    pub(crate) response_headers: bool,
    pub(crate) response_body: bool,
}

impl ShowFlags {
    fn from_env() -> Self {
        let raw = std::env::var("WEB_SHOW").unwrap_or_default();
        Self {
            request_headers: raw.contains('H'),
            request_body: raw.contains('B'),
            response_headers: raw.contains('h'),
            response_body: raw.contains('b'),
        }
    }
}

/// Reads `WEB_SHOW` once per process and caches the parsed flags.
pub(crate) fn show_flags() -> ShowFlags {
    static FLAGS: OnceLock<ShowFlags> = OnceLock::new();
    *FLAGS.get_or_init(ShowFlags::from_env)
}
