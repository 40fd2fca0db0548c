//! Logging setup (§4.0b, ambient)
//!
//! Installs a `tracing_subscriber::fmt` subscriber, gated on the
//! `WARDEN_LOG` environment variable via `EnvFilter`, falling back to
//! `info`. Follows the usual verbose/quiet binary split, generalized into
//! an env-filter so `warden-cli` and test binaries can both call it
//! without an explicit verbosity flag.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. Safe to call more than once;
/// subsequent calls are no-ops (mirrors `tracing`'s own idempotence on
/// `try_init`).
pub fn init() {
    let filter = EnvFilter::try_from_env("WARDEN_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Variant used by `warden-cli --verbose`: forces `debug` regardless of
/// `WARDEN_LOG`.
pub fn init_verbose() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_does_not_panic_when_called_twice() {
        init();
        init();
    }
}
