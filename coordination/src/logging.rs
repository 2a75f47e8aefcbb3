//! Component K: structured logging setup.
//!
//! Grounded on `main.rs`'s own `tracing_subscriber::fmt()...init()` call —
//! generalized into a reusable entry point so every CLI binary in the
//! workspace sets up logging the same way. The library itself never calls
//! this; only a binary's `main` does, so embedding applications keep
//! control of their own subscriber.

use tracing_subscriber::EnvFilter;

/// Installs a `tracing_subscriber::fmt` subscriber honoring `RUST_LOG`-style
/// directives, falling back to `filter` when the environment variable is
/// unset. Call once, from a binary's `main`.
pub fn init_subscriber(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_falls_back_to_argument_when_env_unset() {
        std::env::remove_var("RUST_LOG");
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        assert_eq!(filter.to_string(), "info");
    }
}
