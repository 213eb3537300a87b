//! Structured logging setup.
//!
//! This crate instruments itself with `tracing` throughout (DC location,
//! CLDAP probing, sandbox activation, directory operations); it never
//! installs a subscriber on its own, since a library imposing a global
//! subscriber on its embedder is a good way to break their own logging
//! setup. [`init`] is a convenience a binary or a test harness can call to
//! get sensible output without writing the boilerplate itself, the same
//! shape as the teacher's own log-setup helper: an `EnvFilter` driven by
//! `RUST_LOG`, falling back to a default directive.

use tracing_subscriber::{EnvFilter, fmt};

/// Install a `tracing-subscriber` `fmt` layer filtered by `RUST_LOG`,
/// defaulting to `default_directive` (e.g. `"adforest=info"`) when the
/// environment variable is unset or unparsable.
///
/// Returns an error rather than panicking if a global subscriber is already
/// installed, so callers that embed this crate in something that sets up
/// its own logging aren't surprised by a `set_global_default` panic.
pub fn init(default_directive: &str) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let subscriber = fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_does_not_panic_when_called_without_rust_log_set() {
        // A second call after a subscriber is already installed (e.g. by
        // the test harness) returns an error instead of panicking; either
        // outcome is fine here, only the absence of a panic is asserted.
        let _ = init("adforest=info");
    }
}
