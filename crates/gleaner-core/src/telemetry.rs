//! Tracing subscriber setup for binaries and integration tests.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "gleaner_core=info,gleaner_store=info,warn";

/// Install a compact fmt subscriber filtered by `GLEANER_LOG`, then
/// `RUST_LOG`, then a default of info for gleaner crates.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_tracing() -> bool {
    let filter = std::env::var("GLEANER_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(true))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_reported_not_fatal() {
        let _ = init_tracing();
        assert!(!init_tracing());
    }
}
