//! Tracing subscriber setup for embedding applications.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global fmt subscriber honoring `RUST_LOG`, defaulting to
/// `info` for this crate. Safe to call more than once; later calls are
/// no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("remora=info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::init;

    #[test]
    fn repeated_init_does_not_panic() {
        init();
        init();
    }
}
