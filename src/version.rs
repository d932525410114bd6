//! Version information embedded at compile time.

/// Package version from Cargo.toml, reported by `/health` and the
/// `initialize` handshake.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
