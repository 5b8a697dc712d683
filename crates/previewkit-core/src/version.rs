use std::fmt::Write;

/// The current version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Schema version of the machine-readable `build --json` result.
/// Bump this when a field changes meaning or goes away.
pub const RESULT_SCHEMA_VERSION: u32 = 1;

/// Returns a formatted version string including build metadata if available.
#[must_use]
pub fn version_string() -> String {
    let mut s = format!("previewkit {VERSION}");

    if let Some(hash) = option_env!("PREVIEWKIT_BUILD_GIT_HASH") {
        let _ = write!(s, " ({hash})");
    }

    s
}
