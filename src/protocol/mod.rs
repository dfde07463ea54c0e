//! MCP protocol types

mod messages;
mod types;

pub use messages::*;
pub use types::*;

/// Newest protocol version this server speaks
pub const PROTOCOL_VERSION: &str = "2025-11-25";

/// Versions accepted during `initialize`, newest first
pub const SUPPORTED_VERSIONS: &[&str] = &["2025-11-25", "2025-06-18", "2025-03-26", "2024-11-05"];

/// Echo the client's version when we speak it, otherwise offer our newest
#[must_use]
pub fn negotiate_version(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|v| SUPPORTED_VERSIONS.iter().find(|s| **s == v))
        .copied()
        .unwrap_or(PROTOCOL_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_version_is_echoed() {
        assert_eq!(negotiate_version(Some("2025-03-26")), "2025-03-26");
    }

    #[test]
    fn unknown_or_missing_version_gets_latest() {
        assert_eq!(negotiate_version(Some("1999-01-01")), PROTOCOL_VERSION);
        assert_eq!(negotiate_version(None), PROTOCOL_VERSION);
    }
}
