//! Store configuration.

use serde::{Deserialize, Serialize};

/// Environment variable read by [`StoreConfig::from_env`].
pub const DIAGNOSTICS_ENV: &str = "TIREA_STORE_DIAGNOSTICS";

/// Configuration consumed by a store at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Emit commit and notification events to the diagnostics sink.
    pub diagnostics: bool,
}

impl StoreConfig {
    /// Enable or disable diagnostics events.
    #[must_use]
    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    /// Read the configuration from the process environment.
    ///
    /// `TIREA_STORE_DIAGNOSTICS` accepts `1`, `true`, `yes` or `on`
    /// (case-insensitive); anything else, or an unset variable, disables it.
    pub fn from_env() -> Self {
        let diagnostics = std::env::var(DIAGNOSTICS_ENV)
            .map(|raw| parse_flag(&raw))
            .unwrap_or(false);
        Self { diagnostics }
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
