//! Runtime environment detection.
//!
//! Single source of truth for the runtime environment, read from the
//! `PHARMADESK_ENV` environment variable.
//!
//! Set `PHARMADESK_ENV` to one of:
//! - `test` - Test mode (config file is ignored, defaults + env overrides only)
//! - `development` or `dev` - Development mode (verbose default logging)
//! - (anything else or unset) - Production mode

/// Name of the environment variable selecting the runtime environment.
pub const ENV_VAR: &str = "PHARMADESK_ENV";

/// Runtime environment for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Production environment (default).
    #[default]
    Production,
    /// Development environment.
    Development,
    /// Test environment - no config file on disk is consulted.
    Test,
}

impl Environment {
    /// Detect the current environment from `PHARMADESK_ENV`.
    #[must_use]
    pub fn current() -> Self {
        std::env::var(ENV_VAR)
            .map(|value| Self::from_value(&value))
            .unwrap_or_default()
    }

    /// Parse an environment name. Unknown names map to `Production`.
    #[must_use]
    pub fn from_value(value: &str) -> Self {
        match value.trim() {
            "test" => Self::Test,
            "development" | "dev" => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the test environment.
    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }

    /// Returns `true` if this is the development environment.
    #[must_use]
    pub fn is_development(self) -> bool {
        self == Self::Development
    }

    /// Default `env_logger` filter when `RUST_LOG` is not set.
    #[must_use]
    pub fn default_log_filter(self) -> &'static str {
        match self {
            Self::Development => "debug",
            Self::Test => "warn",
            Self::Production => "info",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Convenience check for test mode.
///
/// Equivalent to `Environment::current().is_test()`.
#[must_use]
pub fn is_test_mode() -> bool {
    Environment::current().is_test()
}
