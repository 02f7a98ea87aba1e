//! Configuration for the Tripwire runtime.
//!
//! Configuration is environment-based: a deployment environment selects a
//! set of defaults, and a handful of `TRIPWIRE_*` variables override them.
//!
//! | variable | effect |
//! |---|---|
//! | `TRIPWIRE_ENV` | `development` (default), `staging` or `production` |
//! | `TRIPWIRE_LOG_LEVEL` | `tracing` filter directive, e.g. `debug` or `tripwire_runtime=trace` |
//! | `TRIPWIRE_METRICS_ADDR` | address the Prometheus exporter reports under |
//! | `TRIPWIRE_REPORT_LEVEL` | `warn`, `debug` or `off` for contained errors |
//!
//! # Example
//!
//! ```no_run
//! use tripwire_runtime::config::{Environment, TripwireConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TripwireConfig::from_env()?;
//!
//! // Or explicitly
//! let config = TripwireConfig::load(Environment::Production)?;
//! println!("log level: {}", config.observability.log_level);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Variable selecting the deployment environment.
pub const ENV_VAR: &str = "TRIPWIRE_ENV";
/// Variable overriding the log filter.
pub const LOG_LEVEL_VAR: &str = "TRIPWIRE_LOG_LEVEL";
/// Variable overriding the metrics address.
pub const METRICS_ADDR_VAR: &str = "TRIPWIRE_METRICS_ADDR";
/// Variable overriding the report level.
pub const REPORT_LEVEL_VAR: &str = "TRIPWIRE_REPORT_LEVEL";

/// Configuration error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Invalid environment value
    #[error("Invalid environment: {0}")]
    InvalidEnvironment(String),

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Failed to parse a configuration value
    #[error("Failed to parse {variable}: {message}")]
    ParseError {
        /// Variable or field being parsed
        variable: String,
        /// Parser message
        message: String,
    },
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Development environment (local)
    Development,
    /// Staging environment (pre-production)
    Staging,
    /// Production environment
    Production,
}

impl Environment {
    /// Check if this is production environment
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    /// Check if this is development environment
    #[must_use]
    pub const fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "prod" | "production" => Ok(Self::Production),
            _ => Err(ConfigError::InvalidEnvironment(s.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Staging => write!(f, "staging"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Log level used when reporting contained errors.
///
/// Contained errors are always counted in metrics; this only controls
/// whether and how loudly they are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportLevel {
    /// Log at `WARN`
    #[default]
    Warn,
    /// Log at `DEBUG`
    Debug,
    /// Do not log
    Off,
}

impl FromStr for ReportLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "warn" | "warning" => Ok(Self::Warn),
            "debug" => Ok(Self::Debug),
            "off" | "none" => Ok(Self::Off),
            other => Err(ConfigError::ParseError {
                variable: REPORT_LEVEL_VAR.to_string(),
                message: format!("unknown report level '{other}'"),
            }),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// `tracing` filter directive (`RUST_LOG` takes precedence when set)
    pub log_level: String,
    /// Colourize log output
    pub ansi: bool,
    /// Install the Prometheus recorder
    pub metrics_enabled: bool,
    /// Address the metrics endpoint is reported under
    pub metrics_addr: SocketAddr,
}

impl ObservabilityConfig {
    /// Validate observability configuration
    ///
    /// # Errors
    ///
    /// Returns error if the log filter does not parse, or metrics are
    /// enabled without a port.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "log_level cannot be empty".to_string(),
            ));
        }
        EnvFilter::try_new(&self.log_level).map_err(|e| {
            ConfigError::ValidationError(format!("invalid log_level '{}': {e}", self.log_level))
        })?;
        if self.metrics_enabled && self.metrics_addr.port() == 0 {
            return Err(ConfigError::ValidationError(
                "metrics_addr must have a non-zero port when metrics are enabled".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            ansi: true,
            metrics_enabled: true,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
        }
    }
}

/// Error reporting configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// Level contained errors are logged at
    pub level: ReportLevel,
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripwireConfig {
    /// Deployment environment
    pub environment: Environment,
    /// Observability configuration
    pub observability: ObservabilityConfig,
    /// Error reporting configuration
    pub reporting: ReportingConfig,
}

impl TripwireConfig {
    /// Load configuration from the process environment.
    ///
    /// Reads `TRIPWIRE_ENV` (defaults to "development") and applies the
    /// `TRIPWIRE_*` overrides.
    ///
    /// # Errors
    ///
    /// Returns error if a variable does not parse or the result is invalid
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns error if a variable does not parse or the result is invalid
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup(ENV_VAR) {
            Some(value) => value.parse()?,
            None => Environment::Development,
        };
        let mut config = Self::defaults(environment);

        if let Some(level) = lookup(LOG_LEVEL_VAR) {
            config.observability.log_level = level;
        }
        if let Some(addr) = lookup(METRICS_ADDR_VAR) {
            config.observability.metrics_addr =
                addr.trim().parse().map_err(|e: std::net::AddrParseError| {
                    ConfigError::ParseError {
                        variable: METRICS_ADDR_VAR.to_string(),
                        message: e.to_string(),
                    }
                })?;
        }
        if let Some(level) = lookup(REPORT_LEVEL_VAR) {
            config.reporting.level = level.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration for a specific environment, without overrides.
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn load(environment: Environment) -> Result<Self, ConfigError> {
        let config = Self::defaults(environment);
        config.validate()?;
        Ok(config)
    }

    fn defaults(environment: Environment) -> Self {
        let mut config = Self {
            environment,
            observability: ObservabilityConfig::default(),
            reporting: ReportingConfig::default(),
        };

        match environment {
            Environment::Development => {
                config.observability.log_level = "debug".to_string();
            }
            Environment::Staging => {
                config.observability.log_level = "info".to_string();
            }
            Environment::Production => {
                config.observability.log_level = "warn".to_string();
                config.observability.ansi = false;
                // counted in metrics, kept out of production logs
                config.reporting.level = ReportLevel::Debug;
            }
        }

        config
    }

    /// Validate entire configuration
    ///
    /// # Errors
    ///
    /// Returns error if any configuration section is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.observability.validate()
    }

    /// Check if running in production
    #[must_use]
    pub const fn is_production(&self) -> bool {
        self.environment.is_production()
    }
}

impl Default for TripwireConfig {
    fn default() -> Self {
        Self::defaults(Environment::Development)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_environment_from_str() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("Staging".parse::<Environment>().unwrap(), Environment::Staging);
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!(
            "qa".parse::<Environment>(),
            Err(ConfigError::InvalidEnvironment("qa".to_string()))
        );
    }

    #[test]
    fn test_defaults_per_environment() {
        let dev = TripwireConfig::load(Environment::Development).unwrap();
        assert_eq!(dev.observability.log_level, "debug");
        assert_eq!(dev.reporting.level, ReportLevel::Warn);

        let prod = TripwireConfig::load(Environment::Production).unwrap();
        assert_eq!(prod.observability.log_level, "warn");
        assert!(!prod.observability.ansi);
        assert_eq!(prod.reporting.level, ReportLevel::Debug);
        assert!(prod.is_production());
    }

    #[test]
    fn test_lookup_without_variables_is_development() {
        let config = TripwireConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, TripwireConfig::default());
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = TripwireConfig::from_lookup(lookup(&[
            (ENV_VAR, "staging"),
            (LOG_LEVEL_VAR, "tripwire_runtime=trace"),
            (METRICS_ADDR_VAR, "127.0.0.1:9500"),
            (REPORT_LEVEL_VAR, "off"),
        ]))
        .unwrap();

        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(config.observability.log_level, "tripwire_runtime=trace");
        assert_eq!(config.observability.metrics_addr.port(), 9500);
        assert_eq!(config.reporting.level, ReportLevel::Off);
    }

    #[test]
    fn test_bad_metrics_addr_is_a_parse_error() {
        let result = TripwireConfig::from_lookup(lookup(&[(METRICS_ADDR_VAR, "not-an-addr")]));
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_validation_rejects_bad_filter() {
        let result = TripwireConfig::from_lookup(lookup(&[(LOG_LEVEL_VAR, "tripwire=loudest")]));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        let mut config = TripwireConfig::default();
        config.observability.metrics_addr = SocketAddr::from(([127, 0, 0, 1], 0));
        assert!(config.validate().is_err());
        config.observability.metrics_enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_report_level_from_str() {
        assert_eq!("WARN".parse::<ReportLevel>().unwrap(), ReportLevel::Warn);
        assert_eq!("debug".parse::<ReportLevel>().unwrap(), ReportLevel::Debug);
        assert!("loud".parse::<ReportLevel>().is_err());
    }
}
