use serde::{Deserialize, Serialize};
use serve_core::ServeError;
use std::collections::HashMap;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration for the `dirserve` binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Whether to enable colored output
    pub enable_colors: bool,

    /// Whether to include the module path of each event
    pub include_target: bool,

    /// Module-specific log levels
    pub module_levels: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_levels = HashMap::new();

        // Keep dependency chatter out of the request log
        module_levels.insert("hyper".to_string(), "warn".to_string());
        module_levels.insert("hyper_util".to_string(), "warn".to_string());
        module_levels.insert("reqwest".to_string(), "warn".to_string());
        module_levels.insert("rustls".to_string(), "warn".to_string());

        Self {
            level: "info".to_string(),
            enable_colors: true,
            include_target: false,
            module_levels,
        }
    }
}

impl LoggingConfig {
    /// Base filter plus per-module directives. `RUST_LOG` replaces the base level.
    pub fn env_filter(&self) -> Result<EnvFilter, ServeError> {
        if !levels::is_valid_level(&self.level) {
            return Err(ServeError::Configuration(format!(
                "invalid log level '{}' (expected one of: {})",
                self.level,
                levels::valid_levels().join(", ")
            )));
        }

        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        for (module, level) in &self.module_levels {
            let directive = format!("{}={}", module, level);
            filter = filter.add_directive(directive.parse().map_err(|e| {
                ServeError::Configuration(format!("invalid log directive '{}': {}", directive, e))
            })?);
        }

        Ok(filter)
    }
}

/// Initialize logging based on the provided configuration
pub fn init_logging(config: &LoggingConfig) -> Result<(), ServeError> {
    let filter = config.env_filter()?;

    // Try to initialize logging, ignore if already initialized
    let result = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(config.include_target)
                .with_ansi(config.enable_colors),
        )
        .try_init();

    match result {
        Ok(_) => {
            tracing::debug!("Logging initialized with level: {}", config.level);
        }
        Err(_) => {
            tracing::debug!("Logging already initialized, skipping");
        }
    }

    Ok(())
}

/// Log level utilities
pub mod levels {
    /// Check if a log level string is valid
    pub fn is_valid_level(level: &str) -> bool {
        matches!(
            level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        )
    }

    /// Get all valid log levels
    pub fn valid_levels() -> Vec<&'static str> {
        vec!["trace", "debug", "info", "warn", "error"]
    }
}
