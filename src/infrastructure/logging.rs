use crate::infrastructure::error::InfraError;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CRATE_TARGET: &str = "subtracker_core";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Result<Self, InfraError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(InfraError::InvalidConfig(format!(
                "unsupported log format: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub default_level: Level,
    pub format: LogFormat,
    pub include_location: bool,
    /// Overrides both `RUST_LOG` and `default_level`.
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_level: Level::INFO,
            format: LogFormat::Pretty,
            include_location: false,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    pub fn default_directive(&self) -> String {
        format!("{CRATE_TARGET}={}", self.default_level.as_str().to_ascii_lowercase())
    }

    fn build_filter(&self) -> Result<EnvFilter, InfraError> {
        match self.env_filter.as_deref() {
            Some(directive) => EnvFilter::try_new(directive).map_err(|error| {
                InfraError::InvalidConfig(format!("invalid log filter '{directive}': {error}"))
            }),
            None => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(self.default_directive()))),
        }
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: LoggingConfig) -> Result<(), InfraError> {
    let filter = config.build_filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init(),
    };

    installed.map_err(|error| {
        InfraError::InvalidConfig(format!("failed to install tracing subscriber: {error}"))
    })
}
