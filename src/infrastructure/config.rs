use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const SUPPORTED_SCHEMA: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub schema: u8,
    pub app_name: String,
    pub timezone: String,
    pub calendar_id: String,
    pub reminder: ReminderConfig,
    pub http: HttpConfig,
    pub auth: AuthConfig,
    pub monitor: MonitorConfig,
    pub insights: InsightsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema: SUPPORTED_SCHEMA,
            app_name: "SubTracker".to_string(),
            timezone: "UTC".to_string(),
            calendar_id: "primary".to_string(),
            reminder: ReminderConfig::default(),
            http: HttpConfig::default(),
            auth: AuthConfig::default(),
            monitor: MonitorConfig::default(),
            insights: InsightsConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn time_zone(&self) -> Result<Tz, InfraError> {
        self.timezone.trim().parse::<Tz>().map_err(|error| {
            InfraError::InvalidConfig(format!("invalid timezone '{}': {error}", self.timezone))
        })
    }

    fn validate(&self) -> Result<(), InfraError> {
        if self.schema != SUPPORTED_SCHEMA {
            return Err(InfraError::InvalidConfig(format!(
                "unsupported schema {}",
                self.schema
            )));
        }
        if self.calendar_id.trim().is_empty() {
            return Err(InfraError::InvalidConfig(
                "calendarId must not be empty".to_string(),
            ));
        }
        if self.reminder.hour > 23 {
            return Err(InfraError::InvalidConfig(format!(
                "reminder.hour must be 0-23, got {}",
                self.reminder.hour
            )));
        }
        if self.auth.refresh_ceiling == 0 {
            return Err(InfraError::InvalidConfig(
                "auth.refreshCeiling must be at least 1".to_string(),
            ));
        }
        self.time_zone()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReminderConfig {
    pub lead_days: i64,
    pub hour: u32,
    pub duration_minutes: i64,
    pub popup_minutes: u32,
    pub email_minutes: u32,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            lead_days: 3,
            hour: 10,
            duration_minutes: 30,
            popup_minutes: 10,
            email_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpConfig {
    pub request_timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    pub attempt_timeout_seconds: u64,
    pub refresh_ceiling: u8,
    pub backoff_base_ms: u64,
    pub background_skew_seconds: i64,
    pub interactive_skew_seconds: i64,
    pub default_lifetime_seconds: i64,
    pub network_retry_delay_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_seconds: 15,
            refresh_ceiling: 3,
            backoff_base_ms: 1000,
            background_skew_seconds: 300,
            interactive_skew_seconds: 60,
            default_lifetime_seconds: 3600,
            network_retry_delay_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    pub interval_seconds: u64,
    pub interval_threshold_seconds: i64,
    pub visibility_threshold_seconds: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            interval_threshold_seconds: 600,
            visibility_threshold_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct InsightsConfig {
    pub endpoint: Option<String>,
}

impl InsightsConfig {
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        write_config(config_dir, &AppConfig::default())?;
    }
    Ok(())
}

pub fn load_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    let path = config_dir.join(APP_JSON);
    let raw = fs::read_to_string(&path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw).map_err(|error| {
        InfraError::InvalidConfig(format!("malformed {}: {error}", path.display()))
    })?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != u64::from(SUPPORTED_SCHEMA) {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }

    let config: AppConfig = serde_json::from_value(parsed).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid {}: {error}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

pub fn write_config(config_dir: &Path, config: &AppConfig) -> Result<(), InfraError> {
    config.validate()?;
    let formatted = serde_json::to_string_pretty(config)?;
    fs::write(config_dir.join(APP_JSON), format!("{formatted}\n"))?;
    Ok(())
}
