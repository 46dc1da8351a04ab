use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";

/// Configuration for the external AI classification service
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AiConfig {
    /// Whether AI-assisted analysis is enabled at all
    #[serde(default)]
    pub enabled: bool,

    /// Base URL of the classification endpoint
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,

    /// Model identifier sent with each classification request
    #[serde(default = "default_ai_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_ai_timeout_secs")]
    #[validate(range(min = 1, max = 300))]
    pub timeout_secs: u64,

    /// Minimum AI confidence required to override a deterministic category
    #[serde(default = "default_confidence_override_threshold")]
    #[validate(custom = "validate_unit_interval")]
    pub confidence_override_threshold: f64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_ai_base_url(),
            model: default_ai_model(),
            timeout_secs: default_ai_timeout_secs(),
            confidence_override_threshold: default_confidence_override_threshold(),
        }
    }
}

/// Tunable policy for analytics scoring and restock sizing
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AnalyticsPolicy {
    /// Default sales window used when the caller does not specify one
    #[serde(default = "default_period_days")]
    #[validate(range(min = 1, max = 365))]
    pub default_period_days: i64,

    /// Below this many days of stock cover a variant is high risk
    #[serde(default = "default_high_risk_days")]
    pub high_risk_days: f64,

    /// Above this many days of stock cover a variant is low risk
    #[serde(default = "default_low_risk_days")]
    pub low_risk_days: f64,

    /// How many days of projected sales a restock should cover
    #[serde(default = "default_restock_horizon_days")]
    #[validate(custom = "validate_positive_days")]
    pub restock_horizon_days: f64,

    /// Performance score weights
    #[serde(default = "default_turnover_weight")]
    #[validate(custom = "validate_unit_interval")]
    pub turnover_weight: f64,
    #[serde(default = "default_margin_weight")]
    #[validate(custom = "validate_unit_interval")]
    pub margin_weight: f64,
    #[serde(default = "default_velocity_weight")]
    #[validate(custom = "validate_unit_interval")]
    pub velocity_weight: f64,
}

impl Default for AnalyticsPolicy {
    fn default() -> Self {
        Self {
            default_period_days: default_period_days(),
            high_risk_days: default_high_risk_days(),
            low_risk_days: default_low_risk_days(),
            restock_horizon_days: default_restock_horizon_days(),
            turnover_weight: default_turnover_weight(),
            margin_weight: default_margin_weight(),
            velocity_weight: default_velocity_weight(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Grace period before a stuck processing analysis is failed (seconds)
    #[serde(default = "default_analysis_recovery_grace_secs")]
    pub analysis_recovery_grace_secs: u64,

    /// AI classification service settings
    #[serde(default)]
    #[validate]
    pub ai: AiConfig,

    /// Analytics and restock policy settings
    #[serde(default)]
    #[validate]
    pub analytics: AnalyticsPolicy,
}

impl AppConfig {
    /// Builds a configuration from a database URL with defaults elsewhere,
    /// used by tests and embedding callers that configure programmatically.
    pub fn new(database_url: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            environment: environment.into(),
            log_level: default_log_level(),
            log_json: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            analysis_recovery_grace_secs: default_analysis_recovery_grace_secs(),
            ai: AiConfig::default(),
            analytics: AnalyticsPolicy::default(),
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let weight_sum = self.analytics.turnover_weight
            + self.analytics.margin_weight
            + self.analytics.velocity_weight;
        if weight_sum <= 0.0 {
            let mut err = ValidationError::new("analytics_weights");
            err.message = Some("Performance score weights must sum to a positive value".into());
            errors.add("analytics", err);
        }

        if self.analytics.high_risk_days >= self.analytics.low_risk_days {
            let mut err = ValidationError::new("risk_day_bounds");
            err.message = Some("high_risk_days must be below low_risk_days".into());
            errors.add("analytics", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_analysis_recovery_grace_secs() -> u64 {
    900
}

fn default_ai_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ai_model() -> String {
    "restock-classifier-v1".to_string()
}

fn default_ai_timeout_secs() -> u64 {
    30
}

fn default_confidence_override_threshold() -> f64 {
    0.6
}

fn default_period_days() -> i64 {
    30
}

fn default_high_risk_days() -> f64 {
    3.0
}

fn default_low_risk_days() -> f64 {
    30.0
}

fn default_restock_horizon_days() -> f64 {
    14.0
}

fn default_turnover_weight() -> f64 {
    0.3
}

fn default_margin_weight() -> f64 {
    0.3
}

fn default_velocity_weight() -> f64 {
    0.4
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_unit_interval(value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || value < 0.0 || value > 1.0 {
        let mut err = ValidationError::new("unit_interval");
        err.message = Some("Must be a finite value between 0.0 and 1.0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_positive_days(value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || value <= 0.0 {
        let mut err = ValidationError::new("positive_days");
        err.message = Some("Must be a finite number of days greater than zero".into());
        return Err(err);
    }
    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("restock_engine={}", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://restock.db?mode=rwc")?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
