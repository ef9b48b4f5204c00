use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_webhook_tolerance() -> u64 {
    300
}
fn default_sweep_interval() -> u64 {
    3600
}
fn default_sweep_lookahead_days() -> i64 {
    3
}
fn default_reminder_days() -> i64 {
    7
}
fn default_high_amount() -> rust_decimal::Decimal {
    rust_decimal::Decimal::from(1_000)
}
fn default_daily_order_cap() -> u32 {
    10
}
fn default_daily_amount_cap() -> rust_decimal::Decimal {
    rust_decimal::Decimal::from(5_000)
}
fn default_order_expiry_minutes() -> i64 {
    30
}

/// Risk gating policy. Pure thresholds consumed by the risk assessor;
/// passed as configuration rather than held in module-level state.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct RiskConfig {
    /// Single-order amount above which the assessment is flagged `high`.
    #[serde(default = "default_high_amount")]
    pub high_amount_threshold: rust_decimal::Decimal,

    /// Max orders per user in a trailing 24h window before denial.
    #[serde(default = "default_daily_order_cap")]
    pub daily_order_cap: u32,

    /// Max cumulative amount per user in a trailing 24h window before denial.
    #[serde(default = "default_daily_amount_cap")]
    pub daily_amount_cap: rust_decimal::Decimal,

    /// Requesting IPs that are always denied.
    #[serde(default)]
    pub ip_blocklist: Vec<String>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            high_amount_threshold: default_high_amount(),
            daily_order_cap: default_daily_order_cap(),
            daily_amount_cap: default_daily_amount_cap(),
            ip_blocklist: Vec::new(),
        }
    }
}

/// Auto-renewal sweep cadence and windows.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct RenewalConfig {
    /// Seconds between background sweep runs.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Initiate charges for subscriptions due within this many days.
    #[serde(default = "default_sweep_lookahead_days")]
    pub sweep_lookahead_days: i64,

    /// Emit a renewal reminder when the due date is within this many days.
    #[serde(default = "default_reminder_days")]
    pub reminder_days: i64,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            sweep_lookahead_days: default_sweep_lookahead_days(),
            reminder_days: default_reminder_days(),
        }
    }
}

/// Credentials and endpoints for one payment network.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
pub struct ProviderSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Merchant/app identifier at the provider.
    #[serde(default)]
    pub merchant_id: String,
    /// API secret used for outbound calls.
    #[serde(default)]
    pub api_secret: String,
    /// Secret used to verify inbound webhook signatures.
    #[serde(default)]
    pub webhook_secret: String,
    /// Override for the provider API base URL (tests point this at a stub).
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Redis connection URL (webhook replay cache)
    pub redis_url: String,

    /// JWT verification secret for the inbound principal (issuance is external)
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// Base64-encoded 32-byte master key for the payment-token vault
    #[serde(default)]
    pub vault_master_key: String,

    /// Server host address
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Accepted clock skew for signed webhook timestamps, in seconds.
    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_secs: u64,

    /// Minutes after which an unpaid pending order may be closed.
    #[serde(default = "default_order_expiry_minutes")]
    pub order_expiry_minutes: i64,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub renewal: RenewalConfig,

    #[serde(default)]
    pub alipay: ProviderSettings,

    #[serde(default)]
    pub wechat: ProviderSettings,

    #[serde(default)]
    pub unionpay: ProviderSettings,

    #[serde(default)]
    pub stripe: ProviderSettings,

    /// Comma-separated explicit CORS origins; permissive in development.
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,
}

impl AppConfig {
    /// Construct a config programmatically (used by tests and tools).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        database_url: String,
        redis_url: String,
        jwt_secret: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            redis_url,
            jwt_secret,
            vault_master_key: String::new(),
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            webhook_tolerance_secs: default_webhook_tolerance(),
            order_expiry_minutes: default_order_expiry_minutes(),
            risk: RiskConfig::default(),
            renewal: RenewalConfig::default(),
            alipay: ProviderSettings::default(),
            wechat: ProviderSettings::default(),
            unionpay: ProviderSettings::default(),
            stripe: ProviderSettings::default(),
            cors_allowed_origins: None,
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development" || self.environment == "test"
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Settings for one provider, by its registry key.
    pub fn provider(&self, key: &str) -> Option<&ProviderSettings> {
        match key {
            "alipay" => Some(&self.alipay),
            "wechat" => Some(&self.wechat),
            "unionpay" => Some(&self.unionpay),
            "stripe" => Some(&self.stripe),
            _ => None,
        }
    }
}

/// Load configuration from `config/{default,<env>}.toml` plus
/// `MEMBERLY_`-prefixed environment variables (e.g. `MEMBERLY_DATABASE_URL`).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment =
        std::env::var("MEMBERLY_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", environment.clone())?;

    let default_path = Path::new(CONFIG_DIR).join("default");
    builder = builder.add_source(File::with_name(default_path.to_str().unwrap()).required(false));

    let env_path = Path::new(CONFIG_DIR).join(&environment);
    builder = builder.add_source(File::with_name(env_path.to_str().unwrap()).required(false));

    builder = builder.add_source(Environment::with_prefix("MEMBERLY").separator("__"));

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

    info!(environment = %cfg.environment, "configuration loaded");
    Ok(cfg)
}

/// Initialize the global tracing subscriber once, honoring `RUST_LOG`.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("memberly_api={level},tower_http=info")));

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}
