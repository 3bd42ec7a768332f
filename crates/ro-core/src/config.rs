//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub charging: ChargingConfig,
    #[serde(default)]
    pub diameter: DiameterConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Credit-control engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ChargingConfig {
    /// Number of registry buckets (rounded up to a power of two)
    #[serde(default = "default_hash_size")]
    pub hash_size: u32,

    /// Number of physical bucket locks
    #[serde(default = "default_lock_set_size")]
    pub lock_set_size: u32,

    /// Maximum live sessions, 0 for unlimited
    #[serde(default)]
    pub max_sessions: usize,

    /// Seconds subtracted from a non-final grant before reauthorizing
    #[serde(default = "default_timer_buffer")]
    pub timer_buffer_secs: i64,

    /// Units requested by the initial CCR when the caller does not specify
    #[serde(default = "default_request_credits")]
    pub initial_request_credits: u32,

    /// Units requested by every interim CCR
    #[serde(default = "default_request_credits")]
    pub interim_request_credits: u32,

    #[serde(default = "default_voice_service_identifier")]
    pub voice_service_identifier: u32,

    #[serde(default = "default_voice_rating_group")]
    pub voice_rating_group: u32,

    #[serde(default = "default_video_service_identifier")]
    pub video_service_identifier: u32,

    #[serde(default = "default_video_rating_group")]
    pub video_rating_group: u32,

    /// Reuse the dialog's existing session instead of opening a second one
    #[serde(default)]
    pub single_session_per_dialog: bool,

    /// Add vendor-specific termination code and reason to STOP records
    #[serde(default)]
    pub vendor_specific_chargeinfo: bool,

    #[serde(default = "default_vendor_specific_id")]
    pub vendor_specific_id: u32,

    /// Timeout applied to every credit-control exchange
    #[serde(default = "default_transaction_timeout")]
    pub transaction_timeout_ms: u64,

    /// Timer sweep period
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// User-Equipment-Info value used when the call carries none
    #[serde(default = "default_mac")]
    pub default_mac: String,

    /// Answers slower than this are logged, 0 disables the check
    #[serde(default = "default_slow_answer_threshold")]
    pub slow_answer_threshold_ms: u64,

    #[serde(default)]
    pub slow_answer_log_level: LatencyLogLevel,
}

/// Level used to report slow credit-control answers
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LatencyLogLevel {
    #[default]
    Error,
    Warn,
    Info,
    Debug,
}

fn default_hash_size() -> u32 {
    4096
}

fn default_lock_set_size() -> u32 {
    64
}

fn default_timer_buffer() -> i64 {
    5
}

fn default_request_credits() -> u32 {
    30
}

fn default_voice_service_identifier() -> u32 {
    1000
}

fn default_voice_rating_group() -> u32 {
    100
}

fn default_video_service_identifier() -> u32 {
    1001
}

fn default_video_rating_group() -> u32 {
    200
}

fn default_vendor_specific_id() -> u32 {
    10
}

fn default_transaction_timeout() -> u64 {
    5000
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_slow_answer_threshold() -> u64 {
    500
}

fn default_mac() -> String {
    "00:00:00:00:00:00".to_string()
}

impl ChargingConfig {
    /// Bucket count rounded up to the next power of two
    pub fn bucket_count(&self) -> u32 {
        self.hash_size.max(1).next_power_of_two()
    }

    /// Lock count, never larger than the bucket count
    pub fn lock_count(&self) -> u32 {
        self.lock_set_size.clamp(1, self.bucket_count())
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// True when an answer that took `elapsed_ms` should be reported
    pub fn is_slow_answer(&self, elapsed_ms: u64) -> bool {
        self.slow_answer_threshold_ms > 0 && elapsed_ms > self.slow_answer_threshold_ms
    }
}

impl Default for ChargingConfig {
    fn default() -> Self {
        Self {
            hash_size: default_hash_size(),
            lock_set_size: default_lock_set_size(),
            max_sessions: 0,
            timer_buffer_secs: default_timer_buffer(),
            initial_request_credits: default_request_credits(),
            interim_request_credits: default_request_credits(),
            voice_service_identifier: default_voice_service_identifier(),
            voice_rating_group: default_voice_rating_group(),
            video_service_identifier: default_video_service_identifier(),
            video_rating_group: default_video_rating_group(),
            single_session_per_dialog: false,
            vendor_specific_chargeinfo: false,
            vendor_specific_id: default_vendor_specific_id(),
            transaction_timeout_ms: default_transaction_timeout(),
            tick_interval_ms: default_tick_interval(),
            default_mac: default_mac(),
            slow_answer_threshold_ms: default_slow_answer_threshold(),
            slow_answer_log_level: LatencyLogLevel::default(),
        }
    }
}

/// Diameter identity and routing configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DiameterConfig {
    #[serde(default = "default_origin_host")]
    pub origin_host: String,

    #[serde(default = "default_origin_realm")]
    pub origin_realm: String,

    #[serde(default = "default_destination_realm")]
    pub destination_realm: String,

    /// Destination-Host AVP, omitted when unset
    pub destination_host: Option<String>,

    /// Send every request to this peer instead of realm routing
    pub forced_peer: Option<String>,

    /// Node-Functionality reported in IMS-Information (0 = S-CSCF)
    #[serde(default)]
    pub node_functionality: u32,

    #[serde(default = "default_context_ext")]
    pub service_context_ext: String,

    #[serde(default = "default_context_mnc")]
    pub service_context_mnc: String,

    #[serde(default = "default_context_mcc")]
    pub service_context_mcc: String,

    #[serde(default = "default_context_release")]
    pub service_context_release: String,

    #[serde(default = "default_context_root")]
    pub service_context_root: String,
}

fn default_origin_host() -> String {
    "scscf.ims.mnc001.mcc001.3gppnetwork.org".to_string()
}

fn default_origin_realm() -> String {
    "ims.mnc001.mcc001.3gppnetwork.org".to_string()
}

fn default_destination_realm() -> String {
    "ims.mnc001.mcc001.3gppnetwork.org".to_string()
}

fn default_context_ext() -> String {
    "ext".to_string()
}

fn default_context_mnc() -> String {
    "01".to_string()
}

fn default_context_mcc() -> String {
    "001".to_string()
}

fn default_context_release() -> String {
    "8".to_string()
}

fn default_context_root() -> String {
    "32260@3gpp.org".to_string()
}

impl DiameterConfig {
    /// Service-Context-Id, e.g. `ext.01.001.8.32260@3gpp.org`
    pub fn service_context_id(&self) -> String {
        format!(
            "{}.{}.{}.{}.{}",
            self.service_context_ext,
            self.service_context_mnc,
            self.service_context_mcc,
            self.service_context_release,
            self.service_context_root
        )
    }
}

impl Default for DiameterConfig {
    fn default() -> Self {
        Self {
            origin_host: default_origin_host(),
            origin_realm: default_origin_realm(),
            destination_realm: default_destination_realm(),
            destination_host: None,
            forced_peer: None,
            node_functionality: 0,
            service_context_ext: default_context_ext(),
            service_context_mnc: default_context_mnc(),
            service_context_mcc: default_context_mcc(),
            service_context_release: default_context_release(),
            service_context_root: default_context_root(),
        }
    }
}

/// When session snapshots are written to the database
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DbMode {
    /// Never persist
    #[default]
    None,
    /// Write every change as it happens
    Realtime,
    /// Dump all live sessions at shutdown
    Shutdown,
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub mode: DbMode,

    /// PostgreSQL connection URL, required unless mode is `none`
    pub url: Option<String>,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds between full snapshots of live sessions in `realtime` mode, 0 disables them
    #[serde(default = "default_snapshot_period")]
    pub snapshot_period_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_snapshot_period() -> u64 {
    60
}

impl DatabaseConfig {
    pub fn snapshot_period(&self) -> Option<Duration> {
        match (self.mode, self.snapshot_period_secs) {
            (DbMode::Realtime, secs) if secs > 0 => Some(Duration::from_secs(secs)),
            _ => None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            mode: DbMode::None,
            url: None,
            max_connections: default_max_connections(),
            snapshot_period_secs: default_snapshot_period(),
        }
    }
}

/// Simulated charging system and call load
#[derive(Debug, Deserialize, Clone)]
pub struct SimulatorConfig {
    /// Seconds of credit each unknown subscriber starts with
    #[serde(default = "default_sim_balance")]
    pub default_balance_secs: i64,

    /// Validity-Time attached to every grant
    #[serde(default = "default_sim_validity")]
    pub validity_secs: u32,

    #[serde(default)]
    pub calls: Vec<SimulatedCallConfig>,
}

fn default_sim_balance() -> i64 {
    300
}

fn default_sim_validity() -> u32 {
    600
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            default_balance_secs: default_sim_balance(),
            validity_secs: default_sim_validity(),
            calls: Vec::new(),
        }
    }
}

/// One scripted call driven through the engine by the simulator
#[derive(Debug, Deserialize, Clone)]
pub struct SimulatedCallConfig {
    pub caller: String,
    pub callee: String,
    #[serde(default)]
    pub video: bool,
    #[serde(default = "default_ring_secs")]
    pub ring_secs: u64,
    pub duration_secs: u64,
    /// Seconds asked for in the INITIAL request
    #[serde(default)]
    pub reservation_secs: Option<u32>,
}

fn default_ring_secs() -> u64 {
    2
}

impl AppConfig {
    /// Load configuration from environment and optional config files
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("charging.hash_size", 4096)?
            .set_default("charging.lock_set_size", 64)?
            .set_default("charging.timer_buffer_secs", 5)?
            .set_default("charging.interim_request_credits", 30)?
            .set_default("charging.transaction_timeout_ms", 5000)?
            .set_default("charging.tick_interval_ms", 1000)?
            .set_default("database.mode", "none")?
            .set_default("database.max_connections", 10)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with RO_ prefix
            .add_source(
                Environment::with_prefix("RO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("RO").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_charging_config() {
        let config = ChargingConfig::default();
        assert_eq!(config.timer_buffer_secs, 5);
        assert_eq!(config.interim_request_credits, 30);
        assert_eq!(config.bucket_count(), 4096);
        assert_eq!(config.default_mac, "00:00:00:00:00:00");
    }

    #[test]
    fn test_bucket_count_rounds_to_power_of_two() {
        let config = ChargingConfig {
            hash_size: 1000,
            lock_set_size: 4096,
            ..Default::default()
        };
        assert_eq!(config.bucket_count(), 1024);
        assert_eq!(config.lock_count(), 1024);
    }

    #[test]
    fn test_service_context_id() {
        let config = DiameterConfig::default();
        assert_eq!(config.service_context_id(), "ext.01.001.8.32260@3gpp.org");
    }

    #[test]
    fn test_slow_answer_threshold() {
        let mut config = ChargingConfig::default();
        assert!(!config.is_slow_answer(500));
        assert!(config.is_slow_answer(501));
        config.slow_answer_threshold_ms = 0;
        assert!(!config.is_slow_answer(10_000));
    }

    #[test]
    fn test_snapshot_period_only_in_realtime_mode() {
        let mut config = DatabaseConfig::default();
        assert_eq!(config.snapshot_period(), None);
        config.mode = DbMode::Realtime;
        assert_eq!(config.snapshot_period(), Some(Duration::from_secs(60)));
        config.snapshot_period_secs = 0;
        assert_eq!(config.snapshot_period(), None);
    }
}
