use serde::Deserialize;
use std::net::SocketAddr;

use crate::sink::SinkKind;
use crate::tokens::amount::USR_DECIMALS;
use crate::tokens::exclusion::parse_address;

/// USR token contract on Base.
pub const DEFAULT_USR_BASE_ADDRESS: &str = "0x35E5dB674D8e93a03d814FA0ADa70731efe8a4b9";
/// USR deployment block on Base (Oct 2024).
pub const DEFAULT_START_BLOCK: u64 = 18_500_000;
pub const DEFAULT_TIME_INTERVAL_MINUTES: u64 = 60;
pub const DEFAULT_BACKFILL_INTERVAL_MINUTES: u64 = 60;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_url() -> String {
    "postgres://localhost/usr_processor".to_string()
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    #[serde(default = "default_rpc_http")]
    pub rpc_http: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_rpc_max_retries")]
    pub rpc_max_retries: u32,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_http: default_rpc_http(),
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            rpc_max_retries: default_rpc_max_retries(),
        }
    }
}

fn default_rpc_http() -> String {
    "https://mainnet.base.org".to_string()
}

fn default_batch_size() -> u64 {
    500
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_rpc_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProcessorConfig {
    #[serde(default = "default_token_address")]
    pub token_address: String,
    #[serde(default = "default_start_block")]
    pub start_block: u64,
    #[serde(default = "default_time_interval")]
    pub time_interval_minutes: u64,
    #[serde(default = "default_backfill_interval")]
    pub backfill_interval_minutes: u64,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
    #[serde(default)]
    pub excluded_contracts: Vec<String>,
    #[serde(default = "default_max_concurrent_handlers")]
    pub max_concurrent_handlers: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            token_address: default_token_address(),
            start_block: default_start_block(),
            time_interval_minutes: default_time_interval(),
            backfill_interval_minutes: default_backfill_interval(),
            decimals: default_decimals(),
            excluded_contracts: Vec::new(),
            max_concurrent_handlers: default_max_concurrent_handlers(),
        }
    }
}

fn default_token_address() -> String {
    DEFAULT_USR_BASE_ADDRESS.to_string()
}

fn default_start_block() -> u64 {
    DEFAULT_START_BLOCK
}

fn default_time_interval() -> u64 {
    DEFAULT_TIME_INTERVAL_MINUTES
}

fn default_backfill_interval() -> u64 {
    DEFAULT_BACKFILL_INTERVAL_MINUTES
}

fn default_decimals() -> u8 {
    USR_DECIMALS
}

fn default_max_concurrent_handlers() -> usize {
    16
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SinkConfig {
    #[serde(default)]
    pub kind: SinkKind,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_metrics_listen(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_metrics_listen() -> String {
    "0.0.0.0:9000".to_string()
}

impl Config {
    /// Load from a TOML file (defaults if it does not exist), then apply
    /// environment overrides and validate.
    pub fn load(path: &str) -> eyre::Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
            toml::from_str::<Config>(&content)
                .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?
        } else {
            tracing::info!(path, "Config file not found, using defaults");
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides. Numeric values that are unparseable or
    /// zero keep the current value.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("USR_BASE_ADDRESS").filter(|v| !v.is_empty()) {
            self.processor.token_address = address;
        }
        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.is_empty()) {
            self.database.url = url;
        }
        if let Some(url) = lookup("RPC_HTTP").filter(|v| !v.is_empty()) {
            self.chain.rpc_http = url;
        }

        override_number(&lookup, "START_BLOCK", &mut self.processor.start_block);
        override_number(
            &lookup,
            "TIME_INTERVAL_MINUTES",
            &mut self.processor.time_interval_minutes,
        );
        override_number(
            &lookup,
            "BACKFILL_INTERVAL_MINUTES",
            &mut self.processor.backfill_interval_minutes,
        );
    }

    fn validate(&self) -> eyre::Result<()> {
        parse_address(&self.processor.token_address).map_err(|e| {
            eyre::eyre!("Invalid token address '{}': {}", self.processor.token_address, e)
        })?;

        for address in &self.processor.excluded_contracts {
            parse_address(address)
                .map_err(|e| eyre::eyre!("Invalid excluded contract '{}': {}", address, e))?;
        }

        if self.processor.time_interval_minutes == 0 || self.processor.backfill_interval_minutes == 0 {
            return Err(eyre::eyre!("Snapshot intervals must be at least one minute"));
        }
        if self.chain.batch_size == 0 {
            return Err(eyre::eyre!("chain.batch_size must be greater than zero"));
        }
        if self.processor.max_concurrent_handlers == 0 {
            return Err(eyre::eyre!("processor.max_concurrent_handlers must be greater than zero"));
        }
        if self.processor.decimals != USR_DECIMALS {
            tracing::warn!(
                decimals = self.processor.decimals,
                expected = USR_DECIMALS,
                "Token decimals differ from USR"
            );
        }
        if self.metrics.enabled {
            self.metrics_listen()?;
        }
        Ok(())
    }

    /// Log the effective processor settings unless running in production.
    pub fn log_summary(&self, environment: Option<&str>) {
        if environment == Some("production") {
            return;
        }
        tracing::info!(
            token_address = %self.processor.token_address,
            start_block = self.processor.start_block,
            time_interval_minutes = self.processor.time_interval_minutes,
            backfill_interval_minutes = self.processor.backfill_interval_minutes,
            excluded_contracts = self.processor.excluded_contracts.len(),
            sink = ?self.sink.kind,
            "Processor configuration"
        );
    }

    pub fn metrics_listen(&self) -> eyre::Result<SocketAddr> {
        self.metrics
            .listen
            .parse()
            .map_err(|e| eyre::eyre!("Invalid metrics listen address '{}': {}", self.metrics.listen, e))
    }
}

fn override_number<F>(lookup: &F, key: &str, target: &mut u64)
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => *target = value,
        _ => {
            tracing::warn!(key, value = %raw, current = *target, "Ignoring invalid override");
        }
    }
}
