use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::services::rag::RagConfig;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub transitivity: TransitivityConfig,
    pub rag: RagConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Mapping cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default time-to-live for cached mappings (default: 365 days)
    #[serde(deserialize_with = "deserialize_days_i64")]
    pub default_ttl_days: i64,
    /// Minimum confidence for rows returned by lookups (default: 0.7)
    pub confidence_threshold: f64,
    /// Whether to run the periodic expiry sweep at startup (default: true)
    pub expiry_enabled: bool,
    /// Expiry sweep interval in seconds (default: 3600)
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub expiry_interval_secs: u64,
}

/// Transitivity builder configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransitivityConfig {
    /// Minimum confidence for source rows and derived rows (default: 0.5)
    pub min_confidence: f64,
    /// Maximum derivation chain length, >= 2 (default: 3)
    pub max_chain_length: usize,
    /// Multiplicative decay per composed hop, in (0, 1] (default: 0.9)
    pub confidence_decay: f64,
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "biomapper")]
#[command(version, about = "Biomapper - Biological Identifier Mapping Engine")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Database URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,

    /// Logging level (overrides config file, e.g., "info,biomapper=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Default cache TTL (overrides config file, e.g., "365d", "52w")
    #[arg(long, value_name = "DAYS")]
    pub cache_ttl_days: Option<String>,

    /// Expiry sweep interval (overrides config file, e.g., "30s", "5m", "1h")
    #[arg(long, value_name = "DURATION")]
    pub expiry_interval_secs: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI surface; each subcommand is a thin wrapper over the library
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Map a single identifier through the dispatcher
    Map {
        source_id: String,
        source_type: String,
        target_type: String,
        /// Route to one specific resource instead of the ranked order
        #[arg(long)]
        resource: Option<String>,
        #[arg(long)]
        min_confidence: Option<f64>,
        /// Per-resource timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,
        /// Fail on the first resource error instead of falling back
        #[arg(long)]
        no_fallback: bool,
    },
    /// Map a batch of identifiers of one type
    Batch {
        source_type: String,
        target_type: String,
        /// Identifiers to map
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Run the transitivity builder
    Transitive {
        /// Also run the extended pass (chains longer than 2)
        #[arg(long)]
        extended: bool,
    },
    /// Delete expired cache rows
    Expire,
    /// Print daily cache statistics
    Stats {
        /// Restrict to the last N days
        #[arg(long)]
        days: Option<i64>,
    },
    /// List registered resources
    Resources,
}

impl Config {
    /// Load configuration with command line, environment variable, and file support
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<(Self, Command), anyhow::Error> {
        // Parse command line arguments first
        let cli_args = CommandLineArgs::parse();

        // 1. Load from config file (use CLI --config if provided, otherwise find default)
        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        // 2. Override with environment variables
        config.apply_env_overrides();

        // 3. Override with command line arguments (highest priority)
        config.apply_cli_overrides(&cli_args);

        // 4. Validate configuration
        config.validate()?;

        Ok((config, cli_args.command))
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_DATABASE_URL: Database URL (default: sqlite://data/biomapper.db)
    /// - APP_LOG_LEVEL: Logging level (e.g., "info,biomapper=debug")
    /// - APP_CACHE_TTL_DAYS: Default cache TTL (accepts "365d", "52w")
    /// - APP_CACHE_CONFIDENCE_THRESHOLD: Lookup confidence floor
    /// - APP_EXPIRY_INTERVAL_SECS: Expiry sweep interval (accepts "30s", "5m", "1h")
    /// - APP_LLM_API_KEY: LLM API key for the RAG pipeline
    /// - APP_VECTOR_HOST / APP_VECTOR_PORT: Vector store endpoint
    fn apply_env_overrides(&mut self) {
        if let Ok(db_url) = std::env::var("APP_DATABASE_URL") {
            self.database.url = db_url;
            tracing::info!("Override database.url from env");
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Ok(ttl) = std::env::var("APP_CACHE_TTL_DAYS") {
            match parse_days_to_i64(&ttl) {
                Ok(val) => {
                    self.cache.default_ttl_days = val;
                    tracing::info!(
                        "Override cache.default_ttl_days from env: {}",
                        self.cache.default_ttl_days
                    );
                },
                Err(e) => tracing::warn!(
                    "Invalid APP_CACHE_TTL_DAYS '{}': {} (keep {})",
                    ttl,
                    e,
                    self.cache.default_ttl_days
                ),
            }
        }

        if let Ok(threshold) = std::env::var("APP_CACHE_CONFIDENCE_THRESHOLD")
            && let Ok(val) = threshold.parse()
        {
            self.cache.confidence_threshold = val;
            tracing::info!(
                "Override cache.confidence_threshold from env: {}",
                self.cache.confidence_threshold
            );
        }

        if let Ok(interval) = std::env::var("APP_EXPIRY_INTERVAL_SECS") {
            match parse_duration_to_secs(&interval) {
                Ok(val) => {
                    self.cache.expiry_interval_secs = val;
                    tracing::info!(
                        "Override cache.expiry_interval_secs from env: {}",
                        self.cache.expiry_interval_secs
                    );
                },
                Err(e) => tracing::warn!(
                    "Invalid APP_EXPIRY_INTERVAL_SECS '{}': {} (keep {})",
                    interval,
                    e,
                    self.cache.expiry_interval_secs
                ),
            }
        }

        if let Ok(key) = std::env::var("APP_LLM_API_KEY") {
            self.rag.llm_api_key = Some(key);
            tracing::info!("Override rag.llm_api_key from env");
        }

        if let Ok(host) = std::env::var("APP_VECTOR_HOST") {
            self.rag.vector_host = host;
            tracing::info!("Override rag.vector_host from env: {}", self.rag.vector_host);
        }

        if let Ok(port) = std::env::var("APP_VECTOR_PORT")
            && let Ok(port) = port.parse()
        {
            self.rag.vector_port = port;
            tracing::info!("Override rag.vector_port from env: {}", self.rag.vector_port);
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(db_url) = &args.database_url {
            self.database.url = db_url.clone();
            tracing::info!("Override database.url from CLI");
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }

        if let Some(ttl) = &args.cache_ttl_days {
            match parse_days_to_i64(ttl) {
                Ok(val) => {
                    self.cache.default_ttl_days = val;
                    tracing::info!(
                        "Override cache.default_ttl_days from CLI: {}",
                        self.cache.default_ttl_days
                    );
                },
                Err(e) => tracing::warn!(
                    "Invalid --cache-ttl-days '{}': {} (keep {})",
                    ttl,
                    e,
                    self.cache.default_ttl_days
                ),
            }
        }

        if let Some(interval) = &args.expiry_interval_secs {
            match parse_duration_to_secs(interval) {
                Ok(val) => {
                    self.cache.expiry_interval_secs = val;
                    tracing::info!(
                        "Override cache.expiry_interval_secs from CLI: {}",
                        self.cache.expiry_interval_secs
                    );
                },
                Err(e) => tracing::warn!(
                    "Invalid --expiry-interval-secs '{}': {} (keep {})",
                    interval,
                    e,
                    self.cache.expiry_interval_secs
                ),
            }
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.cache.default_ttl_days <= 0 {
            anyhow::bail!("cache.default_ttl_days must be > 0");
        }
        if !(0.0..=1.0).contains(&self.cache.confidence_threshold) {
            anyhow::bail!("cache.confidence_threshold must be within [0, 1]");
        }
        if self.cache.expiry_interval_secs == 0 {
            anyhow::bail!("cache.expiry_interval_secs must be > 0");
        }

        if self.transitivity.max_chain_length < 2 {
            anyhow::bail!("transitivity.max_chain_length must be >= 2");
        }
        if !(0.0..=1.0).contains(&self.transitivity.min_confidence) {
            anyhow::bail!("transitivity.min_confidence must be within [0, 1]");
        }
        if self.transitivity.confidence_decay <= 0.0 || self.transitivity.confidence_decay > 1.0 {
            anyhow::bail!("transitivity.confidence_decay must be within (0, 1]");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://data/biomapper.db".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,biomapper=debug".to_string(),
            file: Some("logs/biomapper.log".to_string()),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_days: 365,
            confidence_threshold: 0.7,
            expiry_enabled: true,
            expiry_interval_secs: 3600,
        }
    }
}

impl Default for TransitivityConfig {
    fn default() -> Self {
        Self { min_confidence: 0.5, max_chain_length: 3, confidence_decay: 0.9 }
    }
}

// =========================
// Helpers for parsing values
// =========================

fn parse_duration_to_secs(input: &str) -> Result<u64, String> {
    // Accept plain numbers (treated as seconds)
    if let Ok(val) = input.parse::<u64>() {
        return Ok(val);
    }

    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: u64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(n),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(n * 60),
        "h" | "hr" | "hour" | "hours" => Ok(n * 60 * 60),
        "d" | "day" | "days" => Ok(n * 60 * 60 * 24),
        _ => Err(format!("unsupported unit: {}", unit)),
    }
}

fn parse_days_to_i64(input: &str) -> Result<i64, String> {
    // Accept plain numbers (treated as days)
    if let Ok(val) = input.parse::<i64>() {
        return Ok(val);
    }

    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: i64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "d" | "day" | "days" => Ok(n),
        "w" | "week" | "weeks" => Ok(n * 7),
        _ => Err(format!("unsupported unit: {}", unit)),
    }
}

// Custom serde deserializers to support numeric or human-friendly string values
fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = u64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of seconds or a string like '30s', '5m', '1h'")
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v >= 0 { Ok(v as u64) } else { Err(E::custom("negative not allowed")) }
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(v).map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(&v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}

fn deserialize_days_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = i64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of days or a string like '7d' or '2w'")
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v as i64)
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_days_to_i64(v).map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_days_to_i64(&v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}
