use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub llm: LlmClientConfig,
    pub lookup: LookupConfig,
    pub indexer: IndexerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Blob storage configuration for extracted reference text
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for the filesystem storage backend
    pub root: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// LLM response cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time-to-live for cached responses in hours (default: 24)
    pub ttl_hours: i64,
    /// Prefix for all cache keys (default: "lookup:llm:")
    pub key_prefix: String,
}

/// LLM client configuration (OpenAI-compatible endpoint)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmClientConfig {
    /// API base URL (e.g. https://api.openai.com/v1)
    pub api_base: String,
    /// API key; prefer APP_LLM_API_KEY over putting this in the file
    pub api_key: Option<String>,
    /// Request timeout in seconds (default: 30)
    pub request_timeout_seconds: u64,
}

/// Look-Up orchestrator limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Maximum Look-Ups running in parallel per orchestrator call (default: 10)
    pub max_concurrent_executions: usize,
    /// Per-Look-Up execution timeout in seconds (default: 30)
    pub execution_timeout_seconds: u64,
    /// Upper bound on an entire orchestrator call in seconds (default: 120)
    pub queue_timeout_seconds: u64,
}

/// Out-of-process indexer service
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub base_url: String,
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "meridian")]
#[command(version, about = "Meridian - Look-Up Enrichment Service")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,

    /// Storage root directory (overrides config file)
    #[arg(long, value_name = "PATH")]
    pub storage_root: Option<String>,

    /// Logging level (overrides config file, e.g., "info,lookup_engine=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Maximum concurrent Look-Up executions (overrides config file)
    #[arg(long, value_name = "N")]
    pub max_concurrent: Option<usize>,

    /// Per-execution timeout in seconds (overrides config file)
    #[arg(long, value_name = "SECONDS")]
    pub execution_timeout: Option<u64>,

    /// Queue-wide timeout in seconds (overrides config file)
    #[arg(long, value_name = "SECONDS")]
    pub queue_timeout: Option<u64>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file support
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();

        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_SERVER_HOST: Server host (default: 0.0.0.0)
    /// - APP_SERVER_PORT: Server port (default: 8080)
    /// - APP_DATABASE_URL: Database URL (default: sqlite://data/meridian.db)
    /// - APP_STORAGE_ROOT: Blob storage root directory
    /// - APP_LOG_LEVEL: Logging level (e.g., "info,lookup_engine=debug")
    /// - APP_LLM_API_BASE: LLM API base URL
    /// - APP_LLM_API_KEY: LLM API key
    /// - APP_CACHE_TTL_HOURS: Response cache TTL in hours
    /// - APP_MAX_CONCURRENT_EXECUTIONS: Orchestrator worker cap
    /// - APP_EXECUTION_TIMEOUT_SECONDS: Per-Look-Up timeout
    /// - APP_QUEUE_TIMEOUT_SECONDS: Queue-wide timeout
    /// - APP_INDEXER_BASE_URL: Indexer service base URL
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }

        if let Ok(port) = std::env::var("APP_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
            tracing::info!("Override server.port from env: {}", self.server.port);
        }

        if let Ok(db_url) = std::env::var("APP_DATABASE_URL") {
            self.database.url = db_url;
            tracing::info!("Override database.url from env");
        }

        if let Ok(root) = std::env::var("APP_STORAGE_ROOT") {
            self.storage.root = root;
            tracing::info!("Override storage.root from env: {}", self.storage.root);
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Ok(api_base) = std::env::var("APP_LLM_API_BASE") {
            self.llm.api_base = api_base;
            tracing::info!("Override llm.api_base from env: {}", self.llm.api_base);
        }

        if let Ok(api_key) = std::env::var("APP_LLM_API_KEY") {
            self.llm.api_key = Some(api_key);
            tracing::info!("Override llm.api_key from env");
        }

        if let Ok(ttl) = std::env::var("APP_CACHE_TTL_HOURS")
            && let Ok(ttl) = ttl.parse()
        {
            self.cache.ttl_hours = ttl;
            tracing::info!("Override cache.ttl_hours from env: {}", self.cache.ttl_hours);
        }

        if let Ok(max) = std::env::var("APP_MAX_CONCURRENT_EXECUTIONS")
            && let Ok(max) = max.parse()
        {
            self.lookup.max_concurrent_executions = max;
            tracing::info!(
                "Override lookup.max_concurrent_executions from env: {}",
                self.lookup.max_concurrent_executions
            );
        }

        if let Ok(secs) = std::env::var("APP_EXECUTION_TIMEOUT_SECONDS")
            && let Ok(secs) = secs.parse()
        {
            self.lookup.execution_timeout_seconds = secs;
            tracing::info!(
                "Override lookup.execution_timeout_seconds from env: {}",
                self.lookup.execution_timeout_seconds
            );
        }

        if let Ok(secs) = std::env::var("APP_QUEUE_TIMEOUT_SECONDS")
            && let Ok(secs) = secs.parse()
        {
            self.lookup.queue_timeout_seconds = secs;
            tracing::info!(
                "Override lookup.queue_timeout_seconds from env: {}",
                self.lookup.queue_timeout_seconds
            );
        }

        if let Ok(base_url) = std::env::var("APP_INDEXER_BASE_URL") {
            self.indexer.base_url = base_url;
            tracing::info!("Override indexer.base_url from env: {}", self.indexer.base_url);
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }

        if let Some(port) = args.server_port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }

        if let Some(db_url) = &args.database_url {
            self.database.url = db_url.clone();
            tracing::info!("Override database.url from CLI");
        }

        if let Some(root) = &args.storage_root {
            self.storage.root = root.clone();
            tracing::info!("Override storage.root from CLI: {}", self.storage.root);
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }

        if let Some(max) = args.max_concurrent {
            self.lookup.max_concurrent_executions = max;
            tracing::info!(
                "Override lookup.max_concurrent_executions from CLI: {}",
                self.lookup.max_concurrent_executions
            );
        }

        if let Some(secs) = args.execution_timeout {
            self.lookup.execution_timeout_seconds = secs;
            tracing::info!(
                "Override lookup.execution_timeout_seconds from CLI: {}",
                self.lookup.execution_timeout_seconds
            );
        }

        if let Some(secs) = args.queue_timeout {
            self.lookup.queue_timeout_seconds = secs;
            tracing::info!(
                "Override lookup.queue_timeout_seconds from CLI: {}",
                self.lookup.queue_timeout_seconds
            );
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.cache.ttl_hours <= 0 {
            anyhow::bail!("cache.ttl_hours must be > 0");
        }

        if self.lookup.max_concurrent_executions == 0 {
            anyhow::bail!("lookup.max_concurrent_executions must be > 0");
        }

        if self.lookup.execution_timeout_seconds == 0 || self.lookup.queue_timeout_seconds == 0 {
            anyhow::bail!("lookup timeouts must be > 0");
        }

        if self.lookup.queue_timeout_seconds < self.lookup.execution_timeout_seconds {
            tracing::warn!(
                "lookup.queue_timeout_seconds ({}) is shorter than \
                 lookup.execution_timeout_seconds ({})",
                self.lookup.queue_timeout_seconds,
                self.lookup.execution_timeout_seconds
            );
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

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://data/meridian.db".to_string() }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { root: "data/storage".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,lookup_engine=debug".to_string(),
            file: Some("logs/meridian.log".to_string()),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_hours: 24, key_prefix: "lookup:llm:".to_string() }
    }
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            request_timeout_seconds: 30,
        }
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 10,
            execution_timeout_seconds: 30,
            queue_timeout_seconds: 120,
        }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self { base_url: "http://localhost:3010".to_string() }
    }
}
