//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Shortest sweep cadence accepted for the dedup store.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(120);

/// Which dedup strategy guards admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupMode {
    /// Atomic conditional upsert on the backing store. Safe across producers and processes.
    Store,
    /// In-process map. Only valid with exactly one ingestion producer.
    Memory,
}

impl FromStr for DedupMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "store" => Ok(Self::Store),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::InvalidValue {
                key: "RELAY_DEDUP_MODE".into(),
                message: format!("expected 'store' or 'memory', got '{other}'"),
            }),
        }
    }
}

/// Settings for the configuration cache refresh loop.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How often the version counter is polled.
    pub check_interval: Duration,
    /// Force a reload when the snapshot is older than this.
    pub fallback_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            fallback_ttl: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// Relay configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Bot token used for outbound delivery.
    pub bot_token: SecretString,
    /// One ingestion producer is started per listener token.
    pub listener_tokens: Vec<SecretString>,
    pub db_path: PathBuf,
    pub dedup_mode: DedupMode,
    /// Rolling dedup window.
    pub code_ttl: Duration,
    pub sweep_interval: Duration,
    pub cache: CacheConfig,
    /// Upper bound on simultaneous sends during one broadcast.
    pub max_concurrent_sends: usize,
    /// How long shutdown waits for in-flight broadcasts.
    pub shutdown_grace: Duration,
    pub log_dir: Option<PathBuf>,
}

impl RelayConfig {
    /// Config with defaults for everything but the bot token.
    pub fn with_token(bot_token: SecretString) -> Self {
        Self {
            listener_tokens: vec![bot_token.clone()],
            bot_token,
            db_path: PathBuf::from("./data/promo-relay.db"),
            dedup_mode: DedupMode::Store,
            code_ttl: Duration::from_secs(3600), // 1 hour
            sweep_interval: Duration::from_secs(1500),
            cache: CacheConfig::default(),
            max_concurrent_sends: 20,
            shutdown_grace: Duration::from_secs(10),
            log_dir: None,
        }
    }

    /// Build config from environment variables, then validate it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".into()))?;
        let mut config = Self::with_token(SecretString::from(bot_token));

        if let Ok(tokens) = std::env::var("TELEGRAM_LISTENER_TOKENS") {
            let tokens = split_list(&tokens);
            if !tokens.is_empty() {
                config.listener_tokens = tokens.into_iter().map(SecretString::from).collect();
            }
        }

        if let Ok(path) = std::env::var("RELAY_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Ok(mode) = std::env::var("RELAY_DEDUP_MODE") {
            config.dedup_mode = mode.parse()?;
        }
        if let Some(secs) = env_parse::<u64>("RELAY_CODE_TTL_SECS")? {
            config.code_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("RELAY_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("RELAY_CACHE_CHECK_SECS")? {
            config.cache.check_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("RELAY_CACHE_FALLBACK_SECS")? {
            config.cache.fallback_ttl = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<usize>("RELAY_MAX_CONCURRENT_SENDS")? {
            config.max_concurrent_sends = n;
        }
        if let Some(secs) = env_parse::<u64>("RELAY_SHUTDOWN_GRACE_SECS")? {
            config.shutdown_grace = Duration::from_secs(secs);
        }
        config.log_dir = std::env::var("RELAY_LOG_DIR").ok().map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the relay cannot run safely.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dedup_mode == DedupMode::Memory && self.listener_tokens.len() > 1 {
            return Err(ConfigError::Conflict(format!(
                "memory dedup requires a single producer, {} listener tokens configured",
                self.listener_tokens.len()
            )));
        }
        if self.code_ttl.is_zero() {
            return Err(invalid("RELAY_CODE_TTL_SECS", "must be greater than zero"));
        }
        if self.sweep_interval < MIN_SWEEP_INTERVAL {
            return Err(invalid(
                "RELAY_SWEEP_INTERVAL_SECS",
                &format!("must be at least {}", MIN_SWEEP_INTERVAL.as_secs()),
            ));
        }
        if self.cache.check_interval.is_zero() {
            return Err(invalid("RELAY_CACHE_CHECK_SECS", "must be greater than zero"));
        }
        if self.max_concurrent_sends == 0 {
            return Err(invalid("RELAY_MAX_CONCURRENT_SENDS", "must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(key, &format!("cannot parse '{raw}'"))),
        Err(_) => Ok(None),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> SecretString {
        SecretString::from("123:ABC".to_string())
    }

    #[test]
    fn defaults_are_valid() {
        let config = RelayConfig::with_token(token());
        assert!(config.validate().is_ok());
        assert_eq!(config.code_ttl, Duration::from_secs(3600));
        assert_eq!(config.dedup_mode, DedupMode::Store);
        assert_eq!(config.listener_tokens.len(), 1);
    }

    #[test]
    fn memory_dedup_rejects_multiple_producers() {
        let mut config = RelayConfig::with_token(token());
        config.dedup_mode = DedupMode::Memory;
        config.listener_tokens = vec![token(), token()];
        assert!(matches!(config.validate(), Err(ConfigError::Conflict(_))));
    }

    #[test]
    fn memory_dedup_allows_single_producer() {
        let mut config = RelayConfig::with_token(token());
        config.dedup_mode = DedupMode::Memory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sweep_interval_has_a_floor() {
        let mut config = RelayConfig::with_token(token());
        config.sweep_interval = Duration::from_secs(5);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn dedup_mode_parses_case_insensitively() {
        assert_eq!("STORE".parse::<DedupMode>().unwrap(), DedupMode::Store);
        assert_eq!(" memory ".parse::<DedupMode>().unwrap(), DedupMode::Memory);
        assert!("redis".parse::<DedupMode>().is_err());
    }

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(split_list("a, b,,c ,"), vec!["a", "b", "c"]);
    }
}
