use super::{types::Config, ConfigError};
use crate::blocklist::Blocklist;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&config.history.min_similarity) {
        return Err(ConfigError::ValidationError(format!(
            "history.min_similarity must be within [0, 1], got {}",
            config.history.min_similarity
        )));
    }

    if config.triage.window == 0 {
        return Err(ConfigError::ValidationError(
            "triage.window cannot be 0".to_string(),
        ));
    }

    if config.triage.probe_concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "triage.probe_concurrency cannot be 0".to_string(),
        ));
    }

    if config.prefetch.count == 0 {
        return Err(ConfigError::ValidationError(
            "prefetch.count cannot be 0".to_string(),
        ));
    }

    if config.resolver.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "resolver.max_attempts cannot be 0".to_string(),
        ));
    }

    if config.watcher.reconnect_base_ms == 0
        || config.watcher.reconnect_base_ms > config.watcher.reconnect_max_ms
    {
        return Err(ConfigError::ValidationError(format!(
            "watcher reconnect bounds invalid: base {}ms, max {}ms",
            config.watcher.reconnect_base_ms, config.watcher.reconnect_max_ms
        )));
    }

    Blocklist::from_rules(&config.blocklist.rules)
        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

    Ok(())
}
