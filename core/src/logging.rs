use crate::config::LoggingConfig;
use anyhow::Result;

pub fn level_from_str(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

/// Install the global compact fmt subscriber. Fails if one is already set.
pub fn init(config: &LoggingConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(config.include_modules)
        .with_max_level(level_from_str(&config.level))
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_levels_default_to_info() {
        assert_eq!(level_from_str("DEBUG"), tracing::Level::DEBUG);
        assert_eq!(level_from_str("verbose"), tracing::Level::INFO);
    }
}
