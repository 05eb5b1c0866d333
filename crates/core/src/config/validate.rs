use super::{types::Config, AuthMethod, ConfigError};

/// Largest accepted `fate.max_weight`.
pub const MAX_WEIGHT_LIMIT: u32 = 10_000;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - API key auth carries a non-empty key
/// - Fate limits are usable (weight cap in 1..=MAX_WEIGHT_LIMIT, page sizes in range)
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.auth.method == AuthMethod::ApiKey
        && config.auth.api_key.as_deref().map_or(true, str::is_empty)
    {
        return Err(ConfigError::ValidationError(
            "auth.api_key must be set when auth.method = \"api_key\"".to_string(),
        ));
    }

    let fate = &config.fate;
    if fate.max_weight == 0 {
        return Err(ConfigError::ValidationError(
            "fate.max_weight cannot be 0".to_string(),
        ));
    }
    if fate.max_weight > MAX_WEIGHT_LIMIT {
        return Err(ConfigError::ValidationError(format!(
            "fate.max_weight cannot exceed {}",
            MAX_WEIGHT_LIMIT
        )));
    }
    if fate.max_page_size == 0 {
        return Err(ConfigError::ValidationError(
            "fate.max_page_size cannot be 0".to_string(),
        ));
    }
    if fate.default_page_size == 0 || fate.default_page_size > fate.max_page_size {
        return Err(ConfigError::ValidationError(format!(
            "fate.default_page_size must be between 1 and {}",
            fate.max_page_size
        )));
    }

    Ok(())
}
