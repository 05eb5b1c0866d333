mod api_key;
mod none;
mod traits;
mod types;

pub use api_key::ApiKeyAuthenticator;
pub use none::NoneAuthenticator;
pub use traits::{AuthError, Authenticator};
pub use types::{AuthRequest, Identity};

use crate::config::{AuthConfig, AuthMethod};

/// Build the authenticator selected by the `[auth]` section.
pub fn create_authenticator(config: &AuthConfig) -> Result<Box<dyn Authenticator>, AuthError> {
    match config.method {
        AuthMethod::None => Ok(Box::new(NoneAuthenticator::new())),
        AuthMethod::ApiKey => {
            let api_key = config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    AuthError::ConfigurationError(
                        "api_key must be set when using ApiKey auth method".to_string(),
                    )
                })?;
            Ok(Box::new(ApiKeyAuthenticator::new(
                api_key,
                config.operator.clone(),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_config(method: AuthMethod, api_key: Option<&str>) -> AuthConfig {
        AuthConfig {
            method,
            api_key: api_key.map(str::to_string),
            operator: "operator".to_string(),
        }
    }

    #[test]
    fn test_create_authenticator_none() {
        let auth = create_authenticator(&auth_config(AuthMethod::None, None)).unwrap();
        assert_eq!(auth.method_name(), "none");
    }

    #[test]
    fn test_create_authenticator_api_key() {
        let auth =
            create_authenticator(&auth_config(AuthMethod::ApiKey, Some("secret-key"))).unwrap();
        assert_eq!(auth.method_name(), "api_key");
    }

    #[test]
    fn test_create_authenticator_api_key_missing_key() {
        let result = create_authenticator(&auth_config(AuthMethod::ApiKey, None));
        assert!(matches!(result, Err(AuthError::ConfigurationError(_))));

        let result = create_authenticator(&auth_config(AuthMethod::ApiKey, Some("")));
        assert!(matches!(result, Err(AuthError::ConfigurationError(_))));
    }
}
