//! Environment-driven configuration.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::provider::{
    AfricasTalkingClient, AfricasTalkingConfig, Environment, MockTelecomProvider, TelecomProvider,
};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SESSION_TTL_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub at_username: Option<String>,
    pub at_api_key: Option<String>,
    pub at_environment: Environment,
    pub session_ttl: Duration,
    pub scheduler_tick: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let at_environment = match std::env::var("AT_ENVIRONMENT").as_deref() {
            Ok("production") => Environment::Production,
            _ => Environment::Sandbox,
        };
        Config {
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            at_username: std::env::var("AT_USERNAME").ok().filter(|s| !s.is_empty()),
            at_api_key: std::env::var("AT_API_KEY").ok().filter(|s| !s.is_empty()),
            at_environment,
            session_ttl: Duration::from_secs(
                std::env::var("SESSION_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SESSION_TTL_SECS),
            ),
            scheduler_tick: Duration::from_secs(30),
        }
    }

    /// The configured provider backend, or the recording mock when the
    /// credentials are absent.
    pub fn provider(&self) -> Arc<dyn TelecomProvider> {
        match (&self.at_username, &self.at_api_key) {
            (Some(username), Some(api_key)) => Arc::new(AfricasTalkingClient::new(
                AfricasTalkingConfig::new(username.clone(), api_key.clone(), self.at_environment),
            )),
            _ => {
                warn!("AT_USERNAME/AT_API_KEY not set, using the mock telecom provider");
                Arc::new(MockTelecomProvider::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        // Environment variables are process-global; only assert on the
        // defaults that do not depend on ambient state.
        let config = Config {
            port: DEFAULT_PORT,
            at_username: None,
            at_api_key: None,
            at_environment: Environment::Sandbox,
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            scheduler_tick: Duration::from_secs(30),
        };
        assert_eq!(config.port, 8080);
        assert!(matches!(config.at_environment, Environment::Sandbox));
    }
}
