//! Application configuration

use std::env;
use std::str::FromStr;

/// Limits applied by the chat core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatLimits {
    /// Maximum message length in characters
    pub max_message_length: usize,
    /// Capacity given to new agents when none is specified
    pub default_max_concurrent_chats: i32,
    /// Highest capacity an agent may be configured with
    pub max_concurrent_chats_ceiling: i32,
}

impl Default for ChatLimits {
    fn default() -> Self {
        Self {
            max_message_length: 1000,
            default_max_concurrent_chats: 5,
            max_concurrent_chats_ceiling: 20,
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub frontend_url: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Authentication
    pub jwt_secret: String,

    // Chat
    pub chat_limits: ChatLimits,
    pub auto_assign: bool,
    /// Seconds between stats broadcasts to the support room; 0 disables
    pub stats_interval_secs: u64,
    /// Hours of inactivity before an open session is closed; 0 disables
    pub auto_close_inactive_hours: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = ChatLimits::default();
        let chat_limits = ChatLimits {
            max_message_length: env_or("CHAT_MAX_MESSAGE_LENGTH", defaults.max_message_length),
            default_max_concurrent_chats: env_or(
                "CHAT_DEFAULT_MAX_CONCURRENT_CHATS",
                defaults.default_max_concurrent_chats,
            ),
            max_concurrent_chats_ceiling: env_or(
                "CHAT_MAX_CONCURRENT_CHATS_CEILING",
                defaults.max_concurrent_chats_ceiling,
            ),
        };
        if chat_limits.max_message_length == 0 {
            return Err(ConfigError::Invalid(
                "CHAT_MAX_MESSAGE_LENGTH must be greater than zero",
            ));
        }
        if chat_limits.default_max_concurrent_chats < 1
            || chat_limits.default_max_concurrent_chats > chat_limits.max_concurrent_chats_ceiling
        {
            return Err(ConfigError::Invalid(
                "CHAT_DEFAULT_MAX_CONCURRENT_CHATS must be between 1 and CHAT_MAX_CONCURRENT_CHATS_CEILING",
            ));
        }

        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },

            // Chat
            chat_limits,
            auto_assign: env_or("CHAT_AUTO_ASSIGN", false),
            stats_interval_secs: env_or("CHAT_STATS_INTERVAL_SECS", 60),
            auto_close_inactive_hours: env_or("CHAT_AUTO_CLOSE_INACTIVE_HOURS", 24),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    /// Helper to set required env vars for testing
    fn setup_minimal_config() {
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var(
            "JWT_SECRET",
            "test-jwt-secret-must-be-at-least-32-characters-long",
        );
    }

    /// Helper to clear env vars after tests
    fn cleanup_config() {
        for key in [
            "DATABASE_URL",
            "JWT_SECRET",
            "CHAT_MAX_MESSAGE_LENGTH",
            "CHAT_DEFAULT_MAX_CONCURRENT_CHATS",
            "CHAT_AUTO_ASSIGN",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        setup_minimal_config();

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.chat_limits, ChatLimits::default());
        assert!(!config.auto_assign);
        assert_eq!(config.stats_interval_secs, 60);
        assert_eq!(config.auto_close_inactive_hours, 24);

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_missing_database_url() {
        cleanup_config();
        env::set_var(
            "JWT_SECRET",
            "test-jwt-secret-must-be-at-least-32-characters-long",
        );

        match Config::from_env() {
            Err(ConfigError::Missing("DATABASE_URL")) => {}
            other => panic!("Expected Missing(DATABASE_URL), got: {:?}", other),
        }

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_short_jwt_secret_rejected() {
        setup_minimal_config();
        env::set_var("JWT_SECRET", "short");

        assert!(matches!(Config::from_env(), Err(ConfigError::WeakSecret(_))));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_chat_overrides_and_validation() {
        setup_minimal_config();
        env::set_var("CHAT_MAX_MESSAGE_LENGTH", "280");
        env::set_var("CHAT_AUTO_ASSIGN", "true");

        let config = Config::from_env().unwrap();
        assert_eq!(config.chat_limits.max_message_length, 280);
        assert!(config.auto_assign);

        env::set_var("CHAT_DEFAULT_MAX_CONCURRENT_CHATS", "50");
        assert!(matches!(Config::from_env(), Err(ConfigError::Invalid(_))));

        cleanup_config();
    }
}
