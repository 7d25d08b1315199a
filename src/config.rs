use std::{str::FromStr, time::Duration};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub api_key: String,
    pub api_url: String,
    pub coder_model: String,
    pub chat_model: String,
    pub timeout: Duration,
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: Environment,
    pub database_url: String,
    pub sandbox_database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    pub migrations_path: String,
    pub jwt_secret: String,
    pub jwt_expires_in: Duration,
    pub ai: AiConfig,
    pub frontend_url: String,
    pub static_dir: String,
    pub api_rate_limit: RateLimitConfig,
    pub ai_rate_limit: RateLimitConfig,
}

const DEV_JWT_SECRET: &str = "sqlcoach-development-secret";

impl Config {
    /// Reads configuration from the process environment, loading `.env` first.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match get("APP_ENV").as_deref() {
            None | Some("development") => Environment::Development,
            Some("production") => Environment::Production,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "APP_ENV",
                    value: other.to_string(),
                })
            }
        };

        let jwt_secret = match get("JWT_SECRET") {
            Some(secret) => secret,
            None if environment == Environment::Development => DEV_JWT_SECRET.to_string(),
            None => return Err(ConfigError::Missing("JWT_SECRET")),
        };

        let jwt_expires_in = match get("JWT_EXPIRES_IN") {
            Some(raw) => parse_duration(&raw).ok_or(ConfigError::Invalid {
                key: "JWT_EXPIRES_IN",
                value: raw,
            })?,
            None => Duration::from_secs(7 * 24 * 60 * 60),
        };

        Ok(Config {
            port: parse_or(&get, "PORT", 3000)?,
            environment,
            database_url: get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            sandbox_database_url: get("SANDBOX_DATABASE_URL"),
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 20)?,
            db_acquire_timeout: Duration::from_secs(parse_or(&get, "DB_ACQUIRE_TIMEOUT_SECS", 10)?),
            migrations_path: get("MIGRATIONS_PATH").unwrap_or_else(|| "migrations".to_string()),
            jwt_secret,
            jwt_expires_in,
            ai: AiConfig {
                api_key: get("QWEN_API_KEY").ok_or(ConfigError::Missing("QWEN_API_KEY"))?,
                api_url: get("QWEN_API_URL").unwrap_or_else(|| {
                    "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions".to_string()
                }),
                coder_model: get("QWEN_CODER_MODEL")
                    .unwrap_or_else(|| "qwen3-coder-plus".to_string()),
                chat_model: get("QWEN_MAX_MODEL").unwrap_or_else(|| "qwen-max".to_string()),
                timeout: Duration::from_secs(parse_or(&get, "AI_TIMEOUT_SECS", 60)?),
            },
            frontend_url: get("FRONTEND_URL")
                .unwrap_or_else(|| "http://localhost:5173".to_string()),
            static_dir: get("STATIC_DIR").unwrap_or_else(|| "frontend/dist".to_string()),
            api_rate_limit: RateLimitConfig {
                max_requests: parse_or(&get, "API_RATE_LIMIT", 100)?,
                window: Duration::from_secs(parse_or(&get, "API_RATE_WINDOW_SECS", 15 * 60)?),
            },
            ai_rate_limit: RateLimitConfig {
                max_requests: parse_or(&get, "AI_RATE_LIMIT", 10)?,
                window: Duration::from_secs(parse_or(&get, "AI_RATE_WINDOW_SECS", 60)?),
            },
        })
    }

    pub fn is_dev(&self) -> bool {
        self.environment == Environment::Development
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

/// Parses durations such as `90`, `30s`, `15m`, `12h` or `7d`. A bare number is seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let amount: u64 = digits.parse().ok()?;
    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => return None,
    };
    Some(Duration::from_secs(amount.checked_mul(multiplier)?))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/sqlcoach"),
            ("QWEN_API_KEY", "sk-test"),
        ]))
        .unwrap();

        assert_eq!(config.port, 3000);
        assert!(config.is_dev());
        assert_eq!(config.jwt_secret, DEV_JWT_SECRET);
        assert_eq!(config.jwt_expires_in, Duration::from_secs(604_800));
        assert_eq!(config.ai.coder_model, "qwen3-coder-plus");
        assert_eq!(config.ai.chat_model, "qwen-max");
        assert_eq!(config.api_rate_limit.max_requests, 100);
        assert_eq!(config.api_rate_limit.window, Duration::from_secs(900));
        assert_eq!(config.ai_rate_limit.max_requests, 10);
        assert_eq!(config.ai_rate_limit.window, Duration::from_secs(60));
        assert!(config.sandbox_database_url.is_none());
    }

    #[test]
    fn test_missing_api_key() {
        let err = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://x")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("QWEN_API_KEY"));
    }

    #[test]
    fn test_production_requires_jwt_secret() {
        let err = Config::from_lookup(lookup(&[
            ("APP_ENV", "production"),
            ("DATABASE_URL", "postgres://x"),
            ("QWEN_API_KEY", "sk-test"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("JWT_SECRET"));
    }

    #[test]
    fn test_invalid_port() {
        let err = Config::from_lookup(lookup(&[
            ("PORT", "eighty"),
            ("DATABASE_URL", "postgres://x"),
            ("QWEN_API_KEY", "sk-test"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("7d"), Some(Duration::from_secs(604_800)));
        assert_eq!(parse_duration("12h"), Some(Duration::from_secs(43_200)));
        assert_eq!(parse_duration("15m"), Some(Duration::from_secs(900)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("3w"), None);
        assert_eq!(parse_duration("d"), None);
    }
}
