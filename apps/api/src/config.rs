use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub embeddings_enabled: bool,
    pub cors: CorsConfig,
    pub host: String,
    pub port: u16,
    pub rust_log: String,
}

/// Connection and pool settings for PostgreSQL.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    /// Database used during bootstrap to create `name` when it is missing.
    pub admin_database: String,
    pub pool_size: u32,
    pub acquire_timeout: Duration,
    pub max_lifetime: Option<Duration>,
    pub pre_ping: bool,
    pub log_statements: bool,
}

/// Prints every field except the password.
impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .field("admin_database", &self.admin_database)
            .field("pool_size", &self.pool_size)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("max_lifetime", &self.max_lifetime)
            .field("pre_ping", &self.pre_ping)
            .field("log_statements", &self.log_statements)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsConfig {
    /// Any origin, method and header.
    Permissive,
    AllowList(Vec<String>),
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let database = DatabaseConfig {
            host: env.or("DB_HOST", "localhost"),
            port: env.parse_or("DB_PORT", 5432)?,
            user: env.require("DB_USER")?,
            password: env.require("DB_PASSWORD")?,
            name: env.or("DB_NAME", "db_test"),
            admin_database: env.or("DB_ADMIN_DATABASE", "postgres"),
            pool_size: env.parse_or("DB_POOL_SIZE", 10)?,
            acquire_timeout: Duration::from_secs(env.parse_or("DB_ACQUIRE_TIMEOUT_SECS", 30)?),
            max_lifetime: env
                .parse_opt::<u64>("DB_MAX_LIFETIME_SECS")?
                .map(Duration::from_secs),
            pre_ping: env.flag("DB_PRE_PING")?,
            log_statements: env.flag("DB_LOG_STATEMENTS")?,
        };

        if database.pool_size == 0 {
            bail!("DB_POOL_SIZE must be at least 1");
        }
        if database.name.trim().is_empty() {
            bail!("DB_NAME must not be empty");
        }

        Ok(Config {
            database,
            embeddings_enabled: env.flag("EMBEDDINGS_ENABLED")?,
            cors: parse_cors(&env.or("CORS_ALLOWED_ORIGINS", "*")),
            host: env.or("HOST", "0.0.0.0"),
            port: env.parse_or("PORT", 8000)?,
            rust_log: env.or("RUST_LOG", "info"),
        })
    }
}

fn parse_cors(raw: &str) -> CorsConfig {
    let origins: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect();

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        CorsConfig::Permissive
    } else {
        CorsConfig::AllowList(origins)
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn require(&self, key: &str) -> Result<String> {
        self.get(key)
            .with_context(|| format!("Required environment variable '{key}' is not set"))
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_opt<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        self.get(key)
            .map(|raw| {
                raw.trim()
                    .parse::<T>()
                    .with_context(|| format!("{key} has an invalid value '{raw}'"))
            })
            .transpose()
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        Ok(self.parse_opt(key)?.unwrap_or(default))
    }

    fn flag(&self, key: &str) -> Result<bool> {
        match self.get(key) {
            None => Ok(false),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => bail!("{key} must be a boolean, got '{other}'"),
            },
        }
    }
}
