use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::warn;

const DEFAULT_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
}

impl Config {
    /// Read `PAIRCHAT_*` variables from the process environment. `main`
    /// loads `.env` into it before anything else runs.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("PAIRCHAT_JWT_SECRET").unwrap_or_else(|| {
            warn!("PAIRCHAT_JWT_SECRET not set, using the development default");
            DEFAULT_JWT_SECRET.to_string()
        });

        Ok(Config {
            host: lookup("PAIRCHAT_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: lookup("PAIRCHAT_PORT")
                .unwrap_or_else(|| "3000".to_string())
                .parse()
                .context("Invalid PAIRCHAT_PORT")?,
            db_path: PathBuf::from(
                lookup("PAIRCHAT_DB_PATH").unwrap_or_else(|| "pairchat.db".to_string()),
            ),
            jwt_secret,
            token_ttl_days: lookup("PAIRCHAT_TOKEN_TTL_DAYS")
                .unwrap_or_else(|| "30".to_string())
                .parse()
                .context("Invalid PAIRCHAT_TOKEN_TTL_DAYS")?,
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
