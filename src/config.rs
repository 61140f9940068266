//! Service configuration

use std::time::Duration;
use anyhow::Context;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub nats_url: Option<String>,
    pub currency: String,
    pub op_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            port: std::env::var("PORT").unwrap_or_else(|_| "8083".to_string()).parse().context("invalid PORT")?,
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            nats_url: std::env::var("NATS_URL").ok(),
            currency: std::env::var("STORE_CURRENCY").unwrap_or_else(|_| "INR".to_string()),
            op_timeout: Duration::from_millis(
                std::env::var("CART_OP_TIMEOUT_MS").unwrap_or_else(|_| "5000".to_string())
                    .parse().context("invalid CART_OP_TIMEOUT_MS")?,
            ),
        })
    }
}
