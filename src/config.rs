use std::collections::HashSet;

use crate::crypto::keys::{DigestAlgorithm, DEFAULT_KEY_BITS};
use crate::middleware::rate_limit::DEFAULT_CAS_RETRIES;
use crate::models::token::{DEFAULT_API_LIMIT, DEFAULT_WINDOW_SECONDS, MAX_WINDOW_SECONDS};
use crate::pipeline::PipelineConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Postgres connection string. `None` runs on the in-memory store.
    pub database_url: Option<String>,
    /// Quota for newly provisioned limited tokens.
    /// Set via KEYGATE_DEFAULT_API_LIMIT. Default: 500.
    pub default_api_limit: i64,
    /// Quota window for newly provisioned tokens, in seconds.
    /// Set via KEYGATE_DEFAULT_WINDOW_SECS. Default: 86400.
    pub default_window_seconds: i64,
    pub key_bits: usize,
    /// Signature digest recorded on newly provisioned tokens.
    /// Set via KEYGATE_DIGEST. Default: sha512.
    pub digest: DigestAlgorithm,
    /// Actions served without authentication or quota.
    pub public_actions: HashSet<String>,
    /// Actions whose POST bodies are accepted unencrypted.
    pub unencrypted_actions: HashSet<String>,
    pub cas_retries: u32,
    pub max_body_bytes: usize,
}

impl Config {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            public_actions: self.public_actions.clone(),
            unencrypted_actions: self.unencrypted_actions.clone(),
            cas_retries: self.cas_retries,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("DATABASE_URL")
        .ok()
        .filter(|s| !s.trim().is_empty());

    if database_url.is_none() {
        let env_mode = std::env::var("KEYGATE_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "DATABASE_URL is not set. The in-memory token store loses every \
                 token and quota on restart and is refused in production."
            );
        }
        eprintln!("⚠️  DATABASE_URL is not set, tokens live in memory and vanish on restart.");
    }

    let digest = match std::env::var("KEYGATE_DIGEST") {
        Ok(v) => v.parse()?,
        Err(_) => DigestAlgorithm::default(),
    };

    let default_window_seconds =
        check_window(env_or("KEYGATE_DEFAULT_WINDOW_SECS", DEFAULT_WINDOW_SECONDS))?;

    Ok(Config {
        port: env_or("KEYGATE_PORT", 8443),
        database_url,
        default_api_limit: env_or("KEYGATE_DEFAULT_API_LIMIT", DEFAULT_API_LIMIT),
        default_window_seconds,
        key_bits: env_or("KEYGATE_KEY_BITS", DEFAULT_KEY_BITS),
        digest,
        public_actions: csv_set(
            &std::env::var("KEYGATE_PUBLIC_ACTIONS").unwrap_or_else(|_| "ping".into()),
        ),
        unencrypted_actions: csv_set(
            &std::env::var("KEYGATE_UNENCRYPTED_ACTIONS").unwrap_or_default(),
        ),
        cas_retries: env_or("KEYGATE_CAS_RETRIES", DEFAULT_CAS_RETRIES),
        max_body_bytes: env_or("KEYGATE_MAX_BODY_BYTES", 1024 * 1024),
    })
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn check_window(secs: i64) -> anyhow::Result<i64> {
    if secs <= 0 || secs > MAX_WINDOW_SECONDS {
        anyhow::bail!(
            "KEYGATE_DEFAULT_WINDOW_SECS must be between 1 and {}, got {}",
            MAX_WINDOW_SECONDS,
            secs
        );
    }
    Ok(secs)
}

/// Comma-separated list into a set, ignoring blanks.
pub fn csv_set(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
