use serde::Deserialize;

use crate::scoring::TierCutpoints;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub matching_base_url: String,
    pub matching_api_key: String,
    /// Bearer token required on every API endpoint.
    pub api_token: String,
    /// Bearer token required for bureau-fill execution (admin role).
    pub admin_token: String,
    /// Hex-encoded 32-byte key for the PII cipher.
    pub pii_key_hex: String,
    pub tier_cutpoints: TierCutpoints,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            matching_base_url: std::env::var("MATCHING_BASE_URL")
                .map_err(|_| anyhow::anyhow!("MATCHING_BASE_URL environment variable required"))
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("MATCHING_BASE_URL cannot be empty");
                    }
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("MATCHING_BASE_URL must start with http:// or https://");
                    }
                    Ok(url)
                })?,
            matching_api_key: std::env::var("MATCHING_API_KEY")
                .map_err(|_| anyhow::anyhow!("MATCHING_API_KEY environment variable required"))
                .and_then(|key| {
                    if key.trim().is_empty() {
                        anyhow::bail!("MATCHING_API_KEY cannot be empty");
                    }
                    Ok(key)
                })?,
            api_token: std::env::var("API_TOKEN")
                .map_err(|_| anyhow::anyhow!("API_TOKEN environment variable required"))
                .and_then(|token| {
                    if token.trim().is_empty() {
                        anyhow::bail!("API_TOKEN cannot be empty");
                    }
                    Ok(token)
                })?,
            admin_token: std::env::var("ADMIN_TOKEN")
                .map_err(|_| anyhow::anyhow!("ADMIN_TOKEN environment variable required"))
                .and_then(|token| {
                    if token.trim().is_empty() {
                        anyhow::bail!("ADMIN_TOKEN cannot be empty");
                    }
                    Ok(token)
                })?,
            pii_key_hex: std::env::var("PII_KEY")
                .map_err(|_| anyhow::anyhow!("PII_KEY environment variable required"))
                .and_then(|key| {
                    let decoded = hex::decode(key.trim())
                        .map_err(|_| anyhow::anyhow!("PII_KEY must be hex-encoded"))?;
                    if decoded.len() != 32 {
                        anyhow::bail!("PII_KEY must decode to exactly 32 bytes");
                    }
                    Ok(key)
                })?,
            tier_cutpoints: TierCutpoints {
                tier_1_min: parse_cutpoint("TIER1_MIN", 720)?,
                tier_2_min: parse_cutpoint("TIER2_MIN", 680)?,
                tier_3_min: parse_cutpoint("TIER3_MIN", 640)?,
            },
        };

        if config.tier_cutpoints.tier_1_min <= config.tier_cutpoints.tier_2_min
            || config.tier_cutpoints.tier_2_min <= config.tier_cutpoints.tier_3_min
        {
            anyhow::bail!("Tier cutpoints must be strictly descending: TIER1_MIN > TIER2_MIN > TIER3_MIN");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Matching Base URL: {}", config.matching_base_url);
        tracing::debug!(
            "Tier cutpoints: {}/{}/{}",
            config.tier_cutpoints.tier_1_min,
            config.tier_cutpoints.tier_2_min,
            config.tier_cutpoints.tier_3_min
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}

fn parse_cutpoint(var: &str, default: i32) -> anyhow::Result<i32> {
    match std::env::var(var) {
        Ok(v) => v
            .parse::<i32>()
            .map_err(|_| anyhow::anyhow!("{} must be an integer credit score", var)),
        Err(_) => Ok(default),
    }
}
