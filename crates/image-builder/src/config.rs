//! Configuration management for the image builder service
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::upload::UploadTargets;

/// Application configuration. Holds secrets; never log it whole.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the API listens on
    pub listen_address: SocketAddr,

    /// Postgres connection string; the in-memory store is used when unset
    pub database_url: Option<String>,

    /// Apply pending migrations at startup
    pub run_migrations: bool,

    pub distributions_dir: PathBuf,

    /// Quota file; unset disables the quota check
    pub quota_file: Option<PathBuf>,

    pub composer_url: String,
    pub composer_token_url: Option<String>,
    pub composer_client_id: String,
    pub composer_client_secret: String,

    pub provisioning_url: String,
    pub content_sources_url: String,
    pub compliance_url: String,

    pub aws_region: String,
    pub gcp_region: String,
    pub gcp_bucket: Option<String>,
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn with_default(name: &str, default: &str) -> String {
    optional(name).unwrap_or_else(|| default.to_string())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        let config = Config {
            listen_address: with_default("LISTEN_ADDRESS", "0.0.0.0:8086")
                .parse()
                .context("Invalid LISTEN_ADDRESS")?,

            database_url: optional("DATABASE_URL"),

            run_migrations: with_default("RUN_MIGRATIONS", "true")
                .parse()
                .context("Invalid RUN_MIGRATIONS, expected true or false")?,

            distributions_dir: with_default("DISTRIBUTIONS_DIR", "./distributions").into(),

            quota_file: optional("QUOTA_FILE").map(PathBuf::from),

            composer_url: with_default("COMPOSER_URL", ""),
            composer_token_url: optional("COMPOSER_TOKEN_URL"),
            composer_client_id: with_default("COMPOSER_CLIENT_ID", ""),
            composer_client_secret: with_default("COMPOSER_CLIENT_SECRET", ""),

            provisioning_url: with_default("PROVISIONING_URL", ""),
            content_sources_url: with_default("CONTENT_SOURCES_URL", ""),
            compliance_url: with_default("COMPLIANCE_URL", ""),

            aws_region: with_default("OSBUILD_AWS_REGION", "us-east-1"),
            gcp_region: with_default("OSBUILD_GCP_REGION", "us-east4"),
            gcp_bucket: optional("OSBUILD_GCP_BUCKET"),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.listen_address.port() == 0 {
            anyhow::bail!("LISTEN_ADDRESS must use a port greater than 0");
        }

        if self.composer_token_url.is_some()
            && (self.composer_client_id.is_empty() || self.composer_client_secret.is_empty())
        {
            anyhow::bail!(
                "COMPOSER_CLIENT_ID and COMPOSER_CLIENT_SECRET are required when COMPOSER_TOKEN_URL is set"
            );
        }

        if !self.distributions_dir.is_dir() {
            tracing::warn!(
                "Distributions directory does not exist: {}",
                self.distributions_dir.display()
            );
        }

        Ok(())
    }

    pub fn upload_targets(&self) -> UploadTargets {
        UploadTargets {
            aws_region: self.aws_region.clone(),
            gcp_region: self.gcp_region.clone(),
            gcp_bucket: self.gcp_bucket.clone(),
        }
    }
}
