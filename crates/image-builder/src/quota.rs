//! Per-org compose quota over a sliding window.
//!
//! The quota file maps org ids to `{"quota": N, "slidingWindow": ns}` and must
//! carry a `default` entry used for orgs without their own line.

use chrono::Duration;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::storage::{Store, StoreError};

/// Listing window for composes.
pub const DEFAULT_SLIDING_WINDOW_DAYS: i64 = 14;

#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("No config file for quotas found at {0}")]
    MissingFile(String),

    #[error("Failed to read quota file {path}: {message}")]
    Unreadable { path: String, message: String },

    #[error("No default values in the quotas' file {0}")]
    MissingDefault(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Quota {
    pub quota: i64,
    /// Nanoseconds
    #[serde(rename = "slidingWindow")]
    pub sliding_window: i64,
}

impl Quota {
    pub fn window(&self) -> Duration {
        Duration::nanoseconds(self.sliding_window)
    }
}

/// Quota guard. Without a file every compose is allowed.
#[derive(Debug, Clone, Default)]
pub struct QuotaGuard {
    file: Option<PathBuf>,
}

impl QuotaGuard {
    pub fn new(file: Option<PathBuf>) -> Self {
        Self {
            file: file.filter(|p| !p.as_os_str().is_empty()),
        }
    }

    pub fn disabled() -> Self {
        Self { file: None }
    }

    /// The quota that applies to `org_id`, `None` when disabled.
    /// The file is re-read on every call so edits apply without a restart.
    pub fn quota_for(&self, org_id: &str) -> Result<Option<Quota>, QuotaError> {
        let Some(path) = &self.file else {
            return Ok(None);
        };
        let quotas = read_quotas(path)?;

        quotas
            .get(org_id)
            .or_else(|| quotas.get("default"))
            .copied()
            .map(Some)
            .ok_or_else(|| QuotaError::MissingDefault(path.display().to_string()))
    }

    /// Whether `org_id` may submit one more compose.
    pub async fn check(&self, org_id: &str, store: &dyn Store) -> Result<bool, QuotaError> {
        let Some(quota) = self.quota_for(org_id)? else {
            return Ok(true);
        };

        // deleted composes still count
        let count = store.count_composes_since(org_id, quota.window()).await?;
        debug!(org_id, count, quota = quota.quota, "Checked compose quota");

        Ok(count < quota.quota)
    }
}

fn read_quotas(path: &Path) -> Result<HashMap<String, Quota>, QuotaError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => QuotaError::MissingFile(display.clone()),
        _ => QuotaError::Unreadable {
            path: display.clone(),
            message: e.to_string(),
        },
    })?;

    serde_json::from_str(&raw).map_err(|e| QuotaError::Unreadable {
        path: display,
        message: e.to_string(),
    })
}
