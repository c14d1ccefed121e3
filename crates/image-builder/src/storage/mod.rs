//! Org-scoped persistence for composes, clones and blueprints.
//!
//! Every lookup takes the caller's org id and filters on it in the query
//! itself: a row owned by another org is reported exactly like a missing
//! one. Composes are never removed, only flagged deleted, so quota
//! accounting keeps seeing them.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("expected {expected} affected rows, got {actual}")]
    RowsAffected { expected: u64, actual: u64 },
}

/// Compose row as returned to callers.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ComposeEntry {
    pub id: Uuid,
    pub request: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub image_name: Option<String>,
    pub client_id: Option<String>,
    pub blueprint_id: Option<Uuid>,
    pub blueprint_version: Option<i32>,
}

/// A compose accepted by the build service.
#[derive(Debug, Clone)]
pub struct NewCompose {
    pub id: Uuid,
    pub org_id: String,
    pub account_number: String,
    pub email: String,
    pub image_name: Option<String>,
    /// Caller's request, passwords already removed
    pub request: serde_json::Value,
    pub client_id: Option<String>,
    pub blueprint_version_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct CloneEntry {
    pub id: Uuid,
    pub compose_id: Uuid,
    pub request: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One version of a blueprint, the latest unless a version was asked for.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct BlueprintEntry {
    pub id: Uuid,
    pub version_id: Uuid,
    pub version: i32,
    pub name: String,
    pub description: String,
    pub body: serde_json::Value,
    pub last_modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct BlueprintSummary {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub version: i32,
    pub last_modified_at: DateTime<Utc>,
}

/// Blueprint write: used for inserts (version 1) and updates (next version).
#[derive(Debug, Clone)]
pub struct BlueprintWrite {
    pub id: Uuid,
    pub version_id: Uuid,
    pub org_id: String,
    pub account_number: String,
    pub name: String,
    pub description: String,
    pub body: serde_json::Value,
}

/// Optional blueprint list filters.
#[derive(Debug, Clone, Default)]
pub struct BlueprintFilter {
    /// Exact name match
    pub name: Option<String>,
    /// Case-insensitive substring of name or description
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_compose(&self, compose: NewCompose) -> Result<(), StoreError>;

    /// Active (not deleted) compose owned by `org_id`.
    async fn get_compose(&self, id: Uuid, org_id: &str) -> Result<ComposeEntry, StoreError>;

    /// Active composes created within `window`, newest first, with the total
    /// count of such composes.
    async fn get_composes(
        &self,
        org_id: &str,
        window: Duration,
        page: Page,
    ) -> Result<(Vec<ComposeEntry>, i64), StoreError>;

    /// Composes created within `window`, deleted ones included.
    async fn count_composes_since(&self, org_id: &str, window: Duration)
        -> Result<i64, StoreError>;

    /// Image type of the first image request of a compose.
    async fn get_compose_image_type(&self, id: Uuid, org_id: &str) -> Result<String, StoreError>;

    async fn delete_compose(&self, id: Uuid, org_id: &str) -> Result<(), StoreError>;

    /// Fails unless the parent compose exists.
    async fn insert_clone(
        &self,
        compose_id: Uuid,
        clone_id: Uuid,
        request: serde_json::Value,
    ) -> Result<(), StoreError>;

    async fn get_clone(&self, id: Uuid, org_id: &str) -> Result<CloneEntry, StoreError>;

    async fn get_clones_for_compose(
        &self,
        compose_id: Uuid,
        org_id: &str,
        page: Page,
    ) -> Result<(Vec<CloneEntry>, i64), StoreError>;

    /// Insert a blueprint with its first version. Names are unique per org.
    async fn insert_blueprint(&self, blueprint: BlueprintWrite) -> Result<(), StoreError>;

    /// The given version of a blueprint, or its latest when `version` is `None`.
    async fn get_blueprint(
        &self,
        id: Uuid,
        org_id: &str,
        version: Option<i32>,
    ) -> Result<BlueprintEntry, StoreError>;

    /// Rename and append a new version atomically. Returns the new version.
    async fn update_blueprint(&self, update: BlueprintWrite) -> Result<i32, StoreError>;

    async fn delete_blueprint(
        &self,
        id: Uuid,
        org_id: &str,
        account_number: &str,
    ) -> Result<(), StoreError>;

    async fn find_blueprints(
        &self,
        org_id: &str,
        filter: &BlueprintFilter,
        page: Page,
    ) -> Result<(Vec<BlueprintSummary>, i64), StoreError>;

    async fn get_blueprint_composes(
        &self,
        org_id: &str,
        blueprint_id: Uuid,
        version: Option<i32>,
        window: Duration,
        page: Page,
    ) -> Result<(Vec<ComposeEntry>, i64), StoreError>;
}
