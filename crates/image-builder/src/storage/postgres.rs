//! PostgreSQL store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;
use uuid::Uuid;

use super::{
    BlueprintEntry, BlueprintFilter, BlueprintSummary, BlueprintWrite, CloneEntry, ComposeEntry,
    NewCompose, Page, Store, StoreError,
};

const COMPOSE_COLUMNS: &str = "
    composes.job_id AS id, composes.request, composes.created_at, composes.image_name,
    composes.client_id, blueprint_versions.blueprint_id, blueprint_versions.version AS blueprint_version";

const SQL_INSERT_COMPOSE: &str = "
    INSERT INTO composes(job_id, request, created_at, account_number, org_id, email, image_name,
                         client_id, blueprint_version_id)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)";

const SQL_COUNT_COMPOSES_SINCE: &str = "
    SELECT COUNT(*) FROM composes
    WHERE org_id = $1 AND created_at >= $2";

const SQL_COUNT_ACTIVE_COMPOSES_SINCE: &str = "
    SELECT COUNT(*) FROM composes
    WHERE org_id = $1 AND created_at >= $2 AND deleted = FALSE";

const SQL_GET_COMPOSE_IMAGE_TYPE: &str = "
    SELECT request->'image_requests'->0->>'image_type'
    FROM composes
    WHERE org_id = $1 AND job_id = $2 AND deleted = FALSE";

const SQL_DELETE_COMPOSE: &str = "
    UPDATE composes SET deleted = TRUE
    WHERE org_id = $1 AND job_id = $2 AND deleted = FALSE";

const SQL_INSERT_CLONE: &str = "
    INSERT INTO clones(id, compose_id, request, created_at)
    VALUES ($1, $2, $3, CURRENT_TIMESTAMP)";

const SQL_GET_CLONE: &str = "
    SELECT clones.id, clones.compose_id, clones.request, clones.created_at
    FROM clones
    WHERE clones.id = $1 AND clones.compose_id IN (
        SELECT composes.job_id FROM composes WHERE composes.org_id = $2)";

const SQL_GET_CLONES_FOR_COMPOSE: &str = "
    SELECT clones.id, clones.compose_id, clones.request, clones.created_at
    FROM clones
    WHERE clones.compose_id = $1 AND $1 IN (
        SELECT composes.job_id FROM composes WHERE composes.org_id = $2)
    ORDER BY clones.created_at DESC
    LIMIT $3 OFFSET $4";

const SQL_COUNT_CLONES_FOR_COMPOSE: &str = "
    SELECT COUNT(*)
    FROM clones
    WHERE clones.compose_id = $1 AND $1 IN (
        SELECT composes.job_id FROM composes WHERE composes.org_id = $2)";

const SQL_INSERT_BLUEPRINT: &str = "
    INSERT INTO blueprints(id, org_id, account_number, name, description)
    VALUES ($1, $2, $3, $4, $5)";

const SQL_INSERT_VERSION: &str = "
    INSERT INTO blueprint_versions(id, blueprint_id, version, body)
    VALUES ($1, $2, $3, $4)";

const SQL_GET_BLUEPRINT: &str = "
    SELECT blueprints.id, blueprint_versions.id AS version_id, blueprint_versions.version,
           blueprints.name, blueprints.description, blueprint_versions.body,
           blueprint_versions.created_at AS last_modified_at
    FROM blueprints INNER JOIN blueprint_versions ON blueprint_versions.blueprint_id = blueprints.id
    WHERE blueprints.id = $1 AND blueprints.org_id = $2
        AND ($3::int IS NULL OR blueprint_versions.version = $3)
    ORDER BY blueprint_versions.version DESC
    LIMIT 1";

const SQL_UPDATE_BLUEPRINT: &str = "
    UPDATE blueprints SET name = $4, description = $5
    WHERE id = $1 AND org_id = $2 AND account_number = $3";

const SQL_UPDATE_BLUEPRINT_VERSION: &str = "
    INSERT INTO blueprint_versions(id, blueprint_id, version, body)
    SELECT $1, $2, MAX(version) + 1, $3
    FROM blueprint_versions
    WHERE blueprint_id = $2
    RETURNING version";

const SQL_DELETE_BLUEPRINT: &str = "
    DELETE FROM blueprints WHERE id = $1 AND org_id = $2 AND account_number = $3";

const SQL_FIND_BLUEPRINTS: &str = "
    SELECT blueprints.id, blueprints.name, blueprints.description,
           MAX(blueprint_versions.version) AS version,
           MAX(blueprint_versions.created_at) AS last_modified_at
    FROM blueprints INNER JOIN blueprint_versions ON blueprint_versions.blueprint_id = blueprints.id
    WHERE blueprints.org_id = $1
        AND ($2::text IS NULL OR blueprints.name = $2)
        AND ($3::text IS NULL OR blueprints.name ILIKE $3 OR blueprints.description ILIKE $3)
    GROUP BY blueprints.id
    ORDER BY last_modified_at DESC
    LIMIT $4 OFFSET $5";

const SQL_COUNT_BLUEPRINTS: &str = "
    SELECT COUNT(*) FROM blueprints
    WHERE org_id = $1
        AND ($2::text IS NULL OR name = $2)
        AND ($3::text IS NULL OR name ILIKE $3 OR description ILIKE $3)";

const BLUEPRINT_COMPOSES_FILTER: &str = "
    WHERE composes.org_id = $1
        AND blueprint_versions.blueprint_id = $2
        AND ($3::integer IS NULL OR blueprint_versions.version = $3)
        AND composes.created_at >= $4
        AND composes.deleted = FALSE";

/// Unique-violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

fn conflict_or_db(err: sqlx::Error, what: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::Conflict(format!("{} already exists", what))
        }
        _ => StoreError::Database(err),
    }
}

fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect, optionally applying pending migrations.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        run_migrations: bool,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        if run_migrations {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run database migrations")?;
            info!("Database migrations applied");
        }

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn insert_compose(&self, compose: NewCompose) -> Result<(), StoreError> {
        sqlx::query(SQL_INSERT_COMPOSE)
            .bind(compose.id)
            .bind(&compose.request)
            .bind(compose.created_at)
            .bind(&compose.account_number)
            .bind(&compose.org_id)
            .bind(&compose.email)
            .bind(&compose.image_name)
            .bind(&compose.client_id)
            .bind(compose.blueprint_version_id)
            .execute(&self.pool)
            .await
            .map_err(|e| conflict_or_db(e, "compose"))?;
        Ok(())
    }

    async fn get_compose(&self, id: Uuid, org_id: &str) -> Result<ComposeEntry, StoreError> {
        let sql = format!(
            "SELECT {} FROM composes
             LEFT JOIN blueprint_versions ON composes.blueprint_version_id = blueprint_versions.id
             WHERE composes.org_id = $1 AND composes.job_id = $2 AND composes.deleted = FALSE",
            COMPOSE_COLUMNS
        );
        sqlx::query_as::<_, ComposeEntry>(&sql)
            .bind(org_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("compose"))
    }

    async fn get_composes(
        &self,
        org_id: &str,
        window: Duration,
        page: Page,
    ) -> Result<(Vec<ComposeEntry>, i64), StoreError> {
        let since = Utc::now() - window;
        let sql = format!(
            "SELECT {} FROM composes
             LEFT JOIN blueprint_versions ON composes.blueprint_version_id = blueprint_versions.id
             WHERE composes.org_id = $1 AND composes.created_at >= $2 AND composes.deleted = FALSE
             ORDER BY composes.created_at DESC
             LIMIT $3 OFFSET $4",
            COMPOSE_COLUMNS
        );
        let entries = sqlx::query_as::<_, ComposeEntry>(&sql)
            .bind(org_id)
            .bind(since)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;

        let (count,): (i64,) = sqlx::query_as(SQL_COUNT_ACTIVE_COMPOSES_SINCE)
            .bind(org_id)
            .bind(since)
            .fetch_one(&self.pool)
            .await?;

        Ok((entries, count))
    }

    async fn count_composes_since(
        &self,
        org_id: &str,
        window: Duration,
    ) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(SQL_COUNT_COMPOSES_SINCE)
            .bind(org_id)
            .bind(Utc::now() - window)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn get_compose_image_type(&self, id: Uuid, org_id: &str) -> Result<String, StoreError> {
        let row: Option<(Option<String>,)> = sqlx::query_as(SQL_GET_COMPOSE_IMAGE_TYPE)
            .bind(org_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.and_then(|(image_type,)| image_type)
            .ok_or(StoreError::NotFound("compose"))
    }

    async fn delete_compose(&self, id: Uuid, org_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(SQL_DELETE_COMPOSE)
            .bind(org_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        match result.rows_affected() {
            0 => Err(StoreError::NotFound("compose")),
            1 => Ok(()),
            actual => Err(StoreError::RowsAffected {
                expected: 1,
                actual,
            }),
        }
    }

    async fn insert_clone(
        &self,
        compose_id: Uuid,
        clone_id: Uuid,
        request: serde_json::Value,
    ) -> Result<(), StoreError> {
        sqlx::query(SQL_INSERT_CLONE)
            .bind(clone_id)
            .bind(compose_id)
            .bind(request)
            .execute(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                    StoreError::NotFound("compose")
                }
                _ => StoreError::Database(e),
            })?;
        Ok(())
    }

    async fn get_clone(&self, id: Uuid, org_id: &str) -> Result<CloneEntry, StoreError> {
        sqlx::query_as::<_, CloneEntry>(SQL_GET_CLONE)
            .bind(id)
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("clone"))
    }

    async fn get_clones_for_compose(
        &self,
        compose_id: Uuid,
        org_id: &str,
        page: Page,
    ) -> Result<(Vec<CloneEntry>, i64), StoreError> {
        let clones = sqlx::query_as::<_, CloneEntry>(SQL_GET_CLONES_FOR_COMPOSE)
            .bind(compose_id)
            .bind(org_id)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;

        let (count,): (i64,) = sqlx::query_as(SQL_COUNT_CLONES_FOR_COMPOSE)
            .bind(compose_id)
            .bind(org_id)
            .fetch_one(&self.pool)
            .await?;

        Ok((clones, count))
    }

    async fn insert_blueprint(&self, blueprint: BlueprintWrite) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(SQL_INSERT_BLUEPRINT)
            .bind(blueprint.id)
            .bind(&blueprint.org_id)
            .bind(&blueprint.account_number)
            .bind(&blueprint.name)
            .bind(&blueprint.description)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_or_db(e, "blueprint"))?;

        sqlx::query(SQL_INSERT_VERSION)
            .bind(blueprint.version_id)
            .bind(blueprint.id)
            .bind(1_i32)
            .bind(&blueprint.body)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_blueprint(
        &self,
        id: Uuid,
        org_id: &str,
        version: Option<i32>,
    ) -> Result<BlueprintEntry, StoreError> {
        sqlx::query_as::<_, BlueprintEntry>(SQL_GET_BLUEPRINT)
            .bind(id)
            .bind(org_id)
            .bind(version)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("blueprint"))
    }

    async fn update_blueprint(&self, update: BlueprintWrite) -> Result<i32, StoreError> {
        let mut tx = self.pool.begin().await?;

        // the owner check happens here; nothing else runs for a foreign blueprint
        let renamed = sqlx::query(SQL_UPDATE_BLUEPRINT)
            .bind(update.id)
            .bind(&update.org_id)
            .bind(&update.account_number)
            .bind(&update.name)
            .bind(&update.description)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_or_db(e, "blueprint"))?;
        if renamed.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(StoreError::NotFound("blueprint"));
        }

        let (version,): (i32,) = sqlx::query_as(SQL_UPDATE_BLUEPRINT_VERSION)
            .bind(update.version_id)
            .bind(update.id)
            .bind(&update.body)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(version)
    }

    async fn delete_blueprint(
        &self,
        id: Uuid,
        org_id: &str,
        account_number: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(SQL_DELETE_BLUEPRINT)
            .bind(id)
            .bind(org_id)
            .bind(account_number)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("blueprint"));
        }
        Ok(())
    }

    async fn find_blueprints(
        &self,
        org_id: &str,
        filter: &BlueprintFilter,
        page: Page,
    ) -> Result<(Vec<BlueprintSummary>, i64), StoreError> {
        let search = filter.search.as_deref().map(like_pattern);

        let items = sqlx::query_as::<_, BlueprintSummary>(SQL_FIND_BLUEPRINTS)
            .bind(org_id)
            .bind(&filter.name)
            .bind(&search)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;

        let (count,): (i64,) = sqlx::query_as(SQL_COUNT_BLUEPRINTS)
            .bind(org_id)
            .bind(&filter.name)
            .bind(&search)
            .fetch_one(&self.pool)
            .await?;

        Ok((items, count))
    }

    async fn get_blueprint_composes(
        &self,
        org_id: &str,
        blueprint_id: Uuid,
        version: Option<i32>,
        window: Duration,
        page: Page,
    ) -> Result<(Vec<ComposeEntry>, i64), StoreError> {
        let since = Utc::now() - window;
        let sql = format!(
            "SELECT {} FROM composes
             INNER JOIN blueprint_versions ON composes.blueprint_version_id = blueprint_versions.id
             {}
             ORDER BY composes.created_at DESC
             LIMIT $5 OFFSET $6",
            COMPOSE_COLUMNS, BLUEPRINT_COMPOSES_FILTER
        );
        let entries = sqlx::query_as::<_, ComposeEntry>(&sql)
            .bind(org_id)
            .bind(blueprint_id)
            .bind(version)
            .bind(since)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;

        let count_sql = format!(
            "SELECT COUNT(*) FROM composes
             INNER JOIN blueprint_versions ON composes.blueprint_version_id = blueprint_versions.id
             {}",
            BLUEPRINT_COMPOSES_FILTER
        );
        let (count,): (i64,) = sqlx::query_as(&count_sql)
            .bind(org_id)
            .bind(blueprint_id)
            .bind(version)
            .bind(since)
            .fetch_one(&self.pool)
            .await?;

        Ok((entries, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("web"), "%web%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
