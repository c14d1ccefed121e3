//! In-process store used by tests and when no database is configured.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    BlueprintEntry, BlueprintFilter, BlueprintSummary, BlueprintWrite, CloneEntry, ComposeEntry,
    NewCompose, Page, Store, StoreError,
};

struct ComposeRow {
    compose: NewCompose,
    deleted: bool,
}

struct BlueprintRow {
    org_id: String,
    account_number: String,
    name: String,
    description: String,
}

struct VersionRow {
    id: Uuid,
    blueprint_id: Uuid,
    version: i32,
    body: serde_json::Value,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    composes: HashMap<Uuid, ComposeRow>,
    clones: Vec<CloneEntry>,
    blueprints: HashMap<Uuid, BlueprintRow>,
    versions: Vec<VersionRow>,
}

impl Inner {
    fn latest_version(&self, blueprint_id: Uuid) -> Option<&VersionRow> {
        self.versions
            .iter()
            .filter(|v| v.blueprint_id == blueprint_id)
            .max_by_key(|v| v.version)
    }

    fn compose_entry(&self, row: &ComposeRow) -> ComposeEntry {
        let version = row
            .compose
            .blueprint_version_id
            .and_then(|vid| self.versions.iter().find(|v| v.id == vid));

        ComposeEntry {
            id: row.compose.id,
            request: row.compose.request.clone(),
            created_at: row.compose.created_at,
            image_name: row.compose.image_name.clone(),
            client_id: row.compose.client_id.clone(),
            blueprint_id: version.map(|v| v.blueprint_id),
            blueprint_version: version.map(|v| v.version),
        }
    }

    /// Active composes matching `keep`, newest first.
    fn active_composes(
        &self,
        org_id: &str,
        window: Duration,
        keep: impl Fn(&ComposeEntry) -> bool,
    ) -> Vec<ComposeEntry> {
        let since = Utc::now() - window;
        let mut entries: Vec<ComposeEntry> = self
            .composes
            .values()
            .filter(|r| !r.deleted && r.compose.org_id == org_id && r.compose.created_at >= since)
            .map(|r| self.compose_entry(r))
            .filter(|e| keep(e))
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries
    }

    fn owns_compose(&self, compose_id: Uuid, org_id: &str) -> bool {
        self.composes
            .get(&compose_id)
            .is_some_and(|r| r.compose.org_id == org_id)
    }
}

fn paginate<T>(items: Vec<T>, page: Page) -> (Vec<T>, i64) {
    let total = items.len() as i64;
    let page_items = items
        .into_iter()
        .skip(page.offset.max(0) as usize)
        .take(page.limit.max(0) as usize)
        .collect();
    (page_items, total)
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_compose(&self, compose: NewCompose) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.composes.contains_key(&compose.id) {
            return Err(StoreError::Conflict(format!(
                "compose {} already exists",
                compose.id
            )));
        }
        inner.composes.insert(
            compose.id,
            ComposeRow {
                compose,
                deleted: false,
            },
        );
        Ok(())
    }

    async fn get_compose(&self, id: Uuid, org_id: &str) -> Result<ComposeEntry, StoreError> {
        let inner = self.inner.read().await;
        inner
            .composes
            .get(&id)
            .filter(|r| !r.deleted && r.compose.org_id == org_id)
            .map(|r| inner.compose_entry(r))
            .ok_or(StoreError::NotFound("compose"))
    }

    async fn get_composes(
        &self,
        org_id: &str,
        window: Duration,
        page: Page,
    ) -> Result<(Vec<ComposeEntry>, i64), StoreError> {
        let inner = self.inner.read().await;
        Ok(paginate(inner.active_composes(org_id, window, |_| true), page))
    }

    async fn count_composes_since(
        &self,
        org_id: &str,
        window: Duration,
    ) -> Result<i64, StoreError> {
        let since = Utc::now() - window;
        let inner = self.inner.read().await;
        Ok(inner
            .composes
            .values()
            .filter(|r| r.compose.org_id == org_id && r.compose.created_at >= since)
            .count() as i64)
    }

    async fn get_compose_image_type(&self, id: Uuid, org_id: &str) -> Result<String, StoreError> {
        let entry = self.get_compose(id, org_id).await?;
        entry
            .request
            .pointer("/image_requests/0/image_type")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or(StoreError::NotFound("compose image type"))
    }

    async fn delete_compose(&self, id: Uuid, org_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner
            .composes
            .get_mut(&id)
            .filter(|r| !r.deleted && r.compose.org_id == org_id)
        {
            Some(row) => {
                row.deleted = true;
                Ok(())
            }
            None => Err(StoreError::NotFound("compose")),
        }
    }

    async fn insert_clone(
        &self,
        compose_id: Uuid,
        clone_id: Uuid,
        request: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.composes.contains_key(&compose_id) {
            return Err(StoreError::NotFound("compose"));
        }
        inner.clones.push(CloneEntry {
            id: clone_id,
            compose_id,
            request,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn get_clone(&self, id: Uuid, org_id: &str) -> Result<CloneEntry, StoreError> {
        let inner = self.inner.read().await;
        inner
            .clones
            .iter()
            .find(|c| c.id == id && inner.owns_compose(c.compose_id, org_id))
            .cloned()
            .ok_or(StoreError::NotFound("clone"))
    }

    async fn get_clones_for_compose(
        &self,
        compose_id: Uuid,
        org_id: &str,
        page: Page,
    ) -> Result<(Vec<CloneEntry>, i64), StoreError> {
        let inner = self.inner.read().await;
        if !inner.owns_compose(compose_id, org_id) {
            return Ok((Vec::new(), 0));
        }
        let mut clones: Vec<CloneEntry> = inner
            .clones
            .iter()
            .filter(|c| c.compose_id == compose_id)
            .cloned()
            .collect();
        clones.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(clones, page))
    }

    async fn insert_blueprint(&self, blueprint: BlueprintWrite) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner
            .blueprints
            .values()
            .any(|b| b.org_id == blueprint.org_id && b.name == blueprint.name)
        {
            return Err(StoreError::Conflict(format!(
                "blueprint {} already exists",
                blueprint.name
            )));
        }

        inner.blueprints.insert(
            blueprint.id,
            BlueprintRow {
                org_id: blueprint.org_id,
                account_number: blueprint.account_number,
                name: blueprint.name,
                description: blueprint.description,
            },
        );
        inner.versions.push(VersionRow {
            id: blueprint.version_id,
            blueprint_id: blueprint.id,
            version: 1,
            body: blueprint.body,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn get_blueprint(
        &self,
        id: Uuid,
        org_id: &str,
        version: Option<i32>,
    ) -> Result<BlueprintEntry, StoreError> {
        let inner = self.inner.read().await;
        let blueprint = inner
            .blueprints
            .get(&id)
            .filter(|b| b.org_id == org_id)
            .ok_or(StoreError::NotFound("blueprint"))?;
        let version = match version {
            Some(wanted) => inner
                .versions
                .iter()
                .find(|v| v.blueprint_id == id && v.version == wanted),
            None => inner.latest_version(id),
        }
        .ok_or(StoreError::NotFound("blueprint version"))?;

        Ok(BlueprintEntry {
            id,
            version_id: version.id,
            version: version.version,
            name: blueprint.name.clone(),
            description: blueprint.description.clone(),
            body: version.body.clone(),
            last_modified_at: version.created_at,
        })
    }

    async fn update_blueprint(&self, update: BlueprintWrite) -> Result<i32, StoreError> {
        let mut inner = self.inner.write().await;

        let owned = inner.blueprints.get(&update.id).is_some_and(|b| {
            b.org_id == update.org_id && b.account_number == update.account_number
        });
        if !owned {
            return Err(StoreError::NotFound("blueprint"));
        }
        if inner
            .blueprints
            .iter()
            .any(|(id, b)| *id != update.id && b.org_id == update.org_id && b.name == update.name)
        {
            return Err(StoreError::Conflict(format!(
                "blueprint {} already exists",
                update.name
            )));
        }

        let next = inner.latest_version(update.id).map_or(1, |v| v.version + 1);
        if let Some(row) = inner.blueprints.get_mut(&update.id) {
            row.name = update.name;
            row.description = update.description;
        }
        inner.versions.push(VersionRow {
            id: update.version_id,
            blueprint_id: update.id,
            version: next,
            body: update.body,
            created_at: Utc::now(),
        });
        Ok(next)
    }

    async fn delete_blueprint(
        &self,
        id: Uuid,
        org_id: &str,
        account_number: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let owned = inner
            .blueprints
            .get(&id)
            .is_some_and(|b| b.org_id == org_id && b.account_number == account_number);
        if !owned {
            return Err(StoreError::NotFound("blueprint"));
        }

        inner.blueprints.remove(&id);
        let removed: Vec<Uuid> = inner
            .versions
            .iter()
            .filter(|v| v.blueprint_id == id)
            .map(|v| v.id)
            .collect();
        inner.versions.retain(|v| v.blueprint_id != id);
        // composes keep existing but lose the link
        for row in inner.composes.values_mut() {
            if row
                .compose
                .blueprint_version_id
                .is_some_and(|vid| removed.contains(&vid))
            {
                row.compose.blueprint_version_id = None;
            }
        }
        Ok(())
    }

    async fn find_blueprints(
        &self,
        org_id: &str,
        filter: &BlueprintFilter,
        page: Page,
    ) -> Result<(Vec<BlueprintSummary>, i64), StoreError> {
        let inner = self.inner.read().await;
        let search = filter.search.as_deref().map(str::to_lowercase);

        let mut items: Vec<BlueprintSummary> = inner
            .blueprints
            .iter()
            .filter(|(_, b)| b.org_id == org_id)
            .filter(|(_, b)| filter.name.as_deref().map_or(true, |n| b.name == n))
            .filter(|(_, b)| {
                search.as_deref().map_or(true, |s| {
                    b.name.to_lowercase().contains(s) || b.description.to_lowercase().contains(s)
                })
            })
            .filter_map(|(id, b)| {
                inner.latest_version(*id).map(|v| BlueprintSummary {
                    id: *id,
                    name: b.name.clone(),
                    description: b.description.clone(),
                    version: v.version,
                    last_modified_at: v.created_at,
                })
            })
            .collect();
        items.sort_by(|a, b| b.last_modified_at.cmp(&a.last_modified_at));

        Ok(paginate(items, page))
    }

    async fn get_blueprint_composes(
        &self,
        org_id: &str,
        blueprint_id: Uuid,
        version: Option<i32>,
        window: Duration,
        page: Page,
    ) -> Result<(Vec<ComposeEntry>, i64), StoreError> {
        let inner = self.inner.read().await;
        let composes = inner.active_composes(org_id, window, |e| {
            e.blueprint_id == Some(blueprint_id)
                && version.map_or(true, |v| e.blueprint_version == Some(v))
        });
        Ok(paginate(composes, page))
    }
}
