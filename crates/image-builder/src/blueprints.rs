//! Blueprints: named, versioned compose templates owned by an org.

use chrono::{Duration, Utc};
use image_builder_common::{Error, Identity, Result};
use sha_crypt::{sha512_simple, Sha512Params};
use tracing::info;
use uuid::Uuid;

use crate::compose::{compose_item, ComposeService};
use crate::models::{
    BlueprintBody, BlueprintExportResponse, BlueprintItem, BlueprintMetadata, BlueprintRequest,
    BlueprintResponse, ComposeBlueprintRequest, ComposeRequest, ComposeResponse,
    ComposesResponseItem, CreateBlueprintResponse, Subscription, User,
};
use crate::quota::DEFAULT_SLIDING_WINDOW_DAYS;
use crate::storage::{BlueprintEntry, BlueprintFilter, BlueprintWrite, Page};

/// `version` value selecting the latest blueprint version.
pub const LATEST_VERSION: i32 = -1;

const CRYPT_ROUNDS: usize = 5_000;

/// Prefixes of the crypt(3) schemes a stored password may already use.
const CRYPTED_PREFIXES: [&str; 3] = ["$2b$", "$5$", "$6$"];

fn is_crypted(password: &str) -> bool {
    CRYPTED_PREFIXES.iter().any(|p| password.starts_with(p))
}

/// Replace plaintext user passwords with SHA-512 crypt hashes. Empty and
/// already hashed passwords are kept as they are.
fn crypt_passwords(users: Option<&mut Vec<User>>) -> Result<()> {
    let params = Sha512Params::new(CRYPT_ROUNDS)
        .map_err(|e| Error::internal(format!("invalid crypt parameters: {:?}", e)))?;

    for user in users.into_iter().flatten() {
        let Some(password) = user.password.as_deref() else {
            continue;
        };
        if password.is_empty() || is_crypted(password) {
            continue;
        }
        let hashed = sha512_simple(password, &params)
            .map_err(|e| Error::internal(format!("failed to crypt password: {:?}", e)))?;
        user.password = Some(hashed);
    }
    Ok(())
}

/// Check a `version` query value: [`LATEST_VERSION`] maps to `None`.
fn requested_version(version: Option<i32>) -> Result<Option<i32>> {
    match version {
        Some(LATEST_VERSION) => Ok(None),
        Some(v) if v <= 0 => Err(Error::validation("Invalid version number")),
        other => Ok(other),
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.chars().all(char::is_whitespace) {
        return Err(Error::validation(
            "Invalid blueprint name: it must contain at least one non-whitespace character",
        ));
    }
    Ok(())
}

fn validate_users(users: Option<&[User]>) -> Result<()> {
    for user in users.unwrap_or_default() {
        user.validate().map_err(Error::Validation)?;
    }
    Ok(())
}

fn stored_body(entry: &BlueprintEntry) -> Result<BlueprintBody> {
    Ok(serde_json::from_value(entry.body.clone())?)
}

impl ComposeService {
    pub async fn create_blueprint(
        &self,
        identity: &Identity,
        mut request: BlueprintRequest,
    ) -> Result<CreateBlueprintResponse> {
        validate_name(&request.name)?;
        validate_users(request.customizations.users.as_deref())?;
        crypt_passwords(request.customizations.users.as_mut())?;

        let id = Uuid::new_v4();
        let body = BlueprintBody {
            distribution: request.distribution,
            image_requests: request.image_requests,
            customizations: request.customizations,
        };

        self.store
            .insert_blueprint(BlueprintWrite {
                id,
                version_id: Uuid::new_v4(),
                org_id: identity.org_id.clone(),
                account_number: identity.account_number.clone(),
                name: request.name.clone(),
                description: request.description,
                body: serde_json::to_value(&body)?,
            })
            .await?;

        info!(org_id = %identity.org_id, blueprint_id = %id, name = %request.name, "Blueprint created");
        Ok(CreateBlueprintResponse { id })
    }

    /// A version of a blueprint, the latest by default, passwords removed.
    pub async fn get_blueprint(
        &self,
        identity: &Identity,
        id: Uuid,
        version: Option<i32>,
    ) -> Result<BlueprintResponse> {
        let version = requested_version(version)?;
        let entry = self.store.get_blueprint(id, &identity.org_id, version).await?;
        let mut body = stored_body(&entry)?;
        body.redact_passwords();

        Ok(BlueprintResponse {
            id: entry.id,
            name: entry.name,
            description: entry.description,
            version: entry.version,
            distribution: body.distribution,
            image_requests: body.image_requests,
            customizations: body.customizations,
            last_modified_at: entry.last_modified_at,
        })
    }

    /// Latest version stripped of passwords and subscription details, for
    /// import elsewhere.
    pub async fn export_blueprint(
        &self,
        identity: &Identity,
        id: Uuid,
    ) -> Result<BlueprintExportResponse> {
        let entry = self.store.get_blueprint(id, &identity.org_id, None).await?;
        let mut body = stored_body(&entry)?;
        body.redact_passwords();
        if body.customizations.subscription.is_some() {
            body.customizations.subscription = Some(Subscription::default());
        }

        info!(org_id = %identity.org_id, blueprint_id = %id, "Blueprint exported");
        Ok(BlueprintExportResponse {
            name: entry.name,
            description: entry.description,
            distribution: body.distribution,
            customizations: body.customizations,
            metadata: BlueprintMetadata {
                exported_at: Utc::now(),
                parent_id: id,
            },
        })
    }

    pub async fn blueprints(
        &self,
        identity: &Identity,
        filter: &BlueprintFilter,
        page: Page,
    ) -> Result<(Vec<BlueprintItem>, i64)> {
        let (entries, count) = self
            .store
            .find_blueprints(&identity.org_id, filter, page)
            .await?;

        let items = entries
            .into_iter()
            .map(|b| BlueprintItem {
                id: b.id,
                name: b.name,
                description: b.description,
                version: b.version,
                last_modified_at: b.last_modified_at,
            })
            .collect();
        Ok((items, count))
    }

    /// Store a new version. Users without credentials keep the ones stored
    /// under the same name.
    pub async fn update_blueprint(
        &self,
        identity: &Identity,
        id: Uuid,
        mut request: BlueprintRequest,
    ) -> Result<CreateBlueprintResponse> {
        validate_name(&request.name)?;

        let existing = self.store.get_blueprint(id, &identity.org_id, None).await?;
        let stored_users = stored_body(&existing)?
            .customizations
            .users
            .unwrap_or_default();
        for user in request.customizations.users.iter_mut().flatten() {
            user.merge_for_update(&stored_users)
                .map_err(Error::Validation)?;
        }
        crypt_passwords(request.customizations.users.as_mut())?;

        let body = BlueprintBody {
            distribution: request.distribution,
            image_requests: request.image_requests,
            customizations: request.customizations,
        };
        let version = self
            .store
            .update_blueprint(BlueprintWrite {
                id,
                version_id: Uuid::new_v4(),
                org_id: identity.org_id.clone(),
                account_number: identity.account_number.clone(),
                name: request.name,
                description: request.description,
                body: serde_json::to_value(&body)?,
            })
            .await?;

        info!(org_id = %identity.org_id, blueprint_id = %id, version, "Blueprint updated");
        Ok(CreateBlueprintResponse { id })
    }

    pub async fn delete_blueprint(&self, identity: &Identity, id: Uuid) -> Result<()> {
        self.store
            .delete_blueprint(id, &identity.org_id, &identity.account_number)
            .await?;
        info!(org_id = %identity.org_id, blueprint_id = %id, "Blueprint deleted");
        Ok(())
    }

    /// Compose every image request of the latest version, optionally only
    /// those of the given image types.
    pub async fn compose_blueprint(
        &self,
        identity: &Identity,
        id: Uuid,
        request: ComposeBlueprintRequest,
    ) -> Result<Vec<ComposeResponse>> {
        let entry = self.store.get_blueprint(id, &identity.org_id, None).await?;
        let body = stored_body(&entry)?;

        let selected: Vec<_> = body
            .image_requests
            .iter()
            .filter(|ir| {
                request
                    .image_types
                    .as_ref()
                    .map_or(true, |types| types.contains(&ir.image_type))
            })
            .cloned()
            .collect();
        if selected.is_empty() {
            return Err(Error::validation(
                "No image requests of the blueprint match the requested image types",
            ));
        }

        let mut composes = Vec::with_capacity(selected.len());
        for image_request in selected {
            let compose = ComposeRequest {
                distribution: body.distribution.clone(),
                image_requests: vec![image_request],
                customizations: Some(body.customizations.clone()),
                client_id: Some("api".to_string()),
                image_name: Some(entry.name.clone()),
                image_description: Some(entry.description.clone()),
            };
            composes.push(
                self.compose_for_version(identity, compose, Some(entry.version_id))
                    .await?,
            );
        }

        info!(
            org_id = %identity.org_id,
            blueprint_id = %id,
            version = entry.version,
            count = composes.len(),
            "Blueprint composed"
        );
        Ok(composes)
    }

    /// Composes built from a blueprint, optionally from one version only.
    /// [`LATEST_VERSION`] selects the current one.
    pub async fn blueprint_composes(
        &self,
        identity: &Identity,
        id: Uuid,
        version: Option<i32>,
        page: Page,
    ) -> Result<(Vec<ComposesResponseItem>, i64)> {
        let entry = self.store.get_blueprint(id, &identity.org_id, None).await?;
        let version = match version {
            Some(LATEST_VERSION) => Some(entry.version),
            other => requested_version(other)?,
        };

        let (entries, count) = self
            .store
            .get_blueprint_composes(
                &identity.org_id,
                id,
                version,
                Duration::days(DEFAULT_SLIDING_WINDOW_DAYS),
                page,
            )
            .await?;

        let items = entries
            .into_iter()
            .map(compose_item)
            .collect::<Result<Vec<_>>>()?;
        Ok((items, count))
    }
}
