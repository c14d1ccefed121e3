//! Compose orchestration.
//!
//! [`ComposeService`] runs a compose request through quota, distribution
//! lookup, repository and upload resolution, customization translation and
//! submission to the build service, then records the result. It is also the
//! only place where the typed errors of the layers below are folded into
//! [`image_builder_common::Error`].

use chrono::{Duration, Utc};
use image_builder_common::{Error, Identity, Result};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clients::composer::types as cmp;
use crate::clients::{
    BuildService, ClientError, Compliance, ComplianceError, ContentSources, DownstreamResponse,
    Provisioning,
};
use crate::customizations::{
    validate_installer, validate_size, CustomizationError, CustomizationTranslator,
};
use crate::distribution::DistributionRegistry;
use crate::metrics::Metrics;
use crate::models::{
    ArchitectureItem, CloneRequest, CloneResponse, CloneStatusResponse, ClonesResponseItem,
    ComposeMetadata, ComposeRequest, ComposeResponse, ComposeStatus, ComposeStatusError,
    ComposesResponseItem, DistributionItem, ImageStatus, ImageType, OsTree, Repository,
    UploadStatus,
};
use crate::quota::{QuotaError, QuotaGuard, DEFAULT_SLIDING_WINDOW_DAYS};
use crate::repositories::{RepositoryError, RepositoryResolver};
use crate::storage::{CloneEntry, ComposeEntry, NewCompose, Page, Store, StoreError};
use crate::upload::{UploadError, UploadResolver, UploadTargets};

/// Entitlement that unlocks RHEL distributions.
const RHEL_ENTITLEMENT: &str = "rhel";

/// Build service error ids with a dedicated message.
const ERR_OSTREE_RESOLUTION: &str = "10";
const ERR_NO_BASEURL_PAYLOAD_REPOSITORY: &str = "24";
const ERR_MISSING_GPG_KEY: &str = "29";
const ERR_CLONE_INVALID_SHARE: &str = "IMAGE-BUILDER-COMPOSER-31";

/// Status error ids whose details wrap the error that actually failed.
const DEPENDENCY_ERROR_IDS: [i64; 4] = [5, 9, 26, 28];

pub struct ComposeService {
    pub store: Arc<dyn Store>,
    pub composer: Arc<dyn BuildService>,
    pub provisioning: Arc<dyn Provisioning>,
    pub content: Arc<dyn ContentSources>,
    pub compliance: Arc<dyn Compliance>,
    pub distributions: DistributionRegistry,
    pub quota: QuotaGuard,
    pub targets: UploadTargets,
    pub metrics: Metrics,
}

impl ComposeService {
    /// Submit a compose on behalf of `identity`.
    pub async fn compose(
        &self,
        identity: &Identity,
        request: ComposeRequest,
    ) -> Result<ComposeResponse> {
        self.compose_for_version(identity, request, None).await
    }

    /// Submit a compose, linking it to a blueprint version when one is given.
    pub(crate) async fn compose_for_version(
        &self,
        identity: &Identity,
        request: ComposeRequest,
        blueprint_version_id: Option<Uuid>,
    ) -> Result<ComposeResponse> {
        let result = self
            .submit_compose(identity, request, blueprint_version_id)
            .await;
        if let Err(e) = &result {
            if e.status() >= 500 {
                self.metrics.compose_failed();
            }
        }
        result
    }

    async fn submit_compose(
        &self,
        identity: &Identity,
        request: ComposeRequest,
        blueprint_version_id: Option<Uuid>,
    ) -> Result<ComposeResponse> {
        if !self
            .quota
            .check(&identity.org_id, self.store.as_ref())
            .await?
        {
            warn!(org_id = %identity.org_id, "Compose quota exceeded");
            self.metrics.quota_rejected();
            return Err(Error::QuotaExceeded);
        }

        let [image] = request.image_requests.as_slice() else {
            return Err(Error::validation(
                "Exactly one image request should be included",
            ));
        };
        self.metrics.compose_requested(image.image_type.as_str());

        let distro = self
            .distributions
            .get(&request.distribution, identity.is_entitled(RHEL_ENTITLEMENT))
            .ok_or_else(|| {
                Error::validation(format!(
                    "Distribution {} not available",
                    request.distribution
                ))
            })?;
        let arch = distro.architecture(&image.architecture).ok_or_else(|| {
            Error::validation(format!(
                "Architecture {} not supported for {}",
                image.architecture, request.distribution
            ))
        })?;

        let repositories = RepositoryResolver::new(self.content.as_ref(), identity);
        let base_repositories = repositories
            .resolve(arch, image.image_type, image.snapshot_date.as_deref())
            .await?;

        let (upload_options, image_type) =
            UploadResolver::new(self.provisioning.as_ref(), identity, &self.targets)
                .resolve(&image.upload_request, image.image_type)
                .await?;

        validate_size(&request)?;
        validate_installer(&request)?;

        let customizations =
            CustomizationTranslator::new(repositories, self.compliance.as_ref(), identity)
                .translate(&request, distro)
                .await?;

        let downstream = cmp::ComposeRequest {
            distribution: distro.composer_name().to_string(),
            image_request: cmp::ImageRequest {
                architecture: image.architecture.clone(),
                image_type,
                repositories: base_repositories,
                upload_options,
                size: image.size,
                ostree: image.ostree.as_ref().map(ostree_options),
            },
            customizations,
        };

        let response = self.composer.compose(&downstream).await?;
        if response.status != 201 {
            return Err(compose_failure(&response));
        }
        let created: cmp::ComposeId = response.json()?;

        let mut stored = request.clone();
        stored.redact_passwords();
        self.store
            .insert_compose(NewCompose {
                id: created.id,
                org_id: identity.org_id.clone(),
                account_number: identity.account_number.clone(),
                email: identity.email.clone(),
                image_name: request.image_name.clone(),
                request: serde_json::to_value(&stored)?,
                client_id: request.client_id.clone(),
                blueprint_version_id,
                created_at: Utc::now(),
            })
            .await?;

        info!(
            org_id = %identity.org_id,
            compose_id = %created.id,
            image_type = %image.image_type,
            upload_type = image.upload_request.type_name(),
            "Compose submitted"
        );
        Ok(ComposeResponse { id: created.id })
    }

    /// Composes of the caller's org created within the listing window.
    pub async fn composes(
        &self,
        identity: &Identity,
        page: Page,
    ) -> Result<(Vec<ComposesResponseItem>, i64)> {
        let (entries, count) = self
            .store
            .get_composes(
                &identity.org_id,
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

    pub async fn compose_status(&self, identity: &Identity, id: Uuid) -> Result<ComposeStatus> {
        let entry = self.store.get_compose(id, &identity.org_id).await?;

        let response = self.composer.compose_status(id).await?;
        match response.status {
            200 => {}
            404 => return Err(Error::NotFound(format!("Compose {} not found", id))),
            _ => return Err(downstream("Failed querying compose status", &response)),
        }

        let status: cmp::ComposeStatus = response.json()?;
        let upload_status = status
            .image_status
            .upload_status
            .map(|u| -> Result<UploadStatus> {
                Ok(UploadStatus {
                    status: u.status,
                    kind: u.kind,
                    options: serde_json::from_value(u.options)?,
                })
            })
            .transpose()?;

        Ok(ComposeStatus {
            image_status: ImageStatus {
                status: status.image_status.status,
                upload_status,
                error: status.image_status.error.map(unwrap_status_error),
            },
            request: stored_request(&entry)?,
        })
    }

    pub async fn compose_metadata(
        &self,
        identity: &Identity,
        id: Uuid,
    ) -> Result<ComposeMetadata> {
        self.store.get_compose(id, &identity.org_id).await?;

        let response = self.composer.compose_metadata(id).await?;
        match response.status {
            200 => {}
            404 => return Err(Error::NotFound(format!("Compose {} not found", id))),
            _ => return Err(downstream("Failed querying compose metadata", &response)),
        }

        let metadata: cmp::ComposeMetadata = response.json()?;
        Ok(ComposeMetadata {
            ostree_commit: metadata.ostree_commit,
            packages: metadata.packages.unwrap_or_default(),
        })
    }

    /// Hide a compose from listings. It keeps counting against the quota.
    pub async fn delete_compose(&self, identity: &Identity, id: Uuid) -> Result<()> {
        self.store.delete_compose(id, &identity.org_id).await?;
        info!(org_id = %identity.org_id, compose_id = %id, "Compose deleted");
        Ok(())
    }

    /// Share an EC2 image built by `compose_id` with more accounts.
    pub async fn clone_compose(
        &self,
        identity: &Identity,
        compose_id: Uuid,
        request: CloneRequest,
    ) -> Result<CloneResponse> {
        let image_type = self
            .store
            .get_compose_image_type(compose_id, &identity.org_id)
            .await?;
        let is_aws = serde_json::from_value::<ImageType>(serde_json::Value::String(image_type))
            .is_ok_and(|t| t.is_aws());
        if !is_aws {
            return Err(Error::validation(
                "Cloning a compose is only available for AWS composes",
            ));
        }

        let share_with_accounts =
            UploadResolver::new(self.provisioning.as_ref(), identity, &self.targets)
                .aws_accounts(
                    request.share_with_accounts.as_deref(),
                    request.share_with_sources.as_deref(),
                )
                .await?;

        let body = cmp::AwsEc2CloneCompose {
            region: request.region.clone(),
            share_with_accounts,
        };
        let response = self.composer.clone_compose(compose_id, &body).await?;
        if response.status != 201 {
            let detail: cmp::ErrorBody = response.json().unwrap_or_default();
            if detail.code == ERR_CLONE_INVALID_SHARE {
                return Err(Error::Downstream {
                    status: 400,
                    message: detail.reason,
                    detail: response.text(),
                });
            }
            return Err(downstream("Failed posting clone request to osbuild-composer", &response));
        }
        let created: cmp::ComposeId = response.json()?;

        self.store
            .insert_clone(compose_id, created.id, serde_json::to_value(&request)?)
            .await?;

        info!(
            org_id = %identity.org_id,
            compose_id = %compose_id,
            clone_id = %created.id,
            region = %request.region,
            "Clone submitted"
        );
        Ok(CloneResponse { id: created.id })
    }

    pub async fn clones(
        &self,
        identity: &Identity,
        compose_id: Uuid,
        page: Page,
    ) -> Result<(Vec<ClonesResponseItem>, i64)> {
        let (entries, count) = self
            .store
            .get_clones_for_compose(compose_id, &identity.org_id, page)
            .await?;

        let items = entries
            .into_iter()
            .map(clone_item)
            .collect::<Result<Vec<_>>>()?;
        Ok((items, count))
    }

    pub async fn clone_status(&self, identity: &Identity, id: Uuid) -> Result<CloneStatusResponse> {
        let entry = self.store.get_clone(id, &identity.org_id).await?;

        let response = self.composer.clone_status(id).await?;
        match response.status {
            200 => {}
            404 => return Err(Error::NotFound(format!("Clone {} not found", id))),
            _ => return Err(downstream("Failed querying clone status", &response)),
        }

        let status: cmp::CloneStatus = response.json()?;
        Ok(CloneStatusResponse {
            compose_id: entry.compose_id,
            status: status.status,
            kind: status.kind,
            options: serde_json::from_value(status.options)?,
        })
    }

    pub fn distributions(&self, identity: &Identity) -> Vec<DistributionItem> {
        self.distributions
            .available(identity.is_entitled(RHEL_ENTITLEMENT))
            .into_iter()
            .map(|(name, d)| DistributionItem {
                name: name.to_string(),
                description: d.distribution.description.clone(),
            })
            .collect()
    }

    /// Architectures of a distribution with their untagged repositories.
    pub fn architectures(
        &self,
        identity: &Identity,
        distribution: &str,
    ) -> Result<Vec<ArchitectureItem>> {
        let distro = self
            .distributions
            .get(distribution, identity.is_entitled(RHEL_ENTITLEMENT))
            .ok_or_else(|| {
                Error::validation(format!("Distribution {} not available", distribution))
            })?;

        Ok(distro
            .architectures()
            .into_iter()
            .map(|(name, arch)| ArchitectureItem {
                arch: name.to_string(),
                image_types: arch.image_types.clone(),
                repositories: arch
                    .repositories
                    .iter()
                    .filter(|r| r.image_type_tags.is_empty())
                    .map(|r| Repository {
                        baseurl: r.baseurl.clone(),
                        metalink: r.metalink.clone(),
                        rhsm: r.rhsm,
                        gpgkey: r.gpgkey.clone(),
                        check_gpg: r.check_gpg,
                        ..Default::default()
                    })
                    .collect(),
            })
            .collect())
    }

    /// Whether the build service answers.
    pub async fn ready(&self) -> Result<()> {
        let response = self.composer.openapi().await?;
        if !response.is_success() {
            return Err(downstream("Build service is not ready", &response));
        }
        Ok(())
    }
}

fn ostree_options(ostree: &OsTree) -> cmp::OsTree {
    cmp::OsTree {
        reference: ostree.reference.clone(),
        url: ostree.url.clone(),
        contenturl: ostree.contenturl.clone(),
        parent: ostree.parent.clone(),
        rhsm: ostree.rhsm,
    }
}

/// Turn a rejected compose into an error; only a few build service error ids
/// are shown to the caller, the rest become a generic 500.
fn compose_failure(response: &DownstreamResponse) -> Error {
    let body: cmp::ErrorBody = response.json().unwrap_or_default();
    match body.id.as_str() {
        ERR_OSTREE_RESOLUTION => Error::Downstream {
            status: 400,
            message: "Error resolving OSTree repo".to_string(),
            detail: response.text(),
        },
        ERR_NO_BASEURL_PAYLOAD_REPOSITORY | ERR_MISSING_GPG_KEY => Error::Downstream {
            status: 400,
            message: body.reason,
            detail: response.text(),
        },
        _ => downstream("Failed posting compose request to osbuild-composer", response),
    }
}

/// Unexpected build service answer. The body is logged, never returned.
fn downstream(message: &str, response: &DownstreamResponse) -> Error {
    error!(
        status = response.status,
        body = %response.text(),
        "{}", message
    );
    Error::Downstream {
        status: 500,
        message: message.to_string(),
        detail: response.text(),
    }
}

fn unwrap_status_error(err: cmp::ComposeStatusError) -> ComposeStatusError {
    if DEPENDENCY_ERROR_IDS.contains(&err.id) {
        let inner = err
            .details
            .clone()
            .and_then(|d| serde_json::from_value::<cmp::ComposeStatusError>(d).ok());
        if let Some(inner) = inner {
            debug!(id = err.id, inner_id = inner.id, "Unwrapped dependency error");
            return unwrap_status_error(inner);
        }
    }

    ComposeStatusError {
        id: err.id,
        reason: err.reason,
        details: err.details,
    }
}

fn stored_request(entry: &ComposeEntry) -> Result<ComposeRequest> {
    let mut request: ComposeRequest = serde_json::from_value(entry.request.clone())?;
    request.redact_passwords();
    Ok(request)
}

pub(crate) fn compose_item(entry: ComposeEntry) -> Result<ComposesResponseItem> {
    Ok(ComposesResponseItem {
        request: stored_request(&entry)?,
        id: entry.id,
        created_at: entry.created_at,
        image_name: entry.image_name,
        client_id: entry.client_id,
        blueprint_id: entry.blueprint_id,
        blueprint_version: entry.blueprint_version,
    })
}

fn clone_item(entry: CloneEntry) -> Result<ClonesResponseItem> {
    Ok(ClonesResponseItem {
        id: entry.id,
        compose_id: entry.compose_id,
        request: serde_json::from_value(entry.request)?,
        created_at: entry.created_at,
    })
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Error::NotFound(err.to_string()),
            StoreError::Conflict(message) => Error::Conflict(message),
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<QuotaError> for Error {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::Store(e) => e.into(),
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<ClientError> for Error {
    fn from(err: ClientError) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<RepositoryError> for Error {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::InvalidSnapshotDate(_)
            | RepositoryError::SnapshotDisabled { .. }
            | RepositoryError::Unresolved(_) => Error::Validation(err.to_string()),
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<UploadError> for Error {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::SourceDecode(_) => Error::Internal(err.to_string()),
            other => Error::Validation(other.to_string()),
        }
    }
}

impl From<CustomizationError> for Error {
    fn from(err: CustomizationError) -> Self {
        match err {
            CustomizationError::Repository(e) => e.into(),
            CustomizationError::Compliance {
                policy_id,
                major,
                source,
            } => match source {
                ComplianceError::Auth => Error::Forbidden(format!(
                    "User is not authorized to get compliance data for given policy ID ({})",
                    policy_id
                )),
                ComplianceError::MajorVersion => Error::Validation(format!(
                    "Compliance policy ({}) does not support requested major version {}",
                    policy_id, major
                )),
                ComplianceError::NotFound | ComplianceError::MinorVersion => {
                    Error::Validation(format!(
                        "Compliance policy ({}) or its tailorings weren't found",
                        policy_id
                    ))
                }
                other => Error::Internal(format!(
                    "Unable to get compliance data for policy {}: {}",
                    policy_id, other
                )),
            },
            other => Error::Validation(other.to_string()),
        }
    }
}
