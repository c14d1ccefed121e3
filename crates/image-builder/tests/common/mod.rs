//! Shared fixtures for router-level tests: fake downstream services, a
//! distribution registry and request helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use image_builder::clients::composer::types as cmp;
use image_builder::clients::{
    BuildService, ClientError, Compliance, ComplianceError, ContentRepository, ContentSources,
    DownstreamResponse, PolicyData, Provisioning, SnapshotForDate, UploadInfo,
};
use image_builder::distribution::{DistributionFile, DistributionRegistry};
use image_builder::quota::QuotaGuard;
use image_builder::storage::{MemoryStore, Store};
use image_builder::upload::UploadTargets;
use image_builder::{create_router, AppState, ComposeService, Metrics};
use image_builder_common::{Identity, IDENTITY_HEADER};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tower::ServiceExt; // for `oneshot`
use uuid::Uuid;

pub const ORG: &str = "000000";
pub const OTHER_ORG: &str = "000001";

/// Build service double. Composes and clones succeed unless a response is
/// queued with [`FakeComposer::fail_next_compose`].
#[derive(Default)]
pub struct FakeComposer {
    pub composes: Mutex<Vec<Value>>,
    pub clones: Mutex<Vec<Value>>,
    next_compose: Mutex<Option<DownstreamResponse>>,
}

impl FakeComposer {
    pub fn fail_next_compose(&self, status: u16, body: Value) {
        *self.next_compose.lock().unwrap() = Some(DownstreamResponse::new(status, body.to_string()));
    }

    pub fn last_compose(&self) -> Value {
        self.composes.lock().unwrap().last().cloned().unwrap_or(Value::Null)
    }
}

#[async_trait]
impl BuildService for FakeComposer {
    async fn compose(
        &self,
        request: &cmp::ComposeRequest,
    ) -> Result<DownstreamResponse, ClientError> {
        self.composes
            .lock()
            .unwrap()
            .push(serde_json::to_value(request).unwrap());

        if let Some(queued) = self.next_compose.lock().unwrap().take() {
            return Ok(queued);
        }
        Ok(DownstreamResponse::new(
            201,
            json!({"id": Uuid::new_v4()}).to_string(),
        ))
    }

    async fn compose_status(&self, _id: Uuid) -> Result<DownstreamResponse, ClientError> {
        Ok(DownstreamResponse::new(
            200,
            json!({
                "image_status": {
                    "status": "success",
                    "upload_status": {
                        "status": "success",
                        "type": "aws",
                        "options": {"ami": "ami-0123456789", "region": "us-east-1"}
                    }
                }
            })
            .to_string(),
        ))
    }

    async fn compose_metadata(&self, _id: Uuid) -> Result<DownstreamResponse, ClientError> {
        Ok(DownstreamResponse::new(
            200,
            json!({"ostree_commit": "abc123", "packages": []}).to_string(),
        ))
    }

    async fn clone_compose(
        &self,
        _id: Uuid,
        body: &cmp::AwsEc2CloneCompose,
    ) -> Result<DownstreamResponse, ClientError> {
        self.clones
            .lock()
            .unwrap()
            .push(serde_json::to_value(body).unwrap());
        Ok(DownstreamResponse::new(
            201,
            json!({"id": Uuid::new_v4()}).to_string(),
        ))
    }

    async fn clone_status(&self, _id: Uuid) -> Result<DownstreamResponse, ClientError> {
        Ok(DownstreamResponse::new(
            200,
            json!({
                "status": "success",
                "type": "aws",
                "options": {"ami": "ami-9876543210", "region": "eu-central-1"}
            })
            .to_string(),
        ))
    }

    async fn openapi(&self) -> Result<DownstreamResponse, ClientError> {
        Ok(DownstreamResponse::new(200, "{}"))
    }
}

/// Sources `aws-source` (AWS account) and `azure-source` (Azure tenant).
pub struct FakeProvisioning;

#[async_trait]
impl Provisioning for FakeProvisioning {
    async fn upload_info(
        &self,
        _identity: &Identity,
        source_id: &str,
    ) -> Result<UploadInfo, ClientError> {
        let info = match source_id {
            "aws-source" => json!({"aws": {"account_id": "210987654321"}}),
            "azure-source" => json!({"azure": {"tenant_id": "tenant", "subscription_id": "sub"}}),
            _ => {
                return Err(ClientError::Status {
                    status: 404,
                    body: "not found".into(),
                })
            }
        };
        Ok(serde_json::from_value(info)?)
    }
}

/// Catalog that knows no repositories.
pub struct EmptyCatalog;

#[async_trait]
impl ContentSources for EmptyCatalog {
    async fn repositories(
        &self,
        _identity: &Identity,
        _urls: &[String],
        _ids: &[String],
        _external: bool,
    ) -> Result<HashMap<String, ContentRepository>, ClientError> {
        Ok(HashMap::new())
    }

    async fn snapshots_for_date(
        &self,
        _identity: &Identity,
        _date: &str,
        _uuids: &[String],
    ) -> Result<Vec<SnapshotForDate>, ClientError> {
        Ok(Vec::new())
    }
}

/// Catalog with the rhel-94 Red Hat repositories, one external repository
/// (`epel`) and one uploaded one (`tools`), all snapshotted. A snapshot
/// for `date` lives at `https://snapshots.example.com/<uuid>/<day>/`.
#[derive(Default)]
pub struct SnapshotCatalog {
    pub dates: Mutex<Vec<String>>,
}

impl SnapshotCatalog {
    pub fn snapshot_url(uuid: &str, day: &str) -> String {
        format!("https://snapshots.example.com/{}/{}/", uuid, day)
    }

    fn catalog() -> Vec<Value> {
        vec![
            json!({"uuid": "rh-baseos", "url": "https://cdn.redhat.com/rhel9/baseos",
                   "origin": "red_hat", "snapshot": true}),
            json!({"uuid": "rh-appstream", "url": "https://cdn.redhat.com/rhel9/appstream",
                   "origin": "red_hat", "snapshot": true}),
            json!({"uuid": "epel-uuid", "name": "epel", "url": "https://example.com/epel/",
                   "origin": "external", "snapshot": true, "gpg_key": "-----BEGIN PGP epel",
                   "metadata_verification": false}),
            json!({"uuid": "tools-uuid", "name": "tools", "url": "https://example.com/tools/",
                   "origin": "upload", "snapshot": true}),
        ]
    }
}

#[async_trait]
impl ContentSources for SnapshotCatalog {
    async fn repositories(
        &self,
        _identity: &Identity,
        _urls: &[String],
        _ids: &[String],
        external: bool,
    ) -> Result<HashMap<String, ContentRepository>, ClientError> {
        let mut found = HashMap::new();
        for repo in Self::catalog() {
            let repo: ContentRepository = serde_json::from_value(repo)?;
            let red_hat = repo.origin.as_deref() == Some("red_hat");
            if red_hat != external {
                found.insert(repo.uuid.clone(), repo);
            }
        }
        Ok(found)
    }

    async fn snapshots_for_date(
        &self,
        _identity: &Identity,
        date: &str,
        uuids: &[String],
    ) -> Result<Vec<SnapshotForDate>, ClientError> {
        self.dates.lock().unwrap().push(date.to_string());
        let day = &date[..10];
        uuids
            .iter()
            .map(|uuid| {
                let snapshot = json!({
                    "repository_uuid": uuid,
                    "match": {"uuid": format!("{}-snap", uuid), "url": Self::snapshot_url(uuid, day)}
                });
                serde_json::from_value(snapshot).map_err(ClientError::from)
            })
            .collect()
    }
}

/// Every policy targets RHEL 9 and has no tailoring.
pub struct Rhel9Compliance;

#[async_trait]
impl Compliance for Rhel9Compliance {
    async fn policy_data(
        &self,
        _identity: &Identity,
        major: u32,
        _minor: u32,
        policy_id: &str,
    ) -> Result<PolicyData, ComplianceError> {
        if major != 9 {
            return Err(ComplianceError::MajorVersion);
        }
        Ok(PolicyData {
            policy_id: policy_id.to_string(),
            profile_id: "xccdf_org.ssgproject.content_profile_cis".into(),
            tailoring_id: String::new(),
            tailoring_data: None,
        })
    }
}

pub fn distributions() -> DistributionRegistry {
    let rhel94: DistributionFile = serde_json::from_value(json!({
        "distribution": {
            "name": "rhel-94",
            "description": "Red Hat Enterprise Linux (RHEL) 9.4",
            "composer_name": "rhel-9.4"
        },
        "x86_64": {
            "image_types": ["aws", "ami", "azure", "vhd", "gcp", "guest-image", "image-installer"],
            "repositories": [
                {"id": "baseos", "baseurl": "https://cdn.redhat.com/rhel9/baseos", "rhsm": true,
                 "gpgkey": "-----BEGIN PGP", "check_gpg": true},
                {"id": "appstream", "baseurl": "https://cdn.redhat.com/rhel9/appstream", "rhsm": true}
            ]
        }
    }))
    .unwrap();

    DistributionRegistry::from_files([("rhel-94".to_string(), rhel94)])
}

pub struct TestApp {
    pub router: Router,
    pub composer: Arc<FakeComposer>,
    pub store: Arc<dyn Store>,
}

pub fn test_app_with(store: Arc<dyn Store>, quota: QuotaGuard) -> TestApp {
    test_app_with_catalog(store, quota, Arc::new(EmptyCatalog))
}

pub fn test_app_with_catalog(
    store: Arc<dyn Store>,
    quota: QuotaGuard,
    content: Arc<dyn ContentSources>,
) -> TestApp {
    let composer = Arc::new(FakeComposer::default());
    let service = ComposeService {
        store: store.clone(),
        composer: composer.clone(),
        provisioning: Arc::new(FakeProvisioning),
        content,
        compliance: Arc::new(Rhel9Compliance),
        distributions: distributions(),
        quota,
        targets: UploadTargets {
            aws_region: "us-east-1".into(),
            gcp_region: "us-east4".into(),
            gcp_bucket: None,
        },
        metrics: Metrics::new().unwrap(),
    };

    TestApp {
        router: create_router(AppState { service }),
        composer,
        store,
    }
}

pub fn test_app() -> TestApp {
    test_app_with(Arc::new(MemoryStore::new()), QuotaGuard::disabled())
}

impl TestApp {
    /// Send a request as `org` and decode the JSON answer (`Null` if empty).
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        org: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(org) = org {
            builder = builder.header(IDENTITY_HEADER, Identity::encode(org, "500000", "user@user.user"));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        (status, json)
    }

    pub async fn get(&self, uri: &str, org: &str) -> (StatusCode, Value) {
        self.call(Method::GET, uri, Some(org), None).await
    }

    pub async fn post(&self, uri: &str, org: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(org), Some(body)).await
    }
}

/// AWS compose request for `rhel-94` with one SSH user.
pub fn aws_compose() -> Value {
    json!({
        "distribution": "rhel-94",
        "image_requests": [{
            "architecture": "x86_64",
            "image_type": "aws",
            "upload_request": {
                "type": "aws",
                "options": {"share_with_accounts": ["123456789012"]}
            }
        }],
        "customizations": {
            "packages": ["vim", "tmux"],
            "users": [{"name": "admin", "ssh_key": "ssh-ed25519 AAAA", "password": "hunter2"}]
        },
        "client_id": "api",
        "image_name": "web"
    })
}

/// Compose request with the given image and upload types and filesystem.
pub fn compose_with(image_type: &str, upload: Value, filesystem: Value) -> Value {
    json!({
        "distribution": "rhel-94",
        "image_requests": [{
            "architecture": "x86_64",
            "image_type": image_type,
            "upload_request": upload
        }],
        "customizations": {"filesystem": filesystem}
    })
}

pub const API: &str = "/api/image-builder/v1";
