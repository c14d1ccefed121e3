//! Outbound service clients.
//!
//! Each downstream capability sits behind a trait so the orchestrator can
//! run against fakes in tests. The reqwest implementations live in the
//! submodules.

pub mod compliance;
pub mod composer;
pub mod content_sources;
pub mod provisioning;
pub mod token;

use async_trait::async_trait;
use image_builder_common::Identity;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

pub use compliance::{ComplianceClient, ComplianceError, PolicyData};
pub use composer::ComposerClient;
pub use content_sources::{ContentRepository, ContentSourcesClient, SnapshotForDate};
pub use provisioning::{ProvisioningClient, UploadInfo};
pub use token::LazyToken;

use composer::types as cmp;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unable to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("token refresh failed: {0}")]
    Token(String),
}

/// Raw downstream reply. The caller decides what each status means.
#[derive(Debug, Clone)]
pub struct DownstreamResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl DownstreamResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The image build service.
#[async_trait]
pub trait BuildService: Send + Sync {
    async fn compose(&self, request: &cmp::ComposeRequest)
        -> Result<DownstreamResponse, ClientError>;

    async fn compose_status(&self, id: Uuid) -> Result<DownstreamResponse, ClientError>;

    async fn compose_metadata(&self, id: Uuid) -> Result<DownstreamResponse, ClientError>;

    async fn clone_compose(
        &self,
        id: Uuid,
        body: &cmp::AwsEc2CloneCompose,
    ) -> Result<DownstreamResponse, ClientError>;

    async fn clone_status(&self, id: Uuid) -> Result<DownstreamResponse, ClientError>;

    /// Used by the readiness check.
    async fn openapi(&self) -> Result<DownstreamResponse, ClientError>;
}

/// Resolves provisioning sources to cloud account identifiers.
#[async_trait]
pub trait Provisioning: Send + Sync {
    async fn upload_info(
        &self,
        identity: &Identity,
        source_id: &str,
    ) -> Result<UploadInfo, ClientError>;
}

/// Content catalog: repository metadata and dated snapshots.
#[async_trait]
pub trait ContentSources: Send + Sync {
    /// Look repositories up by URL and/or uuid. `external` selects user
    /// repositories instead of Red Hat ones. Keyed by repository uuid.
    async fn repositories(
        &self,
        identity: &Identity,
        urls: &[String],
        ids: &[String],
        external: bool,
    ) -> Result<HashMap<String, ContentRepository>, ClientError>;

    async fn snapshots_for_date(
        &self,
        identity: &Identity,
        date: &str,
        repository_uuids: &[String],
    ) -> Result<Vec<SnapshotForDate>, ClientError>;
}

#[async_trait]
pub trait Compliance: Send + Sync {
    async fn policy_data(
        &self,
        identity: &Identity,
        major: u32,
        minor: u32,
        policy_id: &str,
    ) -> Result<PolicyData, ComplianceError>;
}

/// Join a base URL and a path without doubling slashes.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://cs/api/", "/repositories/"), "http://cs/api/repositories/");
        assert_eq!(join_url("http://cs", "snapshots/for_date/"), "http://cs/snapshots/for_date/");
    }

    #[test]
    fn test_downstream_response() {
        let resp = DownstreamResponse::new(201, r#"{"id":"6d5c1a5e-0bb4-4f0c-9e57-0c4b1e1e58a6"}"#);
        assert!(resp.is_success());
        let id: cmp::ComposeId = resp.json().unwrap();
        assert_eq!(id.id.to_string(), "6d5c1a5e-0bb4-4f0c-9e57-0c4b1e1e58a6");

        assert!(!DownstreamResponse::new(404, "").is_success());
    }
}
