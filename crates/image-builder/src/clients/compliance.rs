//! Compliance service client: policy and tailoring resolution.

use async_trait::async_trait;
use image_builder_common::{Identity, IDENTITY_HEADER};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::{join_url, Compliance};

#[derive(Error, Debug)]
pub enum ComplianceError {
    #[error("User is not authorized")]
    Auth,

    #[error("Major version of policy doesn't match requested major version")]
    MajorVersion,

    #[error("No minor version of tailoring found in the requested policy")]
    MinorVersion,

    #[error("Policy or its tailorings are missing")]
    NotFound,

    #[error("Unexpected http status {0}")]
    Unexpected(u16),

    #[error("compliance request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unable to decode compliance response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Profile and tailoring of a policy for one RHEL minor release.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyData {
    pub policy_id: String,
    pub profile_id: String,
    pub tailoring_id: String,
    /// Tailoring file; `None` when the policy has no tailoring.
    pub tailoring_data: Option<String>,
}

#[derive(Deserialize)]
struct PolicyResponse {
    data: Policy,
}

#[derive(Deserialize)]
struct Policy {
    id: String,
    ref_id: String,
    os_major_version: u32,
}

#[derive(Deserialize)]
struct TailoringsResponse {
    data: Vec<Tailoring>,
}

#[derive(Deserialize)]
struct Tailoring {
    id: String,
    os_minor_version: u32,
}

pub struct ComplianceClient {
    url: String,
    client: reqwest::Client,
}

impl ComplianceClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn get(
        &self,
        identity: &Identity,
        path: &str,
    ) -> Result<(StatusCode, Vec<u8>), ComplianceError> {
        let url = join_url(&self.url, path);
        debug!(%url, "Querying compliance service");

        let response = self
            .client
            .get(&url)
            .header(IDENTITY_HEADER, &identity.raw)
            .header("content-type", "application/json")
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(ComplianceError::Auth),
            StatusCode::NOT_FOUND => return Err(ComplianceError::NotFound),
            StatusCode::OK | StatusCode::NO_CONTENT => {}
            other => return Err(ComplianceError::Unexpected(other.as_u16())),
        }

        Ok((status, response.bytes().await?.to_vec()))
    }
}

#[async_trait]
impl Compliance for ComplianceClient {
    async fn policy_data(
        &self,
        identity: &Identity,
        major: u32,
        minor: u32,
        policy_id: &str,
    ) -> Result<PolicyData, ComplianceError> {
        let (_, body) = self
            .get(identity, &format!("policies/{}", policy_id))
            .await?;
        let policy: PolicyResponse = serde_json::from_slice(&body)?;
        if policy.data.os_major_version != major {
            return Err(ComplianceError::MajorVersion);
        }

        let (_, body) = self
            .get(identity, &format!("policies/{}/tailorings", policy_id))
            .await?;
        let tailorings: TailoringsResponse = serde_json::from_slice(&body)?;
        let tailoring = tailorings
            .data
            .into_iter()
            .find(|t| t.os_minor_version == minor)
            .ok_or(ComplianceError::MinorVersion)?;

        let (status, body) = self
            .get(
                identity,
                &format!(
                    "policies/{}/tailorings/{}/tailoring_file.json",
                    policy_id, tailoring.id
                ),
            )
            .await?;

        // 204 means the policy carries no tailoring
        let tailoring_data = if status == StatusCode::NO_CONTENT || body.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&body).into_owned())
        };

        Ok(PolicyData {
            policy_id: policy.data.id,
            profile_id: policy.data.ref_id,
            tailoring_id: tailoring.id,
            tailoring_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn identity() -> Identity {
        Identity::from_header(&Identity::encode("000000", "500000", "user@user.user")).unwrap()
    }

    async fn policy_server(major: u32) -> MockServer {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/policies/p1");
                then.status(200).json_body(json!({
                    "data": {"id": "p1", "ref_id": "xccdf_org.ssgproject.content_profile_cis", "os_major_version": major}
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/policies/p1/tailorings");
                then.status(200).json_body(json!({
                    "data": [
                        {"id": "t8", "os_major_version": major, "os_minor_version": 8},
                        {"id": "t9", "os_major_version": major, "os_minor_version": 9}
                    ]
                }));
            })
            .await;
        server
    }

    #[tokio::test]
    async fn test_policy_data_with_tailoring() {
        let server = policy_server(9).await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/policies/p1/tailorings/t9/tailoring_file.json");
                then.status(200).body(r#"{"profiles":[]}"#);
            })
            .await;

        let client = ComplianceClient::new(server.base_url());
        let data = client.policy_data(&identity(), 9, 9, "p1").await.unwrap();

        assert_eq!(data.profile_id, "xccdf_org.ssgproject.content_profile_cis");
        assert_eq!(data.tailoring_id, "t9");
        assert_eq!(data.tailoring_data.as_deref(), Some(r#"{"profiles":[]}"#));
    }

    #[tokio::test]
    async fn test_policy_without_tailoring_file() {
        let server = policy_server(9).await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/policies/p1/tailorings/t8/tailoring_file.json");
                then.status(204);
            })
            .await;

        let client = ComplianceClient::new(server.base_url());
        let data = client.policy_data(&identity(), 9, 8, "p1").await.unwrap();
        assert_eq!(data.tailoring_data, None);
    }

    #[tokio::test]
    async fn test_version_mismatches() {
        let server = policy_server(8).await;
        let client = ComplianceClient::new(server.base_url());

        assert!(matches!(
            client.policy_data(&identity(), 9, 4, "p1").await,
            Err(ComplianceError::MajorVersion)
        ));
        assert!(matches!(
            client.policy_data(&identity(), 8, 2, "p1").await,
            Err(ComplianceError::MinorVersion)
        ));
    }

    #[tokio::test]
    async fn test_auth_and_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/policies/forbidden");
                then.status(403);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/policies/missing");
                then.status(404);
            })
            .await;

        let client = ComplianceClient::new(server.base_url());
        assert!(matches!(
            client.policy_data(&identity(), 9, 4, "forbidden").await,
            Err(ComplianceError::Auth)
        ));
        assert!(matches!(
            client.policy_data(&identity(), 9, 4, "missing").await,
            Err(ComplianceError::NotFound)
        ));
    }
}
