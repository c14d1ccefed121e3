//! Provisioning service client: resolves sources to cloud accounts.

use async_trait::async_trait;
use image_builder_common::{Identity, IDENTITY_HEADER};
use serde::Deserialize;
use tracing::debug;

use super::{join_url, ClientError, Provisioning};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UploadInfo {
    #[serde(default)]
    pub aws: Option<AwsUploadInfo>,
    #[serde(default)]
    pub azure: Option<AzureUploadInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AwsUploadInfo {
    #[serde(default)]
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AzureUploadInfo {
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub resource_group: Option<String>,
}

pub struct ProvisioningClient {
    url: String,
    client: reqwest::Client,
}

impl ProvisioningClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Provisioning for ProvisioningClient {
    async fn upload_info(
        &self,
        identity: &Identity,
        source_id: &str,
    ) -> Result<UploadInfo, ClientError> {
        let url = join_url(&self.url, &format!("sources/{}/upload_info", source_id));
        debug!(%url, "Requesting source upload info");

        let response = self
            .client
            .get(&url)
            .header(IDENTITY_HEADER, &identity.raw)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_upload_info_forwards_identity() {
        let server = MockServer::start_async().await;
        let header = Identity::encode("000000", "500000", "user@user.user");
        let identity = Identity::from_header(&header).unwrap();

        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/provisioning/v1/sources/1/upload_info")
                    .header(IDENTITY_HEADER, header.as_str());
                then.status(200).json_body(json!({
                    "aws": {"account_id": "123456789012"},
                    "provider": "aws"
                }));
            })
            .await;

        let client = ProvisioningClient::new(server.url("/api/provisioning/v1"));
        let info = client.upload_info(&identity, "1").await.unwrap();

        assert_eq!(
            info.aws.and_then(|a| a.account_id).as_deref(),
            Some("123456789012")
        );
        assert!(info.azure.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_info_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/sources/9/upload_info");
                then.status(404).body("source not found");
            })
            .await;

        let identity = Identity::from_header(&Identity::encode("1", "1", "e")).unwrap();
        let client = ProvisioningClient::new(server.base_url());
        let err = client.upload_info(&identity, "9").await.unwrap_err();

        assert!(matches!(err, ClientError::Status { status: 404, .. }));
    }
}
