//! Build service client

pub mod types;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{BuildService, ClientError, DownstreamResponse, LazyToken};

pub struct ComposerClient {
    base_url: String,
    token: Option<LazyToken>,
    client: reqwest::Client,
}

impl ComposerClient {
    /// `token` is `None` when the build service runs without authentication.
    pub fn new(url: &str, token: Option<LazyToken>) -> Self {
        if url.is_empty() {
            warn!("Build service URL not set, compose requests will fail");
        }

        Self {
            base_url: format!(
                "{}/api/image-builder-composer/v2",
                url.trim_end_matches('/')
            ),
            token,
            client: reqwest::Client::new(),
        }
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        bearer: Option<&str>,
    ) -> Result<DownstreamResponse, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        debug!(%url, status, "Build service responded");

        Ok(DownstreamResponse::new(status, bytes.to_vec()))
    }

    /// Send with the cached token; on 401/403 refresh it once and re-send.
    async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<DownstreamResponse, ClientError> {
        let Some(token) = &self.token else {
            return self.send(method, path, body, None).await;
        };

        let bearer = token.token().await?;
        let response = self.send(method.clone(), path, body, Some(&bearer)).await?;

        if response.status == StatusCode::UNAUTHORIZED.as_u16()
            || response.status == StatusCode::FORBIDDEN.as_u16()
        {
            warn!(status = response.status, "Build service rejected token, refreshing");
            let bearer = token.force_refresh().await?;
            return self.send(method, path, body, Some(&bearer)).await;
        }

        Ok(response)
    }
}

#[async_trait]
impl BuildService for ComposerClient {
    async fn compose(
        &self,
        request: &types::ComposeRequest,
    ) -> Result<DownstreamResponse, ClientError> {
        self.request(Method::POST, "/compose", Some(request)).await
    }

    async fn compose_status(&self, id: Uuid) -> Result<DownstreamResponse, ClientError> {
        self.request::<()>(Method::GET, &format!("/composes/{}", id), None)
            .await
    }

    async fn compose_metadata(&self, id: Uuid) -> Result<DownstreamResponse, ClientError> {
        self.request::<()>(Method::GET, &format!("/composes/{}/metadata", id), None)
            .await
    }

    async fn clone_compose(
        &self,
        id: Uuid,
        body: &types::AwsEc2CloneCompose,
    ) -> Result<DownstreamResponse, ClientError> {
        self.request(Method::POST, &format!("/composes/{}/clone", id), Some(body))
            .await
    }

    async fn clone_status(&self, id: Uuid) -> Result<DownstreamResponse, ClientError> {
        self.request::<()>(Method::GET, &format!("/clones/{}", id), None)
            .await
    }

    async fn openapi(&self) -> Result<DownstreamResponse, ClientError> {
        self.request::<()>(Method::GET, "/openapi", None).await
    }
}
