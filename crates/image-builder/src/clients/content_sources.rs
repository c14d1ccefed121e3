//! Content catalog client: repository lookup and dated snapshots.

use async_trait::async_trait;
use image_builder_common::{Identity, IDENTITY_HEADER};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::{join_url, ClientError, ContentSources};

/// Repository as known to the content catalog.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContentRepository {
    pub uuid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// `red_hat`, `external` or `upload`
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub snapshot: bool,
    #[serde(default)]
    pub gpg_key: Option<String>,
    #[serde(default)]
    pub metadata_verification: Option<bool>,
    #[serde(default)]
    pub module_hotfixes: Option<bool>,
    #[serde(default)]
    pub latest_snapshot_url: Option<String>,
}

impl ContentRepository {
    /// The URL builds should use for this repository.
    pub fn base_url(&self) -> Result<String, String> {
        match self.origin.as_deref() {
            Some("upload") => self.latest_snapshot_url.clone().ok_or_else(|| {
                format!("upload repository {} has no snapshot yet", self.uuid)
            }),
            Some("external") | Some("red_hat") => self
                .url
                .clone()
                .ok_or_else(|| format!("repository {} has no url", self.uuid)),
            Some(other) => Err(format!(
                "unknown origin on content sources repository {}, origin: {}",
                self.uuid, other
            )),
            None => Err(format!(
                "unable to read origin from repository {}",
                self.uuid
            )),
        }
    }

    pub fn gpg_key(&self) -> Option<&str> {
        self.gpg_key.as_deref().filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SnapshotForDate {
    pub repository_uuid: String,
    #[serde(rename = "match")]
    pub matched: Option<SnapshotMatch>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SnapshotMatch {
    pub uuid: String,
    pub url: String,
    #[serde(default)]
    pub repository_path: Option<String>,
}

#[derive(Deserialize)]
struct Collection<T> {
    data: Vec<T>,
}

#[derive(Serialize)]
struct SnapshotsForDateRequest<'a> {
    date: &'a str,
    repository_uuids: &'a [String],
}

pub struct ContentSourcesClient {
    url: String,
    client: reqwest::Client,
}

impl ContentSourcesClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn read(response: reqwest::Response) -> Result<Vec<u8>, ClientError> {
        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ContentSources for ContentSourcesClient {
    async fn repositories(
        &self,
        identity: &Identity,
        urls: &[String],
        ids: &[String],
        external: bool,
    ) -> Result<HashMap<String, ContentRepository>, ClientError> {
        if urls.is_empty() && ids.is_empty() {
            return Ok(HashMap::new());
        }

        let origin = if external { "external,upload" } else { "red_hat" };
        let limit = (urls.len() + ids.len()).to_string();
        let mut query = vec![("origin", origin.to_string()), ("limit", limit)];
        if !urls.is_empty() {
            query.push(("url", urls.join(",")));
        }
        if !ids.is_empty() {
            query.push(("uuid", ids.join(",")));
        }

        let url = join_url(&self.url, "repositories/");
        debug!(%url, urls = urls.len(), ids = ids.len(), "Looking up repositories");

        let response = self
            .client
            .get(&url)
            .query(&query)
            .header(IDENTITY_HEADER, &identity.raw)
            .send()
            .await?;
        let body = Self::read(response).await?;
        let collection: Collection<ContentRepository> = serde_json::from_slice(&body)?;

        Ok(collection
            .data
            .into_iter()
            .map(|repo| (repo.uuid.clone(), repo))
            .collect())
    }

    async fn snapshots_for_date(
        &self,
        identity: &Identity,
        date: &str,
        repository_uuids: &[String],
    ) -> Result<Vec<SnapshotForDate>, ClientError> {
        let url = join_url(&self.url, "snapshots/for_date/");
        let response = self
            .client
            .post(&url)
            .header(IDENTITY_HEADER, &identity.raw)
            .json(&SnapshotsForDateRequest {
                date,
                repository_uuids,
            })
            .send()
            .await?;
        let body = Self::read(response).await?;
        let collection: Collection<SnapshotForDate> = serde_json::from_slice(&body)?;

        Ok(collection.data)
    }
}
