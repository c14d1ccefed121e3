//! Repository resolution: distribution defaults, caller repositories, and
//! date-pinned snapshots from the content catalog.

use chrono::{DateTime, NaiveDate, Utc};
use image_builder_common::Identity;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clients::composer::types as cmp;
use crate::clients::{ClientError, ContentRepository, ContentSources};
use crate::distribution::Architecture;
use crate::models::{CustomRepository, ImageType, Repository};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error(
        "Snapshot date {0} is not in DateOnly (yyyy-mm-dd) or RFC3339 (yyyy-mm-ddThh:mm:ssZ) format"
    )]
    InvalidSnapshotDate(String),

    #[error("Repository {url} (id: {id}) has snapshotting disabled")]
    SnapshotDisabled { url: String, id: String },

    #[error("Repository {0} could not be resolved")]
    Unresolved(String),

    #[error("no snapshots found for all repositories (found {found}, expected {expected})")]
    MissingSnapshots { found: usize, expected: usize },

    #[error("unable to retrieve repositories: {0}")]
    Catalog(#[from] ClientError),

    #[error("{0}")]
    Unexpected(String),
}

/// Snapshot-pinned repositories in both downstream shapes.
#[derive(Debug, Default)]
pub struct Snapshots {
    pub repositories: Vec<cmp::Repository>,
    pub custom_repositories: Vec<CustomRepository>,
}

/// Accepts `YYYY-MM-DD` or RFC 3339. Returned in UTC.
pub fn parse_snapshot_date(date: &str) -> Result<DateTime<Utc>, RepositoryError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(date) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| RepositoryError::InvalidSnapshotDate(date.to_string()))
}

/// Distribution repositories that apply to `image_type`, unpinned.
pub fn base_repositories(arch: &Architecture, image_type: ImageType) -> Vec<cmp::Repository> {
    arch.repositories
        .iter()
        .filter(|r| r.applies_to(image_type))
        .map(|r| cmp::Repository {
            baseurl: r.baseurl.clone(),
            metalink: r.metalink.clone(),
            rhsm: Some(r.rhsm),
            gpgkey: r.gpgkey.clone(),
            check_gpg: r.check_gpg,
            ..Default::default()
        })
        .collect()
}

fn same_url(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

/// Resolves repositories against the content catalog on behalf of one caller.
pub struct RepositoryResolver<'a> {
    content: &'a dyn ContentSources,
    identity: &'a Identity,
}

impl<'a> RepositoryResolver<'a> {
    pub fn new(content: &'a dyn ContentSources, identity: &'a Identity) -> Self {
        Self { content, identity }
    }

    /// Repositories baked into the image for this architecture and type,
    /// pinned to `snapshot_date` when one is given.
    pub async fn resolve(
        &self,
        arch: &Architecture,
        image_type: ImageType,
        snapshot_date: Option<&str>,
    ) -> Result<Vec<cmp::Repository>, RepositoryError> {
        let Some(date) = snapshot_date else {
            return Ok(base_repositories(arch, image_type));
        };

        let mut repositories = Vec::new();
        let mut urls = Vec::new();
        for repo in &arch.repositories {
            // third-party repositories are not snapshotted
            if repo.is_tagged_for(image_type) && !repo.rhsm {
                repositories.push(cmp::Repository {
                    baseurl: repo.baseurl.clone(),
                    metalink: repo.metalink.clone(),
                    rhsm: Some(repo.rhsm),
                    gpgkey: repo.gpgkey.clone(),
                    check_gpg: repo.check_gpg,
                    ..Default::default()
                });
                continue;
            }

            if repo.applies_to(image_type) {
                if let Some(url) = &repo.baseurl {
                    urls.push(url.clone());
                }
            }
        }

        let snapshots = self.snapshots(&urls, &[], false, date).await?;
        repositories.extend(snapshots.repositories);

        let expected = base_repositories(arch, image_type).len();
        if repositories.len() != expected {
            return Err(RepositoryError::MissingSnapshots {
                found: repositories.len(),
                expected,
            });
        }

        Ok(repositories)
    }

    /// Pin the repositories addressed by `urls` and `ids` to `date`.
    /// `external` selects user repositories instead of Red Hat ones.
    pub async fn snapshots(
        &self,
        urls: &[String],
        ids: &[String],
        external: bool,
        date: &str,
    ) -> Result<Snapshots, RepositoryError> {
        let date = parse_snapshot_date(date)?;
        if urls.is_empty() && ids.is_empty() {
            return Ok(Snapshots::default());
        }

        let catalog = self
            .content
            .repositories(self.identity, urls, ids, external)
            .await
            .map_err(|e| {
                warn!(error = %e, "Unable to get repositories for base urls");
                RepositoryError::Catalog(e)
            })?;

        let ordered = order_by_request(&catalog, urls, ids)?;
        for repo in &ordered {
            if !repo.snapshot {
                return Err(RepositoryError::SnapshotDisabled {
                    url: repo.url.clone().unwrap_or_default(),
                    id: repo.uuid.clone(),
                });
            }
        }

        let uuids: Vec<String> = ordered.iter().map(|r| r.uuid.clone()).collect();
        let formatted = date.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let found = self
            .content
            .snapshots_for_date(self.identity, &formatted, &uuids)
            .await?;
        let mut by_uuid: HashMap<String, _> = found
            .into_iter()
            .filter_map(|s| s.matched.map(|m| (s.repository_uuid, m)))
            .collect();

        let mut snapshots = Snapshots::default();
        for repo in ordered {
            let Some(matched) = by_uuid.remove(&repo.uuid) else {
                return Err(RepositoryError::MissingSnapshots {
                    found: snapshots.repositories.len(),
                    expected: uuids.len(),
                });
            };

            let gpgkey = repo.gpg_key().map(str::to_string);
            snapshots.repositories.push(cmp::Repository {
                baseurl: Some(matched.url.clone()),
                rhsm: Some(false),
                check_gpg: gpgkey.as_ref().map(|_| true),
                gpgkey: gpgkey.clone(),
                module_hotfixes: repo.module_hotfixes,
                check_repo_gpg: repo.metadata_verification,
                ..Default::default()
            });

            // written disabled, they need further setup on the running system
            snapshots.custom_repositories.push(CustomRepository {
                id: repo.uuid.clone(),
                name: repo.name.clone(),
                baseurl: Some(vec![matched.url]),
                enabled: Some(false),
                check_gpg: gpgkey.as_ref().map(|_| true),
                gpgkey: gpgkey.map(|k| vec![k]),
                module_hotfixes: repo.module_hotfixes,
                check_repo_gpg: repo.metadata_verification,
                ..Default::default()
            });
        }

        debug!(count = snapshots.repositories.len(), date = %formatted, "Resolved snapshots");
        Ok(snapshots)
    }

    /// Build-time repositories given by the caller, filled in from the
    /// catalog where addressed by id. Explicit caller values win.
    pub async fn payload_repositories(
        &self,
        repos: &[Repository],
    ) -> Result<Vec<cmp::Repository>, RepositoryError> {
        let ids: Vec<String> = repos.iter().filter_map(|r| r.id.clone()).collect();
        let catalog = self
            .content
            .repositories(self.identity, &[], &ids, true)
            .await?;

        let mut resolved = Vec::with_capacity(repos.len());
        for repo in repos {
            let known = repo.id.as_ref().and_then(|id| catalog.get(id));
            let baseurl = match (&repo.baseurl, known) {
                (Some(url), _) => Some(url.clone()),
                (None, Some(known)) => Some(known.base_url().map_err(RepositoryError::Unexpected)?),
                (None, None) => match &repo.id {
                    Some(id) => return Err(RepositoryError::Unresolved(id.clone())),
                    None => None,
                },
            };
            let catalog_key = known.and_then(|k| k.gpg_key());

            resolved.push(cmp::Repository {
                baseurl,
                metalink: repo.metalink.clone(),
                mirrorlist: repo.mirrorlist.clone(),
                rhsm: Some(repo.rhsm),
                gpgkey: repo
                    .gpgkey
                    .clone()
                    .or_else(|| catalog_key.map(str::to_string)),
                check_gpg: repo.check_gpg.or(catalog_key.map(|_| true)),
                check_repo_gpg: repo
                    .check_repo_gpg
                    .or_else(|| catalog_key.and(known.and_then(|k| k.metadata_verification))),
                ignore_ssl: repo.ignore_ssl,
                module_hotfixes: repo
                    .module_hotfixes
                    .or_else(|| known.and_then(|k| k.module_hotfixes)),
            });
        }

        Ok(resolved)
    }

    /// Repositories configured inside the image, filled in from the catalog.
    pub async fn custom_repositories(
        &self,
        repos: &[CustomRepository],
    ) -> Result<Vec<CustomRepository>, RepositoryError> {
        let ids: Vec<String> = repos.iter().map(|r| r.id.clone()).collect();
        let catalog = self
            .content
            .repositories(self.identity, &[], &ids, true)
            .await?;

        let mut resolved = Vec::with_capacity(repos.len());
        for repo in repos {
            let known = catalog.get(&repo.id);
            let baseurl = match (&repo.baseurl, known) {
                (Some(urls), _) => Some(urls.clone()),
                (None, Some(known)) => Some(vec![known
                    .base_url()
                    .map_err(RepositoryError::Unexpected)?]),
                (None, None) if repo.metalink.is_none() && repo.mirrorlist.is_none() => {
                    return Err(RepositoryError::Unresolved(repo.id.clone()))
                }
                (None, None) => None,
            };
            let catalog_key = known.and_then(|k| k.gpg_key());

            resolved.push(CustomRepository {
                id: repo.id.clone(),
                name: repo.name.clone().or_else(|| known.and_then(|k| k.name.clone())),
                filename: repo.filename.clone(),
                baseurl,
                mirrorlist: repo.mirrorlist.clone(),
                metalink: repo.metalink.clone(),
                gpgkey: repo
                    .gpgkey
                    .clone()
                    .or_else(|| catalog_key.map(|k| vec![k.to_string()])),
                check_gpg: repo.check_gpg.or(catalog_key.map(|_| true)),
                check_repo_gpg: repo
                    .check_repo_gpg
                    .or_else(|| catalog_key.and(known.and_then(|k| k.metadata_verification))),
                enabled: repo.enabled,
                priority: repo.priority,
                ssl_verify: repo.ssl_verify,
                module_hotfixes: repo
                    .module_hotfixes
                    .or_else(|| known.and_then(|k| k.module_hotfixes)),
            });
        }

        Ok(resolved)
    }
}

/// Catalog entries in request order. Every URL and id must be known.
fn order_by_request<'c>(
    catalog: &'c HashMap<String, ContentRepository>,
    urls: &[String],
    ids: &[String],
) -> Result<Vec<&'c ContentRepository>, RepositoryError> {
    let mut ordered: Vec<&ContentRepository> = Vec::with_capacity(urls.len() + ids.len());

    for url in urls {
        let repo = catalog
            .values()
            .find(|r| r.url.as_deref().is_some_and(|u| same_url(u, url)))
            .ok_or_else(|| RepositoryError::Unresolved(url.clone()))?;
        if !ordered.iter().any(|r| r.uuid == repo.uuid) {
            ordered.push(repo);
        }
    }
    for id in ids {
        let repo = catalog
            .get(id)
            .ok_or_else(|| RepositoryError::Unresolved(id.clone()))?;
        if !ordered.iter().any(|r| r.uuid == repo.uuid) {
            ordered.push(repo);
        }
    }

    Ok(ordered)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clients::content_sources::SnapshotMatch;
    use crate::clients::SnapshotForDate;
    use crate::distribution::tests::rhel94;
    use async_trait::async_trait;

    /// Catalog holding a fixed set of repositories; every repository has a
    /// snapshot at `https://snap/<uuid>`.
    pub(crate) struct FakeCatalog {
        pub repos: Vec<ContentRepository>,
    }

    #[async_trait]
    impl ContentSources for FakeCatalog {
        async fn repositories(
            &self,
            _identity: &Identity,
            urls: &[String],
            ids: &[String],
            _external: bool,
        ) -> Result<HashMap<String, ContentRepository>, ClientError> {
            Ok(self
                .repos
                .iter()
                .filter(|r| {
                    ids.contains(&r.uuid)
                        || r.url
                            .as_deref()
                            .is_some_and(|u| urls.iter().any(|x| same_url(x, u)))
                })
                .map(|r| (r.uuid.clone(), r.clone()))
                .collect())
        }

        async fn snapshots_for_date(
            &self,
            _identity: &Identity,
            _date: &str,
            uuids: &[String],
        ) -> Result<Vec<SnapshotForDate>, ClientError> {
            Ok(uuids
                .iter()
                .map(|u| SnapshotForDate {
                    repository_uuid: u.clone(),
                    matched: Some(SnapshotMatch {
                        uuid: format!("snap-{}", u),
                        url: format!("https://snap/{}", u),
                        repository_path: None,
                    }),
                })
                .collect())
        }
    }

    pub(crate) fn catalog_repo(uuid: &str, url: &str, origin: &str) -> ContentRepository {
        ContentRepository {
            uuid: uuid.into(),
            name: Some(format!("{} repo", uuid)),
            url: Some(url.into()),
            origin: Some(origin.into()),
            snapshot: true,
            gpg_key: Some("-----BEGIN PGP".into()),
            metadata_verification: Some(false),
            ..Default::default()
        }
    }

    fn identity() -> Identity {
        Identity::from_header(&Identity::encode("000000", "500000", "user@user.user")).unwrap()
    }

    fn rhel_catalog() -> FakeCatalog {
        FakeCatalog {
            repos: vec![
                catalog_repo("baseos", "https://cdn.redhat.com/rhel9/baseos/", "red_hat"),
                catalog_repo("appstream", "https://cdn.redhat.com/rhel9/appstream", "red_hat"),
            ],
        }
    }

    #[test]
    fn test_parse_snapshot_date() {
        let d = parse_snapshot_date("2024-01-02").unwrap();
        assert_eq!(d.format("%Y-%m-%dT%H:%M:%SZ").to_string(), "2024-01-02T00:00:00Z");

        let d = parse_snapshot_date("2024-01-02T10:00:00+02:00").unwrap();
        assert_eq!(d.format("%Y-%m-%dT%H:%M:%SZ").to_string(), "2024-01-02T08:00:00Z");

        assert!(matches!(
            parse_snapshot_date("02/01/2024"),
            Err(RepositoryError::InvalidSnapshotDate(_))
        ));
    }

    #[test]
    fn test_base_repositories_follow_tags() {
        let distro = rhel94();
        let arch = distro.architecture("x86_64").unwrap();

        assert_eq!(base_repositories(arch, ImageType::Aws).len(), 2);
        let gcp = base_repositories(arch, ImageType::Gcp);
        assert_eq!(gcp.len(), 3);
        assert_eq!(gcp[2].rhsm, Some(false));
    }

    #[tokio::test]
    async fn test_resolve_without_date_is_static() {
        let distro = rhel94();
        let arch = distro.architecture("x86_64").unwrap();
        let catalog = FakeCatalog { repos: vec![] };
        let id = identity();

        let repos = RepositoryResolver::new(&catalog, &id)
            .resolve(arch, ImageType::Aws, None)
            .await
            .unwrap();
        assert_eq!(
            repos[0].baseurl.as_deref(),
            Some("https://cdn.redhat.com/rhel9/baseos")
        );
        assert_eq!(repos[0].check_gpg, Some(true));
    }

    #[tokio::test]
    async fn test_resolve_pins_rhsm_repositories() {
        let distro = rhel94();
        let arch = distro.architecture("x86_64").unwrap();
        let catalog = rhel_catalog();
        let id = identity();

        let repos = RepositoryResolver::new(&catalog, &id)
            .resolve(arch, ImageType::Gcp, Some("2024-01-02"))
            .await
            .unwrap();

        // the gcp-tagged third party repository is kept as is
        assert_eq!(
            repos[0].baseurl.as_deref(),
            Some("https://packages.cloud.google.com/yum")
        );
        assert_eq!(repos[1].baseurl.as_deref(), Some("https://snap/baseos"));
        assert_eq!(repos[2].baseurl.as_deref(), Some("https://snap/appstream"));
        assert_eq!(repos[1].rhsm, Some(false));
        assert_eq!(repos[1].check_gpg, Some(true));
    }

    #[tokio::test]
    async fn test_unknown_repository_is_fatal() {
        let distro = rhel94();
        let arch = distro.architecture("x86_64").unwrap();
        let catalog = FakeCatalog {
            repos: vec![catalog_repo(
                "baseos",
                "https://cdn.redhat.com/rhel9/baseos",
                "red_hat",
            )],
        };
        let id = identity();

        let err = RepositoryResolver::new(&catalog, &id)
            .resolve(arch, ImageType::Aws, Some("2024-01-02"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Unresolved(url) if url.ends_with("appstream")));
    }

    #[tokio::test]
    async fn test_snapshotting_disabled() {
        let mut repo = catalog_repo("ext", "https://example.com/repo", "external");
        repo.snapshot = false;
        let catalog = FakeCatalog { repos: vec![repo] };
        let id = identity();

        let err = RepositoryResolver::new(&catalog, &id)
            .snapshots(&[], &["ext".to_string()], true, "2024-01-02")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Repository https://example.com/repo (id: ext) has snapshotting disabled"
        );
    }

    #[tokio::test]
    async fn test_snapshot_custom_repositories_are_disabled() {
        let catalog = FakeCatalog {
            repos: vec![catalog_repo("ext", "https://example.com/repo", "external")],
        };
        let id = identity();

        let snaps = RepositoryResolver::new(&catalog, &id)
            .snapshots(&["https://example.com/repo/".to_string()], &[], true, "2024-01-02")
            .await
            .unwrap();
        let custom = &snaps.custom_repositories[0];
        assert_eq!(custom.id, "ext");
        assert_eq!(custom.enabled, Some(false));
        assert_eq!(custom.baseurl, Some(vec!["https://snap/ext".to_string()]));
        assert_eq!(custom.gpgkey, Some(vec!["-----BEGIN PGP".to_string()]));
    }

    #[tokio::test]
    async fn test_payload_repositories_prefer_caller_values() {
        let catalog = FakeCatalog {
            repos: vec![catalog_repo("ext", "https://example.com/repo", "external")],
        };
        let id = identity();
        let resolver = RepositoryResolver::new(&catalog, &id);

        let repos = resolver
            .payload_repositories(&[
                Repository {
                    id: Some("ext".into()),
                    check_gpg: Some(false),
                    ..Default::default()
                },
                Repository {
                    baseurl: Some("https://other.example.com".into()),
                    ..Default::default()
                },
            ])
            .await
            .unwrap();

        assert_eq!(repos[0].baseurl.as_deref(), Some("https://example.com/repo"));
        assert_eq!(repos[0].check_gpg, Some(false));
        assert_eq!(repos[0].gpgkey.as_deref(), Some("-----BEGIN PGP"));
        assert_eq!(repos[1].gpgkey, None);
        assert_eq!(repos[1].rhsm, Some(false));

        let err = resolver
            .payload_repositories(&[Repository {
                id: Some("missing".into()),
                ..Default::default()
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Unresolved(id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_custom_repositories_fill_name() {
        let catalog = FakeCatalog {
            repos: vec![catalog_repo("ext", "https://example.com/repo", "external")],
        };
        let id = identity();

        let repos = RepositoryResolver::new(&catalog, &id)
            .custom_repositories(&[CustomRepository {
                id: "ext".into(),
                ..Default::default()
            }])
            .await
            .unwrap();
        assert_eq!(repos[0].name.as_deref(), Some("ext repo"));
        assert_eq!(repos[0].baseurl, Some(vec!["https://example.com/repo".to_string()]));
        assert_eq!(repos[0].check_gpg, Some(true));
    }
}
