//! Translation of caller customizations into the build service schema.

use base64::{engine::general_purpose, Engine as _};
use image_builder_common::Identity;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clients::composer::types as cmp;
use crate::clients::{Compliance, ComplianceError};
use crate::distribution::DistributionFile;
use crate::models::{ComposeRequest, Customizations, ImageType, OpenScap};
use crate::repositories::{RepositoryError, RepositoryResolver};

/// Largest image AWS and Azure accept, in bytes (64 GiB).
pub const FS_MAX_SIZE: u64 = 68_719_476_736;

/// Group every configured user joins.
pub const ADMIN_GROUP: &str = "wheel";

/// Service needed by Insights registration.
pub const INSIGHTS_SERVICE: &str = "rhcd";

pub const TAILORING_DIR: &str = "/etc/osbuild";
pub const TAILORING_PATH: &str = "/etc/osbuild/openscap-tailoring.json";

#[derive(Error, Debug)]
pub enum CustomizationError {
    #[error("Total {provider} image size cannot exceed {} bytes", FS_MAX_SIZE)]
    ImageTooLarge { provider: &'static str },

    #[error("Installer customizations are not supported for image type {0}")]
    InstallerNotSupported(ImageType),

    #[error("compliance policy {policy_id}: {source}")]
    Compliance {
        policy_id: Uuid,
        major: u32,
        #[source]
        source: ComplianceError,
    },

    #[error("Unable to decode base64 data of file {0}")]
    InvalidFileData(String),

    #[error("{0}")]
    InvalidDistribution(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Reject images AWS or Azure would refuse. The total is the sum of the
/// filesystem minimums, or the requested image size when that is larger.
pub fn validate_size(request: &ComposeRequest) -> Result<(), CustomizationError> {
    let Some(image) = request.image_requests.first() else {
        return Ok(());
    };

    let filesystems: u64 = request
        .customizations
        .as_ref()
        .and_then(|c| c.filesystem.as_ref())
        .map(|fs| fs.iter().fold(0u64, |sum, f| sum.saturating_add(f.min_size)))
        .unwrap_or(0);
    let total = filesystems.max(image.size.unwrap_or(0));

    if total > FS_MAX_SIZE {
        if image.image_type.is_aws() {
            return Err(CustomizationError::ImageTooLarge { provider: "AWS" });
        }
        if image.image_type.is_azure() {
            return Err(CustomizationError::ImageTooLarge { provider: "Azure" });
        }
    }
    Ok(())
}

/// The installer block only applies to installer images.
pub fn validate_installer(request: &ComposeRequest) -> Result<(), CustomizationError> {
    let has_installer = request
        .customizations
        .as_ref()
        .is_some_and(|c| c.installer.is_some());

    match request.image_requests.first() {
        Some(image) if has_installer && !image.image_type.is_installer() => Err(
            CustomizationError::InstallerNotSupported(image.image_type),
        ),
        _ => Ok(()),
    }
}

pub struct CustomizationTranslator<'a> {
    repositories: RepositoryResolver<'a>,
    compliance: &'a dyn Compliance,
    identity: &'a Identity,
}

impl<'a> CustomizationTranslator<'a> {
    pub fn new(
        repositories: RepositoryResolver<'a>,
        compliance: &'a dyn Compliance,
        identity: &'a Identity,
    ) -> Self {
        Self {
            repositories,
            compliance,
            identity,
        }
    }

    pub async fn translate(
        &self,
        request: &ComposeRequest,
        distro: &DistributionFile,
    ) -> Result<Option<cmp::Customizations>, CustomizationError> {
        let Some(cust) = &request.customizations else {
            return Ok(None);
        };
        let snapshot_date = request
            .image_requests
            .first()
            .and_then(|i| i.snapshot_date.as_deref());

        let mut res = cmp::Customizations {
            subscription: cust.subscription.as_ref().map(|s| cmp::Subscription {
                organization: s.organization.to_string(),
                activation_key: s.activation_key.clone(),
                server_url: s.server_url.clone(),
                base_url: s.base_url.clone(),
                insights: s.insights,
                rhc: s.rhc,
            }),
            packages: cust.packages.clone(),
            filesystem: cust.filesystem.clone().filter(|fs| !fs.is_empty()),
            groups: cust.groups.clone(),
            partitioning_mode: cust.partitioning_mode,
            containers: cust.containers.clone(),
            locale: cust.locale.clone(),
            kernel: cust.kernel.clone(),
            services: cust.services.clone(),
            firewall: cust.firewall.clone(),
            timezone: cust.timezone.clone(),
            installation_device: cust.installation_device.clone(),
            fdo: cust.fdo.clone(),
            ignition: cust.ignition.clone(),
            fips: cust.fips.clone(),
            installer: cust.installer.clone(),
            cacerts: cust.cacerts.clone(),
            hostname: cust.hostname.clone(),
            ..Default::default()
        };

        self.translate_repositories(cust, snapshot_date, &mut res)
            .await?;
        self.translate_openscap(cust, distro, &mut res).await?;
        res.users = cust.users.as_ref().map(|users| translate_users(users));
        translate_files(cust, &mut res)?;

        if cust.subscription.as_ref().is_some_and(|s| s.insights) {
            let services = res.services.get_or_insert_with(Default::default);
            let enabled = services.enabled.get_or_insert_with(Vec::new);
            if !enabled.iter().any(|s| s == INSIGHTS_SERVICE) {
                enabled.push(INSIGHTS_SERVICE.to_string());
            }
        }

        Ok(Some(res))
    }

    async fn translate_repositories(
        &self,
        cust: &Customizations,
        snapshot_date: Option<&str>,
        res: &mut cmp::Customizations,
    ) -> Result<(), CustomizationError> {
        if let Some(payload) = cust.payload_repositories.as_deref() {
            match snapshot_date {
                Some(date) => {
                    let mut urls = Vec::new();
                    let mut ids = Vec::new();
                    for repo in payload {
                        if let Some(url) = &repo.baseurl {
                            urls.push(url.clone());
                        } else if let Some(id) = &repo.id {
                            ids.push(id.clone());
                        }
                    }
                    let snapshots = self.repositories.snapshots(&urls, &ids, true, date).await?;
                    res.payload_repositories = Some(snapshots.repositories);
                }
                None if !payload.is_empty() => {
                    res.payload_repositories =
                        Some(self.repositories.payload_repositories(payload).await?);
                }
                None => {}
            }
        }

        if let Some(custom) = cust.custom_repositories.as_deref() {
            match snapshot_date {
                Some(date) => {
                    let mut urls = Vec::new();
                    let mut ids = Vec::new();
                    for repo in custom {
                        match repo.baseurl.as_deref().and_then(|b| b.first()) {
                            Some(url) => urls.push(url.clone()),
                            None if !repo.id.is_empty() => ids.push(repo.id.clone()),
                            None => {}
                        }
                    }
                    let snapshots = self.repositories.snapshots(&urls, &ids, true, date).await?;
                    res.custom_repositories = Some(snapshots.custom_repositories);
                }
                None if !custom.is_empty() => {
                    res.custom_repositories =
                        Some(self.repositories.custom_repositories(custom).await?);
                }
                None => {}
            }
        }

        Ok(())
    }

    async fn translate_openscap(
        &self,
        cust: &Customizations,
        distro: &DistributionFile,
        res: &mut cmp::Customizations,
    ) -> Result<(), CustomizationError> {
        match &cust.openscap {
            None => Ok(()),
            Some(OpenScap::Profile { profile_id, .. }) => {
                if !profile_id.is_empty() {
                    res.openscap = Some(cmp::OpenScap {
                        profile_id: profile_id.clone(),
                        policy_id: None,
                        json_tailoring: None,
                    });
                }
                Ok(())
            }
            Some(OpenScap::Compliance { policy_id }) => {
                let (major, minor) = distro
                    .rhel_major_minor()
                    .map_err(CustomizationError::InvalidDistribution)?;

                let policy = self
                    .compliance
                    .policy_data(self.identity, major, minor, &policy_id.to_string())
                    .await
                    .map_err(|source| {
                        warn!(policy_id = %policy_id, major, minor, error = %source, "Compliance policy lookup failed");
                        CustomizationError::Compliance {
                            policy_id: *policy_id,
                            major,
                            source,
                        }
                    })?;
                debug!(policy_id = %policy_id, profile_id = %policy.profile_id, "Resolved compliance policy");

                let Some(tailoring) = policy.tailoring_data else {
                    res.openscap = Some(cmp::OpenScap {
                        profile_id: policy.profile_id,
                        policy_id: Some(*policy_id),
                        json_tailoring: None,
                    });
                    return Ok(());
                };

                res.openscap = Some(cmp::OpenScap {
                    profile_id: policy.profile_id.clone(),
                    policy_id: Some(*policy_id),
                    json_tailoring: Some(cmp::JsonTailoring {
                        profile_id: policy.profile_id,
                        filepath: TAILORING_PATH.to_string(),
                    }),
                });
                res.directories = Some(vec![crate::models::Directory {
                    path: TAILORING_DIR.to_string(),
                    ..Default::default()
                }]);
                res.files = Some(vec![cmp::File {
                    path: TAILORING_PATH.to_string(),
                    data: Some(tailoring),
                    ..Default::default()
                }]);
                Ok(())
            }
        }
    }
}

fn translate_users(users: &[crate::models::User]) -> Vec<cmp::User> {
    users
        .iter()
        .map(|u| {
            let mut groups = u.groups.clone().unwrap_or_default();
            if !groups.iter().any(|g| g == ADMIN_GROUP) {
                groups.push(ADMIN_GROUP.to_string());
            }
            cmp::User {
                name: u.name.clone(),
                groups: Some(groups),
                key: u.ssh_key.clone(),
                password: u.password.clone(),
            }
        })
        .collect()
}

/// Caller files and directories, after anything the tailoring added.
fn translate_files(
    cust: &Customizations,
    res: &mut cmp::Customizations,
) -> Result<(), CustomizationError> {
    if let Some(dirs) = &cust.directories {
        res.directories
            .get_or_insert_with(Vec::new)
            .extend(dirs.iter().cloned());
    }

    if let Some(files) = &cust.files {
        let mut translated = Vec::with_capacity(files.len());
        for f in files {
            let data = match (&f.data, f.data_encoding.as_deref()) {
                (Some(data), Some("base64")) => {
                    let raw = general_purpose::STANDARD
                        .decode(data)
                        .map_err(|_| CustomizationError::InvalidFileData(f.path.clone()))?;
                    Some(String::from_utf8_lossy(&raw).into_owned())
                }
                (data, _) => data.clone(),
            };

            translated.push(cmp::File {
                path: f.path.clone(),
                mode: f.mode.clone(),
                user: f.user.clone(),
                group: f.group.clone(),
                data,
                ensure_parents: f.ensure_parents,
            });
        }
        res.files.get_or_insert_with(Vec::new).extend(translated);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::PolicyData;
    use crate::distribution::tests::rhel94;
    use crate::models::{
        AwsUploadRequestOptions, File, Filesystem, ImageRequest, Installer, Services,
        Subscription, UploadRequest, User,
    };
    use crate::repositories::tests::FakeCatalog;
    use async_trait::async_trait;

    struct FakeCompliance {
        tailoring: Option<String>,
        major: u32,
    }

    #[async_trait]
    impl Compliance for FakeCompliance {
        async fn policy_data(
            &self,
            _identity: &Identity,
            major: u32,
            _minor: u32,
            policy_id: &str,
        ) -> Result<PolicyData, ComplianceError> {
            if major != self.major {
                return Err(ComplianceError::MajorVersion);
            }
            Ok(PolicyData {
                policy_id: policy_id.to_string(),
                profile_id: "xccdf_org.ssgproject.content_profile_cis".into(),
                tailoring_id: "t1".into(),
                tailoring_data: self.tailoring.clone(),
            })
        }
    }

    fn identity() -> Identity {
        Identity::from_header(&Identity::encode("000000", "500000", "user@user.user")).unwrap()
    }

    fn request(image_type: ImageType, size: Option<u64>, cust: Customizations) -> ComposeRequest {
        ComposeRequest {
            distribution: "rhel-94".into(),
            image_requests: vec![ImageRequest {
                architecture: "x86_64".into(),
                image_type,
                upload_request: UploadRequest::Aws(AwsUploadRequestOptions::default()),
                size,
                snapshot_date: None,
                ostree: None,
            }],
            customizations: Some(cust),
            client_id: None,
            image_name: None,
            image_description: None,
        }
    }

    fn filesystems(sizes: &[u64]) -> Customizations {
        Customizations {
            filesystem: Some(
                sizes
                    .iter()
                    .enumerate()
                    .map(|(i, s)| Filesystem {
                        mountpoint: format!("/mnt/{}", i),
                        min_size: *s,
                    })
                    .collect(),
            ),
            ..Default::default()
        }
    }

    async fn translate(cust: Customizations, compliance: &FakeCompliance) -> cmp::Customizations {
        let catalog = FakeCatalog { repos: vec![] };
        let id = identity();
        let translator =
            CustomizationTranslator::new(RepositoryResolver::new(&catalog, &id), compliance, &id);
        translator
            .translate(&request(ImageType::Aws, None, cust), &rhel94())
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_size_ceiling() {
        let half = FS_MAX_SIZE / 2;
        assert!(validate_size(&request(ImageType::Aws, None, filesystems(&[half, half]))).is_ok());
        assert!(validate_size(&request(ImageType::Aws, Some(FS_MAX_SIZE), Customizations::default())).is_ok());

        let err = validate_size(&request(ImageType::Ami, None, filesystems(&[half, half + 1])))
            .unwrap_err();
        assert_eq!(err.to_string(), "Total AWS image size cannot exceed 68719476736 bytes");

        let err = validate_size(&request(ImageType::Vhd, Some(FS_MAX_SIZE + 1), Customizations::default()))
            .unwrap_err();
        assert_eq!(err.to_string(), "Total Azure image size cannot exceed 68719476736 bytes");

        assert!(validate_size(&request(ImageType::GuestImage, None, filesystems(&[FS_MAX_SIZE, 1]))).is_ok());
    }

    #[test]
    fn test_size_sum_does_not_wrap() {
        let huge = 1u64 << 63;
        let err = validate_size(&request(ImageType::Aws, None, filesystems(&[huge, huge])))
            .unwrap_err();
        assert!(matches!(err, CustomizationError::ImageTooLarge { provider: "AWS" }));

        let err = validate_size(&request(ImageType::Azure, None, filesystems(&[u64::MAX, 1])))
            .unwrap_err();
        assert!(matches!(err, CustomizationError::ImageTooLarge { provider: "Azure" }));
    }

    #[test]
    fn test_installer_only_for_installer_images() {
        let cust = Customizations {
            installer: Some(Installer {
                unattended: Some(true),
                sudo_nopasswd: None,
            }),
            ..Default::default()
        };
        assert!(validate_installer(&request(ImageType::ImageInstaller, None, cust.clone())).is_ok());
        assert!(matches!(
            validate_installer(&request(ImageType::Aws, None, cust)),
            Err(CustomizationError::InstallerNotSupported(ImageType::Aws))
        ));
    }

    #[tokio::test]
    async fn test_users_join_admin_group() {
        let cust = Customizations {
            users: Some(vec![
                User {
                    name: "alice".into(),
                    ssh_key: Some("ssh-ed25519 AAAA".into()),
                    ..Default::default()
                },
                User {
                    name: "bob".into(),
                    groups: Some(vec!["wheel".into(), "adm".into()]),
                    password: Some("secret".into()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };
        let res = translate(cust, &FakeCompliance { tailoring: None, major: 9 }).await;
        let users = res.users.unwrap();

        assert_eq!(users[0].groups, Some(vec!["wheel".to_string()]));
        assert_eq!(users[0].key.as_deref(), Some("ssh-ed25519 AAAA"));
        assert_eq!(users[1].groups, Some(vec!["wheel".to_string(), "adm".to_string()]));
        assert_eq!(users[1].password.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_insights_enables_rhcd_once() {
        let subscription = Subscription {
            organization: 666,
            activation_key: "key".into(),
            server_url: "subscription.rhsm.redhat.com".into(),
            base_url: "http://cdn.redhat.com/".into(),
            insights: true,
            rhc: None,
        };
        let compliance = FakeCompliance { tailoring: None, major: 9 };

        let res = translate(
            Customizations {
                subscription: Some(subscription.clone()),
                ..Default::default()
            },
            &compliance,
        )
        .await;
        assert_eq!(res.subscription.unwrap().organization, "666");
        assert_eq!(res.services.unwrap().enabled, Some(vec!["rhcd".to_string()]));

        let res = translate(
            Customizations {
                subscription: Some(subscription),
                services: Some(Services {
                    enabled: Some(vec!["sshd".into(), "rhcd".into()]),
                    ..Default::default()
                }),
                ..Default::default()
            },
            &compliance,
        )
        .await;
        assert_eq!(
            res.services.unwrap().enabled,
            Some(vec!["sshd".to_string(), "rhcd".to_string()])
        );
    }

    #[tokio::test]
    async fn test_compliance_tailoring_adds_file() {
        let policy_id = Uuid::new_v4();
        let cust = Customizations {
            openscap: Some(OpenScap::Compliance { policy_id }),
            files: Some(vec![File {
                path: "/etc/motd".into(),
                data: Some("aGVsbG8=".into()),
                data_encoding: Some("base64".into()),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let res = translate(
            cust,
            &FakeCompliance {
                tailoring: Some("{\"profiles\":[]}".into()),
                major: 9,
            },
        )
        .await;

        let openscap = res.openscap.unwrap();
        assert_eq!(openscap.policy_id, Some(policy_id));
        assert_eq!(openscap.json_tailoring.unwrap().filepath, TAILORING_PATH);
        assert_eq!(res.directories.unwrap()[0].path, TAILORING_DIR);

        let files = res.files.unwrap();
        assert_eq!(files[0].path, TAILORING_PATH);
        assert_eq!(files[1].path, "/etc/motd");
        assert_eq!(files[1].data.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_compliance_major_mismatch() {
        let catalog = FakeCatalog { repos: vec![] };
        let id = identity();
        let compliance = FakeCompliance { tailoring: None, major: 8 };
        let translator =
            CustomizationTranslator::new(RepositoryResolver::new(&catalog, &id), &compliance, &id);

        let cust = Customizations {
            openscap: Some(OpenScap::Compliance {
                policy_id: Uuid::new_v4(),
            }),
            ..Default::default()
        };
        let err = translator
            .translate(&request(ImageType::Aws, None, cust), &rhel94())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CustomizationError::Compliance {
                major: 9,
                source: ComplianceError::MajorVersion,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_plain_profile_passes_through() {
        let cust = Customizations {
            openscap: Some(OpenScap::Profile {
                profile_id: "xccdf_org.ssgproject.content_profile_standard".into(),
                profile_name: None,
                profile_description: None,
            }),
            ..Default::default()
        };
        let res = translate(cust, &FakeCompliance { tailoring: None, major: 9 }).await;
        let openscap = res.openscap.unwrap();
        assert_eq!(openscap.profile_id, "xccdf_org.ssgproject.content_profile_standard");
        assert!(openscap.json_tailoring.is_none());
        assert!(res.files.is_none());
    }
}
