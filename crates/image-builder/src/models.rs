//! Data models for the image builder API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Image types a caller can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageType {
    Aws,
    Ami,
    Azure,
    Vhd,
    Gcp,
    GuestImage,
    ImageInstaller,
    EdgeCommit,
    EdgeInstaller,
    RhelEdgeCommit,
    RhelEdgeInstaller,
    Vsphere,
    VsphereOva,
    Wsl,
    Oci,
}

impl ImageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageType::Aws => "aws",
            ImageType::Ami => "ami",
            ImageType::Azure => "azure",
            ImageType::Vhd => "vhd",
            ImageType::Gcp => "gcp",
            ImageType::GuestImage => "guest-image",
            ImageType::ImageInstaller => "image-installer",
            ImageType::EdgeCommit => "edge-commit",
            ImageType::EdgeInstaller => "edge-installer",
            ImageType::RhelEdgeCommit => "rhel-edge-commit",
            ImageType::RhelEdgeInstaller => "rhel-edge-installer",
            ImageType::Vsphere => "vsphere",
            ImageType::VsphereOva => "vsphere-ova",
            ImageType::Wsl => "wsl",
            ImageType::Oci => "oci",
        }
    }

    /// EC2 images; the only ones that can be cloned.
    pub fn is_aws(&self) -> bool {
        matches!(self, ImageType::Aws | ImageType::Ami)
    }

    pub fn is_azure(&self) -> bool {
        matches!(self, ImageType::Azure | ImageType::Vhd)
    }

    pub fn is_installer(&self) -> bool {
        matches!(
            self,
            ImageType::ImageInstaller | ImageType::EdgeInstaller | ImageType::RhelEdgeInstaller
        )
    }
}

impl std::fmt::Display for ImageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to build one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeRequest {
    /// Distribution name as listed by `/distributions`
    pub distribution: String,

    /// Exactly one entry is accepted
    pub image_requests: Vec<ImageRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customizations: Option<Customizations>,

    /// Frontend that submitted the request (`api`, `ui`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_description: Option<String>,
}

impl ComposeRequest {
    /// Remove user passwords so the body can be persisted or returned.
    pub fn redact_passwords(&mut self) {
        if let Some(customizations) = self.customizations.as_mut() {
            customizations.redact_passwords();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub architecture: String,

    pub image_type: ImageType,

    pub upload_request: UploadRequest,

    /// Requested image size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// Pin repository content to this date (`YYYY-MM-DD` or RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ostree: Option<OsTree>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OsTree {
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contenturl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rhsm: Option<bool>,
}

/// Upload target, keyed by provider.
///
/// Serialized as `{"type": ..., "options": {...}}`. Decoding goes through
/// [`RawUploadRequest`] so that an empty or unknown type produces a readable
/// validation message instead of a generic serde one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "options")]
pub enum UploadRequest {
    #[serde(rename = "aws")]
    Aws(AwsUploadRequestOptions),
    #[serde(rename = "aws.s3")]
    AwsS3(AwsS3UploadRequestOptions),
    #[serde(rename = "gcp")]
    Gcp(GcpUploadRequestOptions),
    #[serde(rename = "azure")]
    Azure(AzureUploadRequestOptions),
    #[serde(rename = "oci.objectstorage")]
    Oci(OciUploadRequestOptions),
}

impl UploadRequest {
    pub fn type_name(&self) -> &'static str {
        match self {
            UploadRequest::Aws(_) => "aws",
            UploadRequest::AwsS3(_) => "aws.s3",
            UploadRequest::Gcp(_) => "gcp",
            UploadRequest::Azure(_) => "azure",
            UploadRequest::Oci(_) => "oci.objectstorage",
        }
    }
}

#[derive(Deserialize)]
struct RawUploadRequest {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    options: serde_json::Value,
}

impl TryFrom<RawUploadRequest> for UploadRequest {
    type Error = String;

    fn try_from(raw: RawUploadRequest) -> Result<Self, Self::Error> {
        fn options<T: serde::de::DeserializeOwned>(
            value: serde_json::Value,
            provider: &str,
        ) -> Result<T, String> {
            let value = if value.is_null() {
                serde_json::Value::Object(Default::default())
            } else {
                value
            };
            serde_json::from_value(value).map_err(|e| {
                format!("Unable to parse upload request options as {} options: {}", provider, e)
            })
        }

        match raw.kind.as_str() {
            "" => Err("Exactly one upload request should be included".to_string()),
            "aws" => Ok(UploadRequest::Aws(options(raw.options, "aws")?)),
            "aws.s3" | "aws-s3" => Ok(UploadRequest::AwsS3(options(raw.options, "aws.s3")?)),
            "gcp" => Ok(UploadRequest::Gcp(options(raw.options, "GCP")?)),
            "azure" => Ok(UploadRequest::Azure(options(raw.options, "Azure")?)),
            "oci.objectstorage" | "oci-objectstorage" => {
                Ok(UploadRequest::Oci(options(raw.options, "OCI")?))
            }
            other => Err(format!("Unknown UploadRequest type {}", other)),
        }
    }
}

impl<'de> Deserialize<'de> for UploadRequest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawUploadRequest::deserialize(deserializer)?;
        UploadRequest::try_from(raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwsUploadRequestOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_with_accounts: Option<Vec<String>>,
    /// Provisioning source ids, resolved to account ids at compose time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_with_sources: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwsS3UploadRequestOptions {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GcpUploadRequestOptions {
    /// Principals such as `user:alice@example.com`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_with_accounts: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AzureUploadRequestOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    pub resource_group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    /// `V1` or `V2`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hyper_v_generation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OciUploadRequestOptions {}

/// Optional image customizations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customizations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages: Option<Vec<String>>,

    /// Repositories used at build time only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_repositories: Option<Vec<Repository>>,

    /// Repositories written into the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_repositories: Option<Vec<CustomRepository>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<Vec<Filesystem>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<User>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<Group>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<File>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directories: Option<Vec<Directory>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containers: Option<Vec<Container>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openscap: Option<OpenScap>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall: Option<Firewall>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Services>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<Locale>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<Timezone>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<Kernel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fdo: Option<Fdo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignition: Option<Ignition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fips: Option<Fips>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer: Option<Installer>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cacerts: Option<CaCertificates>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitioning_mode: Option<PartitioningMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_device: Option<String>,
}

impl Customizations {
    pub fn redact_passwords(&mut self) {
        for user in self.users.iter_mut().flatten() {
            user.password = None;
        }
    }
}

/// Build-time repository, addressed by `baseurl` or by content-sources `id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseurl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metalink: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirrorlist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpgkey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_gpg: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_repo_gpg: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_ssl: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_hotfixes: Option<bool>,
    #[serde(default)]
    pub rhsm: bool,
}

/// Repository configured inside the built image. Same shape downstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomRepository {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseurl: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirrorlist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metalink: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpgkey: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_gpg: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_repo_gpg: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_verify: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_hotfixes: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filesystem {
    pub mountpoint: String,
    /// Minimum size in bytes
    pub min_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl User {
    fn has_password(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
    }

    fn has_ssh_key(&self) -> bool {
        self.ssh_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// A user needs a non-blank name and at least one credential.
    pub fn validate(&self) -> Result<(), String> {
        let valid_name = self.name.chars().any(|c| !c.is_whitespace());
        if !valid_name || !(self.has_password() || self.has_ssh_key()) {
            return Err(format!(
                "User ('{}') must have a name and either a password or an SSH key set.",
                self.name
            ));
        }
        Ok(())
    }

    /// Prepare a user from an update request against the stored users.
    ///
    /// Missing credentials are taken from the stored user of the same name;
    /// an explicit empty string removes the credential.
    pub fn merge_for_update(&mut self, stored: &[User]) -> Result<(), String> {
        if !(self.has_password() && self.has_ssh_key()) {
            match stored.iter().find(|u| u.name == self.name) {
                Some(existing) => {
                    if self.password.is_none() {
                        self.password = existing.password.clone();
                    }
                    if self.ssh_key.is_none() {
                        self.ssh_key = existing.ssh_key.clone();
                    }
                }
                None => self.validate()?,
            }
        }

        if self.password.as_deref() == Some("") {
            self.password = None;
        }
        if self.ssh_key.as_deref() == Some("") {
            self.ssh_key = None;
        }

        self.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<i64>,
}

/// File or directory owner, given as a name or a numeric id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Owner {
    Id(i64),
    Name(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Owner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Owner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// `plain` (default) or `base64`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensure_parents: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Directory {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Owner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Owner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensure_parents: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_verify: Option<bool>,
}

/// OpenSCAP hardening: a plain profile, or a compliance policy whose
/// tailoring is fetched at compose time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenScap {
    Compliance {
        policy_id: Uuid,
    },
    Profile {
        profile_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        profile_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        profile_description: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Firewall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<FirewallServices>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirewallServices {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Services {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masked: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Locale {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timezone {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ntpservers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Kernel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub append: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub organization: i64,
    pub activation_key: String,
    pub server_url: String,
    pub base_url: String,
    /// Register with Insights; enables the `rhcd` service
    pub insights: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rhc: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fdo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturing_server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diun_pub_key_insecure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diun_pub_key_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diun_pub_key_root_certs: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ignition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded: Option<IgnitionEmbedded>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firstboot: Option<IgnitionFirstboot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IgnitionEmbedded {
    pub config: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IgnitionFirstboot {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fips {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Installer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unattended: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sudo_nopasswd: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaCertificates {
    pub pem_certs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitioningMode {
    AutoLvm,
    Lvm,
    Raw,
}

/// Response to a successful compose
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeResponse {
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMeta {
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Links {
    pub first: String,
    pub last: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposesResponseItem {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    pub request: ComposeRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blueprint_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blueprint_version: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposesResponse {
    pub meta: ListMeta,
    pub links: Links,
    pub data: Vec<ComposesResponseItem>,
}

/// Build state of a compose as reported downstream, plus the stored request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeStatus {
    pub image_status: ImageStatus,
    pub request: ComposeRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageStatus {
    /// `pending`, `building`, `uploading`, `registering`, `success`, `failure`
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_status: Option<UploadStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ComposeStatusError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadStatus {
    pub status: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub options: UploadStatusOptions,
}

/// Provider-specific upload result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UploadStatusOptions {
    Aws { ami: String, region: String },
    Gcp { image_name: String, project_id: String },
    Azure { image_name: String },
    Url { url: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeStatusError {
    pub id: i64,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ostree_commit: Option<String>,
    #[serde(default)]
    pub packages: Vec<PackageMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageMetadata {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub version: String,
    pub release: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<String>,
    pub arch: String,
    pub sigmd5: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Re-share an EC2 image with more accounts, optionally in another region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneRequest {
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_with_accounts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_with_sources: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneResponse {
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneStatusResponse {
    pub compose_id: Uuid,
    pub status: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub options: UploadStatusOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClonesResponseItem {
    pub id: Uuid,
    pub compose_id: Uuid,
    pub request: CloneRequest,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClonesResponse {
    pub meta: ListMeta,
    pub links: Links,
    pub data: Vec<ClonesResponseItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionItem {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchitectureItem {
    pub arch: String,
    pub image_types: Vec<String>,
    pub repositories: Vec<Repository>,
}

/// Blueprint body as submitted on create and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub distribution: String,
    pub image_requests: Vec<ImageRequest>,
    #[serde(default)]
    pub customizations: Customizations,
}

/// Stored blueprint version body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintBody {
    pub distribution: String,
    pub image_requests: Vec<ImageRequest>,
    #[serde(default)]
    pub customizations: Customizations,
}

impl BlueprintBody {
    pub fn redact_passwords(&mut self) {
        self.customizations.redact_passwords();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintResponse {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub version: i32,
    pub distribution: String,
    pub image_requests: Vec<ImageRequest>,
    pub customizations: Customizations,
    pub last_modified_at: DateTime<Utc>,
}

/// Where an exported blueprint came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintMetadata {
    pub exported_at: DateTime<Utc>,
    pub parent_id: Uuid,
}

/// Portable copy of a blueprint: no image requests, no secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintExportResponse {
    pub name: String,
    pub description: String,
    pub distribution: String,
    pub customizations: Customizations,
    pub metadata: BlueprintMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBlueprintResponse {
    pub id: Uuid,
}

/// Optional body of a blueprint compose: restricts which image requests run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeBlueprintRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_types: Option<Vec<ImageType>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintItem {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub version: i32,
    pub last_modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintsResponse {
    pub meta: ListMeta,
    pub links: Links,
    pub data: Vec<BlueprintItem>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upload_request_wire_format() {
        let req: UploadRequest = serde_json::from_value(json!({
            "type": "aws",
            "options": { "share_with_accounts": ["123456789012"] }
        }))
        .unwrap();

        assert_eq!(
            req,
            UploadRequest::Aws(AwsUploadRequestOptions {
                share_with_accounts: Some(vec!["123456789012".to_string()]),
                share_with_sources: None,
            })
        );

        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["type"], "aws");
        assert_eq!(value["options"]["share_with_accounts"][0], "123456789012");
    }

    #[test]
    fn test_upload_request_aliases_and_missing_options() {
        let s3: UploadRequest = serde_json::from_value(json!({"type": "aws-s3"})).unwrap();
        assert_eq!(s3, UploadRequest::AwsS3(AwsS3UploadRequestOptions {}));

        let oci: UploadRequest =
            serde_json::from_value(json!({"type": "oci.objectstorage", "options": {}})).unwrap();
        assert_eq!(oci.type_name(), "oci.objectstorage");
    }

    #[test]
    fn test_upload_request_rejections() {
        let err = serde_json::from_value::<UploadRequest>(json!({"type": "", "options": {}}))
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("Exactly one upload request should be included"));

        let err = serde_json::from_value::<UploadRequest>(json!({"type": "floppy"})).unwrap_err();
        assert!(err.to_string().contains("Unknown UploadRequest type floppy"));

        let err = serde_json::from_value::<UploadRequest>(json!({"type": "azure", "options": {}}))
            .unwrap_err();
        assert!(err.to_string().contains("as Azure options"));
    }

    #[test]
    fn test_openscap_variants() {
        let policy: OpenScap = serde_json::from_value(json!({
            "policy_id": "8f0e7b5e-3d6a-4c55-9b1a-7f2f2b8d4c11"
        }))
        .unwrap();
        assert!(matches!(policy, OpenScap::Compliance { .. }));

        let profile: OpenScap =
            serde_json::from_value(json!({"profile_id": "xccdf_org.ssgproject.content_profile_cis"}))
                .unwrap();
        assert!(matches!(profile, OpenScap::Profile { .. }));
    }

    #[test]
    fn test_owner_accepts_name_or_id() {
        let dir: Directory =
            serde_json::from_value(json!({"path": "/opt", "user": "root", "group": 10})).unwrap();
        assert_eq!(dir.user, Some(Owner::Name("root".into())));
        assert_eq!(dir.group, Some(Owner::Id(10)));
    }

    #[test]
    fn test_user_merge_for_update() {
        let stored = vec![User {
            name: "admin".into(),
            password: Some("$6$stored".into()),
            ssh_key: Some("ssh-ed25519 AAAA".into()),
            ..Default::default()
        }];

        let mut keep = User {
            name: "admin".into(),
            ..Default::default()
        };
        keep.merge_for_update(&stored).unwrap();
        assert_eq!(keep.password.as_deref(), Some("$6$stored"));
        assert_eq!(keep.ssh_key.as_deref(), Some("ssh-ed25519 AAAA"));

        let mut drop_password = User {
            name: "admin".into(),
            password: Some(String::new()),
            ..Default::default()
        };
        drop_password.merge_for_update(&stored).unwrap();
        assert_eq!(drop_password.password, None);
        assert!(drop_password.ssh_key.is_some());

        let mut newcomer = User {
            name: "guest".into(),
            ..Default::default()
        };
        let err = newcomer.merge_for_update(&stored).unwrap_err();
        assert_eq!(
            err,
            "User ('guest') must have a name and either a password or an SSH key set."
        );
    }

    #[test]
    fn test_redact_passwords() {
        let mut cust = Customizations {
            users: Some(vec![User {
                name: "u".into(),
                password: Some("secret".into()),
                ssh_key: Some("key".into()),
                ..Default::default()
            }]),
            ..Default::default()
        };
        cust.redact_passwords();
        let user = &cust.users.unwrap()[0];
        assert_eq!(user.password, None);
        assert_eq!(user.ssh_key.as_deref(), Some("key"));
    }
}
