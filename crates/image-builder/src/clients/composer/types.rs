//! Wire types of the build service (`/api/image-builder-composer/v2`).
//!
//! Leaf customizations whose shape is identical on both sides reuse the
//! public API models.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    CaCertificates, Container, CustomRepository, Directory, Fdo, Filesystem, Firewall, Fips,
    Group, Ignition, Installer, Kernel, Locale, Owner, PartitioningMode, Services, Timezone,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposeRequest {
    /// Build-service distribution name, e.g. `rhel-9.4`
    pub distribution: String,
    pub image_request: ImageRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customizations: Option<Customizations>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRequest {
    pub architecture: String,
    pub image_type: ImageType,
    pub repositories: Vec<Repository>,
    pub upload_options: UploadOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ostree: Option<OsTree>,
}

/// Image types understood by the build service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageType {
    Aws,
    Azure,
    Gcp,
    GuestImage,
    ImageInstaller,
    EdgeCommit,
    EdgeInstaller,
    Vsphere,
    VsphereOva,
    Wsl,
    Oci,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UploadOptions {
    AwsEc2(AwsEc2UploadOptions),
    AwsS3(AwsS3UploadOptions),
    Gcp(GcpUploadOptions),
    Azure(AzureUploadOptions),
    Oci(OciUploadOptions),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AwsEc2UploadOptions {
    pub region: String,
    pub share_with_accounts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AwsS3UploadOptions {
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GcpUploadOptions {
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_with_accounts: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AzureUploadOptions {
    pub tenant_id: String,
    pub subscription_id: String,
    pub resource_group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hyper_v_generation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OciUploadOptions {}

/// Build-time repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Repository {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseurl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metalink: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirrorlist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rhsm: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpgkey: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_gpg: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_repo_gpg: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_ssl: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_hotfixes: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OsTree {
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contenturl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rhsm: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Customizations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packages: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_repositories: Option<Vec<Repository>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_repositories: Option<Vec<CustomRepository>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openscap: Option<OpenScap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<Vec<Filesystem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<User>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<Group>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partitioning_mode: Option<PartitioningMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub containers: Option<Vec<Container>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directories: Option<Vec<Directory>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<File>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<Locale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<Kernel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<Services>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firewall: Option<Firewall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<Timezone>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installation_device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fdo: Option<Fdo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignition: Option<Ignition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fips: Option<Fips>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installer: Option<Installer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cacerts: Option<CaCertificates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscription {
    pub organization: String,
    pub activation_key: String,
    pub server_url: String,
    pub base_url: String,
    pub insights: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rhc: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenScap {
    pub profile_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_tailoring: Option<JsonTailoring>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonTailoring {
    pub profile_id: String,
    pub filepath: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct User {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct File {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Owner>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<Owner>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ensure_parents: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComposeId {
    pub id: Uuid,
}

/// Error body returned on non-2xx responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComposeStatus {
    pub image_status: ImageStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageStatus {
    pub status: String,
    #[serde(default)]
    pub upload_status: Option<UploadStatus>,
    #[serde(default)]
    pub error: Option<ComposeStatusError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadStatus {
    pub status: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ComposeStatusError {
    pub id: i64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComposeMetadata {
    #[serde(default)]
    pub ostree_commit: Option<String>,
    #[serde(default)]
    pub packages: Option<Vec<crate::models::PackageMetadata>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AwsEc2CloneCompose {
    pub region: String,
    pub share_with_accounts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloneStatus {
    pub status: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub options: serde_json::Value,
}
