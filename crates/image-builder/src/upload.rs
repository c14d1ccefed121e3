//! Upload target resolution.
//!
//! Pairs a caller's upload request with the image type, checks the pairing
//! is supported and produces the build service's upload options. AWS and
//! Azure targets may name provisioning sources that are resolved to account
//! ids here.

use image_builder_common::Identity;
use thiserror::Error;
use tracing::{error, info};

use crate::clients::composer::types as cmp;
use crate::clients::{ClientError, Provisioning};
use crate::models::{
    AwsUploadRequestOptions, AzureUploadRequestOptions, GcpUploadRequestOptions, ImageType,
    UploadRequest,
};

pub const AZURE_TARGET_MESSAGE: &str = "Request must contain either (1) a source id, and no tenant or subscription ids or (2) tenant and subscription ids, and no source id.";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid image type for upload target")]
    InvalidImageType,

    #[error("Expected at least one source or account to share the image with")]
    MissingShareTarget,

    #[error("{}", AZURE_TARGET_MESSAGE)]
    AzureTarget,

    #[error("Unable to request source: {0}")]
    SourceRequest(String),

    #[error("Unable to resolve source: {0}")]
    SourceDecode(String),

    #[error("Unable to resolve source {0} to an aws account id")]
    AwsSourceUnresolved(String),

    #[error("Unable to resolve source {0} to an Azure tenant id or subscription id.")]
    AzureSourceUnresolved(String),
}

/// Service-side upload settings that callers cannot choose.
#[derive(Debug, Clone, Default)]
pub struct UploadTargets {
    pub aws_region: String,
    pub gcp_region: String,
    pub gcp_bucket: Option<String>,
}

pub struct UploadResolver<'a> {
    provisioning: &'a dyn Provisioning,
    identity: &'a Identity,
    targets: &'a UploadTargets,
}

impl<'a> UploadResolver<'a> {
    pub fn new(
        provisioning: &'a dyn Provisioning,
        identity: &'a Identity,
        targets: &'a UploadTargets,
    ) -> Self {
        Self {
            provisioning,
            identity,
            targets,
        }
    }

    pub async fn resolve(
        &self,
        request: &UploadRequest,
        image_type: ImageType,
    ) -> Result<(cmp::UploadOptions, cmp::ImageType), UploadError> {
        match request {
            UploadRequest::Aws(options) => self.aws(options, image_type).await,
            UploadRequest::AwsS3(_) => {
                let image_type = s3_image_type(image_type)?;
                Ok((
                    cmp::UploadOptions::AwsS3(cmp::AwsS3UploadOptions {
                        region: self.targets.aws_region.clone(),
                    }),
                    image_type,
                ))
            }
            UploadRequest::Gcp(options) => self.gcp(options, image_type),
            UploadRequest::Azure(options) => self.azure(options, image_type).await,
            UploadRequest::Oci(_) => {
                if image_type != ImageType::Oci {
                    return Err(UploadError::InvalidImageType);
                }
                Ok((
                    cmp::UploadOptions::Oci(cmp::OciUploadOptions {}),
                    cmp::ImageType::Oci,
                ))
            }
        }
    }

    async fn aws(
        &self,
        options: &AwsUploadRequestOptions,
        image_type: ImageType,
    ) -> Result<(cmp::UploadOptions, cmp::ImageType), UploadError> {
        if !image_type.is_aws() {
            return Err(UploadError::InvalidImageType);
        }

        let share_with_accounts = self
            .aws_accounts(
                options.share_with_accounts.as_deref(),
                options.share_with_sources.as_deref(),
            )
            .await?;

        Ok((
            cmp::UploadOptions::AwsEc2(cmp::AwsEc2UploadOptions {
                region: self.targets.aws_region.clone(),
                share_with_accounts,
            }),
            cmp::ImageType::Aws,
        ))
    }

    /// Explicit accounts followed by the accounts behind each source.
    /// Also used when cloning an image.
    pub async fn aws_accounts(
        &self,
        accounts: Option<&[String]>,
        sources: Option<&[String]>,
    ) -> Result<Vec<String>, UploadError> {
        let accounts = accounts.unwrap_or_default();
        let sources = sources.unwrap_or_default();
        if accounts.is_empty() && sources.is_empty() {
            return Err(UploadError::MissingShareTarget);
        }

        let mut resolved = accounts.to_vec();
        for source in sources {
            let info = self.upload_info(source).await?;
            let account_id = info
                .aws
                .and_then(|aws| aws.account_id)
                .filter(|id| id.len() == 12)
                .ok_or_else(|| UploadError::AwsSourceUnresolved(source.clone()))?;

            info!(
                source_id = %source.replace('\n', ""),
                account_id = %account_id,
                "Resolved source to account id"
            );
            resolved.push(account_id);
        }

        Ok(resolved)
    }

    fn gcp(
        &self,
        options: &GcpUploadRequestOptions,
        image_type: ImageType,
    ) -> Result<(cmp::UploadOptions, cmp::ImageType), UploadError> {
        if image_type != ImageType::Gcp {
            return Err(UploadError::InvalidImageType);
        }

        Ok((
            cmp::UploadOptions::Gcp(cmp::GcpUploadOptions {
                region: self.targets.gcp_region.clone(),
                bucket: self.targets.gcp_bucket.clone(),
                share_with_accounts: options.share_with_accounts.clone(),
            }),
            cmp::ImageType::Gcp,
        ))
    }

    async fn azure(
        &self,
        options: &AzureUploadRequestOptions,
        image_type: ImageType,
    ) -> Result<(cmp::UploadOptions, cmp::ImageType), UploadError> {
        if !image_type.is_azure() {
            return Err(UploadError::InvalidImageType);
        }

        let (tenant_id, subscription_id) = match (
            &options.source_id,
            &options.tenant_id,
            &options.subscription_id,
        ) {
            (None, Some(tenant), Some(subscription)) => (tenant.clone(), subscription.clone()),
            (Some(source), None, None) => {
                let info = self.upload_info(source).await?;
                let azure = info.azure.unwrap_or_default();
                match (azure.tenant_id, azure.subscription_id) {
                    (Some(tenant), Some(subscription)) => {
                        info!(
                            source_id = %source,
                            tenant_id = %tenant,
                            subscription_id = %subscription,
                            "Resolved source to tenant and subscription"
                        );
                        (tenant, subscription)
                    }
                    _ => return Err(UploadError::AzureSourceUnresolved(source.clone())),
                }
            }
            _ => return Err(UploadError::AzureTarget),
        };

        Ok((
            cmp::UploadOptions::Azure(cmp::AzureUploadOptions {
                tenant_id,
                subscription_id,
                resource_group: options.resource_group.clone(),
                image_name: options.image_name.clone(),
                hyper_v_generation: options.hyper_v_generation.clone(),
            }),
            cmp::ImageType::Azure,
        ))
    }

    async fn upload_info(
        &self,
        source: &str,
    ) -> Result<crate::clients::UploadInfo, UploadError> {
        self.provisioning
            .upload_info(self.identity, source)
            .await
            .map_err(|e| {
                error!(source_id = %source, error = %e, "Source lookup failed");
                match e {
                    ClientError::Decode(_) => UploadError::SourceDecode(source.to_string()),
                    _ => UploadError::SourceRequest(source.to_string()),
                }
            })
    }
}

fn s3_image_type(image_type: ImageType) -> Result<cmp::ImageType, UploadError> {
    match image_type {
        ImageType::EdgeCommit | ImageType::RhelEdgeCommit => Ok(cmp::ImageType::EdgeCommit),
        ImageType::EdgeInstaller | ImageType::RhelEdgeInstaller => {
            Ok(cmp::ImageType::EdgeInstaller)
        }
        ImageType::GuestImage => Ok(cmp::ImageType::GuestImage),
        ImageType::ImageInstaller => Ok(cmp::ImageType::ImageInstaller),
        ImageType::Vsphere => Ok(cmp::ImageType::Vsphere),
        ImageType::VsphereOva => Ok(cmp::ImageType::VsphereOva),
        ImageType::Wsl => Ok(cmp::ImageType::Wsl),
        _ => Err(UploadError::InvalidImageType),
    }
}
