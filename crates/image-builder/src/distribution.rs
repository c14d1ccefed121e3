//! Static distribution registry loaded from `<dir>/<name>/<name>.json`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::models::ImageType;

#[derive(Debug, Clone, Deserialize)]
pub struct DistributionFile {
    #[serde(default)]
    pub module_platform_id: Option<String>,
    pub distribution: DistributionInfo,
    #[serde(default)]
    pub x86_64: Option<Architecture>,
    #[serde(default)]
    pub aarch64: Option<Architecture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DistributionInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Name the build service knows this distribution by, if different
    #[serde(default)]
    pub composer_name: Option<String>,
    #[serde(default, alias = "restrictedAccess")]
    pub restricted_access: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Architecture {
    pub image_types: Vec<String>,
    pub repositories: Vec<DistributionRepository>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DistributionRepository {
    pub id: String,
    #[serde(default)]
    pub baseurl: Option<String>,
    #[serde(default)]
    pub metalink: Option<String>,
    /// Gated by subscription-manager entitlements
    #[serde(default)]
    pub rhsm: bool,
    #[serde(default)]
    pub gpgkey: Option<String>,
    #[serde(default)]
    pub check_gpg: Option<bool>,
    /// Empty means the repository applies to every image type
    #[serde(default)]
    pub image_type_tags: Vec<String>,
}

impl DistributionRepository {
    pub fn applies_to(&self, image_type: ImageType) -> bool {
        self.image_type_tags.is_empty() || self.is_tagged_for(image_type)
    }

    pub fn is_tagged_for(&self, image_type: ImageType) -> bool {
        self.image_type_tags.iter().any(|t| t == image_type.as_str())
    }
}

impl DistributionFile {
    pub fn name(&self) -> &str {
        &self.distribution.name
    }

    /// Distribution name sent to the build service.
    pub fn composer_name(&self) -> &str {
        self.distribution
            .composer_name
            .as_deref()
            .unwrap_or(&self.distribution.name)
    }

    pub fn architecture(&self, arch: &str) -> Option<&Architecture> {
        match arch {
            "x86_64" => self.x86_64.as_ref(),
            "aarch64" => self.aarch64.as_ref(),
            _ => None,
        }
    }

    pub fn architectures(&self) -> Vec<(&'static str, &Architecture)> {
        [("x86_64", self.x86_64.as_ref()), ("aarch64", self.aarch64.as_ref())]
            .into_iter()
            .filter_map(|(name, arch)| arch.map(|a| (name, a)))
            .collect()
    }

    /// Any repository needs an RHSM entitlement.
    pub fn needs_entitlement(&self) -> bool {
        self.architectures()
            .iter()
            .any(|(_, a)| a.repositories.iter().any(|r| r.rhsm))
    }

    /// RHEL major and minor release, parsed from the build service name
    /// (`rhel-9.4`, `rhel-810`).
    pub fn rhel_major_minor(&self) -> Result<(u32, u32), String> {
        let name = self.composer_name();
        let version = name
            .strip_prefix("rhel-")
            .ok_or_else(|| format!("{} is not a RHEL distribution", name))?;

        let parsed: Option<(u32, u32)> = match version.split_once('.') {
            Some((major, minor)) => major.parse().ok().zip(minor.parse().ok()),
            None if version.len() >= 2 => {
                let (major, minor) = version.split_at(1);
                major.parse().ok().zip(minor.parse().ok())
            }
            None => None,
        };

        parsed.ok_or_else(|| format!("Unable to parse RHEL version from {}", name))
    }
}

/// All distributions known to the service.
#[derive(Debug, Clone, Default)]
pub struct DistributionRegistry {
    distributions: BTreeMap<String, DistributionFile>,
}

impl DistributionRegistry {
    /// Read every `<dir>/<name>/<name>.json`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read distributions directory {}", dir.display()))?;

        let mut distributions = BTreeMap::new();
        for entry in entries {
            let entry = entry.context("Failed to read distributions directory entry")?;
            if !entry.path().is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path().join(format!("{}.json", name));
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let file: DistributionFile = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse {}", path.display()))?;

            debug!(distribution = %name, "Loaded distribution");
            distributions.insert(name, file);
        }

        info!(count = distributions.len(), "Distribution registry loaded");
        Ok(Self { distributions })
    }

    pub fn from_files(files: impl IntoIterator<Item = (String, DistributionFile)>) -> Self {
        Self {
            distributions: files.into_iter().collect(),
        }
    }

    /// Distributions visible to a caller. Entitlement-gated ones require
    /// `entitled`; restricted ones are never listed.
    pub fn available(&self, entitled: bool) -> Vec<(&str, &DistributionFile)> {
        self.distributions
            .iter()
            .filter(|(_, d)| !d.distribution.restricted_access)
            .filter(|(_, d)| entitled || !d.needs_entitlement())
            .map(|(name, d)| (name.as_str(), d))
            .collect()
    }

    pub fn get(&self, name: &str, entitled: bool) -> Option<&DistributionFile> {
        self.distributions
            .get(name)
            .filter(|d| !d.distribution.restricted_access)
            .filter(|d| entitled || !d.needs_entitlement())
    }
}
