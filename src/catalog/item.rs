//! Catalog commit items and package identities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Kind of catalog leaf a commit item points to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeafKind {
    /// The package was published or its metadata changed
    PackageDetails,

    /// The package was deleted
    PackageDelete,

    /// Any other leaf type; ignored by the ingestion pipeline
    #[serde(other)]
    Other,
}

/// A package id together with its normalized version
///
/// Ids compare case-insensitively; the original casing is kept for logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub id: String,
    pub version: String,
}

impl PackageIdentity {
    /// Creates a new identity, normalizing the version string
    pub fn new(id: impl Into<String>, version: &str) -> Self {
        Self {
            id: id.into(),
            version: normalize_version(version),
        }
    }

    /// Lower-cased id used for grouping and storage paths
    pub fn lower_id(&self) -> String {
        self.id.to_lowercase()
    }

    /// Lower-cased normalized version
    pub fn lower_version(&self) -> String {
        self.version.to_lowercase()
    }

    /// Destination path of the package icon, `{id}/{version}/icon`
    pub fn icon_path(&self) -> String {
        format!("{}/{}/icon", self.lower_id(), self.lower_version())
    }

    /// File name of the package archive, `{id}.{version}.nupkg`
    pub fn package_file_name(&self) -> String {
        format!("{}.{}.nupkg", self.lower_id(), self.lower_version())
    }
}

// Case folding must match `lower_id` and `lower_version`
impl PartialEq for PackageIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.lower_id() == other.lower_id() && self.lower_version() == other.lower_version()
    }
}

impl Eq for PackageIdentity {}

impl Hash for PackageIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.lower_id().hash(state);
        self.lower_version().hash(state);
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.version)
    }
}

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitItem {
    pub identity: PackageIdentity,
    pub commit_timestamp: DateTime<Utc>,
    /// Locator of the catalog leaf
    pub uri: String,
    pub kind: LeafKind,
}

/// Leaf data the icon pipeline needs for a package details commit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDetails {
    /// Externally hosted icon
    #[serde(default, rename = "iconUrl")]
    pub icon_url: Option<String>,

    /// Icon embedded in the package archive
    #[serde(default, rename = "iconFile")]
    pub icon_file: Option<String>,
}

/// Normalizes a package version string
///
/// Build metadata is dropped, the numeric core is padded to three parts, a
/// zero fourth part is removed and leading zeros are trimmed. Prerelease
/// labels are kept verbatim.
pub fn normalize_version(version: &str) -> String {
    let version = version.trim();
    let without_metadata = version.split('+').next().unwrap_or(version);
    let (core, prerelease) = match without_metadata.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (without_metadata, None),
    };

    let mut parts: Vec<String> = core
        .split('.')
        .map(|p| match p.parse::<u64>() {
            Ok(n) => n.to_string(),
            Err(_) => p.to_string(),
        })
        .collect();

    while parts.len() < 3 {
        parts.push("0".to_string());
    }
    if parts.len() == 4 && parts[3] == "0" {
        parts.truncate(3);
    }

    let mut normalized = parts.join(".");
    if let Some(pre) = prerelease {
        normalized.push('-');
        normalized.push_str(pre);
    }
    normalized
}
