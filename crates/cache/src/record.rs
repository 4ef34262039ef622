//! The persisted per-package record.

use packrat_nupkg::models::{PackageVersion, VersionRange};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::OffsetDateTime;

/// The only cache document schema this build can read.
pub const SCHEMA_VERSION: &str = "3.0.0";

/// One declared dependency, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DependencyRecord {
    pub id: String,
    #[serde(default)]
    pub range: Option<VersionRange>,
}

/// Dependencies for one target framework, as persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DependencySet {
    #[serde(default)]
    pub target_framework: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<DependencyRecord>,
}

/// Everything the feed knows about one package version.
///
/// `Id` and `Version` are required when deserializing; a cache document
/// missing either is invalid and gets discarded. All other fields default,
/// so unknown or absent optional fields never invalidate a cache file
/// written by a different build.
///
/// The four latest flags are persisted for fast restarts but are **not**
/// authoritative — the engine recomputes them under its writer lock on
/// every mutation and rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PackageRecord {
    pub id: String,
    pub version: PackageVersion,
    #[serde(rename = "IsSemVer2", default)]
    pub is_semver2: bool,

    #[serde(default)]
    pub full_path: PathBuf,
    #[serde(default)]
    pub package_size: u64,
    #[serde(default)]
    pub package_hash: String,
    #[serde(default)]
    pub hash_algorithm: String,

    #[serde(default = "default_listed")]
    pub listed: bool,
    #[serde(with = "time::serde::rfc3339", default = "OffsetDateTime::now_utc")]
    pub created_utc: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339", default = "OffsetDateTime::now_utc")]
    pub last_updated_utc: OffsetDateTime,

    #[serde(default)]
    pub supported_target_frameworks: Vec<String>,
    #[serde(default)]
    pub dependency_sets: Vec<DependencySet>,
    #[serde(default)]
    pub min_client_version: Option<String>,

    #[serde(default)]
    pub authors: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub release_notes: Option<String>,
    #[serde(default)]
    pub copyright: Option<String>,
    #[serde(default)]
    pub project_url: Option<String>,
    #[serde(default)]
    pub license_url: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub require_license_acceptance: bool,
    #[serde(default)]
    pub development_dependency: bool,

    #[serde(rename = "SemVer1IsLatest", default)]
    pub semver1_is_latest: bool,
    #[serde(rename = "SemVer1IsAbsoluteLatest", default)]
    pub semver1_is_absolute_latest: bool,
    #[serde(rename = "SemVer2IsLatest", default)]
    pub semver2_is_latest: bool,
    #[serde(rename = "SemVer2IsAbsoluteLatest", default)]
    pub semver2_is_absolute_latest: bool,
}

fn default_listed() -> bool {
    true
}

impl PackageRecord {
    /// A minimal listed record; callers fill in the derived fields.
    pub fn new(id: impl Into<String>, version: PackageVersion) -> Self {
        let now = OffsetDateTime::now_utc();
        let is_semver2 = version.is_semver2();
        Self {
            id: id.into(),
            version,
            is_semver2,
            full_path: PathBuf::new(),
            package_size: 0,
            package_hash: String::new(),
            hash_algorithm: String::new(),
            listed: true,
            created_utc: now,
            last_updated_utc: now,
            supported_target_frameworks: Vec::new(),
            dependency_sets: Vec::new(),
            min_client_version: None,
            authors: String::new(),
            description: String::new(),
            title: None,
            tags: None,
            summary: None,
            release_notes: None,
            copyright: None,
            project_url: None,
            license_url: None,
            icon_url: None,
            require_license_acceptance: false,
            development_dependency: false,
            semver1_is_latest: false,
            semver1_is_absolute_latest: false,
            semver2_is_latest: false,
            semver2_is_absolute_latest: false,
        }
    }

    /// Case-folded id, the cache's index key.
    pub fn key_id(&self) -> String {
        self.id.to_lowercase()
    }

    /// Identity check: case-insensitive id, build-metadata-agnostic version.
    pub fn matches(&self, id: &str, version: &PackageVersion) -> bool {
        self.id.eq_ignore_ascii_case(id) && self.version == *version
    }

    /// Clear all four latest flags.
    pub fn clear_latest_flags(&mut self) {
        self.semver1_is_latest = false;
        self.semver1_is_absolute_latest = false;
        self.semver2_is_latest = false;
        self.semver2_is_absolute_latest = false;
    }
}
