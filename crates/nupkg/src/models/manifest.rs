//! The package manifest as read from a `.nuspec` document.

use crate::models::{PackageVersion, TargetFramework, VersionRange};

/// A single declared dependency.
#[derive(Debug, Clone)]
pub struct PackageDependency {
    /// The dependency's package id.
    pub id: String,
    /// Accepted version range; `None` means "any version".
    pub range: Option<VersionRange>,
}

/// Dependencies grouped by target framework.
///
/// A group without a framework applies to every target.
#[derive(Debug, Clone, Default)]
pub struct DependencyGroup {
    pub target_framework: Option<TargetFramework>,
    pub dependencies: Vec<PackageDependency>,
}

/// Manifest metadata for one package version.
///
/// Only `id` and `version` are strictly required; everything else defaults
/// to empty, matching how tolerant real-world feeds have to be about
/// hand-written nuspec files.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub id: String,
    pub version: PackageVersion,
    pub authors: String,
    pub description: String,
    pub title: Option<String>,
    pub owners: Option<String>,
    pub summary: Option<String>,
    pub release_notes: Option<String>,
    pub copyright: Option<String>,
    pub tags: Option<String>,
    pub project_url: Option<String>,
    pub license_url: Option<String>,
    pub icon_url: Option<String>,
    pub require_license_acceptance: bool,
    pub development_dependency: bool,
    pub min_client_version: Option<String>,
    pub dependency_groups: Vec<DependencyGroup>,
}

impl Manifest {
    /// Whether any declared dependency range requires a SemVer2-aware client.
    pub fn has_semver2_dependency(&self) -> bool {
        self.dependency_groups
            .iter()
            .flat_map(|group| &group.dependencies)
            .any(|dep| dep.range.as_ref().is_some_and(VersionRange::is_semver2))
    }
}
