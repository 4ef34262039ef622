//! Pure query functions over catalog snapshots.
//!
//! Nothing here touches storage or locks; every function takes records (or
//! a mutable slice of one id's records) and applies the feed's filtering
//! and marking rules. The engine composes these under its own
//! snapshot/locking discipline.

use packrat_cache::PackageRecord;
use packrat_nupkg::models::{self, PackageVersion, TargetFramework, VersionRange};

/// How tolerant the calling client is of SemVer2 versions.
///
/// Legacy clients choke on multi-identifier prereleases and build metadata,
/// so by default those packages are invisible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientCompatibility {
    /// SemVer2 packages are filtered out.
    #[default]
    Default,
    /// Everything is visible.
    Max,
}

impl ClientCompatibility {
    pub fn allows_semver2(&self) -> bool {
        matches!(self, Self::Max)
    }

    /// The single SemVer2 predicate: is this record visible to the client?
    pub fn allows(&self, record: &PackageRecord) -> bool {
        self.allows_semver2() || !record.is_semver2
    }
}

/// One (id, version, optional constraint) triple for an updates query.
#[derive(Debug, Clone)]
pub struct UpdateCandidate {
    pub id: String,
    pub version: PackageVersion,
    /// Optional range the update must satisfy.
    pub constraint: Option<VersionRange>,
}

impl UpdateCandidate {
    pub fn new(id: impl Into<String>, version: PackageVersion) -> Self {
        Self { id: id.into(), version, constraint: None }
    }

    pub fn with_constraint(mut self, constraint: VersionRange) -> Self {
        self.constraint = Some(constraint);
        self
    }
}

/// Tokenized search match against id, tags, description and authors.
///
/// The term is split on whitespace; every token must appear (as a
/// case-insensitive substring) in at least one of the four fields. An empty
/// term matches everything.
pub fn matches_search_term(record: &PackageRecord, term: &str) -> bool {
    let haystacks = [
        record.id.to_lowercase(),
        record.tags.clone().unwrap_or_default().to_lowercase(),
        record.description.to_lowercase(),
        record.authors.to_lowercase(),
    ];
    term.split_whitespace()
        .map(str::to_lowercase)
        .all(|token| haystacks.iter().any(|haystack| haystack.contains(&token)))
}

/// Whether the record supports at least one of the requested frameworks.
///
/// A record that declares no frameworks is treated as universal (content
/// packages, tools). Unparseable framework strings on either side are
/// skipped.
pub fn supports_any_framework(record: &PackageRecord, requested: &[TargetFramework]) -> bool {
    if requested.is_empty() || record.supported_target_frameworks.is_empty() {
        return true;
    }
    let supported: Vec<TargetFramework> = record
        .supported_target_frameworks
        .iter()
        .filter_map(|tfm| tfm.parse().ok())
        .collect();
    if supported.is_empty() {
        return true;
    }
    requested
        .iter()
        .any(|project| supported.iter().any(|package| models::compatible(project, package)))
}

/// Recompute the four latest flags for one id's records.
///
/// Only listed records are candidates. The SemVer1 flags consider the
/// non-SemVer2 subset; the SemVer2 flags consider everything. The
/// `IsLatest` pair additionally requires a stable (non-prerelease) version.
/// When no candidate qualifies, no record carries the flag.
pub fn assign_latest_flags(records: &mut [PackageRecord]) {
    for record in records.iter_mut() {
        record.clear_latest_flags();
    }

    let best = |records: &[PackageRecord], eligible: &dyn Fn(&PackageRecord) -> bool| -> Option<usize> {
        records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.listed && eligible(r))
            .max_by(|(_, a), (_, b)| a.version.cmp(&b.version))
            .map(|(i, _)| i)
    };

    if let Some(i) = best(records, &|r| !r.is_semver2) {
        records[i].semver1_is_absolute_latest = true;
    }
    if let Some(i) = best(records, &|r| !r.is_semver2 && !r.version.is_prerelease()) {
        records[i].semver1_is_latest = true;
    }
    if let Some(i) = best(records, &|_| true) {
        records[i].semver2_is_absolute_latest = true;
    }
    if let Some(i) = best(records, &|r| !r.version.is_prerelease()) {
        records[i].semver2_is_latest = true;
    }
}

/// Updates for one candidate: strictly newer, listed, compatible records,
/// filtered by prerelease policy, optional constraint, and requested
/// frameworks.
pub fn filter_updates<'a>(
    records: &'a [PackageRecord],
    candidate: &UpdateCandidate,
    include_prerelease: bool,
    target_frameworks: &[TargetFramework],
    compatibility: ClientCompatibility,
) -> Vec<&'a PackageRecord> {
    records
        .iter()
        .filter(|r| r.id.eq_ignore_ascii_case(&candidate.id))
        .filter(|r| r.listed)
        .filter(|r| compatibility.allows(r))
        .filter(|r| r.version > candidate.version)
        .filter(|r| include_prerelease || !r.version.is_prerelease())
        .filter(|r| candidate.constraint.as_ref().is_none_or(|c| c.satisfies(&r.version)))
        .filter(|r| supports_any_framework(r, target_frameworks))
        .collect()
}
