//! Reading metadata out of package archives.

use crate::error::{ErrorKind, Result};
use crate::hash::HashAlgorithm;
use crate::models::{Manifest, TargetFramework};
use crate::nuspec::parse_nuspec;
use std::io::{Cursor, Read, Seek, SeekFrom};
use tracing::instrument;
use zip::ZipArchive;

/// Maximum number of bytes read from the embedded manifest entry.
///
/// Archives come from untrusted pushers, and a zip entry can declare a tiny
/// compressed size that expands to gigabytes. Manifests are kilobytes; 4MiB
/// is a generous ceiling that still caps decompression bombs.
const MAX_MANIFEST_BYTES: u64 = 4 * 1024 * 1024;

/// Reserved extension marking a symbols (debug) package.
const SYMBOLS_EXT: &str = ".pdb";

/// Folders whose immediate children name a supported target framework.
const FRAMEWORK_FOLDERS: [&str; 3] = ["lib", "ref", "build"];

/// Parsed view of one package archive.
///
/// Opening an archive validates the container and the embedded manifest in
/// one step; a [`PackageArchive`] in hand is always a readable package. The
/// raw bytes are retained so the content can be hashed or written out
/// without a second read.
///
/// # Examples
///
/// ```
/// use packrat_nupkg::{HashAlgorithm, PackageArchive};
/// use packrat_nupkg::testkit::NupkgBuilder;
///
/// let bytes = NupkgBuilder::new("Demo", "1.2.0").framework("net45").build();
/// let archive = PackageArchive::read(&bytes).unwrap();
/// assert_eq!(archive.manifest().id, "Demo");
/// assert!(!archive.is_symbols_package());
/// assert!(!archive.content_hash(HashAlgorithm::default()).is_empty());
/// ```
#[derive(Debug)]
pub struct PackageArchive {
    bytes: Vec<u8>,
    manifest: Manifest,
    nuspec: Vec<u8>,
    frameworks: Vec<TargetFramework>,
    is_symbols: bool,
}

impl PackageArchive {
    /// Read an archive from any seekable reader.
    ///
    /// Buffers the content; package archives are bounded uploads and every
    /// consumer ends up needing the whole byte run (hashing, ingest).
    pub fn from_reader<R: Read + Seek>(mut reader: R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.seek(SeekFrom::Start(0)).map_err(ErrorKind::Io)?;
        reader.read_to_end(&mut bytes).map_err(ErrorKind::Io)?;
        Self::read(&bytes)
    }

    /// Read an archive from raw bytes.
    #[instrument(skip(bytes), fields(size = bytes.len()))]
    pub fn read(bytes: &[u8]) -> Result<Self> {
        let mut zip = ZipArchive::new(Cursor::new(bytes)).map_err(|_| ErrorKind::InvalidArchive)?;

        let names: Vec<String> = zip.file_names().map(str::to_string).collect();
        let is_symbols = names.iter().any(|name| name.to_ascii_lowercase().ends_with(SYMBOLS_EXT));

        // The manifest is the single .nuspec at the archive root.
        let Some(nuspec_name) = names
            .iter()
            .find(|name| !name.contains('/') && name.to_ascii_lowercase().ends_with(".nuspec"))
        else {
            exn::bail!(ErrorKind::MissingManifest);
        };

        let nuspec = {
            let mut entry = zip.by_name(nuspec_name).map_err(|_| ErrorKind::InvalidArchive)?;
            if entry.size() > MAX_MANIFEST_BYTES {
                exn::bail!(ErrorKind::EntryTooLarge(nuspec_name.clone()));
            }
            let mut buf = Vec::with_capacity(entry.size() as usize);
            // Never trust the declared size: stop reading at the cap even if
            // the decompressor keeps producing bytes.
            let mut limited = (&mut entry).take(MAX_MANIFEST_BYTES + 1);
            limited.read_to_end(&mut buf).map_err(ErrorKind::Io)?;
            if buf.len() as u64 > MAX_MANIFEST_BYTES {
                exn::bail!(ErrorKind::EntryTooLarge(nuspec_name.clone()));
            }
            buf
        };
        let manifest = parse_nuspec(&nuspec)?;

        let mut frameworks = Vec::new();
        let mut push = |tfm: TargetFramework| {
            if !frameworks.contains(&tfm) {
                frameworks.push(tfm);
            }
        };
        for name in &names {
            let mut segments = name.split('/');
            let (Some(folder), Some(tfm), Some(_file)) = (segments.next(), segments.next(), segments.next())
            else {
                continue;
            };
            if FRAMEWORK_FOLDERS.contains(&folder.to_ascii_lowercase().as_str())
                && let Ok(tfm) = tfm.parse::<TargetFramework>()
            {
                push(tfm);
            }
        }
        for group in &manifest.dependency_groups {
            if let Some(tfm) = &group.target_framework {
                push(tfm.clone());
            }
        }
        frameworks.sort_by(|a, b| a.original().to_ascii_lowercase().cmp(&b.original().to_ascii_lowercase()));

        Ok(Self {
            bytes: bytes.to_vec(),
            manifest,
            nuspec,
            frameworks,
            is_symbols,
        })
    }

    /// The embedded manifest.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// The raw bytes of the embedded nuspec document.
    pub fn manifest_bytes(&self) -> &[u8] {
        &self.nuspec
    }

    /// The raw bytes of the whole archive.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Digest of the raw archive bytes, base64-encoded.
    pub fn content_hash(&self, algorithm: HashAlgorithm) -> String {
        algorithm.digest(&self.bytes)
    }

    /// Consume the archive, keeping only the manifest.
    pub fn into_manifest(self) -> Manifest {
        self.manifest
    }

    /// Target frameworks this package supports, derived from `lib/`, `ref/`
    /// and `build/` folder names plus dependency-group frameworks.
    pub fn supported_frameworks(&self) -> &[TargetFramework] {
        &self.frameworks
    }

    /// Whether the archive is a symbols package (contains debug symbols).
    pub fn is_symbols_package(&self) -> bool {
        self.is_symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FrameworkName;
    use crate::testkit::NupkgBuilder;

    #[test]
    fn test_read_basic_archive() {
        let bytes = NupkgBuilder::new("Test", "1.11")
            .description("a test package")
            .framework("net45")
            .framework("netstandard2.0")
            .build();
        let archive = PackageArchive::read(&bytes).unwrap();
        assert_eq!(archive.manifest().id, "Test");
        assert_eq!(archive.manifest().version.original(), "1.11");
        assert_eq!(archive.supported_frameworks().len(), 2);
        assert!(!archive.is_symbols_package());
    }

    #[test]
    fn test_dependency_group_frameworks_are_included() {
        let bytes = NupkgBuilder::new("Test", "1.0")
            .dependency(Some(".NETCoreApp3.1"), "Other", Some("[1.0,)"))
            .build();
        let archive = PackageArchive::read(&bytes).unwrap();
        assert!(
            archive
                .supported_frameworks()
                .iter()
                .any(|tfm| *tfm.name() == FrameworkName::NetCoreApp)
        );
    }

    #[test]
    fn test_content_hash_covers_the_raw_bytes() {
        let bytes = NupkgBuilder::new("Test", "1.0").build();
        let archive = PackageArchive::read(&bytes).unwrap();
        assert_eq!(archive.as_bytes(), bytes);
        assert_eq!(archive.content_hash(HashAlgorithm::Sha512), HashAlgorithm::Sha512.digest(&bytes));
        assert_ne!(
            archive.content_hash(HashAlgorithm::Sha256),
            archive.content_hash(HashAlgorithm::Sha512)
        );
    }

    #[test]
    fn test_symbols_detection() {
        let bytes = NupkgBuilder::new("Test", "1.0").with_symbols().build();
        let archive = PackageArchive::read(&bytes).unwrap();
        assert!(archive.is_symbols_package());
    }

    #[test]
    fn test_not_a_zip() {
        let err = PackageArchive::read(b"definitely not a zip").unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::InvalidArchive));
    }

    #[test]
    fn test_missing_manifest() {
        let bytes = NupkgBuilder::new("Test", "1.0").without_nuspec().build();
        let err = PackageArchive::read(&bytes).unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::MissingManifest));
    }

    #[test]
    fn test_nested_nuspec_is_not_a_manifest() {
        // A nuspec below the root (e.g. inside content/) doesn't count.
        let bytes = NupkgBuilder::new("Test", "1.0")
            .without_nuspec()
            .extra_entry("content/other.nuspec", b"<package/>")
            .build();
        let err = PackageArchive::read(&bytes).unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::MissingManifest));
    }
}
