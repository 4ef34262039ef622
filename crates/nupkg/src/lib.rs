//! Reading package archives.
//!
//! A package archive is a zip container carrying compiled assemblies plus a
//! single top-level `.nuspec` manifest. This crate owns the shared data
//! model (versions, version ranges, target frameworks, manifests) and the
//! [`PackageArchive`] reader that surfaces manifest metadata, the supported
//! framework set, symbols detection and a content hash. It never touches
//! storage; callers hand it bytes or any `Read + Seek`.

pub mod error;
mod hash;
pub mod models;
mod nuspec;
mod reader;
pub mod testkit;

pub use crate::hash::HashAlgorithm;
pub use crate::nuspec::parse_nuspec;
pub use crate::reader::PackageArchive;
