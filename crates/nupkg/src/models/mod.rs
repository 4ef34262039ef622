mod framework;
mod manifest;
mod range;
mod version;

pub use self::framework::{FrameworkName, TargetFramework, compatible};
pub use self::manifest::{DependencyGroup, Manifest, PackageDependency};
pub use self::range::VersionRange;
pub use self::version::PackageVersion;
