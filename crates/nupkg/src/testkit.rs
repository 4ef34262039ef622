//! Fabricating package archives for tests.
//!
//! Not gated behind `#[cfg(test)]` so downstream crates can build fixture
//! archives in their own tests.

use std::io::{Cursor, Write};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Builds an in-memory `.nupkg` archive.
///
/// # Examples
///
/// ```
/// use packrat_nupkg::PackageArchive;
/// use packrat_nupkg::testkit::NupkgBuilder;
///
/// let bytes = NupkgBuilder::new("Demo", "1.2.0")
///     .framework("net45")
///     .dependency(Some("netstandard2.0"), "Other", Some("[1.0,)"))
///     .build();
/// let archive = PackageArchive::read(&bytes).unwrap();
/// assert_eq!(archive.manifest().id, "Demo");
/// ```
pub struct NupkgBuilder {
    id: String,
    version: String,
    description: String,
    authors: String,
    tags: Option<String>,
    frameworks: Vec<String>,
    // (target framework, dependency id, version range)
    dependencies: Vec<(Option<String>, String, Option<String>)>,
    extra_entries: Vec<(String, Vec<u8>)>,
    include_nuspec: bool,
    include_symbols: bool,
}

impl NupkgBuilder {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            description: "test package".to_string(),
            authors: "tests".to_string(),
            tags: None,
            frameworks: Vec::new(),
            dependencies: Vec::new(),
            extra_entries: Vec::new(),
            include_nuspec: true,
            include_symbols: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn authors(mut self, authors: impl Into<String>) -> Self {
        self.authors = authors.into();
        self
    }

    pub fn tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }

    /// Add a `lib/<tfm>/` assembly stub, marking the framework as supported.
    pub fn framework(mut self, tfm: impl Into<String>) -> Self {
        self.frameworks.push(tfm.into());
        self
    }

    pub fn dependency(
        mut self,
        tfm: Option<impl Into<String>>,
        id: impl Into<String>,
        range: Option<impl Into<String>>,
    ) -> Self {
        self.dependencies.push((tfm.map(Into::into), id.into(), range.map(Into::into)));
        self
    }

    /// Include a `.pdb` entry, turning the archive into a symbols package.
    pub fn with_symbols(mut self) -> Self {
        self.include_symbols = true;
        self
    }

    /// Skip the manifest entry (for invalid-archive tests).
    pub fn without_nuspec(mut self) -> Self {
        self.include_nuspec = false;
        self
    }

    pub fn extra_entry(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.extra_entries.push((name.into(), data.into()));
        self
    }

    /// Render the nuspec document this builder would embed.
    pub fn nuspec(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\"?>\n<package>\n  <metadata>\n");
        let field = |name: &str, value: &str| format!("    <{name}>{}</{name}>\n", escape(value));
        xml.push_str(&field("id", &self.id));
        xml.push_str(&field("version", &self.version));
        xml.push_str(&field("authors", &self.authors));
        xml.push_str(&field("description", &self.description));
        if let Some(tags) = &self.tags {
            xml.push_str(&field("tags", tags));
        }
        if !self.dependencies.is_empty() {
            xml.push_str("    <dependencies>\n");
            for (tfm, id, range) in &self.dependencies {
                let open = match tfm {
                    Some(tfm) => format!("      <group targetFramework=\"{}\">\n", escape(tfm)),
                    None => "      <group>\n".to_string(),
                };
                xml.push_str(&open);
                match range {
                    Some(range) => xml.push_str(&format!(
                        "        <dependency id=\"{}\" version=\"{}\" />\n",
                        escape(id),
                        escape(range)
                    )),
                    None => xml.push_str(&format!("        <dependency id=\"{}\" />\n", escape(id))),
                }
                xml.push_str("      </group>\n");
            }
            xml.push_str("    </dependencies>\n");
        }
        xml.push_str("  </metadata>\n</package>\n");
        xml
    }

    /// Assemble the zip archive.
    pub fn build(&self) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut cursor);
            if self.include_nuspec {
                zip.start_file(format!("{}.nuspec", self.id), SimpleFileOptions::default()).unwrap();
                zip.write_all(self.nuspec().as_bytes()).unwrap();
            }
            for tfm in &self.frameworks {
                zip.start_file(format!("lib/{tfm}/{}.dll", self.id), SimpleFileOptions::default()).unwrap();
                zip.write_all(b"\x4D\x5A fake assembly").unwrap();
            }
            if self.include_symbols {
                zip.start_file(format!("lib/net45/{}.pdb", self.id), SimpleFileOptions::default()).unwrap();
                zip.write_all(b"fake symbols").unwrap();
            }
            for (name, data) in &self.extra_entries {
                zip.start_file(name.clone(), SimpleFileOptions::default()).unwrap();
                zip.write_all(data).unwrap();
            }
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_readable_archive() {
        let bytes = NupkgBuilder::new("A", "1.0").build();
        assert!(crate::PackageArchive::read(&bytes).is_ok());
    }

    #[test]
    fn test_escapes_xml_metadata() {
        let bytes = NupkgBuilder::new("A", "1.0").description("a < b & c").build();
        let archive = crate::PackageArchive::read(&bytes).unwrap();
        assert_eq!(archive.manifest().description, "a < b & c");
    }
}
