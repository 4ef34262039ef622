//! Parsing `.nuspec` manifest documents.
//!
//! A nuspec is a small XML document: a `<metadata>` element of simple text
//! fields plus an optional `<dependencies>` element containing either flat
//! `<dependency>` entries or per-framework `<group>`s. Unknown elements are
//! ignored so schema additions don't break older feeds.

use crate::error::{ErrorKind, Result};
use crate::models::{DependencyGroup, Manifest, PackageDependency, TargetFramework};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;

/// Parse a nuspec document into a [`Manifest`].
///
/// # Errors
///
/// Returns [`ManifestXml`](ErrorKind::ManifestXml) for malformed XML,
/// [`MissingField`](ErrorKind::MissingField) when `id` or `version` is
/// absent, and [`InvalidVersion`](ErrorKind::InvalidVersion) /
/// [`InvalidRange`](ErrorKind::InvalidRange) when they don't parse.
pub fn parse_nuspec(xml: &[u8]) -> Result<Manifest> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut fields: HashMap<String, String> = HashMap::new();
    let mut current_field: Option<String> = None;
    let mut min_client_version: Option<String> = None;

    let mut in_metadata = false;
    let mut in_dependencies = false;
    let mut current_group: Option<DependencyGroup> = None;
    // Flat <dependency> entries outside any <group> apply to every framework.
    let mut flat_group = DependencyGroup::default();
    let mut groups: Vec<DependencyGroup> = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ErrorKind::ManifestXml(e.to_string()))?;
        match event {
            Event::Start(e) | Event::Empty(e) => {
                let name = local_name(&e);
                match name.as_str() {
                    "metadata" => {
                        in_metadata = true;
                        min_client_version = attribute(&e, "minClientVersion")?;
                    },
                    "dependencies" if in_metadata => in_dependencies = true,
                    "group" if in_dependencies => {
                        let target_framework = attribute(&e, "targetFramework")?
                            .and_then(|tfm| tfm.parse::<TargetFramework>().ok());
                        current_group = Some(DependencyGroup { target_framework, dependencies: Vec::new() });
                    },
                    "dependency" if in_dependencies => {
                        let id = attribute(&e, "id")?.unwrap_or_default();
                        if id.is_empty() {
                            exn::bail!(ErrorKind::MissingField("dependency id"));
                        }
                        let range = match attribute(&e, "version")? {
                            Some(raw) if !raw.trim().is_empty() => Some(raw.parse()?),
                            _ => None,
                        };
                        let dependency = PackageDependency { id, range };
                        match current_group.as_mut() {
                            Some(group) => group.dependencies.push(dependency),
                            None => flat_group.dependencies.push(dependency),
                        }
                    },
                    _ if in_metadata && !in_dependencies => current_field = Some(name),
                    _ => {},
                }
            },
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match name.as_str() {
                    "metadata" => in_metadata = false,
                    "dependencies" => in_dependencies = false,
                    "group" => {
                        if let Some(group) = current_group.take() {
                            groups.push(group);
                        }
                    },
                    _ => current_field = None,
                }
            },
            Event::Text(t) => {
                if let Some(field) = &current_field {
                    let text = t.unescape().map_err(|e| ErrorKind::ManifestXml(e.to_string()))?;
                    let text = text.trim();
                    if !text.is_empty() {
                        fields.entry(field.clone()).or_default().push_str(text);
                    }
                }
            },
            Event::CData(t) => {
                if let Some(field) = &current_field {
                    let text = String::from_utf8_lossy(&t.into_inner()).to_string();
                    fields.entry(field.clone()).or_default().push_str(text.trim());
                }
            },
            Event::Eof => break,
            _ => {},
        }
        buf.clear();
    }

    if !flat_group.dependencies.is_empty() {
        groups.insert(0, flat_group);
    }

    let id = fields.remove("id").filter(|id| !id.is_empty());
    let Some(id) = id else {
        exn::bail!(ErrorKind::MissingField("id"));
    };
    let Some(version) = fields.remove("version") else {
        exn::bail!(ErrorKind::MissingField("version"));
    };
    let version = version.parse()?;

    Ok(Manifest {
        id,
        version,
        authors: fields.remove("authors").unwrap_or_default(),
        description: fields.remove("description").unwrap_or_default(),
        title: fields.remove("title"),
        owners: fields.remove("owners"),
        summary: fields.remove("summary"),
        release_notes: fields.remove("releaseNotes"),
        copyright: fields.remove("copyright"),
        tags: fields.remove("tags"),
        project_url: fields.remove("projectUrl"),
        license_url: fields.remove("licenseUrl"),
        icon_url: fields.remove("iconUrl"),
        require_license_acceptance: bool_field(&fields, "requireLicenseAcceptance"),
        development_dependency: bool_field(&fields, "developmentDependency"),
        min_client_version,
        dependency_groups: groups,
    })
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    let attr = e
        .try_get_attribute(name)
        .map_err(|err| ErrorKind::ManifestXml(err.to_string()))?;
    attr.map(|attr| {
        attr.unescape_value()
            .map(|value| value.to_string())
            .map_err(|err| ErrorKind::ManifestXml(err.to_string()).into())
    })
    .transpose()
}

fn bool_field(fields: &HashMap<String, String>, name: &str) -> bool {
    fields.get(name).is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
}
