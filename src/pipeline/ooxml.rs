//! Office Open XML packaging shared by the spreadsheet and document writers.
//!
//! Both `.xlsx` and `.docx` are zip containers holding a content-type
//! manifest, a package relationship part and the XML parts themselves.
//! This module owns the zip plumbing, XML text escaping and the structural
//! check used after conversion.

use chrono::{SecondsFormat, Utc};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Seek, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub const PACKAGE_RELS_PART: &str = "_rels/.rels";
pub const CORE_PROPS_PART: &str = "docProps/core.xml";

pub const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

const REL_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
const REL_CORE_PROPS: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties";

/// Zip writer producing one OOXML package.
pub struct PackageWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
    options: SimpleFileOptions,
}

impl PackageWriter<File> {
    /// Create (or truncate) the package file at `path`.
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write + Seek> PackageWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            zip: ZipWriter::new(inner),
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
        }
    }

    /// Add one part. `name` is the part path inside the package.
    pub fn add_part(&mut self, name: &str, xml: &str) -> io::Result<()> {
        self.zip.start_file(name, self.options).map_err(io::Error::other)?;
        self.zip.write_all(xml.as_bytes())
    }

    /// Add the package relationships and core properties parts, pointing
    /// the office-document relationship at `main_part`.
    pub fn add_package_parts(&mut self, main_part: &str, title: &str) -> io::Result<()> {
        let rels = format!(
            r#"{XML_DECL}
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="{REL_OFFICE_DOCUMENT}" Target="{main_part}"/><Relationship Id="rId2" Type="{REL_CORE_PROPS}" Target="{CORE_PROPS_PART}"/></Relationships>"#
        );
        self.add_part(PACKAGE_RELS_PART, &rels)?;
        self.add_part(CORE_PROPS_PART, &core_properties(title))
    }

    /// Write the central directory and return the inner writer.
    pub fn finish(self) -> io::Result<W> {
        self.zip.finish().map_err(io::Error::other)
    }
}

/// `docProps/core.xml` with creation and modification set to now.
fn core_properties(title: &str) -> String {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    format!(
        r#"{XML_DECL}
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"><dc:title>{}</dc:title><dc:creator>pdfconv</dc:creator><dcterms:created xsi:type="dcterms:W3CDTF">{now}</dcterms:created><dcterms:modified xsi:type="dcterms:W3CDTF">{now}</dcterms:modified></cp:coreProperties>"#,
        escape_text(title)
    )
}

/// Escape text for XML content or attribute values, dropping characters
/// XML 1.0 cannot represent (stray control bytes are common in PDF text).
pub fn escape_text(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .filter(|&c| matches!(c, '\t' | '\n' | '\r') || c >= ' ')
        .filter(|&c| c != '\u{FFFE}' && c != '\u{FFFF}')
        .collect();
    quick_xml::escape::escape(cleaned.as_str()).into_owned()
}

/// Names of `required` parts missing from the package at `path`.
///
/// Errors if the file is not a readable zip archive.
pub fn missing_parts(path: &Path, required: &[&str]) -> Result<Vec<String>, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let archive = ZipArchive::new(file).map_err(|e| e.to_string())?;
    let present: HashSet<&str> = archive.file_names().collect();
    Ok(required
        .iter()
        .filter(|name| !present.contains(**name))
        .map(|name| name.to_string())
        .collect())
}
