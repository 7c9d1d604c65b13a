//! Archive support shared by the blob stores
//!
//! Recognition is by MIME type guessed from the file name; only zip archives
//! have a packer. Entries are read fully into memory before any of them is
//! written, so a corrupt archive fails before touching the destination.

use std::collections::BTreeMap;
use std::io::{Read, Seek};

use serde::{Deserialize, Serialize};
use zip::ZipArchive;

use crate::error::StoreError;

/// MIME types that have a packer
const ARCHIVE_MIME_TYPES: &[&str] = &["application/zip", "application/x-zip-compressed"];

/// Outcome of extracting one archive entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractStatus {
    /// Entry was written
    Extracted,
    /// A file already exists at the entry's path; nothing was written
    WouldOverwrite,
    /// The entry name escapes the destination (absolute or `..`)
    Unsafe,
}

/// Per-entry results keyed by the entry name as stored in the archive
pub type ExtractReport = BTreeMap<String, ExtractStatus>;

/// One decoded archive entry
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Entry name as stored in the archive
    pub raw_name: String,
    /// Sanitized path segments relative to the destination (None if unsafe)
    pub segments: Option<Vec<String>>,
    pub is_directory: bool,
    pub data: Vec<u8>,
}

/// Guess the MIME type of a file from its name
pub fn mime_type(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Whether a file with this name has an archive packer
pub fn is_archive_name(name: &str) -> bool {
    let mime = mime_type(name);
    ARCHIVE_MIME_TYPES.contains(&mime.as_str())
}

/// Read every entry of a zip archive
pub fn read_entries<R: Read + Seek>(reader: R) -> Result<Vec<ArchiveEntry>, StoreError> {
    let mut archive = ZipArchive::new(reader)?;
    let mut entries = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        let raw_name = file.name().to_string();

        let segments = file.enclosed_name().map(|p| {
            p.components()
                .filter_map(|c| match c {
                    std::path::Component::Normal(s) => Some(s.to_string_lossy().to_string()),
                    _ => None,
                })
                .collect::<Vec<_>>()
        });
        // An entry that normalizes to nothing ("./") has no location
        let segments = segments.filter(|s| !s.is_empty());

        let is_directory = file.is_dir();
        let mut data = Vec::new();
        if !is_directory {
            file.read_to_end(&mut data)
                .map_err(|e| StoreError::Zip(zip::result::ZipError::Io(e)))?;
        }

        entries.push(ArchiveEntry {
            raw_name,
            segments,
            is_directory,
            data,
        });
    }

    Ok(entries)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    /// Build a zip in memory. Names ending in `/` become directory entries.
    pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, data) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }
}
