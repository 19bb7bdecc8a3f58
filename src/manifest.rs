//! Manifest of `key source_path` pairs driving a load.

use std::path::{Path, PathBuf};

use crate::error::{LoadError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub key: String,
    pub source_path: PathBuf,
    /// 1-based line number in the manifest file.
    pub line: usize,
}

/// Ordered, fully validated manifest. Construction fails before any store I/O
/// if a single line is malformed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = fs_err::read(path)?;
        let mut entries = Vec::new();
        for (index, raw) in bytes.split(|byte| *byte == b'\n').enumerate() {
            let line = index + 1;
            let text = std::str::from_utf8(raw).map_err(|_| LoadError::MalformedManifest {
                line,
                content: String::from_utf8_lossy(raw).into_owned(),
            })?;
            if let Some(entry) = parse_line(text, line)? {
                entries.push(entry);
            }
        }
        tracing::debug!(
            manifest.path = %path.display(),
            manifest.entries = entries.len(),
            "manifest parsed"
        );
        Ok(Self { entries })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (index, raw) in text.lines().enumerate() {
            if let Some(entry) = parse_line(raw, index + 1)? {
                entries.push(entry);
            }
        }
        Ok(Self { entries })
    }

    #[must_use]
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ManifestEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the sizes of every source file that currently exists.
    /// Missing or unreadable sources are left out of the estimate only.
    #[must_use]
    pub fn existing_payload_bytes(&self) -> u64 {
        self.entries
            .iter()
            .filter_map(|entry| fs_err::metadata(&entry.source_path).ok())
            .filter(std::fs::Metadata::is_file)
            .fold(0u64, |total, meta| total.saturating_add(meta.len()))
    }

    /// Reject manifests that would overwrite the loader's sentinel key.
    pub fn ensure_key_not_reserved(&self, reserved: &str) -> Result<()> {
        match self.entries.iter().find(|entry| entry.key == reserved) {
            Some(entry) => Err(LoadError::ReservedKey {
                line: entry.line,
                key: entry.key.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a ManifestEntry;
    type IntoIter = std::slice::Iter<'a, ManifestEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn parse_line(raw: &str, line: usize) -> Result<Option<ManifestEntry>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let mut fields = trimmed.split_whitespace();
    match (fields.next(), fields.next(), fields.next()) {
        (Some(key), Some(path), None) => Ok(Some(ManifestEntry {
            key: key.to_string(),
            source_path: PathBuf::from(path),
            line,
        })),
        _ => Err(LoadError::MalformedManifest {
            line,
            content: trimmed.to_string(),
        }),
    }
}
