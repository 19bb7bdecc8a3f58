//! Shared fixtures for loader integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A source file written for a test, with the bytes the store should end up holding.
pub struct Source {
    pub key: String,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// Deterministic pseudo-random payload so failures are reproducible.
pub fn payload(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = fastrand::Rng::with_seed(seed);
    (0..len).map(|_| rng.u8(..)).collect()
}

/// Write one `.wav` file per key under `dir/audio`.
pub fn write_sources(dir: &Path, specs: &[(&str, usize)]) -> Vec<Source> {
    let audio = dir.join("audio");
    std::fs::create_dir_all(&audio).unwrap();
    specs
        .iter()
        .enumerate()
        .map(|(index, (key, len))| {
            let bytes = payload(index as u64 + 1, *len);
            let path = audio.join(format!("{key}.wav"));
            std::fs::write(&path, &bytes).unwrap();
            Source {
                key: (*key).to_string(),
                path,
                bytes,
            }
        })
        .collect()
}

/// `count` sources named `spk{n}-utt{i}` of `len` bytes each.
pub fn uniform_sources(dir: &Path, count: usize, len: usize) -> Vec<Source> {
    let keys: Vec<String> = (0..count)
        .map(|i| format!("spk{}-utt{i:04}", i % 7))
        .collect();
    let specs: Vec<(&str, usize)> = keys.iter().map(|key| (key.as_str(), len)).collect();
    write_sources(dir, &specs)
}

pub fn manifest_text(entries: &[(&str, &Path)]) -> String {
    entries
        .iter()
        .map(|(key, path)| format!("{key} {}\n", path.display()))
        .collect()
}

pub fn manifest_for(sources: &[Source]) -> String {
    let entries: Vec<(&str, &Path)> = sources
        .iter()
        .map(|source| (source.key.as_str(), source.path.as_path()))
        .collect();
    manifest_text(&entries)
}

pub fn store_dir(temp: &TempDir) -> PathBuf {
    temp.path().join("store")
}
