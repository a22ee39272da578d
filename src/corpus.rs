//! Enumerating document entries from a converted corpus directory.
//!
//! A corpus is either described by a `manifest.json` written by the
//! conversion pipeline, or discovered from file names:
//!
//! | converted file               | modality                                |
//! |------------------------------|-----------------------------------------|
//! | `talk.mp4.transcript.md`     | `video_transcript` (video source)       |
//! | `call.m4a.transcript.md`     | `audio_transcript` (any other source)   |
//! | `talk.mp4.frames.md`         | `video_frame`                           |
//! | `scan.png.ocr.md`            | `ocr`                                   |
//! | `photo.jpg.caption.md`       | `image_caption`                         |
//! | `report.pdf.md`, `notes.txt` | `text`                                  |
//!
//! Parts sharing a source path form one document.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    chunk::Modality,
    doc_id::content_checksum,
    error::{Error, Result},
};

pub const MANIFEST_FILE: &str = "manifest.json";

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "webm", "avi", "m4v"];

const CONVERTED_EXTENSIONS: &[&str] = &["md", "txt"];

/// One converted part of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedPart {
    /// Path relative to the corpus root.
    pub path: String,
    pub modality: Modality,
    pub text: String,
}

/// A source document and its converted parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEntry {
    /// Path of the original document, relative to the corpus root. Also the
    /// key under which the document is registered.
    pub source_path: String,
    pub name: String,
    pub file_type: String,
    pub checksum: String,
    pub duration_ms: Option<u64>,
    pub parts: Vec<ConvertedPart>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ManifestEntry {
    source: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    file_type: Option<String>,
    #[serde(default)]
    checksum: Option<String>,
    #[serde(default)]
    duration_ms: Option<u64>,
    parts: Vec<ManifestPart>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ManifestPart {
    path: String,
    modality: Modality,
}

/// Load every document entry under `root`, preferring the manifest.
pub fn load_corpus(root: &Path) -> Result<Vec<DocumentEntry>> {
    let manifest = root.join(MANIFEST_FILE);
    if manifest.is_file() {
        debug!(path = %manifest.display(), "reading corpus manifest");
        read_manifest(root, &manifest)
    } else {
        discover(root)
    }
}

/// Read a manifest. Entries whose parts cannot be read are skipped.
pub fn read_manifest(root: &Path, manifest: &Path) -> Result<Vec<DocumentEntry>> {
    let raw = std::fs::read_to_string(manifest)?;
    let entries: Vec<ManifestEntry> = serde_json::from_str(&raw)?;

    let mut docs = Vec::with_capacity(entries.len());
    for entry in entries {
        let mut parts = Vec::with_capacity(entry.parts.len());
        let mut unreadable = false;
        for part in entry.parts {
            match std::fs::read_to_string(root.join(&part.path)) {
                Ok(text) => parts.push(ConvertedPart {
                    path: part.path,
                    modality: part.modality,
                    text,
                }),
                Err(error) => {
                    warn!(source = %entry.source, part = %part.path, %error, "skipping document with unreadable part");
                    unreadable = true;
                    break;
                }
            }
        }
        if unreadable {
            continue;
        }

        let checksum = entry
            .checksum
            .unwrap_or_else(|| parts_checksum(&parts));
        docs.push(DocumentEntry {
            name: entry.name.unwrap_or_else(|| display_name(&entry.source)),
            file_type: entry
                .file_type
                .map(|t| t.to_lowercase())
                .unwrap_or_else(|| file_type_of(&entry.source)),
            source_path: entry.source,
            checksum,
            duration_ms: entry.duration_ms,
            parts,
        });
    }

    docs.sort_by(|a, b| a.source_path.cmp(&b.source_path));
    Ok(docs)
}

/// Discover documents from converted-file naming conventions.
///
/// Skips hidden files and directories (names starting with `.`).
pub fn discover(root: &Path) -> Result<Vec<DocumentEntry>> {
    let canonical_root = root
        .canonicalize()
        .map_err(|_| Error::NotFound {
            kind: "corpus directory",
            name: root.display().to_string(),
        })?;

    let mut files = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &mut files)?;
    files.sort();

    let mut grouped: BTreeMap<String, Vec<ConvertedPart>> = BTreeMap::new();
    for relative in files {
        let rel = relative.to_string_lossy().replace('\\', "/");
        let Some((source, modality)) = classify(&rel) else {
            continue;
        };
        match std::fs::read_to_string(canonical_root.join(&relative)) {
            Ok(text) => grouped.entry(source).or_default().push(ConvertedPart {
                path: rel,
                modality,
                text,
            }),
            Err(error) => warn!(path = %rel, %error, "skipping unreadable file"),
        }
    }

    Ok(grouped
        .into_iter()
        .map(|(source, parts)| DocumentEntry {
            name: display_name(&source),
            file_type: file_type_of(&source),
            checksum: parts_checksum(&parts),
            duration_ms: None,
            source_path: source,
            parts,
        })
        .collect())
}

fn parts_checksum(parts: &[ConvertedPart]) -> String {
    content_checksum(parts.iter().map(|p| p.text.as_str()))
}

/// Map a converted file path to its source path and modality.
///
/// ```
/// use docsift::{chunk::Modality, corpus::classify};
///
/// assert_eq!(
///     classify("talks/intro.mp4.frames.md"),
///     Some(("talks/intro.mp4".to_string(), Modality::VideoFrame))
/// );
/// assert_eq!(classify("notes.md"), Some(("notes.md".to_string(), Modality::Text)));
/// assert_eq!(classify("image.png"), None);
/// ```
pub fn classify(relative: &str) -> Option<(String, Modality)> {
    let (stem, ext) = relative.rsplit_once('.')?;
    if !CONVERTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
        return None;
    }

    let tagged = |suffix: &str| stem.strip_suffix(suffix).filter(|s| !s.is_empty());

    if let Some(source) = tagged(".transcript") {
        let modality = if is_video(source) {
            Modality::VideoTranscript
        } else {
            Modality::AudioTranscript
        };
        return Some((source.to_string(), modality));
    }
    if let Some(source) = tagged(".frames") {
        return Some((source.to_string(), Modality::VideoFrame));
    }
    if let Some(source) = tagged(".ocr") {
        return Some((source.to_string(), Modality::Ocr));
    }
    if let Some(source) = tagged(".caption") {
        return Some((source.to_string(), Modality::ImageCaption));
    }

    // `report.pdf.md` converts `report.pdf`; a bare `notes.md` is its own
    // source.
    let file_stem = stem.rsplit('/').next().unwrap_or(stem);
    if file_stem.contains('.') && !file_stem.starts_with('.') {
        Some((stem.to_string(), Modality::Text))
    } else {
        Some((relative.to_string(), Modality::Text))
    }
}

fn is_video(source: &str) -> bool {
    extension(source).is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

fn extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| !ext.is_empty())
}

pub(crate) fn display_name(source: &str) -> String {
    source.rsplit('/').next().unwrap_or(source).to_string()
}

pub(crate) fn file_type_of(source: &str) -> String {
    extension(source).unwrap_or_else(|| "unknown".to_string())
}

fn walk_dir(root: &Path, current: &Path, results: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_dir(root, &path, results)?;
        } else if file_type.is_symlink() {
            let Ok(resolved) = path.canonicalize() else {
                continue;
            };
            // Directory links back into the corpus would loop.
            if resolved.is_dir() && resolved.starts_with(root) {
                continue;
            }
            if resolved.is_dir() {
                walk_dir(root, &path, results)?;
            } else if resolved.is_file()
                && let Ok(rel) = path.strip_prefix(root)
            {
                results.push(rel.to_path_buf());
            }
        } else if file_type.is_file()
            && let Ok(rel) = path.strip_prefix(root)
        {
            results.push(rel.to_path_buf());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn classifies_naming_conventions() {
        let cases = [
            ("talk.mp4.transcript.md", "talk.mp4", Modality::VideoTranscript),
            ("call.m4a.transcript.md", "call.m4a", Modality::AudioTranscript),
            ("talk.mp4.frames.md", "talk.mp4", Modality::VideoFrame),
            ("scan.png.ocr.md", "scan.png", Modality::Ocr),
            ("photo.jpg.caption.md", "photo.jpg", Modality::ImageCaption),
            ("docs/report.pdf.md", "docs/report.pdf", Modality::Text),
            ("notes.txt", "notes.txt", Modality::Text),
            ("docs/v1.2/notes.md", "docs/v1.2/notes.md", Modality::Text),
        ];
        for (path, source, modality) in cases {
            assert_eq!(
                classify(path),
                Some((source.to_string(), modality)),
                "{path}"
            );
        }
        assert_eq!(classify("video.mp4"), None);
        assert_eq!(classify("noext"), None);
    }

    #[test]
    fn groups_parts_by_source() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "talk.mp4.transcript.md", "[00:00:01] hi");
        write(tmp.path(), "talk.mp4.frames.md", "## Frame at 00:00:01\nslide");
        write(tmp.path(), "report.pdf.md", "# Report");

        let docs = discover(tmp.path()).unwrap();
        assert_eq!(docs.len(), 2);

        let talk = docs.iter().find(|d| d.source_path == "talk.mp4").unwrap();
        assert_eq!(talk.parts.len(), 2);
        assert_eq!(talk.file_type, "mp4");
        assert_eq!(talk.name, "talk.mp4");

        let report = docs.iter().find(|d| d.source_path == "report.pdf").unwrap();
        assert_eq!(report.file_type, "pdf");
    }

    #[test]
    fn skips_hidden_entries() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), ".hidden.md", "secret");
        write(tmp.path(), ".cache/inner.md", "cached");
        write(tmp.path(), "visible.md", "hello");

        let docs = discover(tmp.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source_path, "visible.md");
    }

    #[test]
    fn checksum_tracks_content() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.md", "one");
        let before = discover(tmp.path()).unwrap()[0].checksum.clone();
        write(tmp.path(), "a.md", "two");
        let after = discover(tmp.path()).unwrap()[0].checksum.clone();
        assert_ne!(before, after);
    }

    #[test]
    fn manifest_takes_precedence() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "converted/t.md", "[00:00:01] hello");
        write(tmp.path(), "ignored.md", "not listed");
        write(
            tmp.path(),
            MANIFEST_FILE,
            r#"[{"source": "media/Talk.MP4", "duration_ms": 180000,
                 "parts": [{"path": "converted/t.md", "modality": "video_transcript"}]}]"#,
        );

        let docs = load_corpus(tmp.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "Talk.MP4");
        assert_eq!(docs[0].file_type, "mp4");
        assert_eq!(docs[0].duration_ms, Some(180_000));
        assert_eq!(docs[0].parts[0].modality, Modality::VideoTranscript);
        assert!(!docs[0].checksum.is_empty());
    }

    #[test]
    fn manifest_entry_with_missing_part_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "ok.md", "fine");
        write(
            tmp.path(),
            MANIFEST_FILE,
            r#"[{"source": "a.pdf", "parts": [{"path": "missing.md", "modality": "text"}]},
                {"source": "b.pdf", "parts": [{"path": "ok.md", "modality": "text"}]}]"#,
        );
        let docs = load_corpus(tmp.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source_path, "b.pdf");
    }

    #[test]
    fn missing_corpus_is_not_found() {
        let err = discover(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
