//! Core data model: chunks, modalities and locators.

use serde::{Deserialize, Serialize};

use crate::{chunking::timecode::format_hms, doc_id};

/// Content-type classification of a chunk.
///
/// Closed on purpose: the chunker and the video expansion both match on it
/// exhaustively, so adding a modality forces both to be revisited.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Ocr,
    AudioTranscript,
    VideoTranscript,
    VideoFrame,
    ImageCaption,
}

impl Modality {
    pub const ALL: [Modality; 6] = [
        Modality::Text,
        Modality::Ocr,
        Modality::AudioTranscript,
        Modality::VideoTranscript,
        Modality::VideoFrame,
        Modality::ImageCaption,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Ocr => "ocr",
            Modality::AudioTranscript => "audio_transcript",
            Modality::VideoTranscript => "video_transcript",
            Modality::VideoFrame => "video_frame",
            Modality::ImageCaption => "image_caption",
        }
    }

    /// Time-indexed video content, eligible for temporal expansion.
    pub fn is_video(self) -> bool {
        match self {
            Modality::VideoTranscript | Modality::VideoFrame => true,
            Modality::Text
            | Modality::Ocr
            | Modality::AudioTranscript
            | Modality::ImageCaption => false,
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Modality::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown modality: {s}"))
    }
}

/// Structured pointer into a source document, used for citation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    Page { page: u32 },
    /// 1-based, inclusive line range in the converted file.
    Lines { start: usize, end: usize },
    /// Milliseconds from the start of the media.
    Time { start_ms: u64, end_ms: u64 },
}

impl Locator {
    pub fn time_range(&self) -> Option<(u64, u64)> {
        match *self {
            Locator::Time { start_ms, end_ms } => Some((start_ms, end_ms)),
            Locator::Page { .. } | Locator::Lines { .. } => None,
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Locator::Page { page } => write!(f, "page {page}"),
            Locator::Lines { start, end } if start == end => {
                write!(f, "line {start}")
            }
            Locator::Lines { start, end } => write!(f, "lines {start}-{end}"),
            Locator::Time { start_ms, end_ms } if start_ms == end_ms => {
                f.write_str(&format_hms(start_ms))
            }
            Locator::Time { start_ms, end_ms } => {
                write!(f, "{}-{}", format_hms(start_ms), format_hms(end_ms))
            }
        }
    }
}

/// Where a chunk came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Path of the converted file, relative to the corpus root.
    pub converted_path: String,
    /// Display name of the original document.
    pub name: String,
    /// File type of the original document (usually its extension).
    pub file_type: String,
}

/// The atomic retrievable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub modality: Modality,
    pub source: SourceInfo,
    pub locator: Locator,
    pub heading_path: Vec<String>,
    pub text: String,
}

impl Chunk {
    /// Build a chunk, deriving its ID from `(doc_id, modality, offset)`.
    pub fn new(
        doc_id: &str,
        modality: Modality,
        offset: u64,
        source: SourceInfo,
        locator: Locator,
        heading_path: Vec<String>,
        text: String,
    ) -> Self {
        Self {
            chunk_id: doc_id::chunk_id(doc_id, modality, offset),
            doc_id: doc_id.to_string(),
            modality,
            source,
            locator,
            heading_path,
            text,
        }
    }

    pub fn heading_label(&self) -> String {
        self.heading_path.join(" > ")
    }

    pub fn token_count(&self) -> usize {
        token_count(&self.text)
    }

    /// The string handed to the embedding provider: document context
    /// followed by the chunk text.
    pub fn embedding_input(&self) -> String {
        let mut input = format!(
            "Document: {}\nType: {}\n",
            self.source.name, self.source.file_type
        );
        if !self.heading_path.is_empty() {
            input.push_str("Section: ");
            input.push_str(&self.heading_label());
            input.push('\n');
        }
        input.push('\n');
        input.push_str(&self.text);
        input
    }
}

/// Token count used for chunk sizing: whitespace-separated words.
pub fn token_count(text: &str) -> usize {
    text.split_whitespace().count()
}
