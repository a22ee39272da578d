//! Splitting converted documents into retrievable chunks.
//!
//! Each converted part is chunked according to its [`Modality`]:
//!
//! - prose-like parts (text, OCR, audio transcripts, image captions) follow
//!   the heading hierarchy and paragraphs, see [`text`];
//! - video transcripts are grouped into time windows, see [`transcript`];
//! - video frame captions become one chunk per frame, see [`frames`].
//!
//! Malformed fragments never abort a part: they are collected as
//! [`ChunkingError`]s and the remaining fragments are still chunked.

pub mod frames;
pub mod text;
pub mod timecode;
pub mod transcript;

use std::collections::HashSet;

use tracing::warn;

use crate::{
    chunk::{Chunk, Locator, Modality, SourceInfo},
    error::ChunkingError,
};

/// Lower bound of the token band for prose chunks.
pub const MIN_TOKENS: usize = 300;

/// Upper bound of the token band for prose chunks.
pub const MAX_TOKENS: usize = 800;

/// Length of a transcript window.
pub const TRANSCRIPT_WINDOW_MS: u64 = 60_000;

/// Duration assumed for the last transcript segment when it has no end.
pub const DEFAULT_SEGMENT_MS: u64 = 5_000;

/// Chunk sizing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub min_tokens: usize,
    pub max_tokens: usize,
    pub window_ms: u64,
    pub default_segment_ms: u64,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_tokens: MIN_TOKENS,
            max_tokens: MAX_TOKENS,
            window_ms: TRANSCRIPT_WINDOW_MS,
            default_segment_ms: DEFAULT_SEGMENT_MS,
        }
    }
}

/// One converted part of a document, ready to be chunked.
#[derive(Debug, Clone, Copy)]
pub struct PartRef<'a> {
    pub source: &'a SourceInfo,
    pub modality: Modality,
    pub text: &'a str,
    /// Added to every chunk offset. Non-zero when a document has several
    /// parts of the same modality.
    pub offset_base: u64,
}

/// The result of chunking one part.
#[derive(Debug, Default)]
pub struct Chunked {
    pub chunks: Vec<Chunk>,
    pub errors: Vec<ChunkingError>,
}

/// A chunk before its ID is assigned.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Draft {
    pub offset: u64,
    pub locator: Locator,
    pub heading_path: Vec<String>,
    pub text: String,
}

/// Chunk one part, returning both the chunks and the skipped fragments.
pub fn split(doc_id: &str, part: &PartRef<'_>, config: &ChunkerConfig) -> Chunked {
    let (drafts, errors) = match part.modality {
        Modality::Text
        | Modality::Ocr
        | Modality::AudioTranscript
        | Modality::ImageCaption => (text::split_prose(part.text, config), Vec::new()),
        Modality::VideoTranscript => transcript::split_transcript(part.text, config),
        Modality::VideoFrame => frames::split_frames(part.text),
    };

    Chunked {
        chunks: finish(doc_id, part, drafts),
        errors,
    }
}

/// Chunk one part, logging and skipping malformed fragments.
pub fn chunk_part(doc_id: &str, part: &PartRef<'_>, config: &ChunkerConfig) -> Vec<Chunk> {
    let Chunked { chunks, errors } = split(doc_id, part, config);
    for error in &errors {
        warn!(
            path = %part.source.converted_path,
            modality = %part.modality,
            %error,
            "skipping malformed fragment"
        );
    }
    chunks
}

/// Assign IDs. Offsets are made unique within the part so two drafts never
/// share a chunk ID.
fn finish(doc_id: &str, part: &PartRef<'_>, drafts: Vec<Draft>) -> Vec<Chunk> {
    let mut used = HashSet::with_capacity(drafts.len());
    drafts
        .into_iter()
        .filter(|d| !d.text.trim().is_empty())
        .map(|draft| {
            let mut offset = part.offset_base + draft.offset;
            while !used.insert(offset) {
                offset += 1;
            }
            Chunk::new(
                doc_id,
                part.modality,
                offset,
                part.source.clone(),
                draft.locator,
                draft.heading_path,
                draft.text,
            )
        })
        .collect()
}
