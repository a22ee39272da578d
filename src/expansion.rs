//! Temporal expansion of video hits into chronological evidence bundles.

use serde::Serialize;

use crate::chunk::{Chunk, Modality};

/// Padding around a transcript anchor.
pub const TRANSCRIPT_PAD_MS: u64 = 15_000;

/// Padding around a frame anchor.
pub const FRAME_PAD_MS: u64 = 10_000;

/// Which stream of the video an entry comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Track {
    Audio,
    Screen,
}

impl Track {
    /// The track of a video modality; `None` for everything else.
    pub fn of(modality: Modality) -> Option<Self> {
        match modality {
            Modality::VideoTranscript => Some(Track::Audio),
            Modality::VideoFrame => Some(Track::Screen),
            Modality::Text | Modality::Ocr | Modality::AudioTranscript | Modality::ImageCaption => {
                None
            }
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Track::Audio => "Audio",
            Track::Screen => "Screen",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleEntry {
    pub chunk_id: String,
    pub track: Track,
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Every video chunk of one document inside the window around an anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoBundle {
    pub window_start_ms: u64,
    pub window_end_ms: u64,
    pub entries: Vec<BundleEntry>,
}

/// Padding applied around an anchor of the given modality.
pub fn padding(modality: Modality) -> Option<u64> {
    match modality {
        Modality::VideoTranscript => Some(TRANSCRIPT_PAD_MS),
        Modality::VideoFrame => Some(FRAME_PAD_MS),
        Modality::Text | Modality::Ocr | Modality::AudioTranscript | Modality::ImageCaption => None,
    }
}

/// Media duration: the recorded one, else the last end time among the
/// document's video chunks.
pub fn media_duration(recorded: Option<u64>, doc_chunks: &[Chunk]) -> Option<u64> {
    recorded.or_else(|| {
        doc_chunks
            .iter()
            .filter(|c| c.modality.is_video())
            .filter_map(|c| c.locator.time_range())
            .map(|(_, end)| end)
            .max()
    })
}

/// The closed window `[start - pad, end + pad]` around `anchor`, clipped to
/// `[0, duration]`. `None` for non-video anchors.
pub fn window(anchor: &Chunk, duration_ms: Option<u64>) -> Option<(u64, u64)> {
    let pad = padding(anchor.modality)?;
    let (start, end) = anchor.locator.time_range()?;
    let mut hi = end.saturating_add(pad);
    if let Some(duration) = duration_ms {
        // Never clip the anchor itself away.
        hi = hi.min(duration.max(end));
    }
    Some((start.saturating_sub(pad), hi))
}

/// Expand a video anchor into the chronological bundle of its neighbours.
///
/// `doc_chunks` are the chunks of the anchor's document; only the two video
/// modalities are considered. The anchor is always part of the bundle.
pub fn expand(anchor: &Chunk, doc_chunks: &[Chunk], duration_ms: Option<u64>) -> Option<VideoBundle> {
    let duration = media_duration(duration_ms, doc_chunks);
    let (lo, hi) = window(anchor, duration)?;

    let mut entries: Vec<BundleEntry> = doc_chunks
        .iter()
        .filter(|c| c.doc_id == anchor.doc_id && c.chunk_id != anchor.chunk_id)
        .chain(std::iter::once(anchor))
        .filter_map(|c| {
            let track = Track::of(c.modality)?;
            let (start, end) = c.locator.time_range()?;
            let intersects = start <= hi && end >= lo;
            (intersects || c.chunk_id == anchor.chunk_id).then(|| BundleEntry {
                chunk_id: c.chunk_id.clone(),
                track,
                start_ms: start,
                end_ms: end,
                text: c.text.clone(),
            })
        })
        .collect();

    entries.sort_by(|a, b| {
        a.start_ms
            .cmp(&b.start_ms)
            .then(a.track.cmp(&b.track))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });

    Some(VideoBundle {
        window_start_ms: lo,
        window_end_ms: hi,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Locator, SourceInfo};

    fn timed(modality: Modality, start_s: u64, end_s: u64, text: &str) -> Chunk {
        Chunk::new(
            "vid",
            modality,
            start_s * 1000,
            SourceInfo {
                converted_path: "talk.mp4.md".into(),
                name: "talk.mp4".into(),
                file_type: "mp4".into(),
            },
            Locator::Time {
                start_ms: start_s * 1000,
                end_ms: end_s * 1000,
            },
            Vec::new(),
            text.into(),
        )
    }

    fn texts(bundle: &VideoBundle) -> Vec<&str> {
        bundle.entries.iter().map(|e| e.text.as_str()).collect()
    }

    #[test]
    fn non_video_anchors_do_not_expand() {
        let mut c = timed(Modality::VideoFrame, 1, 1, "x");
        c.modality = Modality::Text;
        assert!(expand(&c, &[], None).is_none());
    }

    #[test]
    fn transcript_window_is_fifteen_seconds() {
        let anchor = timed(Modality::VideoTranscript, 60, 70, "anchor");
        let chunks = vec![
            timed(Modality::VideoTranscript, 0, 44, "too early"),
            timed(Modality::VideoFrame, 45, 45, "edge frame"),
            anchor.clone(),
            timed(Modality::VideoFrame, 85, 85, "late edge"),
            timed(Modality::VideoFrame, 86, 86, "too late"),
            timed(Modality::VideoTranscript, 120, 180, "end"),
        ];
        let bundle = expand(&anchor, &chunks, None).unwrap();
        assert_eq!((bundle.window_start_ms, bundle.window_end_ms), (45_000, 85_000));
        assert_eq!(texts(&bundle), vec!["edge frame", "anchor", "late edge"]);
        assert_eq!(bundle.entries[0].track, Track::Screen);
        assert_eq!(bundle.entries[1].track, Track::Audio);
    }

    #[test]
    fn frame_window_clips_to_duration() {
        let anchor = timed(Modality::VideoFrame, 5, 5, "anchor");
        let chunks = vec![
            anchor.clone(),
            timed(Modality::VideoTranscript, 0, 12, "speech"),
            timed(Modality::VideoFrame, 14, 14, "next"),
        ];
        let bundle = expand(&anchor, &chunks, Some(12_000)).unwrap();
        assert_eq!((bundle.window_start_ms, bundle.window_end_ms), (0, 12_000));
        assert_eq!(texts(&bundle), vec!["speech", "anchor"]);
    }

    #[test]
    fn transcript_sorts_before_frame_at_same_start() {
        let anchor = timed(Modality::VideoFrame, 30, 30, "frame");
        let chunks = vec![anchor.clone(), timed(Modality::VideoTranscript, 30, 40, "speech")];
        let bundle = expand(&anchor, &chunks, None).unwrap();
        assert_eq!(texts(&bundle), vec!["speech", "frame"]);
    }

    #[test]
    fn duration_falls_back_to_last_video_chunk() {
        let chunks = vec![
            timed(Modality::VideoTranscript, 0, 50, "a"),
            timed(Modality::VideoFrame, 90, 90, "b"),
        ];
        assert_eq!(media_duration(None, &chunks), Some(90_000));
        assert_eq!(media_duration(Some(5), &chunks), Some(5));
    }
}
