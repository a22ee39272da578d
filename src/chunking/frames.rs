//! Video frame captions: one chunk per frame annotation.

use std::sync::LazyLock;

use regex::Regex;

use super::{
    Draft,
    timecode::{CLOCK, parse_clock, parse_seconds},
};
use crate::{chunk::Locator, error::ChunkingError};

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#{1,6}\s+(.+?)\s*$").expect("static regex"));

/// `Frame at 00:01:12`, `Frame 3 @ 01:12`, `Frame #3 at [00:01:12]`.
static FRAME_AT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^frame(?:\s+#?\d+)?\s*(?:at|@|-|:)?\s*\[?\s*({CLOCK})\s*\]?"
    ))
    .expect("static regex")
});

/// `[00:01:12]`, optionally followed by a title.
static BRACKET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^\[\s*({CLOCK})\s*\]")).expect("static regex")
});

/// `Frame 12 (t=72.0s)`.
static FRAME_T: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^frame\s+#?\d+\s*\(\s*t\s*=\s*(\d+(?:\.\d+)?)\s*s?\s*\)")
        .expect("static regex")
});

/// Headings that announce a frame but may fail to carry a usable time.
static FRAME_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:frame\b|\[\s*\d)").expect("static regex")
});

enum Heading {
    Frame(u64),
    Broken,
    Other,
}

fn classify(title: &str) -> Heading {
    if let Some(caps) = FRAME_T.captures(title) {
        return parse_seconds(&caps[1]).map_or(Heading::Broken, Heading::Frame);
    }
    let clock = FRAME_AT
        .captures(title)
        .or_else(|| BRACKET.captures(title))
        .map(|caps| caps[1].to_string());
    match clock {
        Some(raw) => parse_clock(&raw).map_or(Heading::Broken, Heading::Frame),
        None if FRAME_LIKE.is_match(title) => Heading::Broken,
        None => Heading::Other,
    }
}

/// Split a frame caption file into one draft per frame heading.
///
/// The body of a frame runs until the next heading of any kind. Frames with
/// an empty body are dropped.
pub(crate) fn split_frames(text: &str) -> (Vec<Draft>, Vec<ChunkingError>) {
    let mut drafts = Vec::new();
    let mut errors = Vec::new();
    let mut current: Option<(u64, Vec<&str>)> = None;

    for (idx, line) in text.lines().enumerate() {
        let Some(caps) = HEADING.captures(line) else {
            if let Some((_, lines)) = current.as_mut() {
                lines.push(line);
            }
            continue;
        };

        flush(&mut current, &mut drafts);
        let title = caps[1].trim();
        match classify(title) {
            Heading::Frame(t) => current = Some((t, Vec::new())),
            Heading::Broken => errors.push(ChunkingError::BadFrameHeading {
                line: idx + 1,
                raw: title.to_string(),
            }),
            Heading::Other => {}
        }
    }
    flush(&mut current, &mut drafts);

    (drafts, errors)
}

fn flush(current: &mut Option<(u64, Vec<&str>)>, drafts: &mut Vec<Draft>) {
    if let Some((t, lines)) = current.take() {
        let body = lines.join("\n").trim().to_string();
        if !body.is_empty() {
            drafts.push(Draft {
                offset: t,
                locator: Locator::Time {
                    start_ms: t,
                    end_ms: t,
                },
                heading_path: Vec::new(),
                text: body,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn times(drafts: &[Draft]) -> Vec<u64> {
        drafts.iter().map(|d| d.offset).collect()
    }

    #[test]
    fn recognizes_every_heading_convention() {
        let text = "\
# Frames for talk.mp4

## Frame at 00:01:12
Slide: architecture overview

### Frame 4 @ 01:30
Terminal with cargo output

## [00:02:00]
Whiteboard

## Frame 12 (t=150.5s)
Closing slide
";
        let (drafts, errors) = split_frames(text);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(times(&drafts), vec![72_000, 90_000, 120_000, 150_500]);
        assert_eq!(drafts[0].text, "Slide: architecture overview");
        assert_eq!(
            drafts[0].locator,
            Locator::Time {
                start_ms: 72_000,
                end_ms: 72_000
            }
        );
    }

    #[test]
    fn broken_heading_skips_only_that_frame() {
        let text = "## Frame at 00:01:00\nfirst\n\n## Frame at 00:99:00\nbroken\n\n## Frame at 00:03:00\nthird\n";
        let (drafts, errors) = split_frames(text);
        assert_eq!(times(&drafts), vec![60_000, 180_000]);
        assert_eq!(
            errors,
            vec![ChunkingError::BadFrameHeading {
                line: 4,
                raw: "Frame at 00:99:00".to_string()
            }]
        );
    }

    #[test]
    fn frame_heading_without_time_is_an_error() {
        let (drafts, errors) = split_frames("## Frame seven\ncontent\n");
        assert!(drafts.is_empty());
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn unrelated_headings_end_a_frame_body() {
        let (drafts, errors) =
            split_frames("## Frame at 00:00:10\ncaption\n## Notes\nnot a frame\n");
        assert!(errors.is_empty());
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].text, "caption");
    }

    #[test]
    fn empty_frames_are_dropped() {
        let (drafts, _) = split_frames("## Frame at 00:00:10\n\n## Frame at 00:00:20\nok\n");
        assert_eq!(times(&drafts), vec![20_000]);
    }
}
