//! Video transcript chunking: timecoded segments grouped into windows.

use std::sync::LazyLock;

use regex::Regex;

use super::{
    ChunkerConfig, Draft,
    timecode::{CLOCK, parse_clock},
};
use crate::{chunk::Locator, error::ChunkingError};

const SEP: &str = r"\s*(?:-->|->|-|–|—|to)\s*";

/// `[HH:MM:SS]`, `[MM:SS]`, `[a - b]`, optionally followed by text.
static BRACKETED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^\s*\[\s*({CLOCK})(?:{SEP}({CLOCK}))?\s*\]\s*[:\-–—]?\s*(.*)$"
    ))
    .expect("static regex")
});

/// `MM:SS - MM:SS text` and SRT `HH:MM:SS,mmm --> HH:MM:SS,mmm`.
static RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^\s*({CLOCK}){SEP}({CLOCK})\s*[:|]?\s*(.*)$"))
        .expect("static regex")
});

/// Anything that starts like a timecode, used to tell broken timecodes
/// apart from ordinary prose.
static TIMECODE_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\[\s*\d{1,2}:\d|\d{1,2}:\d{2}(?::\d{2})?(?:[.,]\d+)?\s*(?:-->|->|-|–|—))")
        .expect("static regex")
});

static SRT_INDEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+$").expect("static regex"));

#[derive(Debug, Clone, PartialEq)]
struct Segment {
    start_ms: u64,
    end_ms: Option<u64>,
    text: String,
}

#[derive(Debug, PartialEq)]
struct Timed<'a> {
    start_ms: u64,
    end_ms: Option<u64>,
    text: &'a str,
}

/// Parse one line. `Ok(None)` means the line carries no timecode.
fn parse_timed(line: &str, line_no: usize) -> Result<Option<Timed<'_>>, ChunkingError> {
    let caps = BRACKETED.captures(line).or_else(|| RANGE.captures(line));
    let Some(caps) = caps else {
        if TIMECODE_LIKE.is_match(line) {
            return Err(ChunkingError::BadTimecode {
                line: line_no,
                raw: line.trim().to_string(),
            });
        }
        return Ok(None);
    };

    let bad = |raw: &str| ChunkingError::BadTimecode {
        line: line_no,
        raw: raw.to_string(),
    };

    let start_ms = parse_clock(&caps[1]).ok_or_else(|| bad(&caps[1]))?;
    let end_ms = match caps.get(2) {
        Some(m) => Some(parse_clock(m.as_str()).ok_or_else(|| bad(m.as_str()))?),
        None => None,
    };
    if let Some(end_ms) = end_ms
        && end_ms < start_ms
    {
        return Err(ChunkingError::InvertedRange {
            line: line_no,
            start_ms,
            end_ms,
        });
    }

    let text = caps.get(3).map_or("", |m| m.as_str().trim());
    Ok(Some(Timed {
        start_ms,
        end_ms,
        text,
    }))
}

fn parse_segments(text: &str) -> (Vec<Segment>, Vec<ChunkingError>) {
    let lines: Vec<&str> = text.lines().collect();
    let mut segments: Vec<Segment> = Vec::new();
    let mut errors = Vec::new();
    // Set after a broken timecode so its continuation lines are dropped too.
    let mut skipping = false;

    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed == "WEBVTT" {
            continue;
        }

        if SRT_INDEX.is_match(trimmed) {
            let next = lines[idx + 1..].iter().find(|l| !l.trim().is_empty());
            if next.is_some_and(|l| matches!(parse_timed(l, 0), Ok(Some(_)) | Err(_))) {
                continue;
            }
        }

        match parse_timed(line, idx + 1) {
            Ok(Some(timed)) => {
                skipping = false;
                segments.push(Segment {
                    start_ms: timed.start_ms,
                    end_ms: timed.end_ms,
                    text: timed.text.to_string(),
                });
            }
            Ok(None) => {
                if skipping {
                    continue;
                }
                // Text before the first timecode is header material.
                if let Some(segment) = segments.last_mut() {
                    if !segment.text.is_empty() {
                        segment.text.push(' ');
                    }
                    segment.text.push_str(trimmed);
                }
            }
            Err(error) => {
                skipping = true;
                errors.push(error);
            }
        }
    }

    (segments, errors)
}

/// Chunk a transcript into windows of consecutive segments.
pub(crate) fn split_transcript(
    text: &str,
    config: &ChunkerConfig,
) -> (Vec<Draft>, Vec<ChunkingError>) {
    let (segments, errors) = parse_segments(text);

    // Resolve open ends: next segment's start, or the default duration.
    let resolved: Vec<(u64, u64, &str)> = segments
        .iter()
        .enumerate()
        .map(|(i, seg)| {
            let end = seg.end_ms.unwrap_or_else(|| match segments.get(i + 1) {
                Some(next) => next.start_ms,
                None => seg.start_ms + config.default_segment_ms,
            });
            (seg.start_ms, end.max(seg.start_ms), seg.text.as_str())
        })
        .filter(|(_, _, text)| !text.is_empty())
        .collect();

    let mut drafts = Vec::new();
    let mut window: Vec<(u64, u64, &str)> = Vec::new();
    for seg in resolved {
        if let Some(first) = window.first()
            && seg.0 >= first.0 + config.window_ms
        {
            drafts.push(window_draft(&window));
            window.clear();
        }
        window.push(seg);
    }
    if !window.is_empty() {
        drafts.push(window_draft(&window));
    }

    (drafts, errors)
}

fn window_draft(window: &[(u64, u64, &str)]) -> Draft {
    let offset = window.first().map_or(0, |w| w.0);
    let start_ms = window.iter().map(|w| w.0).min().unwrap_or(offset);
    let end_ms = window.iter().map(|w| w.1).max().unwrap_or(start_ms);
    let text = window
        .iter()
        .map(|w| w.2)
        .collect::<Vec<_>>()
        .join("\n");

    Draft {
        offset,
        locator: Locator::Time { start_ms, end_ms },
        heading_path: Vec::new(),
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChunkerConfig {
        ChunkerConfig::default()
    }

    fn time(d: &Draft) -> (u64, u64) {
        d.locator.time_range().unwrap()
    }

    #[test]
    fn bracketed_points_end_at_next_start() {
        let (drafts, errors) = split_transcript(
            "[00:00:05] hello\n[00:00:12] world\n",
            &config(),
        );
        assert!(errors.is_empty());
        assert_eq!(drafts.len(), 1);
        assert_eq!(time(&drafts[0]), (5_000, 17_000));
        assert_eq!(drafts[0].text, "hello\nworld");
        assert_eq!(drafts[0].offset, 5_000);
    }

    #[test]
    fn accepts_every_notation() {
        let cases = [
            ("[00:01:05] text", (65_000, Some(None))),
            ("[00:01:05 - 00:01:18] text", (65_000, Some(Some(78_000)))),
            ("[01:05] text", (65_000, Some(None))),
            ("01:05 - 01:18 text", (65_000, Some(Some(78_000)))),
            ("00:01:05,000 --> 00:01:18,500", (65_000, Some(Some(78_500)))),
        ];
        for (line, (start, end)) in cases {
            let timed = parse_timed(line, 1).unwrap().unwrap();
            assert_eq!(timed.start_ms, start, "{line}");
            assert_eq!(Some(timed.end_ms), end, "{line}");
        }
    }

    #[test]
    fn plain_prose_is_not_a_timecode() {
        assert_eq!(parse_timed("We met at the station.", 1).unwrap(), None);
        assert_eq!(parse_timed("12:30 we had lunch", 1).unwrap(), None);
    }

    #[test]
    fn untimed_lines_continue_the_segment() {
        let (drafts, _) = split_transcript(
            "# Transcript\n\n[00:00:00] first part\nstill first\n[00:00:10] second\n",
            &config(),
        );
        assert_eq!(drafts[0].text, "first part still first\nsecond");
    }

    #[test]
    fn srt_blocks_are_parsed() {
        let srt = "1\n00:00:01,000 --> 00:00:04,000\nHello there.\n\n2\n00:00:05,000 --> 00:00:08,000\nGeneral Kenobi.\n";
        let (drafts, errors) = split_transcript(srt, &config());
        assert!(errors.is_empty());
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].text, "Hello there.\nGeneral Kenobi.");
        assert_eq!(time(&drafts[0]), (1_000, 8_000));
    }

    #[test]
    fn windows_are_about_sixty_seconds() {
        let transcript: String = (0..10)
            .map(|i| format!("[{:02}:{:02}] line {i}\n", (i * 20) / 60, (i * 20) % 60))
            .collect();
        let (drafts, _) = split_transcript(&transcript, &config());
        // Segments every 20 s: windows start at 0, 60, 120, 180.
        let starts: Vec<u64> = drafts.iter().map(|d| time(d).0).collect();
        assert_eq!(starts, vec![0, 60_000, 120_000, 180_000]);
        assert_eq!(time(drafts.last().unwrap()).1, 185_000);
    }

    #[test]
    fn broken_timecode_is_skipped_with_its_continuation() {
        let (drafts, errors) = split_transcript(
            "[00:00:01] ok\n[00:00:75] broken\nmore broken\n[00:00:09] fine\n",
            &config(),
        );
        assert_eq!(
            errors,
            vec![ChunkingError::BadTimecode {
                line: 2,
                raw: "00:00:75".to_string()
            }]
        );
        assert_eq!(drafts[0].text, "ok\nfine");
    }

    #[test]
    fn inverted_range_is_an_error() {
        let (drafts, errors) = split_transcript(
            "[00:00:20 - 00:00:10] backwards\n[00:00:30] fine\n",
            &config(),
        );
        assert!(matches!(errors[0], ChunkingError::InvertedRange { line: 1, .. }));
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].text, "fine");
    }

    #[test]
    fn text_before_first_timecode_is_ignored() {
        let (drafts, _) =
            split_transcript("Speaker list: Ann, Bo\n[00:00:00] hi\n", &config());
        assert_eq!(drafts[0].text, "hi");
    }
}
