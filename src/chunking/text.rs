//! Prose chunking: heading hierarchy, paragraphs and sentence splits.

use std::sync::LazyLock;

use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use super::{ChunkerConfig, Draft};
use crate::chunk::{Locator, token_count};

static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(#{1,6})\s+(.+?)(?:\s+#+)?\s*$").expect("static regex")
});

static PAGE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:<!--\s*page\s+(\d+)\s*-->|\[page\s+(\d+)\])\s*$")
        .expect("static regex")
});

/// A run of non-blank lines, kept as a byte range into the source text.
#[derive(Debug)]
struct Block {
    start: usize,
    end: usize,
    first_line: usize,
    last_line: usize,
    page: u32,
    heading_path: Vec<String>,
}

/// A unit that is never split further: a whole paragraph, or a sentence
/// run cut from an oversized one.
#[derive(Debug)]
struct Piece<'a> {
    text: &'a str,
    offset: usize,
    first_line: usize,
    last_line: usize,
    page: u32,
    heading_path: Vec<String>,
    tokens: usize,
}

/// Split a prose document into drafts whose token counts fall within
/// `[min_tokens, max_tokens]` wherever the input allows it.
pub(crate) fn split_prose(text: &str, config: &ChunkerConfig) -> Vec<Draft> {
    let (blocks, has_pages) = scan_blocks(text);

    let pieces: Vec<Piece<'_>> = blocks
        .iter()
        .flat_map(|block| block_pieces(text, block, config.max_tokens))
        .collect();

    group_pieces(pieces, config)
        .into_iter()
        .map(|group| render(text, &group, has_pages))
        .collect()
}

/// Walk the lines once, tracking the heading stack and page number.
fn scan_blocks(text: &str) -> (Vec<Block>, bool) {
    let mut blocks = Vec::new();
    let mut current: Option<Block> = None;
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut page = 1u32;
    let mut has_pages = false;
    let mut in_fence = false;
    // Start of the heading line(s) introducing the next paragraph.
    let mut pending_heading: Option<(usize, usize)> = None;

    let mut pos = 0usize;
    for (idx, raw) in text.split_inclusive('\n').enumerate() {
        let line_no = idx + 1;
        let line_start = pos;
        pos += raw.len();

        let mut content = raw.trim_end_matches(['\n', '\r']);
        let mut start = line_start;
        while let Some(rest) = content.strip_prefix('\u{c}') {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            page += 1;
            has_pages = true;
            content = rest;
            start += 1;
        }

        if !in_fence && let Some(caps) = PAGE_MARKER.captures(content) {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            let n = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str());
            if let Some(n) = n.and_then(|n| n.parse().ok()) {
                page = n;
            }
            has_pages = true;
            pending_heading = None;
            continue;
        }

        if content.trim().is_empty() {
            if !in_fence && let Some(block) = current.take() {
                blocks.push(block);
            }
            continue;
        }

        if content.trim_start().starts_with("```") {
            in_fence = !in_fence;
        } else if !in_fence && let Some(caps) = HEADING.captures(content) {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            let level = caps[1].len();
            stack.retain(|(l, _)| *l < level);
            stack.push((level, caps[2].trim().to_string()));
            pending_heading.get_or_insert((start, line_no));
            continue;
        }

        let end = start + content.len();
        match current.as_mut() {
            Some(block) => {
                block.end = end;
                block.last_line = line_no;
            }
            None => {
                let (block_start, first_line) =
                    pending_heading.take().unwrap_or((start, line_no));
                current = Some(Block {
                    start: block_start,
                    end,
                    first_line,
                    last_line: line_no,
                    page,
                    heading_path: stack.iter().map(|(_, t)| t.clone()).collect(),
                });
            }
        }
    }
    if let Some(block) = current.take() {
        blocks.push(block);
    }

    (blocks, has_pages)
}

/// Cut a block into pieces no larger than `max_tokens`, at sentence
/// boundaries, in balanced sizes.
fn block_pieces<'a>(
    text: &'a str,
    block: &Block,
    max_tokens: usize,
) -> Vec<Piece<'a>> {
    let slice = &text[block.start..block.end];
    let tokens = token_count(slice);

    if tokens <= max_tokens {
        return vec![make_piece(slice, 0, slice.len(), block, tokens)];
    }

    let parts = tokens.div_ceil(max_tokens);
    let target = tokens.div_ceil(parts);

    let mut pieces = Vec::with_capacity(parts);
    let mut run: Option<(usize, usize)> = None;
    let mut run_tokens = 0usize;

    for (idx, sentence) in slice.split_sentence_bound_indices() {
        let n = token_count(sentence);
        if let Some((s, e)) = run
            && run_tokens > 0
            && run_tokens + n > max_tokens
        {
            pieces.push(make_piece(slice, s, e, block, run_tokens));
            run = None;
            run_tokens = 0;
        }

        let span = run.get_or_insert((idx, idx));
        span.1 = idx + sentence.len();
        run_tokens += n;

        if run_tokens >= target
            && let Some((s, e)) = run.take()
        {
            pieces.push(make_piece(slice, s, e, block, run_tokens));
            run_tokens = 0;
        }
    }
    if let Some((s, e)) = run
        && run_tokens > 0
    {
        pieces.push(make_piece(slice, s, e, block, run_tokens));
    }

    pieces
}

fn make_piece<'a>(
    slice: &'a str,
    start: usize,
    end: usize,
    block: &Block,
    tokens: usize,
) -> Piece<'a> {
    let raw = &slice[start..end];
    let lead = raw.len() - raw.trim_start().len();
    let trimmed = raw.trim();
    let rel_start = start + lead;
    let rel_end = rel_start + trimmed.len();

    Piece {
        text: trimmed,
        offset: block.start + rel_start,
        first_line: block.first_line + newlines(&slice[..rel_start]),
        last_line: block.first_line + newlines(&slice[..rel_end]),
        page: block.page,
        heading_path: block.heading_path.clone(),
        tokens,
    }
}

fn newlines(s: &str) -> usize {
    s.bytes().filter(|b| *b == b'\n').count()
}

/// Finished groups with their token counts.
type Groups<'a> = Vec<(Vec<Piece<'a>>, usize)>;

/// Greedily merge consecutive pieces of one section until a group reaches
/// the minimum, never letting a multi-piece group exceed the maximum. A
/// heading change always closes the group, even an undersized one. An
/// undersized remainder joins the previous group of the same section when
/// that still fits.
fn group_pieces<'a>(
    pieces: Vec<Piece<'a>>,
    config: &ChunkerConfig,
) -> Vec<Vec<Piece<'a>>> {
    let mut groups: Groups<'a> = Vec::new();
    let mut buf: Vec<Piece<'a>> = Vec::new();
    let mut buf_tokens = 0usize;

    let flush = |groups: &mut Groups<'a>, buf: Vec<Piece<'a>>, tokens: usize| {
        match groups.last_mut() {
            Some((last, last_tokens))
                if tokens < config.min_tokens
                    && *last_tokens + tokens <= config.max_tokens
                    && same_section(last, &buf) =>
            {
                last.extend(buf);
                *last_tokens += tokens;
            }
            _ => groups.push((buf, tokens)),
        }
    };

    for piece in pieces {
        let overflows = buf_tokens + piece.tokens > config.max_tokens;
        let new_section = buf
            .last()
            .is_some_and(|prev| prev.heading_path != piece.heading_path);
        if !buf.is_empty() && (overflows || new_section) {
            flush(&mut groups, std::mem::take(&mut buf), buf_tokens);
            buf_tokens = 0;
        }
        buf_tokens += piece.tokens;
        buf.push(piece);
        if buf_tokens >= config.min_tokens {
            groups.push((std::mem::take(&mut buf), buf_tokens));
            buf_tokens = 0;
        }
    }

    if !buf.is_empty() {
        flush(&mut groups, buf, buf_tokens);
    }

    groups.into_iter().map(|(g, _)| g).collect()
}

fn same_section(a: &[Piece<'_>], b: &[Piece<'_>]) -> bool {
    match (a.last(), b.first()) {
        (Some(a), Some(b)) => a.heading_path == b.heading_path,
        _ => false,
    }
}

fn render(source: &str, group: &[Piece<'_>], has_pages: bool) -> Draft {
    let (first, last) = match (group.first(), group.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => {
            return Draft {
                offset: 0,
                locator: Locator::Lines { start: 1, end: 1 },
                heading_path: Vec::new(),
                text: String::new(),
            };
        }
    };

    // Contiguous pieces of the same block are rejoined from the source so
    // the original spacing survives; separate blocks are joined by a blank
    // line.
    let mut text = String::new();
    let mut prev_end: Option<usize> = None;
    for piece in group {
        match prev_end {
            Some(end)
                if source[end..piece.offset].chars().all(|c| c.is_whitespace())
                    && !source[end..piece.offset].contains("\n\n") =>
            {
                text.push_str(&source[end..piece.offset]);
            }
            Some(_) => text.push_str("\n\n"),
            None => {}
        }
        text.push_str(piece.text);
        prev_end = Some(piece.offset + piece.text.len());
    }

    let locator = if has_pages {
        Locator::Page { page: first.page }
    } else {
        Locator::Lines {
            start: first.first_line,
            end: last.last_line,
        }
    };

    Draft {
        offset: first.offset as u64,
        locator,
        heading_path: first.heading_path.clone(),
        text,
    }
}
