//! Recursive separator-driven text splitting with stitched overlap.
//!
//! Text is cut on the first separator it contains, pieces that are still too
//! long are cut on the next separator, and once separators run out the piece
//! is cut every N characters. Neighbouring pieces are then packed greedily
//! into segments of at most `chunk_size - overlap` characters, and every
//! chunk after the first is prefixed with the last `overlap` characters of
//! the chunk before it. No chunk is longer than `chunk_size`. Segments that
//! are only whitespace are dropped, so a chunk can skip over such a run of
//! the input and is not always a contiguous slice of it.
//!
//! Lengths are counted in `char`s, never bytes.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk_size must be greater than zero")]
    ZeroChunkSize,
    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({chunk_size})")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },
}

#[derive(Debug, Clone)]
pub struct TextSplitter {
    separators: Vec<String>,
    chunk_size: usize,
    overlap: usize,
}

impl TextSplitter {
    /// Empty separators are ignored; the character cut is always the last resort.
    pub fn new(separators: Vec<String>, chunk_size: usize, overlap: usize) -> Result<Self, ChunkError> {
        if chunk_size == 0 {
            return Err(ChunkError::ZeroChunkSize);
        }
        if overlap >= chunk_size {
            return Err(ChunkError::OverlapTooLarge { chunk_size, overlap });
        }
        Ok(Self {
            separators: separators.into_iter().filter(|s| !s.is_empty()).collect(),
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn separators(&self) -> &[String] {
        &self.separators
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        if char_len(text) <= self.chunk_size {
            return vec![text.to_string()];
        }

        let budget = self.chunk_size - self.overlap;
        let mut pieces = Vec::new();
        split_recursive(text, &self.separators, budget, &mut pieces);
        stitch(pack(&pieces, budget), self.overlap)
    }
}

/// One-shot form of [`TextSplitter::split`].
pub fn split(
    text: &str,
    separators: &[String],
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<String>, ChunkError> {
    Ok(TextSplitter::new(separators.to_vec(), chunk_size, overlap)?.split(text))
}

fn split_recursive<'a>(text: &'a str, separators: &[String], budget: usize, out: &mut Vec<&'a str>) {
    if char_len(text) <= budget {
        out.push(text);
        return;
    }
    match separators.iter().position(|sep| text.contains(sep.as_str())) {
        Some(i) => {
            let remaining = &separators[i + 1..];
            for piece in split_keep_start(text, &separators[i]) {
                if char_len(piece) <= budget {
                    out.push(piece);
                } else {
                    split_recursive(piece, remaining, budget, out);
                }
            }
        }
        None => hard_cut(text, budget, out),
    }
}

/// Splits before every occurrence of `sep`, so the pieces concatenate back
/// to `text` and each separator leads the piece that follows it.
fn split_keep_start<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(sep) {
        if idx > start {
            pieces.push(&text[start..idx]);
            start = idx;
        }
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn hard_cut<'a>(text: &'a str, width: usize, out: &mut Vec<&'a str>) {
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == width {
            out.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
}

fn pack(pieces: &[&str], budget: usize) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for piece in pieces {
        let len = char_len(piece);
        if current_len > 0 && current_len + len > budget {
            segments.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(piece);
        current_len += len;
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

fn stitch(segments: Vec<String>, overlap: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::with_capacity(segments.len());
    for segment in segments {
        if segment.trim().is_empty() {
            continue;
        }
        let chunk = match chunks.last() {
            Some(prev) if overlap > 0 => {
                let mut chunk = tail_chars(prev, overlap).to_string();
                chunk.push_str(&segment);
                chunk
            }
            _ => segment,
        };
        chunks.push(chunk);
    }
    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn tail_chars(s: &str, n: usize) -> &str {
    let len = char_len(s);
    if len <= n {
        return s;
    }
    let start = s
        .char_indices()
        .nth(len - n)
        .map(|(idx, _)| idx)
        .unwrap_or(s.len());
    &s[start..]
}
