
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A chunk of document text ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// The chunk text
    pub content: String,
    /// Position of this chunk within the document
    pub chunk_index: usize,
    /// Offset of the first character, counted in chars
    pub start_char: usize,
}

/// Configuration for text chunking. Sizes are counted in characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length
    pub chunk_size: usize,
    /// Characters shared between adjacent chunks
    pub chunk_overlap: usize,
    /// Whether to end chunks at paragraph, line, sentence or word breaks when possible
    pub prefer_natural_breaks: bool,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            chunk_overlap: 48,
            prefer_natural_breaks: true,
        }
    }
}

/// Break candidates in order of preference. Candidates within a tier compete on position.
const BREAK_TIERS: &[&[&str]] = &[&["\n\n"], &["\n"], &[". ", "! ", "? "], &[" "]];

/// Split `text` into overlapping chunks of at most `chunk_size` characters
#[inline]
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Result<Vec<String>> {
    let config = ChunkingConfig {
        chunk_size,
        chunk_overlap,
        prefer_natural_breaks: true,
    };

    Ok(chunk_text(text, &config)?
        .into_iter()
        .map(|chunk| chunk.content)
        .collect())
}

/// Split `text` into chunks according to `config`.
///
/// Every chunk after the first starts `chunk_overlap` characters before the end of its
/// predecessor, so concatenating the chunks with the overlaps removed gives back the input.
/// The last chunk holds whatever remains and may be short. Empty input yields no chunks.
#[inline]
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Result<Vec<TextChunk>> {
    let size = config.chunk_size;
    let overlap = config.chunk_overlap;

    if size == 0 {
        bail!("chunk_size must be greater than zero");
    }
    if overlap >= size {
        bail!(
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            overlap,
            size
        );
    }
    if text.is_empty() {
        return Ok(Vec::new());
    }

    // Byte offset of every char boundary, including the end of the text
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = offsets.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let hard_end = (start + size).min(total_chars);
        let end = if hard_end < total_chars && config.prefer_natural_breaks {
            find_break(text, &offsets, start, hard_end, overlap, size).unwrap_or(hard_end)
        } else {
            hard_end
        };

        chunks.push(TextChunk {
            content: text[offsets[start]..offsets[end]].to_string(),
            chunk_index: chunks.len(),
            start_char: start,
        });

        if end == total_chars {
            break;
        }
        start = end - overlap;
    }

    debug!(
        "Split {} characters into {} chunks (size {}, overlap {})",
        total_chars,
        chunks.len(),
        size,
        overlap
    );

    Ok(chunks)
}

/// Find the char index just past the best natural break in `[start, hard_end]`.
///
/// The result keeps at least half a chunk and always moves past the overlap, so the
/// next chunk starts strictly after `start`.
fn find_break(
    text: &str,
    offsets: &[usize],
    start: usize,
    hard_end: usize,
    overlap: usize,
    size: usize,
) -> Option<usize> {
    let min_end = start + (overlap + 1).max(size / 2);
    let window_start = offsets[start];
    let window = &text[window_start..offsets[hard_end]];

    for tier in BREAK_TIERS {
        let best = tier
            .iter()
            .filter_map(|separator| {
                window
                    .rfind(separator)
                    .map(|pos| window_start + pos + separator.len())
            })
            .max();

        if let Some(end_byte) = best {
            // separators are ASCII so this is always a char boundary
            if let Ok(end_char) = offsets.binary_search(&end_byte) {
                if end_char >= min_end {
                    return Some(end_char);
                }
            }
        }
    }

    None
}
