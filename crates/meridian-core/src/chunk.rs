//! Paragraph-boundary text chunker with overlap.
//!
//! Splits resource body text into [`Chunk`]s that respect a configurable
//! `chunk_size` (in approximate tokens) and repeat `chunk_overlap` tokens
//! of trailing context at the head of each chunk after the first, so a
//! span straddling a chunk boundary is still retrievable from either side.
//!
//! # Algorithm
//!
//! 1. Convert `chunk_size`/`chunk_overlap` to characters using a 4
//!    chars/token ratio (a proper tokenizer lives behind the model handle,
//!    outside this crate).
//! 2. Split text on `\n\n` paragraph boundaries.
//! 3. Accumulate paragraphs into a buffer until adding the next paragraph
//!    would exceed `max_chars`, then flush the buffer as a piece.
//! 4. If a single paragraph exceeds `max_chars`, hard-split it at the
//!    nearest newline or space boundary.
//! 5. Prefix each piece (after the first) with up to `overlap_chars` of
//!    trailing text from the previous piece.
//! 6. Guarantee at least one chunk per resource, even for empty text.

use crate::model::Chunk;

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Splits `text` into chunks of at most `chunk_size` tokens (approximated),
/// with `chunk_overlap` tokens of trailing context repeated at the start of
/// each chunk after the first. Returns chunks with contiguous indices
/// starting at 0; always returns at least one chunk.
pub fn chunk_text(resource_hash: &str, text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<Chunk> {
    let max_chars = chunk_size.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = chunk_overlap.min(chunk_size.saturating_sub(1)) * CHARS_PER_TOKEN;

    if text.is_empty() {
        return vec![make_chunk(resource_hash, 0, String::new())];
    }

    let pieces = split_into_pieces(text, max_chars);
    let mut chunks = Vec::with_capacity(pieces.len());
    let mut carry = String::new();
    for (index, piece) in pieces.into_iter().enumerate() {
        let full_text = if carry.is_empty() {
            piece.clone()
        } else {
            format!("{carry}\n\n{piece}")
        };
        carry = tail_chars(&piece, overlap_chars);
        chunks.push(make_chunk(resource_hash, index as u32, full_text));
    }
    chunks
}

/// Paragraph-accumulate `text` into size-bounded pieces, hard-splitting
/// any paragraph that alone exceeds `max_chars`.
fn split_into_pieces(text: &str, max_chars: usize) -> Vec<String> {
    let paragraphs: Vec<&str> = text.split("\n\n").collect();
    let mut pieces = Vec::new();
    let mut buf = String::new();

    for para in paragraphs {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if buf.is_empty() { trimmed.len() } else { buf.len() + 2 + trimmed.len() };
        if would_be > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if trimmed.len() > max_chars {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
            }
            pieces.extend(hard_split(trimmed, max_chars));
            continue;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(trimmed);
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }
    if pieces.is_empty() {
        pieces.push(text.trim().to_string());
    }
    pieces
}

/// Hard-splits an oversized paragraph at the nearest newline or space
/// boundary at or before `max_chars`, falling back to a char boundary.
fn hard_split(paragraph: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            pieces.push(remaining.to_string());
            break;
        }
        let window_end = snap_to_char_boundary(remaining, max_chars);
        let split_at = remaining[..window_end]
            .rfind('\n')
            .or_else(|| remaining[..window_end].rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(window_end);
        let split_at = snap_to_char_boundary(remaining, split_at);
        let split_at = if split_at == 0 {
            remaining.char_indices().nth(1).map(|(i, _)| i).unwrap_or(remaining.len())
        } else {
            split_at
        };
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = remaining[split_at..].trim_start();
    }
    pieces
}

/// Snaps a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// The last `n` characters of `s`, snapped to a char boundary.
fn tail_chars(s: &str, n: usize) -> String {
    if n == 0 || s.is_empty() {
        return String::new();
    }
    let start = snap_to_char_boundary(s, s.len().saturating_sub(n));
    s[start..].to_string()
}

fn make_chunk(resource_hash: &str, chunk_index: u32, text: String) -> Chunk {
    Chunk {
        resource_hash: resource_hash.to_string(),
        chunk_index,
        text,
        vector: None,
        metadata: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_text_yields_single_chunk() {
        let chunks = chunk_text("r1", "Hello, world!", 700, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn empty_text_yields_one_empty_chunk() {
        let chunks = chunk_text("r1", "", 700, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn multiple_paragraphs_under_limit_stay_one_chunk() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text("r1", text, 700, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("First paragraph."));
        assert!(chunks[0].text.contains("Third paragraph."));
    }

    #[test]
    fn multiple_paragraphs_exceeding_limit_split_with_contiguous_indices() {
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = chunk_text("r1", text, 5, 0);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as u32);
        }
    }

    #[test]
    fn chunk_indices_are_contiguous_for_many_paragraphs() {
        let text = (0..50).map(|i| format!("Paragraph number {i}.")).collect::<Vec<_>>().join("\n\n");
        let chunks = chunk_text("r1", &text, 10, 0);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as u32, "index mismatch at position {i}");
        }
    }

    #[test]
    fn multibyte_utf8_chars_do_not_panic() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let chunks = chunk_text("r1", text, 3, 0);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let a = chunk_text("r1", text, 5, 0);
        let b = chunk_text("r1", text, 5, 0);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.text, y.text);
            assert_eq!(x.chunk_index, y.chunk_index);
        }
    }

    #[test]
    fn overlap_repeats_trailing_context_in_the_next_chunk() {
        let paragraph = "word ".repeat(30);
        let text = vec![paragraph.clone(); 6].join("\n\n");
        let chunks = chunk_text("r1", &text, 10, 3);
        assert!(chunks.len() > 1);
        let first_piece_of_second = chunks[1].text.split("\n\n").next().unwrap();
        assert!(chunks[0].text.ends_with(first_piece_of_second) || chunks[0].text.contains(first_piece_of_second));
    }

    #[test]
    fn zero_chunk_size_does_not_panic() {
        let chunks = chunk_text("r1", "some text here", 0, 0);
        assert!(!chunks.is_empty());
    }
}
