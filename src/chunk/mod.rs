//! Fixed-window text chunking
//!
//! OCR text is split into windows of `size` characters that overlap by
//! `overlap` characters. Windows advance by `size - overlap`; the last one may
//! be shorter, and no window is emitted once one has reached the end of the
//! text. Offsets count Unicode scalar values, never bytes.

use crate::config::ChunkConfig;
use crate::error::{Error, Result};

/// A text chunk with its position in the source text
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// Verbatim slice of the source text
    pub text: String,

    /// Character start position in the source text
    pub char_start: usize,

    /// Character end position (exclusive)
    pub char_end: usize,

    /// Chunk index (0-based)
    pub index: usize,
}

/// Split `text` into overlapping windows
pub fn chunk_text(text: &str, config: &ChunkConfig) -> Result<Vec<TextChunk>> {
    if config.size == 0 || config.overlap >= config.size {
        return Err(Error::Config(
            "chunk.overlap must be < chunk.size".to_string(),
        ));
    }

    if text.is_empty() {
        return Ok(Vec::new());
    }

    // Byte offset of every char, plus the end of the text
    let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let char_len = offsets.len();
    offsets.push(text.len());

    let step = config.size - config.overlap;
    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + config.size).min(char_len);
        chunks.push(TextChunk {
            text: text[offsets[start]..offsets[end]].to_string(),
            char_start: start,
            char_end: end,
            index: chunks.len(),
        });

        if end == char_len {
            break;
        }
        start += step;
    }

    Ok(chunks)
}

/// Rebuild the source text from chunks produced with `overlap`
pub fn reassemble(chunks: &[TextChunk], overlap: usize) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push_str(&chunk.text);
        } else {
            out.extend(chunk.text.chars().skip(overlap));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChunkConfig {
        ChunkConfig {
            size: 1000,
            overlap: 200,
        }
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(chunk_text("", &config()).unwrap().is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("Kurzer Brief", &config()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Kurzer Brief");
        assert_eq!(chunks[0].char_start, 0);
        assert_eq!(chunks[0].char_end, 12);
    }

    #[test]
    fn test_2400_chars_gives_three_windows() {
        let text: String = (0..2400).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunks = chunk_text(&text, &config()).unwrap();

        assert_eq!(chunks.len(), 3);
        let starts: Vec<usize> = chunks.iter().map(|c| c.char_start).collect();
        assert_eq!(starts, vec![0, 800, 1600]);
        assert_eq!(chunks[0].text.chars().count(), 1000);
        assert_eq!(chunks[2].text.chars().count(), 800);
        assert_eq!(chunks[2].index, 2);

        assert_eq!(reassemble(&chunks, 200), text);
    }

    #[test]
    fn test_exact_window_is_one_chunk() {
        let text = "x".repeat(1000);
        assert_eq!(chunk_text(&text, &config()).unwrap().len(), 1);
    }

    #[test]
    fn test_multibyte_characters() {
        let text = "äöü€".repeat(700);
        let chunks = chunk_text(&text, &config()).unwrap();
        assert_eq!(chunks[0].text.chars().count(), 1000);
        assert_eq!(chunks[1].char_start, 800);
        assert_eq!(reassemble(&chunks, 200), text);
    }

    #[test]
    fn test_invalid_overlap_rejected() {
        let bad = ChunkConfig {
            size: 100,
            overlap: 100,
        };
        assert!(chunk_text("text", &bad).is_err());
    }
}
