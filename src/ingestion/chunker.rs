//! Fixed-size overlapping chunker.
//!
//! Documents are normalized and split into chunks of `target_chars`
//! characters, with consecutive chunks sharing `overlap_chars` characters so
//! sentences straddling a boundary stay retrievable from both sides. The
//! split is reversible: the first chunk plus each later chunk minus its
//! overlap prefix reproduces the normalized text exactly.

use crate::config::ChunkingConfig;

/// One slice of a document's normalized text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Zero-based position of this chunk within the document.
    pub ordinal: usize,
    /// Character offset where the chunk starts.
    pub start_char: usize,
    /// Character offset one past the chunk's end.
    pub end_char: usize,
    /// The chunk text.
    pub text: String,
}

/// Splits normalized text into overlapping fixed-size chunks.
#[derive(Clone, Debug, Default)]
pub struct TextChunker {
    config: ChunkingConfig,
}

impl TextChunker {
    #[must_use]
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Normalize raw extracted text before chunking.
    ///
    /// Line endings collapse to `\n` and trailing whitespace is trimmed.
    /// Interior whitespace is preserved so chunk reconstruction stays exact.
    #[must_use]
    pub fn normalize(text: &str) -> String {
        text.replace("\r\n", "\n").trim_end().to_string()
    }

    /// Split text into chunks. The input is expected to be normalized; the
    /// output is empty for empty input.
    ///
    /// Offsets are counted in characters, not bytes, so multi-byte text
    /// chunks at the same visual positions as ASCII.
    #[must_use]
    pub fn chunk(&self, text: &str) -> Vec<ChunkSpan> {
        if text.is_empty() {
            return Vec::new();
        }

        // Byte offset of every char boundary, plus the end sentinel.
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(byte, _)| byte)
            .chain(std::iter::once(text.len()))
            .collect();
        let total_chars = boundaries.len() - 1;

        let target = self.config.target_chars;
        let step = self.config.step();

        let mut spans = Vec::new();
        let mut start = 0usize;
        loop {
            let end = (start + target).min(total_chars);
            spans.push(ChunkSpan {
                ordinal: spans.len(),
                start_char: start,
                end_char: end,
                text: text[boundaries[start]..boundaries[end]].to_string(),
            });
            if end == total_chars {
                break;
            }
            start += step;
        }
        spans
    }

    /// Rebuild the normalized source text from its chunks.
    ///
    /// Inverse of [`TextChunker::chunk`]: the overlap prefix of every chunk
    /// after the first is dropped. Chunks must be passed in ordinal order.
    #[must_use]
    pub fn reconstruct(&self, spans: &[ChunkSpan]) -> String {
        let overlap = self.config.overlap_chars;
        let mut out = String::new();
        for (idx, span) in spans.iter().enumerate() {
            if idx == 0 {
                out.push_str(&span.text);
            } else {
                out.extend(span.text.chars().skip(overlap));
            }
        }
        out
    }
}
