use crate::config::ChunkingConfig;
use crate::types::OffsetSpan;

#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub index: usize,
    pub text: String,
    pub heading: Option<String>,
    /// Byte span of `text` inside the source document.
    pub span: OffsetSpan,
}

/// Splits documents into overlapping chunks, preferring paragraph, sentence,
/// line and word breaks in that order. Every span sits on UTF-8 char
/// boundaries and `&document[span.start..span.end] == chunk.text`.
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    min_chunk_size: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize, min_chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
            min_chunk_size,
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap, config.min_chunk_size)
    }

    pub fn chunk(&self, text: &str) -> Vec<ChunkResult> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        if text.len() <= self.chunk_size {
            return vec![ChunkResult {
                index: 0,
                text: text.to_string(),
                heading: self.extract_heading(text),
                span: OffsetSpan::new(0, text.len()),
            }];
        }

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < text.len() {
            let end = snap_to_char_boundary(text, start + self.chunk_size);

            let mut actual_end = if end < text.len() {
                self.find_break_point(text, start, end)
            } else {
                end
            };
            if actual_end <= start {
                actual_end = next_char_boundary(text, end.max(start + 1));
            }

            let chunk_text = &text[start..actual_end];
            if chunk_text.len() >= self.min_chunk_size && !chunk_text.trim().is_empty() {
                chunks.push(ChunkResult {
                    index: chunks.len(),
                    text: chunk_text.to_string(),
                    heading: self.extract_heading(chunk_text),
                    span: OffsetSpan::new(start, actual_end),
                });
            }

            if actual_end >= text.len() {
                break;
            }

            let len = actual_end - start;
            let step = if len > self.chunk_overlap {
                len - self.chunk_overlap
            } else {
                len
            };
            let next = snap_to_char_boundary(text, start + step);
            start = if next > start { next } else { actual_end };
        }

        chunks
    }

    fn find_break_point(&self, text: &str, start: usize, preferred_end: usize) -> usize {
        let search_start = snap_to_char_boundary(text, preferred_end.saturating_sub(200).max(start));
        let safe_end = snap_to_char_boundary(text, preferred_end);

        if search_start >= safe_end {
            return safe_end;
        }

        let search_region = &text[search_start..safe_end];

        // paragraph > sentence > line > word
        let found = search_region
            .rfind("\n\n")
            .map(|pos| pos + 2)
            .or_else(|| search_region.rfind(". ").map(|pos| pos + 2))
            .or_else(|| search_region.rfind(".\n").map(|pos| pos + 2))
            .or_else(|| search_region.rfind('\n').map(|pos| pos + 1))
            .or_else(|| search_region.rfind(' ').map(|pos| pos + 1));

        match found {
            Some(offset) if search_start + offset > start => search_start + offset,
            _ => safe_end,
        }
    }

    fn extract_heading(&self, text: &str) -> Option<String> {
        let first_line = text.trim_start().lines().next()?;
        if first_line.starts_with('#') {
            Some(first_line.trim_start_matches('#').trim().to_string())
        } else {
            None
        }
    }
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::from_config(&ChunkingConfig::default())
    }
}

/// Round `pos` down to a char boundary, clamped to `text.len()`.
fn snap_to_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut p = pos;
    while p > 0 && !text.is_char_boundary(p) {
        p -= 1;
    }
    p
}

/// Round `pos` up to a char boundary, clamped to `text.len()`.
fn next_char_boundary(text: &str, pos: usize) -> usize {
    let mut p = pos.min(text.len());
    while p < text.len() && !text.is_char_boundary(p) {
        p += 1;
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_spans_slice_back(text: &str, chunks: &[ChunkResult]) {
        for chunk in chunks {
            assert_eq!(&text[chunk.span.start..chunk.span.end], chunk.text);
        }
    }

    #[test]
    fn test_short_document_is_one_chunk() {
        let chunker = TextChunker::default();
        let chunks = chunker.chunk("# Auth\nModule X handles authentication.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading.as_deref(), Some("Auth"));
        assert!(chunker.chunk("   \n ").is_empty());
    }

    #[test]
    fn test_long_document_overlaps_and_covers_text() {
        let sentence = "Module X handles authentication for every request. ";
        let text = sentence.repeat(60);
        let chunker = TextChunker::new(800, 200, 50);
        let chunks = chunker.chunk(&text);

        assert!(chunks.len() > 3);
        assert_spans_slice_back(&text, &chunks);
        assert_eq!(chunks[0].span.start, 0);
        assert_eq!(chunks.last().unwrap().span.end, text.len());
        for pair in chunks.windows(2) {
            assert!(pair[1].span.start < pair[0].span.end, "chunks overlap");
            assert!(pair[1].span.start > pair[0].span.start, "chunks advance");
        }
        for chunk in &chunks {
            assert!(chunk.text.len() <= 800);
        }
    }

    #[test]
    fn test_multibyte_text_stays_on_boundaries() {
        let text = "Résumé über café naïve façade. ".repeat(50);
        let chunker = TextChunker::new(97, 13, 1);
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 1);
        assert_spans_slice_back(&text, &chunks);
    }

    #[test]
    fn test_unbroken_text_still_progresses() {
        let text = "x".repeat(1000);
        let chunks = TextChunker::new(300, 100, 1).chunk(&text);
        assert_spans_slice_back(&text, &chunks);
        assert_eq!(chunks.last().unwrap().span.end, 1000);
    }
}
