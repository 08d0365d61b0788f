use crate::document::{Metadata, RawDocument};
use crate::error::ConfigError;
use std::ops::Range;

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// A bounded slice of a document's text; the unit that gets embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// The actual text content of this chunk
    pub content: String,
    /// Parent metadata plus `chunk_index`, `char_start` and `char_end`
    pub metadata: Metadata,
}

/// Splits documents into overlapping character windows.
///
/// Sizes are counted in characters, not bytes. Each window ends on the last
/// paragraph break, sentence end or word boundary in its upper part, and the
/// next window starts `overlap` characters before that end.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Chunker {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl Chunker {
    pub fn new(size: usize, overlap: usize) -> Result<Self, ConfigError> {
        if size == 0 {
            return Err(ConfigError::Invalid {
                key: "CHUNK_SIZE",
                value: size.to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if overlap >= size {
            return Err(ConfigError::Invalid {
                key: "CHUNK_OVERLAP",
                value: overlap.to_string(),
                reason: format!("must be smaller than the chunk size {}", size),
            });
        }
        Ok(Chunker { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split every document, keeping document order and chunk order.
    pub fn chunk(&self, documents: &[RawDocument]) -> Vec<Chunk> {
        documents
            .iter()
            .flat_map(|document| self.chunk_document(document))
            .collect()
    }

    pub fn chunk_document(&self, document: &RawDocument) -> Vec<Chunk> {
        let chars: Vec<char> = document.content.chars().collect();

        self.windows(&chars)
            .into_iter()
            .enumerate()
            .map(|(index, window)| {
                let mut metadata = document.metadata.clone();
                metadata.insert("chunk_index", index);
                metadata.insert("char_start", window.start);
                metadata.insert("char_end", window.end);
                Chunk {
                    content: chars[window].iter().collect(),
                    metadata,
                }
            })
            .collect()
    }

    /// Character ranges of the chunks for `chars`.
    fn windows(&self, chars: &[char]) -> Vec<Range<usize>> {
        let len = chars.len();
        let mut windows = Vec::new();
        let mut start = 0;

        loop {
            let hard_end = start + self.size;
            if hard_end >= len {
                windows.push(start..len);
                return windows;
            }

            let end = self.break_point(chars, start, hard_end);
            windows.push(start..end);
            start = end - self.overlap;
        }
    }

    /// Pick where the window starting at `start` ends.
    ///
    /// The result is always above `start + overlap`, so the next window
    /// starts strictly after this one.
    fn break_point(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let floor = start + (self.overlap + 1).max(self.size / 2);
        let candidates = floor..=hard_end;

        let paragraph = |end: usize| end >= 2 && chars[end - 2] == '\n' && chars[end - 1] == '\n';
        let sentence = |end: usize| {
            let last = chars[end - 1];
            last == '\n'
                || (matches!(last, '.' | '!' | '?')
                    && chars.get(end).map_or(true, |next| next.is_whitespace()))
        };
        let word = |end: usize| {
            chars[end - 1].is_whitespace() || chars.get(end).map_or(true, |c| c.is_whitespace())
        };

        candidates
            .clone()
            .rev()
            .find(|&end| paragraph(end))
            .or_else(|| candidates.clone().rev().find(|&end| sentence(end)))
            .or_else(|| candidates.rev().find(|&end| word(end)))
            .unwrap_or(hard_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(source: &str, content: &str) -> RawDocument {
        RawDocument {
            content: content.to_string(),
            metadata: Metadata::new(source).with("mime_type", "text/plain"),
        }
    }

    fn no_boundaries(len: usize) -> String {
        (0..len).map(|i| (b'a' + (i % 26) as u8) as char).collect()
    }

    fn assert_overlaps(chunks: &[Chunk], overlap: usize) {
        for pair in chunks.windows(2) {
            let first: Vec<char> = pair[0].content.chars().collect();
            let second: Vec<char> = pair[1].content.chars().collect();
            assert_eq!(
                first[first.len() - overlap..],
                second[..overlap],
                "adjacent chunks must share exactly {} characters",
                overlap
            );
        }
    }

    #[test]
    fn test_rejects_invalid_sizes() {
        assert!(Chunker::new(0, 0).is_err());
        assert!(Chunker::new(100, 100).is_err());
        assert!(Chunker::new(100, 150).is_err());
        assert!(Chunker::new(100, 99).is_ok());
    }

    #[test]
    fn test_short_document_is_one_chunk() {
        let doc = document("short.txt", "A short note.");
        let chunks = Chunker::default().chunk(&[doc.clone()]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, doc.content);
        assert_eq!(chunks[0].metadata.source, "short.txt");
        assert_eq!(chunks[0].metadata.get("chunk_index"), Some(&0.into()));
    }

    #[test]
    fn test_hard_cuts_slide_by_size_minus_overlap() {
        let text = no_boundaries(1200);
        let chunks = Chunker::default().chunk(&[document("notes.txt", &text)]);

        assert_eq!(chunks.len(), 3);
        let ranges: Vec<(u64, u64)> = chunks
            .iter()
            .map(|c| {
                (
                    c.metadata.get("char_start").unwrap().as_u64().unwrap(),
                    c.metadata.get("char_end").unwrap().as_u64().unwrap(),
                )
            })
            .collect();
        assert_eq!(ranges, vec![(0, 500), (400, 900), (800, 1200)]);
        assert_eq!(chunks[1].content, text[400..900]);
        assert_overlaps(&chunks, 100);
    }

    #[test]
    fn test_prefers_paragraph_breaks() {
        let first = "word ".repeat(70);
        let second = "more ".repeat(70);
        let text = format!("{}\n\n{}", first.trim_end(), second.trim_end());
        let chunker = Chunker::new(400, 50).unwrap();

        let chunks = chunker.chunk(&[document("p.txt", &text)]);
        assert!(chunks[0].content.ends_with("word\n\n"));
        assert_overlaps(&chunks, 50);
    }

    #[test]
    fn test_prefers_sentence_over_word() {
        let text = format!("{} End of sentence. {}", "x ".repeat(60), "y ".repeat(60));
        let chunker = Chunker::new(150, 20).unwrap();

        let chunks = chunker.chunk(&[document("s.txt", &text)]);
        assert!(chunks[0].content.ends_with("sentence."));
        assert_overlaps(&chunks, 20);
    }

    #[test]
    fn test_bounds_hold_for_mixed_text() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. \
                    Sed do eiusmod tempor incididunt ut labore et dolore magna aliqua.\n\n"
            .repeat(40);
        let docs = vec![
            document("a.txt", &text),
            document("b.txt", "tiny"),
            document("c.txt", &no_boundaries(3000)),
        ];
        let chunker = Chunker::new(300, 60).unwrap();
        let chunks = chunker.chunk(&docs);

        assert!(chunks.len() >= docs.len());
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= 300);
        }
        for source in ["a.txt", "c.txt"] {
            let same: Vec<Chunk> = chunks
                .iter()
                .filter(|c| c.metadata.source == source)
                .cloned()
                .collect();
            assert!(same.len() > 1);
            assert_overlaps(&same, 60);
        }
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let text = "é".repeat(700);
        let chunks = Chunker::default().chunk(&[document("u.txt", &text)]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content.chars().count(), 500);
        assert_eq!(chunks[1].content.chars().count(), 300);
    }

    #[test]
    fn test_metadata_is_inherited() {
        let chunks = Chunker::new(10, 2)
            .unwrap()
            .chunk(&[document("m.txt", "abcdefghijklmnopqrstuvwxyz")]);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.metadata.source, "m.txt");
            assert_eq!(chunk.metadata.get("mime_type"), Some(&"text/plain".into()));
            assert_eq!(chunk.metadata.get("chunk_index"), Some(&i.into()));
        }
    }
}
