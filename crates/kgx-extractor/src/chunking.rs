//! Paragraph- and sentence-aware chunking with overlap
//!
//! The normalized document is partitioned into segments: paragraphs, and
//! for paragraphs longer than the size bound, sentence-level pieces of them.
//! Blank-line separators belong to the start of the following paragraph, so
//! segments tile the document exactly and every segment holds content.
//! Chunks are runs of consecutive segments, and consecutive chunks share
//! whole trailing segments as overlap. A chunk that starts a paragraph
//! therefore begins with the separator whitespace, which counts toward its
//! length.
//!
//! All sizes and offsets are in characters.

use crate::config::ExtractorConfig;
use crate::error::ExtractorError;
use kgx_domain::Chunk;
use std::ops::Range;

/// Characters that end a sentence
const SENTENCE_ENDINGS: &[char] = &['。', '！', '？', '；', '…', '.', '!', '?', ';'];

/// Characters a piece may be cut after when no sentence ending is in reach
const SOFT_BOUNDARIES: &[char] = &[' ', '\n', '\t', '，', '、', ',', ':', '：'];

/// Normalize line endings to `\n` and trim surrounding whitespace
pub fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// Splits documents into overlapping chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_chunk_size: usize,
    overlap_size: usize,
}

impl Chunker {
    /// Create a chunker
    ///
    /// `max_chunk_size` must be positive and `overlap_size` smaller than it.
    pub fn new(max_chunk_size: usize, overlap_size: usize) -> Result<Self, ExtractorError> {
        if max_chunk_size == 0 {
            return Err(ExtractorError::Config(
                "max_chunk_size must be greater than 0".to_string(),
            ));
        }
        if overlap_size >= max_chunk_size {
            return Err(ExtractorError::Config(format!(
                "overlap_size ({}) must be smaller than max_chunk_size ({})",
                overlap_size, max_chunk_size
            )));
        }
        Ok(Self {
            max_chunk_size,
            overlap_size,
        })
    }

    /// Create a chunker from extractor configuration
    pub fn from_config(config: &ExtractorConfig) -> Result<Self, ExtractorError> {
        Self::new(config.max_chunk_size, config.overlap_size)
    }

    /// Maximum chunk size in characters
    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Target overlap in characters
    pub fn overlap_size(&self) -> usize {
        self.overlap_size
    }

    /// Chunk a document
    ///
    /// The text is normalized first; offsets in the returned chunks refer to
    /// [`normalize`]d text. Empty or whitespace-only input yields no chunks.
    ///
    /// # Examples
    ///
    /// ```
    /// use kgx_extractor::Chunker;
    ///
    /// let chunker = Chunker::new(30, 0).unwrap();
    /// let chunks = chunker.chunk("First paragraph.\n\nSecond paragraph.");
    /// assert_eq!(chunks.len(), 2);
    /// assert_eq!(chunks[0].text, "First paragraph.");
    /// assert_eq!(chunks[1].text.trim(), "Second paragraph.");
    /// ```
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = normalize(text).chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }
        if chars.len() <= self.max_chunk_size {
            return vec![make_chunk(&chars, 0, 0..chars.len())];
        }

        let segments = self.segments(&chars);
        self.assemble(&chars, &segments)
    }

    /// Partition the document into paragraph and sentence segments
    fn segments(&self, chars: &[char]) -> Vec<Range<usize>> {
        let mut segments = Vec::new();
        for paragraph in paragraphs(chars) {
            let mut start = paragraph.start;
            while paragraph.end - start > self.max_chunk_size {
                let cut = self.find_cut(chars, start, paragraph.end);
                segments.push(start..cut);
                start = cut;
            }
            if start < paragraph.end {
                segments.push(start..paragraph.end);
            }
        }
        absorb_blank(chars, segments)
    }

    /// Pick the end of the next piece of an over-long paragraph
    ///
    /// Searches backward from the size bound through the second half of the
    /// window: sentence endings first, then soft boundaries, then a hard cut.
    /// A piece always contains at least one non-whitespace character.
    fn find_cut(&self, chars: &[char], start: usize, end: usize) -> usize {
        let ideal = start + self.max_chunk_size;
        let first_content = (start..end)
            .find(|&i| !chars[i].is_whitespace())
            .unwrap_or(start);

        // Leading whitespace longer than the bound: take it with one character.
        if first_content >= ideal {
            return first_content + 1;
        }

        let lower = (start + self.max_chunk_size / 2).max(first_content + 1);
        let search = || (lower..=ideal).rev();

        search()
            .find(|&k| SENTENCE_ENDINGS.contains(&chars[k - 1]))
            .or_else(|| search().find(|&k| SOFT_BOUNDARIES.contains(&chars[k - 1])))
            .unwrap_or(ideal)
    }

    /// Greedily pack segments into chunks and step back for overlap
    fn assemble(&self, chars: &[char], segments: &[Range<usize>]) -> Vec<Chunk> {
        let len = |i: usize| segments[i].len();
        let mut chunks = Vec::new();
        let mut first = 0;

        loop {
            let mut last = first;
            let mut total = len(first);
            while last + 1 < segments.len() && total + len(last + 1) <= self.max_chunk_size {
                last += 1;
                total += len(last);
            }

            chunks.push(make_chunk(
                chars,
                chunks.len(),
                segments[first].start..segments[last].end,
            ));

            if last + 1 == segments.len() {
                break;
            }
            first = self.next_start(segments, first, last);
        }

        chunks
    }

    /// First segment of the chunk following `first..=last`
    ///
    /// Walks back from `last` while the overlap is below target, keeping room
    /// for the first new segment. Always returns an index past `first`.
    fn next_start(&self, segments: &[Range<usize>], first: usize, last: usize) -> usize {
        let following = segments[last + 1].len();
        let mut next = last + 1;
        let mut overlap = 0;

        while overlap < self.overlap_size && next - 1 > first {
            let candidate = segments[next - 1].len();
            if overlap + candidate + following > self.max_chunk_size {
                break;
            }
            overlap += candidate;
            next -= 1;
        }

        next
    }
}

impl Default for Chunker {
    fn default() -> Self {
        let config = ExtractorConfig::default();
        Self {
            max_chunk_size: config.max_chunk_size,
            overlap_size: config.overlap_size,
        }
    }
}

/// Paragraph ranges of a trimmed document
///
/// A paragraph boundary sits at the start of every whitespace run that holds
/// at least two line breaks, so each paragraph ends on content and the run
/// leads the paragraph after it.
fn paragraphs(chars: &[char]) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        if !chars[i].is_whitespace() {
            i += 1;
            continue;
        }
        let run_start = i;
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        let breaks = chars[run_start..i].iter().filter(|&&c| c == '\n').count();
        if breaks >= 2 && i < chars.len() {
            ranges.push(start..run_start);
            start = run_start;
        }
    }

    ranges.push(start..chars.len());
    ranges
}

/// Fold whitespace-only segments into the next segment, or the previous one
/// when they trail the document
fn absorb_blank(chars: &[char], segments: Vec<Range<usize>>) -> Vec<Range<usize>> {
    let mut merged: Vec<Range<usize>> = Vec::with_capacity(segments.len());
    let mut blank: Option<Range<usize>> = None;

    for segment in segments {
        if chars[segment.clone()].iter().all(|c| c.is_whitespace()) {
            blank = Some(match blank {
                Some(run) => run.start..segment.end,
                None => segment,
            });
            continue;
        }
        let start = blank.take().map_or(segment.start, |run| run.start);
        merged.push(start..segment.end);
    }

    if let Some(run) = blank {
        match merged.last_mut() {
            Some(last) => last.end = run.end,
            None => merged.push(run),
        }
    }
    merged
}

fn make_chunk(chars: &[char], index: usize, range: Range<usize>) -> Chunk {
    let text: String = chars[range.clone()].iter().collect();
    Chunk::new(index, text, range.start, range.end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Rebuild the document by dropping each chunk's overlap with its predecessor
    fn rebuild(chunks: &[Chunk]) -> String {
        let mut out = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let skip = if i == 0 {
                0
            } else {
                chunks[i - 1].overlap_with(chunk)
            };
            out.extend(chunk.text.chars().skip(skip));
        }
        out
    }

    fn trimmed(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.trim()).collect()
    }

    #[test]
    fn test_rejects_invalid_bounds() {
        assert!(Chunker::new(0, 0).is_err());
        assert!(Chunker::new(10, 10).is_err());
        assert!(Chunker::new(10, 9).is_ok());
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        let chunker = Chunker::default();
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("  \n\n\t \r\n ").is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunker = Chunker::new(100, 10).unwrap();
        let chunks = chunker.chunk("  Short text here.\r\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Short text here.");
        assert_eq!(chunks[0].index, 0);
        assert_eq!((chunks[0].start, chunks[0].end), (0, 16));
    }

    #[test]
    fn test_normalize_line_endings() {
        assert_eq!(normalize("a\r\nb\rc\n"), "a\nb\nc");
    }

    #[test]
    fn test_paragraphs_packed_greedily() {
        let chunker = Chunker::new(25, 0).unwrap();
        let text = "Paragraph1\n\nParagraph2\n\nParagraph3\n\nParagraph4";
        let chunks = chunker.chunk(text);

        assert_eq!(
            trimmed(&chunks),
            vec!["Paragraph1\n\nParagraph2", "Paragraph3\n\nParagraph4"]
        );
        assert_eq!(rebuild(&chunks), text);
    }

    #[test]
    fn test_blank_line_with_spaces_separates_paragraphs() {
        let chunker = Chunker::new(15, 0).unwrap();
        let chunks = chunker.chunk("Paragraph1\n  \t\nParagraph2");
        assert_eq!(trimmed(&chunks), vec!["Paragraph1", "Paragraph2"]);
    }

    #[test]
    fn test_overlap_shares_whole_segments() {
        let chunker = Chunker::new(25, 5).unwrap();
        let text = "Paragraph1\n\nParagraph2\n\nParagraph3\n\nParagraph4";
        let chunks = chunker.chunk(text);

        assert_eq!(
            trimmed(&chunks),
            vec![
                "Paragraph1\n\nParagraph2",
                "Paragraph2\n\nParagraph3",
                "Paragraph3\n\nParagraph4",
            ]
        );
        for pair in chunks.windows(2) {
            assert!(pair[0].overlap_with(&pair[1]) >= 5);
        }
        assert_eq!(rebuild(&chunks), text);
    }

    #[test]
    fn test_long_paragraph_splits_at_sentences() {
        let chunker = Chunker::new(20, 0).unwrap();
        let text = "First sentence. Second sentence. Third sentence.";
        let chunks = chunker.chunk(text);

        assert_eq!(
            trimmed(&chunks),
            vec!["First sentence.", "Second sentence.", "Third sentence."]
        );
        assert_eq!(rebuild(&chunks), text);
    }

    #[test]
    fn test_cjk_sentence_endings() {
        let chunker = Chunker::new(5, 0).unwrap();
        let chunks = chunker.chunk("甲乙丙。丁戊己。庚辛壬。");
        assert_eq!(trimmed(&chunks), vec!["甲乙丙。", "丁戊己。", "庚辛壬。"]);
        assert_eq!(chunks[1].start, 4);
        assert_eq!(chunks[1].char_len(), 4);
    }

    #[test]
    fn test_soft_boundary_fallback() {
        let chunker = Chunker::new(12, 0).unwrap();
        let chunks = chunker.chunk("alpha beta gamma delta epsilon zeta");

        assert_eq!(
            trimmed(&chunks),
            vec!["alpha beta", "gamma delta", "epsilon zeta"]
        );
        assert!(chunks.iter().all(|c| c.char_len() <= 12));
    }

    #[test]
    fn test_hard_cut_without_boundaries() {
        let chunker = Chunker::new(20, 5).unwrap();
        let text = "a".repeat(100);
        let chunks = chunker.chunk(&text);

        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|c| c.char_len() == 20));
        assert_eq!(rebuild(&chunks), text);
    }

    #[test]
    fn test_overlap_never_stalls_on_oversized_neighbours() {
        // Each piece nearly fills a chunk, so no overlap fits; progress continues.
        let chunker = Chunker::new(10, 9).unwrap();
        let text = "abcdefghi. abcdefghi. abcdefghi. abcdefghi.";
        let chunks = chunker.chunk(text);

        assert!(chunks.len() >= 4);
        assert_eq!(rebuild(&chunks), text);
        for pair in chunks.windows(2) {
            assert!(pair[1].start > pair[0].start);
        }
    }

    #[test]
    fn test_offsets_are_characters() {
        let chunker = Chunker::new(9, 0).unwrap();
        let text = "知识图谱构建。\n\n实体关系抽取。";
        let chunks = chunker.chunk(text);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].end, 7);
        assert_eq!(chunks[1].start, 7);
        assert_eq!(chunks[1].text, "\n\n实体关系抽取。");
    }

    #[test]
    fn test_separator_leads_split_paragraph() {
        let chunker = Chunker::new(10, 0).unwrap();
        let text = "aaaaaaaaaa\n\naaaaaaaaaa。";
        let chunks = chunker.chunk(text);

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["aaaaaaaaaa", "\n\naaaaaaaa", "aa。"]);
        assert_eq!(rebuild(&chunks), text);
    }

    #[test]
    fn test_no_blank_chunks_with_default_bounds() {
        let chunker = Chunker::default();
        let paragraph = format!("{}。", "知".repeat(798));
        let text = [paragraph.as_str(); 3].join("\n\n");
        let chunks = chunker.chunk(&text);

        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(!chunk.text.trim().is_empty(), "blank chunk {}", chunk.index);
            assert!(chunk.char_len() <= chunker.max_chunk_size());
        }
        assert_eq!(rebuild(&chunks), text);
    }

    #[test]
    fn test_absorb_blank_segments() {
        let chars: Vec<char> = "ab  cd  ".chars().collect();
        assert_eq!(
            absorb_blank(&chars, vec![0..2, 2..4, 4..6, 6..8]),
            vec![0..2, 2..8]
        );
        assert_eq!(absorb_blank(&chars[2..4], vec![0..2]), vec![0..2]);
    }

    fn document() -> impl Strategy<Value = String> {
        let word = "[a-z]{1,12}";
        let sep = prop::sample::select(vec![" ", ". ", "\n", "\n\n", "。", ", "]);
        prop::collection::vec((word, sep), 0..120).prop_map(|parts| {
            parts
                .into_iter()
                .map(|(w, s)| format!("{}{}", w, s))
                .collect::<String>()
        })
    }

    proptest! {
        #[test]
        fn prop_chunks_cover_document(
            text in document(),
            max in 10usize..120,
            overlap_ratio in 0.0f64..0.9,
        ) {
            let overlap = ((max as f64) * overlap_ratio) as usize;
            let chunker = Chunker::new(max, overlap).unwrap();
            let chunks = chunker.chunk(&text);

            prop_assert_eq!(rebuild(&chunks), normalize(&text));
        }

        #[test]
        fn prop_chunks_bounded_nonempty_and_ordered(
            text in document(),
            max in 10usize..120,
            overlap_ratio in 0.0f64..0.9,
        ) {
            let overlap = ((max as f64) * overlap_ratio) as usize;
            let chunker = Chunker::new(max, overlap).unwrap();
            let chunks = chunker.chunk(&text);
            let length = normalize(&text).chars().count();

            prop_assert!(chunks.len() <= length.max(1));
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index, i);
                prop_assert!(chunk.char_len() <= max);
                prop_assert!(!chunk.text.trim().is_empty());
                prop_assert_eq!(chunk.text.chars().count(), chunk.char_len());
            }
            for pair in chunks.windows(2) {
                prop_assert!(pair[1].start > pair[0].start);
                prop_assert!(pair[1].end > pair[0].end);
                prop_assert!(pair[1].start <= pair[0].end);
            }
            if let Some(last) = chunks.last() {
                prop_assert_eq!(last.end, length);
            }
        }
    }
}
