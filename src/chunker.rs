//! Section-aware, overlap-preserving text chunker.
//!
//! Splits extracted document text into [`TextChunk`]s bounded by a word
//! budget. Header-like lines partition the text into sections first; within
//! a section, blank-line paragraphs are accumulated until the budget is
//! reached, and each new chunk is seeded with the tail words of the previous
//! one so consecutive chunks share retrieval context.
//!
//! Chunking is pure and deterministic: identical input and parameters yield
//! identical chunk lists, including ids (UUIDv5 over index and content hash).
//!
//! For PDF sources, [`assign_pages`] back-maps chunks onto per-page text via
//! word-set similarity. This is best effort; chunks that never clear the
//! similarity threshold keep their page and coordinates unset.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Rect, TextChunk};

/// Word-budget parameters for chunking, measured in whitespace-delimited
/// words. `chunk_overlap` is clamped below `chunk_size` defensively; config
/// validation normally does this first.
#[derive(Debug, Clone, Copy)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkParams {
    fn effective_overlap(&self) -> usize {
        self.chunk_overlap.min(self.chunk_size.saturating_sub(1))
    }
}

/// Text of one PDF page with its coarse bounding box, used for page
/// back-mapping.
#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
    pub bbox: Option<Rect>,
}

/// Minimum word-set similarity for a chunk to be assigned a page.
const PAGE_MATCH_THRESHOLD: f64 = 0.3;

static HEADER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"^#+\s+.+$").unwrap(),
        Regex::new(r"^\d+\.\s+.+$").unwrap(),
        Regex::new(r"^Chapter\s+\d+.*$").unwrap(),
        Regex::new(r"^Section\s+\d+.*$").unwrap(),
        Regex::new(r"^[A-Z][A-Z\s]+$").unwrap(),
    ]
});

static PARAGRAPH_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());

/// Chunk `text` into bounded, overlapping chunks.
///
/// Empty (or whitespace-only) input yields an empty list, not an error.
pub fn chunk_text(text: &str, params: &ChunkParams) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut pieces: Vec<(SizedChunk, Option<String>)> = Vec::new();

    match detect_sections(text) {
        Some(sections) => {
            for (title, body) in sections {
                for piece in chunk_by_size(&body, params) {
                    pieces.push((piece, Some(title.clone())));
                }
            }
        }
        None => {
            for piece in chunk_by_size(text, params) {
                pieces.push((piece, None));
            }
        }
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, (piece, section_title))| make_chunk(index, piece, section_title))
        .collect()
}

/// Chunk text and then back-map chunks onto PDF pages.
pub fn chunk_text_with_pages(
    text: &str,
    params: &ChunkParams,
    pages: &[PageText],
) -> Vec<TextChunk> {
    let mut chunks = chunk_text(text, params);
    if !pages.is_empty() {
        assign_pages(&mut chunks, pages);
    }
    chunks
}

/// Wrap the entire text in one chunk. Used by the orchestrator as the
/// chunking-failure fallback so a successful extraction is never forfeited.
pub fn whole_text_chunk(text: &str) -> TextChunk {
    make_chunk(
        0,
        SizedChunk {
            text: text.to_string(),
            first_paragraph: 1,
        },
        None,
    )
}

struct SizedChunk {
    text: String,
    /// 1-based index of the first source paragraph in this chunk.
    first_paragraph: u32,
}

fn make_chunk(index: usize, piece: SizedChunk, section_title: Option<String>) -> TextChunk {
    let mut hasher = Sha256::new();
    hasher.update(piece.text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    // Deterministic id so re-chunking identical input is byte-identical.
    let id = Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}", index, hash).as_bytes(),
    );

    TextChunk {
        id,
        text: piece.text,
        page_number: None,
        paragraph_number: Some(piece.first_paragraph),
        section_title,
        coordinates: None,
        hash,
    }
}

/// Partition text into `(header, body)` sections when at least two
/// header-like lines are present. Content before the first header falls
/// under a default "Introduction" section.
fn detect_sections(text: &str) -> Option<Vec<(String, String)>> {
    let mut sections: Vec<(String, String)> = Vec::new();
    let mut current_header = "Introduction".to_string();
    let mut current_content: Vec<&str> = Vec::new();

    for line in text.lines() {
        let is_header = !line.trim().is_empty() && HEADER_PATTERNS.iter().any(|p| p.is_match(line));
        if is_header {
            if !current_content.is_empty() {
                sections.push((current_header.clone(), current_content.join("\n")));
            }
            current_header = line.trim().to_string();
            current_content.clear();
        } else {
            current_content.push(line);
        }
    }
    if !current_content.is_empty() {
        sections.push((current_header, current_content.join("\n")));
    }

    if sections.len() <= 1 {
        None
    } else {
        Some(sections)
    }
}

fn split_paragraphs(text: &str) -> Vec<&str> {
    PARAGRAPH_SPLIT
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Accumulate paragraphs into word-bounded chunks, seeding each new chunk
/// with the overlap tail of the previous one. Paragraphs larger than the
/// budget are re-chunked at sentence granularity.
fn chunk_by_size(text: &str, params: &ChunkParams) -> Vec<SizedChunk> {
    let chunk_size = params.chunk_size;
    let overlap = params.effective_overlap();

    let paragraphs = split_paragraphs(text);
    let mut chunks: Vec<SizedChunk> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_size = 0usize;
    let mut current_first_para = 1u32;

    for (idx, para) in paragraphs.iter().enumerate() {
        let para_number = (idx + 1) as u32;
        let para_size = word_count(para);

        if para_size > chunk_size {
            if !current.is_empty() {
                chunks.push(SizedChunk {
                    text: current.join(" "),
                    first_paragraph: current_first_para,
                });
                current.clear();
                current_size = 0;
            }
            let sentences = split_sentences(para);
            for piece in chunk_sentences(&sentences, chunk_size, overlap) {
                chunks.push(SizedChunk {
                    text: piece,
                    first_paragraph: para_number,
                });
            }
        } else if current_size + para_size > chunk_size {
            chunks.push(SizedChunk {
                text: current.join(" "),
                first_paragraph: current_first_para,
            });
            let mut seeded = overlap_from_end(&current, overlap);
            seeded.push(para.to_string());
            current_size = word_count(&seeded.join(" "));
            current = seeded;
            current_first_para = para_number;
        } else {
            if current.is_empty() {
                current_first_para = para_number;
            }
            current.push(para.to_string());
            current_size += para_size;
        }
    }

    if !current.is_empty() {
        chunks.push(SizedChunk {
            text: current.join(" "),
            first_paragraph: current_first_para,
        });
    }

    chunks
}

/// Take the last `overlap` words from a list of text pieces, preserving
/// piece boundaries where possible and slicing the final piece at word
/// granularity otherwise.
fn overlap_from_end(pieces: &[String], overlap: usize) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();
    let mut remaining = overlap;

    for piece in pieces.iter().rev() {
        if remaining == 0 {
            break;
        }
        let words: Vec<&str> = piece.split_whitespace().collect();
        if words.len() <= remaining {
            result.insert(0, piece.clone());
            remaining -= words.len();
        } else {
            let partial = words[words.len() - remaining..].join(" ");
            result.insert(0, partial);
            break;
        }
    }

    result
}

/// Split a paragraph into sentences on `.`/`?`/`!` followed by whitespace,
/// guarding against dotted abbreviations ("e.g.") and honorific-style
/// two-letter abbreviations ("Dr.").
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let chars: Vec<(usize, char)> = text.char_indices().collect();

    for window in chars.windows(2) {
        let (_, c) = window[0];
        let (j, next) = window[1];
        if matches!(c, '.' | '?' | '!') && next.is_whitespace() && !is_abbreviation(&text[..j]) {
            let piece = text[start..j].trim();
            if !piece.is_empty() {
                sentences.push(piece.to_string());
            }
            start = j;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}

/// Whether the text ending at a candidate boundary looks like an
/// abbreviation rather than a sentence end. `prefix` ends with the
/// punctuation character.
fn is_abbreviation(prefix: &str) -> bool {
    let tail: Vec<char> = prefix.chars().rev().take(4).collect();
    if tail.is_empty() || tail[0] != '.' {
        return false;
    }
    // "e.g." — word, dot, word, dot.
    let dotted = tail.len() == 4 && tail[1].is_alphanumeric() && tail[2] == '.' && tail[3].is_alphanumeric();
    // "Dr." — uppercase, lowercase, dot.
    let honorific =
        tail.len() >= 3 && tail[1].is_ascii_lowercase() && tail[2].is_ascii_uppercase();
    dotted || honorific
}

/// Accumulate sentences into word-bounded chunks with overlap. A single
/// sentence exceeding the budget becomes its own chunk verbatim, never
/// truncated.
fn chunk_sentences(sentences: &[String], chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_size = 0usize;

    for sentence in sentences {
        let sentence_size = word_count(sentence);

        if sentence_size > chunk_size {
            if !current.is_empty() {
                chunks.push(current.join(" "));
                current.clear();
                current_size = 0;
            }
            chunks.push(sentence.clone());
            continue;
        }

        if current_size + sentence_size > chunk_size {
            chunks.push(current.join(" "));
            let mut seeded = overlap_from_end(&current, overlap);
            seeded.push(sentence.clone());
            current_size = word_count(&seeded.join(" "));
            current = seeded;
        } else {
            current.push(sentence.clone());
            current_size += sentence_size;
        }
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}

/// Assign each chunk to the page whose word set best covers the chunk's,
/// when the score clears [`PAGE_MATCH_THRESHOLD`]. Page bounding boxes, if
/// supplied, become the chunk's coarse coordinates.
pub fn assign_pages(chunks: &mut [TextChunk], pages: &[PageText]) {
    use std::collections::HashSet;

    let page_words: Vec<(u32, Option<Rect>, HashSet<&str>)> = pages
        .iter()
        .map(|p| (p.number, p.bbox, p.text.split_whitespace().collect()))
        .collect();

    for chunk in chunks.iter_mut() {
        let chunk_words: HashSet<&str> = chunk.text.split_whitespace().collect();
        if chunk_words.is_empty() {
            continue;
        }

        let mut best: Option<(u32, Option<Rect>)> = None;
        let mut best_score = 0.0f64;
        for (number, bbox, words) in &page_words {
            let common = chunk_words.intersection(words).count();
            if common == 0 {
                continue;
            }
            let score = common as f64 / chunk_words.len() as f64;
            if score > best_score {
                best_score = score;
                best = Some((*number, *bbox));
            }
        }

        if best_score > PAGE_MATCH_THRESHOLD {
            if let Some((number, bbox)) = best {
                chunk.page_number = Some(number);
                chunk.coordinates = bbox;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(size: usize, overlap: usize) -> ChunkParams {
        ChunkParams {
            chunk_size: size,
            chunk_overlap: overlap,
        }
    }

    fn words(n: usize, prefix: &str) -> String {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_text("", &params(100, 20)).is_empty());
        assert!(chunk_text("  \n\n  ", &params(100, 20)).is_empty());
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_text("Hello chunking world.", &params(100, 20));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello chunking world.");
        assert_eq!(chunks[0].paragraph_number, Some(1));
        assert!(chunks[0].section_title.is_none());
    }

    #[test]
    fn two_80_word_paragraphs_size_100_overlap_20() {
        let p1 = words(80, "a");
        let p2 = words(80, "b");
        let text = format!("{}\n\n{}", p1, p2);
        let chunks = chunk_text(&text, &params(100, 20));

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, p1);
        // Second chunk starts with paragraph 1's 20-word tail.
        let tail = words(80, "a")
            .split_whitespace()
            .skip(60)
            .collect::<Vec<_>>()
            .join(" ");
        assert!(chunks[1].text.starts_with(&tail), "expected overlap tail");
        assert!(chunks[1].text.ends_with(&p2));
    }

    #[test]
    fn every_word_is_covered() {
        let text = format!(
            "{}\n\n{}\n\n{}",
            words(40, "x"),
            words(90, "y"),
            words(25, "z")
        );
        let chunks = chunk_text(&text, &params(50, 10));
        let all: String = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let covered: std::collections::HashSet<&str> = all.split_whitespace().collect();
        for word in text.split_whitespace() {
            assert!(covered.contains(word), "missing word {}", word);
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = format!("{}\n\n{}", words(120, "m"), words(70, "n"));
        let a = chunk_text(&text, &params(60, 15));
        let b = chunk_text(&text, &params(60, 15));
        assert_eq!(a, b);
    }

    #[test]
    fn oversized_paragraph_splits_on_sentences() {
        let sentences: Vec<String> = (0..12)
            .map(|i| format!("Sentence {} has exactly these five words.", i))
            .collect();
        let para = sentences.join(" ");
        let chunks = chunk_text(&para, &params(20, 5));
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(chunk.paragraph_number, Some(1));
        }
    }

    #[test]
    fn oversized_sentence_kept_verbatim() {
        let sentence = format!("{}.", words(60, "long"));
        let chunks = chunk_text(&sentence, &params(10, 2));
        assert!(chunks.iter().any(|c| c.text == sentence));
    }

    #[test]
    fn abbreviations_do_not_split_sentences() {
        let sentences = split_sentences("We use e.g. tools daily. Dr. Smith agrees. Done now.");
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0], "We use e.g. tools daily.");
        assert_eq!(sentences[1], "Dr. Smith agrees.");
    }

    #[test]
    fn sections_detected_and_labelled() {
        let text = "1. Introduction\nSome opening text here.\n\n2. Methods\nMethod body text.";
        let chunks = chunk_text(text, &params(100, 10));
        let titles: Vec<Option<&str>> = chunks.iter().map(|c| c.section_title.as_deref()).collect();
        assert!(titles.contains(&Some("1. Introduction")));
        assert!(titles.contains(&Some("2. Methods")));
    }

    #[test]
    fn single_header_falls_back_to_unlabelled() {
        let text = "# Only Header\nbody text follows here";
        let chunks = chunk_text(text, &params(100, 10));
        assert!(chunks.iter().all(|c| c.section_title.is_none()));
    }

    #[test]
    fn all_caps_line_is_a_header() {
        let text = "OVERVIEW\nThe overview body.\n\nDETAILS\nThe details body.";
        let chunks = chunk_text(text, &params(100, 10));
        assert!(chunks
            .iter()
            .any(|c| c.section_title.as_deref() == Some("OVERVIEW")));
        assert!(chunks
            .iter()
            .any(|c| c.section_title.as_deref() == Some("DETAILS")));
    }

    #[test]
    fn overlap_clamped_when_at_least_chunk_size() {
        // Would never terminate if the overlap were honored as given.
        let text = format!("{}\n\n{}\n\n{}", words(8, "a"), words(8, "b"), words(8, "c"));
        let chunks = chunk_text(&text, &params(10, 50));
        assert!(!chunks.is_empty());
    }

    #[test]
    fn pages_assigned_above_similarity_threshold() {
        let bbox = Rect {
            x1: 0.0,
            y1: 0.0,
            x2: 612.0,
            y2: 792.0,
        };
        let pages = vec![
            PageText {
                number: 1,
                text: "alpha beta gamma delta".to_string(),
                bbox: Some(bbox),
            },
            PageText {
                number: 2,
                text: "completely different vocabulary here".to_string(),
                bbox: Some(bbox),
            },
        ];
        let mut chunks = vec![whole_text_chunk("alpha beta gamma epsilon")];
        assign_pages(&mut chunks, &pages);
        assert_eq!(chunks[0].page_number, Some(1));
        assert_eq!(chunks[0].coordinates, Some(bbox));
    }

    #[test]
    fn pages_unassigned_below_threshold() {
        let pages = vec![PageText {
            number: 1,
            text: "nothing in common at all".to_string(),
            bbox: None,
        }];
        let mut chunks = vec![whole_text_chunk("totally disjoint chunk words")];
        assign_pages(&mut chunks, &pages);
        assert_eq!(chunks[0].page_number, None);
        assert_eq!(chunks[0].coordinates, None);
    }

    #[test]
    fn whole_text_fallback_preserves_text() {
        let chunk = whole_text_chunk("the full text");
        assert_eq!(chunk.text, "the full text");
        assert!(chunk.section_title.is_none());
    }
}
