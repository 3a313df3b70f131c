use std::fs;
use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use lopdf::Document;
use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::IngestError;
use crate::models::{ContentItem, DocumentMetadata, ParsedDocument};

const BULLET_MARKERS: [char; 4] = ['-', '*', '•', '·'];

pub trait PdfExtractor {
    fn extract(&self, path: &Path) -> Result<ParsedDocument, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract(&self, path: &Path) -> Result<ParsedDocument, IngestError> {
        let started = Instant::now();

        let bytes = fs::read(path)?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| {
                IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
            })?;
        let file_hash = {
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            format!("{:x}", hasher.finalize())
        };

        let document =
            Document::load_mem(&bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;
        let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        let total_pages = page_numbers.len() as u32;

        let block_split = Regex::new(r"\n\s*\n")?;
        let numbered = Regex::new(r"^(\d+(?:\.\d+)*)\.?\s+\S")?;

        let mut items = Vec::new();
        let mut hierarchy = HierarchyStack::new();
        for page_no in page_numbers {
            let raw = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;
            let cleaned = clean_text(&raw);
            if cleaned.trim().is_empty() {
                continue;
            }

            for block in block_split.split(&cleaned) {
                let block = block.trim();
                if block.is_empty() {
                    continue;
                }

                if let Some(level) = heading_level(block, &numbered) {
                    hierarchy.push(level, block);
                    items.push(ContentItem::Heading {
                        text: block.to_string(),
                        pages: vec![page_no],
                        section_hierarchy: hierarchy.path(),
                        level,
                    });
                } else if let Some(entries) = bullet_lines(block) {
                    for entry in entries {
                        items.push(ContentItem::ListItem {
                            text: entry,
                            pages: vec![page_no],
                            section_hierarchy: hierarchy.path(),
                        });
                    }
                } else {
                    let text = block
                        .lines()
                        .map(str::trim)
                        .filter(|line| !line.is_empty())
                        .collect::<Vec<_>>()
                        .join(" ");
                    items.push(ContentItem::Text {
                        text,
                        pages: vec![page_no],
                        section_hierarchy: hierarchy.path(),
                    });
                }
            }
        }

        if items.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable text: {}",
                path.display()
            )));
        }

        let items = merge_page_continuations(items);
        let title = items.iter().find_map(|item| match item {
            ContentItem::Heading { text, .. } => Some(text.clone()),
            _ => None,
        });

        let metadata = DocumentMetadata {
            document_id: Uuid::new_v4().to_string(),
            filename,
            title,
            total_pages,
            file_hash,
            file_size_bytes: bytes.len() as u64,
            processing_seconds: started.elapsed().as_secs_f64(),
            ingested_at: Utc::now(),
        };

        Ok(ParsedDocument { metadata, items })
    }
}

// Extracted text carries unknown-glyph markers and stray control bytes;
// space runs collapse to one. Newlines are kept for block splitting.
fn clean_text(raw: &str) -> String {
    let replaced = raw
        .replace("<unknown>", " ")
        .replace('\u{FFFD}', " ")
        .replace('\t', " ");

    let mut cleaned = String::with_capacity(replaced.len());
    for character in replaced.chars() {
        if character == '\n' || !character.is_control() {
            cleaned.push(character);
        }
    }

    let mut collapsed = String::with_capacity(cleaned.len());
    let mut in_space_run = false;
    for character in cleaned.chars() {
        if character == ' ' {
            if !in_space_run {
                collapsed.push(character);
            }
            in_space_run = true;
        } else {
            in_space_run = false;
            collapsed.push(character);
        }
    }
    collapsed
}

fn heading_level(block: &str, numbered: &Regex) -> Option<u8> {
    if block.contains('\n') || block.chars().count() > 80 {
        return None;
    }
    if block.ends_with(['.', '!', '?', ';', ':', ',']) {
        return None;
    }

    if let Some(captures) = numbered.captures(block) {
        let dots = captures[1].matches('.').count();
        return Some((dots + 1).min(6) as u8);
    }

    let letters: Vec<char> = block.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() >= 3 && letters.iter().all(|c| c.is_uppercase()) {
        return Some(1);
    }

    let words: Vec<&str> = block.split_whitespace().collect();
    if !letters.is_empty()
        && !words.is_empty()
        && words.len() <= 6
        && words.iter().all(|word| starts_capitalized(word))
    {
        return Some(2);
    }

    None
}

// Words without a cased first character (numbers, symbols) do not disqualify
// a title-case heading.
fn starts_capitalized(word: &str) -> bool {
    word.chars()
        .next()
        .map_or(false, |first| first.is_uppercase() || !first.is_alphabetic())
}

fn bullet_lines(block: &str) -> Option<Vec<String>> {
    let lines: Vec<&str> = block
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() || !lines.iter().all(|line| is_bullet(line)) {
        return None;
    }

    Some(lines.iter().map(|line| strip_bullet(line)).collect())
}

fn is_bullet(line: &str) -> bool {
    let mut characters = line.chars();
    match characters.next() {
        Some(marker) if BULLET_MARKERS.contains(&marker) => characters
            .next()
            .map_or(false, |following| following.is_whitespace()),
        _ => false,
    }
}

fn strip_bullet(line: &str) -> String {
    let mut characters = line.chars();
    characters.next();
    characters.as_str().trim_start().to_string()
}

// Paragraphs broken across a page boundary are rejoined when the earlier
// fragment ends mid-sentence and the later one starts lowercase.
fn merge_page_continuations(items: Vec<ContentItem>) -> Vec<ContentItem> {
    let mut merged: Vec<ContentItem> = Vec::with_capacity(items.len());
    for item in items {
        let continues = match (merged.last(), &item) {
            (
                Some(ContentItem::Text {
                    text: previous,
                    pages: previous_pages,
                    ..
                }),
                ContentItem::Text {
                    text: next,
                    pages: next_pages,
                    ..
                },
            ) => continues_previous(previous, previous_pages, next, next_pages),
            _ => false,
        };

        if continues {
            if let (
                Some(ContentItem::Text { text, pages, .. }),
                ContentItem::Text {
                    text: next_text,
                    pages: next_pages,
                    ..
                },
            ) = (merged.last_mut(), item)
            {
                text.push(' ');
                text.push_str(&next_text);
                pages.extend(next_pages);
                pages.sort_unstable();
                pages.dedup();
            }
        } else {
            merged.push(item);
        }
    }
    merged
}

fn continues_previous(
    previous: &str,
    previous_pages: &[u32],
    next: &str,
    next_pages: &[u32],
) -> bool {
    let Some(last_page) = previous_pages.iter().max().copied() else {
        return false;
    };
    let Some(first_page) = next_pages.iter().min().copied() else {
        return false;
    };
    if last_page + 1 != first_page {
        return false;
    }

    let Some(last_character) = previous.trim_end().chars().last() else {
        return false;
    };
    if matches!(last_character, '.' | '?' | '!' | ':' | ';') {
        return false;
    }

    next.trim_start()
        .chars()
        .next()
        .map_or(false, |first| first.is_lowercase())
}

struct HierarchyStack {
    levels: Vec<(u8, String)>,
}

impl HierarchyStack {
    fn new() -> Self {
        Self { levels: Vec::new() }
    }

    fn push(&mut self, level: u8, text: &str) {
        self.levels.retain(|(existing, _)| *existing < level);
        self.levels.push((level, text.to_string()));
    }

    fn path(&self) -> Vec<String> {
        self.levels.iter().map(|(_, text)| text.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_item(text: &str, pages: Vec<u32>) -> ContentItem {
        ContentItem::Text {
            text: text.to_string(),
            pages,
            section_hierarchy: vec!["Operation".to_string()],
        }
    }

    #[test]
    fn cleaning_strips_artifacts_and_collapses_spaces() {
        let cleaned = clean_text("foo<unknown>bar\t baz\r\n qux  quux");

        assert_eq!(cleaned, "foo bar baz\n qux quux");
    }

    #[test]
    fn numbered_headings_take_their_depth_from_the_numbering() {
        let numbered = Regex::new(r"^(\d+(?:\.\d+)*)\.?\s+\S").unwrap();

        assert_eq!(heading_level("1. Introduction", &numbered), Some(1));
        assert_eq!(heading_level("2.3 Flow Control", &numbered), Some(2));
        assert_eq!(heading_level("3.2.1 Valve Timing", &numbered), Some(3));
    }

    #[test]
    fn shouting_and_title_case_lines_are_headings() {
        let numbered = Regex::new(r"^(\d+(?:\.\d+)*)\.?\s+\S").unwrap();

        assert_eq!(heading_level("INSTALLATION", &numbered), Some(1));
        assert_eq!(heading_level("SECTION 4", &numbered), Some(1));
        assert_eq!(heading_level("Pump Overview", &numbered), Some(2));
        assert_eq!(heading_level("Phase 2 Setup", &numbered), Some(2));
    }

    #[test]
    fn prose_is_not_mistaken_for_a_heading() {
        let numbered = Regex::new(r"^(\d+(?:\.\d+)*)\.?\s+\S").unwrap();

        assert_eq!(heading_level("This line ends like a sentence.", &numbered), None);
        assert_eq!(heading_level("the pump housing", &numbered), None);
        assert_eq!(
            heading_level(
                "A Line With Far Too Many Capitalized Words To Be A Heading",
                &numbered
            ),
            None
        );
        assert_eq!(heading_level(&"x".repeat(81), &numbered), None);
    }

    #[test]
    fn bullet_blocks_split_into_one_entry_per_line() {
        let entries = bullet_lines("- check the seals\n- drain the sump\n• refit the cover");

        assert_eq!(
            entries,
            Some(vec![
                "check the seals".to_string(),
                "drain the sump".to_string(),
                "refit the cover".to_string(),
            ])
        );
    }

    #[test]
    fn mixed_blocks_are_not_bullet_lists() {
        assert_eq!(bullet_lines("- check the seals\nthen drain the sump"), None);
        assert_eq!(bullet_lines("-no space after marker"), None);
    }

    #[test]
    fn hierarchy_stack_replaces_siblings_and_deeper_levels() {
        let mut stack = HierarchyStack::new();

        stack.push(1, "Installation");
        stack.push(2, "Mounting");
        assert_eq!(stack.path(), vec!["Installation", "Mounting"]);

        stack.push(2, "Wiring");
        assert_eq!(stack.path(), vec!["Installation", "Wiring"]);

        stack.push(1, "Operation");
        assert_eq!(stack.path(), vec!["Operation"]);
    }

    #[test]
    fn sentences_split_across_pages_are_rejoined() {
        let items = vec![
            text_item("The relief valve opens when the", vec![3]),
            text_item("pressure exceeds 6 bar.", vec![4]),
        ];

        let merged = merge_page_continuations(items);

        assert_eq!(merged.len(), 1);
        assert_eq!(
            merged[0].text(),
            "The relief valve opens when the pressure exceeds 6 bar."
        );
        assert_eq!(merged[0].pages(), &[3, 4]);
    }

    #[test]
    fn complete_paragraphs_are_left_alone() {
        let items = vec![
            text_item("The relief valve opens at 6 bar.", vec![3]),
            text_item("Routine checks follow the schedule.", vec![4]),
        ];

        assert_eq!(merge_page_continuations(items).len(), 2);
    }

    #[test]
    fn distant_pages_are_not_merged() {
        let items = vec![
            text_item("continues with the", vec![3]),
            text_item("same lowercase start", vec![5]),
        ];

        assert_eq!(merge_page_continuations(items).len(), 2);
    }
}
