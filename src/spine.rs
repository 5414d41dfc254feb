//! Spine construction
//!
//! The spine maps part numbers to their URLs and holds the ordered chapter
//! boundaries, each expressed as (part, offset) positions in the unmerged
//! stream.

use crate::toc::TocChapter;
use reqwest::Url;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq)]
pub enum SpineError {
    #[error("Cannot derive a part number from URL '{0}'")]
    InvalidPartNumber(String),
}

/// Position in the multi-part audio stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Position {
    /// `offset` seconds into `part`
    Bounded { part: u32, offset: f64 },
    /// Whatever remains of the stream; `part` is the last part the spine knows
    EndOfStream { part: u32 },
}

impl Position {
    pub fn at(part: u32, offset: f64) -> Self {
        Position::Bounded { part, offset }
    }

    pub fn part(&self) -> u32 {
        match self {
            Position::Bounded { part, .. } | Position::EndOfStream { part } => *part,
        }
    }

    /// Offset in seconds, `None` for the end-of-stream sentinel
    pub fn offset(&self) -> Option<f64> {
        match self {
            Position::Bounded { offset, .. } => Some(*offset),
            Position::EndOfStream { .. } => None,
        }
    }
}

/// A chapter's title, starting position, and ending position
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterBounds {
    pub title: String,
    pub start: Position,
    pub end: Position,
}

impl ChapterBounds {
    pub fn new(title: &str, start: Position, end: Position) -> Self {
        Self {
            title: title.to_string(),
            start,
            end,
        }
    }
}

/// Audiobook part locations and parsed chapter index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spine {
    part_files: BTreeMap<u32, String>,
    index: Vec<ChapterBounds>,
}

impl Spine {
    pub fn new(part_files: BTreeMap<u32, String>, index: Vec<ChapterBounds>) -> Self {
        Self { part_files, index }
    }

    pub fn part_url(&self, part: u32) -> Option<&str> {
        self.part_files.get(&part).map(String::as_str)
    }

    /// Parts in ascending order
    pub fn part_files(&self) -> impl Iterator<Item = (u32, &str)> {
        self.part_files.iter().map(|(part, url)| (*part, url.as_str()))
    }

    pub fn part_count(&self) -> usize {
        self.part_files.len()
    }

    pub fn last_part(&self) -> Option<u32> {
        self.part_files.keys().next_back().copied()
    }

    pub fn index(&self) -> &[ChapterBounds] {
        &self.index
    }
}

/// Parse the part number from a part URL
///
/// Paths have the form `xxxxx-PartX.mp3`: the text after the final `-`, up
/// to the final `.`, with every non-digit removed. Strings that are not
/// absolute URLs are treated as bare paths.
pub fn parse_part_number(url: &str) -> Result<u32, SpineError> {
    let parsed = Url::parse(url).ok();
    let path = match &parsed {
        Some(parsed) => parsed.path(),
        None => url.split(['?', '#']).next().unwrap_or(url),
    };

    let part_file = path.rsplit('-').next().unwrap_or(path);
    let stem = match part_file.rfind('.') {
        Some(dot) => &part_file[..dot],
        None => part_file,
    };
    let digits: String = stem.chars().filter(|c| c.is_ascii_digit()).collect();

    match digits.parse::<u32>() {
        Ok(part) if part > 0 => Ok(part),
        _ => Err(SpineError::InvalidPartNumber(url.to_string())),
    }
}

/// Build the spine from normalized chapters
pub fn build_spine(chapters: &[TocChapter]) -> Result<Spine, SpineError> {
    debug!("Building spine from {} chapters", chapters.len());
    let mut part_files = BTreeMap::new();
    let mut index: Vec<ChapterBounds> = Vec::with_capacity(chapters.len());

    for chapter in chapters {
        let Some(first_url) = chapter.urls.first() else {
            warn!("Chapter '{}' has no part URLs, skipping", chapter.title);
            continue;
        };
        let first_part = parse_part_number(first_url)?;
        part_files.insert(first_part, first_url.clone());

        let mut end_part = first_part;
        for url in &chapter.urls[1..] {
            let part = parse_part_number(url)?;
            part_files.insert(part, url.clone());
            end_part = part;
        }

        let bounds = ChapterBounds::new(
            &chapter.title,
            Position::at(first_part, chapter.offset),
            Position::EndOfStream { part: end_part },
        );
        debug!("Chapter start {:?}", bounds);

        // the previous chapter ends where this one starts
        if let Some(previous) = index.last_mut() {
            previous.end = bounds.start;
        }
        index.push(bounds);
    }

    if let (Some(last), Some(last_part)) = (index.last_mut(), part_files.keys().next_back()) {
        last.end = Position::EndOfStream { part: *last_part };
    }

    for bounds in &index {
        if let (Position::Bounded { part: sp, offset: so }, Position::Bounded { part: ep, offset: eo }) =
            (bounds.start, bounds.end)
        {
            if sp > ep || (sp == ep && so > eo) {
                warn!(
                    "Chapter '{}' runs backwards: {}#{} to {}#{}",
                    bounds.title, sp, so, ep, eo
                );
            }
        }
    }

    Ok(Spine::new(part_files, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(title: &str, urls: &[&str], offset: f64) -> TocChapter {
        TocChapter {
            title: title.to_string(),
            urls: urls.iter().map(|u| u.to_string()).collect(),
            offset,
        }
    }

    #[test]
    fn test_parse_part_number() {
        assert_eq!(parse_part_number("https://domain/xx-Part07.mp3"), Ok(7));
        assert_eq!(parse_part_number("https://domain/a-b/xx-Part12.mp3?x=1"), Ok(12));
        assert_eq!(
            parse_part_number("{12345-6789}Fmt111-Part01.mp3#111"),
            Ok(1)
        );
    }

    #[test]
    fn test_parse_part_number_uses_final_dot() {
        assert_eq!(parse_part_number("https://domain/xx-Part3.v2.mp3"), Ok(32));
    }

    #[test]
    fn test_parse_part_number_rejects_missing_digits() {
        assert!(parse_part_number("https://domain/xx-Intro.mp3").is_err());
        assert!(parse_part_number("https://domain/xx-Part00.mp3").is_err());
    }

    #[test]
    fn test_spine_should_build() {
        let chapters = vec![
            chapter("Chapter 1", &["https://domain/xx-Part01.mp3"], 0.0),
            chapter(
                "Chapter 2",
                &["https://domain/xx-Part01.mp3", "https://domain/xx-Part02.mp3"],
                400.0,
            ),
        ];

        let spine = build_spine(&chapters).unwrap();
        assert_eq!(
            spine.index(),
            &[
                ChapterBounds::new("Chapter 1", Position::at(1, 0.0), Position::at(1, 400.0)),
                ChapterBounds::new(
                    "Chapter 2",
                    Position::at(1, 400.0),
                    Position::EndOfStream { part: 2 }
                ),
            ]
        );
        assert_eq!(spine.part_url(2), Some("https://domain/xx-Part02.mp3"));
        assert_eq!(spine.part_count(), 2);
    }

    #[test]
    fn test_boundaries_are_contiguous() {
        let chapters = vec![
            chapter("One", &["https://d/x-Part01.mp3"], 0.0),
            chapter("Two", &["https://d/x-Part01.mp3", "https://d/x-Part02.mp3"], 120.0),
            chapter("Three", &["https://d/x-Part02.mp3", "https://d/x-Part04.mp3"], 30.0),
            chapter("Four", &["https://d/x-Part04.mp3"], 10.0),
        ];

        let spine = build_spine(&chapters).unwrap();
        let index = spine.index();
        for pair in index.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert_ne!(pair[0].end, pair[1].end);
        }
        assert_eq!(index[3].end, Position::EndOfStream { part: 4 });
        assert_eq!(spine.last_part(), Some(4));
    }

    #[test]
    fn test_duplicate_urls_deduplicated_by_part() {
        let chapters = vec![
            chapter("One", &["https://d/x-Part01.mp3"], 0.0),
            chapter("Two", &["https://d/x-Part01.mp3"], 50.0),
        ];

        let spine = build_spine(&chapters).unwrap();
        assert_eq!(spine.part_files().collect::<Vec<_>>(), vec![(1, "https://d/x-Part01.mp3")]);
    }

    #[test]
    fn test_empty_spine() {
        let spine = build_spine(&[]).unwrap();
        assert!(spine.index().is_empty());
        assert_eq!(spine.last_part(), None);
    }
}
