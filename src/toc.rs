//! Table of contents parsing and chapter normalization
//!
//! A raw TOC arrives as a list of rows, each carrying a title, a path locator
//! (`<key>` or `<key>#<seconds>`) and optionally nested rows. Normalization
//! turns that into an ordered list of logical chapters, each with the URLs of
//! the parts it touches and its start offset inside the first part.

use nom::{
    bytes::complete::take_till,
    character::complete::{char, digit1},
    combinator::{map_res, opt, rest},
    sequence::preceded,
    IResult,
};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq)]
pub enum TocError {
    #[error("TOC path '{0}' has no entry in the path map")]
    UnresolvedPath(String),
    #[error("Malformed TOC row '{title}': {reason}")]
    MalformedToc { title: String, reason: String },
}

/// A path reference from a TOC row, split into its structural key and the
/// time offset (seconds) encoded in the optional `#` fragment
#[derive(Debug, Clone, PartialEq)]
pub struct PartPath {
    pub path: String,
    pub offset: f64,
}

impl PartPath {
    /// Parse a locator such as `{12345-6789}Fmt111-Part01.mp3#111`
    ///
    /// An empty or missing fragment means offset 0. A fragment that does not
    /// start with digits is rejected.
    pub fn parse(locator: &str) -> Result<Self, String> {
        let (_, (key, fragment)) = Self::parse_locator(locator)
            .map_err(|e| format!("Failed to parse locator '{}': {}", locator, e))?;

        let offset = match fragment {
            None | Some("") => 0.0,
            Some(fragment) => {
                let (_, seconds) = Self::parse_offset(fragment).map_err(|_| {
                    format!("Fragment '#{}' does not start with an offset", fragment)
                })?;
                seconds as f64
            }
        };

        Ok(PartPath {
            path: key.to_string(),
            offset,
        })
    }

    fn parse_locator(input: &str) -> IResult<&str, (&str, Option<&str>)> {
        let (input, key) = take_till(|c| c == '#')(input)?;
        let (input, fragment) = opt(preceded(char('#'), rest))(input)?;
        Ok((input, (key, fragment)))
    }

    /// Leading decimal digits of a fragment; anything after them is ignored
    fn parse_offset(input: &str) -> IResult<&str, u64> {
        map_res(digit1, |s: &str| s.parse::<u64>())(input)
    }
}

/// Mapping from a structural path key to the concrete URL of a part
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathMap {
    entries: HashMap<String, String>,
}

impl PathMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, url: impl Into<String>) {
        self.entries.insert(key.into(), url.into());
    }

    pub fn resolve(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PathMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = PathMap::new();
        for (key, url) in iter {
            map.insert(key, url);
        }
        map
    }
}

/// Row shape as it appears in the manifest JSON
#[derive(Debug, Deserialize)]
struct RawTocRow {
    #[serde(default)]
    title: String,
    path: Option<String>,
    #[serde(default)]
    contents: Vec<RawTocRow>,
}

/// One row of the table of contents
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawTocRow")]
pub enum TocRow {
    Leaf {
        title: String,
        path: Option<String>,
    },
    Nested {
        title: String,
        path: Option<String>,
        children: Vec<TocRow>,
    },
}

impl From<RawTocRow> for TocRow {
    fn from(raw: RawTocRow) -> Self {
        if raw.contents.is_empty() {
            TocRow::Leaf {
                title: raw.title,
                path: raw.path,
            }
        } else {
            TocRow::Nested {
                title: raw.title,
                path: raw.path,
                children: raw.contents.into_iter().map(TocRow::from).collect(),
            }
        }
    }
}

impl TocRow {
    pub fn leaf(title: &str, path: &str) -> Self {
        TocRow::Leaf {
            title: title.to_string(),
            path: Some(path.to_string()),
        }
    }

    pub fn title(&self) -> &str {
        match self {
            TocRow::Leaf { title, .. } | TocRow::Nested { title, .. } => title,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            TocRow::Leaf { path, .. } | TocRow::Nested { path, .. } => path.as_deref(),
        }
    }
}

/// A logical chapter after normalization
#[derive(Debug, Clone, PartialEq)]
pub struct TocChapter {
    pub title: String,
    /// Part URLs in document order, never the same URL twice in a row
    pub urls: Vec<String>,
    /// Start offset (seconds) inside the part of `urls[0]`
    pub offset: f64,
}

impl TocChapter {
    fn push_url(&mut self, url: &str) {
        if self.urls.last().map(String::as_str) != Some(url) {
            self.urls.push(url.to_string());
        }
    }
}

/// A top-level row with every descendant locator collected beneath it
#[derive(Debug)]
struct FlatRow<'a> {
    title: &'a str,
    path: Option<&'a str>,
    nested: Vec<&'a str>,
}

fn flatten(rows: &[TocRow]) -> Vec<FlatRow<'_>> {
    rows.iter()
        .map(|row| {
            let mut nested = Vec::new();
            if let TocRow::Nested { children, .. } = row {
                collect_nested(children, &mut nested);
            }
            FlatRow {
                title: row.title(),
                path: row.path(),
                nested,
            }
        })
        .collect()
}

fn collect_nested<'a>(rows: &'a [TocRow], out: &mut Vec<&'a str>) {
    for row in rows {
        if let Some(path) = row.path() {
            out.push(path);
        }
        if let TocRow::Nested { children, .. } = row {
            collect_nested(children, out);
        }
    }
}

fn resolve<'m>(paths: &'m PathMap, title: &str, locator: &str) -> Result<&'m str, TocError> {
    let part = PartPath::parse(locator).map_err(|reason| TocError::MalformedToc {
        title: title.to_string(),
        reason,
    })?;
    paths
        .resolve(&part.path)
        .ok_or(TocError::UnresolvedPath(part.path))
}

/// Normalize a raw table of contents into logical chapters
///
/// Rows with the same title as the chapter right before them are treated as
/// continuations: they only add part URLs. Nested rows never start chapters.
pub fn normalize_toc(rows: &[TocRow], paths: &PathMap) -> Result<Vec<TocChapter>, TocError> {
    debug!("Normalizing {} TOC rows against {} paths", rows.len(), paths.len());
    let mut chapters: Vec<TocChapter> = Vec::new();

    for row in flatten(rows) {
        if let Some(last) = chapters.last_mut().filter(|c| c.title == row.title) {
            info!("Found contiguous chapters with the same name, merging {}", row.title);
            for locator in row.path.into_iter().chain(row.nested.iter().copied()) {
                let url = resolve(paths, row.title, locator)?;
                last.push_url(url);
            }
            continue;
        }

        let locator = row.path.ok_or_else(|| TocError::MalformedToc {
            title: row.title.to_string(),
            reason: "row starts a chapter but has no path".to_string(),
        })?;
        let part = PartPath::parse(locator).map_err(|reason| TocError::MalformedToc {
            title: row.title.to_string(),
            reason,
        })?;
        let url = paths
            .resolve(&part.path)
            .ok_or_else(|| TocError::UnresolvedPath(part.path.clone()))?;

        let mut chapter = TocChapter {
            title: row.title.to_string(),
            urls: vec![url.to_string()],
            offset: part.offset,
        };
        for locator in &row.nested {
            let url = resolve(paths, row.title, locator)?;
            chapter.push_url(url);
        }
        debug!("Chapter '{}' starts at {}s of {}", chapter.title, chapter.offset, url);
        chapters.push(chapter);
    }

    Ok(chapters)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested(title: &str, path: &str, children: Vec<TocRow>) -> TocRow {
        TocRow::Nested {
            title: title.to_string(),
            path: Some(path.to_string()),
            children,
        }
    }

    #[test]
    fn test_part_path_offset() {
        let part = PartPath::parse("{12345-6789}Fmt111-Part01.mp3#111").unwrap();
        assert_eq!(part.path, "{12345-6789}Fmt111-Part01.mp3");
        assert_eq!(part.offset, 111.0);
    }

    #[test]
    fn test_part_path_without_fragment() {
        let part = PartPath::parse("part-1").unwrap();
        assert_eq!(part.path, "part-1");
        assert_eq!(part.offset, 0.0);

        let part = PartPath::parse("part-1#").unwrap();
        assert_eq!(part.offset, 0.0);
    }

    #[test]
    fn test_part_path_rejects_non_numeric_fragment() {
        assert!(PartPath::parse("part-1#abc").is_err());
    }

    #[test]
    fn test_contiguous_chapters_merged() {
        let paths: PathMap = [("part-1", "https://path1")].into_iter().collect();
        let toc = vec![
            TocRow::leaf("Chapter 1", "part-1"),
            TocRow::leaf("Chapter 1", "part-1#100"),
            TocRow::leaf("Chapter 2", "part-1#400"),
        ];

        let chapters = normalize_toc(&toc, &paths).unwrap();
        assert_eq!(
            chapters,
            vec![
                TocChapter {
                    title: "Chapter 1".to_string(),
                    urls: vec!["https://path1".to_string()],
                    offset: 0.0,
                },
                TocChapter {
                    title: "Chapter 2".to_string(),
                    urls: vec!["https://path1".to_string()],
                    offset: 400.0,
                },
            ]
        );
    }

    #[test]
    fn test_nested_chapters_merged() {
        let paths: PathMap = [("part-1", "https://path1"), ("part-2", "https://path2")]
            .into_iter()
            .collect();
        let toc = vec![
            TocRow::leaf("Chapter 1", "part-1"),
            nested(
                "Chapter 2",
                "part-1#400",
                vec![
                    TocRow::leaf("Chapter 2 (01:00)", "part-1#600"),
                    TocRow::leaf("Chapter 2 (02:00)", "part-2"),
                ],
            ),
            TocRow::leaf("Chapter 2", "part-2#600"),
        ];

        let chapters = normalize_toc(&toc, &paths).unwrap();
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[1].title, "Chapter 2");
        assert_eq!(chapters[1].offset, 400.0);
        assert_eq!(chapters[1].urls, vec!["https://path1", "https://path2"]);
    }

    #[test]
    fn test_deeply_nested_rows_flatten_in_document_order() {
        let paths: PathMap = [
            ("p1", "https://host/a-Part01.mp3"),
            ("p2", "https://host/a-Part02.mp3"),
            ("p3", "https://host/a-Part03.mp3"),
        ]
        .into_iter()
        .collect();
        let toc = vec![nested(
            "Part One",
            "p1",
            vec![nested(
                "Section",
                "p2",
                vec![TocRow::leaf("Subsection", "p2#30"), TocRow::leaf("Tail", "p3")],
            )],
        )];

        let chapters = normalize_toc(&toc, &paths).unwrap();
        assert_eq!(chapters.len(), 1);
        assert_eq!(
            chapters[0].urls,
            vec![
                "https://host/a-Part01.mp3",
                "https://host/a-Part02.mp3",
                "https://host/a-Part03.mp3"
            ]
        );
    }

    #[test]
    fn test_same_title_not_adjacent_starts_new_chapter() {
        let paths: PathMap = [("p1", "https://path1")].into_iter().collect();
        let toc = vec![
            TocRow::leaf("Interlude", "p1"),
            TocRow::leaf("Chapter 1", "p1#10"),
            TocRow::leaf("Interlude", "p1#20"),
        ];

        let chapters = normalize_toc(&toc, &paths).unwrap();
        let titles: Vec<_> = chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Interlude", "Chapter 1", "Interlude"]);
    }

    #[test]
    fn test_empty_toc() {
        let chapters = normalize_toc(&[], &PathMap::new()).unwrap();
        assert!(chapters.is_empty());
    }

    #[test]
    fn test_unresolved_path() {
        let paths: PathMap = [("part-1", "https://path1")].into_iter().collect();
        let toc = vec![TocRow::leaf("Chapter 1", "part-9#5")];

        let err = normalize_toc(&toc, &paths).unwrap_err();
        assert_eq!(err, TocError::UnresolvedPath("part-9".to_string()));
    }

    #[test]
    fn test_missing_path_on_new_chapter_is_malformed() {
        let paths: PathMap = [("part-1", "https://path1")].into_iter().collect();
        let toc = vec![
            TocRow::leaf("Chapter 1", "part-1"),
            TocRow::Leaf {
                title: "Chapter 1".to_string(),
                path: None,
            },
            TocRow::Leaf {
                title: "Chapter 2".to_string(),
                path: None,
            },
        ];

        let err = normalize_toc(&toc, &paths).unwrap_err();
        assert!(matches!(err, TocError::MalformedToc { ref title, .. } if title == "Chapter 2"));
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let paths: PathMap = [("part-1", "https://path1"), ("part-2", "https://path2")]
            .into_iter()
            .collect();
        let toc = vec![
            TocRow::leaf("A", "part-1"),
            TocRow::leaf("A", "part-2"),
            TocRow::leaf("B", "part-2#10"),
        ];

        let first = normalize_toc(&toc, &paths).unwrap();
        let second = normalize_toc(&toc, &paths).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_deserialize_rows() {
        let json = r#"[
            {"title": "Opening Credits", "path": "a-Part01.mp3"},
            {"title": "Chapter 1", "path": "a-Part01.mp3#35", "contents": [
                {"title": "Chapter 1 (05:00)", "path": "a-Part02.mp3"}
            ]}
        ]"#;
        let rows: Vec<TocRow> = serde_json::from_str(json).unwrap();
        assert!(matches!(rows[0], TocRow::Leaf { .. }));
        match &rows[1] {
            TocRow::Nested { children, .. } => assert_eq!(children.len(), 1),
            other => panic!("expected nested row, got {:?}", other),
        }
    }
}
