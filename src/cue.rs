//! Chapter sheets
//!
//! Renders the finished timeline as a CUE-like sheet for the merged file and
//! as a chapter tag list for embedding. Sheets written here can be parsed back.

use crate::timeline::{Chapter, Timeline};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_until},
    character::complete::{alphanumeric1, digit1, line_ending, space0, space1},
    combinator::{map_res, opt},
    multi::many0,
    IResult,
};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CueError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CUE parsing error: {0}")]
    CueParsing(String),
}

/// A single track of a chapter sheet
#[derive(Debug, Clone, PartialEq)]
pub struct SheetTrack {
    pub number: u32,
    pub title: String,
    pub start_time_ms: u64,
    /// Unrounded start in seconds, the source of the INDEX time
    pub start_seconds: f64,
    /// Known when built from chapters, inferred from the next track on parse
    pub end_time_ms: Option<u64>,
}

/// Chapter sheet for one merged audio file
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterSheet {
    pub title: String,
    pub file: String,
    pub tracks: Vec<SheetTrack>,
}

/// Chapter entry for the embedded tag; the element id doubles as the title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterTag {
    pub element_id: String,
    pub start_time_ms: u64,
    pub end_time_ms: u64,
}

/// Pad a number with a leading 0 if it's < 10
pub fn zero_pad(value: u64) -> String {
    format!("{:02}", value)
}

/// Format whole seconds as `MM:SS`, or `HH:MM:SS` with `with_hours`
///
/// Without hours, minutes keep counting past 59.
pub fn format_timestamp(seconds: u64, with_hours: bool) -> String {
    if with_hours {
        let h = seconds / 3600;
        let m = seconds % 3600 / 60;
        let s = seconds % 60;
        format!("{}:{}:{}", zero_pad(h), zero_pad(m), zero_pad(s))
    } else {
        let m = seconds / 60;
        let s = seconds % 60;
        format!("{}:{}", zero_pad(m), zero_pad(s))
    }
}

/// Seconds to whole seconds, rounding half away from zero
fn whole_seconds(seconds: f64) -> u64 {
    seconds.round().max(0.0) as u64
}

pub fn chapter_tags(chapters: &[Chapter]) -> Vec<ChapterTag> {
    chapters
        .iter()
        .map(|chapter| ChapterTag {
            element_id: chapter.title.clone(),
            start_time_ms: chapter.start_time_ms,
            end_time_ms: chapter.end_time_ms,
        })
        .collect()
}

impl ChapterSheet {
    /// Build the sheet for `<title>.mp3` from finished chapters
    ///
    /// Only millisecond starts are known here; prefer
    /// [`ChapterSheet::from_timeline`] when the unrounded starts are at hand.
    pub fn from_chapters(title: &str, chapters: &[Chapter]) -> Self {
        let starts: Vec<f64> = chapters
            .iter()
            .map(|chapter| chapter.start_time_ms as f64 / 1000.0)
            .collect();
        Self::with_starts(title, chapters, &starts)
    }

    /// Build the sheet from a timeline, rounding each start exactly once
    pub fn from_timeline(title: &str, timeline: &Timeline) -> Self {
        if timeline.chapter_starts.len() == timeline.chapters.len() {
            Self::with_starts(title, &timeline.chapters, &timeline.chapter_starts)
        } else {
            Self::from_chapters(title, &timeline.chapters)
        }
    }

    fn with_starts(title: &str, chapters: &[Chapter], starts: &[f64]) -> Self {
        let tracks = chapters
            .iter()
            .zip(starts)
            .enumerate()
            .map(|(idx, (chapter, start))| SheetTrack {
                number: idx as u32 + 1,
                title: chapter.title.clone(),
                start_time_ms: chapter.start_time_ms,
                start_seconds: *start,
                end_time_ms: Some(chapter.end_time_ms),
            })
            .collect();

        Self {
            title: title.to_string(),
            file: format!("{}.mp3", title),
            tracks,
        }
    }

    /// Render the sheet text; lines are joined with `\n`, no trailing newline
    pub fn render(&self) -> String {
        let mut lines = Vec::with_capacity(2 + self.tracks.len() * 3);
        lines.push(format!("TITLE \"{}\"", self.title));
        lines.push(format!("FILE \"{}\" MP3", self.file));

        for track in &self.tracks {
            lines.push(format!("  TRACK {} AUDIO", zero_pad(track.number as u64)));
            lines.push(format!("    TITLE \"{}\"", track.title));
            // trailing field is the CUE frame count, always 0 here
            lines.push(format!(
                "    INDEX 01 {}:00",
                format_timestamp(whole_seconds(track.start_seconds), false)
            ));
        }

        lines.join("\n")
    }

    /// Parse a sheet file
    pub fn parse_file(path: &Path) -> Result<Self, CueError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse sheet content
    pub fn parse(content: &str) -> Result<Self, CueError> {
        match Self::parse_sheet(content) {
            Ok((_, sheet)) => Ok(sheet),
            Err(e) => Err(CueError::CueParsing(format!("Failed to parse CUE: {}", e))),
        }
    }

    fn parse_sheet(input: &str) -> IResult<&str, ChapterSheet> {
        let (input, title) = Self::parse_keyword_string(input, "TITLE")?;
        let (input, file) = Self::parse_file_line(input)?;
        let (input, mut tracks) = many0(Self::parse_track)(input)?;
        let (input, _) = many0(alt((line_ending, space1)))(input)?;

        // each track ends where the next begins
        for i in 1..tracks.len() {
            tracks[i - 1].end_time_ms = Some(tracks[i].start_time_ms);
        }

        Ok((input, ChapterSheet { title, file, tracks }))
    }

    /// Parse `<keyword> "<value>"` with any leading whitespace
    fn parse_keyword_string<'a>(input: &'a str, keyword: &'static str) -> IResult<&'a str, String> {
        let (input, _) = many0(alt((line_ending, space1)))(input)?;
        let (input, _) = tag(keyword)(input)?;
        let (input, _) = space1(input)?;
        let (input, value) = Self::parse_quoted_string(input)?;
        let (input, _) = space0(input)?;
        let (input, _) = opt(line_ending)(input)?;
        Ok((input, value))
    }

    fn parse_file_line(input: &str) -> IResult<&str, String> {
        let (input, _) = many0(alt((line_ending, space1)))(input)?;
        let (input, _) = tag("FILE")(input)?;
        let (input, _) = space1(input)?;
        let (input, file) = Self::parse_quoted_string(input)?;
        let (input, _) = space1(input)?;
        let (input, _) = alphanumeric1(input)?;
        let (input, _) = opt(line_ending)(input)?;
        Ok((input, file))
    }

    fn parse_track(input: &str) -> IResult<&str, SheetTrack> {
        let (input, _) = many0(alt((line_ending, space1)))(input)?;
        let (input, _) = tag("TRACK")(input)?;
        let (input, _) = space1(input)?;
        let (input, number) = map_res(digit1, |s: &str| s.parse::<u32>())(input)?;
        let (input, _) = space1(input)?;
        let (input, _) = tag("AUDIO")(input)?;
        let (input, _) = opt(line_ending)(input)?;

        let (input, title) = Self::parse_keyword_string(input, "TITLE")?;

        let (input, _) = space0(input)?;
        let (input, _) = tag("INDEX")(input)?;
        let (input, _) = space1(input)?;
        let (input, _) = tag("01")(input)?;
        let (input, _) = space1(input)?;
        let (input, start_time_ms) = Self::parse_time(input)?;
        let (input, _) = opt(line_ending)(input)?;

        Ok((
            input,
            SheetTrack {
                number,
                title,
                start_time_ms,
                start_seconds: start_time_ms as f64 / 1000.0,
                end_time_ms: None,
            },
        ))
    }

    fn parse_quoted_string(input: &str) -> IResult<&str, String> {
        let (input, _) = tag("\"")(input)?;
        let (input, content) = take_until("\"")(input)?;
        let (input, _) = tag("\"")(input)?;
        Ok((input, content.to_string()))
    }

    /// Parse `MM:SS:FF` into milliseconds (75 frames per second)
    fn parse_time(input: &str) -> IResult<&str, u64> {
        let (input, minutes) = map_res(digit1, |s: &str| s.parse::<u64>())(input)?;
        let (input, _) = tag(":")(input)?;
        let (input, seconds) = map_res(digit1, |s: &str| s.parse::<u64>())(input)?;
        let (input, _) = tag(":")(input)?;
        let (input, frames) = map_res(digit1, |s: &str| s.parse::<u64>())(input)?;

        let total_ms = (minutes * 60 * 1000) + (seconds * 1000) + (frames * 1000 / 75);
        Ok((input, total_ms))
    }
}
