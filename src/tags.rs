use crate::book::BookMeta;
use crate::cue::ChapterTag;
use chrono::NaiveDate;
use id3::frame::{Chapter, ExtendedText, Picture, PictureType, TableOfContents};
use id3::{Frame, Tag, TagLike, Version};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TagError {
    #[error("ID3 error: {0}")]
    Id3(#[from] id3::Error),
    #[error("Chapter '{0}' does not fit in an ID3 chapter frame")]
    ChapterOutOfRange(String),
    #[error("Failed to download cover: {0}")]
    Cover(#[from] reqwest::Error),
}

/// Front cover picture to embed
#[derive(Debug, Clone, PartialEq)]
pub struct CoverImage {
    pub mime_type: String,
    pub description: String,
    pub data: Vec<u8>,
}

impl CoverImage {
    /// Download a cover; the MIME type comes from the response headers
    pub async fn download(
        client: &reqwest::Client,
        href: &str,
        description: &str,
    ) -> Result<Self, TagError> {
        debug!("Fetching cover art from {}", href);
        let response = client.get(href).send().await?.error_for_status()?;
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let data = response.bytes().await?.to_vec();

        Ok(Self {
            mime_type,
            description: description.to_string(),
            data,
        })
    }
}

/// Everything that goes into the tag of an output file
#[derive(Debug, Clone, PartialEq)]
pub struct TagSet {
    pub title: String,
    pub album: String,
    pub artist: String,
    pub composer: String,
    pub track_number: u32,
    pub cover: Option<CoverImage>,
    pub valid_until: Option<NaiveDate>,
    pub chapters: Vec<ChapterTag>,
}

impl TagSet {
    /// Tags for a book: author as artist, narrator as composer
    pub fn for_book(meta: &BookMeta, cover: Option<CoverImage>, valid_until: Option<NaiveDate>) -> Self {
        Self {
            title: meta.title.clone(),
            album: meta.title.clone(),
            artist: meta.author.clone(),
            composer: meta.narrator.clone(),
            track_number: 1,
            cover,
            valid_until,
            chapters: Vec::new(),
        }
    }

    pub fn with_chapters(mut self, chapters: Vec<ChapterTag>) -> Self {
        self.chapters = chapters;
        self
    }
}

/// Applies a tag set to encoded audio (allows mocking for tests)
pub trait TagWriter: Send + Sync {
    fn apply(&self, content: &[u8], tags: &TagSet) -> Result<Vec<u8>, TagError>;
}

/// Writes ID3v2.4 tags, replacing any ID3v2 tag already on the payload
#[derive(Debug, Clone, Copy, Default)]
pub struct Id3TagWriter;

impl Id3TagWriter {
    fn build_tag(tags: &TagSet) -> Result<Tag, TagError> {
        let mut tag = Tag::new();
        tag.set_title(tags.title.clone());
        tag.set_album(tags.album.clone());
        tag.set_artist(tags.artist.clone());
        tag.set_text("TCOM", tags.composer.clone());
        tag.set_track(tags.track_number);

        if let Some(cover) = &tags.cover {
            tag.add_frame(Picture {
                mime_type: cover.mime_type.clone(),
                picture_type: PictureType::CoverFront,
                description: cover.description.clone(),
                data: cover.data.clone(),
            });
        }

        if let Some(date) = tags.valid_until {
            tag.add_frame(ExtendedText {
                description: "VALID_UNTIL".to_string(),
                value: date.format("%Y-%m-%d").to_string(),
            });
        }

        // CHAP frames are keyed by element id, so repeated titles get a suffix
        let mut seen: HashMap<&str, u32> = HashMap::new();
        let mut element_ids = Vec::with_capacity(tags.chapters.len());
        for chapter in &tags.chapters {
            let count = seen.entry(chapter.element_id.as_str()).or_insert(0);
            *count += 1;
            let element_id = if *count == 1 {
                chapter.element_id.clone()
            } else {
                warn!("Duplicate chapter id '{}', renaming", chapter.element_id);
                format!("{} ({})", chapter.element_id, count)
            };

            let start_time = u32::try_from(chapter.start_time_ms)
                .map_err(|_| TagError::ChapterOutOfRange(chapter.element_id.clone()))?;
            let end_time = u32::try_from(chapter.end_time_ms)
                .map_err(|_| TagError::ChapterOutOfRange(chapter.element_id.clone()))?;

            tag.add_frame(Chapter {
                element_id: element_id.clone(),
                start_time,
                end_time,
                start_offset: u32::MAX,
                end_offset: u32::MAX,
                frames: vec![Frame::text("TIT2", chapter.element_id.clone())],
            });
            element_ids.push(element_id);
        }

        if !element_ids.is_empty() {
            tag.add_frame(TableOfContents {
                element_id: "toc".to_string(),
                top_level: true,
                ordered: true,
                elements: element_ids,
                frames: Vec::new(),
            });
        }

        Ok(tag)
    }
}

impl TagWriter for Id3TagWriter {
    fn apply(&self, content: &[u8], tags: &TagSet) -> Result<Vec<u8>, TagError> {
        let tag = Self::build_tag(tags)?;
        let audio = strip_id3v2(content);

        let mut tagged = Vec::with_capacity(audio.len() + 4096);
        tag.write_to(&mut tagged, Version::Id3v24)?;
        tagged.extend_from_slice(audio);
        debug!(
            "Tagged {} bytes of audio with {} chapters",
            audio.len(),
            tags.chapters.len()
        );
        Ok(tagged)
    }
}

/// Skip a leading ID3v2 tag, if there is a complete one
pub fn strip_id3v2(content: &[u8]) -> &[u8] {
    if content.len() < 10 || &content[0..3] != b"ID3" {
        return content;
    }

    // tag size is a 28-bit syncsafe integer
    let size = content[6..10]
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | (*b & 0x7F) as usize);
    let footer = if content[5] & 0x10 != 0 { 10 } else { 0 };
    let total = 10 + size + footer;

    if total <= content.len() {
        &content[total..]
    } else {
        content
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn tag_set() -> TagSet {
        TagSet {
            title: "Book Title".to_string(),
            album: "Book Title".to_string(),
            artist: "Author".to_string(),
            composer: "Narrator".to_string(),
            track_number: 1,
            cover: Some(CoverImage {
                mime_type: "image/jpeg".to_string(),
                description: "A description".to_string(),
                data: vec![0xFF, 0xD8, 0xFF],
            }),
            valid_until: NaiveDate::from_ymd_opt(2026, 11, 1),
            chapters: vec![
                ChapterTag {
                    element_id: "Chapter 1".to_string(),
                    start_time_ms: 0,
                    end_time_ms: 150000,
                },
                ChapterTag {
                    element_id: "Chapter 2".to_string(),
                    start_time_ms: 150000,
                    end_time_ms: 175000,
                },
            ],
        }
    }

    #[test]
    fn test_apply_writes_readable_tag() {
        let audio = vec![0xFF, 0xFB, 0x90, 0x00, 1, 2, 3, 4];
        let tagged = Id3TagWriter.apply(&audio, &tag_set()).unwrap();

        assert!(tagged.ends_with(&audio));
        let tag = Tag::read_from2(Cursor::new(&tagged)).unwrap();
        assert_eq!(tag.title(), Some("Book Title"));
        assert_eq!(tag.artist(), Some("Author"));
        assert_eq!(tag.pictures().count(), 1);

        let chapters: Vec<_> = tag.chapters().collect();
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[1].element_id, "Chapter 2");
        assert_eq!(chapters[1].start_time, 150000);
        assert_eq!(chapters[1].end_time, 175000);
    }

    #[test]
    fn test_apply_replaces_existing_tag() {
        let audio = vec![0xFF, 0xFB, 0x90, 0x00, 9, 9];
        let once = Id3TagWriter.apply(&audio, &tag_set()).unwrap();
        let twice = Id3TagWriter.apply(&once, &tag_set()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_repeated_titles_get_unique_ids() {
        let mut tags = tag_set();
        tags.chapters[1].element_id = "Chapter 1".to_string();
        let tagged = Id3TagWriter.apply(&[0xFF, 0xFB], &tags).unwrap();

        let tag = Tag::read_from2(Cursor::new(&tagged)).unwrap();
        let mut ids: Vec<_> = tag.chapters().map(|c| c.element_id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["Chapter 1", "Chapter 1 (2)"]);
    }

    #[test]
    fn test_strip_leaves_untagged_content() {
        let audio = [0xFF, 0xFB, 0x90, 0x00];
        assert_eq!(strip_id3v2(&audio), &audio);
        // truncated header is left alone
        let broken = [b'I', b'D', b'3', 4, 0, 0, 0, 0, 0x7F, 0x7F];
        assert_eq!(strip_id3v2(&broken), &broken);
    }
}
