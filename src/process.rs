//! End-to-end processing
//!
//! Two ways to turn a book into an archive:
//! - merge: accumulate the timeline, concatenate every part into one MP3,
//!   tag it with chapters and ship it next to a chapter sheet
//! - parts: tag each part as it is and ship them in a folder

use crate::archive::{
    archive_name, clean_filename, truncate_title, write_archive, ArchiveEntry, ArchiveError,
    MERGED_TITLE_LIMIT,
};
use crate::book::{Book, BookError};
use crate::cue::{chapter_tags, ChapterSheet, ChapterTag};
use crate::fetch::{FetchError, PartFetcher};
use crate::progress::ProgressReporter;
use crate::spine::Spine;
use crate::tags::{CoverImage, TagError, TagSet, TagWriter};
use crate::timeline::{accumulate, Timeline};
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Book(#[from] BookError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Tag(#[from] TagError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("Background task failed: {0}")]
    Task(String),
}

/// Timeline plus the chapter outputs derived from it
#[derive(Debug, Clone, PartialEq)]
pub struct MergedArtifact {
    pub timeline: Timeline,
    pub sheet: ChapterSheet,
    pub chapter_tags: Vec<ChapterTag>,
}

impl MergedArtifact {
    pub fn merged_audio(&self) -> Vec<u8> {
        self.timeline.merged()
    }
}

/// Fetch every part and compute chapter timestamps for the merged stream
pub async fn process_mp3_files(
    spine: &Spine,
    title: &str,
    fetcher: &dyn PartFetcher,
) -> Result<MergedArtifact, FetchError> {
    let timeline = accumulate(spine, fetcher).await?;
    let sheet = ChapterSheet::from_timeline(title, &timeline);
    let chapter_tags = chapter_tags(&timeline.chapters);

    Ok(MergedArtifact {
        timeline,
        sheet,
        chapter_tags,
    })
}

pub struct Processor<'a> {
    fetcher: &'a dyn PartFetcher,
    tag_writer: &'a dyn TagWriter,
    output_dir: PathBuf,
    progress: ProgressReporter,
}

impl<'a> Processor<'a> {
    pub fn new(
        fetcher: &'a dyn PartFetcher,
        tag_writer: &'a dyn TagWriter,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            fetcher,
            tag_writer,
            output_dir,
            progress: ProgressReporter::disabled(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Single MP3 with embedded chapters plus a chapter sheet
    pub async fn merge(&self, book: &Book, cover: Option<CoverImage>) -> Result<PathBuf, ProcessError> {
        let title = &book.meta.title;
        info!("Merging '{}' from {} parts", title, book.spine.part_count());

        let filename = clean_filename(title);
        let mut artifact = process_mp3_files(&book.spine, title, self.fetcher).await?;
        // the sheet points at the file as it is named inside the archive
        artifact.sheet.file = format!("{}.mp3", filename);

        let tags = TagSet::for_book(&book.meta, cover, Some(book.expires))
            .with_chapters(artifact.chapter_tags.clone());
        let tagged = self.tag_writer.apply(&artifact.merged_audio(), &tags)?;

        let entries = vec![
            ArchiveEntry::new(format!("{}.cue", filename), artifact.sheet.render().into_bytes()),
            ArchiveEntry::new(format!("{}.mp3", filename), tagged),
        ];
        let name = archive_name(&truncate_title(title, MERGED_TITLE_LIMIT), book.expires);
        self.package(name, entries).await
    }

    /// Every part as delivered, tagged, in a folder named after the book
    pub async fn parts(&self, book: &Book, cover: Option<CoverImage>) -> Result<PathBuf, ProcessError> {
        let title = &book.meta.title;
        info!("Packaging '{}' as {} parts", title, book.spine.part_count());

        let tags = TagSet::for_book(&book.meta, cover, Some(book.expires));
        let folder = clean_filename(title);
        let mut entries = Vec::with_capacity(book.spine.part_count());

        for (part, url) in book.spine.part_files() {
            let content = self.fetcher.fetch_content(part, url).await?;
            let tagged = self.tag_writer.apply(&content, &tags)?;
            entries.push(ArchiveEntry::new(
                format!("{}/Part-{:02}.mp3", folder, part),
                tagged,
            ));
        }

        self.package(archive_name(title, book.expires), entries).await
    }

    async fn package(&self, name: String, entries: Vec<ArchiveEntry>) -> Result<PathBuf, ProcessError> {
        let task = self.progress.start(&name, "Packaging");
        let dir = self.output_dir.clone();

        let result = tokio::task::spawn_blocking(move || write_archive(&dir, &name, &entries))
            .await
            .map_err(|e| ProcessError::Task(e.to_string()))
            .and_then(|r| r.map_err(ProcessError::from));

        match &result {
            Ok(_) => task.complete(),
            Err(e) => task.fail(&e.to_string()),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchResult;
    use crate::spine::build_spine;
    use crate::toc::TocChapter;

    struct StaticFetcher;

    #[async_trait::async_trait]
    impl PartFetcher for StaticFetcher {
        async fn fetch_content(&self, part: u32, _url: &str) -> Result<Vec<u8>, FetchError> {
            Ok(vec![part as u8; 4])
        }

        async fn fetch(&self, part: u32, url: &str) -> Result<FetchResult, FetchError> {
            Ok(FetchResult::new(part, self.fetch_content(part, url).await?, 60.0))
        }
    }

    /// Serves parts with fixed, per-part durations
    struct TimedFetcher(Vec<f64>);

    #[async_trait::async_trait]
    impl PartFetcher for TimedFetcher {
        async fn fetch_content(&self, part: u32, _url: &str) -> Result<Vec<u8>, FetchError> {
            Ok(vec![part as u8])
        }

        async fn fetch(&self, part: u32, url: &str) -> Result<FetchResult, FetchError> {
            let duration = self.0[part as usize - 1];
            Ok(FetchResult::new(part, self.fetch_content(part, url).await?, duration))
        }
    }

    #[tokio::test]
    async fn test_process_mp3_files() {
        let spine = build_spine(&[
            TocChapter {
                title: "One".to_string(),
                urls: vec!["https://h/b-Part01.mp3".to_string()],
                offset: 0.0,
            },
            TocChapter {
                title: "Two".to_string(),
                urls: vec!["https://h/b-Part02.mp3".to_string()],
                offset: 30.0,
            },
        ])
        .unwrap();

        let artifact = process_mp3_files(&spine, "Book", &StaticFetcher).await.unwrap();
        assert_eq!(artifact.merged_audio(), vec![1, 1, 1, 1, 2, 2, 2, 2]);
        assert_eq!(artifact.chapter_tags.len(), 2);
        assert_eq!(artifact.chapter_tags[0].end_time_ms, 90000);
        assert_eq!(artifact.chapter_tags[1].start_time_ms, 90000);
        assert_eq!(artifact.chapter_tags[1].end_time_ms, 120000);
        assert!(artifact.sheet.render().contains("INDEX 01 01:30:00"));
    }

    #[tokio::test]
    async fn test_sheet_index_rounds_from_seconds() {
        let spine = build_spine(&[
            TocChapter {
                title: "A".to_string(),
                urls: vec!["https://h/b-Part01.mp3".to_string()],
                offset: 0.0,
            },
            TocChapter {
                title: "B".to_string(),
                urls: vec!["https://h/b-Part02.mp3".to_string()],
                offset: 0.0,
            },
        ])
        .unwrap();

        let artifact = process_mp3_files(&spine, "Book", &TimedFetcher(vec![1.4996, 10.0]))
            .await
            .unwrap();
        // the tag keeps millisecond precision, the sheet rounds the raw start
        assert_eq!(artifact.chapter_tags[1].start_time_ms, 1500);
        assert!(artifact.sheet.render().ends_with("INDEX 01 00:01:00"));
    }
}
