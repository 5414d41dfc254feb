//! Timeline accumulation
//!
//! Walks the spine's chapter boundaries in order, fetching parts lazily and
//! exactly once, and folds the part durations into a single running offset.
//! The result is the ordered list of part payloads plus absolute chapter
//! timestamps in the merged stream.
//!
//! A chapter's end can only be computed once the part it ends in has been
//! fetched, and every part before that one has contributed its duration. The
//! end of the final chapter is only known after the last part is in.

use crate::fetch::{FetchError, FetchResult, PartFetcher};
use crate::spine::{ChapterBounds, Position, Spine};
use tracing::{debug, info, warn};

/// Encapsulation of a chapter as it sits in the merged stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub title: String,
    pub start_time_ms: u64,
    pub end_time_ms: u64,
}

impl Chapter {
    pub fn new(title: &str, start_time_ms: u64, end_time_ms: u64) -> Self {
        Self {
            title: title.to_string(),
            start_time_ms,
            end_time_ms,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_time_ms.saturating_sub(self.start_time_ms)
    }
}

/// Output of a full accumulation run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    /// Part payloads in fetch order (ascending part number)
    pub parts: Vec<Vec<u8>>,
    pub chapters: Vec<Chapter>,
    /// Unrounded start of each chapter in seconds, parallel to `chapters`
    pub chapter_starts: Vec<f64>,
    /// Final running offset in seconds
    pub total_seconds: f64,
}

impl Timeline {
    pub fn total_ms(&self) -> u64 {
        to_millis(self.total_seconds)
    }

    /// Concatenate every part payload in order
    pub fn merged(&self) -> Vec<u8> {
        self.parts.concat()
    }
}

/// The last part fetched; its content has already moved into the output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchedPart {
    pub part: u32,
    pub duration: f64,
}

/// Accumulator state carried from one chapter boundary to the next
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimelineState {
    pub current: Option<FetchedPart>,
    /// Running offset in seconds
    pub offset: f64,
}

/// Seconds to milliseconds, rounding half away from zero
///
/// A negative offset means a TOC offset ran past the measured end of its
/// part; it is clamped to 0.
pub fn to_millis(seconds: f64) -> u64 {
    if seconds < 0.0 {
        warn!("Negative offset {:.3}s clamped to 0, TOC offset exceeds part duration", seconds);
    }
    (seconds * 1000.0).round().max(0.0) as u64
}

/// Running offset after `current` has been completely consumed
///
/// If the part is the one the chapter starts in, only the audio after the
/// chapter's start counts, since the offset already sits at that start.
pub fn finalize_part(current: FetchedPart, bounds: &ChapterBounds, offset: f64) -> f64 {
    match bounds.start {
        Position::Bounded { part, offset: start } if part == current.part => {
            debug!(
                "Incrementing by remainder of {}: {}",
                current.part,
                current.duration - start
            );
            offset + current.duration - start
        }
        _ => {
            debug!(
                "Incrementing by full duration of {}: {}",
                current.part, current.duration
            );
            offset + current.duration
        }
    }
}

/// Advance the running offset to a chapter's end
///
/// Returns the new offset and the chapter's end in seconds, or `None` for
/// the end-of-stream sentinel.
pub fn advance_to_end(bounds: &ChapterBounds, offset: f64) -> (f64, Option<f64>) {
    match bounds.end {
        Position::EndOfStream { .. } => (offset, None),
        Position::Bounded { part, offset: end } if part == bounds.start.part() => {
            // both offsets are in the same part, only the difference counts
            let start = bounds.start.offset().unwrap_or(0.0);
            let offset = offset + end - start;
            (offset, Some(offset))
        }
        Position::Bounded { offset: end, .. } => {
            // the offset sits at the start of the part the chapter ends in
            let offset = offset + end;
            (offset, Some(offset))
        }
    }
}

/// Folds chapter boundaries into absolute timestamps, pulling parts from a
/// [`PartFetcher`] as they are needed
pub struct TimelineAccumulator<'a> {
    spine: &'a Spine,
    fetcher: &'a dyn PartFetcher,
    parts: Vec<Vec<u8>>,
}

impl<'a> TimelineAccumulator<'a> {
    pub fn new(spine: &'a Spine, fetcher: &'a dyn PartFetcher) -> Self {
        Self {
            spine,
            fetcher,
            parts: Vec::with_capacity(spine.part_count()),
        }
    }

    /// Run the whole accumulation; any fetch failure aborts it
    pub async fn run(mut self) -> Result<Timeline, FetchError> {
        let spine = self.spine;
        let index = spine.index();
        let mut state = TimelineState::default();
        let mut chapters = Vec::with_capacity(index.len());
        let mut chapter_starts = Vec::with_capacity(index.len());

        for bounds in index {
            chapter_starts.push(state.offset);
            let (next, chapter) = self.step(state, bounds).await?;
            state = next;
            chapters.push(chapter);
        }

        // handle offsets of the last chapter
        if let (Some(current), Some(last)) = (state.current, index.last()) {
            state.offset = finalize_part(current, last, state.offset);
        }
        // the sentinel end of the last chapter is wherever the offset ended up
        if let Some(last) = chapters.last_mut() {
            last.end_time_ms = to_millis(state.offset);
        }

        info!(
            "Timeline complete: {} chapters over {} parts, {:.3}s",
            chapters.len(),
            self.parts.len(),
            state.offset
        );
        Ok(Timeline {
            parts: self.parts,
            chapters,
            chapter_starts,
            total_seconds: state.offset,
        })
    }

    /// Process one chapter boundary, fetching parts until the one the
    /// chapter ends in is available
    pub async fn step(
        &mut self,
        mut state: TimelineState,
        bounds: &ChapterBounds,
    ) -> Result<(TimelineState, Chapter), FetchError> {
        info!(
            "Processing chapter '{}' {:?} to {:?}",
            bounds.title, bounds.start, bounds.end
        );
        let start = state.offset;
        let target = bounds.end.part();

        while state.current.map_or(true, |current| current.part < target) {
            let next_part = match state.current {
                Some(current) => {
                    state.offset = finalize_part(current, bounds, state.offset);
                    current.part + 1
                }
                None => 1,
            };
            let fetched = self.fetch(next_part).await?;
            state.current = Some(FetchedPart {
                part: fetched.part,
                duration: fetched.duration,
            });
            self.parts.push(fetched.content);
        }

        let (offset, end) = advance_to_end(bounds, state.offset);
        state.offset = offset;
        debug!("Current offset {}", state.offset);

        let start_ms = to_millis(start);
        let end_ms = match end {
            Some(end) => to_millis(end),
            None => {
                debug!("End of '{}' deferred until the stream is complete", bounds.title);
                start_ms
            }
        };

        Ok((state, Chapter::new(&bounds.title, start_ms, end_ms)))
    }

    async fn fetch(&self, part: u32) -> Result<FetchResult, FetchError> {
        let url = self
            .spine
            .part_url(part)
            .ok_or(FetchError::MissingPart(part))?;
        info!("Fetching part {}", part);
        let mut result = self.fetcher.fetch(part, url).await?;
        result.part = part;
        Ok(result)
    }
}

/// Convenience wrapper around [`TimelineAccumulator::run`]
pub async fn accumulate(spine: &Spine, fetcher: &dyn PartFetcher) -> Result<Timeline, FetchError> {
    TimelineAccumulator::new(spine, fetcher).run().await
}
