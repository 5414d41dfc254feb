use crate::progress::ProgressReporter;
use std::io::Cursor;
use std::sync::Arc;
use symphonia::core::{
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Symphonia error: {0}")]
    Symphonia(#[from] SymphoniaError),
    #[error("No audio tracks found")]
    NoAudioTracks,
    #[error("Stream has no sample rate")]
    NoSampleRate,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request for part {part} failed: {source}")]
    Request {
        part: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("Part {part} returned HTTP status {status}")]
    Status { part: u32, status: u16 },
    #[error("Failed to measure duration of part {part}: {source}")]
    Probe {
        part: u32,
        #[source]
        source: ProbeError,
    },
    #[error("Part {0} is not in the spine")]
    MissingPart(u32),
    #[error("Background task failed: {0}")]
    Task(String),
}

/// Part number, file content, and measured duration in seconds
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub part: u32,
    pub content: Vec<u8>,
    pub duration: f64,
}

impl FetchResult {
    pub fn new(part: u32, content: Vec<u8>, duration: f64) -> Self {
        Self {
            part,
            content,
            duration,
        }
    }
}

/// Retrieves part payloads (allows mocking for tests)
#[async_trait::async_trait]
pub trait PartFetcher: Send + Sync {
    /// Raw bytes of a part, no duration measurement
    async fn fetch_content(&self, part: u32, url: &str) -> Result<Vec<u8>, FetchError>;

    /// Bytes plus the part's duration
    async fn fetch(&self, part: u32, url: &str) -> Result<FetchResult, FetchError>;
}

/// Measures the playing time of an encoded part
pub trait DurationProber: Send + Sync {
    fn probe(&self, content: &[u8]) -> Result<f64, ProbeError>;
}

/// How [`SymphoniaProber`] arrives at a duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurationMode {
    /// Frame count from the container header, packet durations as fallback
    #[default]
    Metadata,
    /// Decode every packet and count the frames
    Decode,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaProber {
    mode: DurationMode,
}

impl SymphoniaProber {
    pub fn new(mode: DurationMode) -> Self {
        Self { mode }
    }
}

impl DurationProber for SymphoniaProber {
    fn probe(&self, content: &[u8]) -> Result<f64, ProbeError> {
        let cursor = Cursor::new(content.to_vec());
        let media_source = MediaSourceStream::new(Box::new(cursor), Default::default());

        let mut hint = Hint::new();
        hint.with_extension("mp3");

        let probed = symphonia::default::get_probe().format(
            &hint,
            media_source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(ProbeError::NoAudioTracks)?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let sample_rate = codec_params.sample_rate.ok_or(ProbeError::NoSampleRate)? as f64;

        if self.mode == DurationMode::Metadata {
            if let Some(n_frames) = codec_params.n_frames {
                return Ok(n_frames as f64 / sample_rate);
            }
            debug!("No frame count in header, summing packet durations");
        }

        let mut decoder = match self.mode {
            DurationMode::Decode => Some(
                symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?,
            ),
            DurationMode::Metadata => None,
        };

        let mut frames: u64 = 0;
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(e) => return Err(ProbeError::Symphonia(e)),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.as_mut() {
                Some(decoder) => match decoder.decode(&packet) {
                    Ok(decoded) => frames += decoded.frames() as u64,
                    // corrupt frames are skipped, the rest still counts
                    Err(SymphoniaError::DecodeError(e)) => warn!("Skipping undecodable packet: {}", e),
                    Err(e) => return Err(ProbeError::Symphonia(e)),
                },
                None => frames += packet.dur,
            }
        }

        match (decoder.is_none(), codec_params.time_base) {
            (true, Some(time_base)) => {
                let time = time_base.calc_time(frames);
                Ok(time.seconds as f64 + time.frac)
            }
            _ => Ok(frames as f64 / sample_rate),
        }
    }
}

/// Production fetcher: downloads parts over HTTP
pub struct HttpPartFetcher {
    client: reqwest::Client,
    prober: Arc<dyn DurationProber>,
    progress: ProgressReporter,
    decode: bool,
}

impl HttpPartFetcher {
    pub fn new(
        user_agent: &str,
        mode: DurationMode,
        progress: ProgressReporter,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            client,
            prober: Arc::new(SymphoniaProber::new(mode)),
            progress,
            decode: mode == DurationMode::Decode,
        })
    }

    /// Replace the duration prober
    pub fn with_prober(mut self, prober: Arc<dyn DurationProber>) -> Self {
        self.prober = prober;
        self
    }

    async fn download(&self, part: u32, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Request { part, source })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                part,
                status: response.status().as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| FetchError::Request { part, source })?;
        Ok(bytes.to_vec())
    }

    async fn measure(&self, part: u32, content: Vec<u8>) -> Result<(Vec<u8>, f64), FetchError> {
        let prober = self.prober.clone();
        // Decoding is CPU bound; keep it off the async runtime
        let (content, duration) = tokio::task::spawn_blocking(move || {
            let duration = prober.probe(&content);
            (content, duration)
        })
        .await
        .map_err(|e| FetchError::Task(e.to_string()))?;

        let duration = duration.map_err(|source| FetchError::Probe { part, source })?;
        Ok((content, duration))
    }
}

#[async_trait::async_trait]
impl PartFetcher for HttpPartFetcher {
    async fn fetch_content(&self, part: u32, url: &str) -> Result<Vec<u8>, FetchError> {
        let task = self.progress.start(&format!("Part{:02}", part), "Download");
        info!("Fetching {}", url);

        match self.download(part, url).await {
            Ok(content) => {
                debug!("Part {} downloaded, {} bytes", part, content.len());
                task.complete();
                Ok(content)
            }
            Err(e) => {
                task.fail(&e.to_string());
                Err(e)
            }
        }
    }

    async fn fetch(&self, part: u32, url: &str) -> Result<FetchResult, FetchError> {
        let content = self.fetch_content(part, url).await?;

        let label = if self.decode {
            "Decoding Audio"
        } else {
            "Reading Metadata"
        };
        let task = self.progress.start(&format!("Part{:02}", part), label);
        match self.measure(part, content).await {
            Ok((content, duration)) => {
                debug!("Part {} lasts {:.3}s", part, duration);
                task.complete();
                Ok(FetchResult::new(part, content, duration))
            }
            Err(e) => {
                task.fail(&e.to_string());
                Err(e)
            }
        }
    }
}
