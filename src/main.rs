use bookspine::book::{Book, BookError, BookManifest, BookMedia, ManifestError};
use bookspine::config::{Config, ConfigError};
use bookspine::cue::{format_timestamp, ChapterSheet, CueError};
use bookspine::fetch::{DurationMode, HttpPartFetcher};
use bookspine::process::{ProcessError, Processor};
use bookspine::progress::{ProgressEvent, ProgressReporter};
use bookspine::spine::Position;
use bookspine::tags::{CoverImage, Id3TagWriter, TagError};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use reqwest::Url;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info, warn};

/// Download a multi-part audiobook as one chaptered MP3 or as tagged parts
#[derive(Parser, Debug)]
#[command(name = "bookspine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge all parts into one MP3 with chapters and a CUE sheet
    Merge(BookArgs),
    /// Tag every part as delivered and zip them into a folder
    Parts(BookArgs),
    /// Print the normalized chapter list
    Chapters(ManifestArgs),
    /// Parse a CUE sheet and print its tracks
    Inspect {
        sheet: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ManifestArgs {
    /// Openbook manifest, a local file or an http(s) URL
    #[arg(long)]
    manifest: String,

    /// Base URL the part paths are relative to (defaults to the manifest URL)
    #[arg(long)]
    base_url: Option<String>,
}

#[derive(Args, Debug)]
struct BookArgs {
    #[command(flatten)]
    source: ManifestArgs,

    /// Loan expiry date, YYYY-MM-DD (defaults to today)
    #[arg(long)]
    expires: Option<NaiveDate>,

    /// Cover image URL
    #[arg(long)]
    cover: Option<String>,

    /// Media JSON listing cover sizes, used when --cover is not given
    #[arg(long)]
    media: Option<PathBuf>,

    /// Output directory
    #[arg(long, env = "BOOKSPINE_OUTPUT_DIR")]
    output: Option<PathBuf>,

    /// Measure durations by decoding the audio
    #[arg(long)]
    decode: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Book(#[from] BookError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Tag(#[from] TagError),
    #[error(transparent)]
    Cue(#[from] CueError),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("A local manifest needs --base-url")]
    MissingBaseUrl,
}

#[tokio::main]
async fn main() {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = Config::load()?;
    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .build()?;

    match cli.command {
        Command::Merge(args) => {
            let path = process_book(&config, &client, &args, true).await?;
            println!("{}", path.display());
        }
        Command::Parts(args) => {
            let path = process_book(&config, &client, &args, false).await?;
            println!("{}", path.display());
        }
        Command::Chapters(args) => {
            let (manifest, base) = load_manifest(&client, &args).await?;
            let spine = manifest.build_spine(&base)?;
            for (part, url) in spine.part_files() {
                println!("Part {:02}  {}", part, url);
            }
            for bounds in spine.index() {
                println!("{}  {}", describe(&bounds.start), bounds.title);
            }
        }
        Command::Inspect { sheet } => {
            let sheet = ChapterSheet::parse_file(&sheet)?;
            println!("{} ({})", sheet.title, sheet.file);
            for track in &sheet.tracks {
                println!(
                    "  {:02}  {}  {}",
                    track.number,
                    format_timestamp(track.start_time_ms / 1000, true),
                    track.title
                );
            }
        }
    }

    Ok(())
}

fn describe(position: &Position) -> String {
    match position {
        Position::Bounded { part, offset } => format!("Part {:02} @ {:>9.3}s", part, offset),
        Position::EndOfStream { part } => format!("Part {:02} @ end", part),
    }
}

async fn load_manifest(
    client: &reqwest::Client,
    args: &ManifestArgs,
) -> Result<(BookManifest, Url), CliError> {
    let base_override = args
        .base_url
        .as_deref()
        .map(|url| Url::parse(url).map_err(|e| ManifestError::InvalidBaseUrl(e.to_string())))
        .transpose()?;

    if args.manifest.starts_with("http://") || args.manifest.starts_with("https://") {
        let (manifest, origin) = BookManifest::fetch(client, &args.manifest).await?;
        Ok((manifest, base_override.unwrap_or(origin)))
    } else {
        let manifest = BookManifest::load(&PathBuf::from(&args.manifest))?;
        let base = base_override.ok_or(CliError::MissingBaseUrl)?;
        Ok((manifest, base))
    }
}

async fn process_book(
    config: &Config,
    client: &reqwest::Client,
    args: &BookArgs,
    merge: bool,
) -> Result<PathBuf, CliError> {
    let (manifest, base) = load_manifest(client, &args.source).await?;
    let expires = args
        .expires
        .unwrap_or_else(|| chrono::Local::now().date_naive());
    let book = Book::from_manifest(&manifest, &base, expires)?;

    let cover_href = match (&args.cover, &args.media) {
        (Some(href), _) => Some(href.clone()),
        (None, Some(path)) => {
            let media = BookMedia::from_json(&std::fs::read_to_string(path).map_err(ManifestError::from)?)?;
            media.preferred_cover().map(str::to_string)
        }
        (None, None) => None,
    };
    let cover = match cover_href {
        Some(href) => Some(CoverImage::download(client, &href, &book.meta.description).await?),
        None => {
            warn!("No cover image given, tagging without one");
            None
        }
    };

    let mode = if args.decode {
        DurationMode::Decode
    } else {
        config.duration_mode
    };
    let output_dir = args.output.clone().unwrap_or_else(|| config.output_dir.clone());

    let (progress, mut rx) = ProgressReporter::channel();
    let logger = tokio::spawn(async move {
        let mut tasks = HashMap::new();
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::TaskAdded(task) => {
                    info!("[{}] {}: {}", task.state, task.filename, task.task);
                    tasks.insert(task.id.clone(), task);
                }
                ProgressEvent::TaskUpdated { id, state, error } => {
                    if let Some(task) = tasks.remove(&id) {
                        match error {
                            Some(e) => warn!("[{}] {}: {} ({})", state, task.filename, task.task, e),
                            None => info!("[{}] {}: {}", state, task.filename, task.task),
                        }
                    }
                }
            }
        }
    });

    let fetcher = HttpPartFetcher::new(&config.user_agent, mode, progress.clone())?;
    let tag_writer = Id3TagWriter;
    let processor = Processor::new(&fetcher, &tag_writer, output_dir).with_progress(progress);

    let result = if merge {
        processor.merge(&book, cover).await
    } else {
        processor.parts(&book, cover).await
    };

    drop(processor);
    drop(fetcher);
    let _ = logger.await;
    Ok(result?)
}
