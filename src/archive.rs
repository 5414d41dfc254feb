use chrono::NaiveDate;
use regex::Regex;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Longest title used in a merged archive name, in characters
pub const MERGED_TITLE_LIMIT: usize = 25;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// A file to place in the archive
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

fn unsafe_chars() -> &'static Regex {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    UNSAFE.get_or_init(|| Regex::new(r#"[/\\?%*:|"<>]"#).expect("valid regex"))
}

/// Remove characters that are not allowed in file names
pub fn clean_filename(name: &str) -> String {
    unsafe_chars().replace_all(name, "").into_owned()
}

/// `<title>_DUE_<Www Mmm DD YYYY>.zip`, cleaned
pub fn archive_name(title: &str, expires: NaiveDate) -> String {
    clean_filename(&format!(
        "{}_DUE_{}.zip",
        title,
        expires.format("%a %b %d %Y")
    ))
}

/// First `limit` characters of a title
pub fn truncate_title(title: &str, limit: usize) -> String {
    title.chars().take(limit).collect()
}

/// Write entries to `dir/name`
///
/// The zip is assembled under a temporary name and renamed into place once
/// complete, so a failed run never leaves a partial archive behind. Any
/// directory prefixes in entry names are created as folder entries.
pub fn write_archive(dir: &Path, name: &str, entries: &[ArchiveEntry]) -> Result<PathBuf, ArchiveError> {
    fs::create_dir_all(dir)?;
    let target = dir.join(name);
    let temp = dir.join(format!(".{}.part", name));
    debug!("Writing {} entries to {}", entries.len(), temp.display());

    if let Err(e) = write_zip(&temp, entries) {
        if let Err(cleanup) = fs::remove_file(&temp) {
            warn!("Failed to remove {}: {}", temp.display(), cleanup);
        }
        return Err(e);
    }

    fs::rename(&temp, &target)?;
    info!("Wrote archive {}", target.display());
    Ok(target)
}

fn write_zip(path: &Path, entries: &[ArchiveEntry]) -> Result<(), ArchiveError> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    // MP3 does not deflate; a fixed timestamp keeps the output reproducible
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(zip::DateTime::default());

    let mut folders: Vec<String> = Vec::new();
    for entry in entries {
        if let Some((folder, _)) = entry.name.rsplit_once('/') {
            let folder = format!("{}/", folder);
            if !folders.contains(&folder) {
                zip.add_directory(folder.clone(), options)?;
                folders.push(folder);
            }
        }
        zip.start_file(entry.name.clone(), options)?;
        zip.write_all(&entry.data)?;
    }

    zip.finish()?.sync_all()?;
    Ok(())
}
