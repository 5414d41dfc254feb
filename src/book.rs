//! Book manifest
//!
//! Parses the "openbook" JSON document that describes an audiobook: its
//! title, creators, description, the spine of part files and the navigation
//! TOC. From it we derive the tag metadata and the map from structural path
//! keys to absolute part URLs.

use crate::spine::{build_spine, Spine, SpineError};
use crate::toc::{normalize_toc, PathMap, TocChapter, TocError, TocRow};
use chrono::NaiveDate;
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid manifest JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to download manifest: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookTitle {
    #[serde(default)]
    pub main: String,
    pub subtitle: Option<String>,
    pub collection: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Creator {
    pub name: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Description {
    pub short: Option<String>,
    pub long: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpineEntry {
    pub path: String,
    #[serde(rename = "-odread-original-path")]
    pub original_path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Nav {
    #[serde(default)]
    pub toc: Vec<TocRow>,
}

/// The openbook document as served alongside the audio parts
#[derive(Debug, Clone, Deserialize)]
pub struct BookManifest {
    #[serde(default)]
    pub title: BookTitle,
    #[serde(default)]
    pub creator: Vec<Creator>,
    #[serde(default)]
    pub description: Description,
    #[serde(default)]
    pub spine: Vec<SpineEntry>,
    #[serde(default)]
    pub nav: Nav,
}

/// Metadata that ends up in tags and file names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookMeta {
    pub title: String,
    pub author: String,
    pub narrator: String,
    pub description: String,
}

impl BookManifest {
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        let manifest = Self::from_json(&content)?;
        info!(
            "Loaded manifest '{}' from {}",
            manifest.title.main,
            path.display()
        );
        Ok(manifest)
    }

    /// Download a manifest; its origin is the base URL for the parts
    pub async fn fetch(client: &reqwest::Client, url: &str) -> Result<(Self, Url), ManifestError> {
        let base = Url::parse(url).map_err(|e| ManifestError::InvalidBaseUrl(e.to_string()))?;
        debug!("Fetching manifest from {}", url);
        let body = client.get(url).send().await?.error_for_status()?.text().await?;
        let manifest = Self::from_json(&body)?;
        info!("Fetched manifest '{}'", manifest.title.main);
        Ok((manifest, base))
    }

    /// `main: subtitle (collection)`, leaving out whichever parts are absent
    pub fn full_title(&self) -> String {
        let mut title = self.title.main.clone();
        if let Some(subtitle) = self.title.subtitle.as_deref().filter(|s| !s.is_empty()) {
            title.push_str(": ");
            title.push_str(subtitle);
        }
        if let Some(collection) = self.title.collection.as_deref().filter(|s| !s.is_empty()) {
            title.push_str(&format!(" ({})", collection));
        }
        title
    }

    fn creators_with_role(&self, role: &str) -> String {
        self.creator
            .iter()
            .filter(|c| c.role.eq_ignore_ascii_case(role))
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn meta(&self) -> BookMeta {
        let description = self
            .description
            .short
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| self.description.long.clone())
            .unwrap_or_default();

        BookMeta {
            title: self.full_title(),
            author: self.creators_with_role("author"),
            narrator: self.creators_with_role("narrator"),
            description,
        }
    }

    /// Map every spine entry's original path to `<scheme>://<host>/<path>`
    pub fn path_map(&self, base: &Url) -> Result<PathMap, ManifestError> {
        let host = base
            .host_str()
            .ok_or_else(|| ManifestError::InvalidBaseUrl(base.to_string()))?;
        let origin = match base.port() {
            Some(port) => format!("{}://{}:{}", base.scheme(), host, port),
            None => format!("{}://{}", base.scheme(), host),
        };

        Ok(self
            .spine
            .iter()
            .map(|entry| {
                let url = format!("{}/{}", origin, entry.path.trim_start_matches('/'));
                (entry.original_path.clone(), url)
            })
            .collect())
    }

    /// Normalize the nav TOC against the spine entries
    pub fn chapters(&self, base: &Url) -> Result<Vec<TocChapter>, BookError> {
        let paths = self.path_map(base)?;
        Ok(normalize_toc(&self.nav.toc, &paths)?)
    }

    pub fn build_spine(&self, base: &Url) -> Result<Spine, BookError> {
        let chapters = self.chapters(base)?;
        Ok(build_spine(&chapters)?)
    }
}

/// Anything that can go wrong turning a manifest into a spine
#[derive(Debug, Error)]
pub enum BookError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Toc(#[from] TocError),
    #[error(transparent)]
    Spine(#[from] SpineError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoverRef {
    pub href: String,
}

/// Media record listing the available cover sizes
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookMedia {
    #[serde(default)]
    pub covers: HashMap<String, CoverRef>,
}

impl BookMedia {
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The medium-size cover first, then the small one, then the large one
    pub fn preferred_cover(&self) -> Option<&str> {
        ["cover300Wide", "cover150Wide", "cover510Wide"]
            .iter()
            .find_map(|key| self.covers.get(*key))
            .map(|cover| cover.href.as_str())
    }
}

/// A manifest together with everything needed to package it
#[derive(Debug, Clone)]
pub struct Book {
    pub meta: BookMeta,
    pub spine: Spine,
    pub expires: NaiveDate,
}

impl Book {
    pub fn from_manifest(
        manifest: &BookManifest,
        base: &Url,
        expires: NaiveDate,
    ) -> Result<Self, BookError> {
        Ok(Self {
            meta: manifest.meta(),
            spine: manifest.build_spine(base)?,
            expires,
        })
    }
}
