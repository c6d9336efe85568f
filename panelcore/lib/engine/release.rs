use futures::StreamExt;
use reqwest::{header, Client};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use semver::Version;
use serde::Deserialize;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

use crate::{
    config::{DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_HTTP_TIMEOUT},
    PanelcoreResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The GitHub release index of the engine.
pub const RELEASES_API_URL: &str = "https://api.github.com/repos/XTLS/Xray-core/releases";

/// The base URL release archives are downloaded from.
pub const RELEASE_DOWNLOAD_URL: &str = "https://github.com/XTLS/Xray-core/releases/download";

/// The oldest engine release offered for installation.
pub const MINIMUM_ENGINE_VERSION: Version = Version::new(25, 3, 3);

const RELEASES_PER_PAGE: usize = 100;

const MAX_RELEASE_PAGES: usize = 10;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A client for the engine's published releases.
#[derive(Debug, Clone)]
pub struct ReleaseClient {
    client: ClientWithMiddleware,
    api_url: String,
    download_url: String,
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ReleaseClient {
    /// Creates a client for the upstream GitHub releases with retries on transient errors.
    pub fn new() -> PanelcoreResult<Self> {
        Self::with_urls(RELEASES_API_URL, RELEASE_DOWNLOAD_URL)
    }

    /// Creates a client against a mirror of the release index and downloads.
    pub fn with_urls(
        api_url: impl Into<String>,
        download_url: impl Into<String>,
    ) -> PanelcoreResult<Self> {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let inner = Client::builder()
            .user_agent(concat!("panelctl/", env!("CARGO_PKG_VERSION")))
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()?;
        let client = ClientBuilder::new(inner)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            api_url: api_url.into(),
            download_url: download_url.into(),
        })
    }

    /// Every release tag in index order.
    pub async fn list_tags(&self) -> PanelcoreResult<Vec<String>> {
        let mut tags = Vec::new();
        for page in 1..=MAX_RELEASE_PAGES {
            let url = format!(
                "{}?per_page={}&page={}",
                self.api_url, RELEASES_PER_PAGE, page
            );
            tracing::debug!("fetching release index page {}", page);

            let releases: Vec<Release> = self
                .client
                .get(&url)
                .header(header::ACCEPT, "application/vnd.github+json")
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            let last_page = releases.len() < RELEASES_PER_PAGE;
            tags.extend(releases.into_iter().map(|release| release.tag_name));
            if last_page {
                break;
            }
        }

        Ok(tags)
    }

    /// The release tags that can be installed, in index order.
    pub async fn available_versions(&self) -> PanelcoreResult<Vec<String>> {
        Ok(filter_versions(self.list_tags().await?))
    }

    /// Downloads the archive `asset` of release `version` into a temporary file.
    pub async fn download(&self, version: &str, asset: &str) -> PanelcoreResult<NamedTempFile> {
        let url = format!("{}/{}/{}", self.download_url, version, asset);
        tracing::info!("downloading engine release from {}", url);

        let response = self
            .client
            .get(&url)
            .timeout(DEFAULT_DOWNLOAD_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;

        let archive = NamedTempFile::new()?;
        let mut file = tokio::fs::File::from_std(archive.reopen()?);
        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            downloaded += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        tracing::info!("downloaded {} bytes of {}", downloaded, asset);
        Ok(archive)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses a release tag of the form `[v]MAJOR.MINOR.PATCH`.
///
/// Pre-release suffixes and any other shape are rejected.
pub fn parse_release_version(tag: &str) -> Option<Version> {
    let digits = tag.strip_prefix('v').unwrap_or(tag);
    let mut parts = digits.split('.');

    let mut next = || {
        parts
            .next()
            .filter(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|part| part.parse::<u64>().ok())
    };

    let version = Version::new(next()?, next()?, next()?);
    match parts.next() {
        Some(_) => None,
        None => Some(version),
    }
}

/// Keeps the tags at or above [`MINIMUM_ENGINE_VERSION`], preserving their order and spelling.
pub fn filter_versions(tags: impl IntoIterator<Item = String>) -> Vec<String> {
    tags.into_iter()
        .filter(|tag| {
            parse_release_version(tag).is_some_and(|version| version >= MINIMUM_ENGINE_VERSION)
        })
        .collect()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
