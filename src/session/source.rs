// src/session/source.rs

//! Turning raw input locators into local files
//!
//! Local paths are checked and used in place. Remote locators go through a
//! [`NetworkResolver`], which downloads into the session's cache directory
//! and reports [`ProgressEvent::Preparing`] while it does.

use crate::analyser::DataEntity;
use crate::error::{Error, Result};
use crate::progress::{ProgressEvent, ProgressStream};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

/// One input as given by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLocator {
    Path(PathBuf),
    Url(Url),
}

impl InputLocator {
    /// `http(s)://` and other URL schemes become [`InputLocator::Url`],
    /// `file://` URLs and everything else a path
    pub fn parse(s: &str) -> Self {
        match Url::parse(s) {
            Ok(url) if url.scheme() == "file" => match url.to_file_path() {
                Ok(path) => InputLocator::Path(path),
                Err(()) => InputLocator::Url(url),
            },
            // Single-letter schemes are Windows drive letters
            Ok(url) if url.scheme().len() > 1 => InputLocator::Url(url),
            _ => InputLocator::Path(PathBuf::from(s)),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, InputLocator::Url(_))
    }
}

impl fmt::Display for InputLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputLocator::Path(path) => write!(f, "{}", path.display()),
            InputLocator::Url(url) => write!(f, "{}", url),
        }
    }
}

impl From<PathBuf> for InputLocator {
    fn from(path: PathBuf) -> Self {
        InputLocator::Path(path)
    }
}

impl From<&Path> for InputLocator {
    fn from(path: &Path) -> Self {
        InputLocator::Path(path.to_path_buf())
    }
}

/// Fetches remote input into a cache directory
#[async_trait]
pub trait NetworkResolver: Send + Sync {
    async fn resolve(
        &self,
        url: &Url,
        cache_dir: &Path,
        progress: &ProgressStream,
        cancel: &CancellationToken,
    ) -> Result<Vec<DataEntity>>;
}

/// Downloads `http` and `https` locators with reqwest
#[derive(Debug, Clone, Default)]
pub struct HttpNetworkResolver {
    client: reqwest::Client,
}

impl HttpNetworkResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// File name for a download of `url`
fn download_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}.apk", uuid::Uuid::new_v4()))
}

#[async_trait]
impl NetworkResolver for HttpNetworkResolver {
    async fn resolve(
        &self,
        url: &Url,
        cache_dir: &Path,
        progress: &ProgressStream,
        cancel: &CancellationToken,
    ) -> Result<Vec<DataEntity>> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InputResolution(format!(
                "unsupported locator scheme '{}'",
                url.scheme()
            )));
        }

        tokio::fs::create_dir_all(cache_dir).await?;
        let target = cache_dir.join(download_name(url));
        info!("Downloading {} to {}", url, target.display());

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Download(format!("{}: {}", url, e)))?;
        let total = response.content_length();

        let mut file = tokio::fs::File::create(&target).await?;
        let mut received: u64 = 0;
        progress.emit(ProgressEvent::Preparing(0.0));

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&target).await;
                    return Err(Error::Cancelled);
                }
                chunk = response.chunk() => {
                    chunk.map_err(|e| Error::Download(format!("{}: {}", url, e)))?
                }
            };
            let Some(chunk) = chunk else { break };
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            if let Some(total) = total.filter(|t| *t > 0) {
                progress.emit(ProgressEvent::Preparing(
                    (received as f32 / total as f32).min(1.0),
                ));
            }
        }
        file.flush().await?;
        progress.emit(ProgressEvent::Preparing(1.0));

        debug!("Downloaded {} bytes from {}", received, url);
        Ok(vec![DataEntity::downloaded(target, url.clone())])
    }
}

/// Check a local locator and wrap it as a data entity
pub(crate) fn resolve_local(path: &Path) -> Result<DataEntity> {
    let meta = std::fs::metadata(path).map_err(|e| {
        Error::InputResolution(format!("cannot read {}: {}", path.display(), e))
    })?;
    if !meta.is_file() {
        return Err(Error::InputResolution(format!(
            "{} is not a file",
            path.display()
        )));
    }
    Ok(DataEntity::local(path))
}

/// Resolve every locator in order
pub(crate) async fn resolve_all(
    inputs: &[InputLocator],
    network: &dyn NetworkResolver,
    cache_dir: &Path,
    progress: &ProgressStream,
    cancel: &CancellationToken,
) -> Result<Vec<DataEntity>> {
    if inputs.is_empty() {
        return Err(Error::InputResolution("no input given".to_string()));
    }

    let mut data = Vec::with_capacity(inputs.len());
    for input in inputs {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match input {
            InputLocator::Path(path) => data.push(resolve_local(path)?),
            InputLocator::Url(url) => {
                data.extend(network.resolve(url, cache_dir, progress, cancel).await?)
            }
        }
    }
    Ok(data)
}
