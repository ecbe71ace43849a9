//! Streaming HTTP downloads with progress reporting.

use std::path::Path;

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::Reporter;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Size mismatch for {url}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        url: String,
        expected: u64,
        actual: u64,
    },
}

/// Shared HTTP client with the crate user agent.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn http_client() -> Result<Client, reqwest::Error> {
    Client::builder().user_agent(crate::USER_AGENT).build()
}

/// Stream `url` into `dest`, reporting progress under `name`.
///
/// When `expected_size` is given, the byte count must match it exactly.
///
/// # Errors
///
/// Returns an error on HTTP failure status, I/O failure or a size mismatch.
/// A partially written `dest` is removed.
pub async fn download_to_file(
    client: &Client,
    url: &str,
    dest: &Path,
    expected_size: Option<u64>,
    name: &str,
    reporter: &dyn Reporter,
) -> Result<u64, DownloadError> {
    let response = client.get(url).send().await?.error_for_status()?;
    let total = expected_size.or_else(|| response.content_length());
    reporter.downloading(name, 0, total);

    let mut file = File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                tokio::fs::remove_file(dest).await.ok();
                return Err(e.into());
            }
        };
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        reporter.downloading(name, downloaded, total);
    }
    file.flush().await?;

    if let Some(expected) = expected_size {
        if expected != downloaded {
            tokio::fs::remove_file(dest).await.ok();
            return Err(DownloadError::SizeMismatch {
                url: url.to_string(),
                expected,
                actual: downloaded,
            });
        }
    }

    Ok(downloaded)
}

/// Fetch `url` as text; `Ok(None)` on 404.
///
/// # Errors
///
/// Returns an error for transport failures and other non-success statuses.
pub async fn fetch_text(client: &Client, url: &str) -> Result<Option<String>, reqwest::Error> {
    let response = client.get(url).send().await?;
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    Ok(Some(response.error_for_status()?.text().await?))
}
