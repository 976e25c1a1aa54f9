//! HTTP access shared by the downloader and the geocoder.

mod basic;
mod client;
mod header;

pub use basic::BasicClient;
pub use client::HttpClient;
pub use header::WithHeader;

use bytes::Bytes;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::warn;

use crate::error::{FluxError, Result};

/// Body of a successful GET, or the provider saying the resource does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    Found(Bytes),
    NotFound,
}

pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Fetched> {
    let url = url
        .parse()
        .map_err(|e| FluxError::Http(format!("invalid URL '{url}': {e}")))?;
    let req = reqwest::Request::new(reqwest::Method::GET, url);

    let resp = client.execute(req).await?;
    if resp.status() == StatusCode::NOT_FOUND {
        return Ok(Fetched::NotFound);
    }
    let resp = resp.error_for_status()?;
    Ok(Fetched::Found(resp.bytes().await?))
}

/// [`fetch_bytes`] with up to `attempts` tries and a linear back-off.
///
/// A 404 is an answer, not a failure, and is returned immediately.
pub async fn fetch_with_retry<C: HttpClient>(
    client: &C,
    url: &str,
    attempts: u32,
    backoff: Duration,
) -> Result<Fetched> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match fetch_bytes(client, url).await {
            Ok(fetched) => return Ok(fetched),
            Err(e) if attempt < attempts => {
                warn!(url, attempt, error = %e, "Fetch failed, retrying");
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_server;
