//! HTTP helpers shared by the HTML adapters
//!
//! Every helper here performs exactly one attempt within the timeout it is
//! given. Retrying is the caller's business (see [`crate::retry`]).

use crate::{HarvestError, Result};
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Builds the HTTP client shared by all HTML jobs of a process
///
/// # Returns
///
/// * `Ok(Client)` - Client with the harvester user agent and compression enabled
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client() -> std::result::Result<Client, reqwest::Error> {
    let user_agent = format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches a page body as text
pub async fn fetch_text(client: &Client, url: &Url, timeout: Duration) -> Result<String> {
    let response = send(client, url, timeout).await?;
    response
        .text()
        .await
        .map_err(|e| HarvestError::from_reqwest(url.as_str(), e))
}

/// Fetches a file body as raw bytes
pub async fn fetch_bytes(client: &Client, url: &Url, timeout: Duration) -> Result<Vec<u8>> {
    let response = send(client, url, timeout).await?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| HarvestError::from_reqwest(url.as_str(), e))?;
    Ok(bytes.to_vec())
}

async fn send(client: &Client, url: &Url, timeout: Duration) -> Result<reqwest::Response> {
    let response = client
        .get(url.clone())
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| HarvestError::from_reqwest(url.as_str(), e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(HarvestError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    Ok(response)
}
