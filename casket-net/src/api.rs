// casket-net/src/api.rs
//! Refreshes the cached definition listings from the formulae API.

use casket_common::cache::Cache;
use casket_common::error::{CasketError, Result};
use tracing::{debug, error};

use crate::http::build_http_client;

const FORMULAE_API_BASE_URL: &str = "https://formulae.brew.sh/api";
pub const API_FILES: [&str; 2] = ["formula.json", "cask.json"];

pub async fn fetch_raw_api_json(endpoint: &str) -> Result<String> {
    let url = format!("{FORMULAE_API_BASE_URL}/{endpoint}");
    debug!("Fetching data from formulae API: {}", url);
    let client = build_http_client()?;
    let response = client.get(&url).send().await.map_err(|e| {
        error!("HTTP request failed for {}: {}", url, e);
        CasketError::from(e)
    })?;
    if !response.status().is_success() {
        let status = response.status();
        return Err(CasketError::DownloadError(
            endpoint.to_string(),
            url,
            format!("HTTP status {status}"),
        ));
    }
    let body = response.text().await?;
    if body.trim().is_empty() {
        return Err(CasketError::Cache(format!(
            "Empty response body received from {url}"
        )));
    }
    Ok(body)
}

/// Downloads every listing that is missing or stale; `force` ignores freshness.
/// Returns the files that were rewritten.
pub async fn refresh_api_cache(cache: &Cache, force: bool) -> Result<Vec<&'static str>> {
    let mut refreshed = Vec::new();
    for file in API_FILES {
        if !force && cache.is_cache_valid(file)? {
            debug!("{} is fresh, skipping", file);
            continue;
        }
        let raw = fetch_raw_api_json(file).await?;
        cache.store_raw(file, &raw)?;
        debug!("Cached {}", file);
        refreshed.push(file);
    }
    Ok(refreshed)
}
