use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};

use crate::error::{PrepError, Result};

/// Absolute URLs of the `.zip` / `.csv` links of a folder listing page,
/// de-duplicated, in page order.
pub fn extract_data_links(html: &str, base_url: &str) -> Result<Vec<String>> {
    let base = folder_url(base_url)?;
    let data_file = Regex::new(r"(?i)\.(zip|csv)$")
        .map_err(|e| PrepError::Download(format!("invalid link pattern: {}", e)))?;
    let anchors = Selector::parse("a[href]")
        .map_err(|e| PrepError::Download(format!("invalid link selector: {:?}", e)))?;

    let document = Html::parse_document(html);
    let mut links: Vec<String> = Vec::new();
    for anchor in document.select(&anchors) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if !data_file.is_match(href) {
            continue;
        }
        let url = base.join(href).map_err(|e| {
            PrepError::Download(format!("bad link '{}' on {}: {}", href, base_url, e))
        })?;
        let url = url.to_string();
        if !links.contains(&url) {
            links.push(url);
        }
    }
    Ok(links)
}

/// Last path segment of a URL, used as the local file name.
pub fn file_name_of(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| PrepError::Download(format!("{}: {}", url, e)))?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PrepError::Download(format!("no file name in '{}'", url)))
}

/// Listing URLs are folders; without a trailing slash `join` would
/// replace their last segment.
fn folder_url(url: &str) -> Result<Url> {
    let url = url.trim();
    let with_slash = if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    };
    Url::parse(&with_slash).map_err(|e| PrepError::Download(format!("{}: {}", url, e)))
}
