//! HTTP transport
//!
//! Directory listings are HTML index pages; every anchor pointing at a file
//! (not a sub-directory, query or parent link) becomes one entry.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::{remote_join, save_local, with_retry, LocalManifest, RemoteEntry, Transport, MAX_RETRIES};

const REQUEST_TIMEOUT_SECS: u64 = 300;

/// HTTP-backed [`Transport`]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    download_dir: PathBuf,
    max_attempts: u32,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, download_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("pdr-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            download_dir: download_dir.into(),
            max_attempts: MAX_RETRIES,
        })
    }

    /// Override the number of attempts per request
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn fetch(&self, url: &str) -> Result<reqwest::Response> {
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        if !response.status().is_success() {
            bail!("HTTP error {} for {}", response.status(), url);
        }

        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let mut url = self.url(path);
        if !url.ends_with('/') {
            url.push('/');
        }

        let target = url.as_str();
        let html = with_retry("list", target, self.max_attempts, || async move {
            self.fetch(target).await?.text().await.context("Failed to read listing body")
        })
        .await?;

        let names = parse_index_links(&html)?;
        info!("Listed {} ({} entries)", url, names.len());

        Ok(names
            .into_iter()
            .map(|name| RemoteEntry {
                name,
                path: path.to_string(),
                size: None,
            })
            .collect())
    }

    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn download(&self, path: &str, name: &str) -> Result<LocalManifest> {
        let url = self.url(&remote_join(path, name));

        let target = url.as_str();
        let data = with_retry("download", target, self.max_attempts, || async move {
            let bytes = self
                .fetch(target)
                .await?
                .bytes()
                .await
                .context("Failed to read response body")?;
            Ok(bytes.to_vec())
        })
        .await?;

        info!("Downloaded {} ({} bytes)", url, data.len());

        save_local(&self.download_dir, name, &data).await
    }
}

/// Extract file names from the anchors of an HTML index page
///
/// Order follows the document; duplicates are dropped.
fn parse_index_links(html: &str) -> Result<Vec<String>> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").map_err(|e| anyhow!("Invalid selector: {:?}", e))?;

    let mut names: Vec<String> = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };

        let href = href.split(['?', '#']).next().unwrap_or_default();
        if href.is_empty() || href.ends_with('/') {
            continue;
        }

        let Some(name) = href.rsplit('/').next() else {
            continue;
        };
        if name.is_empty() || name == ".." || name == "." {
            continue;
        }

        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }

    Ok(names)
}
