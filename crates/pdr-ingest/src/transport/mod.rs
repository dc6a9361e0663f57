//! Provider transports
//!
//! A [`Transport`] lists a remote directory and downloads one file into the
//! local download directory. One implementation exists per protocol; the
//! closed [`TransportClient`] enum picks the right one from a
//! [`ProviderConfig`].

pub mod ftp;
pub mod http;
pub mod sftp;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::IngestError;

pub use ftp::{FtpConfig, FtpTransport};
pub use http::HttpTransport;
pub use sftp::{SftpConfig, SftpTransport};

/// Maximum number of attempts for a remote operation
pub const MAX_RETRIES: u32 = 3;

/// Base delay between attempts; multiplied by the attempt number
pub const RETRY_DELAY_SECS: u64 = 5;

/// Supported provider protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ftp,
    Http,
    Https,
    Sftp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Ftp => "ftp",
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Sftp => "sftp",
        }
    }

    /// Well-known port used when the provider does not set one
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Ftp => 21,
            Protocol::Http => 80,
            Protocol::Https => 443,
            Protocol::Sftp => 22,
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = IngestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ftp" => Ok(Protocol::Ftp),
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            "sftp" => Ok(Protocol::Sftp),
            other => Err(IngestError::Config(format!("Protocol {} is not supported", other))),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One file entry of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    /// Directory the entry was listed in
    pub path: String,
    pub size: Option<u64>,
}

/// A manifest copied into the local download directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalManifest {
    pub name: String,
    pub local_path: PathBuf,
}

/// Remote listing and download capability
///
/// Implementations report failures as `anyhow` errors; the pipeline wraps
/// them into [`IngestError::Transport`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// List the files (not directories) of a remote directory
    async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Download `path/name` into the local download directory
    async fn download(&self, path: &str, name: &str) -> Result<LocalManifest>;
}

/// Concrete transport selected by protocol
pub enum TransportClient {
    Ftp(FtpTransport),
    Http(HttpTransport),
    Https(HttpTransport),
    Sftp(SftpTransport),
}

impl TransportClient {
    /// Build the transport for a provider
    pub fn from_provider(provider: &ProviderConfig, download_dir: impl Into<PathBuf>) -> Result<Self> {
        let download_dir = download_dir.into();

        let client = match provider.protocol {
            Protocol::Ftp => TransportClient::Ftp(FtpTransport::new(
                FtpConfig::from_provider(provider),
                download_dir,
            )),
            Protocol::Http => {
                let base_url = format!("http://{}:{}", provider.host, provider.port);
                TransportClient::Http(HttpTransport::new(base_url, download_dir)?)
            },
            Protocol::Https => {
                let base_url = format!("https://{}:{}", provider.host, provider.port);
                TransportClient::Https(HttpTransport::new(base_url, download_dir)?)
            },
            Protocol::Sftp => TransportClient::Sftp(SftpTransport::new(
                SftpConfig::from_provider(provider),
                download_dir,
            )),
        };

        Ok(client)
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            TransportClient::Ftp(_) => Protocol::Ftp,
            TransportClient::Http(_) => Protocol::Http,
            TransportClient::Https(_) => Protocol::Https,
            TransportClient::Sftp(_) => Protocol::Sftp,
        }
    }
}

#[async_trait]
impl Transport for TransportClient {
    async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        match self {
            TransportClient::Ftp(t) => t.list(path).await,
            TransportClient::Http(t) | TransportClient::Https(t) => t.list(path).await,
            TransportClient::Sftp(t) => t.list(path).await,
        }
    }

    async fn download(&self, path: &str, name: &str) -> Result<LocalManifest> {
        match self {
            TransportClient::Ftp(t) => t.download(path, name).await,
            TransportClient::Http(t) | TransportClient::Https(t) => t.download(path, name).await,
            TransportClient::Sftp(t) => t.download(path, name).await,
        }
    }
}

/// Join a remote directory and file name with exactly one separator
pub fn remote_join(path: &str, name: &str) -> String {
    if path.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", path.trim_end_matches('/'), name.trim_start_matches('/'))
}

/// Write downloaded bytes into the download directory
pub(crate) async fn save_local(download_dir: &Path, name: &str, data: &[u8]) -> Result<LocalManifest> {
    tokio::fs::create_dir_all(download_dir)
        .await
        .with_context(|| format!("Failed to create download directory {}", download_dir.display()))?;

    let local_path = download_dir.join(name);
    tokio::fs::write(&local_path, data)
        .await
        .with_context(|| format!("Failed to write {}", local_path.display()))?;

    debug!("Saved {} ({} bytes) to {}", name, data.len(), local_path.display());

    Ok(LocalManifest {
        name: name.to_string(),
        local_path,
    })
}

/// Run a remote operation up to `max_attempts` times with linear backoff
pub(crate) async fn with_retry<T, F, Fut>(
    operation: &str,
    target: &str,
    max_attempts: u32,
    mut attempt_fn: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        debug!("{} attempt {}/{} for: {}", operation, attempt, max_attempts, target);

        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                let delay = RETRY_DELAY_SECS * u64::from(attempt);
                warn!(
                    "{} attempt {}/{} failed: {:#}. Retrying in {}s...",
                    operation, attempt, max_attempts, e, delay
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
                attempt += 1;
            },
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to {} {} after {} attempts", operation, target, max_attempts)
                });
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_protocol_from_str() {
        assert_eq!("FTP".parse::<Protocol>().unwrap(), Protocol::Ftp);
        assert_eq!("sftp".parse::<Protocol>().unwrap(), Protocol::Sftp);
        let err = "s3".parse::<Protocol>().unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: Protocol s3 is not supported");
    }

    #[test]
    fn test_remote_join() {
        assert_eq!(remote_join("/pdrs", "a.PDR"), "/pdrs/a.PDR");
        assert_eq!(remote_join("/pdrs/", "a.PDR"), "/pdrs/a.PDR");
        assert_eq!(remote_join("/", "a.PDR"), "/a.PDR");
        assert_eq!(remote_join("", "a.PDR"), "a.PDR");
    }

    #[test]
    fn test_from_provider_selects_variant() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ProviderConfig::new(Protocol::Sftp, "sftp.example.com");
        let client = TransportClient::from_provider(&provider, dir.path()).unwrap();
        assert_eq!(client.protocol(), Protocol::Sftp);

        let provider = ProviderConfig::new(Protocol::Ftp, "ftp.example.com");
        let client = TransportClient::from_provider(&provider, dir.path()).unwrap();
        assert_eq!(client.protocol(), Protocol::Ftp);

        let provider = ProviderConfig::new(Protocol::Https, "e4ftl01.example.com");
        let client = TransportClient::from_provider(&provider, dir.path()).unwrap();
        assert_eq!(client.protocol(), Protocol::Https);

        let provider = ProviderConfig::new(Protocol::Http, "e4ftl01.example.com");
        let client = TransportClient::from_provider(&provider, dir.path()).unwrap();
        assert_eq!(client.protocol(), Protocol::Http);
    }

    #[test]
    fn test_default_port_per_protocol() {
        assert_eq!(ProviderConfig::new(Protocol::Ftp, "h").port, 21);
        assert_eq!(ProviderConfig::new(Protocol::Http, "h").port, 80);
        assert_eq!(ProviderConfig::new(Protocol::Https, "h").port, 443);
        assert_eq!(ProviderConfig::new(Protocol::Sftp, "h").port, 22);
    }

    #[tokio::test]
    async fn test_save_local_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = save_local(&dir.path().join("nested"), "a.PDR", b"OBJECT = FILE_GROUP;")
            .await
            .unwrap();

        assert_eq!(manifest.name, "a.PDR");
        let content = tokio::fs::read(&manifest.local_path).await.unwrap();
        assert_eq!(content, b"OBJECT = FILE_GROUP;");
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = with_retry("list", "/pdrs", MAX_RETRIES, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("connection reset")) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), MAX_RETRIES);
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("after 3 attempts"));
        assert!(message.contains("connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_recovers() {
        let attempts = AtomicU32::new(0);
        let value = with_retry("download", "/pdrs/a.PDR", MAX_RETRIES, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(anyhow::anyhow!("timeout"))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
