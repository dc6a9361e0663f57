//! FTP transport
//!
//! suppaftp's synchronous stream runs on the blocking pool; every call opens
//! its own session in Extended Passive Mode.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Read;
use std::path::PathBuf;
use suppaftp::FtpStream;
use tracing::{debug, info, instrument, warn};

use super::{remote_join, save_local, with_retry, LocalManifest, RemoteEntry, Transport, MAX_RETRIES};
use crate::config::ProviderConfig;

/// Configuration for FTP connection
#[derive(Debug, Clone)]
pub struct FtpConfig {
    pub host: String,

    /// FTP server port (usually 21)
    pub port: u16,

    /// FTP username ("anonymous" when the provider has none)
    pub username: String,

    pub password: String,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 21,
            username: "anonymous".to_string(),
            password: "password".to_string(),
        }
    }
}

impl FtpConfig {
    pub fn from_provider(provider: &ProviderConfig) -> Self {
        let defaults = Self::default();
        Self {
            host: provider.host.clone(),
            port: provider.port,
            username: provider.username.clone().unwrap_or(defaults.username),
            password: provider.password.clone().unwrap_or(defaults.password),
        }
    }
}

/// FTP-backed [`Transport`]
pub struct FtpTransport {
    config: FtpConfig,
    download_dir: PathBuf,
}

impl FtpTransport {
    pub fn new(config: FtpConfig, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            download_dir: download_dir.into(),
        }
    }

    fn connect(config: &FtpConfig) -> Result<FtpStream> {
        debug!("Connecting to FTP server: {}:{}", config.host, config.port);

        let mut ftp_stream = FtpStream::connect(format!("{}:{}", config.host, config.port))
            .context("Failed to connect to FTP server")?;

        ftp_stream.set_mode(suppaftp::Mode::ExtendedPassive);

        debug!("Logging in as: {}", config.username);
        ftp_stream
            .login(&config.username, &config.password)
            .context("FTP login failed")?;

        Ok(ftp_stream)
    }

    fn list_sync(config: &FtpConfig, path: &str) -> Result<Vec<FtpEntry>> {
        let mut ftp_stream = Self::connect(config)?;

        let lines = ftp_stream
            .list(Some(path))
            .with_context(|| format!("Failed to list directory: {}", path))?;

        let parsed = lines.iter().filter_map(|line| FtpEntry::parse(line)).collect();

        if let Err(e) = ftp_stream.quit() {
            warn!("Failed to quit FTP session gracefully: {}", e);
        }

        Ok(parsed)
    }

    fn download_sync(config: &FtpConfig, remote_path: &str) -> Result<Vec<u8>> {
        let mut ftp_stream = Self::connect(config)?;

        ftp_stream
            .transfer_type(suppaftp::types::FileType::Binary)
            .context("Failed to set binary mode")?;

        let mut reader = ftp_stream
            .retr_as_buffer(remote_path)
            .with_context(|| format!("Failed to download file: {}", remote_path))?;

        let mut data = Vec::new();
        reader.read_to_end(&mut data).context("Failed to read file data")?;

        if let Err(e) = ftp_stream.quit() {
            warn!("Failed to quit FTP session gracefully: {}", e);
        }

        Ok(data)
    }
}

#[async_trait]
impl Transport for FtpTransport {
    #[instrument(skip(self), fields(host = %self.config.host))]
    async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let entries = with_retry("list", path, MAX_RETRIES, || {
            let config = self.config.clone();
            let path = path.to_string();
            async move {
                tokio::task::spawn_blocking(move || Self::list_sync(&config, &path))
                    .await
                    .context("FTP LIST task panicked")?
            }
        })
        .await?;

        info!("Listed {} ({} entries)", path, entries.len());

        Ok(entries
            .into_iter()
            .filter(|e| !e.is_directory)
            .map(|e| RemoteEntry {
                name: e.name,
                path: path.to_string(),
                size: e.size,
            })
            .collect())
    }

    #[instrument(skip(self), fields(host = %self.config.host))]
    async fn download(&self, path: &str, name: &str) -> Result<LocalManifest> {
        let remote_path = remote_join(path, name);

        let data = with_retry("download", &remote_path, MAX_RETRIES, || {
            let config = self.config.clone();
            let remote_path = remote_path.clone();
            async move {
                tokio::task::spawn_blocking(move || Self::download_sync(&config, &remote_path))
                    .await
                    .context("FTP download task panicked")?
            }
        })
        .await?;

        info!("Downloaded {} ({} bytes)", remote_path, data.len());

        save_local(&self.download_dir, name, &data).await
    }
}

/// Parsed FTP directory entry
#[derive(Debug, Clone)]
pub struct FtpEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: Option<u64>,
}

impl FtpEntry {
    /// Parse a Unix-style LIST line
    ///
    /// `-rw-r--r--   1 ftp ftp  1234 Jan 15 12:00 PDN.ID1611071307.PDR`
    ///
    /// Names containing spaces are kept whole; symlink targets are dropped.
    pub fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            return None;
        }

        let is_directory = parts[0].starts_with('d');

        let name = if parts.len() >= 9 {
            let joined = parts[8..].join(" ");
            match joined.split_once(" -> ") {
                Some((link, _)) => link.to_string(),
                None => joined,
            }
        } else {
            parts.last()?.to_string()
        };

        if name == "." || name == ".." {
            return None;
        }

        let size = if parts.len() >= 5 {
            parts[4].parse().ok()
        } else {
            None
        };

        Some(Self {
            name,
            is_directory,
            size,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::transport::Protocol;

    #[test]
    fn test_parse_directory_entry() {
        let entry = FtpEntry::parse("drwxr-xr-x   2 ftp ftp  4096 Jan 15 12:00 archive").unwrap();
        assert_eq!(entry.name, "archive");
        assert!(entry.is_directory);
        assert_eq!(entry.size, Some(4096));
    }

    #[test]
    fn test_parse_file_entry() {
        let entry =
            FtpEntry::parse("-rw-r--r--   1 ftp ftp  2048 Jan 15 12:00 PDN.ID1611071307.PDR").unwrap();
        assert_eq!(entry.name, "PDN.ID1611071307.PDR");
        assert!(!entry.is_directory);
        assert_eq!(entry.size, Some(2048));
    }

    #[test]
    fn test_parse_name_with_spaces_and_symlink() {
        let entry = FtpEntry::parse("-rw-r--r--   1 ftp ftp  10 Jan 15 12:00 my file.PDR").unwrap();
        assert_eq!(entry.name, "my file.PDR");

        let entry =
            FtpEntry::parse("lrwxrwxrwx   1 ftp ftp  10 Jan 15 12:00 latest.PDR -> a.PDR").unwrap();
        assert_eq!(entry.name, "latest.PDR");
    }

    #[test]
    fn test_parse_skips_dot_entries_and_blank_lines() {
        assert!(FtpEntry::parse("drwxr-xr-x   2 ftp ftp  4096 Jan 15 12:00 .").is_none());
        assert!(FtpEntry::parse("").is_none());
        assert!(FtpEntry::parse("   ").is_none());
    }

    #[test]
    fn test_config_from_provider_defaults_to_anonymous() {
        let mut provider = ProviderConfig::new(Protocol::Ftp, "ftp.example.com");
        let config = FtpConfig::from_provider(&provider);
        assert_eq!(config.port, 21);
        assert_eq!(config.username, "anonymous");

        provider.username = Some("cumulus".to_string());
        provider.password = Some("secret".to_string());
        let config = FtpConfig::from_provider(&provider);
        assert_eq!(config.username, "cumulus");
        assert_eq!(config.password, "secret");
    }
}
