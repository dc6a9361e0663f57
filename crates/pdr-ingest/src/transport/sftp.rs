//! SFTP transport over libssh2
//!
//! ssh2 sessions are blocking, so each operation opens a session inside
//! `spawn_blocking`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::io::Read;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

use super::{remote_join, save_local, with_retry, LocalManifest, RemoteEntry, Transport, MAX_RETRIES};
use crate::config::ProviderConfig;

#[derive(Debug, Clone)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Password authentication when set, ssh-agent otherwise
    pub password: Option<String>,
}

impl SftpConfig {
    pub fn from_provider(provider: &ProviderConfig) -> Self {
        Self {
            host: provider.host.clone(),
            port: provider.port,
            username: provider.username.clone().unwrap_or_else(|| "anonymous".to_string()),
            password: provider.password.clone(),
        }
    }
}

/// SFTP-backed [`Transport`]
pub struct SftpTransport {
    config: SftpConfig,
    download_dir: PathBuf,
}

impl SftpTransport {
    pub fn new(config: SftpConfig, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            download_dir: download_dir.into(),
        }
    }

    fn session(config: &SftpConfig) -> Result<ssh2::Session> {
        debug!("Connecting to SFTP server: {}:{}", config.host, config.port);

        let tcp = TcpStream::connect(format!("{}:{}", config.host, config.port))
            .context("Failed to connect to SFTP server")?;
        let mut session = ssh2::Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake().context("SSH handshake failed")?;

        match config.password {
            Some(ref password) => session
                .userauth_password(&config.username, password)
                .context("SSH password authentication failed")?,
            None => session
                .userauth_agent(&config.username)
                .context("SSH agent authentication failed")?,
        }

        if !session.authenticated() {
            bail!("SSH authentication failed for {}", config.username);
        }

        Ok(session)
    }

    fn list_sync(config: &SftpConfig, path: &str) -> Result<Vec<RemoteEntry>> {
        let session = Self::session(config)?;
        let sftp = session.sftp().context("Failed to open SFTP channel")?;

        let entries = sftp
            .readdir(Path::new(path))
            .with_context(|| format!("Failed to list directory: {}", path))?;

        Ok(entries
            .into_iter()
            .filter(|(_, stat)| stat.is_file())
            .filter_map(|(entry_path, stat)| {
                let name = entry_path.file_name()?.to_string_lossy().into_owned();
                Some(RemoteEntry {
                    name,
                    path: path.to_string(),
                    size: stat.size,
                })
            })
            .collect())
    }

    fn download_sync(config: &SftpConfig, remote_path: &str) -> Result<Vec<u8>> {
        let session = Self::session(config)?;
        let sftp = session.sftp().context("Failed to open SFTP channel")?;

        let mut file = sftp
            .open(Path::new(remote_path))
            .with_context(|| format!("Failed to open remote file: {}", remote_path))?;

        let mut data = Vec::new();
        file.read_to_end(&mut data).context("Failed to read file data")?;

        Ok(data)
    }
}

#[async_trait]
impl Transport for SftpTransport {
    #[instrument(skip(self), fields(host = %self.config.host))]
    async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let entries = with_retry("list", path, MAX_RETRIES, || {
            let config = self.config.clone();
            let path = path.to_string();
            async move {
                tokio::task::spawn_blocking(move || Self::list_sync(&config, &path))
                    .await
                    .context("SFTP list task panicked")?
            }
        })
        .await?;

        info!("Listed {} ({} files)", path, entries.len());
        Ok(entries)
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
                    .context("SFTP download task panicked")?
            }
        })
        .await?;

        info!("Downloaded {} ({} bytes)", remote_path, data.len());

        save_local(&self.download_dir, name, &data).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::transport::Protocol;

    #[test]
    fn test_config_from_provider() {
        let mut provider = ProviderConfig::new(Protocol::Sftp, "sftp.example.com");
        provider.port = 22;
        provider.username = Some("cumulus".to_string());

        let config = SftpConfig::from_provider(&provider);
        assert_eq!(config.host, "sftp.example.com");
        assert_eq!(config.port, 22);
        assert_eq!(config.username, "cumulus");
        assert!(config.password.is_none());
    }
}
