//! Fetching update descriptors and package archives

use crate::catalog::error::UpdateError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Source of update descriptors and archives
#[async_trait]
pub trait PackageFetcher: Send + Sync {
    /// GET a small text document (update descriptor)
    async fn fetch_text(&self, url: &str) -> Result<String, UpdateError>;

    /// Download `url` into `dest`, returning the number of bytes written
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, UpdateError>;
}

/// In-memory fetcher serving fixed responses by URL
///
/// Useful for offline mirrors and tests. URLs are matched without their
/// query string so that cache-busting parameters do not matter.
#[derive(Debug, Clone, Default)]
pub struct MemoryFetcher {
    responses: HashMap<String, Vec<u8>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: impl AsRef<str>, body: impl Into<Vec<u8>>) -> Self {
        self.insert(url, body);
        self
    }

    pub fn insert(&mut self, url: impl AsRef<str>, body: impl Into<Vec<u8>>) {
        self.responses.insert(strip_query(url.as_ref()), body.into());
    }

    fn get(&self, url: &str) -> Result<&[u8], UpdateError> {
        self.responses
            .get(&strip_query(url))
            .map(Vec::as_slice)
            .ok_or_else(|| UpdateError::Fetch {
                url: url.to_string(),
                reason: "HTTP 404".to_string(),
            })
    }
}

fn strip_query(url: &str) -> String {
    url.split('?').next().unwrap_or(url).to_string()
}

#[async_trait]
impl PackageFetcher for MemoryFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, UpdateError> {
        String::from_utf8(self.get(url)?.to_vec()).map_err(|e| UpdateError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, UpdateError> {
        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        let body = self.get(url)?;
        tokio::fs::write(dest, body)
            .await
            .map_err(|e| UpdateError::io(dest, e))?;
        Ok(body.len() as u64)
    }
}

#[cfg(feature = "http")]
pub use http::HttpFetcher;

#[cfg(feature = "http")]
mod http {
    use super::*;
    use crate::config::HostConfig;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tracing::{debug, info};

    /// HTTP(S) fetcher backed by reqwest
    #[derive(Clone)]
    pub struct HttpFetcher {
        client: reqwest::Client,
    }

    impl HttpFetcher {
        pub fn new(config: &HostConfig) -> Result<Self, UpdateError> {
            let client = reqwest::Client::builder()
                .user_agent(config.user_agent.as_str())
                .timeout(Duration::from_secs(config.http_timeout_secs))
                .build()
                .map_err(|e| UpdateError::Fetch {
                    url: String::new(),
                    reason: format!("Failed to create HTTP client: {e}"),
                })?;
            Ok(Self { client })
        }

        async fn get(&self, url: &str) -> Result<reqwest::Response, UpdateError> {
            let fetch_err = |reason: String| UpdateError::Fetch {
                url: url.to_string(),
                reason,
            };

            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| fetch_err(e.to_string()))?;

            if !response.status().is_success() {
                return Err(fetch_err(format!("HTTP {}", response.status())));
            }
            Ok(response)
        }
    }

    #[async_trait]
    impl PackageFetcher for HttpFetcher {
        async fn fetch_text(&self, url: &str) -> Result<String, UpdateError> {
            debug!("Fetching {}", url);
            self.get(url)
                .await?
                .text()
                .await
                .map_err(|e| UpdateError::Fetch {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
        }

        async fn download(
            &self,
            url: &str,
            dest: &Path,
            cancel: &CancellationToken,
        ) -> Result<u64, UpdateError> {
            info!("Downloading {}", url);
            let response = self.get(url).await?;

            let mut file = tokio::fs::File::create(dest)
                .await
                .map_err(|e| UpdateError::io(dest, e))?;
            let mut stream = response.bytes_stream();
            let mut written = 0u64;

            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
                    chunk = stream.next() => chunk,
                };
                let Some(chunk) = chunk else { break };
                let chunk = chunk.map_err(|e| UpdateError::Fetch {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| UpdateError::io(dest, e))?;
                written += chunk.len() as u64;
            }

            file.flush().await.map_err(|e| UpdateError::io(dest, e))?;
            debug!("Downloaded {} bytes to {:?}", written, dest);
            Ok(written)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_fetcher_ignores_query() {
        let fetcher = MemoryFetcher::new().with("https://u.example.com/check", "{}");
        assert_eq!(
            fetcher.fetch_text("https://u.example.com/check?r=123").await.unwrap(),
            "{}"
        );
        assert!(matches!(
            fetcher.fetch_text("https://u.example.com/other").await,
            Err(UpdateError::Fetch { .. })
        ));
    }

    #[tokio::test]
    async fn test_memory_fetcher_download() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("pkg.tar.gz");
        let fetcher = MemoryFetcher::new().with("https://x/pkg.tar.gz", vec![1u8, 2, 3]);

        let written = fetcher
            .download("https://x/pkg.tar.gz", &dest, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(written, 3);
        assert_eq!(std::fs::read(&dest).unwrap(), vec![1u8, 2, 3]);
    }
}
