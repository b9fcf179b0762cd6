use std::path::Path;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AgentError, Result};

/// Downloads a remote input to a local file.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Write the content at `url` to `dest`, returning the number of bytes written.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Plain HTTP(S) download with no timeout beyond the client defaults.
#[derive(Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        let staging_err = |message: String| AgentError::Staging {
            url: url.to_string(),
            message,
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| staging_err(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(staging_err(format!("server responded with {status}")));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| staging_err(format!("cannot create {}: {e}", dest.display())))?;

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| staging_err(format!("download interrupted: {e}")))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| staging_err(format!("write to {} failed: {e}", dest.display())))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| staging_err(format!("flush of {} failed: {e}", dest.display())))?;

        Ok(written)
    }
}
