//! Upload client

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Upload cancelled")]
    Cancelled,

    #[error("Upload failed with status: {0}")]
    Status(u16),

    #[error("Upload request failed: {0}")]
    Request(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Remote store accepting session files
#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn upload(&self, file: &Path, remote_folder: &str) -> Result<(), NetworkError>;

    /// Abort every upload currently in progress
    fn cancel(&self);
}

/// [`NetworkClient`] issuing one streamed HTTP PUT per file to
/// `{base_url}/{remote_folder}/{file_name}`
pub struct HttpNetworkClient {
    client: reqwest::Client,
    base_url: String,
    cancel: Mutex<CancellationToken>,
}

impl HttpNetworkClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| NetworkError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn upload_url(&self, file_name: &str, remote_folder: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            urlencoding::encode(remote_folder),
            urlencoding::encode(file_name)
        )
    }

    async fn put(&self, file: &Path, url: &str) -> Result<(), NetworkError> {
        let handle = File::open(file).await?;
        let file_size = handle.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(handle));

        let response = self
            .client
            .put(url)
            .header("Content-Type", content_type(file))
            .header("Content-Length", file_size)
            .body(body)
            .send()
            .await
            .map_err(|e| NetworkError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NetworkError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

fn content_type(file: &Path) -> &'static str {
    match crate::utils::fs::extension_of(file).as_deref() {
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("zip") => "application/zip",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl NetworkClient for HttpNetworkClient {
    async fn upload(&self, file: &Path, remote_folder: &str) -> Result<(), NetworkError> {
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let url = self.upload_url(&file_name, remote_folder);
        let token = self.cancel.lock().clone();

        tracing::info!("Starting upload for {:?} to {}", file, url);

        tokio::select! {
            _ = token.cancelled() => Err(NetworkError::Cancelled),
            result = self.put(file, &url) => {
                if result.is_ok() {
                    tracing::info!("Upload successful for {:?}", file);
                }
                result
            }
        }
    }

    fn cancel(&self) {
        let mut token = self.cancel.lock();
        token.cancel();
        *token = CancellationToken::new();
    }
}
