//! Circuit artifact locations, transport, caching and retrieval
//!
//! Remote artifacts go through a [`Transport`] with bounded retry and are
//! cached in an [`ArtifactStore`]. Chunked proving keys are fetched
//! concurrently, inflated per chunk and concatenated; one failed chunk fails
//! the whole artifact.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::codec::inflate;
use crate::config::RetryPolicy;
use crate::error::{ProverError, Result};

/// Where one artifact lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ArtifactLocation {
    /// File on the local filesystem
    Local { path: PathBuf },
    /// Single HTTP(S) download
    Remote { url: String },
    /// Gzip-compressed slices concatenated in order after inflating
    Chunked { urls: Vec<String> },
}

impl ArtifactLocation {
    /// Whether fetching goes over the network
    pub fn is_remote(&self) -> bool {
        !matches!(self, Self::Local { .. })
    }

    /// Stable cache key: SHA-256 of the location, hex encoded
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            Self::Local { path } => {
                hasher.update(b"local:");
                hasher.update(path.to_string_lossy().as_bytes());
            }
            Self::Remote { url } => {
                hasher.update(b"remote:");
                hasher.update(url.as_bytes());
            }
            Self::Chunked { urls } => {
                hasher.update(b"chunked:");
                for url in urls {
                    hasher.update(url.as_bytes());
                    hasher.update(b"\n");
                }
            }
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { path } => write!(f, "{}", path.display()),
            Self::Remote { url } => f.write_str(url),
            Self::Chunked { urls } => match urls.first() {
                Some(first) => write!(f, "{first} (+{} chunks)", urls.len() - 1),
                None => f.write_str("<no chunks>"),
            },
        }
    }
}

/// Locations of the circuit, proving key and verification key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLocations {
    pub circuit: ArtifactLocation,
    pub proving_key: ArtifactLocation,
    pub verification_key: ArtifactLocation,
}

/// Resident circuit and proving key
#[derive(Clone, PartialEq, Eq)]
pub struct ProverArtifacts {
    pub circuit: Vec<u8>,
    pub proving_key: Vec<u8>,
}

impl fmt::Debug for ProverArtifacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProverArtifacts")
            .field("circuit_bytes", &self.circuit.len())
            .field("proving_key_bytes", &self.proving_key.len())
            .finish()
    }
}

/// Byte transport for remote artifacts
#[async_trait]
pub trait Transport: Send + Sync {
    /// Download the body at `url`
    async fn get(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTPS transport backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Client with a per-request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProverError::Config {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProverError::fetch(url, e))?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(status_error(url, status));
        }
        let body = response.bytes().await.map_err(|e| ProverError::fetch(url, e))?;
        Ok(body.to_vec())
    }
}

/// Client errors fail for good, except timeouts and rate limiting
fn status_error(url: &str, status: u16) -> ProverError {
    match status {
        408 | 429 => ProverError::fetch(url, format!("HTTP {status}")),
        400..=499 => ProverError::ArtifactRejected {
            location: url.to_string(),
            status,
        },
        _ => ProverError::fetch(url, format!("HTTP {status}")),
    }
}

/// Key-value storage for fetched artifacts
pub trait ArtifactStore: Send + Sync {
    /// Cached bytes for `key`, if any
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Publish bytes under `key`; readers never observe a partial value
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached artifacts
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ArtifactStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.entries.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// Directory store; writes go to a temp file that is renamed into place
#[derive(Debug, Clone)]
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    /// Store rooted at `dir`, created if missing
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> Result<PathBuf> {
        let valid = |b: u8| b.is_ascii_alphanumeric() || b == b'-' || b == b'_';
        if key.is_empty() || !key.bytes().all(valid) {
            return Err(ProverError::InvalidInput {
                field: "cache key".into(),
                value: key.to_string(),
                expected: "[A-Za-z0-9_-]+".into(),
            });
        }
        Ok(self.dir.join(key))
    }
}

impl ArtifactStore for FsStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.path(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let target = self.path(key)?;
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(bytes)?;
        file.as_file().sync_all()?;
        file.persist(&target).map_err(|e| e.error)?;
        debug!(key, bytes = bytes.len(), "Published cached artifact");
        Ok(())
    }
}

/// Fetches artifacts through a transport and a cache
#[derive(Clone)]
pub struct ArtifactFetcher {
    transport: Arc<dyn Transport>,
    store: Arc<dyn ArtifactStore>,
    retry: RetryPolicy,
}

impl fmt::Debug for ArtifactFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactFetcher")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ArtifactFetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn ArtifactStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            store,
            retry,
        }
    }

    /// Fetch one artifact. Remote artifacts are served from the cache when present.
    #[instrument(skip(self, location), fields(location = %location))]
    pub async fn fetch(&self, location: &ArtifactLocation) -> Result<Vec<u8>> {
        if let ArtifactLocation::Local { path } = location {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| ProverError::fetch(path.display().to_string(), e))?;
            debug!(bytes = bytes.len(), "Read local artifact");
            return Ok(bytes);
        }

        let key = location.cache_key();
        match self.store.get(&key) {
            Ok(Some(bytes)) => {
                debug!(bytes = bytes.len(), "Artifact cache hit");
                return Ok(bytes);
            }
            Ok(None) => {}
            Err(e) => warn!("Artifact cache read failed: {e}"),
        }

        let bytes = self.download(location).await?;
        if let Err(e) = self.store.put(&key, &bytes) {
            warn!("Artifact cache write failed: {e}");
        }
        info!(bytes = bytes.len(), "Fetched remote artifact");
        Ok(bytes)
    }

    /// Fetch the circuit and proving key concurrently
    pub async fn fetch_prover_artifacts(
        &self,
        locations: &ArtifactLocations,
    ) -> Result<ProverArtifacts> {
        let (circuit, proving_key) = futures::try_join!(
            self.fetch(&locations.circuit),
            self.fetch(&locations.proving_key)
        )?;
        Ok(ProverArtifacts {
            circuit,
            proving_key,
        })
    }

    async fn download(&self, location: &ArtifactLocation) -> Result<Vec<u8>> {
        match location {
            ArtifactLocation::Local { .. } => Err(ProverError::fetch(
                location.to_string(),
                "local artifacts are not downloaded",
            )),
            ArtifactLocation::Remote { url } => self.get_with_retry(url).await,
            ArtifactLocation::Chunked { urls } => {
                if urls.is_empty() {
                    return Err(ProverError::fetch(location.to_string(), "no chunks listed"));
                }
                let chunks = try_join_all(urls.iter().map(|url| async move {
                    let compressed = self.get_with_retry(url).await?;
                    inflate(&compressed).map_err(|e| ProverError::fetch(url.as_str(), e))
                }))
                .await?;
                debug!(chunks = chunks.len(), "Reassembled chunked artifact");
                Ok(chunks.concat())
            }
        }
    }

    async fn get_with_retry(&self, url: &str) -> Result<Vec<u8>> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.transport.get(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(url, attempt, ?delay, "Artifact fetch failed, retrying: {e}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
