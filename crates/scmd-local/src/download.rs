//! Resumable, retried, integrity-checked model downloads.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::LocalError;
use crate::retry::{retry, BackoffPolicy, RetryError};

/// Suffix appended to the destination path while a download is in flight.
pub const TEMP_SUFFIX: &str = ".tmp";

/// What to fetch and what the result must look like.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub destination: PathBuf,
    /// Expected size in bytes; 0 when unknown.
    pub expected_size: u64,
    /// Expected SHA-256 as lowercase or uppercase hex.
    pub sha256: Option<String>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            expected_size: 0,
            sha256: None,
        }
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = size;
        self
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }
}

/// State of a single download attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSession {
    pub destination: PathBuf,
    pub temporary: PathBuf,
    /// Bytes already present in the temp file.
    pub resume_offset: u64,
    pub attempt: u32,
}

impl DownloadSession {
    /// Stat the temp file to pick up whatever earlier attempts left behind.
    pub async fn open(destination: &Path, attempt: u32) -> Self {
        let temporary = temp_path(destination);
        let resume_offset = fs::metadata(&temporary)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        Self {
            destination: destination.to_path_buf(),
            temporary,
            resume_offset,
            attempt,
        }
    }
}

/// `<destination>.tmp`
pub fn temp_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Free-space lookup; `None` means unknown.
pub type SpaceProbe = fn(&Path) -> Option<u64>;

/// Bytes available to unprivileged users on the filesystem holding `path`.
#[cfg(unix)]
#[allow(clippy::unnecessary_cast)]
pub fn available_space(path: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    Some(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
pub fn available_space(_path: &Path) -> Option<u64> {
    None
}

/// Downloader with disk-space preflight, byte-range resume, bounded retry,
/// and post-download verification.
pub struct ResilientDownloader {
    client: reqwest::Client,
    policy: BackoffPolicy,
    space_probe: SpaceProbe,
}

impl ResilientDownloader {
    /// Create a downloader with the default policy (3 attempts, 1s base delay).
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            policy: BackoffPolicy::default(),
            space_probe: available_space,
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_space_probe(mut self, probe: SpaceProbe) -> Self {
        self.space_probe = probe;
        self
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Fetch `request.url` into `request.destination`.
    ///
    /// Progress is reported as `(bytes_so_far, total_bytes)`; the total is 0
    /// when neither the server nor the caller knows it. Cancellation leaves
    /// the temp file in place for a later resume; integrity failures delete it.
    pub async fn download<F>(
        &self,
        request: &DownloadRequest,
        cancel: &CancellationToken,
        on_progress: F,
    ) -> Result<PathBuf, LocalError>
    where
        F: FnMut(u64, u64) + Send,
    {
        if let Some(parent) = request
            .destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            fs::create_dir_all(parent).await?;
        }

        info!(url = %request.url, dest = %request.destination.display(), "downloading");

        let progress = Mutex::new(on_progress);
        let outcome = retry(
            &self.policy,
            cancel,
            |attempt| self.attempt(request, attempt, cancel, &progress),
            LocalError::is_retryable,
        )
        .await;

        let total = match outcome {
            Ok(total) => total,
            Err(RetryError::Fatal { error, .. }) => return Err(error),
            Err(RetryError::Cancelled { .. }) => return Err(LocalError::Cancelled),
            Err(RetryError::Exhausted { attempts, error }) => {
                warn!(attempts, "download attempts exhausted: {}", error);
                return Err(LocalError::DownloadFailed {
                    attempts,
                    source: Box::new(error),
                });
            }
        };

        let temporary = temp_path(&request.destination);
        let size = self
            .verify(request, &temporary)
            .await
            .map_err(|e| e.context("verification"))?;

        fs::rename(&temporary, &request.destination).await?;
        if let Ok(mut report) = progress.lock() {
            report(size, total.max(size));
        }

        info!(dest = %request.destination.display(), bytes = size, "download complete");
        Ok(request.destination.clone())
    }

    /// One transfer attempt; returns the total size it was working towards.
    async fn attempt<F>(
        &self,
        request: &DownloadRequest,
        attempt: u32,
        cancel: &CancellationToken,
        progress: &Mutex<F>,
    ) -> Result<u64, LocalError>
    where
        F: FnMut(u64, u64) + Send,
    {
        let mut session = DownloadSession::open(&request.destination, attempt).await;
        debug!(attempt, offset = session.resume_offset, "starting download attempt");

        self.check_disk_space(&session, request.expected_size)
            .map_err(|e| e.context("disk space check"))?;

        if request.expected_size > 0 && session.resume_offset >= request.expected_size {
            debug!("temp file already holds the expected size, skipping transfer");
            return Ok(request.expected_size);
        }

        self.transfer(request, &mut session, cancel, progress)
            .await
            .map_err(|e| e.context("download"))
    }

    fn check_disk_space(
        &self,
        session: &DownloadSession,
        expected_size: u64,
    ) -> Result<(), LocalError> {
        if expected_size == 0 {
            return Ok(());
        }
        let dir = session
            .destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        // Temp file and final file briefly coexist.
        let required = expected_size + expected_size / 5;
        match (self.space_probe)(dir) {
            Some(available) if available < required => Err(LocalError::InsufficientDiskSpace {
                path: dir.to_path_buf(),
                required,
                available,
            }),
            Some(_) => Ok(()),
            None => {
                debug!("free space unknown for {}, proceeding", dir.display());
                Ok(())
            }
        }
    }

    async fn transfer<F>(
        &self,
        request: &DownloadRequest,
        session: &mut DownloadSession,
        cancel: &CancellationToken,
        progress: &Mutex<F>,
    ) -> Result<u64, LocalError>
    where
        F: FnMut(u64, u64) + Send,
    {
        let mut builder = self.client.get(&request.url);
        if session.resume_offset > 0 {
            builder = builder.header(RANGE, format!("bytes={}-", session.resume_offset));
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LocalError::Cancelled),
            result = builder.send() => result.map_err(|e| LocalError::Transfer(e.to_string()))?,
        };

        let status = response.status();
        let append = match status {
            StatusCode::PARTIAL_CONTENT if session.resume_offset > 0 => {
                info!(offset = session.resume_offset, "resuming download");
                true
            }
            StatusCode::RANGE_NOT_SATISFIABLE if session.resume_offset > 0 => {
                debug!("server reports nothing past offset, verifying partial file");
                return Ok(session.resume_offset);
            }
            s if s.is_success() => {
                if session.resume_offset > 0 {
                    warn!(
                        offset = session.resume_offset,
                        "server ignored range request, restarting from zero"
                    );
                    session.resume_offset = 0;
                }
                false
            }
            s => {
                return Err(LocalError::HttpStatus {
                    status: s.as_u16(),
                    url: request.url.clone(),
                })
            }
        };

        let total = response
            .content_length()
            .map(|len| len + session.resume_offset)
            .filter(|total| *total > 0)
            .unwrap_or(request.expected_size);

        // Size was unknown before the headers arrived.
        if request.expected_size == 0 {
            self.check_disk_space(session, total)
                .map_err(|e| e.context("disk space check"))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&session.temporary)
            .await?;

        let mut written = session.resume_offset;
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    file.flush().await?;
                    return Err(LocalError::Cancelled);
                }
                next = stream.next() => next,
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    file.flush().await?;
                    return Err(LocalError::Transfer(format!(
                        "connection dropped after {} bytes: {}",
                        written, e
                    )));
                }
                None => break,
            };

            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if let Ok(mut report) = progress.lock() {
                report(written, total);
            }
        }

        file.flush().await?;
        drop(file);

        if total > 0 && written < total {
            return Err(LocalError::Transfer(format!(
                "connection closed after {} of {} bytes",
                written, total
            )));
        }

        Ok(total)
    }

    /// Check size and checksum of the finished temp file, deleting it on mismatch.
    async fn verify(&self, request: &DownloadRequest, temporary: &Path) -> Result<u64, LocalError> {
        let actual = fs::metadata(temporary).await?.len();

        if request.expected_size > 0 && actual != request.expected_size {
            let _ = fs::remove_file(temporary).await;
            return Err(LocalError::SizeMismatch {
                expected: request.expected_size,
                actual,
            });
        }

        if let Some(expected) = &request.sha256 {
            let actual_hash = sha256_file(temporary).await?;
            if !actual_hash.eq_ignore_ascii_case(expected) {
                // Remove corrupted file
                let _ = fs::remove_file(temporary).await;
                return Err(LocalError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual: actual_hash,
                });
            }
            debug!("Checksum verified: {}", actual_hash);
        }

        Ok(actual)
    }
}

impl Default for ResilientDownloader {
    fn default() -> Self {
        Self::new()
    }
}

/// Hex SHA-256 of a file, hashed off the async runtime.
pub async fn sha256_file(path: &Path) -> Result<String, LocalError> {
    let path = path.to_path_buf();
    let digest = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| LocalError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
    Ok(digest)
}
