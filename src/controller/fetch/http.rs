//! # HTTP Fetch
//!
//! Streamed download of an http source, optional sha256 verification and
//! extraction of gzip / tar archives.

use super::secrets::secret_entries;
use super::FetchError;
use crate::crd::FetchHttp;
use crate::exec::{CmdRunResult, CommandRunner, CommandSpec};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

const DOWNLOAD_FILE: &str = "download";

/// Downloads http sources
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    runner: Arc<dyn CommandRunner>,
    tar: String,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("tar", &self.tar)
            .finish_non_exhaustive()
    }
}

/// Payload kind detected from magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Payload {
    Gzip,
    Tar,
    Plain,
}

impl HttpFetcher {
    /// Build a fetcher whose requests time out after `timeout`
    pub fn new(
        timeout: Duration,
        runner: Arc<dyn CommandRunner>,
        tar: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            runner,
            tar: tar.into(),
        })
    }

    /// Download `http.url` and lay its content out under `content_dir`
    pub async fn fetch(
        &self,
        http: &FetchHttp,
        secret: Option<&Secret>,
        work_dir: &Path,
        content_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<CmdRunResult, FetchError> {
        let span = info_span!("fetch.http", http.url = %http.url);
        async {
            let download = work_dir.join(DOWNLOAD_FILE);
            let size = tokio::select! {
                res = self.download(http, secret, &download) => res?,
                () = cancel.cancelled() => return Err(FetchError::Canceled),
            };

            if let Some(expected) = &http.sha256 {
                verify_checksum(&download, expected, &http.url)?;
            }

            let mut result = match detect_payload(&download)? {
                Payload::Gzip => self.extract(&download, content_dir, true, cancel).await?,
                Payload::Tar => self.extract(&download, content_dir, false, cancel).await?,
                Payload::Plain => {
                    let name = file_name_from_url(&http.url);
                    tokio::fs::rename(&download, content_dir.join(&name))
                        .await
                        .map_err(|e| FetchError::io(format!("failed to place {name}"), e))?;
                    CmdRunResult::success(format!("downloaded {name}"))
                }
            };
            result.stdout = format!("fetched {} ({size} bytes)\n{}", http.url, result.stdout);
            Ok(result)
        }
        .instrument(span)
        .await
    }

    async fn download(
        &self,
        http: &FetchHttp,
        secret: Option<&Secret>,
        target: &Path,
    ) -> Result<u64, FetchError> {
        let start = Instant::now();
        info!("Downloading {}", http.url);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::io(format!("failed to create {}", parent.display()), e))?;
        }

        let mut request = self.client.get(&http.url);
        if let Some(secret) = secret {
            let entries = secret_entries(secret);
            if let Some(username) = entries.get("username") {
                let password = entries
                    .get("password")
                    .map(|p| String::from_utf8_lossy(p).into_owned());
                request = request.basic_auth(String::from_utf8_lossy(username), password);
            }
        }

        let response = request.send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                "timeout"
            } else if e.is_connect() {
                "connection failed"
            } else {
                "request failed"
            };
            warn!("Failed to download {}: {} ({})", http.url, e, kind);
            FetchError::Download {
                url: http.url.clone(),
                message: format!("{kind}: {e}"),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Download of {} returned HTTP {}", http.url, status.as_u16());
            return Err(FetchError::HttpStatus {
                url: http.url.clone(),
                status: status.as_u16(),
            });
        }

        // Content-Length is compared against the streamed size to catch truncation
        let expected_size = response.content_length();
        let mut file = tokio::fs::File::create(target)
            .await
            .map_err(|e| FetchError::io(format!("failed to create {}", target.display()), e))?;

        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::Download {
                url: http.url.clone(),
                message: format!("failed to read response body: {e}"),
            })?;
            downloaded += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::io("failed to write download", e))?;
        }
        file.flush()
            .await
            .map_err(|e| FetchError::io("failed to flush download", e))?;
        drop(file);

        if let Some(expected) = expected_size {
            if downloaded != expected {
                return Err(FetchError::Download {
                    url: http.url.clone(),
                    message: format!(
                        "partial download: expected {expected} bytes, got {downloaded}"
                    ),
                });
            }
        }

        debug!(
            bytes = downloaded,
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "download finished"
        );
        Ok(downloaded)
    }

    async fn extract(
        &self,
        archive: &Path,
        destination: &Path,
        gzip: bool,
        cancel: &CancellationToken,
    ) -> Result<CmdRunResult, FetchError> {
        info!("Extracting archive to {}", destination.display());
        let spec = CommandSpec::new(&self.tar)
            .arg(if gzip { "-xzf" } else { "-xf" })
            .arg(archive.display().to_string())
            .arg("-C")
            .arg(destination.display().to_string());
        let result = self.runner.run(&spec, Some(cancel), None).await;
        if cancel.is_cancelled() {
            return Err(FetchError::Canceled);
        }
        if !result.is_success() {
            return Err(FetchError::ToolFailed {
                tool: "tar",
                result,
            });
        }
        Ok(result)
    }
}

/// Compare the file's sha256 with `expected` (hex, optional `sha256:` prefix)
fn verify_checksum(file: &Path, expected: &str, url: &str) -> Result<(), FetchError> {
    use std::io::Read;

    let mut reader = std::fs::File::open(file)
        .map_err(|e| FetchError::io("failed to open download for checksum", e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];
    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|e| FetchError::io("failed to read download for checksum", e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    let actual = format!("{:x}", hasher.finalize());
    let expected = expected.trim().trim_start_matches("sha256:").to_lowercase();
    if expected != actual {
        return Err(FetchError::ChecksumMismatch {
            url: url.to_string(),
            expected,
            actual,
        });
    }
    debug!("Checksum verified: sha256:{}", actual);
    Ok(())
}

fn detect_payload(file: &Path) -> Result<Payload, FetchError> {
    use std::io::Read;

    let mut header = [0u8; 262];
    let mut reader = std::fs::File::open(file)
        .map_err(|e| FetchError::io("failed to open download", e))?;
    let read = reader
        .read(&mut header)
        .map_err(|e| FetchError::io("failed to read download", e))?;

    // gzip: 1f 8b; tar: "ustar" at offset 257
    if read >= 2 && header[..2] == [0x1f, 0x8b] {
        return Ok(Payload::Gzip);
    }
    if read >= 262 && &header[257..262] == b"ustar" {
        return Ok(Payload::Tar);
    }
    Ok(Payload::Plain)
}

/// Last path segment of `url`, without query or fragment
fn file_name_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .find(|segment| !segment.is_empty() && !segment.contains(':'))
        .unwrap_or("index")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("https://example.com/releases/app.yml?token=x"),
            "app.yml"
        );
        assert_eq!(file_name_from_url("https://example.com/"), "example.com");
        assert_eq!(file_name_from_url("https://example.com/a/b/"), "b");
    }

    #[test]
    fn test_detect_payload() {
        let dir = tempfile::tempdir().unwrap();
        let gz = dir.path().join("a.tgz");
        std::fs::write(&gz, [0x1f, 0x8b, 0x08, 0x00]).unwrap();
        assert_eq!(detect_payload(&gz).unwrap(), Payload::Gzip);

        let plain = dir.path().join("a.yml");
        std::fs::write(&plain, "kind: ConfigMap\n").unwrap();
        assert_eq!(detect_payload(&plain).unwrap(), Payload::Plain);

        let mut tar = vec![0u8; 512];
        tar[257..262].copy_from_slice(b"ustar");
        let tar_path = dir.path().join("a.tar");
        std::fs::write(&tar_path, tar).unwrap();
        assert_eq!(detect_payload(&tar_path).unwrap(), Payload::Tar);
    }

    #[test]
    fn test_verify_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("payload");
        std::fs::write(&file, "hello").unwrap();
        let digest = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

        assert!(verify_checksum(&file, digest, "u").is_ok());
        assert!(verify_checksum(&file, &format!("sha256:{}", digest.to_uppercase()), "u").is_ok());
        assert!(matches!(
            verify_checksum(&file, &"0".repeat(64), "u"),
            Err(FetchError::ChecksumMismatch { .. })
        ));
    }
}
