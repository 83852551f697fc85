//! Remote shard fetching.
//!
//! Downloads shard files from a public object-store bucket with plain,
//! unauthenticated `GET` requests and writes them into the local data
//! directory. Once a shard is cached locally it is never re-fetched; the
//! local copy is the source of truth.
//!
//! # URL Layout
//!
//! ```text
//! <remote_base_url>/<shard name>
//! https://example-bucket.s3.us-west-2.amazonaws.com/sewer-inspections-part3.jsonl
//! ```
//!
//! Shard names are percent-encoded per path segment.
//!
//! # Failure Policy
//!
//! Fetching is best effort. Callers receive an error for network failures
//! and non-2xx statuses and decide what to do with it; the ingest pipeline
//! logs it and skips the shard.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::time::Duration;

/// HTTP client for one ingest run.
pub struct ShardFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl ShardFetcher {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Public URL for a shard name.
    pub fn shard_url(&self, name: &str) -> String {
        let encoded = name.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        format!("{}/{}", self.base_url, encoded)
    }

    /// Download `name` into `dest`.
    ///
    /// The body is written to a sibling `.part` file which is renamed into
    /// place only after the full body arrived, so `dest` is either complete
    /// or absent. A failed write or rename removes the `.part` file.
    pub async fn fetch_to(&self, name: &str, dest: &Path) -> Result<u64> {
        let url = self.shard_url(name);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get {}: {}", url, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            bail!("GET {} failed (HTTP {})", url, status);
        }

        let bytes = resp
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {}", url))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut part = dest.as_os_str().to_owned();
        part.push(".part");
        let part = std::path::PathBuf::from(part);

        let written = match tokio::fs::write(&part, &bytes).await {
            Ok(()) => tokio::fs::rename(&part, dest)
                .await
                .with_context(|| format!("Failed to move {} into place", part.display())),
            Err(e) => Err(anyhow::Error::new(e).context(format!("Failed to write {}", part.display()))),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }

        Ok(bytes.len() as u64)
    }
}

/// URI-encode a string per RFC 3986.
///
/// Encodes all characters except unreserved characters:
/// `A-Z a-z 0-9 - _ . ~`
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
