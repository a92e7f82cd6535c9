//! REST client for the long-term archive store.
//!
//! Blobs are versioned objects keyed by run number under a configured
//! folder/object pair. Construction probes the server version so an
//! unreachable store fails the process before any work starts.

use std::collections::BTreeSet;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::{debug, info, warn};

use crate::config::ArchiveStoreConfig;
use crate::error::{ArchiverError, Result};

/// Version string returned for an upload whose key already exists.
pub const EXISTING_VERSION: &str = "exists";

/// The archive-store capability set the pipeline depends on. The REST
/// client is the production implementation; tests substitute in-memory
/// stores.
pub trait ArchiveStore: Send + Sync {
    /// Run numbers with at least one stored version.
    fn list_runs(&self) -> Result<BTreeSet<u32>>;

    /// Upload a blob, returning the new version identifier or
    /// [`EXISTING_VERSION`] when the run was already present.
    fn upload(&self, run_number: u32, blob: &str) -> Result<String>;

    /// Download the stored blob for a run; absent runs are an error.
    fn download(&self, run_number: u32) -> Result<String>;
}

impl ArchiveStore for ArchiveClient {
    fn list_runs(&self) -> Result<BTreeSet<u32>> {
        ArchiveClient::list_runs(self)
    }

    fn upload(&self, run_number: u32, blob: &str) -> Result<String> {
        ArchiveClient::upload(self, run_number, blob)
    }

    fn download(&self, run_number: u32) -> Result<String> {
        ArchiveClient::download(self, run_number)
    }
}

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_MS: u64 = 500;
const RETRY_MAX_DELAY_MS: u64 = 5_000;

#[derive(Debug)]
pub struct ArchiveClient {
    base_url: String,
    folder_name: String,
    object_name: String,
    agent: ureq::Agent,
    auth_header: String,
}

impl ArchiveClient {
    /// Build a client and verify the server is reachable with a cheap
    /// version call. Initialization failure is a hard error.
    pub fn new(config: &ArchiveStoreConfig) -> Result<ArchiveClient> {
        let parsed = url::Url::parse(&config.url).map_err(|e| {
            ArchiverError::Config(format!("invalid archive store URL '{}': {e}", config.url))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ArchiverError::Config(format!(
                "archive store URL must be http(s), got '{}'",
                config.url
            )));
        }

        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build();
        let credentials = format!("{}:{}", config.writer_user, config.writer_password);
        let client = ArchiveClient {
            base_url: config.url.trim_end_matches('/').to_string(),
            folder_name: config.folder_name.clone(),
            object_name: config.object_name.clone(),
            agent,
            auth_header: format!("Basic {}", BASE64.encode(credentials)),
        };

        let version_url = format!("{}/app/version", client.base_url);
        let response = client
            .retry_call("version", || client.request("GET", &version_url).call())
            .map_err(|e| {
                ArchiverError::ArchiveStore(format!(
                    "failed to initialize archive store client for {}: {e}",
                    client.base_url
                ))
            })?;
        let version = response.into_string().map_err(|e| {
            ArchiverError::ArchiveStore(format!("failed to read server version: {e}"))
        })?;
        info!(
            "Connected to archive store {} (server version: {})",
            client.base_url,
            version.trim()
        );
        Ok(client)
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        self.agent
            .request(method, url)
            .set("Authorization", &self.auth_header)
    }

    fn data_url(&self, run_number: u32) -> String {
        format!(
            "{}/app/data/{}/{}/key={run_number}",
            self.base_url, self.folder_name, self.object_name
        )
    }

    /// Retry a closure on transient errors with exponential backoff and
    /// jitter.
    #[allow(clippy::result_large_err)]
    fn retry_call<T>(
        &self,
        op_name: &str,
        f: impl Fn() -> std::result::Result<T, ureq::Error>,
    ) -> std::result::Result<T, ureq::Error> {
        let mut delay_ms = RETRY_DELAY_MS;
        let mut last_err = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let jitter = rand::random::<u64>() % delay_ms.max(1);
                std::thread::sleep(Duration::from_millis(delay_ms + jitter));
                delay_ms = (delay_ms * 2).min(RETRY_MAX_DELAY_MS);
            }
            match f() {
                Ok(val) => return Ok(val),
                Err(e) if is_retryable(&e) && attempt < MAX_RETRIES => {
                    warn!(
                        "archive store {op_name}: transient error (attempt {}/{MAX_RETRIES}), retrying: {e}",
                        attempt + 1
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.expect("retry loop exited without error"))
    }

    /// Run numbers with at least one stored version.
    pub fn list_runs(&self) -> Result<BTreeSet<u32>> {
        let url = format!(
            "{}/app/data/{}/{}/versions?format=json",
            self.base_url, self.folder_name, self.object_name
        );
        let value: serde_json::Value = self
            .retry_call("list-versions", || self.request("GET", &url).call())
            .map_err(|e| ArchiverError::ArchiveStore(format!("failed to list versions: {e}")))?
            .into_json()
            .map_err(|e| {
                ArchiverError::ArchiveStore(format!("failed to parse versions listing: {e}"))
            })?;

        let entries = value.as_array().ok_or_else(|| {
            ArchiverError::ArchiveStore("versions listing is not a JSON array".into())
        })?;
        let runs = entries
            .iter()
            .filter_map(|entry| entry.get("key"))
            .filter_map(|key| key.as_str())
            .filter_map(|key| key.parse::<u32>().ok())
            .collect();
        Ok(runs)
    }

    /// Upload a blob for a run, returning the new version identifier.
    /// Idempotent: a run that is already present is reported with a warning
    /// and the sentinel version [`EXISTING_VERSION`]; it is never a failure
    /// and the stored blob is never replaced.
    pub fn upload(&self, run_number: u32, blob: &str) -> Result<String> {
        let url = self.data_url(run_number);

        match self.retry_call("exists", || self.request("HEAD", &url).call()) {
            Ok(_) => {
                warn!("Run {run_number} already present in archive store; skipping upload");
                return Ok(EXISTING_VERSION.to_string());
            }
            Err(ureq::Error::Status(404, _)) => {}
            Err(e) => {
                return Err(ArchiverError::ArchiveStore(format!(
                    "failed to check run {run_number} presence: {e}"
                )))
            }
        }

        let version = self
            .retry_call("upload", || {
                self.request("PUT", &url)
                    .set("Content-Type", "text/plain; charset=utf-8")
                    .send_string(blob)
            })
            .map_err(|e| {
                ArchiverError::ArchiveStore(format!("failed to upload blob for run {run_number}: {e}"))
            })?
            .into_string()
            .map_err(|e| {
                ArchiverError::ArchiveStore(format!(
                    "failed to read upload response for run {run_number}: {e}"
                ))
            })?;
        let version = version.trim().to_string();
        debug!("Uploaded run {run_number} as version '{version}'");
        Ok(version)
    }

    /// Download the stored blob for a run.
    pub fn download(&self, run_number: u32) -> Result<String> {
        let url = self.data_url(run_number);
        match self.retry_call("download", || self.request("GET", &url).call()) {
            Ok(resp) => resp.into_string().map_err(|e| {
                ArchiverError::ArchiveStore(format!(
                    "failed to read blob for run {run_number}: {e}"
                ))
            }),
            Err(ureq::Error::Status(404, _)) => Err(ArchiverError::ArchiveStore(format!(
                "run {run_number} not found in archive store"
            ))),
            Err(e) => Err(ArchiverError::ArchiveStore(format!(
                "failed to download blob for run {run_number}: {e}"
            ))),
        }
    }
}

/// Whether an HTTP error is transient and worth retrying.
fn is_retryable(err: &ureq::Error) -> bool {
    match err {
        ureq::Error::Transport(_) => true,
        ureq::Error::Status(code, _) => *code == 429 || *code >= 500,
    }
}
