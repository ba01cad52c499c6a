//! Client for the external artifact store.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::header::CONTENT_DISPOSITION;
use reqwest::StatusCode;
use tracing::{debug, info};

use taskplane_core::{SchedulerError, SchedulerResult};

pub struct ArtifactClient {
    http_client: reqwest::Client,
    base_url: String,
    tasks_dir: PathBuf,
}

impl ArtifactClient {
    pub fn new(base_url: impl Into<String>, tasks_dir: impl Into<PathBuf>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.into(),
            tasks_dir: tasks_dir.into(),
        }
    }

    pub fn tasks_dir(&self) -> &Path {
        &self.tasks_dir
    }

    pub fn download_url(&self, task_name: &str) -> String {
        format!("{}/tasks/{}/download", self.base_url, task_name)
    }

    /// Download a task artifact into `{tasks_dir}/{task_name}-{unix_seconds}/`.
    ///
    /// Returns the path of the saved file.
    pub async fn download(&self, task_name: &str) -> SchedulerResult<PathBuf> {
        let url = self.download_url(task_name);
        debug!(task = %task_name, url = %url, "Downloading task artifact");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| SchedulerError::ArtifactDownload(format!("request to {url} failed: {e}")))?;

        if response.status() != StatusCode::OK {
            return Err(SchedulerError::ArtifactDownload(format!(
                "unexpected status {} for task {task_name}",
                response.status()
            )));
        }

        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_filename)
            .ok_or_else(|| {
                SchedulerError::ArtifactDownload(format!(
                    "no filename in content disposition for task {task_name}"
                ))
            })?;

        let body = response
            .bytes()
            .await
            .map_err(|e| SchedulerError::ArtifactDownload(format!("reading body failed: {e}")))?;

        let unix_seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let task_dir = self.tasks_dir.join(format!("{task_name}-{unix_seconds}"));
        tokio::fs::create_dir_all(&task_dir).await?;

        let path = task_dir.join(&filename);
        tokio::fs::write(&path, &body).await?;

        info!(
            task = %task_name,
            path = %path.display(),
            bytes = body.len(),
            "Task artifact downloaded"
        );
        Ok(path)
    }
}

/// Extract the file name from a `Content-Disposition` header value.
///
/// Only the final path component is kept.
pub fn parse_filename(header: &str) -> Option<String> {
    let (_, rest) = header.split_once("filename=")?;
    let raw = rest.split(';').next()?.trim().trim_matches('"');
    let name = Path::new(raw).file_name()?.to_str()?.to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Most recent artifact directory for a task.
///
/// Directories are named `{task_name}-{unix_seconds}`; the lexicographically
/// greatest match wins.
pub async fn latest_artifact_dir(
    tasks_dir: &Path,
    task_name: &str,
) -> SchedulerResult<Option<PathBuf>> {
    let prefix = format!("{task_name}-");
    let mut entries = tokio::fs::read_dir(tasks_dir).await?;
    let mut latest: Option<String> = None;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !name.starts_with(&prefix) {
            continue;
        }
        if latest.as_deref().map_or(true, |current| name.as_str() > current) {
            latest = Some(name);
        }
    }

    Ok(latest.map(|name| tasks_dir.join(name)))
}
