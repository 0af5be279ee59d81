//! # Media Scanner Client
//!
//! Client for the external media scanner, an HTTP sidecar that extracts
//! metadata and renders previews/thumbnails asynchronously.
//!
//! ## Protocol
//!
//! Generation is requested with an empty-bodied `POST` to
//! `http://{host}:{port}/<kind>/…Async/{urlencoded id}`. The scanner answers
//! with a plain-text body whose leading token carries the state; HTTP status
//! codes are not consulted:
//!
//! | Leading token | Meaning | Client action |
//! |---------------|---------|---------------|
//! | `202` | completed | report done |
//! | `203` | in flight | wait 1 s, `GET` the same URI |
//! | anything else (`500 …`, `404 …`, …) | failure | report the body |
//!
//! Polls use `GET`, never `POST` — re-posting would enqueue the job again.
//! There is no client-side retry and no timeout: a stuck job must resolve to
//! a `500`/`404` body on the scanner side.

use std::sync::Arc;
use std::time::Duration;

use bridge_traits::{HttpClient, HttpMethod, HttpRequest};
use core_runtime::config::MediaScannerSettings;
use tracing::{debug, warn};

/// Interval between polls while the scanner reports a job in flight.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Scanner-side artefact kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    /// Media-info scan of a file path.
    MediaInfo,
    /// Advanced metadata generation for a clip id.
    Metadata,
    /// Preview generation for a clip id.
    Preview,
    /// Thumbnail generation for a clip id.
    Thumbnail,
}

impl ScanKind {
    fn path_segment(&self) -> &'static str {
        match self {
            ScanKind::MediaInfo => "media/scanAsync",
            ScanKind::Metadata => "metadata/generateAsync",
            ScanKind::Preview => "preview/generateAsync",
            ScanKind::Thumbnail => "thumbnail/generateAsync",
        }
    }
}

impl std::fmt::Display for ScanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path_segment())
    }
}

/// Outcome of one scanner operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The scanner reported completion (`202`).
    Done,
    /// The operation was not attempted; carries the reason.
    Skipped(String),
    /// The scanner reported failure or the transport failed; carries the
    /// response body or the transport error.
    Failed(String),
}

enum Reply {
    Completed,
    InProgress,
    Failed,
}

fn classify(body: &str) -> Reply {
    match body.split_whitespace().next().unwrap_or("") {
        "202" => Reply::Completed,
        "203" => Reply::InProgress,
        _ => Reply::Failed,
    }
}

/// Polling client for the media scanner.
pub struct MediaScannerClient {
    http: Arc<dyn HttpClient>,
    settings: MediaScannerSettings,
}

impl MediaScannerClient {
    pub fn new(http: Arc<dyn HttpClient>, settings: MediaScannerSettings) -> Self {
        Self { http, settings }
    }

    /// Whether a scanner endpoint is configured at all.
    pub fn is_configured(&self) -> bool {
        self.settings.base_url().is_some()
    }

    /// Path id used by the media-info scan: the storage-relative path with
    /// `\` normalised to `/`, extension kept.
    pub fn media_path_id(name: &str) -> String {
        name.replace('\\', "/")
    }

    /// Clip id used by metadata/preview/thumbnail generation: the
    /// separator-normalised path without its final extension, placed under
    /// the storage's media-path prefix when one is configured.
    pub fn clip_id(name: &str, media_path: Option<&str>) -> String {
        let normalized = name.replace('\\', "/");
        let stem = match normalized.rfind('.') {
            Some(dot) if dot > normalized.rfind('/').map_or(0, |slash| slash + 1) => {
                normalized[..dot].to_string()
            }
            _ => normalized,
        };

        match media_path {
            Some(prefix) if !prefix.is_empty() => {
                format!("{}/{}", prefix.trim_end_matches('/'), stem)
            }
            _ => stem,
        }
    }

    /// Request generation of `kind` for `id` and poll until the scanner
    /// settles.
    ///
    /// Returns `Skipped` without touching the network when no scanner host is
    /// configured.
    pub async fn generate(&self, kind: ScanKind, id: &str) -> ScanOutcome {
        let Some(base_url) = self.settings.base_url() else {
            debug!(kind = %kind, id, "Media scanner not configured; skipping");
            return ScanOutcome::Skipped("media scanner is not configured".to_string());
        };

        let uri = format!("{}/{}/{}", base_url, kind.path_segment(), urlencoding::encode(id));
        debug!(uri = %uri, "Requesting media scanner generation");

        // The initial request posts the job; subsequent polls only read it.
        let mut method = HttpMethod::Post;
        loop {
            let response = match self.http.execute(HttpRequest::new(method, uri.clone())).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(uri = %uri, error = %e, "Media scanner request failed");
                    return ScanOutcome::Failed(e.to_string());
                }
            };

            let body = match response.text() {
                Ok(body) => body,
                Err(e) => return ScanOutcome::Failed(e.to_string()),
            };

            match classify(&body) {
                Reply::Completed => {
                    debug!(uri = %uri, "Media scanner reported completion");
                    return ScanOutcome::Done;
                }
                Reply::InProgress => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                    method = HttpMethod::Get;
                }
                Reply::Failed => {
                    warn!(uri = %uri, body = %body, "Media scanner reported failure");
                    return ScanOutcome::Failed(body);
                }
            }
        }
    }
}

impl std::fmt::Debug for MediaScannerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaScannerClient")
            .field("configured", &self.is_configured())
            .finish()
    }
}
