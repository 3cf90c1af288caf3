//! Replay of a recorded browser session (HAR) as a page's own traffic.
//!
//! Only the request half of each entry is used: replaying it through
//! [`Page::fetch`] lets the capture bridge observe real credentials the way it
//! would inside a live web player.

use super::{FetchRequest, Page};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Deserialize)]
struct Har {
    log: HarLog,
}

#[derive(Deserialize)]
struct HarLog {
    #[serde(default)]
    entries: Vec<HarEntry>,
}

#[derive(Deserialize)]
struct HarEntry {
    request: HarRequest,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HarRequest {
    method: String,
    url: String,
    #[serde(default)]
    headers: Vec<HarHeader>,
    post_data: Option<HarPostData>,
}

#[derive(Deserialize)]
struct HarHeader {
    name: String,
    value: String,
}

#[derive(Deserialize)]
struct HarPostData {
    text: Option<String>,
}

// Set by the transport, not by the page's scripts.
const SKIPPED_HEADERS: &[&str] = &["host", "content-length", "connection", "accept-encoding"];

pub struct HarRecording {
    requests: Vec<FetchRequest>,
}

impl HarRecording {
    pub fn from_path(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading HAR file {}", path.display()))?;
        Self::parse(&s)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let har: Har = serde_json::from_str(s).context("parsing HAR json")?;
        let requests = har
            .log
            .entries
            .into_iter()
            .map(|e| {
                let mut req = FetchRequest::new(&e.request.method, e.request.url);
                for h in e.request.headers {
                    let name = h.name.to_ascii_lowercase();
                    if name.starts_with(':') || SKIPPED_HEADERS.contains(&name.as_str()) {
                        continue;
                    }
                    req.headers.insert(name, h.value);
                }
                req.body = e.request.post_data.and_then(|p| p.text);
                req
            })
            .collect();
        Ok(Self { requests })
    }

    pub fn requests(&self) -> &[FetchRequest] {
        &self.requests
    }

    /// Requests whose URL host equals the host of `base_url`, in recorded order.
    pub fn addressed_to(&self, base_url: &str) -> Vec<FetchRequest> {
        let host = match Url::parse(base_url).ok().and_then(|u| u.host_str().map(String::from)) {
            Some(h) => h,
            None => return Vec::new(),
        };
        self.requests
            .iter()
            .filter(|r| {
                Url::parse(&r.url)
                    .ok()
                    .and_then(|u| u.host_str().map(|h| h == host))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}

/// Issue `requests` through the page's entry point, one after another.
/// Returns how many completed with a success status.
pub async fn replay(page: &Page, requests: Vec<FetchRequest>) -> usize {
    let total = requests.len();
    let mut ok = 0usize;
    for req in requests {
        let url = req.url.clone();
        match page.fetch(req).await {
            Ok(resp) if resp.is_success() => {
                debug!("replayed {} -> {}", url, resp.status);
                ok += 1;
            }
            Ok(resp) => warn!("replayed {} -> HTTP {}", url, resp.status),
            Err(e) => warn!("replaying {} failed: {}", url, e),
        }
    }
    info!("Replayed {} recorded request(s), {} succeeded", total, ok);
    ok
}
