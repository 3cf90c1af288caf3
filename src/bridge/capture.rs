//! Interception of the page's outbound calls to the internal query endpoint.

use super::{CaptureEvent, CAPTURE_ACTIVE_FLAG, CAPTURE_INJECTED_FLAG};
use crate::models::{Credential, OperationIdentifier};
use crate::page::{FetchRequest, FetchResponse, Page, PageFetch};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedQueryBody {
    operation_name: Option<String>,
    extensions: Option<QueryExtensions>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryExtensions {
    persisted_query: Option<PersistedQuery>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedQuery {
    sha256_hash: Option<String>,
}

/// Everything worth reporting about one intercepted call.
pub fn inspect(request: &FetchRequest, query_path: &str) -> Vec<CaptureEvent> {
    let mut events = Vec::new();
    if !request.url.contains(query_path) {
        return events;
    }

    if let Some(token) = request.header_value("authorization").filter(|t| !t.is_empty()) {
        events.push(CaptureEvent::CredentialFound {
            token: Credential::new(token),
        });
    }

    let body = match request.body.as_deref() {
        Some(b) => b,
        None => return events,
    };
    let parsed: PersistedQueryBody = match serde_json::from_str(body) {
        Ok(p) => p,
        Err(e) => {
            trace!("ignoring unparsable query body: {}", e);
            return events;
        }
    };
    let name = parsed.operation_name.filter(|n| !n.is_empty());
    let hash = parsed
        .extensions
        .and_then(|e| e.persisted_query)
        .and_then(|p| p.sha256_hash)
        .filter(|h| !h.is_empty());
    if let (Some(name), Some(hash)) = (name, hash) {
        events.push(CaptureEvent::OperationHashFound {
            name,
            hash: OperationIdentifier::new(hash),
        });
    }
    events
}

/// Wrapper around a page's network entry point. Every call reaches `inner`
/// unmodified; matching calls additionally produce capture events.
pub struct InterceptingFetch {
    inner: Arc<dyn PageFetch>,
    events: mpsc::UnboundedSender<CaptureEvent>,
    query_path: String,
}

impl InterceptingFetch {
    pub fn new(
        inner: Arc<dyn PageFetch>,
        events: mpsc::UnboundedSender<CaptureEvent>,
        query_path: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            events,
            query_path: query_path.into(),
        }
    }
}

#[async_trait]
impl PageFetch for InterceptingFetch {
    async fn fetch(&self, request: FetchRequest) -> anyhow::Result<FetchResponse> {
        for event in inspect(&request, &self.query_path) {
            // Nobody listening any more; the call still goes through.
            let _ = self.events.send(event);
        }
        self.inner.fetch(request).await
    }
}

/// Inject the capture bridge into the page's current load.
///
/// Wrapping happens after `activation_delay`, and only if the page is still
/// on the same load by then. A load is wrapped at most once.
pub fn inject(
    page: &Arc<Page>,
    events: mpsc::UnboundedSender<CaptureEvent>,
    query_path: &str,
    activation_delay: Duration,
) -> bool {
    if !page.set_global(CAPTURE_INJECTED_FLAG) {
        debug!("capture bridge already injected into page {}", page.id());
        return false;
    }
    let generation = page.generation();
    let page = page.clone();
    let query_path = query_path.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(activation_delay).await;
        let wrapped = page.wrap_entry_point(generation, |inner| {
            Arc::new(InterceptingFetch::new(inner, events, query_path)) as Arc<dyn PageFetch>
        });
        if wrapped && page.generation() == generation {
            page.set_global(CAPTURE_ACTIVE_FLAG);
            info!("Capture bridge is now active on page {}", page.id());
        } else {
            debug!("page {} navigated before capture activation", page.id());
        }
    });
    true
}

/// Wait until the capture bridge wraps the page's entry point.
/// Returns false if that did not happen within `timeout`.
pub async fn wait_until_active(page: &Page, timeout: Duration) -> bool {
    let poll = Duration::from_millis(10);
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if page.has_global(CAPTURE_ACTIVE_FLAG) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}
