//! Relay between the sync orchestrator and the capture bridge of one page.

use super::{
    capture, CaptureEvent, RelayEnvelope, RelayFailure, RelayRequest, RelayResponse,
    RELAY_PRESENT_FLAG,
};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::models::{Credential, OperationIdentifier};
use crate::page::{FetchRequest, Page, PageFetch, PageId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

pub const CREDENTIAL_NOT_CAPTURED: &str =
    "Internal token not captured. Please click around Spotify.";
pub const PLAYLIST_HASH_NOT_CAPTURED: &str =
    "Playlist hash not captured. Please click on any playlist.";

const FETCH_PLAYLIST: &str = "fetchPlaylist";
const PORT_CAPACITY: usize = 16;

/// Values observed by the capture bridge during one page load.
#[derive(Debug, Default)]
pub struct CaptureCache {
    latest_credential: Option<Credential>,
    operations: HashMap<String, OperationIdentifier>,
}

impl CaptureCache {
    pub fn apply(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::CredentialFound { token } => {
                self.latest_credential = Some(token);
            }
            CaptureEvent::OperationHashFound { name, hash } => {
                debug!("captured persisted query hash for {}", name);
                self.operations.insert(name, hash);
            }
        }
    }

    pub fn latest_credential(&self) -> Option<&Credential> {
        self.latest_credential.as_ref()
    }

    pub fn operation(&self, name: &str) -> Option<&OperationIdentifier> {
        self.operations.get(name)
    }

    fn answer(&self, request: &RelayRequest) -> RelayResponse {
        match request {
            RelayRequest::GetLatestCredential => match self.latest_credential() {
                Some(token) => RelayResponse::Credential {
                    token: token.clone(),
                },
                None => not_captured(CREDENTIAL_NOT_CAPTURED.to_string()),
            },
            RelayRequest::GetOperationIdentifier { name } => match self.operation(name) {
                Some(hash) => RelayResponse::OperationIdentifier { hash: hash.clone() },
                None if name == FETCH_PLAYLIST => {
                    not_captured(PLAYLIST_HASH_NOT_CAPTURED.to_string())
                }
                None => not_captured(format!(
                    "Hash for operation {} not captured. Please browse Spotify.",
                    name
                )),
            },
            RelayRequest::PerformRelayedCall { .. } => RelayResponse::Failure {
                failure: RelayFailure::Network {
                    message: "relayed calls are not answered from the cache".into(),
                },
            },
        }
    }
}

fn not_captured(message: String) -> RelayResponse {
    RelayResponse::Failure {
        failure: RelayFailure::NotCaptured { message },
    }
}

/// Run `request` on the page's own session network and parse the JSON body.
pub async fn perform(session: &dyn PageFetch, request: FetchRequest) -> RelayResponse {
    let failure = match session.fetch(request).await {
        Err(e) => RelayFailure::Network {
            message: e.to_string(),
        },
        Ok(resp) if !resp.is_success() => RelayFailure::Http {
            status: resp.status,
        },
        Ok(resp) => match serde_json::from_str(&resp.body) {
            Ok(data) => return RelayResponse::Body { data },
            Err(e) => RelayFailure::Parse {
                message: e.to_string(),
            },
        },
    };
    RelayResponse::Failure { failure }
}

async fn run(
    page_id: PageId,
    mut cache: CaptureCache,
    mut events: mpsc::UnboundedReceiver<CaptureEvent>,
    mut requests: mpsc::Receiver<RelayEnvelope>,
    session: Arc<dyn PageFetch>,
) {
    loop {
        tokio::select! {
            // Events queued ahead of a request must be visible to it.
            biased;
            Some(event) = events.recv() => cache.apply(event),
            envelope = requests.recv() => {
                let RelayEnvelope { request, reply } = match envelope {
                    Some(e) => e,
                    None => break,
                };
                match request {
                    RelayRequest::PerformRelayedCall { request } => {
                        let session = session.clone();
                        tokio::spawn(async move {
                            let _ = reply.send(perform(session.as_ref(), request).await);
                        });
                    }
                    other => {
                        let _ = reply.send(cache.answer(&other));
                    }
                }
            }
        }
    }
    debug!("relay bridge for page {} stopped", page_id);
}

/// Inject the relay bridge, and with it the capture bridge, into the page's
/// current load. Returns false if a relay is already present.
pub fn inject(page: &Arc<Page>, cfg: &Config) -> bool {
    if !page.set_global(RELAY_PRESENT_FLAG) {
        return false;
    }
    info!("Relay bridge not found in page {}, injecting", page.id());
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (port_tx, port_rx) = mpsc::channel(PORT_CAPACITY);
    page.attach_port(port_tx);
    tokio::spawn(run(
        page.id(),
        CaptureCache::default(),
        event_rx,
        port_rx,
        page.session(),
    ));
    capture::inject(
        page,
        event_tx,
        &cfg.internal_query_path,
        cfg.capture_activation_delay(),
    );
    true
}

/// Make sure the bridges are present in `page` and return a handle to the relay.
///
/// Injecting is fire-and-forget, so a fresh injection is followed by the
/// configured settle delay.
pub async fn ensure_presence(page: &Arc<Page>, cfg: &Config) -> Result<RelayHandle> {
    if page.is_closed() {
        return Err(SyncError::Delivery(format!("page {} was closed", page.id())));
    }
    if inject(page, cfg) {
        tokio::time::sleep(cfg.relay_settle_delay()).await;
    }
    Ok(RelayHandle::new(page.clone(), cfg))
}

/// Orchestrator-side end of the relay. Holds no channel itself: every call
/// looks up the page's current port, so a navigated page is noticed.
#[derive(Clone)]
pub struct RelayHandle {
    page: Arc<Page>,
    message_timeout: Duration,
    call_timeout: Duration,
}

impl RelayHandle {
    pub fn new(page: Arc<Page>, cfg: &Config) -> Self {
        Self {
            page,
            message_timeout: cfg.relay_message_timeout(),
            call_timeout: cfg.relayed_call_timeout(),
        }
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    pub async fn latest_credential(&self) -> Result<Credential> {
        match self
            .exchange(RelayRequest::GetLatestCredential, self.message_timeout)
            .await?
        {
            RelayResponse::Credential { token } => Ok(token),
            other => Err(unexpected(other)),
        }
    }

    pub async fn operation_identifier(&self, name: &str) -> Result<OperationIdentifier> {
        let request = RelayRequest::GetOperationIdentifier {
            name: name.to_string(),
        };
        match self.exchange(request, self.message_timeout).await? {
            RelayResponse::OperationIdentifier { hash } => Ok(hash),
            other => Err(unexpected(other)),
        }
    }

    /// Run `request` from inside the page and return its parsed JSON body.
    pub async fn relayed_call(&self, request: FetchRequest) -> Result<serde_json::Value> {
        let request = RelayRequest::PerformRelayedCall { request };
        match self.exchange(request, self.call_timeout).await? {
            RelayResponse::Body { data } => Ok(data),
            other => Err(unexpected(other)),
        }
    }

    async fn exchange(&self, request: RelayRequest, timeout: Duration) -> Result<RelayResponse> {
        let port = self.page.port().ok_or_else(|| {
            SyncError::Delivery(format!("no relay bridge listening in page {}", self.page.id()))
        })?;
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = RelayEnvelope {
            request,
            reply: reply_tx,
        };
        let round_trip = async {
            port.send(envelope)
                .await
                .map_err(|_| SyncError::Delivery("page closed before the request was delivered".into()))?;
            reply_rx
                .await
                .map_err(|_| SyncError::Delivery("page closed before responding".into()))
        };
        let response = tokio::time::timeout(timeout, round_trip)
            .await
            .map_err(|_| {
                SyncError::Delivery(format!(
                    "page {} did not respond within {} ms",
                    self.page.id(),
                    timeout.as_millis()
                ))
            })??;
        match response {
            RelayResponse::Failure { failure } => Err(failure.into()),
            ok => Ok(ok),
        }
    }
}

impl From<RelayFailure> for SyncError {
    fn from(failure: RelayFailure) -> Self {
        match failure {
            RelayFailure::NotCaptured { message } => SyncError::CaptureUnavailable(message),
            RelayFailure::Http { status } => SyncError::transport("Proxy fetch", status),
            RelayFailure::Parse { message } => {
                SyncError::MalformedData(format!("relayed response is not JSON: {}", message))
            }
            RelayFailure::Network { message } => SyncError::network("Proxy fetch", message),
        }
    }
}

fn unexpected(response: RelayResponse) -> SyncError {
    SyncError::MalformedData(format!("unexpected relay response: {:?}", response))
}
