//! Two-stage credential capture.
//!
//! The capture bridge sits on the page's network entry point and emits
//! [`CaptureEvent`]s. The relay bridge consumes them into its cache and answers
//! [`RelayRequest`]s from the sync orchestrator. Both hops are typed channels.

pub mod capture;
pub mod relay;

use crate::models::{Credential, OperationIdentifier};
use crate::page::FetchRequest;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Page flag set once the capture bridge has been injected into a load.
pub const CAPTURE_INJECTED_FLAG: &str = "blendSyncCaptureInjected";
/// Page flag set once the capture bridge wraps the entry point.
pub const CAPTURE_ACTIVE_FLAG: &str = "blendSyncCaptureActive";
/// Page flag set once the relay bridge listens on the page's port.
pub const RELAY_PRESENT_FLAG: &str = "blendSyncRelayPresent";

/// Capture bridge -> relay bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum CaptureEvent {
    CredentialFound { token: Credential },
    OperationHashFound { name: String, hash: OperationIdentifier },
}

/// Orchestrator -> relay bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum RelayRequest {
    GetLatestCredential,
    GetOperationIdentifier { name: String },
    PerformRelayedCall { request: FetchRequest },
}

/// Relay bridge -> orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum RelayResponse {
    Credential { token: Credential },
    OperationIdentifier { hash: OperationIdentifier },
    Body { data: serde_json::Value },
    Failure { failure: RelayFailure },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RelayFailure {
    NotCaptured { message: String },
    Http { status: u16 },
    Parse { message: String },
    Network { message: String },
}

/// A request plus the channel its answer goes back on.
#[derive(Debug)]
pub struct RelayEnvelope {
    pub request: RelayRequest,
    pub reply: oneshot::Sender<RelayResponse>,
}
