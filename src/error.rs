use thiserror::Error;

/// Result alias used across the sync pipeline.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Shown instead of the raw reason when the page has not been observed yet.
pub const CAPTURE_HINT: &str =
    "Please browse Spotify to capture necessary data, then try again.";

/// Failures of the destination-account authorization flow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authentication flow was cancelled.")]
    Cancelled,

    #[error("Token not found in redirect URL.")]
    NoRedirectToken,

    #[error("Error parsing redirect URL: {0}")]
    Parse(String),

    /// The `state` echoed by the redirect does not belong to this flow.
    #[error("Redirect state does not match the authorization request.")]
    StateMismatch,

    #[error("Not logged in.")]
    NotLoggedIn,

    #[error("Failed to validate token.")]
    Rejected(String),
}

/// Every way a sync run (or one of its collaborators) can fail.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Required setup is absent; the user has to finish configuration.
    #[error("{0}")]
    ConfigMissing(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The page has not made the network call we need to observe yet.
    #[error("{0}")]
    CaptureUnavailable(String),

    /// An HTTP call answered with a non-success status.
    #[error("{context} failed: HTTP {status}")]
    Transport { context: String, status: u16 },

    /// An HTTP call could not be completed at all.
    #[error("{context} failed: {message}")]
    Network { context: String, message: String },

    /// A message across a context boundary was not delivered or answered.
    #[error("Page unreachable: {0}")]
    Delivery(String),

    #[error("No active Spotify tab found.")]
    NoActiveTab,

    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error("A sync into playlist {0} is already running.")]
    AlreadyRunning(String),

    #[error("{0}")]
    InvalidInput(String),

    /// Some chunks were added before a later chunk failed; nothing is rolled back.
    #[error("{source} ({applied} of {total} tracks were added before the failure)")]
    PartialApply {
        applied: usize,
        total: usize,
        #[source]
        source: Box<SyncError>,
    },

    #[error("Storage error: {0}")]
    Store(#[from] anyhow::Error),
}

impl SyncError {
    pub fn transport(context: impl Into<String>, status: u16) -> Self {
        SyncError::Transport {
            context: context.into(),
            status,
        }
    }

    pub fn network(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        SyncError::Network {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// True for a 401 from any HTTP call.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SyncError::Transport { status: 401, .. })
    }

    /// True when the fix is to interact with the web player page.
    pub fn is_capture_unavailable(&self) -> bool {
        match self {
            SyncError::CaptureUnavailable(_) => true,
            SyncError::PartialApply { source, .. } => source.is_capture_unavailable(),
            _ => false,
        }
    }

    /// The text a presentation surface should show for this failure.
    pub fn user_message(&self) -> String {
        if self.is_capture_unavailable() {
            CAPTURE_HINT.to_string()
        } else {
            self.to_string()
        }
    }
}
