use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Authorization header value observed on the web player's internal API calls.
/// Already carries its scheme (e.g. "Bearer ...") and is replayed verbatim.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Persisted-query hash naming one internal API operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationIdentifier(String);

impl OperationIdentifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Public Web API access token of the destination account.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub display_name: Option<String>,
}

impl UserProfile {
    /// Falls back to the account id for users without a display name.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// One (collaborator, interaction) pair attached to a blend item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub display_name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistItem {
    pub uri: Option<String>,
    pub attributions: Vec<Attribution>,
}

/// Set of track URIs that remembers first-insertion order.
///
/// Equality ignores order; iteration and `difference` follow insertion order.
#[derive(Debug, Clone, Default)]
pub struct TrackUriSet {
    order: Vec<String>,
    members: HashSet<String>,
}

impl TrackUriSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the URI was already present.
    pub fn insert(&mut self, uri: impl Into<String>) -> bool {
        let uri = uri.into();
        if self.members.contains(&uri) {
            return false;
        }
        self.members.insert(uri.clone());
        self.order.push(uri);
        true
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.members.contains(uri)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// URIs of `self` missing from `other`, in `self`'s order.
    pub fn difference(&self, other: &TrackUriSet) -> Vec<String> {
        self.order
            .iter()
            .filter(|u| !other.contains(u))
            .cloned()
            .collect()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.order
    }
}

impl PartialEq for TrackUriSet {
    fn eq(&self, other: &Self) -> bool {
        self.members == other.members
    }
}

impl Eq for TrackUriSet {}

impl<S: Into<String>> FromIterator<S> for TrackUriSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = TrackUriSet::new();
        set.extend(iter);
        set
    }
}

impl<S: Into<String>> Extend<S> for TrackUriSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for uri in iter {
            self.insert(uri);
        }
    }
}

/// Identifiers of one sync invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub blend_playlist_id: String,
    pub collaborator: String,
    pub target_playlist_id: String,
}

/// Terminal report of a sync run, delivered to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Added { count: usize },
    Failed { reason: String, capture_unavailable: bool },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Added { .. })
    }

    pub fn added_count(&self) -> Option<usize> {
        match self {
            SyncOutcome::Added { count } => Some(*count),
            SyncOutcome::Failed { .. } => None,
        }
    }

    /// One-line status for a presentation surface.
    pub fn status_message(&self) -> String {
        match self {
            SyncOutcome::Added { count } => format!("Success! Added {} new song(s).", count),
            SyncOutcome::Failed {
                capture_unavailable: true,
                ..
            } => format!("Error: {}", crate::error::CAPTURE_HINT),
            SyncOutcome::Failed { reason, .. } => format!("Error: {}", reason),
        }
    }
}
