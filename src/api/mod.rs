pub mod auth;
pub mod mock;
pub mod pathfinder;
pub mod spotify;

use crate::error::Result;
use crate::models::{BearerToken, UserProfile};

/// One page of a playlist's current tracks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TracksPage {
    pub uris: Vec<String>,
    /// Cursor for the following page; `None` on the last one.
    pub next: Option<String>,
}

/// Public Web API operations the sync pipeline needs, authenticated with the
/// destination account's bearer token.
/// Implementations: spotify::SpotifyWebApi and mock::MemoryPlaylistApi.
#[async_trait::async_trait]
pub trait PlaylistApi: Send + Sync {
    /// Profile of the token's owner. Also used as the token validation probe.
    async fn current_user(&self, token: &BearerToken) -> Result<UserProfile>;

    /// First page when `cursor` is `None`, otherwise the page the cursor names.
    async fn playlist_tracks_page(
        &self,
        token: &BearerToken,
        playlist_id: &str,
        cursor: Option<&str>,
    ) -> Result<TracksPage>;

    /// Add tracks (URIs) to playlist (batching done by caller)
    async fn add_tracks(&self, token: &BearerToken, playlist_id: &str, uris: &[String]) -> Result<()>;

    /// Return the provider's name (for logging)
    fn name(&self) -> &str;
}
