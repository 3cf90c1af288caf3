use super::{PlaylistApi, TracksPage};
use crate::error::{Result, SyncError};
use crate::models::{BearerToken, UserProfile};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::info;

#[derive(Default)]
struct State {
    playlists: HashMap<String, Vec<String>>,
    add_calls: Vec<(String, Vec<String>)>,
    page_fetches: usize,
    probes: usize,
    fail_add_call: Option<usize>,
}

/// An in-memory playlist API used in tests and dry runs.
/// Pages are cursor-addressed by offset; every add call is recorded.
pub struct MemoryPlaylistApi {
    page_size: usize,
    profile: UserProfile,
    valid_tokens: Mutex<HashSet<String>>,
    state: Mutex<State>,
}

impl MemoryPlaylistApi {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            profile: UserProfile {
                id: "memory-user".into(),
                display_name: Some("Memory User".into()),
            },
            valid_tokens: Mutex::new(HashSet::new()),
            state: Mutex::new(State::default()),
        }
    }

    /// Tokens not accepted here get a 401 from every call.
    pub fn accept_token(&self, token: &str) {
        if let Ok(mut t) = self.valid_tokens.lock() {
            t.insert(token.to_string());
        }
    }

    pub fn revoke_token(&self, token: &str) {
        if let Ok(mut t) = self.valid_tokens.lock() {
            t.remove(token);
        }
    }

    pub fn set_tracks<I, S>(&self, playlist_id: &str, uris: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut s) = self.state.lock() {
            s.playlists
                .insert(playlist_id.to_string(), uris.into_iter().map(Into::into).collect());
        }
    }

    pub fn tracks(&self, playlist_id: &str) -> Vec<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.playlists.get(playlist_id).cloned())
            .unwrap_or_default()
    }

    /// Make the `index`-th add call (zero-based) answer HTTP 502.
    pub fn fail_add_call(&self, index: usize) {
        if let Ok(mut s) = self.state.lock() {
            s.fail_add_call = Some(index);
        }
    }

    pub fn add_calls(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().map(|s| s.add_calls.clone()).unwrap_or_default()
    }

    pub fn page_fetches(&self) -> usize {
        self.state.lock().map(|s| s.page_fetches).unwrap_or_default()
    }

    pub fn probes(&self) -> usize {
        self.state.lock().map(|s| s.probes).unwrap_or_default()
    }

    fn check(&self, token: &BearerToken, context: &str) -> Result<()> {
        let ok = self
            .valid_tokens
            .lock()
            .map(|t| t.contains(token.as_str()))
            .unwrap_or(false);
        if ok {
            Ok(())
        } else {
            Err(SyncError::transport(context, 401))
        }
    }
}

#[async_trait]
impl PlaylistApi for MemoryPlaylistApi {
    fn name(&self) -> &str {
        "memory"
    }

    async fn current_user(&self, token: &BearerToken) -> Result<UserProfile> {
        if let Ok(mut s) = self.state.lock() {
            s.probes += 1;
        }
        self.check(token, "Profile lookup")?;
        Ok(self.profile.clone())
    }

    async fn playlist_tracks_page(
        &self,
        token: &BearerToken,
        playlist_id: &str,
        cursor: Option<&str>,
    ) -> Result<TracksPage> {
        self.check(token, "Existing tracks lookup")?;
        let offset = match cursor {
            None => 0,
            Some(c) => c
                .strip_prefix("offset:")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| SyncError::MalformedData(format!("bad cursor {}", c)))?,
        };
        let mut s = self
            .state
            .lock()
            .map_err(|_| SyncError::MalformedData("memory api lock poisoned".into()))?;
        s.page_fetches += 1;
        let all = s
            .playlists
            .get(playlist_id)
            .ok_or_else(|| SyncError::transport("Existing tracks lookup", 404))?;
        let end = (offset + self.page_size).min(all.len());
        let uris = all.get(offset..end).map(|u| u.to_vec()).unwrap_or_default();
        let next = if end < all.len() {
            Some(format!("offset:{}", end))
        } else {
            None
        };
        Ok(TracksPage { uris, next })
    }

    async fn add_tracks(&self, token: &BearerToken, playlist_id: &str, uris: &[String]) -> Result<()> {
        self.check(token, "Add tracks")?;
        let mut s = self
            .state
            .lock()
            .map_err(|_| SyncError::MalformedData("memory api lock poisoned".into()))?;
        let call_index = s.add_calls.len();
        s.add_calls.push((playlist_id.to_string(), uris.to_vec()));
        if s.fail_add_call == Some(call_index) {
            return Err(SyncError::transport("Add tracks", 502));
        }
        s.playlists
            .entry(playlist_id.to_string())
            .or_default()
            .extend(uris.iter().cloned());
        info!("MemoryPlaylistApi: add_tracks {} -> {} tracks", playlist_id, uris.len());
        Ok(())
    }
}
