//! The sync pipeline: capture-bridge credentials in, playlist delta out.

use crate::api::auth::AccessTokens;
use crate::api::pathfinder;
use crate::api::PlaylistApi;
use crate::bridge::relay;
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::models::{BearerToken, SyncOutcome, SyncRequest, TrackUriSet};
use crate::page::TabHost;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Per-destination-playlist single-flight guard.
#[derive(Clone, Default)]
pub struct PlaylistLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl PlaylistLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `playlist_id`, or fail if another run holds it.
    pub fn try_acquire(&self, playlist_id: &str) -> Result<PlaylistLockGuard> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| SyncError::AlreadyRunning(playlist_id.to_string()))?;
        if !held.insert(playlist_id.to_string()) {
            return Err(SyncError::AlreadyRunning(playlist_id.to_string()));
        }
        Ok(PlaylistLockGuard {
            held: self.held.clone(),
            playlist_id: playlist_id.to_string(),
        })
    }

    pub fn is_held(&self, playlist_id: &str) -> bool {
        self.held
            .lock()
            .map(|h| h.contains(playlist_id))
            .unwrap_or(false)
    }
}

/// Releases its playlist when dropped.
pub struct PlaylistLockGuard {
    held: Arc<Mutex<HashSet<String>>>,
    playlist_id: String,
}

impl Drop for PlaylistLockGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.playlist_id);
        }
    }
}

pub struct SyncOrchestrator {
    cfg: Arc<Config>,
    tabs: Arc<dyn TabHost>,
    api: Arc<dyn PlaylistApi>,
    tokens: Arc<AccessTokens>,
    locks: PlaylistLocks,
}

impl SyncOrchestrator {
    pub fn new(
        cfg: Arc<Config>,
        tabs: Arc<dyn TabHost>,
        api: Arc<dyn PlaylistApi>,
        tokens: Arc<AccessTokens>,
    ) -> Self {
        Self {
            cfg,
            tabs,
            api,
            tokens,
            locks: PlaylistLocks::new(),
        }
    }

    pub fn locks(&self) -> &PlaylistLocks {
        &self.locks
    }

    /// Run one sync and turn whatever happened into a terminal outcome.
    pub async fn sync(&self, request: &SyncRequest) -> SyncOutcome {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("sync", %run_id, playlist = %request.target_playlist_id);
        match self.try_sync(request).instrument(span).await {
            Ok(count) => {
                info!(%run_id, "Sync complete: added {} track(s)", count);
                SyncOutcome::Added { count }
            }
            Err(e) => {
                error!(%run_id, "Sync failed: {}", e);
                SyncOutcome::Failed {
                    reason: e.to_string(),
                    capture_unavailable: e.is_capture_unavailable(),
                }
            }
        }
    }

    /// The pipeline proper; the first failing step aborts the rest.
    pub async fn try_sync(&self, request: &SyncRequest) -> Result<usize> {
        let _guard = self.locks.try_acquire(&request.target_playlist_id)?;

        let page = self
            .tabs
            .find_active(&self.cfg.web_player_url)
            .await
            .ok_or(SyncError::NoActiveTab)?;
        let relay = relay::ensure_presence(&page, &self.cfg).await?;

        let token = self.tokens.valid_token().await?;

        let credential = relay.latest_credential().await?;
        let hash = relay
            .operation_identifier(&self.cfg.fetch_playlist_operation)
            .await?;

        let query = pathfinder::fetch_playlist_request(
            &self.cfg.internal_query_url,
            &self.cfg.fetch_playlist_operation,
            &request.blend_playlist_id,
            self.cfg.blend_page_limit,
            &credential,
            &hash,
        );
        let payload = relay.relayed_call(query).await?;
        let items = pathfinder::parse_playlist_items(&payload)?;
        let selected = pathfinder::select_listened(&items, &request.collaborator);
        info!(
            "{} of {} blend item(s) were listened to by {}",
            selected.len(),
            items.len(),
            request.collaborator
        );

        let existing = self
            .existing_tracks(&token, &request.target_playlist_id)
            .await?;
        let delta = selected.difference(&existing);
        if delta.is_empty() {
            info!("Destination already contains every selected track");
            return Ok(0);
        }
        self.apply_in_batches(&token, &request.target_playlist_id, &delta)
            .await
    }

    /// Every track URI currently in `playlist_id`, following the page cursor
    /// until it runs out.
    pub async fn existing_tracks(
        &self,
        token: &BearerToken,
        playlist_id: &str,
    ) -> Result<TrackUriSet> {
        collect_existing_tracks(self.api.as_ref(), token, playlist_id).await
    }

    /// Add `uris` in order, at most one batch per call, stopping at the first
    /// failed batch. Batches already applied stay applied.
    pub async fn apply_in_batches(
        &self,
        token: &BearerToken,
        playlist_id: &str,
        uris: &[String],
    ) -> Result<usize> {
        apply_in_batches(self.api.as_ref(), token, playlist_id, uris, self.cfg.batch_size()).await
    }
}

pub async fn collect_existing_tracks(
    api: &dyn PlaylistApi,
    token: &BearerToken,
    playlist_id: &str,
) -> Result<TrackUriSet> {
    let mut tracks = TrackUriSet::new();
    let mut seen_cursors: HashSet<String> = HashSet::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;
    loop {
        let page = api
            .playlist_tracks_page(token, playlist_id, cursor.as_deref())
            .await?;
        pages += 1;
        tracks.extend(page.uris);
        match page.next {
            Some(next) => {
                if !seen_cursors.insert(next.clone()) {
                    return Err(SyncError::MalformedData(format!(
                        "playlist {} paging cursor repeats: {}",
                        playlist_id, next
                    )));
                }
                cursor = Some(next);
            }
            None => break,
        }
    }
    debug!(
        "read {} existing track(s) of {} in {} page(s)",
        tracks.len(),
        playlist_id,
        pages
    );
    Ok(tracks)
}

pub async fn apply_in_batches(
    api: &dyn PlaylistApi,
    token: &BearerToken,
    playlist_id: &str,
    uris: &[String],
    batch_size: usize,
) -> Result<usize> {
    let mut applied = 0usize;
    for chunk in uris.chunks(batch_size.max(1)) {
        if let Err(e) = api.add_tracks(token, playlist_id, chunk).await {
            if applied == 0 {
                return Err(e);
            }
            warn!(
                "Batch failed after {} of {} track(s) were added to {}",
                applied,
                uris.len(),
                playlist_id
            );
            return Err(SyncError::PartialApply {
                applied,
                total: uris.len(),
                source: Box::new(e),
            });
        }
        applied += chunk.len();
        info!("Applied add of {} tracks to {}", chunk.len(), playlist_id);
    }
    Ok(applied)
}
