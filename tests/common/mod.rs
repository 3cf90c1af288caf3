#![allow(dead_code)]

use async_trait::async_trait;
use blend_playlist_sync::api::auth::{AccessTokens, TokenSource};
use blend_playlist_sync::api::mock::MemoryPlaylistApi;
use blend_playlist_sync::api::PlaylistApi;
use blend_playlist_sync::bridge::{capture, relay};
use blend_playlist_sync::config::Config;
use blend_playlist_sync::db::{KvStore, MemoryStore, ACCESS_TOKEN_KEY, CLIENT_ID_KEY};
use blend_playlist_sync::error::AuthError;
use blend_playlist_sync::models::BearerToken;
use blend_playlist_sync::page::{BrowserTabs, FetchRequest, FetchResponse, Page, PageFetch, TabHost};
use blend_playlist_sync::sync::SyncOrchestrator;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const QUERY_URL: &str = "https://api-partner.spotify.com/pathfinder/v2/query";
pub const WEB_PLAYER: &str = "https://open.spotify.com/";
pub const INTERNAL_AUTH: &str = "Bearer internal-web-player-token";
pub const PLAYLIST_HASH: &str = "abc123hash";
pub const DEST_TOKEN: &str = "dest-token";

pub fn test_config() -> Config {
    Config {
        capture_activation_delay_ms: 0,
        relay_settle_delay_ms: 20,
        relay_message_timeout_ms: 1_000,
        relayed_call_timeout_ms: 2_000,
        ..Config::default()
    }
}

/// Network layer of a fake web player session. Answers internal query calls
/// with `payload` (or `status` when it is not 200) and everything else with `{}`.
pub struct FakeSession {
    pub payload: Mutex<Value>,
    pub status: Mutex<u16>,
    pub calls: Mutex<Vec<FetchRequest>>,
}

impl FakeSession {
    pub fn new(payload: Value) -> Arc<Self> {
        Arc::new(Self {
            payload: Mutex::new(payload),
            status: Mutex::new(200),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn set_status(&self, status: u16) {
        *self.status.lock().unwrap() = status;
    }

    pub fn calls(&self) -> Vec<FetchRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetch for FakeSession {
    async fn fetch(&self, request: FetchRequest) -> anyhow::Result<FetchResponse> {
        let is_query = request.url.starts_with(QUERY_URL);
        self.calls.lock().unwrap().push(request);
        if !is_query {
            return Ok(FetchResponse::new(200, "{}"));
        }
        let status = *self.status.lock().unwrap();
        if status != 200 {
            return Ok(FetchResponse::new(status, "error"));
        }
        Ok(FetchResponse::new(200, self.payload.lock().unwrap().to_string()))
    }
}

/// The web player's own call that reveals the credential and the hash.
pub fn web_player_query(auth: &str, operation: &str, hash: &str) -> FetchRequest {
    FetchRequest::post(QUERY_URL)
        .header("Authorization", auth)
        .header("content-type", "application/json")
        .body(
            json!({
                "operationName": operation,
                "variables": { "uri": "spotify:playlist:browsing" },
                "extensions": { "persistedQuery": { "version": 1, "sha256Hash": hash } }
            })
            .to_string(),
        )
}

pub fn attributed(users: &[(&str, &str)]) -> String {
    let list: Vec<Value> = users
        .iter()
        .map(|(name, desc)| json!({ "display_name": name, "description": desc }))
        .collect();
    json!({ "attributed_users": list }).to_string()
}

pub fn blend_item(uri: &str, users: &[(&str, &str)]) -> Value {
    json!({
        "itemV2": { "data": { "uri": uri } },
        "attributes": [
            { "key": "addedBy", "value": "x" },
            { "key": "multiUserAttributionMetadata", "value": attributed(users) }
        ]
    })
}

pub fn blend_payload(items: Vec<Value>) -> Value {
    json!({ "data": { "playlistV2": { "content": { "items": items } } } })
}

/// Hands out a fixed token and counts how often it was asked.
pub struct FakeTokenSource {
    pub token: String,
    pub calls: AtomicUsize,
}

impl FakeTokenSource {
    pub fn new(token: &str) -> Arc<Self> {
        Arc::new(Self {
            token: token.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for FakeTokenSource {
    async fn obtain_token(
        &self,
        _client_id: &str,
        _scopes: &[String],
        interactive: bool,
    ) -> Result<BearerToken, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !interactive {
            return Err(AuthError::Cancelled);
        }
        Ok(BearerToken::new(self.token.clone()))
    }
}

pub struct Harness {
    pub cfg: Arc<Config>,
    pub tabs: Arc<BrowserTabs>,
    pub page: Arc<Page>,
    pub session: Arc<FakeSession>,
    pub api: Arc<MemoryPlaylistApi>,
    pub store: Arc<dyn KvStore>,
    pub source: Arc<FakeTokenSource>,
    pub tokens: Arc<AccessTokens>,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl Harness {
    /// A logged-in destination account and an active web player tab whose
    /// blend fetch answers `payload`. Nothing is captured yet.
    pub fn new(payload: Value) -> Self {
        let cfg = Arc::new(test_config());
        let session = FakeSession::new(payload);
        let page = Page::new(format!("{}playlist/blend", WEB_PLAYER), session.clone());
        let tabs = Arc::new(BrowserTabs::new());
        tabs.open(page.clone());
        tabs.activate(page.id());

        let api = Arc::new(MemoryPlaylistApi::new(cfg.existing_tracks_page_size as usize));
        api.accept_token(DEST_TOKEN);
        api.set_tracks("target", Vec::<String>::new());

        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        store.set(CLIENT_ID_KEY, "client-id").unwrap();
        store.set(ACCESS_TOKEN_KEY, DEST_TOKEN).unwrap();

        let source = FakeTokenSource::new(DEST_TOKEN);
        let api_dyn: Arc<dyn PlaylistApi> = api.clone();
        let tokens = Arc::new(AccessTokens::new(
            store.clone(),
            source.clone(),
            api_dyn.clone(),
            cfg.scopes.clone(),
        ));
        let tabs_dyn: Arc<dyn TabHost> = tabs.clone();
        let orchestrator = Arc::new(SyncOrchestrator::new(
            cfg.clone(),
            tabs_dyn,
            api_dyn,
            tokens.clone(),
        ));
        Self {
            cfg,
            tabs,
            page,
            session,
            api,
            store,
            source,
            tokens,
            orchestrator,
        }
    }

    /// Inject the bridges and let the page make the calls the capture bridge
    /// is waiting for.
    pub async fn browse(&self) {
        relay::ensure_presence(&self.page, &self.cfg).await.unwrap();
        assert!(capture::wait_until_active(&self.page, Duration::from_secs(1)).await);
        self.page
            .fetch(web_player_query(INTERNAL_AUTH, "fetchPlaylist", PLAYLIST_HASH))
            .await
            .unwrap();
    }
}
