use super::{PlaylistApi, TracksPage};
use crate::error::{Result, SyncError};
use crate::models::{BearerToken, UserProfile};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde_json::json;

/// Spotify Web API client for the destination account.
/// The token is supplied per call; this type holds no credentials.
pub struct SpotifyWebApi {
    client: Client,
    api_base: String,
    page_size: u32,
}

impl SpotifyWebApi {
    pub fn new(api_base: impl Into<String>, page_size: u32) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            page_size: page_size.max(1),
        }
    }

    fn first_tracks_url(&self, playlist_id: &str) -> String {
        format!(
            "{}/playlists/{}/tracks?fields=items(track(uri)),next&limit={}",
            self.api_base,
            urlencoding::encode(playlist_id),
            self.page_size
        )
    }
}

#[async_trait]
impl PlaylistApi for SpotifyWebApi {
    fn name(&self) -> &str {
        "spotify"
    }

    async fn current_user(&self, token: &BearerToken) -> Result<UserProfile> {
        let url = format!("{}/me", self.api_base);
        let resp = self
            .client
            .get(&url)
            .header(AUTHORIZATION, token.header_value())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| SyncError::network("Profile lookup", e))?;
        let status = resp.status();
        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                debug!("GET /me answered 401");
            }
            return Err(SyncError::transport("Profile lookup", status.as_u16()));
        }
        let j: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SyncError::MalformedData(format!("profile response: {}", e)))?;
        let id = j["id"]
            .as_str()
            .ok_or_else(|| SyncError::MalformedData("profile response has no id".into()))?
            .to_string();
        Ok(UserProfile {
            id,
            display_name: j["display_name"].as_str().map(|s| s.to_string()),
        })
    }

    async fn playlist_tracks_page(
        &self,
        token: &BearerToken,
        playlist_id: &str,
        cursor: Option<&str>,
    ) -> Result<TracksPage> {
        let url = match cursor {
            Some(c) => c.to_string(),
            None => self.first_tracks_url(playlist_id),
        };
        let resp = self
            .client
            .get(&url)
            .header(AUTHORIZATION, token.header_value())
            .send()
            .await
            .map_err(|e| SyncError::network("Existing tracks lookup", e))?;
        let status = resp.status();
        if !status.is_success() {
            let txt = resp.text().await.unwrap_or_default();
            warn!("list playlist tracks failed: {} => {}", status, txt);
            return Err(SyncError::transport(
                "Existing tracks lookup",
                status.as_u16(),
            ));
        }
        let j: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SyncError::MalformedData(format!("playlist tracks response: {}", e)))?;
        let items = j["items"].as_array().ok_or_else(|| {
            SyncError::MalformedData("playlist tracks response has no items".into())
        })?;
        let uris = items
            .iter()
            .filter_map(|it| it["track"]["uri"].as_str())
            .map(|s| s.to_string())
            .collect();
        let next = j["next"].as_str().map(|s| s.to_string());
        Ok(TracksPage { uris, next })
    }

    async fn add_tracks(&self, token: &BearerToken, playlist_id: &str, uris: &[String]) -> Result<()> {
        let url = format!(
            "{}/playlists/{}/tracks",
            self.api_base,
            urlencoding::encode(playlist_id)
        );
        let body = json!({ "uris": uris });
        let resp = self
            .client
            .post(&url)
            .header(AUTHORIZATION, token.header_value())
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::network("Add tracks", e))?;
        let status = resp.status();
        if !status.is_success() {
            let txt = resp.text().await.unwrap_or_default();
            warn!("add tracks failed: {} => {}", status, txt);
            return Err(SyncError::transport("Add tracks", status.as_u16()));
        }
        debug!("added {} tracks to {}", uris.len(), playlist_id);
        Ok(())
    }
}
