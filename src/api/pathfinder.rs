//! The web player's internal `fetchPlaylist` query: request shape, payload
//! parsing and the collaborator filter.

use crate::error::{Result, SyncError};
use crate::models::{Attribution, Credential, OperationIdentifier, PlaylistItem, TrackUriSet};
use crate::page::FetchRequest;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

/// Interaction description marking a song the collaborator listened to.
pub const LISTENED_DESCRIPTION: &str = "Listened to this song";

const ATTRIBUTION_KEY: &str = "multiUserAttributionMetadata";

#[derive(Deserialize)]
struct AttributionMetadata {
    #[serde(default)]
    attributed_users: Vec<AttributedUser>,
}

#[derive(Deserialize)]
struct AttributedUser {
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    description: String,
}

/// Build the relayed request for one page of a blend playlist.
pub fn fetch_playlist_request(
    query_url: &str,
    operation: &str,
    playlist_id: &str,
    limit: u32,
    credential: &Credential,
    hash: &OperationIdentifier,
) -> FetchRequest {
    let body = json!({
        "operationName": operation,
        "variables": {
            "uri": format!("spotify:playlist:{}", playlist_id),
            "offset": 0,
            "limit": limit,
            "enableWatchFeedEntrypoint": true
        },
        "extensions": {
            "persistedQuery": { "version": 1, "sha256Hash": hash.as_str() }
        }
    });
    FetchRequest::post(query_url)
        .header("accept", "application/json")
        .header("app-platform", "WebPlayer")
        .header("authorization", credential.as_str())
        .header("content-type", "application/json;charset=UTF-8")
        .body(body.to_string())
}

/// Items of a `fetchPlaylist` payload.
///
/// A payload without `data.playlistV2.content.items` is rejected as a whole.
/// Items whose attribution metadata cannot be parsed are logged and dropped.
pub fn parse_playlist_items(payload: &Value) -> Result<Vec<PlaylistItem>> {
    let items = payload
        .pointer("/data/playlistV2/content/items")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            SyncError::MalformedData("playlist payload has no data.playlistV2.content.items".into())
        })?;
    Ok(items.iter().filter_map(parse_item).collect())
}

fn parse_item(item: &Value) -> Option<PlaylistItem> {
    let uri = item
        .pointer("/itemV2/data/uri")
        .and_then(Value::as_str)
        .map(String::from);
    let raw = item
        .get("attributes")
        .and_then(Value::as_array)
        .and_then(|attrs| {
            attrs
                .iter()
                .find(|a| a.get("key").and_then(Value::as_str) == Some(ATTRIBUTION_KEY))
        })
        .and_then(|a| a.get("value"))
        .and_then(Value::as_str);
    let raw = match raw {
        Some(r) => r,
        None => {
            return Some(PlaylistItem {
                uri,
                attributions: Vec::new(),
            })
        }
    };
    match serde_json::from_str::<AttributionMetadata>(raw) {
        Ok(meta) => Some(PlaylistItem {
            uri,
            attributions: meta
                .attributed_users
                .into_iter()
                .map(|u| Attribution {
                    display_name: u.display_name,
                    description: u.description,
                })
                .collect(),
        }),
        Err(e) => {
            warn!("Could not parse {} {:?}: {}", ATTRIBUTION_KEY, raw, e);
            None
        }
    }
}

/// True when `collaborator` is credited with having listened to the item.
pub fn listened_by(item: &PlaylistItem, collaborator: &str) -> bool {
    item.attributions
        .iter()
        .any(|a| a.display_name == collaborator && a.description == LISTENED_DESCRIPTION)
}

/// URIs of the items `collaborator` listened to, duplicates collapsed.
pub fn select_listened(items: &[PlaylistItem], collaborator: &str) -> TrackUriSet {
    items
        .iter()
        .filter(|item| listened_by(item, collaborator))
        .filter_map(|item| item.uri.clone())
        .collect()
}
