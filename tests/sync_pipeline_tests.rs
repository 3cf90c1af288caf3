mod common;

use blend_playlist_sync::db::{KvStore, ACCESS_TOKEN_KEY};
use blend_playlist_sync::error::CAPTURE_HINT;
use blend_playlist_sync::models::{SyncOutcome, SyncRequest};
use common::*;
use serde_json::{json, Value};

const ALEX_LISTENED: (&str, &str) = ("Alex", "Listened to this song");

fn request() -> SyncRequest {
    SyncRequest {
        blend_playlist_id: "blend123".into(),
        collaborator: "Alex".into(),
        target_playlist_id: "target".into(),
    }
}

fn alex_tracks(n: usize) -> (Vec<String>, Value) {
    let uris: Vec<String> = (0..n).map(|i| format!("spotify:track:t{:03}", i)).collect();
    let items = uris.iter().map(|u| blend_item(u, &[ALEX_LISTENED])).collect();
    (uris, blend_payload(items))
}

fn failure_reason(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Failed { reason, .. } => reason.clone(),
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn adds_only_songs_the_friend_listened_to_and_are_missing() {
    let payload = blend_payload(vec![
        blend_item("spotify:track:A", &[ALEX_LISTENED]),
        blend_item("spotify:track:B", &[("Alex", "Added this song")]),
        blend_item("spotify:track:C", &[("Sam", "Listened to this song")]),
        blend_item("spotify:track:D", &[ALEX_LISTENED, ("Sam", "Listened to this song")]),
    ]);
    let h = Harness::new(payload);
    h.api.set_tracks("target", vec!["spotify:track:D"]);
    h.browse().await;

    let outcome = h.orchestrator.sync(&request()).await;
    assert_eq!(outcome, SyncOutcome::Added { count: 1 });
    assert_eq!(outcome.status_message(), "Success! Added 1 new song(s).");

    let calls = h.api.add_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "target");
    assert_eq!(calls[0].1, vec!["spotify:track:A".to_string()]);
    assert_eq!(
        h.api.tracks("target"),
        vec!["spotify:track:D".to_string(), "spotify:track:A".to_string()]
    );
}

#[tokio::test]
async fn second_run_adds_nothing() {
    let (_, payload) = alex_tracks(3);
    let h = Harness::new(payload);
    h.browse().await;

    assert_eq!(h.orchestrator.sync(&request()).await, SyncOutcome::Added { count: 3 });
    assert_eq!(h.orchestrator.sync(&request()).await, SyncOutcome::Added { count: 0 });
    assert_eq!(h.api.add_calls().len(), 1);
}

#[tokio::test]
async fn large_delta_is_added_in_ordered_batches() {
    let (uris, payload) = alex_tracks(250);
    let h = Harness::new(payload);
    h.browse().await;

    let outcome = h.orchestrator.sync(&request()).await;
    assert_eq!(outcome.added_count(), Some(250));

    let sizes: Vec<usize> = h.api.add_calls().iter().map(|(_, b)| b.len()).collect();
    assert_eq!(sizes, vec![100, 100, 50]);
    assert_eq!(h.api.tracks("target"), uris);
}

#[tokio::test]
async fn relayed_fetch_carries_captured_credential_and_hash() {
    let (_, payload) = alex_tracks(1);
    let h = Harness::new(payload);
    h.browse().await;
    h.orchestrator.sync(&request()).await;

    let calls = h.session.calls();
    let relayed = calls.last().unwrap();
    assert_eq!(relayed.method, "POST");
    assert_eq!(relayed.url, QUERY_URL);
    assert_eq!(relayed.header_value("authorization"), Some(INTERNAL_AUTH));
    assert_eq!(relayed.header_value("app-platform"), Some("WebPlayer"));
    let body: Value = serde_json::from_str(relayed.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["operationName"], "fetchPlaylist");
    assert_eq!(body["variables"]["uri"], "spotify:playlist:blend123");
    assert_eq!(body["variables"]["offset"], 0);
    assert_eq!(body["variables"]["limit"], 100);
    assert_eq!(body["extensions"]["persistedQuery"]["sha256Hash"], PLAYLIST_HASH);
}

#[tokio::test]
async fn nothing_captured_reports_capture_unavailable() {
    let (_, payload) = alex_tracks(2);
    let h = Harness::new(payload);

    let outcome = h.orchestrator.sync(&request()).await;
    match &outcome {
        SyncOutcome::Failed {
            reason,
            capture_unavailable,
        } => {
            assert!(*capture_unavailable);
            assert_eq!(reason, "Internal token not captured. Please click around Spotify.");
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(outcome.status_message(), format!("Error: {}", CAPTURE_HINT));
    assert!(h.api.add_calls().is_empty());
}

#[tokio::test]
async fn missing_playlist_hash_reports_capture_unavailable() {
    let (_, payload) = alex_tracks(2);
    let h = Harness::new(payload);
    blend_playlist_sync::bridge::relay::ensure_presence(&h.page, &h.cfg)
        .await
        .unwrap();
    assert!(
        blend_playlist_sync::bridge::capture::wait_until_active(
            &h.page,
            std::time::Duration::from_secs(1)
        )
        .await
    );
    h.page
        .fetch(web_player_query(INTERNAL_AUTH, "profileAttributes", "otherhash"))
        .await
        .unwrap();

    let outcome = h.orchestrator.sync(&request()).await;
    assert_eq!(
        outcome,
        SyncOutcome::Failed {
            reason: "Playlist hash not captured. Please click on any playlist.".into(),
            capture_unavailable: true,
        }
    );
}

#[tokio::test]
async fn no_active_tab_fails_without_touching_the_api() {
    let (_, payload) = alex_tracks(1);
    let h = Harness::new(payload);
    h.tabs.close(h.page.id());

    let outcome = h.orchestrator.sync(&request()).await;
    assert_eq!(
        outcome,
        SyncOutcome::Failed {
            reason: "No active Spotify tab found.".into(),
            capture_unavailable: false,
        }
    );
    assert_eq!(h.api.probes(), 0);
}

#[tokio::test]
async fn overlapping_runs_into_the_same_playlist_are_rejected() {
    let (_, payload) = alex_tracks(1);
    let h = Harness::new(payload);
    h.browse().await;

    let guard = h.orchestrator.locks().try_acquire("target").unwrap();
    let outcome = h.orchestrator.sync(&request()).await;
    assert!(failure_reason(&outcome).contains("already running"));
    assert!(h.api.add_calls().is_empty());

    drop(guard);
    assert!(!h.orchestrator.locks().is_held("target"));
    assert_eq!(h.orchestrator.sync(&request()).await.added_count(), Some(1));
    assert!(!h.orchestrator.locks().is_held("target"));
}

#[tokio::test]
async fn failed_batch_reports_how_much_was_applied() {
    let (uris, payload) = alex_tracks(250);
    let h = Harness::new(payload);
    h.api.fail_add_call(1);
    h.browse().await;

    let outcome = h.orchestrator.sync(&request()).await;
    let reason = failure_reason(&outcome);
    assert!(reason.contains("Add tracks failed: HTTP 502"), "{}", reason);
    assert!(reason.contains("100 of 250"), "{}", reason);
    // The first batch stays; later batches are never attempted.
    assert_eq!(h.api.tracks("target"), uris[..100].to_vec());
    assert_eq!(h.api.add_calls().len(), 2);
}

#[tokio::test]
async fn expired_token_triggers_one_reauthorization() {
    let (_, payload) = alex_tracks(2);
    let h = Harness::new(payload);
    h.store.set(ACCESS_TOKEN_KEY, "stale-token").unwrap();
    h.browse().await;

    let outcome = h.orchestrator.sync(&request()).await;
    assert_eq!(outcome.added_count(), Some(2));
    assert_eq!(h.source.calls(), 1);
    assert_eq!(h.store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some(DEST_TOKEN));
}

#[tokio::test]
async fn missing_token_means_not_logged_in() {
    let (_, payload) = alex_tracks(2);
    let h = Harness::new(payload);
    h.store.remove(ACCESS_TOKEN_KEY).unwrap();
    h.browse().await;

    let outcome = h.orchestrator.sync(&request()).await;
    assert_eq!(failure_reason(&outcome), "Not logged in.");
    assert_eq!(h.source.calls(), 0);
}

#[tokio::test]
async fn relayed_http_error_aborts_the_run() {
    let (_, payload) = alex_tracks(2);
    let h = Harness::new(payload);
    h.browse().await;
    h.session.set_status(500);

    let outcome = h.orchestrator.sync(&request()).await;
    assert_eq!(failure_reason(&outcome), "Proxy fetch failed: HTTP 500");
    assert!(h.api.add_calls().is_empty());
}

#[tokio::test]
async fn payload_without_items_is_malformed() {
    let h = Harness::new(json!({ "data": { "playlistV2": {} } }));
    h.browse().await;

    let outcome = h.orchestrator.sync(&request()).await;
    assert!(failure_reason(&outcome).starts_with("Malformed data"));
}

#[tokio::test]
async fn existing_tracks_follow_every_page() {
    let (_, payload) = alex_tracks(1);
    let h = Harness::new(payload);
    let existing: Vec<String> = (0..125).map(|i| format!("spotify:track:old{}", i)).collect();
    h.api.set_tracks("target", existing);
    let token = blend_playlist_sync::models::BearerToken::new(DEST_TOKEN);

    let set = h.orchestrator.existing_tracks(&token, "target").await.unwrap();
    assert_eq!(set.len(), 125);
    assert_eq!(h.api.page_fetches(), 3);
}

#[tokio::test]
async fn navigation_drops_the_captured_state() {
    let (_, payload) = alex_tracks(1);
    let h = Harness::new(payload);
    h.browse().await;
    h.page.navigate(format!("{}playlist/blend", WEB_PLAYER));

    let outcome = h.orchestrator.sync(&request()).await;
    match outcome {
        SyncOutcome::Failed {
            capture_unavailable, ..
        } => assert!(capture_unavailable),
        other => panic!("expected failure, got {:?}", other),
    }
}
