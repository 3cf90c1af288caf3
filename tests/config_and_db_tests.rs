use std::fs::File;
use std::io::Write;
use tempfile::tempdir;

use blend_playlist_sync::config::Config;
use blend_playlist_sync::db::{self, KvStore, SqliteStore, ACCESS_TOKEN_KEY};

#[test]
fn config_from_path_parses_toml() {
    let td = tempdir().unwrap();
    let cfg_path = td.path().join("cfg.toml");
    let mut f = File::create(&cfg_path).unwrap();
    let toml = r#"
db_path = "/tmp/blend-test.db"
log_dir = "/tmp"
max_batch_size = 40
relay_message_timeout_ms = 250
"#;
    f.write_all(toml.as_bytes()).unwrap();
    let cfg = Config::from_path(&cfg_path).expect("parse config");
    assert_eq!(cfg.db_path.to_str().unwrap(), "/tmp/blend-test.db");
    assert_eq!(cfg.batch_size(), 40);
    assert_eq!(cfg.relay_message_timeout().as_millis(), 250);
    // Unset keys keep their defaults.
    assert_eq!(cfg.web_player_url, "https://open.spotify.com/");
    assert_eq!(cfg.existing_tracks_page_size, 50);
    assert_eq!(cfg.blend_page_limit, 100);
}

#[test]
fn batch_size_never_exceeds_the_api_ceiling() {
    let mut cfg = Config::default();
    cfg.max_batch_size = 500;
    assert_eq!(cfg.batch_size(), 100);
    cfg.max_batch_size = 0;
    assert_eq!(cfg.batch_size(), 1);
}

#[test]
fn invalid_toml_is_an_error() {
    let td = tempdir().unwrap();
    let cfg_path = td.path().join("cfg.toml");
    std::fs::write(&cfg_path, "max_batch_size = \"lots\"").unwrap();
    assert!(Config::from_path(&cfg_path).is_err());
}

#[test]
fn run_migrations_creates_kv_table() {
    let td = tempdir().unwrap();
    let db_path = td.path().join("test.db");
    let conn = rusqlite::Connection::open(&db_path).unwrap();
    db::run_migrations(&conn).expect("run migrations");
    // Running twice is harmless.
    db::run_migrations(&conn).expect("run migrations again");
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name='kv'")
        .unwrap();
    let mut rows = stmt.query([]).unwrap();
    assert!(rows.next().unwrap().is_some(), "kv table should exist after migrations");
}

#[test]
fn sqlite_store_round_trips_and_persists() {
    let td = tempdir().unwrap();
    let db_path = td.path().join("nested").join("store.db");
    {
        let store = SqliteStore::open(&db_path).unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
        store.set(ACCESS_TOKEN_KEY, "one").unwrap();
        store.set(ACCESS_TOKEN_KEY, "two").unwrap();
        store.set("other", "x").unwrap();
        store.remove("other").unwrap();
    }
    let reopened = SqliteStore::open(&db_path).unwrap();
    assert_eq!(reopened.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("two"));
    assert_eq!(reopened.get("other").unwrap(), None);
}

#[tokio::test]
async fn async_helpers_use_the_store() {
    let td = tempdir().unwrap();
    let store: std::sync::Arc<dyn KvStore> =
        std::sync::Arc::new(SqliteStore::open(&td.path().join("a.db")).unwrap());
    db::save(&store, "k", "v").await.unwrap();
    assert_eq!(db::load(&store, "k").await.unwrap().as_deref(), Some("v"));
}

#[test]
fn example_config_matches_defaults() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/example-config.toml");
    let cfg = Config::from_path(&path).expect("parse example config");
    let defaults = Config::default();
    assert_eq!(cfg.internal_query_url, defaults.internal_query_url);
    assert_eq!(cfg.scopes, defaults.scopes);
    assert_eq!(cfg.batch_size(), defaults.batch_size());
    assert_eq!(cfg.capture_activation_delay(), defaults.capture_activation_delay());
}
