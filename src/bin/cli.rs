use anyhow::{anyhow, Context, Result};
use blend_playlist_sync as lib;
use clap::{Parser, Subcommand};
use lib::api::auth::{AccessTokens, ImplicitGrantFlow};
use lib::api::spotify::SpotifyWebApi;
use lib::api::PlaylistApi;
use lib::app::{Command, Controller, Notification, SyncForm};
use lib::bridge::{capture, relay};
use lib::config::Config;
use lib::db::{KvStore, SqliteStore};
use lib::page::har::{self, HarRecording};
use lib::page::http::HttpFetch;
use lib::page::{BrowserTabs, Page, PageFetch, TabHost};
use lib::sync::SyncOrchestrator;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "blend-sync", version)]
struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the Spotify application Client ID
    Configure {
        #[arg(long)]
        client_id: String,
    },
    /// Authorize the destination account (interactive)
    Login,
    /// Show configuration and login state
    Status,
    /// Add the songs a friend listened to in a Blend to one of your playlists
    Sync {
        /// Blend playlist URL (open.spotify.com/playlist/...)
        #[arg(long)]
        blend: Option<String>,
        /// The friend's display name as shown in the Blend
        #[arg(long)]
        friend: Option<String>,
        /// Destination playlist URL
        #[arg(long)]
        target: Option<String>,
        /// Recorded web player session to replay through the page
        #[arg(long, value_name = "FILE")]
        har: Option<PathBuf>,
        /// Extra header sent with every page call, as NAME=VALUE
        #[arg(long = "session-header", value_name = "NAME=VALUE")]
        session_headers: Vec<String>,
    },
    /// Validate config file and exit
    ConfigValidate,
}

fn resolve_config(explicit: Option<&PathBuf>) -> Result<Config> {
    // Explicit --config must exist; the per-user default is optional.
    if let Some(p) = explicit {
        return Config::from_path(p).with_context(|| format!("loading config from {}", p.display()));
    }
    match Config::default_path().filter(|p| p.exists()) {
        Some(p) => Config::from_path(&p).with_context(|| format!("loading config from {}", p.display())),
        None => Ok(Config::default()),
    }
}

fn parse_session_headers(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|h| {
            h.split_once('=')
                .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| anyhow!("session header {:?} is not NAME=VALUE", h))
        })
        .collect()
}

struct Runtime {
    controller: Controller,
    notifications: mpsc::UnboundedReceiver<Notification>,
}

fn build(cfg: Arc<Config>, tabs: Arc<dyn TabHost>) -> Result<Runtime> {
    let store: Arc<dyn KvStore> = Arc::new(
        SqliteStore::open(&cfg.db_path)
            .with_context(|| format!("opening database {}", cfg.db_path.display()))?,
    );
    let api: Arc<dyn PlaylistApi> =
        Arc::new(SpotifyWebApi::new(cfg.api_base(), cfg.existing_tracks_page_size));
    let flow = Arc::new(ImplicitGrantFlow::new(cfg.auth_base(), cfg.redirect_uri.clone()));
    let tokens = Arc::new(AccessTokens::new(store.clone(), flow, api.clone(), cfg.scopes.clone()));
    let orchestrator = Arc::new(SyncOrchestrator::new(cfg, tabs, api, tokens.clone()));
    let (tx, rx) = mpsc::unbounded_channel();
    Ok(Runtime {
        controller: Controller::new(store, tokens, orchestrator, tx),
        notifications: rx,
    })
}

fn print_notification(notification: &Notification) -> bool {
    match notification {
        Notification::AuthSucceeded { display_name } => {
            println!("Logged in as {}", display_name);
            true
        }
        Notification::SyncCompleted { outcome } => {
            println!("{}", outcome.status_message());
            outcome.is_success()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::ConfigValidate = cli.command {
        match resolve_config(cli.config.as_ref()) {
            Ok(_) => println!("OK"),
            Err(e) => {
                eprintln!("Config validation failed: {:#}", e);
                std::process::exit(2);
            }
        }
        return Ok(());
    }

    let cfg = Arc::new(resolve_config(cli.config.as_ref())?);
    let _guard = lib::logging::init_logging(&cfg)?;

    let tabs = Arc::new(BrowserTabs::new());
    let Runtime {
        controller,
        mut notifications,
    } = build(cfg.clone(), tabs.clone())?;

    match cli.command {
        Commands::ConfigValidate => {}
        Commands::Configure { client_id } => {
            controller
                .dispatch(Command::SaveConfiguration { client_id })
                .await?;
            println!("Client ID saved.");
        }
        Commands::Login => {
            controller.dispatch(Command::BeginLogin).await?;
            match notifications.try_recv() {
                Ok(n) => {
                    print_notification(&n);
                }
                Err(_) => {
                    eprintln!("Login did not complete. See the log for details.");
                    std::process::exit(1);
                }
            }
        }
        Commands::Status => {
            if !controller.is_configured().await? {
                println!("Client ID: not configured");
            } else {
                println!("Client ID: configured");
            }
            match controller.check_auth().await {
                Some(name) => println!("Logged in as {}", name),
                None => println!("Not logged in."),
            }
            let form = controller.saved_form().await?;
            if form != SyncForm::default() {
                println!(
                    "Last sync: blend={} friend={} target={}",
                    form.blend_url, form.friend_username, form.target_url
                );
            }
        }
        Commands::Sync {
            blend,
            friend,
            target,
            har,
            session_headers,
        } => {
            // Unspecified fields fall back to the last submitted form.
            let saved = controller.saved_form().await?;
            let form = SyncForm {
                blend_url: blend.unwrap_or(saved.blend_url),
                friend_username: friend.unwrap_or(saved.friend_username),
                target_url: target.unwrap_or(saved.target_url),
            };

            let headers = parse_session_headers(&session_headers)?;
            let session: Arc<dyn PageFetch> = Arc::new(HttpFetch::with_session_headers(
                headers.iter().map(|(n, v)| (n.as_str(), v.as_str())),
            )?);
            let page = Page::new(cfg.web_player_url.clone(), session);
            tabs.open(page.clone());
            tabs.activate(page.id());

            relay::ensure_presence(&page, &cfg).await?;
            let wait = cfg.capture_activation_delay() + Duration::from_secs(1);
            if !capture::wait_until_active(&page, wait).await {
                warn!("Capture bridge did not activate within {} ms", wait.as_millis());
            }
            if let Some(path) = har {
                let recording = HarRecording::from_path(&path)?;
                let requests = recording.addressed_to(&cfg.internal_query_url);
                info!("Replaying {} recorded request(s) from {}", requests.len(), path.display());
                har::replay(&page, requests).await;
            }

            if let Err(e) = controller.dispatch(Command::BeginSync(form)).await {
                eprintln!("Error: {}", e.user_message());
                std::process::exit(1);
            }
            let ok = match notifications.try_recv() {
                Ok(n) => print_notification(&n),
                Err(_) => false,
            };
            if !ok {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
