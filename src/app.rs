//! Presentation boundary: user-triggered commands in, notifications out.

use crate::api::auth::AccessTokens;
use crate::db::{
    self, KvStore, CLIENT_ID_KEY, SAVED_BLEND_URL_KEY, SAVED_FRIEND_USERNAME_KEY,
    SAVED_TARGET_URL_KEY,
};
use crate::error::{Result, SyncError};
use crate::models::{SyncOutcome, SyncRequest};
use crate::sync::SyncOrchestrator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use url::Url;

/// What the user typed into the sync form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncForm {
    pub blend_url: String,
    pub friend_username: String,
    pub target_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    BeginLogin,
    BeginSync(SyncForm),
    SaveConfiguration { client_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Notification {
    AuthSucceeded { display_name: String },
    SyncCompleted { outcome: SyncOutcome },
}

/// Playlist id from an `open.spotify.com/playlist/<id>` URL.
pub fn playlist_id_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let id = parsed.path().split("/playlist/").nth(1)?;
    let id = id.trim_end_matches('/');
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id.to_string())
}

impl SyncForm {
    /// Validate the form into the identifiers a sync run needs.
    pub fn to_request(&self) -> Result<SyncRequest> {
        let blend = self.blend_url.trim();
        let friend = self.friend_username.trim();
        let target = self.target_url.trim();
        if blend.is_empty() || friend.is_empty() || target.is_empty() {
            return Err(SyncError::InvalidInput("Please fill in all fields.".into()));
        }
        match (playlist_id_from_url(blend), playlist_id_from_url(target)) {
            (Some(blend_playlist_id), Some(target_playlist_id)) => Ok(SyncRequest {
                blend_playlist_id,
                collaborator: friend.to_string(),
                target_playlist_id,
            }),
            _ => Err(SyncError::InvalidInput("Invalid playlist URL(s).".into())),
        }
    }
}

pub struct Controller {
    store: Arc<dyn KvStore>,
    tokens: Arc<AccessTokens>,
    orchestrator: Arc<SyncOrchestrator>,
    notifications: mpsc::UnboundedSender<Notification>,
}

impl Controller {
    pub fn new(
        store: Arc<dyn KvStore>,
        tokens: Arc<AccessTokens>,
        orchestrator: Arc<SyncOrchestrator>,
        notifications: mpsc::UnboundedSender<Notification>,
    ) -> Self {
        Self {
            store,
            tokens,
            orchestrator,
            notifications,
        }
    }

    /// Handle one command. Errors are returned for input the command itself
    /// rejects; pipeline results arrive as notifications.
    pub async fn dispatch(&self, command: Command) -> Result<()> {
        match command {
            Command::BeginLogin => {
                match self.tokens.login().await {
                    Ok(profile) => {
                        info!("Logged in as {}", profile.label());
                        self.notify(Notification::AuthSucceeded {
                            display_name: profile.label().to_string(),
                        });
                    }
                    Err(e) => error!("Login failed: {}", e),
                }
                Ok(())
            }
            Command::BeginSync(form) => {
                self.save_form(&form).await?;
                let request = form.to_request()?;
                let outcome = self.orchestrator.sync(&request).await;
                self.notify(Notification::SyncCompleted { outcome });
                Ok(())
            }
            Command::SaveConfiguration { client_id } => {
                let client_id = client_id.trim();
                if client_id.is_empty() {
                    return Err(SyncError::InvalidInput("Please enter a Client ID.".into()));
                }
                db::save(&self.store, CLIENT_ID_KEY, client_id).await?;
                info!("Client ID saved");
                Ok(())
            }
        }
    }

    /// Display name of the logged-in account, if its token is still accepted.
    pub async fn check_auth(&self) -> Option<String> {
        match self.tokens.check_auth().await {
            Ok(profile) => Some(profile.label().to_string()),
            Err(e) => {
                info!("Not logged in: {}", e);
                None
            }
        }
    }

    pub async fn is_configured(&self) -> Result<bool> {
        Ok(db::load(&self.store, CLIENT_ID_KEY)
            .await?
            .map(|c| !c.is_empty())
            .unwrap_or(false))
    }

    pub async fn saved_form(&self) -> Result<SyncForm> {
        Ok(SyncForm {
            blend_url: db::load(&self.store, SAVED_BLEND_URL_KEY).await?.unwrap_or_default(),
            friend_username: db::load(&self.store, SAVED_FRIEND_USERNAME_KEY)
                .await?
                .unwrap_or_default(),
            target_url: db::load(&self.store, SAVED_TARGET_URL_KEY).await?.unwrap_or_default(),
        })
    }

    async fn save_form(&self, form: &SyncForm) -> Result<()> {
        db::save(&self.store, SAVED_BLEND_URL_KEY, &form.blend_url).await?;
        db::save(&self.store, SAVED_FRIEND_USERNAME_KEY, &form.friend_username).await?;
        db::save(&self.store, SAVED_TARGET_URL_KEY, &form.target_url).await?;
        Ok(())
    }

    fn notify(&self, notification: Notification) {
        // The presentation layer may already be gone.
        let _ = self.notifications.send(notification);
    }
}
