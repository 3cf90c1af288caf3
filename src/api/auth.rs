use super::PlaylistApi;
use crate::db::{self, KvStore, ACCESS_TOKEN_KEY, CLIENT_ID_KEY};
use crate::error::{AuthError, Result, SyncError};
use crate::models::{BearerToken, UserProfile};
use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// Obtain a bearer token for the destination account, given the app's client
/// id and the scopes it needs.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn obtain_token(
        &self,
        client_id: &str,
        scopes: &[String],
        interactive: bool,
    ) -> std::result::Result<BearerToken, AuthError>;
}

/// Implicit-grant authorization through the terminal:
/// 1. Build the authorization URL (response_type=token) and print it.
/// 2. The user approves in a browser and is redirected to the redirect URI.
/// 3. The user pastes the full redirect URL back; the token is read from its fragment.
///
/// Only interactive requests are supported; there is no silent re-authorization.
pub struct ImplicitGrantFlow {
    auth_base: String,
    redirect_uri: String,
}

impl ImplicitGrantFlow {
    pub fn new(auth_base: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            auth_base: auth_base.into().trim_end_matches('/').to_string(),
            redirect_uri: redirect_uri.into(),
        }
    }

    pub fn authorize_url(
        &self,
        client_id: &str,
        scopes: &[String],
        state: &str,
    ) -> std::result::Result<Url, AuthError> {
        let mut url = Url::parse(&format!("{}/authorize", self.auth_base))
            .map_err(|e| AuthError::Parse(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("response_type", "token")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", &scopes.join(" "))
            .append_pair("state", state);
        Ok(url)
    }
}

fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

/// Extract the access token from an implicit-grant redirect URL.
pub fn token_from_redirect(
    redirect_url: &str,
    expected_state: &str,
) -> std::result::Result<BearerToken, AuthError> {
    let parsed = Url::parse(redirect_url.trim()).map_err(|e| AuthError::Parse(e.to_string()))?;
    let fragment = parsed.fragment().unwrap_or("");
    let mut token = None;
    let mut state = None;
    let mut denied = false;
    for (k, v) in url::form_urlencoded::parse(fragment.as_bytes()) {
        match k.as_ref() {
            "access_token" => token = Some(v.into_owned()),
            "state" => state = Some(v.into_owned()),
            "error" => denied = true,
            _ => {}
        }
    }
    // Denials come back in the query string rather than the fragment.
    if denied || parsed.query_pairs().any(|(k, _)| k == "error") {
        return Err(AuthError::Cancelled);
    }
    if state.as_deref() != Some(expected_state) {
        return Err(AuthError::StateMismatch);
    }
    token
        .filter(|t| !t.is_empty())
        .map(BearerToken::new)
        .ok_or(AuthError::NoRedirectToken)
}

#[async_trait]
impl TokenSource for ImplicitGrantFlow {
    async fn obtain_token(
        &self,
        client_id: &str,
        scopes: &[String],
        interactive: bool,
    ) -> std::result::Result<BearerToken, AuthError> {
        if !interactive {
            return Err(AuthError::Cancelled);
        }
        let state = random_state();
        let url = self.authorize_url(client_id, scopes, &state)?;
        println!(
            "Open this URL in your browser and authorize the application:\n\n{}\n",
            url
        );
        println!("After authorizing, copy the full redirect URL from the address bar and paste it here:");
        let input = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await
        .map_err(|e| AuthError::Parse(e.to_string()))?
        .map_err(|e| AuthError::Parse(e.to_string()))?;
        if input.trim().is_empty() {
            return Err(AuthError::Cancelled);
        }
        token_from_redirect(&input, &state)
    }
}

/// Destination-account token management on top of the key-value store.
pub struct AccessTokens {
    store: Arc<dyn KvStore>,
    source: Arc<dyn TokenSource>,
    api: Arc<dyn PlaylistApi>,
    scopes: Vec<String>,
}

impl AccessTokens {
    pub fn new(
        store: Arc<dyn KvStore>,
        source: Arc<dyn TokenSource>,
        api: Arc<dyn PlaylistApi>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            store,
            source,
            api,
            scopes,
        }
    }

    /// Run the authorization flow and persist the resulting token.
    pub async fn authenticate(&self, interactive: bool) -> Result<BearerToken> {
        let client_id = db::load(&self.store, CLIENT_ID_KEY)
            .await?
            .filter(|c| !c.is_empty())
            .ok_or_else(|| SyncError::ConfigMissing("Spotify Client ID not configured.".into()))?;
        let token = self
            .source
            .obtain_token(&client_id, &self.scopes, interactive)
            .await?;
        db::save(&self.store, ACCESS_TOKEN_KEY, token.as_str()).await?;
        Ok(token)
    }

    /// The stored token, re-authorized interactively once if the profile
    /// probe rejects it with a 401.
    pub async fn valid_token(&self) -> Result<BearerToken> {
        let token = db::load(&self.store, ACCESS_TOKEN_KEY)
            .await?
            .filter(|t| !t.is_empty())
            .map(BearerToken::new)
            .ok_or(AuthError::NotLoggedIn)?;
        match self.api.current_user(&token).await {
            Ok(_) => Ok(token),
            Err(e) if e.is_unauthorized() => {
                info!("Access token expired. Re-authenticating...");
                self.authenticate(true).await
            }
            Err(e) => {
                warn!("token validation failed: {}", e);
                Err(AuthError::Rejected(e.to_string()).into())
            }
        }
    }

    /// Interactive login; returns the profile of the account that signed in.
    pub async fn login(&self) -> Result<UserProfile> {
        let token = self.authenticate(true).await?;
        self.api.current_user(&token).await
    }

    /// Profile of the stored account, if its token still works.
    pub async fn check_auth(&self) -> Result<UserProfile> {
        let token = self.valid_token().await?;
        self.api.current_user(&token).await
    }
}
