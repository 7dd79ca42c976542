//! Session lifecycle on top of the request pipeline.
//!
//! Login and logout write credentials while holding the coordinator's
//! credential lock, so they never interleave with an in-flight refresh.

use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, RefreshOutcome, Result};
use crate::events::SessionEvent;

/// Lower bound between two proactive refreshes, for servers issuing tokens
/// shorter-lived than the refresh buffer.
const MIN_REFRESH_INTERVAL: StdDuration = StdDuration::from_secs(10);

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
    #[serde(default)]
    user: Option<Value>,
}

/// Snapshot of the local session for display.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub authenticated: bool,
    pub expires_in_secs: Option<i64>,
    pub refreshing: bool,
    pub profile: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct SessionManager {
    client: ApiClient,
}

impl SessionManager {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.store().token().is_some()
    }

    pub fn status(&self) -> SessionStatus {
        let store = self.client.store();
        SessionStatus {
            authenticated: self.is_authenticated(),
            expires_in_secs: store.time_until_expiry().map(|d| d.num_seconds()),
            refreshing: self.client.coordinator().is_refreshing(),
            profile: store.profile(),
        }
    }

    /// Exchange credentials for a session token. A 401 here is a bad
    /// password and surfaces as-is.
    pub async fn login(&self, email: &str, password: &str) -> Result<Option<Value>> {
        let login_path = self.client.config().login_path.clone();
        let response: LoginResponse = self
            .client
            .post(&login_path, &LoginRequest { email, password })
            .await?;

        let token = response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ApiError::InvalidResponse("Login response did not include an access token".to_string())
            })?;

        {
            let _credentials = self.client.coordinator().lock_credentials().await;
            self.client.store().set_session(&token, response.user.clone())?;
        }

        info!(email, "Logged in");
        self.client.events().emit(SessionEvent::LoggedIn);
        Ok(response.user)
    }

    /// Tell the server (best effort) and drop local credentials.
    pub async fn logout(&self) -> Result<()> {
        if self.is_authenticated() {
            let logout_path = self.client.config().logout_path.clone();
            if let Err(e) = self
                .client
                .post::<Value, _>(&logout_path, &serde_json::json!({}))
                .await
            {
                warn!(error = %e, "Server logout failed, clearing local session anyway");
            }
        }

        {
            let _credentials = self.client.coordinator().lock_credentials().await;
            self.client.store().clear_all()?;
        }

        info!("Logged out");
        self.client.events().emit(SessionEvent::LoggedOut);
        Ok(())
    }

    /// Re-read the profile from the server and cache it. Accepts either the
    /// bare profile or one wrapped as `{"user": {...}}`.
    pub async fn verify(&self) -> Result<Value> {
        let profile_path = self.client.config().profile_path.clone();
        let body: Value = self.client.get(&profile_path, &[]).await?;
        let profile = match body {
            Value::Object(mut map) if map.contains_key("user") => {
                map.remove("user").unwrap_or(Value::Null)
            }
            other => other,
        };
        self.client.store().set_profile(profile.clone())?;
        debug!("Session verified");
        Ok(profile)
    }

    /// Refresh the token `buffer` before it expires, in the background.
    ///
    /// The task re-plans whenever credentials change and stops once no
    /// token is stored or a refresh fails. Tokens without a decodable
    /// expiry are left alone until they change.
    pub fn spawn_refresh_scheduler(&self, buffer: Duration) -> JoinHandle<()> {
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut changes = client.store().subscribe();
            let mut just_refreshed = false;

            loop {
                if client.store().token().is_none() {
                    debug!("No session token, refresh scheduler stopping");
                    return;
                }

                let Some(remaining) = client.store().time_until_expiry() else {
                    match changes.recv().await {
                        Ok(_) | Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => return,
                    }
                };

                let mut wait = (remaining - buffer).to_std().unwrap_or(StdDuration::ZERO);
                if just_refreshed {
                    wait = wait.max(MIN_REFRESH_INTERVAL);
                }
                debug!(wait_secs = wait.as_secs(), "Next proactive refresh scheduled");

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        match client.coordinator().refresh().await {
                            RefreshOutcome::Refreshed(_) => {
                                // Skip the change our own refresh just queued
                                changes = changes.resubscribe();
                                just_refreshed = true;
                            }
                            RefreshOutcome::Failed => {
                                info!("Proactive refresh failed, refresh scheduler stopping");
                                return;
                            }
                        }
                    }
                    change = changes.recv() => {
                        just_refreshed = false;
                        if let Err(RecvError::Closed) = change {
                            return;
                        }
                    }
                }
            }
        })
    }
}
