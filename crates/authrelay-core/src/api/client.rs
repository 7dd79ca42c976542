//! Request pipeline used by every caller.
//!
//! This module provides the `ApiClient` for making authenticated requests
//! against the platform. A 401 response is handed to the refresh coordinator,
//! which repairs the session (once, for all concurrent callers) and retries.

use std::fmt;
use std::sync::Arc;

use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::debug;

use super::error::{ApiError, Result};
use super::executor::RequestExecutor;
use super::refresh::{RefreshCoordinator, RefreshStats};
use super::request::{ApiResponse, MultipartBody, PendingRequest, RequestBody, RequestOptions};
use crate::auth::CredentialStore;
use crate::config::ClientConfig;
use crate::events::SessionEvents;

/// API client for the platform.
/// Clone is cheap; clones share the connection pool, credential store and
/// refresh coordinator.
#[derive(Clone)]
pub struct ApiClient {
    executor: RequestExecutor,
    coordinator: Arc<RefreshCoordinator>,
    events: SessionEvents,
    config: Arc<ClientConfig>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.base_url)
            .field("executor", &self.executor)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

impl ApiClient {
    /// Create a client over `store`. Fails if the configuration has neither
    /// an API key nor an access token, or cannot be used.
    pub fn new(config: ClientConfig, store: CredentialStore) -> Result<Self> {
        Self::with_events(config, store, SessionEvents::new())
    }

    /// Like [`ApiClient::new`], publishing session events on `events`.
    pub fn with_events(
        config: ClientConfig,
        store: CredentialStore,
        events: SessionEvents,
    ) -> Result<Self> {
        config.validate()?;
        let executor = RequestExecutor::new(&config, store)?;
        let coordinator = RefreshCoordinator::new(&config, executor.clone(), events.clone())?;

        Ok(Self {
            executor,
            coordinator: Arc::new(coordinator),
            events,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &CredentialStore {
        self.executor.store()
    }

    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn refresh_stats(&self) -> RefreshStats {
        self.coordinator.stats()
    }

    /// Issue a request, repairing an expired session on 401.
    pub async fn request(&self, endpoint: &str, options: RequestOptions) -> Result<ApiResponse> {
        let request = options.into_pending(endpoint);
        self.send(&request).await
    }

    async fn send(&self, request: &PendingRequest) -> Result<ApiResponse> {
        // Resolved once so the 401 handler compares against what actually went out
        let sent_token = self.executor.bearer_token(None);

        match self.executor.execute(request, sent_token.as_deref()).await {
            Err(err) if err.is_unauthorized() => {
                debug!(method = %request.method, endpoint = %request.endpoint, "Unauthorized response");
                match self
                    .coordinator
                    .handle_unauthorized(request, sent_token.as_deref())
                    .await?
                {
                    Some(response) => Ok(response),
                    None => Err(err),
                }
            }
            other => other,
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T> {
        self.request(endpoint, options).await?.json()
    }

    /// GET with flat query parameters. `null` values are dropped; arrays and
    /// objects are sent as JSON text.
    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, Value)],
    ) -> Result<T> {
        let mut options = RequestOptions::new(Method::GET);
        options.params = params
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        self.send_json(endpoint, options).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T> {
        let options = RequestOptions::new(Method::POST).body(RequestBody::json(body)?);
        self.send_json(endpoint, options).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T> {
        let options = RequestOptions::new(Method::PUT).body(RequestBody::json(body)?);
        self.send_json(endpoint, options).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T> {
        let options = RequestOptions::new(Method::PATCH).body(RequestBody::json(body)?);
        self.send_json(endpoint, options).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        self.send_json(endpoint, RequestOptions::new(Method::DELETE))
            .await
    }

    /// POST a multipart form. No Content-Type is set by the client.
    pub async fn upload<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        form: MultipartBody,
        headers: HeaderMap,
    ) -> Result<T> {
        if form.is_empty() {
            return Err(ApiError::InvalidRequest("Multipart body has no parts".to_string()));
        }
        let options = RequestOptions::new(Method::POST)
            .body(RequestBody::Multipart(form))
            .headers(headers);
        self.send_json(endpoint, options).await
    }
}
