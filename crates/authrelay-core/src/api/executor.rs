//! Single HTTP call execution: header assembly, body encoding and error
//! normalization. No retry or refresh logic lives here.

use std::fmt;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use tracing::debug;

use super::error::{ApiError, Result};
use super::request::{ApiResponse, PendingRequest, RequestBody};
use crate::auth::CredentialStore;
use crate::config::ClientConfig;

/// Header carrying the platform API key.
pub const API_KEY_HEADER: &str = "apikey";

/// Executes requests against the platform.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct RequestExecutor {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    static_token: Option<String>,
    store: CredentialStore,
}

impl fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .field("store", &self.store)
            .finish()
    }
}

impl RequestExecutor {
    pub fn new(config: &ClientConfig, store: CredentialStore) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            static_token: config.access_token.clone().filter(|t| !t.is_empty()),
            store,
        })
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub(crate) fn static_token(&self) -> Option<&str> {
        self.static_token.as_deref()
    }

    /// Token a request would be sent with: the override, else the stored
    /// session token, else the configured static token.
    pub fn bearer_token(&self, override_token: Option<&str>) -> Option<String> {
        override_token
            .map(str::to_string)
            .or_else(|| self.store.token())
            .or_else(|| self.static_token.clone())
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
        }
    }

    /// Final headers for `request`. Credential headers are applied last so a
    /// caller header can never replace the token chosen for this attempt.
    pub(crate) fn build_headers(
        &self,
        request: &PendingRequest,
        override_token: Option<&str>,
    ) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        if !request.is_multipart() {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        headers.extend(request.headers.clone());

        // The transport computes the multipart boundary
        if request.is_multipart() {
            headers.remove(header::CONTENT_TYPE);
        }

        if let Some(ref key) = self.api_key {
            let mut value = HeaderValue::from_str(key)
                .map_err(|e| ApiError::Config(format!("Invalid API key header: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(HeaderName::from_static(API_KEY_HEADER), value);
        }

        match self.bearer_token(override_token) {
            Some(token) => {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| ApiError::InvalidRequest(format!("Invalid bearer token: {}", e)))?;
                value.set_sensitive(true);
                headers.insert(header::AUTHORIZATION, value);
            }
            None => {
                headers.remove(header::AUTHORIZATION);
            }
        }

        Ok(headers)
    }

    /// Perform one HTTP call. Non-2xx responses become [`ApiError::Http`].
    pub async fn execute(
        &self,
        request: &PendingRequest,
        override_token: Option<&str>,
    ) -> Result<ApiResponse> {
        let url = self.url(&request.endpoint);
        let headers = self.build_headers(request, override_token)?;

        let builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(headers);
        let builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.body(serde_json::to_string(value).map_err(|e| {
                ApiError::InvalidRequest(format!("Failed to serialize body: {}", e))
            })?),
            RequestBody::Text(text) => builder.body(text.clone()),
            RequestBody::Multipart(form) => builder.multipart(form.to_form()?),
        };

        debug!(method = %request.method, url = %url, "Sending request");
        let response = builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        if status.is_success() {
            Ok(ApiResponse {
                status,
                headers,
                body: body.to_vec(),
            })
        } else {
            debug!(method = %request.method, url = %url, status = status.as_u16(), "Request failed");
            Err(ApiError::from_status(status, &String::from_utf8_lossy(&body)))
        }
    }
}
