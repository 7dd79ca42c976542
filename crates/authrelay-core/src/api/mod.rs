//! Outbound API client.
//!
//! Layers, leaves first:
//! - `RequestExecutor`: one HTTP call with credential headers and error normalization
//! - `RefreshCoordinator`: single-flight token refresh shared by all callers
//! - `ApiClient`: the `get/post/put/patch/delete` pipeline that ties them together

pub mod client;
pub mod error;
pub mod executor;
pub mod refresh;
pub mod request;

pub use client::ApiClient;
pub use error::{ApiError, Result, SESSION_EXPIRED_MESSAGE};
pub use executor::RequestExecutor;
pub use refresh::{RefreshCoordinator, RefreshOutcome, RefreshStats};
pub use request::{ApiResponse, MultipartBody, PendingRequest, RequestBody, RequestOptions};
