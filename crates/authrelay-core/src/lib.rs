//! authrelay core library.
//!
//! A resilient outbound API client: every request carries the platform API
//! key and the current session token, and an expired token is repaired
//! transparently. When many requests hit a 401 at once, exactly one refresh
//! call is made and every caller resumes with its outcome.
//!
//! - [`api`]: request pipeline, executor and single-flight refresh coordinator
//! - [`auth`]: credential store and token inspection
//! - [`events`]: session events, including the forced-logout signal
//! - [`session`]: login/logout and proactive refresh scheduling
//! - [`config`]: client configuration

pub mod api;
pub mod auth;
pub mod config;
pub mod events;
pub mod session;

pub use api::{ApiClient, ApiError, ApiResponse, MultipartBody, RequestOptions, Result};
pub use auth::CredentialStore;
pub use config::{ClientConfig, StorageMode};
pub use events::{LogoutReason, SessionEvent, SessionEvents};
pub use session::{SessionManager, SessionStatus};
