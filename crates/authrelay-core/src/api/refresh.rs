//! Single-flight session token refresh.
//!
//! Any number of requests may discover an expired token at the same time.
//! The first one to reach the coordinator installs a refresh cycle and
//! becomes its leader; everyone arriving while the cycle is in flight parks
//! on the cycle's outcome instead of issuing their own refresh call. The
//! leader publishes exactly one outcome, which every parked caller receives.
//!
//! The in-flight state is only touched under a synchronous mutex that is
//! never held across an await, so the check-and-set that decides between
//! leading and waiting is atomic on a multi-threaded runtime. Publishing the
//! outcome and returning to idle happen together under that mutex, so every
//! waiter of a cycle is resolved before the next cycle can start.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use regex::Regex;
use reqwest::Method;
use serde::Deserialize;
use tokio::sync::{watch, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::{debug, info, warn};

use super::error::{ApiError, Result};
use super::executor::RequestExecutor;
use super::request::{ApiResponse, PendingRequest};
use crate::config::ClientConfig;
use crate::events::{LogoutReason, SessionEvent, SessionEvents};

/// Status value the refresh endpoint reports on success.
const REFRESH_OK_STATUS: &str = "OK";

/// Result of one refresh cycle, shared by the leader and all its waiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed(String),
    Failed,
}

/// What a cycle publishes to its waiters.
#[derive(Debug, Clone)]
enum Settled {
    Done(RefreshOutcome),
    /// The leader was dropped before finishing; waiters contend again.
    Abandoned,
}

type OutcomeReceiver = watch::Receiver<Option<Settled>>;

enum CycleState {
    Idle,
    InFlight(OutcomeReceiver),
}

enum Role<'a> {
    Leader(CycleGuard<'a>),
    Waiter(OutcomeReceiver),
}

/// Counters describing refresh activity since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    /// Refresh calls started (one per cycle)
    pub cycles: u64,
    pub refreshed: u64,
    pub failed: u64,
    /// Callers that joined a cycle led by someone else
    pub waiters: u64,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    status: Option<String>,
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
}

pub struct RefreshCoordinator {
    executor: RequestExecutor,
    events: SessionEvents,
    refresh_path: String,
    auth_endpoints: Regex,
    state: Mutex<CycleState>,
    /// Serializes credential writes: refresh cycles, login and logout.
    credentials: AsyncMutex<()>,
    cycles: AtomicU64,
    refreshed: AtomicU64,
    failed: AtomicU64,
    waiters: AtomicU64,
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refresh_path", &self.refresh_path)
            .field("refreshing", &self.is_refreshing())
            .field("stats", &self.stats())
            .finish()
    }
}

impl RefreshCoordinator {
    pub fn new(
        config: &ClientConfig,
        executor: RequestExecutor,
        events: SessionEvents,
    ) -> Result<Self> {
        Ok(Self {
            executor,
            events,
            refresh_path: config.refresh_path.clone(),
            auth_endpoints: config.auth_endpoint_regex()?,
            state: Mutex::new(CycleState::Idle),
            credentials: AsyncMutex::new(()),
            cycles: AtomicU64::new(0),
            refreshed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            waiters: AtomicU64::new(0),
        })
    }

    /// True while a refresh call is outstanding.
    pub fn is_refreshing(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            CycleState::InFlight(_)
        )
    }

    pub fn stats(&self) -> RefreshStats {
        RefreshStats {
            cycles: self.cycles.load(Ordering::SeqCst),
            refreshed: self.refreshed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            waiters: self.waiters.load(Ordering::SeqCst),
        }
    }

    /// Whether `endpoint` is a login/register/etc. endpoint, where a 401
    /// means bad credentials rather than an expired session.
    pub fn is_auth_endpoint(&self, endpoint: &str) -> bool {
        let path = match url::Url::parse(endpoint) {
            Ok(url) => url.path().to_string(),
            Err(_) => endpoint.to_string(),
        };
        self.auth_endpoints.is_match(&path)
    }

    /// Hold this while writing credentials outside a refresh cycle (login,
    /// logout) so the write cannot interleave with an in-flight refresh.
    pub async fn lock_credentials(&self) -> AsyncMutexGuard<'_, ()> {
        self.credentials.lock().await
    }

    /// Recover from a 401 on `request`, which was sent with `sent_token`.
    ///
    /// Returns `Ok(None)` for auth endpoints, leaving the caller to surface
    /// the original 401. Otherwise the request is retried once with a fresh
    /// token, or fails with [`ApiError::SessionExpired`] if the session could
    /// not be repaired.
    pub async fn handle_unauthorized(
        &self,
        request: &PendingRequest,
        sent_token: Option<&str>,
    ) -> Result<Option<ApiResponse>> {
        if self.is_auth_endpoint(&request.endpoint) {
            debug!(endpoint = %request.endpoint, "401 from auth endpoint, not refreshing");
            return Ok(None);
        }

        // A cycle settled while this request was on the wire
        match self.executor.store().token() {
            Some(current) if sent_token != Some(current.as_str()) => {
                debug!(endpoint = %request.endpoint, "Token changed since request was sent, retrying");
                return self.executor.execute(request, Some(&current)).await.map(Some);
            }
            None if sent_token.is_some() && sent_token != self.executor.static_token() => {
                debug!(endpoint = %request.endpoint, "Session cleared since request was sent");
                return Err(ApiError::SessionExpired);
            }
            _ => {}
        }

        match self.refresh().await {
            RefreshOutcome::Refreshed(token) => {
                debug!(endpoint = %request.endpoint, "Retrying with refreshed token");
                self.executor.execute(request, Some(&token)).await.map(Some)
            }
            RefreshOutcome::Failed => Err(ApiError::SessionExpired),
        }
    }

    /// Obtain a fresh token, joining the in-flight cycle if there is one.
    pub async fn refresh(&self) -> RefreshOutcome {
        loop {
            match self.join_or_lead() {
                Role::Leader(guard) => return self.lead(guard).await,
                Role::Waiter(mut rx) => {
                    self.waiters.fetch_add(1, Ordering::SeqCst);
                    let settled = match rx.wait_for(Option::is_some).await {
                        Ok(value) => value.clone(),
                        Err(_) => None,
                    };
                    match settled {
                        Some(Settled::Done(outcome)) => return outcome,
                        Some(Settled::Abandoned) | None => {
                            debug!("Refresh leader went away, contending again");
                        }
                    }
                }
            }
        }
    }

    /// Atomically either join the current cycle or start a new one.
    fn join_or_lead(&self) -> Role<'_> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let CycleState::InFlight(rx) = &*state {
            return Role::Waiter(rx.clone());
        }

        let (tx, rx) = watch::channel(None);
        *state = CycleState::InFlight(rx);
        self.cycles.fetch_add(1, Ordering::SeqCst);
        Role::Leader(CycleGuard {
            coordinator: self,
            tx: Some(tx),
        })
    }

    async fn lead(&self, guard: CycleGuard<'_>) -> RefreshOutcome {
        let _credentials = self.credentials.lock().await;
        info!("Refreshing session token");

        let (outcome, event) = match self.request_new_token().await {
            Ok(token) => {
                if let Err(e) = self.executor.store().set_token(&token) {
                    warn!(error = %e, "Failed to persist refreshed token");
                }
                self.refreshed.fetch_add(1, Ordering::SeqCst);
                info!("Session token refreshed");
                (RefreshOutcome::Refreshed(token), SessionEvent::TokenRefreshed)
            }
            Err(reason) => {
                if let Err(e) = self.executor.store().clear_all() {
                    warn!(error = %e, "Failed to clear credentials after refresh failure");
                }
                self.failed.fetch_add(1, Ordering::SeqCst);
                warn!(?reason, "Session refresh failed, forcing logout");
                (RefreshOutcome::Failed, SessionEvent::ForcedLogout { reason })
            }
        };

        guard.settle(outcome.clone());
        self.events.emit(event);
        outcome
    }

    /// Call the refresh endpoint with the current token.
    async fn request_new_token(&self) -> std::result::Result<String, LogoutReason> {
        let current = self.executor.bearer_token(None).ok_or_else(|| {
            warn!("No session token available to refresh");
            LogoutReason::MissingToken
        })?;

        let request = PendingRequest::new(Method::POST, self.refresh_path.clone());
        let response = self
            .executor
            .execute(&request, Some(&current))
            .await
            .map_err(|e| {
                warn!(error = %e, "Refresh request failed");
                LogoutReason::RefreshFailed
            })?;

        match response.json::<RefreshResponse>() {
            Ok(RefreshResponse {
                status: Some(status),
                access_token: Some(token),
            }) if status == REFRESH_OK_STATUS && !token.is_empty() => Ok(token),
            Ok(body) => {
                warn!(status = ?body.status, "Refresh endpoint did not return a token");
                Err(LogoutReason::RefreshFailed)
            }
            Err(e) => {
                warn!(error = %e, "Unreadable refresh response");
                Err(LogoutReason::RefreshFailed)
            }
        }
    }
}

/// Owned by the leader of a cycle. Publishing the outcome and resetting the
/// coordinator to idle happen on `settle`, or on drop if the leader never
/// got that far.
struct CycleGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    tx: Option<watch::Sender<Option<Settled>>>,
}

impl CycleGuard<'_> {
    fn settle(mut self, outcome: RefreshOutcome) {
        self.publish(Settled::Done(outcome));
    }

    fn publish(&mut self, settled: Settled) {
        if let Some(tx) = self.tx.take() {
            let mut state = self
                .coordinator
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *state = CycleState::Idle;
            tx.send_replace(Some(settled));
        }
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!("Refresh abandoned before completion");
            self.publish(Settled::Abandoned);
        }
    }
}
