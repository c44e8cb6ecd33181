//! Periodic liveness probe.
//!
//! A failed probe forces a logout. When the server is still down on the next
//! tick, every persisted key is wiped and the user is alerted once. When it
//! answers again the session is reloaded from storage and the host is asked
//! to show the landing view.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::alert::AlertQueue;
use crate::auth::{CredentialStore, SessionState};
use crate::config::{ApiConfig, HealthConfig};
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, EventStream, LogoutReason, View};
use crate::http_client::{HttpClient, HttpRequest};

/// Liveness endpoint
pub const HEALTH_CHECK_PATH: &str = "/api/health-check";
/// Alert shown when local state is wiped
pub const SERVER_LOST_MESSAGE: &str = "Lost connection to the server.";

/// Failures in a row before local state is wiped
const CLEAR_AFTER_FAILURES: u32 = 2;

/// What a single probe concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Alive,
    /// Alive after at least one failed probe
    Recovered,
    Down { consecutive_failures: u32 },
}

#[derive(Debug)]
struct HealthState {
    is_alive: bool,
    consecutive_failures: u32,
    /// Local state was already wiped during the current down streak
    cleared: bool,
}

pub struct HealthMonitor {
    http: Arc<dyn HttpClient>,
    session: SessionState,
    store: CredentialStore,
    alerts: AlertQueue,
    events: EventStream<ClientEvent>,
    probe_url: String,
    interval: Duration,
    logout_on_every_failure: bool,
    state: Mutex<HealthState>,
    shutdown: RwLock<Option<mpsc::Sender<()>>>,
}

impl HealthMonitor {
    pub fn new(
        http: Arc<dyn HttpClient>,
        session: SessionState,
        store: CredentialStore,
        alerts: AlertQueue,
        events: EventStream<ClientEvent>,
        api: &ApiConfig,
        config: &HealthConfig,
    ) -> Self {
        Self {
            http,
            session,
            store,
            alerts,
            events,
            probe_url: api.url(HEALTH_CHECK_PATH),
            interval: config.interval(),
            logout_on_every_failure: config.logout_on_every_failure,
            state: Mutex::new(HealthState {
                is_alive: true,
                consecutive_failures: 0,
                cleared: false,
            }),
            shutdown: RwLock::new(None),
        }
    }

    pub async fn is_alive(&self) -> bool {
        self.state.lock().await.is_alive
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.state.lock().await.consecutive_failures
    }

    /// Probe once and apply the alive/down transition
    pub async fn check_server_status(&self) -> ProbeOutcome {
        match self.probe().await {
            Ok(()) => {
                let was_down = {
                    let mut state = self.state.lock().await;
                    let was_down = !state.is_alive;
                    state.is_alive = true;
                    state.consecutive_failures = 0;
                    state.cleared = false;
                    was_down
                };

                if !was_down {
                    debug!("Server is alive");
                    return ProbeOutcome::Alive;
                }

                info!("Server recovered, reloading session");
                self.session.reload_from_store().await;
                self.events
                    .publish(ClientEvent::ServerRecovered {
                        navigate_to: View::Home,
                    })
                    .await;
                ProbeOutcome::Recovered
            }
            Err(e) => {
                let consecutive_failures = {
                    let mut state = self.state.lock().await;
                    state.is_alive = false;
                    state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                    state.consecutive_failures
                };
                warn!(error = %e, consecutive_failures, "Health check failed");

                self.events
                    .publish(ClientEvent::ServerDown {
                        consecutive_failures,
                    })
                    .await;

                if self.logout_on_every_failure || consecutive_failures == 1 {
                    if let Err(e) = self.session.force_logout(LogoutReason::ServerUnreachable).await {
                        error!(error = %e, "Forced logout failed");
                    }
                }
                ProbeOutcome::Down {
                    consecutive_failures,
                }
            }
        }
    }

    /// One timer tick: probe, then wipe local state if the server stayed down
    pub async fn tick(&self) -> ProbeOutcome {
        let outcome = self.check_server_status().await;

        if let ProbeOutcome::Down {
            consecutive_failures,
        } = outcome
        {
            if consecutive_failures >= CLEAR_AFTER_FAILURES && self.mark_cleared().await {
                self.clear_local_state().await;
            }
        }
        outcome
    }

    /// Run [`tick`](Self::tick) on the configured interval until [`stop`](Self::stop)
    pub async fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown.write().await = Some(shutdown_tx);

        let monitor = Arc::clone(self);
        info!(interval_ms = monitor.interval.as_millis() as u64, "Starting health monitor");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately; the first probe waits one interval
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.tick().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Health monitor stopped");
                        break;
                    }
                }
            }
        })
    }

    pub async fn stop(&self) {
        if let Some(shutdown_tx) = self.shutdown.write().await.take() {
            let _ = shutdown_tx.send(()).await;
        }
    }

    async fn probe(&self) -> ClientResult<()> {
        match self.http.execute(HttpRequest::get(&self.probe_url)).await {
            Ok(response) if response.status() == http::StatusCode::OK.as_u16() => Ok(()),
            Ok(response) => Err(ClientError::HealthCheckFailed {
                reason: format!("status {}", response.status()),
            }),
            Err(e) => Err(ClientError::HealthCheckFailed {
                reason: e.to_string(),
            }),
        }
    }

    /// Returns true only for the first caller of a down streak
    async fn mark_cleared(&self) -> bool {
        let mut state = self.state.lock().await;
        !std::mem::replace(&mut state.cleared, true)
    }

    async fn clear_local_state(&self) {
        error!("Server unreachable, clearing all local state");
        if let Err(e) = self.store.clear_all().await {
            error!(error = %e, "Failed to clear local state");
        }
        self.session.reload_from_store().await;
        self.events.publish(ClientEvent::LocalStateCleared).await;
        self.alerts.error(SERVER_LOST_MESSAGE).await;
    }
}
