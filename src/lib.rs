//! Token lifecycle and request authorization for the Dailog web client.
//!
//! Requests go through [`AuthorizedTransport`], which stamps the stored token,
//! renews it once on a 401 and replays the request once. [`SessionState`]
//! tracks whether the user is logged in, and [`HealthMonitor`] wipes local
//! state when the backend disappears. Everything a host UI needs to react to
//! is published on the [`EventStream`].

use std::sync::Arc;
use tracing::{info, warn};

pub mod alert;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod http_client;

pub use alert::{Alert, AlertQueue, AlertSeverity};
pub use auth::{
    AuthorizedTransport, CredentialStore, FileBackend, MemoryBackend, NavigationDecision,
    OAuthOutcome, Profile, RenewalClient, Session, SessionState, StorageBackend,
};
pub use config::Config;
pub use error::{ClientError, ClientResult, ErrorCategory};
pub use events::{ClientEvent, EventStream, LogoutReason, View};
pub use health::{HealthMonitor, ProbeOutcome};
pub use http_client::{HttpClient, HttpMethod, HttpRequest, ReqwestHttpClient, SimpleHttpResponse};

/// Alert shown when a request could not be authorized
pub const ACCESS_DENIED_MESSAGE: &str = "This page cannot be accessed.";

/// Every component of the client, wired to one credential store and one
/// event stream. Clones share state.
#[derive(Clone)]
pub struct ClientContext {
    pub config: Config,
    pub events: EventStream<ClientEvent>,
    pub store: CredentialStore,
    pub alerts: AlertQueue,
    pub renewal: RenewalClient,
    pub transport: AuthorizedTransport,
    pub session: SessionState,
    pub health: Arc<HealthMonitor>,
}

impl ClientContext {
    /// Build a context talking to the configured backend over reqwest,
    /// hydrating the credential store from disk when a path is configured
    pub async fn new(config: Config) -> ClientResult<Self> {
        config.validate()?;

        let http: Arc<dyn HttpClient> = Arc::new(
            ReqwestHttpClient::new(&config.api.base_url)
                .map_err(|e| error::errors::transport(&config.api.base_url, e))?,
        );

        let backend: Arc<dyn StorageBackend> = match &config.storage.path {
            Some(path) => {
                info!(path = %path.display(), "Persisting session state to file");
                Arc::new(FileBackend::new(path))
            }
            None => Arc::new(MemoryBackend::new()),
        };
        let store = CredentialStore::hydrate(backend).await?;

        Ok(Self::from_parts(config, http, store).await)
    }

    /// Wire a context around an existing HTTP client and store
    pub async fn from_parts(
        config: Config,
        http: Arc<dyn HttpClient>,
        store: CredentialStore,
    ) -> Self {
        let events = EventStream::new(config.api.event_capacity, config.api.event_buffer);
        let alerts = AlertQueue::new(config.alerts.ttl(), events.clone());

        let renewal = RenewalClient::new(
            http.clone(),
            store.clone(),
            config.api.url(auth::REISSUE_PATH),
            events.clone(),
        );
        let transport = AuthorizedTransport::new(
            http.clone(),
            store.clone(),
            renewal.clone(),
            events.clone(),
        )
        .with_single_flight(config.renewal.single_flight);

        let session = SessionState::new(
            store.clone(),
            transport.clone(),
            http.clone(),
            config.api.clone(),
            events.clone(),
            alerts.clone(),
        )
        .await;

        let health = Arc::new(HealthMonitor::new(
            http.clone(),
            session.clone(),
            store.clone(),
            alerts.clone(),
            events.clone(),
            &config.api,
            &config.health,
        ));

        Self {
            config,
            events,
            store,
            alerts,
            renewal,
            transport,
            session,
            health,
        }
    }

    /// Absolute URL for a backend path
    pub fn url(&self, path: &str) -> String {
        self.config.api.url(path)
    }

    /// React to an event the way the view layer does: alert and log out when
    /// authorization is exhausted. Returns the view to navigate to, if any.
    pub async fn handle_view_event(&self, event: &ClientEvent) -> ClientResult<Option<View>> {
        match event {
            ClientEvent::AuthorizationExhausted { url } => {
                warn!(url = %url, "Authorization exhausted");
                self.alerts.error(ACCESS_DENIED_MESSAGE).await;
                self.session.force_logout(LogoutReason::RenewalExhausted).await?;
                Ok(Some(View::Login))
            }
            ClientEvent::ServerRecovered { navigate_to } => Ok(Some(*navigate_to)),
            _ => Ok(None),
        }
    }
}
