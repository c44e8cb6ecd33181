use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::credential_store::CredentialStore;
use crate::auth::renewal::RenewalClient;
use crate::error::{errors, ClientError, ClientResult, ErrorCategory};
use crate::events::{ClientEvent, EventStream};
use crate::http_client::{HttpClient, HttpRequest, SimpleHttpResponse};

/// Where a logical request is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Initial,
    Sent,
    Success,
    AuthFailed,
    Renewing,
    Replayed,
    GivenUp,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Initial => "initial",
            RequestState::Sent => "sent",
            RequestState::Success => "success",
            RequestState::AuthFailed => "auth_failed",
            RequestState::Renewing => "renewing",
            RequestState::Replayed => "replayed",
            RequestState::GivenUp => "given_up",
        };
        write!(f, "{}", name)
    }
}

/// An in-flight call tagged with whether it has already been replayed.
/// Lives for one original attempt plus at most one replay.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    request: HttpRequest,
    retried: bool,
    state: RequestState,
}

impl PendingRequest {
    pub fn new(request: HttpRequest) -> Self {
        Self {
            request,
            retried: false,
            state: RequestState::Initial,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn retried(&self) -> bool {
        self.retried
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    fn transition(&mut self, next: RequestState) {
        debug!(
            url = %self.request.url,
            retried = self.retried,
            from = %self.state,
            to = %next,
            "Request state change"
        );
        self.state = next;
    }
}

type SharedRenewal = Shared<BoxFuture<'static, ClientResult<String>>>;

/// Wraps every outgoing request: stamps the current token, and on a 401
/// renews the token once and replays the request once.
///
/// A request costs at most two sends and one renewal. The replay is never
/// renewed again.
#[derive(Clone)]
pub struct AuthorizedTransport {
    http: Arc<dyn HttpClient>,
    store: CredentialStore,
    renewal: RenewalClient,
    events: EventStream<ClientEvent>,
    single_flight: bool,
    in_flight: Arc<Mutex<Option<SharedRenewal>>>,
}

impl AuthorizedTransport {
    pub fn new(
        http: Arc<dyn HttpClient>,
        store: CredentialStore,
        renewal: RenewalClient,
        events: EventStream<ClientEvent>,
    ) -> Self {
        Self {
            http,
            store,
            renewal,
            events,
            single_flight: true,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// With `false`, every 401 starts its own renewal call even when another
    /// one is still pending.
    pub fn with_single_flight(mut self, single_flight: bool) -> Self {
        self.single_flight = single_flight;
        self
    }

    /// Send `request` with authorization.
    ///
    /// Returns every non-401 response as-is. A final 401 comes back as
    /// [`ClientError::Unauthorized`] carrying that response: the original
    /// one when renewal failed, the replay's when the new token was rejected
    /// too.
    pub async fn send(&self, request: HttpRequest) -> ClientResult<SimpleHttpResponse> {
        let mut pending = PendingRequest::new(request);

        let first = self.dispatch(&mut pending).await?;
        if !first.is_unauthorized() {
            pending.transition(RequestState::Success);
            return Ok(first);
        }

        pending.transition(RequestState::AuthFailed);
        info!(
            url = %pending.request.url,
            category = %ErrorCategory::TransientAuth,
            "Access token is expired or invalid"
        );
        pending.retried = true;
        pending.transition(RequestState::Renewing);

        if let Err(e) = self.renew().await {
            warn!(url = %pending.request.url, error = %e, "Renewal failed, giving up");
            pending.transition(RequestState::GivenUp);
            return Err(self.exhausted(&pending, first, false).await);
        }

        let replay = self.dispatch(&mut pending).await?;
        if !replay.is_unauthorized() {
            pending.transition(RequestState::Replayed);
            return Ok(replay);
        }

        pending.transition(RequestState::AuthFailed);
        warn!(url = %pending.request.url, "Replay rejected after renewal");
        pending.transition(RequestState::GivenUp);
        Err(self.exhausted(&pending, replay, true).await)
    }

    pub async fn get(&self, url: &str) -> ClientResult<SimpleHttpResponse> {
        self.send(HttpRequest::get(url)).await
    }

    pub async fn post_json<T: Serialize>(&self, url: &str, body: &T) -> ClientResult<SimpleHttpResponse> {
        let request = HttpRequest::post(url)
            .with_json(body)
            .map_err(|e| errors::decode(url, e))?;
        self.send(request).await
    }

    /// GET `url` and decode a 2xx JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> ClientResult<T> {
        let response = self.get(url).await?;
        if !response.is_success() {
            return Err(ClientError::UnexpectedStatus {
                url: url.to_string(),
                status: response.status(),
            });
        }
        response.json().map_err(|e| errors::decode(url, e))
    }

    /// Stamp from the store and send once
    async fn dispatch(&self, pending: &mut PendingRequest) -> ClientResult<SimpleHttpResponse> {
        self.stamp(&mut pending.request).await;
        pending.transition(RequestState::Sent);

        let response = self
            .http
            .execute(pending.request.clone())
            .await
            .map_err(|e| errors::transport(&pending.request.url, e))?;
        debug!(url = %pending.request.url, status = response.status(), "Response received");
        Ok(response)
    }

    async fn stamp(&self, request: &mut HttpRequest) {
        let authorization = http::header::AUTHORIZATION.as_str();
        match self.store.get().await {
            Some(token) => request.set_header(authorization, format!("Bearer {}", token)),
            None => request.remove_header(authorization),
        }
    }

    async fn renew(&self) -> ClientResult<String> {
        if !self.single_flight {
            return self.renewal.renew().await;
        }

        let (renewal, leader) = {
            let mut slot = self.in_flight.lock().await;
            match slot.as_ref() {
                Some(existing) if existing.peek().is_none() => {
                    debug!("Joining in-flight renewal");
                    (existing.clone(), false)
                }
                _ => {
                    let client = self.renewal.clone();
                    let started = async move { client.renew().await }.boxed().shared();
                    *slot = Some(started.clone());
                    (started, true)
                }
            }
        };

        let result = renewal.clone().await;

        if leader {
            let mut slot = self.in_flight.lock().await;
            if slot.as_ref().is_some_and(|s| s.ptr_eq(&renewal)) {
                *slot = None;
            }
        }
        result
    }

    async fn exhausted(
        &self,
        pending: &PendingRequest,
        response: SimpleHttpResponse,
        renewed: bool,
    ) -> ClientError {
        let url = pending.request.url.clone();
        self.events
            .publish(ClientEvent::AuthorizationExhausted { url: url.clone() })
            .await;
        ClientError::Unauthorized {
            url,
            response,
            renewed,
        }
    }
}
