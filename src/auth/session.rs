use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::alert::AlertQueue;
use crate::auth::credential_store::CredentialStore;
use crate::auth::renewal::{access_token_from, REFRESH_COOKIE};
use crate::auth::transport::AuthorizedTransport;
use crate::config::ApiConfig;
use crate::error::{errors, ClientError, ClientResult};
use crate::events::{ClientEvent, EventStream, LogoutReason};
use crate::http_client::{HttpClient, HttpRequest, SimpleHttpResponse};

/// Authenticated "who am I" endpoint
pub const PROFILE_PATH: &str = "/api/member/me";
/// Email/password login endpoint
pub const LOGIN_PATH: &str = "/api/auth/login";
/// Logout endpoint; the backend drops the refresh credential
pub const LOGOUT_PATH: &str = "/api/auth/logout";
/// Token hand-off endpoint hit after an OAuth2 redirect
pub const OAUTH_TOKEN_PATH: &str = "/api/oauth2-jwt-header";

/// Query parameters an OAuth2 redirect seeds into the local cache
const OAUTH_SEED_KEYS: [&str; 3] = ["name", "nickname", "role"];

/// Cached profile of the signed-in member. All fields are opaque strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, deserialize_with = "opaque_string")]
    pub id: String,
    #[serde(default, deserialize_with = "opaque_string")]
    pub name: String,
    #[serde(default, deserialize_with = "opaque_string")]
    pub nickname: String,
    #[serde(default, deserialize_with = "opaque_string")]
    pub role: String,
}

/// Accept strings, numbers, or null and keep them as text
fn opaque_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// What the UI observes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Session {
    pub is_logged_in: bool,
    pub profile: Profile,
}

/// Result of checking a route against the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationDecision {
    Proceed,
    RedirectToLogin,
}

/// Result of completing an OAuth2 redirect. The host navigates to the
/// landing view in both cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthOutcome {
    LoggedIn,
    Rejected,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Logged-in flag plus cached profile, published through a watch channel.
///
/// `is_logged_in == true` implies a token was in the credential store when
/// the flag was set.
#[derive(Clone)]
pub struct SessionState {
    state: Arc<watch::Sender<Session>>,
    store: CredentialStore,
    transport: AuthorizedTransport,
    http: Arc<dyn HttpClient>,
    api: ApiConfig,
    events: EventStream<ClientEvent>,
    alerts: AlertQueue,
}

impl SessionState {
    pub async fn new(
        store: CredentialStore,
        transport: AuthorizedTransport,
        http: Arc<dyn HttpClient>,
        api: ApiConfig,
        events: EventStream<ClientEvent>,
        alerts: AlertQueue,
    ) -> Self {
        let initial = Self::snapshot(&store).await;
        let (state, _) = watch::channel(initial);
        Self {
            state: Arc::new(state),
            store,
            transport,
            http,
            api,
            events,
            alerts,
        }
    }

    async fn snapshot(store: &CredentialStore) -> Session {
        Session {
            is_logged_in: store.get().await.is_some(),
            profile: store.profile().await,
        }
    }

    /// Observe session changes
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    pub fn current(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.borrow().is_logged_in
    }

    pub fn profile(&self) -> Profile {
        self.state.borrow().profile.clone()
    }

    /// Re-derive the session from persisted state, discarding whatever is
    /// held in memory
    pub async fn reload_from_store(&self) {
        let session = Self::snapshot(&self.store).await;
        debug!(is_logged_in = session.is_logged_in, "Session reloaded from store");
        self.state.send_replace(session);
    }

    /// Set the logged-in flag. Setting it to `true` without a stored token is
    /// refused. Returns the flag's value afterwards.
    pub async fn set_logged_in(&self, logged_in: bool) -> bool {
        if logged_in && self.store.get().await.is_none() {
            warn!("Refusing to mark session logged in without a token");
            return self.is_logged_in();
        }

        let previous = self.state.send_replace(Session {
            is_logged_in: logged_in,
            ..self.current()
        });
        let was_logged_in = previous.is_logged_in;

        if logged_in && !was_logged_in {
            self.events.publish(ClientEvent::LoggedIn).await;
        }
        logged_in
    }

    /// Fetch the signed-in member's profile through the authorized
    /// transport and cache it. On failure the previous profile stays.
    pub async fn fetch_profile(&self) -> ClientResult<Profile> {
        let url = self.api.url(PROFILE_PATH);
        let profile = match self.transport.get_json::<Profile>(&url).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(error = %e, status = ?e.status(), "Error fetching profile");
                return Err(e);
            }
        };

        self.store.store_profile(&profile).await?;
        self.state.send_modify(|s| s.profile = profile.clone());
        debug!(id = %profile.id, nickname = %profile.nickname, "Profile updated");
        self.events.publish(ClientEvent::ProfileUpdated).await;
        Ok(profile)
    }

    /// Reset everything: profile, flag, and credential store. Calling it
    /// again changes nothing.
    pub async fn force_logout(&self, reason: LogoutReason) -> ClientResult<()> {
        let was_active = self.is_logged_in() || self.store.get().await.is_some();

        self.state.send_replace(Session::default());
        self.store.clear().await?;

        if was_active {
            info!(reason = ?reason, "Session ended");
            self.events.publish(ClientEvent::LoggedOut { reason }).await;
        }
        Ok(())
    }

    /// Sign in with email and password
    pub async fn login(&self, email: &str, password: &str) -> ClientResult<Profile> {
        let url = self.api.url(LOGIN_PATH);
        let request = HttpRequest::post(&url)
            .with_json(&LoginRequest { email, password })
            .map_err(|e| errors::decode(&url, e))?;

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| errors::transport(&url, e))?;

        if response.status() != http::StatusCode::OK.as_u16() {
            let message = error_message(&response);
            warn!(status = response.status(), message = %message, "Login rejected");
            return Err(ClientError::LoginRejected {
                status: response.status(),
                message,
            });
        }

        let token = access_token_from(&response, &url)?;
        self.store.set(token).await?;
        info!("Logged in");

        // A missing profile does not undo a successful login, a revoked token does
        let fetched = self.fetch_profile().await;
        if !self.set_logged_in(true).await {
            warn!("Token was revoked before the session started");
            self.force_logout(LogoutReason::RenewalExhausted).await?;
            return Err(match fetched {
                Err(e) => e,
                Ok(_) => ClientError::LoginRejected {
                    status: http::StatusCode::UNAUTHORIZED.as_u16(),
                    message: "token revoked".to_string(),
                },
            });
        }
        Ok(self.profile())
    }

    /// Sign out. Local state is cleared even when the backend call fails.
    pub async fn logout(&self) -> ClientResult<()> {
        let url = self.api.url(LOGOUT_PATH);
        match self.http.execute(HttpRequest::post(&url)).await {
            Ok(response) if response.is_success() => debug!("Backend logout acknowledged"),
            Ok(response) => warn!(status = response.status(), "Backend logout failed"),
            Err(e) => warn!(error = %e, "Backend logout unreachable"),
        }

        self.http.expire_cookie(REFRESH_COOKIE);
        self.force_logout(LogoutReason::UserRequested).await
    }

    /// Finish an OAuth2 login: trade the refresh cookie for a token, seed
    /// the profile cache from the redirect's query string, then fetch the
    /// full profile.
    pub async fn complete_oauth_redirect(&self, query: &str) -> ClientResult<OAuthOutcome> {
        let url = self.api.url(OAUTH_TOKEN_PATH);
        let response = self
            .http
            .execute(HttpRequest::post(&url))
            .await
            .map_err(|e| errors::transport(&url, e))?;

        if response.status() != http::StatusCode::OK.as_u16() {
            warn!(status = response.status(), "OAuth2 token hand-off rejected");
            self.alerts.error(crate::ACCESS_DENIED_MESSAGE).await;
            return Ok(OAuthOutcome::Rejected);
        }

        let token = access_token_from(&response, &url)?;
        self.store.set(token).await?;

        let params: HashMap<String, String> =
            url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
                .into_owned()
                .collect();
        for key in OAUTH_SEED_KEYS {
            let value = params.get(key).cloned().unwrap_or_default();
            self.store.set_field(key, value).await?;
        }
        let seeded = self.store.profile().await;
        self.state.send_modify(|s| s.profile = seeded);

        let _ = self.fetch_profile().await;
        if !self.set_logged_in(true).await {
            warn!("OAuth2 token was revoked before the session started");
            self.force_logout(LogoutReason::RenewalExhausted).await?;
            self.alerts.error(crate::ACCESS_DENIED_MESSAGE).await;
            return Ok(OAuthOutcome::Rejected);
        }
        Ok(OAuthOutcome::LoggedIn)
    }

    /// Decide whether a route may be shown
    pub fn authorize_navigation(&self, requires_auth: bool) -> NavigationDecision {
        if requires_auth && !self.is_logged_in() {
            NavigationDecision::RedirectToLogin
        } else {
            NavigationDecision::Proceed
        }
    }
}

/// The backend reports errors as `{"message": ...}`; fall back to the body
fn error_message(response: &SimpleHttpResponse) -> String {
    response
        .json::<Value>()
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| response.body().to_string())
}
