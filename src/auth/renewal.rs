use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::auth::credential_store::CredentialStore;
use crate::error::{errors, ClientError, ClientResult};
use crate::events::{ClientEvent, EventStream};
use crate::http_client::{HttpClient, HttpRequest, SimpleHttpResponse};

/// Renewal endpoint; the refresh credential travels as a same-origin cookie
pub const REISSUE_PATH: &str = "/api/auth/reissue";
/// Response header carrying a freshly issued token
pub const ACCESS_HEADER: &str = "access";
/// Cookie holding the refresh credential
pub const REFRESH_COOKIE: &str = "refresh";

/// Pull the token out of a 200 response's `access` header
pub(crate) fn access_token_from(response: &SimpleHttpResponse, url: &str) -> ClientResult<String> {
    match response.header(ACCESS_HEADER) {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => Err(ClientError::MissingHeader {
            url: url.to_string(),
            header: ACCESS_HEADER.to_string(),
        }),
    }
}

/// Exchanges the refresh cookie for a new short-lived token.
///
/// One call to [`RenewalClient::renew`] is exactly one network request; it
/// never retries.
#[derive(Clone)]
pub struct RenewalClient {
    http: Arc<dyn HttpClient>,
    store: CredentialStore,
    reissue_url: String,
    events: EventStream<ClientEvent>,
}

impl RenewalClient {
    pub fn new(
        http: Arc<dyn HttpClient>,
        store: CredentialStore,
        reissue_url: impl Into<String>,
        events: EventStream<ClientEvent>,
    ) -> Self {
        Self {
            http,
            store,
            reissue_url: reissue_url.into(),
            events,
        }
    }

    /// Request a new token.
    ///
    /// On success the token is in the credential store before this returns.
    /// On failure the stored token is removed and the refresh cookie expired,
    /// so a reload cannot retry with a dead refresh credential.
    pub async fn renew(&self) -> ClientResult<String> {
        let url = self.reissue_url.as_str();
        debug!(url = %url, "Requesting token renewal");

        let outcome = match self.http.execute(HttpRequest::post(url)).await {
            Ok(response) if response.status() == http::StatusCode::OK.as_u16() => {
                access_token_from(&response, url)
            }
            Ok(response) => Err(ClientError::UnexpectedStatus {
                url: url.to_string(),
                status: response.status(),
            }),
            Err(e) => Err(errors::transport(url, e)),
        };

        // A token that cannot be stored is a failed renewal too
        let outcome = match outcome {
            Ok(token) => self.store.set(token.clone()).await.map(|()| token),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(token) => {
                info!("Token renewed");
                self.events.publish(ClientEvent::TokenRenewed).await;
                Ok(token)
            }
            Err(err) => {
                warn!(error = %err, "Token renewal failed");
                self.invalidate().await;
                self.events
                    .publish(ClientEvent::RenewalFailed {
                        reason: err.to_string(),
                    })
                    .await;
                Err(ClientError::RenewalFailed {
                    reason: err.to_string(),
                })
            }
        }
    }

    async fn invalidate(&self) {
        if let Err(e) = self.store.remove_token().await {
            error!(error = %e, "Failed to remove token after renewal failure");
        }
        self.http.expire_cookie(REFRESH_COOKIE);
    }
}
