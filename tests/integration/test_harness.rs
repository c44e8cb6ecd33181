//! Shared setup for integration tests

use std::sync::Arc;

use dailog_session::{ClientContext, Config, CredentialStore, ReqwestHttpClient};
use mockito::{Server, ServerGuard};

/// A mock backend plus a client context pointed at it
pub struct TestEnvironment {
    pub server: ServerGuard,
    pub http: Arc<ReqwestHttpClient>,
    pub ctx: ClientContext,
}

impl TestEnvironment {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Build an environment after letting the test adjust the config
    pub async fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let server = Server::new_async().await;
        let mut config = Config::in_memory(server.url());
        adjust(&mut config);

        let http = Arc::new(
            ReqwestHttpClient::new(&config.api.base_url).expect("failed to build client"),
        );
        let ctx = ClientContext::from_parts(config, http.clone(), CredentialStore::in_memory()).await;

        Self { server, http, ctx }
    }

    /// Pretend a previous login left `token` behind
    pub async fn logged_in_with(&self, token: &str) {
        self.ctx.store.set(token).await.expect("failed to store token");
        assert!(self.ctx.session.set_logged_in(true).await);
    }

    pub fn url(&self, path: &str) -> String {
        self.ctx.url(path)
    }

    pub async fn count_events(&self, event_type: &str) -> usize {
        self.ctx.events.count_of(event_type).await
    }
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}
