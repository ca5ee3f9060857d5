//! Pipeline CRM API client

pub mod auth;
pub mod config;
pub mod error;
pub mod navigator;
pub mod refresh;
pub mod resources;
pub mod token_store;
pub mod transport;

pub use config::ClientConfig;
pub use error::{ClientError, StoreError, TransportError};
pub use navigator::{LogNavigator, Navigator, SessionEvent};
pub use refresh::{RefreshCoordinator, RefreshOutcome};
pub use resources::{ListQuery, Resource, ResourceClient};
pub use token_store::{FileStorage, MemoryStorage, TokenStorage, TokenStore};
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};

use crm_core::{Clock, Envelope, SystemClock};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Authenticated CRM API client
///
/// Attaches the stored access token to every request. A 401 hands the
/// session to the [`RefreshCoordinator`] and the request is replayed once
/// with whatever token it produces; a second 401 is returned to the caller.
#[derive(Clone)]
pub struct AuthClient {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    store: TokenStore,
    coordinator: RefreshCoordinator,
}

impl AuthClient {
    /// Create a new client builder
    pub fn builder() -> AuthClientBuilder {
        AuthClientBuilder::default()
    }

    /// Build a client from loaded configuration with a file-backed session
    pub fn from_config(
        config: &ClientConfig,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, ClientError> {
        let storage = FileStorage::in_dir(&config.data_dir())?;
        Self::builder()
            .base_url(config.base_url.clone())
            .timeout_opt(config.timeout())
            .user_agent(config.user_agent.clone())
            .storage(Arc::new(storage))
            .navigator(navigator)
            .build()
    }

    pub fn token_store(&self) -> &TokenStore {
        &self.inner.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.inner.coordinator
    }

    /// Send a request, recovering from an expired session once
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let sent_token = self.inner.store.access_token();
        let response = self.dispatch(request.clone(), sent_token.clone()).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        debug!(path = %request.path, "Request unauthorized, recovering session");
        let outcome = self.inner.coordinator.recover(sent_token.as_deref()).await;
        match outcome.token() {
            Some(token) => {
                // Replayed exactly once; a 401 here is final.
                let retry = self.dispatch(request, Some(token.to_string())).await?;
                if retry.is_unauthorized() {
                    warn!("Request still unauthorized after session recovery");
                }
                Ok(retry)
            }
            None => Err(ClientError::AuthenticationFailed(response.text())),
        }
    }

    /// Send a request and decode the envelope's `data`
    pub async fn execute<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ClientError> {
        let envelope: Envelope<T> = self.execute_envelope(request).await?;
        Ok(envelope.into_result()?)
    }

    /// Send a request and decode the envelope without interpreting it
    pub async fn execute_envelope<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<Envelope<T>, ClientError> {
        let response = self.send(request).await?;
        decode_envelope(&response)
    }

    async fn dispatch(
        &self,
        request: ApiRequest,
        token: Option<String>,
    ) -> Result<ApiResponse, ClientError> {
        let request = request.bearer(token);
        let method = request.method.clone();
        let path = request.path.clone();
        let response = self.inner.transport.send(request).await?;
        debug!(%method, %path, status = response.status, "CRM API response");
        Ok(response)
    }
}

/// Turn a response into an envelope, mapping error statuses to [`ClientError`]
pub(crate) fn decode_envelope<T: DeserializeOwned>(
    response: &ApiResponse,
) -> Result<Envelope<T>, ClientError> {
    if response.is_success() {
        return Ok(response.json()?);
    }
    if response.is_unauthorized() {
        return Err(ClientError::AuthenticationFailed(response.text()));
    }

    // Business failures usually carry an envelope; keep it intact for display.
    if let Ok(envelope) = response.json::<Envelope<serde_json::Value>>() {
        if let Err(mut failure) = envelope.into_unit_result() {
            failure.response_code = failure.response_code.or(Some(response.status));
            return Err(ClientError::Api(failure));
        }
    }
    Err(ClientError::from_status(response.status, response.text()))
}

/// Builder for [`AuthClient`]
#[derive(Default)]
pub struct AuthClientBuilder {
    base_url: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    storage: Option<Arc<dyn TokenStorage>>,
    navigator: Option<Arc<dyn Navigator>>,
    clock: Option<Arc<dyn Clock>>,
}

impl AuthClientBuilder {
    /// Set the base URL
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    fn timeout_opt(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the user agent
    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Use a custom transport instead of reqwest; `base_url` is then ignored
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Where the session is persisted (in memory by default)
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn TokenStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Where to send the user when the session ends
    #[must_use]
    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the client
    pub fn build(self) -> Result<AuthClient, ClientError> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => {
                let base_url = self
                    .base_url
                    .ok_or_else(|| ClientError::Configuration("base_url is required".into()))?;
                Arc::new(ReqwestTransport::new(
                    base_url,
                    self.timeout,
                    self.user_agent,
                )?)
            }
        };
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let navigator = self.navigator.unwrap_or_else(|| Arc::new(LogNavigator));

        let store = TokenStore::new(storage, clock);
        let coordinator = RefreshCoordinator::new(store.clone(), transport.clone(), navigator);

        Ok(AuthClient {
            inner: Arc::new(Inner {
                transport,
                store,
                coordinator,
            }),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use chrono::Duration as ChronoDuration;
    use futures::future::join_all;
    use serde_json::{Value, json};

    const LEADS: &str = "/leads";

    /// Leads answer 200 only for `accepted`, otherwise 401
    fn leads_accepting(accepted: &'static str) -> impl Fn(&ApiRequest) -> ApiResponse {
        move |request| {
            if request.bearer.as_deref() == Some(accepted) {
                ok_body(json!([{"id": 1, "company": "Acme"}]))
            } else {
                ApiResponse::new(401, "")
            }
        }
    }

    fn client_for(
        transport: Arc<FakeTransport>,
        store: &TokenStore,
        redirects: usize,
    ) -> AuthClient {
        let mut navigator = MockNav::new();
        navigator
            .expect_redirect_to_sign_in()
            .times(redirects)
            .return_const(());
        AuthClient {
            inner: Arc::new(Inner {
                transport: transport.clone(),
                store: store.clone(),
                coordinator: RefreshCoordinator::new(
                    store.clone(),
                    transport,
                    Arc::new(navigator),
                ),
            }),
        }
    }

    #[tokio::test]
    async fn attaches_bearer_when_token_present() {
        let (store, _clock) = seeded_store("tok", ChronoDuration::hours(1));
        let transport = Arc::new(FakeTransport::new(|_| Ok(ok_body(json!([])))));
        let client = client_for(transport.clone(), &store, 0);

        let _: Value = client.execute(ApiRequest::get(LEADS)).await.unwrap();

        assert_eq!(transport.calls_to(LEADS)[0].bearer.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn unauthenticated_call_has_no_bearer() {
        let store = TokenStore::in_memory();
        let transport = Arc::new(FakeTransport::new(|_| Ok(ok_body(json!([])))));
        let client = client_for(transport.clone(), &store, 0);

        let _: Value = client.execute(ApiRequest::get(LEADS)).await.unwrap();

        assert!(transport.calls_to(LEADS)[0].bearer.is_none());
    }

    #[tokio::test]
    async fn concurrent_unauthorized_requests_share_one_refresh() {
        let (store, _clock) = seeded_store("old", ChronoDuration::minutes(-1));
        let leads = leads_accepting("new");
        let transport = Arc::new(FakeTransport::gated(move |request| {
            if request.path == refresh::REFRESH_PATH {
                Ok(auth_payload_body("new", 3600))
            } else {
                Ok(leads(request))
            }
        }));
        let client = client_for(transport.clone(), &store, 0);

        let calls: Vec<_> = (0..5)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.execute::<Value>(ApiRequest::get(LEADS)).await })
            })
            .collect();

        transport.wait_for_calls(refresh::REFRESH_PATH, 1).await;
        while client.coordinator().pending_len() < 4 {
            tokio::task::yield_now().await;
        }
        transport.release();

        for result in join_all(calls).await {
            assert_eq!(result.unwrap().unwrap()[0]["company"], "Acme");
        }
        assert_eq!(transport.calls_to(refresh::REFRESH_PATH).len(), 1);
        assert_eq!(client.coordinator().pending_len(), 0);
        assert!(!client.coordinator().is_refreshing());
        assert_eq!(transport.calls_to(LEADS).len(), 10);
    }

    #[tokio::test]
    async fn second_unauthorized_is_final() {
        let (store, _clock) = seeded_store("old", ChronoDuration::minutes(-1));
        let transport = Arc::new(FakeTransport::new(|request| {
            if request.path == refresh::REFRESH_PATH {
                Ok(auth_payload_body("new", 3600))
            } else {
                Ok(ApiResponse::new(401, "still no"))
            }
        }));
        let client = client_for(transport.clone(), &store, 0);

        let result = client.execute::<Value>(ApiRequest::get(LEADS)).await;

        assert!(matches!(result, Err(ClientError::AuthenticationFailed(_))));
        assert_eq!(transport.calls_to(LEADS).len(), 2);
        assert_eq!(transport.calls_to(refresh::REFRESH_PATH).len(), 1);
    }

    #[tokio::test]
    async fn refresh_outage_before_expiry_replays_with_old_token() {
        let (store, _clock) = seeded_store("old", ChronoDuration::minutes(10));
        let first_call = std::sync::Mutex::new(true);
        let transport = Arc::new(FakeTransport::new(move |request| {
            if request.path == refresh::REFRESH_PATH {
                return Ok(ApiResponse::new(500, "refresh down"));
            }
            // The first call is rejected, the replay with the same token succeeds.
            let mut first = first_call.lock().unwrap();
            if std::mem::take(&mut *first) {
                Ok(ApiResponse::new(401, ""))
            } else {
                Ok(ok_body(json!({"id": 7})))
            }
        }));
        let client = client_for(transport.clone(), &store, 0);

        let lead: Value = client.execute(ApiRequest::get("/leads/7")).await.unwrap();

        assert_eq!(lead["id"], 7);
        let replays = transport.calls_to("/leads/7");
        assert_eq!(replays.len(), 2);
        assert_eq!(replays[1].bearer.as_deref(), Some("old"));
        assert_eq!(store.access_token().as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn definitive_failure_clears_session_and_redirects_once() {
        let (store, _clock) = seeded_store("old", ChronoDuration::minutes(-5));
        let transport = Arc::new(FakeTransport::gated(|request| {
            if request.path == refresh::REFRESH_PATH {
                Ok(ApiResponse::new(500, ""))
            } else {
                Ok(ApiResponse::new(401, ""))
            }
        }));
        let client = client_for(transport.clone(), &store, 1);

        let calls: Vec<_> = (0..3)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.execute::<Value>(ApiRequest::get(LEADS)).await })
            })
            .collect();
        transport.wait_for_calls(refresh::REFRESH_PATH, 1).await;
        while client.coordinator().pending_len() < 2 {
            tokio::task::yield_now().await;
        }
        transport.release();

        for result in join_all(calls).await {
            assert!(result.unwrap().unwrap_err().is_auth_expired());
        }
        assert!(!store.has_session());
        assert!(store.user().is_none());
        assert_eq!(transport.calls_to(LEADS).len(), 3);
        assert_eq!(transport.calls_to(refresh::REFRESH_PATH).len(), 1);
        assert!(!client.coordinator().is_refreshing());
        assert_eq!(client.coordinator().pending_len(), 0);
    }

    #[tokio::test]
    async fn business_failure_is_returned_untouched() {
        let (store, _clock) = seeded_store("tok", ChronoDuration::hours(1));
        let transport = Arc::new(FakeTransport::new(|_| {
            Ok(ApiResponse::new(
                400,
                json!({
                    "isSuccess": false,
                    "message": "Validation failed",
                    "errors": ["Company is required"],
                })
                .to_string(),
            ))
        }));
        let client = client_for(transport, &store, 0);

        let err = client
            .execute::<Value>(ApiRequest::post(LEADS).with_body(json!({})))
            .await
            .unwrap_err();

        match err {
            ClientError::Api(failure) => {
                assert_eq!(failure.response_code, Some(400));
                assert_eq!(failure.errors, vec!["Company is required".to_string()]);
            }
            other => panic!("expected API failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn network_failure_is_a_structured_error() {
        let store = TokenStore::in_memory();
        let transport = Arc::new(FakeTransport::new(|_| {
            Err(TransportError::Unavailable("connection refused".into()))
        }));
        let client = client_for(transport, &store, 0);

        let err = client
            .execute::<Value>(ApiRequest::get(LEADS))
            .await
            .unwrap_err();
        assert!(err.is_network());
    }

    #[test]
    fn builder_requires_base_url_without_transport() {
        assert!(matches!(
            AuthClient::builder().build(),
            Err(ClientError::Configuration(_))
        ));
    }
}
