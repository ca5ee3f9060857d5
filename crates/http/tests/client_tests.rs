//! Integration tests for the CRM HTTP client against a mock API

use chrono::Duration;
use crm_core::{SessionTokens, SystemClock, UserProfile};
use crm_http::client::{
    AuthClient, ClientError, ListQuery, MemoryStorage, Navigator, Resource, TokenStore,
};
use futures::future::join_all;
use serde_json::{Value, json};
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mockall::mock! {
    pub Nav {}

    impl Navigator for Nav {
        fn redirect_to_sign_in(&self);
    }
}

fn navigator(redirects: usize) -> Arc<MockNav> {
    let mut navigator = MockNav::new();
    navigator
        .expect_redirect_to_sign_in()
        .times(redirects)
        .return_const(());
    Arc::new(navigator)
}

fn auth_body(token: &str) -> Value {
    json!({
        "isSuccess": true,
        "message": "Success",
        "data": {
            "token": token,
            "refreshToken": format!("{token}-refresh"),
            "expiresIn": 3600,
            "email": "ana@example.com",
            "userId": "42",
            "firstName": "Ana",
            "lastName": "Lima"
        },
        "errors": [],
        "responseCode": 200
    })
}

fn leads_body() -> Value {
    json!({
        "isSuccess": true,
        "message": "Success",
        "data": [{"id": 1, "company": "Acme"}],
        "errors": [],
        "responseCode": 200
    })
}

/// Memory storage holding a session for `token` that expires `expires_in` from now
fn seeded_storage(token: &str, expires_in: Duration) -> Arc<MemoryStorage> {
    let storage = Arc::new(MemoryStorage::new());
    let store = TokenStore::new(storage.clone(), Arc::new(SystemClock));
    store
        .save_session(
            &SessionTokens {
                access_token: token.to_string(),
                refresh_token: format!("{token}-refresh"),
                expires_at: store.now() + expires_in,
            },
            &UserProfile {
                email: "ana@example.com".into(),
                user_id: "42".into(),
                first_name: None,
                last_name: None,
            },
        )
        .unwrap();
    storage
}

fn client(server: &MockServer, storage: Arc<MemoryStorage>, redirects: usize) -> AuthClient {
    AuthClient::builder()
        .base_url(server.uri())
        .storage(storage)
        .navigator(navigator(redirects))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_login_populates_session() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_partial_json(json!({"email": "ana@example.com"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("access-1")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let client = client(&mock_server, storage.clone(), 0);

    let user = client.login("ana@example.com", "secret").await.unwrap();

    assert_eq!(user.user_id, "42");
    let store = TokenStore::new(storage, Arc::new(SystemClock));
    assert_eq!(store.access_token().as_deref(), Some("access-1"));
    assert_eq!(store.refresh_token().as_deref(), Some("access-1-refresh"));
    assert_eq!(store.user().map(|u| u.email), Some("ana@example.com".into()));
    assert!(!store.is_expired());
    assert!(client.is_authenticated());
}

#[tokio::test]
async fn test_concurrent_expired_calls_refresh_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/leads"))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/leads"))
        .and(header("authorization", "Bearer new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(leads_body()))
        .expect(3)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/refresh-token"))
        .and(body_partial_json(json!({"refreshToken": "old-refresh"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(auth_body("new"))
                .set_delay(std::time::Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server, seeded_storage("old", Duration::minutes(-1)), 0);

    let results = join_all((0..3).map(|_| {
        let client = client.clone();
        async move {
            client
                .resource(Resource::Leads)
                .list(&ListQuery::default())
                .await
        }
    }))
    .await;

    for result in results {
        assert_eq!(result.unwrap()[0]["company"], "Acme");
    }
    assert_eq!(client.token_store().access_token().as_deref(), Some("new"));
    assert!(client.is_authenticated());
}

#[tokio::test]
async fn test_refresh_outage_keeps_unexpired_session() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/opportunities/9"))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/opportunities/9"))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "isSuccess": true,
            "data": {"id": 9, "stage": "Negotiation"}
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/refresh-token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server, seeded_storage("old", Duration::minutes(10)), 0);
    let opportunities = client.resource(Resource::Opportunities);

    let first = opportunities.get("9").await.unwrap();
    let second = opportunities.get("9").await.unwrap();

    assert_eq!(first["stage"], "Negotiation");
    assert_eq!(second["id"], 9);
    assert!(client.is_authenticated());
    assert_eq!(client.token_store().access_token().as_deref(), Some("old"));
}

#[tokio::test]
async fn test_refresh_failure_after_expiry_logs_out_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/invoices"))
        .respond_with(ResponseTemplate::new(401))
        .expect(3)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/refresh-token"))
        .respond_with(ResponseTemplate::new(502).set_delay(std::time::Duration::from_millis(100)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server, seeded_storage("old", Duration::minutes(-1)), 1);

    let results = join_all((0..3).map(|_| {
        let client = client.clone();
        async move {
            client
                .resource(Resource::Invoices)
                .list(&ListQuery::default())
                .await
        }
    }))
    .await;

    for result in results {
        assert!(matches!(result, Err(ClientError::AuthenticationFailed(_))));
    }
    assert!(!client.token_store().has_session());
    assert!(client.current_user().is_none());
    assert!(!client.is_authenticated());
    assert!(!client.coordinator().is_refreshing());
    assert_eq!(client.coordinator().pending_len(), 0);
}

#[tokio::test]
async fn test_logout_with_server_unreachable() {
    // Bind and release a port so nothing is listening on it.
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();

    let storage = seeded_storage("tok", Duration::hours(1));
    let client = AuthClient::builder()
        .base_url(format!("http://{addr}"))
        .storage(storage.clone())
        .navigator(navigator(1))
        .build()
        .unwrap();

    client.logout().await.unwrap();

    let store = TokenStore::new(storage, Arc::new(SystemClock));
    assert!(!store.has_session());
    assert!(store.user().is_none());
    assert!(store.expires_at().is_none());
}

#[tokio::test]
async fn test_logout_notifies_server() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/logout"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"isSuccess": true, "data": true})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server, seeded_storage("tok", Duration::hours(1)), 1);

    client.logout().await.unwrap();

    assert!(!client.is_authenticated());
}

#[tokio::test]
async fn test_list_sends_paging_and_search() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/leads"))
        .and(query_param("page", "2"))
        .and(query_param("pageSize", "25"))
        .and(query_param("search", "acme"))
        .respond_with(ResponseTemplate::new(200).set_body_json(leads_body()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server, seeded_storage("tok", Duration::hours(1)), 0);

    let leads = client
        .resource(Resource::Leads)
        .list(&ListQuery {
            page: Some(2),
            page_size: Some(25),
            search: Some("acme".into()),
        })
        .await
        .unwrap();

    assert_eq!(leads.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_validation_failure_propagates() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/proposals"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "isSuccess": false,
            "message": "Validation failed",
            "data": null,
            "errors": ["Amount must be positive"],
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("unused")))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server, seeded_storage("tok", Duration::hours(1)), 0);

    let err = client
        .resource(Resource::Proposals)
        .create(json!({"amount": -1}))
        .await
        .unwrap_err();

    match err {
        ClientError::Api(failure) => {
            assert_eq!(failure.response_code, Some(422));
            assert_eq!(failure.summary(), "Validation failed: Amount must be positive");
        }
        other => panic!("expected API failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_delete_accepts_empty_data() {
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/contracts/c-17"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"isSuccess": true})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server, seeded_storage("tok", Duration::hours(1)), 0);

    client
        .resource(Resource::Contracts)
        .delete("c-17")
        .await
        .unwrap();
}
