//! Listen-Key Lifecycle Integration Tests
//!
//! Drives the REST client against an in-process mock of the listen-key
//! endpoints: creation, keepalive, revocation, local validation, and the
//! ban-risk handling for HTTP 429.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use tokio::net::TcpListener;

use binance_stream_manager::{
    AccountType, EndpointOverrides, Endpoints, Environment, ListenKeyClient, ListenKeyError,
};

/// Call counters and captured parameters for the mock endpoints.
#[derive(Debug)]
struct MockExchange {
    create_calls: AtomicUsize,
    keepalive_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    last_symbol: parking_lot::Mutex<Option<String>>,
    keepalive_status: StatusCode,
}

impl MockExchange {
    fn new(keepalive_status: StatusCode) -> Self {
        Self {
            create_calls: AtomicUsize::new(0),
            keepalive_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            last_symbol: parking_lot::Mutex::new(None),
            keepalive_status,
        }
    }
}

async fn create_handler(
    State(state): State<Arc<MockExchange>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    state.create_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_symbol.lock() = params.get("symbol").cloned();

    (
        StatusCode::OK,
        [("x-mbx-used-weight-1m", "5")],
        Json(serde_json::json!({"listenKey": "mock-listen-key"})),
    )
}

async fn keepalive_handler(State(state): State<Arc<MockExchange>>) -> impl IntoResponse {
    state.keepalive_calls.fetch_add(1, Ordering::SeqCst);

    (
        state.keepalive_status,
        [("x-mbx-used-weight-1m", "7")],
        Json(serde_json::json!({})),
    )
}

async fn delete_handler(State(state): State<Arc<MockExchange>>) -> impl IntoResponse {
    state.delete_calls.fetch_add(1, Ordering::SeqCst);
    (StatusCode::OK, Json(serde_json::json!({})))
}

/// Bind the mock exchange on an ephemeral port; returns its base URL.
async fn spawn_mock_exchange(
    keepalive_status: StatusCode,
) -> (String, Arc<MockExchange>, tokio::task::JoinHandle<()>) {
    let state = Arc::new(MockExchange::new(keepalive_status));

    let app = Router::new()
        .route(
            "/api/v3/userDataStream",
            post(create_handler)
                .put(keepalive_handler)
                .delete(delete_handler),
        )
        .route(
            "/sapi/v1/userDataStream/isolated",
            post(create_handler)
                .put(keepalive_handler)
                .delete(delete_handler),
        )
        .with_state(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), state, handle)
}

fn make_client(account_type: AccountType, rest_base: &str) -> ListenKeyClient {
    let endpoints =
        Endpoints::resolve(account_type, Environment::Production).with_overrides(&EndpointOverrides {
            ws_base: None,
            rest_base: Some(rest_base.to_string()),
        });
    ListenKeyClient::new(endpoints, "test-api-key", Duration::from_secs(3600)).unwrap()
}

// =============================================================================
// Create
// =============================================================================

#[tokio::test]
async fn create_returns_a_session_and_records_status() {
    let (base, state, server) = spawn_mock_exchange(StatusCode::OK).await;
    let client = make_client(AccountType::Spot, &base);

    let session = client.create(None).await.unwrap();
    assert_eq!(session.listen_key(), "mock-listen-key");
    assert!(!session.is_expired());

    assert_eq!(state.create_calls.load(Ordering::SeqCst), 1);

    let snapshot = client.status().snapshot();
    assert_eq!(snapshot.last_status, Some(200));
    assert_eq!(snapshot.last_used_weight, Some(5));
    assert!(!snapshot.ban_risk);
    assert!(snapshot.last_call_at.is_some());

    server.abort();
}

#[tokio::test]
async fn isolated_margin_without_symbol_makes_no_http_call() {
    let (base, state, server) = spawn_mock_exchange(StatusCode::OK).await;
    let client = make_client(AccountType::IsolatedMargin, &base);

    let result = client.create(None).await;
    assert!(matches!(result, Err(ListenKeyError::MissingSymbol)));

    // Local validation: the mock exchange never saw a request.
    assert_eq!(state.create_calls.load(Ordering::SeqCst), 0);
    assert!(client.status().snapshot().last_status.is_none());

    server.abort();
}

#[tokio::test]
async fn isolated_margin_with_symbol_sends_it() {
    let (base, state, server) = spawn_mock_exchange(StatusCode::OK).await;
    let client = make_client(AccountType::IsolatedMargin, &base);

    let session = client.create(Some("BTCUSDT")).await.unwrap();
    assert_eq!(session.listen_key(), "mock-listen-key");

    assert_eq!(state.create_calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.last_symbol.lock().as_deref(), Some("BTCUSDT"));

    server.abort();
}

// =============================================================================
// Keepalive
// =============================================================================

#[tokio::test]
async fn keepalive_round_trip() {
    let (base, state, server) = spawn_mock_exchange(StatusCode::OK).await;
    let client = make_client(AccountType::Spot, &base);

    let session = client.create(None).await.unwrap();
    client.keepalive(session.listen_key()).await.unwrap();

    assert_eq!(state.keepalive_calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.status().snapshot().last_used_weight, Some(7));

    server.abort();
}

#[tokio::test]
async fn keepalive_429_is_returned_not_panicked() {
    let (base, state, server) = spawn_mock_exchange(StatusCode::TOO_MANY_REQUESTS).await;
    let client = make_client(AccountType::Spot, &base);

    let result = client.keepalive("mock-listen-key").await;
    assert!(matches!(
        result,
        Err(ListenKeyError::BanRisk { status: 429 })
    ));

    // The call was made, recorded, and flagged; backing off is the
    // caller's decision.
    assert_eq!(state.keepalive_calls.load(Ordering::SeqCst), 1);
    let snapshot = client.status().snapshot();
    assert_eq!(snapshot.last_status, Some(429));
    assert!(snapshot.ban_risk);

    server.abort();
}

// =============================================================================
// Delete
// =============================================================================

#[tokio::test]
async fn delete_revokes_the_key() {
    let (base, state, server) = spawn_mock_exchange(StatusCode::OK).await;
    let client = make_client(AccountType::Spot, &base);

    let session = client.create(None).await.unwrap();
    client.delete(session.listen_key()).await.unwrap();

    assert_eq!(state.delete_calls.load(Ordering::SeqCst), 1);

    server.abort();
}

#[tokio::test]
async fn repeated_stop_issues_a_single_delete() {
    use binance_stream_manager::{
        BinanceNormalizer, ListenKeySession, OutputFormat, StreamDescriptor, StreamRegistry,
        StreamSupervisor, WebSocketSettings,
    };
    use tokio_util::sync::CancellationToken;

    let (base, state, server) = spawn_mock_exchange(StatusCode::OK).await;
    let client = Arc::new(make_client(AccountType::Spot, &base));

    let registry = Arc::new(StreamRegistry::new());
    let supervisor = StreamSupervisor::new(
        Arc::clone(&registry),
        Some(client),
        Arc::new(BinanceNormalizer::new()),
        WebSocketSettings::default(),
        EndpointOverrides::default(),
        CancellationToken::new(),
    );

    let descriptor = StreamDescriptor::user_data(AccountType::Spot, OutputFormat::RawText);
    let stream_id = registry.register(descriptor);
    registry.set_listen_key(stream_id, ListenKeySession::new("mock-listen-key"));

    // First stop revokes the key; the second finds nothing left to do.
    assert!(supervisor.stop_stream(stream_id).await);
    assert!(!supervisor.stop_stream(stream_id).await);

    assert_eq!(state.delete_calls.load(Ordering::SeqCst), 1);

    server.abort();
}

// =============================================================================
// Error Statuses
// =============================================================================

#[tokio::test]
async fn unexpected_status_fails_closed() {
    let (base, _state, server) = spawn_mock_exchange(StatusCode::INTERNAL_SERVER_ERROR).await;
    let client = make_client(AccountType::Spot, &base);

    let result = client.keepalive("mock-listen-key").await;
    assert!(matches!(
        result,
        Err(ListenKeyError::Status { status: 500, .. })
    ));

    server.abort();
}
