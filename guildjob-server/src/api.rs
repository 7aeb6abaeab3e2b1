use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use guildjob_models::{interaction_type, InteractionRequest, InteractionResponse};
use guildjob_operator::dispatch::Dispatcher;
use guildjob_operator::verify::{SignatureHeaders, SignatureVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;

/// Shared API state
#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<SignatureVerifier>,
    pub dispatcher: Dispatcher,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/webhook", post(handle_interaction))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves
pub async fn start_server(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
    drain: Duration,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("✓ Webhook server listening on {}", addr);
    serve(listener, state, shutdown, drain).await
}

/// Serve on `listener` until `shutdown` resolves
///
/// Open connections and in-flight dispatches then share one `drain` window;
/// whatever is still running when it elapses is dropped.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
    drain: Duration,
) -> Result<()> {
    let dispatcher = state.dispatcher.clone();
    let app = create_router(state);

    let (draining_tx, draining_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            let _ = draining_tx.send(());
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => return result.context("Server error"),
        _ = draining_rx => {}
    }

    let deadline = Instant::now() + drain;
    tracing::info!("Draining open connections for up to {:?}", drain);
    match tokio::time::timeout_at(deadline, server).await {
        Ok(result) => result.context("Server error")?,
        Err(_) => tracing::warn!("Drain window elapsed, dropping remaining connections"),
    }

    let pending = dispatcher.in_flight();
    if pending > 0 {
        tracing::info!(pending, "Waiting for in-flight dispatches");
    }
    if !dispatcher.drain(deadline.saturating_duration_since(Instant::now())).await {
        tracing::warn!(
            pending = dispatcher.in_flight(),
            "Drain window elapsed with dispatches still running"
        );
    }

    Ok(())
}

// ============================================================================
// Health Check
// ============================================================================

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "guildjob",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ============================================================================
// Interactions
// ============================================================================

async fn handle_interaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let signature = match headers.get(SIGNATURE_HEADER) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| AppError::Internal("signature header is not ASCII".to_string()))?,
        ),
        None => None,
    };
    let timestamp = headers
        .get(TIMESTAMP_HEADER)
        .map(|value| value.as_bytes())
        .unwrap_or_default();

    let verified = state
        .verifier
        .verify(SignatureHeaders { signature, timestamp }, &body)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    if !verified {
        return Err(AppError::Unauthorized);
    }

    let request: InteractionRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::Internal(format!("invalid interaction payload: {}", e)))?;

    match request.kind {
        interaction_type::PING => Ok(Json(InteractionResponse::pong()).into_response()),
        interaction_type::APPLICATION_COMMAND => {
            tracing::info!(
                guild_id = %request.guild_id,
                interaction_id = %request.id,
                "Received application command"
            );
            // The dispatcher keeps tracking the task; shutdown drains it
            state.dispatcher.dispatch(request);
            Ok(Json(InteractionResponse::deferred()).into_response())
        }
        other => {
            tracing::info!(kind = other, "Ignoring unexpected interaction type");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
enum AppError {
    Unauthorized,
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "invalid request signature".to_string()),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Failed to handle interaction");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use ed25519_dalek::{Signer, SigningKey};
    use guildjob_operator::dispatch::MSG_QUEUED;
    use guildjob_operator::store::MemoryStore;
    use guildjob_operator::testing::{interaction, Fault, FaultyStore, RecordingDiscord};
    use tower::ServiceExt;

    const TIMESTAMP: &str = "1700000000";
    const COMMAND: &str = r#"{"type":2,"id":"i-1","guild_id":"g-1","channel_id":"c-1","token":"tok-1","data":{"name":"restart"}}"#;

    struct Harness {
        router: Router,
        key: SigningKey,
        store: MemoryStore,
        discord: Arc<RecordingDiscord>,
    }

    fn harness() -> Harness {
        let key = SigningKey::from_bytes(&[9u8; 32]);
        let store = MemoryStore::new();
        let discord = Arc::new(RecordingDiscord::new());
        let dispatcher = Dispatcher::new(Arc::new(store.clone()), discord.clone(), "default");
        let state = AppState {
            verifier: Arc::new(SignatureVerifier::new(key.verifying_key())),
            dispatcher,
        };
        Harness {
            router: create_router(state),
            key,
            store,
            discord,
        }
    }

    fn sign(key: &SigningKey, body: &str) -> String {
        let mut message = TIMESTAMP.as_bytes().to_vec();
        message.extend_from_slice(body.as_bytes());
        hex::encode(key.sign(&message).to_bytes())
    }

    fn signed(key: &SigningKey, body: &str) -> Request<Body> {
        let signature = sign(key, body);

        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header(SIGNATURE_HEADER, signature)
            .header(TIMESTAMP_HEADER, TIMESTAMP)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// `deploy-bot` routing guild `g-1`, already synced
    fn routed_interaction(store: &MemoryStore) {
        let mut gi = interaction("deploy-bot", "g-1", &[("restart", "name: restart")]);
        gi.metadata.labels = Some(
            [(guildjob_models::LABEL_GUILD_ID.to_string(), "g-1".to_string())].into(),
        );
        store.apply_interaction(gi);
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let response = h
            .router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_ping_gets_pong() {
        let h = harness();
        let response = h.router.oneshot(signed(&h.key, r#"{"type":1}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, serde_json::json!({"type": 1}));
    }

    #[tokio::test]
    async fn test_unsigned_request_is_rejected() {
        let h = harness();
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header(TIMESTAMP_HEADER, TIMESTAMP)
            .body(Body::from(r#"{"type":1}"#))
            .unwrap();
        let response = h.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_tampered_body_is_rejected() {
        let h = harness();
        let mut request = signed(&h.key, r#"{"type":1}"#);
        *request.body_mut() = Body::from(r#"{"type":2}"#);
        let response = h.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_malformed_signature_is_an_error() {
        let h = harness();
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header(SIGNATURE_HEADER, "not-hex")
            .header(TIMESTAMP_HEADER, TIMESTAMP)
            .body(Body::from(r#"{"type":1}"#))
            .unwrap();
        let response = h.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json_body(response).await["error"]
            .as_str()
            .unwrap()
            .contains("malformed signature"));
    }

    #[tokio::test]
    async fn test_unknown_type_gets_no_content() {
        let h = harness();
        let response = h.router.oneshot(signed(&h.key, r#"{"type":3}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_invalid_json_is_an_error() {
        let h = harness();
        let response = h.router.oneshot(signed(&h.key, "{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_command_is_deferred_and_dispatched() {
        let h = harness();
        routed_interaction(&h.store);

        let response = h.router.oneshot(signed(&h.key, COMMAND)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, serde_json::json!({"type": 5}));

        // The dispatch runs in the background; wait for its follow-up
        for _ in 0..100 {
            if !h.discord.followups().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            h.discord.followups(),
            vec![("tok-1".to_string(), MSG_QUEUED.to_string())]
        );
        assert_eq!(h.store.job_names().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_dispatch() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let key = SigningKey::from_bytes(&[9u8; 32]);
        let store = MemoryStore::new();
        routed_interaction(&store);
        let discord = Arc::new(RecordingDiscord::new());
        let slow = FaultyStore::new(store.clone(), Fault::SlowLookup(Duration::from_millis(300)));
        let state = AppState {
            verifier: Arc::new(SignatureVerifier::new(key.verifying_key())),
            dispatcher: Dispatcher::new(Arc::new(slow), discord.clone(), "default"),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(
            listener,
            state,
            async move {
                let _ = shutdown_rx.await;
            },
            Duration::from_secs(10),
        ));

        let raw = format!(
            "POST /webhook HTTP/1.1\r\n\
             Host: {addr}\r\n\
             Content-Type: application/json\r\n\
             {SIGNATURE_HEADER}: {signature}\r\n\
             {TIMESTAMP_HEADER}: {TIMESTAMP}\r\n\
             Content-Length: {length}\r\n\
             Connection: close\r\n\r\n{COMMAND}",
            signature = sign(&key, COMMAND),
            length = COMMAND.len(),
        );
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "{}", response);

        // Acknowledged, but the lookup is still sleeping
        assert!(discord.followups().is_empty());

        shutdown_tx.send(()).unwrap();
        server.await.unwrap().unwrap();

        assert_eq!(
            discord.followups(),
            vec![("tok-1".to_string(), MSG_QUEUED.to_string())]
        );
        assert_eq!(store.job_names().len(), 1);
    }
}
