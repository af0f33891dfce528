//! End-to-end integration tests using a real WebSocket client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use subwire_core::message::ErrorPayload;
use subwire_core::protocol::GRAPHQL_TRANSPORT_WS_PROTOCOL;
use subwire_server::{
    BoxError, ConnectOutcome, ConnectionContext, Emitter, Producer, ServerConfig, ServerHooks,
    ServerOptions, SubscriptionFactory, SubwireServer,
};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

// ─────────────────────────────────────────────────────────────────────────────
// Test producers
// ─────────────────────────────────────────────────────────────────────────────

/// Emits fixed payloads in order, then completes.
struct StreamFactory {
    values: Vec<Value>,
}

impl StreamFactory {
    fn greetings() -> Self {
        Self {
            values: ["Hi", "Bonjour", "Hola", "Ciao", "Zdravo"]
                .into_iter()
                .map(Value::from)
                .collect(),
        }
    }
}

struct StreamProducer {
    values: Vec<Value>,
}

#[async_trait]
impl Producer for StreamProducer {
    async fn start(&self, emit: Emitter) -> Result<Option<ErrorPayload>, BoxError> {
        for value in &self.values {
            emit.next(value.clone()).await?;
        }
        Ok(None)
    }
    async fn stop(&self) {}
}

#[async_trait]
impl SubscriptionFactory for StreamFactory {
    async fn create(
        &self,
        _ctx: &ConnectionContext,
        _id: &str,
        _payload: &Value,
    ) -> Result<Box<dyn Producer>, BoxError> {
        Ok(Box::new(StreamProducer {
            values: self.values.clone(),
        }))
    }
}

/// Runs until stopped, never emitting; counts starts and stops.
struct PendingFactory {
    started: Arc<AtomicUsize>,
    stopped: Arc<AtomicUsize>,
}

impl PendingFactory {
    fn new() -> Self {
        Self {
            started: Arc::new(AtomicUsize::new(0)),
            stopped: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct PendingProducer {
    started: Arc<AtomicUsize>,
    stopped: Arc<AtomicUsize>,
    done: CancellationToken,
}

#[async_trait]
impl Producer for PendingProducer {
    async fn start(&self, _emit: Emitter) -> Result<Option<ErrorPayload>, BoxError> {
        let _ = self.started.fetch_add(1, Ordering::SeqCst);
        self.done.cancelled().await;
        Ok(None)
    }
    async fn stop(&self) {
        let _ = self.stopped.fetch_add(1, Ordering::SeqCst);
        self.done.cancel();
    }
}

#[async_trait]
impl SubscriptionFactory for PendingFactory {
    async fn create(
        &self,
        _ctx: &ConnectionContext,
        _id: &str,
        _payload: &Value,
    ) -> Result<Box<dyn Producer>, BoxError> {
        Ok(Box::new(PendingProducer {
            started: self.started.clone(),
            stopped: self.stopped.clone(),
            done: CancellationToken::new(),
        }))
    }
}

/// Producer whose `start` fails with an internal error.
struct FailingFactory;

#[async_trait]
impl SubscriptionFactory for FailingFactory {
    async fn create(
        &self,
        _ctx: &ConnectionContext,
        _id: &str,
        _payload: &Value,
    ) -> Result<Box<dyn Producer>, BoxError> {
        struct Exploding;
        #[async_trait]
        impl Producer for Exploding {
            async fn start(&self, _emit: Emitter) -> Result<Option<ErrorPayload>, BoxError> {
                Err("stream source unavailable".into())
            }
            async fn stop(&self) {}
        }
        Ok(Box::new(Exploding))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

/// Boot a test server and return the WS URL + handle.
async fn boot_with_config(
    options: ServerOptions,
    config: ServerConfig,
) -> (String, Arc<SubwireServer>) {
    let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
    let server = Arc::new(SubwireServer::new(config, options, metrics_handle));
    let (addr, _handle) = server.listen().await.unwrap();
    (format!("ws://{addr}/graphql"), server)
}

async fn boot(options: ServerOptions) -> (String, Arc<SubwireServer>) {
    let config = ServerConfig {
        keep_alive_interval_ms: 0,
        ..ServerConfig::default()
    };
    boot_with_config(options, config).await
}

/// Connect offering the canonical subprotocol.
async fn connect(url: &str) -> WsStream {
    let mut request = url.into_client_request().unwrap();
    let _ = request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static(GRAPHQL_TRANSPORT_WS_PROTOCOL),
    );
    let (ws, _) = connect_async(request).await.unwrap();
    ws
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Read the next text frame as JSON, skipping transport frames.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Try to read a JSON message within `dur`. Returns `None` on timeout.
async fn try_read_json(ws: &mut WsStream, dur: Duration) -> Option<Value> {
    match timeout(dur, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str::<Value>(&text).ok();
                }
                Some(Ok(_)) => {}
                _ => return None,
            }
        }
    })
    .await
    {
        Ok(value) => value,
        Err(_) => None,
    }
}

/// Read until the server's close frame arrives.
async fn expect_close(ws: &mut WsStream) -> (u16, String) {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for close")
            .expect("stream ended without a close frame")
            .expect("ws error");
        match msg {
            Message::Close(Some(frame)) => {
                return (u16::from(frame.code), frame.reason.to_string());
            }
            Message::Close(None) => return (1005, String::new()),
            _ => {}
        }
    }
}

/// Complete the initialisation handshake.
async fn init(ws: &mut WsStream) {
    send_json(ws, json!({"type": "connection_init"})).await;
    let ack = read_json(ws).await;
    assert_eq!(ack["type"], "connection_ack");
}

fn subscribe(id: &str) -> Value {
    json!({"type": "subscribe", "id": id, "payload": {"topic": "greetings"}})
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_init_is_acknowledged() {
    let (url, server) = boot(ServerOptions::new(StreamFactory::greetings())).await;
    let mut ws = connect(&url).await;

    init(&mut ws).await;

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_custom_replacer_rewrites_type() {
    let options = ServerOptions::new(StreamFactory::greetings()).replacer(|key, value| {
        if key == "type" && value == json!("connection_ack") {
            json!("CONNECTION_ACK")
        } else {
            value
        }
    });
    let (url, server) = boot(options).await;
    let mut ws = connect(&url).await;

    send_json(&mut ws, json!({"type": "connection_init"})).await;
    let msg = timeout(TIMEOUT, ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match msg {
        Message::Text(text) => assert_eq!(text.as_str(), r#"{"type":"CONNECTION_ACK"}"#),
        other => panic!("expected a text frame, got {other:?}"),
    }

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_init_timeout_closes_4408() {
    let options = ServerOptions::new(StreamFactory::greetings())
        .connection_init_wait_timeout(Duration::from_millis(10));
    let (url, server) = boot(options).await;
    let mut ws = connect(&url).await;

    // Send nothing; the init timer must fire.
    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 4408);
    assert_eq!(reason, "Connection initialisation timeout");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_duplicate_init_closes_4429() {
    let (url, server) = boot(ServerOptions::new(StreamFactory::greetings())).await;
    let mut ws = connect(&url).await;

    init(&mut ws).await;
    send_json(&mut ws, json!({"type": "connection_init"})).await;

    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 4429);
    assert_eq!(reason, "Too many initialisation requests");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_connect_hook_refusal_closes_4403() {
    struct Refuser;
    #[async_trait]
    impl ServerHooks for Refuser {
        async fn on_connect(&self, _ctx: &ConnectionContext) -> Result<ConnectOutcome, BoxError> {
            Ok(ConnectOutcome::Reject)
        }
    }
    let (url, server) =
        boot(ServerOptions::new(StreamFactory::greetings()).hooks(Refuser)).await;
    let mut ws = connect(&url).await;

    send_json(&mut ws, json!({"type": "connection_init"})).await;
    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 4403);
    assert_eq!(reason, "Forbidden");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_connect_hook_payload_rides_the_ack() {
    struct Greeter;
    #[async_trait]
    impl ServerHooks for Greeter {
        async fn on_connect(&self, ctx: &ConnectionContext) -> Result<ConnectOutcome, BoxError> {
            let who = ctx.connection_params().and_then(|params| {
                params.get("name").and_then(Value::as_str).map(str::to_owned)
            });
            Ok(ConnectOutcome::AcceptWithPayload(
                json!({"hello": who.unwrap_or_default()}),
            ))
        }
    }
    let (url, server) =
        boot(ServerOptions::new(StreamFactory::greetings()).hooks(Greeter)).await;
    let mut ws = connect(&url).await;

    send_json(
        &mut ws,
        json!({"type": "connection_init", "payload": {"name": "ada"}}),
    )
    .await;
    let ack = read_json(&mut ws).await;
    assert_eq!(ack["type"], "connection_ack");
    assert_eq!(ack["payload"]["hello"], "ada");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_missing_subprotocol_closes_4406() {
    let (url, server) = boot(ServerOptions::new(StreamFactory::greetings())).await;

    // Connect without offering any subprotocol.
    let request = url.as_str().into_client_request().unwrap();
    let (mut ws, _) = connect_async(request).await.unwrap();

    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 4406);
    assert_eq!(reason, "Subprotocol not acceptable");

    server.shutdown().shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Ping / pong
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_ping_auto_reply_echoes_payload() {
    let (url, server) = boot(ServerOptions::new(StreamFactory::greetings())).await;
    let mut ws = connect(&url).await;

    send_json(&mut ws, json!({"type": "ping", "payload": {"iCome": "back"}})).await;
    let pong = read_json(&mut ws).await;
    assert_eq!(pong, json!({"type": "pong", "payload": {"iCome": "back"}}));

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_bare_ping_gets_bare_pong() {
    let (url, server) = boot(ServerOptions::new(StreamFactory::greetings())).await;
    let mut ws = connect(&url).await;

    send_json(&mut ws, json!({"type": "ping"})).await;
    let pong = read_json(&mut ws).await;
    assert_eq!(pong, json!({"type": "pong"}));

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_pings_answered_in_order_before_ack() {
    let (url, server) = boot(ServerOptions::new(StreamFactory::greetings())).await;
    let mut ws = connect(&url).await;

    for i in 0..20 {
        send_json(&mut ws, json!({"type": "ping", "payload": {"seq": i}})).await;
    }
    for i in 0..20 {
        let pong = read_json(&mut ws).await;
        assert_eq!(pong["type"], "pong");
        assert_eq!(pong["payload"]["seq"], i);
    }

    server.shutdown().shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Operations
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_greetings_stream() {
    let (url, server) = boot(ServerOptions::new(StreamFactory::greetings())).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;

    send_json(&mut ws, subscribe("1")).await;

    for expected in ["Hi", "Bonjour", "Hola", "Ciao", "Zdravo"] {
        let next = read_json(&mut ws).await;
        assert_eq!(next["type"], "next");
        assert_eq!(next["id"], "1");
        assert_eq!(next["payload"], expected);
    }
    let complete = read_json(&mut ws).await;
    assert_eq!(complete["type"], "complete");
    assert_eq!(complete["id"], "1");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_subscribe_before_ack_closes_4401() {
    let (url, server) = boot(ServerOptions::new(StreamFactory::greetings())).await;
    let mut ws = connect(&url).await;

    send_json(&mut ws, subscribe("1")).await;
    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 4401);
    assert_eq!(reason, "Unauthorized");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_duplicate_subscribe_id_closes_4409() {
    // The first operation's producer never resolves, so the second
    // subscribe races a still-preparing reservation.
    let (url, server) = boot(ServerOptions::new(PendingFactory::new())).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;

    send_json(&mut ws, subscribe("not-unique")).await;
    send_json(&mut ws, subscribe("not-unique")).await;

    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 4409);
    assert_eq!(reason, "Subscriber for not-unique already exists");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_client_complete_does_not_echo() {
    let factory = PendingFactory::new();
    let started = factory.started.clone();
    let stopped = factory.stopped.clone();
    let (url, server) = boot(ServerOptions::new(factory)).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;

    send_json(&mut ws, subscribe("1")).await;
    timeout(TIMEOUT, async {
        while started.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    send_json(&mut ws, json!({"type": "complete", "id": "1"})).await;
    timeout(TIMEOUT, async {
        while stopped.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    // No outbound message may follow for id 1.
    let stray = try_read_json(&mut ws, Duration::from_millis(200)).await;
    assert!(stray.is_none(), "unexpected message: {stray:?}");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_on_subscribe_veto_emits_error_and_keeps_connection() {
    struct Vetoer;
    #[async_trait]
    impl ServerHooks for Vetoer {
        async fn on_subscribe(
            &self,
            _ctx: &ConnectionContext,
            id: &str,
            _payload: &Value,
        ) -> Result<Option<ErrorPayload>, BoxError> {
            Ok(Some(vec![json!({"message": format!("operation {id} vetoed")})]))
        }
    }
    let (url, server) =
        boot(ServerOptions::new(StreamFactory::greetings()).hooks(Vetoer)).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;

    send_json(&mut ws, subscribe("op-a")).await;
    let error = read_json(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["id"], "op-a");
    assert_eq!(error["payload"][0]["message"], "operation op-a vetoed");

    // The connection survives and the id is reusable.
    send_json(&mut ws, subscribe("op-a")).await;
    let error = read_json(&mut ws).await;
    assert_eq!(error["type"], "error");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_producer_failure_closes_4500() {
    let (url, server) = boot(ServerOptions::new(FailingFactory)).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;

    send_json(&mut ws, subscribe("1")).await;
    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 4500);
    assert!(reason.contains("stream source unavailable"), "reason: {reason}");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_production_mode_redacts_internal_reason() {
    let (url, server) = boot(ServerOptions::new(FailingFactory).production(true)).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;

    send_json(&mut ws, subscribe("1")).await;
    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 4500);
    assert_eq!(reason, "Internal server error");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_parallel_operations_keep_per_id_order() {
    let values: Vec<Value> = (0..20).map(|i| json!(format!("item_{i}"))).collect();
    let (url, server) = boot(ServerOptions::new(StreamFactory { values })).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;

    send_json(&mut ws, subscribe("left")).await;
    send_json(&mut ws, subscribe("right")).await;

    let mut seen: std::collections::HashMap<String, Vec<String>> =
        std::collections::HashMap::new();
    let mut completed = 0;
    while completed < 2 {
        let msg = read_json(&mut ws).await;
        let id = msg["id"].as_str().unwrap().to_owned();
        match msg["type"].as_str().unwrap() {
            "next" => seen
                .entry(id)
                .or_default()
                .push(msg["payload"].as_str().unwrap().to_owned()),
            "complete" => completed += 1,
            other => panic!("unexpected message type {other}"),
        }
    }

    for id in ["left", "right"] {
        let items = &seen[id];
        assert_eq!(items.len(), 20);
        for (index, item) in items.iter().enumerate() {
            assert_eq!(item, &format!("item_{index}"), "{id} out of order");
        }
    }

    server.shutdown().shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Protocol violations
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_invalid_json_closes_4400() {
    let (url, server) = boot(ServerOptions::new(StreamFactory::greetings())).await;
    let mut ws = connect(&url).await;

    ws.send(Message::text("definitely not json")).await.unwrap();
    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 4400);
    assert!(reason.contains("not valid JSON"), "reason: {reason}");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_unknown_type_closes_4400() {
    let (url, server) = boot(ServerOptions::new(StreamFactory::greetings())).await;
    let mut ws = connect(&url).await;

    send_json(&mut ws, json!({"type": "launch"})).await;
    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 4400);
    assert!(reason.contains("unknown message type"), "reason: {reason}");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_binary_frame_closes_4400() {
    let (url, server) = boot(ServerOptions::new(StreamFactory::greetings())).await;
    let mut ws = connect(&url).await;

    ws.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();
    let (code, _reason) = expect_close(&mut ws).await;
    assert_eq!(code, 4400);

    server.shutdown().shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Deployment
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_dispose_closes_clients_with_1001() {
    let (url, server) = boot(ServerOptions::new(StreamFactory::greetings())).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;

    server.dispose().await.unwrap();

    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 1001);
    assert_eq!(reason, "Going away");
}

#[tokio::test]
async fn e2e_connection_cap_rejects_upgrade() {
    let config = ServerConfig {
        max_connections: 1,
        keep_alive_interval_ms: 0,
        ..ServerConfig::default()
    };
    let (url, server) =
        boot_with_config(ServerOptions::new(StreamFactory::greetings()), config).await;

    let mut first = connect(&url).await;
    // Completing the handshake guarantees the session is registered.
    init(&mut first).await;

    let mut request = url.as_str().into_client_request().unwrap();
    let _ = request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static(GRAPHQL_TRANSPORT_WS_PROTOCOL),
    );
    let err = connect_async(request).await.unwrap_err();
    match err {
        WsError::Http(response) => assert_eq!(response.status(), 503),
        other => panic!("expected an HTTP rejection, got {other:?}"),
    }

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_keep_alive_pongs_keep_the_connection_open() {
    let config = ServerConfig {
        keep_alive_interval_ms: 50,
        ..ServerConfig::default()
    };
    let (url, server) =
        boot_with_config(ServerOptions::new(StreamFactory::greetings()), config).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;

    // Keep polling the stream so the client answers transport pings; the
    // server must not terminate us across several keep-alive windows.
    for _ in 0..6 {
        let _ = try_read_json(&mut ws, Duration::from_millis(50)).await;
    }

    send_json(&mut ws, json!({"type": "ping"})).await;
    let pong = read_json(&mut ws).await;
    assert_eq!(pong["type"], "pong");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_health_endpoint_reports_connections() {
    let (url, server) = boot(ServerOptions::new(StreamFactory::greetings())).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;

    let http_url = url
        .replace("ws://", "http://")
        .replace("/graphql", "/health");
    let resp = reqwest::get(http_url).await.unwrap();
    assert!(resp.status().is_success());

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_two_clients_are_isolated() {
    let (url, server) = boot(ServerOptions::new(StreamFactory::greetings())).await;

    let mut ws1 = connect(&url).await;
    let mut ws2 = connect(&url).await;
    init(&mut ws1).await;
    init(&mut ws2).await;

    // The same operation id on two connections is not a duplicate.
    send_json(&mut ws1, subscribe("1")).await;
    send_json(&mut ws2, subscribe("1")).await;

    for ws in [&mut ws1, &mut ws2] {
        let next = read_json(ws).await;
        assert_eq!(next["type"], "next");
        assert_eq!(next["payload"], "Hi");
    }

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_disconnect_stops_running_operations() {
    let factory = PendingFactory::new();
    let started = factory.started.clone();
    let stopped = factory.stopped.clone();
    let (url, server) = boot(ServerOptions::new(factory)).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;

    send_json(&mut ws, subscribe("1")).await;
    timeout(TIMEOUT, async {
        while started.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    // Drop the socket without a close frame.
    drop(ws);

    timeout(TIMEOUT, async {
        while stopped.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    server.shutdown().shutdown();
}
