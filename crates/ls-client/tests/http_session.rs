//! Integration tests for ls-client
//!
//! These tests run a minimal Lightstreamer-like server on axum and drive a
//! session against it through the real reqwest transport.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Form, Router};
use futures::StreamExt;
use ls_client::testing::TestServer;
use ls_client::{
    ChannelListener, CloseReason, ItemUpdate, LsError, SessionEvent, SessionState,
    StreamSession, Subscription, SubscriptionMode,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Fake server
// =============================================================================

#[derive(Default)]
struct FakeState {
    stream: Option<mpsc::UnboundedSender<String>>,
    controls: Vec<HashMap<String, String>>,
    binds: usize,
}

#[derive(Clone, Default)]
struct FakeServer {
    state: Arc<Mutex<FakeState>>,
}

impl FakeServer {
    fn router(&self) -> Router {
        Router::new()
            .route("/lightstreamer/create_session.txt", post(create_session))
            .route("/lightstreamer/bind_session.txt", post(bind_session))
            .route("/lightstreamer/control.txt", post(control))
            .with_state(self.clone())
    }

    /// Push a line on the current stream connection
    fn send(&self, line: &str) {
        let state = self.state.lock();
        let stream = state.stream.as_ref().expect("no open stream");
        stream.send(line.to_string()).expect("stream closed");
    }

    /// Push a last line and end the stream response
    fn finish(&self, line: &str) {
        if let Some(stream) = self.state.lock().stream.take() {
            let _ = stream.send(line.to_string());
        }
    }

    fn control_ops(&self) -> Vec<String> {
        self.state
            .lock()
            .controls
            .iter()
            .map(|params| params.get("LS_op").cloned().unwrap_or_default())
            .collect()
    }

    /// Open a stream response whose first lines are `head`
    fn open_stream(&self, head: &[&str]) -> Response {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        for line in head {
            let _ = tx.send(line.to_string());
        }
        self.state.lock().stream = Some(tx);

        let body = UnboundedReceiverStream::new(rx)
            .map(|line| Ok::<_, Infallible>(format!("{}\r\n", line)));
        Body::from_stream(body).into_response()
    }
}

async fn create_session(
    State(server): State<FakeServer>,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    if params.get("LS_adapter_set").map(String::as_str) != Some("DEMO") {
        return "ERROR\r\n2\r\nRequested Adapter Set not available\r\n".into_response();
    }
    server.open_stream(&["OK", "SessionId:S42", "KeepaliveMillis:5000", ""])
}

async fn bind_session(
    State(server): State<FakeServer>,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    if params.get("LS_session").map(String::as_str) != Some("S42") {
        return "SYNC ERROR\r\n".into_response();
    }
    server.state.lock().binds += 1;
    server.open_stream(&["OK", "SessionId:S42", ""])
}

async fn control(
    State(server): State<FakeServer>,
    Form(params): Form<HashMap<String, String>>,
) -> &'static str {
    let mut state = server.state.lock();
    let op = params.get("LS_op").cloned().unwrap_or_default();
    state.controls.push(params);

    if op == "destroy" {
        if let Some(stream) = state.stream.take() {
            let _ = stream.send("END".to_string());
        }
    }
    "OK\r\n"
}

// =============================================================================
// Helpers
// =============================================================================

async fn next_update(updates: &mut mpsc::UnboundedReceiver<ItemUpdate>) -> ItemUpdate {
    tokio::time::timeout(WAIT, updates.recv())
        .await
        .expect("timed out waiting for update")
        .expect("listener channel closed")
}

async fn next_event(events: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_stock_list_session() {
    let fake = FakeServer::default();
    let server = TestServer::start(fake.router()).await.unwrap();
    let session = StreamSession::new(server.config("DEMO")).unwrap();
    let mut events = session.events();

    session.connect().await.unwrap();
    assert_eq!(session.session_id().as_deref(), Some("S42"));
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Connected { .. }
    ));

    let sub = Subscription::new(
        SubscriptionMode::Merge,
        ["item1", "item2", "item3"],
        ["stock_name", "last_price", "time"],
    )
    .with_data_adapter("QUOTE_ADAPTER");
    let (listener, mut updates) = ChannelListener::channel();
    sub.add_listener(listener);
    let key = session.subscribe(sub).await.unwrap().into_result().unwrap();
    assert_eq!(key, 1);

    {
        let state = fake.state.lock();
        let add = &state.controls[0];
        assert_eq!(add["LS_session"], "S42");
        assert_eq!(add["LS_op"], "add");
        assert_eq!(add["LS_table"], "1");
        assert_eq!(add["LS_mode"], "MERGE");
        assert_eq!(add["LS_id"], "item1 item2 item3");
        assert_eq!(add["LS_schema"], "stock_name last_price time");
        assert_eq!(add["LS_data_adapter"], "QUOTE_ADAPTER");
    }

    fake.send("PROBE");
    fake.send("1,3|Ations Europe|15.72|12:48:24");
    let update = next_update(&mut updates).await;
    assert_eq!(update.item_name, "item3");
    assert_eq!(update.value("stock_name"), Some("Ations Europe"));
    assert_eq!(update.value("last_price"), Some("15.72"));

    fake.send("1,3||15.80|#");
    let update = next_update(&mut updates).await;
    assert_eq!(update.value("stock_name"), Some("Ations Europe"));
    assert_eq!(update.value("last_price"), Some("15.80"));
    assert_eq!(update.field("time"), Some(&None));

    session.unsubscribe(key).await.unwrap();
    session.disconnect().await.unwrap();

    assert_eq!(fake.control_ops(), vec!["add", "delete", "destroy"]);
    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.session_id().is_none());
    loop {
        if let SessionEvent::Closed(reason) = next_event(&mut events).await {
            assert_eq!(reason, CloseReason::Disconnected);
            break;
        }
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_loop_rebinds_over_http() {
    let fake = FakeServer::default();
    let server = TestServer::start(fake.router()).await.unwrap();
    let session = StreamSession::new(server.config("DEMO")).unwrap();
    session.connect().await.unwrap();

    let sub = Subscription::new(SubscriptionMode::Merge, ["item1"], ["last_price"]);
    let (listener, mut updates) = ChannelListener::channel();
    sub.add_listener(listener);
    session.subscribe(sub).await.unwrap();
    let mut events = session.events();

    fake.send("1,1|10.5");
    assert_eq!(next_update(&mut updates).await.value("last_price"), Some("10.5"));

    fake.send("LOOP");
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Rebound {
            session_id: "S42".to_string(),
            generation: 2,
        }
    );
    assert_eq!(fake.state.lock().binds, 1);

    fake.send("1,1|10.7");
    assert_eq!(next_update(&mut updates).await.value("last_price"), Some("10.7"));

    session.disconnect().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_adapter_set_is_rejected() {
    let fake = FakeServer::default();
    let server = TestServer::start(fake.router()).await.unwrap();
    let session = StreamSession::new(server.config("NOPE")).unwrap();

    match session.connect().await {
        Err(LsError::SessionRejected { diagnostic }) => {
            assert_eq!(diagnostic[0], "ERROR");
            assert_eq!(diagnostic[1], "2");
        }
        other => panic!("expected SessionRejected, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Closed);

    server.shutdown().await;
}

#[tokio::test]
async fn test_server_end_clears_session() {
    let fake = FakeServer::default();
    let server = TestServer::start(fake.router()).await.unwrap();
    let session = StreamSession::new(server.config("DEMO")).unwrap();
    session.connect().await.unwrap();
    let mut events = session.events();

    fake.finish("END 31");

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Closed(CloseReason::ServerClosed { cause: Some(31) })
    );
    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.subscription_keys().is_empty());

    server.shutdown().await;
}
