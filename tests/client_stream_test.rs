use serde_json::{json, Value};
use shopchat::dispatch::Dispatcher;
use shopchat::reducer::{Action, ChatState};
use shopchat::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct Recorder {
    events: Vec<String>,
    sessions: Vec<String>,
    errors: Vec<String>,
    completions: Vec<StreamOutcome>,
}

impl StreamObserver for Recorder {
    fn on_thinking(&mut self, message: &str, session_id: Option<&str>) {
        self.events.push(format!("thinking:{}", message));
        self.sessions.extend(session_id.map(str::to_string));
    }
    fn on_tool_start(&mut self, tool: &str, _status: &str, _session_id: Option<&str>) {
        self.events.push(format!("tool:{}", tool));
    }
    fn on_response(&mut self, _payload: Value) {
        self.events.push("response".into());
    }
    fn on_raw_products(&mut self, _payload: Value) {
        self.events.push("raw_products".into());
    }
    fn on_raw_cart(&mut self, _payload: Value) {
        self.events.push("raw_cart".into());
    }
    fn on_error(&mut self, error: &ObservedError) {
        self.errors.push(error.to_string());
    }
    fn on_complete(&mut self, outcome: StreamOutcome) {
        self.completions.push(outcome);
    }
}

fn client(server: &MockServer, mode: FetchMode) -> ShopClient {
    let settings = ClientSettings {
        base_url: format!("{}/api/v1", server.uri()),
        mode,
        connect_timeout: Duration::from_secs(2),
        request_timeout: Some(Duration::from_secs(5)),
    };
    match ShopClient::new(&settings) {
        Ok(c) => c,
        Err(e) => panic!("client build failed: {}", e),
    }
}

const SSE_BODY: &str = concat!(
    "data: {\"type\":\"thinking\",\"message\":\"Looking up your cart\",\"session_id\":\"sess-1\"}\n\n",
    "data: {\"type\":\"tool_start\",\"tool\":\"get_cart\",\"status\":\"running\",\"session_id\":\"sess-1\"}\n\n",
    "data: {\"type\":\"raw_cart\",\"session_id\":\"sess-1\",\"cart_summary\":{\"items\":[]}}\n\n",
    "data: [DONE]\n\n",
);

#[tokio::test]
async fn test_stream_dispatches_events_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/stream"))
        .and(header("accept", "text/event-stream"))
        .and(body_json(json!({"message": "show me my cart", "session_id": null})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, FetchMode::Stream);
    let mut rec = Recorder::default();
    let outcome = client
        .stream_chat("show me my cart", None, &CancellationToken::new(), &mut rec)
        .await;

    assert_eq!(outcome, StreamOutcome::Done);
    assert_eq!(
        rec.events,
        vec!["thinking:Looking up your cart", "tool:get_cart", "raw_cart"]
    );
    assert_eq!(rec.sessions, vec!["sess-1"]);
    assert!(rec.errors.is_empty());
    assert_eq!(rec.completions, vec![StreamOutcome::Done]);
}

#[tokio::test]
async fn test_http_error_reports_status_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/stream"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client(&server, FetchMode::Stream);
    let mut rec = Recorder::default();
    let outcome = client
        .stream_chat("hi", Some("sess-1"), &CancellationToken::new(), &mut rec)
        .await;

    assert_eq!(outcome, StreamOutcome::Failed);
    assert_eq!(rec.errors, vec!["HTTP error! status: 500"]);
    assert_eq!(rec.completions, vec![StreamOutcome::Failed]);
}

#[tokio::test]
async fn test_cancel_before_response_is_silent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(SSE_BODY, "text/event-stream")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = client(&server, FetchMode::Stream);
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let mut rec = Recorder::default();
    let outcome = client.stream_chat("hi", None, &token, &mut rec).await;

    assert_eq!(outcome, StreamOutcome::Aborted);
    assert!(rec.errors.is_empty());
    assert!(rec.events.is_empty());
    assert_eq!(rec.completions, vec![StreamOutcome::Aborted]);
}

#[tokio::test]
async fn test_one_shot_reply_maps_to_events() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "Found 1 product",
            "session_id": "sess-2",
            "products": [{"name": "Green Tea", "price": 120}]
        })))
        .mount(&server)
        .await;

    let client = client(&server, FetchMode::Once);
    let mut rec = Recorder::default();
    let outcome = client
        .chat("green tea", None, &CancellationToken::new(), &mut rec)
        .await;

    assert_eq!(outcome, StreamOutcome::Eof);
    assert_eq!(rec.events, vec!["response", "raw_products"]);
    assert_eq!(rec.completions, vec![StreamOutcome::Eof]);
}

#[tokio::test]
async fn test_dispatcher_round_trip_updates_chat() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream"))
        .mount(&server)
        .await;

    let (mut dispatcher, mut rx) = Dispatcher::new(Arc::new(client(&server, FetchMode::Stream)));
    let mut state = ChatState::new();
    let generation = dispatcher.send(&mut state, "show me my cart");
    assert_eq!(generation, Some(1));
    assert!(dispatcher.is_busy(state.active_id()));

    while let Some(update) = rx.recv().await {
        let done = matches!(update.action, Action::Completed { .. });
        dispatcher.apply(&mut state, update);
        if done {
            break;
        }
    }

    let session = state.active();
    let kinds: Vec<_> = session.messages.iter().map(|m| m.body.kind()).collect();
    assert_eq!(kinds, vec!["user", "bot_cart"]);
    assert_eq!(session.backend_session, Some(BackendSessionId("sess-1".into())));
    assert!(!dispatcher.is_busy(state.active_id()));
}

const TWO_ITEM_CART_BODY: &str = concat!(
    "data: {\"type\":\"thinking\",\"message\":\"Fetching your cart\",\"session_id\":\"sess-3\"}\n\n",
    "data: {\"type\":\"raw_cart\",\"session_id\":\"sess-3\",\"cart_summary\":{\"items\":[",
    "{\"name\":\"Basmati Rice\",\"price\":150,\"quantity\":2,\"provider_id\":\"ondc_greenmart\"},",
    "{\"name\":\"Toor Dal\",\"price\":200,\"quantity\":1,\"provider\":{\"id\":\"ondc_spiceco\",\"name\":\"Spice Co\"}}",
    "]}}\n\n",
    "data: [DONE]\n\n",
);

#[tokio::test]
async fn test_show_me_my_cart_renders_two_items_ready_for_checkout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/stream"))
        .and(body_json(json!({"message": "show me my cart", "session_id": null})))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(TWO_ITEM_CART_BODY, "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (mut dispatcher, mut rx) = Dispatcher::new(Arc::new(client(&server, FetchMode::Stream)));
    let mut state = ChatState::new();
    dispatcher.send(&mut state, "show me my cart");

    while let Some(update) = rx.recv().await {
        let done = matches!(update.action, Action::Completed { .. });
        dispatcher.apply(&mut state, update);
        if done {
            break;
        }
    }

    let session = state.active();
    assert_eq!(session.placeholder_count(), 0);
    let cart = match session.messages.last().map(|m| &m.body) {
        Some(MessageBody::CartView { cart }) => cart.clone(),
        other => panic!("Expected a cart view, got {:?}", other),
    };
    let names: Vec<_> = cart.items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["Basmati Rice", "Toor Dal"]);
    assert_eq!(cart.total_value, 500.0);
    assert!(!cart.is_empty);
    assert!(cart.ready_for_checkout);

    let rendered: String = tui::message_lines(&MessageBody::CartView { cart })
        .iter()
        .flat_map(|l| l.spans.iter().map(|s| s.content.to_string()))
        .collect();
    assert!(rendered.contains("Basmati Rice"));
    assert!(rendered.contains("Toor Dal"));
    assert!(rendered.contains("Proceed to Checkout"));
}
