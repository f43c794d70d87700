use crate::constants::{ONE_SHOT_PATH, STREAM_PATH};
use crate::main_helper::{ClientSettings, FetchMode};
use crate::sse::{event_from_value, StreamEvent};
use crate::streaming::{StreamHandler, StreamObserver, StreamOutcome};
use crate::types::*;
use reqwest::header::ACCEPT;
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChatRequest<'a> {
    pub message: &'a str,
    pub session_id: Option<&'a str>,
}

#[derive(Clone, Debug)]
pub struct ShopClient {
    client: reqwest::Client,
    base_url: String,
    mode: FetchMode,
}

impl ShopClient {
    pub fn new(settings: &ClientSettings) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .tcp_keepalive(Some(std::time::Duration::from_secs(60)));
        if let Some(timeout) = settings.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(ShopChatError::Network)?;
        Ok(Self::with_client(client, &settings.base_url, settings.mode))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str, mode: FetchMode) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            mode,
        }
    }

    pub fn mode(&self) -> FetchMode {
        self.mode
    }

    pub fn stream_url(&self) -> String {
        format!("{}{}", self.base_url, STREAM_PATH)
    }

    pub fn once_url(&self) -> String {
        format!("{}{}", self.base_url, ONE_SHOT_PATH)
    }

    /// Runs one turn with the configured fetch strategy. Both strategies
    /// report through the same observer and complete exactly once.
    pub async fn chat<O>(
        &self,
        message: &str,
        session_id: Option<&str>,
        cancel: &CancellationToken,
        observer: &mut O,
    ) -> StreamOutcome
    where
        O: StreamObserver + ?Sized,
    {
        match self.mode {
            FetchMode::Stream => self.stream_chat(message, session_id, cancel, observer).await,
            FetchMode::Once => self.chat_once(message, session_id, cancel, observer).await,
        }
    }

    pub async fn stream_chat<O>(
        &self,
        message: &str,
        session_id: Option<&str>,
        cancel: &CancellationToken,
        observer: &mut O,
    ) -> StreamOutcome
    where
        O: StreamObserver + ?Sized,
    {
        let body = ChatRequest {
            message,
            session_id,
        };
        tracing::info!(
            target: "flight_recorder",
            "[REQ] POST {} | Session: {} | Chars: {}",
            self.stream_url(),
            session_id.unwrap_or("new"),
            message.chars().count()
        );

        let request = self
            .client
            .post(self.stream_url())
            .header(ACCEPT, "text/event-stream")
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Self::aborted(observer),
            r = request => r,
        };

        let response = match response {
            Ok(r) => r,
            Err(e) => return Self::failed(observer, e.into()),
        };
        let status = response.status();
        if !status.is_success() {
            return Self::failed(observer, ShopChatError::Http(status.as_u16()).into());
        }

        StreamHandler::drive(Box::pin(response.bytes_stream()), cancel, observer).await
    }

    /// POSTs to the single-shot endpoint and returns the events the reply
    /// stands for.
    pub async fn send_once(
        &self,
        message: &str,
        session_id: Option<&str>,
    ) -> Result<Vec<StreamEvent>> {
        let body = ChatRequest {
            message,
            session_id,
        };
        tracing::info!(
            target: "flight_recorder",
            "[REQ] POST {} | Session: {} | Chars: {}",
            self.once_url(),
            session_id.unwrap_or("new"),
            message.chars().count()
        );

        let response = self.client.post(self.once_url()).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ShopChatError::Http(status.as_u16()).into());
        }
        let reply: Value = response.json().await?;
        Ok(events_from_reply(reply))
    }

    pub async fn chat_once<O>(
        &self,
        message: &str,
        session_id: Option<&str>,
        cancel: &CancellationToken,
        observer: &mut O,
    ) -> StreamOutcome
    where
        O: StreamObserver + ?Sized,
    {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Self::aborted(observer),
            r = self.send_once(message, session_id) => r,
        };

        match result {
            Ok(events) => {
                for event in events {
                    if cancel.is_cancelled() {
                        return Self::aborted(observer);
                    }
                    StreamHandler::dispatch(event, observer);
                }
                observer.on_complete(StreamOutcome::Eof);
                StreamOutcome::Eof
            }
            Err(e) => Self::failed(observer, e),
        }
    }

    fn aborted<O: StreamObserver + ?Sized>(observer: &mut O) -> StreamOutcome {
        tracing::debug!(target: "shopchat::streaming", "Stream aborted");
        observer.on_complete(StreamOutcome::Aborted);
        StreamOutcome::Aborted
    }

    fn failed<O: StreamObserver + ?Sized>(observer: &mut O, err: ObservedError) -> StreamOutcome {
        tracing::error!(target: "shopchat::streaming", "Chat request failed: {}", err.report());
        observer.on_error(&err);
        observer.on_complete(StreamOutcome::Failed);
        StreamOutcome::Failed
    }
}

/// Maps a single-shot reply onto stream events. A reply that already
/// carries a `type` is one event; otherwise its text, products and cart
/// become response, raw_products and raw_cart events in that order.
pub fn events_from_reply(reply: Value) -> Vec<StreamEvent> {
    if reply.get("type").is_some() {
        return event_from_value(reply).into_iter().collect();
    }

    let session_id = reply.get("session_id").cloned().unwrap_or(Value::Null);
    let mut events = Vec::new();

    let mut response = match &reply {
        Value::Object(map) => Value::Object(map.clone()),
        _ => json!({}),
    };
    if let Some(obj) = response.as_object_mut() {
        obj.remove("products");
        obj.remove("cart");
        obj.insert("type".to_string(), json!("response"));
    }
    // Anything beyond the product/cart/metadata keys is the assistant's reply.
    let has_reply = match reply.as_object() {
        Some(map) => map.keys().any(|k| {
            !matches!(k.as_str(), "products" | "cart" | "session_id" | "timestamp")
        }),
        None => false,
    };
    if has_reply {
        events.push(StreamEvent::Response(response));
    }

    if let Some(products) = reply.get("products").filter(|p| p.is_array()) {
        events.push(StreamEvent::RawProducts(json!({
            "type": "raw_products",
            "products": products,
            "session_id": session_id,
        })));
    }
    if let Some(cart) = reply.get("cart").filter(|c| c.is_object()) {
        events.push(StreamEvent::RawCart(json!({
            "type": "raw_cart",
            "cart": cart,
            "session_id": session_id,
        })));
    }
    events
}
