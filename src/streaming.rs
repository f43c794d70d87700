use crate::logging::StreamMetric;
use crate::sse::{SseDecoder, SseFrame, StreamEvent};
use crate::types::*;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// How a stream call ended. Reported to `on_complete` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// `[DONE]` marker seen.
    Done,
    /// Body ended without a marker.
    Eof,
    /// Transport failure, already reported through `on_error`.
    Failed,
    /// Cancelled by the caller. Not an error.
    Aborted,
}

/// Callbacks for one streamed turn. Every method defaults to a no-op so
/// callers implement only what they render.
pub trait StreamObserver: Send {
    fn on_thinking(&mut self, _message: &str, _session_id: Option<&str>) {}
    fn on_tool_start(&mut self, _tool: &str, _status: &str, _session_id: Option<&str>) {}
    fn on_response(&mut self, _payload: Value) {}
    fn on_raw_products(&mut self, _payload: Value) {}
    fn on_raw_cart(&mut self, _payload: Value) {}
    fn on_data(&mut self, _payload: Value) {}
    fn on_error(&mut self, _error: &ObservedError) {}
    fn on_complete(&mut self, _outcome: StreamOutcome) {}
}

pub struct StreamHandler;

impl StreamHandler {
    /// Reads `body` to the end, dispatching decoded events to `observer`.
    ///
    /// Cancellation is checked between reads and between events; a cancelled
    /// stream never reaches `on_error`.
    pub async fn drive<S, E, O>(
        mut body: S,
        cancel: &CancellationToken,
        observer: &mut O,
    ) -> StreamOutcome
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: Into<ShopChatError>,
        O: StreamObserver + ?Sized,
    {
        let mut decoder = SseDecoder::new();
        let mut metrics = StreamMetric::new();

        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StreamOutcome::Aborted,
                next = body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    metrics.record_chunk(chunk.len());
                    let frames = decoder.feed(&chunk);
                    if let Some(o) = Self::dispatch_all(frames, cancel, observer, &mut metrics) {
                        break o;
                    }
                }
                Some(Err(e)) => {
                    if cancel.is_cancelled() {
                        break StreamOutcome::Aborted;
                    }
                    let err = ObservedError::from(Into::<ShopChatError>::into(e));
                    tracing::error!(target: "shopchat::streaming", "Stream read failed: {}", err);
                    observer.on_error(&err);
                    break StreamOutcome::Failed;
                }
                None => {
                    let frames = decoder.finish();
                    match Self::dispatch_all(frames, cancel, observer, &mut metrics) {
                        Some(o) => break o,
                        None => break StreamOutcome::Eof,
                    }
                }
            }
        };

        metrics.malformed = decoder.malformed_lines;
        metrics.log_summary(outcome);
        observer.on_complete(outcome);
        outcome
    }

    fn dispatch_all<O>(
        frames: Vec<SseFrame>,
        cancel: &CancellationToken,
        observer: &mut O,
        metrics: &mut StreamMetric,
    ) -> Option<StreamOutcome>
    where
        O: StreamObserver + ?Sized,
    {
        for frame in frames {
            if cancel.is_cancelled() {
                return Some(StreamOutcome::Aborted);
            }
            match frame {
                SseFrame::Done => {
                    tracing::debug!(target: "shopchat::streaming", "Stream end marker [DONE] received");
                    return Some(StreamOutcome::Done);
                }
                SseFrame::Event(event) => {
                    metrics.record_event(event.kind());
                    Self::dispatch(event, observer);
                }
            }
        }
        None
    }

    pub fn dispatch<O>(event: StreamEvent, observer: &mut O)
    where
        O: StreamObserver + ?Sized,
    {
        match event {
            StreamEvent::Thinking {
                message,
                session_id,
            } => observer.on_thinking(&message, session_id.as_deref()),
            StreamEvent::ToolStart {
                tool,
                status,
                session_id,
            } => {
                tracing::debug!(target: "shopchat::streaming", "Tool execution started: {}", tool);
                observer.on_tool_start(&tool, &status, session_id.as_deref())
            }
            StreamEvent::Response(v) => observer.on_response(v),
            StreamEvent::RawProducts(v) => observer.on_raw_products(v),
            StreamEvent::RawCart(v) => observer.on_raw_cart(v),
            StreamEvent::Data(v) => observer.on_data(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[derive(Default)]
    struct Recorder {
        kinds: Vec<String>,
        errors: usize,
        completions: Vec<StreamOutcome>,
    }

    impl StreamObserver for Recorder {
        fn on_thinking(&mut self, _m: &str, _s: Option<&str>) {
            self.kinds.push("thinking".into());
        }
        fn on_response(&mut self, _p: Value) {
            self.kinds.push("response".into());
        }
        fn on_raw_cart(&mut self, _p: Value) {
            self.kinds.push("raw_cart".into());
        }
        fn on_error(&mut self, _e: &ObservedError) {
            self.errors += 1;
        }
        fn on_complete(&mut self, outcome: StreamOutcome) {
            self.completions.push(outcome);
        }
    }

    fn chunks(parts: &[&str]) -> Vec<std::result::Result<Bytes, std::io::Error>> {
        parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect()
    }

    #[tokio::test]
    async fn done_marker_stops_dispatch_and_completes_once() {
        let body = stream::iter(chunks(&[
            "data: {\"type\":\"thinking\",\"message\":\"hm\"}\n",
            "data: [DONE]\ndata: {\"type\":\"response\",\"content\":\"late\"}\n",
        ]));
        let mut rec = Recorder::default();
        let outcome = StreamHandler::drive(body, &CancellationToken::new(), &mut rec).await;
        assert_eq!(outcome, StreamOutcome::Done);
        assert_eq!(rec.kinds, vec!["thinking"]);
        assert_eq!(rec.completions, vec![StreamOutcome::Done]);
    }

    #[tokio::test]
    async fn read_error_reports_once_then_completes() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"type\":\"thinking\"}\n")),
            Err(std::io::Error::other("connection reset")),
        ]);
        let mut rec = Recorder::default();
        let outcome = StreamHandler::drive(body, &CancellationToken::new(), &mut rec).await;
        assert_eq!(outcome, StreamOutcome::Failed);
        assert_eq!(rec.errors, 1);
        assert_eq!(rec.completions, vec![StreamOutcome::Failed]);
    }

    #[tokio::test]
    async fn cancelled_stream_skips_error_callback() {
        let token = CancellationToken::new();
        token.cancel();
        let body = stream::iter(vec![Err::<Bytes, _>(std::io::Error::other("aborted"))]);
        let mut rec = Recorder::default();
        let outcome = StreamHandler::drive(body, &token, &mut rec).await;
        assert_eq!(outcome, StreamOutcome::Aborted);
        assert_eq!(rec.errors, 0);
        assert_eq!(rec.completions, vec![StreamOutcome::Aborted]);
    }

    #[tokio::test]
    async fn natural_eof_flushes_trailing_line() {
        let body = stream::iter(chunks(&["data: {\"type\":\"raw_cart\",\"items\":[]}"]));
        let mut rec = Recorder::default();
        let outcome = StreamHandler::drive(body, &CancellationToken::new(), &mut rec).await;
        assert_eq!(outcome, StreamOutcome::Eof);
        assert_eq!(rec.kinds, vec!["raw_cart"]);
    }
}
