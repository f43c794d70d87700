use crate::streaming::StreamOutcome;
use std::collections::BTreeMap;
use std::panic;
use tracing::{error, info};

/// Sets up a global panic hook that logs panics using tracing and restores
/// the terminal before the default hook prints.
pub fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic payload"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            target: "panic",
            message = %message,
            location = %location,
            backtrace = %backtrace,
            "FATAL: Application panicked"
        );

        crate::tui::restore_terminal();
        original_hook(panic_info);
    }));
}

/// Per-stream counters, summarized once when the stream ends.
#[derive(Default, Debug)]
pub struct StreamMetric {
    pub chunks: usize,
    pub bytes: usize,
    pub events: BTreeMap<&'static str, usize>,
    pub malformed: usize,
}

impl StreamMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_chunk(&mut self, len: usize) {
        self.chunks += 1;
        self.bytes += len;
    }

    pub fn record_event(&mut self, kind: &'static str) {
        *self.events.entry(kind).or_insert(0) += 1;
    }

    pub fn total_events(&self) -> usize {
        self.events.values().sum()
    }

    pub fn log_summary(&self, outcome: StreamOutcome) {
        let events = if self.events.is_empty() {
            "none".to_string()
        } else {
            self.events
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(", ")
        };

        info!(
            target: "flight_recorder",
            "[STREAM END] Outcome: {:?} | Chunks: {} | Bytes: {} | Events: {} ({}) | Malformed: {}",
            outcome,
            self.chunks,
            self.bytes,
            self.total_events(),
            events,
            self.malformed
        );
    }
}
