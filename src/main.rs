use shopchat::dispatch::{Dispatcher, Update};
use shopchat::reducer::{Action, ChatState};
use shopchat::tui::{App, TuiEvent};
use shopchat::*;

use clap::Parser;
use colored::Colorize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::Layer;

struct TuiLayer {
    tx: broadcast::Sender<TuiEvent>,
}

impl<S> Layer<S> for TuiLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut message = String::new();
        let mut visitor = LogVisitor {
            message: &mut message,
        };
        event.record(&mut visitor);

        let metadata = event.metadata();
        let _ = self.tx.send(TuiEvent::LogMessage {
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message,
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
        });
    }
}

struct LogVisitor<'a> {
    message: &'a mut String,
}

impl<'a> tracing::field::Visit for LogVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message.push_str(&format!("{:?}", value));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        }
    }
}

/// Runs one turn without the TUI and prints the resulting transcript.
async fn ask(
    dispatcher: &mut Dispatcher,
    rx: &mut mpsc::UnboundedReceiver<Update>,
    text: &str,
    json: bool,
) -> Result<()> {
    let mut state = ChatState::new();
    if dispatcher.send(&mut state, text).is_none() {
        return Err(ShopChatError::Protocol("nothing to send".to_string()).into());
    }

    while let Some(update) = rx.recv().await {
        let done = matches!(update.action, Action::Completed { .. });
        dispatcher.apply(&mut state, update);
        if done {
            break;
        }
    }

    let session = state.active();
    if json {
        println!("{}", serde_json::to_string_pretty(&session.messages)?);
        return Ok(());
    }

    for message in &session.messages {
        for line in tui::message_lines(&message.body) {
            let text: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
            let styled = match &message.body {
                MessageBody::User { .. } => text.cyan(),
                MessageBody::Error { .. } => text.red(),
                MessageBody::ProductList { .. } | MessageBody::CartView { .. } => text.normal(),
                MessageBody::OrderConfirmation(_) => text.green().bold(),
                _ => text.white(),
            };
            println!("{}", styled);
        }
        println!();
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let (tx_tui, rx_tui) = broadcast::channel(256);

    use tracing_subscriber::prelude::*;

    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => "shopchat=debug,flight_recorder=info".into(),
    };

    let file_appender = tracing_appender::rolling::daily(&args.log_dir, "shopchat.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .with(TuiLayer { tx: tx_tui.clone() })
        .with(tracing_error::ErrorLayer::default())
        .init();

    shopchat::logging::setup_panic_hook();

    let settings = ClientSettings::from(&args);
    let client = match ShopClient::new(&settings) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to build HTTP client: {}", e.report());
            eprintln!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        "shopchat starting against {} ({:?} mode)",
        settings.base_url,
        settings.mode
    );

    let (mut dispatcher, mut rx_updates) = Dispatcher::new(Arc::new(client));

    if let Some(text) = args.ask.as_deref() {
        if let Err(e) = ask(&mut dispatcher, &mut rx_updates, text, args.json).await {
            eprintln!("{}", format!("Error: {}", e).red());
            std::process::exit(1);
        }
        return;
    }

    let endpoint = format!("{} · {:?}", settings.base_url, settings.mode);
    let app = App::new(dispatcher, rx_updates, rx_tui, endpoint);
    if let Err(e) = app.run().await {
        shopchat::tui::restore_terminal();
        eprintln!("TUI error: {}", e);
        std::process::exit(1);
    }
}
