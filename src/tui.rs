use crate::actions::parse_command;
use crate::dispatch::{Dispatcher, Update};
use crate::reducer::ChatState;
use crate::types::*;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    widgets::{Block, BorderType, Borders, List, ListItem, Paragraph, Wrap},
};
use std::collections::VecDeque;
use std::{io, time::Duration};
use tokio::sync::{broadcast, mpsc};

const MAX_LOG_LINES: usize = 1000;

#[derive(Clone, Debug)]
pub enum TuiEvent {
    LogMessage {
        level: String,
        target: String,
        message: String,
        timestamp: String,
    },
}

/// Leaves raw mode and the alternate screen. Safe to call more than once.
pub fn restore_terminal() {
    let _ = disable_raw_mode();
    let _ = execute!(io::stdout(), LeaveAlternateScreen);
}

pub struct AppState {
    chats: ChatState,
    input: String,
    status: Option<String>,
    logs: VecDeque<String>,
    show_sidebar: bool,
    show_console: bool,
    /// Lines scrolled up from the bottom of the transcript.
    scroll_back: u16,
    endpoint: String,
    should_quit: bool,
}

impl AppState {
    pub fn new(endpoint: String) -> Self {
        Self {
            chats: ChatState::new(),
            input: String::new(),
            status: None,
            logs: VecDeque::new(),
            show_sidebar: true,
            show_console: false,
            scroll_back: 0,
            endpoint,
            should_quit: false,
        }
    }

    pub fn chats(&self) -> &ChatState {
        &self.chats
    }

    fn handle_event(&mut self, event: TuiEvent) {
        match event {
            TuiEvent::LogMessage {
                level,
                target,
                message,
                timestamp,
            } => self.handle_log_message(timestamp, level, target, message),
        }
    }

    fn handle_log_message(&mut self, timestamp: String, level: String, target: String, message: String) {
        let log_line = format!("{} [{}] {}: {}", timestamp, level, target, message);
        self.logs.push_back(log_line);
        if self.logs.len() > MAX_LOG_LINES {
            self.logs.pop_front();
        }
    }
}

pub struct App {
    rx_logs: broadcast::Receiver<TuiEvent>,
    rx_updates: mpsc::UnboundedReceiver<Update>,
    dispatcher: Dispatcher,
    state: AppState,
}

impl App {
    pub fn new(
        dispatcher: Dispatcher,
        rx_updates: mpsc::UnboundedReceiver<Update>,
        rx_logs: broadcast::Receiver<TuiEvent>,
        endpoint: String,
    ) -> Self {
        Self {
            rx_logs,
            rx_updates,
            dispatcher,
            state: AppState::new(endpoint),
        }
    }

    pub async fn run(mut self) -> io::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        loop {
            terminal.draw(|f| self.render(f))?;

            if crossterm::event::poll(Duration::from_millis(30))? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => self.handle_key(key),
                    Event::Resize(_, _) => terminal.autoresize()?,
                    _ => {}
                }
            }

            while let Ok(update) = self.rx_updates.try_recv() {
                self.dispatcher.apply(&mut self.state.chats, update);
            }
            loop {
                match self.rx_logs.try_recv() {
                    Ok(event) => self.state.handle_event(event),
                    Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }

            if self.state.should_quit {
                break;
            }
        }

        self.dispatcher.shutdown();
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        Ok(())
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') if ctrl => self.state.should_quit = true,
            KeyCode::Char('n') if ctrl => {
                self.state.chats.create_session();
                self.state.scroll_back = 0;
            }
            KeyCode::Char('w') if ctrl => {
                let id = self.state.chats.active_id().clone();
                if let Err(e) = self.dispatcher.close_chat(&mut self.state.chats, &id) {
                    self.state.status = Some(e.to_string());
                }
            }
            KeyCode::Char('r') if ctrl => {
                if self.dispatcher.retry(&mut self.state.chats).is_none() {
                    self.state.status = Some("Nothing to retry".to_string());
                }
            }
            KeyCode::Char('b') if ctrl => self.state.show_sidebar = !self.state.show_sidebar,
            KeyCode::Char('l') if ctrl => self.state.show_console = !self.state.show_console,
            KeyCode::Tab => self.switch(1),
            KeyCode::BackTab => self.switch(-1),
            KeyCode::Right if ctrl => self.switch(1),
            KeyCode::Left if ctrl => self.switch(-1),
            KeyCode::Esc => {
                if !self.dispatcher.abort_active(&self.state.chats) {
                    self.state.status = None;
                }
            }
            KeyCode::PageUp => self.state.scroll_back = self.state.scroll_back.saturating_add(5),
            KeyCode::PageDown => self.state.scroll_back = self.state.scroll_back.saturating_sub(5),
            KeyCode::Enter => self.submit(),
            KeyCode::Backspace => {
                self.state.input.pop();
            }
            KeyCode::Char(c) if !ctrl => self.state.input.push(c),
            _ => {}
        }
    }

    fn switch(&mut self, offset: isize) {
        self.state.chats.cycle_session(offset);
        self.state.scroll_back = 0;
    }

    fn submit(&mut self) {
        let input = std::mem::take(&mut self.state.input);
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return;
        }
        self.state.status = None;
        self.state.scroll_back = 0;

        let text = if trimmed.starts_with('/') {
            let session = self.state.chats.active();
            match parse_command(trimmed, session.latest_products(), session.latest_cart()) {
                Some(Ok(action)) => action.to_message(),
                Some(Err(msg)) => {
                    self.state.status = Some(msg);
                    return;
                }
                None => {
                    self.state.status = Some(
                        "commands: /add n, /rm n, /inc n, /dec n, /qty n q, /checkout, /browse"
                            .to_string(),
                    );
                    return;
                }
            }
        } else {
            trimmed.to_string()
        };
        self.dispatcher.send(&mut self.state.chats, &text);
    }

    fn render(&mut self, f: &mut Frame) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // Header
                Constraint::Min(0),    // Main Content
                Constraint::Length(3), // Input
                Constraint::Length(1), // Footer
            ])
            .split(f.size());

        self.render_header(f, rows[0]);

        let mut main = rows[1];
        if self.state.show_console {
            let split = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
                .split(main);
            main = split[0];
            self.render_console(f, split[1]);
        }

        if self.state.show_sidebar && main.width >= 60 {
            let cols = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Length(26), Constraint::Min(0)])
                .split(main);
            self.render_sidebar(f, cols[0]);
            self.render_transcript(f, cols[1]);
        } else {
            self.render_transcript(f, main);
        }

        self.render_input(f, rows[2]);
        self.render_footer(f, rows[3]);
    }

    fn render_header(&self, f: &mut Frame, area: Rect) {
        let header = Line::from(vec![
            Span::styled(
                " SHOPCHAT ",
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(" "),
            Span::styled(self.state.endpoint.clone(), Style::default().fg(Color::DarkGray)),
        ]);
        f.render_widget(Paragraph::new(header), area);
    }

    fn render_sidebar(&self, f: &mut Frame, area: Rect) {
        let active = self.state.chats.active_id();
        let items: Vec<ListItem> = self
            .state
            .chats
            .sessions()
            .iter()
            .map(|s| {
                let busy = if self.dispatcher.is_busy(&s.id) { "● " } else { "  " };
                let style = if &s.id == active {
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                ListItem::new(format!("{}{}", busy, s.title)).style(style)
            })
            .collect();

        let list = List::new(items).block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .title(" CHATS "),
        );
        f.render_widget(list, area);
    }

    fn render_transcript(&self, f: &mut Frame, area: Rect) {
        let session = self.state.chats.active();
        let mut lines: Vec<Line> = Vec::new();
        if session.messages.is_empty() {
            lines.push(Line::styled(
                "Ask for products, manage your cart or check out.",
                Style::default().fg(Color::DarkGray),
            ));
        }
        for message in &session.messages {
            lines.extend(message_lines(&message.body));
            lines.push(Line::from(""));
        }

        let inner_width = area.width.saturating_sub(2).max(1) as usize;
        let total: usize = lines
            .iter()
            .map(|l| l.width().max(1).div_ceil(inner_width))
            .sum();
        let visible = area.height.saturating_sub(2) as usize;
        let bottom = total.saturating_sub(visible) as u16;
        let offset = bottom.saturating_sub(self.state.scroll_back);

        let title = format!(" {} ", session.title);
        let p = Paragraph::new(lines)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_type(BorderType::Rounded)
                    .title(title),
            )
            .wrap(Wrap { trim: false })
            .scroll((offset, 0));
        f.render_widget(p, area);
    }

    fn render_input(&self, f: &mut Frame, area: Rect) {
        let busy = self.dispatcher.is_busy(self.state.chats.active_id());
        let title = if busy { " MESSAGE (waiting…) " } else { " MESSAGE " };
        let p = Paragraph::new(self.state.input.as_str()).block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(Style::default().fg(if busy { Color::Yellow } else { Color::Cyan })),
        );
        f.render_widget(p, area);

        let max_x = area.width.saturating_sub(2);
        let cursor = (self.state.input.chars().count() as u16).min(max_x);
        f.set_cursor(area.x + 1 + cursor, area.y + 1);
    }

    fn render_footer(&self, f: &mut Frame, area: Rect) {
        let text = match &self.state.status {
            Some(s) => Line::styled(format!(" {} ", s), Style::default().fg(Color::Yellow)),
            None if area.width < 85 => Line::raw(
                " [^C] Quit | [^N] New | [^W] Close | [Tab] Switch | [^R] Retry | [Esc] Abort ",
            ),
            None => Line::raw(
                " [Ctrl-C] Quit | [Ctrl-N] New chat | [Ctrl-W] Close | [Tab] Switch | [Ctrl-R] Retry | [Esc] Abort | [Ctrl-B] Chats | [Ctrl-L] Logs ",
            ),
        };
        f.render_widget(Paragraph::new(text), area);
    }

    fn render_console(&self, f: &mut Frame, area: Rect) {
        let logs_to_show: Vec<ListItem> = self
            .state
            .logs
            .iter()
            .rev()
            .take(area.height.saturating_sub(2) as usize)
            .rev()
            .map(|line| {
                let style = if line.contains("[ERROR]") {
                    Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
                } else if line.contains("[WARN]") {
                    Style::default().fg(Color::Yellow)
                } else if line.contains("[DEBUG]") {
                    Style::default().fg(Color::DarkGray)
                } else {
                    Style::default()
                };
                ListItem::new(line.clone()).style(style)
            })
            .collect();

        let list = List::new(logs_to_show).block(
            Block::default()
                .borders(Borders::ALL)
                .title(" LOGS ")
                .border_style(Style::default().fg(Color::DarkGray)),
        );
        f.render_widget(list, area);
    }
}

fn label(text: &str, color: Color) -> Span<'static> {
    Span::styled(
        text.to_string(),
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    )
}

fn dim(text: String) -> Span<'static> {
    Span::styled(text, Style::default().fg(Color::DarkGray))
}

/// Renders one chat message as terminal lines.
pub fn message_lines(body: &MessageBody) -> Vec<Line<'static>> {
    match body {
        MessageBody::User { content } => {
            vec![Line::from(vec![label("You: ", Color::Cyan), Span::raw(content.clone())])]
        }
        MessageBody::Bot { content } => {
            let mut lines = vec![Line::from(label("Assistant:", Color::Green))];
            lines.extend(content.lines().map(|l| Line::raw(l.to_string())));
            lines
        }
        MessageBody::Thinking { message } => {
            let text = if message.is_empty() {
                "Thinking...".to_string()
            } else {
                format!("… {}", message)
            };
            vec![Line::styled(
                text,
                Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::ITALIC),
            )]
        }
        MessageBody::ToolExecuting { tool, status } => vec![Line::from(vec![
            label("⚙ ", Color::Yellow),
            Span::styled(format!("{} {}", tool, status), Style::default().fg(Color::Yellow)),
        ])],
        MessageBody::ProductList { products } => product_lines(products),
        MessageBody::CartView { cart } => cart_lines(cart),
        MessageBody::CheckoutStage { stage, message } => {
            let mut lines = vec![Line::from(vec![
                label("Checkout · ", Color::Magenta),
                Span::raw(stage.label().to_string()),
            ])];
            lines.extend(message.lines().map(|l| Line::raw(l.to_string())));
            lines
        }
        MessageBody::Error { message, retryable } => {
            let mut lines = vec![Line::from(vec![
                label("⚠ ", Color::Red),
                Span::styled(message.clone(), Style::default().fg(Color::Red)),
            ])];
            if *retryable {
                lines.push(Line::from(dim("Press Ctrl-R to retry".to_string())));
            }
            lines
        }
        MessageBody::OrderConfirmation(order) => {
            let mut lines = vec![Line::from(vec![
                label("✔ Order ", Color::Green),
                Span::styled(order.order_id.clone(), Style::default().add_modifier(Modifier::BOLD)),
                Span::raw(format!(" ({})", order.status)),
            ])];
            if let Some(total) = order.total {
                lines.push(Line::raw(format!("Total: {}", format_price(total))));
            }
            if !order.message.is_empty() {
                lines.push(Line::raw(order.message.clone()));
            }
            lines
        }
        MessageBody::Success {
            message,
            next_actions,
        } => {
            let mut lines: Vec<Line> = message.lines().map(|l| Line::raw(l.to_string())).collect();
            if !next_actions.is_empty() {
                lines.push(Line::from(vec![
                    label("Next: ", Color::Cyan),
                    Span::raw(next_actions.join(" | ")),
                ]));
            }
            lines
        }
    }
}

fn product_lines(products: &[Product]) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(label(
        &format!("Found {} products", products.len()),
        Color::Green,
    ))];
    for (i, p) in products.iter().enumerate() {
        lines.push(Line::from(vec![
            Span::styled(format!("[{}] ", i + 1), Style::default().fg(Color::Cyan)),
            Span::styled(p.name.clone(), Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("  "),
            Span::styled(format_price(p.price), Style::default().fg(Color::Green)),
        ]));
        lines.push(Line::from(dim(format!(
            "    Provider: {} · {}",
            p.provider.name, p.category
        ))));
        let description = p
            .description
            .clone()
            .unwrap_or_else(|| "No description available".to_string());
        lines.push(Line::raw(format!("    {}", description)));
        let image = match p.images.first() {
            Some(url) => url.clone(),
            None => "No Image".to_string(),
        };
        lines.push(Line::from(dim(format!("    {}", image))));
    }
    lines.push(Line::from(dim("/add <n> to add to cart".to_string())));
    lines
}

fn cart_lines(cart: &CartContext) -> Vec<Line<'static>> {
    if cart.is_empty {
        return vec![
            Line::from(label("Your cart is empty", Color::Yellow)),
            Line::raw("Start shopping to add items to your cart"),
            Line::from(dim("/browse: Browse Products".to_string())),
        ];
    }

    let mut lines = vec![Line::from(vec![
        label("Shopping Cart", Color::Green),
        Span::raw(format!("  {} items", cart.total_items)),
    ])];
    if cart.provider_count > 1 {
        lines.push(Line::from(dim(format!(
            "Items from {} providers",
            cart.provider_count
        ))));
    }
    for (i, item) in cart.items.iter().enumerate() {
        lines.push(Line::from(vec![
            Span::styled(format!("[{}] ", i + 1), Style::default().fg(Color::Cyan)),
            Span::styled(item.name.clone(), Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(format!(
                "  {} × {} = {}",
                item.quantity,
                format_price(item.price),
                format_price(item.total_price)
            )),
        ]));
        lines.push(Line::from(dim(format!("    {}", item.provider_name))));
    }
    lines.push(Line::from(vec![
        label("Total: ", Color::Green),
        Span::raw(format_price(cart.total_value)),
    ]));
    let footer = if cart.ready_for_checkout {
        "/checkout: Proceed to Checkout"
    } else {
        "Complete Cart Setup"
    };
    lines.push(Line::from(dim(footer.to_string())));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ShopClient;
    use crate::main_helper::FetchMode;
    use std::sync::Arc;

    fn text(lines: &[Line]) -> String {
        lines
            .iter()
            .map(|l| {
                l.spans
                    .iter()
                    .map(|s| s.content.as_ref())
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn app() -> App {
        let client = ShopClient::with_client(
            reqwest::Client::new(),
            "http://127.0.0.1:9/api/v1",
            FetchMode::Stream,
        );
        let (dispatcher, rx) = Dispatcher::new(Arc::new(client));
        let (_tx, rx_logs) = broadcast::channel(8);
        App::new(dispatcher, rx, rx_logs, "test".into())
    }

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn empty_cart_offers_browse() {
        let rendered = text(&message_lines(&MessageBody::CartView {
            cart: CartContext {
                is_empty: true,
                ..CartContext::default()
            },
        }));
        assert!(rendered.contains("Your cart is empty"));
        assert!(rendered.contains("Browse Products"));
    }

    fn cart_from(providers: &[&str]) -> CartContext {
        let items: Vec<CartItem> = providers
            .iter()
            .enumerate()
            .map(|(i, p)| CartItem {
                id: format!("item-{}", i),
                name: format!("Item {}", i),
                price: 100.0,
                quantity: 1,
                total_price: 100.0,
                category: "Grocery".into(),
                provider_id: p.to_string(),
                provider_name: p.to_string(),
            })
            .collect();
        CartContext {
            total_items: items.len() as u32,
            total_value: 100.0 * items.len() as f64,
            provider_count: providers
                .iter()
                .collect::<std::collections::HashSet<_>>()
                .len(),
            is_empty: false,
            ready_for_checkout: true,
            items,
        }
    }

    #[test]
    fn provider_count_shown_only_for_several_providers() {
        let single = text(&message_lines(&MessageBody::CartView {
            cart: cart_from(&["acme", "acme"]),
        }));
        assert!(!single.contains("Items from"));

        let several = text(&message_lines(&MessageBody::CartView {
            cart: cart_from(&["acme", "globex"]),
        }));
        assert!(several.contains("Items from 2 providers"));
        assert!(several.contains("Proceed to Checkout"));
    }

    #[test]
    fn retryable_error_shows_hint() {
        let rendered = text(&message_lines(&MessageBody::Error {
            message: "HTTP error! status: 500".into(),
            retryable: true,
        }));
        assert!(rendered.contains("HTTP error! status: 500"));
        assert!(rendered.contains("Ctrl-R"));
    }

    #[test]
    fn ctrl_n_opens_and_ctrl_w_closes_chat() {
        let mut app = app();
        app.handle_key(key(KeyCode::Char('n'), KeyModifiers::CONTROL));
        assert_eq!(app.state().chats().sessions().len(), 2);
        app.handle_key(key(KeyCode::Char('w'), KeyModifiers::CONTROL));
        assert_eq!(app.state().chats().sessions().len(), 1);
        app.handle_key(key(KeyCode::Char('w'), KeyModifiers::CONTROL));
        assert_eq!(app.state().chats().sessions().len(), 1);
        assert!(app.state.status.is_some());
    }

    #[test]
    fn bad_command_sets_status_without_sending() {
        let mut app = app();
        for c in "/add 3".chars() {
            app.handle_key(key(KeyCode::Char(c), KeyModifiers::NONE));
        }
        app.handle_key(key(KeyCode::Enter, KeyModifiers::NONE));
        assert_eq!(app.state.status.as_deref(), Some("no product #3"));
        assert!(app.state().chats().active().messages.is_empty());
    }
}
