use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing_error::SpanTrace;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChatId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub Uuid);

/// Session id assigned by the backend, echoed back on every request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BackendSessionId(pub String);

impl ChatId {
    pub fn new() -> Self {
        Self(format!("c{}", Uuid::new_v4().simple()))
    }

    pub fn short(&self) -> &str {
        crate::str_utils::prefix_chars(&self.0, 7)
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ChatId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for BackendSessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BackendSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum ShopChatError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error! status: {0}")]
    Http(u16),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unknown chat: {0}")]
    UnknownChat(String),

    #[error("The last remaining chat cannot be closed")]
    LastChat,
}

#[derive(Debug)]
pub struct ObservedError {
    pub inner: ShopChatError,
    pub span_trace: SpanTrace,
}

impl fmt::Display for ObservedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for ObservedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl<E> From<E> for ObservedError
where
    E: Into<ShopChatError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

impl ObservedError {
    /// Full report including the span trace, for log files.
    pub fn report(&self) -> String {
        format!("{}\n\nSpan Trace:\n{}", self.inner, self.span_trace)
    }
}

pub type Result<T> = std::result::Result<T, ObservedError>;

/// --- CATALOG & CART ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProviderRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub currency: String,
    pub category: String,
    pub provider: ProviderRef,
    pub images: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartItem {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub quantity: u32,
    pub total_price: f64,
    pub category: String,
    pub provider_id: String,
    pub provider_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CartContext {
    pub items: Vec<CartItem>,
    pub total_items: u32,
    pub total_value: f64,
    pub provider_count: usize,
    pub is_empty: bool,
    pub ready_for_checkout: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStep {
    Address,
    Payment,
    Review,
    Confirmed,
    Other(String),
}

impl CheckoutStep {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "address" | "delivery" | "shipping" => Self::Address,
            "payment" => Self::Payment,
            "review" | "summary" => Self::Review,
            "confirmed" | "complete" | "completed" => Self::Confirmed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Address => "Delivery address",
            Self::Payment => "Payment",
            Self::Review => "Review order",
            Self::Confirmed => "Confirmed",
            Self::Other(s) => s.as_str(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderConfirmation {
    pub order_id: String,
    pub status: String,
    pub total: Option<f64>,
    pub message: String,
}

/// --- CHAT MODEL ---

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    User { content: String },
    Bot { content: String },
    Thinking { message: String },
    ToolExecuting { tool: String, status: String },
    ProductList { products: Vec<Product> },
    CartView { cart: CartContext },
    CheckoutStage { stage: CheckoutStep, message: String },
    Error { message: String, retryable: bool },
    OrderConfirmation(OrderConfirmation),
    Success { message: String, next_actions: Vec<String> },
}

impl MessageBody {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Thinking { .. } | Self::ToolExecuting { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Bot { .. } => "bot",
            Self::Thinking { .. } => "bot_thinking",
            Self::ToolExecuting { .. } => "bot_tool_executing",
            Self::ProductList { .. } => "bot_product_list",
            Self::CartView { .. } => "bot_cart",
            Self::CheckoutStage { .. } => "bot_checkout_stage",
            Self::Error { .. } => "bot_error",
            Self::OrderConfirmation(_) => "bot_order_confirmation",
            Self::Success { .. } => "bot_success",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub id: MessageId,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl ChatMessage {
    pub fn new(body: MessageBody) -> Self {
        Self {
            id: MessageId::new(),
            body,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatSession {
    pub id: ChatId,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub backend_session: Option<BackendSessionId>,
    pub last_user_text: Option<String>,
}

impl ChatSession {
    pub fn new(id: ChatId) -> Self {
        Self {
            id,
            title: crate::constants::NEW_CHAT_TITLE.to_string(),
            messages: Vec::new(),
            backend_session: None,
            last_user_text: None,
        }
    }

    pub fn placeholder_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.body.is_placeholder())
            .count()
    }

    /// Products from the most recent product list, used by `/add`.
    pub fn latest_products(&self) -> Option<&[Product]> {
        self.messages.iter().rev().find_map(|m| match &m.body {
            MessageBody::ProductList { products } => Some(products.as_slice()),
            _ => None,
        })
    }

    pub fn latest_cart(&self) -> Option<&CartContext> {
        self.messages.iter().rev().find_map(|m| match &m.body {
            MessageBody::CartView { cart } => Some(cart),
            _ => None,
        })
    }
}

pub fn format_price(price: f64) -> String {
    format!("{}{:.2}", crate::constants::CURRENCY_SYMBOL_INR, price)
}
