//! Maps loosely-shaped backend payloads onto the chat model.
//!
//! Every field is read by probing an ordered list of JSON pointers; the
//! first location holding a usable value wins, and literal fallbacks cover
//! the rest. A record that cannot be read at all decodes to an explicit
//! `Unrecognized` shape so one bad record never sinks its batch.

use crate::constants::*;
use crate::types::*;
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
pub enum ProductShape {
    Recognized(Product),
    Unrecognized { reason: String },
}

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    }
}

fn probe_text(raw: &Value, paths: &[&str]) -> Option<String> {
    paths
        .iter()
        .filter_map(|p| raw.pointer(p))
        .find_map(as_text)
}

fn probe_number(raw: &Value, paths: &[&str]) -> Option<f64> {
    paths
        .iter()
        .filter_map(|p| raw.pointer(p))
        .find_map(as_number)
}

fn image_url(v: &Value) -> Option<String> {
    let url = match v {
        Value::String(s) => s.as_str(),
        Value::Object(_) => v.get("url").and_then(|u| u.as_str())?,
        _ => return None,
    };
    let url = url.trim();
    if url.is_empty() {
        None
    } else {
        Some(url.to_string())
    }
}

fn images_at(v: &Value) -> Vec<String> {
    match v {
        Value::Array(entries) => entries.iter().filter_map(image_url).collect(),
        single => image_url(single).into_iter().collect(),
    }
}

fn probe_images(raw: &Value, paths: &[&str]) -> Vec<String> {
    paths
        .iter()
        .filter_map(|p| raw.pointer(p))
        .map(images_at)
        .find(|imgs| !imgs.is_empty())
        .unwrap_or_default()
}

fn category_at(v: &Value) -> Option<String> {
    match v {
        Value::Object(_) => probe_text(v, &["/name", "/descriptor/name", "/id"]),
        other => as_text(other),
    }
}

fn probe_category(raw: &Value, paths: &[&str]) -> Option<String> {
    paths
        .iter()
        .filter_map(|p| raw.pointer(p))
        .find_map(category_at)
}

/// Display name from a provider id such as `seller.example_ONDC:RET10_acme`.
fn provider_name_from_id(provider_id: &str) -> Option<String> {
    let tail = match provider_id.rsplit_once('_') {
        Some((_, tail)) => tail,
        None => return None,
    };
    let tail = tail.trim();
    if tail.is_empty() {
        None
    } else {
        Some(tail.to_string())
    }
}

pub fn decode_product(raw: &Value, index: usize) -> ProductShape {
    if !raw.is_object() {
        return ProductShape::Unrecognized {
            reason: format!("expected object, got {}", json_kind(raw)),
        };
    }

    let provider = ProviderRef {
        id: probe_text(raw, PRODUCT_PROVIDER_ID_PATHS).unwrap_or_default(),
        name: probe_text(raw, PRODUCT_PROVIDER_NAME_PATHS)
            .unwrap_or_else(|| UNKNOWN_PROVIDER.to_string()),
    };

    ProductShape::Recognized(Product {
        id: probe_text(raw, PRODUCT_ID_PATHS).unwrap_or_else(|| format!("product-{}", index)),
        name: probe_text(raw, PRODUCT_NAME_PATHS).unwrap_or_else(|| UNNAMED_PRODUCT.to_string()),
        price: probe_number(raw, PRODUCT_PRICE_PATHS).unwrap_or(0.0),
        currency: probe_text(raw, PRODUCT_CURRENCY_PATHS)
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        category: probe_category(raw, PRODUCT_CATEGORY_PATHS)
            .unwrap_or_else(|| UNCATEGORIZED.to_string()),
        provider,
        images: probe_images(raw, PRODUCT_IMAGE_PATHS),
        description: probe_text(raw, PRODUCT_DESCRIPTION_PATHS),
    })
}

fn error_product(index: usize) -> Product {
    Product {
        id: format!("product-{}", index),
        name: ERROR_LOADING_PRODUCT.to_string(),
        price: 0.0,
        currency: DEFAULT_CURRENCY.to_string(),
        category: UNCATEGORIZED.to_string(),
        provider: ProviderRef {
            id: String::new(),
            name: UNKNOWN_PROVIDER.to_string(),
        },
        images: Vec::new(),
        description: None,
    }
}

pub fn normalize_product(raw: &Value, index: usize) -> Product {
    match decode_product(raw, index) {
        ProductShape::Recognized(p) => p,
        ProductShape::Unrecognized { reason } => {
            tracing::warn!("Unrecognized product record #{}: {}", index, reason);
            error_product(index)
        }
    }
}

/// Products carried by a `raw_products` event, in server order.
pub fn normalize_products(payload: &Value) -> Vec<Product> {
    let list = match payload {
        Value::Array(items) => Some(items),
        _ => PRODUCT_LIST_PATHS
            .iter()
            .filter_map(|p| payload.pointer(p))
            .find_map(|v| v.as_array()),
    };

    match list {
        Some(items) => items
            .iter()
            .enumerate()
            .map(|(i, raw)| normalize_product(raw, i))
            .collect(),
        None => {
            tracing::warn!("raw_products event carried no product list");
            Vec::new()
        }
    }
}

fn normalize_cart_item(raw: &Value, index: usize) -> Option<CartItem> {
    if !raw.is_object() {
        tracing::warn!(
            "Skipping cart item #{}: expected object, got {}",
            index,
            json_kind(raw)
        );
        return None;
    }

    let price = probe_number(raw, CART_ITEM_PRICE_PATHS).unwrap_or(0.0);
    let quantity = match probe_number(raw, CART_ITEM_QUANTITY_PATHS) {
        Some(q) if q >= 0.0 => q.round() as u32,
        Some(_) => 0,
        None => 1,
    };
    let provider_id = probe_text(raw, CART_ITEM_PROVIDER_ID_PATHS).unwrap_or_default();
    let provider_name = match probe_text(raw, CART_ITEM_PROVIDER_NAME_PATHS) {
        Some(name) => name,
        None => match provider_name_from_id(&provider_id) {
            Some(name) => name,
            None => UNKNOWN_PROVIDER.to_string(),
        },
    };

    Some(CartItem {
        id: probe_text(raw, CART_ITEM_ID_PATHS).unwrap_or_else(|| format!("item-{}", index)),
        name: probe_text(raw, PRODUCT_NAME_PATHS).unwrap_or_else(|| UNNAMED_PRODUCT.to_string()),
        price,
        quantity,
        total_price: probe_number(raw, &["/total_price", "/subtotal"])
            .unwrap_or(price * quantity as f64),
        category: probe_category(raw, PRODUCT_CATEGORY_PATHS)
            .unwrap_or_else(|| UNCATEGORIZED.to_string()),
        provider_id,
        provider_name,
    })
}

fn cart_summary(payload: &Value) -> &Value {
    CART_SUMMARY_PATHS
        .iter()
        .filter_map(|p| payload.pointer(p))
        .find(|v| v.is_object())
        .unwrap_or(payload)
}

/// Rebuilds the cart snapshot from a `raw_cart` event.
///
/// `is_empty` is true whenever no items survive normalization; otherwise a
/// server flag is honored when present. `ready_for_checkout` is always
/// recomputed from the items.
pub fn normalize_cart(payload: &Value) -> CartContext {
    let summary = cart_summary(payload);

    let items: Vec<CartItem> = match summary.get("items").and_then(|i| i.as_array()) {
        Some(raw_items) => raw_items
            .iter()
            .enumerate()
            .filter_map(|(i, raw)| normalize_cart_item(raw, i))
            .collect(),
        None => Vec::new(),
    };

    let total_items = match probe_number(summary, &["/total_items"]) {
        Some(n) if n >= 0.0 => n.round() as u32,
        _ => items.iter().map(|i| i.quantity).sum(),
    };
    let total_value = match probe_number(summary, &["/total_value", "/total"]) {
        Some(v) => v,
        None => items.iter().map(|i| i.total_price).sum(),
    };
    let provider_count = items
        .iter()
        .map(|i| {
            if i.provider_id.is_empty() {
                i.provider_name.as_str()
            } else {
                i.provider_id.as_str()
            }
        })
        .collect::<HashSet<_>>()
        .len();

    let is_empty = if items.is_empty() {
        true
    } else {
        summary
            .get("is_empty")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    };
    let ready_for_checkout = !is_empty && items.iter().all(|i| i.quantity > 0);

    CartContext {
        items,
        total_items,
        total_value,
        provider_count,
        is_empty,
        ready_for_checkout,
    }
}

fn next_actions(payload: &Value) -> Vec<String> {
    match payload.get("next_actions").and_then(|v| v.as_array()) {
        Some(actions) => actions
            .iter()
            .filter_map(|a| match a {
                Value::Object(_) => probe_text(a, &["/label", "/text", "/action"]),
                other => as_text(other),
            })
            .collect(),
        None => Vec::new(),
    }
}

/// Turns a `response` event into the single terminal message it renders as.
pub fn normalize_response(payload: &Value) -> MessageBody {
    let text = probe_text(payload, RESPONSE_TEXT_PATHS);

    let failed = payload.get("success").and_then(|s| s.as_bool()) == Some(false);
    if failed || payload.get("error").is_some_and(|e| !e.is_null()) {
        let message = probe_text(payload, &["/error/message", "/error"])
            .or(text)
            .unwrap_or_else(|| "Something went wrong. Please try again.".to_string());
        return MessageBody::Error {
            message,
            retryable: true,
        };
    }

    let order_id = probe_text(payload, &["/order/id", "/order/order_id", "/order_id"]);
    if let Some(order_id) = order_id {
        return MessageBody::OrderConfirmation(OrderConfirmation {
            order_id,
            status: probe_text(payload, &["/order/status", "/status"])
                .unwrap_or_else(|| "confirmed".to_string()),
            total: probe_number(payload, &["/order/total", "/order/total_value", "/total"]),
            message: text.unwrap_or_else(|| "Order placed successfully".to_string()),
        });
    }

    let stage = probe_text(payload, &["/checkout_stage/stage", "/checkout_stage", "/stage"]);
    if let Some(stage) = stage {
        return MessageBody::CheckoutStage {
            stage: CheckoutStep::parse(&stage),
            message: text.unwrap_or_default(),
        };
    }

    let actions = next_actions(payload);
    if !actions.is_empty() {
        return MessageBody::Success {
            message: text.unwrap_or_default(),
            next_actions: actions,
        };
    }

    MessageBody::Bot {
        content: text.unwrap_or_default(),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
