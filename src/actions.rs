//! Cart and catalog actions. The server owns cart state, so every action is
//! expressed as the chat message that asks the assistant to perform it.

use crate::types::{CartContext, CartItem, Product};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartAction {
    Add { name: String },
    Remove { name: String },
    SetQuantity { name: String, quantity: i64 },
    Checkout,
    Browse,
}

impl CartAction {
    pub fn add(product: &Product) -> Self {
        Self::Add {
            name: product.name.clone(),
        }
    }

    pub fn remove(item: &CartItem) -> Self {
        Self::Remove {
            name: item.name.clone(),
        }
    }

    /// A quantity of zero or less removes the item.
    pub fn set_quantity(item: &CartItem, quantity: i64) -> Self {
        if quantity <= 0 {
            Self::remove(item)
        } else {
            Self::SetQuantity {
                name: item.name.clone(),
                quantity,
            }
        }
    }

    pub fn increment(item: &CartItem) -> Self {
        Self::set_quantity(item, item.quantity as i64 + 1)
    }

    pub fn decrement(item: &CartItem) -> Self {
        Self::set_quantity(item, item.quantity as i64 - 1)
    }

    /// Checkout is only offered once the cart is ready for it.
    pub fn checkout(cart: &CartContext) -> Option<Self> {
        if cart.ready_for_checkout {
            Some(Self::Checkout)
        } else {
            None
        }
    }

    pub fn to_message(&self) -> String {
        match self {
            Self::Add { name } => format!("add {} to cart", name),
            Self::Remove { name } => format!("remove {} from cart", name),
            Self::SetQuantity { name, quantity } => {
                format!("update quantity of {} to {}", name, quantity)
            }
            Self::Checkout => "proceed to checkout".to_string(),
            Self::Browse => "show me products".to_string(),
        }
    }
}

fn cart_item(cart: Option<&CartContext>, idx: usize) -> std::result::Result<&CartItem, String> {
    cart.and_then(|c| c.items.get(idx))
        .ok_or_else(|| format!("no cart item #{}", idx + 1))
}

/// Parses the TUI's slash commands against what the chat currently shows.
/// Indexes are 1-based as displayed.
pub fn parse_command(
    input: &str,
    products: Option<&[Product]>,
    cart: Option<&CartContext>,
) -> Option<std::result::Result<CartAction, String>> {
    let mut parts = input.split_whitespace();
    let cmd = parts.next()?;
    if !cmd.starts_with('/') {
        return None;
    }
    let arg = |v: Option<&str>| -> std::result::Result<usize, String> {
        match v.and_then(|s| s.parse::<usize>().ok()) {
            Some(n) if n >= 1 => Ok(n - 1),
            _ => Err(format!("usage: {} <number>", cmd)),
        }
    };

    let action = match cmd {
        "/add" => arg(parts.next()).and_then(|idx| {
            products
                .and_then(|p| p.get(idx))
                .map(CartAction::add)
                .ok_or_else(|| format!("no product #{}", idx + 1))
        }),
        "/rm" | "/remove" => arg(parts.next()).and_then(|idx| cart_item(cart, idx).map(CartAction::remove)),
        "/inc" => arg(parts.next()).and_then(|idx| cart_item(cart, idx).map(CartAction::increment)),
        "/dec" => arg(parts.next()).and_then(|idx| cart_item(cart, idx).map(CartAction::decrement)),
        "/qty" => arg(parts.next()).and_then(|idx| {
            let quantity = parts
                .next()
                .and_then(|q| q.parse::<i64>().ok())
                .ok_or_else(|| "usage: /qty <item> <quantity>".to_string())?;
            cart_item(cart, idx).map(|item| CartAction::set_quantity(item, quantity))
        }),
        "/checkout" => match cart.and_then(CartAction::checkout) {
            Some(a) => Ok(a),
            None => Err("cart is not ready for checkout".to_string()),
        },
        "/browse" => Ok(CartAction::Browse),
        _ => return None,
    };
    Some(action)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, quantity: u32) -> CartItem {
        CartItem {
            id: name.to_lowercase(),
            name: name.to_string(),
            price: 100.0,
            quantity,
            total_price: 100.0 * quantity as f64,
            category: "Grocery".into(),
            provider_id: "p_1".into(),
            provider_name: "1".into(),
        }
    }

    #[test]
    fn outbound_phrases_match_assistant_vocabulary() {
        let rice = item("Basmati Rice", 2);
        assert_eq!(CartAction::remove(&rice).to_message(), "remove Basmati Rice from cart");
        assert_eq!(
            CartAction::increment(&rice).to_message(),
            "update quantity of Basmati Rice to 3"
        );
        assert_eq!(CartAction::Checkout.to_message(), "proceed to checkout");
        assert_eq!(CartAction::Browse.to_message(), "show me products");
    }

    #[test]
    fn decrement_to_zero_becomes_remove() {
        let salt = item("Salt", 1);
        assert_eq!(
            CartAction::decrement(&salt),
            CartAction::Remove {
                name: "Salt".into()
            }
        );
    }

    #[test]
    fn checkout_refused_when_cart_not_ready() {
        let cart = CartContext {
            items: vec![item("Salt", 1)],
            ready_for_checkout: false,
            ..CartContext::default()
        };
        assert_eq!(
            parse_command("/checkout", None, Some(&cart)),
            Some(Err("cart is not ready for checkout".to_string()))
        );
    }

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse_command("show me my cart", None, None), None);
        assert_eq!(parse_command("/unknown 1", None, None), None);
    }

    #[test]
    fn qty_command_targets_listed_item() {
        let cart = CartContext {
            items: vec![item("Salt", 1), item("Sugar", 1)],
            ..CartContext::default()
        };
        assert_eq!(
            parse_command("/qty 2 4", None, Some(&cart)),
            Some(Ok(CartAction::SetQuantity {
                name: "Sugar".into(),
                quantity: 4
            }))
        );
    }
}
