/// Backend endpoints
pub const DEFAULT_BASE_URL: &str = "http://localhost:8001/api/v1";
pub const STREAM_PATH: &str = "/chat/stream";
pub const ONE_SHOT_PATH: &str = "/chat";

/// SSE wire markers
pub const DONE_MARKER: &str = "[DONE]";
pub const DATA_DONE_MARKER: &str = "data: [DONE]";
pub const DATA_PREFIX: &str = "data:";
pub const COMMENT_PREFIX: char = ':';
pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// Normalizer fallbacks
pub const UNNAMED_PRODUCT: &str = "Unnamed Product";
pub const UNKNOWN_PROVIDER: &str = "Unknown Provider";
pub const UNCATEGORIZED: &str = "Uncategorized";
pub const ERROR_LOADING_PRODUCT: &str = "Error loading product";
pub const DEFAULT_CURRENCY: &str = "INR";

/// Field locations probed in order, as JSON pointers.
pub const PRODUCT_ID_PATHS: &[&str] = &["/id", "/item_id", "/product_id"];
pub const PRODUCT_NAME_PATHS: &[&str] = &["/name", "/descriptor/name", "/title", "/item_name"];
pub const PRODUCT_PRICE_PATHS: &[&str] = &["/price/value", "/price", "/item_price"];
pub const PRODUCT_CURRENCY_PATHS: &[&str] = &["/price/currency", "/currency"];
pub const PRODUCT_PROVIDER_ID_PATHS: &[&str] = &["/provider/id", "/provider_id", "/bpp_provider_id"];
pub const PRODUCT_PROVIDER_NAME_PATHS: &[&str] = &[
    "/provider/descriptor/name",
    "/provider/name",
    "/provider_name",
];
pub const PRODUCT_IMAGE_PATHS: &[&str] = &["/images", "/descriptor/images", "/image_urls", "/image"];
pub const PRODUCT_CATEGORY_PATHS: &[&str] = &["/category", "/category_id", "/descriptor/category"];
pub const PRODUCT_DESCRIPTION_PATHS: &[&str] = &[
    "/description",
    "/descriptor/short_desc",
    "/descriptor/long_desc",
];

pub const PRODUCT_LIST_PATHS: &[&str] = &["/products", "/data/products", "/items", "/data"];

pub const CART_SUMMARY_PATHS: &[&str] = &["/cart_summary", "/cart", "/data"];
pub const CART_ITEM_ID_PATHS: &[&str] = &["/id", "/item_id", "/product_id"];
pub const CART_ITEM_PRICE_PATHS: &[&str] = &["/price/value", "/price", "/unit_price"];
pub const CART_ITEM_QUANTITY_PATHS: &[&str] = &["/quantity/count", "/quantity", "/qty"];
pub const CART_ITEM_PROVIDER_NAME_PATHS: &[&str] = &[
    "/provider/descriptor/name",
    "/provider/name",
    "/provider_name",
];
pub const CART_ITEM_PROVIDER_ID_PATHS: &[&str] = &["/provider/id", "/provider_id"];

pub const RESPONSE_TEXT_PATHS: &[&str] = &["/content", "/message", "/response"];

/// Bodies the backend sends when it opens a session. Never shown.
pub const SESSION_STARTED_PATTERN: &str =
    r"(?i)^\s*(new\s+)?session\s+(started|created|initiali[sz]ed)\b";

/// Session defaults
pub const NEW_CHAT_TITLE: &str = "New Chat";
pub const TITLE_MAX_CHARS: usize = 32;

/// Price display
pub const CURRENCY_SYMBOL_INR: &str = "₹";
