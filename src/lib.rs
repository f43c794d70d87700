#![allow(clippy::manual_unwrap_or_default)]
#![allow(clippy::manual_unwrap_or)]

pub mod actions;
pub mod client;
pub mod constants;
pub mod dispatch;
pub mod logging;
pub mod main_helper;
pub mod normalize;
pub mod reducer;
pub mod request;
pub mod sse;
pub mod str_utils;
pub mod streaming;
pub mod tui;
pub mod types;

pub use types::*;

pub use client::ShopClient;
pub use main_helper::{Args, ClientSettings, FetchMode};
pub use streaming::{StreamHandler, StreamObserver, StreamOutcome};
