use crate::constants::DEFAULT_BASE_URL;
use clap::{Parser, ValueEnum};
use std::time::Duration;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Server-Sent-Events streaming call.
    #[default]
    Stream,
    /// Single POST returning one JSON object.
    Once,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Terminal chat client for the shopping assistant", long_about = None)]
pub struct Args {
    #[arg(long, env = "SHOPCHAT_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,
    #[arg(long, value_enum, default_value_t = FetchMode::Stream)]
    pub mode: FetchMode,
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,
    /// Overall request timeout. Streams are long-lived, so off by default.
    #[arg(long)]
    pub request_timeout_secs: Option<u64>,
    #[arg(long, default_value = ".")]
    pub log_dir: String,
    /// Send one message, print the reply and exit instead of opening the TUI.
    #[arg(long)]
    pub ask: Option<String>,
    /// With --ask, print the transcript as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub mode: FetchMode,
    pub connect_timeout: Duration,
    pub request_timeout: Option<Duration>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            mode: FetchMode::Stream,
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
        }
    }
}

impl From<&Args> for ClientSettings {
    fn from(args: &Args) -> Self {
        Self {
            base_url: args.base_url.trim_end_matches('/').to_string(),
            mode: args.mode,
            connect_timeout: Duration::from_secs(args.connect_timeout_secs),
            request_timeout: args.request_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_strip_trailing_slash() {
        let args = Args::parse_from(["shopchat", "--base-url", "http://shop.local/api/v1/"]);
        let settings = ClientSettings::from(&args);
        assert_eq!(settings.base_url, "http://shop.local/api/v1");
        assert_eq!(settings.mode, FetchMode::Stream);
        assert_eq!(settings.request_timeout, None);
    }

    #[test]
    fn once_mode_and_timeout_parse() {
        let args = Args::parse_from([
            "shopchat",
            "--mode",
            "once",
            "--request-timeout-secs",
            "30",
        ]);
        let settings = ClientSettings::from(&args);
        assert_eq!(settings.mode, FetchMode::Once);
        assert_eq!(settings.request_timeout, Some(Duration::from_secs(30)));
    }
}
