//! Runtime configuration, read once from the environment at startup.

use std::{
    env,
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use strum::{Display, EnumString};
use teloxide::types::{ChatId, Recipient};
use url::Url;

use crate::errors::{BotError, BotResult};

const DEFAULT_WORK_DIR: &str = "downloads";
const DEFAULT_AUDIO_QUALITY: &str = "192K";
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_WEBHOOK_PORT: u16 = 5000;

/// Audio codec yt-dlp transcodes to.
#[derive(Display, EnumString, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AudioFormat {
    #[default]
    Mp3,
    M4a,
    Opus,
}

/// Set when updates arrive through a webhook instead of long polling
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookConfig {
    pub address: SocketAddr,
    pub url: Url,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub channel: Recipient,
    pub database_url: String,
    pub work_dir: PathBuf,
    /// Netscape cookie jar contents passed to yt-dlp
    pub cookies: Option<String>,
    pub audio_format: AudioFormat,
    pub audio_quality: String,
    pub download_timeout: Duration,
    pub upload_timeout: Duration,
    pub webhook: Option<WebhookConfig>,
}

impl Config {
    pub fn from_env() -> BotResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Every required value is checked
    /// before returning so the first run reports all of them at once.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> BotResult<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut missing = Vec::new();
        let mut required = |key: &'static str| {
            let value = get(key);
            if value.is_none() {
                missing.push(key);
            }
            value
        };

        let bot_token = required("TELOXIDE_TOKEN");
        let channel = required("TELEGRAM_CHANNEL_ID");
        let database_url = required("DATABASE_URL");

        let (Some(bot_token), Some(channel), Some(database_url)) =
            (bot_token, channel, database_url)
        else {
            return Err(BotError::config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        };

        let audio_format = match get("AUDIO_FORMAT") {
            Some(v) => AudioFormat::from_str(v.trim())
                .map_err(|_| BotError::config(format!("unsupported AUDIO_FORMAT: {}", v)))?,
            None => AudioFormat::default(),
        };

        Ok(Self {
            bot_token,
            channel: parse_channel(&channel)?,
            database_url,
            work_dir: get("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR)),
            cookies: get("YTDL_COOKIES"),
            audio_format,
            audio_quality: get("AUDIO_QUALITY").unwrap_or_else(|| DEFAULT_AUDIO_QUALITY.to_string()),
            download_timeout: parse_secs(
                get("DOWNLOAD_TIMEOUT_SECS"),
                "DOWNLOAD_TIMEOUT_SECS",
                DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            )?,
            upload_timeout: parse_secs(
                get("UPLOAD_TIMEOUT_SECS"),
                "UPLOAD_TIMEOUT_SECS",
                DEFAULT_UPLOAD_TIMEOUT_SECS,
            )?,
            webhook: parse_webhook(get("WEBHOOK_URL"), get("PORT"))?,
        })
    }

    pub fn cookies_path(&self) -> PathBuf {
        self.work_dir.join("cookies.txt")
    }
}

/// Accepts `@channelname` or a numeric chat id such as `-1001234567890`.
pub fn parse_channel(value: &str) -> BotResult<Recipient> {
    let value = value.trim();
    if let Some(name) = value.strip_prefix('@') {
        if name.is_empty() {
            return Err(BotError::config("TELEGRAM_CHANNEL_ID is an empty username"));
        }
        return Ok(Recipient::ChannelUsername(value.to_string()));
    }

    value
        .parse::<i64>()
        .map(|id| Recipient::Id(ChatId(id)))
        .map_err(|_| {
            BotError::config(format!(
                "TELEGRAM_CHANNEL_ID must be @username or a numeric id, got {}",
                value
            ))
        })
}

fn parse_webhook(url: Option<String>, port: Option<String>) -> BotResult<Option<WebhookConfig>> {
    let Some(url) = url else {
        return Ok(None);
    };

    let url = Url::parse(url.trim())
        .map_err(|e| BotError::config(format!("invalid WEBHOOK_URL {}: {}", url, e)))?;
    let port = match port {
        Some(p) => p
            .trim()
            .parse::<u16>()
            .map_err(|_| BotError::config(format!("PORT must be a port number, got {}", p)))?,
        None => DEFAULT_WEBHOOK_PORT,
    };

    Ok(Some(WebhookConfig {
        address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
        url,
    }))
}

fn parse_secs(value: Option<String>, key: &str, default: u64) -> BotResult<Duration> {
    match value {
        None => Ok(Duration::from_secs(default)),
        Some(v) => match v.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(BotError::config(format!("{} must be a positive integer, got {}", key, v))),
        },
    }
}
