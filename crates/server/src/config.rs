//! Server configuration from CLI flags and environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// roomrelay — real-time AI chat room relay
#[derive(Debug, Clone, Parser)]
#[command(name = "roomrelay", version)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "ROOMRELAY_BIND", default_value = "127.0.0.1:4600")]
    pub bind: SocketAddr,

    /// Data directory (db, logs). Defaults to ~/.roomrelay
    #[arg(long, env = "ROOMRELAY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// HMAC secret used to verify bearer credentials
    #[arg(long, env = "ROOMRELAY_JWT_SECRET")]
    pub jwt_secret: String,

    /// Clock-skew tolerance for the credential staleness check, seconds
    #[arg(long, env = "ROOMRELAY_SKEW_TOLERANCE_SECS", default_value_t = 60)]
    pub skew_tolerance_secs: u64,

    /// Most recent turns replayed to a joining connection
    #[arg(long, env = "ROOMRELAY_REPLAY_LIMIT", default_value_t = 200)]
    pub replay_limit: usize,

    /// Capacity of the in-memory fallback history buffer (all rooms)
    #[arg(long, env = "ROOMRELAY_FALLBACK_CAPACITY", default_value_t = 2000)]
    pub fallback_capacity: usize,

    /// Generation provider API key. Empty disables outbound calls and
    /// the gateway answers with its fallback content.
    #[arg(long, env = "ROOMRELAY_GATEWAY_API_KEY", default_value = "")]
    pub gateway_api_key: String,

    /// Generation provider base URL
    #[arg(
        long,
        env = "ROOMRELAY_GATEWAY_BASE_URL",
        default_value = "https://generativelanguage.googleapis.com/v1beta"
    )]
    pub gateway_base_url: String,

    /// Model used for chat completion and prompt classification
    #[arg(long, env = "ROOMRELAY_GATEWAY_MODEL", default_value = "gemini-2.5-flash")]
    pub gateway_model: String,

    /// Model used for room-title summarization
    #[arg(long, env = "ROOMRELAY_TITLE_MODEL", default_value = "gemini-2.0-flash")]
    pub title_model: String,

    /// Image render endpoint. Absent disables image generation; image
    /// prompts then degrade to a text reply.
    #[arg(long, env = "ROOMRELAY_IMAGE_ENDPOINT")]
    pub image_endpoint: Option<String>,

    /// Relay-enforced ceiling on a single gateway call, seconds
    #[arg(long, env = "ROOMRELAY_GATEWAY_TIMEOUT_SECS", default_value_t = 60)]
    pub gateway_timeout_secs: u64,
}
