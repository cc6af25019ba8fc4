//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    "{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}",
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_STORE_PREFIX: &str = "/ufs";
pub const DEFAULT_STAGING_DIR: &str = ".chunkgate/staging";
pub const STAGING_DIR_MODE: u32 = 0o700;
pub const DEFAULT_LOCK_WAIT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STAGING_TTL_SECS: u64 = 24 * 60 * 60;
pub const STAGING_CLEAN_INTERVAL_SECS: u64 = 900;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "chunkgate", version = VERSION_INFO, about = "Chunked upload receiver")]
pub struct Args {
    #[arg(
        long,
        env = "CHUNKGATE_STORE_PREFIX",
        default_value = DEFAULT_STORE_PREFIX,
        help = "URL prefix the upload endpoints live under"
    )]
    pub store_prefix: String,
    #[arg(
        short = 't',
        long,
        env = "CHUNKGATE_STAGING_DIR",
        default_value = DEFAULT_STAGING_DIR,
        help = "Directory holding in-progress upload files"
    )]
    pub staging_dir: String,
    #[arg(
        short = 'm',
        long,
        env = "CHUNKGATE_MANIFEST",
        help = "JSON manifest describing stores, file records and tokens"
    )]
    pub manifest: Option<String>,
    #[arg(
        short = 'b',
        long,
        env = "CHUNKGATE_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP/HTTPS"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "CHUNKGATE_HTTP_PORT",
        default_value_t = 5010,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(
        short = 'P',
        long,
        env = "CHUNKGATE_HTTPS_PORT",
        default_value_t = 5011,
        help = "HTTPS port"
    )]
    pub https_port: u16,
    #[arg(short = 'c', long, env = "CHUNKGATE_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "CHUNKGATE_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(
        long,
        env = "CHUNKGATE_LOCK_WAIT_SECS",
        default_value_t = DEFAULT_LOCK_WAIT_TIMEOUT_SECS,
        help = "Seconds an overlapping chunk request waits for the per-file lock"
    )]
    pub lock_wait_secs: u64,
    #[arg(
        long,
        env = "CHUNKGATE_STAGING_TTL_SECS",
        default_value_t = DEFAULT_STAGING_TTL_SECS,
        help = "Staging file cleanup threshold in seconds (0 to disable)"
    )]
    pub staging_ttl_secs: u64,
}
