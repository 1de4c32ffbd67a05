//! CLI and defaults (SPEC_FULL.md §6), grounded on `moire_web::main`'s
//! env-var-with-default convention, replaced here with `clap` so each
//! default is documented at the call site instead of scattered `env::var`
//! calls.

use clap::Parser;

pub const DEFAULT_TCP_PORT: u16 = 47632;
pub const DEFAULT_WS_PORT: u16 = 47633;
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_SOCKET_READ_TIMEOUT_MS: u64 = 200;
pub const DEFAULT_BATCH_SIZE: usize = 5_000;

#[derive(Parser, Debug, Clone)]
#[command(name = "graphd", about = "graph data sidecar")]
pub struct Cli {
    /// TCP port to listen on (loopback only).
    #[arg(default_value_t = DEFAULT_TCP_PORT)]
    pub tcp_port: u16,

    #[arg(long, default_value_t = DEFAULT_WS_PORT)]
    pub ws_port: u16,

    #[arg(long, default_value_t = true)]
    pub enable_websocket: bool,

    #[arg(long)]
    pub storage_dir: Option<String>,

    #[arg(long, default_value_t = false)]
    pub debug_log: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tcp_port: u16,
    pub ws_port: u16,
    pub enable_websocket: bool,
    pub allowed_origins: Vec<String>,
    pub max_message_bytes: usize,
    pub default_timeout_ms: u64,
    pub socket_read_timeout_ms: u64,
    pub batch_size: usize,
    pub storage_dir: Option<String>,
    pub debug_log: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp_port: DEFAULT_TCP_PORT,
            ws_port: DEFAULT_WS_PORT,
            enable_websocket: true,
            allowed_origins: vec!["http://localhost".into(), "http://127.0.0.1".into()],
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            socket_read_timeout_ms: DEFAULT_SOCKET_READ_TIMEOUT_MS,
            batch_size: DEFAULT_BATCH_SIZE,
            storage_dir: None,
            debug_log: true,
        }
    }
}

impl From<Cli> for ServerConfig {
    fn from(cli: Cli) -> Self {
        Self {
            tcp_port: cli.tcp_port,
            ws_port: cli.ws_port,
            enable_websocket: cli.enable_websocket,
            storage_dir: cli.storage_dir,
            debug_log: cli.debug_log,
            ..Default::default()
        }
    }
}

/// Origin allow-list check for the WebSocket upgrade (SPEC_FULL.md §4.9.2):
/// `http://localhost:*`, `http://127.0.0.1:*`, or a literal `null` origin.
pub fn origin_allowed(config: &ServerConfig, origin: Option<&str>) -> bool {
    let Some(origin) = origin else { return true };
    if origin == "null" {
        return true;
    }
    config
        .allowed_origins
        .iter()
        .any(|allowed| origin == allowed || origin.starts_with(&format!("{allowed}:")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_with_any_port_is_allowed() {
        let config = ServerConfig::default();
        assert!(origin_allowed(&config, Some("http://localhost:5173")));
        assert!(origin_allowed(&config, Some("http://127.0.0.1:3000")));
        assert!(origin_allowed(&config, Some("null")));
        assert!(origin_allowed(&config, None));
    }

    #[test]
    fn other_origins_are_rejected() {
        let config = ServerConfig::default();
        assert!(!origin_allowed(&config, Some("http://evil.example")));
    }
}
