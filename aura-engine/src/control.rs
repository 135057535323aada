//! Control surface for a running tunnel instance
//!
//! A JSON-lines request/response protocol over a Unix domain socket lets a
//! presentation layer drive the controller: `start` with the tunnel
//! parameters, `stop`, and `status`. Errors carry a machine-readable code
//! alongside the human-readable message so callers can distinguish bad
//! input, a missing host grant and operational failures.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::config::TunnelConfig;
use crate::controller::TunnelController;
use crate::error::{Error, Result};

/// Default socket path for the control socket
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/aura.sock";

/// Request messages sent to the control socket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlRequest {
    /// Start the tunnel with the given parameters
    #[serde(rename = "start")]
    Start {
        #[serde(default)]
        dns_server: Option<String>,
        domain: String,
        #[serde(default)]
        allowed_apps: Option<Vec<String>>,
    },

    /// Stop the tunnel
    #[serde(rename = "stop")]
    Stop,

    /// Get current status and statistics
    #[serde(rename = "status")]
    Status,
}

/// Response messages from the control socket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlResponse {
    /// Success acknowledgment
    #[serde(rename = "ok")]
    Ok,

    /// Status response
    #[serde(rename = "status")]
    Status(StatusInfo),

    /// Error response
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

/// Tunnel status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    /// Lifecycle state
    pub state: String,
    /// Simplified running/stopped projection
    pub running: bool,
    /// Live engine status
    pub engine_running: bool,
    /// Packets forwarded from the interface to the relay
    pub packets_out: u64,
    /// Packets returned from the relay to the interface
    pub packets_in: u64,
    /// Bytes forwarded from the interface to the relay
    pub bytes_out: u64,
    /// Bytes returned from the relay to the interface
    pub bytes_in: u64,
}

/// Forwarding statistics as lock-free atomic counters
#[derive(Debug, Default)]
pub struct SharedStats {
    pub packets_out: AtomicU64,
    pub packets_in: AtomicU64,
    pub bytes_out: AtomicU64,
    pub bytes_in: AtomicU64,
}

impl SharedStats {
    /// Create zeroed stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a packet read from the interface
    pub fn record_outbound(&self, bytes: usize) {
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
        self.packets_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a packet written back to the interface
    pub fn record_inbound(&self, bytes: usize) {
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
        self.packets_in.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of the current counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_out: self.packets_out.load(Ordering::Relaxed),
            packets_in: self.packets_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of stats at a point in time
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub packets_out: u64,
    pub packets_in: u64,
    pub bytes_out: u64,
    pub bytes_in: u64,
}

/// Reference to shared stats
pub type SharedStatsRef = Arc<SharedStats>;

fn error_response(e: &Error) -> ControlResponse {
    ControlResponse::Error {
        code: e.code().to_string(),
        message: e.to_string(),
    }
}

/// Control socket server driving a [`TunnelController`]
pub struct ControlServer {
    socket_path: PathBuf,
    controller: Arc<TunnelController>,
}

impl ControlServer {
    /// Create a new control server
    pub fn new(socket_path: impl AsRef<Path>, controller: Arc<TunnelController>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            controller,
        }
    }

    /// Accept and serve control connections until the task is dropped
    #[cfg(unix)]
    pub async fn serve(&self) -> Result<()> {
        use tokio::net::UnixListener;

        // Remove a stale socket from a previous instance
        let _ = std::fs::remove_file(&self.socket_path);

        if let Some(parent) = self.socket_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| Error::Control(format!("failed to bind control socket: {}", e)))?;

        // Owner read/write only
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&self.socket_path, perms);
        }

        log::info!("control socket listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let controller = self.controller.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, controller).await {
                            log::debug!("control connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    log::warn!("control socket accept error: {}", e);
                }
            }
        }
    }

    #[cfg(unix)]
    async fn handle_connection(
        stream: tokio::net::UnixStream,
        controller: Arc<TunnelController>,
    ) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        reader
            .read_line(&mut line)
            .await
            .map_err(|e| Error::Control(format!("failed to read request: {}", e)))?;

        let response = match serde_json::from_str::<ControlRequest>(line.trim()) {
            Ok(request) => Self::dispatch(request, &controller).await,
            Err(e) => ControlResponse::Error {
                code: "INVALID_ARGS".to_string(),
                message: format!("invalid request: {}", e),
            },
        };

        let response_json = serde_json::to_string(&response)
            .map_err(|e| Error::Control(format!("failed to serialize response: {}", e)))?;

        writer
            .write_all(response_json.as_bytes())
            .await
            .map_err(|e| Error::Control(format!("failed to write response: {}", e)))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|e| Error::Control(format!("failed to write newline: {}", e)))?;

        Ok(())
    }

    async fn dispatch(
        request: ControlRequest,
        controller: &Arc<TunnelController>,
    ) -> ControlResponse {
        match request {
            ControlRequest::Start {
                dns_server,
                domain,
                allowed_apps,
            } => {
                let config = TunnelConfig {
                    dns_server,
                    domain,
                    allowed_apps,
                };
                match controller.start(config).await {
                    Ok(()) => ControlResponse::Ok,
                    Err(e) => error_response(&e),
                }
            }
            ControlRequest::Stop => match controller.stop().await {
                Ok(()) => ControlResponse::Ok,
                Err(e) => error_response(&e),
            },
            ControlRequest::Status => {
                let stats = controller.stats().snapshot();
                let state = controller.status();
                ControlResponse::Status(StatusInfo {
                    state: state.to_string(),
                    running: state.is_running(),
                    engine_running: controller.engine_running(),
                    packets_out: stats.packets_out,
                    packets_in: stats.packets_in,
                    bytes_out: stats.bytes_out,
                    bytes_in: stats.bytes_in,
                })
            }
        }
    }

    /// Remove the socket file
    #[cfg(unix)]
    pub fn cleanup(&self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

#[cfg(unix)]
impl Drop for ControlServer {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Control socket client for driving a running instance
pub struct ControlClient {
    socket_path: PathBuf,
}

impl ControlClient {
    /// Create a new control client
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    /// Send a request and get a response
    #[cfg(unix)]
    pub async fn request(&self, request: ControlRequest) -> Result<ControlResponse> {
        use tokio::net::UnixStream;

        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            Error::Control(format!(
                "failed to connect to control socket at {:?}: {}. Is the tunnel service running?",
                self.socket_path, e
            ))
        })?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let request_json = serde_json::to_string(&request)
            .map_err(|e| Error::Control(format!("failed to serialize request: {}", e)))?;
        writer
            .write_all(request_json.as_bytes())
            .await
            .map_err(|e| Error::Control(format!("failed to send request: {}", e)))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|e| Error::Control(format!("failed to send newline: {}", e)))?;

        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
            .await
            .map_err(|_| Error::Control("timeout waiting for response".into()))?
            .map_err(|e| Error::Control(format!("failed to read response: {}", e)))?;

        serde_json::from_str(line.trim())
            .map_err(|e| Error::Control(format!("invalid response: {}", e)))
    }

    /// Start the tunnel on the running instance
    pub async fn start(&self, config: TunnelConfig) -> Result<()> {
        let request = ControlRequest::Start {
            dns_server: config.dns_server,
            domain: config.domain,
            allowed_apps: config.allowed_apps,
        };
        match self.request(request).await? {
            ControlResponse::Ok => Ok(()),
            ControlResponse::Error { code, message } => {
                Err(Error::Control(format!("{}: {}", code, message)))
            }
            _ => Err(Error::Control("unexpected response".into())),
        }
    }

    /// Stop the tunnel on the running instance
    pub async fn stop(&self) -> Result<()> {
        match self.request(ControlRequest::Stop).await? {
            ControlResponse::Ok => Ok(()),
            ControlResponse::Error { code, message } => {
                Err(Error::Control(format!("{}: {}", code, message)))
            }
            _ => Err(Error::Control("unexpected response".into())),
        }
    }

    /// Query status from the running instance
    pub async fn status(&self) -> Result<StatusInfo> {
        match self.request(ControlRequest::Status).await? {
            ControlResponse::Status(info) => Ok(info),
            ControlResponse::Error { code, message } => {
                Err(Error::Control(format!("{}: {}", code, message)))
            }
            _ => Err(Error::Control("unexpected response".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_round_trip_through_json() {
        let request = ControlRequest::Start {
            dns_server: Some("1.2.3.4:53".into()),
            domain: "tunnel.example.com.".into(),
            allowed_apps: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"type\":\"start\""));

        let parsed: ControlRequest = serde_json::from_str(&json).unwrap();
        match parsed {
            ControlRequest::Start { domain, .. } => assert_eq!(domain, "tunnel.example.com."),
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn start_request_accepts_omitted_optionals() {
        let parsed: ControlRequest =
            serde_json::from_str(r#"{"type":"start","domain":"x.y."}"#).unwrap();
        match parsed {
            ControlRequest::Start {
                dns_server,
                domain,
                allowed_apps,
            } => {
                assert_eq!(dns_server, None);
                assert_eq!(domain, "x.y.");
                assert_eq!(allowed_apps, None);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn error_responses_carry_machine_readable_codes() {
        let response = error_response(&Error::InvalidConfig("domain cannot be empty".into()));
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("INVALID_ARGS"));
        assert!(json.contains("domain cannot be empty"));
    }

    #[test]
    fn stats_counters_accumulate() {
        let stats = SharedStats::new();
        stats.record_outbound(100);
        stats.record_outbound(50);
        stats.record_inbound(10);

        let snap = stats.snapshot();
        assert_eq!(snap.packets_out, 2);
        assert_eq!(snap.bytes_out, 150);
        assert_eq!(snap.packets_in, 1);
        assert_eq!(snap.bytes_in, 10);
    }
}
