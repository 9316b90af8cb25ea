//! Transport layer for MCP communication.
//!
//! MCP uses a Content-Length framed protocol over stdio for local servers,
//! or HTTP POST for remote servers. Everything here is driven by `tokio`:
//! stdio transports own a child process and its piped stdin/stdout, http
//! transports hold a pooled `reqwest::Client`.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Default budget for a stdio child to complete the `initialize` handshake.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum number of stderr lines retained per stdio child for diagnostics.
const STDERR_RING_CAPACITY: usize = 200;

/// Configuration for HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Base URL of the MCP server.
    pub url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Number of retries for failed requests.
    pub retries: u32,
    /// Optional authentication headers.
    pub headers: Vec<(String, String)>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: Duration::from_secs(30),
            retries: 3,
            headers: Vec::new(),
        }
    }
}

impl HttpTransportConfig {
    /// Create a new HTTP transport config with the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of retries.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// A bounded ring buffer of a child process's stderr lines, surfaced when a
/// stdio transport dies unexpectedly so the pool's broken-client error carries
/// useful diagnostics instead of just "connection closed".
#[derive(Debug, Clone)]
struct StderrRing {
    inner: Arc<AsyncMutex<VecDeque<String>>>,
}

impl StderrRing {
    fn new() -> Self {
        Self {
            inner: Arc::new(AsyncMutex::new(VecDeque::with_capacity(STDERR_RING_CAPACITY))),
        }
    }

    async fn push(&self, line: String) {
        let mut buf = self.inner.lock().await;
        if buf.len() == STDERR_RING_CAPACITY {
            buf.pop_front();
        }
        buf.push_back(line);
    }

    async fn snapshot(&self) -> Vec<String> {
        self.inner.lock().await.iter().cloned().collect()
    }
}

/// Transport for communicating with an MCP server.
pub enum McpTransport {
    /// Stdio transport - communicates with a child process via stdin/stdout.
    Stdio {
        /// The child process.
        child: Child,
        /// Buffered writer to stdin.
        stdin: BufWriter<ChildStdin>,
        /// Buffered reader from stdout.
        stdout: BufReader<ChildStdout>,
        /// Tail of the child's stderr, for diagnostics.
        stderr_ring: StderrRing,
    },
    /// HTTP transport - communicates via HTTP POST requests.
    Http {
        /// HTTP client (shared for connection pooling).
        client: Arc<reqwest::Client>,
        /// Transport configuration.
        config: HttpTransportConfig,
    },
}

impl McpTransport {
    /// Create a new HTTP transport. No network call happens here; the first
    /// request validates reachability.
    pub fn connect_http(config: HttpTransportConfig) -> Result<Self> {
        let _parsed = url::Url::parse(&config.url)
            .map_err(|e| McpError::transport(format!("invalid URL: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(5)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| McpError::transport(format!("failed to build HTTP client: {}", e)))?;

        tracing::info!(
            url = %config.url,
            timeout_secs = config.timeout.as_secs(),
            "created HTTP transport"
        );

        Ok(Self::Http {
            client: Arc::new(client),
            config,
        })
    }

    /// Spawn a new stdio transport.
    ///
    /// # Arguments
    /// * `command` - The command to spawn (e.g., "mcp-server-sqlite")
    /// * `args` - Arguments to pass to the command
    /// * `env` - Optional environment variables to set
    pub async fn spawn_stdio(
        command: &str,
        args: &[String],
        env: Option<&[(String, String)]>,
    ) -> Result<Self> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(env_vars) = env {
            for (key, value) in env_vars {
                cmd.env(key, value);
            }
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::spawn_failed(format!("failed to spawn '{}': {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stderr"))?;

        let stderr_ring = StderrRing::new();
        let ring_for_task = stderr_ring.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                ring_for_task.push(line).await;
            }
        });

        Ok(Self::Stdio {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
            stderr_ring,
        })
    }

    /// Send a JSON-RPC request and wait for the response.
    pub async fn send_request(&mut self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        match self {
            Self::Stdio { .. } => {
                let value = serde_json::to_value(request)?;
                self.send_message_stdio(&value).await?;
                self.receive_response_stdio().await
            }
            Self::Http { client, config } => {
                let client = client.clone();
                let config = config.clone();
                Self::send_request_http_impl(&client, &config, request).await
            }
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn send_notification(&mut self, notification: &JsonRpcNotification) -> Result<()> {
        match self {
            Self::Stdio { .. } => {
                let value = serde_json::to_value(notification)?;
                self.send_message_stdio(&value).await
            }
            Self::Http { client, config } => {
                let json = serde_json::to_string(notification)?;
                let mut req = client.post(&config.url).body(json);
                for (key, value) in &config.headers {
                    req = req.header(key, value);
                }
                req = req.header("Content-Type", "application/json");
                let _ = req.send().await;
                Ok(())
            }
        }
    }

    /// Tail of stderr output captured from a stdio child, for diagnostics.
    pub async fn stderr_tail(&self) -> Vec<String> {
        match self {
            Self::Stdio { stderr_ring, .. } => stderr_ring.snapshot().await,
            Self::Http { .. } => Vec::new(),
        }
    }

    /// Send a JSON-RPC request over HTTP and get the response.
    async fn send_request_http_impl(
        client: &reqwest::Client,
        config: &HttpTransportConfig,
        request: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse> {
        let json = serde_json::to_string(request)?;

        tracing::trace!(
            url = %config.url,
            json = %json,
            "sending MCP HTTP request"
        );

        let mut retries = config.retries;
        loop {
            let mut req = client.post(&config.url).body(json.clone());
            for (key, value) in &config.headers {
                req = req.header(key, value);
            }
            req = req.header("Content-Type", "application/json");

            match req.send().await {
                Ok(resp) => {
                    if !resp.status().is_success() {
                        let status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        return Err(McpError::transport(format!(
                            "HTTP error {}: {}",
                            status, body
                        )));
                    }

                    let response_text = resp.text().await.map_err(|e| {
                        McpError::transport(format!("failed to read response body: {}", e))
                    })?;

                    tracing::trace!(
                        json = %response_text,
                        "received MCP HTTP response"
                    );

                    let response: JsonRpcResponse = serde_json::from_str(&response_text)?;
                    return Ok(response);
                }
                Err(e) => {
                    if retries == 0 {
                        return Err(McpError::transport(format!("HTTP request failed: {}", e)));
                    }
                    retries -= 1;
                    tracing::warn!(
                        error = %e,
                        retries_remaining = retries,
                        "HTTP request failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Send a JSON message with Content-Length framing (stdio only).
    async fn send_message_stdio(&mut self, message: &serde_json::Value) -> Result<()> {
        let json = serde_json::to_string(message)?;
        let content_length = json.len();

        match self {
            Self::Stdio { stdin, .. } => {
                let header = format!("Content-Length: {}\r\n\r\n", content_length);
                stdin.write_all(header.as_bytes()).await?;
                stdin.write_all(json.as_bytes()).await?;
                stdin.flush().await?;

                tracing::trace!(
                    content_length,
                    json = %json,
                    "sent MCP message"
                );

                Ok(())
            }
            Self::Http { .. } => Err(McpError::protocol(
                "send_message_stdio called on HTTP transport",
            )),
        }
    }

    /// Receive a JSON-RPC response with Content-Length framing (stdio only).
    async fn receive_response_stdio(&mut self) -> Result<JsonRpcResponse> {
        match self {
            Self::Stdio { stdout, .. } => {
                let mut content_length: Option<usize> = None;
                let mut line = String::new();

                loop {
                    line.clear();
                    let bytes_read = stdout.read_line(&mut line).await?;

                    if bytes_read == 0 {
                        return Err(McpError::ConnectionClosed);
                    }

                    let trimmed = line.trim();

                    if trimmed.is_empty() {
                        break;
                    }

                    if let Some(len_str) = trimmed.strip_prefix("Content-Length:") {
                        content_length = Some(len_str.trim().parse().map_err(|e| {
                            McpError::protocol(format!("invalid Content-Length: {}", e))
                        })?);
                    }
                }

                let content_length = content_length
                    .ok_or_else(|| McpError::protocol("missing Content-Length header"))?;

                let mut body = vec![0u8; content_length];
                stdout.read_exact(&mut body).await?;

                let json_str = String::from_utf8(body)
                    .map_err(|e| McpError::protocol(format!("invalid UTF-8 in response: {}", e)))?;

                tracing::trace!(
                    content_length,
                    json = %json_str,
                    "received MCP message"
                );

                let response: JsonRpcResponse = serde_json::from_str(&json_str)?;
                Ok(response)
            }
            Self::Http { .. } => Err(McpError::protocol(
                "receive_response_stdio called on HTTP transport",
            )),
        }
    }

    /// Shutdown the transport gracefully.
    pub async fn shutdown(&mut self) -> Result<()> {
        match self {
            Self::Stdio { child, .. } => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                Ok(())
            }
            Self::Http { .. } => Ok(()),
        }
    }

    /// Check if the transport is still connected.
    pub fn is_connected(&mut self) -> bool {
        match self {
            Self::Stdio { child, .. } => matches!(child.try_wait(), Ok(None)),
            Self::Http { .. } => true,
        }
    }

    /// Check if this is an HTTP transport.
    pub fn is_http(&self) -> bool {
        matches!(self, Self::Http { .. })
    }

    /// Check if this is a stdio transport.
    pub fn is_stdio(&self) -> bool {
        matches!(self, Self::Stdio { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_nonexistent_command() {
        let result = McpTransport::spawn_stdio("nonexistent-mcp-server-12345", &[], None).await;
        match result {
            Ok(_) => panic!("Expected spawn to fail"),
            Err(err) => assert!(matches!(err, McpError::SpawnFailed(_))),
        }
    }

    #[tokio::test]
    async fn test_spawn_with_args() {
        let result = McpTransport::spawn_stdio("cat", &[], None).await;

        if cfg!(unix) {
            assert!(result.is_ok());
            let mut transport = result.unwrap();
            assert!(transport.is_stdio());
            assert!(!transport.is_http());
            transport.shutdown().await.unwrap();
        }
    }

    #[test]
    fn test_http_transport_config() {
        let config = HttpTransportConfig::new("http://localhost:8080/mcp")
            .with_timeout(Duration::from_secs(60))
            .with_retries(5)
            .with_header("Authorization", "Bearer token123");

        assert_eq!(config.url, "http://localhost:8080/mcp");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.retries, 5);
        assert_eq!(config.headers.len(), 1);
        assert_eq!(
            config.headers[0],
            ("Authorization".to_string(), "Bearer token123".to_string())
        );
    }

    #[test]
    fn test_http_transport_config_default() {
        let config = HttpTransportConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.retries, 3);
        assert!(config.headers.is_empty());
    }

    #[test]
    fn test_http_transport_creation() {
        let config = HttpTransportConfig::new("http://localhost:8080/mcp");
        let result = McpTransport::connect_http(config);

        assert!(result.is_ok());
        let transport = result.unwrap();
        assert!(transport.is_http());
        assert!(!transport.is_stdio());
    }

    #[test]
    fn test_http_transport_invalid_url() {
        let config = HttpTransportConfig::new("not a valid url");
        let result = McpTransport::connect_http(config);

        assert!(result.is_err());
        match result {
            Err(McpError::Transport(msg)) => assert!(msg.contains("invalid URL")),
            _ => panic!("Expected Transport error"),
        }
    }

    #[tokio::test]
    async fn test_http_transport_is_always_connected() {
        let config = HttpTransportConfig::new("http://localhost:8080/mcp");
        let mut transport = McpTransport::connect_http(config).unwrap();

        assert!(transport.is_connected());
        assert!(transport.shutdown().await.is_ok());
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn test_stderr_ring_bounded() {
        let ring = StderrRing::new();
        for i in 0..(STDERR_RING_CAPACITY + 10) {
            ring.push(format!("line {i}")).await;
        }
        let snapshot = ring.snapshot().await;
        assert_eq!(snapshot.len(), STDERR_RING_CAPACITY);
        assert_eq!(snapshot[0], "line 10");
    }
}
