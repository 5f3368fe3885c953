//! MCP transport implementations.
//!
//! This module provides the transport layer for communicating with MCP servers.
//! The transport spawns a child process and exchanges newline-delimited frames
//! over its stdin/stdout. It knows nothing about JSON-RPC.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::error::TransportError;

/// Default time a server gets to exit after SIGTERM before it is killed.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Trait for MCP transport implementations.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one frame to the server.
    async fn send(&mut self, message: &str) -> Result<(), TransportError>;

    /// Receive one frame from the server.
    async fn receive(&mut self) -> Result<String, TransportError>;

    /// Close the transport connection. Calling it twice is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;
}

/// Standard I/O transport for MCP servers.
///
/// This transport spawns a child process and communicates via stdin/stdout
/// using newline-delimited JSON messages. Stderr is drained into `tracing`.
pub struct StdioTransport {
    /// The child process.
    child: Child,
    /// Stdin writer; taken on close so the server sees EOF.
    stdin: Option<ChildStdin>,
    /// Buffered stdout reader for receiving messages.
    stdout: BufReader<ChildStdout>,
    /// Whether frames can still be exchanged.
    connected: bool,
    /// Whether `close` has run.
    closed: bool,
    /// Wait between SIGTERM and SIGKILL.
    shutdown_grace: Duration,
}

impl StdioTransport {
    /// Spawn a new stdio transport.
    ///
    /// # Arguments
    ///
    /// * `command` - The command to execute (e.g., "python3" or "/path/to/server")
    /// * `args` - Command arguments
    /// * `env` - Environment variables to set for the child process
    /// * `working_dir` - Optional working directory for the child process
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: Option<&Path>,
    ) -> Result<Self, TransportError> {
        debug!(command = command, args = ?args, "Spawning MCP server process");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(TransportError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("Failed to capture stdin"))
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("Failed to capture stdout"))
        })?;

        if let Some(stderr) = child.stderr.take() {
            drain_stderr(command.to_string(), stderr);
        }

        debug!(pid = ?child.id(), "MCP server process spawned successfully");

        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            connected: true,
            closed: false,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        })
    }

    /// Set the SIGTERM-to-SIGKILL grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Get the process ID of the child process.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn terminate(&mut self) {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(%status, "MCP server already exited");
                return;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to poll MCP server status"),
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.child.id() {
                debug!(pid = pid, "Sending SIGTERM to MCP server");
                if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    debug!(pid = pid, error = %e, "SIGTERM failed");
                }
            }

            match tokio::time::timeout(self.shutdown_grace, self.child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(%status, "MCP server exited gracefully");
                    return;
                }
                Ok(Err(e)) => warn!(error = %e, "Failed to wait for MCP server"),
                Err(_) => warn!(
                    grace_ms = self.shutdown_grace.as_millis() as u64,
                    "MCP server did not exit gracefully, killing"
                ),
            }
        }

        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "Failed to kill MCP server");
        }
    }
}

/// Forward the server's stderr to the log so the pipe never fills up.
fn drain_stderr(server: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!(target: "tooldock_mcp::server_stderr", server = %server, "{}", line)
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(server = %server, error = %e, "Stopped reading MCP server stderr");
                    break;
                }
            }
        }
    });
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let stdin = self.stdin.as_mut().ok_or(TransportError::NotConnected)?;

        debug!(message = message, "Sending message to MCP server");

        stdin
            .write_all(message.as_bytes())
            .await
            .map_err(TransportError::WriteError)?;

        stdin
            .write_all(b"\n")
            .await
            .map_err(TransportError::WriteError)?;

        // Flush to ensure the message is sent immediately
        stdin.flush().await.map_err(TransportError::WriteError)?;

        Ok(())
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        let mut line = String::new();
        let bytes_read = self
            .stdout
            .read_line(&mut line)
            .await
            .map_err(TransportError::ReadError)?;

        if bytes_read == 0 {
            self.connected = false;
            return Err(TransportError::ConnectionClosed);
        }

        // Remove the trailing newline
        let message = line.trim_end().to_string();

        debug!(message = message, "Received message from MCP server");

        Ok(message)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }

        debug!("Closing MCP server transport");
        self.closed = true;
        self.connected = false;
        self.stdin.take();

        self.terminate().await;

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    async fn spawn_sh(script: &str) -> StdioTransport {
        StdioTransport::spawn(
            "sh",
            &["-c".to_string(), script.to_string()],
            &HashMap::new(),
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_stdio_transport_echo() {
        // Use 'cat' as a simple echo server for testing
        let mut transport = StdioTransport::spawn("cat", &[], &HashMap::new(), None)
            .await
            .unwrap();
        assert!(transport.is_connected());
        assert!(transport.pid().is_some());

        transport.send(r#"{"test": "hello"}"#).await.unwrap();
        let response = transport.receive().await.unwrap();
        assert_eq!(response, r#"{"test": "hello"}"#);

        transport.close().await.unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_transport_not_connected_after_close() {
        let mut transport = StdioTransport::spawn("cat", &[], &HashMap::new(), None)
            .await
            .unwrap();
        transport.close().await.unwrap();

        let result = transport.send("test").await;
        assert!(matches!(result, Err(TransportError::NotConnected)));

        let result = transport.receive().await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut transport = StdioTransport::spawn("cat", &[], &HashMap::new(), None)
            .await
            .unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_command() {
        let result =
            StdioTransport::spawn("nonexistent-mcp-server-12345", &[], &HashMap::new(), None)
                .await;
        assert!(matches!(result, Err(TransportError::SpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_receive_after_peer_exit() {
        let mut transport = spawn_sh("exit 0").await;
        let result = transport.receive().await;
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
        assert!(!transport.is_connected());
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_env_is_passed_to_child() {
        let mut env = HashMap::new();
        env.insert("TOOLDOCK_TEST_VALUE".to_string(), "forty-two".to_string());
        let mut transport = StdioTransport::spawn(
            "sh",
            &["-c".to_string(), "echo $TOOLDOCK_TEST_VALUE".to_string()],
            &env,
            None,
        )
        .await
        .unwrap();

        assert_eq!(transport.receive().await.unwrap(), "forty-two");
        transport.close().await.unwrap();
    }

    fn assert_reaped(pid: u32) {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        assert_eq!(kill(Pid::from_raw(pid as i32), None), Err(Errno::ESRCH));
    }

    #[tokio::test]
    async fn test_close_terminates_server() {
        let mut transport = spawn_sh("echo ready; exec sleep 30").await;
        assert_eq!(transport.receive().await.unwrap(), "ready");
        let pid = transport.pid().unwrap();

        transport.close().await.unwrap();
        assert_reaped(pid);
    }

    #[tokio::test]
    async fn test_close_kills_server_ignoring_sigterm() {
        let mut transport = spawn_sh("trap '' TERM; echo ready; exec sleep 30")
            .await
            .with_shutdown_grace(Duration::from_millis(50));
        assert_eq!(transport.receive().await.unwrap(), "ready");
        let pid = transport.pid().unwrap();

        let started = Instant::now();
        transport.close().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_reaped(pid);
    }

    #[tokio::test]
    async fn test_stderr_noise_does_not_block_stdout() {
        // Far more stderr than a pipe buffer holds, then one stdout frame.
        let mut transport =
            spawn_sh("i=0; while [ $i -lt 2000 ]; do echo 'log line padding padding padding' >&2; i=$((i+1)); done; echo done")
                .await;
        assert_eq!(transport.receive().await.unwrap(), "done");
        transport.close().await.unwrap();
    }
}
