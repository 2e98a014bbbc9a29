//! Transport Channel
//!
//! Framed, ordered, bidirectional delivery of protocol messages to a child
//! process over its standard streams. One JSON message per line.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::protocol::JsonRpcMessage;

/// Longest frame accepted from a provider, newline excluded
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// A framed message channel to a tool provider
#[async_trait]
pub trait Transport: Send {
    /// Write one message; fails if the peer is gone or the channel is closed
    async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), TransportError>;

    /// Wait for the next complete message
    async fn receive(&mut self) -> Result<JsonRpcMessage, TransportError>;

    /// Shut the channel down and terminate the peer. Safe to call repeatedly.
    async fn close(&mut self) -> Result<(), TransportError>;

    fn is_closed(&self) -> bool;
}

/// Command line of a tool-provider subprocess
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Transport over a child's stdin/stdout.
///
/// The child's lifetime belongs to this value alone: it is killed when the
/// transport is dropped without being closed.
pub struct StdioTransport {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    grace: Duration,
    max_frame: usize,
    closed: bool,
}

impl StdioTransport {
    /// Spawn the child and wire its standard streams
    pub fn spawn(spec: &CommandSpec, grace: Duration) -> Result<Self, TransportError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{}: {e}", spec.program)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Spawn("child stdin was not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Spawn("child stdout was not captured".into()))?;

        debug!(program = %spec.program, pid = ?child.id(), "spawned tool provider");

        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout: Some(BufReader::new(stdout)),
            grace,
            max_frame: MAX_FRAME_BYTES,
            closed: false,
        })
    }

    /// Cap the size of a single incoming frame
    #[must_use]
    pub const fn with_max_frame(mut self, bytes: usize) -> Self {
        self.max_frame = bytes;
        self
    }

    /// OS process id, while the child is running
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        let stdin = self.stdin.as_mut().ok_or(TransportError::Closed)?;
        let mut line = message
            .to_line()
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        line.push('\n');

        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        debug!(bytes = line.len(), method = ?message.method(), "sent frame");
        Ok(())
    }

    async fn receive(&mut self) -> Result<JsonRpcMessage, TransportError> {
        let reader = self.stdout.as_mut().ok_or(TransportError::Closed)?;
        // One extra byte for the newline
        let limit = u64::try_from(self.max_frame).unwrap_or(u64::MAX).saturating_add(1);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
            if read == 0 {
                return Err(TransportError::Eof);
            }
            if buf.last() != Some(&b'\n') && buf.len() > self.max_frame {
                warn!(limit = self.max_frame, "oversized frame from tool provider");
                return Err(TransportError::Malformed(format!(
                    "frame exceeds {} bytes",
                    self.max_frame
                )));
            }
            let line = std::str::from_utf8(&buf).map_err(|e| {
                warn!(error = %e, "frame from tool provider is not UTF-8");
                TransportError::Malformed(format!("frame is not UTF-8: {e}"))
            })?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return JsonRpcMessage::parse(line).map_err(|e| {
                warn!(error = %e, "unparseable frame from tool provider");
                TransportError::Malformed(e.to_string())
            });
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Dropping both pipe ends signals EOF to a well-behaved provider.
        self.stdin.take();
        self.stdout.take();

        match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "tool provider exited");
                Ok(())
            }
            Ok(Err(e)) => Err(TransportError::Io(e)),
            Err(_) => {
                warn!(grace = ?self.grace, "tool provider ignored shutdown, killing it");
                self.child.kill().await?;
                Ok(())
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
