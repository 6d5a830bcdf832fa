//! MCP Transport Layer
//!
//! Line-delimited JSON-RPC over a byte stream. Each message is one line of
//! JSON terminated by `\n`; blank lines are skipped.
//!
//! # Architecture
//!
//! The transport layer is responsible only for sending and receiving messages.
//! Protocol concerns (JSON-RPC formatting) are handled in the protocol layer.
//! Stdout carries nothing but responses; logs go to stderr.

use crate::mcp::protocol::{McpError, McpRequest, McpResponse, RequestId};
use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// One decoded line from the client
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// A well-formed request or notification
    Request(McpRequest),

    /// A line that could not be decoded; answered with `error`
    Invalid {
        id: Option<RequestId>,
        error: McpError,
    },
}

impl Incoming {
    /// Decode one line
    ///
    /// Bad JSON is a parse error with no id. Valid JSON that is not a
    /// request is an invalid request, keeping the id when one can be read.
    pub fn decode(line: &str) -> Self {
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                return Self::Invalid {
                    id: None,
                    error: McpError::parse_error(format!("Parse error: {}", e)),
                }
            }
        };

        let id = value
            .get("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

        match serde_json::from_value::<McpRequest>(value) {
            Ok(request) if request.jsonrpc == crate::mcp::protocol::JSONRPC_VERSION => {
                Self::Request(request)
            }
            Ok(request) => Self::Invalid {
                id: request.id,
                error: McpError::invalid_request(format!(
                    "Unsupported jsonrpc version: {}",
                    request.jsonrpc
                )),
            },
            Err(e) => Self::Invalid {
                id,
                error: McpError::invalid_request(format!("Invalid request: {}", e)),
            },
        }
    }
}

/// Reads line-delimited messages
pub struct MessageReader<R> {
    reader: BufReader<R>,

    /// Reusable buffer for reading lines
    line_buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line_buffer: Vec::with_capacity(4096),
        }
    }

    /// Next message, or `None` once the client closes the stream
    pub async fn recv(&mut self) -> Result<Option<Incoming>> {
        loop {
            self.line_buffer.clear();
            let bytes_read = self
                .reader
                .read_until(b'\n', &mut self.line_buffer)
                .await
                .context("Failed to read from client")?;

            if bytes_read == 0 {
                return Ok(None);
            }

            let line = match std::str::from_utf8(&self.line_buffer) {
                Ok(line) => line.trim(),
                Err(e) => {
                    tracing::debug!("Received {} bytes of non-UTF-8 from client", bytes_read);
                    return Ok(Some(Incoming::Invalid {
                        id: None,
                        error: McpError::parse_error(format!("Parse error: {}", e)),
                    }));
                }
            };
            if line.is_empty() {
                continue;
            }

            tracing::debug!("Received from client: {}", line);
            return Ok(Some(Incoming::decode(line)));
        }
    }
}

/// Writes line-delimited responses
pub struct MessageWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize a response as a single line and flush it
    pub async fn send(&mut self, response: &McpResponse) -> Result<()> {
        let json =
            serde_json::to_string(response).context("Failed to serialize MCP response to JSON")?;

        tracing::debug!("Sending to client: {}", json);

        self.writer
            .write_all(json.as_bytes())
            .await
            .context("Failed to write response")?;
        self.writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline")?;
        self.writer
            .flush()
            .await
            .context("Failed to flush response")?;

        Ok(())
    }
}

/// Reader and writer over the process's stdin and stdout
pub fn stdio() -> (MessageReader<tokio::io::Stdin>, MessageWriter<tokio::io::Stdout>) {
    (
        MessageReader::new(tokio::io::stdin()),
        MessageWriter::new(tokio::io::stdout()),
    )
}
