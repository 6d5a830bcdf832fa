//! MCP Server
//!
//! Answers JSON-RPC requests with the policy tools. Each request is handled
//! on its own task against one policy snapshot; responses are funnelled
//! through a single writer so lines never interleave.

use crate::mcp::protocol::{
    negotiate_protocol_version, CallToolResult, InitializeParams, InitializeResult, McpError,
    McpMethod, McpRequest, McpResponse, ServerInfo, Tool, ToolCallParams,
};
use crate::mcp::transport::{Incoming, MessageReader, MessageWriter};
use crate::policy::{PolicyStore, SecurityPolicy};
use crate::tools::BoundedExecutor;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Name reported in `serverInfo`
pub const SERVER_NAME: &str = "ExecBoxMCP";

/// Responses queued for the writer before handlers wait
const RESPONSE_QUEUE: usize = 64;

/// Outcome of the `validate_command` tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandCheck {
    pub is_allowed: bool,
    pub reason: String,
    pub command: String,
}

impl CommandCheck {
    /// Check `command` against `policy` without running it
    pub fn evaluate(policy: &SecurityPolicy, command: &str) -> Self {
        let validation = policy.validate_command(command);
        Self {
            is_allowed: validation.is_allowed(),
            reason: validation.reason(),
            command: command.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteArgs {
    command: String,
    #[serde(default)]
    working_directory: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValidateArgs {
    command: String,
}

/// Policy-gated execution server
#[derive(Debug, Clone)]
pub struct McpServer {
    store: Arc<PolicyStore>,
    executor: BoundedExecutor,
}

impl McpServer {
    pub fn new(store: Arc<PolicyStore>, executor: BoundedExecutor) -> Self {
        Self { store, executor }
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    /// Tools advertised by `tools/list`
    pub fn tools() -> Vec<Tool> {
        let no_args = json!({ "type": "object", "properties": {} });
        vec![
            Tool {
                name: "execute_powershell".to_string(),
                description: "Execute a PowerShell command with security restrictions."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "command": {
                            "type": "string",
                            "description": "The PowerShell command to execute"
                        },
                        "working_directory": {
                            "type": "string",
                            "description": "Optional working directory for command execution"
                        }
                    },
                    "required": ["command"]
                }),
            },
            Tool {
                name: "list_allowed_commands".to_string(),
                description: "Get the list of allowed PowerShell commands.".to_string(),
                input_schema: no_args.clone(),
            },
            Tool {
                name: "list_allowed_directories".to_string(),
                description: "Get the list of allowed working directories.".to_string(),
                input_schema: no_args.clone(),
            },
            Tool {
                name: "get_security_config".to_string(),
                description: "Get the current security configuration.".to_string(),
                input_schema: no_args,
            },
            Tool {
                name: "validate_command".to_string(),
                description: "Validate a PowerShell command without executing it.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "command": {
                            "type": "string",
                            "description": "The PowerShell command to validate"
                        }
                    },
                    "required": ["command"]
                }),
            },
        ]
    }

    /// Handle one request
    ///
    /// Returns `None` for notifications.
    pub async fn handle(&self, request: McpRequest) -> Option<McpResponse> {
        let method = McpMethod::from(request.method.as_str());
        debug!(method = method.as_str(), id = ?request.id, "Handling request");

        let outcome = self.dispatch(&method, request.params).await;

        if request.id.is_none() {
            if let Err(e) = outcome {
                debug!(method = method.as_str(), "Ignoring failed notification: {}", e);
            }
            return None;
        }

        Some(match outcome {
            Ok(result) => McpResponse::ok(request.id, result),
            Err(e) => {
                warn!(method = method.as_str(), "Request failed: {}", e);
                McpResponse::err(request.id, e)
            }
        })
    }

    async fn dispatch(&self, method: &McpMethod, params: Option<Value>) -> Result<Value, McpError> {
        match method {
            McpMethod::Initialize => {
                let params: InitializeParams = match params {
                    None | Some(Value::Null) => InitializeParams::default(),
                    Some(value) => parse_params(value)?,
                };
                if let Some(client) = &params.client_info {
                    info!(client = %client.name, version = %client.version, "Client connected");
                }
                to_value(InitializeResult {
                    protocol_version: negotiate_protocol_version(
                        params.protocol_version.as_deref(),
                    )
                    .to_string(),
                    capabilities: json!({ "tools": { "listChanged": false } }),
                    server_info: ServerInfo {
                        name: SERVER_NAME.to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    },
                })
            }
            McpMethod::Initialized => Ok(Value::Null),
            McpMethod::Ping => Ok(json!({})),
            McpMethod::ToolsList => Ok(json!({ "tools": Self::tools() })),
            McpMethod::ToolsCall => {
                let params = params.ok_or_else(|| McpError::invalid_params("Missing params"))?;
                let params: ToolCallParams = parse_params(params)?;
                to_value(self.call_tool(params).await?)
            }
            McpMethod::Custom(name) => Err(McpError::method_not_found(name.as_str())),
        }
    }

    /// Run one tool against a single policy snapshot
    pub async fn call_tool(&self, params: ToolCallParams) -> Result<CallToolResult, McpError> {
        let policy = self.store.snapshot();
        let arguments = match params.arguments {
            Value::Null => json!({}),
            other => other,
        };

        let value = match params.name.as_str() {
            "execute_powershell" => {
                let args: ExecuteArgs = parse_arguments(&params.name, arguments)?;
                info!(command = %args.command, "execute_powershell called");
                let result = self
                    .executor
                    .run(&policy, &args.command, args.working_directory.as_deref())
                    .await;
                to_value(result)?
            }
            "list_allowed_commands" => to_value(policy.allowed_commands())?,
            "list_allowed_directories" => to_value(policy.allowed_directories())?,
            "get_security_config" => to_value(policy.summary())?,
            "validate_command" => {
                let args: ValidateArgs = parse_arguments(&params.name, arguments)?;
                to_value(CommandCheck::evaluate(&policy, &args.command))?
            }
            other => return Err(McpError::invalid_params(format!("Unknown tool: {}", other))),
        };

        Ok(CallToolResult::structured(value))
    }

    /// Serve requests until the reader reaches end of stream
    ///
    /// In-flight requests are allowed to finish and their responses are
    /// written before this returns.
    pub async fn serve<R, W>(
        self: Arc<Self>,
        mut reader: MessageReader<R>,
        mut writer: MessageWriter<W>,
    ) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<McpResponse>(RESPONSE_QUEUE);

        let writer_task = tokio::spawn(async move {
            while let Some(response) = rx.recv().await {
                writer.send(&response).await?;
            }
            Ok::<(), anyhow::Error>(())
        });

        let mut in_flight = JoinSet::new();
        let read_result = loop {
            let incoming = match reader.recv().await {
                Ok(Some(incoming)) => incoming,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };

            match incoming {
                Incoming::Request(request) => {
                    let server = self.clone();
                    let tx = tx.clone();
                    in_flight.spawn(async move {
                        if let Some(response) = server.handle(request).await {
                            // Writer gone means the client went away
                            let _ = tx.send(response).await;
                        }
                    });
                }
                Incoming::Invalid { id, error } => {
                    warn!("Rejecting malformed message: {}", error);
                    if tx.send(McpResponse::err(id, error)).await.is_err() {
                        break Ok(());
                    }
                }
            }

            // Reap finished handlers so the set does not grow unbounded
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!("Request handler panicked: {}", e);
                }
            }
        };

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("Request handler panicked: {}", e);
            }
        }
        drop(tx);

        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Response writer stopped: {:#}", e),
            Err(e) => error!("Response writer panicked: {}", e),
        }

        info!("Client disconnected");
        read_result
    }
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, McpError> {
    serde_json::from_value(params)
        .map_err(|e| McpError::invalid_params(format!("Invalid params: {}", e)))
}

fn parse_arguments<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, McpError> {
    serde_json::from_value(arguments)
        .map_err(|e| McpError::invalid_params(format!("Invalid arguments for {}: {}", tool, e)))
}

fn to_value<T: Serialize>(value: T) -> Result<Value, McpError> {
    serde_json::to_value(value).map_err(|e| McpError::internal_error(e.to_string()))
}
