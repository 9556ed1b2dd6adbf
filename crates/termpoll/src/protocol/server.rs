//! termpoll MCP server implementation
//!
//! Routes tool calls to a [`SessionRegistry`] using rmcp's `#[tool_router]`
//! pattern. Calls that can block on a terminal or on the shutdown sequence
//! run on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ErrorData as McpError,
};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use termpoll_core::{Dimensions, Error};
use termpoll_pty::{Escalation, SignalOutcome};
use termpoll_session::SessionRegistry;

use crate::tools::{
    CloseParams, CloseResponse, CreateParams, InterruptParams, InterruptResponse, ListParams,
    ListResponse, ResizeParams, ResizeResponse, UpdatesParams, WriteParams, WriteResponse,
};

/// Upper bound on a single long-poll.
const MAX_WAIT: Duration = Duration::from_secs(60);

/// termpoll MCP server
///
/// Exposes the sessions of one registry as MCP tools.
#[derive(Clone)]
pub struct TermpollServer {
    /// Sessions and their message log
    registry: Arc<SessionRegistry>,
    /// Tool router for handling MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl TermpollServer {
    /// Create a server over `registry`.
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            tool_router: Self::tool_router(),
        }
    }

    /// The registry tools operate on.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Run a registry call that may block on the terminal or the shutdown sequence.
    async fn blocking<T, F>(&self, f: F) -> Result<T, McpError>
    where
        T: Send + 'static,
        F: FnOnce(&SessionRegistry) -> termpoll_core::Result<T> + Send + 'static,
    {
        let registry = Arc::clone(&self.registry);
        let result = tokio::task::spawn_blocking(move || f(&registry))
            .await
            .map_err(|e| {
                error!("Blocking task failed: {}", e);
                McpError::new(ErrorCode(-32603), format!("Task failed: {e}"), None)
            })?;
        result.map_err(to_mcp_error)
    }

    /// Start a shell session
    #[tool(
        description = "Start a shell session. Poll session_updates for its prompt, output and stop marks"
    )]
    #[instrument(skip_all)]
    pub async fn session_create(
        &self,
        Parameters(params): Parameters<CreateParams>,
    ) -> Result<CallToolResult, McpError> {
        let mut terminal = self.registry.config().terminal.clone();
        if let Some(shell) = params.shell {
            terminal.shell = shell;
        }
        if let Some(args) = params.args {
            terminal.shell_args = args;
        }
        terminal.env.extend(params.env);

        let mut config = self.registry.shell_config(&terminal);
        config.cwd = params.cwd;

        info!("Creating session: shell='{}'", config.shell);
        let session = self.blocking(move |r| r.create_session(config)).await?;

        info!("Session created successfully: session_id={}", session.id());
        json_result(&session.descriptor())
    }

    /// Send input to a session
    #[tool(description = "Write text to a session's terminal. Include \"\\n\" to run a command")]
    #[instrument(skip_all)]
    pub async fn session_write(
        &self,
        Parameters(params): Parameters<WriteParams>,
    ) -> Result<CallToolResult, McpError> {
        debug!(
            "Writing to session: session_id={}, length={} bytes",
            params.session_id,
            params.data.len()
        );
        let session_id = params.session_id;
        let bytes_written = self
            .blocking(move |r| r.write_input(&session_id, params.data.as_bytes()))
            .await?;
        json_result(&WriteResponse { bytes_written })
    }

    /// Interrupt the foreground job
    #[tool(description = "Send Ctrl-C (SIGINT) to whatever runs in the foreground of a session")]
    #[instrument(skip_all)]
    pub async fn session_interrupt(
        &self,
        Parameters(params): Parameters<InterruptParams>,
    ) -> Result<CallToolResult, McpError> {
        info!("Interrupting session: session_id={}", params.session_id);
        let session_id = params.session_id;
        let outcome = self
            .blocking(move |r| r.send_interrupt(&session_id))
            .await?;
        json_result(&InterruptResponse {
            delivered: outcome == SignalOutcome::Delivered,
        })
    }

    /// Apply terminal geometry
    #[tool(description = "Resize a session's terminal. Only 24 rows by 80 columns is supported")]
    #[instrument(skip_all)]
    pub async fn session_resize(
        &self,
        Parameters(params): Parameters<ResizeParams>,
    ) -> Result<CallToolResult, McpError> {
        let session_id = params.session_id;
        let dimensions = Dimensions::new(params.rows, params.cols);
        self.blocking(move |r| r.resize(&session_id, dimensions))
            .await?;
        json_result(&ResizeResponse {
            rows: dimensions.rows,
            cols: dimensions.cols,
        })
    }

    /// Shut a session down
    #[tool(description = "Close a session: hang up, escalate to SIGTERM then SIGKILL, and reap the shell")]
    #[instrument(skip_all)]
    pub async fn session_close(
        &self,
        Parameters(params): Parameters<CloseParams>,
    ) -> Result<CallToolResult, McpError> {
        let session_id = params.session_id;
        info!("Closing session: session_id={}", session_id);
        let (report, session) = self
            .blocking(move |r| {
                let report = r.close_session(&session_id)?;
                Ok((report, r.get_session(&session_id)?.descriptor()))
            })
            .await?;

        info!(
            "Session closed successfully: session_id={}, escalation={:?}",
            session_id, report.escalation
        );
        json_result(&CloseResponse {
            session,
            escalation: escalation_name(report.escalation).to_string(),
            exit_code: report.exit_code,
        })
    }

    /// List sessions
    #[tool(description = "List sessions, oldest first, including reaped ones still retained")]
    #[instrument(skip_all)]
    pub async fn session_list(
        &self,
        Parameters(_params): Parameters<ListParams>,
    ) -> Result<CallToolResult, McpError> {
        let sessions = self.registry.list_sessions();
        let count = sessions.len();
        debug!("Found {} session(s)", count);
        json_result(&ListResponse { sessions, count })
    }

    /// Read messages after a cursor
    #[tool(
        description = "Read a session's messages after a cursor. Pass the returned cursor as `since` on the next call; set wait_ms to long-poll"
    )]
    #[instrument(skip_all)]
    pub async fn session_updates(
        &self,
        Parameters(params): Parameters<UpdatesParams>,
    ) -> Result<CallToolResult, McpError> {
        let updates = match params.wait_ms {
            Some(ms) if ms > 0 => {
                let timeout = Duration::from_millis(ms).min(MAX_WAIT);
                self.registry
                    .wait_for_updates(&params.session_id, params.since, timeout)
                    .await
            }
            _ => self.registry.get_updates(&params.session_id, params.since),
        }
        .map_err(to_mcp_error)?;

        debug!(
            "Updates for session {}: {} message(s)",
            params.session_id,
            updates.messages.len()
        );
        json_result(&updates)
    }
}

// Implement the ServerHandler trait to define server capabilities
#[tool_handler]
impl rmcp::ServerHandler for TermpollServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "termpoll - drive shell sessions on pseudo-terminals. \
                 Use session_create to start a shell, session_write to run commands, \
                 and session_updates with the returned cursor to poll output, \
                 prompt-ready and stop-mark messages."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Caller mistakes are invalid params; everything else is internal.
fn to_mcp_error(err: Error) -> McpError {
    let code = match &err {
        Error::SessionNotFound(_)
        | Error::SessionTerminated(_)
        | Error::InvalidDimensions { .. }
        | Error::InvalidInput(_)
        | Error::Config(_) => ErrorCode(-32602),
        _ => ErrorCode(-32603),
    };
    warn!("Tool call failed: {}", err);
    McpError::new(code, err.to_string(), None)
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| {
        McpError::new(
            ErrorCode(-32603),
            format!("Failed to encode response: {e}"),
            None,
        )
    })?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn escalation_name(escalation: Escalation) -> &'static str {
    match escalation {
        Escalation::Hangup => "hangup",
        Escalation::Terminate => "terminate",
        Escalation::Kill => "kill",
    }
}
