//! JSON-RPC server over Unix socket.
//!
//! Newline-delimited JSON-RPC 2.0. A connection binds to one user's shared
//! engine with `open_session`; from then on every view change is pushed as a
//! `notifications_changed` notification between responses.

use std::path::PathBuf;
use std::sync::Arc;

use fairway_notify::{EngineError, SessionHandle, StoreError};
use fairway_types::notifications::ViewSnapshot;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::commands;
use crate::DaemonState;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Method name.
    pub method: String,
    /// Parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    /// JSON-RPC version.
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Result or error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Server-initiated JSON-RPC notification (no id).
#[derive(Debug, Serialize)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: serde_json::Value,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    pub code: i32,
    /// Error name.
    pub message: String,
    /// Optional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcNotification {
    pub fn notifications_changed(snapshot: &ViewSnapshot) -> serde_json::Result<Self> {
        Ok(Self {
            jsonrpc: "2.0".to_string(),
            method: "notifications_changed".to_string(),
            params: serde_json::to_value(snapshot)?,
        })
    }
}

impl RpcError {
    fn new(code: i32, message: &str, data: Option<serde_json::Value>) -> Self {
        Self {
            code,
            message: message.to_string(),
            data,
        }
    }

    // Standard JSON-RPC errors

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self::new(-32700, "PARSE_ERROR", None)
    }

    /// Invalid request (-32600).
    pub fn invalid_request() -> Self {
        Self::new(-32600, "INVALID_REQUEST", None)
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            -32601,
            "METHOD_NOT_FOUND",
            Some(serde_json::json!({"method": method})),
        )
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self::new(
            -32602,
            "INVALID_PARAMS",
            Some(serde_json::json!({"detail": detail})),
        )
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self::new(
            -32603,
            "INTERNAL_ERROR",
            Some(serde_json::json!({"detail": detail})),
        )
    }

    // Notification and friend request errors

    /// Loading notifications failed (-32020).
    pub fn fetch_failed(detail: &str) -> Self {
        Self::new(
            -32020,
            "FETCH_FAILED",
            Some(serde_json::json!({"detail": detail, "retryable": true})),
        )
    }

    /// A mutation failed and was rolled back (-32021).
    pub fn mutation_failed(operation: &str, detail: &str, retryable: bool) -> Self {
        Self::new(
            -32021,
            "MUTATION_FAILED",
            Some(serde_json::json!({
                "operation": operation,
                "detail": detail,
                "retryable": retryable,
            })),
        )
    }

    /// The friend request is no longer pending (-32022).
    pub fn stale_state(request_id: &uuid::Uuid, status: &str) -> Self {
        Self::new(
            -32022,
            "STALE_STATE",
            Some(serde_json::json!({"request_id": request_id, "status": status})),
        )
    }

    /// The session's engine has been torn down (-32023).
    pub fn session_closed() -> Self {
        Self::new(-32023, "SESSION_CLOSED", None)
    }

    /// No session bound to this connection (-32024).
    pub fn no_session() -> Self {
        Self::new(-32024, "NO_SESSION", None)
    }

    /// The store refused the write (-32025).
    pub fn constraint(detail: &str) -> Self {
        Self::new(
            -32025,
            "CONSTRAINT",
            Some(serde_json::json!({"detail": detail})),
        )
    }
}

impl From<EngineError> for RpcError {
    fn from(err: EngineError) -> Self {
        let retryable = err.is_retryable();
        match err {
            EngineError::Fetch(source) => Self::fetch_failed(&source.to_string()),
            EngineError::Mutation { operation, source } => {
                Self::mutation_failed(operation, &source.to_string(), retryable)
            }
            EngineError::StaleState { request_id, status } => {
                Self::stale_state(&request_id, status.as_str())
            }
            EngineError::Disposed => Self::session_closed(),
        }
    }
}

impl From<StoreError> for RpcError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Constraint(detail) => Self::constraint(&detail),
            StoreError::NotFound(detail) => Self::invalid_params(&detail),
            other => Self::internal_error(&other.to_string()),
        }
    }
}

/// Per-connection state.
#[derive(Default)]
pub struct ClientSession {
    handle: Option<SessionHandle>,
    updates: Option<watch::Receiver<ViewSnapshot>>,
}

impl ClientSession {
    /// Bind to `handle`, releasing any previous session. Changes already
    /// visible are not re-sent.
    pub fn bind(&mut self, handle: SessionHandle) {
        let mut updates = handle.watch();
        drop(updates.borrow_and_update());
        self.updates = Some(updates);
        self.handle = Some(handle);
    }

    pub fn release(&mut self) -> bool {
        self.updates = None;
        self.handle.take().is_some()
    }

    /// The bound session, or `NO_SESSION`.
    pub fn require(&self) -> Result<&SessionHandle, RpcError> {
        self.handle.as_ref().ok_or_else(RpcError::no_session)
    }

    /// Wait for the next view change. Never resolves without a session.
    async fn next_update(&mut self) -> Option<ViewSnapshot> {
        let Some(updates) = self.updates.as_mut() else {
            return std::future::pending().await;
        };
        match updates.changed().await {
            Ok(()) => Some(updates.borrow_and_update().clone()),
            Err(_) => {
                self.updates = None;
                None
            }
        }
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    /// Create a new RPC server.
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut session = ClientSession::default();

    loop {
        let outgoing = tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break; // EOF
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = match serde_json::from_str::<RpcRequest>(&line) {
                    Ok(request) => dispatch_request(&state, &mut session, request).await,
                    Err(_) => RpcResponse::error(serde_json::Value::Null, RpcError::parse_error()),
                };
                serde_json::to_string(&response)?
            }
            Some(snapshot) = session.next_update() => {
                serde_json::to_string(&RpcNotification::notifications_changed(&snapshot)?)?
            }
        };

        writer.write_all(outgoing.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    if session.release() {
        debug!("Connection closed, session released");
    }
    Ok(())
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
pub async fn dispatch_request(
    state: &Arc<DaemonState>,
    session: &mut ClientSession,
    request: RpcRequest,
) -> RpcResponse {
    let id = request.id.clone();
    if request.jsonrpc != "2.0" {
        return RpcResponse::error(id, RpcError::invalid_request());
    }
    let method = request.method.as_str();
    let params = &request.params;

    debug!("Dispatching RPC method: {}", method);

    let result = match method {
        // Session
        "open_session" => commands::session::open_session(state, session, params).await,
        "close_session" => commands::session::close_session(session).await,

        // Notifications
        "get_notifications" => commands::notifications::get_notifications(session).await,
        "load_notifications" => commands::notifications::load_notifications(session, params).await,
        "mark_as_read" => commands::notifications::mark_as_read(session, params).await,
        "mark_all_as_read" => commands::notifications::mark_all_as_read(session).await,
        "delete_notification" => {
            commands::notifications::delete_notification(session, params).await
        }

        // Friends
        "respond_to_friend_request" => {
            commands::friends::respond_to_friend_request(session, params).await
        }
        "send_friend_request" => {
            commands::friends::send_friend_request(state, session, params).await
        }
        "get_pending_requests" => commands::friends::get_pending_requests(state, session).await,
        "get_friends" => commands::friends::get_friends(state, session).await,

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}
