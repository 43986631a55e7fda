//! Session binding commands.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use super::{to_json, uuid_param, Result};
use crate::rpc::{ClientSession, RpcError};
use crate::DaemonState;

/// Bind this connection to `user_id`'s engine and load its notifications.
///
/// The session stays bound even if the initial load fails, so the client
/// can retry with `load_notifications`.
pub async fn open_session(
    state: &Arc<DaemonState>,
    session: &mut ClientSession,
    params: &Value,
) -> Result {
    let user_id = uuid_param(params, "user_id")?;

    session.release();
    session.bind(state.sessions.acquire(user_id));
    info!(user = %user_id, "Session opened");

    let engine = session.require()?;
    engine.load(None).await.map_err(RpcError::from)?;
    to_json(&engine.snapshot())
}

/// Release this connection's session.
pub async fn close_session(session: &mut ClientSession) -> Result {
    let closed = session.release();
    Ok(serde_json::json!({"closed": closed}))
}
