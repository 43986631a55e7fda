//! Friend request command handlers.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use super::{to_json, uuid_param, Result};
use crate::rpc::{ClientSession, RpcError};
use crate::DaemonState;

/// Accept or decline a pending request addressed to the session user.
pub async fn respond_to_friend_request(session: &ClientSession, params: &Value) -> Result {
    let request_id = uuid_param(params, "request_id")?;
    let accept = params
        .get("accept")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| RpcError::invalid_params("accept required"))?;

    let engine = session.require()?;
    let status = engine.respond_to_friend_request(&request_id, accept).await?;
    Ok(serde_json::json!({"request_id": request_id, "status": status}))
}

/// Propose a friendship from the session user to `receiver_id`.
pub async fn send_friend_request(
    state: &Arc<DaemonState>,
    session: &ClientSession,
    params: &Value,
) -> Result {
    let receiver_id = uuid_param(params, "receiver_id")?;
    let sender_id = *session.require()?.user_id();

    let request = state
        .backend
        .send_friend_request(&sender_id, &receiver_id)
        .await?;
    info!(request = %request.id, "Friend request sent");
    to_json(&request)
}

/// Requests waiting on the session user's answer.
pub async fn get_pending_requests(state: &Arc<DaemonState>, session: &ClientSession) -> Result {
    let user_id = *session.require()?.user_id();
    to_json(&state.backend.pending_requests(&user_id).await?)
}

pub async fn get_friends(state: &Arc<DaemonState>, session: &ClientSession) -> Result {
    let user_id = *session.require()?.user_id();
    to_json(&state.backend.friends(&user_id).await?)
}
