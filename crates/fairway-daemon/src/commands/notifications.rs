//! Notification command handlers.

use serde_json::Value;

use super::{to_json, uuid_param, Result};
use crate::rpc::{ClientSession, RpcError};

/// Current view snapshot.
pub async fn get_notifications(session: &ClientSession) -> Result {
    to_json(&session.require()?.snapshot())
}

/// Reload from the store, optionally with an explicit page size.
pub async fn load_notifications(session: &ClientSession, params: &Value) -> Result {
    let engine = session.require()?;
    let limit = match params.get("limit") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            v.as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| RpcError::invalid_params("limit must be a non-negative integer"))?,
        ),
    };
    let count = engine.load(limit).await?;
    Ok(serde_json::json!({"count": count}))
}

pub async fn mark_as_read(session: &ClientSession, params: &Value) -> Result {
    let id = uuid_param(params, "id")?;
    let engine = session.require()?;
    engine.mark_as_read(&id).await?;
    Ok(serde_json::json!({"unread_count": engine.snapshot().unread_count}))
}

pub async fn mark_all_as_read(session: &ClientSession) -> Result {
    let engine = session.require()?;
    engine.mark_all_as_read().await?;
    Ok(serde_json::json!({"unread_count": engine.snapshot().unread_count}))
}

pub async fn delete_notification(session: &ClientSession, params: &Value) -> Result {
    let id = uuid_param(params, "id")?;
    let engine = session.require()?;
    engine.delete_notification(&id).await?;
    Ok(serde_json::json!({"deleted": true}))
}
