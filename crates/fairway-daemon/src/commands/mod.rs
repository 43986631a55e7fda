//! IPC command handlers.
//!
//! Each submodule implements the commands for one IPC category.

pub mod friends;
pub mod notifications;
pub mod session;

use serde_json::Value;
use uuid::Uuid;

use crate::rpc::RpcError;

type Result = std::result::Result<Value, RpcError>;

/// Required UUID parameter.
fn uuid_param(params: &Value, name: &str) -> std::result::Result<Uuid, RpcError> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params(&format!("{name} required")))
        .and_then(|s| {
            Uuid::parse_str(s)
                .map_err(|e| RpcError::invalid_params(&format!("{name} is not a valid id: {e}")))
        })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result {
    serde_json::to_value(value).map_err(|e| RpcError::internal_error(&format!("encode: {e}")))
}
