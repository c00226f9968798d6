//! Validation of method names at registration and of request ids in a payload.

use std::collections::HashSet;

use crate::types::{McpError, McpResult, Message, CANCELLED, INITIALIZED};

/// Methods the dispatcher answers itself.
pub const RESERVED_METHODS: &[&str] = &["initialize"];

/// Validate a request method name before it is registered.
pub fn validate_method_name(method: &str) -> McpResult<()> {
    check_shape(method)?;

    if RESERVED_METHODS.contains(&method) {
        return Err(McpError::InvalidRequest(format!(
            "Method \"{method}\" is handled by the server and cannot be registered"
        )));
    }

    if method.starts_with("notifications/") {
        return Err(McpError::InvalidRequest(format!(
            "\"{method}\" is a notification name; register it as a notification handler"
        )));
    }

    Ok(())
}

/// Validate a notification method name before it is registered.
pub fn validate_notification_name(method: &str) -> McpResult<()> {
    check_shape(method)?;

    if method == INITIALIZED || method == CANCELLED {
        return Err(McpError::InvalidRequest(format!(
            "Notification \"{method}\" is handled by the server and cannot be registered"
        )));
    }

    Ok(())
}

/// Reject a payload that repeats a request id, since each id gets exactly one response.
pub fn validate_unique_ids(messages: &[Message]) -> McpResult<()> {
    let mut seen = HashSet::new();
    for message in messages.iter().filter(|m| m.is_request()) {
        if let Some(id) = message.id() {
            if !seen.insert(id) {
                return Err(McpError::InvalidRequest(format!(
                    "Request id {id} appears more than once in the payload"
                )));
            }
        }
    }
    Ok(())
}

fn check_shape(method: &str) -> McpResult<()> {
    if method.is_empty() {
        return Err(McpError::InvalidRequest(
            "Method name must not be empty".to_string(),
        ));
    }

    if method.trim() != method {
        return Err(McpError::InvalidRequest(format!(
            "Method name \"{method}\" must not have surrounding whitespace"
        )));
    }

    if method.starts_with("rpc.") {
        return Err(McpError::InvalidRequest(format!(
            "Method names starting with \"rpc.\" are reserved, got \"{method}\""
        )));
    }

    Ok(())
}
