//! Decoding of [`ServerMessage`] payloads into typed MCP results.

use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::{
    CallToolResult, GetPromptResult, InitializeResult, ListPromptsResult,
    ListResourceTemplatesResult, ListResourcesResult, ListToolsResult, ReadResourceResult, RpcError,
};
use serde_json::Value;

/// Method name of MCP progress notifications.
pub const PROGRESS_NOTIFICATION_METHOD: &str = "notifications/progress";

pub(crate) fn parse_initialize_result(message: ServerMessage) -> Result<InitializeResult, String> {
    let value = parse_response_value(message)?;
    let result =
        serde_json::from_value::<InitializeResult>(value).map_err(|err| err.to_string())?;
    if result.protocol_version.trim().is_empty() {
        return Err("Unexpected initialize response.".to_string());
    }
    Ok(result)
}

pub(crate) fn parse_list_tools(message: ServerMessage) -> Result<ListToolsResult, String> {
    parse_response(message)
}

pub(crate) fn parse_list_resources(message: ServerMessage) -> Result<ListResourcesResult, String> {
    parse_response(message)
}

pub(crate) fn parse_list_resource_templates(
    message: ServerMessage,
) -> Result<ListResourceTemplatesResult, String> {
    parse_response(message)
}

pub(crate) fn parse_list_prompts(message: ServerMessage) -> Result<ListPromptsResult, String> {
    parse_response(message)
}

pub(crate) fn parse_get_prompt(message: ServerMessage) -> Result<GetPromptResult, String> {
    parse_response(message)
}

pub(crate) fn parse_read_resource(message: ServerMessage) -> Result<ReadResourceResult, String> {
    parse_response(message)
}

pub(crate) fn parse_call_tool(message: ServerMessage) -> Result<CallToolResult, String> {
    parse_response(message)
}

fn parse_response<T: serde::de::DeserializeOwned>(message: ServerMessage) -> Result<T, String> {
    let value = parse_response_value(message)?;
    serde_json::from_value::<T>(value).map_err(|err| err.to_string())
}

pub(crate) fn parse_response_value(message: ServerMessage) -> Result<Value, String> {
    match message {
        ServerMessage::Response(response) => {
            serde_json::to_value(&response.result).map_err(|err| err.to_string())
        }
        ServerMessage::Error(error) => Err(format_rpc_error(&error.error)),
        other => Err(format_unexpected_server_message(&other)),
    }
}

/// Method and params of a notification message, when it is one.
pub(crate) fn notification_parts(message: &ServerMessage) -> Option<(String, Value)> {
    let ServerMessage::Notification(notification) = message else {
        return None;
    };
    let value = serde_json::to_value(notification).ok()?;
    let method = value.get("method")?.as_str()?.to_string();
    let params = value.get("params").cloned().unwrap_or(Value::Null);
    Some((method, params))
}

/// Progress tokens may arrive as strings or integers; both index the same
/// registry slot.
pub(crate) fn progress_token_from_params(params: &Value) -> Option<String> {
    match params.get("progressToken") {
        Some(Value::String(token)) => Some(token.clone()),
        Some(Value::Number(token)) => Some(token.to_string()),
        _ => None,
    }
}

pub(crate) fn format_unexpected_server_message(message: &ServerMessage) -> String {
    format!("Unexpected MCP server message: {message:?}")
}

pub(crate) fn format_rpc_error(error: &RpcError) -> String {
    let mut output = format!("MCP error {}: {}", error.code, error.message);
    if let Some(data) = &error.data {
        let details = data
            .get("details")
            .and_then(|value| value.as_str())
            .map(|value| value.to_string())
            .or_else(|| data.as_str().map(|value| value.to_string()))
            .or_else(|| serde_json::to_string_pretty(data).ok());

        if let Some(details) = details {
            if !details.is_empty() {
                output.push('\n');
                output.push_str(&details);
            }
        }
    }
    output
}
