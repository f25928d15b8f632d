//! Parsing of signed server announcement events into typed models.
//!
//! Announcements are best-effort inputs from the network: anything that
//! fails validation is logged and treated as "no data" rather than raised.

use crate::core::constants::{
    PROMPTS_LIST_KIND, RESOURCES_LIST_KIND, RESOURCE_TEMPLATES_LIST_KIND, SERVER_ANNOUNCEMENT_KIND,
    TOOLS_LIST_KIND,
};
use crate::mcp::error::McpError;
use crate::nostr::event::NostrEvent;
use rust_mcp_schema::{
    InitializeResult, ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult,
    ListToolsResult, Prompt, Resource, ResourceTemplate, Tool,
};
use tracing::warn;

/// A server's self-description, derived from its announcement event.
#[derive(Debug, Clone)]
pub struct ServerAnnouncement {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub name: String,
    pub website: Option<String>,
    pub picture: Option<String>,
    pub about: Option<String>,
    pub supports_encryption: bool,
    pub capabilities: InitializeResult,
}

/// Parses a server announcement event; invalid content degrades to `None`.
pub fn parse_server_announcement(event: &NostrEvent) -> Option<ServerAnnouncement> {
    match try_parse_server_announcement(event) {
        Ok(announcement) => Some(announcement),
        Err(err) => {
            warn!(event_id = %event.id, %err, "Ignoring invalid server announcement");
            None
        }
    }
}

fn try_parse_server_announcement(event: &NostrEvent) -> Result<ServerAnnouncement, McpError> {
    if event.kind != SERVER_ANNOUNCEMENT_KIND {
        return Err(McpError::Parse {
            message: format!("unexpected announcement kind {}", event.kind),
        });
    }

    let capabilities: InitializeResult =
        serde_json::from_str(&event.content).map_err(|err| McpError::Parse {
            message: format!("invalid server capabilities: {err}"),
        })?;

    let name = event
        .tag_value("name")
        .map(str::to_string)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| {
            let from_info = capabilities.server_info.name.clone();
            if from_info.is_empty() {
                "Unknown Server".to_string()
            } else {
                from_info
            }
        });

    Ok(ServerAnnouncement {
        id: event.id.clone(),
        pubkey: event.pubkey.clone(),
        created_at: event.created_at,
        name,
        website: event.tag_value("website").map(str::to_string),
        picture: event.tag_value("picture").map(str::to_string),
        about: event.tag_value("about").map(str::to_string),
        supports_encryption: event.has_tag("support_encryption"),
        capabilities,
    })
}

/// Newest valid announcement across a set of events.
pub fn latest_announcement(events: &[NostrEvent]) -> Option<ServerAnnouncement> {
    let mut announcements: Vec<ServerAnnouncement> =
        events.iter().filter_map(parse_server_announcement).collect();
    announcements.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    announcements.into_iter().next()
}

pub fn tools_from_event(event: &NostrEvent) -> Option<Vec<Tool>> {
    parse_list_event::<ListToolsResult>(event, TOOLS_LIST_KIND, "tools").map(|list| list.tools)
}

pub fn resources_from_event(event: &NostrEvent) -> Option<Vec<Resource>> {
    parse_list_event::<ListResourcesResult>(event, RESOURCES_LIST_KIND, "resources")
        .map(|list| list.resources)
}

pub fn resource_templates_from_event(event: &NostrEvent) -> Option<Vec<ResourceTemplate>> {
    parse_list_event::<ListResourceTemplatesResult>(
        event,
        RESOURCE_TEMPLATES_LIST_KIND,
        "resource templates",
    )
    .map(|list| list.resource_templates)
}

pub fn prompts_from_event(event: &NostrEvent) -> Option<Vec<Prompt>> {
    parse_list_event::<ListPromptsResult>(event, PROMPTS_LIST_KIND, "prompts")
        .map(|list| list.prompts)
}

fn parse_list_event<T: serde::de::DeserializeOwned>(
    event: &NostrEvent,
    expected_kind: u16,
    label: &str,
) -> Option<T> {
    if event.kind != expected_kind {
        warn!(
            event_id = %event.id,
            kind = event.kind,
            expected_kind,
            "Ignoring {label} list event of unexpected kind"
        );
        return None;
    }
    match serde_json::from_str::<T>(&event.content) {
        Ok(list) => Some(list),
        Err(err) => {
            warn!(event_id = %event.id, %err, "Ignoring invalid {label} list event");
            None
        }
    }
}
