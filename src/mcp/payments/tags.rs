//! Capability and payment-method tag parsing for announcement events.
//!
//! Pure functions over a signed event's tag list. Malformed entries are
//! dropped silently: tags come from the open network and partial data is
//! still useful.

use crate::nostr::event::NostrEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Tool,
    Prompt,
    Resource,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Tool => "tool",
            CapabilityKind::Prompt => "prompt",
            CapabilityKind::Resource => "resource",
        }
    }
}

/// A priced capability: `["cap", "<kind>:<name>", price, unit]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapTag {
    pub capability_identifier: String,
    pub price: String,
    pub currency_unit: String,
}

/// A cap tag whose capability identifier parsed into kind and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCapTag {
    pub capability_identifier: String,
    pub kind: CapabilityKind,
    pub name: String,
    pub price: String,
    pub currency_unit: String,
}

fn parse_capability_identifier(identifier: &str) -> Option<(CapabilityKind, &str)> {
    if let Some(name) = identifier.strip_prefix("tool:") {
        return Some((CapabilityKind::Tool, name));
    }
    if let Some(name) = identifier.strip_prefix("prompt:") {
        return Some((CapabilityKind::Prompt, name));
    }
    if let Some(name) = identifier.strip_prefix("resource:") {
        return Some((CapabilityKind::Resource, name));
    }
    None
}

/// Payment-method identifiers from `pmi` tags, deduplicated in first-seen
/// order.
pub fn parse_pmi_tags_from_event(event: Option<&NostrEvent>) -> Vec<String> {
    let Some(event) = event else {
        return Vec::new();
    };

    let mut pmis: Vec<String> = Vec::new();
    for value in event.tag_values("pmi") {
        if !pmis.iter().any(|seen| seen == value) {
            pmis.push(value.to_string());
        }
    }
    pmis
}

/// Cap tags with at least four elements; shorter entries are dropped.
pub fn parse_cap_tags_from_event(event: Option<&NostrEvent>) -> Vec<CapTag> {
    let Some(event) = event else {
        return Vec::new();
    };

    event
        .tags
        .iter()
        .filter(|tag| tag.first().is_some_and(|t| t == "cap") && tag.len() >= 4)
        .map(|tag| CapTag {
            capability_identifier: tag[1].clone(),
            price: tag[2].clone(),
            currency_unit: tag[3].clone(),
        })
        .collect()
}

/// Cap tags whose identifier carries a recognized kind prefix; the rest
/// are dropped.
pub fn to_parsed_cap_tags(cap_tags: &[CapTag]) -> Vec<ParsedCapTag> {
    cap_tags
        .iter()
        .filter_map(|tag| {
            let (kind, name) = parse_capability_identifier(&tag.capability_identifier)?;
            Some(ParsedCapTag {
                capability_identifier: tag.capability_identifier.clone(),
                kind,
                name: name.to_string(),
                price: tag.price.clone(),
                currency_unit: tag.currency_unit.clone(),
            })
        })
        .collect()
}

pub fn find_cap_tag_for_tool<'a>(cap_tags: &'a [CapTag], tool_name: &str) -> Option<&'a CapTag> {
    find_cap_tag(cap_tags, CapabilityKind::Tool, tool_name)
}

pub fn find_cap_tag_for_prompt<'a>(
    cap_tags: &'a [CapTag],
    prompt_name: &str,
) -> Option<&'a CapTag> {
    find_cap_tag(cap_tags, CapabilityKind::Prompt, prompt_name)
}

pub fn find_cap_tag_for_resource<'a>(cap_tags: &'a [CapTag], uri: &str) -> Option<&'a CapTag> {
    find_cap_tag(cap_tags, CapabilityKind::Resource, uri)
}

fn find_cap_tag<'a>(
    cap_tags: &'a [CapTag],
    kind: CapabilityKind,
    name: &str,
) -> Option<&'a CapTag> {
    let identifier = format!("{}:{}", kind.as_str(), name);
    cap_tags
        .iter()
        .find(|tag| tag.capability_identifier == identifier)
}

pub fn format_cap_tag_price(cap_tag: &CapTag) -> String {
    if cap_tag.currency_unit.is_empty() {
        cap_tag.price.clone()
    } else {
        format!("{} {}", cap_tag.price, cap_tag.currency_unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::SERVER_ANNOUNCEMENT_KIND;

    fn event_with_tags(tags: Vec<Vec<String>>) -> NostrEvent {
        NostrEvent {
            id: "id".to_string(),
            pubkey: "server".to_string(),
            created_at: 0,
            kind: SERVER_ANNOUNCEMENT_KIND,
            tags,
            content: String::new(),
            sig: String::new(),
        }
    }

    fn tag(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn pmi_tags_deduplicate_preserving_first_seen_order() {
        let event = event_with_tags(vec![
            tag(&["pmi", "ln"]),
            tag(&["pmi", "ln"]),
            tag(&["pmi", "onchain"]),
        ]);
        assert_eq!(
            parse_pmi_tags_from_event(Some(&event)),
            vec!["ln".to_string(), "onchain".to_string()]
        );
    }

    #[test]
    fn absent_event_yields_no_pmis() {
        assert!(parse_pmi_tags_from_event(None).is_empty());
    }

    #[test]
    fn cap_tags_require_four_elements() {
        let event = event_with_tags(vec![
            tag(&["cap", "tool:search", "100", "sats"]),
            tag(&["cap", "tool:broken", "100"]),
            tag(&["other", "tool:x", "1", "sats"]),
        ]);

        let caps = parse_cap_tags_from_event(Some(&event));
        assert_eq!(caps.len(), 1);
        assert_eq!(caps[0].capability_identifier, "tool:search");
        assert_eq!(caps[0].price, "100");
        assert_eq!(caps[0].currency_unit, "sats");
    }

    #[test]
    fn parsed_cap_tags_split_kind_and_name() {
        let caps = vec![
            CapTag {
                capability_identifier: "tool:search".to_string(),
                price: "100".to_string(),
                currency_unit: "sats".to_string(),
            },
            CapTag {
                capability_identifier: "gadget:unknown".to_string(),
                price: "1".to_string(),
                currency_unit: "sats".to_string(),
            },
        ];

        let parsed = to_parsed_cap_tags(&caps);
        assert_eq!(
            parsed,
            vec![ParsedCapTag {
                capability_identifier: "tool:search".to_string(),
                kind: CapabilityKind::Tool,
                name: "search".to_string(),
                price: "100".to_string(),
                currency_unit: "sats".to_string(),
            }]
        );
    }

    #[test]
    fn lookups_match_exact_identifier() {
        let caps = vec![
            CapTag {
                capability_identifier: "tool:search".to_string(),
                price: "100".to_string(),
                currency_unit: "sats".to_string(),
            },
            CapTag {
                capability_identifier: "resource:file:///etc/motd".to_string(),
                price: "5".to_string(),
                currency_unit: "sats".to_string(),
            },
        ];

        assert!(find_cap_tag_for_tool(&caps, "search").is_some());
        assert!(find_cap_tag_for_tool(&caps, "searcher").is_none());
        assert!(find_cap_tag_for_prompt(&caps, "search").is_none());
        assert!(find_cap_tag_for_resource(&caps, "file:///etc/motd").is_some());
    }

    #[test]
    fn price_formats_with_and_without_unit() {
        let priced = CapTag {
            capability_identifier: "tool:search".to_string(),
            price: "100".to_string(),
            currency_unit: "sats".to_string(),
        };
        assert_eq!(format_cap_tag_price(&priced), "100 sats");

        let unitless = CapTag {
            currency_unit: String::new(),
            ..priced
        };
        assert_eq!(format_cap_tag_price(&unitless), "100");
    }
}
