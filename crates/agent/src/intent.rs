//! Action markers embedded in generated replies.
//!
//! The grammar is `ACTION-TOKEN:<NAME>` optionally followed by a JSON object.
//! Scanning (`scan_marker`) only finds the marker and its byte span; validation
//! (`validate`) turns it into an `Intent` and never fails.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use parley_core::domain::bot::BotType;
use parley_core::domain::intent::{ActionSystem, Intent};

pub const MARKER_PREFIX: &str = "ACTION-TOKEN:";

/// Known action names and the system each one is routed to.
const ACTION_SYSTEMS: &[(&str, ActionSystem)] = &[
    ("CREATE_TICKET", ActionSystem::Ticketing),
    ("OPEN_TICKET", ActionSystem::Ticketing),
    ("UPSERT_CONTACT", ActionSystem::Crm),
    ("CAPTURE_LEAD", ActionSystem::Crm),
    ("CREATE_INVOICE", ActionSystem::Invoicing),
    ("LOOKUP_PRODUCTS", ActionSystem::Catalog),
    ("NOTIFY", ActionSystem::Webhook),
    ("SEND_WEBHOOK", ActionSystem::Webhook),
];

pub fn system_for(action: &str) -> Option<ActionSystem> {
    ACTION_SYSTEMS.iter().find(|(name, _)| *name == action).map(|(_, system)| *system)
}

/// Actions advertised to the model for a bot type.
pub fn actions_for(bot_type: BotType) -> &'static [&'static str] {
    match bot_type {
        BotType::Knowledge => &[],
        BotType::Lead => &["CAPTURE_LEAD", "NOTIFY"],
        BotType::Support => &["CREATE_TICKET", "NOTIFY"],
        BotType::Workflow => {
            &["CREATE_TICKET", "UPSERT_CONTACT", "CREATE_INVOICE", "LOOKUP_PRODUCTS", "NOTIFY"]
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMarker<'a> {
    pub name: &'a str,
    /// Balanced `{...}` text following the name, if any.
    pub payload: Option<&'a str>,
    pub span: Range<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedIntent {
    pub intent: Intent,
    pub span: Range<usize>,
}

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"ACTION-TOKEN:([A-Za-z0-9_-]+)").expect("valid marker regex")
    })
}

/// Finds the first marker. Unbalanced braces leave the payload out of the span.
pub fn scan_marker(text: &str) -> Option<RawMarker<'_>> {
    let captures = marker_pattern().captures(text)?;
    let whole = captures.get(0)?;
    let name = captures.get(1)?.as_str();

    let after_name = whole.end();
    let rest = &text[after_name..];
    let payload_start = after_name + (rest.len() - rest.trim_start().len());

    match balanced_object_len(&text[payload_start..]) {
        Some(len) => Some(RawMarker {
            name,
            payload: Some(&text[payload_start..payload_start + len]),
            span: whole.start()..payload_start + len,
        }),
        None => Some(RawMarker { name, payload: None, span: whole.start()..after_name }),
    }
}

/// Byte length of a leading `{...}` object, honoring JSON strings and escapes.
fn balanced_object_len(text: &str) -> Option<usize> {
    if !text.starts_with('{') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (index, character) in text.char_indices() {
        if in_string {
            match character {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match character {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(index + 1);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn validate(marker: &RawMarker<'_>) -> Intent {
    let action = marker.name.to_ascii_uppercase();
    let data = marker
        .payload
        .and_then(|payload| serde_json::from_str::<Value>(payload).ok())
        .and_then(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        });
    Intent { system: system_for(&action), action, data }
}

pub fn parse(text: &str) -> Option<ParsedIntent> {
    let marker = scan_marker(text)?;
    Some(ParsedIntent { intent: validate(&marker), span: marker.span })
}

/// Reply text with the marker span cut out and whitespace tidied.
pub fn strip_marker(text: &str, span: &Range<usize>) -> String {
    let before = text[..span.start].trim_end();
    let after = text[span.end..].trim_start();
    match (before.is_empty(), after.is_empty()) {
        (true, _) => after.to_string(),
        (_, true) => before.to_string(),
        _ => format!("{before} {after}"),
    }
}
