//! Message Normalizer
//!
//! Turns an arbitrary decoded payload into a [`DisplayEvent`], or decides that
//! it must not be displayed. The backend (and older deployments of it) emit
//! several loosely related shapes, so recognition is an ordered table of
//! independent rules: the first rule that reaches a verdict wins, and every
//! rule can be exercised on its own.
//!
//! Normalization is pure. Callers own logging of dropped payloads.

use crate::display::DisplayEvent;
use serde_json::{Map, Value};

/// `type` tags that mark keep-alive traffic.
pub const KEEPALIVE_TYPES: &[&str] = &["ping", "pong", "keepalive"];

/// String field carrying a diagnostic line.
pub const LOG_FIELD: &str = "log";

/// Field names that may carry the speaker, in order of preference.
pub const ROLE_FIELDS: &[&str] = &["role", "speaker", "sender", "from"];

/// Field names that may carry the message body, in order of preference.
pub const CONTENT_FIELDS: &[&str] = &["content", "message", "text", "body"];

/// Outcome of a rule that recognized a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Recognized, but not for display.
    Drop,
    Emit(DisplayEvent),
}

type Payload = Map<String, Value>;

/// One recognition step. Returns `None` to defer to the next rule.
pub struct Rule {
    pub name: &'static str,
    pub apply: fn(&Payload) -> Option<Verdict>,
}

/// The recognition table, in evaluation order.
pub const RULES: &[Rule] = &[
    Rule {
        name: "keepalive",
        apply: keepalive,
    },
    Rule {
        name: "log_field",
        apply: log_field,
    },
    Rule {
        name: "canonical",
        apply: canonical,
    },
    Rule {
        name: "synonyms",
        apply: synonyms,
    },
    Rule {
        name: "two_field_salvage",
        apply: two_field_salvage,
    },
];

/// Normalizes `raw` into a display event, or `None` if it must be dropped.
///
/// Non-object payloads are never recognized; plain-text salvage is the
/// caller's decision (see [`crate::inbound`]).
pub fn normalize(raw: &Value) -> Option<DisplayEvent> {
    match explain(raw)? {
        (_, Verdict::Emit(event)) => Some(event),
        (_, Verdict::Drop) => None,
    }
}

/// Runs the rule table and reports which rule decided, if any.
pub fn explain(raw: &Value) -> Option<(&'static str, Verdict)> {
    let payload = raw.as_object()?;
    RULES
        .iter()
        .find_map(|rule| (rule.apply)(payload).map(|verdict| (rule.name, verdict)))
}

fn non_empty_str<'a>(payload: &'a Payload, field: &str) -> Option<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}

fn first_of<'a>(payload: &'a Payload, fields: &[&str]) -> Option<&'a str> {
    fields.iter().find_map(|field| non_empty_str(payload, field))
}

fn keepalive(payload: &Payload) -> Option<Verdict> {
    payload
        .get("type")
        .and_then(Value::as_str)
        .filter(|kind| KEEPALIVE_TYPES.contains(kind))
        .map(|_| Verdict::Drop)
}

fn log_field(payload: &Payload) -> Option<Verdict> {
    non_empty_str(payload, LOG_FIELD).map(|line| Verdict::Emit(DisplayEvent::infolog(line)))
}

fn canonical(payload: &Payload) -> Option<Verdict> {
    let role = non_empty_str(payload, "role")?;
    let content = non_empty_str(payload, "content")?;
    Some(Verdict::Emit(DisplayEvent::new(role, content)))
}

fn synonyms(payload: &Payload) -> Option<Verdict> {
    let role = first_of(payload, ROLE_FIELDS)?;
    let content = first_of(payload, CONTENT_FIELDS)?;
    Some(Verdict::Emit(DisplayEvent::new(role, content)))
}

// Legacy payloads such as {"assistant": "...", "reply": "..."}: the first key
// names the speaker and the second value is the body.
fn two_field_salvage(payload: &Payload) -> Option<Verdict> {
    if payload.len() != 2 {
        return None;
    }
    let mut entries = payload.iter();
    let (first_key, first_value) = entries.next()?;
    let (_, second_value) = entries.next()?;
    first_value.as_str()?;
    let content = second_value.as_str()?;
    Some(Verdict::Emit(DisplayEvent::new(first_key.as_str(), content)))
}
