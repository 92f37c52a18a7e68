//! Display and Transcript Policy
//!
//! Consumer-side helpers. The session layer emits every normalized event; what
//! a UI actually shows, and what it keeps as history, is decided here so that
//! hosts can opt in instead of having filtering baked into the transports.

use crate::display::{DisplayEvent, INFOLOG_ROLE};
use tracing::debug;

/// Placeholder shown for events whose content is empty.
pub const EMPTY_CONTENT_PLACEHOLDER: &str = "(Empty message)";

/// Decides which events reach the screen.
#[derive(Debug, Clone)]
pub struct DisplayPolicy {
    /// Roles that are never shown.
    pub hidden_roles: Vec<String>,
    /// Case-insensitive fragments that hide an event of any role.
    pub muted_phrases: Vec<String>,
    /// Case-insensitive fragments that hide infolog events only.
    pub muted_infolog_phrases: Vec<String>,
}

impl Default for DisplayPolicy {
    fn default() -> Self {
        Self {
            hidden_roles: vec!["log".to_string()],
            muted_phrases: ["message received", "received message", "log:", "debug:", "info:"]
                .into_iter()
                .map(String::from)
                .collect(),
            muted_infolog_phrases: vec!["connection".to_string()],
        }
    }
}

impl DisplayPolicy {
    /// A policy that shows everything.
    pub fn permissive() -> Self {
        Self {
            hidden_roles: Vec::new(),
            muted_phrases: Vec::new(),
            muted_infolog_phrases: Vec::new(),
        }
    }

    /// Returns the event as it should be shown, or `None` to hide it.
    ///
    /// An empty role is shown as infolog and empty content is replaced with
    /// [`EMPTY_CONTENT_PLACEHOLDER`].
    pub fn admit(&self, event: DisplayEvent) -> Option<DisplayEvent> {
        if self.hidden_roles.iter().any(|role| *role == event.role) {
            debug!(role = %event.role, "hiding event with hidden role");
            return None;
        }

        let lowered = event.content.to_lowercase();
        let muted = self.muted_phrases.iter().any(|p| lowered.contains(p.as_str()))
            || (event.role == INFOLOG_ROLE
                && self
                    .muted_infolog_phrases
                    .iter()
                    .any(|p| lowered.contains(p.as_str())));
        if muted {
            debug!(content = %event.content, "hiding muted event");
            return None;
        }

        let DisplayEvent { mut role, mut content } = event;
        if role.is_empty() {
            role = INFOLOG_ROLE.to_string();
        }
        if content.is_empty() {
            content = EMPTY_CONTENT_PLACEHOLDER.to_string();
        }
        Some(DisplayEvent { role, content })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscriptPolicy {
    /// Keep infolog events out of the persisted history.
    pub suppress_infolog: bool,
}

/// Ordered conversation history as seen by the user.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    policy: TranscriptPolicy,
    entries: Vec<DisplayEvent>,
}

impl Transcript {
    pub fn new(policy: TranscriptPolicy) -> Self {
        Self {
            policy,
            entries: Vec::new(),
        }
    }

    /// Appends `event` unless the policy suppresses it. Returns whether it was kept.
    pub fn record(&mut self, event: &DisplayEvent) -> bool {
        if self.policy.suppress_infolog && event.is_infolog() {
            return false;
        }
        self.entries.push(event.clone());
        true
    }

    pub fn entries(&self) -> &[DisplayEvent] {
        &self.entries
    }

    /// Entries that are actual dialogue.
    pub fn dialogue(&self) -> impl Iterator<Item = &DisplayEvent> {
        self.entries.iter().filter(|event| !event.is_infolog())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
