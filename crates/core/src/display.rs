//! Display Events
//!
//! The canonical unit every inbound transport is reduced to before it reaches
//! the UI layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role reserved for system and diagnostic messages. Never used for dialogue.
pub const INFOLOG_ROLE: &str = "infolog";

/// A single `{role, content}` message ready for display.
///
/// `role` is free-form: whatever the backend (or the normalizer's salvage
/// rules) produced. Only [`INFOLOG_ROLE`] carries a meaning of its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayEvent {
    pub role: String,
    pub content: String,
}

impl DisplayEvent {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    /// Creates a system/diagnostic event.
    pub fn infolog(content: impl Into<String>) -> Self {
        Self::new(INFOLOG_ROLE, content)
    }

    pub fn is_infolog(&self) -> bool {
        self.role == INFOLOG_ROLE
    }
}

impl fmt::Display for DisplayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.role, self.content)
    }
}
