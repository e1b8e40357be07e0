//! Conversation turns exchanged between the user and the pipeline.
//!
//! A [`ConversationTurn`] is the unit of chat history: a role, the text, a
//! timestamp, and — for assistant turns — an optional provenance summary
//! describing which evidence tiers contributed to the answer.
//!
//! # Examples
//!
//! ```
//! use bhujal::message::ConversationTurn;
//!
//! let question = ConversationTurn::user("Is Warangal safe for new borewells?");
//! let answer = ConversationTurn::assistant("Warangal is Semi-Critical at 72%.")
//!     .with_provenance("structured: 1 record");
//!
//! assert!(question.has_role(ConversationTurn::USER));
//! assert_eq!(answer.provenance.as_deref(), Some("structured: 1 record"));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message in a conversation, with role, content, and timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// The role of the sender (see the constants on this type).
    pub role: String,
    /// The text content of the turn.
    pub content: String,
    /// When the turn was produced.
    pub at: DateTime<Utc>,
    /// For assistant turns, a short summary of which tiers supplied evidence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<String>,
}

impl ConversationTurn {
    /// User input role.
    pub const USER: &'static str = "user";
    /// Assistant response role.
    pub const ASSISTANT: &'static str = "assistant";
    /// System prompt role.
    pub const SYSTEM: &'static str = "system";

    /// Creates a turn with the given role and content, stamped now.
    #[must_use]
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
            at: Utc::now(),
            provenance: None,
        }
    }

    /// Creates a user turn.
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::new(Self::USER, content)
    }

    /// Creates an assistant turn.
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    /// Creates a system turn.
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    /// Attach a provenance summary.
    #[must_use]
    pub fn with_provenance(mut self, provenance: impl Into<String>) -> Self {
        self.provenance = Some(provenance.into());
        self
    }

    /// Returns true if this turn has the specified role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convenience_constructors_set_roles() {
        assert!(ConversationTurn::user("hi").has_role(ConversationTurn::USER));
        assert!(ConversationTurn::assistant("hello").has_role(ConversationTurn::ASSISTANT));
        assert!(ConversationTurn::system("be brief").has_role(ConversationTurn::SYSTEM));
    }

    #[test]
    fn provenance_defaults_to_none() {
        let turn = ConversationTurn::user("question");
        assert!(turn.provenance.is_none());

        let turn = turn.with_provenance("semantic: 3 chunks");
        assert_eq!(turn.provenance.as_deref(), Some("semantic: 3 chunks"));
    }

    #[test]
    fn serialization_round_trips() {
        let turn = ConversationTurn::assistant("answer").with_provenance("web: 2 results");
        let json = serde_json::to_string(&turn).expect("serialize");
        let parsed: ConversationTurn = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(turn, parsed);
    }
}
