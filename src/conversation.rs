//! Injected persistence for conversation history.
//!
//! The pipeline never touches ambient storage directly; callers hand it a
//! [`ConversationStore`] and the composer reads and writes history through
//! it. A conversation is created implicitly by the first `append` for a
//! session key and lives until `clear` is called.
//!
//! Two backends ship with the crate: [`MemoryConversationStore`] for tests
//! and ephemeral sessions, and the sqlite-backed
//! [`crate::stores::SqliteStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::message::ConversationTurn;
use crate::types::StoreError;

/// Persistence seam for chat history, keyed by session.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append one turn to a session's history.
    async fn append(&self, session_id: &str, turn: ConversationTurn) -> Result<(), StoreError>;

    /// The most recent `limit` turns, oldest first.
    async fn history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError>;

    /// Remove a session's history. Returns the number of turns removed.
    async fn clear(&self, session_id: &str) -> Result<usize, StoreError>;
}

/// In-memory conversation store.
#[derive(Default)]
pub struct MemoryConversationStore {
    sessions: Mutex<HashMap<String, Vec<ConversationTurn>>>,
}

impl MemoryConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn append(&self, session_id: &str, turn: ConversationTurn) -> Result<(), StoreError> {
        self.sessions
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .push(turn);
        Ok(())
    }

    async fn history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let sessions = self.sessions.lock();
        let turns = sessions.get(session_id).map(Vec::as_slice).unwrap_or(&[]);
        let start = turns.len().saturating_sub(limit);
        Ok(turns[start..].to_vec())
    }

    async fn clear(&self, session_id: &str) -> Result<usize, StoreError> {
        Ok(self
            .sessions
            .lock()
            .remove(session_id)
            .map(|turns| turns.len())
            .unwrap_or(0))
    }
}
