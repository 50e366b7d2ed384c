//! Per-session conversation state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gate::ConfirmationGate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: TurnRole::User, text: text.into(), timestamp: Utc::now() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: TurnRole::Assistant, text: text.into(), timestamp: Utc::now() }
    }
}

/// Append-only turn log. Nothing is evicted; callers take a window.
#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    turns: Vec<Turn>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// The last `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// One conversation: its log plus the confirmation state.
#[derive(Debug, Clone)]
pub struct Session {
    pub key: String,
    pub memory: ConversationMemory,
    pub gate: ConfirmationGate,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            memory: ConversationMemory::new(),
            gate: ConfirmationGate::default(),
            started_at: Utc::now(),
        }
    }

    /// Forget the conversation and any operation awaiting confirmation.
    pub fn reset(&mut self) {
        self.memory.clear();
        self.gate = ConfirmationGate::default();
        self.started_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_returns_tail_in_order() {
        let mut memory = ConversationMemory::new();
        for i in 0..5 {
            memory.append(Turn::user(format!("m{}", i)));
        }
        let texts: Vec<&str> = memory.recent(2).iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["m3", "m4"]);
        assert_eq!(memory.recent(50).len(), 5);
        assert_eq!(memory.len(), 5);
    }

    #[test]
    fn turn_role_serializes_lowercase() {
        let json = serde_json::to_value(Turn::assistant("ok")).unwrap();
        assert_eq!(json["role"], "assistant");
    }

    #[test]
    fn reset_clears_memory() {
        let mut session = Session::new("t1");
        session.memory.append(Turn::user("hi"));
        session.reset();
        assert!(session.memory.is_empty());
        assert!(!session.gate.is_awaiting());
        assert_eq!(session.key, "t1");
    }
}
