//! Conversation Turns
//!
//! Role-tagged turns made of ordered content blocks, and the append-only
//! conversation exchanged with the model.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::tool::{ToolCall, ToolResult};

/// Role of a turn's author
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User input and tool results
    User,
    /// Model output
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One unit of turn content
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// A single role-tagged turn
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,

    /// Ordered content blocks
    pub content: Vec<ContentBlock>,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    /// Create a user text turn
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentBlock::text(text)])
    }

    /// Create an assistant text turn
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentBlock::text(text)])
    }

    /// Create the user turn that answers a batch of tool calls
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self::new(
            Role::User,
            results.into_iter().map(ContentBlock::ToolResult).collect(),
        )
    }

    /// Concatenated text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    pub fn tool_results_iter(&self) -> impl Iterator<Item = &ToolResult> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolResult(result) => Some(result),
            _ => None,
        })
    }
}

/// Check that `answer` carries exactly one result for every call in `request`
pub fn verify_pairing(request: &Turn, answer: &Turn) -> Result<()> {
    let mut outstanding: HashSet<&str> = request.tool_calls().map(|c| c.id.as_str()).collect();
    for result in answer.tool_results_iter() {
        if !outstanding.remove(result.call_id.as_str()) {
            return Err(AgentError::Protocol(format!(
                "tool result '{}' does not answer an outstanding call",
                result.call_id
            )));
        }
    }
    if let Some(missing) = outstanding.into_iter().next() {
        return Err(AgentError::Protocol(format!(
            "tool call '{missing}' has no result"
        )));
    }
    Ok(())
}

/// Ordered, append-only turn history
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a turn
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Append a batch of turns in order
    pub fn extend(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.turns.extend(turns);
    }

    /// Get all turns
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Get the last turn
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Number of turns
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolCall;
    use serde_json::json;

    fn call_turn(ids: &[&str]) -> Turn {
        Turn::new(
            Role::Assistant,
            ids.iter()
                .map(|id| ContentBlock::ToolCall(ToolCall::new(*id, "list_patients", json!({}))))
                .collect(),
        )
    }

    #[test]
    fn test_turn_creation() {
        let turn = Turn::user("Hello");
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.text(), "Hello");
        assert_eq!(turn.tool_calls().count(), 0);
    }

    #[test]
    fn test_conversation_appends() {
        let mut conv = Conversation::new();
        conv.push(Turn::user("Hi"));
        conv.extend([Turn::assistant("Hello!"), Turn::user("Bye")]);

        assert_eq!(conv.len(), 3);
        assert_eq!(conv.turns()[1].text(), "Hello!");
        assert_eq!(conv.last().unwrap().role, Role::User);
    }

    #[test]
    fn test_pairing_accepts_complete_answer_in_any_order() {
        let request = call_turn(&["a", "b"]);
        let answer = Turn::tool_results(vec![ToolResult::text("b", "2"), ToolResult::text("a", "1")]);
        assert!(verify_pairing(&request, &answer).is_ok());
    }

    #[test]
    fn test_pairing_rejects_missing_and_duplicate_results() {
        let request = call_turn(&["a", "b"]);

        let missing = Turn::tool_results(vec![ToolResult::text("a", "1")]);
        assert!(matches!(verify_pairing(&request, &missing), Err(AgentError::Protocol(_))));

        let duplicate = Turn::tool_results(vec![
            ToolResult::text("a", "1"),
            ToolResult::text("a", "1"),
            ToolResult::text("b", "2"),
        ]);
        assert!(matches!(verify_pairing(&request, &duplicate), Err(AgentError::Protocol(_))));
    }

    #[test]
    fn test_blocks_serialize_with_type_tag() {
        let block = ContentBlock::text("hi");
        assert_eq!(serde_json::to_value(&block).unwrap(), json!({"type": "text", "text": "hi"}));
    }
}
