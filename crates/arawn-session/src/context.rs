//! Bounded, summarizing conversation history attached to each session.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    /// Pinned turns such as the mode's system prompt or canonical schemas.
    /// Never evicted.
    System,
}

/// A compact record of one tool call made while producing an agent turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallDigest {
    pub tool: String,
    pub args_digest: String,
    pub result_digest: String,
}

/// One entry in a [`ContextBuffer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallDigest>,
    #[serde(default)]
    pub citations: Vec<String>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            citations: Vec::new(),
        }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            content: content.into(),
            tool_calls: Vec::new(),
            citations: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            citations: Vec::new(),
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCallDigest>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn with_citations(mut self, citations: Vec<String>) -> Self {
        self.citations = citations;
        self
    }

    /// Character footprint used against the buffer's budget: the turn's own
    /// text plus its tool-call digests and citation URLs.
    fn char_len(&self) -> usize {
        let digests: usize = self
            .tool_calls
            .iter()
            .map(|d| d.tool.len() + d.args_digest.len() + d.result_digest.len())
            .sum();
        let citations: usize = self.citations.iter().map(|c| c.len()).sum();
        self.content.len() + digests + citations
    }
}

/// Ordered, bounded sequence of [`Turn`]s attached to a [`crate::Session`].
///
/// When the buffer exceeds its character budget, the oldest non-system turn
/// is dropped and the check repeats. System turns (the mode's system prompt,
/// canonical schemas) are pinned and never evicted.
#[derive(Debug, Clone)]
pub struct ContextBuffer {
    turns: VecDeque<Turn>,
    budget_chars: usize,
}

impl ContextBuffer {
    pub fn new(budget_chars: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            budget_chars,
        }
    }

    pub fn budget_chars(&self) -> usize {
        self.budget_chars
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn char_len(&self) -> usize {
        self.turns.iter().map(Turn::char_len).sum()
    }

    /// Append a turn and evict down to budget.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        self.evict_to_budget();
    }

    /// Drop the oldest non-system turn, repeatedly, until the buffer is
    /// within `budget_chars` or no more evictable turns remain.
    fn evict_to_budget(&mut self) {
        while self.char_len() > self.budget_chars {
            let evict_at = self.turns.iter().position(|t| t.role != Role::System);
            match evict_at {
                Some(idx) => {
                    self.turns.remove(idx);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_read() {
        let mut buffer = ContextBuffer::new(1000);
        buffer.push(Turn::user("hello"));
        buffer.push(Turn::agent("hi there"));

        assert_eq!(buffer.len(), 2);
        let turns: Vec<_> = buffer.turns().collect();
        assert_eq!(turns[0].content, "hello");
        assert_eq!(turns[1].content, "hi there");
    }

    #[test]
    fn test_eviction_drops_oldest_non_system_first() {
        let mut buffer = ContextBuffer::new(20);
        buffer.push(Turn::system("schema"));
        buffer.push(Turn::user("aaaaaaaaaa"));
        buffer.push(Turn::agent("bbbbbbbbbb"));
        buffer.push(Turn::user("cccccccccc"));

        assert!(buffer.char_len() <= 20);
        let roles: Vec<_> = buffer.turns().map(|t| t.role).collect();
        assert!(roles.contains(&Role::System));
        assert!(roles.contains(&Role::User) || roles.contains(&Role::Agent));
    }

    #[test]
    fn test_system_turns_are_pinned() {
        let mut buffer = ContextBuffer::new(5);
        buffer.push(Turn::system("this system turn is long"));
        buffer.push(Turn::user("short"));

        let roles: Vec<_> = buffer.turns().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::System]);
    }

    #[test]
    fn test_tool_call_digests_count_toward_budget() {
        let mut buffer = ContextBuffer::new(30);
        buffer.push(
            Turn::agent("ok").with_tool_calls(vec![ToolCallDigest {
                tool: "docs_search".to_string(),
                args_digest: "abcdef".to_string(),
                result_digest: "123456".to_string(),
            }]),
        );

        assert!(buffer.char_len() <= 30);
    }
}
