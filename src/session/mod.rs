//! Conversation context
//!
//! Keeps the last few turns of a conversation so follow-up questions such as
//! "what is his nickname" can be resolved against entities mentioned earlier.
//! Contexts are small JSON files under the data directory.

use crate::entities::is_alias_intent;
use crate::error::{RagError, Result};
use crate::text::{merge_preserve_order, normalize_entity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Default number of turns kept
pub const DEFAULT_HISTORY_TURNS: usize = 4;

/// Entities remembered per turn
const ENTITIES_PER_TURN: usize = 6;

/// Entities kept across the whole history
const HISTORY_ENTITY_LIMIT: usize = 15;

/// Context entities appended to the query text
const CONTEXTUAL_QUERY_TERMS: usize = 3;

const COREFERENCE_PRONOUNS: &[&str] = &[
    "他", "她", "它", "他们", "她们", "它们", "其", "这个人", "那个人", "这家伙", "那家伙",
];

const COREFERENCE_PRONOUNS_EN: &[&str] = &[
    "he", "she", "it", "they", "him", "her", "them", "his", "its", "their",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message of the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Entities mentioned in the message
    pub entities: Vec<String>,
    pub at: DateTime<Utc>,
}

/// Bounded recent-turn history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Human-readable session name
    pub name: String,
    pub max_turns: usize,
    turns: VecDeque<Turn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new("default", DEFAULT_HISTORY_TURNS)
    }
}

impl ConversationContext {
    pub fn new(name: impl Into<String>, max_turns: usize) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            max_turns: max_turns.max(1),
            turns: VecDeque::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a message; the oldest turn falls off once the bound is reached
    pub fn push(&mut self, role: Role, content: impl Into<String>, entities: Vec<String>) {
        let mut entities = entities;
        entities.truncate(ENTITIES_PER_TURN);
        self.turns.push_back(Turn {
            role,
            content: content.into(),
            entities,
            at: Utc::now(),
        });
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
        self.updated_at = Utc::now();
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Entities of all kept turns, oldest first, deduplicated
    pub fn history_entities(&self) -> Vec<String> {
        self.turns.iter().fold(Vec::new(), |acc, turn| {
            merge_preserve_order(&acc, &turn.entities, HISTORY_ENTITY_LIMIT)
        })
    }

    fn session_path(data_dir: &Path, name: &str) -> PathBuf {
        let safe: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        data_dir.join("sessions").join(format!("{}.json", safe))
    }

    /// Save the context to disk
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let path = Self::session_path(data_dir, &self.name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RagError::Io {
                source: e,
                context: format!("Failed to create session directory: {:?}", parent),
            })?;
        }

        let json = serde_json::to_string_pretty(self).map_err(|e| RagError::Json {
            source: e,
            context: "Failed to serialize conversation".to_string(),
        })?;
        std::fs::write(&path, json).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to write session file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load a saved context, or start a fresh one when none exists
    pub fn load_or_new(data_dir: &Path, name: &str, max_turns: usize) -> Result<Self> {
        let path = Self::session_path(data_dir, name);
        if !path.exists() {
            return Ok(Self::new(name, max_turns));
        }

        let json = std::fs::read_to_string(&path).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to read session file: {:?}", path),
        })?;
        let mut context: Self = serde_json::from_str(&json).map_err(|e| RagError::Json {
            source: e,
            context: format!("Failed to parse session file: {:?}", path),
        })?;
        context.max_turns = max_turns.max(1);
        while context.turns.len() > context.max_turns {
            context.turns.pop_front();
        }
        Ok(context)
    }
}

/// Whether the query refers back to something with a pronoun
pub fn has_coreference(query: &str) -> bool {
    if COREFERENCE_PRONOUNS.iter().any(|p| query.contains(p)) {
        return true;
    }
    let lowered = query.to_lowercase();
    lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| COREFERENCE_PRONOUNS_EN.contains(&word))
}

/// Entities from the conversation that the current query implicitly refers to
pub fn select_context_entities(
    query: &str,
    query_entities: &[String],
    history_entities: &[String],
    co_reference_enabled: bool,
    alias_intent_enabled: bool,
) -> Vec<String> {
    let start = history_entities.len().saturating_sub(4);
    let recent: Vec<String> = history_entities[start..].iter().rev().cloned().collect();
    if recent.is_empty() {
        return Vec::new();
    }

    let mut context = Vec::new();
    if co_reference_enabled && has_coreference(query) {
        context = merge_preserve_order(&context, &recent, 4);
    }
    if alias_intent_enabled && is_alias_intent(query) {
        context = merge_preserve_order(&context, &recent, 5);
    }
    if query_entities.is_empty() {
        let head = &recent[..recent.len().min(2)];
        context = merge_preserve_order(&context, head, 5);
    }
    context
}

/// Query text with up to three context entities the query does not already name
pub fn contextual_query(query: &str, query_entities: &[String], context_entities: &[String]) -> String {
    let named: Vec<String> = query_entities.iter().map(|e| normalize_entity(e)).collect();
    let suffix: Vec<&str> = context_entities
        .iter()
        .filter(|e| !named.contains(&normalize_entity(e)))
        .take(CONTEXTUAL_QUERY_TERMS)
        .map(String::as_str)
        .collect();
    if suffix.is_empty() {
        return query.to_string();
    }
    format!("{} {}", query.trim(), suffix.join(" "))
}
