//! Retrieval profiles
//!
//! A profile is a named, versioned bundle of thresholds and toggles that
//! parameterizes every retrieval stage. Profiles are validated when written and
//! handed to the engine as an immutable `Arc<RetrievalProfile>` snapshot, so a
//! request never observes a concurrent edit.

mod store;
mod validator;

pub use store::{ProfileDraft, ProfileStore, ProfileUpdate};
pub use validator::ProfileValidator;

use crate::error::{RagError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Key of the profile used when nothing else resolves
pub const GENERAL_PROFILE_KEY: &str = "general_default";

/// Kind of corpus a library holds, used to pick a default profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryType {
    General,
    NovelStory,
    EnterpriseDocs,
    ScientificPaper,
    HumanitiesPaper,
}

impl LibraryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LibraryType::General => "general",
            LibraryType::NovelStory => "novel_story",
            LibraryType::EnterpriseDocs => "enterprise_docs",
            LibraryType::ScientificPaper => "scientific_paper",
            LibraryType::HumanitiesPaper => "humanities_paper",
        }
    }
}

impl fmt::Display for LibraryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LibraryType {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "general" => Ok(LibraryType::General),
            "novel_story" | "novel" => Ok(LibraryType::NovelStory),
            "enterprise_docs" | "enterprise" => Ok(LibraryType::EnterpriseDocs),
            "scientific_paper" | "scientific" => Ok(LibraryType::ScientificPaper),
            "humanities_paper" | "humanities" => Ok(LibraryType::HumanitiesPaper),
            other => Err(RagError::InvalidConfigValue {
                path: "library_type".to_string(),
                message: format!("Unknown library type '{}'", other),
            }),
        }
    }
}

/// Tunable retrieval parameters.
///
/// Missing fields deserialize to the general-purpose defaults, so partial
/// profile documents can be imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub rag_min_top1_score: f32,
    pub rag_min_support_score: f32,
    pub rag_min_support_count: usize,
    pub rag_min_item_score: f32,
    pub rag_graph_max_terms: usize,
    pub graph_channel_weight: f32,
    pub graph_only_penalty: f32,
    pub vector_semantic_min: f32,
    pub alias_intent_enabled: bool,
    pub alias_mining_max_terms: usize,
    pub co_reference_enabled: bool,
    pub vector_candidate_multiplier: usize,
    pub keyword_candidate_multiplier: usize,
    pub graph_candidate_multiplier: usize,
    pub fallback_relax_enabled: bool,
    pub fallback_top1_relax: f32,
    pub fallback_support_relax: f32,
    pub fallback_item_relax: f32,
    pub summary_intent_enabled: bool,
    pub summary_expand_factor: usize,
    pub summary_min_chunks: usize,
    pub summary_per_file_cap: usize,
    pub summary_min_files: usize,
    pub keyword_fallback_expand_on_weak_hits: bool,
    pub keyword_fallback_max_chunks: usize,
    pub keyword_fallback_min_score: f32,
    pub keyword_fallback_scan_limit: usize,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            rag_min_top1_score: 0.30,
            rag_min_support_score: 0.18,
            rag_min_support_count: 2,
            rag_min_item_score: 0.10,
            rag_graph_max_terms: 12,
            graph_channel_weight: 0.65,
            graph_only_penalty: 0.55,
            vector_semantic_min: 0.12,
            alias_intent_enabled: true,
            alias_mining_max_terms: 8,
            co_reference_enabled: true,
            vector_candidate_multiplier: 3,
            keyword_candidate_multiplier: 3,
            graph_candidate_multiplier: 4,
            fallback_relax_enabled: true,
            fallback_top1_relax: 0.08,
            fallback_support_relax: 0.06,
            fallback_item_relax: 0.04,
            summary_intent_enabled: true,
            summary_expand_factor: 3,
            summary_min_chunks: 8,
            summary_per_file_cap: 2,
            summary_min_files: 3,
            keyword_fallback_expand_on_weak_hits: true,
            keyword_fallback_max_chunks: 240,
            keyword_fallback_min_score: 0.08,
            keyword_fallback_scan_limit: 8000,
        }
    }
}

/// A stored retrieval profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalProfile {
    pub id: Uuid,
    pub profile_key: String,
    pub name: String,
    pub library_type: LibraryType,
    pub description: String,
    pub version: u32,
    pub is_default: bool,
    pub is_builtin: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub config: ProfileConfig,
}

impl RetrievalProfile {
    /// An unsaved profile around `config`, mostly for embedding callers and tests
    pub fn ephemeral(profile_key: impl Into<String>, config: ProfileConfig) -> Self {
        let now = Utc::now();
        let profile_key = profile_key.into();
        Self {
            id: Uuid::new_v4(),
            name: profile_key.clone(),
            profile_key,
            library_type: LibraryType::General,
            description: String::new(),
            version: 1,
            is_default: false,
            is_builtin: false,
            is_active: true,
            created_at: now,
            updated_at: now,
            config,
        }
    }

    /// The general-purpose built-in, used when the store has nothing better
    pub fn builtin_general() -> Self {
        let mut profile = Self::ephemeral(GENERAL_PROFILE_KEY, ProfileConfig::default());
        profile.name = "General documents".to_string();
        profile.is_builtin = true;
        profile.is_default = true;
        profile
    }
}

/// Seed record for a built-in profile
pub struct BuiltinProfile {
    pub profile_key: &'static str,
    pub name: &'static str,
    pub library_type: LibraryType,
    pub description: &'static str,
    pub is_default: bool,
    pub config: ProfileConfig,
}

/// The five built-in profiles seeded into every store
pub fn builtin_profiles() -> Vec<BuiltinProfile> {
    let general = ProfileConfig::default();

    vec![
        BuiltinProfile {
            profile_key: GENERAL_PROFILE_KEY,
            name: "General documents",
            library_type: LibraryType::General,
            description: "Balanced thresholds for mixed document collections",
            is_default: true,
            config: general.clone(),
        },
        BuiltinProfile {
            profile_key: "novel_story",
            name: "Novels and stories",
            library_type: LibraryType::NovelStory,
            description: "Looser thresholds, alias mining and co-reference for narrative text",
            is_default: false,
            config: ProfileConfig {
                rag_min_top1_score: 0.27,
                rag_min_support_score: 0.16,
                rag_min_item_score: 0.08,
                rag_graph_max_terms: 10,
                graph_channel_weight: 0.60,
                graph_only_penalty: 0.50,
                vector_semantic_min: 0.10,
                alias_mining_max_terms: 10,
                fallback_top1_relax: 0.10,
                fallback_support_relax: 0.07,
                summary_expand_factor: 4,
                summary_min_chunks: 12,
                summary_per_file_cap: 3,
                summary_min_files: 4,
                keyword_fallback_max_chunks: 280,
                keyword_fallback_min_score: 0.06,
                keyword_fallback_scan_limit: 10000,
                ..general.clone()
            },
        },
        BuiltinProfile {
            profile_key: "enterprise_docs",
            name: "Enterprise documents",
            library_type: LibraryType::EnterpriseDocs,
            description: "Stricter thresholds for policies, manuals and internal documentation",
            is_default: false,
            config: ProfileConfig {
                rag_min_top1_score: 0.34,
                rag_min_support_score: 0.22,
                rag_min_item_score: 0.12,
                rag_graph_max_terms: 8,
                graph_channel_weight: 0.55,
                graph_only_penalty: 0.48,
                vector_semantic_min: 0.14,
                alias_intent_enabled: false,
                alias_mining_max_terms: 2,
                co_reference_enabled: false,
                graph_candidate_multiplier: 3,
                fallback_top1_relax: 0.06,
                fallback_support_relax: 0.05,
                fallback_item_relax: 0.03,
                summary_expand_factor: 2,
                keyword_fallback_max_chunks: 180,
                keyword_fallback_min_score: 0.10,
                keyword_fallback_scan_limit: 6000,
                ..general.clone()
            },
        },
        BuiltinProfile {
            profile_key: "scientific_paper",
            name: "Scientific papers",
            library_type: LibraryType::ScientificPaper,
            description: "Precision-oriented thresholds for research papers",
            is_default: false,
            config: ProfileConfig {
                rag_min_top1_score: 0.36,
                rag_min_support_score: 0.24,
                rag_min_item_score: 0.14,
                rag_graph_max_terms: 9,
                graph_channel_weight: 0.58,
                graph_only_penalty: 0.50,
                vector_semantic_min: 0.15,
                alias_intent_enabled: false,
                alias_mining_max_terms: 1,
                co_reference_enabled: false,
                fallback_top1_relax: 0.06,
                fallback_support_relax: 0.05,
                fallback_item_relax: 0.03,
                summary_min_chunks: 9,
                keyword_fallback_max_chunks: 180,
                keyword_fallback_min_score: 0.10,
                keyword_fallback_scan_limit: 6000,
                ..general.clone()
            },
        },
        BuiltinProfile {
            profile_key: "humanities_research",
            name: "Humanities research",
            library_type: LibraryType::HumanitiesPaper,
            description: "Recall-leaning thresholds for essays and humanities papers",
            is_default: false,
            config: ProfileConfig {
                rag_min_top1_score: 0.32,
                rag_min_support_score: 0.19,
                rag_graph_max_terms: 12,
                graph_channel_weight: 0.62,
                graph_only_penalty: 0.52,
                alias_mining_max_terms: 6,
                summary_expand_factor: 4,
                summary_min_chunks: 10,
                summary_per_file_cap: 3,
                summary_min_files: 4,
                keyword_fallback_max_chunks: 220,
                ..general
            },
        },
    ]
}

/// Normalize a user supplied profile key.
///
/// Characters outside `[a-zA-Z0-9_-]` become `_`, runs of `_` collapse, and the
/// result is lowercased and trimmed of `_`/`-`. Keys must be 2 to 80 characters.
pub fn normalize_profile_key(raw: &str) -> Result<String> {
    let mut key = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            c.to_ascii_lowercase()
        } else {
            '_'
        };
        if mapped == '_' && key.ends_with('_') {
            continue;
        }
        key.push(mapped);
    }
    let key = key.trim_matches(|c| c == '_' || c == '-').to_string();

    if key.len() < 2 {
        return Err(RagError::InvalidConfigValue {
            path: "profile_key".to_string(),
            message: format!("Profile key '{}' is too short", raw),
        });
    }
    if key.len() > 80 {
        return Err(RagError::InvalidConfigValue {
            path: "profile_key".to_string(),
            message: "Profile key must be at most 80 characters".to_string(),
        });
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_valid() {
        let builtins = builtin_profiles();
        assert_eq!(builtins.len(), 5);
        assert_eq!(builtins.iter().filter(|b| b.is_default).count(), 1);
        for builtin in &builtins {
            assert!(
                ProfileValidator::validate(&builtin.config).is_ok(),
                "{} should validate",
                builtin.profile_key
            );
        }
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ProfileConfig =
            serde_json::from_str(r#"{"rag_min_top1_score": 0.5, "summary_min_files": 5}"#)
                .unwrap();
        assert_eq!(config.rag_min_top1_score, 0.5);
        assert_eq!(config.summary_min_files, 5);
        assert_eq!(config.rag_min_support_count, 2);
        assert_eq!(config.keyword_fallback_scan_limit, 8000);
    }

    #[test]
    fn test_normalize_profile_key() {
        assert_eq!(
            normalize_profile_key("  My Team  Profile!! ").unwrap(),
            "my_team_profile"
        );
        assert_eq!(normalize_profile_key("legal-v2").unwrap(), "legal-v2");
        assert!(normalize_profile_key("?").is_err());
        assert!(normalize_profile_key(&"x".repeat(81)).is_err());
    }

    #[test]
    fn test_library_type_parse() {
        assert_eq!(
            "Scientific_Paper".parse::<LibraryType>().unwrap(),
            LibraryType::ScientificPaper
        );
        assert_eq!(LibraryType::NovelStory.to_string(), "novel_story");
        assert!("poetry".parse::<LibraryType>().is_err());
    }
}
