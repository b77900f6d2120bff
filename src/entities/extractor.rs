//! Deterministic entity and relation extraction
//!
//! The graph builder only depends on the [`EntityExtractor`] trait. The default
//! [`RuleBasedExtractor`] uses surface patterns: capitalized or technical Latin
//! terms, short Han spans between function characters, sentence-level
//! co-occurrence for relations and explicit "also known as" constructions for
//! aliases.

use crate::error::Result;
use crate::text::{
    self, is_stopword, normalize_entity, split_sentences, truncate_chars, ENTITY_SUFFIX_BLACKLIST,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

const EVIDENCE_MAX_CHARS: usize = 240;

/// Typed relation between two entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    IsA,
    Contains,
    DependsOn,
    Causes,
    CoOccurs,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::IsA => "is_a",
            RelationType::Contains => "contains",
            RelationType::DependsOn => "depends_on",
            RelationType::Causes => "causes",
            RelationType::CoOccurs => "co_occurs",
        }
    }

    /// How strongly a neighbour reached over this relation counts during expansion
    pub fn expansion_factor(&self) -> f32 {
        match self {
            RelationType::Contains => 1.25,
            RelationType::IsA => 1.10,
            RelationType::DependsOn => 1.00,
            RelationType::Causes => 0.90,
            RelationType::CoOccurs => 0.75,
        }
    }
}

/// Classify a sentence by its connective cues
pub fn infer_relation_type(sentence: &str) -> RelationType {
    let lowered = format!(" {} ", sentence.to_lowercase());
    let has = |cues: &[&str]| cues.iter().any(|cue| lowered.contains(cue));

    if has(&["属于", "是一种", " is a ", " is an "]) {
        RelationType::IsA
    } else if has(&["包括", "包含", " consist of ", " consists of ", " includes ", " contains "]) {
        RelationType::Contains
    } else if has(&["依赖", "基于", " depends on ", " based on ", " requires "]) {
        RelationType::DependsOn
    } else if has(&["导致", "造成", " causes ", " leads to ", " results in "]) {
        RelationType::Causes
    } else {
        RelationType::CoOccurs
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub normalized: String,
    pub entity_type: String,
}

/// Relation between two entities, endpoints given by normalized name with
/// `source < target`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub source: String,
    pub target: String,
    pub relation_type: RelationType,
    pub evidence: String,
}

/// Names that refer to the same entity; `canonical` is the longest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasGroup {
    pub canonical: String,
    pub aliases: Vec<String>,
}

/// Result of extracting one text unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub entities: Vec<ExtractedEntity>,
    pub relations: Vec<ExtractedRelation>,
    pub alias_groups: Vec<AliasGroup>,
}

/// Pluggable extraction step. Implementations must be deterministic: the same
/// text always yields the same extraction.
pub trait EntityExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Extraction;

    /// Entity names only, used for query analysis
    fn extract_names(&self, text: &str, limit: usize) -> Vec<String>;

    fn name(&self) -> &str;
}

/// Pick the canonical name of an alias group: the longest, first on ties
pub fn choose_canonical_alias(names: &[String]) -> Option<String> {
    let mut best: Option<&String> = None;
    for name in names {
        let len = name.chars().count();
        if best.map_or(true, |b| len > b.chars().count()) {
            best = Some(name);
        }
    }
    best.cloned()
}

/// Surface-pattern extractor
pub struct RuleBasedExtractor {
    candidate: Regex,
    han_span: Regex,
    alias_patterns: Vec<Regex>,
    max_entities: usize,
    max_sentence_entities: usize,
}

impl RuleBasedExtractor {
    pub fn new() -> Result<Self> {
        let latin_name = r"[A-Z][\w\-]*(?:\s+[A-Z][\w\-]*){0,3}";
        Ok(Self {
            candidate: Regex::new(r"[A-Za-z][A-Za-z0-9_\-/]{2,40}|[\x{4E00}-\x{9FFF}]+")?,
            han_span: Regex::new(r"[\x{4E00}-\x{9FFF}]{2,4}")?,
            alias_patterns: vec![
                Regex::new(&format!(
                    r#"({name})\s*[,(（]?\s*(?:also known as|better known as|aka|a\.k\.a\.|nicknamed)\s+["“]?({name})"#,
                    name = latin_name
                ))?,
                Regex::new(
                    r#"([\x{4E00}-\x{9FFF}]{2,4}?)[（(]?(?:又名|又叫|外号|别名|绰号|人称)[:：]?\s*[“"「]?([\x{4E00}-\x{9FFF}]{2,4})"#,
                )?,
            ],
            max_entities: 20,
            max_sentence_entities: 8,
        })
    }

    pub fn with_max_entities(mut self, max_entities: usize) -> Self {
        self.max_entities = max_entities.max(1);
        self
    }

    /// Entities in reading order, deduplicated by normalized name
    pub fn extract_entities(&self, text: &str, limit: usize) -> Vec<ExtractedEntity> {
        let mut entities: Vec<ExtractedEntity> = Vec::new();
        let mut push = |entities: &mut Vec<ExtractedEntity>, raw: &str, entity_type: &str| {
            let normalized = normalize_entity(raw);
            if normalized.chars().count() < 2
                || is_stopword(&normalized)
                || normalized.chars().all(|c| c.is_ascii_digit())
                || entities.iter().any(|e| e.normalized == normalized)
            {
                return;
            }
            entities.push(ExtractedEntity {
                name: raw.to_string(),
                normalized,
                entity_type: entity_type.to_string(),
            });
        };

        for found in self.candidate.find_iter(text) {
            if entities.len() >= limit {
                break;
            }
            let raw = found.as_str();
            if raw.chars().next().is_some_and(text::is_cjk) {
                for segment in text::cjk_segments(raw) {
                    for span in self.han_span.find_iter(&segment) {
                        let span = span.as_str();
                        if ENTITY_SUFFIX_BLACKLIST
                            .iter()
                            .any(|suffix| span.ends_with(suffix))
                        {
                            continue;
                        }
                        push(&mut entities, span, "term");
                    }
                }
            } else {
                let cleaned = raw.trim_end_matches(['-', '/', '_']);
                let entity_type = if cleaned.starts_with(|c: char| c.is_ascii_uppercase()) {
                    "name"
                } else {
                    "term"
                };
                push(&mut entities, cleaned, entity_type);
            }
        }

        entities.truncate(limit);
        entities
    }

    /// Explicit alias constructions such as "X, also known as Y" or "X又名Y"
    pub fn extract_alias_groups(&self, text: &str) -> Vec<AliasGroup> {
        let mut groups: Vec<AliasGroup> = Vec::new();
        for pattern in &self.alias_patterns {
            for caps in pattern.captures_iter(text) {
                let (Some(first), Some(second)) = (caps.get(1), caps.get(2)) else {
                    continue;
                };
                let names = vec![
                    first.as_str().trim().to_string(),
                    second.as_str().trim().to_string(),
                ];
                if normalize_entity(&names[0]) == normalize_entity(&names[1]) {
                    continue;
                }
                let Some(canonical) = choose_canonical_alias(&names) else {
                    continue;
                };
                let aliases: Vec<String> = names.into_iter().filter(|n| *n != canonical).collect();

                match groups.iter_mut().find(|g| g.canonical == canonical) {
                    Some(group) => {
                        for alias in aliases {
                            if !group.aliases.contains(&alias) {
                                group.aliases.push(alias);
                            }
                        }
                    }
                    None => groups.push(AliasGroup { canonical, aliases }),
                }
            }
        }
        groups
    }

    fn extract_relations(
        &self,
        text: &str,
        chunk_entities: &[ExtractedEntity],
        alias_groups: &[AliasGroup],
    ) -> Vec<ExtractedRelation> {
        let alias_names: Vec<&String> = alias_groups
            .iter()
            .flat_map(|g| std::iter::once(&g.canonical).chain(g.aliases.iter()))
            .collect();

        let mut relations = Vec::new();
        for sentence in split_sentences(text) {
            let mut names: Vec<String> = Vec::new();
            let mentioned = alias_names
                .iter()
                .filter(|name| sentence.contains(name.as_str()))
                .map(|name| normalize_entity(name));
            let extracted = self
                .extract_entities(sentence, self.max_sentence_entities)
                .into_iter()
                .map(|e| e.normalized);
            for name in mentioned.chain(extracted) {
                if names.len() >= self.max_sentence_entities {
                    break;
                }
                if !names.contains(&name) && chunk_entities.iter().any(|e| e.normalized == name) {
                    names.push(name);
                }
            }
            if names.len() < 2 {
                continue;
            }
            names.sort();

            let relation_type = infer_relation_type(sentence);
            let evidence = truncate_chars(sentence, EVIDENCE_MAX_CHARS);
            for (i, source) in names.iter().enumerate() {
                for target in &names[i + 1..] {
                    relations.push(ExtractedRelation {
                        source: source.clone(),
                        target: target.clone(),
                        relation_type,
                        evidence: evidence.clone(),
                    });
                }
            }
        }
        relations
    }
}

impl EntityExtractor for RuleBasedExtractor {
    fn extract(&self, text: &str) -> Extraction {
        if text.trim().is_empty() {
            return Extraction::default();
        }

        let alias_groups = self.extract_alias_groups(text);

        // Alias names go first so the per-chunk cap never drops them
        let mut entities: Vec<ExtractedEntity> = Vec::new();
        for group in &alias_groups {
            for name in std::iter::once(&group.canonical).chain(group.aliases.iter()) {
                let normalized = normalize_entity(name);
                if !entities.iter().any(|e| e.normalized == normalized) {
                    entities.push(ExtractedEntity {
                        name: name.clone(),
                        normalized,
                        entity_type: "name".to_string(),
                    });
                }
            }
        }
        for entity in self.extract_entities(text, self.max_entities) {
            if entities.len() >= self.max_entities {
                break;
            }
            if !entities.iter().any(|e| e.normalized == entity.normalized) {
                entities.push(entity);
            }
        }

        let relations = self.extract_relations(text, &entities, &alias_groups);

        Extraction {
            entities,
            relations,
            alias_groups,
        }
    }

    fn extract_names(&self, text: &str, limit: usize) -> Vec<String> {
        self.extract_entities(text, limit)
            .into_iter()
            .map(|e| e.name)
            .collect()
    }

    fn name(&self) -> &str {
        "rule-based"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> RuleBasedExtractor {
        RuleBasedExtractor::new().unwrap()
    }

    #[test]
    fn test_latin_entities() {
        let names: Vec<String> = extractor()
            .extract_entities("The Tokio runtime schedules async tasks for Tokio users.", 20)
            .into_iter()
            .map(|e| e.normalized)
            .collect();
        assert_eq!(
            names,
            vec!["tokio", "runtime", "schedules", "async", "tasks", "users"]
        );
    }

    #[test]
    fn test_entity_limit() {
        let text = "alpha beta gamma delta epsilon zeta";
        assert_eq!(extractor().extract_entities(text, 3).len(), 3);
    }

    #[test]
    fn test_cjk_entities() {
        let names: Vec<String> = extractor()
            .extract_entities("孙悟空和猪八戒在高老庄", 20)
            .into_iter()
            .map(|e| e.normalized)
            .collect();
        assert_eq!(names, vec!["孙悟空", "猪八戒", "高老庄"]);
    }

    #[test]
    fn test_relation_types() {
        assert_eq!(
            infer_relation_type("Tokio is a runtime"),
            RelationType::IsA
        );
        assert_eq!(
            infer_relation_type("Axum depends on Hyper"),
            RelationType::DependsOn
        );
        assert_eq!(infer_relation_type("系统包括三个模块"), RelationType::Contains);
        assert_eq!(
            infer_relation_type("Rust and Tokio"),
            RelationType::CoOccurs
        );
    }

    #[test]
    fn test_relations_stay_within_sentences() {
        let extraction = extractor().extract("Tokio depends on Mio. Serde");
        assert_eq!(extraction.relations.len(), 3);
        assert!(extraction
            .relations
            .iter()
            .all(|r| r.source < r.target && r.relation_type == RelationType::DependsOn));
        assert!(extraction
            .relations
            .iter()
            .any(|r| r.source == "mio" && r.target == "tokio" && r.evidence == "Tokio depends on Mio"));
        assert!(!extraction
            .relations
            .iter()
            .any(|r| r.source == "serde" || r.target == "serde"));
    }

    #[test]
    fn test_alias_groups() {
        let ex = extractor();
        let groups = ex.extract_alias_groups("Samuel Clemens, also known as Mark Twain, wrote novels.");
        assert_eq!(
            groups,
            vec![AliasGroup {
                canonical: "Samuel Clemens".to_string(),
                aliases: vec!["Mark Twain".to_string()],
            }]
        );

        let groups = ex.extract_alias_groups("孙悟空又名齐天大圣");
        assert_eq!(groups[0].canonical, "齐天大圣");
        assert_eq!(groups[0].aliases, vec!["孙悟空".to_string()]);

        let extraction = ex.extract("孙悟空又名齐天大圣");
        let names: Vec<&str> = extraction.entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(&names[..2], &["齐天大圣", "孙悟空"]);
    }

    #[test]
    fn test_choose_canonical_alias() {
        let names = vec!["Sam".to_string(), "Samuel".to_string(), "Clemen".to_string()];
        assert_eq!(choose_canonical_alias(&names).unwrap(), "Samuel");
        assert!(choose_canonical_alias(&[]).is_none());
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let ex = extractor();
        let text = "Tokio contains a scheduler. The scheduler causes Tokio tasks to run.";
        assert_eq!(ex.extract(text), ex.extract(text));
    }
}
