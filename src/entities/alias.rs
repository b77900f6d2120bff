//! Nickname and alias mining from retrieved text
//!
//! Used when a query asks for another name of an entity: candidate names are
//! pulled from chunk text with a few surface patterns and ranked by how often
//! they occur.

use crate::error::Result;
use crate::text::{is_stopword, normalize_entity};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

const ALIAS_INTENT_KEYWORDS: &[&str] = &[
    "外号", "绰号", "称呼", "别名", "又名", "俗称", "法号", "叫什么", "怎么叫", "怎么称呼",
];

const ALIAS_INTENT_KEYWORDS_EN: &[&str] = &["alias", "nickname", "also known as", "aka"];

/// Words that mark a passage as talking about names
const NICKNAME_HINTS: &[&str] = &[
    "外号", "绰号", "称呼", "别名", "又名", "俗称", "法号", "叫做", "称为", "唤作",
];

/// Fragments that are part of the question, never an answer
const NAME_WORDS: &[&str] = &["外号", "绰号", "称呼", "别名", "名字", "又名"];

/// Whether the query asks for an alternative name
pub fn is_alias_intent(query: &str) -> bool {
    if ALIAS_INTENT_KEYWORDS.iter().any(|k| query.contains(k)) {
        return true;
    }
    let lowered = query.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    ALIAS_INTENT_KEYWORDS_EN.iter().any(|k| {
        if k.contains(' ') {
            words.join(" ").contains(k)
        } else {
            words.contains(k)
        }
    })
}

pub struct AliasMiner {
    call: Regex,
    quoted: Regex,
    address: Regex,
    english: Regex,
}

impl AliasMiner {
    pub fn new() -> Result<Self> {
        Ok(Self {
            call: Regex::new(
                r#"(?:叫|称|唤|骂)[^。！？\n]{0,8}?[“"「『]?([\x{4E00}-\x{9FFF}]{2,5})"#,
            )?,
            quoted: Regex::new(r#"[“"「『]([\x{4E00}-\x{9FFF}]{2,5})[”"」』]"#)?,
            address: Regex::new(r"(?:你这|你个)([\x{4E00}-\x{9FFF}]{2,4})")?,
            english: Regex::new(
                r#"(?:[Nn]icknamed|[Kk]nown as|[Cc]alled|[Dd]ubbed|aka|a\.k\.a\.)\s+["“']?([A-Z][A-Za-z\-]+(?:\s+[A-Z][A-Za-z\-]+)?)"#,
            )?,
        })
    }

    fn is_candidate(name: &str) -> bool {
        let normalized = normalize_entity(name);
        if normalized.chars().count() < 2 || is_stopword(&normalized) {
            return false;
        }
        !NAME_WORDS.iter().any(|w| name.contains(w))
    }

    /// Candidate aliases found in `texts`, most frequent first, excluding names
    /// already known
    pub fn mine(&self, texts: &[&str], exclude: &[String], limit: usize) -> Vec<String> {
        let excluded: HashSet<String> = exclude.iter().map(|e| normalize_entity(e)).collect();
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();

        for &text in texts {
            let mut found: Vec<&str> = Vec::new();
            let mut collect = |pattern: &Regex| {
                for caps in pattern.captures_iter(text) {
                    if let Some(m) = caps.get(1) {
                        found.push(m.as_str());
                    }
                }
            };
            if NICKNAME_HINTS.iter().any(|h| text.contains(h)) {
                collect(&self.call);
                collect(&self.quoted);
            }
            collect(&self.address);
            collect(&self.english);

            for name in found {
                let name = name.trim();
                if Self::is_candidate(name) && !excluded.contains(&normalize_entity(name)) {
                    *counts.entry(name.to_string()).or_insert(0) += 1;
                }
            }
        }

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|(a, ca), (b, cb)| {
            cb.cmp(ca)
                .then_with(|| b.chars().count().cmp(&a.chars().count()))
                .then_with(|| a.cmp(b))
        });
        ranked.into_iter().take(limit).map(|(name, _)| name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_intent() {
        assert!(is_alias_intent("孙悟空的外号是什么"));
        assert!(is_alias_intent("他怎么称呼"));
        assert!(is_alias_intent("What is the nickname of Clemens?"));
        assert!(is_alias_intent("Clemens, aka who?"));
        assert!(!is_alias_intent("What does Tokio schedule?"));
        assert!(!is_alias_intent("kafka"));
    }

    #[test]
    fn test_mine_chinese_nicknames() {
        let miner = AliasMiner::new().unwrap();
        let texts = [
            "他的外号叫“齐天大圣”。",
            "也有人称他“美猴王”的外号。",
        ];
        let mined = miner.mine(&texts, &["孙悟空".to_string()], 5);
        assert_eq!(mined[0], "齐天大圣");
        assert!(mined.contains(&"美猴王".to_string()));
    }

    #[test]
    fn test_mine_english_and_exclusions() {
        let miner = AliasMiner::new().unwrap();
        let texts = ["Clemens was known as Mark Twain.", "Friends called Sam often"];
        let mined = miner.mine(&texts, &["Sam".to_string()], 5);
        assert_eq!(mined, vec!["Mark Twain".to_string()]);
    }
}
