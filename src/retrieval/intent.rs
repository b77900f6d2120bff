//! Count and roster intents.
//!
//! "How many disciples does Tang Sanzang have" asks for a number; "who are the
//! members of the pilgrim team" asks for a list of people. Both shift the keyword
//! channel towards chunks carrying that kind of evidence, and both make a first
//! ranking without such evidence count as weak.

use crate::error::Result;
use crate::text::{merge_preserve_order, normalize_entity};
use regex::Regex;

const COUNT_INTENT_KEYWORDS: &[&str] =
    &["几个", "多少", "几位", "几人", "几名", "几条", "几种", "几次", "数量"];

const ROSTER_INTENT_KEYWORDS: &[&str] = &[
    "徒弟", "弟子", "成员", "角色", "团队", "同伴", "取经团队", "师徒", "班底", "有哪些人",
];

const ROSTER_SIGNAL_KEYWORDS: &[&str] =
    &["徒弟", "弟子", "师徒", "成员", "团队", "同伴", "角色", "取经"];

const GROUP_CONTEXT_KEYWORDS: &[&str] = &[
    "一起", "同行", "同去", "同往", "随行", "陪同", "团队", "队伍", "同伴", "师徒", "取经",
];

const COUNT_UNIT_HINTS: &[&str] = &[
    "个", "位", "人", "名", "种", "条", "次", "章", "卷", "岁", "年", "月", "天", "小时", "分钟",
    "秒", "徒弟", "弟子", "成员", "角色", "团队", "队伍", "同伴", "师徒", "众",
];

/// Units that name people, so a roster-style count also counts as evidence
const PEOPLE_UNITS: &[&str] = &["徒弟", "弟子", "成员", "角色", "团队", "同伴", "师徒", "众", "人"];

/// Added to the keyword terms when a question counts the members of a group
pub const ROSTER_CUE_TERMS: &[&str] = &["师徒", "徒弟", "成员", "团队", "同伴", "同行", "取经"];

const MAX_UNIT_HINTS: usize = 10;
const UNIT_HINTS_CHECKED: usize = 8;
const ANCHORS_CHECKED: usize = 10;

const CHINESE_NUMERALS: &str = "一二三四五六七八九十百千两俩";

/// What kind of answer a question asks for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryIntent {
    pub summary: bool,
    pub count: bool,
    pub roster: bool,
    /// Units named in the question, in [`COUNT_UNIT_HINTS`] order
    pub count_unit_hints: Vec<String>,
}

impl QueryIntent {
    pub fn summary() -> Self {
        Self {
            summary: true,
            ..Self::default()
        }
    }
}

pub struct IntentDetector {
    count_pattern: Regex,
    group_count_pattern: Regex,
    roster_pattern: Regex,
    count_signal: Regex,
    roster_count: Regex,
    roster_list: Regex,
}

impl IntentDetector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            count_pattern: Regex::new(r"(几|多少).{0,4}(个|位|人|名|种|条|次|章|卷)")?,
            group_count_pattern: Regex::new(
                r"(几|多少).{0,2}(个|位|人|名).{0,6}(一起|同行|团队|队伍|同伴|师徒|取经)",
            )?,
            roster_pattern: Regex::new(
                r"(哪些|哪几|都有谁|由谁|包括谁|分别是|名单).{0,6}(徒弟|弟子|成员|角色|人物|团队|同伴|师徒)",
            )?,
            count_signal: Regex::new(r"[0-9]+|[一二三四五六七八九十百千两俩]+")?,
            roster_count: Regex::new(
                r"(?:[0-9]+|[一二三四五六七八九十百千两俩]+).{0,4}(?:徒弟|弟子|成员|人|众)",
            )?,
            roster_list: Regex::new(r"[\x{4E00}-\x{9FFF}]{2,4}[、和与及][\x{4E00}-\x{9FFF}]{2,4}")?,
        })
    }

    /// Classify a question. `summary` comes from the summary detector.
    pub fn detect(&self, query: &str, summary: bool) -> QueryIntent {
        let count = self.is_count_query(query);
        let roster = self.is_roster_query(query) || (count && self.is_group_count_query(query));
        QueryIntent {
            summary,
            count,
            roster,
            count_unit_hints: if count { count_unit_hints(query) } else { Vec::new() },
        }
    }

    pub fn is_count_query(&self, query: &str) -> bool {
        let normalized = normalize_entity(query);
        COUNT_INTENT_KEYWORDS
            .iter()
            .any(|k| query.contains(k) || normalized.contains(k))
            || self.count_pattern.is_match(query)
    }

    pub fn is_roster_query(&self, query: &str) -> bool {
        let normalized = normalize_entity(query);
        ROSTER_INTENT_KEYWORDS
            .iter()
            .any(|k| query.contains(k) || normalized.contains(k))
            || self.roster_pattern.is_match(query)
    }

    /// A count over people travelling or acting together
    fn is_group_count_query(&self, query: &str) -> bool {
        GROUP_CONTEXT_KEYWORDS.iter().any(|k| query.contains(k))
            || self.group_count_pattern.is_match(query)
    }

    /// Whether `text` states a quantity, in one of `unit_hints` when any are given
    pub fn has_count_signal(&self, text: &str, unit_hints: &[String]) -> bool {
        if text.is_empty() {
            return false;
        }
        if unit_hints.is_empty() {
            return self.count_signal.is_match(text);
        }
        if unit_hints
            .iter()
            .take(UNIT_HINTS_CHECKED)
            .any(|unit| numeral_before_unit(text, unit))
        {
            return true;
        }
        unit_hints.iter().any(|unit| PEOPLE_UNITS.contains(&unit.as_str()))
            && self.roster_count.is_match(text)
    }

    /// Whether `text` looks like it lists the members of a group
    pub fn has_roster_signal(&self, text: &str, anchor_terms: &[String]) -> bool {
        if text.is_empty() {
            return false;
        }
        if self.roster_count.is_match(text) {
            return true;
        }
        let lowered = text.to_lowercase();
        let anchor_hits = anchor_terms
            .iter()
            .take(ANCHORS_CHECKED)
            .filter(|term| !term.is_empty() && lowered.contains(term.as_str()))
            .count();
        if ROSTER_SIGNAL_KEYWORDS.iter().any(|k| text.contains(k))
            && (self.roster_list.is_match(text) || anchor_hits >= 2)
        {
            return true;
        }
        anchor_hits >= 3
    }
}

/// Units from [`COUNT_UNIT_HINTS`] that appear in the question
pub fn count_unit_hints(query: &str) -> Vec<String> {
    let hints: Vec<String> = COUNT_UNIT_HINTS
        .iter()
        .filter(|unit| query.contains(*unit))
        .map(|unit| unit.to_string())
        .collect();
    merge_preserve_order(&[], &hints, MAX_UNIT_HINTS)
}

/// Some occurrence of `unit` directly follows a number, whitespace allowed
fn numeral_before_unit(text: &str, unit: &str) -> bool {
    text.match_indices(unit).any(|(at, _)| {
        text[..at]
            .trim_end()
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_digit() || CHINESE_NUMERALS.contains(c))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> IntentDetector {
        IntentDetector::new().unwrap()
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_count_and_roster_detection() {
        let d = detector();

        let intent = d.detect("唐僧有几个徒弟", false);
        assert!(intent.count);
        assert!(intent.roster);
        assert_eq!(intent.count_unit_hints, strings(&["个", "徒弟"]));

        // Counting people who travel together is a roster question too
        let intent = d.detect("一共多少人一起去取经", false);
        assert!(intent.count && intent.roster);

        let intent = d.detect("取经路上分别是哪些人物", false);
        assert!(!intent.count);
        assert!(intent.roster);

        let intent = d.detect("这本书一共多少章", false);
        assert!(intent.count);
        assert!(!intent.roster);

        assert_eq!(d.detect("孙悟空的外号是什么", true), QueryIntent::summary());
    }

    #[test]
    fn test_count_signal_respects_unit_hints() {
        let d = detector();
        let hints = strings(&["个", "徒弟"]);
        assert!(d.has_count_signal("唐僧收了三个徒弟", &hints));
        assert!(d.has_count_signal("He took 3 个 students", &hints));
        // Numbers without the asked unit do not count
        assert!(!d.has_count_signal("走了十万八千里", &hints));
        assert!(d.has_count_signal("走了十万八千里", &[]));
        // A people count satisfies people units through the roster pattern
        assert!(d.has_count_signal("师徒四人", &strings(&["师徒"])));
        assert!(!d.has_count_signal("", &hints));
    }

    #[test]
    fn test_roster_signal() {
        let d = detector();
        assert!(d.has_roster_signal("师徒四人踏上西行之路", &[]));
        assert!(d.has_roster_signal("唐僧的徒弟有孙悟空、猪八戒", &[]));
        let anchors = strings(&["孙悟空", "猪八戒", "沙僧"]);
        assert!(d.has_roster_signal("孙悟空与猪八戒吵架，沙僧劝架", &anchors));
        assert!(!d.has_roster_signal("孙悟空独自去化缘", &anchors));
    }
}
