//! Summary mode: detection of whole-corpus questions and diverse selection

use super::ScoredCandidate;
use crate::error::Result;
use regex::Regex;
use std::collections::HashSet;
use uuid::Uuid;

const SUMMARY_KEYWORDS: &[&str] = &[
    "总结", "概述", "归纳", "梳理", "总览", "全貌", "整体", "总体", "全盘", "综述", "主要内容",
    "核心内容", "全书", "整本", "全文", "通篇", "主线", "脉络",
];

const SUMMARY_KEYWORDS_EN: &[&str] = &[
    "summarize",
    "summarise",
    "summary",
    "overview",
    "whole book",
    "entire book",
    "main points",
    "outline",
];

pub struct SummaryDetector {
    pattern: Regex,
}

impl SummaryDetector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(r"(整体|完整|全面|系统).{0,4}(介绍|梳理|说明|总结)")?,
        })
    }

    /// Whether the question asks about the corpus as a whole
    pub fn is_summary_query(&self, query: &str) -> bool {
        if SUMMARY_KEYWORDS.iter().any(|k| query.contains(k)) {
            return true;
        }
        let lowered = query.to_lowercase();
        if SUMMARY_KEYWORDS_EN.iter().any(|k| lowered.contains(k)) {
            return true;
        }
        self.pattern.is_match(query)
    }
}

/// Pick up to `limit` candidates spread over files.
///
/// Files are ordered by their best candidate. The first pass takes the best
/// chunk of the leading `min(files, min_files, limit)` files, then rounds add
/// the next chunk of every file until each file holds `per_file_cap` chunks.
/// Slots still open after that are filled from the fused order, so the cap
/// decides priority and a thin corpus can still reach `limit`.
/// The result keeps the fused order.
pub fn diverse_selection(
    fused: &[ScoredCandidate],
    limit: usize,
    per_file_cap: usize,
    min_files: usize,
) -> Vec<ScoredCandidate> {
    let per_file_cap = per_file_cap.max(1);

    // Positions into `fused`, grouped per file in order of first appearance
    let mut files: Vec<(Uuid, Vec<usize>)> = Vec::new();
    for (pos, candidate) in fused.iter().enumerate() {
        match files.iter_mut().find(|(id, _)| *id == candidate.file_id) {
            Some((_, positions)) => positions.push(pos),
            None => files.push((candidate.file_id, vec![pos])),
        }
    }

    let mut selected: Vec<usize> = Vec::new();
    let mut taken = vec![0usize; files.len()];

    let coverage = files.len().min(min_files).min(limit);
    for (f, (_, positions)) in files.iter().enumerate().take(coverage) {
        selected.push(positions[0]);
        taken[f] = 1;
    }

    let mut progress = true;
    while selected.len() < limit && progress {
        progress = false;
        for (f, (_, positions)) in files.iter().enumerate() {
            if selected.len() >= limit {
                break;
            }
            if taken[f] >= per_file_cap || taken[f] >= positions.len() {
                continue;
            }
            selected.push(positions[taken[f]]);
            taken[f] += 1;
            progress = true;
        }
    }

    if selected.len() < limit {
        let used: HashSet<usize> = selected.iter().copied().collect();
        let open = limit - selected.len();
        selected.extend((0..fused.len()).filter(|pos| !used.contains(pos)).take(open));
    }

    selected.sort_unstable();
    selected.into_iter().map(|pos| fused[pos].clone()).collect()
}

/// Whether a selection spans enough files and chunks to answer a summary question
pub fn has_summary_spread(selected: &[ScoredCandidate], min_files: usize, min_chunks: usize) -> bool {
    let files: HashSet<Uuid> = selected.iter().map(|c| c.file_id).collect();
    files.len() >= min_files && selected.len() >= min_chunks
}
