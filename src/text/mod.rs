//! Text helpers: entity normalization, tokenization, overlap scoring and chunking
//!
//! Latin text is handled at word level. CJK text has no word boundaries, so runs of
//! Han characters are cut at common function characters and long segments fall
//! back to overlapping bigrams.

mod stopwords;

pub use stopwords::{
    CJK_FUNCTION_CHARS, ENTITY_SUFFIX_BLACKLIST, EN_STOPWORDS, QUERY_NOISE_TERMS, ZH_STOPWORDS,
};

/// Maximum number of terms considered when computing a hit ratio
const HIT_RATIO_WINDOW: usize = 8;

pub fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// Normalize an entity name for comparison.
///
/// Whitespace runs collapse to one space; pure ASCII names are lowercased, CJK
/// names are kept as written.
pub fn normalize_entity(name: &str) -> String {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return collapsed;
    }
    let ascii_name = collapsed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/' | ' '));
    if ascii_name {
        collapsed.to_lowercase()
    } else {
        collapsed
    }
}

pub fn is_stopword(normalized: &str) -> bool {
    EN_STOPWORDS.contains(&normalized) || ZH_STOPWORDS.contains(&normalized)
}

pub fn is_query_noise(normalized: &str) -> bool {
    QUERY_NOISE_TERMS.contains(&normalized)
}

/// Split a run of CJK characters at function characters
pub fn cjk_segments(run: &str) -> Vec<String> {
    run.split(|c: char| CJK_FUNCTION_CHARS.contains(&c))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Raw tokens in reading order. Latin words are lowercased.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut latin = String::new();
    let mut han = String::new();

    let flush_latin = |latin: &mut String, tokens: &mut Vec<String>| {
        let word = latin.trim_matches(|c: char| matches!(c, '-' | '_' | '/'));
        if word.chars().count() >= 2 {
            tokens.push(word.to_lowercase());
        }
        latin.clear();
    };
    let flush_han = |han: &mut String, tokens: &mut Vec<String>| {
        for segment in cjk_segments(han) {
            let chars: Vec<char> = segment.chars().collect();
            if chars.len() < 2 {
                continue;
            }
            if chars.len() <= 4 {
                tokens.push(segment);
            } else {
                for pair in chars.windows(2) {
                    tokens.push(pair.iter().collect());
                }
            }
        }
        han.clear();
    };

    for c in text.chars() {
        if c.is_ascii_alphanumeric() || (!latin.is_empty() && matches!(c, '_' | '-' | '/')) {
            if !han.is_empty() {
                flush_han(&mut han, &mut tokens);
            }
            latin.push(c);
        } else if is_cjk(c) {
            if !latin.is_empty() {
                flush_latin(&mut latin, &mut tokens);
            }
            han.push(c);
        } else {
            if !latin.is_empty() {
                flush_latin(&mut latin, &mut tokens);
            }
            if !han.is_empty() {
                flush_han(&mut han, &mut tokens);
            }
        }
    }
    if !latin.is_empty() {
        flush_latin(&mut latin, &mut tokens);
    }
    if !han.is_empty() {
        flush_han(&mut han, &mut tokens);
    }

    tokens
}

/// Longest token the keyword index keeps, in bytes
pub const MAX_INDEX_TERM_BYTES: usize = 39;

/// Analyzer shared by keyword indexing and keyword queries.
///
/// Alphanumeric runs become lowercased words. CJK runs are cut at function
/// characters and every segment is emitted as overlapping bigrams, with a single
/// character segment kept as a unigram, so a query term matches any document
/// containing it regardless of how the surrounding text segments.
pub fn index_terms(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut word = String::new();
    let mut han = String::new();

    let flush_word = |word: &mut String, terms: &mut Vec<String>| {
        let lowered = word.to_lowercase();
        if lowered.len() <= MAX_INDEX_TERM_BYTES {
            terms.push(lowered);
        }
        word.clear();
    };
    let flush_han = |han: &mut String, terms: &mut Vec<String>| {
        for segment in cjk_segments(han) {
            let chars: Vec<char> = segment.chars().collect();
            if chars.len() == 1 {
                terms.push(segment);
            } else {
                terms.extend(chars.windows(2).map(|pair| pair.iter().collect::<String>()));
            }
        }
        han.clear();
    };

    for c in text.chars() {
        if is_cjk(c) {
            if !word.is_empty() {
                flush_word(&mut word, &mut terms);
            }
            han.push(c);
        } else if c.is_alphanumeric() {
            if !han.is_empty() {
                flush_han(&mut han, &mut terms);
            }
            word.push(c);
        } else {
            if !word.is_empty() {
                flush_word(&mut word, &mut terms);
            }
            if !han.is_empty() {
                flush_han(&mut han, &mut terms);
            }
        }
    }
    if !word.is_empty() {
        flush_word(&mut word, &mut terms);
    }
    if !han.is_empty() {
        flush_han(&mut han, &mut terms);
    }
    terms
}

/// Distinct topical tokens: stopwords, noise terms and bare numbers removed
pub fn content_tokens(text: &str, limit: usize) -> Vec<String> {
    let filtered: Vec<String> = tokenize(text)
        .into_iter()
        .filter(|t| !is_stopword(t) && !is_query_noise(t))
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .collect();
    merge_preserve_order(&[], &filtered, limit)
}

/// Append `extra` to `base`, dropping duplicates by normalized form
pub fn merge_preserve_order(base: &[String], extra: &[String], limit: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::new();
    for item in base.iter().chain(extra.iter()) {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(normalize_entity(trimmed)) {
            merged.push(trimmed.to_string());
            if merged.len() >= limit {
                break;
            }
        }
    }
    merged
}

/// Fraction of terms found in `text`, over at most the first eight terms
pub fn term_hit_ratio(text: &str, terms: &[String]) -> f32 {
    if terms.is_empty() || text.is_empty() {
        return 0.0;
    }
    let lowered = text.to_lowercase();
    let window = &terms[..terms.len().min(HIT_RATIO_WINDOW)];
    let hits = window
        .iter()
        .filter(|term| {
            let term = term.trim().to_lowercase();
            !term.is_empty() && lowered.contains(&term)
        })
        .count();
    (hits as f32 / window.len() as f32).min(1.0)
}

/// Truncate on a character boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Sentence spans used for relation extraction
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let boundary = match c {
            '。' | '！' | '？' | '!' | '?' | ';' | '；' | '\n' => true,
            '.' => chars.peek().map_or(true, |(_, next)| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            let sentence = text[start..idx].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = idx + c.len_utf8();
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Split text into overlapping character windows
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || chunk_size == 0 {
        return Vec::new();
    }
    let step = chunk_size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_entity() {
        assert_eq!(normalize_entity("  Tokio   Runtime "), "tokio runtime");
        assert_eq!(normalize_entity("孙悟空"), "孙悟空");
        assert_eq!(normalize_entity("Café"), "Café");
        assert_eq!(normalize_entity("   "), "");
    }

    #[test]
    fn test_tokenize_mixed_text() {
        let tokens = tokenize("The borrow-checker, 孙悟空的外号 v2");
        assert_eq!(tokens, vec!["the", "borrow-checker", "孙悟空", "外号", "v2"]);
    }

    #[test]
    fn test_tokenize_long_cjk_segment_uses_bigrams() {
        let tokens = tokenize("取经团队成员");
        assert_eq!(tokens, vec!["取经", "经团", "团队", "队成", "成员"]);
    }

    #[test]
    fn test_index_terms() {
        assert_eq!(
            index_terms("The borrow-checker handles 100% of it"),
            vec!["the", "borrow", "checker", "handles", "100", "of", "it"]
        );
        assert_eq!(index_terms("孙悟空的金箍棒"), vec!["孙悟", "悟空", "金箍", "箍棒"]);
        // Single characters between function characters survive as unigrams
        assert_eq!(index_terms("他和猴"), vec!["猴"]);
        assert!(index_terms(&"x".repeat(60)).is_empty());
    }

    #[test]
    fn test_content_tokens_drop_stopwords() {
        let tokens = content_tokens("What is the ownership model of Rust 2021?", 10);
        assert_eq!(tokens, vec!["ownership", "rust"]);
    }

    #[test]
    fn test_merge_preserve_order() {
        let base = vec!["Rust".to_string(), "Tokio".to_string()];
        let extra = vec!["rust".to_string(), "serde".to_string(), "Axum".to_string()];
        assert_eq!(
            merge_preserve_order(&base, &extra, 3),
            vec!["Rust", "Tokio", "serde"]
        );
    }

    #[test]
    fn test_term_hit_ratio() {
        let terms: Vec<String> = ["rust", "tokio", "python"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let ratio = term_hit_ratio("Rust async runtimes such as Tokio", &terms);
        assert!((ratio - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(term_hit_ratio("", &terms), 0.0);
        assert_eq!(term_hit_ratio("anything", &[]), 0.0);
    }

    #[test]
    fn test_truncate_chars_is_boundary_safe() {
        assert_eq!(truncate_chars("孙悟空大闹天宫", 3), "孙悟空");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn test_split_sentences() {
        let sentences = split_sentences("Rust is fast. It is safe!\n版本1.0发布。结束");
        assert_eq!(
            sentences,
            vec!["Rust is fast", "It is safe", "版本1.0发布", "结束"]
        );
    }

    #[test]
    fn test_split_text_overlap() {
        let text: String = "abcdefghij".repeat(3);
        let chunks = split_text(&text, 12, 4);
        assert_eq!(chunks[0].len(), 12);
        assert_eq!(&chunks[1][..4], &chunks[0][8..12]);
        assert!(chunks.last().unwrap().ends_with('j'));
    }
}
