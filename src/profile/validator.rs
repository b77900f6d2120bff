use crate::error::{RagError, Result, ValidationError};
use crate::profile::ProfileConfig;
use std::fmt::Display;

/// Write-time validation for retrieval profiles.
///
/// Out-of-range values are rejected rather than clamped, and every violation is
/// reported at once.
pub struct ProfileValidator;

impl ProfileValidator {
    pub fn validate(config: &ProfileConfig) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_thresholds(config, &mut errors);
        Self::validate_graph(config, &mut errors);
        Self::validate_candidates(config, &mut errors);
        Self::validate_relaxation(config, &mut errors);
        Self::validate_summary(config, &mut errors);
        Self::validate_keyword_fallback(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RagError::ConfigurationInvalid { errors })
        }
    }

    fn validate_thresholds(config: &ProfileConfig, errors: &mut Vec<ValidationError>) {
        check(errors, "rag_min_top1_score", config.rag_min_top1_score, 0.0, 1.5);
        check(errors, "rag_min_support_score", config.rag_min_support_score, 0.0, 1.5);
        check(errors, "rag_min_support_count", config.rag_min_support_count, 1, 8);
        check(errors, "rag_min_item_score", config.rag_min_item_score, 0.0, 1.5);
        check(errors, "vector_semantic_min", config.vector_semantic_min, 0.0, 1.0);

        if config.rag_min_item_score > config.rag_min_support_score {
            errors.push(ValidationError::new(
                "rag_min_item_score",
                "must not exceed rag_min_support_score",
            ));
        }
        if config.rag_min_support_score > config.rag_min_top1_score {
            errors.push(ValidationError::new(
                "rag_min_support_score",
                "must not exceed rag_min_top1_score",
            ));
        }
    }

    fn validate_graph(config: &ProfileConfig, errors: &mut Vec<ValidationError>) {
        check(errors, "rag_graph_max_terms", config.rag_graph_max_terms, 4, 40);
        check(errors, "graph_channel_weight", config.graph_channel_weight, 0.1, 1.2);
        check(errors, "graph_only_penalty", config.graph_only_penalty, 0.1, 1.0);
        check(errors, "alias_mining_max_terms", config.alias_mining_max_terms, 0, 24);
    }

    fn validate_candidates(config: &ProfileConfig, errors: &mut Vec<ValidationError>) {
        check(
            errors,
            "vector_candidate_multiplier",
            config.vector_candidate_multiplier,
            2,
            20,
        );
        check(
            errors,
            "keyword_candidate_multiplier",
            config.keyword_candidate_multiplier,
            2,
            20,
        );
        check(
            errors,
            "graph_candidate_multiplier",
            config.graph_candidate_multiplier,
            2,
            24,
        );
    }

    fn validate_relaxation(config: &ProfileConfig, errors: &mut Vec<ValidationError>) {
        check(errors, "fallback_top1_relax", config.fallback_top1_relax, 0.0, 0.30);
        check(errors, "fallback_support_relax", config.fallback_support_relax, 0.0, 0.30);
        check(errors, "fallback_item_relax", config.fallback_item_relax, 0.0, 0.20);
    }

    fn validate_summary(config: &ProfileConfig, errors: &mut Vec<ValidationError>) {
        check(errors, "summary_expand_factor", config.summary_expand_factor, 1, 8);
        check(errors, "summary_min_chunks", config.summary_min_chunks, 4, 24);
        check(errors, "summary_per_file_cap", config.summary_per_file_cap, 1, 6);
        check(errors, "summary_min_files", config.summary_min_files, 1, 10);
    }

    fn validate_keyword_fallback(config: &ProfileConfig, errors: &mut Vec<ValidationError>) {
        check(
            errors,
            "keyword_fallback_max_chunks",
            config.keyword_fallback_max_chunks,
            20,
            800,
        );
        check(
            errors,
            "keyword_fallback_min_score",
            config.keyword_fallback_min_score,
            0.0,
            1.5,
        );
        check(
            errors,
            "keyword_fallback_scan_limit",
            config.keyword_fallback_scan_limit,
            200,
            20000,
        );
    }
}

fn check<T: PartialOrd + Display + Copy>(
    errors: &mut Vec<ValidationError>,
    path: &str,
    value: T,
    min: T,
    max: T,
) {
    // NaN fails both comparisons and lands here too
    if !(value >= min && value <= max) {
        errors.push(ValidationError::new(
            path,
            format!("must be between {} and {}, got {}", min, max, value),
        ));
    }
}
