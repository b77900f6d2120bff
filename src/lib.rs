//! ragcore - Hybrid Retrieval and Ranking Engine
//!
//! Turns a question, a set of knowledge libraries and a retrieval profile into a
//! ranked, cited set of supporting fragments. Dense vector similarity, keyword
//! matching and an entity-relation graph are fused into one ranking, gated by
//! confidence thresholds with a bounded relaxation ladder, and optionally widened
//! for whole-corpus summary questions.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod entities;
pub mod error;
pub mod ingest;
pub mod profile;
pub mod retrieval;
pub mod session;
pub mod storage;
pub mod text;

pub use error::{RagError, Result};
