//! Analysis Layer
//!
//! Reduces raw recognition output to field values: voting across variants,
//! numeric repair, catalog matching and color classification.

pub mod aggregate;
pub mod correction;
pub mod difficulty;

pub use aggregate::{aggregate, majority_vote, Consensus, ReadingKey};
pub use correction::{
    correct_numeric, correct_split_numeric, find_by_title, rank_catalog, validate_numeric,
    CorrectionSuggestion,
};
pub use difficulty::{classify, classify_candidate, Difficulty};
