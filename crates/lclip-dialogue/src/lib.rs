//! Expression-to-subtitle alignment.
//!
//! Locates the subtitle entries that contain a target expression using four
//! scoring strategies under one acceptance threshold, and resolves the
//! surrounding context window. Pure text processing: no I/O, no shared state.

pub mod error;
pub mod matcher;
pub mod similarity;
pub mod strategy;
pub mod text;

pub use error::{MatchError, MatchOutcome, NoMatch};
pub use matcher::{Candidate, DialogueMatcher, MatcherConfig};
pub use text::{is_non_speech, normalize};
