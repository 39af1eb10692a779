//! Result-screen statistics and the recognition hand-off

mod eligibility;
mod extractor;
mod model;

pub use eligibility::{is_placeholder, is_placeholder_name, rating_eligibility, Ineligible};
pub use extractor::{extract_with_timeout, HttpStatExtractor, StatExtractor};
pub use model::{MatchStats, PlayerStats};
