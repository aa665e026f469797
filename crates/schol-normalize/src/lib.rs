//! Text extraction, field validation, date resolution and structured
//! normalization of scholarship pages.

pub mod dates;
pub mod normalize;
pub mod schema;
pub mod text;
pub mod validate;

pub use dates::{has_varies_keyword, DateResolver, VARIES_KEYWORDS};
pub use normalize::{
    candidate_from_json, CandidateFields, ExtractError, Extractor, FallbackExtractor,
    LlmExtractor, NormalizeOutcome, Normalizer, EXTRACTION_SYSTEM_PROMPT,
};
pub use schema::{validate_record, validate_value};
pub use text::{extract_text, source_domain};
pub use validate::{
    generate_id, normalize_country, truncate_eligibility, validate_deadline, validate_degree,
    validate_link,
};

pub const CRATE_NAME: &str = "schol-normalize";
