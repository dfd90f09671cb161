//! Chapter fact extraction
//!
//! One model call per chapter; the response is sanitized, decoded leniently
//! and written through the store's guarded API.

mod extractor;
mod importance;
mod prompt;
mod sanitize;
mod schema;

pub use extractor::{
    ChapterExtractor, EntityExtractor, ExtractionError, ExtractionRequest, ExtractionSummary,
    SOURCE_TAG,
};
pub use importance::{normalize_importance, normalize_label, normalize_number};
pub use prompt::{build_extraction_messages, KnownContext};
pub use sanitize::{sanitize_json, strip_noise, strip_trailing_commas};
pub use schema::ExtractionResponse;
