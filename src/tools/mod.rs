pub mod executor;
pub mod http;
pub mod parse;
pub mod search;

pub use executor::{DEFAULT_RESULTS_PER_QUERY, ToolExecutor};
pub use http::post_json;
pub use parse::{extract_json, strip_code_fences};
pub use search::{ExaSearch, NO_HIGHLIGHTS, SEARCH_TOOL, SearchHit, SearchProvider};
