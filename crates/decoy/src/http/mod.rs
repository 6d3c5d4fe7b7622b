//! HTTP simulator.
//!
//! ## Module Structure
//!
//! - `types`: rules, response specs and captured requests
//! - `headers`: header conversion and the add/set merge helpers
//! - `matcher`: URI normalisation, compiled rule sets and mode switching
//! - `handler`: per-request handling
//! - `server`: the `HttpServer` listener

mod handler;
mod headers;
mod matcher;
mod server;
mod types;

pub use handler::HttpContext;
pub use headers::{add_headers, merge_headers, set_headers, to_header_map, to_multimap};
pub use matcher::{normalize_uri, CompiledResponse, MatchOutcome, RuleMatcher, RuleSet};
pub use server::{Http, HttpServer};
pub use types::{
    HeaderMultimap, HeaderPolicy, HttpRecord, HttpRequest, MissPolicy, ResponseBody,
    ResponseSpec, Rule,
};
