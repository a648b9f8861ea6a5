//! infra-http: retrying HTTP transport
//!
//! Every integration owns one [`HttpClient`] bound to its configured base URL.
//!
//! ```text
//! integration
//!     └── HttpClient (this crate)
//!         ├── URL composition (base + path + query)
//!         ├── default + per-call headers, auth derived from configuration
//!         ├── per-attempt timeout
//!         ├── retry with exponential backoff (5xx, 429, transport failures)
//!         └── typed JSON decoding (empty body -> None)
//! ```

pub mod client;
pub mod error;

pub use client::{auth_headers, encode_path, HttpClient, HttpResponse};
pub use error::{HttpError, Result};

// Re-export reqwest types that appear in the public API
pub use reqwest::header;
pub use reqwest::{Method, Url};
