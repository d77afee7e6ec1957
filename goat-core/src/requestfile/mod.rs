//! Requestfile front-end: scanning, parsing, import resolution and templating.
//!
//! A requestfile groups HTTP requests into the phases `setup`, `setup-each`, `tests`,
//! `teardown-each` and `teardown`:
//!
//! ```text
//! use ./common
//!
//! ### setup
//!
//! POST {{instance}}/api/login
//!
//! [Header]
//! Content-Type: application/json
//!
//! [Body]
//! {"user": "{{ user }}"}
//!
//! [Script]
//! assert(response.StatusCode == 200);
//! let token = response.BodyJson.token;
//!
//! ---
//!
//! ### tests
//!
//! GET {{instance}}/api/me
//! ```
//!
//! Unquoted request URIs end at the first whitespace, placeholders in them are written
//! without inner spaces.

mod builtins;
pub mod document;
pub mod error;
pub mod import;
pub mod parser;
pub mod request;
pub mod scanner;
pub mod template;
pub mod value;

pub use document::{Action, Document, Invocation};
pub use error::{LoadError, ParseError, ParseErrorKind};
pub use import::load_file;
pub use parser::parse;
pub use request::{Data, Headers, Request};
pub use template::TemplateError;
pub use value::Value;
