//! # goat
//!
//! Command line interface running ordered batches of HTTP requests described in requestfiles.
//!
//! ```bash
//! # create a new requestfile
//! goat --new tests/api.goat
//!
//! # run it against a local instance
//! goat -a instance=http://localhost:8080 tests/api.goat
//!
//! # run all requestfiles below a directory, requests paced by a delay
//! goat --delay 500ms --profile staging tests/
//! ```
//!
//! The requestfile format, parameter sources and execution semantics are documented in the
//! `goat-core` crate.

mod app;

pub use app::App;

// Re-export core crate for embedding
pub use goat_core;
