//! # Goat Core
//!
//! Core functionality of goat, a tool running ordered batches of HTTP requests described in
//! requestfiles.
//!
//! ## Architecture (block diagram)
//!
//! ```text
//! +---------------------+      +---------------------+      +---------------------+
//! | requestfile         | ---> | executor            | ---> | reporter            |
//! | scan/parse/import   |      | setup/tests/teardown|      | separators/summary  |
//! +---------------------+      +---------------------+      +---------------------+
//!            |                    |       |       |
//!            v                    v       v       v
//! +---------------------+  +-----------+ +-----------+ +---------------------+
//! | template + builtins |  | engine    | | requester | | advancer            |
//! | {{ placeholders }}  |  | (rhai)    | | (reqwest) | | wait / advance      |
//! +---------------------+  +-----------+ +-----------+ +---------------------+
//!            ^
//!            |
//! +---------------------+
//! | config (params)     |
//! | profiles/env/files  |
//! +---------------------+
//! ```
//!
//! Most users should use the `goat` binary rather than this crate directly.

pub mod advancer;
pub mod config;
pub mod engine;
pub mod executor;
pub mod reporter;
pub mod requester;
pub mod requestfile;

// Re-export error handling crate
pub use eyre;

pub use config::Params;
pub use engine::{RhaiEngine, ScriptEngine, State};
pub use executor::{Error, Executor, Phase, RunResult};
pub use reporter::Printer;
pub use requester::{HttpRequester, Requester};
pub use requestfile::{load_file, Document};
