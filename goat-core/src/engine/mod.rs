//! Scripting engine abstraction used for `[PreScript]` and `[Script]` blocks.

mod rhai_engine;

pub use rhai_engine::RhaiEngine;

use serde_json::Value as JsonValue;
use thiserror::Error;

/// Runtime state threaded through a run. Seeded from the parameters, updated with every
/// response and with the variables scripts define.
pub type State = serde_json::Map<String, JsonValue>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Script(String),
    #[error("failed converting '{name}' for the script engine: {message}")]
    Conversion { name: String, message: String },
    #[error("can not assign to constant '{0}'")]
    Constant(String),
}

pub trait ScriptEngine: Send {
    /// Sets all entries of `state` as variables, keeping variables which are not part of it.
    fn set_state(&mut self, state: State) -> Result<(), Error>;

    fn set(&mut self, name: &str, value: JsonValue) -> Result<(), Error>;

    /// Runs `script`. Failed assertions and script errors are reported as [`Error::Script`].
    fn run(&mut self, script: &str) -> Result<(), Error>;

    /// Snapshot of all variables except functions.
    fn state(&self) -> State;
}

/// Creates a fresh engine for every run and every invocation.
pub type EngineMaker = Box<dyn Fn() -> Box<dyn ScriptEngine> + Send + Sync>;
