use super::{request::Request, value::Value};
use indexmap::IndexMap;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Extension given to import and invocation paths which do not carry one.
pub const FILE_EXTENSION: &str = "goat";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Action {
    Request(Box<Request>),
    LogSection(String),
    Invocation(Invocation),
}

/// `execute` directive running another requestfile as a sub routine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Invocation {
    pub path: String,
    pub params: IndexMap<String, Value>,
    /// Variable name in the invoked file mapped to the alias it is exported as.
    pub returns: IndexMap<String, String>,
    /// File containing the directive.
    pub source: PathBuf,
}

impl Invocation {
    pub fn resolved_path(&self) -> PathBuf {
        let dir = self.source.parent().unwrap_or_else(|| Path::new(""));
        with_default_extension(dir.join(&self.path))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Document {
    pub imports: Vec<String>,
    pub defaults: Option<Request>,
    pub setup: Vec<Action>,
    pub setup_each: Vec<Action>,
    pub tests: Vec<Action>,
    pub teardown: Vec<Action>,
    pub teardown_each: Vec<Action>,
    #[serde(skip)]
    pub path: PathBuf,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>) -> Document {
        Document {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Appends the actions of `other` after the actions of `self`, phase by phase.
    /// Defaults of `other` are filled up with the ones of `self` where they leave gaps.
    /// `other` is left untouched.
    pub fn merge(&mut self, other: &Document) {
        self.setup.extend(other.setup.iter().cloned());
        self.setup_each.extend(other.setup_each.iter().cloned());
        self.tests.extend(other.tests.iter().cloned());
        self.teardown.extend(other.teardown.iter().cloned());
        self.teardown_each.extend(other.teardown_each.iter().cloned());

        if let Some(incoming) = &other.defaults {
            let mut merged = incoming.clone();
            if let Some(current) = &self.defaults {
                merged.merge(current);
            }
            self.defaults = Some(merged);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.setup.is_empty()
            && self.setup_each.is_empty()
            && self.tests.is_empty()
            && self.teardown.is_empty()
            && self.teardown_each.is_empty()
    }

    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }
}

pub fn with_default_extension(path: PathBuf) -> PathBuf {
    if path.extension().is_some() {
        path
    } else {
        path.with_extension(FILE_EXTENSION)
    }
}
