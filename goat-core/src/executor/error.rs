use super::response::ResponseError;
use crate::{
    engine,
    requestfile::{request, LoadError, TemplateError},
    requester,
};
use std::{fmt, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("failed templating prescript: {0}")]
    PreSubstitution(#[source] request::Error),
    #[error("failed templating request: {0}")]
    Substitution(#[source] request::Error),
    #[error("prescript failed: {0}")]
    PreScript(#[source] engine::Error),
    #[error("script failed: {0}")]
    Script(#[source] engine::Error),
    #[error("failed reading request content: {0}")]
    Content(#[source] request::Error),
    #[error("failed building request: {0}")]
    Build(#[source] request::Error),
    #[error("request failed: {0}")]
    Transport(#[from] requester::Error),
    #[error(transparent)]
    Response(#[from] ResponseError),
    #[error("invalid option '{name}': {message}")]
    InvalidOption { name: String, message: String },
    #[error("{request}: {source} ({location})")]
    Request {
        request: String,
        location: String,
        source: Box<Error>,
    },
    #[error("failed templating parameters of {path}: {source}")]
    InvocationParams {
        path: PathBuf,
        #[source]
        source: TemplateError,
    },
    #[error("failed executing {path}: {source}")]
    Invocation { path: PathBuf, source: Box<Error> },
    #[error("failed passing state to the script engine: {0}")]
    Engine(#[source] engine::Error),
    #[error(transparent)]
    Multi(Errors),
    #[error("{:02} of {:02} batches failed", .failures.len(), .total)]
    Batch {
        failures: Vec<(PathBuf, Error)>,
        total: usize,
    },
    #[error("no requestfiles found to execute")]
    NoFiles,
    #[error("failed walking directory: {0}")]
    Walk(#[from] walkdir::Error),
}

impl Error {
    /// Whether the error originates from templating the request parameters.
    pub fn is_substitution(&self) -> bool {
        match self {
            Error::Substitution(_) | Error::PreSubstitution(_) => true,
            Error::Request { source, .. } => source.is_substitution(),
            _ => false,
        }
    }

    /// Files which failed in a batch run.
    pub fn failed_files(&self) -> Vec<&PathBuf> {
        match self {
            Error::Batch { failures, .. } => failures.iter().map(|(path, _)| path).collect(),
            _ => Vec::new(),
        }
    }
}

/// Collection of independent errors.
#[derive(Debug, Default)]
pub struct Errors(Vec<Error>);

impl Errors {
    pub fn push(&mut self, err: Error) {
        match err {
            Error::Multi(errs) => self.0.extend(errs.0),
            err => self.0.push(err),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.0.iter()
    }

    pub fn into_result(mut self) -> Result<(), Error> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(self.0.remove(0)),
            _ => Err(Error::Multi(self)),
        }
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            let msg = err.to_string();
            let mut lines = msg.lines();
            write!(f, "\n  [{i:02}] {}", lines.next().unwrap_or_default())?;
            for line in lines {
                write!(f, "\n       {line}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for Errors {}
