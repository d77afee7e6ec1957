use std::path::PathBuf;
use thiserror::Error;

/// Parse failure with a one based source position.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{line}:{column}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseErrorKind {
    #[error("illegal character")]
    IllegalCharacter,
    #[error("invalid string literal")]
    InvalidStringLiteral,
    #[error("empty use path")]
    EmptyUsePath,
    #[error("empty call path")]
    EmptyCallPath,
    #[error("invalid section")]
    InvalidSection,
    #[error("invalid log section")]
    InvalidLogSection,
    #[error("invalid request method")]
    InvalidRequestMethod,
    #[error("method must be followed by the request URI")]
    NoRequestUri,
    #[error("invalid token ({0})")]
    InvalidToken(&'static str),
    #[error("invalid literal (boolean expression expected)")]
    InvalidLiteral,
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),
    #[error("invalid block header")]
    InvalidBlockHeader,
    #[error("block '{0}' has already been defined for this request")]
    BlockDefinedMultiple(String),
    #[error("block entry must start with an assignment")]
    InvalidBlockEntryAssignment,
    #[error("value expected after assignment")]
    MissingValue,
    #[error("array has not been closed")]
    UnterminatedArray,
    #[error("header values must start with a key")]
    InvalidHeaderKey,
    #[error("header key and value must be separated by a colon (:)")]
    InvalidHeaderSeparator,
    #[error("no header value")]
    NoHeaderValue,
    #[error("open escape block")]
    OpenEscapeBlock,
    #[error("blocks must follow after a request head")]
    BlockOutOfRequest,
    #[error("invalid file descriptor")]
    InvalidFileDescriptor,
    #[error("the section has been already defined")]
    SectionDefinedMultiple,
    #[error("group has not been closed")]
    UnclosedGroup,
    #[error("missing group definition")]
    MissingGroup,
}

/// Failure while loading a requestfile from disk including its imports.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed reading file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
    #[error("the imported resource has already been imported")]
    MultiImport,
    #[error("failed following import {path}: {source}")]
    Import {
        path: PathBuf,
        #[source]
        source: Box<LoadError>,
    },
    #[error("failed serializing document: {0}")]
    Fingerprint(#[from] serde_json::Error),
}
