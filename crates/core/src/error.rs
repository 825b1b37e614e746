use crate::session::Domain;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Classification carried by every reported failure.
///
/// Only `InvalidInput` and `Internal` end a run in `Failed`; every other kind
/// degrades the report instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    Scorer,
    ModelUnavailable,
    SynthesisParse,
    ServiceTimeout,
    ServiceFailure,
    Internal,
}

impl ErrorKind {
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::InvalidInput | ErrorKind::Internal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidInput => "InvalidInputError",
            ErrorKind::Scorer => "ScorerError",
            ErrorKind::ModelUnavailable => "ModelUnavailableError",
            ErrorKind::SynthesisParse => "SynthesisParseError",
            ErrorKind::ServiceTimeout => "ServiceTimeoutError",
            ErrorKind::ServiceFailure => "ServiceFailure",
            ErrorKind::Internal => "InternalError",
        };
        f.write_str(name)
    }
}

/// The recording cannot be analyzed at all. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum InvalidInputError {
    #[error("no recording was provided")]
    EmptyReference,
    #[error("recording not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("recording is not a regular file: {}", .0.display())]
    NotAFile(PathBuf),
    #[error("recording is empty: {}", .0.display())]
    EmptyFile(PathBuf),
    #[error("could not read {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("recording could not be decoded: {}: {reason}", .path.display())]
    Undecodable { path: PathBuf, reason: String },
}

impl InvalidInputError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

/// A failure confined to one scoring domain.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScorerError {
    #[error("no {0} stream is available for this recording")]
    StreamUnavailable(Domain),
    #[error("{domain} scorer was handed a {received} stream")]
    WrongStream { domain: Domain, received: Domain },
    #[error("not enough {domain} data to score: {detail}")]
    InsufficientData { domain: Domain, detail: String },
    #[error("{domain} scorer panicked: {detail}")]
    Panicked { domain: Domain, detail: String },
}

impl ScorerError {
    pub fn domain(&self) -> Domain {
        match self {
            ScorerError::StreamUnavailable(domain) => *domain,
            ScorerError::WrongStream { domain, .. }
            | ScorerError::InsufficientData { domain, .. }
            | ScorerError::Panicked { domain, .. } => *domain,
        }
    }

    pub fn insufficient(domain: Domain, detail: impl Into<String>) -> Self {
        ScorerError::InsufficientData {
            domain,
            detail: detail.into(),
        }
    }
}

/// Why no feedback record was produced. Never aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("generative model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("model response did not match the feedback schema: {reason}")]
    Parse { reason: String, raw: String },
    #[error("model did not respond within {}s", .0.as_secs_f32())]
    Timeout(Duration),
    #[error("feedback service request failed: {0}")]
    Service(String),
}

impl SynthesisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SynthesisError::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            SynthesisError::Parse { .. } => ErrorKind::SynthesisParse,
            SynthesisError::Timeout(_) => ErrorKind::ServiceTimeout,
            SynthesisError::Service(_) => ErrorKind::ServiceFailure,
        }
    }

    /// The untouched model text, when the model answered at all.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            SynthesisError::Parse { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

/// Errors raised by a media decoder while probing or extracting streams.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with code {code}: {stderr}")]
    CommandFailed {
        tool: String,
        code: i32,
        stderr: String,
    },
    #[error("failed reading {tool} output: {source}")]
    Read {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unexpected decoder output: {0}")]
    Malformed(String),
    #[error("recording has no {0} stream")]
    MissingStream(Domain),
}
