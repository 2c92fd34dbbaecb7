//! Crate level errors.
//!
//! Every negotiation component returns [`Error`]. The variants fall into four
//! classes (see [`ErrorClass`]), and each class maps to exactly one
//! [`Disposition`] telling the event handler what to do with the triggering
//! event:
//!
//! | Class | Examples | Disposition |
//! |-------|----------|-------------|
//! | NotReady | relation not joined, key not published yet | `Defer` |
//! | ConfigurationConflict | TLS on peers only, partial Kerberos options | `Block` |
//! | ProtocolData | empty listener template, malformed JSON | `Fail` |
//! | ExternalTool | `keytool` exit status, I/O failure | `Fail` |
//!
//! Protocol components never swallow [`Error::NotReady`]; they propagate it
//! so the caller can defer the event and retry on the next one.

use std::{io, result};
use thiserror::Error as ThisError;

pub type Result<T> = result::Result<T, Error>;

/// Errors raised by the negotiation protocol and its collaborators.
#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
pub enum Error {
    /// Required relation data is not visible yet.
    #[error("Not ready: {0}")]
    NotReady(String),

    /// A peer published a certificate but this unit has none.
    #[error("TLS detected on the relation {relation} but not on this unit")]
    TlsNotLocallyConfigured { relation: String },

    /// A configuration option required by the selected feature is unset.
    #[error("Missing configuration option: {0}")]
    MissingConfig(String),

    /// The operator selected a SASL protocol this library cannot configure.
    #[error("Unsupported sasl-protocol '{0}'")]
    UnsupportedSaslProtocol(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An empty listener template was handed to the resolver.
    #[error("Empty listener template provided")]
    EmptyTemplate,

    /// Relation data that should hold JSON could not be decoded.
    #[error("Malformed payload under '{key}': {reason}")]
    MalformedPayload { key: String, reason: String },

    /// App-scoped data written by a unit that is not the leader.
    #[error("Unit {0} is not the leader of its application")]
    NotLeader(String),

    /// An external tool (openssl, keytool) failed.
    #[error("{tool} failed ({status}): {stderr}")]
    Tool {
        tool: String,
        status: String,
        stderr: String,
    },

    /// Filesystem or process I/O failed.
    #[error("IO error: {0:?}: {1}")]
    Io(io::ErrorKind, String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotReady,
    ConfigurationConflict,
    ProtocolData,
    ExternalTool,
}

/// What the top-level event handler should do with a failed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Re-enqueue the event and retry when more data is visible.
    Defer,
    /// Surface the message to the operator; do not retry automatically.
    Block(String),
    /// Fail the handler loudly.
    Fail(String),
}

impl Error {
    /// Convenience constructor for [`Error::NotReady`].
    pub fn not_ready(what: impl Into<String>) -> Self {
        Error::NotReady(what.into())
    }

    /// Convenience constructor for [`Error::MalformedPayload`].
    pub fn malformed(key: impl Into<String>, reason: impl ToString) -> Self {
        Error::MalformedPayload {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Error::NotReady(_) => ErrorClass::NotReady,
            Error::TlsNotLocallyConfigured { .. }
            | Error::MissingConfig(_)
            | Error::UnsupportedSaslProtocol(_)
            | Error::Config(_) => ErrorClass::ConfigurationConflict,
            Error::EmptyTemplate | Error::MalformedPayload { .. } | Error::NotLeader(_) => {
                ErrorClass::ProtocolData
            }
            Error::Tool { .. } | Error::Io(..) => ErrorClass::ExternalTool,
        }
    }

    /// Returns true if retrying on a later event may succeed.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::NotReady
    }

    pub fn disposition(&self) -> Disposition {
        match self.class() {
            ErrorClass::NotReady => Disposition::Defer,
            ErrorClass::ConfigurationConflict => Disposition::Block(self.to_string()),
            ErrorClass::ProtocolData | ErrorClass::ExternalTool => {
                Disposition::Fail(self.to_string())
            }
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.kind(), e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::MalformedPayload {
            key: String::new(),
            reason: e.to_string(),
        }
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        let io_err: io::Error = e.into();
        io_err.into()
    }
}
