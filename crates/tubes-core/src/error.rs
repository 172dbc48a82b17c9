//! Error taxonomy for tubes.
//!
//! [`Error`] is the value reported to the error sink and delivered to
//! clients. The thiserror enums below it cover misuse of the Rust API.

use crate::context::Context;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use tubes_protocol::ErrorPayload;

/// Kind of a channel error, with its stable numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An inbound message could not be parsed.
    InvalidMessage,
    /// An inbound message had an unknown type.
    UnknownType,
    /// No channel pattern matches the path.
    UnknownChannel,
    /// The client holds no subscription at the path.
    ClientNotSubscribed,
    /// An error notification could not be delivered to a client.
    SendingErrorFailed,
    /// A message could not be delivered to a client.
    SendingMessageFailed,
    /// Aggregate of several errors.
    MultipleErrors,
    /// Application-defined code, e.g. from a subscription middleware.
    Custom(i32),
}

impl ErrorKind {
    /// Get the numeric code of this kind.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            ErrorKind::InvalidMessage => 0,
            ErrorKind::UnknownType => 1,
            ErrorKind::UnknownChannel => 2,
            ErrorKind::ClientNotSubscribed => 3,
            ErrorKind::SendingErrorFailed => 4,
            ErrorKind::SendingMessageFailed => 5,
            ErrorKind::MultipleErrors => 6,
            ErrorKind::Custom(code) => code,
        }
    }

    /// Map a numeric code back to its kind.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => ErrorKind::InvalidMessage,
            1 => ErrorKind::UnknownType,
            2 => ErrorKind::UnknownChannel,
            3 => ErrorKind::ClientNotSubscribed,
            4 => ErrorKind::SendingErrorFailed,
            5 => ErrorKind::SendingMessageFailed,
            6 => ErrorKind::MultipleErrors,
            other => ErrorKind::Custom(other),
        }
    }

    /// Short label, suitable for logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidMessage => "invalid_message",
            ErrorKind::UnknownType => "unknown_type",
            ErrorKind::UnknownChannel => "unknown_channel",
            ErrorKind::ClientNotSubscribed => "client_not_subscribed",
            ErrorKind::SendingErrorFailed => "sending_error_failed",
            ErrorKind::SendingMessageFailed => "sending_message_failed",
            ErrorKind::MultipleErrors => "multiple_errors",
            ErrorKind::Custom(_) => "custom",
        }
    }
}

type Source = Arc<dyn std::error::Error + Send + Sync>;

/// A channel error.
///
/// Errors are immutable values: the builder methods consume and return them.
/// Only the code, description and nested errors reach the wire; the
/// underlying source and the originating context stay server-side.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    description: String,
    errors: Vec<Error>,
    source: Option<Source>,
    context: Option<Arc<Context>>,
}

impl Error {
    /// Create a new error.
    #[must_use]
    pub fn new(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            errors: Vec::new(),
            source: None,
            context: None,
        }
    }

    /// Create an error with an application-defined code.
    #[must_use]
    pub fn custom(code: i32, description: impl Into<String>) -> Self {
        Self::new(ErrorKind::from_code(code), description)
    }

    /// Create an aggregate error wrapping several child errors.
    #[must_use]
    pub fn multiple(description: impl Into<String>, errors: Vec<Error>) -> Self {
        Self {
            errors,
            ..Self::new(ErrorKind::MultipleErrors, description)
        }
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Attach the context the error originated from.
    #[must_use]
    pub fn with_context(mut self, context: Arc<Context>) -> Self {
        self.context = Some(context);
        self
    }

    /// Get the error kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the numeric error code.
    #[must_use]
    pub fn code(&self) -> i32 {
        self.kind.code()
    }

    /// Get the description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Get the nested errors of an aggregate.
    #[must_use]
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Get the originating context, if any.
    #[must_use]
    pub fn context(&self) -> Option<&Arc<Context>> {
        self.context.as_ref()
    }

    /// Convert to the wire representation.
    #[must_use]
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code(),
            description: self.description.clone(),
            errors: self.errors.iter().map(Error::to_payload).collect(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.description, self.code())?;
        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn std::error::Error + 'static))
    }
}

/// Process-wide callback receiving every asynchronously detected error.
pub type ErrorSink = Arc<dyn Fn(Error) + Send + Sync>;

/// Build an error sink that logs every error.
#[must_use]
pub fn tracing_sink() -> ErrorSink {
    Arc::new(|error: Error| {
        let path = error.context().map(|context| context.path().to_string());
        warn!(
            code = error.code(),
            kind = error.kind().as_str(),
            path = ?path,
            error = %error,
            "Channel error"
        );
    })
}

/// A required property was not set on a client or context.
///
/// This signals a programming error at the call site and is never routed to
/// the error sink.
#[derive(Debug, Clone, Error)]
#[error("Required property '{key}' is not set")]
pub struct MissingProperty {
    /// The missing key.
    pub key: String,
}

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// No channel is registered under the exact pattern.
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),
}
