//! Stream errors.

use std::{error::Error, fmt};

/// A call was made that the current channel state does not allow.
///
/// Protocol violations indicate a programming error and are reported
/// synchronously by the offending call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolViolation {
    /// `push` after the end-of-data marker was pushed.
    PushAfterEof,
    /// `push` after the channel was destroyed.
    PushAfterDestroy,
    /// `unshift` after the `end` notification was emitted.
    UnshiftAfterEnd,
    /// `write` after `end` was called.
    WriteAfterEnd,
    /// `write` after the channel was destroyed.
    WriteAfterDestroy,
    /// `end` after the channel was destroyed.
    EndAfterDestroy,
    /// `end` after the channel already finished.
    AlreadyFinished,
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::PushAfterEof => write!(f, "push after end of data"),
            Self::PushAfterDestroy => write!(f, "push after destroy"),
            Self::UnshiftAfterEnd => write!(f, "unshift after end event"),
            Self::WriteAfterEnd => write!(f, "write after end"),
            Self::WriteAfterDestroy => write!(f, "write after destroy"),
            Self::EndAfterDestroy => write!(f, "end after destroy"),
            Self::AlreadyFinished => write!(f, "end after finish"),
        }
    }
}

/// An error raised by or delivered to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The upstream source failed.
    Producer(String),
    /// The downstream sink failed.
    Consumer(String),
    /// An operation was invoked in a state that forbids it.
    Protocol(ProtocolViolation),
    /// An invalid state transition was requested.
    State(String),
    /// The operation was aborted because the channel was destroyed.
    Destroyed,
    /// The channel closed before it ended or finished.
    PrematureClose,
}

impl StreamError {
    /// Wraps a failure of an upstream source.
    pub fn producer(err: impl fmt::Display) -> Self {
        Self::Producer(err.to_string())
    }

    /// Wraps a failure of a downstream sink.
    pub fn consumer(err: impl fmt::Display) -> Self {
        Self::Consumer(err.to_string())
    }

    /// Returns true, if the error is a protocol violation.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Returns true, if the error reports an aborted operation on a destroyed channel.
    pub fn is_destroyed(&self) -> bool {
        matches!(self, Self::Destroyed | Self::Protocol(ProtocolViolation::WriteAfterDestroy))
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Producer(err) => write!(f, "producer error: {}", err),
            Self::Consumer(err) => write!(f, "consumer error: {}", err),
            Self::Protocol(violation) => write!(f, "protocol violation: {}", violation),
            Self::State(err) => write!(f, "invalid state: {}", err),
            Self::Destroyed => write!(f, "channel destroyed"),
            Self::PrematureClose => write!(f, "premature close"),
        }
    }
}

impl Error for StreamError {}

impl From<ProtocolViolation> for StreamError {
    fn from(violation: ProtocolViolation) -> Self {
        Self::Protocol(violation)
    }
}

impl From<StreamError> for std::io::Error {
    fn from(err: StreamError) -> Self {
        use std::io::ErrorKind;
        match err {
            StreamError::Producer(_) => Self::new(ErrorKind::Other, err.to_string()),
            StreamError::Consumer(_) => Self::new(ErrorKind::Other, err.to_string()),
            StreamError::Protocol(_) => Self::new(ErrorKind::InvalidInput, err.to_string()),
            StreamError::State(_) => Self::new(ErrorKind::InvalidInput, err.to_string()),
            StreamError::Destroyed => Self::new(ErrorKind::BrokenPipe, err.to_string()),
            StreamError::PrematureClose => Self::new(ErrorKind::UnexpectedEof, err.to_string()),
        }
    }
}
