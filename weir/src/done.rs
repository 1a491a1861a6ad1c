//! Completion handles handed to sources and sinks.

use std::fmt;

use crate::error::StreamError;

type Callback = Box<dyn FnOnce(Result<(), StreamError>)>;

/// Completes one operation handed to a sink or a teardown routine.
///
/// Consuming the handle reports the result, so an operation can be completed
/// at most once. The handle may be stored and completed on a later turn.
#[must_use = "the operation stalls until the completion handle is used"]
pub struct Done {
    callback: Option<Callback>,
}

impl fmt::Debug for Done {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Done").field("pending", &self.callback.is_some()).finish()
    }
}

impl Done {
    /// Creates a completion handle invoking the specified function.
    pub fn new(f: impl FnOnce(Result<(), StreamError>) + 'static) -> Self {
        Self { callback: Some(Box::new(f)) }
    }

    /// Creates a completion handle that ignores the result.
    pub fn noop() -> Self {
        Self { callback: None }
    }

    /// Reports success.
    pub fn ok(self) {
        self.complete(Ok(()))
    }

    /// Reports failure.
    pub fn fail(self, err: StreamError) {
        self.complete(Err(err))
    }

    /// Reports the result of the operation.
    pub fn complete(mut self, result: Result<(), StreamError>) {
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }
}
