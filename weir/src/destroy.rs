//! Teardown protocol shared by all channels.
//!
//! Destroying a channel marks it destroyed immediately, runs its teardown
//! routine exactly once and, on the turn after teardown completed, emits the
//! recorded error (if any) followed by exactly one `close` notification.

use crate::{cfg::Cfg, done::Done, error::StreamError, sched::ChannelId, sched::Scheduler};

/// Terminal bookkeeping of one channel.
#[derive(Debug, Clone, Default)]
pub(crate) struct Lifecycle {
    pub destroyed: bool,
    pub torn_down: bool,
    pub errored: Option<StreamError>,
    pub error_emitted: bool,
    pub close_emitted: bool,
    pub emit_close: bool,
    pub auto_destroy: bool,
}

impl Lifecycle {
    pub fn new(cfg: &Cfg) -> Self {
        Self { emit_close: cfg.emit_close, auto_destroy: cfg.auto_destroy, ..Default::default() }
    }

    /// Records the first error; later errors are dropped.
    ///
    /// Returns whether the error was recorded.
    pub fn record_error(&mut self, err: StreamError) -> bool {
        if self.errored.is_some() {
            return false;
        }
        self.errored = Some(err);
        true
    }

    /// No notification other than `error` and `close` may follow.
    pub fn is_terminal(&self) -> bool {
        self.destroyed || self.close_emitted
    }
}

/// A channel handle that can be destroyed.
pub(crate) trait Terminal: Clone + 'static {
    fn id(&self) -> ChannelId;

    fn scheduler(&self) -> Scheduler;

    /// Accesses the lifecycle.
    ///
    /// Must not be called while the channel state is borrowed.
    fn with_lifecycle<R>(&self, f: impl FnOnce(&mut Lifecycle) -> R) -> R;

    /// Releases buffered data and the underlying resource.
    ///
    /// `done` must be completed exactly once, possibly on a later turn.
    fn teardown(&self, err: Option<StreamError>, done: Done);

    fn emit_error(&self, err: &StreamError);

    fn emit_close(&self);
}

/// Destroys the channel, optionally recording an error.
///
/// Returns false if the channel was already destroyed; in that case a
/// second error is dropped.
pub(crate) fn destroy<C: Terminal>(chan: &C, err: Option<StreamError>) -> bool {
    let first = chan.with_lifecycle(|lc| {
        if lc.destroyed {
            return false;
        }
        if let Some(err) = err.clone() {
            lc.record_error(err);
        }
        lc.destroyed = true;
        true
    });

    if !first {
        if let Some(err) = err {
            tracing::debug!(channel = %chan.id(), %err, "channel already destroyed, error dropped");
        }
        return false;
    }

    let errored = chan.with_lifecycle(|lc| lc.errored.clone());
    tracing::debug!(channel = %chan.id(), error = ?errored, "destroying channel");

    let this = chan.clone();
    chan.teardown(errored, Done::new(move |res| torn_down(&this, res)));
    true
}

fn torn_down<C: Terminal>(chan: &C, res: Result<(), StreamError>) {
    let first = chan.with_lifecycle(|lc| {
        if lc.torn_down {
            return false;
        }
        if let Err(err) = res {
            lc.record_error(err);
        }
        lc.torn_down = true;
        true
    });
    if !first {
        return;
    }

    let chan = chan.clone();
    chan.scheduler().clone().post(move || emit_error_and_close(&chan));
}

fn emit_error_and_close<C: Terminal>(chan: &C) {
    let (err, close) = chan.with_lifecycle(|lc| {
        let err = match &lc.errored {
            Some(err) if !lc.error_emitted => {
                lc.error_emitted = true;
                Some(err.clone())
            }
            _ => None,
        };
        let close = !lc.close_emitted;
        lc.close_emitted = true;
        (err, close && lc.emit_close)
    });

    if let Some(err) = err {
        tracing::debug!(channel = %chan.id(), %err, "channel failed");
        chan.emit_error(&err);
    }
    if close {
        tracing::trace!(channel = %chan.id(), "channel closed");
        chan.emit_close();
    }
}
