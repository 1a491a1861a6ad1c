//! Completion futures for channels.

use futures::{channel::oneshot, Future};
use pin_project::pin_project;
use std::{
    cell::RefCell,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use crate::{chunk::Chunk, error::StreamError, readable::Readable, writable::Writable};

type Outcome = Result<(), StreamError>;

/// Resolves once a channel completed successfully, that is a readable channel
/// emitted `end` or a writable channel emitted `finish`.
///
/// Fails with the channel error, or with [StreamError::PrematureClose] if the
/// channel closed without completing.
#[pin_project]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Finished {
    #[pin]
    rx: oneshot::Receiver<Outcome>,
}

impl std::fmt::Debug for Finished {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Finished").finish()
    }
}

impl Future for Finished {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        match self.project().rx.poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(StreamError::PrematureClose)),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct SettleState {
    tx: Option<oneshot::Sender<Outcome>>,
    detach: Option<Box<dyn FnOnce()>>,
}

/// Settles the future at most once and then removes the remaining listeners.
#[derive(Clone)]
struct Settle(Rc<RefCell<SettleState>>);

impl Settle {
    fn new() -> (Self, Finished) {
        let (tx, rx) = oneshot::channel();
        (Self(Rc::new(RefCell::new(SettleState { tx: Some(tx), detach: None }))), Finished { rx })
    }

    fn on_settled(&self, detach: impl FnOnce() + 'static) {
        self.0.borrow_mut().detach = Some(Box::new(detach));
    }

    fn send(&self, outcome: Outcome) {
        let (tx, detach) = {
            let mut st = self.0.borrow_mut();
            (st.tx.take(), st.detach.take())
        };
        if let Some(tx) = tx {
            let _ = tx.send(outcome);
        }
        if let Some(detach) = detach {
            detach();
        }
    }
}

impl<T: Chunk> Readable<T> {
    /// Returns a future that resolves once `end` was emitted.
    pub fn finished(&self) -> Finished {
        let (settle, finished) = Settle::new();

        if self.is_ended() {
            settle.send(Ok(()));
        } else if let Some(err) = self.errored() {
            settle.send(Err(err));
        } else if self.is_destroyed() {
            settle.send(Err(StreamError::PrematureClose));
        } else {
            let s = settle.clone();
            let end = self.once_end(move || s.send(Ok(())));
            let s = settle.clone();
            let error = self.once_error(move |err| s.send(Err(err.clone())));
            let s = settle.clone();
            let close = self.once_close(move || s.send(Err(StreamError::PrematureClose)));

            let weak = self.downgrade();
            settle.on_settled(move || {
                if let Some(this) = weak.upgrade() {
                    for id in [end, error, close] {
                        this.off(id);
                    }
                }
            });
        }

        finished
    }
}

impl<T: Chunk> Writable<T> {
    /// Returns a future that resolves once `finish` was emitted.
    pub fn finished(&self) -> Finished {
        let (settle, finished) = Settle::new();

        if self.is_finished() {
            settle.send(Ok(()));
        } else if let Some(err) = self.errored() {
            settle.send(Err(err));
        } else if self.is_destroyed() {
            settle.send(Err(StreamError::PrematureClose));
        } else {
            let s = settle.clone();
            let finish = self.once_finish(move || s.send(Ok(())));
            let s = settle.clone();
            let error = self.once_error(move |err| s.send(Err(err.clone())));
            let s = settle.clone();
            let close = self.once_close(move || s.send(Err(StreamError::PrematureClose)));

            let weak = self.downgrade();
            settle.on_settled(move || {
                if let Some(this) = weak.upgrade() {
                    for id in [finish, error, close] {
                        this.off(id);
                    }
                }
            });
        }

        finished
    }
}
