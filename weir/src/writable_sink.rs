//! Feeding a writable channel from an asynchronous sink.

use futures::Sink;
use std::{
    cell::{Cell, RefCell},
    fmt,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

use crate::{
    chunk::Chunk,
    error::{ProtocolViolation, StreamError},
    event::ListenerId,
    writable::Writable,
};

#[derive(Default)]
struct Shared {
    waker: RefCell<Option<Waker>>,
    outstanding: Cell<usize>,
    failed: RefCell<Option<StreamError>>,
    closed: RefCell<Option<Result<(), StreamError>>>,
}

impl Shared {
    fn register(&self, cx: &Context) {
        *self.waker.borrow_mut() = Some(cx.waker().clone());
    }

    fn wake(&self) {
        if let Some(waker) = self.waker.borrow_mut().take() {
            waker.wake();
        }
    }
}

/// A writable channel fed through the [Sink] trait.
///
/// Readiness follows the channel's backpressure: after a write returned false
/// the sink is not ready until `drain` is emitted.
/// Flushing waits until all chunks sent through this sink were processed, and
/// closing ends the channel and waits for `finish`.
pub struct WritableSink<T: Chunk> {
    writable: Writable<T>,
    shared: Rc<Shared>,
    listeners: Vec<ListenerId>,
    closing: bool,
}

impl<T: Chunk> fmt::Debug for WritableSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WritableSink")
            .field("writable", &self.writable)
            .field("outstanding", &self.shared.outstanding.get())
            .finish()
    }
}

impl<T: Chunk> Writable<T> {
    /// Feeds the channel through an asynchronous sink.
    ///
    /// The sink must be driven from a future running within
    /// [Scheduler::run_until](crate::Scheduler::run_until).
    pub fn sink(&self) -> WritableSink<T> {
        let shared = Rc::new(Shared::default());
        let listeners = vec![
            self.on_drain({
                let shared = shared.clone();
                move || shared.wake()
            }),
            self.on_error({
                let shared = shared.clone();
                move |_| shared.wake()
            }),
            self.on_close({
                let shared = shared.clone();
                move || shared.wake()
            }),
        ];
        WritableSink { writable: self.clone(), shared, listeners, closing: false }
    }
}

impl<T: Chunk> WritableSink<T> {
    /// The underlying channel.
    pub fn writable(&self) -> &Writable<T> {
        &self.writable
    }

    fn check(&self) -> Result<(), StreamError> {
        if let Some(err) = self.shared.failed.borrow().clone() {
            return Err(err);
        }
        if let Some(err) = self.writable.errored() {
            return Err(err);
        }
        if self.writable.is_destroyed() && !self.writable.is_finished() {
            return Err(StreamError::Destroyed);
        }
        Ok(())
    }
}

impl<T: Chunk> Sink<T> for WritableSink<T> {
    type Error = StreamError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        this.check()?;
        if this.writable.need_drain() {
            this.shared.register(cx);
            return Poll::Pending;
        }
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: T) -> Result<(), Self::Error> {
        let this = self.get_mut();
        let shared = this.shared.clone();
        shared.outstanding.set(shared.outstanding.get() + 1);

        let result = this.writable.write_with(item, {
            let shared = shared.clone();
            move |res| {
                shared.outstanding.set(shared.outstanding.get() - 1);
                if let Err(err) = res {
                    shared.failed.borrow_mut().get_or_insert(err);
                }
                shared.wake();
            }
        });

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                shared.outstanding.set(shared.outstanding.get() - 1);
                Err(err)
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        this.check()?;
        if this.shared.outstanding.get() > 0 {
            this.shared.register(cx);
            return Poll::Pending;
        }
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();

        if !this.closing {
            this.closing = true;
            let shared = this.shared.clone();
            let result = this.writable.end_and_then(None, move |res| {
                *shared.closed.borrow_mut() = Some(res);
                shared.wake();
            });
            match result {
                Ok(()) => (),
                Err(StreamError::Protocol(ProtocolViolation::AlreadyFinished)) => return Poll::Ready(Ok(())),
                Err(err) => return Poll::Ready(Err(err)),
            }
        }

        let closed = this.shared.closed.borrow_mut().take();
        match closed {
            Some(res) => Poll::Ready(res),
            None => {
                this.shared.register(cx);
                Poll::Pending
            }
        }
    }
}

impl<T: Chunk> Drop for WritableSink<T> {
    fn drop(&mut self) {
        for id in self.listeners.drain(..) {
            self.writable.off(id);
        }
    }
}
