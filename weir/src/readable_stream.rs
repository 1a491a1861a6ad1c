//! Consuming a readable channel as an asynchronous stream.

use futures::Stream;
use std::{
    cell::RefCell,
    fmt,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

use crate::{chunk::Chunk, error::StreamError, event::ListenerId, readable::Readable};

#[derive(Default)]
struct Wake(RefCell<Option<Waker>>);

impl Wake {
    fn register(&self, cx: &Context) {
        *self.0.borrow_mut() = Some(cx.waker().clone());
    }

    fn wake(&self) {
        if let Some(waker) = self.0.borrow_mut().take() {
            waker.wake();
        }
    }
}

/// A readable channel consumed as a [Stream] of chunks.
///
/// The channel is switched into paused mode and data is pulled as the stream
/// is polled. The stream ends after the channel emitted `end`.
/// If the channel fails, its error is returned once and the stream ends.
/// If it is destroyed before reaching the end, [StreamError::PrematureClose] is returned.
pub struct ReadableStream<T: Chunk> {
    readable: Readable<T>,
    wake: Rc<Wake>,
    listeners: Vec<ListenerId>,
    done: bool,
}

impl<T: Chunk> fmt::Debug for ReadableStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ReadableStream").field("readable", &self.readable).field("done", &self.done).finish()
    }
}

impl<T: Chunk> Readable<T> {
    /// Consumes the channel as an asynchronous stream.
    ///
    /// The stream must be polled from a future driven by
    /// [Scheduler::run_until](crate::Scheduler::run_until).
    pub fn stream(&self) -> ReadableStream<T> {
        let wake = Rc::new(Wake::default());
        let listeners = vec![
            self.on_readable({
                let wake = wake.clone();
                move || wake.wake()
            }),
            self.on_end({
                let wake = wake.clone();
                move || wake.wake()
            }),
            self.on_error({
                let wake = wake.clone();
                move |_| wake.wake()
            }),
            self.on_close({
                let wake = wake.clone();
                move || wake.wake()
            }),
        ];
        ReadableStream { readable: self.clone(), wake, listeners, done: false }
    }
}

impl<T: Chunk> ReadableStream<T> {
    /// The underlying channel.
    pub fn readable(&self) -> &Readable<T> {
        &self.readable
    }
}

impl<T: Chunk> Stream for ReadableStream<T> {
    type Item = Result<T, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        if let Some(err) = this.readable.errored() {
            this.done = true;
            return Poll::Ready(Some(Err(err)));
        }

        if let Some(chunk) = this.readable.read(None) {
            return Poll::Ready(Some(Ok(chunk)));
        }

        if this.readable.is_ended() {
            this.done = true;
            return Poll::Ready(None);
        }

        if this.readable.is_destroyed() {
            this.done = true;
            return Poll::Ready(Some(Err(StreamError::PrematureClose)));
        }

        this.wake.register(cx);
        Poll::Pending
    }
}

impl<T: Chunk> Drop for ReadableStream<T> {
    fn drop(&mut self) {
        for id in self.listeners.drain(..) {
            self.readable.off(id);
        }
    }
}
