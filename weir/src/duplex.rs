//! Channels that are both readable and writable.

use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use crate::{
    cfg::{Cfg, DuplexCfg},
    chunk::Chunk,
    error::StreamError,
    event::{Emitter, ListenerId},
    pipe::{PipeDestination, PipeOpts},
    readable::{Readable, Source},
    sched::{ChannelId, Scheduler},
    writable::{Sink, Writable},
};

#[derive(Debug, Default)]
struct DuplexState {
    read_ended: bool,
    write_finished: bool,
    readable_closed: bool,
    writable_closed: bool,
    error_emitted: bool,
    close_emitted: bool,
}

struct Inner<R, W> {
    readable: Readable<R>,
    writable: Writable<W>,
    allow_half_open: bool,
    auto_destroy: bool,
    state: RefCell<DuplexState>,
    error: Emitter<StreamError>,
    close: Emitter<()>,
}

/// A readable and a writable channel sharing one identity.
///
/// Both sides keep their own state machines. The duplex emits `error` once for
/// the first error of either side and `close` once after both sides closed.
///
/// Unless half-open operation is allowed, ending the readable side ends the
/// writable side and destroying either side destroys the other.
///
/// Cloning yields another handle to the same channel.
pub struct Duplex<R, W = R> {
    inner: Rc<Inner<R, W>>,
}

impl<R, W> Clone for Duplex<R, W> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<R: Chunk, W: Chunk> fmt::Debug for Duplex<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Duplex")
            .field("readable", &self.inner.readable)
            .field("writable", &self.inner.writable)
            .field("allow_half_open", &self.inner.allow_half_open)
            .finish()
    }
}

impl<R: Chunk, W: Chunk> Duplex<R, W> {
    /// Creates a duplex channel from a source for the readable side and a sink for
    /// the writable side.
    ///
    /// # Panics
    /// Panics if the configuration is invalid.
    pub fn new(
        sched: &Scheduler, cfg: impl Into<DuplexCfg>, source: impl Source<R>, sink: impl Sink<W>,
    ) -> Self {
        Self::from_parts(sched, cfg.into(), Box::new(source), Box::new(sink))
    }

    pub(crate) fn from_parts(
        sched: &Scheduler, cfg: DuplexCfg, source: Box<dyn Source<R>>, sink: Box<dyn Sink<W>>,
    ) -> Self {
        let id = sched.next_channel_id();
        let auto_destroy = cfg.readable.auto_destroy && cfg.writable.auto_destroy;

        // Termination of the whole channel is decided here, not by the sides.
        let side = |cfg: Cfg| Cfg { auto_destroy: false, emit_close: true, ..cfg };
        let readable = Readable::build(sched, id, side(cfg.readable), source);
        let writable = Writable::build(sched, id, side(cfg.writable), sink);

        let inner = Rc::new(Inner {
            readable,
            writable,
            allow_half_open: cfg.allow_half_open,
            auto_destroy,
            state: RefCell::new(DuplexState::default()),
            error: Emitter::new(sched.listener_ids()),
            close: Emitter::new(sched.listener_ids()),
        });
        Self::link(&inner);

        tracing::trace!(channel = %id, allow_half_open = cfg.allow_half_open, "duplex created");
        Self { inner }
    }

    fn link(inner: &Rc<Inner<R, W>>) {
        let weak = Rc::downgrade(inner);
        inner.readable.on_end(move || with(&weak, Self::readable_ended));

        let weak = Rc::downgrade(inner);
        inner.writable.on_finish(move || with(&weak, Self::writable_finished));

        let weak = Rc::downgrade(inner);
        inner.readable.on_error(move |err| with(&weak, |inner| Self::side_failed(inner, err)));

        let weak = Rc::downgrade(inner);
        inner.writable.on_error(move |err| with(&weak, |inner| Self::side_failed(inner, err)));

        let weak = Rc::downgrade(inner);
        inner.readable.on_close(move || with(&weak, |inner| Self::side_closed(inner, true)));

        let weak = Rc::downgrade(inner);
        inner.writable.on_close(move || with(&weak, |inner| Self::side_closed(inner, false)));
    }

    fn readable_ended(inner: &Rc<Inner<R, W>>) {
        inner.state.borrow_mut().read_ended = true;

        if !inner.allow_half_open && !inner.writable.is_ending() && !inner.writable.is_destroyed() {
            let writable = inner.writable.clone();
            inner.readable.scheduler().post(move || {
                if let Err(err) = writable.end() {
                    tracing::debug!(channel = %writable.id(), %err, "ending writable side failed");
                }
            });
        }
        Self::maybe_destroy(inner);
    }

    fn writable_finished(inner: &Rc<Inner<R, W>>) {
        inner.state.borrow_mut().write_finished = true;
        Self::maybe_destroy(inner);
    }

    fn maybe_destroy(inner: &Rc<Inner<R, W>>) {
        let done = {
            let st = inner.state.borrow();
            (st.read_ended || inner.readable.is_destroyed()) && (st.write_finished || inner.writable.is_destroyed())
        };
        if done && inner.auto_destroy {
            inner.readable.destroy(None);
            inner.writable.destroy(None);
        }
    }

    fn side_failed(inner: &Rc<Inner<R, W>>, err: &StreamError) {
        let emit = {
            let mut st = inner.state.borrow_mut();
            !std::mem::replace(&mut st.error_emitted, true)
        };
        if emit {
            inner.error.emit(err);
        }

        if !inner.allow_half_open {
            inner.readable.destroy(Some(err.clone()));
            inner.writable.destroy(Some(err.clone()));
        }
    }

    fn side_closed(inner: &Rc<Inner<R, W>>, readable: bool) {
        let close = {
            let mut st = inner.state.borrow_mut();
            if readable {
                st.readable_closed = true;
            } else {
                st.writable_closed = true;
            }
            let close = st.readable_closed && st.writable_closed && !st.close_emitted;
            if close {
                st.close_emitted = true;
            }
            close
        };

        if !inner.allow_half_open {
            inner.readable.destroy(None);
            inner.writable.destroy(None);
        } else {
            Self::maybe_destroy(inner);
        }

        if close {
            tracing::trace!(channel = %inner.readable.id(), "duplex closed");
            inner.close.emit(&());
        }
    }

    /// Channel id shared by both sides.
    pub fn id(&self) -> ChannelId {
        self.inner.readable.id()
    }

    /// The readable side.
    pub fn readable(&self) -> &Readable<R> {
        &self.inner.readable
    }

    /// The writable side.
    pub fn writable(&self) -> &Writable<W> {
        &self.inner.writable
    }

    /// Whether one side may stay open after the other ended.
    pub fn allow_half_open(&self) -> bool {
        self.inner.allow_half_open
    }

    /// Pushes a chunk into the readable side.
    pub fn push(&self, chunk: R) -> Result<bool, StreamError> {
        self.inner.readable.push(chunk)
    }

    /// Signals the end of data on the readable side.
    pub fn push_eof(&self) -> Result<(), StreamError> {
        self.inner.readable.push_eof()
    }

    /// Pulls from the readable side.
    pub fn read(&self, n: Option<usize>) -> Option<R> {
        self.inner.readable.read(n)
    }

    /// Writes a chunk to the writable side.
    pub fn write(&self, chunk: W) -> Result<bool, StreamError> {
        self.inner.writable.write(chunk)
    }

    /// Ends the writable side.
    pub fn end(&self) -> Result<(), StreamError> {
        self.inner.writable.end()
    }

    /// Pipes the readable side into the specified destination.
    pub fn pipe<D: PipeDestination<R>>(&self, dest: &D) -> D
    where
        R: Clone,
    {
        self.inner.readable.pipe(dest)
    }

    /// Pipes the readable side into the specified destination with the specified options.
    pub fn pipe_with<D: PipeDestination<R>>(&self, dest: &D, opts: PipeOpts) -> D
    where
        R: Clone,
    {
        self.inner.readable.pipe_with(dest, opts)
    }

    /// Destroys the channel.
    ///
    /// If half-open operation is allowed and exactly one side was already
    /// half-closed, only that side is destroyed and the other continues.
    /// Otherwise, including when one side was already destroyed, both sides are destroyed.
    pub fn destroy(&self, err: Option<StreamError>) {
        let readable = &self.inner.readable;
        let writable = &self.inner.writable;
        let untouched = !readable.is_destroyed() && !writable.is_destroyed();
        let read_closed = readable.is_eof();
        let write_closed = writable.is_ending();

        if self.inner.allow_half_open && untouched && read_closed != write_closed {
            tracing::debug!(channel = %self.id(), read_closed, write_closed, "destroying half-closed side");
            if read_closed {
                readable.destroy(err);
            } else {
                writable.destroy(err);
            }
        } else {
            readable.destroy(err.clone());
            writable.destroy(err);
        }
    }

    /// True, if both sides were destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.inner.readable.is_destroyed() && self.inner.writable.is_destroyed()
    }

    /// True, if `close` was emitted.
    pub fn is_closed(&self) -> bool {
        self.inner.state.borrow().close_emitted
    }

    /// Registers an `error` listener, notified once for the first error of either side.
    pub fn on_error(&self, f: impl FnMut(&StreamError) + 'static) -> ListenerId {
        self.inner.error.on(f)
    }

    /// Registers a `close` listener, notified once after both sides closed.
    pub fn on_close(&self, mut f: impl FnMut() + 'static) -> ListenerId {
        self.inner.close.on(move |()| f())
    }

    /// Removes a listener registered on the duplex or on either side.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.error.off(id)
            || self.inner.close.off(id)
            || self.inner.readable.off(id)
            || self.inner.writable.off(id)
    }
}

impl<R: Chunk, W: Chunk> PipeDestination<W> for Duplex<R, W> {
    fn target(&self) -> Writable<W> {
        self.inner.writable.clone()
    }
}

fn with<R, W>(weak: &Weak<Inner<R, W>>, f: impl FnOnce(&Rc<Inner<R, W>>)) {
    if let Some(inner) = weak.upgrade() {
        f(&inner)
    }
}
