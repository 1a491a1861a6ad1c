//! Writable channels.

use std::{
    cell::RefCell,
    fmt, mem,
    rc::{Rc, Weak},
};

use crate::{
    buffer::ChunkBuffer,
    cfg::Cfg,
    chunk::{units, Chunk},
    destroy::{self, Lifecycle, Terminal},
    done::Done,
    error::{ProtocolViolation, StreamError},
    event::{Emitter, ListenerId, ListenerIds},
    sched::{ChannelId, Scheduler},
};

/// Consumer draining a writable channel.
///
/// At most one write operation is outstanding at any time; the next one is
/// issued after the previous [Done] handle was completed.
pub trait Sink<T>: 'static {
    /// Writes one chunk.
    fn write(&mut self, chunk: T, done: Done);

    /// Whether [write_batch](Self::write_batch) is implemented.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Writes several buffered chunks at once.
    ///
    /// Only called when [supports_batch](Self::supports_batch) returns true.
    fn write_batch(&mut self, chunks: Vec<T>, done: Done) {
        let _ = chunks;
        done.fail(StreamError::State("batched writes are not supported by this sink".into()))
    }

    /// Flushes the sink after all chunks were written and [Writable::end] was called.
    fn finalize(&mut self, done: Done) {
        done.ok()
    }

    /// Releases the underlying resource after the channel was destroyed.
    fn teardown(&mut self, err: Option<&StreamError>, done: Done) {
        let _ = err;
        done.ok()
    }
}

/// A sink that invokes a closure for every chunk.
pub struct FnSink<F>(pub F);

impl<F> fmt::Debug for FnSink<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FnSink").finish()
    }
}

impl<T, F> Sink<T> for FnSink<F>
where
    F: FnMut(T, Done) + 'static,
{
    fn write(&mut self, chunk: T, done: Done) {
        (self.0)(chunk, done)
    }
}

/// Observable state of a writable channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WritableState {
    /// Accepting writes.
    Writable,
    /// Accepting writes, but holding them back until uncorked.
    Corked,
    /// [end](Writable::end) was called; buffered writes are being flushed.
    Finishing,
    /// All writes were flushed and the sink was finalized.
    Finished,
    /// The channel was destroyed without an error.
    Destroyed,
    /// The channel was destroyed because of an error.
    Errored,
}

type Callback = Box<dyn FnOnce(Result<(), StreamError>)>;

enum Job<T> {
    Single(T),
    Batch(Vec<T>),
}

struct WriteState<T> {
    buffer: ChunkBuffer<T, Option<Callback>>,
    length: usize,
    high_water_mark: usize,
    batch: bool,
    corked: usize,
    writing: bool,
    write_len: usize,
    write_count: usize,
    write_callbacks: Vec<Callback>,
    write_gen: u64,
    sync: bool,
    sink_busy: bool,
    pumping: bool,
    pending_callbacks: usize,
    need_drain: bool,
    ending: bool,
    final_called: bool,
    prefinished: bool,
    finish_scheduled: bool,
    finished: bool,
    finish_callbacks: Vec<Callback>,
    lifecycle: Lifecycle,
}

impl<T: Chunk> WriteState<T> {
    fn start_write(&mut self, len: usize, count: usize, callbacks: Vec<Callback>) -> u64 {
        self.writing = true;
        self.sync = true;
        self.write_len = len;
        self.write_count = count;
        self.write_callbacks = callbacks;
        self.write_gen += 1;
        self.write_gen
    }

    fn need_finish(&self) -> bool {
        self.ending
            && !self.lifecycle.destroyed
            && self.lifecycle.errored.is_none()
            && !self.finished
            && !self.writing
            && self.buffer.is_empty()
            && self.length == 0
    }
}

struct Events {
    drain: Emitter<()>,
    finish: Emitter<()>,
    error: Emitter<StreamError>,
    close: Emitter<()>,
}

impl Events {
    fn new(ids: &ListenerIds) -> Self {
        Self { drain: Emitter::new(ids), finish: Emitter::new(ids), error: Emitter::new(ids), close: Emitter::new(ids) }
    }
}

struct Inner<T> {
    id: ChannelId,
    sched: Scheduler,
    state: RefCell<WriteState<T>>,
    sink: RefCell<Box<dyn Sink<T>>>,
    events: Events,
}

/// The producer-facing side of a flow-controlled channel.
///
/// Written chunks are handed to the [Sink] one at a time, or in batches after
/// [uncork](Self::uncork) when the sink supports it. Chunks written while the sink
/// is busy are buffered; once the buffered length reaches the high-water mark
/// [write](Self::write) returns false and a single `drain` notification follows
/// when the buffer has been flushed completely.
///
/// Cloning yields another handle to the same channel.
pub struct Writable<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for Writable<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> PartialEq for Writable<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for Writable<T> {}

impl<T: Chunk> fmt::Debug for Writable<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Writable")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("length", &self.len())
            .finish()
    }
}

pub(crate) struct WeakWritable<T>(Weak<Inner<T>>);

impl<T> Clone for WeakWritable<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> WeakWritable<T> {
    pub fn upgrade(&self) -> Option<Writable<T>> {
        self.0.upgrade().map(|inner| Writable { inner })
    }
}

impl<T: Chunk> Writable<T> {
    /// Creates a writable channel draining into the specified sink.
    ///
    /// # Panics
    /// Panics if the configuration is invalid.
    pub fn new(sched: &Scheduler, cfg: Cfg, sink: impl Sink<T>) -> Self {
        Self::build(sched, sched.next_channel_id(), cfg, Box::new(sink))
    }

    pub(crate) fn build(sched: &Scheduler, id: ChannelId, cfg: Cfg, sink: Box<dyn Sink<T>>) -> Self {
        cfg.check();

        let state = WriteState {
            buffer: ChunkBuffer::new(cfg.object_mode),
            length: 0,
            high_water_mark: cfg.effective_high_water_mark(),
            batch: sink.supports_batch(),
            corked: 0,
            writing: false,
            write_len: 0,
            write_count: 0,
            write_callbacks: Vec::new(),
            write_gen: 0,
            sync: true,
            sink_busy: false,
            pumping: false,
            pending_callbacks: 0,
            need_drain: false,
            ending: false,
            final_called: false,
            prefinished: false,
            finish_scheduled: false,
            finished: false,
            finish_callbacks: Vec::new(),
            lifecycle: Lifecycle::new(&cfg),
        };

        tracing::trace!(channel = %id, high_water_mark = state.high_water_mark, batch = state.batch, "writable created");

        Self {
            inner: Rc::new(Inner {
                id,
                sched: sched.clone(),
                state: RefCell::new(state),
                sink: RefCell::new(sink),
                events: Events::new(sched.listener_ids()),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakWritable<T> {
        WeakWritable(Rc::downgrade(&self.inner))
    }

    /// Channel id.
    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    /// Scheduler driving this channel.
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.sched
    }

    /// Writes a chunk.
    ///
    /// Returns false if the caller should stop writing until `drain` is emitted.
    /// The chunk is accepted either way.
    ///
    /// Fails with a protocol violation after [end](Self::end) or after the channel
    /// was destroyed.
    pub fn write(&self, chunk: T) -> Result<bool, StreamError> {
        self.write_inner(chunk, None)
    }

    /// Writes a chunk and invokes the callback once the sink has processed it.
    ///
    /// If the write is rejected the callback is not invoked.
    pub fn write_with(
        &self, chunk: T, callback: impl FnOnce(Result<(), StreamError>) + 'static,
    ) -> Result<bool, StreamError> {
        self.write_inner(chunk, Some(Box::new(callback)))
    }

    fn write_inner(&self, chunk: T, callback: Option<Callback>) -> Result<bool, StreamError> {
        let mut st = self.inner.state.borrow_mut();
        if st.lifecycle.destroyed {
            return Err(ProtocolViolation::WriteAfterDestroy.into());
        }
        if st.ending {
            return Err(ProtocolViolation::WriteAfterEnd.into());
        }

        let len = st.buffer.units_of(&chunk);
        st.length += len;
        st.pending_callbacks += 1;

        let ret = st.length < st.high_water_mark || st.length == 0;
        if !ret {
            st.need_drain = true;
        }

        let direct = !st.writing
            && !st.sink_busy
            && st.corked == 0
            && st.buffer.is_empty()
            && st.lifecycle.errored.is_none();
        if direct {
            let gen = st.start_write(len, 1, callback.into_iter().collect());
            drop(st);
            self.do_write(Job::Single(chunk), gen);
            st = self.inner.state.borrow_mut();
        } else {
            st.buffer.push_back_with(chunk, callback);
        }

        Ok(ret && !st.lifecycle.destroyed && st.lifecycle.errored.is_none())
    }

    fn do_write(&self, job: Job<T>, gen: u64) {
        let this = self.downgrade();
        let done = Done::new(move |res| {
            if let Some(this) = this.upgrade() {
                this.on_write(gen, res);
            }
        });

        self.inner.state.borrow_mut().sink_busy = true;
        match self.inner.sink.try_borrow_mut() {
            Ok(mut sink) => match job {
                Job::Single(chunk) => sink.write(chunk, done),
                Job::Batch(chunks) => {
                    tracing::trace!(channel = %self.inner.id, chunks = chunks.len(), "writing batch");
                    sink.write_batch(chunks, done)
                }
            },
            Err(_) => done.fail(StreamError::State("sink re-entered while busy".into())),
        }

        let idle = {
            let mut st = self.inner.state.borrow_mut();
            st.sink_busy = false;
            st.sync = false;
            !st.writing
        };
        if idle {
            self.pump();
        }
    }

    fn on_write(&self, gen: u64, res: Result<(), StreamError>) {
        let (sync, count, callbacks) = {
            let mut st = self.inner.state.borrow_mut();
            if gen != st.write_gen || !st.writing {
                tracing::debug!(channel = %self.inner.id, "write completed after channel was destroyed, ignored");
                return;
            }
            let callbacks = mem::take(&mut st.write_callbacks);
            st.writing = false;
            st.length -= st.write_len;
            st.write_len = 0;
            let count = mem::take(&mut st.write_count);
            (st.sync, count, callbacks)
        };

        match res {
            Err(err) => {
                tracing::debug!(channel = %self.inner.id, %err, "sink write failed");
                let this = self.clone();
                let fail = move || this.on_write_error(count, callbacks, err);
                if sync {
                    self.inner.sched.post(fail);
                } else {
                    fail();
                }
            }
            Ok(()) => {
                if sync {
                    let this = self.clone();
                    self.inner.sched.post(move || this.after_write(count, callbacks));
                } else {
                    self.pump();
                    self.after_write(count, callbacks);
                }
            }
        }
    }

    fn on_write_error(&self, count: usize, callbacks: Vec<Callback>, err: StreamError) {
        {
            let mut st = self.inner.state.borrow_mut();
            st.pending_callbacks = st.pending_callbacks.saturating_sub(count);
        }
        for callback in callbacks {
            callback(Err(err.clone()));
        }
        destroy::destroy(self, Some(err));
    }

    fn after_write(&self, count: usize, callbacks: Vec<Callback>) {
        let drain = {
            let mut st = self.inner.state.borrow_mut();
            let drain = !st.ending && !st.lifecycle.destroyed && st.length == 0 && st.need_drain;
            if drain {
                st.need_drain = false;
            }
            st.pending_callbacks = st.pending_callbacks.saturating_sub(count);
            drain
        };

        if drain {
            tracing::trace!(channel = %self.inner.id, "drained");
            self.inner.events.drain.emit(&());
        }

        for callback in callbacks {
            callback(Ok(()));
        }

        self.finish_maybe();
    }

    /// Hands buffered chunks to the sink while it is idle.
    fn pump(&self) {
        {
            let mut st = self.inner.state.borrow_mut();
            if st.pumping {
                return;
            }
            st.pumping = true;
        }

        loop {
            let (job, gen) = {
                let mut st = self.inner.state.borrow_mut();
                if st.writing
                    || st.sink_busy
                    || st.corked > 0
                    || st.lifecycle.destroyed
                    || st.lifecycle.errored.is_some()
                    || st.buffer.is_empty()
                {
                    break;
                }

                if st.batch && st.buffer.chunk_count() > 1 {
                    let object_mode = st.buffer.is_object_mode();
                    let entries = st.buffer.drain_all();
                    let count = entries.len();
                    let mut len = 0;
                    let mut chunks = Vec::with_capacity(count);
                    let mut callbacks = Vec::new();
                    for (chunk, callback) in entries {
                        len += units(&chunk, object_mode);
                        chunks.push(chunk);
                        callbacks.extend(callback);
                    }
                    let gen = st.start_write(len, count, callbacks);
                    (Job::Batch(chunks), gen)
                } else {
                    let Some((chunk, callback)) = st.buffer.pop_front_with() else { break };
                    let len = st.buffer.units_of(&chunk);
                    let gen = st.start_write(len, 1, callback.into_iter().collect());
                    (Job::Single(chunk), gen)
                }
            };
            self.do_write(job, gen);
        }

        self.inner.state.borrow_mut().pumping = false;
    }

    fn finish_maybe(&self) {
        enum Step {
            Idle,
            Finalize,
            Finish,
        }

        let step = {
            let mut st = self.inner.state.borrow_mut();
            if !st.need_finish() {
                Step::Idle
            } else if !st.final_called {
                st.final_called = true;
                st.pending_callbacks += 1;
                Step::Finalize
            } else if st.prefinished && st.pending_callbacks == 0 && !st.finish_scheduled {
                st.finish_scheduled = true;
                Step::Finish
            } else {
                Step::Idle
            }
        };

        match step {
            Step::Idle => (),
            Step::Finalize => self.call_finalize(),
            Step::Finish => {
                let this = self.clone();
                self.inner.sched.post(move || this.finish_now());
            }
        }
    }

    fn call_finalize(&self) {
        let this = self.downgrade();
        let done = Done::new(move |res| {
            if let Some(this) = this.upgrade() {
                this.on_finalized(res);
            }
        });

        match self.inner.sink.try_borrow_mut() {
            Ok(mut sink) => {
                tracing::trace!(channel = %self.inner.id, "finalizing sink");
                sink.finalize(done);
            }
            Err(_) => {
                drop(done);
                self.inner.state.borrow_mut().final_called = false;
                self.inner.state.borrow_mut().pending_callbacks -= 1;
                let this = self.clone();
                self.inner.sched.post(move || this.finish_maybe());
            }
        }
    }

    fn on_finalized(&self, res: Result<(), StreamError>) {
        {
            let mut st = self.inner.state.borrow_mut();
            st.pending_callbacks = st.pending_callbacks.saturating_sub(1);
        }

        match res {
            Err(err) => {
                tracing::debug!(channel = %self.inner.id, %err, "finalizing sink failed");
                let callbacks = mem::take(&mut self.inner.state.borrow_mut().finish_callbacks);
                for callback in callbacks {
                    callback(Err(err.clone()));
                }
                destroy::destroy(self, Some(err));
            }
            Ok(()) => {
                {
                    let mut st = self.inner.state.borrow_mut();
                    if st.need_finish() {
                        st.prefinished = true;
                    }
                }
                self.finish_maybe();
            }
        }
    }

    fn finish_now(&self) {
        let (callbacks, auto_destroy) = {
            let mut st = self.inner.state.borrow_mut();
            st.finish_scheduled = false;
            if !st.need_finish() || st.pending_callbacks != 0 {
                return;
            }
            st.finished = true;
            (mem::take(&mut st.finish_callbacks), st.lifecycle.auto_destroy)
        };

        tracing::debug!(channel = %self.inner.id, "writable finished");
        for callback in callbacks {
            callback(Ok(()));
        }
        self.inner.events.finish.emit(&());

        if auto_destroy {
            destroy::destroy(self, None);
        }
    }

    /// Signals that no more chunks will be written.
    ///
    /// Buffered chunks are flushed, the sink is finalized and `finish` is emitted.
    /// Ending an already ending channel has no effect.
    pub fn end(&self) -> Result<(), StreamError> {
        self.end_inner(None, None)
    }

    /// Writes a final chunk and signals that no more chunks will be written.
    pub fn end_with(&self, chunk: T) -> Result<(), StreamError> {
        self.end_inner(Some(chunk), None)
    }

    /// Signals the end, optionally writing a final chunk, and invokes the callback
    /// once the channel finished or failed.
    ///
    /// If the call is rejected the callback is not invoked.
    pub fn end_and_then(
        &self, chunk: Option<T>, callback: impl FnOnce(Result<(), StreamError>) + 'static,
    ) -> Result<(), StreamError> {
        self.end_inner(chunk, Some(Box::new(callback)))
    }

    fn end_inner(&self, chunk: Option<T>, callback: Option<Callback>) -> Result<(), StreamError> {
        if let Some(chunk) = chunk {
            self.write_inner(chunk, None)?;
        }

        let uncork = {
            let mut st = self.inner.state.borrow_mut();
            if st.corked > 0 {
                st.corked = 1;
                true
            } else {
                false
            }
        };
        if uncork {
            self.uncork();
        }

        let first = {
            let mut st = self.inner.state.borrow_mut();
            if st.finished {
                return Err(ProtocolViolation::AlreadyFinished.into());
            }
            if st.lifecycle.destroyed {
                return Err(ProtocolViolation::EndAfterDestroy.into());
            }
            if let Some(callback) = callback {
                st.finish_callbacks.push(callback);
            }
            !mem::replace(&mut st.ending, true)
        };

        if first {
            tracing::trace!(channel = %self.inner.id, "ending");
            self.finish_maybe();
        }
        Ok(())
    }

    /// Holds back writes so that they can be handed to the sink as one batch.
    ///
    /// Corking nests; every call must be matched by [uncork](Self::uncork).
    pub fn cork(&self) {
        self.inner.state.borrow_mut().corked += 1;
    }

    /// Reverts one [cork](Self::cork) call and flushes once fully uncorked.
    pub fn uncork(&self) {
        let pump = {
            let mut st = self.inner.state.borrow_mut();
            if st.corked == 0 {
                return;
            }
            st.corked -= 1;
            st.corked == 0 && !st.writing
        };
        if pump {
            self.pump();
        }
    }

    /// Current nesting depth of [cork](Self::cork).
    pub fn corked(&self) -> usize {
        self.inner.state.borrow().corked
    }

    /// Destroys the channel.
    ///
    /// Buffered chunks are discarded and their callbacks fail with
    /// [StreamError::Destroyed]; the sink is torn down.
    /// On the next turn the error, if any, is emitted followed by `close`.
    /// Destroying an already destroyed channel has no effect.
    pub fn destroy(&self, err: Option<StreamError>) {
        destroy::destroy(self, err);
    }

    /// Current state.
    pub fn state(&self) -> WritableState {
        let st = self.inner.state.borrow();
        if st.lifecycle.errored.is_some() {
            WritableState::Errored
        } else if st.finished {
            WritableState::Finished
        } else if st.lifecycle.destroyed {
            WritableState::Destroyed
        } else if st.ending {
            WritableState::Finishing
        } else if st.corked > 0 {
            WritableState::Corked
        } else {
            WritableState::Writable
        }
    }

    /// Buffered length in units, including the chunks currently being written.
    pub fn len(&self) -> usize {
        self.inner.state.borrow().length
    }

    /// True, if nothing is buffered or being written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured high-water mark.
    pub fn high_water_mark(&self) -> usize {
        self.inner.state.borrow().high_water_mark
    }

    /// Whether every chunk counts as one unit.
    pub fn is_object_mode(&self) -> bool {
        self.inner.state.borrow().buffer.is_object_mode()
    }

    /// True, if a write returned false and `drain` is still pending.
    pub fn need_drain(&self) -> bool {
        self.inner.state.borrow().need_drain
    }

    /// True, if writes are currently accepted.
    pub fn is_writable(&self) -> bool {
        let st = self.inner.state.borrow();
        !st.lifecycle.destroyed && !st.ending && st.lifecycle.errored.is_none()
    }

    /// True, if [end](Self::end) was called.
    pub fn is_ending(&self) -> bool {
        self.inner.state.borrow().ending
    }

    /// True, if `finish` was emitted.
    pub fn is_finished(&self) -> bool {
        self.inner.state.borrow().finished
    }

    /// True, if the channel was destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.borrow().lifecycle.destroyed
    }

    /// True, if `close` was emitted.
    pub fn is_closed(&self) -> bool {
        self.inner.state.borrow().lifecycle.close_emitted
    }

    /// The error the channel was destroyed with.
    pub fn errored(&self) -> Option<StreamError> {
        self.inner.state.borrow().lifecycle.errored.clone()
    }

    /// Registers a `drain` listener, notified when the buffer was flushed after
    /// a write returned false.
    pub fn on_drain(&self, mut f: impl FnMut() + 'static) -> ListenerId {
        self.inner.events.drain.on(move |()| f())
    }

    /// Registers a `finish` listener, notified once all writes were flushed after
    /// [end](Self::end).
    pub fn on_finish(&self, mut f: impl FnMut() + 'static) -> ListenerId {
        self.inner.events.finish.on(move |()| f())
    }

    /// Registers an `error` listener.
    pub fn on_error(&self, f: impl FnMut(&StreamError) + 'static) -> ListenerId {
        self.inner.events.error.on(f)
    }

    /// Registers a `close` listener, notified once after the channel was destroyed.
    pub fn on_close(&self, mut f: impl FnMut() + 'static) -> ListenerId {
        self.inner.events.close.on(move |()| f())
    }

    pub(crate) fn once_finish(&self, mut f: impl FnMut() + 'static) -> ListenerId {
        self.inner.events.finish.once(move |()| f())
    }

    pub(crate) fn once_error(&self, f: impl FnMut(&StreamError) + 'static) -> ListenerId {
        self.inner.events.error.once(f)
    }

    pub(crate) fn once_close(&self, mut f: impl FnMut() + 'static) -> ListenerId {
        self.inner.events.close.once(move |()| f())
    }

    /// Removes a listener.
    ///
    /// Returns whether it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let events = &self.inner.events;
        events.drain.off(id) || events.finish.off(id) || events.error.off(id) || events.close.off(id)
    }

    /// Number of registered listeners of all notifications.
    pub fn listener_count(&self) -> usize {
        let events = &self.inner.events;
        events.drain.count() + events.finish.count() + events.error.count() + events.close.count()
    }

    fn teardown_sink(&self, err: Option<StreamError>, done: Done) {
        match self.inner.sink.try_borrow_mut() {
            Ok(mut sink) => sink.teardown(err.as_ref(), done),
            Err(_) => {
                let this = self.clone();
                self.inner.sched.post(move || this.teardown_sink(err, done));
            }
        }
    }
}

impl<T: Chunk> Terminal for Writable<T> {
    fn id(&self) -> ChannelId {
        self.inner.id
    }

    fn scheduler(&self) -> Scheduler {
        self.inner.sched.clone()
    }

    fn with_lifecycle<R>(&self, f: impl FnOnce(&mut Lifecycle) -> R) -> R {
        f(&mut self.inner.state.borrow_mut().lifecycle)
    }

    fn teardown(&self, err: Option<StreamError>, done: Done) {
        let (aborted, finish_callbacks) = {
            let mut st = self.inner.state.borrow_mut();
            let mut aborted = mem::take(&mut st.write_callbacks);
            aborted.extend(st.buffer.drain_all().into_iter().filter_map(|(_, callback)| callback));
            st.writing = false;
            st.write_gen += 1;
            st.write_len = 0;
            st.write_count = 0;
            st.length = 0;
            st.pending_callbacks = 0;
            (aborted, mem::take(&mut st.finish_callbacks))
        };

        if !aborted.is_empty() || !finish_callbacks.is_empty() {
            tracing::trace!(channel = %self.inner.id, aborted = aborted.len(), "aborting pending writes");
            let end_err = err.clone().unwrap_or(StreamError::Destroyed);
            self.inner.sched.post(move || {
                for callback in aborted {
                    callback(Err(StreamError::Destroyed));
                }
                for callback in finish_callbacks {
                    callback(Err(end_err.clone()));
                }
            });
        }

        self.teardown_sink(err, done);
    }

    fn emit_error(&self, err: &StreamError) {
        self.inner.events.error.emit(err);
    }

    fn emit_close(&self) {
        self.inner.events.close.emit(&());
    }
}
