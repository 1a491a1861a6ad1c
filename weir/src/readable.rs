//! Readable channels.

use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use crate::{
    buffer::ChunkBuffer,
    cfg::{Cfg, Encoding, MAX_HIGH_WATER_MARK},
    chunk::Chunk,
    decoder::Decoder,
    destroy::{self, Lifecycle, Terminal},
    done::Done,
    error::{ProtocolViolation, StreamError},
    event::{Emitter, ListenerId, ListenerIds},
    pipe::{self, Coordinator, PipeDestination, PipeId, PipeOpts},
    sched::{ChannelId, Scheduler},
};

/// Producer feeding a readable channel.
///
/// The producer delivers data by calling [Readable::push] and signals the end
/// of data by calling [Readable::push_eof], either from within
/// [request_more](Self::request_more) or on its own schedule.
pub trait Source<T>: 'static {
    /// Requests that roughly `size` units are pushed.
    ///
    /// This is not called again until the source has pushed something.
    fn request_more(&mut self, size: usize, readable: &Readable<T>) {
        let _ = (size, readable);
    }

    /// Releases the underlying resource after the channel was destroyed.
    fn teardown(&mut self, err: Option<&StreamError>, done: Done) {
        let _ = err;
        done.ok()
    }
}

/// A source that ignores requests; the producer pushes on its own schedule.
#[derive(Debug, Default, Clone, Copy)]
pub struct PushSource;

impl<T> Source<T> for PushSource {}

/// A source that invokes a closure whenever more data is requested.
pub struct FnSource<F>(pub F);

impl<F> fmt::Debug for FnSource<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FnSource").finish()
    }
}

impl<T, F> Source<T> for FnSource<F>
where
    F: FnMut(usize, &Readable<T>) + 'static,
{
    fn request_more(&mut self, size: usize, readable: &Readable<T>) {
        (self.0)(size, readable)
    }
}

/// Observable state of a readable channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadableState {
    /// No consumer has attached yet.
    Initial,
    /// Data is delivered to `data` listeners as it becomes available.
    Flowing,
    /// Delivery is suspended; data can be pulled with [Readable::read].
    Paused,
    /// All data has been delivered and `end` was emitted.
    Ended,
    /// The channel was destroyed without an error.
    Destroyed,
    /// The channel was destroyed because of an error.
    Errored,
}

pub(crate) type SharedCoordinator<T> = Rc<RefCell<Coordinator<T>>>;

struct ReadState<T> {
    buffer: ChunkBuffer<T>,
    high_water_mark: usize,
    decoder: Option<Box<dyn Decoder<T>>>,
    encoding: Option<Encoding>,
    flowing: Option<bool>,
    paused_by_user: bool,
    ended: bool,
    end_emitted: bool,
    end_scheduled: bool,
    reading: bool,
    sync: bool,
    need_readable: bool,
    emitted_readable: bool,
    readable_scheduled: bool,
    readable_listening: bool,
    resume_scheduled: bool,
    reading_more: bool,
    flow_scheduled: bool,
    in_flow: bool,
    lifecycle: Lifecycle,
    pipe: Option<SharedCoordinator<T>>,
}

impl<T: Chunk> ReadState<T> {
    fn can_push_more(&self) -> bool {
        self.below_mark(self.buffer.len())
    }

    fn below_mark(&self, len: usize) -> bool {
        !self.ended && (len < self.high_water_mark || len == 0)
    }

    /// Number of units a read of `n` units may return right now.
    fn how_much_to_read(&self, n: Option<usize>) -> usize {
        let len = self.buffer.len();
        if n == Some(0) || (len == 0 && self.ended) {
            return 0;
        }
        if self.buffer.is_object_mode() {
            return 1;
        }
        match n {
            None if self.flowing == Some(true) && len > 0 => self.buffer.front().map(Chunk::size).unwrap_or(0),
            None => len,
            Some(n) if n <= len => n,
            Some(_) if self.ended => len,
            Some(_) => 0,
        }
    }
}

struct Events<T> {
    data: Emitter<T>,
    readable: Emitter<()>,
    end: Emitter<()>,
    pause: Emitter<()>,
    resume: Emitter<()>,
    error: Emitter<StreamError>,
    close: Emitter<()>,
}

impl<T> Events<T> {
    fn new(ids: &ListenerIds) -> Self {
        Self {
            data: Emitter::new(ids),
            readable: Emitter::new(ids),
            end: Emitter::new(ids),
            pause: Emitter::new(ids),
            resume: Emitter::new(ids),
            error: Emitter::new(ids),
            close: Emitter::new(ids),
        }
    }
}

struct Inner<T> {
    id: ChannelId,
    sched: Scheduler,
    state: RefCell<ReadState<T>>,
    source: RefCell<Box<dyn Source<T>>>,
    events: Events<T>,
}

/// The consumer-facing side of a flow-controlled channel.
///
/// A producer pushes chunks into the channel's buffer; a consumer receives them
/// either by attaching a `data` listener (flowing mode) or by pulling with
/// [read](Self::read) after a `readable` notification (paused mode).
/// Data and notifications are never delivered synchronously from within the call
/// that produced them, but on a later turn of the [Scheduler].
///
/// Cloning yields another handle to the same channel.
pub struct Readable<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for Readable<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Chunk> fmt::Debug for Readable<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Readable")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("length", &self.len())
            .finish()
    }
}

pub(crate) struct WeakReadable<T>(Weak<Inner<T>>);

impl<T> Clone for WeakReadable<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> WeakReadable<T> {
    pub fn upgrade(&self) -> Option<Readable<T>> {
        self.0.upgrade().map(|inner| Readable { inner })
    }
}

impl<T: Chunk> Readable<T> {
    /// Creates a readable channel fed by pushes from the producer.
    ///
    /// # Panics
    /// Panics if the configuration is invalid.
    pub fn new(sched: &Scheduler, cfg: Cfg) -> Self {
        Self::with_source(sched, cfg, PushSource)
    }

    /// Creates a readable channel that requests data from the specified source.
    ///
    /// # Panics
    /// Panics if the configuration is invalid.
    pub fn with_source(sched: &Scheduler, cfg: Cfg, source: impl Source<T>) -> Self {
        Self::build(sched, sched.next_channel_id(), cfg, Box::new(source))
    }

    pub(crate) fn build(sched: &Scheduler, id: ChannelId, cfg: Cfg, source: Box<dyn Source<T>>) -> Self {
        cfg.check();

        let decoder = cfg.encoding.and_then(|encoding| {
            let decoder = T::decoder(encoding);
            if decoder.is_none() {
                tracing::warn!(channel = %id, ?encoding, "payload type does not support decoding, encoding ignored");
            }
            decoder
        });

        let state = ReadState {
            buffer: ChunkBuffer::new(cfg.object_mode),
            high_water_mark: cfg.effective_high_water_mark(),
            encoding: if decoder.is_some() { cfg.encoding } else { None },
            decoder,
            flowing: None,
            paused_by_user: false,
            ended: false,
            end_emitted: false,
            end_scheduled: false,
            reading: false,
            sync: true,
            need_readable: false,
            emitted_readable: false,
            readable_scheduled: false,
            readable_listening: false,
            resume_scheduled: false,
            reading_more: false,
            flow_scheduled: false,
            in_flow: false,
            lifecycle: Lifecycle::new(&cfg),
            pipe: None,
        };

        tracing::trace!(channel = %id, high_water_mark = state.high_water_mark, object_mode = cfg.object_mode, "readable created");

        Self {
            inner: Rc::new(Inner {
                id,
                sched: sched.clone(),
                state: RefCell::new(state),
                source: RefCell::new(source),
                events: Events::new(sched.listener_ids()),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakReadable<T> {
        WeakReadable(Rc::downgrade(&self.inner))
    }

    /// Channel id.
    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    /// Scheduler driving this channel.
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.sched
    }

    /// Pushes a chunk produced by the source.
    ///
    /// The chunk is always buffered. The return value is a hint whether the
    /// producer may push more: it is false once the buffered length has reached
    /// the high-water mark or the end of data was signalled.
    /// While flowing to a `data` consumer, only the length buffered before this
    /// push is compared with the high-water mark.
    ///
    /// Fails with a protocol violation after [push_eof](Self::push_eof) or after
    /// the channel was destroyed.
    pub fn push(&self, chunk: T) -> Result<bool, StreamError> {
        self.add_chunk(chunk, false)
    }

    /// Returns a chunk to the front of the buffer.
    ///
    /// Allowed after [push_eof](Self::push_eof) as long as `end` was not yet emitted.
    pub fn unshift(&self, chunk: T) -> Result<bool, StreamError> {
        self.add_chunk(chunk, true)
    }

    fn add_chunk(&self, chunk: T, front: bool) -> Result<bool, StreamError> {
        let mut st = self.inner.state.borrow_mut();
        if st.lifecycle.destroyed {
            return Err(ProtocolViolation::PushAfterDestroy.into());
        }
        if front && st.end_emitted {
            return Err(ProtocolViolation::UnshiftAfterEnd.into());
        }
        if !front && st.ended {
            return Err(ProtocolViolation::PushAfterEof.into());
        }

        if !front {
            st.reading = false;
        }

        let chunk = match st.decoder.as_mut() {
            Some(decoder) if !front => decoder.write(chunk),
            _ => Some(chunk),
        };

        let before = st.buffer.len();
        let mut readable = false;
        let mut flow = false;
        if let Some(chunk) = chunk {
            if st.buffer.is_object_mode() || chunk.size() > 0 {
                if front {
                    st.buffer.push_front(chunk);
                } else {
                    st.buffer.push_back(chunk);
                }
                readable = st.need_readable;
                flow = st.flowing == Some(true);
            }
        }

        // A flowing consumer takes the chunk on the next turn, so only data
        // that was already waiting counts against the high-water mark.
        let consuming = st.flowing == Some(true) && self.inner.events.data.count() > 0;
        let more = if consuming { st.below_mark(before) } else { st.can_push_more() };
        drop(st);

        if readable {
            self.emit_readable();
        }
        if flow {
            self.schedule_flow();
        }
        self.maybe_read_more();

        Ok(more)
    }

    /// Signals the end of data.
    ///
    /// Buffered data is still delivered; `end` is emitted once the buffer has drained.
    /// Signalling the end again has no effect.
    pub fn push_eof(&self) -> Result<(), StreamError> {
        let mut st = self.inner.state.borrow_mut();
        if st.lifecycle.destroyed {
            return Err(ProtocolViolation::PushAfterDestroy.into());
        }
        st.reading = false;
        if st.ended {
            return Ok(());
        }

        if let Some(rest) = st.decoder.as_mut().and_then(|decoder| decoder.end()) {
            if rest.size() > 0 {
                st.buffer.push_back(rest);
            }
        }
        st.ended = true;
        tracing::trace!(channel = %self.inner.id, length = st.buffer.len(), "end of data");

        if st.sync {
            drop(st);
            self.emit_readable();
        } else {
            st.need_readable = false;
            st.emitted_readable = true;
            drop(st);
            self.schedule_readable();
        }
        Ok(())
    }

    /// Pulls up to `n` units from the buffer.
    ///
    /// With `None` all buffered data is returned, joined into one chunk in sized mode.
    /// In object mode one chunk is returned regardless of `n`.
    /// In sized mode `Some(n)` returns exactly `n` units, splitting and joining
    /// chunks as needed, or nothing if fewer are buffered and the end of data
    /// was not yet signalled.
    /// `Some(0)` only triggers a refill from the source.
    ///
    /// Requesting more than the high-water mark raises it, up to at most 1 GiB.
    pub fn read(&self, n: Option<usize>) -> Option<T> {
        let mut st = self.inner.state.borrow_mut();

        if let Some(n) = n {
            if n > st.high_water_mark {
                if n > MAX_HIGH_WATER_MARK {
                    tracing::warn!(channel = %self.inner.id, size = n, "read size exceeds 1 GiB, high-water mark clamped");
                }
                st.high_water_mark = compute_new_high_water_mark(n);
            }
        }
        if n != Some(0) {
            st.emitted_readable = false;
        }

        if n == Some(0) && st.need_readable {
            let len = st.buffer.len();
            let full = if st.high_water_mark != 0 { len >= st.high_water_mark } else { len > 0 };
            if full || st.ended {
                let end = len == 0 && st.ended;
                drop(st);
                if end {
                    self.end_readable();
                } else {
                    self.emit_readable();
                }
                return None;
            }
        }

        let mut amount = st.how_much_to_read(n);
        if amount == 0 && st.ended {
            let end = st.buffer.len() == 0;
            drop(st);
            if end {
                self.end_readable();
            }
            return None;
        }

        let len = st.buffer.len();
        let mut do_read = st.need_readable || len == 0 || len.saturating_sub(amount) < st.high_water_mark;
        if st.ended || st.reading || st.lifecycle.destroyed || st.lifecycle.errored.is_some() {
            do_read = false;
        }
        if do_read {
            st.reading = true;
            st.sync = true;
            if len == 0 {
                st.need_readable = true;
            }
            let size = st.high_water_mark;
            drop(st);

            let requested = self.request_more(size);

            st = self.inner.state.borrow_mut();
            st.sync = false;
            if !requested {
                st.reading = false;
            }
            if !st.reading {
                amount = st.how_much_to_read(n);
            }
        }

        let chunk = if amount > 0 { st.buffer.take(amount) } else { None };
        if chunk.is_none() {
            st.need_readable = st.buffer.len() <= st.high_water_mark;
            amount = 0;
        }

        let mut end = false;
        if st.buffer.len() == 0 {
            if !st.ended {
                st.need_readable = true;
            }
            end = n != Some(amount) && st.ended;
        }
        drop(st);

        if end {
            self.end_readable();
        }
        chunk
    }

    fn request_more(&self, size: usize) -> bool {
        match self.inner.source.try_borrow_mut() {
            Ok(mut source) => {
                source.request_more(size, self);
                true
            }
            Err(_) => {
                tracing::trace!(channel = %self.inner.id, "source busy, request skipped");
                false
            }
        }
    }

    fn emit_readable(&self) {
        let schedule = {
            let mut st = self.inner.state.borrow_mut();
            st.need_readable = false;
            if st.emitted_readable {
                false
            } else {
                st.emitted_readable = true;
                true
            }
        };
        if schedule {
            self.schedule_readable();
        }
    }

    fn schedule_readable(&self) {
        {
            let mut st = self.inner.state.borrow_mut();
            if st.readable_scheduled {
                return;
            }
            st.readable_scheduled = true;
        }
        let this = self.clone();
        self.inner.sched.post(move || this.emit_readable_now());
    }

    fn emit_readable_now(&self) {
        let fire = {
            let mut st = self.inner.state.borrow_mut();
            st.readable_scheduled = false;
            !st.lifecycle.is_terminal() && st.lifecycle.errored.is_none() && (st.buffer.len() > 0 || st.ended)
        };

        if fire {
            self.inner.events.readable.emit(&());
            self.inner.state.borrow_mut().emitted_readable = false;
        }

        {
            let mut st = self.inner.state.borrow_mut();
            st.need_readable = st.flowing != Some(true) && !st.ended && st.buffer.len() <= st.high_water_mark;
        }
        self.flow();
    }

    fn schedule_flow(&self) {
        {
            let mut st = self.inner.state.borrow_mut();
            if st.flow_scheduled {
                return;
            }
            st.flow_scheduled = true;
        }
        let this = self.clone();
        self.inner.sched.post(move || {
            this.inner.state.borrow_mut().flow_scheduled = false;
            this.flow();
        });
    }

    /// Delivers buffered chunks to `data` listeners while flowing.
    fn flow(&self) {
        {
            let mut st = self.inner.state.borrow_mut();
            if st.in_flow {
                return;
            }
            st.in_flow = true;
        }

        loop {
            {
                let st = self.inner.state.borrow();
                if st.flowing != Some(true) || st.lifecycle.is_terminal() {
                    break;
                }
            }
            match self.read(None) {
                Some(chunk) => {
                    self.inner.events.data.emit(&chunk);
                }
                None => break,
            }
        }

        self.inner.state.borrow_mut().in_flow = false;
    }

    fn end_readable(&self) {
        {
            let mut st = self.inner.state.borrow_mut();
            if st.end_emitted || st.end_scheduled {
                return;
            }
            st.ended = true;
            st.end_scheduled = true;
        }
        let this = self.clone();
        self.inner.sched.post(move || this.end_readable_now());
    }

    fn end_readable_now(&self) {
        let auto_destroy = {
            let mut st = self.inner.state.borrow_mut();
            st.end_scheduled = false;
            if st.end_emitted
                || st.lifecycle.is_terminal()
                || st.lifecycle.errored.is_some()
                || st.buffer.len() > 0
            {
                return;
            }
            st.end_emitted = true;
            st.lifecycle.auto_destroy
        };

        tracing::debug!(channel = %self.inner.id, "readable ended");
        self.inner.events.end.emit(&());

        if auto_destroy {
            destroy::destroy(self, None);
        }
    }

    fn maybe_read_more(&self) {
        {
            let mut st = self.inner.state.borrow_mut();
            if st.reading_more || st.ended || st.lifecycle.destroyed {
                return;
            }
            st.reading_more = true;
        }
        let this = self.clone();
        self.inner.sched.post(move || this.maybe_read_more_now());
    }

    /// Refills the buffer up to the high-water mark while the source keeps
    /// pushing synchronously.
    fn maybe_read_more_now(&self) {
        loop {
            let len = {
                let st = self.inner.state.borrow();
                let len = st.buffer.len();
                let wanted = len < st.high_water_mark || (st.flowing == Some(true) && len == 0);
                if st.reading || st.ended || st.lifecycle.destroyed || !wanted {
                    break;
                }
                len
            };
            self.read(Some(0));
            if self.inner.state.borrow().buffer.len() == len {
                break;
            }
        }
        self.inner.state.borrow_mut().reading_more = false;
    }

    /// Switches to flowing mode.
    ///
    /// Delivery starts on the next turn. Clears a previous explicit [pause](Self::pause).
    pub fn resume(&self) {
        self.resume_with(true)
    }

    pub(crate) fn resume_internal(&self) {
        self.resume_with(false)
    }

    fn resume_with(&self, by_user: bool) {
        let schedule = {
            let mut st = self.inner.state.borrow_mut();
            let mut schedule = false;
            if st.flowing != Some(true) {
                st.flowing = Some(!st.readable_listening);
                if !st.resume_scheduled {
                    st.resume_scheduled = true;
                    schedule = true;
                }
            }
            if by_user {
                st.paused_by_user = false;
            }
            schedule
        };

        if schedule {
            let this = self.clone();
            self.inner.sched.post(move || this.resume_now());
        }
    }

    fn resume_now(&self) {
        let reading = {
            let st = self.inner.state.borrow();
            if st.lifecycle.is_terminal() {
                drop(st);
                self.inner.state.borrow_mut().resume_scheduled = false;
                return;
            }
            st.reading
        };
        if !reading {
            self.read(Some(0));
        }

        self.inner.state.borrow_mut().resume_scheduled = false;
        self.inner.events.resume.emit(&());
        self.flow();

        let read_more = {
            let st = self.inner.state.borrow();
            st.flowing == Some(true) && !st.reading
        };
        if read_more {
            self.read(Some(0));
        }
    }

    /// Suspends delivery to `data` listeners.
    ///
    /// Data keeps accumulating in the buffer.
    pub fn pause(&self) {
        self.pause_with(true)
    }

    pub(crate) fn pause_internal(&self) {
        self.pause_with(false)
    }

    fn pause_with(&self, by_user: bool) {
        let emit = {
            let mut st = self.inner.state.borrow_mut();
            if by_user {
                st.paused_by_user = true;
            }
            if st.flowing != Some(false) {
                st.flowing = Some(false);
                !st.lifecycle.is_terminal()
            } else {
                false
            }
        };

        if emit {
            tracing::trace!(channel = %self.inner.id, by_user, "paused");
            self.inner.events.pause.emit(&());
        }
    }

    /// True, if delivery was suspended.
    pub fn is_paused(&self) -> bool {
        let st = self.inner.state.borrow();
        st.paused_by_user || st.flowing == Some(false)
    }

    pub(crate) fn is_paused_by_user(&self) -> bool {
        self.inner.state.borrow().paused_by_user
    }

    /// Whether the channel is flowing, paused, or neither decided yet.
    pub fn flowing(&self) -> Option<bool> {
        self.inner.state.borrow().flowing
    }

    /// Current state.
    pub fn state(&self) -> ReadableState {
        let st = self.inner.state.borrow();
        if st.lifecycle.errored.is_some() {
            ReadableState::Errored
        } else if st.lifecycle.destroyed {
            ReadableState::Destroyed
        } else if st.end_emitted {
            ReadableState::Ended
        } else {
            match st.flowing {
                None => ReadableState::Initial,
                Some(true) => ReadableState::Flowing,
                Some(false) => ReadableState::Paused,
            }
        }
    }

    /// Buffered length in units.
    pub fn len(&self) -> usize {
        self.inner.state.borrow().buffer.len()
    }

    /// True, if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current high-water mark.
    ///
    /// Reading more than the high-water mark at once raises it to the next power of two.
    pub fn high_water_mark(&self) -> usize {
        self.inner.state.borrow().high_water_mark
    }

    /// Whether every chunk counts as one unit.
    pub fn is_object_mode(&self) -> bool {
        self.inner.state.borrow().buffer.is_object_mode()
    }

    /// True, if the end of data was signalled.
    pub fn is_eof(&self) -> bool {
        self.inner.state.borrow().ended
    }

    /// True, if `end` was emitted.
    pub fn is_ended(&self) -> bool {
        self.inner.state.borrow().end_emitted
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

    /// Active text encoding.
    pub fn encoding(&self) -> Option<Encoding> {
        self.inner.state.borrow().encoding
    }

    /// Decodes pushed data as text with the specified encoding.
    ///
    /// Already buffered data is decoded, too.
    /// Returns false if the channel is in object mode or the payload type
    /// does not support decoding.
    pub fn set_encoding(&self, encoding: Encoding) -> bool {
        let mut st = self.inner.state.borrow_mut();
        if st.buffer.is_object_mode() {
            tracing::warn!(channel = %self.inner.id, "encoding cannot be used in object mode");
            return false;
        }
        let Some(mut decoder) = T::decoder(encoding) else {
            tracing::warn!(channel = %self.inner.id, ?encoding, "payload type does not support decoding");
            return false;
        };

        for (chunk, ()) in st.buffer.drain_all() {
            if let Some(chunk) = decoder.write(chunk) {
                if chunk.size() > 0 {
                    st.buffer.push_back(chunk);
                }
            }
        }
        st.decoder = Some(decoder);
        st.encoding = Some(encoding);
        true
    }

    /// Destroys the channel.
    ///
    /// Buffered data is discarded and the source is torn down.
    /// On the next turn the error, if any, is emitted followed by `close`.
    /// Destroying an already destroyed channel has no effect.
    pub fn destroy(&self, err: Option<StreamError>) {
        destroy::destroy(self, err);
    }

    /// Registers a `data` listener.
    ///
    /// Unless the channel was explicitly paused, this switches it into flowing mode.
    pub fn on_data(&self, f: impl FnMut(&T) + 'static) -> ListenerId {
        let id = self.inner.events.data.on(f);
        if self.inner.state.borrow().flowing != Some(false) {
            self.resume();
        }
        id
    }

    /// Registers a `data` listener without affecting the flowing mode.
    pub(crate) fn on_data_quiet(&self, f: impl FnMut(&T) + 'static) -> ListenerId {
        self.inner.events.data.on(f)
    }

    /// Registers a `readable` listener.
    ///
    /// This switches the channel into paused mode; the listener is notified
    /// when data can be pulled with [read](Self::read) or the end of data was reached.
    pub fn on_readable(&self, mut f: impl FnMut() + 'static) -> ListenerId {
        let id = self.inner.events.readable.on(move |()| f());

        let (emit, read) = {
            let mut st = self.inner.state.borrow_mut();
            if !st.end_emitted && !st.readable_listening {
                st.readable_listening = true;
                st.need_readable = true;
                st.flowing = Some(false);
                st.emitted_readable = false;
                if st.buffer.len() > 0 {
                    (true, false)
                } else {
                    (false, !st.reading)
                }
            } else {
                (false, false)
            }
        };

        if emit {
            self.emit_readable();
        } else if read {
            let this = self.clone();
            self.inner.sched.post(move || {
                this.read(Some(0));
            });
        }
        id
    }

    /// Registers an `end` listener, notified once all data was delivered.
    pub fn on_end(&self, mut f: impl FnMut() + 'static) -> ListenerId {
        self.inner.events.end.on(move |()| f())
    }

    /// Registers a `pause` listener.
    pub fn on_pause(&self, mut f: impl FnMut() + 'static) -> ListenerId {
        self.inner.events.pause.on(move |()| f())
    }

    /// Registers a `resume` listener.
    pub fn on_resume(&self, mut f: impl FnMut() + 'static) -> ListenerId {
        self.inner.events.resume.on(move |()| f())
    }

    /// Registers an `error` listener.
    pub fn on_error(&self, f: impl FnMut(&StreamError) + 'static) -> ListenerId {
        self.inner.events.error.on(f)
    }

    /// Registers a `close` listener, notified once after the channel was destroyed.
    pub fn on_close(&self, mut f: impl FnMut() + 'static) -> ListenerId {
        self.inner.events.close.on(move |()| f())
    }

    pub(crate) fn once_end(&self, mut f: impl FnMut() + 'static) -> ListenerId {
        self.inner.events.end.once(move |()| f())
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
        if events.data.off(id) {
            return true;
        }
        if events.readable.off(id) {
            let this = self.clone();
            self.inner.sched.post(move || this.update_readable_listening());
            return true;
        }
        events.end.off(id)
            || events.pause.off(id)
            || events.resume.off(id)
            || events.error.off(id)
            || events.close.off(id)
    }

    /// Number of registered listeners of all notifications.
    pub fn listener_count(&self) -> usize {
        let events = &self.inner.events;
        events.data.count()
            + events.readable.count()
            + events.end.count()
            + events.pause.count()
            + events.resume.count()
            + events.error.count()
            + events.close.count()
    }

    fn update_readable_listening(&self) {
        let resume = {
            let mut st = self.inner.state.borrow_mut();
            st.readable_listening = self.inner.events.readable.count() > 0;
            if st.resume_scheduled && !st.paused_by_user {
                st.flowing = Some(true);
                false
            } else if self.inner.events.data.count() > 0 {
                true
            } else {
                if !st.readable_listening {
                    st.flowing = None;
                }
                false
            }
        };
        if resume {
            self.resume();
        }
    }

    /// Forwards all data to the specified destination with flow control.
    ///
    /// The destination is ended when this channel ends.
    /// Returns the destination to allow chaining.
    pub fn pipe<D: PipeDestination<T>>(&self, dest: &D) -> D
    where
        T: Clone,
    {
        self.pipe_with(dest, PipeOpts::default())
    }

    /// Forwards all data to the specified destination with the specified options.
    pub fn pipe_with<D: PipeDestination<T>>(&self, dest: &D, opts: PipeOpts) -> D
    where
        T: Clone,
    {
        pipe::attach(self, dest.target(), opts);
        dest.clone()
    }

    /// Stops forwarding to the specified destination.
    ///
    /// Returns whether the destination was attached.
    pub fn unpipe<D: PipeDestination<T>>(&self, dest: &D) -> bool
    where
        T: Clone,
    {
        pipe::detach(self, &dest.target())
    }

    /// Stops forwarding to all destinations.
    pub fn unpipe_all(&self)
    where
        T: Clone,
    {
        pipe::detach_all(self)
    }

    /// Id of the pipe forwarding this channel's data, if any.
    pub fn pipe_id(&self) -> Option<PipeId> {
        self.pipe_slot().map(|coord| coord.borrow().id())
    }

    pub(crate) fn pipe_slot(&self) -> Option<SharedCoordinator<T>> {
        self.inner.state.borrow().pipe.clone()
    }

    pub(crate) fn set_pipe_slot(&self, coord: Option<SharedCoordinator<T>>) {
        let old = std::mem::replace(&mut self.inner.state.borrow_mut().pipe, coord);
        drop(old);
    }

    fn teardown_source(&self, err: Option<StreamError>, done: Done) {
        match self.inner.source.try_borrow_mut() {
            Ok(mut source) => source.teardown(err.as_ref(), done),
            Err(_) => {
                let this = self.clone();
                self.inner.sched.post(move || this.teardown_source(err, done));
            }
        }
    }
}

impl<T: Chunk> Terminal for Readable<T> {
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
        let discarded = self.inner.state.borrow_mut().buffer.drain_all();
        if !discarded.is_empty() {
            tracing::trace!(channel = %self.inner.id, chunks = discarded.len(), "discarding buffered data");
        }
        drop(discarded);
        self.teardown_source(err, done);
    }

    fn emit_error(&self, err: &StreamError) {
        self.inner.events.error.emit(err);
    }

    fn emit_close(&self) {
        self.inner.events.close.emit(&());
    }
}

/// Raises the high-water mark to the next power of two, at most 1 GiB.
fn compute_new_high_water_mark(n: usize) -> usize {
    n.min(MAX_HIGH_WATER_MARK).next_power_of_two()
}
