//! Duplex channels whose readable side is computed from their writable side.

use std::{cell::RefCell, fmt, ops::Deref, rc::Rc};

use crate::{
    cfg::DuplexCfg,
    chunk::Chunk,
    done::Done,
    duplex::Duplex,
    error::StreamError,
    pipe::PipeDestination,
    readable::{Readable, Source, WeakReadable},
    sched::Scheduler,
    writable::{Sink, Writable},
};

type MapFn<W, R> = Box<dyn FnMut(W) -> Result<Option<R>, StreamError>>;
type FlushFn<R> = Box<dyn FnMut() -> Result<Option<R>, StreamError>>;

/// Connects the writable side to the readable side.
struct Link<R> {
    readable: RefCell<Option<WeakReadable<R>>>,
    /// Completion of the last write, held back while the readable side is full.
    pending: RefCell<Option<Done>>,
}

impl<R> Link<R> {
    fn readable(&self) -> Option<Readable<R>> {
        self.readable.borrow().as_ref().and_then(WeakReadable::upgrade)
    }
}

struct TransformSink<W, R> {
    link: Rc<Link<R>>,
    map: MapFn<W, R>,
    flush: Option<FlushFn<R>>,
}

impl<W: Chunk, R: Chunk> Sink<W> for TransformSink<W, R> {
    fn write(&mut self, chunk: W, done: Done) {
        let Some(readable) = self.link.readable() else {
            return done.fail(StreamError::Destroyed);
        };

        match (self.map)(chunk) {
            Ok(None) => done.ok(),
            Ok(Some(out)) => match readable.push(out) {
                Ok(true) => done.ok(),
                Ok(false) => *self.link.pending.borrow_mut() = Some(done),
                Err(err) => done.fail(err),
            },
            Err(err) => fail(&readable, err, done),
        }
    }

    fn finalize(&mut self, done: Done) {
        let Some(readable) = self.link.readable() else {
            return done.fail(StreamError::Destroyed);
        };

        if let Some(flush) = self.flush.as_mut() {
            match flush() {
                Ok(Some(out)) => {
                    if let Err(err) = readable.push(out) {
                        return done.fail(err);
                    }
                }
                Ok(None) => (),
                Err(err) => return fail(&readable, err, done),
            }
        }

        match readable.push_eof() {
            Ok(()) => done.ok(),
            Err(err) => done.fail(err),
        }
    }

    fn teardown(&mut self, _err: Option<&StreamError>, done: Done) {
        drop(self.link.pending.borrow_mut().take());
        done.ok()
    }
}

/// A failing transform function fails both sides.
fn fail<R: Chunk>(readable: &Readable<R>, err: StreamError, done: Done) {
    readable.destroy(Some(err.clone()));
    done.fail(err)
}

struct TransformSource<R> {
    link: Rc<Link<R>>,
}

impl<R: Chunk> Source<R> for TransformSource<R> {
    fn request_more(&mut self, _size: usize, _readable: &Readable<R>) {
        let pending = self.link.pending.borrow_mut().take();
        if let Some(done) = pending {
            done.ok();
        }
    }
}

/// A duplex channel that maps every written chunk to zero or one readable chunk.
///
/// Backpressure propagates from the readable side to the writable side:
/// while the readable buffer is full, the write that filled it stays incomplete.
///
/// The transform dereferences to its [Duplex].
pub struct Transform<W, R = W> {
    duplex: Duplex<R, W>,
}

/// A transform forwarding chunks unchanged.
pub type PassThrough<T> = Transform<T, T>;

impl<W, R> Clone for Transform<W, R> {
    fn clone(&self) -> Self {
        Self { duplex: self.duplex.clone() }
    }
}

impl<W: Chunk, R: Chunk> fmt::Debug for Transform<W, R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Transform").field(&self.duplex).finish()
    }
}

impl<W: Chunk, R: Chunk> Transform<W, R> {
    /// Creates a transform applying the specified function to every written chunk.
    ///
    /// Returning `Ok(None)` drops the chunk; returning an error destroys both sides
    /// of the channel with that error.
    ///
    /// # Panics
    /// Panics if the configuration is invalid.
    pub fn new(
        sched: &Scheduler, cfg: impl Into<DuplexCfg>,
        map: impl FnMut(W) -> Result<Option<R>, StreamError> + 'static,
    ) -> Self {
        Self::build(sched, cfg.into(), Box::new(map), None)
    }

    /// Creates a transform that additionally emits a final chunk produced by
    /// `flush` once the writable side has ended.
    pub fn with_flush(
        sched: &Scheduler, cfg: impl Into<DuplexCfg>,
        map: impl FnMut(W) -> Result<Option<R>, StreamError> + 'static,
        flush: impl FnMut() -> Result<Option<R>, StreamError> + 'static,
    ) -> Self {
        Self::build(sched, cfg.into(), Box::new(map), Some(Box::new(flush)))
    }

    fn build(sched: &Scheduler, cfg: DuplexCfg, map: MapFn<W, R>, flush: Option<FlushFn<R>>) -> Self {
        let link = Rc::new(Link { readable: RefCell::new(None), pending: RefCell::new(None) });
        let source = TransformSource { link: link.clone() };
        let sink = TransformSink { link: link.clone(), map, flush };

        let duplex = Duplex::from_parts(sched, cfg, Box::new(source), Box::new(sink));
        *link.readable.borrow_mut() = Some(duplex.readable().downgrade());

        Self { duplex }
    }

    /// The underlying duplex channel.
    pub fn duplex(&self) -> &Duplex<R, W> {
        &self.duplex
    }
}

impl<T: Chunk> Transform<T, T> {
    /// Creates a transform forwarding chunks unchanged.
    pub fn pass_through(sched: &Scheduler, cfg: impl Into<DuplexCfg>) -> Self {
        Self::new(sched, cfg, |chunk| Ok(Some(chunk)))
    }
}

impl<W, R> Deref for Transform<W, R> {
    type Target = Duplex<R, W>;

    fn deref(&self) -> &Self::Target {
        &self.duplex
    }
}

impl<W: Chunk, R: Chunk> PipeDestination<W> for Transform<W, R> {
    fn target(&self) -> Writable<W> {
        self.duplex.writable().clone()
    }
}
