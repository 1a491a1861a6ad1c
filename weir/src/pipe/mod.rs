//! Flow-controlled forwarding from a readable channel to writable channels.
//!
//! A pipe delivers every chunk of its source to all attached destinations.
//! When a destination signals backpressure the source is paused until every
//! destination that signalled it has drained.

use std::{cell::RefCell, mem, rc::Rc};

use crate::{
    chunk::Chunk,
    event::ListenerId,
    readable::{Readable, SharedCoordinator, WeakReadable},
    sched::ChannelId,
    writable::{WeakWritable, Writable},
};

mod registry;

pub use registry::{DestinationInfo, PipeId, PipeInfo, PipeRegistry};

/// Pipe options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipeOpts {
    /// End the destination when the source ends.
    ///
    /// By default this is true.
    pub end: bool,
}

impl Default for PipeOpts {
    fn default() -> Self {
        Self { end: true }
    }
}

/// A channel that can be the destination of a pipe.
pub trait PipeDestination<T>: Clone {
    /// The writable side receiving piped chunks.
    fn target(&self) -> Writable<T>;
}

impl<T> PipeDestination<T> for Writable<T> {
    fn target(&self) -> Writable<T> {
        self.clone()
    }
}

struct Destination<T> {
    writable: WeakWritable<T>,
    channel: ChannelId,
    await_drain: usize,
    end: bool,
    listeners: Vec<ListenerId>,
}

/// Pipe state, owned by the source channel.
pub(crate) struct Coordinator<T> {
    id: PipeId,
    registry: PipeRegistry,
    source: WeakReadable<T>,
    source_listeners: Vec<ListenerId>,
    dests: Vec<Destination<T>>,
    paused: bool,
    released: bool,
}

impl<T> Coordinator<T> {
    pub fn id(&self) -> PipeId {
        self.id
    }

    fn position(&self, channel: ChannelId) -> Option<usize> {
        self.dests.iter().position(|dest| dest.channel == channel)
    }

    fn all_drained(&self) -> bool {
        self.dests.iter().all(|dest| dest.await_drain == 0)
    }

    fn sync_registry(&self) {
        let destinations = self
            .dests
            .iter()
            .map(|dest| DestinationInfo { channel: dest.channel, await_drain: dest.await_drain, end: dest.end })
            .collect();
        let paused = self.paused;
        self.registry.update(self.id, move |info| {
            info.destinations = destinations;
            info.paused = paused;
        });
    }
}

fn start<T: Chunk + Clone>(src: &Readable<T>) -> SharedCoordinator<T> {
    let registry = src.scheduler().registry().clone();
    let id = registry.register(src.id());
    let coord = Rc::new(RefCell::new(Coordinator {
        id,
        registry,
        source: src.downgrade(),
        source_listeners: Vec::new(),
        dests: Vec::new(),
        paused: false,
        released: false,
    }));

    let weak = Rc::downgrade(&coord);
    let on_data = src.on_data_quiet(move |chunk| {
        if let Some(coord) = weak.upgrade() {
            deliver(&coord, chunk);
        }
    });

    let weak = Rc::downgrade(&coord);
    let on_end = src.on_end(move || {
        if let Some(coord) = weak.upgrade() {
            source_ended(&coord);
        }
    });

    let weak = Rc::downgrade(&coord);
    let on_error = src.on_error(move |err| {
        if let Some(coord) = weak.upgrade() {
            tracing::debug!(pipe = %coord.borrow().id, %err, "source failed");
            release(&coord);
        }
    });

    let weak = Rc::downgrade(&coord);
    let on_close = src.on_close(move || {
        if let Some(coord) = weak.upgrade() {
            release(&coord);
        }
    });

    coord.borrow_mut().source_listeners = vec![on_data, on_end, on_error, on_close];
    src.set_pipe_slot(Some(coord.clone()));

    tracing::debug!(pipe = %id, source = %src.id(), "pipe created");
    coord
}

/// Attaches a destination to the pipe of the source, creating the pipe if necessary.
pub(crate) fn attach<T: Chunk + Clone>(src: &Readable<T>, dest: Writable<T>, opts: PipeOpts) {
    let coord = match src.pipe_slot() {
        Some(coord) => coord,
        None => start(src),
    };

    let channel = dest.id();
    if coord.borrow().position(channel).is_some() {
        tracing::debug!(pipe = %coord.borrow().id, dest = %channel, "destination already attached");
        return;
    }

    let weak = Rc::downgrade(&coord);
    let on_drain = dest.on_drain(move || {
        if let Some(coord) = weak.upgrade() {
            drained(&coord, channel);
        }
    });

    let weak = Rc::downgrade(&coord);
    let on_error = dest.on_error(move |err| {
        if let Some(coord) = weak.upgrade() {
            tracing::debug!(pipe = %coord.borrow().id, dest = %channel, %err, "destination failed, releasing pipe");
            release(&coord);
        }
    });

    let weak = Rc::downgrade(&coord);
    let on_finish = dest.on_finish(move || {
        if let Some(coord) = weak.upgrade() {
            remove_destination(&coord, channel);
        }
    });

    let weak = Rc::downgrade(&coord);
    let on_close = dest.on_close(move || {
        if let Some(coord) = weak.upgrade() {
            remove_destination(&coord, channel);
        }
    });

    let need_drain = dest.need_drain();
    {
        let mut coord = coord.borrow_mut();
        coord.dests.push(Destination {
            writable: dest.downgrade(),
            channel,
            await_drain: usize::from(need_drain),
            end: opts.end,
            listeners: vec![on_drain, on_error, on_finish, on_close],
        });
        coord.sync_registry();
        tracing::debug!(pipe = %coord.id, dest = %channel, end = opts.end, "destination attached");
    }

    if src.is_ended() {
        let coord = coord.clone();
        src.scheduler().post(move || {
            if opts.end {
                if let Err(err) = dest.end() {
                    tracing::debug!(dest = %channel, %err, "ending destination failed");
                }
            }
            remove_destination(&coord, channel);
        });
        return;
    }

    if need_drain {
        pause_source(&coord, src);
    } else if src.flowing() != Some(true) {
        src.resume();
    }
}

/// Detaches a destination.
pub(crate) fn detach<T: Chunk + Clone>(src: &Readable<T>, dest: &Writable<T>) -> bool {
    match src.pipe_slot() {
        Some(coord) => remove_destination(&coord, dest.id()),
        None => false,
    }
}

/// Detaches all destinations.
pub(crate) fn detach_all<T: Chunk + Clone>(src: &Readable<T>) {
    if let Some(coord) = src.pipe_slot() {
        release(&coord);
    }
}

/// Writes one chunk to every destination.
fn deliver<T: Chunk + Clone>(coord: &SharedCoordinator<T>, chunk: &T) {
    let targets: Vec<_> = coord
        .borrow()
        .dests
        .iter()
        .filter_map(|dest| dest.writable.upgrade().map(|writable| (dest.channel, writable)))
        .collect();

    let mut blocked = Vec::new();
    let mut rejected = Vec::new();
    for (channel, dest) in targets {
        match dest.write(chunk.clone()) {
            Ok(true) => (),
            Ok(false) => blocked.push(channel),
            Err(err) => {
                tracing::debug!(pipe = %coord.borrow().id, dest = %channel, %err, "destination rejected chunk");
                rejected.push(channel);
            }
        }
    }

    if !blocked.is_empty() {
        let source = {
            let mut coord = coord.borrow_mut();
            for dest in coord.dests.iter_mut().filter(|dest| blocked.contains(&dest.channel)) {
                dest.await_drain += 1;
            }
            coord.sync_registry();
            coord.source.upgrade()
        };
        if let Some(src) = source {
            pause_source(coord, &src);
        }
    }

    for channel in rejected {
        remove_destination(coord, channel);
    }
}

fn pause_source<T: Chunk>(coord: &SharedCoordinator<T>, src: &Readable<T>) {
    if src.flowing() == Some(false) {
        return;
    }
    {
        let mut coord = coord.borrow_mut();
        coord.paused = true;
        coord.sync_registry();
        tracing::trace!(pipe = %coord.id, "backpressure, pausing source");
    }
    src.pause_internal();
}

fn resume_source<T: Chunk>(coord: &SharedCoordinator<T>) {
    let source = {
        let mut coord = coord.borrow_mut();
        if !coord.paused {
            return;
        }
        coord.paused = false;
        coord.sync_registry();
        coord.source.upgrade()
    };

    if let Some(src) = source {
        if src.is_paused_by_user() {
            return;
        }
        tracing::trace!(source = %src.id(), "destinations drained, resuming source");
        src.resume_internal();
    }
}

fn drained<T: Chunk>(coord: &SharedCoordinator<T>, channel: ChannelId) {
    let resume = {
        let mut coord = coord.borrow_mut();
        let Some(pos) = coord.position(channel) else { return };
        if coord.dests[pos].await_drain == 0 {
            return;
        }
        // A drain means the destination flushed everything, covering all
        // backpressured writes since the previous drain.
        coord.dests[pos].await_drain = 0;
        coord.sync_registry();
        coord.all_drained()
    };

    if resume {
        resume_source(coord);
    }
}

fn source_ended<T: Chunk + Clone>(coord: &SharedCoordinator<T>) {
    let dests: Vec<_> = coord
        .borrow()
        .dests
        .iter()
        .filter(|dest| dest.end)
        .filter_map(|dest| dest.writable.upgrade())
        .collect();

    tracing::debug!(pipe = %coord.borrow().id, ending = dests.len(), "source ended");
    release(coord);

    for dest in dests {
        if let Err(err) = dest.end() {
            tracing::debug!(dest = %dest.id(), %err, "ending destination failed");
        }
    }
}

fn remove_destination<T: Chunk + Clone>(coord: &SharedCoordinator<T>, channel: ChannelId) -> bool {
    let (dest, empty, resume) = {
        let mut coord = coord.borrow_mut();
        let Some(pos) = coord.position(channel) else { return false };
        let dest = coord.dests.remove(pos);
        coord.sync_registry();
        let empty = coord.dests.is_empty();
        (dest, empty, !empty && coord.all_drained())
    };

    if let Some(writable) = dest.writable.upgrade() {
        for id in dest.listeners {
            writable.off(id);
        }
    }
    tracing::debug!(pipe = %coord.borrow().id, dest = %channel, "destination detached");

    if empty {
        release(coord);
    } else if resume {
        resume_source(coord);
    }
    true
}

/// Detaches all destinations and removes the pipe from its source.
fn release<T: Chunk>(coord: &SharedCoordinator<T>) {
    let (id, registry, source, source_listeners, dests) = {
        let mut coord = coord.borrow_mut();
        if coord.released {
            return;
        }
        coord.released = true;
        (
            coord.id,
            coord.registry.clone(),
            coord.source.upgrade(),
            mem::take(&mut coord.source_listeners),
            mem::take(&mut coord.dests),
        )
    };

    for dest in dests {
        if let Some(writable) = dest.writable.upgrade() {
            for listener in dest.listeners {
                writable.off(listener);
            }
        }
    }
    registry.unregister(id);

    if let Some(src) = source {
        for listener in source_listeners {
            src.off(listener);
        }
        if src.pipe_slot().map(|slot| Rc::ptr_eq(&slot, coord)).unwrap_or_default() {
            src.set_pipe_slot(None);
        }
        if !src.is_eof() && !src.is_destroyed() {
            src.pause_internal();
        }
    }

    tracing::debug!(pipe = %id, "pipe released");
}
