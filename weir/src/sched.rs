//! Explicit task queue driving all deferred channel work.
//!
//! Channels never deliver data or notifications synchronously from inside the
//! call that caused them. Instead they post a continuation to the [Scheduler],
//! which runs it on a later turn. The scheduler is single-threaded; it is driven
//! either synchronously with [run_until_idle](Scheduler::run_until_idle) or from a
//! tokio current-thread runtime with [run_until](Scheduler::run_until).

use futures::Future;
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt,
    rc::Rc,
};
use tokio::sync::Notify;

use crate::{event::ListenerIds, pipe::PipeRegistry};

/// Identifies a channel within its scheduler.
///
/// Both sides of a duplex channel share one id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelId(u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

type Task = Box<dyn FnOnce()>;

struct Shared {
    queue: RefCell<VecDeque<Task>>,
    notify: Notify,
    next_channel: Cell<u64>,
    listener_ids: ListenerIds,
    turns: Cell<u64>,
    registry: PipeRegistry,
}

/// Single-threaded cooperative task queue.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct Scheduler(Rc<Shared>);

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .field("turns", &self.0.turns.get())
            .field("pipes", &self.0.registry.len())
            .finish()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Creates a scheduler with its own pipe registry.
    pub fn new() -> Self {
        Self::with_registry(PipeRegistry::new())
    }

    /// Creates a scheduler that records pipes in the specified registry.
    pub fn with_registry(registry: PipeRegistry) -> Self {
        Self(Rc::new(Shared {
            queue: RefCell::new(VecDeque::new()),
            notify: Notify::new(),
            next_channel: Cell::new(1),
            listener_ids: ListenerIds::default(),
            turns: Cell::new(0),
            registry,
        }))
    }

    /// The registry of in-flight pipes.
    pub fn registry(&self) -> &PipeRegistry {
        &self.0.registry
    }

    /// Posts a continuation to run on a later turn.
    pub fn post(&self, task: impl FnOnce() + 'static) {
        self.0.queue.borrow_mut().push_back(Box::new(task));
        self.0.notify.notify_one();
    }

    /// Number of queued continuations.
    pub fn pending(&self) -> usize {
        self.0.queue.borrow().len()
    }

    /// True, if no continuations are queued.
    pub fn is_idle(&self) -> bool {
        self.0.queue.borrow().is_empty()
    }

    /// Total number of continuations run so far.
    pub fn turns(&self) -> u64 {
        self.0.turns.get()
    }

    /// Runs the oldest queued continuation.
    ///
    /// Returns false if the queue was empty.
    pub fn run_once(&self) -> bool {
        let task = self.0.queue.borrow_mut().pop_front();
        match task {
            Some(task) => {
                self.0.turns.set(self.0.turns.get() + 1);
                task();
                true
            }
            None => false,
        }
    }

    /// Runs continuations until the queue is empty, including continuations
    /// posted while running.
    ///
    /// Returns the number of continuations run.
    pub fn run_until_idle(&self) -> usize {
        let mut n = 0;
        while self.run_once() {
            n += 1;
        }
        if n > 0 {
            tracing::trace!(turns = n, "scheduler idle");
        }
        n
    }

    /// Drives the queue until the specified future completes.
    ///
    /// Must be awaited on a single-threaded executor, for example within a
    /// tokio current-thread runtime.
    pub async fn run_until<F: Future>(&self, fut: F) -> F::Output {
        futures::pin_mut!(fut);

        loop {
            self.run_until_idle();

            tokio::select! {
                biased;
                out = &mut fut => {
                    self.run_until_idle();
                    return out;
                }
                () = self.0.notify.notified() => (),
            }
        }
    }

    pub(crate) fn listener_ids(&self) -> &ListenerIds {
        &self.0.listener_ids
    }

    pub(crate) fn next_channel_id(&self) -> ChannelId {
        let id = self.0.next_channel.get();
        self.0.next_channel.set(id + 1);
        ChannelId(id)
    }
}
