use std::{cell::RefCell, collections::BTreeMap, fmt, rc::Rc};

use crate::sched::ChannelId;

/// Identifies a pipe, that is one source connected to one or more destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipeId(u64);

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "pipe{}", self.0)
    }
}

/// A destination of a pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DestinationInfo {
    /// Channel of the destination.
    pub channel: ChannelId,
    /// Number of writes that signalled backpressure since the last drain.
    ///
    /// A destination emits one drain per backpressure episode, after its
    /// buffer was flushed completely, so a drain resets this to zero.
    pub await_drain: usize,
    /// Whether the destination is ended when the source ends.
    pub end: bool,
}

/// Snapshot of an active pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipeInfo {
    /// Pipe id.
    pub id: PipeId,
    /// Channel of the source.
    pub source: ChannelId,
    /// Destinations in attachment order.
    pub destinations: Vec<DestinationInfo>,
    /// Whether the source is currently paused because of backpressure.
    pub paused: bool,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    pipes: BTreeMap<PipeId, PipeInfo>,
}

/// Records all active pipes of a scheduler.
///
/// State is shared between clones of this type.
#[derive(Clone, Default)]
pub struct PipeRegistry(Rc<RefCell<RegistryInner>>);

impl fmt::Debug for PipeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("PipeRegistry").field("active", &inner.pipes.len()).finish()
    }
}

impl PipeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active pipes.
    pub fn len(&self) -> usize {
        self.0.borrow().pipes.len()
    }

    /// True, if no pipe is active.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the specified pipe.
    pub fn get(&self, id: PipeId) -> Option<PipeInfo> {
        self.0.borrow().pipes.get(&id).cloned()
    }

    /// Snapshot of the pipe reading from the specified source.
    pub fn by_source(&self, source: ChannelId) -> Option<PipeInfo> {
        self.0.borrow().pipes.values().find(|info| info.source == source).cloned()
    }

    /// Snapshots of all active pipes, ordered by creation.
    pub fn active(&self) -> Vec<PipeInfo> {
        self.0.borrow().pipes.values().cloned().collect()
    }

    pub(crate) fn register(&self, source: ChannelId) -> PipeId {
        let mut inner = self.0.borrow_mut();
        inner.next_id += 1;
        let id = PipeId(inner.next_id);
        inner.pipes.insert(id, PipeInfo { id, source, destinations: Vec::new(), paused: false });
        id
    }

    pub(crate) fn update(&self, id: PipeId, f: impl FnOnce(&mut PipeInfo)) {
        if let Some(info) = self.0.borrow_mut().pipes.get_mut(&id) {
            f(info);
        }
    }

    pub(crate) fn unregister(&self, id: PipeId) {
        self.0.borrow_mut().pipes.remove(&id);
    }
}
