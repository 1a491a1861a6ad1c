//! Typed listener lists used for channel notifications.

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

/// Identifies a registered listener.
///
/// Returned when registering a listener and used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// Allocates listener ids, shared by all emitters of one scheduler.
#[derive(Debug, Clone)]
pub(crate) struct ListenerIds(Rc<Cell<u64>>);

impl Default for ListenerIds {
    fn default() -> Self {
        Self(Rc::new(Cell::new(1)))
    }
}

impl ListenerIds {
    fn next(&self) -> ListenerId {
        let id = self.0.get();
        self.0.set(id + 1);
        ListenerId(id)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

type Handler<A> = Rc<RefCell<Box<dyn FnMut(&A)>>>;

struct Entry<A: ?Sized> {
    id: ListenerId,
    once: bool,
    handler: Handler<A>,
}

/// A list of listeners for one kind of notification.
///
/// Listeners are invoked in registration order.
/// The list may be modified by a listener while it is being invoked;
/// such changes take effect with the next emission.
pub(crate) struct Emitter<A: ?Sized> {
    ids: ListenerIds,
    entries: RefCell<Vec<Entry<A>>>,
}

impl<A: ?Sized> fmt::Debug for Emitter<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Emitter").field("listeners", &self.count()).finish()
    }
}

impl<A: ?Sized> Emitter<A> {
    pub fn new(ids: &ListenerIds) -> Self {
        Self { ids: ids.clone(), entries: RefCell::new(Vec::new()) }
    }

    /// Registers a listener.
    pub fn on(&self, f: impl FnMut(&A) + 'static) -> ListenerId {
        self.add(Box::new(f), false)
    }

    /// Registers a listener that is removed after its first invocation.
    pub fn once(&self, f: impl FnMut(&A) + 'static) -> ListenerId {
        self.add(Box::new(f), true)
    }

    fn add(&self, f: Box<dyn FnMut(&A)>, once: bool) -> ListenerId {
        let id = self.ids.next();
        self.entries.borrow_mut().push(Entry { id, once, handler: Rc::new(RefCell::new(f)) });
        id
    }

    /// Removes a listener.
    ///
    /// Returns whether it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    /// Number of registered listeners.
    pub fn count(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Invokes all listeners.
    ///
    /// Returns whether any listener was registered.
    pub fn emit(&self, arg: &A) -> bool {
        let handlers: Vec<_> = {
            let mut entries = self.entries.borrow_mut();
            let handlers = entries.iter().map(|entry| (entry.id, entry.handler.clone())).collect();
            entries.retain(|entry| !entry.once);
            handlers
        };

        for (id, handler) in &handlers {
            match handler.try_borrow_mut() {
                Ok(mut handler) => (*handler)(arg),
                Err(_) => tracing::warn!(listener = %id, "listener re-entered its own notification, skipped"),
            }
        }

        !handlers.is_empty()
    }
}
