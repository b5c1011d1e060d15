//! Multi-listener Dispatch
//!
//! An ordered list of callbacks invoked synchronously, in registration
//! order, for every emitted value. Registering returns a [`Connection`]
//! whose drop removes exactly that listener.
//!
//! The slot list lock is released before callbacks run, so a listener may
//! connect or disconnect other listeners while being invoked. Listeners
//! added during an emission first see the next one.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Slot<T> = Arc<Mutex<Box<dyn FnMut(&T) + Send>>>;

struct SlotList<T> {
    next_id: u64,
    slots: Vec<(u64, Slot<T>)>,
}

impl<T> SlotList<T> {
    fn remove(&mut self, id: u64) -> bool {
        let before = self.slots.len();
        self.slots.retain(|(slot_id, _)| *slot_id != id);
        self.slots.len() != before
    }
}

/// Ordered set of listeners for values of type `T`.
pub struct Signal<T> {
    slots: Arc<Mutex<SlotList<T>>>,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl<T> Signal<T> {
    /// Create a signal with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(SlotList {
                next_id: 0,
                slots: Vec::new(),
            })),
        }
    }

    /// Register a listener. It stays registered until the returned
    /// [`Connection`] is dropped or disconnected.
    #[must_use = "dropping the connection unregisters the listener"]
    pub fn connect<F>(&self, listener: F) -> Connection
    where
        F: FnMut(&T) + Send + 'static,
        T: 'static,
    {
        let mut list = self.slots.lock();
        let id = list.next_id;
        list.next_id += 1;
        list.slots.push((id, Arc::new(Mutex::new(Box::new(listener)))));
        drop(list);

        let weak: Weak<Mutex<SlotList<T>>> = Arc::downgrade(&self.slots);
        Connection {
            disconnect: Some(Box::new(move || {
                weak.upgrade().is_some_and(|slots| slots.lock().remove(id))
            })),
        }
    }

    /// Invoke every listener with `value`, in registration order.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Slot<T>> = self
            .slots
            .lock()
            .slots
            .iter()
            .map(|(_, slot)| Arc::clone(slot))
            .collect();

        for slot in snapshot {
            (slot.lock())(value);
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.slots.lock().slots.len()
    }

    /// Whether any listener is registered.
    #[must_use]
    pub fn has_listeners(&self) -> bool {
        self.listener_count() > 0
    }
}

/// Registration handle returned by [`Signal::connect`].
///
/// Dropping it unregisters the listener. The handle does not keep the
/// signal alive.
#[must_use = "dropping the connection unregisters the listener"]
pub struct Connection {
    disconnect: Option<Box<dyn FnOnce() -> bool + Send>>,
}

impl Connection {
    /// Unregister the listener now. Returns `false` if it was already gone.
    pub fn disconnect(mut self) -> bool {
        self.disconnect.take().is_some_and(|f| f())
    }

    /// Whether the handle still refers to a registration.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.disconnect.is_some()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(f) = self.disconnect.take() {
            f();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .finish()
    }
}
