//! Notification Fan-out
//!
//! Weakly-held registry of listeners sharing one mesh. Listeners are never
//! kept alive by the registry; dead entries are purged the next time an
//! event is dispatched.

use std::sync::{Arc, Weak};

use crate::section::Generation;

/// Events broadcast to every linked listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshEvent {
    /// The render proxy's section set or section properties changed
    ProxyInvalidated,
    /// A cook finished and the collision representation was finalized
    CollisionUpdated {
        /// Aggregate generation the cooked data reflects
        generation: Generation,
        /// `false` when the cook failed and the previous collision was kept
        succeeded: bool,
    },
}

/// Receiver of mesh events
///
/// Listeners only see the event. Anything they want to change in response
/// must be queued and applied on a later cycle.
pub trait MeshListener: Send + Sync {
    fn on_mesh_event(&self, event: &MeshEvent);
}

/// Registration handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered set of weak listener references
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Vec<(ListenerId, Weak<dyn MeshListener>)>,
    next_id: u64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; the registry holds it weakly
    pub fn register<L: MeshListener + 'static>(&mut self, listener: &Arc<L>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        let listener: Arc<dyn MeshListener> = listener.clone();
        self.listeners.push((id, Arc::downgrade(&listener)));
        id
    }

    /// Remove a listener, returning whether it was registered
    pub fn unregister(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(entry, _)| *entry != id);
        self.listeners.len() != before
    }

    /// Deliver an event to every live listener in registration order
    ///
    /// Returns the number of listeners notified.
    pub fn notify(&mut self, event: &MeshEvent) -> usize {
        let mut delivered = 0;
        let mut should_purge = false;

        for (_, listener) in &self.listeners {
            match listener.upgrade() {
                Some(listener) => {
                    listener.on_mesh_event(event);
                    delivered += 1;
                }
                None => should_purge = true,
            }
        }

        if should_purge {
            self.listeners.retain(|(_, listener)| listener.strong_count() > 0);
        }

        delivered
    }

    /// Number of registered entries, including ones not yet purged
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Number of listeners still alive
    pub fn live_count(&self) -> usize {
        self.listeners
            .iter()
            .filter(|(_, listener)| listener.strong_count() > 0)
            .count()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
