// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! A priority-ordered, type-filtered publish/subscribe bus for discovery events.
//!
//! The bus is an explicit handle: build one at startup and pass clones of it to every component
//! that publishes or subscribes. Listeners register from their owner's construction path.

pub mod event;

pub use event::{Event, EventKind, ServiceInstancesChangedEvent};

use crate::Error;
use arc_swap::ArcSwap;
use faststr::FastStr;
use std::any::type_name;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::warn;

/// Reacts to events of one [`EventKind`].
pub trait EventListener: Send + Sync + 'static {
    /// Handles an event. Must not block on network I/O, it runs on the publisher's thread.
    fn on_event(&self, event: &Event) -> Result<(), Error>;

    /// Dispatch priority, lower runs first.
    fn priority(&self) -> i32 {
        0
    }

    /// The only kind of event this listener is invoked with.
    fn event_kind(&self) -> EventKind;

    /// Name used when reporting failures.
    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(type_name::<Self>())
    }
}

#[derive(Clone)]
struct Registration {
    priority: i32,
    kind: EventKind,
    listener: Arc<dyn EventListener>,
}

/// Outcome of one [`EventBus::publish`].
#[derive(Debug, Default)]
pub struct Dispatch {
    /// Number of listeners invoked.
    pub delivered: usize,
    /// One [`Error::ListenerFailure`] per listener that returned an error.
    pub failures: Vec<Error>,
}

impl Dispatch {
    /// Whether every invoked listener succeeded.
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The event bus. Cloning yields another handle to the same listener registry.
#[derive(Clone)]
pub struct EventBus {
    listeners: Arc<ArcSwap<Vec<Registration>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates a bus without listeners.
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(ArcSwap::from_pointee(Vec::new())),
        }
    }

    /// Registers `listener`, after every listener of lower or equal priority.
    ///
    /// Registering the same listener twice makes it receive every event twice.
    pub fn add_event_listener(&self, listener: Arc<dyn EventListener>) {
        let registration = Registration {
            priority: listener.priority(),
            kind: listener.event_kind(),
            listener,
        };
        self.listeners.rcu(|current| {
            let at = current.partition_point(|r| r.priority <= registration.priority);
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend_from_slice(&current[..at]);
            next.push(registration.clone());
            next.extend_from_slice(&current[at..]);
            next
        });
    }

    /// Number of registrations.
    pub fn listener_count(&self) -> usize {
        self.listeners.load().len()
    }

    /// Invokes every listener registered for the kind of `event`, by ascending priority, in
    /// registration order on ties.
    ///
    /// A failing listener is reported in the returned [`Dispatch`] and logged; the remaining
    /// listeners still run. Returns once all of them ran.
    pub fn publish(&self, event: &Event) -> Dispatch {
        let kind = event.kind();
        let listeners = self.listeners.load_full();
        let mut dispatch = Dispatch::default();
        for registration in listeners.iter().filter(|r| r.kind == kind) {
            dispatch.delivered += 1;
            if let Err(err) = registration.listener.on_event(event) {
                let name = registration.listener.name();
                warn!("[MESHCALL] listener {name} failed on {kind} event: {err}");
                dispatch.failures.push(Error::ListenerFailure {
                    listener: FastStr::new(name),
                    source: Box::new(err),
                });
            }
        }
        dispatch
    }
}
