// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Discovery events.

use crate::registry::ServiceInstance;
use faststr::FastStr;
use std::fmt;
use std::sync::Arc;

/// Type tag of an [`Event`], compared by the bus to route events to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`Event::ServiceInstancesChanged`]
    ServiceInstancesChanged,
    /// [`Event::InstanceRegistered`]
    InstanceRegistered,
    /// [`Event::InstanceUnregistered`]
    InstanceUnregistered,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::ServiceInstancesChanged => "service_instances_changed",
            EventKind::InstanceRegistered => "instance_registered",
            EventKind::InstanceUnregistered => "instance_unregistered",
        })
    }
}

/// A discovery event.
#[derive(Debug, Clone)]
pub enum Event {
    /// The complete membership of a service changed.
    ServiceInstancesChanged(ServiceInstancesChangedEvent),
    /// A local instance was registered with the registry.
    InstanceRegistered(Arc<ServiceInstance>),
    /// A local instance was removed from the registry.
    InstanceUnregistered(Arc<ServiceInstance>),
}

impl Event {
    /// The type tag of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ServiceInstancesChanged(_) => EventKind::ServiceInstancesChanged,
            Event::InstanceRegistered(_) => EventKind::InstanceRegistered,
            Event::InstanceUnregistered(_) => EventKind::InstanceUnregistered,
        }
    }
}

impl From<ServiceInstancesChangedEvent> for Event {
    fn from(event: ServiceInstancesChangedEvent) -> Self {
        Event::ServiceInstancesChanged(event)
    }
}

/// The complete current membership of one service, as pushed by a registry.
///
/// This is not a delta: `instances` replaces whatever was known before. `revision` orders
/// pushes for the same service coming from the same `source`; revisions of different sources
/// are never compared. A push without revision is ordered by arrival only.
#[derive(Debug, Clone)]
pub struct ServiceInstancesChangedEvent {
    /// The logical service.
    pub service_name: FastStr,
    /// All live instances, identities unique.
    pub instances: Vec<Arc<ServiceInstance>>,
    /// The registry connection that generated the push. Empty for an anonymous source.
    pub source: FastStr,
    /// Sequence number assigned by `source`.
    pub revision: Option<u64>,
}

impl ServiceInstancesChangedEvent {
    /// Creates an unrevisioned event.
    pub fn new(service_name: impl Into<FastStr>, instances: Vec<Arc<ServiceInstance>>) -> Self {
        Self {
            service_name: service_name.into(),
            instances,
            source: FastStr::empty(),
            revision: None,
        }
    }

    /// Sets the registry connection the push comes from.
    pub fn with_source(mut self, source: impl Into<FastStr>) -> Self {
        self.source = source.into();
        self
    }

    /// Sets the revision.
    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = Some(revision);
        self
    }
}
