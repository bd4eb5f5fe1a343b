// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Service instances, the registry-side notifier and the service directory.

mod directory;

pub use directory::{ServiceDirectory, Snapshot};

use crate::observer::{Dispatch, Event, EventBus, ServiceInstancesChangedEvent};
use faststr::FastStr;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metadata key of the service version.
pub const VERSION_KEY: &str = "version";
/// Metadata key of the service group.
pub const GROUP_KEY: &str = "group";

/// One addressable backend of a logical service. Identity is `host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstance {
    /// The logical service.
    pub service_name: FastStr,
    /// Host name or IP.
    pub host: FastStr,
    /// Port.
    pub port: u16,
    /// Tags, version, group.
    pub metadata: HashMap<FastStr, FastStr>,
    /// Whether the instance accepts traffic.
    pub enabled: bool,
}

impl ServiceInstance {
    /// Creates an enabled instance without metadata.
    pub fn new(service_name: impl Into<FastStr>, host: impl Into<FastStr>, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            host: host.into(),
            port,
            metadata: HashMap::new(),
            enabled: true,
        }
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<FastStr>, value: impl Into<FastStr>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Sets whether the instance accepts traffic.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The `host:port` identity.
    pub fn id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Version metadata.
    pub fn version(&self) -> Option<&str> {
        self.metadata.get(VERSION_KEY).map(FastStr::as_str)
    }

    /// Group metadata.
    pub fn group(&self) -> Option<&str> {
        self.metadata.get(GROUP_KEY).map(FastStr::as_str)
    }
}

impl fmt::Display for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.service_name, self.host, self.port)
    }
}

/// The publishing end of one registry connection.
///
/// Pushes are stamped with the connection's id and a revision in arrival order, so a
/// [`ServiceDirectory`] can discard pushes of this connection that lose a race against a newer
/// one on their way through the bus. Revisions of different connections are independent.
pub struct RegistryNotifier {
    bus: EventBus,
    id: FastStr,
    revision: AtomicU64,
}

static NEXT_NOTIFIER_ID: AtomicU64 = AtomicU64::new(1);

impl RegistryNotifier {
    /// Creates a notifier publishing on `bus` under a process-unique id.
    pub fn new(bus: EventBus) -> Self {
        let id = format!("registry-{}", NEXT_NOTIFIER_ID.fetch_add(1, Ordering::Relaxed));
        Self::with_id(bus, id)
    }

    /// Creates a notifier publishing on `bus` under `id`, e.g. a registry id of the reference.
    pub fn with_id(bus: EventBus, id: impl Into<FastStr>) -> Self {
        Self {
            bus,
            id: id.into(),
            revision: AtomicU64::new(0),
        }
    }

    /// The id stamped on every push.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Publishes the complete current membership of `service_name`.
    pub fn notify(&self, service_name: impl Into<FastStr>, instances: Vec<Arc<ServiceInstance>>) -> Dispatch {
        let event = ServiceInstancesChangedEvent::new(service_name, instances)
            .with_source(self.id.clone())
            .with_revision(self.next_revision());
        self.bus.publish(&event.into())
    }

    /// Publishes that a local instance was registered.
    pub fn registered(&self, instance: Arc<ServiceInstance>) -> Dispatch {
        self.bus.publish(&Event::InstanceRegistered(instance))
    }

    /// Publishes that a local instance was unregistered.
    pub fn unregistered(&self, instance: Arc<ServiceInstance>) -> Dispatch {
        self.bus.publish(&Event::InstanceUnregistered(instance))
    }

    /// Reserves the next revision. Revisions start at 1.
    pub fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::AcqRel) + 1
    }
}
