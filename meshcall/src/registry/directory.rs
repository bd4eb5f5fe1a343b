// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! The service directory: live instances per service, reconciled from registry pushes.
//!
//! Storage is one immutable map of immutable snapshots behind an [`ArcSwap`]. Writers install a
//! new map with a compare-and-swap loop, readers load the current map without locking, so a
//! reader sees either the previous or the next instance list of a service, never a mixture.
//!
//! Staleness is judged per push source: a revisioned push is discarded only when the same
//! source already installed an equal or higher revision for the service. Unrevisioned pushes
//! always install and leave the per-source guards untouched.

use super::ServiceInstance;
use crate::observer::{Event, EventBus, EventKind, EventListener, ServiceInstancesChangedEvent};
use crate::Error;
use arc_swap::ArcSwap;
use async_broadcast::{InactiveReceiver, Receiver, Sender};
use faststr::FastStr;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

const WATCH_CAPACITY: usize = 64;

/// Immutable point-in-time view of one service's instances.
#[derive(Debug, Clone)]
pub struct Snapshot {
    service_name: FastStr,
    revision: u64,
    source_revision: Option<u64>,
    instances: Arc<[Arc<ServiceInstance>]>,
}

impl Snapshot {
    fn empty(service_name: FastStr) -> Self {
        Self {
            service_name,
            revision: 0,
            source_revision: None,
            instances: Arc::from(Vec::new()),
        }
    }

    /// The service this snapshot belongs to.
    #[inline]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Install sequence of this snapshot within its service, increasing with every install;
    /// 0 when nothing was installed yet.
    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Revision the push source stamped on the push that installed this snapshot.
    #[inline]
    pub fn source_revision(&self) -> Option<u64> {
        self.source_revision
    }

    /// All instances in push order.
    #[inline]
    pub fn instances(&self) -> &[Arc<ServiceInstance>] {
        &self.instances
    }

    /// Instances that accept traffic.
    pub fn enabled(&self) -> impl Iterator<Item = &Arc<ServiceInstance>> {
        self.instances.iter().filter(|i| i.enabled)
    }
}

impl Deref for Snapshot {
    type Target = [Arc<ServiceInstance>];

    fn deref(&self) -> &Self::Target {
        &self.instances
    }
}

#[derive(Clone)]
struct Entry {
    snapshot: Snapshot,
    // Highest revision installed per push source.
    sources: Arc<HashMap<FastStr, u64>>,
}

impl Entry {
    fn is_stale(&self, event: &ServiceInstancesChangedEvent) -> bool {
        match event.revision {
            Some(revision) => self.sources.get(&event.source).is_some_and(|&seen| revision <= seen),
            None => false,
        }
    }
}

/// Holds the current instances of every known service.
///
/// Registry pushes are its only writers; load balancers read it through
/// [`ServiceDirectory::snapshot`].
pub struct ServiceDirectory {
    services: ArcSwap<HashMap<FastStr, Entry>>,
    updates: Sender<Snapshot>,
    watchers: InactiveReceiver<Snapshot>,
    // Revision last sent to watchers, per service.
    announced: Mutex<HashMap<FastStr, u64>>,
}

impl Default for ServiceDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceDirectory {
    /// Creates an empty directory that is not subscribed to any bus.
    pub fn new() -> Self {
        let (mut updates, watchers) = async_broadcast::broadcast(WATCH_CAPACITY);
        updates.set_overflow(true);
        Self {
            services: ArcSwap::from_pointee(HashMap::new()),
            updates,
            watchers: watchers.deactivate(),
            announced: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a directory and registers it on `bus` for [`EventKind::ServiceInstancesChanged`].
    pub fn subscribe(bus: &EventBus) -> Arc<Self> {
        let directory = Arc::new(Self::new());
        bus.add_event_listener(directory.clone());
        directory
    }

    /// The current instances of `service_name`. Never blocks; an unknown service yields an empty
    /// snapshot.
    pub fn snapshot(&self, service_name: &str) -> Snapshot {
        self.services
            .load()
            .get(service_name)
            .map(|entry| entry.snapshot.clone())
            .unwrap_or_else(|| Snapshot::empty(FastStr::new(service_name)))
    }

    /// Names of all services that received at least one push.
    pub fn services(&self) -> Vec<FastStr> {
        self.services.load().keys().cloned().collect()
    }

    /// Subscribes to installed snapshots.
    ///
    /// Snapshots of one service arrive in increasing [`Snapshot::revision`] order. When
    /// concurrent pushes race, a snapshot that was overtaken by a newer install is not sent.
    /// A slow watcher loses the oldest updates instead of holding back writers.
    pub fn watch(&self) -> Receiver<Snapshot> {
        self.watchers.activate_cloned()
    }

    /// Replaces the instances of the event's service with the event's instances.
    ///
    /// Returns the installed snapshot, or `None` when the event's source already installed an
    /// equal or newer revision of the service.
    pub fn reconcile(&self, event: &ServiceInstancesChangedEvent) -> Result<Option<Snapshot>, Error> {
        if event.service_name.is_empty() {
            return Err(Error::invalid_argument("service instances changed event without service name"));
        }
        let mut seen = HashSet::with_capacity(event.instances.len());
        for instance in &event.instances {
            if !seen.insert((instance.host.as_str(), instance.port)) {
                return Err(Error::InvalidArgument(
                    format!("duplicate instance {} in push for {}", instance.id(), event.service_name).into(),
                ));
            }
        }

        let instances: Arc<[Arc<ServiceInstance>]> = Arc::from(event.instances.clone());
        let mut installed = None;
        self.services.rcu(|current| {
            installed = None;
            let entry = current.get(&event.service_name);
            if entry.is_some_and(|entry| entry.is_stale(event)) {
                return Arc::clone(current);
            }
            let mut sources = entry.map(|entry| HashMap::clone(&entry.sources)).unwrap_or_default();
            if let Some(revision) = event.revision {
                sources.insert(event.source.clone(), revision);
            }
            let snapshot = Snapshot {
                service_name: event.service_name.clone(),
                revision: entry.map_or(1, |entry| entry.snapshot.revision.saturating_add(1)),
                source_revision: event.revision,
                instances: instances.clone(),
            };
            let mut next = HashMap::clone(current);
            next.insert(
                event.service_name.clone(),
                Entry {
                    snapshot: snapshot.clone(),
                    sources: Arc::new(sources),
                },
            );
            installed = Some(snapshot);
            Arc::new(next)
        });

        match &installed {
            Some(snapshot) => {
                debug!(
                    "[MESHCALL] installed {} instances of {} at revision {} (source {:?} revision {:?})",
                    snapshot.len(),
                    snapshot.service_name,
                    snapshot.revision,
                    event.source,
                    event.revision
                );
                self.announce(snapshot);
            },
            None => debug!("[MESHCALL] discarded stale push for {} from source {:?} at revision {:?}", event.service_name, event.source, event.revision),
        }
        Ok(installed)
    }

    fn announce(&self, snapshot: &Snapshot) {
        let mut announced = self.announced.lock().unwrap_or_else(PoisonError::into_inner);
        let last = announced.entry(snapshot.service_name.clone()).or_default();
        if snapshot.revision <= *last {
            return;
        }
        *last = snapshot.revision;
        // An inactive channel only means nobody watches.
        let _ = self.updates.try_broadcast(snapshot.clone());
    }
}

impl EventListener for ServiceDirectory {
    fn on_event(&self, event: &Event) -> Result<(), Error> {
        match event {
            Event::ServiceInstancesChanged(changed) => self.reconcile(changed).map(|_| ()),
            _ => Ok(()),
        }
    }

    fn priority(&self) -> i32 {
        -1
    }

    fn event_kind(&self) -> EventKind {
        EventKind::ServiceInstancesChanged
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("service-directory")
    }
}

#[cfg(test)]
mod tests {
    use super::ServiceDirectory;
    use crate::observer::ServiceInstancesChangedEvent;
    use crate::registry::ServiceInstance;
    use crate::Error;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn instance(host: &'static str) -> Arc<ServiceInstance> {
        Arc::new(ServiceInstance::new("orders", host, 20000))
    }

    #[test]
    fn test_unknown_service_is_empty() {
        let directory = ServiceDirectory::new();
        let snapshot = directory.snapshot("orders");
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.revision(), 0);
        assert_eq!(snapshot.service_name(), "orders");
        assert!(directory.services().is_empty());
    }

    #[test]
    fn test_malformed_events() {
        let directory = ServiceDirectory::new();
        let nameless = ServiceInstancesChangedEvent::new("", vec![instance("a")]);
        assert_matches!(directory.reconcile(&nameless), Err(Error::InvalidArgument(_)));
        let duplicated = ServiceInstancesChangedEvent::new("orders", vec![instance("a"), instance("a")]);
        assert_matches!(directory.reconcile(&duplicated), Err(Error::InvalidArgument(_)));
        // A malformed push leaves the directory usable.
        let ok = ServiceInstancesChangedEvent::new("orders", vec![instance("a")]);
        assert!(directory.reconcile(&ok).unwrap().is_some());
        assert_eq!(directory.snapshot("orders").len(), 1);
    }

    #[test]
    fn test_unrevisioned_pushes_win_by_arrival() {
        let directory = ServiceDirectory::new();
        directory.reconcile(&ServiceInstancesChangedEvent::new("orders", vec![instance("a"), instance("b")])).unwrap();
        directory.reconcile(&ServiceInstancesChangedEvent::new("orders", vec![instance("c")])).unwrap();
        let snapshot = directory.snapshot("orders");
        assert_eq!(snapshot.revision(), 2);
        assert_eq!(snapshot[0].host.as_str(), "c");
    }

    #[test]
    fn test_empty_push_keeps_revision_guard() {
        let directory = ServiceDirectory::new();
        directory.reconcile(&ServiceInstancesChangedEvent::new("orders", vec![instance("a")]).with_revision(3)).unwrap();
        directory.reconcile(&ServiceInstancesChangedEvent::new("orders", vec![]).with_revision(4)).unwrap();
        assert!(directory.snapshot("orders").is_empty());
        let stale = ServiceInstancesChangedEvent::new("orders", vec![instance("a")]).with_revision(4);
        assert!(directory.reconcile(&stale).unwrap().is_none());
        assert!(directory.snapshot("orders").is_empty());
    }

    #[test]
    fn test_unrevisioned_push_does_not_raise_the_guard() {
        let directory = ServiceDirectory::new();
        let from_zk = |hosts: &[&'static str], revision: u64| {
            ServiceInstancesChangedEvent::new("orders", hosts.iter().map(|&h| instance(h)).collect())
                .with_source("zk")
                .with_revision(revision)
        };
        directory.reconcile(&from_zk(&["a"], 1)).unwrap();
        directory.reconcile(&ServiceInstancesChangedEvent::new("orders", vec![instance("b")])).unwrap();
        let installed = directory.reconcile(&from_zk(&["c"], 2)).unwrap().unwrap();
        assert_eq!(installed.revision(), 3);
        assert_eq!(installed.source_revision(), Some(2));
        assert_eq!(directory.snapshot("orders")[0].host.as_str(), "c");
        assert!(directory.reconcile(&from_zk(&["a"], 2)).unwrap().is_none());
    }

    #[test]
    fn test_highest_source_revision() {
        let directory = ServiceDirectory::new();
        let last = ServiceInstancesChangedEvent::new("orders", vec![instance("a")]).with_revision(u64::MAX);
        assert!(directory.reconcile(&last).unwrap().is_some());
        assert!(directory.reconcile(&last).unwrap().is_none());

        let anonymous = ServiceInstancesChangedEvent::new("orders", vec![instance("b")]);
        let installed = directory.reconcile(&anonymous).unwrap().unwrap();
        assert_eq!(installed.revision(), 2);
        assert_eq!(installed.source_revision(), None);
        assert_eq!(directory.snapshot("orders")[0].host.as_str(), "b");
    }

    #[test]
    fn test_enabled_filter() {
        let directory = ServiceDirectory::new();
        let disabled = Arc::new(ServiceInstance::new("orders", "b", 20000).with_enabled(false));
        directory.reconcile(&ServiceInstancesChangedEvent::new("orders", vec![instance("a"), disabled])).unwrap();
        let snapshot = directory.snapshot("orders");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.enabled().count(), 1);
    }
}
