use async_broadcast::TryRecvError;
use meshcall::observer::{Event, EventBus, EventKind, EventListener, ServiceInstancesChangedEvent};
use meshcall::registry::{RegistryNotifier, ServiceDirectory, ServiceInstance};
use meshcall::Error;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn instance(host: &str) -> Arc<ServiceInstance> {
    Arc::new(ServiceInstance::new("orders", host.to_string(), 20000))
}

fn hosts(directory: &ServiceDirectory, service: &str) -> Vec<String> {
    directory.snapshot(service).iter().map(|i| i.host.to_string()).collect()
}

fn push(bus: &EventBus, instances: Vec<Arc<ServiceInstance>>, revision: u64) {
    let dispatch = bus.publish(&ServiceInstancesChangedEvent::new("orders", instances).with_revision(revision).into());
    assert!(dispatch.is_ok());
}

#[test]
fn test_full_replace_and_stale_discard() {
    let bus = EventBus::new();
    let directory = ServiceDirectory::subscribe(&bus);

    push(&bus, vec![instance("a"), instance("b")], 1);
    assert_eq!(hosts(&directory, "orders"), ["a", "b"]);

    push(&bus, vec![instance("a")], 2);
    assert_eq!(hosts(&directory, "orders"), ["a"]);

    push(&bus, vec![instance("a"), instance("b"), instance("c")], 1);
    assert_eq!(hosts(&directory, "orders"), ["a"]);
    assert_eq!(directory.snapshot("orders").revision(), 2);
}

#[test]
fn test_malformed_event_is_reported_and_later_events_apply() {
    let bus = EventBus::new();
    let directory = ServiceDirectory::subscribe(&bus);

    let dispatch = bus.publish(&ServiceInstancesChangedEvent::new("", vec![instance("a")]).into());
    assert_eq!(dispatch.failures.len(), 1);
    assert!(matches!(&dispatch.failures[0], Error::ListenerFailure { listener, .. } if listener.as_str() == "service-directory"));

    push(&bus, vec![instance("b")], 1);
    assert_eq!(hosts(&directory, "orders"), ["b"]);
}

#[test]
fn test_stamped_push_after_anonymous_push_installs() {
    let bus = EventBus::new();
    let directory = ServiceDirectory::subscribe(&bus);
    let notifier = RegistryNotifier::new(bus.clone());

    notifier.notify("orders", vec![instance("a")]);
    assert!(bus.publish(&ServiceInstancesChangedEvent::new("orders", vec![instance("b")]).into()).is_ok());
    assert_eq!(hosts(&directory, "orders"), ["b"]);
    notifier.notify("orders", vec![instance("c")]);
    assert_eq!(hosts(&directory, "orders"), ["c"]);
}

#[test]
fn test_registry_connections_are_ordered_independently() {
    let bus = EventBus::new();
    let directory = ServiceDirectory::subscribe(&bus);
    let first = RegistryNotifier::with_id(bus.clone(), "zk");
    let second = RegistryNotifier::with_id(bus.clone(), "nacos");

    for _ in 0..5 {
        first.notify("orders", vec![instance("x")]);
    }
    second.notify("orders", vec![instance("y")]);
    assert_eq!(hosts(&directory, "orders"), ["y"]);
    first.notify("orders", vec![instance("x")]);
    assert_eq!(hosts(&directory, "orders"), ["x"]);

    // A replay of an older revision of one connection is still discarded.
    push(&bus, vec![instance("z")], 1);
    assert_eq!(hosts(&directory, "orders"), ["z"]);
    let stale = ServiceInstancesChangedEvent::new("orders", vec![instance("w")]).with_source("zk").with_revision(3);
    assert!(bus.publish(&stale.into()).is_ok());
    assert_eq!(hosts(&directory, "orders"), ["z"]);
}

struct SeenBefore {
    directory: Arc<ServiceDirectory>,
    saw_installed: AtomicBool,
}

impl EventListener for SeenBefore {
    fn on_event(&self, event: &Event) -> Result<(), Error> {
        if let Event::ServiceInstancesChanged(changed) = event {
            let snapshot = self.directory.snapshot(&changed.service_name);
            self.saw_installed.store(snapshot.revision() == changed.revision.unwrap_or_default(), Ordering::SeqCst);
        }
        Ok(())
    }

    fn event_kind(&self) -> EventKind {
        EventKind::ServiceInstancesChanged
    }
}

#[test]
fn test_directory_runs_before_default_priority_listeners() {
    let bus = EventBus::new();
    let directory = Arc::new(ServiceDirectory::new());
    let follower = Arc::new(SeenBefore {
        directory: directory.clone(),
        saw_installed: AtomicBool::new(false),
    });
    // Registered first, but the directory's priority is lower.
    bus.add_event_listener(follower.clone());
    bus.add_event_listener(directory.clone());

    let notifier = RegistryNotifier::new(bus.clone());
    notifier.notify("orders", vec![instance("a")]);
    assert!(follower.saw_installed.load(Ordering::SeqCst));
}

#[test]
fn test_registration_events_do_not_touch_the_directory() {
    let bus = EventBus::new();
    let directory = ServiceDirectory::subscribe(&bus);
    let notifier = RegistryNotifier::new(bus);
    assert_eq!(notifier.registered(instance("a")).delivered, 0);
    assert_eq!(notifier.unregistered(instance("a")).delivered, 0);
    assert!(directory.services().is_empty());
}

#[tokio::test]
async fn test_watch_receives_installed_snapshots() {
    let bus = EventBus::new();
    let directory = ServiceDirectory::subscribe(&bus);
    let mut updates = directory.watch();

    push(&bus, vec![instance("a")], 1);
    push(&bus, vec![instance("a")], 1);
    push(&bus, vec![instance("b")], 2);

    let first = updates.recv().await.unwrap();
    assert_eq!(first.revision(), 1);
    let second = tokio::time::timeout(Duration::from_secs(1), updates.recv()).await.unwrap().unwrap();
    assert_eq!(second.revision(), 2);
    assert_eq!(second[0].host.as_str(), "b");
    assert!(updates.try_recv().is_err());
}

#[test]
fn test_watchers_see_revisions_in_order_under_concurrent_pushes() {
    let bus = EventBus::new();
    let directory = ServiceDirectory::subscribe(&bus);
    let mut updates = directory.watch();

    std::thread::scope(|s| {
        for writer in 0..4u16 {
            let bus = bus.clone();
            s.spawn(move || {
                for n in 0..50u16 {
                    let instance = Arc::new(ServiceInstance::new("orders", "10.0.0.1", writer * 100 + n));
                    bus.publish(&ServiceInstancesChangedEvent::new("orders", vec![instance]).into());
                }
            });
        }
    });

    let mut last = 0;
    let mut received = 0;
    loop {
        let snapshot = match updates.try_recv() {
            Ok(snapshot) => snapshot,
            Err(TryRecvError::Overflowed(_)) => continue,
            Err(_) => break,
        };
        assert!(snapshot.revision() > last, "revision went backwards: {} after {last}", snapshot.revision());
        last = snapshot.revision();
        received += 1;
    }
    assert!(received > 0);
    assert_eq!(last, directory.snapshot("orders").revision());
}

#[test]
fn test_concurrent_readers_never_see_torn_snapshots() {
    const WRITERS: u64 = 4;
    const PUSHES: u64 = 200;

    let bus = EventBus::new();
    let directory = ServiceDirectory::subscribe(&bus);
    let revision = Arc::new(AtomicU64::new(0));
    let done = Arc::new(AtomicBool::new(false));

    std::thread::scope(|s| {
        for _ in 0..WRITERS {
            let bus = bus.clone();
            let revision = revision.clone();
            s.spawn(move || {
                for _ in 0..PUSHES {
                    let rev = revision.fetch_add(1, Ordering::SeqCst) + 1;
                    // Every push has `rev % 7 + 1` instances, all tagged with the push revision.
                    let instances = (0..(rev % 7 + 1))
                        .map(|n| Arc::new(ServiceInstance::new("orders", format!("10.0.{rev}.{n}"), 20000).with_metadata("rev", rev.to_string())))
                        .collect();
                    bus.publish(&ServiceInstancesChangedEvent::new("orders", instances).with_revision(rev).into());
                }
            });
        }
        for _ in 0..4 {
            let directory = directory.clone();
            let done = done.clone();
            s.spawn(move || {
                let mut last = 0;
                while !done.load(Ordering::SeqCst) {
                    let snapshot = directory.snapshot("orders");
                    if snapshot.is_empty() {
                        continue;
                    }
                    let rev: u64 = snapshot[0].metadata["rev"].parse().unwrap();
                    assert_eq!(snapshot.len() as u64, rev % 7 + 1);
                    assert!(snapshot.iter().all(|i| i.metadata["rev"].as_str() == rev.to_string()));
                    assert_eq!(snapshot.source_revision(), Some(rev));
                    assert!(rev >= last, "revision went backwards: {rev} < {last}");
                    last = rev;
                }
            });
        }
        // Writers are joined by the scope; flip the flag from a helper once they are finished.
        s.spawn(|| {
            while revision.load(Ordering::SeqCst) < WRITERS * PUSHES {
                std::thread::yield_now();
            }
            std::thread::sleep(Duration::from_millis(10));
            done.store(true, Ordering::SeqCst);
        });
    });

    assert_eq!(directory.snapshot("orders").source_revision(), Some(WRITERS * PUSHES));
}
