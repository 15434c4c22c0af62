//! The device registry: a lazily-constructed singleton that enumerates
//! attached serial devices and posts add/remove notifications as they come
//! and go.
//!
//! The OS-specific registry walk that actually produces device metadata is
//! explicitly out of scope for this crate — it's modeled as the
//! [`PortDiscovery`] trait, with [`PosixGlobDiscovery`] as the one portable,
//! metadata-free implementation this crate ships.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

use crate::port::{Port, PortKind};

/// A freshly-discovered port's identity, as produced by a [`PortDiscovery`]
/// scan. Distinct from [`Port`] itself: this is the raw external-collaborator
/// output before the registry wraps it in the stateful, lockable `Port`
/// type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPort {
    /// The device node path; this crate's port identity.
    pub bsd_path: String,
    /// Short human label.
    pub service_name: String,
    /// Closed-set service classification.
    pub service_type: PortKind,
    /// OS registry metadata, if the discovery backend has any.
    pub properties: BTreeMap<String, String>,
}

/// The OS-specific device registry walk, kept as an external collaborator.
/// Implement this to plug in a richer backend (udev, IOKit, ...); this
/// crate ships only [`PosixGlobDiscovery`].
pub trait PortDiscovery: Send + Sync {
    /// Produces the current set of attached serial devices.
    fn scan(&self) -> io::Result<Vec<DiscoveredPort>>;
}

/// Portable discovery: lists `/dev/cu.*` and `/dev/tty.*` device nodes with
/// no OS metadata scraping. Real vendor/product/serial-number metadata
/// (udev properties on Linux, IOKit registry entries on macOS) is out of
/// scope here; a caller wanting that can supply their own
/// [`PortDiscovery`] and feed it to [`DeviceRegistry::with_discovery`].
#[derive(Debug, Copy, Clone, Default)]
pub struct PosixGlobDiscovery;

impl PortDiscovery for PosixGlobDiscovery {
    fn scan(&self) -> io::Result<Vec<DiscoveredPort>> {
        let mut found = Vec::new();
        let dev = std::path::Path::new("/dev");
        let entries = match std::fs::read_dir(dev) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(found),
            Err(err) => return Err(err),
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !(name.starts_with("cu.") || name.starts_with("tty.")) {
                continue;
            }
            let bsd_path = format!("/dev/{name}");
            found.push(DiscoveredPort {
                bsd_path,
                service_name: name.to_owned(),
                service_type: PortKind::AllTypes,
                properties: BTreeMap::new(),
            });
        }

        found.sort_by(|a, b| a.bsd_path.cmp(&b.bsd_path));
        Ok(found)
    }
}

/// An add/remove notification posted by the registry.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// New devices appeared. Payload carries the `AddedPorts` list.
    DidAddPorts(Vec<Arc<Port>>),
    /// Devices disappeared. Payload carries the `RemovedPorts` list.
    DidRemovePorts(Vec<Arc<Port>>),
}

type Observer = Box<dyn Fn(&RegistryEvent) + Send + Sync>;

/// Singleton device registry. Lazily constructs on first access; that first
/// construction starts a background poll loop standing in for "a run loop
/// or equivalent event-dispatch thread" bound to the OS's device
/// hotplug events.
pub struct DeviceRegistry {
    ports: Mutex<BTreeMap<String, Arc<Port>>>,
    discovery: Box<dyn PortDiscovery>,
    observers: Mutex<Vec<Observer>>,
    stop: Arc<AtomicBool>,
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("port_count", &self.ports.lock().unwrap().len())
            .finish()
    }
}

static REGISTRY: OnceLock<Arc<DeviceRegistry>> = OnceLock::new();

impl DeviceRegistry {
    /// Returns the shared singleton, constructing and starting its hotplug
    /// poll loop on first access.
    pub fn shared() -> Arc<DeviceRegistry> {
        REGISTRY
            .get_or_init(|| DeviceRegistry::with_discovery(Box::new(PosixGlobDiscovery)))
            .clone()
    }

    /// Builds a registry around a custom discovery backend and starts its
    /// poll loop immediately. Exposed so tests (and callers wanting real
    /// udev/IOKit metadata) can avoid the process-wide singleton.
    #[must_use]
    pub fn with_discovery(discovery: Box<dyn PortDiscovery>) -> Arc<DeviceRegistry> {
        let registry = Arc::new(DeviceRegistry {
            ports: Mutex::new(BTreeMap::new()),
            discovery,
            observers: Mutex::new(Vec::new()),
            stop: Arc::new(AtomicBool::new(false)),
        });

        registry.rescan_and_notify();
        registry.spawn_poll_loop(Duration::from_millis(500));
        registry
    }

    /// Snapshot of the current live set of ports.
    #[must_use]
    pub fn all_ports(&self) -> Vec<Arc<Port>> {
        self.ports.lock().unwrap().values().cloned().collect()
    }

    /// Filters the live set by service type.
    #[must_use]
    pub fn ports_of_type(&self, kind: PortKind) -> Vec<Arc<Port>> {
        self.ports
            .lock()
            .unwrap()
            .values()
            .filter(|p| kind == PortKind::AllTypes || p.service_type() == kind)
            .cloned()
            .collect()
    }

    /// Exact match on `service_name`.
    #[must_use]
    pub fn port_with_name(&self, name: &str) -> Option<Arc<Port>> {
        self.ports
            .lock()
            .unwrap()
            .values()
            .find(|p| p.service_name() == name)
            .cloned()
    }

    /// Registers an observer invoked on every [`RegistryEvent`]. Observers
    /// are delivered on whatever thread is draining the OS event stream —
    /// in this implementation, the poll-loop thread.
    pub fn observe(&self, observer: impl Fn(&RegistryEvent) + Send + Sync + 'static) {
        self.observers.lock().unwrap().push(Box::new(observer));
    }

    /// Stops the background poll loop. Mainly useful for tests; production
    /// processes rely on implicit teardown at process exit.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn rescan_and_notify(&self) {
        let Ok(discovered) = self.discovery.scan() else {
            log::debug!("device discovery scan failed; keeping previous port set");
            return;
        };

        let mut ports = self.ports.lock().unwrap();
        let discovered_paths: std::collections::BTreeSet<&str> =
            discovered.iter().map(|d| d.bsd_path.as_str()).collect();

        let removed: Vec<Arc<Port>> = ports
            .iter()
            .filter(|(path, _)| !discovered_paths.contains(path.as_str()))
            .map(|(_, port)| Arc::clone(port))
            .collect();
        for port in &removed {
            ports.remove(port.bsd_path());
        }

        let mut added = Vec::new();
        for d in discovered {
            if !ports.contains_key(&d.bsd_path) {
                let port = Arc::new(Port::new(
                    d.bsd_path.clone(),
                    d.service_name,
                    d.service_type,
                    d.properties,
                ));
                ports.insert(d.bsd_path, Arc::clone(&port));
                added.push(port);
            }
        }
        drop(ports);

        if !removed.is_empty() {
            log::debug!("registry observed {} removed port(s)", removed.len());
            self.notify(&RegistryEvent::DidRemovePorts(removed));
        }
        if !added.is_empty() {
            log::debug!("registry observed {} added port(s)", added.len());
            self.notify(&RegistryEvent::DidAddPorts(added));
        }
    }

    fn notify(&self, event: &RegistryEvent) {
        for observer in self.observers.lock().unwrap().iter() {
            observer(event);
        }
    }

    fn spawn_poll_loop(self: &Arc<Self>, interval: Duration) {
        let registry = Arc::clone(self);
        thread::spawn(move || {
            while !registry.stop.load(Ordering::SeqCst) {
                thread::sleep(interval);
                if registry.stop.load(Ordering::SeqCst) {
                    break;
                }
                registry.rescan_and_notify();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct ScriptedDiscovery {
        scans: StdMutex<Vec<Vec<DiscoveredPort>>>,
    }

    impl PortDiscovery for ScriptedDiscovery {
        fn scan(&self) -> io::Result<Vec<DiscoveredPort>> {
            let mut scans = self.scans.lock().unwrap();
            if scans.len() > 1 {
                Ok(scans.remove(0))
            } else {
                Ok(scans.first().cloned().unwrap_or_default())
            }
        }
    }

    fn discovered(path: &str) -> DiscoveredPort {
        DiscoveredPort {
            bsd_path: path.to_owned(),
            service_name: path.trim_start_matches("/dev/").to_owned(),
            service_type: PortKind::RS232,
            properties: BTreeMap::new(),
        }
    }

    #[test]
    fn first_scan_populates_all_ports_without_crashing_notify() {
        let discovery = ScriptedDiscovery {
            scans: StdMutex::new(vec![vec![discovered("/dev/cu.usbserial-XYZ")]]),
        };
        let registry = DeviceRegistry::with_discovery(Box::new(discovery));
        registry.shutdown();
        let ports = registry.all_ports();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].bsd_path(), "/dev/cu.usbserial-XYZ");
    }

    #[test]
    fn port_with_name_matches_exactly() {
        let discovery = ScriptedDiscovery {
            scans: StdMutex::new(vec![vec![discovered("/dev/cu.usbserial-XYZ")]]),
        };
        let registry = DeviceRegistry::with_discovery(Box::new(discovery));
        registry.shutdown();
        assert!(registry.port_with_name("cu.usbserial-XYZ").is_some());
        assert!(registry.port_with_name("cu.nonexistent").is_none());
    }

    #[test]
    fn rescan_emits_add_and_remove_events() {
        let discovery = ScriptedDiscovery {
            scans: StdMutex::new(vec![
                vec![discovered("/dev/cu.usbserial-XYZ")],
                vec![discovered("/dev/cu.usbserial-ABC")],
            ]),
        };
        let registry = DeviceRegistry::with_discovery(Box::new(discovery));

        let added = Arc::new(StdMutex::new(Vec::new()));
        let removed = Arc::new(StdMutex::new(Vec::new()));
        {
            let added = Arc::clone(&added);
            let removed = Arc::clone(&removed);
            registry.observe(move |event| match event {
                RegistryEvent::DidAddPorts(ports) => {
                    added.lock().unwrap().extend(ports.iter().map(|p| p.bsd_path().to_owned()));
                }
                RegistryEvent::DidRemovePorts(ports) => {
                    removed
                        .lock()
                        .unwrap()
                        .extend(ports.iter().map(|p| p.bsd_path().to_owned()));
                }
            });
        }

        registry.rescan_and_notify();
        registry.shutdown();

        assert_eq!(*added.lock().unwrap(), vec!["/dev/cu.usbserial-ABC".to_owned()]);
        assert_eq!(*removed.lock().unwrap(), vec!["/dev/cu.usbserial-XYZ".to_owned()]);
    }
}
