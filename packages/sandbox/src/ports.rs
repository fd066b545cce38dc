// ABOUTME: Host port allocation for sandbox service endpoints
// ABOUTME: Probes upward from a preferred port, skipping OS-bound and already reserved ports

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, TcpListener};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::ProvisioningError;

/// Maximum number of ports probed for each requested port
pub const DEFAULT_PROBE_WINDOW: u16 = 1000;

/// Hands out free TCP ports and remembers which ones belong to live bindings.
///
/// Reservations are made under a single lock, so two concurrent `allocate`
/// calls never receive overlapping port sets. The OS probe and the later
/// container launch are not atomic; a port grabbed in between shows up as a
/// [`ProvisioningError::PortConflict`] at launch time.
#[derive(Clone)]
pub struct PortAllocator {
    host: IpAddr,
    probe_window: u16,
    reserved: Arc<Mutex<HashSet<u16>>>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

impl PortAllocator {
    /// Create an allocator probing ports on the given host address
    pub fn new(host: IpAddr) -> Self {
        Self {
            host,
            probe_window: DEFAULT_PROBE_WINDOW,
            reserved: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Override the per-port probe cap
    pub fn with_probe_window(mut self, probe_window: u16) -> Self {
        self.probe_window = probe_window.max(1);
        self
    }

    /// Reserve `count` distinct free ports, searching upward from `preferred_start`
    pub fn allocate(
        &self,
        preferred_start: u16,
        count: usize,
    ) -> Result<Vec<u16>, ProvisioningError> {
        let mut reserved = self.lock();
        let mut chosen = Vec::with_capacity(count);
        let mut cursor = Some(preferred_start);

        for _ in 0..count {
            let search_start = match cursor {
                Some(port) => port,
                None => {
                    return Err(ProvisioningError::ResourceExhausted {
                        start: preferred_start,
                        window: self.probe_window,
                    })
                }
            };

            let port = self
                .probe_from(search_start, &reserved, &chosen)
                .ok_or_else(|| {
                    warn!(
                        start = search_start,
                        window = self.probe_window,
                        "Port search window exhausted"
                    );
                    ProvisioningError::ResourceExhausted {
                        start: search_start,
                        window: self.probe_window,
                    }
                })?;

            chosen.push(port);
            cursor = port.checked_add(1);
        }

        reserved.extend(chosen.iter().copied());
        debug!(ports = ?chosen, "Reserved ports");
        Ok(chosen)
    }

    /// Return ports to the pool once their binding is gone
    pub fn release(&self, ports: &[u16]) {
        let mut reserved = self.lock();
        for port in ports {
            reserved.remove(port);
        }
        debug!(ports = ?ports, "Released ports");
    }

    /// Whether a port is currently held by a live binding
    pub fn is_reserved(&self, port: u16) -> bool {
        self.lock().contains(&port)
    }

    /// Number of ports currently reserved
    pub fn reserved_count(&self) -> usize {
        self.lock().len()
    }

    fn probe_from(&self, start: u16, reserved: &HashSet<u16>, chosen: &[u16]) -> Option<u16> {
        let mut port = start;
        for _ in 0..self.probe_window {
            if !reserved.contains(&port) && !chosen.contains(&port) && self.is_port_free(port) {
                return Some(port);
            }
            port = port.checked_add(1)?;
        }
        None
    }

    /// A port held on any local address counts as taken, so the wildcard
    /// address is probed as well as the configured host
    fn is_port_free(&self, port: u16) -> bool {
        if port == 0 {
            return false;
        }
        let wildcard = match self.host {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        TcpListener::bind((wildcard, port)).is_ok()
            && (self.host == wildcard || TcpListener::bind((self.host, port)).is_ok())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<u16>> {
        self.reserved.lock().unwrap_or_else(|poisoned| {
            warn!("Port reservation mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_allocate_returns_distinct_ports_from_start() {
        let allocator = PortAllocator::default();
        let ports = allocator.allocate(21000, 4).unwrap();

        assert_eq!(ports.len(), 4);
        let unique: HashSet<_> = ports.iter().collect();
        assert_eq!(unique.len(), 4);
        assert!(ports.iter().all(|&p| p >= 21000));
        assert!(ports.iter().all(|&p| allocator.is_reserved(p)));
    }

    #[test]
    fn test_allocate_skips_reserved_ports() {
        let allocator = PortAllocator::default();
        let first = allocator.allocate(21100, 2).unwrap();
        let second = allocator.allocate(21100, 2).unwrap();

        assert!(first.iter().all(|p| !second.contains(p)));
    }

    #[test]
    fn test_allocate_skips_os_bound_port() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let bound = listener.local_addr().unwrap().port();

        let allocator = PortAllocator::default();
        let ports = allocator.allocate(bound, 1).unwrap();

        assert_ne!(ports[0], bound);
        assert!(ports[0] > bound);
    }

    #[test]
    fn test_release_makes_port_available_again() {
        let allocator = PortAllocator::default();
        let ports = allocator.allocate(21200, 1).unwrap();
        allocator.release(&ports);

        assert!(!allocator.is_reserved(ports[0]));
        assert_eq!(allocator.reserved_count(), 0);
    }

    #[test]
    fn test_exhausted_window_fails_without_reserving() {
        let allocator = PortAllocator::default().with_probe_window(3);
        let held = allocator.allocate(21300, 3).unwrap();
        let before = allocator.reserved_count();

        // Same cap as DEFAULT_PROBE_WINDOW, shrunk so the window is cheap to fill.
        // Every port in the window starting at held[0] is reserved or OS-bound
        let result = allocator.allocate(held[0], 1);
        assert!(matches!(
            result,
            Err(ProvisioningError::ResourceExhausted { .. })
        ));
        assert_eq!(allocator.reserved_count(), before);
    }

    #[test]
    fn test_default_window_caps_search_at_one_thousand_probes() {
        let allocator = PortAllocator::default();
        let start = 40000;
        let held = allocator
            .allocate(start, DEFAULT_PROBE_WINDOW as usize)
            .unwrap();
        assert!(*held.last().unwrap() >= start + DEFAULT_PROBE_WINDOW - 1);

        let result = allocator.allocate(start, 1);
        assert!(matches!(
            result,
            Err(ProvisioningError::ResourceExhausted { window: 1000, .. })
        ));
        assert_eq!(allocator.reserved_count(), DEFAULT_PROBE_WINDOW as usize);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_allocate_skips_port_bound_on_other_loopback_address() {
        let listener = TcpListener::bind(("127.0.0.2", 0)).unwrap();
        let bound = listener.local_addr().unwrap().port();

        let allocator = PortAllocator::default();
        let ports = allocator.allocate(bound, 1).unwrap();

        assert_ne!(ports[0], bound);
    }

    #[test]
    fn test_running_past_last_port_is_exhaustion() {
        let allocator = PortAllocator::default();
        let result = allocator.allocate(u16::MAX, 2);
        assert!(matches!(
            result,
            Err(ProvisioningError::ResourceExhausted { .. })
        ));
        assert_eq!(allocator.reserved_count(), 0);
    }

    #[test]
    fn test_concurrent_allocations_never_overlap() {
        let allocator = PortAllocator::default();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = allocator.clone();
                std::thread::spawn(move || allocator.allocate(22000, 4).unwrap())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for port in handle.join().unwrap() {
                assert!(seen.insert(port), "port {} handed out twice", port);
            }
        }
        assert_eq!(seen.len(), 32);
    }
}
