//! Network-layer view of the attached data links.
//!
//! Links register under a name and receive an [`InterfaceId`]. When a link
//! delivers an NPDU it raises its ready bit through a [`PduNotifier`]; the
//! network task blocks in [`DataLinkRegistry::wait_ready`] until some
//! interface has something to read. Repeated notifications for the same
//! interface coalesce until it is reported.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::datalink::{lock, DataLink, DataLinkAddress, DataLinkError, Result};

/// Most interfaces a registry holds.
pub const MAX_INTERFACES: usize = 12;

/// Index of a registered interface.
pub type InterfaceId = usize;

#[derive(Debug, Default)]
struct ReadySet {
    mask: Mutex<u32>,
    cond: Condvar,
}

/// Raises the ready bit of one interface.
#[derive(Debug, Clone)]
pub struct PduNotifier {
    id: InterfaceId,
    ready: Arc<ReadySet>,
}

impl PduNotifier {
    pub fn id(&self) -> InterfaceId {
        self.id
    }

    pub fn notify(&self) {
        *lock(&self.ready.mask) |= 1 << self.id;
        self.ready.cond.notify_all();
    }
}

struct Interface {
    name: String,
    link: Box<dyn DataLink>,
}

/// Table of data links attached to a network layer.
pub struct DataLinkRegistry {
    interfaces: Vec<Interface>,
    ready: Arc<ReadySet>,
}

impl Default for DataLinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLinkRegistry {
    pub fn new() -> Self {
        Self {
            interfaces: Vec::with_capacity(MAX_INTERFACES),
            ready: Arc::new(ReadySet::default()),
        }
    }

    /// Attach `link` under `name`.
    ///
    /// # Errors
    ///
    /// [`DataLinkError::BufferFull`] once [`MAX_INTERFACES`] links are
    /// registered, [`DataLinkError::AddressError`] for a duplicate name.
    pub fn register(&mut self, name: &str, mut link: Box<dyn DataLink>) -> Result<InterfaceId> {
        if self.interfaces.len() >= MAX_INTERFACES {
            return Err(DataLinkError::BufferFull);
        }
        if self.find(name).is_some() {
            return Err(DataLinkError::AddressError(format!(
                "interface {} already registered",
                name
            )));
        }

        let id = self.interfaces.len();
        link.set_notifier(PduNotifier {
            id,
            ready: Arc::clone(&self.ready),
        });
        info!(
            "registered {} interface {} as #{} ({})",
            link.link_type(),
            name,
            id,
            link.local_address()
        );
        self.interfaces.push(Interface {
            name: name.to_string(),
            link,
        });
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<InterfaceId> {
        self.interfaces.iter().position(|i| i.name == name)
    }

    pub fn name(&self, id: InterfaceId) -> Option<&str> {
        self.interfaces.get(id).map(|i| i.name.as_str())
    }

    pub fn link_mut(&mut self, id: InterfaceId) -> Option<&mut (dyn DataLink + 'static)> {
        self.interfaces.get_mut(id).map(|i| i.link.as_mut())
    }

    /// Send an NPDU through interface `id`.
    pub fn send(&mut self, id: InterfaceId, npdu: &[u8], dest: &DataLinkAddress) -> Result<()> {
        let link = self
            .link_mut(id)
            .ok_or_else(|| DataLinkError::AddressError(format!("no interface #{}", id)))?;
        link.send_frame(npdu, dest)
    }

    /// Receive from interface `id`, blocking until it delivers.
    pub fn recv(&mut self, id: InterfaceId) -> Result<(Vec<u8>, DataLinkAddress)> {
        let link = self
            .link_mut(id)
            .ok_or_else(|| DataLinkError::AddressError(format!("no interface #{}", id)))?;
        link.receive_frame()
    }

    /// Take the lowest pending ready bit without blocking.
    pub fn try_ready(&self) -> Option<InterfaceId> {
        let mut mask = lock(&self.ready.mask);
        Self::take_lowest(&mut mask)
    }

    /// Block up to `timeout` until an interface has an NPDU to read.
    pub fn wait_ready(&self, timeout: Duration) -> Option<InterfaceId> {
        let deadline = Instant::now() + timeout;
        let mut mask = lock(&self.ready.mask);
        loop {
            if let Some(id) = Self::take_lowest(&mut mask) {
                debug!("interface #{} ready", id);
                return Some(id);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            mask = self
                .ready
                .cond
                .wait_timeout(mask, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn take_lowest(mask: &mut u32) -> Option<InterfaceId> {
        if *mask == 0 {
            return None;
        }
        let id = mask.trailing_zeros() as usize;
        *mask &= !(1 << id);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datalink::DataLinkType;
    use std::thread;

    struct NullLink {
        notifier: Option<PduNotifier>,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl NullLink {
        fn new() -> Self {
            Self {
                notifier: None,
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl DataLink for NullLink {
        fn send_frame(&mut self, frame: &[u8], _dest: &DataLinkAddress) -> Result<()> {
            self.sent.lock().unwrap().push(frame.to_vec());
            if let Some(notifier) = &self.notifier {
                notifier.notify();
            }
            Ok(())
        }

        fn receive_frame(&mut self) -> Result<(Vec<u8>, DataLinkAddress)> {
            Err(DataLinkError::Timeout)
        }

        fn link_type(&self) -> DataLinkType {
            DataLinkType::Mstp
        }

        fn local_address(&self) -> DataLinkAddress {
            DataLinkAddress::Mstp(1)
        }

        fn set_notifier(&mut self, notifier: PduNotifier) {
            self.notifier = Some(notifier);
        }
    }

    #[test]
    fn test_register_limit() {
        let mut registry = DataLinkRegistry::new();
        for i in 0..MAX_INTERFACES {
            assert_eq!(registry.register(&format!("if{}", i), Box::new(NullLink::new())).unwrap(), i);
        }
        assert!(matches!(
            registry.register("extra", Box::new(NullLink::new())),
            Err(DataLinkError::BufferFull)
        ));
        assert_eq!(registry.find("if3"), Some(3));
        assert_eq!(registry.name(11), Some("if11"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = DataLinkRegistry::new();
        registry.register("mstp0", Box::new(NullLink::new())).unwrap();
        assert!(registry.register("mstp0", Box::new(NullLink::new())).is_err());
    }

    #[test]
    fn test_notifications_coalesce_and_report_lowest_first() {
        let mut registry = DataLinkRegistry::new();
        registry.register("a", Box::new(NullLink::new())).unwrap();
        registry.register("b", Box::new(NullLink::new())).unwrap();

        registry.send(1, &[1], &DataLinkAddress::Broadcast).unwrap();
        registry.send(1, &[2], &DataLinkAddress::Broadcast).unwrap();
        registry.send(0, &[3], &DataLinkAddress::Broadcast).unwrap();

        assert_eq!(registry.try_ready(), Some(0));
        assert_eq!(registry.try_ready(), Some(1));
        assert_eq!(registry.try_ready(), None);
    }

    #[test]
    fn test_wait_ready_wakes_on_notify() {
        let mut registry = DataLinkRegistry::new();
        let mut link = NullLink::new();
        let notifier = PduNotifier {
            id: 0,
            ready: Arc::clone(&registry.ready),
        };
        link.set_notifier(notifier.clone());
        registry.register("a", Box::new(link)).unwrap();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            notifier.notify();
        });
        assert_eq!(registry.wait_ready(Duration::from_secs(2)), Some(0));
        handle.join().unwrap();
        assert_eq!(registry.wait_ready(Duration::from_millis(10)), None);
    }
}
