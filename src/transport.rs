//! Serial transport and clock collaborators.
//!
//! A link engine only needs two things from the platform: a byte pipe with a
//! bounded receive wait, and a wrapping millisecond clock. UART drivers
//! implement [`SerialTransport`]; [`LoopbackBus`] is an in-memory multi-drop
//! segment for tests and demos.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::trace;

use crate::datalink::{lock, DataLinkError, Result};

/// Byte stream underneath a link.
///
/// Both methods take `&self`: the engine thread receives while callers of
/// `send` may transmit from their own thread, the way a UART driver is
/// shared.
pub trait SerialTransport: Send + Sync {
    /// Write `buf` to the line, returning the number of octets accepted.
    fn send(&self, buf: &[u8]) -> Result<usize>;

    /// Wait up to `timeout` for at least one octet.
    ///
    /// # Errors
    ///
    /// Returns [`DataLinkError::Timeout`] if nothing arrived in time.
    fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
}

impl<T: SerialTransport + ?Sized> SerialTransport for Arc<T> {
    fn send(&self, buf: &[u8]) -> Result<usize> {
        (**self).send(buf)
    }

    fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).recv(buf, timeout)
    }
}

impl<T: SerialTransport + ?Sized> SerialTransport for Box<T> {
    fn send(&self, buf: &[u8]) -> Result<usize> {
        (**self).send(buf)
    }

    fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).recv(buf, timeout)
    }
}

/// Free running millisecond counter. Wraps at `u32::MAX`.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u32;
}

/// Clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        // Truncation is the wraparound
        self.start.elapsed().as_millis() as u32
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU32,
}

impl ManualClock {
    pub fn new(start: u32) -> Self {
        Self { now: AtomicU32::new(start) }
    }

    pub fn set(&self, ms: u32) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u32) -> u32 {
        self.now.fetch_add(ms, Ordering::SeqCst).wrapping_add(ms)
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}

/// In-memory multi-drop segment.
///
/// Every octet written by one attached port is received by all other ports,
/// like a half-duplex EIA-485 line without local echo.
#[derive(Clone, Default)]
pub struct LoopbackBus {
    drops: Arc<Mutex<Drops>>,
}

#[derive(Default)]
struct Drops {
    /// Port ids are never reused, even after a port goes away
    next_id: usize,
    ports: Vec<(usize, Sender<Vec<u8>>)>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new port to the segment.
    pub fn attach(&self) -> LoopbackPort {
        let (tx, rx) = mpsc::channel();
        let mut drops = lock(&self.drops);
        let id = drops.next_id;
        drops.next_id += 1;
        drops.ports.push((id, tx));
        LoopbackPort {
            id,
            bus: self.clone(),
            rx: Mutex::new(rx),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Two ports wired back to back, as for a PTP cable.
    pub fn pair() -> (LoopbackPort, LoopbackPort) {
        let bus = LoopbackBus::new();
        (bus.attach(), bus.attach())
    }

    fn broadcast(&self, from: usize, buf: &[u8]) {
        let mut drops = lock(&self.drops);
        // Ports that were dropped have closed their receiver
        drops.ports.retain(|(id, tx)| *id == from || tx.send(buf.to_vec()).is_ok());
    }
}

/// One station's attachment to a [`LoopbackBus`].
pub struct LoopbackPort {
    id: usize,
    bus: LoopbackBus,
    rx: Mutex<Receiver<Vec<u8>>>,
    pending: Mutex<VecDeque<u8>>,
}

impl LoopbackPort {
    fn drain_pending(&self, buf: &mut [u8]) -> usize {
        let mut pending = lock(&self.pending);
        let n = pending.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(pending.drain(..n)) {
            *slot = byte;
        }
        n
    }
}

impl SerialTransport for LoopbackPort {
    fn send(&self, buf: &[u8]) -> Result<usize> {
        trace!("loopback[{}] TX {} octets", self.id, buf.len());
        self.bus.broadcast(self.id, buf);
        Ok(buf.len())
    }

    fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let n = self.drain_pending(buf);
        if n > 0 {
            return Ok(n);
        }

        let chunk = {
            let rx = lock(&self.rx);
            match rx.recv_timeout(timeout) {
                Ok(chunk) => chunk,
                Err(RecvTimeoutError::Timeout) => return Err(DataLinkError::Timeout),
                Err(RecvTimeoutError::Disconnected) => return Err(DataLinkError::Closed),
            }
        };

        lock(&self.pending).extend(chunk);
        Ok(self.drain_pending(buf))
    }
}
