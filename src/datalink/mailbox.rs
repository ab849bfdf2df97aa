//! Single-slot blocking hand-off between a link engine and its users.
//!
//! A [`Mailbox`] holds at most one value. Putting into a full mailbox blocks
//! until the other side takes the value out; taking from an empty mailbox
//! blocks until a value is put. Closing a mailbox wakes every waiter with
//! [`DataLinkError::Closed`]; a value already in the slot can still be taken.
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//! use bacnet_link::datalink::mailbox::Mailbox;
//!
//! let mailbox = Arc::new(Mailbox::new());
//! let producer = Arc::clone(&mailbox);
//! thread::spawn(move || producer.put(vec![1u8, 2, 3]));
//! assert_eq!(mailbox.take().unwrap(), vec![1, 2, 3]);
//! ```

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::datalink::{lock, DataLinkError, Result};

#[derive(Debug)]
struct Slot<T> {
    item: Option<T>,
    closed: bool,
}

/// Capacity-one blocking channel.
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Mutex<Slot<T>>,
    changed: Condvar,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot { item: None, closed: false }),
            changed: Condvar::new(),
        }
    }

    /// A mailbox that refuses values until [`open`](Self::open) is called.
    pub fn closed() -> Self {
        Self {
            slot: Mutex::new(Slot { item: None, closed: true }),
            changed: Condvar::new(),
        }
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Slot<T>>) -> MutexGuard<'a, Slot<T>> {
        self.changed.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the slot is free, then store `item`.
    ///
    /// # Errors
    ///
    /// [`DataLinkError::Closed`] if the mailbox is or becomes closed.
    pub fn put(&self, item: T) -> Result<()> {
        let mut slot = lock(&self.slot);
        loop {
            if slot.closed {
                return Err(DataLinkError::Closed);
            }
            if slot.item.is_none() {
                slot.item = Some(item);
                self.changed.notify_all();
                return Ok(());
            }
            slot = self.wait(slot);
        }
    }

    /// Store `item` if the slot is free and open, otherwise hand it back.
    pub fn try_put(&self, item: T) -> core::result::Result<(), T> {
        let mut slot = lock(&self.slot);
        if slot.closed || slot.item.is_some() {
            return Err(item);
        }
        slot.item = Some(item);
        self.changed.notify_all();
        Ok(())
    }

    /// Block until a value is available and take it.
    pub fn take(&self) -> Result<T> {
        let mut slot = lock(&self.slot);
        loop {
            if let Some(item) = slot.item.take() {
                self.changed.notify_all();
                return Ok(item);
            }
            if slot.closed {
                return Err(DataLinkError::Closed);
            }
            slot = self.wait(slot);
        }
    }

    /// Like [`take`](Self::take) with an upper bound on the wait.
    ///
    /// # Errors
    ///
    /// [`DataLinkError::Timeout`] when nothing arrived within `timeout`,
    /// [`DataLinkError::Closed`] if the mailbox is closed and empty.
    pub fn take_timeout(&self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = lock(&self.slot);
        loop {
            if let Some(item) = slot.item.take() {
                self.changed.notify_all();
                return Ok(item);
            }
            if slot.closed {
                return Err(DataLinkError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DataLinkError::Timeout);
            }
            slot = self
                .changed
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Take the value if there is one.
    pub fn try_take(&self) -> Option<T> {
        let mut slot = lock(&self.slot);
        let item = slot.item.take();
        if item.is_some() {
            self.changed.notify_all();
        }
        item
    }

    /// Inspect the value in the slot without removing it.
    pub fn peek_with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        lock(&self.slot).item.as_ref().map(f)
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.slot).item.is_none()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.slot).closed
    }

    /// Refuse new values and wake all waiters.
    pub fn close(&self) {
        lock(&self.slot).closed = true;
        self.changed.notify_all();
    }

    pub fn open(&self) {
        lock(&self.slot).closed = false;
        self.changed.notify_all();
    }
}
