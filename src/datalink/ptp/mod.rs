//! BACnet PTP data link (ASHRAE 135 Clause 10).
//!
//! A [`PtpLink`] runs one half of a point-to-point connection over a serial
//! line. The engine thread ([`PtpLink::run`]) reads the line and drives the
//! [`PtpMachine`]; [`PtpLink::send`] transmits from the caller's thread as
//! soon as the peer is ready and then waits for the acknowledgement.
//!
//! Only one NPDU is ever outstanding. Concurrent senders queue on the
//! transmit slot in the order the lock hands it out.

pub mod frame;
pub mod machine;

pub use frame::{PtpDecoder, PtpFrame, PtpFrameType};
pub use machine::{Action, PtpMachine, PtpState, Step};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, trace, warn};

use crate::config::PtpConfig;
use crate::datalink::mailbox::Mailbox;
use crate::datalink::{
    lock, DataLink, DataLinkAddress, DataLinkError, DataLinkType, EventHandler, FrameError,
    LinkEvent, PduNotifier, Result,
};
use crate::transport::{Clock, SerialTransport};

/// PTP link statistics.
#[derive(Debug, Clone)]
pub struct PtpStats {
    pub rx_frames: u64,
    pub tx_frames: u64,
    pub header_crc_errors: u64,
    pub data_crc_errors: u64,
    pub sync_errors: u64,
    pub frame_errors: u64,

    pub rx_data: u64,
    pub tx_data: u64,
    pub rx_duplicates: u64,
    /// Received NPDUs dropped because the inbound slot was still occupied
    pub rx_dropped: u64,
    pub retransmissions: u64,
    pub send_failures: u64,
    pub heartbeats: u64,

    pub connects: u64,
    pub disconnects: u64,

    pub state: PtpState,
    pub tx_xon: bool,
}

impl Default for PtpStats {
    fn default() -> Self {
        Self {
            rx_frames: 0,
            tx_frames: 0,
            header_crc_errors: 0,
            data_crc_errors: 0,
            sync_errors: 0,
            frame_errors: 0,
            rx_data: 0,
            tx_data: 0,
            rx_duplicates: 0,
            rx_dropped: 0,
            retransmissions: 0,
            send_failures: 0,
            heartbeats: 0,
            connects: 0,
            disconnects: 0,
            state: PtpState::Disconnected,
            tx_xon: false,
        }
    }
}

struct Inner {
    machine: PtpMachine,
    /// Completion channel of the caller waiting on the outstanding NPDU
    waiter: Option<mpsc::Sender<Result<usize>>>,
    stats: PtpStats,
}

#[derive(Default)]
struct Hooks {
    on_event: Option<EventHandler>,
    notifier: Option<PduNotifier>,
}

struct Shared {
    config: PtpConfig,
    transport: Box<dyn SerialTransport>,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    /// Signalled whenever the transmit slot frees up or the state changes
    slot_free: Condvar,
    inbound: Mailbox<Bytes>,
    stopping: AtomicBool,
    hooks: Mutex<Hooks>,
}

impl Shared {
    fn now(&self) -> u32 {
        self.clock.now_ms()
    }

    fn finish(&self, inner: &mut Inner, result: Result<usize>) {
        if let Some(waiter) = inner.waiter.take() {
            // The sender may have given up already
            let _ = waiter.send(result);
        }
        self.slot_free.notify_all();
    }

    /// Carry out the actions of `step`. Returns the events to raise once the
    /// lock is released.
    fn apply(&self, inner: &mut Inner, step: Step) -> Vec<LinkEvent> {
        if let Some(label) = step.label {
            trace!("[{}] {} --> [{}]", step.from, label, step.to);
            match label {
                "RetransmitData" | "ReceivedNak" => inner.stats.retransmissions += 1,
                "ReceivedDuplicate" => inner.stats.rx_duplicates += 1,
                _ => {}
            }
        }

        let mut events = Vec::new();
        for action in step.actions {
            match action {
                Action::Send(frame) => self.transmit(inner, &frame),
                Action::SendRaw(octets) => {
                    trace!("TX raw {}", hex::encode(&octets));
                    if let Err(e) = self.transport.send(&octets) {
                        warn!("serial send failed: {}", e);
                    }
                }
                Action::Deliver(data) => self.deliver(inner, data),
                Action::Acked(len) => {
                    debug!("PTP NPDU of {} octets acknowledged", len);
                    self.finish(inner, Ok(len));
                }
                Action::RetriesExhausted => {
                    warn!("PTP NPDU dropped after {} attempts", self.config.rxmt_max);
                    inner.stats.send_failures += 1;
                    self.finish(inner, Err(DataLinkError::RetryExhausted));
                }
                Action::Aborted => {
                    inner.stats.send_failures += 1;
                    self.finish(inner, Err(DataLinkError::NotConnected));
                }
                Action::Event(event) => {
                    match event {
                        LinkEvent::Connected => {
                            inner.stats.connects += 1;
                            info!("PTP link connected");
                        }
                        LinkEvent::Disconnected => {
                            inner.stats.disconnects += 1;
                            info!("PTP link disconnected");
                        }
                        _ => {}
                    }
                    events.push(event);
                }
            }
        }

        if step.to != step.from {
            match step.to {
                PtpState::Disconnected => self.inbound.close(),
                _ if step.from == PtpState::Disconnected => self.inbound.open(),
                _ => {}
            }
            self.slot_free.notify_all();
        }
        inner.stats.state = inner.machine.state();
        inner.stats.tx_xon = inner.machine.tx_xon();
        events
    }

    fn transmit(&self, inner: &mut Inner, frame: &PtpFrame) {
        let bytes = frame.to_bytes();
        trace!("TX frame: type={:?} len={}", frame.frame_type, frame.data.len());
        trace!("TX {}", hex::encode(&bytes));
        if let Err(e) = self.transport.send(&bytes) {
            warn!("serial send failed: {}", e);
            return;
        }

        let stats = &mut inner.stats;
        stats.tx_frames += 1;
        match frame.frame_type {
            PtpFrameType::Data0 | PtpFrameType::Data1 => stats.tx_data += 1,
            PtpFrameType::HeartbeatXon | PtpFrameType::HeartbeatXoff => stats.heartbeats += 1,
            _ => {}
        }
    }

    fn deliver(&self, inner: &mut Inner, data: Bytes) {
        let len = data.len();
        match self.inbound.try_put(data) {
            Ok(()) => {
                debug!("RX NPDU ({} octets)", len);
                let notifier = lock(&self.hooks).notifier.clone();
                if let Some(notifier) = notifier {
                    notifier.notify();
                }
            }
            Err(_) => {
                inner.stats.rx_dropped += 1;
                warn!("inbound slot busy, dropped {} octets", len);
            }
        }
    }

    fn raise(&self, events: Vec<LinkEvent>) {
        if events.is_empty() {
            return;
        }
        let handler = lock(&self.hooks).on_event.clone();
        if let Some(handler) = handler {
            for event in events {
                handler(event);
            }
        }
    }

    /// Feed one machine input under the lock, then raise its events.
    fn drive<F>(&self, input: F)
    where
        F: FnOnce(&mut PtpMachine, u32) -> Step,
    {
        let events = {
            let mut inner = lock(&self.inner);
            let now = self.now();
            let step = input(&mut inner.machine, now);
            self.apply(&mut inner, step)
        };
        self.raise(events);
    }
}

/// Handle to one end of a PTP connection.
#[derive(Clone)]
pub struct PtpLink {
    shared: Arc<Shared>,
}

impl PtpLink {
    /// Create a disconnected link over `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`DataLinkError::InvalidConfig`] if `config` does not validate.
    pub fn new<T>(config: PtpConfig, transport: T, clock: Arc<dyn Clock>) -> Result<Self>
    where
        T: SerialTransport + 'static,
    {
        config.validate()?;
        let machine = PtpMachine::new(&config);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                transport: Box::new(transport),
                clock,
                inner: Mutex::new(Inner {
                    machine,
                    waiter: None,
                    stats: PtpStats::default(),
                }),
                slot_free: Condvar::new(),
                inbound: Mailbox::closed(),
                stopping: AtomicBool::new(false),
                hooks: Mutex::new(Hooks::default()),
            }),
        })
    }

    pub fn config(&self) -> &PtpConfig {
        &self.shared.config
    }

    /// Arm the connect handshake. Same as [`connect_inbound`](Self::connect_inbound).
    pub fn start(&self) {
        self.connect_inbound();
    }

    /// Send a Connect-Request and wait in INBOUND for the peer's response.
    pub fn connect_inbound(&self) {
        info!("PTP connect inbound");
        self.shared.drive(|m, now| m.connect_inbound(now));
    }

    /// Send the wake-up trigger and enter OUTBOUND.
    ///
    /// Outbound establishment stops there: frames received in OUTBOUND are
    /// ignored until [`disconnect`](Self::disconnect) is called.
    pub fn connect_outbound(&self) {
        info!("PTP connect outbound");
        self.shared.drive(|m, now| m.connect_outbound(now));
    }

    pub fn disconnect(&self) {
        info!("PTP disconnect requested");
        self.shared.drive(|m, now| m.disconnect(now));
    }

    pub fn state(&self) -> PtpState {
        lock(&self.shared.inner).machine.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == PtpState::Connected
    }

    pub fn stats(&self) -> PtpStats {
        lock(&self.shared.inner).stats.clone()
    }

    pub fn reset_stats(&self) {
        let mut inner = lock(&self.shared.inner);
        let state = inner.stats.state;
        let tx_xon = inner.stats.tx_xon;
        inner.stats = PtpStats {
            state,
            tx_xon,
            ..PtpStats::default()
        };
    }

    pub fn set_event_handler<F>(&self, handler: F)
    where
        F: Fn(LinkEvent) + Send + Sync + 'static,
    {
        lock(&self.shared.hooks).on_event = Some(Arc::new(handler));
    }

    pub fn set_pdu_notifier(&self, notifier: PduNotifier) {
        lock(&self.shared.hooks).notifier = Some(notifier);
    }

    /// Send one NPDU and wait for the peer to acknowledge it.
    ///
    /// # Errors
    ///
    /// - [`DataLinkError::NotConnected`] if the link is not CONNECTED, or
    ///   drops while the NPDU is outstanding
    /// - [`DataLinkError::RetryExhausted`] if the peer never acknowledged it
    /// - [`DataLinkError::PduTooLarge`] if `pdu` exceeds the MTU
    /// - [`DataLinkError::Closed`] once the link is stopped
    pub fn send(&self, pdu: &[u8]) -> Result<usize> {
        let shared = &*self.shared;
        let max = shared.config.mtu;
        if pdu.len() > max {
            return Err(DataLinkError::PduTooLarge { len: pdu.len(), max });
        }

        let (tx, rx) = mpsc::channel();
        let events = {
            let mut inner = self.wait_for_slot()?;
            let now = shared.now();
            let step = inner.machine.submit(now, Bytes::copy_from_slice(pdu))?;
            inner.waiter = Some(tx);
            shared.apply(&mut inner, step)
        };
        shared.raise(events);

        rx.recv().unwrap_or(Err(DataLinkError::Closed))
    }

    fn wait_for_slot(&self) -> Result<MutexGuard<'_, Inner>> {
        let shared = &*self.shared;
        let mut inner = lock(&shared.inner);
        loop {
            if shared.stopping.load(Ordering::SeqCst) {
                return Err(DataLinkError::Closed);
            }
            if inner.machine.state() != PtpState::Connected {
                return Err(DataLinkError::NotConnected);
            }
            if !inner.machine.tx_busy() {
                return Ok(inner);
            }
            inner = shared
                .slot_free
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until an NPDU is received.
    ///
    /// # Errors
    ///
    /// [`DataLinkError::NotConnected`] while or once the link is
    /// disconnected, [`DataLinkError::Closed`] after [`stop`](Self::stop).
    pub fn recv(&self) -> Result<Bytes> {
        let result = self.shared.inbound.take();
        self.map_closed(result)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Bytes> {
        let result = self.shared.inbound.take_timeout(timeout);
        self.map_closed(result)
    }

    fn map_closed(&self, result: Result<Bytes>) -> Result<Bytes> {
        match result {
            Err(DataLinkError::Closed) if !self.is_stopped() => Err(DataLinkError::NotConnected),
            other => other,
        }
    }

    /// Ask the engine loop to return and fail every blocked caller.
    pub fn stop(&self) {
        let shared = &*self.shared;
        shared.stopping.store(true, Ordering::SeqCst);
        shared.inbound.close();
        let mut inner = lock(&shared.inner);
        shared.finish(&mut inner, Err(DataLinkError::Closed));
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopping.load(Ordering::SeqCst)
    }

    /// Run the engine loop on a new thread.
    pub fn spawn(&self) -> Result<JoinHandle<Result<()>>> {
        let link = self.clone();
        let handle = thread::Builder::new()
            .name("ptp".to_string())
            .spawn(move || link.run())?;
        Ok(handle)
    }

    /// Engine loop. Returns after [`stop`](Self::stop).
    ///
    /// # Errors
    ///
    /// [`DataLinkError::Closed`] if the transport goes away underneath.
    pub fn run(&self) -> Result<()> {
        let shared = &*self.shared;
        info!(
            "PTP engine running: poll={}ms rxmt_max={}",
            shared.config.poll_interval, shared.config.rxmt_max
        );

        let mut decoder = PtpDecoder::new(shared.config.mtu);
        let mut buf = vec![0u8; 2 * (shared.config.mtu + frame::HEADER_SIZE + frame::DATA_CRC_SIZE)];

        let result = loop {
            if shared.stopping.load(Ordering::SeqCst) {
                break Ok(());
            }

            let wait = {
                let inner = lock(&shared.inner);
                inner.machine.wait_timeout(shared.now(), shared.config.poll_interval)
            };
            let timeout = Duration::from_millis(wait as u64);
            let n = match shared.transport.recv(&mut buf, timeout) {
                Ok(n) => n,
                Err(DataLinkError::Timeout) => 0,
                Err(DataLinkError::Closed) => break Err(DataLinkError::Closed),
                Err(e) => {
                    warn!("serial receive failed: {}", e);
                    thread::sleep(timeout.max(Duration::from_millis(1)));
                    0
                }
            };

            if n > 0 {
                trace!("RX {} octets: {}", n, hex::encode(&buf[..n]));
                if self.state() == PtpState::Disconnected {
                    // Nobody to talk to
                    decoder.reset();
                    continue;
                }
                decoder.push(&buf[..n]);
            }

            let mut received = false;
            while let Some(item) = decoder.decode() {
                received = true;
                self.count_rx(&item);
                shared.drive(|m, now| m.frame_received(now, item));
            }
            if !received {
                shared.drive(|m, now| m.timeout(now));
            }
        };

        shared.stopping.store(true, Ordering::SeqCst);
        shared.inbound.close();
        {
            let mut inner = lock(&shared.inner);
            shared.finish(&mut inner, Err(DataLinkError::Closed));
        }
        match &result {
            Ok(()) => info!("PTP engine stopped"),
            Err(e) => warn!("PTP engine terminated: {}", e),
        }
        result
    }

    fn count_rx(&self, item: &core::result::Result<PtpFrame, FrameError>) {
        let mut inner = lock(&self.shared.inner);
        let stats = &mut inner.stats;
        match item {
            Ok(frame) => {
                trace!("RX frame: type={:?} len={}", frame.frame_type, frame.data.len());
                stats.rx_frames += 1;
                if frame.frame_type.data_seq().is_some() {
                    stats.rx_data += 1;
                }
            }
            Err(e) => {
                match e {
                    FrameError::HeaderCrc => stats.header_crc_errors += 1,
                    FrameError::DataCrc => stats.data_crc_errors += 1,
                    FrameError::Sync => stats.sync_errors += 1,
                    FrameError::Oversize { .. } => stats.frame_errors += 1,
                }
                warn!("PTP: {}", e);
            }
        }
    }
}

impl DataLink for PtpLink {
    fn send_frame(&mut self, frame: &[u8], dest: &DataLinkAddress) -> Result<()> {
        match dest {
            DataLinkAddress::Ptp | DataLinkAddress::Broadcast => self.send(frame).map(|_| ()),
            DataLinkAddress::Mstp(_) => {
                Err(DataLinkError::AddressError("MS/TP address on PTP link".into()))
            }
        }
    }

    fn receive_frame(&mut self) -> Result<(Vec<u8>, DataLinkAddress)> {
        let data = self.recv()?;
        Ok((data.to_vec(), DataLinkAddress::Ptp))
    }

    fn link_type(&self) -> DataLinkType {
        DataLinkType::Ptp
    }

    fn local_address(&self) -> DataLinkAddress {
        DataLinkAddress::Ptp
    }

    fn set_notifier(&mut self, notifier: PduNotifier) {
        self.set_pdu_notifier(notifier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LoopbackBus, ManualClock};

    fn link() -> (PtpLink, crate::transport::LoopbackPort) {
        let (ours, theirs) = LoopbackBus::pair();
        let link = PtpLink::new(PtpConfig::default(), ours, Arc::new(ManualClock::new(0))).unwrap();
        (link, theirs)
    }

    #[test]
    fn test_send_requires_connection() {
        let (link, _peer) = link();
        assert!(matches!(link.send(&[1, 2]), Err(DataLinkError::NotConnected)));
        assert!(matches!(link.recv(), Err(DataLinkError::NotConnected)));
    }

    #[test]
    fn test_send_rejects_oversize() {
        let (link, _peer) = link();
        let big = vec![0u8; 600];
        assert!(matches!(
            link.send(&big),
            Err(DataLinkError::PduTooLarge { len: 600, max: 501 })
        ));
    }

    #[test]
    fn test_connect_inbound_transmits_request() {
        let (link, peer) = link();
        link.connect_inbound();
        assert_eq!(link.state(), PtpState::Inbound);

        let mut buf = [0u8; 64];
        let n = peer.recv(&mut buf, Duration::from_millis(100)).unwrap();
        assert_eq!(&buf[..n], &[0x55, 0xFF, 0x0C, 0x00, 0x00, 0x44]);
        assert_eq!(link.stats().tx_frames, 1);
    }

    #[test]
    fn test_connect_outbound_sends_trigger() {
        let (link, peer) = link();
        link.connect_outbound();
        assert_eq!(link.state(), PtpState::Outbound);
        let mut buf = [0u8; 64];
        let n = peer.recv(&mut buf, Duration::from_millis(100)).unwrap();
        assert_eq!(&buf[..n], b"BACnet\r");

        link.disconnect();
        assert_eq!(link.state(), PtpState::Disconnected);
    }

    #[test]
    fn test_stop_closes_receiver() {
        let (link, _peer) = link();
        link.connect_inbound();
        let receiver = {
            let link = link.clone();
            thread::spawn(move || link.recv())
        };
        thread::sleep(Duration::from_millis(20));
        link.stop();
        assert!(matches!(receiver.join().unwrap(), Err(DataLinkError::Closed)));
    }

    #[test]
    fn test_datalink_rejects_mstp_address() {
        let (mut link, _peer) = link();
        assert!(matches!(
            DataLink::send_frame(&mut link, &[1], &DataLinkAddress::Mstp(3)),
            Err(DataLinkError::AddressError(_))
        ));
        assert_eq!(link.link_type(), DataLinkType::Ptp);
    }
}
