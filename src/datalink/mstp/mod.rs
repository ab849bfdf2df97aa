//! MS/TP data link (ASHRAE 135 Clause 9).
//!
//! [`MstpLink`] is a cheap, clonable handle to one bus attachment. One thread
//! runs the engine loop ([`MstpLink::run`]); any number of threads may call
//! [`send_to`](MstpLink::send_to) and [`recv`](MstpLink::recv), which meet the
//! engine in single-slot mailboxes.
//!
//! The engine blocks at most once per iteration, on the serial transport,
//! for as long as the current MAC state allows. Frames and timeouts are fed
//! to the [`MasterMachine`]; the actions it returns are carried out here.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use bacnet_link::config::MstpConfig;
//! use bacnet_link::datalink::mstp::MstpLink;
//! use bacnet_link::transport::{LoopbackBus, SystemClock};
//!
//! # fn example() -> bacnet_link::Result<()> {
//! let bus = LoopbackBus::new();
//! let link = MstpLink::new(
//!     MstpConfig::default().with_station_address(3),
//!     bus.attach(),
//!     Arc::new(SystemClock::new()),
//! )?;
//! let _engine = link.spawn()?;
//! link.start();
//!
//! // Who-Is, broadcast, no reply expected at the link layer
//! link.send(&[0x01, 0x20, 0xFF, 0xFF, 0x00, 0xFF, 0x10, 0x08])?;
//! # Ok(())
//! # }
//! ```

pub mod frame;
pub mod machine;

pub use frame::{Frame, FrameDecoder, FrameType};
pub use machine::{Action, MasterMachine, MstpState, Pending, Step};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, info, trace, warn};

use crate::config::{MstpConfig, MstpRole, MAX_MASTER_ADDRESS, MSTP_BROADCAST};
use crate::datalink::mailbox::Mailbox;
use crate::datalink::{
    lock, DataLink, DataLinkAddress, DataLinkError, DataLinkType, EventHandler, FrameError,
    LinkEvent, PduNotifier, Result,
};
use crate::timer;
use crate::transport::{Clock, SerialTransport};

/// A partially received frame is dropped after this much line silence.
pub const T_FRAME_ABORT_MS: u32 = 100;

/// NPDU control octet bit: the sender expects a reply.
const NPDU_EXPECTING_REPLY: u8 = 0x04;

/// A PDU received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPdu {
    pub source: u8,
    pub destination: u8,
    pub frame_type: FrameType,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
struct OutboundPdu {
    frame_type: FrameType,
    destination: u8,
    data: Bytes,
}

/// MS/TP link statistics and a snapshot of the ring variables.
#[derive(Debug, Clone)]
pub struct MstpStats {
    pub rx_frames: u64,
    pub tx_frames: u64,
    pub header_crc_errors: u64,
    pub data_crc_errors: u64,
    pub sync_errors: u64,
    /// Oversized or aborted frames
    pub frame_errors: u64,

    pub rx_token: u64,
    pub rx_unicast: u64,
    pub rx_broadcast: u64,
    /// Received PDUs dropped because the inbound slot was still occupied
    pub rx_dropped: u64,
    pub tx_token: u64,
    pub tx_unicast: u64,
    pub tx_broadcast: u64,
    pub tx_poll_for_master: u64,

    pub reply_timeouts: u64,
    pub token_pass_failures: u64,
    pub token_lost: u64,

    // Token loop timing (time between tokens addressed to this station)
    pub token_loop_last_ms: u32,
    pub token_loop_min_ms: u32,
    pub token_loop_max_ms: u32,

    pub current_state: MstpState,
    pub role: MstpRole,
    pub station_address: u8,
    pub next_station: u8,
    pub poll_station: u8,
    pub sole_master: bool,
    pub token_count: u8,
    pub master_count: u32,
    pub tx_pending: bool,
    pub rx_pending: bool,
}

impl MstpStats {
    fn new(station_address: u8, role: MstpRole) -> Self {
        Self {
            rx_frames: 0,
            tx_frames: 0,
            header_crc_errors: 0,
            data_crc_errors: 0,
            sync_errors: 0,
            frame_errors: 0,
            rx_token: 0,
            rx_unicast: 0,
            rx_broadcast: 0,
            rx_dropped: 0,
            tx_token: 0,
            tx_unicast: 0,
            tx_broadcast: 0,
            tx_poll_for_master: 0,
            reply_timeouts: 0,
            token_pass_failures: 0,
            token_lost: 0,
            token_loop_last_ms: 0,
            token_loop_min_ms: 0,
            token_loop_max_ms: 0,
            current_state: MstpState::Initialize,
            role,
            station_address,
            next_station: station_address,
            poll_station: station_address,
            sole_master: false,
            token_count: 0,
            master_count: 1,
            tx_pending: false,
            rx_pending: false,
        }
    }

    /// Zero the counters, keep the snapshot.
    fn clear_counters(&mut self) {
        let snapshot = self.clone();
        *self = Self::new(self.station_address, snapshot.role);
        self.current_state = snapshot.current_state;
        self.next_station = snapshot.next_station;
        self.poll_station = snapshot.poll_station;
        self.sole_master = snapshot.sole_master;
        self.token_count = snapshot.token_count;
        self.master_count = snapshot.master_count;
        self.tx_pending = snapshot.tx_pending;
        self.rx_pending = snapshot.rx_pending;
    }

    /// Total receive errors of any kind.
    pub fn rx_errors(&self) -> u64 {
        self.header_crc_errors + self.data_crc_errors + self.sync_errors + self.frame_errors
    }
}

struct Status {
    stats: MstpStats,
    /// Bitmap of master addresses seen on the bus (0-127)
    netmap: u128,
}

#[derive(Default)]
struct Hooks {
    on_event: Option<EventHandler>,
    notifier: Option<PduNotifier>,
}

struct Shared {
    config: MstpConfig,
    transport: Box<dyn SerialTransport>,
    clock: Arc<dyn Clock>,
    inbound: Mailbox<InboundPdu>,
    outbound: Mailbox<OutboundPdu>,
    started: AtomicBool,
    stopping: AtomicBool,
    /// Role the engine should run in
    role: Mutex<MstpRole>,
    up: Mutex<bool>,
    up_changed: Condvar,
    status: Mutex<Status>,
    hooks: Mutex<Hooks>,
}

impl Shared {
    fn set_up(&self, value: bool) {
        *lock(&self.up) = value;
        self.up_changed.notify_all();
    }
}

/// Handle to an MS/TP bus attachment.
#[derive(Clone)]
pub struct MstpLink {
    shared: Arc<Shared>,
}

impl MstpLink {
    /// Bind a station address and transport to a new link.
    ///
    /// The link stays in INITIALIZE until [`start`](Self::start) is called and
    /// an engine is running.
    ///
    /// # Errors
    ///
    /// Returns [`DataLinkError::InvalidConfig`] if `config` does not validate.
    pub fn new<T>(config: MstpConfig, transport: T, clock: Arc<dyn Clock>) -> Result<Self>
    where
        T: SerialTransport + 'static,
    {
        config.validate()?;
        let ts = config.station_address;
        let role = config.role;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                transport: Box::new(transport),
                clock,
                inbound: Mailbox::new(),
                outbound: Mailbox::new(),
                started: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                role: Mutex::new(role),
                up: Mutex::new(false),
                up_changed: Condvar::new(),
                status: Mutex::new(Status {
                    stats: MstpStats::new(ts, role),
                    netmap: 1u128 << ts,
                }),
                hooks: Mutex::new(Hooks::default()),
            }),
        })
    }

    pub fn config(&self) -> &MstpConfig {
        &self.shared.config
    }

    pub fn station_address(&self) -> u8 {
        self.shared.config.station_address
    }

    /// Let the engine leave INITIALIZE and join the token ring.
    pub fn start(&self) {
        self.shared.started.store(true, Ordering::SeqCst);
    }

    /// Ask the engine loop to return and wake blocked callers.
    pub fn stop(&self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.inbound.close();
        self.shared.outbound.close();
        self.shared.set_up(false);
    }

    /// Switch between master and slave operation.
    ///
    /// The engine picks the request up at its next iteration, reports
    /// [`LinkEvent::LinkDown`] if the node was up and rejoins the segment in
    /// the new role.
    pub fn set_role(&self, role: MstpRole) {
        let mut requested = lock(&self.shared.role);
        if *requested != role {
            info!("MS/TP {}: role change to {:?} requested", self.station_address(), role);
            *requested = role;
        }
    }

    /// Role the engine currently runs in.
    pub fn role(&self) -> MstpRole {
        lock(&self.shared.status).stats.role
    }

    /// The node has joined the segment: a master holds or has held the
    /// token, a slave has heard a frame addressed to it.
    pub fn is_up(&self) -> bool {
        *lock(&self.shared.up)
    }

    /// Block until the link is up.
    ///
    /// # Errors
    ///
    /// [`DataLinkError::Timeout`] when the link did not come up within
    /// `timeout`, [`DataLinkError::Closed`] once the link is stopped.
    pub fn wait_up(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut up = lock(&self.shared.up);
        loop {
            if *up {
                return Ok(());
            }
            if self.is_stopped() {
                return Err(DataLinkError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DataLinkError::Timeout);
            }
            up = self
                .shared
                .up_changed
                .wait_timeout(up, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopping.load(Ordering::SeqCst)
    }

    /// Run the engine loop on a new thread.
    pub fn spawn(&self) -> Result<JoinHandle<Result<()>>> {
        let link = self.clone();
        let handle = thread::Builder::new()
            .name(format!("mstp-{}", self.station_address()))
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
            "MS/TP engine running: station={} max_master={} max_info_frames={}",
            shared.config.station_address, shared.config.max_master, shared.config.max_info_frames
        );

        let mut engine = Engine::new(shared);
        let result = loop {
            if shared.stopping.load(Ordering::SeqCst) {
                break Ok(());
            }
            if let Err(e) = engine.poll() {
                break Err(e);
            }
        };

        shared.inbound.close();
        shared.outbound.close();
        shared.set_up(false);
        match &result {
            Ok(()) => info!("MS/TP engine stopped: station={}", shared.config.station_address),
            Err(e) => warn!("MS/TP engine terminated: {}", e),
        }
        result
    }

    /// Queue `pdu` as a broadcast Data-Not-Expecting-Reply.
    pub fn send(&self, pdu: &[u8]) -> Result<usize> {
        self.send_frame(pdu, MSTP_BROADCAST, FrameType::BacnetDataNotExpectingReply)
    }

    /// Queue `pdu` for `destination`, choosing the data frame type.
    pub fn send_to(&self, pdu: &[u8], destination: u8, expecting_reply: bool) -> Result<usize> {
        let frame_type = if expecting_reply {
            FrameType::BacnetDataExpectingReply
        } else {
            FrameType::BacnetDataNotExpectingReply
        };
        self.send_frame(pdu, destination, frame_type)
    }

    /// Queue `pdu` with an explicit frame type.
    ///
    /// Blocks until the outbound slot is free. The PDU is transmitted the
    /// next time this station holds the token, or as the answer to a pending
    /// request. A slave only ever sends answers.
    ///
    /// # Errors
    ///
    /// - [`DataLinkError::PduTooLarge`] if `pdu` exceeds the MTU
    /// - [`DataLinkError::UnsupportedType`] for frame types that carry no PDU
    /// - [`DataLinkError::Closed`] once the link is stopped
    pub fn send_frame(&self, pdu: &[u8], destination: u8, frame_type: FrameType) -> Result<usize> {
        let max = self.shared.config.mtu;
        if pdu.len() > max {
            return Err(DataLinkError::PduTooLarge { len: pdu.len(), max });
        }
        if !(frame_type.carries_pdu() || matches!(frame_type, FrameType::Proprietary(_))) {
            return Err(DataLinkError::UnsupportedType);
        }

        debug!("queue {:?} to {} ({} octets)", frame_type, destination, pdu.len());
        self.shared.outbound.put(OutboundPdu {
            frame_type,
            destination,
            data: Bytes::copy_from_slice(pdu),
        })?;
        Ok(pdu.len())
    }

    /// Block until a PDU is received.
    pub fn recv(&self) -> Result<InboundPdu> {
        self.shared.inbound.take()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<InboundPdu> {
        self.shared.inbound.take_timeout(timeout)
    }

    pub fn try_recv(&self) -> Option<InboundPdu> {
        self.shared.inbound.try_take()
    }

    /// Current MAC state as last published by the engine.
    pub fn state(&self) -> MstpState {
        lock(&self.shared.status).stats.current_state
    }

    pub fn stats(&self) -> MstpStats {
        let mut stats = lock(&self.shared.status).stats.clone();
        stats.tx_pending = !self.shared.outbound.is_empty();
        stats.rx_pending = !self.shared.inbound.is_empty();
        stats
    }

    pub fn reset_stats(&self) {
        lock(&self.shared.status).stats.clear_counters();
    }

    /// Master stations seen on the bus, this one included, in address order.
    pub fn netmap(&self) -> Vec<u8> {
        let map = lock(&self.shared.status).netmap;
        (0..=MAX_MASTER_ADDRESS).filter(|a| map & (1u128 << a) != 0).collect()
    }

    pub fn clear_netmap(&self) {
        let mut status = lock(&self.shared.status);
        status.netmap = 1u128 << self.shared.config.station_address;
        status.stats.master_count = 1;
    }

    /// True when no master with a lower address has been seen.
    pub fn is_lowest_address(&self) -> bool {
        let map = lock(&self.shared.status).netmap;
        map.trailing_zeros() as u8 == self.shared.config.station_address
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
}

impl DataLink for MstpLink {
    fn send_frame(&mut self, frame: &[u8], dest: &DataLinkAddress) -> Result<()> {
        let destination = match dest {
            DataLinkAddress::Mstp(mac) if *mac != MSTP_BROADCAST => *mac,
            DataLinkAddress::Mstp(_) | DataLinkAddress::Broadcast => MSTP_BROADCAST,
            DataLinkAddress::Ptp => {
                return Err(DataLinkError::AddressError("PTP address on MS/TP link".into()))
            }
        };
        let expecting_reply = frame.len() > 1 && frame[1] & NPDU_EXPECTING_REPLY != 0;
        MstpLink::send_to(self, frame, destination, expecting_reply).map(|_| ())
    }

    fn receive_frame(&mut self) -> Result<(Vec<u8>, DataLinkAddress)> {
        let pdu = self.recv()?;
        Ok((pdu.data.to_vec(), DataLinkAddress::Mstp(pdu.source)))
    }

    fn link_type(&self) -> DataLinkType {
        DataLinkType::Mstp
    }

    fn local_address(&self) -> DataLinkAddress {
        DataLinkAddress::Mstp(self.station_address())
    }

    fn set_notifier(&mut self, notifier: PduNotifier) {
        self.set_pdu_notifier(notifier);
    }
}

/// State owned by the engine thread.
struct Engine<'a> {
    shared: &'a Shared,
    machine: MasterMachine,
    decoder: FrameDecoder,
    buf: Vec<u8>,
    last_octet: u32,
    last_token: Option<u32>,
}

impl<'a> Engine<'a> {
    fn new(shared: &'a Shared) -> Self {
        Self {
            shared,
            machine: MasterMachine::new(&shared.config),
            decoder: FrameDecoder::new(shared.config.mtu),
            buf: vec![0u8; shared.config.mtu + frame::HEADER_SIZE + frame::DATA_CRC_SIZE],
            last_octet: 0,
            last_token: None,
        }
    }

    fn now(&self) -> u32 {
        self.shared.clock.now_ms()
    }

    /// One loop iteration: a single bounded wait, then evaluation.
    fn poll(&mut self) -> Result<()> {
        let role = *lock(&self.shared.role);
        if role != self.machine.role() {
            let step = self.machine.set_role(role);
            self.log_step(&step);
            for action in step.actions {
                self.apply(action);
            }
            self.decoder.reset();
            self.last_token = None;
            info!("MS/TP {}: now running as {:?}", self.shared.config.station_address, role);
            self.publish();
        }

        if self.machine.state() == MstpState::Initialize {
            if !self.shared.started.load(Ordering::SeqCst) {
                // Line traffic before start is ignored
                let wait = self.machine.wait_timeout(self.now());
                self.read(wait)?;
                self.decoder.reset();
                return Ok(());
            }
            let step = self.machine.start(self.now());
            self.decoder.reset();
            self.log_step(&step);
            self.publish();
        }

        let wait = self.machine.wait_timeout(self.now());
        self.read(wait)?;
        let now = self.now();

        let mut received = false;
        while let Some(result) = self.decoder.decode() {
            self.on_frame(now, result);
            self.evaluate(now);
            received = true;
        }

        if !received {
            if self.decoder.pending() > 0
                && timer::elapsed(now, self.last_octet) >= T_FRAME_ABORT_MS as i32
            {
                debug!("frame abort: {} octets discarded", self.decoder.pending());
                self.decoder.reset();
                lock(&self.shared.status).stats.frame_errors += 1;
                self.machine.frame_received(now, Err(FrameError::Sync));
            }
            self.evaluate(now);
        }

        self.publish();
        Ok(())
    }

    fn read(&mut self, wait_ms: u32) -> Result<usize> {
        let timeout = Duration::from_millis(wait_ms as u64);
        match self.shared.transport.recv(&mut self.buf, timeout) {
            Ok(0) => Ok(0),
            Ok(n) => {
                trace!("RX {} octets: {}", n, hex::encode(&self.buf[..n]));
                if self.machine.state() != MstpState::Initialize {
                    self.decoder.push(&self.buf[..n]);
                    self.machine.octets_received(n);
                }
                self.last_octet = self.now();
                Ok(n)
            }
            Err(DataLinkError::Timeout) => Ok(0),
            Err(DataLinkError::Closed) => Err(DataLinkError::Closed),
            Err(e) => {
                warn!("serial receive failed: {}", e);
                thread::sleep(timeout.max(Duration::from_millis(1)));
                Ok(0)
            }
        }
    }

    fn on_frame(&mut self, now: u32, result: core::result::Result<Frame, FrameError>) {
        let ts = self.shared.config.station_address;
        {
            let mut status = lock(&self.shared.status);
            match &result {
                Ok(frame) => {
                    trace!(
                        "RX frame: type={:?} dest={} src={} len={}",
                        frame.frame_type,
                        frame.destination,
                        frame.source,
                        frame.data.len()
                    );
                    status.stats.rx_frames += 1;

                    if matches!(
                        frame.frame_type,
                        FrameType::Token | FrameType::PollForMaster | FrameType::ReplyToPollForMaster
                    ) && frame.source <= MAX_MASTER_ADDRESS
                    {
                        status.netmap |= 1u128 << frame.source;
                        status.stats.master_count = status.netmap.count_ones();
                    }

                    if frame.frame_type == FrameType::Token && frame.destination == ts {
                        status.stats.rx_token += 1;
                        if let Some(last) = self.last_token {
                            let loop_ms = timer::elapsed(now, last).max(0) as u32;
                            let stats = &mut status.stats;
                            stats.token_loop_last_ms = loop_ms;
                            stats.token_loop_max_ms = stats.token_loop_max_ms.max(loop_ms);
                            if stats.token_loop_min_ms == 0 || loop_ms < stats.token_loop_min_ms {
                                stats.token_loop_min_ms = loop_ms;
                            }
                        }
                        self.last_token = Some(now);
                    }

                    if frame.frame_type.carries_pdu() {
                        if frame.destination == MSTP_BROADCAST {
                            status.stats.rx_broadcast += 1;
                        } else if frame.destination == ts {
                            status.stats.rx_unicast += 1;
                        }
                    }
                }
                Err(e) => {
                    match e {
                        FrameError::HeaderCrc => status.stats.header_crc_errors += 1,
                        FrameError::DataCrc => status.stats.data_crc_errors += 1,
                        FrameError::Sync => status.stats.sync_errors += 1,
                        FrameError::Oversize { .. } => status.stats.frame_errors += 1,
                    }
                    warn!("MS/TP {}: {}", ts, e);
                }
            }
        }
        self.machine.frame_received(now, result);
    }

    /// Evaluate states until one needs to wait for the line.
    fn evaluate(&mut self, now: u32) {
        loop {
            let pending = self.shared.outbound.peek_with(|p| Pending {
                frame_type: p.frame_type,
                destination: p.destination,
            });
            let step = self.machine.step(now, pending);
            self.log_step(&step);
            let again = step.again;
            for action in step.actions {
                self.apply(action);
            }
            if !again {
                break;
            }
        }
    }

    fn log_step(&self, step: &Step) {
        let label = match step.label {
            Some(label) => label,
            None => return,
        };
        trace!("[{}] {} --> [{}]", step.from, label, step.to);

        match label {
            "ReplyTimeout" => lock(&self.shared.status).stats.reply_timeouts += 1,
            "FindNewSuccessor" => {
                lock(&self.shared.status).stats.token_pass_failures += 1;
                debug!(
                    "MS/TP {}: successor silent, polling from {}",
                    self.shared.config.station_address,
                    self.machine.poll_station()
                );
            }
            _ => {}
        }
    }

    fn apply(&mut self, action: Action) {
        match action {
            Action::Send(frame) => self.transmit(&frame),
            Action::SendPending => match self.shared.outbound.try_take() {
                Some(pdu) => {
                    let frame = Frame::new(
                        pdu.frame_type,
                        pdu.destination,
                        self.shared.config.station_address,
                        pdu.data,
                    );
                    self.transmit(&frame);
                }
                None => warn!("outbound slot empty on send"),
            },
            Action::Deliver(frame) => self.deliver(frame),
            Action::Event(event) => self.raise(event),
        }
    }

    fn transmit(&mut self, frame: &Frame) {
        let bytes = frame.to_bytes();
        trace!(
            "TX frame: type={:?} dest={} src={} len={}",
            frame.frame_type,
            frame.destination,
            frame.source,
            frame.data.len()
        );
        trace!("TX {}", hex::encode(&bytes));

        if let Err(e) = self.shared.transport.send(&bytes) {
            warn!("serial send failed: {}", e);
            return;
        }

        let mut status = lock(&self.shared.status);
        let stats = &mut status.stats;
        stats.tx_frames += 1;
        match frame.frame_type {
            FrameType::Token => stats.tx_token += 1,
            FrameType::PollForMaster => stats.tx_poll_for_master += 1,
            t if t.carries_pdu() || matches!(t, FrameType::Proprietary(_)) => {
                if frame.destination == MSTP_BROADCAST {
                    stats.tx_broadcast += 1;
                } else {
                    stats.tx_unicast += 1;
                }
            }
            _ => {}
        }
    }

    fn deliver(&mut self, frame: Frame) {
        let pdu = InboundPdu {
            source: frame.source,
            destination: frame.destination,
            frame_type: frame.frame_type,
            data: frame.data,
        };
        let len = pdu.data.len();
        match self.shared.inbound.try_put(pdu) {
            Ok(()) => {
                debug!("RX {:?} from {} ({} octets)", frame.frame_type, frame.source, len);
                let notifier = lock(&self.shared.hooks).notifier.clone();
                if let Some(notifier) = notifier {
                    notifier.notify();
                }
            }
            Err(_) => {
                lock(&self.shared.status).stats.rx_dropped += 1;
                warn!(
                    "inbound slot busy, dropped {} octets from {}",
                    len, frame.source
                );
            }
        }
    }

    fn raise(&mut self, event: LinkEvent) {
        let ts = self.shared.config.station_address;
        match event {
            LinkEvent::TokenLost => {
                lock(&self.shared.status).stats.token_lost += 1;
                info!("MS/TP {}: token lost", ts);
            }
            LinkEvent::SoleMaster => info!("MS/TP {}: sole master", ts),
            LinkEvent::MultiMaster => info!("MS/TP {}: other masters present", ts),
            LinkEvent::LinkUp => {
                info!("MS/TP {}: link up", ts);
                self.shared.set_up(true);
            }
            LinkEvent::LinkDown => {
                info!("MS/TP {}: link down", ts);
                self.shared.set_up(false);
            }
            _ => {}
        }

        let handler = lock(&self.shared.hooks).on_event.clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    /// Copy the ring variables into the shared snapshot.
    fn publish(&self) {
        let mut status = lock(&self.shared.status);
        let stats = &mut status.stats;
        stats.current_state = self.machine.state();
        stats.role = self.machine.role();
        stats.next_station = self.machine.next_station();
        stats.poll_station = self.machine.poll_station();
        stats.sole_master = self.machine.sole_master();
        stats.token_count = self.machine.token_count();
    }
}
