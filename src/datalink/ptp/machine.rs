//! PTP connection state machine (ASHRAE 135 Clause 10.4).
//!
//! Like the MS/TP machine this performs no I/O. Each entry point returns a
//! [`Step`] listing the frames to transmit and the notifications to raise;
//! the engine carries them out in order.

use std::fmt;

use bytes::Bytes;

use crate::config::PtpConfig;
use crate::datalink::ptp::frame::{PtpFrame, PtpFrameType, TRIGGER_SEQUENCE};
use crate::datalink::{DataLinkError, FrameError, LinkEvent, Result};
use crate::timer::Deadline;

/// Disconnect reason octets carried in a Disconnect-Request.
const DISC_REASON_IDLE: u8 = 0x01;
const DISC_REASON_RETRY: u8 = 0x02;
const DISC_REASON_LOCAL: u8 = 0x00;

/// PTP connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PtpState {
    Disconnected,
    Inbound,
    Outbound,
    Connected,
    Disconnecting,
}

impl PtpState {
    pub fn name(self) -> &'static str {
        match self {
            PtpState::Disconnected => "DISCONNECTED",
            PtpState::Inbound => "INBOUND",
            PtpState::Outbound => "OUTBOUND",
            PtpState::Connected => "CONNECTED",
            PtpState::Disconnecting => "DISCONNECTING",
        }
    }
}

impl fmt::Display for PtpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Side effect requested by the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send(PtpFrame),
    /// Raw octets outside any frame (the wake-up trigger).
    SendRaw(Bytes),
    /// Hand a received NPDU to the network layer.
    Deliver(Bytes),
    /// The buffered NPDU of this length was acknowledged.
    Acked(usize),
    /// The buffered NPDU was dropped after the last retransmission.
    RetriesExhausted,
    /// The buffered NPDU was dropped because the connection went down.
    Aborted,
    Event(LinkEvent),
}

/// Outcome of one machine input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub from: PtpState,
    pub to: PtpState,
    pub label: Option<&'static str>,
    pub actions: Vec<Action>,
}

impl Step {
    fn new(state: PtpState) -> Self {
        Self {
            from: state,
            to: state,
            label: None,
            actions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PtpMachine {
    tx_idle_heartbeat: u32,
    rx_idle_disconnect: u32,
    conn_rxmt_time: u32,
    disc_rxmt_time: u32,
    npdu_rxmt_time: u32,
    rxmt_max: u8,

    state: PtpState,
    /// Peer is ready to receive data frames
    tx_xon: bool,
    tx_seq: u8,
    /// Unacknowledged NPDU
    tx_buf: Option<Bytes>,
    rxmt_tmr: Deadline,
    rxmt_cnt: u8,
    tx_idle_tmr: Deadline,
    rx_idle_tmr: Deadline,
    /// Sequence bit of the last data frame delivered
    rx_seq: Option<u8>,
}

impl PtpMachine {
    pub fn new(config: &PtpConfig) -> Self {
        Self {
            tx_idle_heartbeat: config.tx_idle_heartbeat,
            rx_idle_disconnect: config.rx_idle_disconnect,
            conn_rxmt_time: config.conn_rxmt_time,
            disc_rxmt_time: config.disc_rxmt_time,
            npdu_rxmt_time: config.npdu_rxmt_time,
            rxmt_max: config.rxmt_max,
            state: PtpState::Disconnected,
            tx_xon: false,
            tx_seq: 0,
            tx_buf: None,
            rxmt_tmr: Deadline::after(0, 0),
            rxmt_cnt: 0,
            tx_idle_tmr: Deadline::after(0, 0),
            rx_idle_tmr: Deadline::after(0, 0),
            rx_seq: None,
        }
    }

    pub fn state(&self) -> PtpState {
        self.state
    }

    pub fn tx_xon(&self) -> bool {
        self.tx_xon
    }

    pub fn tx_seq(&self) -> u8 {
        self.tx_seq
    }

    /// An NPDU is waiting for its acknowledgement.
    pub fn tx_busy(&self) -> bool {
        self.tx_buf.is_some()
    }

    pub fn retry_count(&self) -> u8 {
        self.rxmt_cnt
    }

    /// How long the engine may wait for the line before [`timeout`](Self::timeout)
    /// must run again.
    pub fn wait_timeout(&self, now: u32, poll_interval: u32) -> u32 {
        let mut wait = poll_interval;
        match self.state {
            PtpState::Disconnected | PtpState::Outbound => {}
            PtpState::Inbound | PtpState::Disconnecting => {
                wait = wait.min(self.rxmt_tmr.remaining(now) + 1);
            }
            PtpState::Connected => {
                if self.tx_buf.is_some() {
                    wait = wait.min(self.rxmt_tmr.remaining(now) + 1);
                }
                wait = wait.min(self.rx_idle_tmr.remaining(now) + 1);
                wait = wait.min(self.tx_idle_tmr.remaining(now) + 1);
            }
        }
        wait
    }

    fn go(&mut self, step: &mut Step, to: PtpState, label: &'static str) {
        let from = self.state;
        self.state = to;
        step.to = to;
        step.label = Some(label);

        if to == from {
            return;
        }
        match to {
            PtpState::Connected => step.actions.push(Action::Event(LinkEvent::Connected)),
            PtpState::Disconnected => {
                if self.tx_buf.take().is_some() {
                    step.actions.push(Action::Aborted);
                }
                self.tx_xon = false;
                if from == PtpState::Connected || from == PtpState::Disconnecting {
                    step.actions.push(Action::Event(LinkEvent::Disconnected));
                }
            }
            _ => {}
        }
    }

    fn send(&mut self, step: &mut Step, now: u32, frame: PtpFrame) {
        self.tx_idle_tmr = Deadline::after(now, self.tx_idle_heartbeat);
        step.actions.push(Action::Send(frame));
    }

    fn send_control(&mut self, step: &mut Step, now: u32, frame_type: PtpFrameType) {
        self.send(step, now, PtpFrame::control(frame_type));
    }

    fn send_disconnect(&mut self, step: &mut Step, now: u32, reason: u8) {
        let frame = PtpFrame::new(
            PtpFrameType::DisconnectRequest,
            Bytes::copy_from_slice(&[reason]),
        );
        self.send(step, now, frame);
    }

    fn send_data(&mut self, step: &mut Step, now: u32) {
        if let Some(data) = self.tx_buf.clone() {
            self.send(step, now, PtpFrame::new(PtpFrameType::data(self.tx_seq), data));
        }
    }

    /// DISCONNECTED, ConnectInbound: ask the peer to connect.
    pub fn connect_inbound(&mut self, now: u32) -> Step {
        let mut step = Step::new(self.state);
        if self.state != PtpState::Disconnected {
            return step;
        }
        self.tx_xon = false;
        self.tx_seq = 0;
        self.rx_seq = None;
        self.rxmt_tmr = Deadline::after(now, self.conn_rxmt_time);
        self.rxmt_cnt = 0;
        self.rx_idle_tmr = Deadline::after(now, self.rx_idle_disconnect);
        self.send_control(&mut step, now, PtpFrameType::ConnectRequest);
        self.go(&mut step, PtpState::Inbound, "ConnectInbound");
        step
    }

    /// DISCONNECTED, ConnectOutbound: wake the remote half-router.
    pub fn connect_outbound(&mut self, now: u32) -> Step {
        let mut step = Step::new(self.state);
        if self.state != PtpState::Disconnected {
            return step;
        }
        self.tx_xon = false;
        self.tx_seq = 0;
        self.rx_seq = None;
        self.rxmt_cnt = 0;
        self.tx_idle_tmr = Deadline::after(now, self.tx_idle_heartbeat);
        step.actions.push(Action::SendRaw(Bytes::from_static(TRIGGER_SEQUENCE)));
        self.go(&mut step, PtpState::Outbound, "ConnectOutbound");
        step
    }

    /// Local request to tear the connection down.
    pub fn disconnect(&mut self, now: u32) -> Step {
        let mut step = Step::new(self.state);
        match self.state {
            PtpState::Connected => {
                self.rxmt_tmr = Deadline::after(now, self.disc_rxmt_time);
                self.rxmt_cnt = 0;
                self.send_disconnect(&mut step, now, DISC_REASON_LOCAL);
                self.go(&mut step, PtpState::Disconnecting, "DisconnectRequest");
            }
            PtpState::Inbound | PtpState::Outbound => {
                self.go(&mut step, PtpState::Disconnected, "DisconnectRequest");
            }
            PtpState::Disconnected | PtpState::Disconnecting => {}
        }
        step
    }

    /// Buffer `data` as the outstanding NPDU and transmit it if the peer is
    /// ready.
    ///
    /// # Errors
    ///
    /// [`DataLinkError::NotConnected`] outside CONNECTED,
    /// [`DataLinkError::BufferFull`] while a previous NPDU is unacknowledged.
    pub fn submit(&mut self, now: u32, data: Bytes) -> Result<Step> {
        if self.state != PtpState::Connected {
            return Err(DataLinkError::NotConnected);
        }
        if self.tx_buf.is_some() {
            return Err(DataLinkError::BufferFull);
        }
        let mut step = Step::new(self.state);
        self.rxmt_tmr = Deadline::after(now, self.npdu_rxmt_time);
        self.rxmt_cnt = 0;
        self.tx_buf = Some(data);
        if self.tx_xon {
            self.send_data(&mut step, now);
            step.label = Some("SendData");
        } else {
            step.label = Some("HoldData");
        }
        Ok(step)
    }

    /// Process a frame (or a framing error) read from the line.
    pub fn frame_received(
        &mut self,
        now: u32,
        frame: core::result::Result<PtpFrame, FrameError>,
    ) -> Step {
        let mut step = Step::new(self.state);
        let frame = match frame {
            Ok(frame) => frame,
            // Bad frames are neither acknowledged nor counted as activity
            Err(_) => return step,
        };
        self.rx_idle_tmr = Deadline::after(now, self.rx_idle_disconnect);

        match self.state {
            PtpState::Disconnected => {}
            PtpState::Outbound => step.label = Some("IgnoredFrame"),
            PtpState::Inbound => match frame.frame_type {
                PtpFrameType::ConnectResponse => {
                    self.go(&mut step, PtpState::Connected, "ConnectResponse");
                    self.send_control(&mut step, now, PtpFrameType::HeartbeatXon);
                }
                PtpFrameType::DisconnectRequest => {
                    self.send_control(&mut step, now, PtpFrameType::DisconnectResponse);
                    self.go(&mut step, PtpState::Disconnected, "DisconnectRequest");
                }
                _ => {}
            },
            PtpState::Connected => self.connected(&mut step, now, frame),
            PtpState::Disconnecting => {
                if frame.frame_type == PtpFrameType::DisconnectResponse {
                    self.go(&mut step, PtpState::Disconnected, "DisconnectResponse");
                }
            }
        }
        step
    }

    fn connected(&mut self, step: &mut Step, now: u32, frame: PtpFrame) {
        use PtpFrameType::*;

        match frame.frame_type {
            HeartbeatXoff => {
                if self.tx_xon {
                    self.tx_xon = false;
                    step.label = Some("PeerXoff");
                }
            }
            HeartbeatXon => {
                if !self.tx_xon {
                    self.tx_xon = true;
                    step.label = Some("PeerXon");
                }
            }
            Data0 | Data1 => {
                let seq = frame.frame_type.data_seq().unwrap_or(0);
                self.send_control(step, now, PtpFrameType::ack_xon(seq));
                if self.rx_seq == Some(seq) {
                    step.label = Some("ReceivedDuplicate");
                } else {
                    self.rx_seq = Some(seq);
                    step.actions.push(Action::Deliver(frame.data));
                    step.label = Some("ReceivedData");
                }
            }
            DataAck0Xon | DataAck1Xon => {
                let seq = if frame.frame_type == DataAck0Xon { 0 } else { 1 };
                if self.tx_seq & 1 == seq {
                    if let Some(data) = self.tx_buf.take() {
                        self.tx_seq = self.tx_seq.wrapping_add(1);
                        step.actions.push(Action::Acked(data.len()));
                        step.label = Some("ReceivedAck");
                    }
                }
            }
            DataNak0Xon | DataNak1Xon => {
                let seq = if frame.frame_type == DataNak0Xon { 0 } else { 1 };
                if self.tx_seq & 1 == seq && self.tx_buf.is_some() {
                    self.send_data(step, now);
                    step.label = Some("ReceivedNak");
                }
            }
            ConnectRequest => {
                // Peer restarted its side of the connection
                self.rx_seq = None;
                self.send_control(step, now, ConnectResponse);
                step.label = Some("ConnectRequest");
            }
            DisconnectRequest => {
                self.send_control(step, now, DisconnectResponse);
                self.go(step, PtpState::Disconnected, "DisconnectRequest");
            }
            DataAck0Xoff | DataAck1Xoff | DataNak0Xoff | DataNak1Xoff => {}
            ConnectResponse | DisconnectResponse | TestRequest | TestResponse | Unknown(_) => {}
        }
    }

    /// Run the timers. Called when a line read produced no frame.
    pub fn timeout(&mut self, now: u32) -> Step {
        let mut step = Step::new(self.state);
        match self.state {
            PtpState::Disconnected | PtpState::Outbound => {}
            PtpState::Inbound => {
                if self.rxmt_tmr.expired(now) {
                    self.rxmt_cnt += 1;
                    if self.rxmt_cnt < self.rxmt_max {
                        self.rxmt_tmr = Deadline::after(now, self.conn_rxmt_time);
                        self.send_control(&mut step, now, PtpFrameType::ConnectRequest);
                        step.label = Some("RetryConnect");
                    } else {
                        self.go(&mut step, PtpState::Disconnected, "ConnectFailed");
                    }
                }
            }
            PtpState::Connected => {
                if self.tx_buf.is_some() && self.rxmt_tmr.expired(now) {
                    self.rxmt_cnt += 1;
                    if self.rxmt_cnt < self.rxmt_max {
                        self.rxmt_tmr = Deadline::after(now, self.npdu_rxmt_time);
                        if self.tx_xon {
                            self.send_data(&mut step, now);
                        }
                        step.label = Some("RetransmitData");
                    } else {
                        self.tx_buf = None;
                        step.actions.push(Action::RetriesExhausted);
                        step.label = Some("DataRetriesExhausted");
                    }
                }
                if self.rx_idle_tmr.expired(now) {
                    self.rxmt_tmr = Deadline::after(now, self.disc_rxmt_time);
                    self.rxmt_cnt = 0;
                    self.send_disconnect(&mut step, now, DISC_REASON_IDLE);
                    self.go(&mut step, PtpState::Disconnecting, "ReceiveIdle");
                    return step;
                }
                if self.tx_idle_tmr.expired(now) {
                    self.send_control(&mut step, now, PtpFrameType::HeartbeatXon);
                    if step.label.is_none() {
                        step.label = Some("Heartbeat");
                    }
                }
            }
            PtpState::Disconnecting => {
                if self.rxmt_tmr.expired(now) {
                    self.rxmt_cnt += 1;
                    if self.rxmt_cnt < self.rxmt_max {
                        self.send_disconnect(&mut step, now, DISC_REASON_RETRY);
                        self.rxmt_tmr = Deadline::after(now, self.disc_rxmt_time);
                        step.label = Some("RetryDisconnect");
                    } else {
                        self.go(&mut step, PtpState::Disconnected, "DisconnectTimeout");
                    }
                }
            }
        }
        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> PtpMachine {
        PtpMachine::new(&PtpConfig::default())
    }

    fn sent(step: &Step) -> Vec<PtpFrameType> {
        step.actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(frame) => Some(frame.frame_type),
                _ => None,
            })
            .collect()
    }

    fn rx(m: &mut PtpMachine, now: u32, frame_type: PtpFrameType) -> Step {
        m.frame_received(now, Ok(PtpFrame::control(frame_type)))
    }

    fn connected(now: u32) -> PtpMachine {
        let mut m = machine();
        m.connect_inbound(now);
        rx(&mut m, now + 10, PtpFrameType::ConnectResponse);
        rx(&mut m, now + 20, PtpFrameType::HeartbeatXon);
        assert!(m.tx_xon());
        m
    }

    #[test]
    fn test_handshake() {
        let mut m = machine();
        let step = m.connect_inbound(1000);
        assert_eq!(sent(&step), vec![PtpFrameType::ConnectRequest]);
        assert_eq!(m.state(), PtpState::Inbound);

        let step = rx(&mut m, 3000, PtpFrameType::ConnectResponse);
        assert_eq!(m.state(), PtpState::Connected);
        assert_eq!(sent(&step), vec![PtpFrameType::HeartbeatXon]);
        assert!(step.actions.contains(&Action::Event(LinkEvent::Connected)));
    }

    #[test]
    fn test_connect_retries_then_gives_up() {
        let mut m = machine();
        m.connect_inbound(0);
        // Not yet expired
        assert!(sent(&m.timeout(5000)).is_empty());

        let step = m.timeout(5001);
        assert_eq!(sent(&step), vec![PtpFrameType::ConnectRequest]);
        let step = m.timeout(10_002);
        assert_eq!(sent(&step), vec![PtpFrameType::ConnectRequest]);
        assert_eq!(m.state(), PtpState::Inbound);

        let step = m.timeout(15_003);
        assert!(sent(&step).is_empty());
        assert_eq!(m.state(), PtpState::Disconnected);
        // Never connected, so no Disconnected event
        assert!(step.actions.is_empty());
    }

    #[test]
    fn test_inbound_disconnect_request() {
        let mut m = machine();
        m.connect_inbound(0);
        let step = rx(&mut m, 10, PtpFrameType::DisconnectRequest);
        assert_eq!(sent(&step), vec![PtpFrameType::DisconnectResponse]);
        assert_eq!(m.state(), PtpState::Disconnected);
    }

    #[test]
    fn test_data_sequence_alternates() {
        let mut m = connected(0);
        let step = m.submit(100, Bytes::from_static(&[0x01, 0x02])).unwrap();
        assert_eq!(sent(&step), vec![PtpFrameType::Data0]);
        assert!(matches!(
            m.submit(101, Bytes::from_static(&[0x03])),
            Err(DataLinkError::BufferFull)
        ));

        // Stale parity is ignored
        let step = rx(&mut m, 150, PtpFrameType::DataAck1Xon);
        assert!(step.actions.is_empty());
        assert!(m.tx_busy());

        let step = rx(&mut m, 200, PtpFrameType::DataAck0Xon);
        assert_eq!(step.actions, vec![Action::Acked(2)]);
        assert!(!m.tx_busy());

        let step = m.submit(300, Bytes::from_static(&[0x03])).unwrap();
        assert_eq!(sent(&step), vec![PtpFrameType::Data1]);
    }

    #[test]
    fn test_submit_requires_connection() {
        let mut m = machine();
        assert!(matches!(
            m.submit(0, Bytes::from_static(&[1])),
            Err(DataLinkError::NotConnected)
        ));
    }

    #[test]
    fn test_xoff_holds_data() {
        let mut m = connected(0);
        rx(&mut m, 50, PtpFrameType::HeartbeatXoff);
        let step = m.submit(100, Bytes::from_static(&[0x01])).unwrap();
        assert!(sent(&step).is_empty());

        // Retransmit timer still runs while held back
        let step = m.timeout(1101);
        assert!(sent(&step).is_empty());
        assert_eq!(m.retry_count(), 1);

        rx(&mut m, 1200, PtpFrameType::HeartbeatXon);
        let step = m.timeout(2102);
        assert_eq!(sent(&step), vec![PtpFrameType::Data0]);
    }

    #[test]
    fn test_retransmit_bound() {
        let mut m = connected(0);
        m.submit(100, Bytes::from_static(&[0x01])).unwrap();

        let mut data_frames = 1;
        let mut now = 100;
        let mut exhausted = false;
        for _ in 0..10 {
            now += 1001;
            let step = m.timeout(now);
            data_frames += sent(&step)
                .iter()
                .filter(|t| **t == PtpFrameType::Data0)
                .count();
            if step.actions.contains(&Action::RetriesExhausted) {
                exhausted = true;
                break;
            }
        }
        assert!(exhausted);
        assert_eq!(data_frames, 3);
        assert!(!m.tx_busy());
        assert_eq!(m.state(), PtpState::Connected);
    }

    #[test]
    fn test_nak_triggers_retransmit() {
        let mut m = connected(0);
        m.submit(100, Bytes::from_static(&[0x01])).unwrap();
        let step = rx(&mut m, 150, PtpFrameType::DataNak0Xon);
        assert_eq!(sent(&step), vec![PtpFrameType::Data0]);
        let step = rx(&mut m, 160, PtpFrameType::DataNak1Xon);
        assert!(sent(&step).is_empty());
    }

    #[test]
    fn test_received_data_acked_and_deduplicated() {
        let mut m = connected(0);
        let frame = PtpFrame::new(PtpFrameType::Data0, Bytes::from_static(&[0xAA]));

        let step = m.frame_received(100, Ok(frame.clone()));
        assert_eq!(sent(&step), vec![PtpFrameType::DataAck0Xon]);
        assert!(step.actions.contains(&Action::Deliver(Bytes::from_static(&[0xAA]))));

        // Our ack was lost, the peer sends the same frame again
        let step = m.frame_received(200, Ok(frame));
        assert_eq!(sent(&step), vec![PtpFrameType::DataAck0Xon]);
        assert!(!step.actions.iter().any(|a| matches!(a, Action::Deliver(_))));

        let step = m.frame_received(
            300,
            Ok(PtpFrame::new(PtpFrameType::Data1, Bytes::from_static(&[0xBB]))),
        );
        assert_eq!(sent(&step), vec![PtpFrameType::DataAck1Xon]);
        assert!(step.actions.contains(&Action::Deliver(Bytes::from_static(&[0xBB]))));
    }

    #[test]
    fn test_invalid_frame_ignored() {
        let mut m = connected(0);
        let step = m.frame_received(100, Err(FrameError::DataCrc));
        assert!(step.actions.is_empty());
        assert_eq!(m.state(), PtpState::Connected);
    }

    #[test]
    fn test_idle_timers() {
        let mut m = connected(0);
        // Last transmission was the heartbeat after CONNECT_RESP at t=10
        let step = m.timeout(15_011);
        assert_eq!(sent(&step), vec![PtpFrameType::HeartbeatXon]);
        assert_eq!(m.state(), PtpState::Connected);

        // Last reception at t=20
        let step = m.timeout(30_021);
        assert_eq!(m.state(), PtpState::Disconnecting);
        match &step.actions[0] {
            Action::Send(frame) => {
                assert_eq!(frame.frame_type, PtpFrameType::DisconnectRequest);
                assert_eq!(frame.data.as_ref(), &[0x01]);
            }
            other => panic!("unexpected action {:?}", other),
        }

        let step = m.timeout(35_022);
        assert_eq!(sent(&step), vec![PtpFrameType::DisconnectRequest]);
        let step = m.timeout(40_023);
        assert_eq!(sent(&step), vec![PtpFrameType::DisconnectRequest]);
        let step = m.timeout(45_024);
        assert_eq!(m.state(), PtpState::Disconnected);
        assert!(step.actions.contains(&Action::Event(LinkEvent::Disconnected)));
    }

    #[test]
    fn test_peer_disconnect_aborts_pending_send() {
        let mut m = connected(0);
        m.submit(100, Bytes::from_static(&[0x01])).unwrap();
        let step = rx(&mut m, 150, PtpFrameType::DisconnectRequest);
        assert_eq!(sent(&step), vec![PtpFrameType::DisconnectResponse]);
        assert!(step.actions.contains(&Action::Aborted));
        assert!(step.actions.contains(&Action::Event(LinkEvent::Disconnected)));
        assert_eq!(m.state(), PtpState::Disconnected);
    }

    #[test]
    fn test_local_disconnect() {
        let mut m = connected(0);
        let step = m.disconnect(100);
        assert_eq!(sent(&step), vec![PtpFrameType::DisconnectRequest]);
        assert_eq!(m.state(), PtpState::Disconnecting);
        rx(&mut m, 200, PtpFrameType::DisconnectResponse);
        assert_eq!(m.state(), PtpState::Disconnected);

        let mut m = machine();
        m.connect_outbound(0);
        assert_eq!(m.state(), PtpState::Outbound);
        m.disconnect(10);
        assert_eq!(m.state(), PtpState::Disconnected);
    }

    #[test]
    fn test_outbound_sends_trigger_and_ignores_frames() {
        let mut m = machine();
        let step = m.connect_outbound(0);
        assert_eq!(
            step.actions,
            vec![Action::SendRaw(Bytes::from_static(b"BACnet\r"))]
        );
        let step = rx(&mut m, 10, PtpFrameType::ConnectRequest);
        assert!(step.actions.is_empty());
        assert_eq!(m.state(), PtpState::Outbound);
    }

    #[test]
    fn test_connect_request_while_connected() {
        let mut m = connected(0);
        let step = rx(&mut m, 100, PtpFrameType::ConnectRequest);
        assert_eq!(sent(&step), vec![PtpFrameType::ConnectResponse]);
        assert_eq!(m.state(), PtpState::Connected);
    }
}
