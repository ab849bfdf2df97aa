//! MS/TP node state machine (ASHRAE 135 Clauses 9.5.6 and 9.5.7).
//!
//! [`MasterMachine`] is the pure transition function of the MAC layer. It owns
//! the ring variables (TS, NS, PS, counters, silence timer) but performs no
//! I/O: every call to [`step`](MasterMachine::step) returns the actions the
//! engine has to carry out and whether the next state must be evaluated again
//! right away, without waiting for the line.
//!
//! The received-frame flags behave like those of the standard: a frame stays
//! pending until a state consumes it, so a state that hands over to IDLE
//! "immediately" lets IDLE process the frame that caused the hand-over.
//!
//! In the [`Slave`](MstpRole::Slave) role only IDLE and ANSWER_DATA_REQUEST
//! are used: the node never takes the token, so it neither passes it nor
//! polls, and token loss is not its concern.

use std::fmt;

use crate::config::{MstpConfig, MstpRole, MSTP_BROADCAST};
use crate::datalink::mstp::frame::{Frame, FrameType};
use crate::datalink::{FrameError, LinkEvent};
use crate::timer;

/// MS/TP master node states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MstpState {
    Initialize,
    Idle,
    UseToken,
    WaitForReply,
    DoneWithToken,
    PassToken,
    NoToken,
    PollForMaster,
    AnswerDataRequest,
}

impl MstpState {
    pub fn name(self) -> &'static str {
        match self {
            MstpState::Initialize => "INITIALIZE",
            MstpState::Idle => "IDLE",
            MstpState::UseToken => "USE_TOKEN",
            MstpState::WaitForReply => "WAIT_FOR_REPLY",
            MstpState::DoneWithToken => "DONE_WITH_TOKEN",
            MstpState::PassToken => "PASS_TOKEN",
            MstpState::NoToken => "NO_TOKEN",
            MstpState::PollForMaster => "POLL_FOR_MASTER",
            MstpState::AnswerDataRequest => "ANSWER_DATA_REQUEST",
        }
    }
}

impl fmt::Display for MstpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the engine has queued for transmission, as far as the machine cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub frame_type: FrameType,
    pub destination: u8,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Transmit a control frame built by the machine.
    Send(Frame),
    /// Transmit the queued PDU and free the outbound slot.
    SendPending,
    /// Hand a received frame to the network layer.
    Deliver(Frame),
    /// Report a management event.
    Event(LinkEvent),
}

/// Result of one evaluation of the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub from: MstpState,
    pub to: MstpState,
    /// Name of the transition taken, `None` while the state keeps waiting.
    pub label: Option<&'static str>,
    pub actions: Vec<Action>,
    /// Evaluate the new state again before waiting for the line.
    pub again: bool,
}

impl Step {
    fn new(state: MstpState) -> Self {
        Self {
            from: state,
            to: state,
            label: None,
            actions: Vec::new(),
            again: false,
        }
    }
}

/// MS/TP node, master or slave.
#[derive(Debug, Clone)]
pub struct MasterMachine {
    // Configuration
    ts: u8,
    role: MstpRole,
    max_master: u8,
    max_info_frames: u8,
    n_poll: u8,
    n_retry_token: u8,
    n_min_octets: u32,
    t_no_token: u32,
    t_reply_timeout: u32,
    t_reply_delay: u32,
    t_usage_timeout: u32,
    t_slot: u32,

    state: MstpState,
    /// LinkUp was reported since the last start
    up: bool,
    ns: u8,
    ps: u8,
    sole_master: bool,
    frame_count: u8,
    retry_count: u8,
    token_count: u8,
    event_count: u32,
    silence_start: u32,

    rcvd_valid: Option<Frame>,
    rcvd_invalid: bool,
    /// Source of the request being answered in ANSWER_DATA_REQUEST
    reply_to: u8,
}

impl MasterMachine {
    pub fn new(config: &MstpConfig) -> Self {
        Self {
            ts: config.station_address,
            role: config.role,
            max_master: config.max_master,
            max_info_frames: config.max_info_frames,
            n_poll: config.n_poll,
            n_retry_token: config.n_retry_token,
            n_min_octets: config.n_min_octets,
            t_no_token: config.t_no_token,
            t_reply_timeout: config.t_reply_timeout,
            t_reply_delay: config.t_reply_delay,
            t_usage_timeout: config.t_usage_timeout,
            t_slot: config.t_slot,

            state: MstpState::Initialize,
            up: false,
            ns: config.station_address,
            ps: config.station_address,
            sole_master: false,
            frame_count: 0,
            retry_count: 0,
            token_count: 0,
            event_count: 0,
            silence_start: 0,

            rcvd_valid: None,
            rcvd_invalid: false,
            reply_to: MSTP_BROADCAST,
        }
    }

    pub fn state(&self) -> MstpState {
        self.state
    }

    pub fn station_address(&self) -> u8 {
        self.ts
    }

    pub fn role(&self) -> MstpRole {
        self.role
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn next_station(&self) -> u8 {
        self.ns
    }

    pub fn poll_station(&self) -> u8 {
        self.ps
    }

    pub fn sole_master(&self) -> bool {
        self.sole_master
    }

    pub fn frame_count(&self) -> u8 {
        self.frame_count
    }

    pub fn token_count(&self) -> u8 {
        self.token_count
    }

    pub fn retry_count(&self) -> u8 {
        self.retry_count
    }

    pub fn event_count(&self) -> u32 {
        self.event_count
    }

    /// Milliseconds since the last frame boundary or transmission.
    pub fn silence(&self, now: u32) -> i32 {
        timer::elapsed(now, self.silence_start)
    }

    /// The node holds the token (or is about to pass it).
    pub fn has_token(&self) -> bool {
        matches!(
            self.state,
            MstpState::UseToken | MstpState::WaitForReply | MstpState::DoneWithToken
        )
    }

    /// INITIALIZE: bind the ring variables and go to IDLE.
    pub fn start(&mut self, now: u32) -> Step {
        let mut step = Step::new(self.state);
        self.ns = self.ts;
        self.ps = self.ts;
        self.sole_master = false;
        self.frame_count = 0;
        self.retry_count = 0;
        self.token_count = 0;
        self.event_count = 0;
        self.rcvd_valid = None;
        self.rcvd_invalid = false;
        self.silence_start = now;
        self.go(&mut step, MstpState::Idle, "Start", false);
        step
    }

    /// Switch roles. The node drops back to INITIALIZE and reports
    /// [`LinkEvent::LinkDown`] if it was up; [`start`](Self::start) rejoins
    /// the segment in the new role.
    pub fn set_role(&mut self, role: MstpRole) -> Step {
        let mut step = Step::new(self.state);
        if role == self.role {
            return step;
        }
        self.role = role;
        if self.up {
            self.up = false;
            step.actions.push(Action::Event(LinkEvent::LinkDown));
        }
        self.rcvd_valid = None;
        self.rcvd_invalid = false;
        self.go(&mut step, MstpState::Initialize, "RoleChange", false);
        step
    }

    fn link_up(&mut self, step: &mut Step) {
        if !self.up {
            self.up = true;
            step.actions.push(Action::Event(LinkEvent::LinkUp));
        }
    }

    /// Account octets read from the line.
    pub fn octets_received(&mut self, count: usize) {
        self.event_count = self.event_count.saturating_add(count as u32);
    }

    /// Record the outcome of a frame reception.
    ///
    /// Valid and invalid frames both restart the silence timer.
    pub fn frame_received(&mut self, now: u32, frame: Result<Frame, FrameError>) {
        if self.state == MstpState::Initialize {
            return;
        }
        self.silence_start = now;
        match frame {
            Ok(frame) => self.rcvd_valid = Some(frame),
            Err(_) => self.rcvd_invalid = true,
        }
    }

    /// How long the engine may block on the line before the current state
    /// needs to be evaluated again.
    pub fn wait_timeout(&self, now: u32) -> u32 {
        if self.role == MstpRole::Slave && self.state == MstpState::Idle {
            return self.t_no_token;
        }
        let timer = match self.state {
            MstpState::Initialize => 100,
            MstpState::Idle => self.t_no_token,
            // Queued replies are picked up between line reads
            MstpState::AnswerDataRequest => {
                let left = self.t_reply_delay as i32 - self.silence(now);
                return left.clamp(0, 5) as u32;
            }
            // Past its slot the node waits on line activity alone
            MstpState::NoToken => {
                let slot = (self.t_no_token + self.t_slot * self.ts as u32) as i32;
                return (slot - self.silence(now)).max(1) as u32;
            }
            MstpState::PollForMaster => self.t_usage_timeout,
            // PASS_TOKEN times out strictly after Tusage_timeout
            MstpState::PassToken => self.t_usage_timeout + 1,
            MstpState::UseToken => 5,
            MstpState::DoneWithToken => 0,
            MstpState::WaitForReply => self.t_reply_timeout,
        };
        (timer as i32 - self.silence(now)).max(0) as u32
    }

    fn next_addr(&self, addr: u8) -> u8 {
        ((addr as u16 + 1) % (self.max_master as u16 + 1)) as u8
    }

    fn go(&mut self, step: &mut Step, to: MstpState, label: &'static str, again: bool) {
        self.state = to;
        step.to = to;
        step.label = Some(label);
        step.again = again;
    }

    fn send(&mut self, step: &mut Step, now: u32, frame_type: FrameType, destination: u8) {
        step
            .actions
            .push(Action::Send(Frame::control(frame_type, destination, self.ts)));
        self.silence_start = now;
    }

    /// Evaluate the current state once.
    ///
    /// `pending` describes the PDU waiting in the outbound slot, if any.
    pub fn step(&mut self, now: u32, pending: Option<Pending>) -> Step {
        let mut step = Step::new(self.state);
        if self.role == MstpRole::Slave {
            match self.state {
                MstpState::Idle => self.slave_idle(&mut step),
                MstpState::AnswerDataRequest => self.answer_data_request(&mut step, now, pending),
                _ => {}
            }
            return step;
        }
        match self.state {
            MstpState::Initialize => {}
            MstpState::Idle => self.idle(&mut step, now),
            MstpState::UseToken => self.use_token(&mut step, now, pending),
            MstpState::WaitForReply => self.wait_for_reply(&mut step, now),
            MstpState::DoneWithToken => self.done_with_token(&mut step, now),
            MstpState::PassToken => self.pass_token(&mut step, now),
            MstpState::NoToken => self.no_token(&mut step, now),
            MstpState::PollForMaster => self.poll_for_master(&mut step, now),
            MstpState::AnswerDataRequest => self.answer_data_request(&mut step, now, pending),
        }
        step
    }

    fn idle(&mut self, step: &mut Step, now: u32) {
        if self.silence(now) >= self.t_no_token as i32 {
            self.event_count = 0;
            self.rcvd_invalid = false;
            self.rcvd_valid = None;
            step.actions.push(Action::Event(LinkEvent::TokenLost));
            self.go(step, MstpState::NoToken, "LostToken", true);
            return;
        }

        if self.rcvd_invalid {
            self.rcvd_invalid = false;
            step.label = Some("ReceivedInvalidFrame");
        }

        let frame = match self.rcvd_valid.take() {
            Some(frame) => frame,
            None => return,
        };

        if frame.destination != self.ts && frame.destination != MSTP_BROADCAST {
            step.label = Some("NotForMe");
            return;
        }

        match frame.frame_type {
            FrameType::Token | FrameType::ReplyToPollForMaster
                if frame.destination != MSTP_BROADCAST =>
            {
                self.frame_count = 0;
                if self.sole_master {
                    step.actions.push(Action::Event(LinkEvent::MultiMaster));
                }
                self.sole_master = false;
                self.link_up(step);
                self.go(step, MstpState::UseToken, "ReceivedToken", true);
            }
            FrameType::PollForMaster if frame.destination == self.ts => {
                self.send(step, now, FrameType::ReplyToPollForMaster, frame.source);
                step.label = Some("ReceivedPFM");
            }
            FrameType::BacnetDataNotExpectingReply | FrameType::TestResponse => {
                step.actions.push(Action::Deliver(frame));
                step.label = Some("ReceivedDataNoReply");
            }
            FrameType::BacnetDataExpectingReply | FrameType::TestRequest => {
                let broadcast = frame.destination == MSTP_BROADCAST;
                let source = frame.source;
                step.actions.push(Action::Deliver(frame));
                if broadcast {
                    self.reply_to = source;
                    self.go(step, MstpState::AnswerDataRequest, "ReceivedDataNeedingReply", false);
                } else {
                    step.label = Some("ReceivedDataNeedingReply");
                }
            }
            _ => {
                step.label = Some("ReceivedUnwantedFrame");
            }
        }
    }

    /// IDLE of a slave node. Unicast requests are answered in
    /// ANSWER_DATA_REQUEST; broadcast ones are only delivered.
    fn slave_idle(&mut self, step: &mut Step) {
        if self.rcvd_invalid {
            self.rcvd_invalid = false;
            step.label = Some("ReceivedInvalidFrame");
        }

        let frame = match self.rcvd_valid.take() {
            Some(frame) => frame,
            None => return,
        };

        if frame.destination != self.ts && frame.destination != MSTP_BROADCAST {
            step.label = Some("NotForMe");
            return;
        }
        self.link_up(step);

        match frame.frame_type {
            FrameType::BacnetDataNotExpectingReply | FrameType::TestResponse => {
                step.actions.push(Action::Deliver(frame));
                step.label = Some("ReceivedDataNoReply");
            }
            FrameType::BacnetDataExpectingReply | FrameType::TestRequest => {
                let broadcast = frame.destination == MSTP_BROADCAST;
                let source = frame.source;
                step.actions.push(Action::Deliver(frame));
                if broadcast {
                    step.label = Some("ReceivedDataNeedingReply");
                } else {
                    self.reply_to = source;
                    self.go(step, MstpState::AnswerDataRequest, "ReceivedDataNeedingReply", false);
                }
            }
            // Token and poll frames included
            _ => {
                step.label = Some("ReceivedUnwantedFrame");
            }
        }
    }

    fn use_token(&mut self, step: &mut Step, now: u32, pending: Option<Pending>) {
        let pending = match pending {
            Some(pending) => pending,
            None => {
                self.frame_count = self.max_info_frames;
                self.go(step, MstpState::DoneWithToken, "NothingToSend", true);
                return;
            }
        };

        step.actions.push(Action::SendPending);
        self.silence_start = now;
        self.frame_count = self.frame_count.saturating_add(1);

        match pending.frame_type {
            FrameType::BacnetDataExpectingReply if pending.destination != MSTP_BROADCAST => {
                self.go(step, MstpState::WaitForReply, "SendAndWait", false);
            }
            FrameType::TestRequest => {
                self.go(step, MstpState::WaitForReply, "SendAndWait", false);
            }
            _ => {
                self.go(step, MstpState::DoneWithToken, "SendNoWait", false);
            }
        }
    }

    fn wait_for_reply(&mut self, step: &mut Step, now: u32) {
        if self.silence(now) >= self.t_reply_timeout as i32 {
            self.frame_count = self.max_info_frames;
            self.go(step, MstpState::DoneWithToken, "ReplyTimeout", true);
            return;
        }

        if self.rcvd_invalid {
            self.rcvd_invalid = false;
            self.go(step, MstpState::DoneWithToken, "InvalidFrame", true);
            return;
        }

        let frame = match self.rcvd_valid.take() {
            Some(frame) => frame,
            None => return,
        };

        if frame.destination != self.ts {
            self.go(step, MstpState::Idle, "ReceivedUnexpectedFrame", true);
            return;
        }

        match frame.frame_type {
            FrameType::ReplyPostponed => {
                self.go(step, MstpState::DoneWithToken, "ReceivedPostponed", true);
            }
            FrameType::TestResponse | FrameType::BacnetDataNotExpectingReply => {
                step.actions.push(Action::Deliver(frame));
                self.go(step, MstpState::DoneWithToken, "ReceivedReply", true);
            }
            _ => {
                self.go(step, MstpState::Idle, "ReceivedUnexpectedFrame", true);
            }
        }
    }

    fn done_with_token(&mut self, step: &mut Step, now: u32) {
        if self.frame_count < self.max_info_frames {
            self.go(step, MstpState::UseToken, "SendAnotherFrame", true);
        } else if !self.sole_master && self.ns == self.ts {
            self.ps = self.next_addr(self.ts);
            self.send(step, now, FrameType::PollForMaster, self.ps);
            self.retry_count = 0;
            self.go(step, MstpState::PollForMaster, "NextStationUnknown", false);
        } else if self.token_count < self.n_poll.saturating_sub(1) {
            if self.sole_master && self.ns != self.next_addr(self.ts) {
                self.frame_count = 0;
                self.token_count += 1;
                self.go(step, MstpState::UseToken, "SoleMaster", true);
            } else {
                self.token_count += 1;
                self.send(step, now, FrameType::Token, self.ns);
                self.retry_count = 0;
                self.event_count = 0;
                self.go(step, MstpState::PassToken, "SendToken", false);
            }
        } else if self.next_addr(self.ps) == self.ns {
            if self.sole_master {
                self.ps = self.next_addr(self.ns);
                self.send(step, now, FrameType::PollForMaster, self.ps);
                self.ns = self.ts;
                self.retry_count = 0;
                self.token_count = 1;
                self.go(step, MstpState::PollForMaster, "SoleMasterRestartMaintenancePFM", false);
            } else {
                self.ps = self.ts;
                self.send(step, now, FrameType::PollForMaster, self.ns);
                self.retry_count = 0;
                self.token_count = 1;
                self.event_count = 0;
                self.go(step, MstpState::PassToken, "ResetMaintenancePFM", false);
            }
        } else {
            self.ps = self.next_addr(self.ps);
            self.send(step, now, FrameType::PollForMaster, self.ps);
            self.retry_count = 0;
            self.go(step, MstpState::PollForMaster, "SendMaintenancePFM", false);
        }
    }

    fn pass_token(&mut self, step: &mut Step, now: u32) {
        if self.silence(now) <= self.t_usage_timeout as i32 {
            if self.event_count > self.n_min_octets {
                self.go(step, MstpState::Idle, "SawTokenUser", true);
            }
        } else if self.retry_count < self.n_retry_token {
            self.retry_count += 1;
            self.send(step, now, FrameType::Token, self.ns);
            self.event_count = 0;
            self.go(step, MstpState::PassToken, "RetrySendToken", false);
        } else {
            self.ps = self.next_addr(self.ns);
            self.send(step, now, FrameType::PollForMaster, self.ps);
            self.ns = self.ts;
            self.retry_count = 0;
            self.token_count = 0;
            self.go(step, MstpState::PollForMaster, "FindNewSuccessor", false);
        }
    }

    fn no_token(&mut self, step: &mut Step, now: u32) {
        let silence = self.silence(now);
        let my_slot = (self.t_no_token + self.t_slot * self.ts as u32) as i32;

        if silence < my_slot {
            if self.event_count > self.n_min_octets {
                self.go(step, MstpState::Idle, "SawFrame", true);
            }
            return;
        }

        let ns_tmo = (self.t_no_token + self.t_slot * (self.ts as u32 + 1)) as i32;
        let mm_tmo = (self.t_no_token + self.t_slot * (self.max_master as u32 + 1)) as i32;
        if silence < ns_tmo || silence > mm_tmo {
            self.ps = self.next_addr(self.ts);
            self.send(step, now, FrameType::PollForMaster, self.ps);
            self.ns = self.ts;
            self.token_count = 0;
            self.retry_count = 0;
            self.go(step, MstpState::PollForMaster, "GenerateToken", false);
        } else if self.event_count > self.n_min_octets {
            self.go(step, MstpState::Idle, "SawFrame", true);
        }
    }

    fn poll_for_master(&mut self, step: &mut Step, now: u32) {
        if let Some(frame) = self.rcvd_valid.take() {
            if frame.destination == self.ts && frame.frame_type == FrameType::ReplyToPollForMaster {
                if self.sole_master {
                    step.actions.push(Action::Event(LinkEvent::MultiMaster));
                }
                self.sole_master = false;
                self.ns = frame.source;
                self.event_count = 0;
                self.send(step, now, FrameType::Token, self.ns);
                self.ps = self.ts;
                self.token_count = 0;
                self.retry_count = 0;
                self.go(step, MstpState::PassToken, "ReceivedReplyToPFM", false);
            } else {
                self.go(step, MstpState::Idle, "ReceivedUnexpectedFrame", true);
            }
            return;
        }

        if self.silence(now) < self.t_usage_timeout as i32 && !self.rcvd_invalid {
            return;
        }
        self.rcvd_invalid = false;

        if self.sole_master {
            self.frame_count = 0;
            self.go(step, MstpState::UseToken, "SoleMaster", false);
        } else if self.ns != self.ts {
            self.event_count = 0;
            self.send(step, now, FrameType::Token, self.ns);
            self.retry_count = 0;
            self.go(step, MstpState::PassToken, "DoneWithPFM", false);
        } else if self.next_addr(self.ps) != self.ts {
            self.ps = self.next_addr(self.ps);
            self.send(step, now, FrameType::PollForMaster, self.ps);
            self.retry_count = 0;
            self.go(step, MstpState::PollForMaster, "SendNextPFM", false);
        } else {
            self.sole_master = true;
            self.frame_count = 0;
            step.actions.push(Action::Event(LinkEvent::SoleMaster));
            self.link_up(step);
            self.go(step, MstpState::UseToken, "DeclareSoleMaster", true);
        }
    }

    fn answer_data_request(&mut self, step: &mut Step, now: u32, pending: Option<Pending>) {
        let silence = self.silence(now);
        let reply_ready = pending.map_or(false, |p| p.frame_type.is_reply());

        if silence < self.t_reply_delay as i32 && reply_ready {
            step.actions.push(Action::SendPending);
            self.silence_start = now;
            self.go(step, MstpState::Idle, "Reply", false);
        } else if silence >= self.t_reply_delay as i32 {
            self.send(step, now, FrameType::ReplyPostponed, self.reply_to);
            self.go(step, MstpState::Idle, "DeferredReply", false);
        }
    }
}
