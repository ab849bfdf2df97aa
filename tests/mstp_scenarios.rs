//! MS/TP stations exchanging traffic over an in-memory bus.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bacnet_link::config::{MstpConfig, MstpRole};
use bacnet_link::datalink::mstp::{Frame, FrameType, MstpLink, MstpState};
use bacnet_link::transport::{LoopbackBus, SerialTransport, SystemClock};
use bacnet_link::{DataLinkError, LinkEvent, Result};
use bytes::Bytes;

struct Station {
    link: MstpLink,
    engine: Option<JoinHandle<Result<()>>>,
}

impl Station {
    fn new(bus: &LoopbackBus, address: u8) -> Self {
        Self::with_role(bus, address, MstpRole::Master)
    }

    fn with_role(bus: &LoopbackBus, address: u8, role: MstpRole) -> Self {
        let config = MstpConfig::default()
            .with_station_address(address)
            .with_max_master(3)
            .with_role(role);
        let link = MstpLink::new(config, bus.attach(), Arc::new(SystemClock::new())).unwrap();
        let engine = Some(link.spawn().unwrap());
        link.start();
        Self { link, engine }
    }
}

impl Drop for Station {
    fn drop(&mut self) {
        self.link.stop();
        if let Some(engine) = self.engine.take() {
            let _ = engine.join();
        }
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_two_stations_exchange_data() {
    let bus = LoopbackBus::new();
    let a = Station::new(&bus, 1);
    let b = Station::new(&bus, 2);

    a.link.send_to(&[0x01, 0x00, 0x10, 0x08], 2, false).unwrap();
    let pdu = b.link.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(pdu.source, 1);
    assert_eq!(pdu.destination, 2);
    assert_eq!(pdu.frame_type, FrameType::BacnetDataNotExpectingReply);
    assert_eq!(pdu.data.as_ref(), &[0x01, 0x00, 0x10, 0x08]);

    b.link.send_to(&[0x01, 0x00, 0x30, 0x01], 1, false).unwrap();
    let pdu = a.link.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(pdu.source, 2);
    assert_eq!(pdu.data.as_ref(), &[0x01, 0x00, 0x30, 0x01]);

    assert!(wait_until(Duration::from_secs(2), || a.link.netmap() == vec![1, 2]));
    assert!(a.link.is_lowest_address());
    assert!(!b.link.is_lowest_address());
    assert!(!a.link.stats().sole_master);
}

#[test]
fn test_request_and_reply() {
    let bus = LoopbackBus::new();
    let client = Station::new(&bus, 1);
    let server = Station::new(&bus, 2);

    client.link.send_to(&[0x01, 0x04, 0x00, 0x05], 2, true).unwrap();
    let request = server.link.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(request.frame_type, FrameType::BacnetDataExpectingReply);

    server.link.send_to(&[0x01, 0x00, 0x30, 0x05], request.source, false).unwrap();
    let reply = client.link.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(reply.source, 2);
    assert_eq!(reply.data.as_ref(), &[0x01, 0x00, 0x30, 0x05]);
}

#[test]
fn test_broadcast_reaches_every_station() {
    let bus = LoopbackBus::new();
    let a = Station::new(&bus, 1);
    let b = Station::new(&bus, 2);
    let c = Station::new(&bus, 3);

    a.link.send(&[0x01, 0x20, 0xFF, 0xFF, 0x00, 0xFF, 0x10, 0x08]).unwrap();
    for station in [&b, &c] {
        let pdu = station.link.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(pdu.source, 1);
        assert_eq!(pdu.destination, 255);
    }
    assert!(wait_until(Duration::from_secs(1), || a.link.stats().tx_broadcast == 1));
}

#[test]
fn test_lone_station_becomes_sole_master() {
    let bus = LoopbackBus::new();
    let config = MstpConfig::default().with_station_address(2).with_max_master(3);
    let link = MstpLink::new(config, bus.attach(), Arc::new(SystemClock::new())).unwrap();

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    link.set_event_handler(move |event| {
        let _ = tx.lock().unwrap().send(event);
    });

    let engine = link.spawn().unwrap();
    link.start();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut events = Vec::new();
    while Instant::now() < deadline {
        if let Ok(event) = rx.recv_timeout(Duration::from_millis(100)) {
            events.push(event);
            if event == LinkEvent::SoleMaster {
                break;
            }
        }
    }
    assert_eq!(events.first(), Some(&LinkEvent::TokenLost));
    assert!(events.contains(&LinkEvent::SoleMaster));
    assert!(link.stats().sole_master);

    // A sole master still sends its own traffic
    link.send(&[0x01, 0x00]).unwrap();
    assert!(wait_until(Duration::from_secs(2), || link.stats().tx_broadcast == 1));

    link.stop();
    engine.join().unwrap().unwrap();
    assert!(matches!(link.recv(), Err(DataLinkError::Closed)));
}

#[test]
fn test_corrupt_data_crc_is_not_delivered() {
    let bus = LoopbackBus::new();
    let injector = bus.attach();
    let station = Station::new(&bus, 2);
    assert!(wait_until(Duration::from_secs(1), || station.link.state() != MstpState::Initialize));

    let bad = Frame::new(
        FrameType::BacnetDataNotExpectingReply,
        2,
        7,
        Bytes::from_static(&[0xDE, 0xAD]),
    );
    let mut bytes = bad.to_bytes().to_vec();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    injector.send(&bytes).unwrap();

    let good = Frame::new(
        FrameType::BacnetDataNotExpectingReply,
        2,
        7,
        Bytes::from_static(&[0xBE, 0xEF]),
    );
    injector.send(&good.to_bytes()).unwrap();

    let pdu = station.link.recv_timeout(Duration::from_secs(3)).unwrap();
    assert_eq!(pdu.data.as_ref(), &[0xBE, 0xEF]);
    assert_eq!(pdu.source, 7);
    assert_eq!(station.link.stats().data_crc_errors, 1);
    assert!(matches!(
        station.link.recv_timeout(Duration::from_millis(200)),
        Err(DataLinkError::Timeout)
    ));
}

#[test]
fn test_station_answers_poll_for_master() {
    let bus = LoopbackBus::new();
    let poller = bus.attach();
    let station = Station::new(&bus, 2);
    assert!(wait_until(Duration::from_secs(1), || station.link.state() != MstpState::Initialize));

    poller
        .send(&Frame::control(FrameType::PollForMaster, 2, 0).to_bytes())
        .unwrap();

    let mut decoder = bacnet_link::datalink::mstp::FrameDecoder::new(501);
    let mut buf = [0u8; 512];
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut answered = false;
    while Instant::now() < deadline && !answered {
        if let Ok(n) = poller.recv(&mut buf, Duration::from_millis(50)) {
            decoder.push(&buf[..n]);
        }
        while let Some(Ok(frame)) = decoder.decode() {
            if frame.frame_type == FrameType::ReplyToPollForMaster && frame.destination == 0 {
                assert_eq!(frame.source, 2);
                answered = true;
            }
        }
    }
    assert!(answered);
    assert!(station.link.netmap().contains(&0));
}

#[test]
fn test_busy_inbound_slot_drops_new_frame() {
    let bus = LoopbackBus::new();
    let injector = bus.attach();
    let a = Station::new(&bus, 1);
    let b = Station::new(&bus, 2);
    assert!(wait_until(Duration::from_secs(1), || b.link.state() != MstpState::Initialize));

    let mut bytes = Frame::new(
        FrameType::BacnetDataNotExpectingReply,
        2,
        9,
        Bytes::from_static(&[0x01, 0x00, 0x0A]),
    )
    .to_bytes()
    .to_vec();
    bytes.extend_from_slice(
        &Frame::new(
            FrameType::BacnetDataNotExpectingReply,
            2,
            9,
            Bytes::from_static(&[0x01, 0x00, 0x0B]),
        )
        .to_bytes(),
    );
    injector.send(&bytes).unwrap();

    assert!(wait_until(Duration::from_secs(1), || b.link.stats().rx_dropped == 1));
    assert!(b.link.stats().rx_pending);

    // The ring keeps going while nobody reads
    let tokens = b.link.stats().rx_token;
    assert!(wait_until(Duration::from_secs(5), || b.link.stats().rx_token >= tokens + 3));
    assert!(a.link.stats().tx_token >= 3);

    let pdu = b.link.try_recv().unwrap();
    assert_eq!(pdu.data.as_ref(), &[0x01, 0x00, 0x0A]);
    assert!(b.link.try_recv().is_none());
    assert_eq!(b.link.stats().rx_dropped, 1);
}

#[test]
fn test_slave_answers_master_request() {
    let bus = LoopbackBus::new();
    let master = Station::new(&bus, 1);
    let slave = Station::with_role(&bus, 2, MstpRole::Slave);
    assert!(!slave.link.is_up());

    master.link.send_to(&[0x01, 0x04, 0x00, 0x0C], 2, true).unwrap();
    let request = slave.link.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(request.frame_type, FrameType::BacnetDataExpectingReply);
    slave.link.send_to(&[0x01, 0x00, 0x30, 0x0C], request.source, false).unwrap();

    let reply = master.link.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(reply.source, 2);
    assert_eq!(reply.data.as_ref(), &[0x01, 0x00, 0x30, 0x0C]);

    slave.link.wait_up(Duration::from_secs(1)).unwrap();
    let stats = slave.link.stats();
    assert_eq!(stats.role, MstpRole::Slave);
    assert_eq!(stats.tx_token, 0);
    assert_eq!(stats.tx_poll_for_master, 0);
    // A slave does not answer polls, so the master stays alone in the ring
    assert!(master.link.stats().sole_master);
}

#[test]
fn test_role_switch_at_runtime() {
    let bus = LoopbackBus::new();
    let station = Station::new(&bus, 2);
    station.link.wait_up(Duration::from_secs(5)).unwrap();
    assert!(wait_until(Duration::from_secs(1), || station.link.stats().sole_master));

    station.link.set_role(MstpRole::Slave);
    assert!(wait_until(Duration::from_secs(2), || station.link.role() == MstpRole::Slave));
    assert!(!station.link.is_up());

    // Wait out a poll cycle that was under way during the switch
    thread::sleep(Duration::from_millis(100));
    let polls = station.link.stats().tx_poll_for_master;
    thread::sleep(Duration::from_millis(800));
    assert_eq!(station.link.stats().tx_poll_for_master, polls);
    assert_eq!(station.link.state(), MstpState::Idle);

    station.link.set_role(MstpRole::Master);
    station.link.wait_up(Duration::from_secs(5)).unwrap();
    assert_eq!(station.link.role(), MstpRole::Master);
}
