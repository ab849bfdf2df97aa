//! PTP Echo Demo
//!
//! Connects a `PtpLink` to a minimal half-router on the other end of an
//! in-memory serial cable. The far end answers the connect handshake, echoes
//! every NPDU back and acknowledges what it receives. Press Ctrl-C to
//! disconnect and exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bacnet_link::config::PtpConfig;
use bacnet_link::datalink::ptp::{PtpDecoder, PtpFrame, PtpFrameType, PtpLink};
use bacnet_link::transport::{LoopbackBus, LoopbackPort, SerialTransport, SystemClock};
use bacnet_link::DataLinkError;
use bytes::Bytes;

/// The remote half-router: just enough of Clause 10 to talk to us.
fn far_end(port: LoopbackPort, running: Arc<AtomicBool>) {
    let mut decoder = PtpDecoder::new(501);
    let mut buf = [0u8; 1024];
    let mut tx_seq = 0u8;
    let send = |frame_type: PtpFrameType, data: Bytes| {
        let _ = port.send(&PtpFrame::new(frame_type, data).to_bytes());
    };

    while running.load(Ordering::SeqCst) {
        match port.recv(&mut buf, Duration::from_millis(100)) {
            Ok(n) => decoder.push(&buf[..n]),
            Err(_) => continue,
        }
        while let Some(item) = decoder.decode() {
            let frame = match item {
                Ok(frame) => frame,
                Err(e) => {
                    eprintln!("far end: {}", e);
                    continue;
                }
            };
            match frame.frame_type {
                PtpFrameType::ConnectRequest => {
                    send(PtpFrameType::ConnectResponse, Bytes::new());
                }
                PtpFrameType::HeartbeatXon if tx_seq == 0 => {
                    // First heartbeat after connecting: open our window too
                    send(PtpFrameType::HeartbeatXon, Bytes::new());
                }
                PtpFrameType::Data0 | PtpFrameType::Data1 => {
                    let seq = frame.frame_type.data_seq().unwrap_or(0);
                    send(PtpFrameType::ack_xon(seq), Bytes::new());
                    send(PtpFrameType::data(tx_seq), frame.data);
                    tx_seq = tx_seq.wrapping_add(1);
                }
                PtpFrameType::DisconnectRequest => {
                    send(PtpFrameType::DisconnectResponse, Bytes::new());
                }
                _ => {}
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("PTP Echo Demo");
    println!("=============\n");

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))?;
    }

    let (ours, theirs) = LoopbackBus::pair();
    let remote = {
        let running = running.clone();
        thread::spawn(move || far_end(theirs, running))
    };

    let link = PtpLink::new(PtpConfig::default(), ours, Arc::new(SystemClock::new()))?;
    link.set_event_handler(|event| println!("  link event: {:?}", event));
    let engine = link.spawn()?;
    link.connect_inbound();

    while !link.stats().tx_xon {
        thread::sleep(Duration::from_millis(10));
    }
    println!("connected: {}", link.is_connected());

    let mut counter = 0u8;
    while running.load(Ordering::SeqCst) {
        // Include an octet that needs escaping on the wire
        let npdu = [0x01, 0x00, 0x11, counter];
        match link.send(&npdu) {
            Ok(len) => println!("sent {} octets", len),
            Err(DataLinkError::NotConnected) => break,
            Err(e) => eprintln!("send failed: {}", e),
        }
        match link.recv_timeout(Duration::from_secs(1)) {
            Ok(echo) => println!("echo: {}", hex::encode(&echo)),
            Err(e) => eprintln!("no echo: {}", e),
        }
        counter = counter.wrapping_add(1);
        thread::sleep(Duration::from_secs(1));
    }

    println!("\nDisconnecting...");
    link.disconnect();
    thread::sleep(Duration::from_millis(200));
    println!("stats: {:?}", link.stats());

    running.store(false, Ordering::SeqCst);
    link.stop();
    let _ = engine.join();
    let _ = remote.join();
    Ok(())
}
