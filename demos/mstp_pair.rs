//! MS/TP Pair Demo
//!
//! Two MS/TP master stations share an in-memory EIA-485 segment. Station 1
//! sends a Who-Is every two seconds; station 2 prints what it receives and
//! answers with an I-Am shaped NPDU. Press Ctrl-C to stop.
//!
//! Run with `RUST_LOG=trace` to see every state transition and raw frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bacnet_link::config::MstpConfig;
use bacnet_link::datalink::mstp::MstpLink;
use bacnet_link::transport::{LoopbackBus, SystemClock};
use bacnet_link::DataLinkError;

const WHO_IS: [u8; 4] = [0x01, 0x20, 0x10, 0x08];
const I_AM: [u8; 6] = [0x01, 0x00, 0x10, 0x00, 0xC4, 0x02];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("MS/TP Pair Demo");
    println!("===============\n");

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))?;
    }

    let bus = LoopbackBus::new();
    let clock = Arc::new(SystemClock::new());
    let config = MstpConfig::default().with_max_master(7);

    let client = MstpLink::new(config.clone().with_station_address(1), bus.attach(), clock.clone())?;
    let server = MstpLink::new(config.with_station_address(2), bus.attach(), clock)?;
    for link in [&client, &server] {
        link.set_event_handler({
            let address = link.station_address();
            move |event| println!("  station {}: {:?}", address, event)
        });
    }

    let engines = vec![client.spawn()?, server.spawn()?];
    client.start();
    server.start();

    // Station 2 answers every Who-Is it sees
    let responder = {
        let server = server.clone();
        thread::spawn(move || loop {
            match server.recv() {
                Ok(pdu) => {
                    println!("station 2 <- {} octets from {}", pdu.data.len(), pdu.source);
                    if pdu.data.as_ref() == WHO_IS {
                        if let Err(e) = server.send(&I_AM) {
                            eprintln!("station 2 send failed: {}", e);
                        }
                    }
                }
                Err(DataLinkError::Closed) => break,
                Err(e) => eprintln!("station 2 receive failed: {}", e),
            }
        })
    };

    while running.load(Ordering::SeqCst) {
        client.send(&WHO_IS)?;
        match client.recv_timeout(Duration::from_secs(2)) {
            Ok(pdu) => println!("station 1 <- I-Am from {}", pdu.source),
            Err(DataLinkError::Timeout) => println!("station 1: no answer"),
            Err(e) => return Err(e.into()),
        }

        let stats = client.stats();
        println!(
            "  state={} ns={} token_loop={}ms netmap={:?}",
            stats.current_state,
            stats.next_station,
            stats.token_loop_last_ms,
            client.netmap()
        );
        thread::sleep(Duration::from_secs(2));
    }

    println!("\nStopping...");
    client.stop();
    server.stop();
    for engine in engines {
        let _ = engine.join();
    }
    let _ = responder.join();
    Ok(())
}
