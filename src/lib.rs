//! BACnet serial data link layers (ASHRAE 135 Clauses 9 and 10).
//!
//! This crate implements the two serial BACnet data links:
//!
//! - **MS/TP** (Master-Slave/Token-Passing, Clause 9): a token ring over a
//!   multi-drop EIA-485 segment. The [`MstpLink`] engine owns bus arbitration,
//!   master discovery, sole-master detection and ring maintenance.
//! - **PTP** (Point-To-Point, Clause 10): a connection oriented, ACK/NAK,
//!   XON/XOFF flow controlled link for direct serial lines. See [`PtpLink`].
//!
//! Both links share the checksum codec in [`datalink::crc`] and hand PDUs to
//! the network layer through single-slot mailboxes: a caller of `send` blocks
//! while the previous PDU is still pending, and `recv` blocks until the link
//! delivers one.
//!
//! The byte transport underneath each link is abstracted by
//! [`transport::SerialTransport`], and time by [`transport::Clock`]. An
//! in-memory [`transport::LoopbackPort`] is provided for tests and demos.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::thread;
//! use bacnet_link::config::MstpConfig;
//! use bacnet_link::datalink::mstp::MstpLink;
//! use bacnet_link::transport::{LoopbackBus, SystemClock};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = LoopbackBus::new();
//! let link = MstpLink::new(
//!     MstpConfig::default().with_station_address(5),
//!     bus.attach(),
//!     Arc::new(SystemClock::new()),
//! )?;
//!
//! let engine = link.clone();
//! thread::spawn(move || engine.run());
//! link.start();
//!
//! link.send_to(&[0x01, 0x20, 0xFF, 0xFF, 0x00, 0xFF, 0x10, 0x08], 255, false)?;
//! let pdu = link.recv()?;
//! println!("{} bytes from station {}", pdu.data.len(), pdu.source);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod datalink;
pub mod timer;
pub mod transport;

pub use datalink::mstp::MstpLink;
pub use datalink::ptp::PtpLink;
pub use datalink::{DataLink, DataLinkAddress, DataLinkError, DataLinkType, LinkEvent, Result};
