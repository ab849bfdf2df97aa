//! BACnet serial data link layers.
//!
//! This module holds what the MS/TP and PTP links have in common: the
//! [`DataLink`] trait a network layer talks to, link addressing, the error
//! type and the checksum codec. Each protocol lives in its own submodule.
//!
//! # Link types
//!
//! - **MS/TP** ([`mstp`]): token passing over a shared EIA-485 segment, up to
//!   127 masters addressed 0..=126, 255 is broadcast.
//! - **PTP** ([`ptp`]): a point-to-point serial connection between two
//!   half-routers. There is no addressing, the peer is implicit.
//!
//! # Examples
//!
//! ```no_run
//! use bacnet_link::datalink::{DataLink, DataLinkAddress};
//!
//! fn forward(link: &mut dyn DataLink, npdu: &[u8]) -> bacnet_link::Result<()> {
//!     link.send_frame(npdu, &DataLinkAddress::Broadcast)
//! }
//! ```

pub mod crc;
pub mod mailbox;
pub mod mstp;
pub mod ptp;
pub mod registry;

use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

pub use registry::PduNotifier;

/// Result type for data link operations.
pub type Result<T> = core::result::Result<T, DataLinkError>;

/// Common interface of all data link implementations.
///
/// A network layer holds links as `Box<dyn DataLink>` and does not care which
/// medium carries its NPDUs.
pub trait DataLink: Send {
    /// Queue an NPDU for transmission to `dest`.
    ///
    /// Blocks while a previous NPDU is still waiting in the outbound slot.
    fn send_frame(&mut self, frame: &[u8], dest: &DataLinkAddress) -> Result<()>;

    /// Block until an NPDU has been received and return it with its source.
    fn receive_frame(&mut self) -> Result<(Vec<u8>, DataLinkAddress)>;

    fn link_type(&self) -> DataLinkType;

    fn local_address(&self) -> DataLinkAddress;

    /// Called by the registry so the link can announce received NPDUs.
    fn set_notifier(&mut self, _notifier: PduNotifier) {}
}

/// Callback for [`LinkEvent`]s, invoked from the engine thread.
pub type EventHandler = Arc<dyn Fn(LinkEvent) + Send + Sync>;

/// Data link layer types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataLinkType {
    /// MS/TP (Master-Slave/Token-Passing)
    Mstp,
    /// PTP (Point-To-Point)
    Ptp,
}

impl fmt::Display for DataLinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataLinkType::Mstp => write!(f, "MS/TP"),
            DataLinkType::Ptp => write!(f, "PTP"),
        }
    }
}

/// Data link address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataLinkAddress {
    /// MS/TP station address (0..=254)
    Mstp(u8),
    /// The far end of a point-to-point connection
    Ptp,
    /// Broadcast on the local segment
    Broadcast,
}

impl fmt::Display for DataLinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataLinkAddress::Mstp(mac) => write!(f, "mstp:{}", mac),
            DataLinkAddress::Ptp => write!(f, "ptp:peer"),
            DataLinkAddress::Broadcast => write!(f, "broadcast"),
        }
    }
}

/// Management events raised by a link engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// This MS/TP station found no other master and keeps the token itself.
    SoleMaster,
    /// A sole master discovered another master on the segment.
    MultiMaster,
    /// The MS/TP bus was silent for longer than the token loss timeout.
    TokenLost,
    /// The MS/TP node joined the segment: a master got the token, a slave
    /// heard a frame for it.
    LinkUp,
    /// The MS/TP node left the segment to change its role.
    LinkDown,
    /// A PTP connection was established.
    Connected,
    /// A PTP connection was torn down.
    Disconnected,
}

/// Data link errors.
#[derive(Debug, Error)]
pub enum DataLinkError {
    /// Transport I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    /// Frame failed to decode
    #[error("invalid frame")]
    InvalidFrame,
    /// Header or data checksum mismatch
    #[error("CRC mismatch")]
    CrcError,
    /// A bounded wait elapsed
    #[error("timed out")]
    Timeout,
    /// A buffer or slot is full
    #[error("buffer full")]
    BufferFull,
    /// Address not valid on this link
    #[error("address error: {0}")]
    AddressError(String),
    /// Operation or frame type not supported by this link
    #[error("unsupported type")]
    UnsupportedType,
    /// PTP link is not in the CONNECTED state
    #[error("link not connected")]
    NotConnected,
    /// Retransmissions exhausted without acknowledgement
    #[error("retries exhausted")]
    RetryExhausted,
    /// The link was stopped
    #[error("link closed")]
    Closed,
    /// Configuration rejected by `validate()`
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// PDU does not fit the link MTU
    #[error("PDU of {len} bytes exceeds maximum of {max}")]
    PduTooLarge { len: usize, max: usize },
}

/// Why a received octet sequence did not make a frame.
///
/// Link engines treat every variant as "invalid frame": the bus was active but
/// nothing usable arrived. The distinction is kept for statistics and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Preamble octet not followed by the second preamble octet
    #[error("preamble out of sync")]
    Sync,
    #[error("header CRC mismatch")]
    HeaderCrc,
    #[error("data CRC mismatch")]
    DataCrc,
    /// Length field larger than the receive buffer
    #[error("frame length {len} exceeds maximum of {max}")]
    Oversize { len: usize, max: usize },
}

impl From<FrameError> for DataLinkError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::HeaderCrc | FrameError::DataCrc => DataLinkError::CrcError,
            FrameError::Sync | FrameError::Oversize { .. } => DataLinkError::InvalidFrame,
        }
    }
}

/// Recover the guard of a poisoned lock.
///
/// Every critical section in this crate leaves the protected state consistent
/// before anything that could panic, so the data is still usable.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display() {
        assert_eq!(DataLinkAddress::Mstp(5).to_string(), "mstp:5");
        assert_eq!(DataLinkAddress::Broadcast.to_string(), "broadcast");
        assert_eq!(DataLinkType::Mstp.to_string(), "MS/TP");
    }

    #[test]
    fn test_error_display() {
        let err = DataLinkError::PduTooLarge { len: 600, max: 501 };
        assert_eq!(err.to_string(), "PDU of 600 bytes exceeds maximum of 501");
        let err: DataLinkError = io::Error::new(io::ErrorKind::Other, "uart").into();
        assert!(matches!(err, DataLinkError::IoError(_)));
    }
}
