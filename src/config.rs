//! Link configuration.
//!
//! Defaults follow the ASHRAE 135 MAC constants. Everything is plain data so
//! an embedding application can load it from whatever store it uses; with the
//! `serde` feature both structs implement `Serialize`/`Deserialize` and
//! missing fields fall back to their defaults.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::datalink::{DataLinkError, Result};

/// Highest address a master node may use.
pub const MAX_MASTER_ADDRESS: u8 = 127;

/// MS/TP broadcast address.
pub const MSTP_BROADCAST: u8 = 255;

/// Largest NPDU carried in an MS/TP or PTP frame.
pub const DEFAULT_MTU: usize = 501;

/// Part an MS/TP node plays on the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum MstpRole {
    /// Takes part in token passing and polls for other masters.
    #[default]
    Master,
    /// Never holds the token. Only answers requests addressed to it.
    Slave,
}

/// MS/TP link settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MstpConfig {
    /// This station (TS)
    pub station_address: u8,
    pub role: MstpRole,
    /// Highest master address polled (Nmax_master). Up to 127 on a fully
    /// populated segment.
    pub max_master: u8,
    /// Frames sent per token hold (Nmax_info_frames)
    pub max_info_frames: u8,
    /// Token passes between maintenance polls (Npoll)
    pub n_poll: u8,
    /// Token retries before the successor is presumed gone (Nretry_token)
    pub n_retry_token: u8,
    /// Octets that count as "bus activity" (Nmin_octets)
    pub n_min_octets: u32,

    // Timers, milliseconds
    pub t_no_token: u32,
    pub t_reply_timeout: u32,
    pub t_reply_delay: u32,
    pub t_usage_timeout: u32,
    pub t_slot: u32,

    /// Maximum NPDU length
    pub mtu: usize,
}

impl Default for MstpConfig {
    fn default() -> Self {
        Self {
            station_address: 0,
            role: MstpRole::Master,
            max_master: 31,
            max_info_frames: 1,
            n_poll: 50,
            n_retry_token: 1,
            n_min_octets: 4,

            t_no_token: 500,
            t_reply_timeout: 255,
            t_reply_delay: 250,
            t_usage_timeout: 20,
            t_slot: 10,

            mtu: DEFAULT_MTU,
        }
    }
}

impl MstpConfig {
    pub fn with_station_address(mut self, address: u8) -> Self {
        self.station_address = address;
        self
    }

    pub fn with_role(mut self, role: MstpRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_max_master(mut self, max_master: u8) -> Self {
        self.max_master = max_master;
        self
    }

    pub fn with_max_info_frames(mut self, frames: u8) -> Self {
        self.max_info_frames = frames;
        self
    }

    pub fn with_n_poll(mut self, n_poll: u8) -> Self {
        self.n_poll = n_poll;
        self
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Check the settings for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`DataLinkError::InvalidConfig`] if the station address is above
    /// `max_master`, `max_master` exceeds 127, `max_info_frames` or `n_poll`
    /// is zero, or the MTU does not fit the 16 bit length field.
    pub fn validate(&self) -> Result<()> {
        if self.max_master > MAX_MASTER_ADDRESS {
            return Err(DataLinkError::InvalidConfig(format!(
                "max_master {} exceeds {}",
                self.max_master, MAX_MASTER_ADDRESS
            )));
        }
        if self.station_address > self.max_master {
            return Err(DataLinkError::InvalidConfig(format!(
                "station address {} above max_master {}",
                self.station_address, self.max_master
            )));
        }
        if self.max_info_frames == 0 {
            return Err(DataLinkError::InvalidConfig("max_info_frames must be at least 1".into()));
        }
        if self.n_poll == 0 {
            return Err(DataLinkError::InvalidConfig("n_poll must be at least 1".into()));
        }
        if self.mtu == 0 || self.mtu > u16::MAX as usize {
            return Err(DataLinkError::InvalidConfig(format!("mtu {} out of range", self.mtu)));
        }
        Ok(())
    }
}

/// PTP link settings. All times in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PtpConfig {
    /// Send a heartbeat after this long without transmitting
    pub tx_idle_heartbeat: u32,
    /// Disconnect after this long without receiving
    pub rx_idle_disconnect: u32,
    pub conn_rxmt_time: u32,
    pub disc_rxmt_time: u32,
    pub npdu_rxmt_time: u32,
    /// Attempts for connect, disconnect and data frames
    pub rxmt_max: u8,
    /// Receive wait per engine iteration
    pub poll_interval: u32,
    pub mtu: usize,
}

impl Default for PtpConfig {
    fn default() -> Self {
        Self {
            tx_idle_heartbeat: 15_000,
            rx_idle_disconnect: 30_000,
            conn_rxmt_time: 5_000,
            disc_rxmt_time: 5_000,
            npdu_rxmt_time: 1_000,
            rxmt_max: 3,
            poll_interval: 100,
            mtu: DEFAULT_MTU,
        }
    }
}

impl PtpConfig {
    pub fn with_poll_interval(mut self, ms: u32) -> Self {
        self.poll_interval = ms;
        self
    }

    pub fn with_rxmt_max(mut self, attempts: u8) -> Self {
        self.rxmt_max = attempts;
        self
    }

    /// # Errors
    ///
    /// Returns [`DataLinkError::InvalidConfig`] for a zero retry limit or poll
    /// interval, or an MTU that does not fit the length field.
    pub fn validate(&self) -> Result<()> {
        if self.rxmt_max == 0 {
            return Err(DataLinkError::InvalidConfig("rxmt_max must be at least 1".into()));
        }
        if self.poll_interval == 0 {
            return Err(DataLinkError::InvalidConfig("poll_interval must be non-zero".into()));
        }
        if self.mtu == 0 || self.mtu > u16::MAX as usize {
            return Err(DataLinkError::InvalidConfig(format!("mtu {} out of range", self.mtu)));
        }
        Ok(())
    }
}
