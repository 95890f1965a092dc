//! Radio transport boundary.
//!
//! The radio link driver only talks to the dongle through the [Radio] and
//! [RadioProvider] traits. The `native` feature provides an implementation
//! backed by a real Crazyradio, tests provide simulated ones.

use crate::error::Result;
use std::fmt;
use std::str::FromStr;

/// Default channel used by a freshly opened dongle
pub const DEFAULT_CHANNEL: u8 = 2;
/// Default radio address
pub const DEFAULT_ADDRESS: [u8; 5] = [0xE7; 5];
/// Default auto retry count
pub const DEFAULT_ARC: u8 = 3;
/// Default auto retry delay, expressed in ack payload bytes
pub const DEFAULT_ARD_BYTES: u8 = 32;
/// Highest channel supported by the nRF24
pub const MAX_CHANNEL: u8 = 125;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataRate {
    Dr250K,
    Dr1M,
    Dr2M,
}

impl DataRate {
    pub const ALL: [DataRate; 3] = [DataRate::Dr250K, DataRate::Dr1M, DataRate::Dr2M];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataRate::Dr250K => "250K",
            DataRate::Dr1M => "1M",
            DataRate::Dr2M => "2M",
        }
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataRate {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "250K" => Ok(DataRate::Dr250K),
            "1M" => Ok(DataRate::Dr1M),
            "2M" => Ok(DataRate::Dr2M),
            _ => Err(crate::Error::InvalidUri),
        }
    }
}

/// Transmit power
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Power {
    Pm18dBm,
    Pm12dBm,
    Pm6dBm,
    P0dBm,
}

/// A dongle setting, applied one at a time
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RadioSetting {
    Channel(u8),
    DataRate(DataRate),
    Address([u8; 5]),
    /// Auto retry count
    Arc(u8),
    /// Auto retry delay, in ack payload bytes
    ArdBytes(u8),
    Power(Power),
    ContCarrier(bool),
}

impl RadioSetting {
    /// Settings applied to a freshly opened dongle
    pub fn defaults() -> Vec<RadioSetting> {
        vec![
            RadioSetting::DataRate(DataRate::Dr2M),
            RadioSetting::Channel(DEFAULT_CHANNEL),
            RadioSetting::ContCarrier(false),
            RadioSetting::Address(DEFAULT_ADDRESS),
            RadioSetting::Power(Power::P0dBm),
            RadioSetting::Arc(DEFAULT_ARC),
            RadioSetting::ArdBytes(DEFAULT_ARD_BYTES),
        ]
    }
}

/// Acknowledgement of one radio round trip
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RadioAck {
    /// The Crazyflie received the packet
    pub ack: bool,
    pub power_detector: bool,
    /// Number of retransmissions the dongle needed
    pub retry_count: u8,
    /// Ack payload, a CRTP packet when not empty
    pub payload: Vec<u8>,
}

impl RadioAck {
    /// Decode the raw USB answer of the dongle.
    ///
    /// The first byte is a status: bit 0 is the ack, bit 1 the power
    /// detector and bits 4 to 7 the retry count. A zero status means the
    /// dongle gave up, in which case it retried `arc` times.
    pub fn from_raw(raw: &[u8], arc: u8) -> RadioAck {
        let (status, payload) = match raw.split_first() {
            Some((status, payload)) => (*status, payload.to_vec()),
            None => (0, Vec::new()),
        };

        RadioAck {
            ack: status & 0x01 != 0,
            power_detector: status & 0x02 != 0,
            retry_count: if status != 0 { status >> 4 } else { arc },
            payload,
        }
    }

    /// Link quality derived from the retry count, 100 is a perfect link
    pub fn link_quality(&self) -> u8 {
        (10 - self.retry_count.min(10)) * 10
    }
}

/// One opened radio dongle
pub trait Radio: Send {
    /// Send one frame and wait for the ack.
    ///
    /// `None` means the dongle did not answer at all.
    fn send_packet(&mut self, data: &[u8]) -> Result<Option<RadioAck>>;

    /// Return the channels, in `start..=stop`, where `packet` was acked
    fn scan_channels(&mut self, start: u8, stop: u8, packet: &[u8]) -> Result<Vec<u8>>;

    fn apply_setting(&mut self, setting: RadioSetting) -> Result<()>;
}

/// Opens radio dongles
pub trait RadioProvider: Send + Sync {
    /// Open the nth dongle. The handle is released when dropped.
    fn open(&self, nth: usize) -> Result<Box<dyn Radio>>;

    /// Human readable description of every dongle attached
    fn list_dongles(&self) -> Result<Vec<String>>;
}
