//! CRTP ports, channels and commands shared by the facilities.

use crate::Packet;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Port of each facility
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Port {
    Console = 0x00,
    Param = 0x02,
    Commander = 0x03,
    Logging = 0x05,
    DebugDriver = 0x0E,
    LinkCtrl = 0x0F,
    All = 0xFF,
}

impl Port {
    pub const ALL_PORTS: [Port; 7] = [
        Port::Console,
        Port::Param,
        Port::Commander,
        Port::Logging,
        Port::DebugDriver,
        Port::LinkCtrl,
        Port::All,
    ];

    pub fn number(self) -> u8 {
        self.into()
    }
}

/// Channel used by the TOC protocol on the log and param ports
pub const TOC_CHANNEL: u8 = 0;
pub const LOG_SETTINGS_CHANNEL: u8 = 1;
pub const LOG_DATA_CHANNEL: u8 = 2;
pub const PARAM_READ_CHANNEL: u8 = 1;
pub const PARAM_WRITE_CHANNEL: u8 = 2;

pub const CMD_TOC_ELEMENT: u8 = 0;
pub const CMD_TOC_INFO: u8 = 1;

pub const CMD_CREATE_BLOCK: u8 = 0;
pub const CMD_APPEND_BLOCK: u8 = 1;
pub const CMD_DELETE_BLOCK: u8 = 2;
pub const CMD_START_LOGGING: u8 = 3;
pub const CMD_STOP_LOGGING: u8 = 4;
pub const CMD_RESET_LOGGING: u8 = 5;

/// Something able to send packets to the Crazyflie.
///
/// Facilities only see the session through this trait.
pub trait PacketSender: Send + Sync {
    /// Send `packet`. With `expect_answer` the packet is sent again until
    /// something comes back on its port.
    fn send_packet(&self, packet: Packet, expect_answer: bool);
}
