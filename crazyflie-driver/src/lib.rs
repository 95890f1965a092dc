#![allow(clippy::single_component_path_imports)]

//! # Crazyflie Driver
//!
//! This Crate implements a host side driver for the Crazyflie: the radio link
//! through a Crazyradio dongle, the CRTP packet dispatching and the log,
//! param, commander and console facilities.
//!
//! The entry point is the [Crazyflie] session. It opens a [RadioDriver] link,
//! routes incoming packets to one queue per CRTP port and fetches the log and
//! param TOCs when connecting.
//!
//! The radio is reached through the [RadioProvider] trait. The `native`
//! feature provides [CrazyradioProvider], talking to real dongles over USB.
//!
//! Example:
//!
//! ``` no_run
//! # #[cfg(feature = "native")]
//! # fn test() -> crazyflie_driver::Result<()> {
//! use crazyflie_driver::{Crazyflie, CrazyflieOptions};
//!
//! let cf = Crazyflie::new(CrazyflieOptions::default());
//! cf.open_link("radio://0/80/250K")?;
//!
//! if let Some(value) = cf.param().get_value("pid_attitude.roll_kp") {
//!     println!("roll_kp = {}", value);
//! }
//!
//! cf.close_link();
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate bitflags;

mod callbacks;
pub mod commander;
pub mod console;
mod crazyflie;
pub mod crtp;
mod error;
pub mod log;
mod packet;
pub mod param;
mod queue;
pub mod radio;
mod radio_driver;
pub mod toc;
pub mod toc_cache;
pub mod value;

#[cfg(feature = "native")]
mod crazyradio_radio;

#[cfg(feature = "native")]
pub(crate) use crazyradio;

pub use callbacks::{Callback, CallbackGroup, Callbacks, LinkEvent};
pub use crazyflie::{Crazyflie, CrazyflieOptions};
#[cfg(feature = "native")]
pub use crazyradio_radio::CrazyradioProvider;
pub use crtp::{PacketSender, Port};
pub use error::{Error, Result};
pub use packet::{Packet, IDLE_HEADER, MAX_PAYLOAD_SIZE};
pub use queue::PacketQueue;
pub use radio::{DataRate, Radio, RadioAck, RadioProvider, RadioSetting};
pub use radio_driver::{
    LinkCallbacks, LinkOptions, LinkStatus, RadioDriver, RadioUri, OUT_QUEUE_MAX_SIZE,
    RETRIES_BEFORE_DISCONNECT,
};
pub use value::{LogType, ParamType, Value};
