// Crazyradio USB dongle backend
use crate::crazyradio::{Ack, Ard, Channel, Crazyradio, Datarate};
use crate::error::{Error, Result};
use crate::radio::{DataRate, Power, Radio, RadioAck, RadioProvider, RadioSetting};
use log::debug;

/// Opens real Crazyradio dongles through USB
#[derive(Clone, Copy, Debug, Default)]
pub struct CrazyradioProvider;

impl RadioProvider for CrazyradioProvider {
    fn open(&self, nth: usize) -> Result<Box<dyn Radio>> {
        let radio = Crazyradio::open_nth(nth).map_err(|e| {
            debug!("Cannot open Crazyradio #{}: {:?}", nth, e);
            Error::NoDongleFound
        })?;

        let mut radio = CrazyradioDongle { radio, arc: 0 };
        for setting in RadioSetting::defaults() {
            radio.apply_setting(setting)?;
        }

        Ok(Box::new(radio))
    }

    fn list_dongles(&self) -> Result<Vec<String>> {
        Ok(Crazyradio::list_serials()?
            .into_iter()
            .map(|serial| format!("Crazyradio {}", serial))
            .collect())
    }
}

struct CrazyradioDongle {
    radio: Crazyradio,
    arc: u8,
}

impl Radio for CrazyradioDongle {
    fn send_packet(&mut self, data: &[u8]) -> Result<Option<RadioAck>> {
        let mut ack_data = [0u8; 32];
        let ack: Ack = self.radio.send_packet(data, &mut ack_data)?;
        let length = ack.length.min(ack_data.len());

        Ok(Some(RadioAck {
            ack: ack.received,
            power_detector: ack.power_detector,
            retry_count: if ack.received { ack.retry as u8 } else { self.arc },
            payload: ack_data[..length].to_vec(),
        }))
    }

    fn scan_channels(&mut self, start: u8, stop: u8, packet: &[u8]) -> Result<Vec<u8>> {
        let channels = self.radio.scan_channels(
            Channel::from_number(start)?,
            Channel::from_number(stop)?,
            packet,
        )?;

        Ok(channels.into_iter().map(|channel| channel.into()).collect())
    }

    fn apply_setting(&mut self, setting: RadioSetting) -> Result<()> {
        match setting {
            RadioSetting::Channel(channel) => {
                self.radio.set_channel(Channel::from_number(channel)?)?
            }
            RadioSetting::DataRate(rate) => self.radio.set_datarate(match rate {
                DataRate::Dr250K => Datarate::Dr250K,
                DataRate::Dr1M => Datarate::Dr1M,
                DataRate::Dr2M => Datarate::Dr2M,
            })?,
            RadioSetting::Address(address) => self.radio.set_address(&address)?,
            RadioSetting::Arc(arc) => {
                self.arc = arc;
                self.radio.set_arc(arc as usize)?
            }
            RadioSetting::ArdBytes(bytes) => self.radio.set_ard(Ard::Bytes(bytes))?,
            RadioSetting::Power(power) => self.radio.set_power(match power {
                Power::Pm18dBm => crate::crazyradio::Power::Pm18dBm,
                Power::Pm12dBm => crate::crazyradio::Power::Pm12dBm,
                Power::Pm6dBm => crate::crazyradio::Power::Pm6dBm,
                Power::P0dBm => crate::crazyradio::Power::P0dBm,
            })?,
            RadioSetting::ContCarrier(enable) => self.radio.set_cont_carrier(enable)?,
        }
        Ok(())
    }
}
