// Simulated Crazyflie behind a fake radio dongle
#![allow(dead_code)]

use crazyflie_driver::{
    DataRate, Error, Packet, Radio, RadioAck, RadioProvider, RadioSetting, Result, IDLE_HEADER,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

pub const LOG_PORT: u8 = 5;
pub const PARAM_PORT: u8 = 2;

pub struct Variable {
    pub group: &'static str,
    pub name: &'static str,
    pub type_code: u8,
    pub value: Vec<u8>,
}

impl Variable {
    fn new(group: &'static str, name: &'static str, type_code: u8, value: &[u8]) -> Self {
        Variable {
            group,
            name,
            type_code,
            value: value.to_vec(),
        }
    }

    fn toc_element(&self, ident: u8) -> Vec<u8> {
        let mut data = vec![0, ident, self.type_code];
        data.extend_from_slice(self.group.as_bytes());
        data.push(0);
        data.extend_from_slice(self.name.as_bytes());
        data.push(0);
        data
    }
}

pub struct DeviceState {
    pub log_toc: Vec<Variable>,
    pub param_toc: Vec<Variable>,
    pub log_crc: u32,
    pub param_crc: u32,
    /// Every non idle packet received
    pub received: Vec<Packet>,
    /// Settings applied to the dongle, in order
    pub settings: Vec<RadioSetting>,
    /// Number of requests ignored before answering again
    pub silent_requests: usize,
    /// The dongle stops answering
    pub fail_link: bool,
    /// Packets are not acked
    pub nack: bool,
    /// The dongle is gone, every transfer fails
    pub unplugged: bool,
    pub scan_failures: usize,
    pub scan_channels: Vec<(DataRate, u8)>,
    pub opened: usize,
    pending: VecDeque<Packet>,
    blocks: HashMap<u8, Vec<u8>>,
}

impl DeviceState {
    fn toc(&self, port: u8) -> &Vec<Variable> {
        if port == LOG_PORT {
            &self.log_toc
        } else {
            &self.param_toc
        }
    }

    fn handle(&mut self, packet: Packet) {
        let (port, channel) = (packet.get_port(), packet.get_channel());
        let data = packet.get_data().clone();

        if self.silent_requests > 0 && (port == LOG_PORT || port == PARAM_PORT) {
            self.silent_requests -= 1;
            return;
        }

        match (port, channel, data.as_slice()) {
            (LOG_PORT, 0, [1]) | (PARAM_PORT, 0, [1]) => {
                let crc = if port == LOG_PORT {
                    self.log_crc
                } else {
                    self.param_crc
                };
                let mut answer = vec![1, self.toc(port).len() as u8];
                answer.extend_from_slice(&crc.to_le_bytes());
                self.answer(port, 0, answer);
            }
            (LOG_PORT, 0, [0, ident]) | (PARAM_PORT, 0, [0, ident]) => {
                if let Some(variable) = self.toc(port).get(*ident as usize) {
                    let element = variable.toc_element(*ident);
                    self.answer(port, 0, element);
                }
            }
            (LOG_PORT, 1, [0, id, variables @ ..]) => {
                let idents = variables.chunks(2).map(|v| v[1]).collect();
                self.blocks.insert(*id, idents);
                self.answer(LOG_PORT, 1, vec![0, *id, 0]);
            }
            (LOG_PORT, 1, [3, id, _period]) => {
                self.answer(LOG_PORT, 1, vec![3, *id, 0]);
                if let Some(idents) = self.blocks.get(id).cloned() {
                    let mut sample = vec![*id, 0, 0, 0];
                    for ident in idents {
                        sample.extend_from_slice(&self.log_toc[ident as usize].value);
                    }
                    self.answer(LOG_PORT, 2, sample);
                }
            }
            (LOG_PORT, 1, [command @ 2, id]) | (LOG_PORT, 1, [command @ 4, id]) => {
                if *command == 2 {
                    self.blocks.remove(id);
                }
                self.answer(LOG_PORT, 1, vec![*command, *id, 0]);
            }
            (LOG_PORT, 1, [5]) => {
                self.blocks.clear();
                self.answer(LOG_PORT, 1, vec![5, 0, 0]);
            }
            (PARAM_PORT, 1, [ident]) => {
                if let Some(variable) = self.param_toc.get(*ident as usize) {
                    let mut answer = vec![*ident];
                    answer.extend_from_slice(&variable.value);
                    self.answer(PARAM_PORT, 1, answer);
                }
            }
            (PARAM_PORT, 2, [ident, value @ ..]) => {
                if let Some(variable) = self.param_toc.get_mut(*ident as usize) {
                    variable.value = value.to_vec();
                    let mut answer = vec![*ident];
                    answer.extend_from_slice(value);
                    self.answer(PARAM_PORT, 2, answer);
                }
            }
            _ => (),
        }
    }

    fn answer(&mut self, port: u8, channel: u8, data: Vec<u8>) {
        self.pending.push_back(Packet::new(port, channel, data));
    }

    /// Requests received on `port`/`channel` starting with `prefix`
    pub fn count_received(&self, port: u8, channel: u8, prefix: &[u8]) -> usize {
        self.received
            .iter()
            .filter(|p| {
                p.get_port() == port && p.get_channel() == channel && p.get_data().starts_with(prefix)
            })
            .count()
    }
}

/// A Crazyflie with a small log and param TOC.
///
/// Log: stabilizer.roll (float, 1.0), stabilizer.pitch (float, -2.0),
/// pm.vbat (float, 3.7), motor.m1 (uint16, 1000).
/// Param: pid.kp (int32, 5), pid.ki (float, 0.5), system.id (uint8 read only, 7).
#[derive(Clone)]
pub struct FakeCrazyflie {
    state: Arc<Mutex<DeviceState>>,
}

impl FakeCrazyflie {
    pub fn new() -> Self {
        let log_toc = vec![
            Variable::new("stabilizer", "roll", 7, &1.0f32.to_le_bytes()),
            Variable::new("stabilizer", "pitch", 7, &(-2.0f32).to_le_bytes()),
            Variable::new("pm", "vbat", 7, &3.7f32.to_le_bytes()),
            Variable::new("motor", "m1", 2, &1000u16.to_le_bytes()),
        ];
        let param_toc = vec![
            Variable::new("pid", "kp", 2, &5i32.to_le_bytes()),
            Variable::new("pid", "ki", 6, &0.5f32.to_le_bytes()),
            Variable::new("system", "id", 0x18, &[7]),
        ];

        FakeCrazyflie {
            state: Arc::new(Mutex::new(DeviceState {
                log_toc,
                param_toc,
                log_crc: 0x1234_ABCD,
                param_crc: 0x0BAD_F00D,
                received: Vec::new(),
                settings: Vec::new(),
                silent_requests: 0,
                fail_link: false,
                nack: false,
                unplugged: false,
                scan_failures: 0,
                scan_channels: Vec::new(),
                opened: 0,
                pending: VecDeque::new(),
                blocks: HashMap::new(),
            })),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap()
    }

    pub fn provider(&self) -> Arc<FakeProvider> {
        Arc::new(FakeProvider {
            device: self.clone(),
            dongles: 1,
        })
    }
}

pub struct FakeProvider {
    device: FakeCrazyflie,
    pub dongles: usize,
}

impl RadioProvider for FakeProvider {
    fn open(&self, nth: usize) -> Result<Box<dyn Radio>> {
        if nth >= self.dongles {
            return Err(Error::NoDongleFound);
        }
        self.device.state().opened += 1;

        Ok(Box::new(FakeRadio {
            device: self.device.clone(),
            rate: DataRate::Dr2M,
        }))
    }

    fn list_dongles(&self) -> Result<Vec<String>> {
        Ok((0..self.dongles).map(|n| format!("Fake radio {}", n)).collect())
    }
}

pub struct FakeRadio {
    device: FakeCrazyflie,
    rate: DataRate,
}

impl Radio for FakeRadio {
    fn send_packet(&mut self, data: &[u8]) -> Result<Option<RadioAck>> {
        // Pace the polling loop like a real dongle
        thread::sleep(Duration::from_micros(200));

        let mut state = self.device.state();
        if state.unplugged {
            return Err(Error::Transport("unplugged".to_owned()));
        }
        if state.fail_link {
            return Ok(None);
        }
        if state.nack {
            return Ok(Some(RadioAck {
                ack: false,
                power_detector: false,
                retry_count: 3,
                payload: Vec::new(),
            }));
        }

        let packet = Packet::from(data.to_vec());
        if packet.get_header() != IDLE_HEADER {
            state.received.push(packet.clone());
            state.handle(packet);
        }

        Ok(Some(RadioAck {
            ack: true,
            power_detector: false,
            retry_count: 0,
            payload: state.pending.pop_front().map(Vec::from).unwrap_or_default(),
        }))
    }

    fn scan_channels(&mut self, start: u8, stop: u8, _packet: &[u8]) -> Result<Vec<u8>> {
        let mut state = self.device.state();
        if state.scan_failures > 0 {
            state.scan_failures -= 1;
            return Err(Error::Transport("scan failed".to_owned()));
        }

        Ok(state
            .scan_channels
            .iter()
            .filter(|(rate, channel)| *rate == self.rate && (start..=stop).contains(channel))
            .map(|(_, channel)| *channel)
            .collect())
    }

    fn apply_setting(&mut self, setting: RadioSetting) -> Result<()> {
        if let RadioSetting::DataRate(rate) = setting {
            self.rate = rate;
        }
        self.device.state().settings.push(setting);
        Ok(())
    }
}

/// Poll `condition` for up to 3 seconds
pub fn wait_for<F: FnMut() -> bool>(mut condition: F) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(3) {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}
