//! Param facility: read and write the Crazyflie parameters by name.
//!
//! Requests are synchronous: the param queue is cleared, the request sent and
//! the answer awaited with a timeout. A missing answer gives up the operation
//! without failing the session.

use crate::crtp::{PacketSender, Port, PARAM_READ_CHANNEL, PARAM_WRITE_CHANNEL};
use crate::toc::{Toc, DEFAULT_TIMEOUT};
use crate::toc_cache::TocCache;
use crate::value::{ParamType, Value, ValueType};
use crate::{Error, Packet, PacketQueue, Result};
use log::{debug, error, warn};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, Weak};
use std::time::Duration;

pub struct Param {
    sender: Weak<dyn PacketSender>,
    queue: PacketQueue,
    toc: RwLock<Toc<ParamType>>,
    timeout: Duration,
}

impl Param {
    pub fn new(sender: Weak<dyn PacketSender>, queue: PacketQueue, cache: TocCache) -> Self {
        Param {
            sender,
            queue,
            toc: RwLock::new(Toc::new(cache)),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Time to wait for each answer, for TOC and values alike
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.toc
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .set_timeout(timeout);
        self
    }

    pub fn toc(&self) -> RwLockReadGuard<'_, Toc<ParamType>> {
        self.toc.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn refresh_toc(&self) -> Result<()> {
        let sender = self.sender.upgrade().ok_or(Error::NotConnected)?;
        self.toc
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fetch_from_device(&*sender, Port::Param, &self.queue)
    }

    /// Write a parameter, returns the answer of the Crazyflie.
    ///
    /// `None` when the parameter is unknown or the Crazyflie did not answer.
    pub fn set_value<V: Into<Value>>(&self, name: &str, value: V) -> Option<Packet> {
        let value = value.into();
        let response = self.write(name, value)?;
        debug!("Got answer to setting param '{}' with '{}'", name, value);
        Some(response)
    }

    /// Write a parameter and hand the answer to `callback`
    pub fn set_value_with<V, F>(&self, name: &str, value: V, callback: F)
    where
        V: Into<Value>,
        F: FnOnce(&Packet),
    {
        match self.write(name, value.into()) {
            Some(response) => callback(&response),
            None => debug!("No answer to setting param '{}'", name),
        }
    }

    fn write(&self, name: &str, value: Value) -> Option<Packet> {
        let (ident, value_type) = match self.element(name) {
            Some(element) => element,
            None => {
                warn!("Param {} not in TOC!", name);
                return None;
            }
        };

        let mut data = vec![ident];
        data.extend(value_type.directive().encode(value));

        self.queue.clear();
        self.send(Packet::new(Port::Param.number(), PARAM_WRITE_CHANNEL, data));
        self.wait_for_response()
    }

    /// Read a parameter from the Crazyflie.
    ///
    /// Answers for other parameters are discarded until the right one
    /// arrives or the wait times out.
    pub fn get_value(&self, name: &str) -> Option<Value> {
        let (ident, value_type) = match self.element(name) {
            Some(element) => element,
            None => {
                warn!("Cannot update {}, not in TOC", name);
                return None;
            }
        };

        self.queue.clear();
        self.send(Packet::new(
            Port::Param.number(),
            PARAM_READ_CHANNEL,
            vec![ident],
        ));

        loop {
            let response = self.wait_for_response()?;
            let data = response.get_data();

            match data.first() {
                Some(&answer) if answer == ident => {
                    let value = value_type.directive().decode_bytes(&data[1..]);
                    if value.is_none() {
                        warn!("Param {}: answer too short {:?}", name, data);
                    }
                    return value;
                }
                Some(answer) => warn!(
                    "Value expected for element with ID {} but got for element with ID {}",
                    ident, answer
                ),
                None => warn!("Empty answer for param {}", name),
            }
        }
    }

    /// Read a parameter and hand it to `callback`
    pub fn get_value_with<F: FnOnce(Value)>(&self, name: &str, callback: F) {
        if let Some(value) = self.get_value(name) {
            callback(value);
        }
    }

    /// Next packet of the param queue, `None` after the timeout
    pub fn wait_for_response(&self) -> Option<Packet> {
        let response = self.queue.pop_timeout(self.timeout);
        if response.is_none() {
            error!("Timeout waiting for a param answer");
        }
        response
    }

    fn element(&self, name: &str) -> Option<(u8, ParamType)> {
        self.toc()
            .lookup(name)
            .map(|element| (element.ident, element.value_type))
    }

    fn send(&self, packet: Packet) {
        match self.sender.upgrade() {
            Some(sender) => sender.send_packet(packet, true),
            None => debug!("Crazyflie gone, dropping {}", packet),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toc::{Access, TocElement};
    use log::{LevelFilter, Metadata, Record};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct Capture(Mutex<Vec<String>>);

    impl log::Log for Capture {
        fn enabled(&self, _metadata: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            self.0.lock().unwrap().push(record.args().to_string());
        }

        fn flush(&self) {}
    }

    static LOGS: Capture = Capture(Mutex::new(Vec::new()));

    fn captured_logs() -> &'static Capture {
        let _ = log::set_logger(&LOGS);
        log::set_max_level(LevelFilter::Debug);
        &LOGS
    }

    /// Answers each request with the next scripted packet
    struct Device {
        queue: PacketQueue,
        answers: Mutex<VecDeque<Vec<Vec<u8>>>>,
        sent: Mutex<Vec<Packet>>,
    }

    impl Device {
        fn new(queue: &PacketQueue, answers: Vec<Vec<Vec<u8>>>) -> Arc<Self> {
            Arc::new(Device {
                queue: queue.clone(),
                answers: Mutex::new(answers.into_iter().collect()),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    impl PacketSender for Device {
        fn send_packet(&self, packet: Packet, expect_answer: bool) {
            assert!(expect_answer);
            let channel = packet.get_channel();
            self.sent.lock().unwrap().push(packet);
            if let Some(answers) = self.answers.lock().unwrap().pop_front() {
                for answer in answers {
                    self.queue.push(Packet::new(2, channel, answer));
                }
            }
        }
    }

    fn param(device: &Arc<Device>, queue: &PacketQueue) -> Param {
        let sender: Weak<Device> = Arc::downgrade(device);
        let param = Param::new(sender, queue.clone(), TocCache::disabled())
            .with_timeout(Duration::from_millis(50));
        {
            let mut toc = param.toc.write().unwrap();
            toc.insert(TocElement {
                ident: 3,
                group: "pid".to_owned(),
                name: "kp".to_owned(),
                value_type: ParamType::Int32,
                access: Access::empty(),
            });
            toc.insert(TocElement {
                ident: 4,
                group: "pid".to_owned(),
                name: "ratio".to_owned(),
                value_type: ParamType::Double,
                access: Access::empty(),
            });
        }
        param
    }

    #[test]
    fn read_a_value() {
        let queue = PacketQueue::new();
        let device = Device::new(&queue, vec![vec![vec![3, 5, 0, 0, 0]]]);
        let param = param(&device, &queue);

        assert_eq!(param.get_value("pid.kp"), Some(Value::I32(5)));

        let sent = device.sent.lock().unwrap();
        assert_eq!(sent[0].get_port(), Port::Param.number());
        assert_eq!(sent[0].get_channel(), PARAM_READ_CHANNEL);
        assert_eq!(*sent[0].get_data(), vec![3]);
    }

    #[test]
    fn stale_answers_are_skipped() {
        let queue = PacketQueue::new();
        let device = Device::new(&queue, vec![vec![vec![9, 1, 0, 0, 0], vec![3, 7, 0, 0, 0]]]);
        let param = param(&device, &queue);

        assert_eq!(param.get_value("kp"), Some(Value::I32(7)));
    }

    #[test]
    fn stale_packets_are_cleared_before_a_request() {
        let queue = PacketQueue::new();
        queue.push(Packet::new(2, PARAM_READ_CHANNEL, vec![3, 1, 0, 0, 0]));
        let device = Device::new(&queue, vec![vec![vec![3, 2, 0, 0, 0]]]);
        let param = param(&device, &queue);

        assert_eq!(param.get_value("kp"), Some(Value::I32(2)));
    }

    #[test]
    fn unknown_param_or_silence_give_nothing() {
        let queue = PacketQueue::new();
        let device = Device::new(&queue, vec![]);
        let param = param(&device, &queue);

        assert_eq!(param.get_value("pid.missing"), None);
        assert!(device.sent.lock().unwrap().is_empty());
        assert_eq!(param.get_value("kp"), None);
        assert_eq!(param.set_value("kp", 3), None);
    }

    #[test]
    fn write_encodes_with_the_param_type() {
        let queue = PacketQueue::new();
        let device = Device::new(&queue, vec![vec![vec![4]]]);
        let param = param(&device, &queue);

        let answered = Arc::new(Mutex::new(false));
        let a = answered.clone();
        param.set_value_with("pid.ratio", 1.5f32, move |_| *a.lock().unwrap() = true);
        assert!(*answered.lock().unwrap());

        let sent = device.sent.lock().unwrap();
        let mut expected = vec![4];
        expected.extend_from_slice(&1.5f64.to_be_bytes());
        assert_eq!(sent[0].get_channel(), PARAM_WRITE_CHANNEL);
        assert_eq!(*sent[0].get_data(), expected);
    }

    #[test]
    fn callback_receives_the_value() {
        let queue = PacketQueue::new();
        let device = Device::new(&queue, vec![vec![vec![3, 0xFF, 0xFF, 0xFF, 0xFF]]]);
        let param = param(&device, &queue);

        let mut value = None;
        param.get_value_with("kp", |v| value = Some(v));
        assert_eq!(value, Some(Value::I32(-1)));
    }

    #[test]
    fn successful_write_is_logged() {
        let logs = captured_logs();
        let queue = PacketQueue::new();
        let device = Device::new(&queue, vec![vec![vec![3, 8, 0, 0, 0]]]);
        let param = param(&device, &queue);

        assert!(param.set_value("pid.kp", 8).is_some());
        assert!(logs
            .0
            .lock()
            .unwrap()
            .iter()
            .any(|line| line == "Got answer to setting param 'pid.kp' with '8'"));
    }
}
