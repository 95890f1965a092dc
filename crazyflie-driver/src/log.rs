//! Log facility: blocks of variables streamed by the Crazyflie.
//!
//! A block is created with a [LogConfig], then started with a callback that
//! receives every sample as a `name -> value` map. Samples are read by a
//! background thread while logging is active.

use crate::crtp::{
    PacketSender, Port, CMD_APPEND_BLOCK, CMD_CREATE_BLOCK, CMD_DELETE_BLOCK,
    CMD_RESET_LOGGING, CMD_START_LOGGING, CMD_STOP_LOGGING, LOG_DATA_CHANNEL,
    LOG_SETTINGS_CHANNEL, TOC_CHANNEL,
};
use crate::packet::MAX_PAYLOAD_SIZE;
use crate::toc::Toc;
use crate::toc_cache::TocCache;
use crate::value::{LogType, Value, ValueType};
use crate::{Error, Packet, PacketQueue, Result};
use log::{debug, error, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default period, in 10ms units
pub const DEFAULT_PERIOD: u8 = 10;

const READER_POLL: Duration = Duration::from_millis(100);
const TOC_REQUEUE_BACKOFF: Duration = Duration::from_millis(100);

pub type LogDataCallback = Arc<dyn Fn(&HashMap<String, Value>) + Send + Sync>;

/// Pack stored and fetch type codes in one byte, stored in the high nibble
pub fn pack_stored_fetch(stored: u8, fetch: u8) -> u8 {
    (stored << 4) | (fetch & 0x0F)
}

pub fn unpack_stored_fetch(byte: u8) -> (u8, u8) {
    (byte >> 4, byte & 0x0F)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VariableLocation {
    /// Variable known by name in the log TOC
    Toc,
    /// Raw memory address in the Crazyflie
    Memory(u32),
}

#[derive(Clone, Debug, PartialEq)]
pub struct LogVariable {
    pub name: String,
    pub location: VariableLocation,
    /// Type of the variable in the Crazyflie
    pub stored_as: LogType,
    /// Type the variable is sent as
    pub fetch_as: LogType,
}

impl LogVariable {
    /// TOC variable fetched as `fetch_as`
    pub fn toc(name: &str, fetch_as: LogType) -> Self {
        LogVariable {
            name: name.to_owned(),
            location: VariableLocation::Toc,
            stored_as: fetch_as,
            fetch_as,
        }
    }

    pub fn memory(name: &str, address: u32, stored_as: LogType, fetch_as: LogType) -> Self {
        LogVariable {
            name: name.to_owned(),
            location: VariableLocation::Memory(address),
            stored_as,
            fetch_as,
        }
    }

    pub fn is_toc_variable(&self) -> bool {
        self.location == VariableLocation::Toc
    }

    pub fn stored_fetch_as(&self) -> u8 {
        pack_stored_fetch(self.stored_as.code(), self.fetch_as.code())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LogConfig {
    pub variables: Vec<LogVariable>,
    /// In 10ms units
    pub period: u8,
}

impl LogConfig {
    pub fn new(variables: Vec<LogVariable>) -> Self {
        LogConfig {
            variables,
            period: DEFAULT_PERIOD,
        }
    }

    pub fn with_period(mut self, period: u8) -> Self {
        self.period = period;
        self
    }
}

pub struct LogBlock {
    id: u32,
    variables: Vec<LogVariable>,
    period: u8,
    callback: Mutex<Option<LogDataCallback>>,
}

impl LogBlock {
    fn new(id: u32, config: &LogConfig) -> Self {
        LogBlock {
            id,
            variables: config.variables.clone(),
            period: config.period,
            callback: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Id of the block in the Crazyflie protocol, the low byte of [LogBlock::id]
    pub fn wire_id(&self) -> u8 {
        self.id as u8
    }

    pub fn period(&self) -> u8 {
        self.period
    }

    pub fn variables(&self) -> &[LogVariable] {
        &self.variables
    }

    pub fn set_callback(&self, callback: LogDataCallback) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// Decode one sample, variables are read in the order of the block.
    ///
    /// Returns `None` when the data is too short.
    pub fn unpack_samples(&self, data: &[u8]) -> Option<HashMap<String, Value>> {
        let mut cursor = data;
        let mut samples = HashMap::with_capacity(self.variables.len());

        for variable in &self.variables {
            let value = variable.fetch_as.directive().decode(&mut cursor).ok()?;
            samples.insert(variable.name.clone(), value);
        }

        Some(samples)
    }

    /// Decode one sample and hand it to the callback
    pub fn decode_samples(&self, data: &[u8]) {
        let samples = match self.unpack_samples(data) {
            Some(samples) => samples,
            None => {
                warn!("Log block {}: sample too short ({} bytes)", self.id, data.len());
                return;
            }
        };

        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(&samples);
        }
    }
}

type Blocks = Arc<Mutex<HashMap<u32, Arc<LogBlock>>>>;

fn lock_blocks(blocks: &Blocks) -> MutexGuard<'_, HashMap<u32, Arc<LogBlock>>> {
    blocks.lock().unwrap_or_else(PoisonError::into_inner)
}

fn find_block(blocks: &Blocks, wire_id: u8) -> Option<Arc<LogBlock>> {
    lock_blocks(blocks)
        .values()
        .find(|block| block.wire_id() == wire_id)
        .cloned()
}

fn handle_settings_packet(blocks: &Blocks, packet: &Packet) {
    let data = packet.get_data();
    if data.len() < 3 {
        warn!("Log settings packet too short: {:?}", data);
        return;
    }
    let (command, block_id, status) = (data[0], data[1], data[2]);

    match command {
        CMD_CREATE_BLOCK => {
            if find_block(blocks, block_id).is_none() {
                error!("No log entry for {}", block_id);
            } else if status != 0 {
                error!("Error creating block {}: {:x}", block_id, status);
            } else {
                debug!("Log block {} created", block_id);
            }
        }
        CMD_APPEND_BLOCK => debug!("Received log settings with APPEND_LOG"),
        CMD_DELETE_BLOCK => debug!("Received log settings with DELETE_LOG"),
        CMD_START_LOGGING => {
            if status != 0 {
                error!("Error starting to log {}: {:x}", block_id, status);
            } else {
                debug!("Logging started for {}", block_id);
            }
        }
        CMD_STOP_LOGGING => debug!("Received log settings with STOP_LOGGING"),
        CMD_RESET_LOGGING => debug!("Received log settings with RESET_LOGGING"),
        _ => warn!("Received log settings with {}. Dont know what to do", command),
    }
}

fn handle_logdata_packet(blocks: &Blocks, packet: &Packet) {
    // [block id, 3 bytes timestamp, samples]
    let data = packet.get_data();
    if data.len() < 4 {
        warn!("Log data packet too short: {:?}", data);
        return;
    }

    match find_block(blocks, data[0]) {
        Some(block) => block.decode_samples(&data[4..]),
        None => error!("No entry for logdata for block {}", data[0]),
    }
}

struct PacketReader {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct Log {
    sender: Weak<dyn PacketSender>,
    queue: PacketQueue,
    toc: RwLock<Toc<LogType>>,
    blocks: Blocks,
    reader: Mutex<Option<PacketReader>>,
    next_block_id: AtomicU32,
}

impl Log {
    pub fn new(sender: Weak<dyn PacketSender>, queue: PacketQueue, cache: TocCache) -> Self {
        Log {
            sender,
            queue,
            toc: RwLock::new(Toc::new(cache)),
            blocks: Arc::new(Mutex::new(HashMap::new())),
            reader: Mutex::new(None),
            next_block_id: AtomicU32::new(0),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.toc
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .set_timeout(timeout);
        self
    }

    pub fn toc(&self) -> RwLockReadGuard<'_, Toc<LogType>> {
        self.toc.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset logging in the Crazyflie and download its log TOC.
    ///
    /// The packet reader runs during the download so that log traffic is
    /// still handled.
    pub fn refresh_toc(&self) -> Result<()> {
        let sender = self.sender.upgrade().ok_or(Error::NotConnected)?;

        self.start_packet_reader();
        sender.send_packet(self.settings_packet(vec![CMD_RESET_LOGGING]), false);

        let result = self
            .toc
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fetch_from_device(&*sender, Port::Logging, &self.queue);

        self.stop_packet_reader();
        result
    }

    /// Register a new block in the Crazyflie, returns its id.
    ///
    /// Does not wait for the Crazyflie to confirm the creation.
    pub fn create_log_block(&self, config: &LogConfig) -> Result<u32> {
        let mut variables = Vec::with_capacity(config.variables.len() * 5);
        {
            let toc = self.toc();
            for variable in &config.variables {
                variables.push(variable.stored_fetch_as());
                match variable.location {
                    VariableLocation::Toc => {
                        let element = toc
                            .lookup(&variable.name)
                            .ok_or_else(|| Error::VariableNotFound(variable.name.clone()))?;
                        variables.push(element.ident);
                    }
                    VariableLocation::Memory(address) => {
                        variables.extend_from_slice(&address.to_le_bytes())
                    }
                }
            }
        }

        let size = variables.len() + 2;
        if size > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge(size));
        }

        let block = Arc::new(LogBlock::new(
            self.next_block_id.fetch_add(1, Ordering::Relaxed),
            config,
        ));
        let mut data = vec![CMD_CREATE_BLOCK, block.wire_id()];
        data.append(&mut variables);

        debug!("Adding block {}", block.id());
        {
            let mut blocks = lock_blocks(&self.blocks);
            // Ids wrap on the wire, the newest block owns its wire id
            let reused: Vec<u32> = blocks
                .values()
                .filter(|other| other.wire_id() == block.wire_id())
                .map(|other| other.id())
                .collect();
            for id in reused {
                warn!(
                    "Log block {} replaced by block {} on wire id {}",
                    id,
                    block.id(),
                    block.wire_id()
                );
                blocks.remove(&id);
            }
            blocks.insert(block.id(), block.clone());
        }
        self.start_packet_reader();
        self.send(self.settings_packet(data));

        Ok(block.id())
    }

    /// Start streaming block `id` to `callback`, no-op for an unknown block
    pub fn start_logging<F>(&self, id: u32, callback: F)
    where
        F: Fn(&HashMap<String, Value>) + Send + Sync + 'static,
    {
        let block = match self.block(id) {
            Some(block) => block,
            None => {
                debug!("Cannot start logging, no block {}", id);
                return;
            }
        };

        block.set_callback(Arc::new(callback));
        self.start_packet_reader();

        debug!(
            "Start logging on {} every {} ms",
            id,
            block.period() as u32 * 10
        );
        self.send(self.settings_packet(vec![
            CMD_START_LOGGING,
            block.wire_id(),
            block.period(),
        ]));
    }

    pub fn stop_logging(&self, id: u32) {
        if let Some(block) = self.block(id) {
            debug!("Stop logging on {}", id);
            self.send(self.settings_packet(vec![CMD_STOP_LOGGING, block.wire_id()]));
        }
    }

    pub fn delete_block(&self, id: u32) {
        let block = lock_blocks(&self.blocks).remove(&id);
        if let Some(block) = block {
            self.send(self.settings_packet(vec![CMD_DELETE_BLOCK, block.wire_id()]));
        }
    }

    pub fn block(&self, id: u32) -> Option<Arc<LogBlock>> {
        lock_blocks(&self.blocks).get(&id).cloned()
    }

    pub fn block_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = lock_blocks(&self.blocks).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn handle_settings_packet(&self, packet: &Packet) {
        handle_settings_packet(&self.blocks, packet);
    }

    pub fn handle_logdata_packet(&self, packet: &Packet) {
        handle_logdata_packet(&self.blocks, packet);
    }

    pub fn is_reading(&self) -> bool {
        self.reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Start the packet reader thread if it is not running
    fn start_packet_reader(&self) {
        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        if reader.is_some() {
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let queue = self.queue.clone();
        let blocks = self.blocks.clone();

        let spawned = thread::Builder::new()
            .name("crazyflie-log".to_owned())
            .spawn(move || {
                while !thread_stop.load(Ordering::Relaxed) {
                    let packet = match queue.pop_timeout(READER_POLL) {
                        Some(packet) => packet,
                        None => continue,
                    };

                    match packet.get_channel() {
                        LOG_SETTINGS_CHANNEL => handle_settings_packet(&blocks, &packet),
                        LOG_DATA_CHANNEL => handle_logdata_packet(&blocks, &packet),
                        TOC_CHANNEL => {
                            // Belongs to a TOC download
                            queue.push(packet);
                            thread::sleep(TOC_REQUEUE_BACKOFF);
                        }
                        channel => debug!("Log on channel {}. Cannot handle", channel),
                    }
                }
            });

        match spawned {
            Ok(handle) => *reader = Some(PacketReader { stop, handle }),
            Err(e) => error!("Cannot start the log packet reader: {}", e),
        }
    }

    pub fn stop_packet_reader(&self) {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(reader) = reader {
            reader.stop.store(true, Ordering::Relaxed);
            if reader.handle.thread().id() != thread::current().id() {
                let _ = reader.handle.join();
            }
        }
    }

    fn settings_packet(&self, data: Vec<u8>) -> Packet {
        Packet::new(Port::Logging.number(), LOG_SETTINGS_CHANNEL, data)
    }

    fn send(&self, packet: Packet) {
        match self.sender.upgrade() {
            Some(sender) => sender.send_packet(packet, false),
            None => debug!("Crazyflie gone, dropping {}", packet),
        }
    }
}

impl Drop for Log {
    fn drop(&mut self) {
        self.stop_packet_reader();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crtp::CMD_TOC_ELEMENT;
    use crate::toc::{Access, TocElement};
    use std::time::Instant;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Packet>>,
    }

    impl PacketSender for Recorder {
        fn send_packet(&self, packet: Packet, _expect_answer: bool) {
            self.sent.lock().unwrap().push(packet);
        }
    }

    impl Recorder {
        fn last(&self) -> Packet {
            self.sent.lock().unwrap().last().cloned().unwrap()
        }
    }

    fn log_with_toc(recorder: &Arc<Recorder>) -> (Log, PacketQueue) {
        let sender: Weak<Recorder> = Arc::downgrade(recorder);
        let queue = PacketQueue::new();
        let log = Log::new(sender, queue.clone(), TocCache::disabled());
        {
            let mut toc = log.toc.write().unwrap();
            for (ident, name) in ["roll", "pitch", "yaw"].iter().enumerate() {
                toc.insert(TocElement {
                    ident: ident as u8 + 10,
                    group: "stabilizer".to_owned(),
                    name: name.to_string(),
                    value_type: LogType::Float,
                    access: Access::empty(),
                });
            }
        }
        (log, queue)
    }

    fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(2) {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn stored_fetch_packing() {
        for stored in 0..16 {
            for fetch in 0..16 {
                assert_eq!(
                    unpack_stored_fetch(pack_stored_fetch(stored, fetch)),
                    (stored, fetch)
                );
            }
        }
        let variable = LogVariable::memory("m", 0x2000_0000, LogType::Uint16, LogType::Uint8);
        assert_eq!(variable.stored_fetch_as(), 0x21);
    }

    #[test]
    fn decode_sample_of_mixed_sizes() {
        let config = LogConfig::new(vec![
            LogVariable::toc("a", LogType::Uint8),
            LogVariable::toc("b", LogType::Int16),
            LogVariable::toc("c", LogType::Float),
        ]);
        let block = LogBlock::new(0, &config);

        let mut data = vec![200, 0xFE, 0xFF];
        data.extend_from_slice(&1.5f32.to_le_bytes());
        assert_eq!(data.len(), 7);

        let samples = block.unpack_samples(&data).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples["a"], Value::U8(200));
        assert_eq!(samples["b"], Value::I16(-2));
        assert_eq!(samples["c"], Value::F32(1.5));

        assert!(block.unpack_samples(&data[..6]).is_none());
    }

    #[test]
    fn create_block_packet() {
        let recorder = Arc::new(Recorder::default());
        let (log, _queue) = log_with_toc(&recorder);

        let config = LogConfig::new(vec![
            LogVariable::toc("stabilizer.pitch", LogType::Float),
            LogVariable::memory("raw", 0x1234_5678, LogType::Uint32, LogType::Uint16),
        ]);
        let id = log.create_log_block(&config).unwrap();
        let second = log.create_log_block(&config).unwrap();
        assert_ne!(id, second);

        let packet = recorder.sent.lock().unwrap()[0].clone();
        assert_eq!(packet.get_port(), Port::Logging.number());
        assert_eq!(packet.get_channel(), LOG_SETTINGS_CHANNEL);
        assert_eq!(
            *packet.get_data(),
            vec![CMD_CREATE_BLOCK, id as u8, 0x77, 11, 0x32, 0x78, 0x56, 0x34, 0x12]
        );
        assert_eq!(log.block_ids(), vec![id, second]);
    }

    #[test]
    fn create_block_validates_variables() {
        let recorder = Arc::new(Recorder::default());
        let (log, _queue) = log_with_toc(&recorder);

        let unknown = LogConfig::new(vec![LogVariable::toc("nope", LogType::Float)]);
        assert!(matches!(
            log.create_log_block(&unknown),
            Err(Error::VariableNotFound(name)) if name == "nope"
        ));

        let too_many = LogConfig::new(
            (0..6)
                .map(|i| LogVariable::memory(&i.to_string(), i, LogType::Uint8, LogType::Uint8))
                .collect(),
        );
        assert!(matches!(
            log.create_log_block(&too_many),
            Err(Error::PayloadTooLarge(32))
        ));
        assert!(recorder.sent.lock().unwrap().is_empty());
        assert!(log.block_ids().is_empty());
    }

    #[test]
    fn unknown_blocks_are_ignored() {
        let recorder = Arc::new(Recorder::default());
        let (log, _queue) = log_with_toc(&recorder);

        log.start_logging(42, |_| ());
        log.stop_logging(42);
        log.delete_block(42);
        assert!(recorder.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn start_stop_and_delete() {
        let recorder = Arc::new(Recorder::default());
        let (log, _queue) = log_with_toc(&recorder);

        let id = log
            .create_log_block(&LogConfig::new(vec![LogVariable::toc("yaw", LogType::Float)]).with_period(5))
            .unwrap();

        log.start_logging(id, |_| ());
        assert_eq!(*recorder.last().get_data(), vec![CMD_START_LOGGING, id as u8, 5]);

        log.stop_logging(id);
        assert_eq!(*recorder.last().get_data(), vec![CMD_STOP_LOGGING, id as u8]);

        log.delete_block(id);
        assert_eq!(*recorder.last().get_data(), vec![CMD_DELETE_BLOCK, id as u8]);
        assert!(log.block(id).is_none());
    }

    #[test]
    fn reader_hands_samples_to_the_callback() {
        let recorder = Arc::new(Recorder::default());
        let (log, queue) = log_with_toc(&recorder);

        let id = log
            .create_log_block(&LogConfig::new(vec![
                LogVariable::toc("roll", LogType::Float),
                LogVariable::toc("pitch", LogType::Float),
            ]))
            .unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let r = received.clone();
        log.start_logging(id, move |samples| r.lock().unwrap().push(samples.clone()));

        queue.push(Packet::new(5, LOG_SETTINGS_CHANNEL, vec![CMD_CREATE_BLOCK, id as u8, 0]));
        let mut data = vec![id as u8, 1, 2, 3];
        data.extend_from_slice(&0.5f32.to_le_bytes());
        data.extend_from_slice(&(-0.25f32).to_le_bytes());
        queue.push(Packet::new(5, LOG_DATA_CHANNEL, data));

        assert!(wait_for(|| !received.lock().unwrap().is_empty()));
        let samples = received.lock().unwrap()[0].clone();
        assert_eq!(samples["roll"], Value::F32(0.5));
        assert_eq!(samples["pitch"], Value::F32(-0.25));

        log.stop_packet_reader();
        assert!(!log.is_reading());
    }

    #[test]
    fn reader_leaves_toc_packets_in_the_queue() {
        let recorder = Arc::new(Recorder::default());
        let (log, queue) = log_with_toc(&recorder);
        log.start_packet_reader();

        queue.push(Packet::new(5, TOC_CHANNEL, vec![CMD_TOC_ELEMENT, 0]));
        thread::sleep(Duration::from_millis(50));
        log.stop_packet_reader();

        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn wrapped_wire_id_goes_to_the_newest_block() {
        let recorder = Arc::new(Recorder::default());
        let (log, _queue) = log_with_toc(&recorder);
        let config = LogConfig::new(vec![LogVariable::toc("roll", LogType::Float)]);

        let first = log.create_log_block(&config).unwrap();
        for _ in 0..255 {
            log.create_log_block(&config).unwrap();
        }
        let wrapped = log.create_log_block(&config).unwrap();
        assert_eq!(wrapped, first + 256);

        let block = log.block(wrapped).unwrap();
        assert_eq!(block.wire_id(), first as u8);
        assert!(log.block(first).is_none());
        assert_eq!(log.block_ids().len(), 256);

        let received = Arc::new(Mutex::new(0));
        let r = received.clone();
        log.start_logging(wrapped, move |_| *r.lock().unwrap() += 1);

        let mut data = vec![first as u8, 0, 0, 0];
        data.extend_from_slice(&1.0f32.to_le_bytes());
        log.handle_logdata_packet(&Packet::new(5, LOG_DATA_CHANNEL, data));
        assert_eq!(*received.lock().unwrap(), 1);
    }
}
