//! Console facility: text printed by the Crazyflie firmware.

use crate::PacketQueue;
use log::error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const READ_INTERVAL: Duration = Duration::from_millis(300);

struct Reader {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct Console {
    queue: PacketQueue,
    reader: Mutex<Option<Reader>>,
}

impl Console {
    pub fn new(queue: PacketQueue) -> Self {
        Console {
            queue,
            reader: Mutex::new(None),
        }
    }

    /// Hand every queued console packet payload to `f`, does not block
    pub fn read<F: FnMut(&[u8])>(&self, mut f: F) {
        while let Some(packet) = self.queue.try_pop() {
            f(packet.get_data());
        }
    }

    /// Read the console in the background until [Console::stop_reading]
    pub fn start_reading<F>(&self, mut f: F)
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.stop_reading();

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let queue = self.queue.clone();

        let spawned = thread::Builder::new()
            .name("crazyflie-console".to_owned())
            .spawn(move || {
                while !thread_stop.load(Ordering::Relaxed) {
                    while let Some(packet) = queue.try_pop() {
                        f(packet.get_data());
                    }
                    thread::sleep(READ_INTERVAL);
                }
            });

        match spawned {
            Ok(handle) => {
                *self.reader.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(Reader { stop, handle })
            }
            Err(e) => error!("Cannot start the console reader: {}", e),
        }
    }

    pub fn stop_reading(&self) {
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

    pub fn is_reading(&self) -> bool {
        self.reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.stop_reading();
    }
}
