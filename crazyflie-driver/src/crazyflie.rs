//! Crazyflie session: one radio link plus the facilities talking over it.

use crate::callbacks::{Callbacks, LinkEvent};
use crate::commander::{setpoint_packet, Commander};
use crate::console::Console;
use crate::crtp::{PacketSender, Port};
use crate::log::Log;
use crate::param::Param;
use crate::radio::RadioProvider;
use crate::radio_driver::{LinkCallbacks, LinkOptions, RadioDriver};
use crate::toc::DEFAULT_TIMEOUT;
use crate::toc_cache::TocCache;
use crate::{Error, Packet, PacketQueue, Result};
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const RECEIVE_POLL: Duration = Duration::from_millis(100);
const CLOSE_DELAY: Duration = Duration::from_millis(200);

#[derive(Clone, Debug)]
pub struct CrazyflieOptions {
    /// Folder of the TOC cache, no cache when `None`
    pub cache_folder: Option<PathBuf>,
    pub link: LinkOptions,
    /// Packets expecting an answer are sent again after this long without one
    pub retry_interval: Duration,
    /// Time given to the link to fail before the TOCs are fetched
    pub setup_delay: Duration,
    /// Time to wait for an answer to a TOC or param request
    pub response_timeout: Duration,
}

impl Default for CrazyflieOptions {
    fn default() -> Self {
        CrazyflieOptions {
            cache_folder: None,
            link: LinkOptions::default(),
            retry_interval: Duration::from_millis(200),
            setup_delay: Duration::from_millis(100),
            response_timeout: DEFAULT_TIMEOUT,
        }
    }
}

struct RetryEntry {
    packet: Packet,
    timestamp: Instant,
}

struct Loops {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

struct Core {
    me: Weak<Core>,
    provider: Arc<dyn RadioProvider>,
    options: CrazyflieOptions,
    callbacks: Callbacks,
    queues: HashMap<u8, PacketQueue>,
    retries: Mutex<HashMap<u8, RetryEntry>>,
    link: Mutex<Option<Arc<RadioDriver>>>,
    uri: Mutex<Option<String>>,
    loops: Mutex<Option<Loops>>,
    log: Log,
    param: Param,
    commander: Commander,
    console: Console,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PacketSender for Core {
    fn send_packet(&self, packet: Packet, expect_answer: bool) {
        let link = match lock(&self.link).clone() {
            Some(link) => link,
            None => return,
        };

        if expect_answer {
            lock(&self.retries).insert(
                packet.get_port(),
                RetryEntry {
                    packet: packet.clone(),
                    timestamp: Instant::now(),
                },
            );
        }
        link.send_packet(packet);
    }
}

impl Core {
    fn new(provider: Arc<dyn RadioProvider>, options: CrazyflieOptions, cache: TocCache) -> Arc<Core> {
        Arc::new_cyclic(|me: &Weak<Core>| {
            let queues: HashMap<u8, PacketQueue> = Port::ALL_PORTS
                .iter()
                .map(|port| (port.number(), PacketQueue::new()))
                .collect();
            let queue = |port: Port| queues[&port.number()].clone();
            let sender: Weak<dyn PacketSender> = me.clone();

            let log = Log::new(sender.clone(), queue(Port::Logging), cache.clone())
                .with_timeout(options.response_timeout);
            let param = Param::new(sender.clone(), queue(Port::Param), cache)
                .with_timeout(options.response_timeout);
            let commander = Commander::new(sender);
            let console = Console::new(queue(Port::Console));

            Core {
                me: me.clone(),
                provider,
                options,
                callbacks: Callbacks::default(),
                queues,
                retries: Mutex::new(HashMap::new()),
                link: Mutex::new(None),
                uri: Mutex::new(None),
                loops: Mutex::new(None),
                log,
                param,
                commander,
                console,
            }
        })
    }

    fn register_default_callbacks(&self) {
        let me = self.me.clone();
        self.callbacks
            .received_packet
            .register("delete_timer", move |packet: &Packet| {
                if let Some(core) = me.upgrade() {
                    lock(&core.retries).remove(&packet.get_port());
                }
            });

        self.callbacks
            .disconnected
            .register("log", |uri: &str| info!("Disconnected from {}", uri));
        self.callbacks
            .connection_failed
            .register("log", |reason: &str| warn!("Connection failed: {}", reason));
        self.callbacks
            .connection_initiated
            .register("log", |uri: &str| info!("Connection initiated to {}", uri));
        self.callbacks
            .connection_setup_finished
            .register("log", |uri: &str| info!("TOCs extracted from {}", uri));

        let me = self.me.clone();
        self.callbacks
            .link
            .register("link_event", move |event: &LinkEvent| match event {
                LinkEvent::Quality(quality) => trace!("Link quality {}", quality),
                LinkEvent::Error(message) => {
                    warn!("Link error: {}", message);
                    if let Some(core) = me.upgrade() {
                        core.close_link();
                    }
                }
            });
    }

    fn is_connected(&self) -> bool {
        lock(&self.link)
            .as_ref()
            .map_or(false, |link| link.is_connected())
    }

    fn open_link(&self, uri: &str) -> Result<()> {
        if lock(&self.link).is_some() {
            return Err(Error::LinkAlreadyOpen);
        }

        self.callbacks.connection_initiated.call(uri);

        let result = self.connect(uri).and_then(|()| self.setup_connection(uri));
        if let Err(e) = &result {
            self.callbacks.connection_failed.call(&e.to_string());
            self.close_link();
        }
        result
    }

    fn connect(&self, uri: &str) -> Result<()> {
        let driver = Arc::new(RadioDriver::new(
            self.provider.clone(),
            self.options.link.clone(),
        ));

        let on_quality = self.me.clone();
        let on_error = self.me.clone();
        let callbacks = LinkCallbacks::new()
            .on_link_quality(move |quality| {
                if let Some(core) = on_quality.upgrade() {
                    core.callbacks.link.call(&LinkEvent::Quality(quality));
                }
            })
            .on_link_error(move |message| {
                if let Some(core) = on_error.upgrade() {
                    core.callbacks.link.call(&LinkEvent::Error(message.to_owned()));
                }
            });

        *lock(&self.uri) = Some(uri.to_owned());
        *lock(&self.link) = Some(driver.clone());
        driver.connect(uri, callbacks)?;

        let me = self.me.clone();
        self.callbacks
            .received_packet
            .register("connected", move |_packet: &Packet| {
                info!("Connected!");
                if let Some(core) = me.upgrade() {
                    core.callbacks.received_packet.remove("connected");
                }
            });

        self.start_loops(driver)
    }

    fn setup_connection(&self, uri: &str) -> Result<()> {
        // Let an early link failure surface
        thread::sleep(self.options.setup_delay);
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        self.log.refresh_toc()?;
        self.param.refresh_toc()?;

        self.callbacks.connection_setup_finished.call(uri);
        Ok(())
    }

    fn start_loops(&self, driver: Arc<RadioDriver>) -> Result<()> {
        let stop = Arc::new(AtomicBool::new(false));

        let receive_stop = stop.clone();
        let me = self.me.clone();
        let receive = thread::Builder::new()
            .name("crazyflie-receive".to_owned())
            .spawn(move || {
                while !receive_stop.load(Ordering::Relaxed) {
                    if let Some(packet) = driver.receive_packet_timeout(RECEIVE_POLL) {
                        match me.upgrade() {
                            Some(core) => core.dispatch(packet),
                            None => break,
                        }
                    }
                }
            })?;

        let retry_stop = stop.clone();
        let me = self.me.clone();
        let interval = self.options.retry_interval;
        let retry = thread::Builder::new()
            .name("crazyflie-retry".to_owned())
            .spawn(move || {
                while !retry_stop.load(Ordering::Relaxed) {
                    thread::sleep(interval);
                    match me.upgrade() {
                        Some(core) => core.resend_stale(),
                        None => break,
                    }
                }
            })?;

        *lock(&self.loops) = Some(Loops {
            stop,
            handles: vec![receive, retry],
        });
        Ok(())
    }

    fn stop_loops(&self) {
        if let Some(loops) = lock(&self.loops).take() {
            loops.stop.store(true, Ordering::Relaxed);
            for handle in loops.handles {
                // A callback may close the link from one of the loops
                if handle.thread().id() != thread::current().id() {
                    let _ = handle.join();
                }
            }
        }
    }

    /// Run the received packet callbacks then queue the packet by port
    fn dispatch(&self, packet: Packet) {
        self.callbacks.received_packet.call(&packet);

        match self.queues.get(&packet.get_port()) {
            Some(queue) => queue.push(packet),
            None => warn!("No queue for packet on port {}", packet.get_port()),
        }
    }

    fn resend_stale(&self) {
        let interval = self.options.retry_interval;
        let stale: Vec<Packet> = lock(&self.retries)
            .values()
            .filter(|entry| entry.timestamp.elapsed() >= interval)
            .map(|entry| entry.packet.clone())
            .collect();

        for packet in stale {
            debug!("No answer on port {}, resending", packet.get_port());
            self.send_packet(packet, true);
        }
    }

    fn close_link(&self) {
        let link = match lock(&self.link).take() {
            Some(link) => link,
            None => return,
        };

        // Best effort, a saturated link would only fail again
        if link.is_connected() && link.pending() < self.options.link.out_queue_max_size {
            link.send_packet(setpoint_packet(0.0, 0.0, 0.0, 0));
            thread::sleep(CLOSE_DELAY);
        }
        link.disconnect(false);

        self.stop_loops();
        self.log.stop_packet_reader();
        for queue in self.queues.values() {
            queue.clear();
        }
        lock(&self.retries).clear();
        self.callbacks.received_packet.remove("connected");

        let uri = lock(&self.uri).take().unwrap_or_default();
        self.callbacks.disconnected.call(&uri);
    }
}

/// A Crazyflie reached through a radio link.
///
/// Dropping the session closes its link.
pub struct Crazyflie {
    core: Arc<Core>,
}

impl Crazyflie {
    /// Session using the Crazyradio dongles attached to this computer
    #[cfg(feature = "native")]
    pub fn new(options: CrazyflieOptions) -> Self {
        Crazyflie::with_provider(Arc::new(crate::CrazyradioProvider), options)
    }

    pub fn with_provider(provider: Arc<dyn RadioProvider>, options: CrazyflieOptions) -> Self {
        let cache = TocCache::from_folder(options.cache_folder.as_ref());
        Crazyflie::with_cache(provider, options, cache)
    }

    /// Session with a custom TOC cache, `options.cache_folder` is ignored
    pub fn with_cache(
        provider: Arc<dyn RadioProvider>,
        options: CrazyflieOptions,
        cache: TocCache,
    ) -> Self {
        let core = Core::new(provider, options, cache);
        core.register_default_callbacks();
        Crazyflie { core }
    }

    /// Connect to `uri` and fetch the log and param TOCs.
    ///
    /// On failure the `connection_failed` callbacks are called and the link
    /// is closed before the error is returned.
    pub fn open_link(&self, uri: &str) -> Result<()> {
        self.core.open_link(uri)
    }

    /// Stop the Crazyflie and close the link, does nothing without a link
    pub fn close_link(&self) {
        self.core.close_link();
    }

    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    /// URI of the open link
    pub fn uri(&self) -> Option<String> {
        if self.is_connected() {
            lock(&self.core.uri).clone()
        } else {
            None
        }
    }

    /// Send a packet, does nothing without a link.
    ///
    /// With `expect_answer` the packet is sent again every retry interval
    /// until a packet arrives on the same port.
    pub fn send_packet(&self, packet: Packet, expect_answer: bool) {
        self.core.send_packet(packet, expect_answer);
    }

    pub fn callbacks(&self) -> &Callbacks {
        &self.core.callbacks
    }

    /// Queue of the packets received on `port`
    pub fn queue(&self, port: Port) -> Option<&PacketQueue> {
        self.core.queues.get(&port.number())
    }

    pub fn log(&self) -> &Log {
        &self.core.log
    }

    pub fn param(&self) -> &Param {
        &self.core.param
    }

    pub fn commander(&self) -> &Commander {
        &self.core.commander
    }

    pub fn console(&self) -> &Console {
        &self.core.console
    }

    pub fn options(&self) -> &CrazyflieOptions {
        &self.core.options
    }
}

impl Drop for Crazyflie {
    fn drop(&mut self) {
        self.core.close_link();
        self.core.console.stop_reading();
    }
}
