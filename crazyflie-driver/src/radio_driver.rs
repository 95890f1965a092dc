// Radio link handling code
use crate::error::{Error, Result};
use crate::radio::{DataRate, Radio, RadioProvider, RadioSetting, MAX_CHANNEL};
use crate::{Packet, PacketQueue};
use hex::FromHex;
use log::{debug, error, info, warn};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use url::Url;

const EMPTY_PACKET_BEFORE_RELAX: u32 = 10;
const RELAX_TIME: Duration = Duration::from_millis(10);
const SCAN_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Default size limit of the outgoing queue
pub const OUT_QUEUE_MAX_SIZE: usize = 50;
/// Default number of consecutive lost packets before giving up the link
pub const RETRIES_BEFORE_DISCONNECT: u32 = 10;

/// Describe the current link status
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    /// The URI and callbacks are being validated, the dongle configured
    Connecting,
    /// The communication thread is running
    Connected,
    /// The communication thread is being stopped
    Disconnecting,
    /// No link. The string contains the human-readable reason
    Disconnected(String),
}

/// Options of a radio link
#[derive(Clone, Debug)]
pub struct LinkOptions {
    /// Consecutive unacknowledged packets tolerated before the link is declared lost
    pub retries_before_disconnect: u32,
    /// Outgoing packets queued above this size are a link error
    pub out_queue_max_size: usize,
}

impl Default for LinkOptions {
    fn default() -> Self {
        LinkOptions {
            retries_before_disconnect: RETRIES_BEFORE_DISCONNECT,
            out_queue_max_size: OUT_QUEUE_MAX_SIZE,
        }
    }
}

pub type LinkQualityCallback = Arc<dyn Fn(u8) + Send + Sync>;
pub type LinkErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callbacks a link must be given. Both are mandatory.
#[derive(Clone, Default)]
pub struct LinkCallbacks {
    pub link_quality: Option<LinkQualityCallback>,
    pub link_error: Option<LinkErrorCallback>,
}

impl LinkCallbacks {
    pub fn new() -> Self {
        LinkCallbacks::default()
    }

    pub fn on_link_quality<F: Fn(u8) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.link_quality = Some(Arc::new(f));
        self
    }

    pub fn on_link_error<F: Fn(&str) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.link_error = Some(Arc::new(f));
        self
    }
}

/// Parsed `radio://<dongle>/<channel>/<rate>[/<address>]` URI
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RadioUri {
    pub dongle: usize,
    pub channel: u8,
    pub rate: DataRate,
    /// Address given as a decimal number in the URI
    pub address: Option<[u8; 5]>,
    uri: String,
}

impl FromStr for RadioUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let uri = Url::parse(s)?;

        if uri.scheme() != "radio" {
            return Err(Error::InvalidUri);
        }

        let dongle: usize = uri.host_str().ok_or(Error::InvalidUri)?.parse()?;

        let mut path: Vec<&str> = uri.path_segments().ok_or(Error::InvalidUri)?.collect();
        if path.last() == Some(&"") {
            path.pop();
        }
        if path.len() != 2 && path.len() != 3 {
            return Err(Error::InvalidUri);
        }

        let channel: u8 = path[0].parse()?;
        if channel > MAX_CHANNEL {
            return Err(Error::InvalidUri);
        }
        let rate: DataRate = path[1].parse()?;

        let address = match path.get(2) {
            Some(addr_str) => {
                // The address is a decimal number packed as 5 bytes
                let addr: u64 = addr_str.parse()?;
                Some(<[u8; 5]>::from_hex(format!("{:010x}", addr))?)
            }
            None => None,
        };

        Ok(RadioUri {
            dongle,
            channel,
            rate,
            address,
            uri: s.to_owned(),
        })
    }
}

impl fmt::Display for RadioUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

struct ActiveLink {
    uri: RadioUri,
    callbacks: LinkCallbacks,
    thread: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    kill: Arc<AtomicBool>,
}

/// Radio link driver.
///
/// Owns the outgoing and incoming packet queues and, while connected, a
/// thread continuously polling the Crazyflie through the dongle: the radio
/// is half duplex, the Crazyflie can only answer in the ack of a packet we
/// send, so the thread sends idle packets when there is nothing to send.
pub struct RadioDriver {
    provider: Arc<dyn RadioProvider>,
    options: LinkOptions,
    link: Mutex<Option<ActiveLink>>,
    status: Arc<Mutex<LinkStatus>>,
    uplink: PacketQueue,
    downlink: PacketQueue,
}

impl RadioDriver {
    pub fn new(provider: Arc<dyn RadioProvider>, options: LinkOptions) -> Self {
        RadioDriver {
            provider,
            options,
            link: Mutex::new(None),
            status: Arc::new(Mutex::new(LinkStatus::Disconnected(
                "Never connected".to_owned(),
            ))),
            uplink: PacketQueue::new(),
            downlink: PacketQueue::new(),
        }
    }

    /// Driver using the Crazyradio dongles attached to this computer
    #[cfg(feature = "native")]
    pub fn native(options: LinkOptions) -> Self {
        RadioDriver::new(Arc::new(crate::CrazyradioProvider), options)
    }

    /// Open a link to `uri` and start the communication thread
    pub fn connect(&self, uri: &str, callbacks: LinkCallbacks) -> Result<()> {
        let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(active) = link.as_ref() {
            warn!("Active link to {}. Disconnect first", active.uri);
            return Err(Error::LinkAlreadyOpen);
        }

        update_status(&self.status, LinkStatus::Connecting);
        let result = self.open_link(uri, callbacks);
        match result {
            Ok(active) => {
                *link = Some(active);
                Ok(())
            }
            Err(e) => {
                update_status(&self.status, LinkStatus::Disconnected(e.to_string()));
                Err(e)
            }
        }
    }

    fn open_link(&self, uri: &str, callbacks: LinkCallbacks) -> Result<ActiveLink> {
        let uri: RadioUri = uri.parse()?;

        let link_quality = callbacks
            .link_quality
            .clone()
            .ok_or(Error::MissingCallback("link_quality"))?;
        let link_error = callbacks
            .link_error
            .clone()
            .ok_or(Error::MissingCallback("link_error"))?;

        let mut radio = self.provider.open(uri.dongle)?;
        radio.apply_setting(RadioSetting::Channel(uri.channel))?;
        radio.apply_setting(RadioSetting::DataRate(uri.rate))?;
        if let Some(address) = uri.address {
            radio.apply_setting(RadioSetting::Address(address))?;
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let kill = Arc::new(AtomicBool::new(false));

        let radio_thread = RadioThread {
            radio,
            status: self.status.clone(),
            uplink: self.uplink.clone(),
            downlink: self.downlink.clone(),
            retries_before_disconnect: self.options.retries_before_disconnect,
            link_quality,
            link_error,
            shutdown: shutdown.clone(),
            kill: kill.clone(),
        };

        info!("Connecting to {} ...", uri);
        update_status(&self.status, LinkStatus::Connected);
        let thread = thread::Builder::new()
            .name("crazyflie-radio".to_owned())
            .spawn(move || radio_thread.run())?;

        Ok(ActiveLink {
            uri,
            callbacks,
            thread: Some(thread),
            shutdown,
            kill,
        })
    }

    /// Close the link.
    ///
    /// With `force` the communication thread is abandoned right away,
    /// otherwise it first sends everything left in the outgoing queue. Both
    /// queues are then emptied. Disconnecting a closed link does nothing.
    pub fn disconnect(&self, force: bool) {
        let active = self.link.lock().unwrap_or_else(PoisonError::into_inner).take();

        if let Some(mut active) = active {
            update_status(&self.status, LinkStatus::Disconnecting);
            if let Some(handle) = active.thread.take() {
                if force {
                    active.kill.store(true, Relaxed);
                } else {
                    active.shutdown.store(true, Relaxed);
                    // The link error callback may disconnect from the thread itself
                    if handle.thread().id() != thread::current().id() {
                        let _ = handle.join();
                    }
                }
            }
            info!("Disconnected from {}", active.uri);
            update_status(
                &self.status,
                LinkStatus::Disconnected("Connection closed".to_owned()),
            );
        }

        self.uplink.clear();
        self.downlink.clear();
    }

    /// Queue a packet for the Crazyflie. Does nothing when not connected.
    ///
    /// A full outgoing queue means the link cannot keep up: the link is
    /// closed right away then the link error callback is called.
    pub fn send_packet(&self, packet: Packet) {
        let link_error = match self
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(active) => active.callbacks.link_error.clone(),
            None => return,
        };

        let queued = self.uplink.len();
        if queued >= self.options.out_queue_max_size {
            let message = format!("Reached {} elements in outgoing queue", queued);
            error!("{}", message);
            self.disconnect(true);
            if let Some(link_error) = link_error {
                link_error(&message);
            }
            return;
        }

        self.uplink.push(packet);
    }

    /// Fetch a packet received from the Crazyflie.
    ///
    /// Without `block`, returns `None` right away when nothing is queued.
    pub fn receive_packet(&self, block: bool) -> Option<Packet> {
        if block {
            Some(self.downlink.pop())
        } else {
            self.downlink.try_pop()
        }
    }

    /// Fetch a packet received from the Crazyflie, waiting at most `timeout`
    pub fn receive_packet_timeout(&self, timeout: Duration) -> Option<Packet> {
        self.downlink.pop_timeout(timeout)
    }

    pub fn is_connected(&self) -> bool {
        self.link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn uri(&self) -> Option<RadioUri> {
        self.link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|active| active.uri.clone())
    }

    pub fn status(&self) -> LinkStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of packets waiting to be sent
    pub fn pending(&self) -> usize {
        self.uplink.len()
    }

    /// Describe the dongles attached
    pub fn dongles(&self) -> Result<Vec<String>> {
        self.provider.list_dongles()
    }

    /// Scan every channel at every data rate for Crazyflies.
    ///
    /// Returns the URIs where a Crazyflie answered. A failing scan is tried
    /// once more before giving up with an empty list.
    pub fn scan_interface(&self) -> Result<Vec<String>> {
        if self.is_connected() {
            return Err(Error::LinkAlreadyOpen);
        }

        // The radio handle is released when dropped, whatever the outcome
        let mut radio = self.provider.open(0)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match scan_radio(radio.as_mut()) {
                Ok(found) => return Ok(found),
                Err(e) => {
                    error!("Error scanning interface: {}", e);
                    if attempt >= 2 {
                        return Ok(Vec::new());
                    }
                    error!("Retrying");
                    thread::sleep(SCAN_RETRY_DELAY);
                }
            }
        }
    }
}

impl Drop for RadioDriver {
    fn drop(&mut self) {
        self.disconnect(true);
    }
}

fn scan_radio(radio: &mut dyn Radio) -> Result<Vec<String>> {
    // A single retry is enough to detect a Crazyflie and makes scanning fast
    radio.apply_setting(RadioSetting::Arc(1))?;

    let mut found = Vec::new();
    for rate in DataRate::ALL.iter() {
        radio.apply_setting(RadioSetting::DataRate(*rate))?;
        for channel in radio.scan_channels(0, MAX_CHANNEL, &[0xFF])? {
            found.push(format!("radio://0/{}/{}", channel, rate));
        }
    }

    Ok(found)
}

fn update_status(status: &Mutex<LinkStatus>, new_status: LinkStatus) {
    debug!("New status: {:?}", &new_status);
    *status.lock().unwrap_or_else(PoisonError::into_inner) = new_status;
}

struct RadioThread {
    radio: Box<dyn Radio>,
    status: Arc<Mutex<LinkStatus>>,
    uplink: PacketQueue,
    downlink: PacketQueue,
    retries_before_disconnect: u32,
    link_quality: LinkQualityCallback,
    link_error: LinkErrorCallback,
    shutdown: Arc<AtomicBool>,
    kill: Arc<AtomicBool>,
}

impl RadioThread {
    fn run(mut self) {
        let result = self.communication_loop();

        // Release the dongle before anybody gets told about the failure
        let RadioThread {
            radio,
            status,
            link_error,
            shutdown,
            kill,
            ..
        } = self;
        drop(radio);

        match result {
            Ok(()) => debug!("Leaving radio communication loop"),
            // Dying while being disconnected is not a link error
            Err(reason) if shutdown.load(Relaxed) || kill.load(Relaxed) => {
                debug!("Radio link lost while disconnecting: {}", reason)
            }
            Err(reason) => {
                warn!("Radio link lost: {}", reason);
                update_status(&status, LinkStatus::Disconnected(reason.clone()));
                link_error(&reason);
            }
        }
    }

    /// Returns `Err` with a reason when the link is lost, `Ok` when asked to stop
    fn communication_loop(&mut self) -> std::result::Result<(), String> {
        let mut out_packet = Packet::idle();
        let mut retries = self.retries_before_disconnect;
        let mut n_empty_packets = 0;

        loop {
            if self.kill.load(Relaxed) {
                return Ok(());
            }

            let data: Vec<u8> = out_packet.clone().into();
            let ack = self.radio.send_packet(&data);

            // A forced disconnect abandons whatever the dongle answered
            if self.kill.load(Relaxed) {
                return Ok(());
            }

            let ack = match ack {
                Ok(Some(ack)) => ack,
                Ok(None) => return Err("Dongle communication error (no ack)".to_owned()),
                Err(e) => return Err(format!("Error talking to Crazyradio: {}", e)),
            };

            (self.link_quality)(ack.link_quality());

            if !ack.ack {
                debug!("Lost packet!");
                retries = retries.saturating_sub(1);
                if retries == 0 {
                    return Err("Too many packets lost".to_owned());
                }
                // Resend the same packet
                continue;
            }
            retries = self.retries_before_disconnect;

            if !ack.payload.is_empty() {
                self.downlink.push(Packet::from(ack.payload));
                n_empty_packets = 0;
            }

            if self.shutdown.load(Relaxed) && self.uplink.is_empty() {
                debug!("Disconnect requested, leaving connection loop.");
                return Ok(());
            }

            out_packet = match self.uplink.try_pop() {
                Some(packet) => {
                    n_empty_packets = 0;
                    packet
                }
                None => {
                    // Relax polling when neither side has had anything to say for a while
                    n_empty_packets += 1;
                    if n_empty_packets >= EMPTY_PACKET_BEFORE_RELAX {
                        thread::sleep(RELAX_TIME);
                    }
                    Packet::idle()
                }
            };
        }
    }
}
