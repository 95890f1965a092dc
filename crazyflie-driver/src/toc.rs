//! Table Of Content of the log and param facilities.
//!
//! The Crazyflie enumerates its variables with sequential ids. A TOC is
//! fetched once per connection, unless its checksum is found in the
//! [TocCache].

use crate::crtp::{PacketSender, Port, CMD_TOC_ELEMENT, CMD_TOC_INFO, TOC_CHANNEL};
use crate::toc_cache::TocCache;
use crate::value::ValueType;
use crate::{Error, Packet, PacketQueue, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEUE_BACKOFF: Duration = Duration::from_millis(100);
const MAX_CONSECUTIVE_TIMEOUTS: u32 = 2;

bitflags! {
    /// Access flags of a TOC element, as sent in the type byte
    pub struct Access: u8 {
        const READ_ONLY = 0x10;
    }
}

impl Serialize for Access {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

impl<'de> Deserialize<'de> for Access {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(Access::from_bits_truncate(u8::deserialize(deserializer)?))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TocElement<T> {
    pub ident: u8,
    pub group: String,
    pub name: String,
    pub value_type: T,
    pub access: Access,
}

impl<T: ValueType> TocElement<T> {
    /// Decode the payload of a TOC element response
    ///
    /// Layout: `[CMD_TOC_ELEMENT, ident, type | access, group\0, name\0]`
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 5 || data[0] != CMD_TOC_ELEMENT {
            return Err(Error::MalformedTocElement);
        }

        let ident = data[1];
        let value_type = T::from_code(data[2] & 0x0F).ok_or(Error::MalformedTocElement)?;
        let access = Access::from_bits_truncate(data[2]);

        let strings = &data[3..];
        let group_end = strings
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::MalformedTocElement)?;
        let name_len = strings[group_end + 1..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::MalformedTocElement)?;
        let name = &strings[group_end + 1..group_end + 1 + name_len];

        Ok(TocElement {
            ident,
            group: String::from_utf8_lossy(&strings[..group_end]).into_owned(),
            name: String::from_utf8_lossy(name).into_owned(),
            value_type,
            access,
        })
    }

    /// `group.name`
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.group, self.name)
    }

    pub fn is_read_only(&self) -> bool {
        self.access.contains(Access::READ_ONLY)
    }
}

/// group name -> element name -> element
pub type TocMap<T> = BTreeMap<String, BTreeMap<String, TocElement<T>>>;

#[derive(Clone)]
pub struct Toc<T> {
    toc: TocMap<T>,
    cache: TocCache,
    timeout: Duration,
}

impl<T: ValueType> Toc<T> {
    pub fn new(cache: TocCache) -> Self {
        Toc {
            toc: BTreeMap::new(),
            cache,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Time to wait for each answer of the Crazyflie
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.set_timeout(timeout);
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Find an element by `group.name`, or by bare `name` in which case the
    /// first group having it wins.
    pub fn lookup(&self, name: &str) -> Option<&TocElement<T>> {
        match name.split_once('.') {
            Some((group, name)) => self.toc.get(group)?.get(name),
            None => self.toc.values().find_map(|group| group.get(name)),
        }
    }

    pub fn lookup_by_id(&self, ident: u8) -> Option<&TocElement<T>> {
        self.elements().find(|element| element.ident == ident)
    }

    pub fn insert(&mut self, element: TocElement<T>) {
        self.toc
            .entry(element.group.clone())
            .or_insert_with(BTreeMap::new)
            .insert(element.name.clone(), element);
    }

    pub fn elements(&self) -> impl Iterator<Item = &TocElement<T>> {
        self.toc.values().flat_map(|group| group.values())
    }

    pub fn len(&self) -> usize {
        self.toc.values().map(|group| group.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn map(&self) -> &TocMap<T> {
        &self.toc
    }

    pub fn clear(&mut self) {
        self.toc.clear();
    }

    pub fn export_to_cache(&self, crc: &str) {
        self.cache.insert(crc, &self.toc);
    }

    /// Replace the TOC with the cached one, returns `false` on a miss
    pub fn import_from_cache(&mut self, crc: &str) -> bool {
        match self.cache.fetch(crc) {
            Some(toc) => {
                self.toc = toc;
                true
            }
            None => false,
        }
    }

    /// Download the TOC of `port`, answers are read from `queue`.
    ///
    /// Only a timeout is fatal. Packets of other channels are put back in the
    /// queue. Elements arriving ahead of time are kept until their turn and
    /// stale ones are dropped. One request is sent per answer received.
    pub fn fetch_from_device(
        &mut self,
        sender: &dyn PacketSender,
        port: Port,
        queue: &PacketQueue,
    ) -> Result<()> {
        let (count, crc) = self.fetch_info(sender, port, queue)?;
        let crc = format!("{:x}", crc);
        info!("{:?} TOC crc {}, {} items", port, crc, count);

        if self.import_from_cache(&crc) {
            debug!("{:?} TOC found in cache", port);
            return Ok(());
        }
        debug!("{:?} TOC not in cache", port);

        self.toc.clear();
        let mut index = 0;
        let mut timeouts = 0;
        // Elements answered before their turn
        let mut ahead: BTreeMap<u8, TocElement<T>> = BTreeMap::new();

        while index < count {
            if let Some(element) = ahead.remove(&index) {
                debug!("{:?} TOC: added {}", port, element.full_name());
                self.insert(element);
                index += 1;
                continue;
            }

            sender.send_packet(
                Packet::new(port.number(), TOC_CHANNEL, vec![CMD_TOC_ELEMENT, index]),
                true,
            );

            let response = match queue.pop_timeout(self.timeout) {
                Some(response) => response,
                None => {
                    timeouts += 1;
                    warn!("{:?} TOC: no answer for element {}", port, index);
                    if timeouts >= MAX_CONSECUTIVE_TIMEOUTS {
                        return Err(Error::Timeout);
                    }
                    continue;
                }
            };
            timeouts = 0;

            if response.get_channel() != TOC_CHANNEL {
                warn!("Got a non-TOC packet. Requeueing...");
                queue.push(response);
                thread::sleep(REQUEUE_BACKOFF);
                continue;
            }

            let element = match TocElement::<T>::decode(response.get_data()) {
                Ok(element) => element,
                Err(_) => {
                    warn!("{:?} TOC: dropping malformed element", port);
                    continue;
                }
            };

            if element.ident != index {
                debug!(
                    "{:?} TOC: expected {}, but got {}",
                    port, index, element.ident
                );
                if element.ident > index && element.ident < count {
                    ahead.insert(element.ident, element);
                }
                continue;
            }

            debug!("{:?} TOC: added {}", port, element.full_name());
            self.insert(element);
            index += 1;
        }

        self.export_to_cache(&crc);
        Ok(())
    }

    fn fetch_info(
        &self,
        sender: &dyn PacketSender,
        port: Port,
        queue: &PacketQueue,
    ) -> Result<(u8, u32)> {
        queue.clear();
        sender.send_packet(
            Packet::new(port.number(), TOC_CHANNEL, vec![CMD_TOC_INFO]),
            true,
        );

        let mut timeouts = 0;
        loop {
            let response = match queue.pop_timeout(self.timeout) {
                Some(response) => response,
                None => {
                    timeouts += 1;
                    warn!("{:?} TOC: no answer to the info request", port);
                    if timeouts >= MAX_CONSECUTIVE_TIMEOUTS {
                        return Err(Error::Timeout);
                    }
                    continue;
                }
            };
            timeouts = 0;

            if response.get_channel() != TOC_CHANNEL {
                warn!("Got a non-TOC packet. Requeueing...");
                queue.push(response);
                thread::sleep(REQUEUE_BACKOFF);
                continue;
            }

            let data = response.get_data();
            if data.len() < 6 || data[0] != CMD_TOC_INFO {
                debug!("{:?} TOC: dropping stale answer {:?}", port, data);
                continue;
            }

            return Ok((data[1], LittleEndian::read_u32(&data[2..6])));
        }
    }
}
