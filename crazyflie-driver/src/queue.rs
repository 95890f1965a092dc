use crate::Packet;
use std::time::Duration;

/// Thread-safe FIFO of packets.
///
/// Clones share the same underlying channel, any number of threads can push
/// and pop concurrently. The queue keeps both ends of its channel alive so
/// pushing never fails.
#[derive(Clone, Debug)]
pub struct PacketQueue {
    sender: flume::Sender<Packet>,
    receiver: flume::Receiver<Packet>,
}

impl Default for PacketQueue {
    fn default() -> Self {
        PacketQueue::new()
    }
}

impl PacketQueue {
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        PacketQueue { sender, receiver }
    }

    pub fn push(&self, packet: Packet) {
        // Cannot fail, we own a receiver
        let _ = self.sender.send(packet);
    }

    /// Block until a packet is available
    pub fn pop(&self) -> Packet {
        loop {
            if let Ok(packet) = self.receiver.recv() {
                return packet;
            }
        }
    }

    /// Block for at most `timeout`, `None` if nothing arrived in time
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Packet> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn try_pop(&self) -> Option<Packet> {
        self.receiver.try_recv().ok()
    }

    /// Discard every queued packet
    pub fn clear(&self) {
        while self.receiver.try_recv().is_ok() {}
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
