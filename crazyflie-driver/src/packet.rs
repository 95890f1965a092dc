use std::fmt;

/// Maximum payload carried by a single radio frame (32 bytes minus the header)
pub const MAX_PAYLOAD_SIZE: usize = 31;

/// Header of the keepalive packet sent when there is nothing else to send
pub const IDLE_HEADER: u8 = 0xFF;

/// CRTP packet: one header byte followed by the payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    header: u8,
    data: Vec<u8>,
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(ch: {}, port: {}, data: {:02X?})",
            self.get_channel(),
            self.get_port(),
            self.data
        )
    }
}

impl Default for Packet {
    fn default() -> Self {
        Packet::idle()
    }
}

impl From<Vec<u8>> for Packet {
    fn from(mut v: Vec<u8>) -> Self {
        //
        // A packet on the wire starts with a header byte, formatted as:
        //
        //   pppp00cc
        //
        // Where ...
        //  ... bit 1 and 2 is the channel (c) ...
        //  ... bit 3 and 4 are reserved for flow-control for the radio link ...
        //  ... bit 5, 6, 7 and 8 is the port (p).
        //
        // Anything that is not a frame degrades to an idle packet.
        if v.is_empty() {
            return Packet::idle();
        }
        let data = v.split_off(1);

        Packet {
            header: v[0],
            data,
        }
    }
}

impl From<&[u8]> for Packet {
    fn from(v: &[u8]) -> Self {
        Packet::from(v.to_vec())
    }
}

impl From<Packet> for Vec<u8> {
    fn from(packet: Packet) -> Self {
        let mut vec = Vec::with_capacity(packet.data.len() + 1);

        vec.push(packet.header);
        vec.extend_from_slice(&packet.data);
        vec
    }
}

impl Packet {
    pub fn new(port: u8, channel: u8, data: Vec<u8>) -> Self {
        let mut packet = Packet::new_from_header(0, data);
        packet.set_port(port);
        packet.set_channel(channel);
        packet
    }

    pub fn new_from_header(header: u8, data: Vec<u8>) -> Self {
        Packet { header, data }
    }

    /// The keepalive packet polled to the Crazyflie when the uplink is empty
    pub fn idle() -> Self {
        Packet::new_from_header(IDLE_HEADER, Vec::new())
    }

    pub fn get_channel(&self) -> u8 {
        self.header & 0x03
    }

    pub fn get_port(&self) -> u8 {
        (self.header & 0xF0) >> 4
    }

    pub fn get_header(&self) -> u8 {
        self.header
    }

    pub fn get_data(&self) -> &Vec<u8> {
        &self.data
    }

    /// Replaces the channel bits, leaving the port and reserved bits untouched
    pub fn set_channel(&mut self, channel: u8) {
        self.header = (self.header & 0xFC) | (channel & 0x03);
    }

    /// Replaces the port bits, leaving the channel and reserved bits untouched
    pub fn set_port(&mut self, port: u8) {
        self.header = (self.header & 0x0F) | ((port & 0x0F) << 4);
    }

    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }

    pub fn append_data(&mut self, v: &mut Vec<u8>) {
        self.data.append(v);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip_for_every_port_and_channel() {
        for port in 0..16 {
            for channel in 0..4 {
                let packet = Packet::new(port, channel, vec![]);
                let decoded = Packet::from(vec![packet.get_header()]);
                assert_eq!(decoded.get_port(), port);
                assert_eq!(decoded.get_channel(), channel);
            }
        }
    }

    #[test]
    fn unpacking_empty_input_gives_idle_packet() {
        assert_eq!(Packet::from(Vec::new()), Packet::idle());
        assert_eq!(Packet::idle().get_header(), 0xFF);
        assert!(Packet::idle().is_empty());
    }

    #[test]
    fn unpacking_splits_header_and_payload() {
        let packet = Packet::from(vec![0x52, 1, 2, 3]);
        assert_eq!(packet.get_header(), 0x52);
        assert_eq!(packet.get_port(), 5);
        assert_eq!(packet.get_channel(), 2);
        assert_eq!(packet.get_data(), &vec![1, 2, 3]);
        assert_eq!(Vec::<u8>::from(packet), vec![0x52, 1, 2, 3]);
    }

    #[test]
    fn setters_do_not_disturb_other_fields() {
        let mut packet = Packet::new_from_header(0x0C, vec![]);
        packet.set_port(0x05);
        assert_eq!(packet.get_header(), 0x5C);
        packet.set_channel(0x02);
        assert_eq!(packet.get_header(), 0x5E);
        packet.set_port(0x0F);
        assert_eq!(packet.get_header(), 0xFE);
        assert_eq!(packet.get_channel(), 2);
    }
}
