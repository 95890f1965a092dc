use crate::crtp::{PacketSender, Port};
use crate::Packet;
use byteorder::{LittleEndian, WriteBytesExt};
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

const XMODE_FACTOR: f32 = 0.707;

/// Build a setpoint packet: roll, -pitch, yaw as f32 and thrust as u16, all
/// little endian.
pub fn setpoint_packet(roll: f32, pitch: f32, yaw: f32, thrust: u16) -> Packet {
    let mut data = Vec::with_capacity(14);
    // Writing into a Vec cannot fail
    let _ = data.write_f32::<LittleEndian>(roll);
    let _ = data.write_f32::<LittleEndian>(-pitch);
    let _ = data.write_f32::<LittleEndian>(yaw);
    let _ = data.write_u16::<LittleEndian>(thrust);

    Packet::new(Port::Commander.number(), 0, data)
}

/// Rotate roll and pitch for a Crazyflie flying in X configuration.
///
/// The pitch is computed from the already rotated roll.
pub fn xmode_rotation(roll: f32, pitch: f32) -> (f32, f32) {
    let roll = XMODE_FACTOR * (roll - pitch);
    let pitch = XMODE_FACTOR * (roll + pitch);
    (roll, pitch)
}

/// Send attitude and thrust setpoints
pub struct Commander {
    sender: Weak<dyn PacketSender>,
    xmode: AtomicBool,
}

impl Commander {
    pub fn new(sender: Weak<dyn PacketSender>) -> Self {
        Commander {
            sender,
            xmode: AtomicBool::new(false),
        }
    }

    pub fn set_xmode(&self, enabled: bool) {
        self.xmode.store(enabled, Ordering::Relaxed);
    }

    pub fn xmode(&self) -> bool {
        self.xmode.load(Ordering::Relaxed)
    }

    pub fn send_setpoint(&self, roll: f32, pitch: f32, yaw: f32, thrust: u16) {
        let (roll, pitch) = if self.xmode() {
            xmode_rotation(roll, pitch)
        } else {
            (roll, pitch)
        };

        match self.sender.upgrade() {
            Some(sender) => sender.send_packet(setpoint_packet(roll, pitch, yaw, thrust), false),
            None => debug!("Crazyflie gone, dropping setpoint"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Packet>>);

    impl PacketSender for Recorder {
        fn send_packet(&self, packet: Packet, expect_answer: bool) {
            assert!(!expect_answer);
            self.0.lock().unwrap().push(packet);
        }
    }

    #[test]
    fn setpoint_layout() {
        let packet = setpoint_packet(1.0, 2.0, -3.0, 40000);
        assert_eq!(packet.get_port(), 3);
        assert_eq!(packet.get_channel(), 0);

        let mut expected = Vec::new();
        expected.extend_from_slice(&1.0f32.to_le_bytes());
        expected.extend_from_slice(&(-2.0f32).to_le_bytes());
        expected.extend_from_slice(&(-3.0f32).to_le_bytes());
        expected.extend_from_slice(&40000u16.to_le_bytes());
        assert_eq!(*packet.get_data(), expected);
    }

    #[test]
    fn xmode_pitch_uses_the_rotated_roll() {
        let (roll, pitch) = xmode_rotation(10.0, 4.0);
        assert!((roll - 0.707 * 6.0).abs() < 1e-5);
        assert!((pitch - 0.707 * (0.707 * 6.0 + 4.0)).abs() < 1e-5);
    }

    #[test]
    fn commander_sends_through_the_session() {
        let recorder = Arc::new(Recorder::default());
        let sender: Weak<Recorder> = Arc::downgrade(&recorder);
        let commander = Commander::new(sender);

        commander.send_setpoint(0.0, 0.0, 0.0, 0);
        commander.set_xmode(true);
        commander.send_setpoint(1.0, 1.0, 0.0, 100);

        let sent = recorder.0.lock().unwrap();
        assert_eq!(sent[0], setpoint_packet(0.0, 0.0, 0.0, 0));
        let (roll, pitch) = xmode_rotation(1.0, 1.0);
        assert_eq!(sent[1], setpoint_packet(roll, pitch, 0.0, 100));
    }
}
