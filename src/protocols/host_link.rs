//! Decoder for the host's fixed-size motion command frames.
//!
//! Frame layout (11 bytes, little-endian):
//!
//! ```text
//! offset  size  field
//!   0     1     header: 0xBF = time-bounded, 0xAF = step-bounded
//!   1     1     motor mask (bit i = motor i)
//!   2     1     direction mask (bit i = motor i direction)
//!   3     4     speed, i32 Hz (absolute value taken)
//!   7     4     magnitude, i32 (ms for 0xBF, pulse count for 0xAF)
//! ```
//!
//! Bytes that are not a known header are dropped while idle; a frame split
//! across any number of reads reassembles byte by byte. There is nothing to
//! report on a bad stream (the header gates entry and the fixed length
//! absorbs the rest), so decoding never fails, it only stays silent.

use num_enum::TryFromPrimitive;

/// Total frame size on the wire.
pub const FRAME_LEN: usize = 11;

/// Emitted once over the serial link when the device finishes boot.
pub const READY: &[u8] = b"READY\n";
/// Acknowledgement emitted after every decoded frame.
pub const ACK: &[u8] = b"OK\n";

/// Frame header byte, doubling as the command mode.
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CommandMode {
    /// Run until a wall-clock duration elapses; magnitude is the duration.
    TimeBounded = 0xBF,
    /// Run an exact pulse count; magnitude is the count.
    StepBounded = 0xAF,
}

/// Unit of the magnitude field in time-bounded frames. Old firmware
/// revisions sent whole seconds. The unit is fixed per link at
/// construction, never autodetected from traffic.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MagnitudeUnit {
    Milliseconds,
    Seconds,
}

/// One decoded motion command. Signed wire fields are already normalized:
/// speed is clamped to >= 1 Hz and time-bounded magnitudes are always in
/// milliseconds regardless of the link's wire unit.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Command {
    pub mode: CommandMode,
    pub motor_mask: u8,
    pub direction_mask: u8,
    pub speed_hz: u32,
    pub magnitude: u32,
}

impl Command {
    /// Whether this command addresses the given motor index.
    pub fn selects(&self, motor: u8) -> bool {
        self.motor_mask & (1 << motor) != 0
    }

    /// The raw direction bit for the given motor index.
    pub fn direction_bit(&self, motor: u8) -> bool {
        self.direction_mask & (1 << motor) != 0
    }
}

/// Incremental frame decoder. Feed it bytes as they arrive; it holds
/// partial frames across reads and emits one `Command` per complete frame.
pub struct FrameDecoder {
    buf: [u8; FRAME_LEN],
    len: usize,
    unit: MagnitudeUnit,
}

impl FrameDecoder {
    pub const fn new() -> Self {
        Self::with_magnitude_unit(MagnitudeUnit::Milliseconds)
    }

    /// Decoder for a link whose firmware revision uses a different
    /// time-bounded magnitude unit.
    pub const fn with_magnitude_unit(unit: MagnitudeUnit) -> Self {
        Self {
            buf: [0; FRAME_LEN],
            len: 0,
            unit,
        }
    }

    /// Consume one byte; returns a command when it completes a frame.
    pub fn push(&mut self, byte: u8) -> Option<Command> {
        if self.len == 0 && CommandMode::try_from(byte).is_err() {
            // noise between frames
            return None;
        }
        self.buf[self.len] = byte;
        self.len += 1;
        if self.len < FRAME_LEN {
            return None;
        }
        self.len = 0;
        Some(self.parse())
    }

    /// Consume a read's worth of bytes, invoking `handler` per frame.
    pub fn feed(&mut self, bytes: &[u8], handler: &mut dyn FnMut(Command)) {
        for &byte in bytes {
            if let Some(cmd) = self.push(byte) {
                handler(cmd);
            }
        }
    }

    fn parse(&self) -> Command {
        // the header was vetted on entry
        let mode = match CommandMode::try_from(self.buf[0]) {
            Ok(m) => m,
            Err(_) => CommandMode::TimeBounded,
        };
        let speed = i32::from_le_bytes([self.buf[3], self.buf[4], self.buf[5], self.buf[6]]);
        let raw_magnitude =
            i32::from_le_bytes([self.buf[7], self.buf[8], self.buf[9], self.buf[10]]);

        let mut magnitude = raw_magnitude.unsigned_abs();
        if mode == CommandMode::TimeBounded && self.unit == MagnitudeUnit::Seconds {
            magnitude = magnitude.saturating_mul(1_000);
        }

        Command {
            mode,
            motor_mask: self.buf[1],
            direction_mask: self.buf[2],
            speed_hz: speed.unsigned_abs().max(1),
            magnitude,
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // both motors, motor 0 direction bit set, 1000 Hz, 10 000 ms
    const TIME_FRAME: [u8; FRAME_LEN] = [
        0xBF, 0x03, 0x01, 0xE8, 0x03, 0x00, 0x00, 0x10, 0x27, 0x00, 0x00,
    ];
    // motor 0, 800 Hz, 200 pulses
    const STEP_FRAME: [u8; FRAME_LEN] = [
        0xAF, 0x01, 0x00, 0x20, 0x03, 0x00, 0x00, 0xC8, 0x00, 0x00, 0x00,
    ];

    fn decode_all(dec: &mut FrameDecoder, bytes: &[u8]) -> Vec<Command> {
        let mut out = Vec::new();
        dec.feed(bytes, &mut |cmd| out.push(cmd));
        out
    }

    #[test]
    fn decodes_a_time_bounded_frame() {
        let mut dec = FrameDecoder::new();
        let cmds = decode_all(&mut dec, &TIME_FRAME);
        assert_eq!(
            cmds,
            [Command {
                mode: CommandMode::TimeBounded,
                motor_mask: 0x03,
                direction_mask: 0x01,
                speed_hz: 1_000,
                magnitude: 10_000,
            }]
        );
        assert!(cmds[0].selects(0) && cmds[0].selects(1) && !cmds[0].selects(2));
        assert!(cmds[0].direction_bit(0) && !cmds[0].direction_bit(1));
    }

    #[test]
    fn decodes_a_step_bounded_frame() {
        let mut dec = FrameDecoder::new();
        let cmds = decode_all(&mut dec, &STEP_FRAME);
        assert_eq!(cmds[0].mode, CommandMode::StepBounded);
        assert_eq!(cmds[0].speed_hz, 800);
        assert_eq!(cmds[0].magnitude, 200);
    }

    #[test]
    fn reassembles_frames_from_arbitrary_chunking() {
        for chunk in 1..=FRAME_LEN {
            let mut dec = FrameDecoder::new();
            let mut cmds = Vec::new();
            for part in TIME_FRAME.chunks(chunk) {
                dec.feed(part, &mut |cmd| cmds.push(cmd));
            }
            assert_eq!(cmds.len(), 1, "chunk size {chunk}");
            assert_eq!(cmds[0].speed_hz, 1_000);
        }
    }

    #[test]
    fn drops_noise_between_frames() {
        let mut dec = FrameDecoder::new();
        let mut stream = vec![0x00, 0x55, 0xFF, 0x0A];
        stream.extend_from_slice(&STEP_FRAME);
        stream.extend_from_slice(&[0x42]);
        stream.extend_from_slice(&STEP_FRAME);
        let cmds = decode_all(&mut dec, &stream);
        assert_eq!(cmds.len(), 2);
    }

    #[test]
    fn normalizes_signed_fields() {
        let mut frame = STEP_FRAME;
        frame[3..7].copy_from_slice(&(-800i32).to_le_bytes());
        frame[7..11].copy_from_slice(&(-200i32).to_le_bytes());
        let mut dec = FrameDecoder::new();
        let cmds = decode_all(&mut dec, &frame);
        assert_eq!(cmds[0].speed_hz, 800);
        assert_eq!(cmds[0].magnitude, 200);

        // zero speed clamps to the 1 Hz floor
        let mut frame = STEP_FRAME;
        frame[3..7].copy_from_slice(&0i32.to_le_bytes());
        let cmds = decode_all(&mut dec, &frame);
        assert_eq!(cmds[0].speed_hz, 1);
    }

    #[test]
    fn legacy_links_scale_seconds_to_milliseconds() {
        let mut frame = TIME_FRAME;
        frame[7..11].copy_from_slice(&2i32.to_le_bytes());
        let mut dec = FrameDecoder::with_magnitude_unit(MagnitudeUnit::Seconds);
        let cmds = decode_all(&mut dec, &frame);
        assert_eq!(cmds[0].magnitude, 2_000);

        // step counts are untouched by the unit
        let mut dec = FrameDecoder::with_magnitude_unit(MagnitudeUnit::Seconds);
        let cmds = decode_all(&mut dec, &STEP_FRAME);
        assert_eq!(cmds[0].magnitude, 200);
    }
}
