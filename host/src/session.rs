//! Session state: anchors the command stream to one monotonic clock and
//! turns decoded commands into per-axis tracks.
//!
//! Coordinate frame: origin is both axes at mechanical zero, +x right,
//! +y down, translation only. Motor 0 drives X, motor 1 drives Y. All
//! queries answer in steps; the export layer converts to meters.

use rail_motion::protocols::host_link::{Command, CommandMode, FrameDecoder, MagnitudeUnit};

use crate::segment::AxisTrack;

/// Per-axis geometry and wire-direction mapping.
#[derive(Clone, Copy, Debug)]
pub struct AxisConfig {
    /// Rail meters per motor step.
    pub step_m: f64,
    /// Velocity sign when the frame's direction bit is 0.
    pub dir_bit0_sign: f64,
    /// Velocity sign when the frame's direction bit is 1.
    pub dir_bit1_sign: f64,
}

impl Default for AxisConfig {
    fn default() -> Self {
        // 0.5 m of travel over 320 000 microsteps
        Self {
            step_m: 0.5 / 320_000.0,
            dir_bit0_sign: 1.0,
            dir_bit1_sign: -1.0,
        }
    }
}

/// Reconstructs the continuous rail pose from the raw frames sent to the
/// device, given each frame's send timestamp on one monotonic clock.
pub struct RailSession {
    decoder: FrameDecoder,
    session_start: Option<f64>,
    preset_steps: (f64, f64),
    axes: [AxisTrack; 2],
    configs: [AxisConfig; 2],
    z_m: f64,
}

impl RailSession {
    pub fn new() -> Self {
        Self::with_magnitude_unit(MagnitudeUnit::Milliseconds)
    }

    /// Session for a link running a firmware revision with a different
    /// time-bounded magnitude unit.
    pub fn with_magnitude_unit(unit: MagnitudeUnit) -> Self {
        Self {
            decoder: FrameDecoder::with_magnitude_unit(unit),
            session_start: None,
            preset_steps: (0.0, 0.0),
            axes: [AxisTrack::new(), AxisTrack::new()],
            configs: [AxisConfig::default(); 2],
            z_m: 0.0,
        }
    }

    pub fn set_axis_config(&mut self, axis: usize, config: AxisConfig) {
        self.configs[axis] = config;
    }

    pub fn axis_config(&self, axis: usize) -> &AxisConfig {
        &self.configs[axis]
    }

    pub fn set_z(&mut self, z_m: f64) {
        self.z_m = z_m;
    }

    pub fn z_m(&self) -> f64 {
        self.z_m
    }

    pub fn axis(&self, axis: usize) -> &AxisTrack {
        &self.axes[axis]
    }

    /// Anchor the session clock. With `None` the anchor is taken from the
    /// first fed frame instead.
    pub fn start(&mut self, t_abs: Option<f64>) {
        if let Some(t) = t_abs {
            self.session_start = Some(t);
        }
    }

    /// Static offset added to every query; generates no motion.
    pub fn set_preset_steps(&mut self, x0: f64, y0: f64) {
        self.preset_steps = (x0, y0);
    }

    /// Ingest one sent packet with its send timestamp. Returns the decoded
    /// command, or `None` when the bytes do not complete a frame. Multiple
    /// frames in one packet all take effect at the same timestamp; the last
    /// one is returned.
    pub fn feed(&mut self, t_send_abs: f64, packet: &[u8]) -> Option<Command> {
        let start = *self.session_start.get_or_insert(t_send_abs);
        let t_rel = (t_send_abs - start).max(0.0);

        let mut decoded = Vec::new();
        self.decoder.feed(packet, &mut |cmd| decoded.push(cmd));
        for cmd in &decoded {
            self.apply(*cmd, t_rel);
        }
        decoded.last().copied()
    }

    fn apply(&mut self, cmd: Command, t_rel: f64) {
        for axis in 0..2u8 {
            if !cmd.selects(axis) {
                continue;
            }
            let config = &self.configs[axis as usize];
            let sign = if cmd.direction_bit(axis) {
                config.dir_bit1_sign
            } else {
                config.dir_bit0_sign
            };
            let velocity = sign * cmd.speed_hz as f64;
            let duration = match cmd.mode {
                CommandMode::TimeBounded => cmd.magnitude as f64 / 1_000.0,
                // speed is clamped >= 1 Hz at decode
                CommandMode::StepBounded => cmd.magnitude as f64 / cmd.speed_hz as f64,
            };
            self.axes[axis as usize].append(t_rel, velocity, duration);
        }
    }

    /// Pose in steps at a session-relative time. Before the first command
    /// an axis sits at its preset offset; after its last it holds the
    /// terminal position.
    pub fn pose_at(&self, t_rel: f64) -> (f64, f64) {
        let x = self.axes[0].position_at(t_rel).unwrap_or(0.0) + self.preset_steps.0;
        let y = self.axes[1].position_at(t_rel).unwrap_or(0.0) + self.preset_steps.1;
        (x, y)
    }

    /// Batched [`pose_at`](Self::pose_at), typically over the radar frame
    /// timestamps.
    pub fn sample(&self, times_rel: &[f64]) -> Vec<(f64, f64)> {
        times_rel.iter().map(|&t| self.pose_at(t)).collect()
    }

    /// When the last commanded motion ends, relative to the anchor.
    pub fn end_time(&self) -> f64 {
        self.axes[0].end_time().max(self.axes[1].end_time())
    }
}

impl Default for RailSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn frame(header: u8, motors: u8, dirs: u8, hz: i32, magnitude: i32) -> [u8; 11] {
        let mut out = [0u8; 11];
        out[0] = header;
        out[1] = motors;
        out[2] = dirs;
        out[3..7].copy_from_slice(&hz.to_le_bytes());
        out[7..11].copy_from_slice(&magnitude.to_le_bytes());
        out
    }

    #[test]
    fn overwrite_splices_the_velocity_at_the_send_time() {
        let mut session = RailSession::new();
        session.start(Some(0.0));
        // +x at 1000 Hz for 2 s, then at t=1 s: -x at 500 Hz for 2 s
        session.feed(0.0, &frame(0xBF, 0x01, 0x00, 1_000, 2_000)).unwrap();
        session.feed(1.0, &frame(0xBF, 0x01, 0x01, 500, 2_000)).unwrap();
        assert_eq!(session.pose_at(0.5).0, 500.0);
        assert_eq!(session.pose_at(1.5).0, 750.0);
        assert_eq!(session.pose_at(3.0).0, 0.0);
        assert_eq!(session.pose_at(5.0).0, 0.0);
    }

    #[test]
    fn a_zero_duration_command_freezes_the_axis() {
        let mut session = RailSession::new();
        session.start(Some(10.0));
        session.feed(10.0, &frame(0xBF, 0x01, 0x00, 1_000, 2_000)).unwrap();
        session.feed(11.0, &frame(0xBF, 0x01, 0x00, 1, 0)).unwrap();
        assert_eq!(session.pose_at(0.5).0, 500.0);
        assert_eq!(session.pose_at(1.0).0, 1_000.0);
        assert_eq!(session.pose_at(5.0).0, 1_000.0);
    }

    #[test]
    fn step_bounded_commands_derive_their_duration_from_the_speed() {
        let mut session = RailSession::new();
        session.start(Some(0.0));
        // 200 pulses at 800 Hz = 0.25 s of motion
        session.feed(0.0, &frame(0xAF, 0x01, 0x00, 800, 200)).unwrap();
        assert_eq!(session.pose_at(0.125).0, 100.0);
        assert_eq!(session.pose_at(0.25).0, 200.0);
        assert_eq!(session.pose_at(1.0).0, 200.0);
        assert_eq!(session.end_time(), 0.25);
    }

    #[test]
    fn one_frame_can_drive_both_axes_with_independent_signs() {
        let mut session = RailSession::new();
        session.start(Some(0.0));
        // both motors, motor 0 bit set (reverse), motor 1 bit clear (forward)
        session.feed(0.0, &frame(0xBF, 0x03, 0x01, 1_000, 1_000)).unwrap();
        let (x, y) = session.pose_at(1.0);
        assert_eq!(x, -1_000.0);
        assert_eq!(y, 1_000.0);
    }

    #[test]
    fn pose_matches_an_independent_integration() {
        let mut session = RailSession::new();
        session.start(Some(0.0));
        let commands: [(f64, i32, bool, i32); 3] =
            [(0.0, 1_000, false, 3_000), (1.2, 400, true, 2_000), (4.0, 250, false, 1_000)];
        for &(t, hz, reverse, ms) in &commands {
            let dirs = if reverse { 0x01 } else { 0x00 };
            session.feed(t, &frame(0xBF, 0x01, dirs, hz, ms)).unwrap();
        }
        // reference: integrate the overwrite semantics directly
        let reference = |t: f64| -> f64 {
            let spans = [
                (0.0, 1.2, 1_000.0),  // first command, cut short at 1.2
                (1.2, 3.2, -400.0),   // second runs its full 2 s
                (3.2, 4.0, 0.0),      // idle
                (4.0, 5.0, 250.0),    // third
            ];
            let mut x = 0.0;
            for (a, b, v) in spans {
                if t <= a {
                    break;
                }
                x += v * (t.min(b) - a);
            }
            x
        };
        for t in [0.0, 0.3, 1.1999, 1.2, 2.0, 3.2, 3.7, 4.5, 5.0, 9.0] {
            let (x, _) = session.pose_at(t);
            assert!((x - reference(t)).abs() < 1e-6, "t={t}: {x} vs {}", reference(t));
        }
    }

    #[test]
    fn preset_offsets_apply_without_generating_motion() {
        let mut session = RailSession::new();
        session.start(Some(0.0));
        session.set_preset_steps(123.0, -45.0);
        for t in [0.0, 0.5, 100.0] {
            assert_eq!(session.pose_at(t), (123.0, -45.0));
        }
        // and they simply shift real motion
        session.feed(0.0, &frame(0xAF, 0x01, 0x00, 100, 100)).unwrap();
        assert_eq!(session.pose_at(1.0).0, 223.0);
    }

    #[test]
    fn the_anchor_defaults_to_the_first_fed_frame() {
        let mut session = RailSession::new();
        session.feed(55.0, &frame(0xBF, 0x01, 0x00, 1_000, 1_000)).unwrap();
        assert_eq!(session.pose_at(0.5).0, 500.0);
    }

    #[test]
    fn garbage_packets_decode_to_nothing() {
        let mut session = RailSession::new();
        assert!(session.feed(0.0, &[0x00, 0x13, 0x37]).is_none());
        assert_eq!(session.pose_at(1.0), (0.0, 0.0));
    }

    #[test]
    fn a_frame_split_across_packets_lands_on_completion() {
        let mut session = RailSession::new();
        let bytes = frame(0xAF, 0x01, 0x00, 800, 200);
        assert!(session.feed(0.0, &bytes[..5]).is_none());
        // completes on the second packet, so it takes effect at t=2
        let cmd = session.feed(2.0, &bytes[5..]).unwrap();
        assert_eq!(cmd.speed_hz, 800);
        assert_eq!(session.pose_at(2.25).0, 200.0);
    }
}
