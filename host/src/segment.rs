//! Per-axis piecewise-constant-velocity tracks.
//!
//! A track is an append-only, contiguous sequence of segments: each starts
//! where and when the previous one ended. A command that lands while a
//! segment is still running truncates it in place, so overwrites keep the
//! position function continuous. Idle stretches between commands become
//! explicit zero-velocity filler, which keeps lookup a plain binary search.

/// One constant-velocity stretch, times in seconds relative to the session
/// anchor, positions in steps.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub t_start: f64,
    pub t_end: f64,
    /// Steps per second, signed.
    pub velocity: f64,
    pub x_start: f64,
}

impl Segment {
    /// Position when this segment ends.
    pub fn x_end(&self) -> f64 {
        self.x_start + self.velocity * (self.t_end - self.t_start)
    }
}

/// The full motion history of one axis.
#[derive(Default, Debug)]
pub struct AxisTrack {
    segments: Vec<Segment>,
}

impl AxisTrack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// When the last commanded motion ends (0 for an untouched axis).
    pub fn end_time(&self) -> f64 {
        self.segments.last().map_or(0.0, |s| s.t_end)
    }

    /// Install a new command at time `t`: truncate anything still running,
    /// pad any idle gap with zero velocity, and append the new segment.
    /// Feed times must be monotonic.
    pub fn append(&mut self, t: f64, velocity: f64, duration: f64) {
        if let Some(last) = self.segments.last_mut() {
            if last.t_end > t {
                last.t_end = t.max(last.t_start);
            } else if last.t_end < t {
                let filler = Segment {
                    t_start: last.t_end,
                    t_end: t,
                    velocity: 0.0,
                    x_start: last.x_end(),
                };
                self.segments.push(filler);
            }
        }
        let x_start = self.segments.last().map_or(0.0, |s| s.x_end());
        self.segments.push(Segment {
            t_start: t,
            t_end: t + duration.max(0.0),
            velocity,
            x_start,
        });
    }

    /// Position at `t`, or `None` when `t` precedes all motion. Past the
    /// last segment the axis holds its terminal position.
    pub fn position_at(&self, t: f64) -> Option<f64> {
        let first = self.segments.first()?;
        if t < first.t_start {
            return None;
        }
        let idx = self.segments.partition_point(|s| s.t_end <= t);
        match self.segments.get(idx) {
            Some(seg) => Some(seg.x_start + seg.velocity * (t - seg.t_start)),
            None => self.segments.last().map(|s| s.x_end()),
        }
    }
}
