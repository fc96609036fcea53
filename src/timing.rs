//! Conversions between the command time base (Hz, RPM, seconds) and
//! backend-native counts, plus the wraparound-safe microsecond instant the
//! arbiter keeps its deadlines in.
//!
//! All functions here are pure; the only hardware access is the optional
//! `now()` read of the free-running microsecond counter.

use num_traits::Float;

/// Non-loop cycles the pulse state machine spends per step period. The
/// high and low wait loops each burn `duty + 1` cycles on top of this, so a
/// full step period is `2 * duty + PIO_OVERHEAD_CYCLES` system clocks.
pub const PIO_OVERHEAD_CYCLES: u32 = 7;

/// Half-period tick count for the pulse state machine: the duty value that
/// makes one step at `hz` take `f_sys / hz` cycles. Clamped to >= 1.
/// Returns 0 iff `hz` is 0 (the stream end-marker sentinel).
pub fn hz_to_duty(f_sys: u32, hz: u32) -> u32 {
    if hz == 0 {
        return 0;
    }
    let f_sys = f_sys as u64;
    let hz = hz as u64;
    let overhead = PIO_OVERHEAD_CYCLES as u64 * hz;
    if f_sys <= overhead {
        return 1;
    }
    // round((f_sys / hz - overhead_cycles) / 2)
    let duty = ((f_sys - overhead) + hz) / (2 * hz);
    duty.max(1) as u32
}

/// `hz_to_duty` for a period given in seconds. Returns 0 for non-positive
/// periods (end-marker sentinel).
pub fn period_to_duty(f_sys: u32, seconds: f32) -> u32 {
    if seconds <= 0.0 {
        return 0;
    }
    duty_for_cycles(seconds * f_sys as f32)
}

/// Duty for a motor speed in RPM given the driver's pulses-per-revolution.
/// Returns 0 for non-positive speeds.
pub fn rpm_to_duty(f_sys: u32, rpm: f32, ppr: u32) -> u32 {
    let hz = rpm * ppr as f32 / 60.0;
    if hz <= 0.0 {
        return 0;
    }
    duty_for_cycles(f_sys as f32 / hz)
}

fn duty_for_cycles(cycles_per_step: f32) -> u32 {
    let duty = ((cycles_per_step - PIO_OVERHEAD_CYCLES as f32) / 2.0).round();
    if duty < 1.0 {
        1
    } else {
        duty as u32
    }
}

/// Pulse count equivalent of running `seconds` at `hz`, rounded.
pub fn duration_to_steps(seconds: f32, hz: u32) -> u32 {
    let steps = (seconds * hz as f32).round();
    if steps < 0.0 {
        0
    } else {
        steps as u32
    }
}

/// Microseconds a step-bounded command occupies, rounded. Saturates at
/// `i32::MAX` so the result always stays inside the wraparound-comparable
/// half range of the counter.
pub fn steps_to_micros(steps: u32, hz: u32) -> u32 {
    if hz == 0 {
        return 0;
    }
    let us = (steps as u64 * 1_000_000 + hz as u64 / 2) / hz as u64;
    us.min(i32::MAX as u64) as u32
}

/// Instant on the free-running 32-bit microsecond counter. Comparisons are
/// wraparound-safe while two instants are within half the counter range
/// (about 35 minutes) of each other.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Micros(pub u32);

impl Micros {
    /// The deadline `micros` after this instant.
    pub fn deadline_after(self, micros: u32) -> Micros {
        Micros(self.0.wrapping_add(micros))
    }

    /// True once `now` is at or past this instant.
    pub fn reached_by(self, now: Micros) -> bool {
        now.0.wrapping_sub(self.0) as i32 >= 0
    }
}

/// Current instant from the hardware timer's raw low word.
#[cfg(feature = "rp2040")]
pub fn now() -> Micros {
    let timer = unsafe { &*rp2040_pac::TIMER::ptr() };
    Micros(timer.timerawl.read().bits())
}
