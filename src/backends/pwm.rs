//! PWM slice backend: N pulses at frequency f, counted down by a shared
//! wrap IRQ that kills the slice after the last pulse.
//!
//! The divisor search is pure and lives up top; the slice driver and the
//! process-wide wrap handler sit behind the `rp2040` feature.

use num_traits::Float;

/// Soft band the wrap value is steered into: high enough to keep duty
/// resolution, low enough to keep the wrap IRQ rate sane.
pub const WRAP_MIN: u32 = 400;
pub const WRAP_MAX: u32 = 20_000;

const W_FREQ: f32 = 1.0;
const W_WRAP: f32 = 0.02;

/// One slice configuration and the step frequency it actually yields.
/// The divisor is 8.4 fixed point (`div_int + div_frac / 16`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PwmParams {
    pub div_int: u8,
    pub div_frac: u8,
    pub wrap: u16,
    pub level: u16,
    pub f_real: f32,
}

impl PwmParams {
    /// Search the divisor grid for the cheapest `(div, wrap)` pair for `hz`:
    /// frequency error is weighted against distance from the soft wrap
    /// band, subject to the hard wrap range `[2, 65535]`. Falls back to a
    /// straight divisor clamp when no candidate fits the hard range.
    pub fn pick(f_sys: u32, hz: u32) -> PwmParams {
        let hz = hz.max(1);
        let counts_16 = f_sys as u64 * 16;
        let mut best: Option<(f32, PwmParams)> = None;

        for div16 in 16u64..=4095 {
            let denom = div16 * hz as u64;
            let period = (counts_16 + denom / 2) / denom;
            if !(3..=65_536).contains(&period) {
                continue;
            }
            let wrap = (period - 1) as u32;
            let f_real = counts_16 as f32 / (div16 * period) as f32;
            let rel_err = (f_real - hz as f32).abs() / hz as f32;
            let wrap_penalty = if wrap < WRAP_MIN {
                (WRAP_MIN - wrap) as f32 / WRAP_MIN as f32
            } else if wrap > WRAP_MAX {
                (wrap - WRAP_MAX) as f32 / WRAP_MAX as f32
            } else {
                0.0
            };
            let score = W_FREQ * rel_err + W_WRAP * wrap_penalty;
            if best.as_ref().map_or(true, |(s, _)| score < *s) {
                best = Some((
                    score,
                    PwmParams {
                        div_int: (div16 >> 4) as u8,
                        div_frac: (div16 & 0xF) as u8,
                        wrap: wrap as u16,
                        level: (wrap / 2) as u16,
                        f_real,
                    },
                ));
            }
        }

        match best {
            Some((_, params)) => params,
            None => {
                // nothing lands in the hard range; pin wrap at max and clamp
                // the divisor toward the request
                let div = (f_sys as f32 / (hz as f32 * 65_536.0)).clamp(1.0, 255.9375);
                let div16 = (div * 16.0).round() as u32;
                let f_real = counts_16 as f32 / (div16 as u64 * 65_536) as f32;
                PwmParams {
                    div_int: (div16 >> 4) as u8,
                    div_frac: (div16 & 0xF) as u8,
                    wrap: 65_535,
                    level: 65_535 / 2,
                    f_real,
                }
            }
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rp2040")] {

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use rp2040_pac as pac;

use super::rp2040::{park_low, set_function, FUNCSEL_PWM};

const NO_PIN: u8 = 0xFF;

// Per-slice wrap countdowns for the shared IRQ. The handler filters on
// ACTIVE_SLICES, so slices owned by other code never get touched.
const ZERO_STEPS: AtomicU32 = AtomicU32::new(0);
static REMAINING_STEPS: [AtomicU32; 8] = [ZERO_STEPS; 8];
static ACTIVE_SLICES: AtomicU8 = AtomicU8::new(0);
// STEP pin bound to each active slice, so the IRQ can park it idle-low.
const UNBOUND: AtomicU8 = AtomicU8::new(NO_PIN);
static SLICE_PIN: [AtomicU8; 8] = [UNBOUND; 8];

/// Slice driving a given GPIO.
pub fn slice_for_pin(pin: u8) -> u8 {
    (pin >> 1) & 0x7
}

fn pwm() -> &'static pac::pwm::RegisterBlock {
    unsafe { &*pac::PWM::ptr() }
}

fn mark_active(slice: usize, on: bool) {
    cortex_m::interrupt::free(|_| {
        let mask = ACTIVE_SLICES.load(Ordering::Relaxed);
        let mask = if on {
            mask | 1 << slice
        } else {
            mask & !(1 << slice)
        };
        ACTIVE_SLICES.store(mask, Ordering::Relaxed);
    });
}

/// One-time bring-up for a STEP pin: park it low, zero its counter, and
/// install the shared wrap handler (unmasking twice is harmless).
pub fn init(pin: u8) {
    let slice = slice_for_pin(pin) as usize;
    REMAINING_STEPS[slice].store(0, Ordering::Relaxed);
    park_low(pin);
    unsafe { cortex_m::peripheral::NVIC::unmask(pac::Interrupt::PWM_IRQ_WRAP) };
}

fn program_slice(pin: u8, params: &PwmParams) {
    let slice = slice_for_pin(pin) as usize;
    let ch = &pwm().ch[slice];
    ch.csr.modify(|_, w| w.en().clear_bit());
    ch.div.write(|w| unsafe {
        w.int().bits(params.div_int);
        w.frac().bits(params.div_frac);
        w
    });
    ch.top.write(|w| unsafe { w.top().bits(params.wrap) });
    if pin & 1 == 0 {
        ch.cc.modify(|_, w| unsafe { w.a().bits(params.level) });
    } else {
        ch.cc.modify(|_, w| unsafe { w.b().bits(params.level) });
    }
    ch.ctr.write(|w| unsafe { w.ctr().bits(0) });
}

/// Emit exactly `steps` pulses at `hz` on `pin`. No-op when either is 0.
pub fn run(pin: u8, f_sys: u32, hz: u32, steps: u32) {
    if hz == 0 || steps == 0 {
        return;
    }
    let params = PwmParams::pick(f_sys, hz);
    let slice = slice_for_pin(pin) as usize;
    program_slice(pin, &params);

    REMAINING_STEPS[slice].store(steps, Ordering::Relaxed);
    SLICE_PIN[slice].store(pin, Ordering::Relaxed);
    mark_active(slice, true);

    let p = pwm();
    p.intr.write(|w| unsafe { w.bits(1 << slice) });
    p.inte.modify(|r, w| unsafe { w.bits(r.bits() | 1 << slice) });
    p.ch[slice].csr.modify(|_, w| w.en().set_bit());
    set_function(pin, FUNCSEL_PWM);
}

/// Free-running square wave at `hz`, no pulse counting; the arbiter ends it
/// by deadline.
pub fn run_free(pin: u8, f_sys: u32, hz: u32) {
    if hz == 0 {
        return;
    }
    let params = PwmParams::pick(f_sys, hz);
    let slice = slice_for_pin(pin) as usize;
    program_slice(pin, &params);
    pwm().ch[slice].csr.modify(|_, w| w.en().set_bit());
    set_function(pin, FUNCSEL_PWM);
}

/// Kill the slice and park the pin. Disabling the slice alone leaves the
/// output at whatever level the frozen comparison gives, so the pin is
/// always handed back to GPIO-low.
pub fn stop(pin: u8) {
    let slice = slice_for_pin(pin) as usize;
    let p = pwm();
    p.ch[slice].csr.modify(|_, w| w.en().clear_bit());
    p.inte.modify(|r, w| unsafe { w.bits(r.bits() & !(1 << slice)) });
    p.intr.write(|w| unsafe { w.bits(1 << slice) });
    REMAINING_STEPS[slice].store(0, Ordering::Relaxed);
    SLICE_PIN[slice].store(NO_PIN, Ordering::Relaxed);
    mark_active(slice, false);
    park_low(pin);
}

/// Shared wrap handler; call from the PWM_IRQ_WRAP interrupt. One wrap is
/// one emitted pulse: count down, and on the last pulse kill the slice and
/// park its pin before the next period can start.
pub fn on_wrap_irq() {
    let p = pwm();
    let fired = (p.ints.read().bits() as u8) & ACTIVE_SLICES.load(Ordering::Relaxed);
    for slice in 0..8usize {
        if fired & (1 << slice) == 0 {
            continue;
        }
        p.intr.write(|w| unsafe { w.bits(1 << slice) });
        let remaining = REMAINING_STEPS[slice].load(Ordering::Relaxed);
        if remaining > 1 {
            REMAINING_STEPS[slice].store(remaining - 1, Ordering::Relaxed);
        } else {
            p.ch[slice].csr.modify(|_, w| w.en().clear_bit());
            p.inte
                .modify(|r, w| unsafe { w.bits(r.bits() & !(1 << slice)) });
            REMAINING_STEPS[slice].store(0, Ordering::Relaxed);
            mark_active(slice, false);
            let pin = SLICE_PIN[slice].load(Ordering::Relaxed);
            SLICE_PIN[slice].store(NO_PIN, Ordering::Relaxed);
            if pin != NO_PIN {
                park_low(pin);
            }
        }
    }
}

    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const F_SYS: u32 = 125_000_000;

    #[test]
    fn exact_divisor_inside_the_soft_band_wins() {
        // div = 6.25 gives 20000 counts per period: exact 1 kHz, wrap in band
        let p = PwmParams::pick(F_SYS, 1_000);
        assert_eq!((p.div_int, p.div_frac), (6, 4));
        assert_eq!(p.wrap, 19_999);
        assert_eq!(p.level, 9_999);
        assert_eq!(p.f_real, 1_000.0);
    }

    #[test]
    fn frequency_error_stays_inside_the_wrap_resolution() {
        for hz in [100, 317, 800, 1_000, 10_000, 50_000] {
            let p = PwmParams::pick(F_SYS, hz);
            let rel = (p.f_real - hz as f32).abs() / hz as f32;
            assert!(rel < 1.0 / WRAP_MIN as f32, "hz={hz} rel={rel}");
            assert!((2..=65_535).contains(&(p.wrap as u32)));
            assert_eq!(p.level, p.wrap / 2);
        }
    }

    #[test]
    fn very_low_frequencies_fall_back_to_the_divisor_clamp() {
        // 1 Hz is below what div=256, wrap=65535 can reach
        let p = PwmParams::pick(F_SYS, 1);
        assert_eq!(p.wrap, 65_535);
        assert_eq!((p.div_int, p.div_frac), (255, 15));
    }

    #[test]
    fn high_frequencies_shed_the_soft_band_for_accuracy() {
        // 50 kHz wants 2500 counts at div 1: in band, exact
        let p = PwmParams::pick(F_SYS, 50_000);
        assert_eq!((p.div_int, p.div_frac), (1, 0));
        assert_eq!(p.wrap, 2_499);
        assert_eq!(p.f_real, 50_000.0);
    }
}
