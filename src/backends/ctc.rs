//! Compare-match toggle backend, for boards whose STEP pin is wired to a
//! classic timer's output-compare pin.
//!
//! The timer runs in clear-on-compare-match mode with the compare output
//! toggling, which yields a 50% square wave at `f_cpu / (2 * prescaler *
//! (TOP + 1))`. There is no step counting here; the arbiter ends the wave
//! by deadline. Register access goes through [`CtcRegs`] so the selection
//! math stays portable across timer blocks.

use num_traits::Float;

/// Prescaler options of the classic 8/16-bit timer clock tree.
pub const PRESCALERS: [u32; 5] = [1, 8, 64, 256, 1024];

/// Width of the compare register.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerWidth {
    Bits8,
    Bits16,
}

impl TimerWidth {
    fn max_top(self) -> u32 {
        match self {
            TimerWidth::Bits8 => 0xFF,
            TimerWidth::Bits16 => 0xFFFF,
        }
    }
}

/// One prescaler/TOP selection and the toggle frequency it actually yields.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CtcParams {
    pub prescaler: u32,
    pub top: u16,
    pub f_real: f32,
}

impl CtcParams {
    /// Pick the prescaler whose achievable frequency lands closest to `hz`,
    /// with TOP clamped into `[1, max]` for the timer width. Recomputed from
    /// scratch on every call.
    pub fn pick(f_cpu: u32, hz: u32, width: TimerWidth) -> CtcParams {
        let hz = hz.max(1);
        let mut best = CtcParams {
            prescaler: 1,
            top: 1,
            f_real: 0.0,
        };
        let mut best_err = f32::INFINITY;
        for &prescaler in &PRESCALERS {
            // TOP = f_cpu / (2 * prescaler * hz) - 1, rounded
            let denom = 2 * prescaler as u64 * hz as u64;
            let top = ((f_cpu as u64 + denom / 2) / denom).max(1) - 1;
            let top = top.clamp(1, width.max_top() as u64) as u32;
            let f_real = f_cpu as f32 / (2.0 * prescaler as f32 * (top + 1) as f32);
            let err = (f_real - hz as f32).abs();
            if err < best_err {
                best_err = err;
                best = CtcParams {
                    prescaler,
                    top: top as u16,
                    f_real,
                };
            }
        }
        best
    }
}

/// Register operations a compare-toggle capable timer exposes.
pub trait CtcRegs {
    /// Put the timer in clear-on-compare-match mode with the compare output
    /// set to toggle, output disconnected from the pin, counter stopped.
    fn configure(&mut self);
    /// Write the compare (TOP) register.
    fn set_top(&mut self, top: u16);
    /// Select the prescaler; the counter starts advancing.
    fn set_prescaler(&mut self, prescaler: u32);
    /// Route the compare output to the pin.
    fn connect_output(&mut self);
    /// Detach the compare output from the pin.
    fn disconnect_output(&mut self);
    /// Clear the prescaler selection so the counter stops.
    fn stop_clock(&mut self);
    /// Drive the pin low through plain GPIO.
    fn force_pin_low(&mut self);
}

/// Square-wave driver over one compare-toggle timer.
pub struct CtcToggle<R: CtcRegs> {
    regs: R,
    f_cpu: u32,
    width: TimerWidth,
}

impl<R: CtcRegs> CtcToggle<R> {
    pub fn new(regs: R, f_cpu: u32, width: TimerWidth) -> Self {
        Self { regs, f_cpu, width }
    }

    /// Mode setup; leaves the output disconnected and the pin low.
    pub fn init(&mut self) {
        self.regs.configure();
        self.regs.disconnect_output();
        self.regs.force_pin_low();
    }

    /// Start (or retune) the square wave at `hz`. Returns the selection that
    /// was applied.
    pub fn set_frequency(&mut self, hz: u32) -> CtcParams {
        let params = CtcParams::pick(self.f_cpu, hz, self.width);
        self.regs.set_top(params.top);
        self.regs.connect_output();
        self.regs.set_prescaler(params.prescaler);
        params
    }

    /// Stop the wave and park the pin low.
    pub fn stop(&mut self) {
        self.regs.stop_clock();
        self.regs.disconnect_output();
        self.regs.force_pin_low();
    }
}
