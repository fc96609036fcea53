//! RP2040 glue: pin-mux ownership transfer, SIO pins for the static motor
//! lines, and the composite per-motor waveform channel the arbiter drives.

use rp2040_pac as pac;

use super::pio::{self, PioSlot};
use super::{pwm, BackendKind, PulseBackend, StartError};
use crate::timing::hz_to_duty;

pub(crate) const FUNCSEL_PWM: u8 = 4;
const FUNCSEL_SIO: u8 = 5;
const FUNCSEL_PIO0: u8 = 6;
const FUNCSEL_PIO1: u8 = 7;

/// Hand a pin to the given peripheral function.
pub fn set_function(pin: u8, funcsel: u8) {
    let io = unsafe { &*pac::IO_BANK0::ptr() };
    io.gpio[pin as usize]
        .gpio_ctrl
        .write(|w| unsafe { w.funcsel().bits(funcsel) });
}

/// Reclaim a pin for plain GPIO and drive it low. A disabled PWM slice or
/// halted state machine leaves the output level indeterminate; SIO
/// ownership does not.
pub fn park_low(pin: u8) {
    let sio = unsafe { &*pac::SIO::ptr() };
    sio.gpio_out_clr.write(|w| unsafe { w.bits(1 << pin) });
    sio.gpio_oe_set.write(|w| unsafe { w.bits(1 << pin) });
    set_function(pin, FUNCSEL_SIO);
}

/// SIO-driven output for the slow motor lines (DIR, ENABLE).
pub struct SioPin {
    pin: u8,
}

impl SioPin {
    /// Take the pin as a plain output, starting low.
    pub fn new(pin: u8) -> Self {
        park_low(pin);
        Self { pin }
    }
}

impl embedded_hal::digital::ErrorType for SioPin {
    type Error = core::convert::Infallible;
}

impl embedded_hal::digital::OutputPin for SioPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        let sio = unsafe { &*pac::SIO::ptr() };
        sio.gpio_out_clr.write(|w| unsafe { w.bits(1 << self.pin) });
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let sio = unsafe { &*pac::SIO::ptr() };
        sio.gpio_out_set.write(|w| unsafe { w.bits(1 << self.pin) });
        Ok(())
    }
}

/// What currently holds (or last held) the STEP pin.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ActiveWave {
    Timer,
    Pwm,
    PioCommand,
    PioStream { dma_ch: u8 },
}

/// Composite waveform channel for one motor: a PWM slice and one PIO state
/// machine slot, multiplexed onto a single STEP pin. Implements the
/// arbiter-facing [`PulseBackend`] contract.
pub struct StepChannel {
    step_pin: u8,
    slot: PioSlot,
    f_sys: u32,
    active: Option<ActiveWave>,
}

impl StepChannel {
    pub fn new(step_pin: u8, pio_index: u8, sm: u8, f_sys: u32) -> Self {
        Self {
            step_pin,
            slot: PioSlot {
                pio: pio_index,
                sm,
            },
            f_sys,
            active: None,
        }
    }

    /// One-time bring-up: program load, state machine binding (left
    /// disabled), wrap-IRQ install, STEP parked low.
    pub fn init(&mut self) {
        pwm::init(self.step_pin);
        pio::configure(self.slot, self.step_pin);
        park_low(self.step_pin);
        self.active = None;
    }

    fn funcsel_pio(&self) -> u8 {
        if self.slot.pio == 0 {
            FUNCSEL_PIO0
        } else {
            FUNCSEL_PIO1
        }
    }
}

impl PulseBackend for StepChannel {
    fn start(&mut self, kind: BackendKind, hz: u32, steps: u32) -> Result<(), StartError> {
        // route through the old owner's stop path before the pin moves
        self.stop();
        match kind {
            BackendKind::Timer => {
                pwm::run_free(self.step_pin, self.f_sys, hz);
                self.active = Some(ActiveWave::Timer);
            }
            BackendKind::Pwm => {
                pwm::run(self.step_pin, self.f_sys, hz, steps);
                self.active = Some(ActiveWave::Pwm);
            }
            BackendKind::PioCommand => {
                pio::reset(self.slot, self.step_pin);
                pio::push_pair(self.slot, hz_to_duty(self.f_sys, hz), steps);
                set_function(self.step_pin, self.funcsel_pio());
                pio::set_enabled(self.slot, true);
                self.active = Some(ActiveWave::PioCommand);
            }
        }
        Ok(())
    }

    fn start_stream(&mut self, words: &'static [u32]) -> Result<(), StartError> {
        self.stop();
        pio::reset(self.slot, self.step_pin);
        let dma_ch = match pio::start_stream(self.slot, words) {
            Ok(ch) => ch,
            Err(e) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("no DMA channel free; stream command dropped");
                return Err(e);
            }
        };
        set_function(self.step_pin, self.funcsel_pio());
        pio::set_enabled(self.slot, true);
        self.active = Some(ActiveWave::PioStream { dma_ch });
        Ok(())
    }

    fn stop(&mut self) {
        match self.active.take() {
            Some(ActiveWave::Timer) | Some(ActiveWave::Pwm) => pwm::stop(self.step_pin),
            Some(ActiveWave::PioCommand) => pio::reset(self.slot, self.step_pin),
            Some(ActiveWave::PioStream { dma_ch }) => {
                pio::release_dma_channel(dma_ch);
                pio::reset(self.slot, self.step_pin);
            }
            None => park_low(self.step_pin),
        }
    }

    fn park_low(&mut self) {
        park_low(self.step_pin);
    }
}
