//! Waveform generation engines the arbiter can place a motor on.
//!
//! A STEP pin is owned by exactly one function at a time (plain GPIO, a PWM
//! slice, or a PIO state machine). Ownership moves only through the old
//! owner's stop routine, and every engine leaves the pin LOW on exit.

pub mod ctc;
pub mod pio;
pub mod pwm;

cfg_if::cfg_if! {
    if #[cfg(feature = "rp2040")] {
        pub mod rp2040;
    }
}

/// Engine selection for step-bounded motion.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BackendKind {
    /// Free-running square wave; the arbiter ends it by deadline.
    Timer,
    /// PWM slice; a shared wrap IRQ counts pulses and halts after N.
    Pwm,
    /// Pulse state machine fed a single (duty, steps) pair over its FIFO.
    PioCommand,
}

/// Why a command could not be armed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StartError {
    /// No free DMA channel for a streamed command.
    DmaBusy,
    /// Stream words violate the pulse engine's termination contract
    /// (see [`pio::stream_well_formed`]).
    MalformedStream,
}

/// Contract between the arbiter and a concrete waveform engine.
///
/// Implementations never block beyond a bounded FIFO put, and guarantee the
/// STEP line idles LOW on every exit path (completion, stop, and error).
pub trait PulseBackend {
    /// Arm a step-bounded pulse train on the selected engine.
    fn start(&mut self, kind: BackendKind, hz: u32, steps: u32) -> Result<(), StartError>;

    /// Arm a DMA-fed stream of packed `(duty, steps)` words terminated by
    /// the `(0, 0)` marker. The words must stay resident while the stream
    /// runs, and must satisfy [`pio::stream_well_formed`]; the arbiter
    /// checks this before the call.
    fn start_stream(&mut self, words: &'static [u32]) -> Result<(), StartError>;

    /// Immediate hardware termination of whatever is running.
    fn stop(&mut self);

    /// Reclaim the STEP pin from any engine and drive it low.
    fn park_low(&mut self);
}
