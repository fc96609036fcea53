//! Per-motor command arbiter.
//!
//! Each motor is owned by one [`StepperMotor`], which mediates between the
//! incoming command stream and the waveform engines. It keeps a two-slot
//! state pair: the current command (with its deadline) and the completion
//! reason of the last one. Any new command first lets a naturally-complete
//! command settle, then tears down whatever is still running before arming
//! the hardware. Commands take effect strictly in arrival order, and a
//! superseded command is reported as interrupted, never lost.
//!
//! The waveform side of completion is handled by the counted engines
//! themselves (wrap IRQ, stream exhaustion); `update()` only reflects the
//! time-based truth into the slots, except for free-running square waves,
//! which it also tears down at their deadline.

use embedded_hal::digital::OutputPin;

use crate::backends::pio::stream_well_formed;
use crate::backends::{BackendKind, PulseBackend, StartError};
use crate::timing::{duration_to_steps, steps_to_micros, Micros};

/// How the previous command on a motor ended.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Completion {
    /// Ran to its natural end (deadline or pulse count).
    Completed,
    /// Superseded by a newer command on the same motor.
    Interrupted,
    /// Explicitly stopped.
    Stopped,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum RunState {
    Empty,
    Running {
        t_end: Micros,
        /// Free-running engines have no self-terminating hardware; expiry
        /// must tear them down instead of merely recording it.
        deadline_stops_hardware: bool,
    },
}

/// Placeholder for an absent ENABLE line.
pub struct NoPin;

impl embedded_hal::digital::ErrorType for NoPin {
    type Error = core::convert::Infallible;
}

impl OutputPin for NoPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// One motor: STEP waveform engines behind `B`, DIR and optional ENABLE
/// lines, and the two-slot command state.
pub struct StepperMotor<B, D, E = NoPin> {
    backend: B,
    dir: D,
    enable_pin: Option<E>,
    dir_invert: bool,
    enable_invert: bool,
    current: RunState,
    last: Completion,
}

impl<B, D, E> StepperMotor<B, D, E>
where
    B: PulseBackend,
    D: OutputPin,
    E: OutputPin,
{
    pub fn new(backend: B, dir: D, enable_pin: Option<E>) -> Self {
        Self {
            backend,
            dir,
            enable_pin,
            dir_invert: false,
            enable_invert: false,
            current: RunState::Empty,
            last: Completion::Completed,
        }
    }

    /// Flip the DIR sense for mirrored mechanics.
    pub fn with_dir_invert(mut self, invert: bool) -> Self {
        self.dir_invert = invert;
        self
    }

    /// Treat the ENABLE line as active-low.
    pub fn with_enable_invert(mut self, invert: bool) -> Self {
        self.enable_invert = invert;
        self
    }

    /// Park the STEP line, set a known direction, and leave the driver
    /// disabled. The backend's own one-time bring-up happens before this.
    pub fn init(&mut self) {
        self.backend.park_low();
        self.set_direction(false);
        self.disable();
        self.current = RunState::Empty;
        self.last = Completion::Completed;
    }

    /// Power up the driver stage.
    pub fn enable(&mut self) {
        if let Some(pin) = self.enable_pin.as_mut() {
            if self.enable_invert {
                pin.set_low().ok();
            } else {
                pin.set_high().ok();
            }
        }
    }

    pub fn disable(&mut self) {
        if let Some(pin) = self.enable_pin.as_mut() {
            if self.enable_invert {
                pin.set_high().ok();
            } else {
                pin.set_low().ok();
            }
        }
    }

    /// Drive DIR for the given sense.
    pub fn set_direction(&mut self, forward: bool) {
        if forward ^ self.dir_invert {
            self.dir.set_high().ok();
        } else {
            self.dir.set_low().ok();
        }
    }

    /// Settle natural completion, then clear out anything still running.
    fn arbitrate(&mut self, now: Micros) {
        self.update(now);
        if matches!(self.current, RunState::Running { .. }) {
            self.backend.stop();
            self.last = Completion::Interrupted;
            self.current = RunState::Empty;
        }
    }

    fn settle_noop(&mut self) {
        self.last = Completion::Completed;
        self.current = RunState::Empty;
        // clears the engine tracker and leaves STEP parked low
        self.backend.stop();
    }

    /// Run `steps` pulses at `hz` on the selected engine. A zero pulse
    /// count or frequency is a successful no-op.
    pub fn run_steps(
        &mut self,
        now: Micros,
        steps: u32,
        hz: u32,
        kind: BackendKind,
    ) -> Result<(), StartError> {
        self.arbitrate(now);
        if steps == 0 || hz == 0 {
            self.settle_noop();
            return Ok(());
        }
        match self.backend.start(kind, hz, steps) {
            Ok(()) => {
                self.current = RunState::Running {
                    t_end: now.deadline_after(steps_to_micros(steps, hz)),
                    deadline_stops_hardware: kind == BackendKind::Timer,
                };
                Ok(())
            }
            Err(e) => {
                self.settle_noop();
                Err(e)
            }
        }
    }

    /// Run at `hz` for `ms` milliseconds: the step-count equivalent.
    pub fn run_velocity(
        &mut self,
        now: Micros,
        hz: u32,
        ms: u32,
        kind: BackendKind,
    ) -> Result<(), StartError> {
        let steps = duration_to_steps(ms as f32 / 1_000.0, hz);
        self.run_steps(now, steps, hz, kind)
    }

    /// Stream a pre-built `(duty, steps)` word array through the DMA-fed
    /// pulse engine. `est_micros` is the caller's estimate of the stream
    /// duration and becomes the deadline. When no DMA channel is free, or
    /// the words break the termination contract (the engine parks at the
    /// first zero-duty pair, so only the final `(0, 0)` marker may carry
    /// one), the command is dropped (slot settles as completed) and the
    /// error is surfaced.
    pub fn run_stream(
        &mut self,
        now: Micros,
        words: &'static [u32],
        est_micros: u32,
    ) -> Result<(), StartError> {
        self.arbitrate(now);
        if !stream_well_formed(words) {
            self.settle_noop();
            return Err(StartError::MalformedStream);
        }
        if words.len() <= 2 {
            // nothing but the end marker
            self.settle_noop();
            return Ok(());
        }
        match self.backend.start_stream(words) {
            Ok(()) => {
                self.current = RunState::Running {
                    t_end: now.deadline_after(est_micros),
                    deadline_stops_hardware: false,
                };
                Ok(())
            }
            Err(e) => {
                self.settle_noop();
                Err(e)
            }
        }
    }

    /// Immediate hardware termination.
    pub fn stop(&mut self, now: Micros) {
        self.update(now);
        if matches!(self.current, RunState::Running { .. }) {
            self.backend.stop();
            self.last = Completion::Stopped;
            self.current = RunState::Empty;
        } else {
            self.backend.park_low();
        }
    }

    /// Reflect natural expiry into the slot pair. The counted engines end
    /// their own waveform (wrap IRQ, stream exhaustion) and only the state
    /// moves here; a deadline-bounded square wave is also torn down.
    pub fn update(&mut self, now: Micros) {
        if let RunState::Running {
            t_end,
            deadline_stops_hardware,
        } = self.current
        {
            if t_end.reached_by(now) {
                if deadline_stops_hardware {
                    self.backend.stop();
                }
                self.last = Completion::Completed;
                self.current = RunState::Empty;
            }
        }
    }

    /// Whether a command is still running.
    pub fn busy(&mut self, now: Micros) -> bool {
        self.update(now);
        matches!(self.current, RunState::Running { .. })
    }

    /// How the most recently finished command ended.
    pub fn last_completion(&mut self, now: Micros) -> Completion {
        self.update(now);
        self.last
    }
}
