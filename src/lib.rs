#![cfg_attr(not(test), no_std)]

//! Motion execution for a mmWave SAR rail positioner.
//!
//! Converts externally issued motion commands (time-bounded or
//! step-count-bounded) into precisely timed STEP/DIR waveforms for
//! DM542-class stepper drivers. A command arbiter owns each motor and
//! delegates the waveform to one of several hardware engines: a plain
//! timer square wave, a PWM slice counting wrap interrupts, or a PIO
//! state machine fed (duty, steps) pairs over its FIFO or by DMA.
//!
//! Everything that is not a register poke is `no_std`-pure and shared with
//! the host-side trajectory engine, which replays the same command stream
//! in software. Register-level RP2040 code lives behind the `rp2040`
//! feature.

pub mod backends;
pub mod motor;
pub mod protocols;
pub mod scurve;
pub mod timing;
