//! Pulse engine on a PIO state machine.
//!
//! The machine executes a two-word command protocol: for each `(duty,
//! steps)` pair it drives STEP high for `duty + 1` cycles, low for `duty +
//! 1` cycles, `steps` times over, then pulls the next pair. Pairs arrive
//! either one at a time over the TX FIFO (command mode) or streamed out of
//! memory by a DMA channel paced on the FIFO's DREQ (stream mode).
//!
//! Termination: the machine guards on the duty word alone and parks back
//! at the blocking `pull` for the *first* zero-duty pair it loads, whatever
//! the paired steps word says (the steps register is not even read at that
//! point). The canonical spelling of the terminator is the `(0, 0)` pair,
//! and [`stream_well_formed`] is how the arbiter holds callers to it, so a
//! stray zero duty mid-stream cannot silently truncate a move.

/// Machine code for the pulse program. `set`-pins must map to the STEP pin;
/// in/out/side-set pins go unused.
///
/// Steady-state cost per step is `2 * duty + PIO_OVERHEAD_CYCLES` system
/// clocks: the two hold loops burn `duty + 1` cycles each, the five
/// bookkeeping instructions the rest.
pub const PULSE_PROGRAM: [u16; 15] = [
    0x80A0, //  0: pull block       ; duty -> OSR
    0x60C0, //  1: out isr, 32      ; stash duty in ISR
    0x80A0, //  2: pull block       ; steps -> OSR
    0x6040, //  3: out y, 32        ; steps -> Y
    0xA026, //  4: mov x, isr
    0x0020, //  5: jmp !x, 0        ; zero duty: stream over, wait at pull
    //        (the guard never looks at Y; well-formed streams keep zero
    //         duty out of every pair but the final marker)
    0x0088, //  6: jmp y--, 8       ; arm the first step
    0x0000, //  7: jmp 0            ; steps 0: nothing to emit
    0xA026, //  8: mov x, isr       ; per-step loop
    0xE001, //  9: set pins, 1
    0x004A, // 10: jmp x--, 10      ; high hold
    0xA026, // 11: mov x, isr
    0xE000, // 12: set pins, 0
    0x004D, // 13: jmp x--, 13      ; low hold
    0x0088, // 14: jmp y--, 8       ; next step; falls through when done
];

/// Wrap range of the program (program-relative addresses).
pub const WRAP_SOURCE: u8 = 14;
pub const WRAP_TARGET: u8 = 0;

/// Terminator pair appended to every stream.
pub const END_MARKER: [u32; 2] = [0, 0];

/// Whether a word stream honors the program's termination contract: whole
/// pairs, a final `(0, 0)` marker, and no zero-duty pair anywhere else.
/// The machine parks at the first zero duty it loads, so anything else
/// would end the stream early while the arbiter still counts down.
pub fn stream_well_formed(words: &[u32]) -> bool {
    if words.len() < 2 || words.len() % 2 != 0 {
        return false;
    }
    let (body, marker) = words.split_at(words.len() - 2);
    marker[0] == 0 && marker[1] == 0 && body.chunks_exact(2).all(|pair| pair[0] != 0)
}

/// One-shot `set pins, 0`, injected through SMx_INSTR to force the STEP
/// line low during the reset protocol.
pub const INSTR_SET_PINS_LOW: u16 = 0xE000;
/// One-shot `set pindirs, 1`, injected once at configuration.
pub const INSTR_SET_PINDIR_OUT: u16 = 0xE081;

cfg_if::cfg_if! {
    if #[cfg(feature = "rp2040")] {

use core::sync::atomic::{AtomicU16, AtomicU8, Ordering};

use rp2040_pac as pac;

use super::rp2040::park_low;
use super::StartError;

const UNLOADED: u8 = 0xFF;

// Loaded-program offset per PIO instance; program memory is shared, so the
// loader runs at most once per instance.
const NOT_LOADED: AtomicU8 = AtomicU8::new(UNLOADED);
static PROGRAM_OFFSET: [AtomicU8; 2] = [NOT_LOADED; 2];

// Claimed DMA channels, one bit per channel.
static DMA_CLAIMED: AtomicU16 = AtomicU16::new(0);

/// One state machine slot on one PIO instance. Each motor owns exactly one
/// slot, so two arbiters can never touch the same machine.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PioSlot {
    pub pio: u8,
    pub sm: u8,
}

impl PioSlot {
    fn block(self) -> &'static pac::pio0::RegisterBlock {
        unsafe {
            if self.pio == 0 {
                &*pac::PIO0::ptr()
            } else {
                &*pac::PIO1::ptr()
            }
        }
    }

    fn sm_regs(self) -> &'static pac::pio0::SM {
        &self.block().sm[self.sm as usize]
    }
}

/// Load the pulse program into an instance's shared instruction memory.
/// Idempotent; returns the load offset.
pub fn ensure_loaded(pio: u8) -> u8 {
    let idx = (pio & 1) as usize;
    let offset = PROGRAM_OFFSET[idx].load(Ordering::Relaxed);
    if offset != UNLOADED {
        return offset;
    }
    let block = PioSlot { pio, sm: 0 }.block();
    for (i, instr) in PULSE_PROGRAM.iter().enumerate() {
        block.instr_mem[i].write(|w| unsafe { w.bits(*instr as u32) });
    }
    PROGRAM_OFFSET[idx].store(0, Ordering::Relaxed);
    0
}

pub fn set_enabled(slot: PioSlot, on: bool) {
    let block = slot.block();
    let bits = block.ctrl.read().sm_enable().bits();
    let bits = if on {
        bits | 1 << slot.sm
    } else {
        bits & !(1 << slot.sm)
    };
    block.ctrl.write(|w| unsafe { w.sm_enable().bits(bits) });
}

fn restart(slot: PioSlot) {
    let block = slot.block();
    block
        .ctrl
        .write(|w| unsafe { w.sm_restart().bits(1 << slot.sm) });
}

fn clear_fifos(slot: PioSlot) {
    // toggling FJOIN_RX drops the contents of both FIFOs
    let sm = slot.sm_regs();
    sm.sm_shiftctrl.modify(|_, w| w.fjoin_rx().set_bit());
    sm.sm_shiftctrl.modify(|_, w| w.fjoin_rx().clear_bit());
}

fn exec(slot: PioSlot, instr: u16) {
    slot.sm_regs()
        .sm_instr
        .write(|w| unsafe { w.sm0_instr().bits(instr) });
}

/// Bind a state machine to its STEP pin and the loaded program. Leaves the
/// machine disabled with its program counter at the pull.
pub fn configure(slot: PioSlot, step_pin: u8) {
    let offset = ensure_loaded(slot.pio);
    set_enabled(slot, false);
    let sm = slot.sm_regs();
    sm.sm_clkdiv.write(|w| unsafe {
        w.int().bits(1);
        w.frac().bits(0);
        w
    });
    sm.sm_execctrl.write(|w| unsafe {
        w.wrap_top().bits(offset + WRAP_SOURCE);
        w.wrap_bottom().bits(offset + WRAP_TARGET);
        w
    });
    sm.sm_shiftctrl.write(|w| {
        w.autopull().clear_bit();
        w.autopush().clear_bit();
        w.out_shiftdir().set_bit();
        w.in_shiftdir().set_bit();
        w
    });
    sm.sm_pinctrl.write(|w| unsafe {
        w.set_base().bits(step_pin);
        w.set_count().bits(1);
        w
    });
    exec(slot, INSTR_SET_PINDIR_OUT);
    exec(slot, 0x0000 | offset as u16); // jmp to program start
}

/// Reset protocol run before every new command (and for termination).
/// Skipping any step here shows up as ghost pulses or a stuck-high STEP:
/// disable, drop both FIFOs, restart (clears PC/X/Y/ISR/OSR), force the pin
/// low through SIO *and* a one-shot `set pins, 0`, re-point at the pull.
pub fn reset(slot: PioSlot, step_pin: u8) {
    set_enabled(slot, false);
    clear_fifos(slot);
    restart(slot);
    park_low(step_pin);
    exec(slot, INSTR_SET_PINS_LOW);
    let offset = PROGRAM_OFFSET[(slot.pio & 1) as usize].load(Ordering::Relaxed);
    if offset != UNLOADED {
        exec(slot, 0x0000 | offset as u16);
    }
}

/// Push one `(duty, steps)` pair over the TX FIFO. Blocks while the FIFO is
/// full; it drains in microseconds.
pub fn push_pair(slot: PioSlot, duty: u32, steps: u32) {
    let block = slot.block();
    let full_mask = 1 << slot.sm;
    for word in [duty, steps] {
        while block.fstat.read().txfull().bits() & full_mask != 0 {}
        block.txf[slot.sm as usize].write(|w| unsafe { w.bits(word) });
    }
}

fn claim_dma_channel() -> Option<u8> {
    cortex_m::interrupt::free(|_| {
        let dma = unsafe { &*pac::DMA::ptr() };
        let claimed = DMA_CLAIMED.load(Ordering::Relaxed);
        for ch in 0..12u8 {
            if claimed & (1 << ch) != 0 {
                continue;
            }
            if dma.ch[ch as usize].ch_ctrl_trig.read().busy().bit_is_set() {
                continue;
            }
            DMA_CLAIMED.store(claimed | 1 << ch, Ordering::Relaxed);
            return Some(ch);
        }
        None
    })
}

/// Abort and hand back a channel claimed by `start_stream`.
pub fn release_dma_channel(ch: u8) {
    let dma = unsafe { &*pac::DMA::ptr() };
    dma.chan_abort.write(|w| unsafe { w.bits(1 << ch) });
    while dma.chan_abort.read().bits() != 0 {}
    cortex_m::interrupt::free(|_| {
        let claimed = DMA_CLAIMED.load(Ordering::Relaxed);
        DMA_CLAIMED.store(claimed & !(1 << ch), Ordering::Relaxed);
    });
}

/// Point a free DMA channel at the TX FIFO and let the machine's DREQ pace
/// it through `words`. Returns the claimed channel.
pub fn start_stream(slot: PioSlot, words: &'static [u32]) -> Result<u8, StartError> {
    let ch_index = claim_dma_channel().ok_or(StartError::DmaBusy)?;
    let dma = unsafe { &*pac::DMA::ptr() };
    let ch = &dma.ch[ch_index as usize];
    let treq = if slot.pio == 0 { slot.sm } else { 8 + slot.sm };
    let txf = &slot.block().txf[slot.sm as usize] as *const _ as u32;

    ch.ch_read_addr
        .write(|w| unsafe { w.bits(words.as_ptr() as u32) });
    ch.ch_write_addr.write(|w| unsafe { w.bits(txf) });
    ch.ch_trans_count
        .write(|w| unsafe { w.bits(words.len() as u32) });
    ch.ch_ctrl_trig.write(|w| unsafe {
        w.treq_sel().bits(treq);
        w.chain_to().bits(ch_index);
        w.data_size().bits(2); // 32-bit transfers
        w.incr_read().set_bit();
        w.incr_write().clear_bit();
        w.en().set_bit();
        w
    });
    Ok(ch_index)
}

    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_word_accounting_matches_the_overhead_constant() {
        // Per step: mov + set + (duty + 1) + mov + set + (duty + 1) + jmp.
        // The five bookkeeping words plus the two loop exits are the
        // per-period overhead baked into the timing helpers.
        let per_step_bookkeeping = 5;
        let loop_exits = 2;
        assert_eq!(
            per_step_bookkeeping + loop_exits,
            crate::timing::PIO_OVERHEAD_CYCLES
        );
    }

    #[test]
    fn program_fits_one_instruction_memory_bank() {
        assert!(PULSE_PROGRAM.len() <= 32);
        assert_eq!(WRAP_SOURCE as usize, PULSE_PROGRAM.len() - 1);
        assert_eq!(WRAP_TARGET, 0);
    }

    #[test]
    fn end_marker_is_the_zero_pair() {
        assert_eq!(END_MARKER, [0, 0]);
        // the jmp !x guard that honors it sits right after the pair loads
        assert_eq!(PULSE_PROGRAM[5], 0x0020);
    }

    #[test]
    fn well_formedness_tracks_the_zero_duty_guard() {
        assert!(stream_well_formed(&END_MARKER));
        assert!(stream_well_formed(&[100, 10, 0, 0]));
        assert!(stream_well_formed(&[100, 10, 200, 0, 0, 0]));
        // the machine would park at the early zero-duty pair
        assert!(!stream_well_formed(&[100, 10, 0, 5, 0, 0]));
        // a (0, steps) tail is not the marker
        assert!(!stream_well_formed(&[100, 10, 0, 5]));
        // no terminator at all
        assert!(!stream_well_formed(&[100, 10]));
        // ragged
        assert!(!stream_well_formed(&[100, 10, 0]));
        assert!(!stream_well_formed(&[]));
    }
}
