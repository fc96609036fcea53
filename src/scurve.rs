//! S-curve profile generator for the streamed pulse engine.
//!
//! Produces the flat `(duty, steps)` word stream a DMA channel feeds to the
//! pulse state machine: a bell-weighted acceleration ramp, an optional
//! cruise chunk, the ramp reversed, and the terminating `(0, 0)` pair.
//! Pure compute; the caller owns the buffer for the lifetime of the stream.

use num_traits::Float;

use crate::timing::hz_to_duty;

/// Most segments emitted per ramp side.
pub const MAX_RAMP_SEGMENTS: usize = 32;

/// Upper bound on the words one profile can occupy: two ramps of
/// `MAX_RAMP_SEGMENTS` pairs, one cruise pair, and the end marker.
pub const MAX_PROFILE_WORDS: usize = MAX_RAMP_SEGMENTS * 4 + 4;

/// Bell weight at the mid-point of ramp slice `i` of `m`.
fn bell(i: usize, m: usize) -> f32 {
    let u = (i as f32 + 0.5) / m as f32;
    6.0 * u * (1.0 - u)
}

/// Build the word stream for one motion of `total_steps` pulses peaking at
/// `v_max` Hz, with `ramp_steps` nominally spent in each ramp. Returns the
/// number of words written, end marker included.
///
/// Short strokes (`total_steps <= 2 * ramp_steps`) shrink the ramps to half
/// the move and scale every speed, the cruise chunk's included, by the same
/// ratio so the profile keeps its shape instead of clipping.
pub fn plan_profile(
    f_sys: u32,
    v_max: u32,
    total_steps: u32,
    ramp_steps: u32,
    out: &mut [u32; MAX_PROFILE_WORDS],
) -> usize {
    let mut n = 0usize;

    if total_steps > 0 && v_max > 0 {
        let (ramp, alpha) = if ramp_steps == 0 {
            (0, 1.0f32)
        } else if total_steps <= 2 * ramp_steps {
            let r = total_steps / 2;
            (r, r as f32 / ramp_steps as f32)
        } else {
            (ramp_steps, 1.0)
        };
        let cruise = total_steps - 2 * ramp;

        let m = (ramp as usize).min(MAX_RAMP_SEGMENTS);
        let mut counts = [0u32; MAX_RAMP_SEGMENTS];
        let mut speeds = [0u32; MAX_RAMP_SEGMENTS];

        if m > 0 {
            let mut weight_sum = 0.0f32;
            for i in 0..m {
                weight_sum += bell(i, m);
            }

            // Allocate ramp steps proportionally to the weights: floor every
            // slice, then hand the leftovers to the largest remainders until
            // the ramp total is exact.
            let mut remainders = [0.0f32; MAX_RAMP_SEGMENTS];
            let mut allocated = 0u32;
            for i in 0..m {
                let exact = ramp as f32 * bell(i, m) / weight_sum;
                let floor = exact.floor();
                counts[i] = floor as u32;
                remainders[i] = exact - floor;
                allocated += counts[i];
            }
            let mut leftover = ramp - allocated;
            while leftover > 0 {
                let mut best = 0;
                for i in 1..m {
                    if remainders[i] > remainders[best] {
                        best = i;
                    }
                }
                counts[best] += 1;
                remainders[best] = -1.0;
                leftover -= 1;
            }

            for i in 0..m {
                let v = (v_max as f32 * alpha * bell(i, m)).round();
                speeds[i] = if v < 1.0 { 1 } else { v as u32 };
            }
        }

        // acceleration
        for i in 0..m {
            if counts[i] == 0 {
                continue;
            }
            out[n] = hz_to_duty(f_sys, speeds[i]);
            out[n + 1] = counts[i];
            n += 2;
        }
        // cruise (also carries the odd leftover step of short strokes, at
        // the scaled peak so a slowed move stays slow)
        if cruise > 0 {
            let cruise_hz = (v_max as f32 * alpha).round();
            let cruise_hz = if cruise_hz < 1.0 { 1 } else { cruise_hz as u32 };
            out[n] = hz_to_duty(f_sys, cruise_hz);
            out[n + 1] = cruise;
            n += 2;
        }
        // deceleration: the acceleration ramp reversed
        for i in (0..m).rev() {
            if counts[i] == 0 {
                continue;
            }
            out[n] = hz_to_duty(f_sys, speeds[i]);
            out[n + 1] = counts[i];
            n += 2;
        }
    }

    out[n] = 0;
    out[n + 1] = 0;
    n + 2
}

/// Wall-clock estimate for a planned word stream, in microseconds. This is
/// what the arbiter wants as the stream deadline.
pub fn profile_micros(f_sys: u32, words: &[u32]) -> u32 {
    let mut cycles: u64 = 0;
    for pair in words.chunks_exact(2) {
        let (duty, steps) = (pair[0] as u64, pair[1] as u64);
        if duty == 0 {
            break;
        }
        cycles += steps * (2 * duty + crate::timing::PIO_OVERHEAD_CYCLES as u64);
    }
    let us = (cycles * 1_000_000 + f_sys as u64 / 2) / f_sys as u64;
    us.min(i32::MAX as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    const F_SYS: u32 = 125_000_000;

    fn emitted_steps(words: &[u32]) -> u32 {
        words.chunks(2).map(|pair| pair[1]).sum()
    }

    #[test]
    fn conserves_steps_and_terminates() {
        for total in [1, 2, 10, 199, 1_000, 64_000] {
            let mut out = [0u32; MAX_PROFILE_WORDS];
            let n = plan_profile(F_SYS, 2_000, total, 400, &mut out);
            assert!(n >= 2 && n % 2 == 0);
            assert_eq!(&out[n - 2..n], &[0, 0], "total={total}");
            assert_eq!(emitted_steps(&out[..n - 2]), total, "total={total}");
        }
    }

    #[test]
    fn long_move_has_a_cruise_chunk_at_v_max() {
        let mut out = [0u32; MAX_PROFILE_WORDS];
        let n = plan_profile(F_SYS, 2_000, 10_000, 400, &mut out);
        let cruise_duty = hz_to_duty(F_SYS, 2_000);
        let pairs: Vec<_> = out[..n - 2].chunks(2).collect();
        let cruise: Vec<_> = pairs.iter().filter(|p| p[0] == cruise_duty).collect();
        assert_eq!(cruise.len(), 1);
        assert_eq!(cruise[0][1], 10_000 - 2 * 400);
    }

    #[test]
    fn profile_is_symmetric_around_the_cruise() {
        let mut out = [0u32; MAX_PROFILE_WORDS];
        let n = plan_profile(F_SYS, 2_000, 10_000, 400, &mut out);
        let pairs: Vec<_> = out[..n - 2].chunks(2).collect();
        let ramp = (pairs.len() - 1) / 2;
        for i in 0..ramp {
            assert_eq!(pairs[i], pairs[pairs.len() - 1 - i]);
        }
    }

    #[test]
    fn short_stroke_shrinks_the_ramp_and_the_peak() {
        // 100/101 steps against a nominal 400-step ramp: alpha = 50/400.
        // The odd total leaves one leftover cruise pulse, which must obey
        // the scaled ceiling like every ramp segment.
        for total in [100u32, 101] {
            let mut out = [0u32; MAX_PROFILE_WORDS];
            let n = plan_profile(F_SYS, 2_000, total, 400, &mut out);
            assert_eq!(emitted_steps(&out[..n - 2]), total, "total={total}");
            let alpha = 50.0 / 400.0;
            let ceiling = (2_000.0 * alpha * 1.5).round() as u32 + 1;
            for pair in out[..n - 2].chunks(2) {
                let hz_approx = F_SYS / (2 * pair[0] + crate::timing::PIO_OVERHEAD_CYCLES);
                assert!(
                    hz_approx <= ceiling,
                    "total={total} segment speed {hz_approx} over {ceiling}"
                );
            }
        }
    }

    #[test]
    fn degenerate_inputs_emit_only_the_end_marker() {
        let mut out = [0u32; MAX_PROFILE_WORDS];
        assert_eq!(plan_profile(F_SYS, 2_000, 0, 400, &mut out), 2);
        assert_eq!(&out[..2], &[0, 0]);
        assert_eq!(plan_profile(F_SYS, 0, 100, 400, &mut out), 2);
    }

    #[test]
    fn profile_micros_matches_the_per_step_cost() {
        // 200 steps at a constant 800 Hz is 0.25 s, within rounding
        let mut out = [0u32; MAX_PROFILE_WORDS];
        let n = plan_profile(F_SYS, 800, 200, 0, &mut out);
        let us = profile_micros(F_SYS, &out[..n]);
        assert!((us as i64 - 250_000).abs() < 100, "us={us}");
    }

    #[test]
    fn zero_ramp_is_all_cruise() {
        let mut out = [0u32; MAX_PROFILE_WORDS];
        let n = plan_profile(F_SYS, 800, 200, 0, &mut out);
        assert_eq!(n, 4);
        assert_eq!(out[0], hz_to_duty(F_SYS, 800));
        assert_eq!(out[1], 200);
    }
}
