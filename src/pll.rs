/*
    FluxFox FDC
    https://github.com/dbalsom/fluxfox

    Copyright 2024-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------
*/

//! An incremental software PLL recovering (and generating) bit timing one
//! cell at a time against a drive's flux transition stream.
//!
//! The read side samples the stream at the phase-adjusted cell period: a
//! transition before the sampling instant yields a 1 bit, none yields 0. On
//! each transition the deviation from the ideal mid-cell position drives an
//! immediate 65% phase correction, and - once two consecutive corrections
//! agree in direction - a frequency nudge of the free-running period, clamped
//! to ±25% of nominal. The write side runs at the uncorrected period and
//! buffers a mid-cell transition timestamp per 1 bit; [`FluxPll::commit`]
//! flushes the buffer into the drive exactly once per checkpoint, which is
//! what makes the live engine's rollback/replay scheme safe.

use crate::{drive::FluxDrive, TIME_NEVER};

/// Fraction of the mid-cell timing error applied as an immediate phase
/// correction on every detected transition.
const PHASE_GAIN: f64 = 0.65;

/// The free-running period may deviate at most this much from nominal.
const MAX_FREQ_ADJUST: f64 = 0.25;

/// Pending write transitions are bounded by the commit cadence; the engine
/// checkpoints at least once per emitted byte (16 cells).
const WRITE_BUFFER_LIMIT: usize = 32;

#[derive(Clone, Debug)]
pub struct FluxPll {
    /// Free-running cell period, adjusted within [period_min, period_max].
    pub period: f64,
    pub period_min: f64,
    pub period_max: f64,
    /// One-shot phase offset applied to the next sampling instant.
    pub phase_adjust: f64,
    /// Consecutive same-direction correction counter (sign = direction).
    pub freq_hist: i32,
    /// The current sampling instant.
    pub ctime: f64,
    /// Start of the un-flushed write window; TIME_NEVER while reading.
    pub write_start_time: f64,
    write_buffer: Vec<f64>,
}

impl Default for FluxPll {
    fn default() -> Self {
        FluxPll {
            period: 0.0,
            period_min: 0.0,
            period_max: 0.0,
            phase_adjust: 0.0,
            freq_hist: 0,
            ctime: 0.0,
            write_start_time: TIME_NEVER,
            write_buffer: Vec::with_capacity(WRITE_BUFFER_LIMIT),
        }
    }
}

impl FluxPll {
    /// Set the nominal cell period and derive the clamp window.
    pub fn set_clock(&mut self, period: f64) {
        assert!(period > 0.0);
        self.period = period;
        self.period_min = period * (1.0 - MAX_FREQ_ADJUST);
        self.period_max = period * (1.0 + MAX_FREQ_ADJUST);
        self.phase_adjust = 0.0;
        self.freq_hist = 0;
        log::trace!("FluxPll::set_clock(): period {:.4}µs", period * 1_000_000.0);
    }

    /// Reset the sampling instant, discarding any pending write activity.
    pub fn reset(&mut self, when: f64) {
        self.ctime = when;
        self.phase_adjust = 0.0;
        self.freq_hist = 0;
        self.write_start_time = TIME_NEVER;
        self.write_buffer.clear();
    }

    /// Begin buffering write transitions at `when`.
    pub fn start_writing(&mut self, when: f64) {
        self.write_start_time = when;
        self.write_buffer.clear();
    }

    /// Recover the next bit from the drive's flux stream.
    ///
    /// Advances the sampling instant by one (phase-adjusted) period and
    /// returns the recovered bit, updating `tm` to the new instant. Returns
    /// `None` without advancing when the next instant would pass `limit` -
    /// the caller must suspend and resume once virtual time catches up.
    pub fn get_next_bit(&mut self, tm: &mut f64, drive: &dyn FluxDrive, limit: f64) -> Option<bool> {
        let next = self.ctime + self.period + self.phase_adjust;
        if next > limit {
            return None;
        }

        let edge = drive.next_transition(self.ctime);
        let bit = matches!(edge, Some(e) if e < next);

        if let Some(edge) = edge.filter(|e| *e < next) {
            // Deviation of the transition from the center of the cell window.
            let delta = edge - (next - self.period / 2.0);
            self.phase_adjust = PHASE_GAIN * delta;

            self.freq_hist = if delta < 0.0 {
                if self.freq_hist < 0 {
                    self.freq_hist - 1
                }
                else {
                    -1
                }
            }
            else if delta > 0.0 {
                if self.freq_hist > 0 {
                    self.freq_hist + 1
                }
                else {
                    1
                }
            }
            else {
                0
            };

            let afh = self.freq_hist.unsigned_abs();
            if afh > 1 {
                self.period = (self.period + delta / afh as f64).clamp(self.period_min, self.period_max);
            }
        }

        self.ctime = next;
        *tm = next;
        Some(bit)
    }

    /// Generate one bit cell. A 1 bit records a flux transition at the cell
    /// midpoint into the write buffer. Returns `true` (without advancing)
    /// when the cell would end past `limit`.
    pub fn write_next_bit(&mut self, bit: bool, tm: &mut f64, limit: f64) -> bool {
        debug_assert!(
            self.write_start_time.is_finite(),
            "write_next_bit() without start_writing()"
        );
        let etime = self.ctime + self.period;
        if etime > limit {
            return true;
        }
        if bit && self.write_buffer.len() < WRITE_BUFFER_LIMIT {
            self.write_buffer.push(self.ctime + self.period / 2.0);
        }
        self.ctime = etime;
        *tm = etime;
        false
    }

    /// Flush buffered transitions into the drive over [write_start_time, tm).
    /// A no-op while reading or when the window is empty.
    pub fn commit(&mut self, drive: &mut dyn FluxDrive, tm: f64) {
        if self.write_start_time.is_infinite() || tm == self.write_start_time {
            return;
        }
        drive.write_flux(self.write_start_time, tm, &self.write_buffer);
        self.write_start_time = tm;
        self.write_buffer.clear();
    }

    /// Flush and leave write mode.
    pub fn stop_writing(&mut self, drive: &mut dyn FluxDrive, tm: f64) {
        self.commit(drive, tm);
        self.write_start_time = TIME_NEVER;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_window() {
        let mut pll = FluxPll::default();
        pll.set_clock(2e-6);
        assert!((pll.period_min - 1.5e-6).abs() < 1e-12);
        assert!((pll.period_max - 2.5e-6).abs() < 1e-12);
    }

    #[test]
    fn limit_suspends_without_advancing() {
        let mut pll = FluxPll::default();
        pll.set_clock(2e-6);
        pll.reset(0.0);
        pll.start_writing(0.0);
        let mut tm = 0.0;
        assert!(pll.write_next_bit(true, &mut tm, 1e-6));
        assert_eq!(pll.ctime, 0.0);
        assert!(!pll.write_next_bit(true, &mut tm, 1e-5));
        assert!((tm - 2e-6).abs() < 1e-12);
    }
}
