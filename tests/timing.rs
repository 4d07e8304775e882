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
mod common;

use common::*;
use fluxfox_fdc::{pll::FluxPll, DataRate, FluxDrive, MemoryDrive, TIME_NEVER};

/// A drive producing a perfectly regular flux stream with a configurable
/// cell period, for exercising the PLL in isolation.
struct SyntheticDrive {
    /// Seconds between flux transitions.
    spacing: f64,
    /// Offset of the first transition.
    phase: f64,
}

impl FluxDrive for SyntheticDrive {
    fn media_present(&self) -> bool {
        true
    }
    fn media_rate(&self) -> Option<DataRate> {
        Some(DataRate::Rate250Kbps)
    }
    fn motor_on(&self) -> bool {
        true
    }
    fn set_motor(&mut self, _on: bool) {}
    fn write_protected(&self) -> bool {
        false
    }
    fn two_sided(&self) -> bool {
        true
    }
    fn cylinder(&self) -> u8 {
        0
    }
    fn side(&self) -> u8 {
        0
    }
    fn select_side(&mut self, _side: u8) {}
    fn step(&mut self, _inward: bool) {}
    fn rotation_period(&self) -> f64 {
        0.2
    }
    fn next_index_time(&self, _after: f64) -> f64 {
        TIME_NEVER
    }
    fn next_transition(&self, after: f64) -> Option<f64> {
        let k = ((after - self.phase) / self.spacing).floor() + 1.0;
        Some(self.phase + k.max(0.0) * self.spacing)
    }
    fn write_flux(&mut self, _start: f64, _end: f64, _transitions: &[f64]) {}
}

#[test]
fn pll_tracks_constant_rate_offset() {
    init();
    // The medium runs 5% slow: 2.1µs cells, one transition every two cells.
    let cell = 2.1e-6;
    let drive = SyntheticDrive {
        spacing: 2.0 * cell,
        phase: cell / 2.0,
    };
    let nominal = 2.0e-6;
    let mut pll = FluxPll::default();
    pll.set_clock(nominal);
    pll.reset(0.0);

    let mut tm = 0.0;
    let mut bits = Vec::new();
    for _ in 0..2000 {
        let bit = pll.get_next_bit(&mut tm, &drive, TIME_NEVER).unwrap();
        bits.push(bit);
        // The free-running period never leaves the ±25% clamp.
        assert!(pll.period >= nominal * 0.75 - 1e-12);
        assert!(pll.period <= nominal * 1.25 + 1e-12);
    }

    // Once locked, every transition sits mid-window: the recovered pattern
    // is a clean alternation (one transition per two cells).
    let tail = &bits[bits.len() - 200..];
    let ones = tail.iter().filter(|b| **b).count();
    assert!((99..=101).contains(&ones), "expected ~100 ones, got {}", ones);
    // No doubled 1s once phase lock is achieved.
    assert!(!tail.windows(2).any(|w| w[0] && w[1]));
    // The period converged toward the medium's actual cell width.
    assert!(
        (pll.period - cell).abs() < 0.05e-6,
        "period {:.4}µs did not converge to {:.4}µs",
        pll.period * 1e6,
        cell * 1e6
    );
}

#[test]
fn seek_uses_programmed_step_rate() {
    init();
    let mut bench = TestBench::new(MemoryDrive::with_media(80, DataRate::Rate250Kbps));
    bench.power_on();
    // SRT=12 at 250 kbps: (16-12) x 2000µs = 8ms per cylinder.
    bench.command(&[0x03, 0xCF, 0x02]);
    let start = bench.now();
    bench.write_command(&[0x0F, 0x00, 10]);
    assert!(bench.run_until_irq(start + 1.0), "seek completed");
    let elapsed = bench.now() - start;
    assert!(
        (0.070..=0.095).contains(&elapsed),
        "10 cylinders at 8ms/step took {:.3}s",
        elapsed
    );
    let result = bench.command(&[0x08]);
    assert_eq!(result, vec![0x20, 10], "seek end, PCN updated");
}

#[test]
fn recalibrate_without_media_hangs_until_reset() {
    init();
    // No media in the drive: the command must never complete - no result,
    // no interrupt, drive busy bit stuck. This mirrors the real chip and is
    // intentional.
    let mut bench = TestBench::new(MemoryDrive::new(80));
    bench.fdc.write_register(DOR, 0x1C);
    for _ in 0..4 {
        bench.command(&[0x08]);
    }
    let rises_before = bench.irq.borrow().rises;
    bench.write_command(&[0x07, 0x00]);
    bench.run_for(1.0);
    let msr = bench.fdc.read_register(MSR);
    assert_ne!(msr & 0x01, 0, "drive 0 busy bit stuck");
    assert_eq!(bench.irq.borrow().rises, rises_before, "no completion interrupt");

    // Only a reset recovers the controller.
    bench.fdc.write_register(DOR, 0x18);
    bench.fdc.write_register(DOR, 0x1C);
    for _ in 0..4 {
        bench.command(&[0x08]);
    }
    let msr = bench.fdc.read_register(MSR);
    assert_eq!(msr & 0x0F, 0, "busy bits cleared by reset");
    assert_eq!(msr & MSR_RQM, MSR_RQM);
}

#[test]
fn wrong_data_rate_hangs_until_reset() {
    init();
    let mut bench = bench_with_formatted_disk(9);
    // Medium is 250 kbps; program 500 kbps and try to read.
    bench.fdc.write_register(DIR, 0x00);
    bench.dma_expect(512);
    bench.write_command(&[0x46, 0x00, 0, 0, 1, 2, 9, 0x2A, 0xFF]);
    bench.run_for(1.0);
    let msr = bench.fdc.read_register(MSR);
    assert_ne!(msr & MSR_CB, 0, "controller busy forever");
    assert_eq!(msr & MSR_RQM, 0, "no request for master");
    assert!(!bench.irq.borrow().state);

    bench.fdc.write_register(DOR, 0x18);
    bench.fdc.write_register(DOR, 0x1C);
    for _ in 0..4 {
        bench.command(&[0x08]);
    }
    assert_eq!(bench.fdc.read_register(MSR) & (MSR_RQM | MSR_CB), MSR_RQM);
}

#[test]
fn seek_past_physical_limit_sets_equipment_check() {
    init();
    let mut bench = TestBench::new(MemoryDrive::with_media(80, DataRate::Rate250Kbps));
    bench.power_on();
    bench.write_command(&[0x0F, 0x00, 90]);
    assert!(bench.run_until_irq(bench.now() + 2.0), "seek terminated");
    let result = bench.command(&[0x08]);
    assert_eq!(result[0] & 0xC0, 0x40, "abnormal termination");
    assert_ne!(result[0] & 0x10, 0, "equipment check");
    assert_ne!(result[0] & 0x20, 0, "seek end");
    assert_eq!(result[1], 79, "PCN reflects the physical stop");
}

#[test]
fn head_stays_loaded_between_consecutive_accesses() {
    init();
    let mut bench = bench_with_formatted_disk(9);
    // A large head-load time dominates the first access; the second access
    // within the unload window must skip it.
    bench.command(&[0x03, 0xCF, 0xC8]); // HLT=100 -> 400ms at 250 kbps
    let start = bench.now();
    bench.dma_expect(512);
    bench.run_command(&[0x46, 0x00, 0, 0, 1, 2, 9, 0x2A, 0xFF], 4.0);
    let first = bench.now() - start;

    let start = bench.now();
    bench.dma_expect(512);
    bench.run_command(&[0x46, 0x00, 0, 0, 1, 2, 9, 0x2A, 0xFF], 4.0);
    let second = bench.now() - start;

    assert!(first > 0.4, "first access pays the head load delay");
    assert!(second < 0.3, "second access skips the head load delay");
}

#[test]
fn snapshot_requires_idle_controller() {
    init();
    let mut bench = TestBench::new(MemoryDrive::new(80));
    bench.fdc.write_register(DOR, 0x1C);
    for _ in 0..4 {
        bench.command(&[0x08]);
    }
    assert!(bench.fdc.snapshot().is_ok());

    // Hang the controller, then verify snapshotting is refused.
    bench.write_command(&[0x07, 0x00]);
    bench.run_for(0.1);
    assert!(bench.fdc.snapshot().is_err(), "snapshot refused while hung");
}

#[test]
fn snapshot_round_trip_preserves_programmed_state() {
    init();
    let mut bench = TestBench::new(MemoryDrive::with_media(80, DataRate::Rate250Kbps));
    bench.power_on();
    bench.command(&[0x03, 0xCA, 0x24]);
    bench.command(&[0x13, 0x00, 0x46, 0x11]);
    let before = bench.command(&[0x0E]);
    let snap = bench.fdc.snapshot().unwrap();

    // Scramble, then restore.
    bench.command(&[0x03, 0x11, 0x06]);
    bench.command(&[0x13, 0x00, 0x00, 0x00]);
    bench.fdc.restore(&snap).unwrap();
    let after = bench.command(&[0x0E]);
    assert_eq!(before, after, "dumpreg identical after restore");
}

#[test]
fn non_dma_polled_read() {
    init();
    let mut bench = bench_with_formatted_disk(9);
    // SPECIFY with the ND bit: execution-phase bytes move through the FIFO
    // port under RQM/DIO instead of the DMA request line.
    bench.command(&[0x03, 0xCF, 0x03]);
    bench.write_command(&[0x46, 0x00, 0, 0, 1, 2, 9, 0x2A, 0xFF]);
    let deadline = bench.now() + 4.0;
    let data = bench.poll_transfer_read(deadline);
    // Without a terminal count the controller pushes on past the requested
    // sector; everything it produced for sector 1 must match the medium.
    assert!(data.len() >= 512, "polled read produced {} bytes", data.len());
    assert_eq!(&data[..512], &sector_payload(1, 512)[..]);
}
