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

    tests/common/mod.rs

    Common support routines for tests: a discrete-event test bench (virtual
    clock, IRQ/DRQ recorders, DMA servicing, index pulse generation) and a
    standalone System 34 track synthesizer for building pre-formatted media
    independently of the controller's own write path.
*/
#![allow(dead_code)]

use std::{cell::RefCell, rc::Rc};

use bit_vec::BitVec;
use fluxfox_fdc::{
    crc::{crc_ccitt_byte, CRC_CCITT_INIT},
    DataRate,
    DiskChsn,
    Fdc,
    FluxDrive,
    MemoryDrive,
    Scheduler,
    TimerId,
};

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Register offsets used by the tests.
pub const DOR: u8 = 2;
pub const MSR: u8 = 4;
pub const FIFO: u8 = 5;
pub const DIR: u8 = 7;

pub const MSR_RQM: u8 = 0x80;
pub const MSR_DIO: u8 = 0x40;
pub const MSR_NON_DMA: u8 = 0x20;
pub const MSR_CB: u8 = 0x10;

pub struct EventScheduler {
    pub now: f64,
    timers: [Option<f64>; 4],
}

impl EventScheduler {
    fn new() -> Self {
        EventScheduler {
            now: 0.0,
            timers: [None; 4],
        }
    }

    fn next_timer(&self) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (i, t) in self.timers.iter().enumerate() {
            if let Some(t) = t {
                if best.map_or(true, |(_, bt)| *t < bt) {
                    best = Some((i, *t));
                }
            }
        }
        best
    }
}

impl Scheduler for EventScheduler {
    fn time(&self) -> f64 {
        self.now
    }

    fn arm(&mut self, timer: TimerId, delay: f64) {
        self.timers[timer.0] = Some(self.now + delay.max(0.0));
    }

    fn cancel(&mut self, timer: TimerId) {
        self.timers[timer.0] = None;
    }
}

#[derive(Default)]
pub struct IrqRecorder {
    pub state: bool,
    pub rises: u32,
}

impl fluxfox_fdc::InterruptLine for IrqRecorder {
    fn set_irq(&mut self, state: bool) {
        if state && !self.state {
            self.rises += 1;
        }
        self.state = state;
    }
}

#[derive(Default)]
pub struct DrqRecorder {
    pub state: bool,
}

impl fluxfox_fdc::DmaLine for DrqRecorder {
    fn set_drq(&mut self, state: bool) {
        self.state = state;
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum DmaDir {
    Read,
    Write,
}

/// Event-driven harness around an [`Fdc`], one [`MemoryDrive`] in slot 0 and
/// recorders on the interrupt and DMA request lines.
pub struct TestBench {
    pub fdc: Fdc,
    pub scheduler: Rc<RefCell<EventScheduler>>,
    pub irq: Rc<RefCell<IrqRecorder>>,
    pub drq: Rc<RefCell<DrqRecorder>>,
    pub drive: Rc<RefCell<MemoryDrive>>,

    dma_dir: Option<DmaDir>,
    pub dma_buffer: Vec<u8>,
    dma_pos: usize,
    dma_remaining: usize,
    pub dma_paused: bool,
    index_fall_at: Option<f64>,
}

impl TestBench {
    pub fn new(drive: MemoryDrive) -> Self {
        let scheduler = Rc::new(RefCell::new(EventScheduler::new()));
        let irq = Rc::new(RefCell::new(IrqRecorder::default()));
        let drq = Rc::new(RefCell::new(DrqRecorder::default()));
        let drive = Rc::new(RefCell::new(drive));
        let mut fdc = Fdc::new(scheduler.clone(), irq.clone(), drq.clone());
        fdc.attach_drive(0, drive.clone()).unwrap();
        TestBench {
            fdc,
            scheduler,
            irq,
            drq,
            drive,
            dma_dir: None,
            dma_buffer: Vec::new(),
            dma_pos: 0,
            dma_remaining: 0,
            dma_paused: false,
            index_fall_at: None,
        }
    }

    /// Release the reset line with drive 0's motor on and the DMA gate open,
    /// drain the four post-reset attention interrupts and program sane
    /// timings the way a BIOS would.
    pub fn power_on(&mut self) {
        self.fdc.write_register(DOR, 0x1C);
        for _ in 0..4 {
            let result = self.command(&[0x08]);
            assert_eq!(result.len(), 2, "post-reset sense interrupt result");
        }
        // SRT 12, HUT 15, HLT 1, DMA mode.
        self.command(&[0x03, 0xCF, 0x02]);
    }

    pub fn now(&self) -> f64 {
        self.scheduler.borrow().now
    }

    /// Program the DMA recorder to source bytes for a controller write.
    pub fn dma_supply(&mut self, data: &[u8]) {
        self.dma_dir = Some(DmaDir::Write);
        self.dma_buffer = data.to_vec();
        self.dma_pos = 0;
        self.dma_remaining = data.len();
    }

    /// Program the DMA recorder to sink `len` bytes from a controller read.
    pub fn dma_expect(&mut self, len: usize) {
        self.dma_dir = Some(DmaDir::Read);
        self.dma_buffer = Vec::with_capacity(len);
        self.dma_pos = 0;
        self.dma_remaining = len;
    }

    fn service_dma(&mut self) {
        loop {
            if self.dma_paused || !self.drq.borrow().state {
                return;
            }
            let Some(dir) = self.dma_dir else {
                return;
            };
            if self.dma_remaining == 0 {
                return;
            }
            let last = self.dma_remaining == 1;
            if last {
                self.fdc.tc(true);
            }
            match dir {
                DmaDir::Read => {
                    let data = self.fdc.dma_read();
                    self.dma_buffer.push(data);
                }
                DmaDir::Write => {
                    let data = self.dma_buffer[self.dma_pos];
                    self.dma_pos += 1;
                    self.fdc.dma_write(data);
                }
            }
            self.dma_remaining -= 1;
            if last {
                self.fdc.tc(false);
                self.dma_dir = None;
            }
        }
    }

    /// Process the next scheduled event at or before `deadline`. Returns
    /// false when nothing is pending in the window (the clock then sits at
    /// `deadline`).
    pub fn advance_one_event(&mut self, deadline: f64) -> bool {
        self.service_dma();

        let now = self.now();
        let mut when = deadline;
        // 0 = none, 1 = timer, 2 = index rise, 3 = index fall
        let mut kind = 0;
        let mut timer_id = 0usize;

        if let Some((id, t)) = self.scheduler.borrow().next_timer() {
            if t <= when {
                when = t;
                kind = 1;
                timer_id = id;
            }
        }
        let index_rise = self.drive.borrow().next_index_time(now);
        if index_rise <= when && kind != 1 || (kind == 1 && index_rise < when) {
            when = index_rise;
            kind = 2;
        }
        if let Some(fall) = self.index_fall_at {
            if fall <= when {
                when = fall;
                kind = 3;
            }
        }

        if kind == 0 {
            self.scheduler.borrow_mut().now = deadline;
            self.service_dma();
            return false;
        }

        self.scheduler.borrow_mut().now = when;
        match kind {
            1 => {
                self.scheduler.borrow_mut().timers[timer_id] = None;
                self.fdc.timer_expired(TimerId(timer_id));
            }
            2 => {
                self.index_fall_at = Some(when + 1e-3);
                self.fdc.index_pulse(0, true);
            }
            _ => {
                self.index_fall_at = None;
                self.fdc.index_pulse(0, false);
            }
        }
        self.service_dma();
        true
    }

    pub fn run_until(&mut self, deadline: f64) {
        while self.advance_one_event(deadline) {}
    }

    pub fn run_for(&mut self, span: f64) {
        let deadline = self.now() + span;
        self.run_until(deadline);
    }

    /// Run until the interrupt line rises (or the deadline passes). Returns
    /// true when the interrupt fired.
    pub fn run_until_irq(&mut self, deadline: f64) -> bool {
        loop {
            if self.irq.borrow().state {
                return true;
            }
            if !self.advance_one_event(deadline) {
                return self.irq.borrow().state;
            }
        }
    }

    pub fn write_command(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.fdc.write_register(FIFO, *b);
        }
    }

    /// Read out a full result phase.
    pub fn read_result(&mut self) -> Vec<u8> {
        let mut result = Vec::new();
        loop {
            let msr = self.fdc.read_register(MSR);
            if msr & (MSR_RQM | MSR_DIO | MSR_CB) != MSR_RQM | MSR_DIO | MSR_CB {
                break;
            }
            result.push(self.fdc.read_register(FIFO));
            if result.len() > 16 {
                panic!("result phase did not terminate");
            }
        }
        result
    }

    /// Issue an immediate command and collect its result phase.
    pub fn command(&mut self, bytes: &[u8]) -> Vec<u8> {
        self.write_command(bytes);
        self.read_result()
    }

    /// Issue a command expected to complete with an interrupt within `span`
    /// seconds, then collect the result phase.
    pub fn run_command(&mut self, bytes: &[u8], span: f64) -> Vec<u8> {
        let deadline = self.now() + span;
        self.write_command(bytes);
        assert!(self.run_until_irq(deadline), "command did not complete within {span}s");
        self.read_result()
    }

    /// Polled (non-DMA) execution-phase read: collects data bytes until the
    /// result phase begins, then returns them (result left unread).
    pub fn poll_transfer_read(&mut self, deadline: f64) -> Vec<u8> {
        let mut data = Vec::new();
        loop {
            let msr = self.fdc.read_register(MSR);
            if msr & (MSR_RQM | MSR_DIO | MSR_NON_DMA) == MSR_RQM | MSR_DIO | MSR_NON_DMA {
                data.push(self.fdc.read_register(FIFO));
                continue;
            }
            if msr & (MSR_RQM | MSR_DIO) == MSR_RQM | MSR_DIO {
                // Result phase reached.
                break;
            }
            if !self.advance_one_event(deadline) {
                break;
            }
        }
        data
    }
}

// ---------------------------------------------------------------------------
// Track synthesis
// ---------------------------------------------------------------------------

/// Appends MFM-encoded bytes to a bitcell vector, tracking the trailing data
/// bit for clock generation.
pub struct MfmTrackWriter {
    pub cells: BitVec,
    last_bit: bool,
}

impl MfmTrackWriter {
    pub fn new() -> Self {
        MfmTrackWriter {
            cells: BitVec::new(),
            last_bit: false,
        }
    }

    pub fn write_byte(&mut self, data: u8) {
        for i in 0..8 {
            let bit = data & (0x80 >> i) != 0;
            self.cells.push(!(self.last_bit || bit));
            self.cells.push(bit);
            self.last_bit = bit;
        }
    }

    pub fn write_bytes(&mut self, data: u8, count: usize) {
        for _ in 0..count {
            self.write_byte(data);
        }
    }

    /// Append a pre-encoded 16-cell word (a missing-clock sync mark).
    pub fn write_raw(&mut self, raw: u16) {
        for i in 0..16 {
            self.cells.push(raw & (0x8000 >> i) != 0);
        }
        self.last_bit = raw & 1 != 0;
    }
}

pub const MFM_SYNC_RAW: u16 = 0x4489;
pub const MFM_IAM_SYNC_RAW: u16 = 0x5224;

/// One synthesized sector: its ID quad, payload, and whether to deliberately
/// corrupt the data-field CRC.
pub struct SectorSpec {
    pub id: DiskChsn,
    pub data: Vec<u8>,
    pub corrupt_data_crc: bool,
    pub deleted: bool,
}

impl SectorSpec {
    pub fn new(id: DiskChsn, data: Vec<u8>) -> Self {
        SectorSpec {
            id,
            data,
            corrupt_data_crc: false,
            deleted: false,
        }
    }
}

/// Build a complete System 34 MFM track image from sector specs, padded with
/// gap bytes to `total_cells`.
pub fn build_mfm_track(sectors: &[SectorSpec], total_cells: usize) -> BitVec {
    let mut w = MfmTrackWriter::new();
    w.write_bytes(0x4E, 80);
    w.write_bytes(0x00, 12);
    for _ in 0..3 {
        w.write_raw(MFM_IAM_SYNC_RAW);
    }
    w.write_byte(0xFC);
    w.write_bytes(0x4E, 50);

    for sector in sectors {
        // ID field
        w.write_bytes(0x00, 12);
        for _ in 0..3 {
            w.write_raw(MFM_SYNC_RAW);
        }
        w.write_byte(0xFE);
        let id = sector.id.to_bytes();
        let mut crc = CRC_CCITT_INIT;
        for b in [0xA1, 0xA1, 0xA1, 0xFE] {
            crc = crc_ccitt_byte(crc, b);
        }
        for b in id {
            w.write_byte(b);
            crc = crc_ccitt_byte(crc, b);
        }
        w.write_byte((crc >> 8) as u8);
        w.write_byte((crc & 0xFF) as u8);
        w.write_bytes(0x4E, 22);

        // Data field
        w.write_bytes(0x00, 12);
        for _ in 0..3 {
            w.write_raw(MFM_SYNC_RAW);
        }
        let mark = if sector.deleted { 0xF8 } else { 0xFB };
        w.write_byte(mark);
        let mut crc = CRC_CCITT_INIT;
        for b in [0xA1, 0xA1, 0xA1, mark] {
            crc = crc_ccitt_byte(crc, b);
        }
        for b in &sector.data {
            w.write_byte(*b);
            crc = crc_ccitt_byte(crc, *b);
        }
        if sector.corrupt_data_crc {
            crc ^= 0x5555;
        }
        w.write_byte((crc >> 8) as u8);
        w.write_byte((crc & 0xFF) as u8);
        w.write_bytes(0x4E, 80);
    }

    while w.cells.len() < total_cells {
        w.write_byte(0x4E);
    }
    let mut cells = w.cells;
    cells.truncate(total_cells);
    cells
}

/// Deterministic per-sector payload for round-trip checks.
pub fn sector_payload(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| seed.wrapping_mul(31).wrapping_add((i as u8).wrapping_mul(7)))
        .collect()
}

/// A bench with a 250 kbps MFM medium holding `sectors_per_track` 512-byte
/// sectors on cylinder 0, head 0, each filled with a deterministic pattern.
pub fn bench_with_formatted_disk(sectors_per_track: u8) -> TestBench {
    let mut drive = MemoryDrive::with_media(80, DataRate::Rate250Kbps);
    let total_cells = drive.cells_per_track();
    let sectors: Vec<SectorSpec> = (1..=sectors_per_track)
        .map(|s| SectorSpec::new(DiskChsn::new(0, 0, s, 2), sector_payload(s, 512)))
        .collect();
    drive.load_track(0, 0, build_mfm_track(&sectors, total_cells));
    let mut bench = TestBench::new(drive);
    bench.power_on();
    bench
}
