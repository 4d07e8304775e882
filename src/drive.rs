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

//! The drive collaborator interface and a memory-backed reference
//! implementation.
//!
//! A [`FluxDrive`] owns its medium's flux transition stream outright; the
//! controller only touches it through the narrow read/write interface the
//! PLL uses. All drive calls happen atomically within a single scheduler
//! callback, so implementations need no locking of their own.

use std::{cell::RefCell, rc::Rc};

use bit_vec::BitVec;

use crate::{DataEncoding, DataRate, FoxHashMap, TIME_NEVER};

pub trait FluxDrive {
    fn media_present(&self) -> bool;
    /// The nominal data rate of the inserted medium, if it has one. `None`
    /// for unformatted or absent media.
    fn media_rate(&self) -> Option<DataRate>;
    fn motor_on(&self) -> bool;
    fn set_motor(&mut self, on: bool);
    fn write_protected(&self) -> bool;
    fn two_sided(&self) -> bool;
    fn cylinder(&self) -> u8;
    fn side(&self) -> u8;
    fn select_side(&mut self, side: u8);
    fn track0(&self) -> bool {
        self.cylinder() == 0
    }
    /// Deliver one step pulse. `inward` moves towards higher cylinders. A
    /// drive already at its physical limit ignores the pulse.
    fn step(&mut self, inward: bool);
    fn rotation_period(&self) -> f64;
    /// The next instant strictly after `after` at which the index hole
    /// passes the sensor, or TIME_NEVER when the medium is not rotating.
    fn next_index_time(&self, after: f64) -> f64;
    /// The next flux transition strictly after `after` on the current
    /// track/side, or `None` when there is none (or the medium is not
    /// rotating).
    fn next_transition(&self, after: f64) -> Option<f64>;
    /// Splice `transitions` into the current track over [start, end),
    /// erasing whatever the window previously held.
    fn write_flux(&mut self, start: f64, end: f64, transitions: &[f64]);
}

pub type DriveLock = Rc<RefCell<dyn FluxDrive>>;

/// One track's bitcells plus a sorted index of set cells so transition
/// queries don't have to walk the whole BitVec.
#[derive(Clone, Debug)]
struct FluxTrack {
    cells: BitVec,
    ones: Vec<u32>,
}

impl FluxTrack {
    fn blank(len: usize) -> Self {
        FluxTrack {
            cells: BitVec::from_elem(len, false),
            ones: Vec::new(),
        }
    }

    fn from_cells(cells: BitVec) -> Self {
        let ones = cells
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.then_some(i as u32))
            .collect();
        FluxTrack { cells, ones }
    }

    fn clear_cell(&mut self, idx: usize) {
        if self.cells.get(idx) == Some(true) {
            self.cells.set(idx, false);
            if let Ok(pos) = self.ones.binary_search(&(idx as u32)) {
                self.ones.remove(pos);
            }
        }
    }

    fn set_cell(&mut self, idx: usize) {
        if self.cells.get(idx) == Some(false) {
            self.cells.set(idx, true);
            if let Err(pos) = self.ones.binary_search(&(idx as u32)) {
                self.ones.insert(pos, idx as u32);
            }
        }
    }

    /// First set cell at or after `idx`, wrapping once past the end.
    fn next_one(&self, idx: usize) -> Option<u32> {
        if self.ones.is_empty() {
            return None;
        }
        match self.ones.binary_search(&(idx as u32)) {
            Ok(pos) => Some(self.ones[pos]),
            Err(pos) if pos < self.ones.len() => Some(self.ones[pos]),
            Err(_) => Some(self.ones[0] + self.cells.len() as u32),
        }
    }
}

/// An in-memory [`FluxDrive`]: tracks are stored as bitcell vectors at the
/// medium's nominal MFM cell rate, one transition per set cell, recorded at
/// the cell midpoint. Rotation phase is locked to virtual time zero.
pub struct MemoryDrive {
    rotation_period: f64,
    cell_period: f64,
    cells_per_track: usize,
    tracks: FoxHashMap<(u8, u8), FluxTrack>,
    media_rate: Option<DataRate>,
    cylinders: u8,
    cylinder: u8,
    side: u8,
    motor: bool,
    write_protect: bool,
    two_sided: bool,
}

/// 300 RPM.
pub const DEFAULT_ROTATION_PERIOD: f64 = 0.2;

impl MemoryDrive {
    /// A drive with no media inserted.
    pub fn new(cylinders: u8) -> Self {
        MemoryDrive {
            rotation_period: DEFAULT_ROTATION_PERIOD,
            cell_period: 0.0,
            cells_per_track: 0,
            tracks: FoxHashMap::default(),
            media_rate: None,
            cylinders,
            cylinder: 0,
            side: 0,
            motor: false,
            write_protect: false,
            two_sided: true,
        }
    }

    /// A drive with blank (unformatted) media at the given rate.
    pub fn with_media(cylinders: u8, rate: DataRate) -> Self {
        let mut drive = Self::new(cylinders);
        drive.insert_media(rate);
        drive
    }

    pub fn insert_media(&mut self, rate: DataRate) {
        self.media_rate = Some(rate);
        self.cell_period = rate.cell_period(DataEncoding::Mfm);
        self.cells_per_track = (self.rotation_period / self.cell_period).round() as usize;
        self.tracks.clear();
        log::debug!(
            "MemoryDrive::insert_media(): {} medium, {} cells per track",
            rate,
            self.cells_per_track
        );
    }

    pub fn eject(&mut self) {
        self.media_rate = None;
        self.tracks.clear();
    }

    pub fn set_write_protected(&mut self, write_protect: bool) {
        self.write_protect = write_protect;
    }

    pub fn set_two_sided(&mut self, two_sided: bool) {
        self.two_sided = two_sided;
    }

    pub fn cells_per_track(&self) -> usize {
        self.cells_per_track
    }

    /// Replace a track's bitcells wholesale (e.g. with a pre-synthesized
    /// image). The vector is resized to the track length if needed.
    pub fn load_track(&mut self, c: u8, h: u8, mut cells: BitVec) {
        if cells.len() != self.cells_per_track {
            let mut resized = BitVec::from_elem(self.cells_per_track, false);
            for (i, bit) in cells.iter().enumerate().take(self.cells_per_track) {
                resized.set(i, bit);
            }
            cells = resized;
        }
        self.tracks.insert((c, h), FluxTrack::from_cells(cells));
    }

    pub fn track_cells(&self, c: u8, h: u8) -> Option<&BitVec> {
        self.tracks.get(&(c, h)).map(|t| &t.cells)
    }

    fn rotating(&self) -> bool {
        self.motor && self.media_rate.is_some()
    }

    fn angle(&self, t: f64) -> f64 {
        t.rem_euclid(self.rotation_period)
    }
}

impl FluxDrive for MemoryDrive {
    fn media_present(&self) -> bool {
        self.media_rate.is_some()
    }

    fn media_rate(&self) -> Option<DataRate> {
        self.media_rate
    }

    fn motor_on(&self) -> bool {
        self.motor
    }

    fn set_motor(&mut self, on: bool) {
        self.motor = on;
    }

    fn write_protected(&self) -> bool {
        self.write_protect
    }

    fn two_sided(&self) -> bool {
        self.two_sided
    }

    fn cylinder(&self) -> u8 {
        self.cylinder
    }

    fn side(&self) -> u8 {
        self.side
    }

    fn select_side(&mut self, side: u8) {
        self.side = side & 1;
    }

    fn step(&mut self, inward: bool) {
        if inward {
            if self.cylinder + 1 < self.cylinders {
                self.cylinder += 1;
            }
        }
        else if self.cylinder > 0 {
            self.cylinder -= 1;
        }
    }

    fn rotation_period(&self) -> f64 {
        self.rotation_period
    }

    fn next_index_time(&self, after: f64) -> f64 {
        if !self.rotating() {
            return TIME_NEVER;
        }
        after - self.angle(after) + self.rotation_period
    }

    fn next_transition(&self, after: f64) -> Option<f64> {
        if !self.rotating() {
            return None;
        }
        let track = self.tracks.get(&(self.cylinder, self.side))?;
        let cp = self.cell_period;
        let angle = self.angle(after);
        let rev_start = after - angle;

        // First cell whose midpoint falls strictly after `after`.
        let mut idx = (((angle - cp * 0.5) / cp).floor() as i64 + 1).max(0);
        loop {
            let cell = track.next_one(idx as usize)?;
            let t = rev_start + cell as f64 * cp + cp * 0.5;
            if t > after {
                return Some(t);
            }
            // Guard against float edge cases where the midpoint computes to
            // exactly `after`.
            idx = cell as i64 + 1;
        }
    }

    fn write_flux(&mut self, start: f64, end: f64, transitions: &[f64]) {
        if !self.rotating() || end <= start {
            return;
        }
        if self.write_protect {
            log::warn!("MemoryDrive::write_flux(): dropping write to protected medium");
            return;
        }
        let cp = self.cell_period;
        let cells = self.cells_per_track;
        let key = (self.cylinder, self.side);
        let span_cells = (((end - start) / cp).ceil() as usize).min(cells);
        let first = (self.angle(start) / cp).floor() as usize % cells;
        let set_cells: Vec<usize> = transitions
            .iter()
            .map(|t| (self.angle(*t) / cp).floor() as usize % cells)
            .collect();

        let track = self.tracks.entry(key).or_insert_with(|| FluxTrack::blank(cells));
        for i in 0..span_cells {
            track.clear_cell((first + i) % cells);
        }
        for idx in set_cells {
            track.set_cell(idx);
        }
    }
}
