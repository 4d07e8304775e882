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

//! The live decode/encode context: the single-channel read/write head state
//! shared by all drives (exactly one drive may own it at a time). It holds
//! the PLL, the 16-bit shift register the sync detectors run against, the
//! CRC accumulator and the captured ID field, and is cheap to clone - the
//! engine checkpoints it so progress can be rolled back and replayed when
//! virtual time has not yet caught up with a speculative run-ahead.

use crate::{
    crc::{crc_ccitt_bit, crc_ccitt_byte},
    drive::FluxDrive,
    pll::FluxPll,
    TIME_NEVER,
};

// Raw (clock-interleaved) mark words as they appear in the shift register.
pub const MFM_SYNC_RAW: u16 = 0x4489; // 0xA1 with a missing clock bit
pub const MFM_IAM_SYNC_RAW: u16 = 0x5224; // 0xC2 with a missing clock bit
pub const FM_IDAM_RAW: u16 = 0xF57E; // 0xFE, clock 0xC7
pub const FM_DAM_RAW: u16 = 0xF56F; // 0xFB, clock 0xC7
pub const FM_DDAM_RAW: u16 = 0xF56A; // 0xF8, clock 0xC7
pub const FM_IAM_RAW: u16 = 0xF77A; // 0xFC, clock 0xD7

/// Phase of the live engine. Read states are driven by recovered bits; the
/// `...Byte` write states are the byte-boundary synchronization points where
/// the engine exchanges data with the FIFO at (not ahead of) machine time.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, strum::Display)]
pub enum LiveState {
    #[default]
    Idle,
    SearchAddressMarkHeader,
    ReadHeaderBlockHeader,
    ReadIdBlock,
    SearchAddressMarkData,
    ReadDataBlockHeader,
    ReadSectorData,
    ReadSectorDataByte,
    ScanSectorDataByte,
    WriteSectorSkipGap2,
    WriteSectorData,
    WriteSectorDataByte,
    WriteTrackPreSectors,
    WriteTrackPreSectorsByte,
    WriteTrackSector,
    WriteTrackSectorByte,
    WriteTrackPostSectors,
    WriteTrackPostSectorsByte,
}

#[derive(Clone, Debug)]
pub struct LiveContext {
    /// Absolute virtual time the context has advanced to; TIME_NEVER when idle.
    pub tm: f64,
    pub state: LiveState,
    /// State to apply once virtual time reaches `tm` (set by live_delay).
    pub next_state: Option<LiveState>,
    /// Index of the drive owning the context.
    pub drive: Option<usize>,
    pub shift_reg: u16,
    pub crc: u16,
    /// Snapshot of the CRC taken before the CRC bytes themselves are emitted.
    pub crc_latch: u16,
    pub bit_counter: u32,
    pub data_separator_phase: bool,
    pub data_reg: u8,
    /// Last data bit emitted, for MFM clock generation on the write side.
    pub last_data_bit: bool,
    /// Captured ID field: C, H, R, N.
    pub idbuf: [u8; 4],
    /// Sector payload length for the field being processed.
    pub sector_size: usize,
    /// Byte sequencing counter for write/format scripts.
    pub byte_counter: usize,
    pub pll: FluxPll,
}

impl Default for LiveContext {
    fn default() -> Self {
        LiveContext {
            tm: TIME_NEVER,
            state: LiveState::Idle,
            next_state: None,
            drive: None,
            shift_reg: 0,
            crc: 0xFFFF,
            crc_latch: 0,
            bit_counter: 0,
            data_separator_phase: false,
            data_reg: 0,
            last_data_bit: false,
            idbuf: [0; 4],
            sector_size: 0,
            byte_counter: 0,
            pll: FluxPll::default(),
        }
    }
}

impl LiveContext {
    /// Reload the CRC accumulator with a mark residue and restart byte
    /// framing - called the instant a sync mark is recognized.
    pub fn start_field(&mut self, crc_seed: u16) {
        self.crc = crc_seed;
        self.data_separator_phase = false;
        self.bit_counter = 0;
    }

    /// Shift the next recovered bit in. Returns true when the PLL hit the
    /// time limit and the engine must suspend.
    pub fn read_one_bit(&mut self, drive: &dyn FluxDrive, limit: f64) -> bool {
        let bit = match self.pll.get_next_bit(&mut self.tm, drive, limit) {
            Some(bit) => bit,
            None => return true,
        };
        self.shift_reg = (self.shift_reg << 1) | bit as u16;
        self.bit_counter += 1;
        if self.data_separator_phase {
            self.data_reg = (self.data_reg << 1) | bit as u8;
            self.crc = crc_ccitt_bit(self.crc, bit);
        }
        self.data_separator_phase = !self.data_separator_phase;
        false
    }

    /// Emit the MSB of the shift register as one written cell. Returns true
    /// when the PLL hit the time limit.
    pub fn write_one_bit(&mut self, limit: f64) -> bool {
        let bit = self.shift_reg & 0x8000 != 0;
        if self.pll.write_next_bit(bit, &mut self.tm, limit) {
            return true;
        }
        self.shift_reg <<= 1;
        self.bit_counter += 1;
        false
    }

    /// Load a data byte for MFM emission: each data bit is preceded by a
    /// clock bit that is set only between two zero data bits.
    pub fn load_mfm_byte(&mut self, data: u8) {
        let mut raw: u16 = 0;
        let mut last = self.last_data_bit;
        for i in 0..8 {
            let bit = data & (0x80 >> i) != 0;
            raw = (raw << 1) | (!(last || bit)) as u16;
            raw = (raw << 1) | bit as u16;
            last = bit;
        }
        self.shift_reg = raw;
        self.last_data_bit = last;
        self.crc = crc_ccitt_byte(self.crc, data);
        self.bit_counter = 0;
    }

    /// Load a data byte for FM emission (every clock bit set).
    pub fn load_fm_byte(&mut self, data: u8) {
        let mut raw: u16 = 0;
        for i in 0..8 {
            let bit = data & (0x80 >> i) != 0;
            raw = (raw << 1) | 1;
            raw = (raw << 1) | bit as u16;
        }
        self.shift_reg = raw;
        self.last_data_bit = data & 1 != 0;
        self.crc = crc_ccitt_byte(self.crc, data);
        self.bit_counter = 0;
    }

    /// Load a pre-encoded (missing-clock) mark word. `data` is the decoded
    /// byte value folded into the CRC when `feed_crc` is set; sync prefixes
    /// that precede the CRC seed point pass false.
    pub fn load_raw(&mut self, raw: u16, data: u8, feed_crc: bool) {
        self.shift_reg = raw;
        self.last_data_bit = raw & 1 != 0;
        if feed_crc {
            self.crc = crc_ccitt_byte(self.crc, data);
        }
        self.bit_counter = 0;
    }

    /// Load one byte for the current encoding.
    pub fn load_byte(&mut self, mfm: bool, data: u8) {
        if mfm {
            self.load_mfm_byte(data);
        }
        else {
            self.load_fm_byte(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mfm_encoding_of_a_gap_byte() {
        let mut live = LiveContext::default();
        live.last_data_bit = false;
        live.load_mfm_byte(0x4E);
        // 0x4E after a 0 data bit encodes to 0x9254.
        assert_eq!(live.shift_reg, 0x9254);
        assert!(!live.last_data_bit);
    }

    #[test]
    fn mfm_sync_word_is_a1_with_missing_clock() {
        let mut live = LiveContext::default();
        live.last_data_bit = false;
        live.load_mfm_byte(0xA1);
        // A normally-clocked 0xA1 differs from the sync word in exactly the
        // missing-clock position.
        assert_eq!(live.shift_reg, 0x44A9);
        assert_eq!(live.shift_reg & !0x0020, MFM_SYNC_RAW & !0x0020);
    }

    #[test]
    fn fm_mark_words() {
        let mut live = LiveContext::default();
        live.load_fm_byte(0xFF);
        assert_eq!(live.shift_reg, 0xFFFF);
        live.load_fm_byte(0x00);
        assert_eq!(live.shift_reg, 0xAAAA);
    }
}
