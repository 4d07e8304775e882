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

//! The live bitstream engine's step function and its suspension machinery.
//!
//! `live_run` advances the live context bit-by-bit until it completes a
//! meaningful unit of work or exhausts the window it may advance through
//! (the next index pulse, or a forced resync interval when the drive is not
//! rotating). Byte-boundary exchanges with the FIFO go through `live_delay`,
//! which parks the context until virtual time reaches it; if an external
//! event arrives first, `live_sync` rolls the context back to the last
//! checkpoint and replays it only up to the present - rotational position is
//! only authoritative at the moment of actual access.

use super::*;

/// Outcome of one sector-format byte load.
enum FormatStep {
    Loaded,
    SectorDone,
}

impl Fdc {
    pub(super) fn live_start(&mut self, d: usize, state: LiveState) {
        if let Some(other) = self.cur_live.drive {
            if other != d {
                // The modeled hardware has a single read/write channel, and
                // command serialization means two drives can never own it at
                // once; reaching this is an implementation defect.
                log::error!(
                    "Fdc::live_start(): live channel already owned by drive {} - forcing abort",
                    other
                );
                self.live_abort();
            }
        }
        let now = self.now();
        let mut live = LiveContext::default();
        live.tm = now;
        live.state = state;
        live.drive = Some(d);
        live.sector_size = self.sector_size;
        live.pll.set_clock(self.rate.cell_period(self.encoding()));
        live.pll.reset(now);
        log::trace!("Fdc::live_start(): drive {} {} @ {:.6}", d, state, now);
        self.cur_live = live;
        self.flopi[d].live = true;
        self.checkpoint_live = self.cur_live.clone();
        self.live_run(TIME_NEVER);
    }

    fn commit_pll(&mut self) {
        if let Some(d) = self.cur_live.drive {
            if self.cur_live.tm.is_finite() {
                if let Some(rc) = self.drive_rc(d) {
                    self.cur_live.pll.commit(&mut *rc.borrow_mut(), self.cur_live.tm);
                }
            }
        }
    }

    fn checkpoint(&mut self) {
        self.commit_pll();
        self.checkpoint_live = self.cur_live.clone();
    }

    fn checkpoint_locked(cur: &mut LiveContext, saved: &mut LiveContext, drive: &mut dyn FluxDrive) {
        cur.pll.commit(drive, cur.tm);
        *saved = cur.clone();
    }

    fn rollback(&mut self) {
        self.cur_live = self.checkpoint_live.clone();
    }

    /// Park the context until virtual time reaches `cur_live.tm`, then apply
    /// `state`. If time already caught up, apply immediately.
    fn live_delay(&mut self, state: LiveState) {
        self.cur_live.next_state = Some(state);
        let now = self.now();
        if self.cur_live.tm > now {
            if let Some(d) = self.cur_live.drive {
                self.scheduler.borrow_mut().arm(TimerId(d), self.cur_live.tm - now);
            }
        }
        else {
            self.live_sync();
            // The applied state may be an instantaneous byte handler with no
            // timer of its own; keep the engine moving instead of waiting
            // for an unrelated event.
            if self.cur_live.state != LiveState::Idle {
                self.live_run(TIME_NEVER);
            }
        }
    }

    /// Reconcile the live context with the present. A context ahead of
    /// virtual time is rolled back to its checkpoint and replayed up to now;
    /// one at/behind the present applies its pending state transition.
    pub(super) fn live_sync(&mut self) {
        if !self.cur_live.tm.is_finite() {
            return;
        }
        let now = self.now();
        if self.cur_live.tm > now {
            self.rollback();
            self.live_run(now);
            self.commit_pll();
        }
        else {
            self.commit_pll();
            if let Some(next) = self.cur_live.next_state.take() {
                self.cur_live.state = next;
            }
            if self.cur_live.state == LiveState::Idle {
                if let Some(d) = self.cur_live.drive {
                    if let Some(rc) = self.drive_rc(d) {
                        self.cur_live.pll.stop_writing(&mut *rc.borrow_mut(), self.cur_live.tm);
                    }
                    self.flopi[d].live = false;
                }
                self.cur_live.drive = None;
                self.cur_live.tm = TIME_NEVER;
            }
        }
        self.cur_live.next_state = None;
        if self.cur_live.drive.is_some() {
            self.checkpoint();
        }
    }

    /// Force-stop the live context, flushing any pending buffered flux
    /// transitions. Invoked on reset, media removal, index-synchronized
    /// command endings and overrun aborts.
    pub(super) fn live_abort(&mut self) {
        let now = self.now();
        if self.cur_live.tm.is_finite() && self.cur_live.tm > now {
            self.rollback();
            self.live_run(now);
        }
        if let Some(d) = self.cur_live.drive {
            if let Some(rc) = self.drive_rc(d) {
                let tm = if self.cur_live.tm.is_finite() { self.cur_live.tm } else { now };
                self.cur_live.pll.stop_writing(&mut *rc.borrow_mut(), tm);
            }
            self.flopi[d].live = false;
            self.scheduler.borrow_mut().cancel(TimerId(d));
        }
        self.cur_live.tm = TIME_NEVER;
        self.cur_live.state = LiveState::Idle;
        self.cur_live.next_state = None;
        self.cur_live.drive = None;
    }

    /// Advance the live context until `limit` (or, given TIME_NEVER, until
    /// the next index pulse / resync interval), suspending at byte and field
    /// boundaries that require the rest of the machine.
    pub(super) fn live_run(&mut self, limit_arg: f64) {
        if self.cur_live.state == LiveState::Idle || self.cur_live.next_state.is_some() {
            return;
        }
        let d = match self.cur_live.drive {
            Some(d) => d,
            None => return,
        };
        let rc = match self.drive_rc(d) {
            Some(rc) => rc,
            None => return,
        };

        let mut limit = limit_arg;
        if !limit.is_finite() {
            let next_index = rc.borrow().next_index_time(self.cur_live.tm);
            if next_index.is_finite() {
                limit = next_index;
            }
            else {
                // No index pulses (no media / motor off): force a resync so
                // the engine never searches unbounded time in one call.
                let now = self.now();
                limit = now + RESYNC_INTERVAL;
                self.scheduler.borrow_mut().arm(TimerId(d), RESYNC_INTERVAL);
            }
        }

        let mfm = self.cmd_mfm();
        let scan = self.flopi[d].main_state == MainState::ScanData;
        let mut drive = rc.borrow_mut();

        let outcome = loop {
            match self.cur_live.state {
                LiveState::Idle => break RunOutcome::Suspend,

                // ---------------------------------------------------------
                // Read side
                // ---------------------------------------------------------
                LiveState::SearchAddressMarkHeader => {
                    if self.cur_live.read_one_bit(&*drive, limit) {
                        break RunOutcome::Suspend;
                    }
                    if mfm && self.cur_live.shift_reg == MFM_SYNC_RAW {
                        log::trace!("live_run(): MFM ID sync @ {:.6}", self.cur_live.tm);
                        self.cur_live.start_field(MFM_A1_CRC);
                        self.cur_live.state = LiveState::ReadHeaderBlockHeader;
                    }
                    else if !mfm && self.cur_live.shift_reg == FM_IDAM_RAW {
                        log::trace!("live_run(): FM IDAM @ {:.6}", self.cur_live.tm);
                        self.cur_live.start_field(FM_IDAM_CRC);
                        self.cur_live.state = LiveState::ReadIdBlock;
                    }
                }
                LiveState::ReadHeaderBlockHeader => {
                    if self.cur_live.read_one_bit(&*drive, limit) {
                        break RunOutcome::Suspend;
                    }
                    if self.cur_live.bit_counter & 15 != 0 {
                        continue;
                    }
                    let slot = self.cur_live.bit_counter >> 4;
                    if slot < 3 {
                        if self.cur_live.shift_reg != MFM_SYNC_RAW {
                            self.cur_live.state = LiveState::SearchAddressMarkHeader;
                        }
                        continue;
                    }
                    if self.cur_live.data_reg != 0xFE {
                        self.cur_live.state = LiveState::SearchAddressMarkHeader;
                        continue;
                    }
                    self.cur_live.bit_counter = 0;
                    self.cur_live.state = LiveState::ReadIdBlock;
                }
                LiveState::ReadIdBlock => {
                    if self.cur_live.read_one_bit(&*drive, limit) {
                        break RunOutcome::Suspend;
                    }
                    if self.cur_live.bit_counter & 15 != 0 {
                        continue;
                    }
                    let slot = (self.cur_live.bit_counter >> 4) as usize - 1;
                    if slot < 4 {
                        self.cur_live.idbuf[slot] = self.cur_live.data_reg;
                    }
                    if slot == 5 {
                        // ID quad plus both CRC bytes captured.
                        break RunOutcome::Delay(LiveState::Idle);
                    }
                }
                LiveState::SearchAddressMarkData => {
                    if self.cur_live.read_one_bit(&*drive, limit) {
                        break RunOutcome::Suspend;
                    }
                    if mfm {
                        if self.cur_live.bit_counter > MFM_DAM_WINDOW_MAX * 16 {
                            // No data mark in the window; st2 MD stands.
                            break RunOutcome::Delay(LiveState::Idle);
                        }
                        if self.cur_live.bit_counter >= MFM_DAM_WINDOW_MIN * 16
                            && self.cur_live.shift_reg == MFM_SYNC_RAW
                        {
                            self.cur_live.start_field(MFM_A1_CRC);
                            self.cur_live.state = LiveState::ReadDataBlockHeader;
                        }
                    }
                    else {
                        if self.cur_live.bit_counter > FM_DAM_WINDOW_MAX * 16 {
                            break RunOutcome::Delay(LiveState::Idle);
                        }
                        if self.cur_live.bit_counter >= FM_DAM_WINDOW_MIN * 16 {
                            let (found, deleted) = match self.cur_live.shift_reg {
                                FM_DAM_RAW => (true, false),
                                FM_DDAM_RAW => (true, true),
                                _ => (false, false),
                            };
                            if found {
                                if self.mark_found(deleted) {
                                    break RunOutcome::Delay(LiveState::Idle);
                                }
                                self.cur_live
                                    .start_field(if deleted { FM_DDAM_CRC } else { FM_DAM_CRC });
                                self.cur_live.state = LiveState::ReadSectorData;
                            }
                        }
                    }
                }
                LiveState::ReadDataBlockHeader => {
                    if self.cur_live.read_one_bit(&*drive, limit) {
                        break RunOutcome::Suspend;
                    }
                    if self.cur_live.bit_counter & 15 != 0 {
                        continue;
                    }
                    let slot = self.cur_live.bit_counter >> 4;
                    if slot < 3 {
                        if self.cur_live.shift_reg != MFM_SYNC_RAW {
                            break RunOutcome::Delay(LiveState::Idle);
                        }
                        continue;
                    }
                    let deleted = match self.cur_live.data_reg {
                        0xFB => false,
                        0xF8 => true,
                        _ => break RunOutcome::Delay(LiveState::Idle),
                    };
                    if self.mark_found(deleted) {
                        break RunOutcome::Delay(LiveState::Idle);
                    }
                    self.cur_live.bit_counter = 0;
                    self.cur_live.state = LiveState::ReadSectorData;
                }
                LiveState::ReadSectorData => {
                    if self.cur_live.read_one_bit(&*drive, limit) {
                        break RunOutcome::Suspend;
                    }
                    if self.cur_live.bit_counter & 15 != 0 {
                        continue;
                    }
                    let slot = (self.cur_live.bit_counter >> 4) as usize - 1;
                    if slot < self.cur_live.sector_size {
                        break RunOutcome::Delay(if scan {
                            LiveState::ScanSectorDataByte
                        }
                        else {
                            LiveState::ReadSectorDataByte
                        });
                    }
                    if slot == self.cur_live.sector_size + 1 {
                        // Both CRC bytes consumed; accumulator is now the
                        // residue the main machine checks.
                        break RunOutcome::Delay(LiveState::Idle);
                    }
                }
                LiveState::ReadSectorDataByte => {
                    // Bytes past the transfer length (terminal count, or a
                    // DTL shorter than the physical field) are read for the
                    // CRC but not passed to the host.
                    if !self.tc_active() && self.fifo.expected() > 0 {
                        let data = self.cur_live.data_reg;
                        self.fifo_push_live(data);
                    }
                    self.cur_live.state = LiveState::ReadSectorData;
                    Self::checkpoint_locked(&mut self.cur_live, &mut self.checkpoint_live, &mut *drive);
                }
                LiveState::ScanSectorDataByte => {
                    let disk = self.cur_live.data_reg;
                    if !(self.tc_active() && self.fifo.is_empty()) {
                        let host = self.fifo_pop_live();
                        if host != 0xFF {
                            // 0xFF from the host is a wildcard byte.
                            if disk != host {
                                self.scan_all_equal = false;
                            }
                            if disk > host {
                                self.scan_low_ok = false;
                            }
                            if disk < host {
                                self.scan_high_ok = false;
                            }
                        }
                    }
                    self.cur_live.state = LiveState::ReadSectorData;
                    Self::checkpoint_locked(&mut self.cur_live, &mut self.checkpoint_live, &mut *drive);
                }

                // ---------------------------------------------------------
                // Write Data
                // ---------------------------------------------------------
                LiveState::WriteSectorSkipGap2 => {
                    if self.cur_live.read_one_bit(&*drive, limit) {
                        break RunOutcome::Suspend;
                    }
                    let gap2_bits = if mfm { (MFM_GAP2 * 16) as u32 } else { (FM_GAP2 * 16) as u32 };
                    if self.cur_live.bit_counter != gap2_bits {
                        continue;
                    }
                    self.cur_live.byte_counter = 0;
                    break RunOutcome::Delay(LiveState::WriteSectorDataByte);
                }
                LiveState::WriteSectorData => {
                    if self.cur_live.write_one_bit(limit) {
                        break RunOutcome::Suspend;
                    }
                    if self.cur_live.bit_counter & 15 == 0 {
                        break RunOutcome::Delay(LiveState::WriteSectorDataByte);
                    }
                }
                LiveState::WriteSectorDataByte => {
                    if self.cur_live.pll.write_start_time.is_infinite() {
                        // Write gate asserts here, right after gap 2.
                        self.cur_live.pll.start_writing(self.cur_live.tm);
                    }
                    if self.load_write_data_byte(mfm) {
                        self.cur_live.pll.stop_writing(&mut *drive, self.cur_live.tm);
                        break RunOutcome::Finished;
                    }
                    self.cur_live.state = LiveState::WriteSectorData;
                    Self::checkpoint_locked(&mut self.cur_live, &mut self.checkpoint_live, &mut *drive);
                }

                // ---------------------------------------------------------
                // Format Track
                // ---------------------------------------------------------
                LiveState::WriteTrackPreSectors => {
                    if self.cur_live.write_one_bit(limit) {
                        break RunOutcome::Suspend;
                    }
                    if self.cur_live.bit_counter & 15 == 0 {
                        break RunOutcome::Delay(LiveState::WriteTrackPreSectorsByte);
                    }
                }
                LiveState::WriteTrackPreSectorsByte => {
                    if self.cur_live.byte_counter == 0 && self.cur_live.pll.write_start_time.is_infinite() {
                        self.cur_live.pll.start_writing(self.cur_live.tm);
                    }
                    if self.load_format_pre_byte(mfm) {
                        self.cur_live.byte_counter = 0;
                        self.cur_live.state = LiveState::WriteTrackSectorByte;
                    }
                    else {
                        self.cur_live.state = LiveState::WriteTrackPreSectors;
                    }
                    Self::checkpoint_locked(&mut self.cur_live, &mut self.checkpoint_live, &mut *drive);
                }
                LiveState::WriteTrackSector => {
                    if self.cur_live.write_one_bit(limit) {
                        break RunOutcome::Suspend;
                    }
                    if self.cur_live.bit_counter & 15 == 0 {
                        break RunOutcome::Delay(LiveState::WriteTrackSectorByte);
                    }
                }
                LiveState::WriteTrackSectorByte => match self.load_format_sector_byte(mfm) {
                    FormatStep::Loaded => {
                        self.cur_live.state = LiveState::WriteTrackSector;
                        Self::checkpoint_locked(&mut self.cur_live, &mut self.checkpoint_live, &mut *drive);
                    }
                    FormatStep::SectorDone => {
                        self.cur_live.byte_counter = 0;
                        self.format_sectors_left = self.format_sectors_left.saturating_sub(1);
                        if self.format_sectors_left == 0 {
                            self.cur_live.state = LiveState::WriteTrackPostSectorsByte;
                        }
                        else {
                            self.fifo.expect(4, true);
                            self.update_transfer();
                        }
                        Self::checkpoint_locked(&mut self.cur_live, &mut self.checkpoint_live, &mut *drive);
                    }
                },
                LiveState::WriteTrackPostSectors => {
                    if self.cur_live.write_one_bit(limit) {
                        break RunOutcome::Suspend;
                    }
                    if self.cur_live.bit_counter & 15 == 0 {
                        break RunOutcome::Delay(LiveState::WriteTrackPostSectorsByte);
                    }
                }
                LiveState::WriteTrackPostSectorsByte => {
                    // Fill gap bytes until the index pulse aborts the write.
                    self.cur_live
                        .load_byte(mfm, if mfm { MFM_GAP_BYTE } else { FM_GAP_BYTE });
                    self.cur_live.state = LiveState::WriteTrackPostSectors;
                    Self::checkpoint_locked(&mut self.cur_live, &mut self.checkpoint_live, &mut *drive);
                }
            }
        };

        drop(drive);
        match outcome {
            RunOutcome::Suspend => {}
            RunOutcome::Delay(state) => self.live_delay(state),
            RunOutcome::Finished => {
                if let Some(dd) = self.cur_live.drive {
                    self.flopi[dd].live = false;
                }
                self.cur_live.drive = None;
                self.cur_live.tm = TIME_NEVER;
                self.cur_live.state = LiveState::Idle;
                self.cur_live.next_state = None;
            }
        }
    }

    /// Fetch the next host-supplied byte for a write script. After a
    /// terminal count the FIFO's remaining contents drain first, then the
    /// field is padded with zero bytes instead of faulting.
    fn pop_write_byte(&mut self) -> u8 {
        if self.tc_active() && self.fifo.is_empty() {
            0
        }
        else {
            self.fifo_pop_live()
        }
    }

    /// A data address mark was recognized. Returns true when the sector must
    /// be skipped (SK set against a mismatched control mark).
    fn mark_found(&mut self, deleted: bool) -> bool {
        self.st2.remove(St2::MD);
        if deleted != self.cmd_deleted() {
            self.st2 |= St2::CM;
            if self.cmd_sk() {
                self.sector_skipped = true;
                return true;
            }
        }
        false
    }

    /// Load the next byte of the Write Data field script. Returns true when
    /// the script (including the trailing gap byte) is complete.
    fn load_write_data_byte(&mut self, mfm: bool) -> bool {
        let size = self.cur_live.sector_size;
        let b = self.cur_live.byte_counter;
        let mark = if self.cmd_deleted() { 0xF8 } else { 0xFB };
        if mfm {
            match b {
                b if b < MFM_SYNC_LEN => self.cur_live.load_mfm_byte(0x00),
                12 => {
                    self.cur_live.crc = CRC_CCITT_INIT;
                    self.cur_live.load_raw(MFM_SYNC_RAW, 0xA1, true);
                }
                13 | 14 => self.cur_live.load_raw(MFM_SYNC_RAW, 0xA1, true),
                15 => self.cur_live.load_mfm_byte(mark),
                b if b < 16 + size => {
                    let data = self.pop_write_byte();
                    self.cur_live.load_mfm_byte(data);
                }
                b if b == 16 + size => {
                    self.cur_live.crc_latch = self.cur_live.crc;
                    let hi = (self.cur_live.crc_latch >> 8) as u8;
                    self.cur_live.load_mfm_byte(hi);
                }
                b if b == 17 + size => {
                    let lo = (self.cur_live.crc_latch & 0xFF) as u8;
                    self.cur_live.load_mfm_byte(lo);
                }
                b if b == 18 + size => self.cur_live.load_mfm_byte(MFM_GAP_BYTE),
                _ => return true,
            }
        }
        else {
            match b {
                b if b < FM_SYNC_LEN => self.cur_live.load_fm_byte(0x00),
                6 => {
                    self.cur_live.crc = CRC_CCITT_INIT;
                    let raw = if mark == 0xF8 { FM_DDAM_RAW } else { FM_DAM_RAW };
                    self.cur_live.load_raw(raw, mark, true);
                }
                b if b < 7 + size => {
                    let data = self.pop_write_byte();
                    self.cur_live.load_fm_byte(data);
                }
                b if b == 7 + size => {
                    self.cur_live.crc_latch = self.cur_live.crc;
                    let hi = (self.cur_live.crc_latch >> 8) as u8;
                    self.cur_live.load_fm_byte(hi);
                }
                b if b == 8 + size => {
                    let lo = (self.cur_live.crc_latch & 0xFF) as u8;
                    self.cur_live.load_fm_byte(lo);
                }
                b if b == 9 + size => self.cur_live.load_fm_byte(FM_GAP_BYTE),
                _ => return true,
            }
        }
        self.cur_live.byte_counter += 1;
        false
    }

    /// Load the next byte of the pre-sector track area (gap 4a, sync, IAM,
    /// gap 1). Returns true once the area is complete.
    fn load_format_pre_byte(&mut self, mfm: bool) -> bool {
        let b = self.cur_live.byte_counter;
        if mfm {
            match b {
                b if b < MFM_GAP4A => self.cur_live.load_mfm_byte(MFM_GAP_BYTE),
                b if b < MFM_GAP4A + MFM_SYNC_LEN => self.cur_live.load_mfm_byte(0x00),
                92 | 93 | 94 => self.cur_live.load_raw(MFM_IAM_SYNC_RAW, 0xC2, false),
                95 => self.cur_live.load_mfm_byte(0xFC),
                b if b < 96 + MFM_GAP1 => self.cur_live.load_mfm_byte(MFM_GAP_BYTE),
                _ => return true,
            }
        }
        else {
            match b {
                b if b < FM_GAP4A => self.cur_live.load_fm_byte(FM_GAP_BYTE),
                b if b < FM_GAP4A + FM_SYNC_LEN => self.cur_live.load_fm_byte(0x00),
                46 => self.cur_live.load_raw(FM_IAM_RAW, 0xFC, false),
                b if b < 47 + FM_GAP1 => self.cur_live.load_fm_byte(FM_GAP_BYTE),
                _ => return true,
            }
        }
        self.cur_live.byte_counter += 1;
        false
    }

    /// Load the next byte of one formatted sector (sync, IDAM with
    /// FIFO-supplied C/H/R/N, gap 2, sync, DAM, filler payload, gap 3).
    fn load_format_sector_byte(&mut self, mfm: bool) -> FormatStep {
        let size = self.cur_live.sector_size;
        let gap3 = self.command[4] as usize;
        let filler = self.command[5];
        let b = self.cur_live.byte_counter;
        if mfm {
            match b {
                b if b < MFM_SYNC_LEN => self.cur_live.load_mfm_byte(0x00),
                12 => {
                    self.cur_live.crc = CRC_CCITT_INIT;
                    self.cur_live.load_raw(MFM_SYNC_RAW, 0xA1, true);
                }
                13 | 14 => self.cur_live.load_raw(MFM_SYNC_RAW, 0xA1, true),
                15 => self.cur_live.load_mfm_byte(0xFE),
                16 | 17 | 18 | 19 => {
                    let data = self.pop_write_byte();
                    self.cur_live.idbuf[b - 16] = data;
                    self.cur_live.load_mfm_byte(data);
                }
                20 => {
                    self.cur_live.crc_latch = self.cur_live.crc;
                    let hi = (self.cur_live.crc_latch >> 8) as u8;
                    self.cur_live.load_mfm_byte(hi);
                }
                21 => {
                    let lo = (self.cur_live.crc_latch & 0xFF) as u8;
                    self.cur_live.load_mfm_byte(lo);
                }
                b if b < 22 + MFM_GAP2 => self.cur_live.load_mfm_byte(MFM_GAP_BYTE),
                b if b < 44 + MFM_SYNC_LEN => self.cur_live.load_mfm_byte(0x00),
                56 => {
                    self.cur_live.crc = CRC_CCITT_INIT;
                    self.cur_live.load_raw(MFM_SYNC_RAW, 0xA1, true);
                }
                57 | 58 => self.cur_live.load_raw(MFM_SYNC_RAW, 0xA1, true),
                59 => self.cur_live.load_mfm_byte(0xFB),
                b if b < 60 + size => self.cur_live.load_mfm_byte(filler),
                b if b == 60 + size => {
                    self.cur_live.crc_latch = self.cur_live.crc;
                    let hi = (self.cur_live.crc_latch >> 8) as u8;
                    self.cur_live.load_mfm_byte(hi);
                }
                b if b == 61 + size => {
                    let lo = (self.cur_live.crc_latch & 0xFF) as u8;
                    self.cur_live.load_mfm_byte(lo);
                }
                b if b < 62 + size + gap3 => self.cur_live.load_mfm_byte(MFM_GAP_BYTE),
                _ => return FormatStep::SectorDone,
            }
        }
        else {
            match b {
                b if b < FM_SYNC_LEN => self.cur_live.load_fm_byte(0x00),
                6 => {
                    self.cur_live.crc = CRC_CCITT_INIT;
                    self.cur_live.load_raw(FM_IDAM_RAW, 0xFE, true);
                }
                7 | 8 | 9 | 10 => {
                    let data = self.pop_write_byte();
                    self.cur_live.idbuf[b - 7] = data;
                    self.cur_live.load_fm_byte(data);
                }
                11 => {
                    self.cur_live.crc_latch = self.cur_live.crc;
                    let hi = (self.cur_live.crc_latch >> 8) as u8;
                    self.cur_live.load_fm_byte(hi);
                }
                12 => {
                    let lo = (self.cur_live.crc_latch & 0xFF) as u8;
                    self.cur_live.load_fm_byte(lo);
                }
                b if b < 13 + FM_GAP2 => self.cur_live.load_fm_byte(FM_GAP_BYTE),
                b if b < 24 + FM_SYNC_LEN => self.cur_live.load_fm_byte(0x00),
                30 => {
                    self.cur_live.crc = CRC_CCITT_INIT;
                    self.cur_live.load_raw(FM_DAM_RAW, 0xFB, true);
                }
                b if b < 31 + size => self.cur_live.load_fm_byte(filler),
                b if b == 31 + size => {
                    self.cur_live.crc_latch = self.cur_live.crc;
                    let hi = (self.cur_live.crc_latch >> 8) as u8;
                    self.cur_live.load_fm_byte(hi);
                }
                b if b == 32 + size => {
                    let lo = (self.cur_live.crc_latch & 0xFF) as u8;
                    self.cur_live.load_fm_byte(lo);
                }
                b if b < 33 + size + gap3 => self.cur_live.load_fm_byte(FM_GAP_BYTE),
                _ => return FormatStep::SectorDone,
            }
        }
        self.cur_live.byte_counter += 1;
        FormatStep::Loaded
    }
}
