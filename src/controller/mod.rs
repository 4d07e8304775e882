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

//! The controller proper: register interface, command decode and dispatch,
//! the per-drive command state machine, the live bitstream engine's step
//! function, the result/status composer and the timing-delay calculators.
//!
//! Execution is cooperative and event driven. Command handlers validate
//! preconditions, compute a delay and arm the drive's timer; timer and
//! index-pulse callbacks then walk the drive's sub-state machine, which in
//! turn drives the live engine bit-by-bit against the drive's flux stream.
//! The live engine is free to run ahead of virtual time until it reaches a
//! point where it must exchange data with the rest of the machine; progress
//! is checkpointed so that a run-ahead can be rolled back and replayed if an
//! external event lands first. Rotational position is only authoritative at
//! the moment of actual access.

mod live_engine;

use crate::{
    chsn::DiskChsn,
    command::Command,
    crc::{CRC_CCITT_INIT, FM_DAM_CRC, FM_DDAM_CRC, FM_IDAM_CRC, MFM_A1_CRC},
    drive::{DriveLock, FluxDrive},
    fifo::{Fifo, FifoFault},
    host::{DmaLine, DmaLock, InterruptLine, InterruptLock, Scheduler, SchedulerLock, TimerId},
    live::{
        LiveContext,
        LiveState,
        FM_DAM_RAW,
        FM_DDAM_RAW,
        FM_IAM_RAW,
        FM_IDAM_RAW,
        MFM_IAM_SYNC_RAW,
        MFM_SYNC_RAW,
    },
    registers::{st0, Dor, MainStatus, RegisterOffset, St1, St2, St3},
    DataEncoding,
    DataRate,
    FdcError,
    MAX_DRIVES,
    TIME_NEVER,
};

/// Resync interval used when a live operation runs against a drive that
/// produces no index pulses (no media, motor off) - keeps the engine from
/// searching unbounded stretches of time in one call.
const RESYNC_INTERVAL: f64 = 1e-3;

/// Steps issued by Recalibrate before giving up on the track 0 sensor.
const RECALIBRATE_STEPS: u32 = 77;

/// VERSION result byte for the enhanced (82077AA-class) controller.
const VERSION_BYTE: u8 = 0x90;

// IBM System 34 track layout counts, in bytes.
const MFM_GAP4A: usize = 80;
const MFM_GAP1: usize = 50;
const MFM_GAP2: usize = 22;
const MFM_SYNC_LEN: usize = 12;
const FM_GAP4A: usize = 40;
const FM_GAP1: usize = 26;
const FM_GAP2: usize = 11;
const FM_SYNC_LEN: usize = 6;
const MFM_GAP_BYTE: u8 = 0x4E;
const FM_GAP_BYTE: u8 = 0xFF;

// Data address mark search windows, in bytes past the ID field.
const MFM_DAM_WINDOW_MIN: u32 = 28;
const MFM_DAM_WINDOW_MAX: u32 = 43;
const FM_DAM_WINDOW_MIN: u32 = 11;
const FM_DAM_WINDOW_MAX: u32 = 23;

/// Per-drive command state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MainState {
    #[default]
    Idle,
    ReadData,
    WriteData,
    ReadTrack,
    FormatTrack,
    ReadId,
    ScanData,
    Seek,
    Recalibrate,
}

/// Protocol phase within a drive's main state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
enum SubState {
    #[default]
    Idle,
    SeekMove,
    SeekDone,
    ScanId,
    ScanIdFailed,
    SectorRead,
    SectorWritten,
    WaitIndex,
    WaitIndexDone,
    TrackDone,
    CommandDone,
}

/// Controller-wide protocol phase.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, strum::Display)]
enum Phase {
    #[default]
    Command,
    Execution,
    Result,
}

/// Interrupt class raised when a result phase begins. Status-change
/// completions (seek end, polling attention) have no result phase and raise
/// their interrupt directly.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum IrqClass {
    /// Data-ready completion of a transfer command.
    Data,
    /// No interrupt - the host is already polling for this result.
    Silent,
}

#[derive(Clone, Debug)]
struct DriveState {
    main_state: MainState,
    sub_state: SubState,
    /// ST0 latched for Sense Interrupt, valid while `st0_filled`.
    st0: u8,
    st0_filled: bool,
    /// Present cylinder number as the controller tracks it.
    pcn: u8,
    /// Seek target cylinder.
    tcn: u8,
    steps_left: u32,
    dir_inward: bool,
    /// Index pulses seen / sectors transferred, depending on sub state.
    counter: u32,
    index: bool,
    live: bool,
    /// The head stays loaded until this instant; accesses before it skip
    /// the head load delay.
    hut_deadline: f64,
}

impl Default for DriveState {
    fn default() -> Self {
        DriveState {
            main_state: MainState::Idle,
            sub_state: SubState::Idle,
            st0: 0,
            st0_filled: false,
            pcn: 0,
            tcn: 0,
            steps_left: 0,
            dir_inward: false,
            counter: 0,
            index: false,
            live: false,
            hut_deadline: 0.0,
        }
    }
}

enum RunOutcome {
    /// The PLL reached the time limit; resume when time catches up.
    Suspend,
    /// Byte/field boundary: apply `state` once virtual time reaches tm.
    Delay(LiveState),
    /// The write script completed and flushed; the context goes idle.
    Finished,
}

/// Opaque serializable controller state. Only available while no command is
/// in flight (the live bitstream context is never captured); see
/// [`Fdc::snapshot`].
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FdcSnapshot {
    pub dor: u8,
    pub dsr: u8,
    pub rate: DataRate,
    pub srt: u8,
    pub hut: u8,
    pub hlt: u8,
    pub non_dma_mode: bool,
    pub fifocfg: u8,
    pub pretrk: u8,
    pub perp_mode: u8,
    pub locked: bool,
    pub last_eot: u8,
    pub pcn: [u8; MAX_DRIVES],
    pub drive_st0: [u8; MAX_DRIVES],
    pub st0_filled: [bool; MAX_DRIVES],
    pub hut_deadline: [f64; MAX_DRIVES],
    pub disk_changed: [bool; MAX_DRIVES],
}

pub struct Fdc {
    scheduler: SchedulerLock,
    irq: InterruptLock,
    dma: DmaLock,
    drives: [Option<DriveLock>; MAX_DRIVES],
    flopi: [DriveState; MAX_DRIVES],

    dor: Dor,
    dsr: u8,
    rate: DataRate,
    phase: Phase,

    command: [u8; 12],
    command_pos: usize,
    cur_command: Command,
    result: [u8; 16],
    result_len: usize,
    result_pos: usize,

    fifo: Fifo,
    fifocfg: u8,
    pretrk: u8,
    srt: u8,
    hut: u8,
    hlt: u8,
    non_dma_mode: bool,
    perp_mode: u8,
    locked: bool,
    last_eot: u8,

    /// ST0 under construction for the current transfer command.
    command_st0: u8,
    st1: St1,
    st2: St2,
    sector_size: usize,
    sector_skipped: bool,
    scan_all_equal: bool,
    scan_low_ok: bool,
    scan_high_ok: bool,
    format_sectors_left: u8,

    tc_line: bool,
    /// A TC pulse seen during the execution phase latches until command end.
    tc_latched: bool,
    tc_forced: bool,
    data_irq: bool,
    other_irq: bool,
    internal_drq: bool,
    irq_line: bool,
    drq_line: bool,
    disk_changed: [bool; MAX_DRIVES],

    cur_live: LiveContext,
    checkpoint_live: LiveContext,
}

impl Fdc {
    pub fn new(scheduler: SchedulerLock, irq: InterruptLock, dma: DmaLock) -> Self {
        let mut fdc = Fdc {
            scheduler,
            irq,
            dma,
            drives: [None, None, None, None],
            flopi: Default::default(),
            dor: Dor(0),
            dsr: DataRate::Rate250Kbps.select_bits(),
            rate: DataRate::Rate250Kbps,
            phase: Phase::Command,
            command: [0; 12],
            command_pos: 0,
            cur_command: Command::Invalid,
            result: [0; 16],
            result_len: 0,
            result_pos: 0,
            fifo: Fifo::default(),
            fifocfg: 0x20,
            pretrk: 0,
            srt: 0,
            hut: 0,
            hlt: 0,
            non_dma_mode: false,
            perp_mode: 0,
            locked: false,
            last_eot: 0,
            command_st0: 0,
            st1: St1::empty(),
            st2: St2::empty(),
            sector_size: 0,
            sector_skipped: false,
            scan_all_equal: true,
            scan_low_ok: true,
            scan_high_ok: true,
            format_sectors_left: 0,
            tc_line: false,
            tc_latched: false,
            tc_forced: false,
            data_irq: false,
            other_irq: false,
            internal_drq: false,
            irq_line: false,
            drq_line: false,
            disk_changed: [false; MAX_DRIVES],
            cur_live: LiveContext::default(),
            checkpoint_live: LiveContext::default(),
        };
        fdc.fifo.set_threshold(0);
        fdc
    }

    pub fn attach_drive(&mut self, slot: usize, drive: DriveLock) -> Result<(), FdcError> {
        if slot >= MAX_DRIVES {
            return Err(FdcError::InvalidDrive);
        }
        self.drives[slot] = Some(drive);
        Ok(())
    }

    pub fn drive(&self, slot: usize) -> Option<DriveLock> {
        self.drives.get(slot)?.clone()
    }

    pub fn irq_asserted(&self) -> bool {
        self.irq_line
    }

    /// Hardware reset: full reinitialization, including the SPECIFY-programmed
    /// timing parameters and the lock flag (contrast with the DOR/DSR soft
    /// reset, which preserves them). The controller is left with its reset
    /// line active; the host releases it by writing the DOR.
    pub fn reset(&mut self) {
        log::debug!("Fdc::reset(): hardware reset");
        self.srt = 0;
        self.hut = 0;
        self.hlt = 0;
        self.non_dma_mode = false;
        self.perp_mode = 0;
        self.locked = false;
        self.fifocfg = 0x20;
        self.pretrk = 0;
        self.last_eot = 0;
        self.rate = DataRate::Rate250Kbps;
        self.dsr = self.rate.select_bits();
        self.dor = Dor(0);
        for fi in self.flopi.iter_mut() {
            *fi = DriveState::default();
        }
        self.disk_changed = [false; MAX_DRIVES];
        self.enter_reset();
    }

    // -----------------------------------------------------------------------
    // Register interface
    // -----------------------------------------------------------------------

    pub fn read_register(&mut self, offset: u8) -> u8 {
        let reg = RegisterOffset::from(offset);
        let data = match reg {
            RegisterOffset::StatusA => self.read_sra(),
            RegisterOffset::StatusB => self.read_srb(),
            RegisterOffset::DigitalOutput => self.dor.0,
            RegisterOffset::MainStatus => self.read_msr().bits(),
            RegisterOffset::Fifo => self.read_fifo_port(),
            RegisterOffset::DigitalInput => self.read_dir(),
            RegisterOffset::TapeDrive | RegisterOffset::Reserved => 0xFF,
        };
        log::trace!("Fdc::read_register(): {} -> {:02X}", reg, data);
        data
    }

    pub fn write_register(&mut self, offset: u8, data: u8) {
        let reg = RegisterOffset::from(offset);
        log::trace!("Fdc::write_register(): {} <- {:02X}", reg, data);
        match reg {
            RegisterOffset::DigitalOutput => self.write_dor(data),
            RegisterOffset::MainStatus => self.write_dsr(data),
            RegisterOffset::Fifo => self.write_fifo_port(data),
            RegisterOffset::DigitalInput => {
                // CCR: rate select only
                self.rate = DataRate::from_select_bits(data);
            }
            _ => {
                log::warn!("Fdc::write_register(): write to read-only register {}", reg);
            }
        }
    }

    /// Diagnostic snapshot of internal lines (PS/2 style subset).
    fn read_sra(&self) -> u8 {
        let mut sra = 0u8;
        if self.irq_line {
            sra |= 0x80;
        }
        if self.drq_line {
            sra |= 0x40;
        }
        if let Some(rc) = self.drive(self.dor.drive_select()) {
            let drive = rc.borrow();
            if drive.track0() {
                sra |= 0x10;
            }
            if drive.side() != 0 {
                sra |= 0x04;
            }
            if drive.write_protected() {
                sra |= 0x02;
            }
        }
        sra
    }

    fn read_srb(&self) -> u8 {
        let mut srb = 0xC0u8;
        if self.dor.motor_on(0) {
            srb |= 0x01;
        }
        if self.dor.motor_on(1) {
            srb |= 0x02;
        }
        if self.dor.drive_select() & 1 != 0 {
            srb |= 0x20;
        }
        srb
    }

    fn read_dir(&self) -> u8 {
        let mut dir = self.rate.select_bits();
        if self.disk_changed[self.dor.drive_select()] {
            dir |= 0x80;
        }
        dir
    }

    fn read_msr(&self) -> MainStatus {
        let mut msr = MainStatus::empty();
        for (i, fi) in self.flopi.iter().enumerate() {
            if matches!(fi.main_state, MainState::Seek | MainState::Recalibrate) {
                msr |= MainStatus::from_bits_truncate(1 << i);
            }
        }
        if self.phase != Phase::Command || self.command_pos > 0 {
            msr |= MainStatus::CB;
        }
        match self.phase {
            Phase::Command => {
                if !self.dor.reset_active() {
                    msr |= MainStatus::RQM;
                }
            }
            Phase::Execution => {
                if self.non_dma_mode {
                    msr |= MainStatus::NON_DMA;
                    if self.internal_drq {
                        msr |= MainStatus::RQM;
                        if !self.fifo.write_dir() {
                            msr |= MainStatus::DIO;
                        }
                    }
                }
            }
            Phase::Result => {
                msr |= MainStatus::RQM | MainStatus::DIO;
            }
        }
        msr
    }

    fn write_dor(&mut self, data: u8) {
        let old = self.dor;
        self.dor = Dor(data);
        log::debug!("Fdc::write_dor(): {:02X}", data);
        for d in 0..MAX_DRIVES {
            if let Some(rc) = self.drive(d) {
                rc.borrow_mut().set_motor(self.dor.motor_on(d));
            }
        }
        if !old.reset_active() && self.dor.reset_active() {
            self.enter_reset();
        }
        else if old.reset_active() && !self.dor.reset_active() {
            self.leave_reset();
        }
        // The DMA gate bit masks the IRQ/DRQ outputs.
        self.check_irq();
        self.update_transfer();
    }

    fn write_dsr(&mut self, data: u8) {
        self.dsr = data & 0x7F;
        self.rate = DataRate::from_select_bits(data);
        if data & 0x80 != 0 {
            // Self-clearing software reset pulse.
            self.enter_reset();
            self.leave_reset();
        }
    }

    /// Abort everything in flight and return to the idle protocol state.
    /// SPECIFY parameters always survive; CONFIGURE/PRETRK survive only when
    /// locked.
    fn enter_reset(&mut self) {
        log::debug!("Fdc::enter_reset(): soft reset asserted");
        self.live_abort();
        for d in 0..MAX_DRIVES {
            self.scheduler.borrow_mut().cancel(TimerId(d));
            let pcn = self.flopi[d].pcn;
            let hut_deadline = self.flopi[d].hut_deadline;
            self.flopi[d] = DriveState {
                pcn,
                hut_deadline,
                ..DriveState::default()
            };
        }
        if !self.locked {
            self.fifocfg = 0x20;
            self.pretrk = 0;
            self.fifo.set_threshold(0);
        }
        self.phase = Phase::Command;
        self.command_pos = 0;
        self.cur_command = Command::Invalid;
        self.result_len = 0;
        self.result_pos = 0;
        self.fifo.reset();
        self.tc_forced = false;
        self.data_irq = false;
        self.other_irq = false;
        self.internal_drq = false;
        self.check_irq();
        self.update_transfer();
    }

    /// Reset released: raise the four-drive polling attention unless polling
    /// was disabled via CONFIGURE.
    fn leave_reset(&mut self) {
        log::debug!("Fdc::leave_reset(): soft reset released");
        if self.fifocfg & 0x10 == 0 {
            for d in 0..MAX_DRIVES {
                self.flopi[d].st0 = st0::IC_ATTENTION | d as u8;
                self.flopi[d].st0_filled = true;
            }
            self.other_irq = true;
            self.check_irq();
        }
    }

    fn read_fifo_port(&mut self) -> u8 {
        match self.phase {
            Phase::Result => {
                self.data_irq = false;
                self.other_irq = false;
                self.check_irq();
                let data = self.result[self.result_pos];
                self.result_pos += 1;
                if self.result_pos >= self.result_len {
                    log::debug!("Fdc::read_fifo_port(): result phase complete");
                    self.phase = Phase::Command;
                    self.command_pos = 0;
                }
                data
            }
            Phase::Execution => {
                let data = self.fifo.pop(false).unwrap_or(0);
                self.update_transfer();
                data
            }
            Phase::Command => {
                log::warn!("Fdc::read_fifo_port(): read while awaiting command bytes");
                0xFF
            }
        }
    }

    fn write_fifo_port(&mut self, data: u8) {
        match self.phase {
            Phase::Command => {
                if self.dor.reset_active() {
                    log::warn!("Fdc::write_fifo_port(): write while in reset ignored");
                    return;
                }
                if self.command_pos == 0 {
                    self.cur_command = Command::decode(data);
                    self.data_irq = false;
                    self.other_irq = false;
                    self.check_irq();
                    log::debug!(
                        "Fdc::write_fifo_port(): command {} (opcode {:02X})",
                        self.cur_command,
                        data
                    );
                }
                self.command[self.command_pos] = data;
                self.command_pos += 1;
                if self.command_pos == self.cur_command.param_bytes() {
                    self.start_command();
                }
            }
            Phase::Execution => {
                let _ = self.fifo.push(data, false);
                self.update_transfer();
            }
            Phase::Result => {
                log::warn!("Fdc::write_fifo_port(): write during result phase ignored");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Host signal interface
    // -----------------------------------------------------------------------

    /// Terminal count line from the DMA controller. A pulse during the
    /// execution phase latches until the command completes.
    pub fn tc(&mut self, state: bool) {
        if state && !self.tc_line {
            log::trace!("Fdc::tc(): terminal count asserted");
            if self.phase == Phase::Execution {
                self.tc_latched = true;
            }
        }
        self.tc_line = state;
    }

    /// DMA byte fetch (disk to memory direction).
    pub fn dma_read(&mut self) -> u8 {
        let data = self.fifo.pop(false).unwrap_or(0);
        self.update_transfer();
        data
    }

    /// DMA byte store (memory to disk direction).
    pub fn dma_write(&mut self, data: u8) {
        let _ = self.fifo.push(data, false);
        self.update_transfer();
    }

    /// A previously armed drive timer elapsed.
    pub fn timer_expired(&mut self, timer: TimerId) {
        let d = timer.0;
        if d >= MAX_DRIVES {
            return;
        }
        self.live_sync();
        self.general_continue(d);
    }

    /// Index pulse notification from a drive.
    pub fn index_pulse(&mut self, d: usize, state: bool) {
        if d >= MAX_DRIVES {
            return;
        }
        if self.cur_live.drive == Some(d) {
            self.live_sync();
        }
        let rising = state && !self.flopi[d].index;
        self.flopi[d].index = state;
        if rising {
            match self.flopi[d].sub_state {
                SubState::ScanId => {
                    if self.flopi[d].main_state == MainState::ReadTrack {
                        self.flopi[d].sub_state = SubState::TrackDone;
                        self.live_abort();
                    }
                    else {
                        self.flopi[d].counter += 1;
                        if self.flopi[d].counter >= 2 {
                            log::debug!(
                                "Fdc::index_pulse(): no matching header after two revolutions on drive {}",
                                d
                            );
                            self.flopi[d].sub_state = SubState::ScanIdFailed;
                            self.live_abort();
                        }
                    }
                }
                SubState::SectorRead if self.flopi[d].main_state == MainState::ReadTrack => {
                    self.flopi[d].sub_state = SubState::TrackDone;
                    self.live_abort();
                }
                SubState::WaitIndex => {
                    self.flopi[d].sub_state = SubState::WaitIndexDone;
                }
                SubState::TrackDone if self.flopi[d].main_state == MainState::FormatTrack => {
                    // Formatting fills gap bytes until the index comes around.
                    self.live_abort();
                }
                _ => {}
            }
        }
        self.general_continue(d);
    }

    /// The host removed (or changed) the medium in a drive. Aborts any
    /// in-flight operation on it, latches the disk-change bit and raises the
    /// polling attention.
    pub fn media_changed(&mut self, d: usize) {
        if d >= MAX_DRIVES {
            return;
        }
        self.disk_changed[d] = true;
        if self.flopi[d].live || self.cur_live.drive == Some(d) {
            self.live_abort();
        }
        match self.flopi[d].main_state {
            MainState::Idle | MainState::Seek | MainState::Recalibrate => {}
            _ => {
                log::debug!("Fdc::media_changed(): aborting command on drive {}", d);
                self.command_st0 |= st0::IC_ABNORMAL | st0::NOT_READY;
                self.flopi[d].sub_state = SubState::CommandDone;
                self.general_continue(d);
            }
        }
        if self.fifocfg & 0x10 == 0 {
            self.flopi[d].st0 = st0::IC_ATTENTION | d as u8;
            self.flopi[d].st0_filled = true;
            self.other_irq = true;
            self.check_irq();
        }
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    /// Capture the controller's register and per-drive state. Refused while
    /// any command (or overlapped seek) is in flight: the live bitstream
    /// context is deliberately not serializable, so hosts must quiesce the
    /// controller first.
    pub fn snapshot(&self) -> Result<FdcSnapshot, FdcError> {
        if self.busy() {
            return Err(FdcError::OperationInFlight);
        }
        Ok(FdcSnapshot {
            dor: self.dor.0,
            dsr: self.dsr,
            rate: self.rate,
            srt: self.srt,
            hut: self.hut,
            hlt: self.hlt,
            non_dma_mode: self.non_dma_mode,
            fifocfg: self.fifocfg,
            pretrk: self.pretrk,
            perp_mode: self.perp_mode,
            locked: self.locked,
            last_eot: self.last_eot,
            pcn: core::array::from_fn(|d| self.flopi[d].pcn),
            drive_st0: core::array::from_fn(|d| self.flopi[d].st0),
            st0_filled: core::array::from_fn(|d| self.flopi[d].st0_filled),
            hut_deadline: core::array::from_fn(|d| self.flopi[d].hut_deadline),
            disk_changed: self.disk_changed,
        })
    }

    pub fn restore(&mut self, snap: &FdcSnapshot) -> Result<(), FdcError> {
        if self.busy() {
            return Err(FdcError::OperationInFlight);
        }
        self.dor = Dor(snap.dor);
        self.dsr = snap.dsr;
        self.rate = snap.rate;
        self.srt = snap.srt;
        self.hut = snap.hut;
        self.hlt = snap.hlt;
        self.non_dma_mode = snap.non_dma_mode;
        self.fifocfg = snap.fifocfg;
        self.pretrk = snap.pretrk;
        self.perp_mode = snap.perp_mode;
        self.locked = snap.locked;
        self.last_eot = snap.last_eot;
        self.fifo
            .set_threshold(if snap.fifocfg & 0x20 != 0 { 0 } else { (snap.fifocfg & 0x0F) as usize });
        for d in 0..MAX_DRIVES {
            self.flopi[d].pcn = snap.pcn[d];
            self.flopi[d].st0 = snap.drive_st0[d];
            self.flopi[d].st0_filled = snap.st0_filled[d];
            self.flopi[d].hut_deadline = snap.hut_deadline[d];
        }
        self.disk_changed = snap.disk_changed;
        self.check_irq();
        Ok(())
    }

    fn busy(&self) -> bool {
        self.phase != Phase::Command
            || self.command_pos > 0
            || self.flopi.iter().any(|fi| fi.main_state != MainState::Idle)
    }

    // -----------------------------------------------------------------------
    // Interrupt and transfer plumbing
    // -----------------------------------------------------------------------

    fn now(&self) -> f64 {
        self.scheduler.borrow().time()
    }

    fn drive_rc(&self, d: usize) -> Option<DriveLock> {
        self.drives[d].clone()
    }

    fn check_irq(&mut self) {
        let state = (self.data_irq || self.other_irq || self.internal_drq)
            && !self.dor.reset_active()
            && self.dor.dma_gate();
        if state != self.irq_line {
            self.irq_line = state;
            log::trace!("Fdc::check_irq(): irq {}", state);
            self.irq.borrow_mut().set_irq(state);
        }
    }

    fn update_transfer(&mut self) {
        let want = self.phase == Phase::Execution && self.fifo.wants_service();
        if self.non_dma_mode || !self.dor.dma_gate() {
            if self.drq_line {
                self.drq_line = false;
                self.dma.borrow_mut().set_drq(false);
            }
            if want != self.internal_drq {
                self.internal_drq = want;
                self.check_irq();
            }
        }
        else {
            if self.internal_drq {
                self.internal_drq = false;
                self.check_irq();
            }
            if want != self.drq_line {
                self.drq_line = want;
                self.dma.borrow_mut().set_drq(want);
            }
        }
    }

    fn tc_active(&self) -> bool {
        self.tc_line || self.tc_latched || self.tc_forced
    }

    /// Internal-side FIFO push from the live engine. Overrun forces an
    /// internal terminal count and disables further transfer.
    fn fifo_push_live(&mut self, data: u8) {
        if let Err(FifoFault::Overrun) = self.fifo.push(data, true) {
            log::warn!("Fdc::fifo_push_live(): FIFO overrun, forcing terminal count");
            self.st1 |= St1::OR;
            self.tc_forced = true;
            self.fifo.end_transfer();
        }
        self.update_transfer();
    }

    /// Internal-side FIFO pop for the live engine's write scripts. Underrun
    /// forces an internal terminal count; the remainder of the field is
    /// padded with zero bytes.
    fn fifo_pop_live(&mut self) -> u8 {
        if self.fifo.expected() == 0 && self.fifo.is_empty() {
            // Past terminal count: pad.
            return 0;
        }
        match self.fifo.pop(true) {
            Ok(data) => {
                self.update_transfer();
                data
            }
            Err(_) => {
                log::warn!("Fdc::fifo_pop_live(): FIFO underrun, forcing terminal count");
                self.st1 |= St1::OR;
                self.tc_forced = true;
                self.fifo.end_transfer();
                self.update_transfer();
                0
            }
        }
    }

    // -----------------------------------------------------------------------
    // Timing model
    // -----------------------------------------------------------------------

    /// Microseconds per timing unit at the current data rate (one SRT unit).
    fn rate_scale_us(&self) -> f64 {
        500_000.0 / self.rate.kbps() as f64
    }

    /// Time for one head step at the programmed step rate.
    fn step_period(&self) -> f64 {
        (16 - self.srt as i32) as f64 * self.rate_scale_us() * 1e-6
    }

    /// Head load settle time. A programmed zero selects the maximum interval.
    fn head_load_time(&self) -> f64 {
        let hlt = if self.hlt == 0 { 128 } else { self.hlt as u32 };
        hlt as f64 * 2.0 * self.rate_scale_us() * 1e-6
    }

    /// Head unload window after command completion.
    fn head_unload_time(&self) -> f64 {
        let hut = if self.hut == 0 { 16 } else { self.hut as u32 };
        hut as f64 * 16.0 * self.rate_scale_us() * 1e-6
    }

    // -----------------------------------------------------------------------
    // Command decode helpers
    // -----------------------------------------------------------------------

    fn cmd_drive(&self) -> usize {
        (self.command[1] & 0x03) as usize
    }
    fn cmd_head(&self) -> u8 {
        (self.command[1] >> 2) & 1
    }
    fn cmd_mt(&self) -> bool {
        self.command[0] & 0x80 != 0
    }
    fn cmd_mfm(&self) -> bool {
        self.command[0] & 0x40 != 0
    }
    fn cmd_sk(&self) -> bool {
        self.command[0] & 0x20 != 0
    }
    fn cmd_deleted(&self) -> bool {
        matches!(self.cur_command, Command::ReadDeletedData | Command::WriteDeletedData)
    }
    fn encoding(&self) -> DataEncoding {
        if self.cmd_mfm() {
            DataEncoding::Mfm
        }
        else {
            DataEncoding::Fm
        }
    }
    fn implied_seek_enabled(&self) -> bool {
        self.fifocfg & 0x40 != 0
    }
    fn is_scan(&self) -> bool {
        matches!(
            self.cur_command,
            Command::ScanEqual | Command::ScanLowOrEqual | Command::ScanHighOrEqual
        )
    }

    /// Physical size of the sector field being processed, from N (or 128
    /// when N=0 and DTL governs the transfer length).
    fn field_size(&self) -> usize {
        if self.command[5] == 0 {
            128
        }
        else {
            DiskChsn::n_to_bytes(self.command[5])
        }
    }

    /// Bytes actually moved through the FIFO for one sector.
    fn transfer_size(&self) -> usize {
        if self.command[5] == 0 {
            (self.command[8] as usize).min(128)
        }
        else {
            DiskChsn::n_to_bytes(self.command[5])
        }
    }

    fn sector_matches(&self) -> bool {
        self.cur_live.idbuf[0] == self.command[2]
            && self.cur_live.idbuf[1] == self.command[3]
            && self.cur_live.idbuf[2] == self.command[4]
            && self.cur_live.idbuf[3] == self.command[5]
    }

    // -----------------------------------------------------------------------
    // Command dispatch
    // -----------------------------------------------------------------------

    fn start_command(&mut self) {
        log::debug!(
            "Fdc::start_command(): {} {:02X?}",
            self.cur_command,
            &self.command[..self.command_pos]
        );
        self.phase = Phase::Execution;
        self.tc_forced = false;
        self.tc_latched = false;
        match self.cur_command {
            Command::ReadData
            | Command::ReadDeletedData
            | Command::WriteData
            | Command::WriteDeletedData
            | Command::ScanEqual
            | Command::ScanLowOrEqual
            | Command::ScanHighOrEqual => self.start_rw_data(),
            Command::ReadTrack => self.start_read_track(),
            Command::FormatTrack => self.start_format_track(),
            Command::ReadId => self.start_read_id(),
            Command::Recalibrate => self.start_recalibrate(),
            Command::Seek => self.start_seek(),
            Command::SenseInterrupt => self.exec_sense_interrupt(),
            Command::SenseDriveStatus => self.exec_sense_drive_status(),
            Command::Specify => self.exec_specify(),
            Command::Configure => self.exec_configure(),
            Command::Perpendicular => self.exec_perpendicular(),
            Command::Dumpreg => self.exec_dumpreg(),
            Command::Version => self.exec_version(),
            Command::Lock => self.exec_lock(),
            Command::Invalid => self.exec_invalid(),
        }
    }

    fn start_result_phase(&mut self, bytes: &[u8], class: IrqClass) {
        self.result[..bytes.len()].copy_from_slice(bytes);
        self.result_len = bytes.len();
        self.result_pos = 0;
        self.phase = Phase::Result;
        self.update_transfer();
        match class {
            IrqClass::Data => {
                self.data_irq = true;
                self.check_irq();
            }
            IrqClass::Silent => {}
        }
        log::debug!("Fdc::start_result_phase(): {:02X?}", &self.result[..self.result_len]);
    }

    /// Command back to idle with no result and no interrupt: reproduces the
    /// real chip locking up when a command is issued against a drive whose
    /// motor is off, that has no media, or whose medium does not match the
    /// programmed data rate. Only a reset recovers - do not "fix" this.
    fn hang(&mut self, d: usize, main_state: MainState) {
        log::warn!(
            "Fdc::hang(): {} on drive {} with unmet preconditions - controller hung until reset",
            self.cur_command,
            d
        );
        self.flopi[d].main_state = main_state;
        self.flopi[d].sub_state = SubState::Idle;
        if matches!(main_state, MainState::Seek | MainState::Recalibrate) {
            // Seek-class commands have no result phase; only the drive busy
            // bit stays stuck.
            self.phase = Phase::Command;
            self.command_pos = 0;
        }
        // Transfer commands leave the controller busy (CB set, no RQM).
    }

    /// Common precondition check: drive present, motor on, media present,
    /// media rate matching the programmed rate.
    fn ready_for_transfer(&self, d: usize) -> bool {
        let Some(rc) = self.drive_rc(d) else {
            return false;
        };
        let drive = rc.borrow();
        if !self.dor.motor_on(d) || !drive.media_present() {
            return false;
        }
        match drive.media_rate() {
            Some(rate) => rate == self.rate,
            None => true,
        }
    }

    // -----------------------------------------------------------------------
    // Immediate commands
    // -----------------------------------------------------------------------

    fn exec_specify(&mut self) {
        self.srt = self.command[1] >> 4;
        self.hut = self.command[1] & 0x0F;
        self.hlt = self.command[2] >> 1;
        self.non_dma_mode = self.command[2] & 1 != 0;
        log::debug!(
            "Fdc::exec_specify(): srt {} hut {} hlt {} non-dma {}",
            self.srt,
            self.hut,
            self.hlt,
            self.non_dma_mode
        );
        self.phase = Phase::Command;
        self.command_pos = 0;
    }

    fn exec_configure(&mut self) {
        self.fifocfg = self.command[2];
        self.pretrk = self.command[3];
        self.fifo.set_threshold(if self.fifocfg & 0x20 != 0 {
            0
        }
        else {
            (self.fifocfg & 0x0F) as usize
        });
        self.phase = Phase::Command;
        self.command_pos = 0;
    }

    fn exec_perpendicular(&mut self) {
        self.perp_mode = self.command[1];
        self.phase = Phase::Command;
        self.command_pos = 0;
    }

    fn exec_sense_interrupt(&mut self) {
        self.other_irq = false;
        self.check_irq();
        for d in 0..MAX_DRIVES {
            if self.flopi[d].st0_filled {
                self.flopi[d].st0_filled = false;
                let bytes = [self.flopi[d].st0, self.flopi[d].pcn];
                self.start_result_phase(&bytes, IrqClass::Silent);
                return;
            }
        }
        // Nothing pending: single invalid status byte.
        self.start_result_phase(&[st0::IC_INVALID], IrqClass::Silent);
    }

    fn exec_sense_drive_status(&mut self) {
        let d = self.cmd_drive();
        let hd = self.cmd_head();
        let mut st3 = St3::empty();
        if hd != 0 {
            st3 |= St3::HD;
        }
        if let Some(rc) = self.drive_rc(d) {
            let drive = rc.borrow();
            if drive.two_sided() {
                st3 |= St3::TS;
            }
            if drive.track0() {
                st3 |= St3::T0;
            }
            if self.dor.motor_on(d) && drive.media_present() {
                st3 |= St3::RDY;
            }
            if drive.write_protected() {
                st3 |= St3::WP;
            }
        }
        self.start_result_phase(&[st3.bits() | (d as u8)], IrqClass::Silent);
    }

    fn exec_dumpreg(&mut self) {
        let bytes = [
            self.flopi[0].pcn,
            self.flopi[1].pcn,
            self.flopi[2].pcn,
            self.flopi[3].pcn,
            (self.srt << 4) | self.hut,
            (self.hlt << 1) | self.non_dma_mode as u8,
            self.last_eot,
            ((self.locked as u8) << 7) | (self.perp_mode & 0x7F),
            self.fifocfg,
            self.pretrk,
        ];
        self.start_result_phase(&bytes, IrqClass::Silent);
    }

    fn exec_version(&mut self) {
        self.start_result_phase(&[VERSION_BYTE], IrqClass::Silent);
    }

    fn exec_lock(&mut self) {
        self.locked = self.command[0] & 0x80 != 0;
        self.start_result_phase(&[(self.locked as u8) << 4], IrqClass::Silent);
    }

    fn exec_invalid(&mut self) {
        self.start_result_phase(&[st0::IC_INVALID], IrqClass::Silent);
    }

    // -----------------------------------------------------------------------
    // Seek / Recalibrate
    // -----------------------------------------------------------------------

    fn start_seek(&mut self) {
        let d = self.cmd_drive();
        self.flopi[d].st0_filled = false;
        if !self.ready_for_transfer(d) {
            self.hang(d, MainState::Seek);
            return;
        }
        let tcn = self.command[2];
        let pcn = self.flopi[d].pcn;
        self.flopi[d].main_state = MainState::Seek;
        self.flopi[d].sub_state = SubState::SeekMove;
        self.flopi[d].tcn = tcn;
        self.flopi[d].dir_inward = tcn > pcn;
        self.flopi[d].steps_left = (tcn as i32 - pcn as i32).unsigned_abs();
        self.phase = Phase::Command;
        self.command_pos = 0;
        log::debug!(
            "Fdc::start_seek(): drive {} pcn {} -> tcn {} ({} steps)",
            d,
            pcn,
            tcn,
            self.flopi[d].steps_left
        );
        self.scheduler.borrow_mut().arm(TimerId(d), self.step_period());
    }

    fn start_recalibrate(&mut self) {
        let d = self.cmd_drive();
        self.flopi[d].st0_filled = false;
        if !self.ready_for_transfer(d) {
            self.hang(d, MainState::Recalibrate);
            return;
        }
        self.flopi[d].main_state = MainState::Recalibrate;
        self.flopi[d].sub_state = SubState::SeekMove;
        self.flopi[d].tcn = 0;
        self.flopi[d].dir_inward = false;
        self.flopi[d].steps_left = RECALIBRATE_STEPS;
        self.phase = Phase::Command;
        self.command_pos = 0;
        log::debug!("Fdc::start_recalibrate(): drive {}", d);
        self.scheduler.borrow_mut().arm(TimerId(d), self.step_period());
    }

    fn seek_continue(&mut self, d: usize) {
        let Some(rc) = self.drive_rc(d) else {
            return;
        };
        if self.flopi[d].sub_state != SubState::SeekMove {
            return;
        }
        let recal = self.flopi[d].main_state == MainState::Recalibrate;
        let mut done = false;
        let mut equipment_check = false;
        {
            let mut drive = rc.borrow_mut();
            if self.flopi[d].steps_left > 0 && !(recal && drive.track0()) {
                drive.step(self.flopi[d].dir_inward);
                if drive.media_present() {
                    self.disk_changed[d] = false;
                }
                self.flopi[d].steps_left -= 1;
                self.flopi[d].pcn = if self.flopi[d].dir_inward {
                    self.flopi[d].pcn.saturating_add(1)
                }
                else {
                    self.flopi[d].pcn.saturating_sub(1)
                };
            }
            if recal {
                if drive.track0() {
                    done = true;
                    self.flopi[d].pcn = 0;
                }
                else if self.flopi[d].steps_left == 0 {
                    // No track 0 signal after the full step budget.
                    done = true;
                    equipment_check = true;
                }
            }
            else if self.flopi[d].steps_left == 0 {
                done = true;
                if drive.cylinder() != self.flopi[d].tcn {
                    // Target lies beyond the drive's physical limit.
                    equipment_check = true;
                    self.flopi[d].pcn = drive.cylinder();
                }
            }
        }
        if !done {
            self.scheduler.borrow_mut().arm(TimerId(d), self.step_period());
            return;
        }
        let mut st0 = st0::SEEK_END | d as u8;
        if equipment_check {
            st0 |= st0::IC_ABNORMAL | st0::EQUIPMENT_CHECK;
        }
        log::debug!(
            "Fdc::seek_continue(): drive {} settled at pcn {} st0 {:02X}",
            d,
            self.flopi[d].pcn,
            st0
        );
        self.flopi[d].st0 = st0;
        self.flopi[d].st0_filled = true;
        self.flopi[d].main_state = MainState::Idle;
        self.flopi[d].sub_state = SubState::Idle;
        self.other_irq = true;
        self.check_irq();
    }

    // -----------------------------------------------------------------------
    // Transfer command setup
    // -----------------------------------------------------------------------

    /// Common entry for Read Data / Write Data / Scan, and the shared delay
    /// computation (implied seek + head load) for all media commands.
    fn start_rw_data(&mut self) {
        let d = self.cmd_drive();
        let write = matches!(self.cur_command, Command::WriteData | Command::WriteDeletedData);
        let scan = self.is_scan();
        let main_state = if scan {
            MainState::ScanData
        }
        else if write {
            MainState::WriteData
        }
        else {
            MainState::ReadData
        };
        self.last_eot = self.command[6];
        self.begin_media_command(d, main_state, write);
    }

    fn start_read_id(&mut self) {
        let d = self.cmd_drive();
        self.begin_media_command(d, MainState::ReadId, false);
    }

    fn start_read_track(&mut self) {
        let d = self.cmd_drive();
        self.last_eot = self.command[6];
        self.begin_media_command(d, MainState::ReadTrack, false);
    }

    fn start_format_track(&mut self) {
        let d = self.cmd_drive();
        self.format_sectors_left = self.command[3];
        if self.begin_media_command(d, MainState::FormatTrack, true) {
            // Formatting never scans, so the search-failure presets do not
            // apply.
            self.st1 = St1::empty();
            self.st2 = St2::empty();
        }
    }

    /// Validate preconditions, set up status accumulators and arm the entry
    /// delay for a media command. Returns false when the command already
    /// terminated (hang or immediate abnormal result).
    fn begin_media_command(&mut self, d: usize, main_state: MainState, write: bool) -> bool {
        let hd = self.cmd_head();
        self.command_st0 = (hd << 2) | d as u8;
        self.st1 = St1::MA;
        self.st2 = St2::MD;
        self.sector_skipped = false;
        if !self.ready_for_transfer(d) {
            self.hang(d, main_state);
            return false;
        }
        let Some(rc) = self.drive_rc(d) else {
            self.hang(d, main_state);
            return false;
        };
        {
            let mut drive = rc.borrow_mut();
            if write && drive.write_protected() {
                log::debug!("Fdc::begin_media_command(): drive {} write protected", d);
                self.st1 = St1::NW;
                self.st2 = St2::empty();
                self.command_st0 |= st0::IC_ABNORMAL;
                drop(drive);
                self.flopi[d].main_state = main_state;
                self.flopi[d].sub_state = SubState::CommandDone;
                self.general_continue(d);
                return false;
            }
            if hd == 1 && !drive.two_sided() {
                log::debug!("Fdc::begin_media_command(): drive {} has no side 1", d);
                self.st1 = St1::empty();
                self.st2 = St2::empty();
                self.command_st0 |= st0::IC_ABNORMAL | st0::NOT_READY;
                drop(drive);
                self.flopi[d].main_state = main_state;
                self.flopi[d].sub_state = SubState::CommandDone;
                self.general_continue(d);
                return false;
            }
            drive.select_side(hd);
        }

        self.flopi[d].main_state = main_state;
        self.flopi[d].sub_state = SubState::SeekDone;

        let mut delay = 0.0;
        // Implied seek (CONFIGURE EIS) for commands that carry a cylinder.
        let c = self.command[2];
        if self.implied_seek_enabled()
            && !matches!(main_state, MainState::ReadId | MainState::FormatTrack)
            && c != self.flopi[d].pcn
        {
            let pcn = self.flopi[d].pcn;
            let steps = (c as i32 - pcn as i32).unsigned_abs();
            let mut drive = rc.borrow_mut();
            for _ in 0..steps {
                drive.step(c > pcn);
            }
            if drive.media_present() {
                self.disk_changed[d] = false;
            }
            drop(drive);
            self.flopi[d].pcn = c;
            delay += steps as f64 * self.step_period();
            log::debug!(
                "Fdc::begin_media_command(): implied seek drive {} {} -> {} ({} steps)",
                d,
                pcn,
                c,
                steps
            );
        }
        let now = self.now();
        if now >= self.flopi[d].hut_deadline {
            delay += self.head_load_time();
        }
        self.scheduler.borrow_mut().arm(TimerId(d), delay);
        true
    }

    /// Compose the standard 7-byte transfer result and end the command.
    fn finish_transfer_command(&mut self, d: usize) {
        if self.st1.contains(St1::OR) {
            self.command_st0 |= st0::IC_ABNORMAL;
        }
        let bytes = [
            self.command_st0,
            self.st1.bits(),
            self.st2.bits(),
            self.command[2],
            self.command[3],
            self.command[4],
            self.command[5],
        ];
        self.end_media_command(d);
        self.start_result_phase(&bytes, IrqClass::Data);
    }

    fn end_media_command(&mut self, d: usize) {
        self.flopi[d].main_state = MainState::Idle;
        self.flopi[d].sub_state = SubState::Idle;
        self.flopi[d].hut_deadline = self.now() + self.head_unload_time();
        self.fifo.end_transfer();
    }

    /// Sector/head/cylinder advance at the end of a transferred sector.
    /// Returns true when the command is complete.
    fn advance_sector(&mut self, d: usize) -> bool {
        let mut done = self.tc_active();
        if self.command[4] == self.command[6] {
            // End of track: sector wraps to 1 first.
            self.command[4] = 1;
            let mut cylinder_boundary = true;
            if self.cmd_mt() {
                self.command[3] ^= 1;
                self.command[1] ^= 0x04;
                if self.command[3] & 1 == 1 {
                    // Continue on the second head of the same cylinder.
                    cylinder_boundary = false;
                    if let Some(rc) = self.drive_rc(d) {
                        rc.borrow_mut().select_side(self.command[3] & 1);
                    }
                }
            }
            if cylinder_boundary {
                if done {
                    // A terminal count confirms the intent to continue onto
                    // the next cylinder; the result phase reports C+1.
                    self.command[2] = self.command[2].wrapping_add(1);
                }
                else {
                    self.st1 |= St1::EN;
                    self.command_st0 |= st0::IC_ABNORMAL;
                    done = true;
                }
            }
        }
        else {
            self.command[4] = self.command[4].wrapping_add(1);
        }
        done
    }

    // -----------------------------------------------------------------------
    // Per-drive sub-state machines
    // -----------------------------------------------------------------------

    fn general_continue(&mut self, d: usize) {
        if self.cur_live.state != LiveState::Idle && self.cur_live.drive == Some(d) {
            self.live_run(TIME_NEVER);
            if self.cur_live.state != LiveState::Idle {
                return;
            }
        }
        match self.flopi[d].main_state {
            MainState::Idle => {}
            MainState::Seek | MainState::Recalibrate => self.seek_continue(d),
            MainState::ReadData | MainState::WriteData | MainState::ScanData => self.transfer_continue(d),
            MainState::ReadTrack => self.read_track_continue(d),
            MainState::FormatTrack => self.format_track_continue(d),
            MainState::ReadId => self.read_id_continue(d),
        }
    }

    /// Read Data / Write Data / Scan sub-state progression.
    fn transfer_continue(&mut self, d: usize) {
        let write = self.flopi[d].main_state == MainState::WriteData;
        loop {
            match self.flopi[d].sub_state {
                SubState::SeekDone => {
                    self.flopi[d].counter = 0;
                    self.flopi[d].sub_state = SubState::ScanId;
                    self.sector_skipped = false;
                    self.live_start(d, LiveState::SearchAddressMarkHeader);
                    return;
                }
                SubState::ScanId => {
                    if self.cur_live.crc != 0 {
                        // Bad header CRC: note it and keep scanning.
                        self.st1 |= St1::DE;
                        self.live_start(d, LiveState::SearchAddressMarkHeader);
                        return;
                    }
                    self.st1.remove(St1::MA);
                    if !self.sector_matches() {
                        if self.cur_live.idbuf[0] != self.command[2] {
                            self.st2 |= St2::WC;
                            if self.cur_live.idbuf[0] == 0xFF {
                                self.st2 |= St2::BC;
                            }
                        }
                        self.live_start(d, LiveState::SearchAddressMarkHeader);
                        return;
                    }
                    self.st1.remove(St1::DE);
                    self.st2.remove(St2::WC | St2::BC);
                    self.sector_size = self.field_size();
                    if write {
                        self.fifo.expect(self.transfer_size(), true);
                        self.update_transfer();
                        self.flopi[d].sub_state = SubState::SectorWritten;
                        self.live_start(d, LiveState::WriteSectorSkipGap2);
                    }
                    else {
                        let scan = self.flopi[d].main_state == MainState::ScanData;
                        if scan {
                            self.scan_all_equal = true;
                            self.scan_low_ok = true;
                            self.scan_high_ok = true;
                        }
                        self.fifo.expect(self.transfer_size(), scan);
                        self.update_transfer();
                        self.flopi[d].sub_state = SubState::SectorRead;
                        self.live_start(d, LiveState::SearchAddressMarkData);
                    }
                    return;
                }
                SubState::ScanIdFailed => {
                    self.command_st0 |= st0::IC_ABNORMAL;
                    if !self.st1.contains(St1::MA) {
                        self.st1 |= St1::ND;
                    }
                    self.flopi[d].sub_state = SubState::CommandDone;
                }
                SubState::SectorRead => {
                    if self.sector_skipped {
                        // Control-mark mismatch with SK set: nothing was
                        // transferred; move on to the next sector.
                        self.sector_skipped = false;
                        if self.advance_sector(d) {
                            self.flopi[d].sub_state = SubState::CommandDone;
                            continue;
                        }
                        self.flopi[d].counter = 0;
                        self.flopi[d].sub_state = SubState::ScanId;
                        self.live_start(d, LiveState::SearchAddressMarkHeader);
                        return;
                    }
                    if self.st2.contains(St2::MD) {
                        // No data address mark within the search window.
                        self.command_st0 |= st0::IC_ABNORMAL;
                        self.st1 |= St1::MA;
                        self.flopi[d].sub_state = SubState::CommandDone;
                        continue;
                    }
                    if self.cur_live.crc != 0 {
                        self.command_st0 |= st0::IC_ABNORMAL;
                        self.st1 |= St1::DE;
                        self.st2 |= St2::DD;
                        self.flopi[d].sub_state = SubState::CommandDone;
                        continue;
                    }
                    if self.flopi[d].main_state == MainState::ScanData {
                        if self.scan_sector_complete(d) {
                            self.flopi[d].sub_state = SubState::CommandDone;
                            continue;
                        }
                        self.flopi[d].counter = 0;
                        self.flopi[d].sub_state = SubState::ScanId;
                        self.live_start(d, LiveState::SearchAddressMarkHeader);
                        return;
                    }
                    let mut done = self.advance_sector(d);
                    if self.st2.contains(St2::CM) && !self.cmd_sk() {
                        // A mismatched control mark terminates multi-sector
                        // transfers after the offending sector.
                        done = true;
                    }
                    if done {
                        self.flopi[d].sub_state = SubState::CommandDone;
                        continue;
                    }
                    self.flopi[d].counter = 0;
                    self.flopi[d].sub_state = SubState::ScanId;
                    self.live_start(d, LiveState::SearchAddressMarkHeader);
                    return;
                }
                SubState::SectorWritten => {
                    if self.advance_sector(d) {
                        self.flopi[d].sub_state = SubState::CommandDone;
                        continue;
                    }
                    self.flopi[d].counter = 0;
                    self.flopi[d].sub_state = SubState::ScanId;
                    self.live_start(d, LiveState::SearchAddressMarkHeader);
                    return;
                }
                SubState::CommandDone => {
                    self.finish_transfer_command(d);
                    return;
                }
                SubState::Idle => return,
                other => {
                    log::error!("Fdc::transfer_continue(): unexpected sub state {}", other);
                    return;
                }
            }
        }
    }

    /// Scan comparison outcome at the end of a sector. Returns true when the
    /// command is complete.
    fn scan_sector_complete(&mut self, _d: usize) -> bool {
        let satisfied = match self.cur_command {
            Command::ScanEqual => self.scan_all_equal,
            Command::ScanLowOrEqual => self.scan_low_ok,
            Command::ScanHighOrEqual => self.scan_high_ok,
            _ => false,
        };
        if self.scan_all_equal {
            self.st2 |= St2::SH;
        }
        if satisfied {
            log::debug!("Fdc::scan_sector_complete(): scan satisfied at sector {}", self.command[4]);
            return true;
        }
        if self.command[4] >= self.command[6] || self.tc_active() {
            self.st2 |= St2::SN;
            return true;
        }
        // Advance by STP and keep scanning.
        let stp = self.command[8].clamp(1, 2);
        self.command[4] = self.command[4].wrapping_add(stp);
        false
    }

    fn read_id_continue(&mut self, d: usize) {
        loop {
            match self.flopi[d].sub_state {
                SubState::SeekDone => {
                    self.flopi[d].counter = 0;
                    self.flopi[d].sub_state = SubState::ScanId;
                    self.live_start(d, LiveState::SearchAddressMarkHeader);
                    return;
                }
                SubState::ScanId => {
                    if self.cur_live.crc != 0 {
                        self.st1 |= St1::DE;
                        self.live_start(d, LiveState::SearchAddressMarkHeader);
                        return;
                    }
                    self.st1.remove(St1::MA | St1::DE);
                    self.st2 = St2::empty();
                    self.command[2] = self.cur_live.idbuf[0];
                    self.command[3] = self.cur_live.idbuf[1];
                    self.command[4] = self.cur_live.idbuf[2];
                    self.command[5] = self.cur_live.idbuf[3];
                    self.flopi[d].sub_state = SubState::CommandDone;
                }
                SubState::ScanIdFailed => {
                    self.command_st0 |= st0::IC_ABNORMAL;
                    self.st2 = St2::empty();
                    self.flopi[d].sub_state = SubState::CommandDone;
                }
                SubState::CommandDone => {
                    self.finish_transfer_command(d);
                    return;
                }
                SubState::Idle => return,
                other => {
                    log::error!("Fdc::read_id_continue(): unexpected sub state {}", other);
                    return;
                }
            }
        }
    }

    fn read_track_continue(&mut self, d: usize) {
        loop {
            match self.flopi[d].sub_state {
                SubState::SeekDone => {
                    self.flopi[d].sub_state = SubState::WaitIndex;
                    return;
                }
                SubState::WaitIndex => return,
                SubState::WaitIndexDone => {
                    self.flopi[d].counter = 0;
                    self.flopi[d].sub_state = SubState::ScanId;
                    self.live_start(d, LiveState::SearchAddressMarkHeader);
                    return;
                }
                SubState::ScanId => {
                    if self.cur_live.crc != 0 {
                        self.st1 |= St1::DE;
                    }
                    self.st1.remove(St1::MA);
                    if !self.sector_matches() {
                        // Read Track transfers every sector in physical
                        // order; a mismatch is only noted.
                        self.st1 |= St1::ND;
                    }
                    self.sector_size = self.field_size();
                    self.fifo.expect(self.transfer_size(), false);
                    self.update_transfer();
                    self.flopi[d].sub_state = SubState::SectorRead;
                    self.live_start(d, LiveState::SearchAddressMarkData);
                    return;
                }
                SubState::SectorRead => {
                    if self.st2.contains(St2::MD) {
                        self.command_st0 |= st0::IC_ABNORMAL;
                        self.st1 |= St1::MA;
                        self.flopi[d].sub_state = SubState::CommandDone;
                        continue;
                    }
                    if self.cur_live.crc != 0 {
                        self.st1 |= St1::DE;
                        self.st2 |= St2::DD;
                    }
                    self.flopi[d].counter += 1;
                    if self.flopi[d].counter >= self.command[6] as u32 || self.tc_active() {
                        self.flopi[d].sub_state = SubState::CommandDone;
                        continue;
                    }
                    self.command[4] = self.command[4].wrapping_add(1);
                    self.st2 |= St2::MD;
                    self.flopi[d].sub_state = SubState::ScanId;
                    self.live_start(d, LiveState::SearchAddressMarkHeader);
                    return;
                }
                SubState::TrackDone | SubState::CommandDone => {
                    self.finish_transfer_command(d);
                    return;
                }
                SubState::Idle => return,
                other => {
                    log::error!("Fdc::read_track_continue(): unexpected sub state {}", other);
                    return;
                }
            }
        }
    }

    fn format_track_continue(&mut self, d: usize) {
        loop {
            match self.flopi[d].sub_state {
                SubState::SeekDone => {
                    self.flopi[d].sub_state = SubState::WaitIndex;
                    return;
                }
                SubState::WaitIndex => return,
                SubState::WaitIndexDone => {
                    // For Format Track the size code arrives in the third
                    // command byte.
                    self.sector_size = DiskChsn::n_to_bytes(self.command[2]);
                    self.fifo.expect(4, true);
                    self.update_transfer();
                    self.flopi[d].sub_state = SubState::TrackDone;
                    self.live_start(d, LiveState::WriteTrackPreSectorsByte);
                    return;
                }
                SubState::TrackDone => {
                    // Reached when the index pulse aborts the gap fill.
                    if self.st1.contains(St1::OR) {
                        self.command_st0 |= st0::IC_ABNORMAL;
                    }
                    let bytes = [
                        self.command_st0,
                        self.st1.bits(),
                        self.st2.bits(),
                        self.cur_live.idbuf[0],
                        self.cur_live.idbuf[1],
                        self.cur_live.idbuf[2],
                        self.cur_live.idbuf[3],
                    ];
                    self.end_media_command(d);
                    self.start_result_phase(&bytes, IrqClass::Data);
                    return;
                }
                SubState::CommandDone => {
                    self.finish_transfer_command(d);
                    return;
                }
                SubState::Idle => return,
                other => {
                    log::error!("Fdc::format_track_continue(): unexpected sub state {}", other);
                    return;
                }
            }
        }
    }
}
