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

//! Register-level bit definitions for the 82077AA-compatible port set.

use bitflags::bitflags;

/// Offsets within the controller's port window.
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
pub enum RegisterOffset {
    /// Status Register A (read only, diagnostic snapshot)
    StatusA,
    /// Status Register B (read only, diagnostic snapshot)
    StatusB,
    /// Digital Output Register (drive select, motors, reset, DMA gate)
    DigitalOutput,
    /// Tape Drive Register (not implemented, reads 0xFF)
    TapeDrive,
    /// Main Status Register (read) / Data Rate Select Register (write)
    MainStatus,
    /// Data FIFO - meaning depends on the current protocol phase
    Fifo,
    Reserved,
    /// Digital Input Register (read) / Configuration Control Register (write)
    DigitalInput,
}

impl From<u8> for RegisterOffset {
    fn from(offset: u8) -> Self {
        match offset & 0x07 {
            0 => RegisterOffset::StatusA,
            1 => RegisterOffset::StatusB,
            2 => RegisterOffset::DigitalOutput,
            3 => RegisterOffset::TapeDrive,
            4 => RegisterOffset::MainStatus,
            5 => RegisterOffset::Fifo,
            6 => RegisterOffset::Reserved,
            _ => RegisterOffset::DigitalInput,
        }
    }
}

bitflags! {
    /// Main Status Register.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct MainStatus: u8 {
        const DRV0_BUSY = 0b0000_0001;
        const DRV1_BUSY = 0b0000_0010;
        const DRV2_BUSY = 0b0000_0100;
        const DRV3_BUSY = 0b0000_1000;
        /// Command busy - a command is being read or executed.
        const CB        = 0b0001_0000;
        /// Execution phase is running in non-DMA mode.
        const NON_DMA   = 0b0010_0000;
        /// Data direction: set when the controller has data for the host.
        const DIO       = 0b0100_0000;
        /// Request for master - the FIFO port may be accessed.
        const RQM       = 0b1000_0000;
    }

    /// Status Register 1.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct St1: u8 {
        /// Missing address mark
        const MA = 0b0000_0001;
        /// Not writable (write protect)
        const NW = 0b0000_0010;
        /// No data - sector not found
        const ND = 0b0000_0100;
        /// Overrun / underrun
        const OR = 0b0001_0000;
        /// Data error (CRC)
        const DE = 0b0010_0000;
        /// End of cylinder
        const EN = 0b1000_0000;
    }

    /// Status Register 2.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct St2: u8 {
        /// Missing address mark in data field
        const MD = 0b0000_0001;
        /// Bad cylinder (ID field cylinder reads 0xFF)
        const BC = 0b0000_0010;
        /// Scan not satisfied
        const SN = 0b0000_0100;
        /// Scan equal hit
        const SH = 0b0000_1000;
        /// Wrong cylinder
        const WC = 0b0001_0000;
        /// Data error in data field (CRC)
        const DD = 0b0010_0000;
        /// Control mark - deleted/non-deleted mark mismatch
        const CM = 0b0100_0000;
    }

    /// Status Register 3 (drive status snapshot).
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct St3: u8 {
        const HD  = 0b0000_0100;
        /// Two-sided drive
        const TS  = 0b0000_1000;
        /// Track 0 signal
        const T0  = 0b0001_0000;
        /// Drive ready
        const RDY = 0b0010_0000;
        /// Write protected
        const WP  = 0b0100_0000;
        /// Fault signal
        const FT  = 0b1000_0000;
    }
}

/// ST0 is an accumulator mixing multi-bit interrupt-code fields with drive
/// and head bits, so it is kept as a raw byte built from these constants.
pub mod st0 {
    /// Normal termination.
    pub const IC_NORMAL: u8 = 0x00;
    /// Abnormal termination.
    pub const IC_ABNORMAL: u8 = 0x40;
    /// Invalid command issue.
    pub const IC_INVALID: u8 = 0x80;
    /// Abnormal termination caused by polling (ready changed).
    pub const IC_ATTENTION: u8 = 0xC0;
    pub const SEEK_END: u8 = 0x20;
    pub const EQUIPMENT_CHECK: u8 = 0x10;
    pub const NOT_READY: u8 = 0x08;
    pub const HEAD: u8 = 0x04;
    pub const DRIVE_MASK: u8 = 0x03;
}

/// Digital Output Register.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dor(pub u8);

impl Dor {
    pub fn drive_select(&self) -> usize {
        (self.0 & 0x03) as usize
    }

    /// The reset line is active low: a zero bit holds the controller in reset.
    pub fn reset_active(&self) -> bool {
        self.0 & 0x04 == 0
    }

    /// Gates the IRQ and DRQ outputs onto the bus.
    pub fn dma_gate(&self) -> bool {
        self.0 & 0x08 != 0
    }

    pub fn motor_on(&self, drive: usize) -> bool {
        self.0 & (0x10 << (drive & 0x03)) != 0
    }
}
