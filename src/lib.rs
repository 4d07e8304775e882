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

//! fluxfox_fdc emulates the NEC µPD765 / Intel 82077AA floppy disk controller
//! family at flux-transition granularity.
//!
//! The crate sits between a host machine emulator and one or more flux-level
//! drive models. The host provides the ambient machine services - a virtual
//! clock with one-shot timers, an interrupt line and a DMA request line - via
//! the collaborator traits in [`host`], and wires guest port I/O to
//! [`Fdc::read_register`] and [`Fdc::write_register`]. Drives implement
//! [`FluxDrive`]; a memory-backed reference implementation, [`MemoryDrive`],
//! is included.
//!
//! Unlike sector-level controller emulations, all data transfer happens
//! through a software phase-locked loop running against the drive's raw flux
//! transition stream, so copy-protected and otherwise nonstandard media
//! behave as they would on real hardware.

pub mod chsn;
pub mod command;
pub mod controller;
pub mod crc;
pub mod drive;
pub mod fifo;
pub mod host;
pub mod live;
pub mod pll;
pub mod registers;

use std::hash::RandomState;

use thiserror::Error;

pub const MAXIMUM_SECTOR_SIZE: usize = 8192;
pub const DEFAULT_SECTOR_SIZE: usize = 512;
pub const FIFO_SIZE: usize = 16;
pub const MAX_DRIVES: usize = 4;

/// Sentinel instant meaning "never" - no event is scheduled.
pub const TIME_NEVER: f64 = f64::INFINITY;

#[allow(unused)]
type FoxHashMap<K, V, S = RandomState> = std::collections::HashMap<K, V, S>;

/// Errors returned by the crate's public API. Emulated hardware failure
/// conditions are never surfaced this way - they are reported through the
/// ST0-ST3 status registers like the silicon does.
#[derive(Debug, Error)]
pub enum FdcError {
    #[error("An invalid drive slot was specified")]
    InvalidDrive,
    #[error("The requested operation is not permitted while a command is in flight")]
    OperationInFlight,
    #[error("Invalid parameters were specified to a library function")]
    ParameterError,
}

/// Transfer rates supported by the controller's data rate select register.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataRate {
    #[default]
    Rate250Kbps,
    Rate300Kbps,
    Rate500Kbps,
    Rate1000Kbps,
}

impl DataRate {
    /// Decode the two rate-select bits shared by the DSR and CCR ports.
    pub fn from_select_bits(bits: u8) -> DataRate {
        match bits & 0x03 {
            0b00 => DataRate::Rate500Kbps,
            0b01 => DataRate::Rate300Kbps,
            0b10 => DataRate::Rate250Kbps,
            _ => DataRate::Rate1000Kbps,
        }
    }

    pub fn select_bits(&self) -> u8 {
        match self {
            DataRate::Rate500Kbps => 0b00,
            DataRate::Rate300Kbps => 0b01,
            DataRate::Rate250Kbps => 0b10,
            DataRate::Rate1000Kbps => 0b11,
        }
    }

    pub fn kbps(&self) -> u32 {
        match self {
            DataRate::Rate250Kbps => 250,
            DataRate::Rate300Kbps => 300,
            DataRate::Rate500Kbps => 500,
            DataRate::Rate1000Kbps => 1000,
        }
    }

    /// Nominal bitcell period in seconds for the given encoding at this rate.
    /// MFM packs one cell per data bit at twice the rate clock; FM spends two
    /// cells (clock + data) of twice the width on each data bit.
    pub fn cell_period(&self, encoding: DataEncoding) -> f64 {
        let hz = self.kbps() as f64 * 1000.0;
        match encoding {
            DataEncoding::Mfm => 1.0 / (2.0 * hz),
            DataEncoding::Fm => 1.0 / hz,
        }
    }
}

/// Disk bit encodings understood by the live bitstream engine.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataEncoding {
    Fm,
    #[default]
    Mfm,
}

pub use crate::{
    chsn::DiskChsn,
    command::Command,
    controller::{Fdc, FdcSnapshot},
    drive::{DriveLock, FluxDrive, MemoryDrive},
    host::{DmaLine, DmaLock, InterruptLine, InterruptLock, Scheduler, SchedulerLock, TimerId},
};
