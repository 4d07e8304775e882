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

//! The controller's opcode set. The first byte written to the FIFO port while
//! the controller is idle selects a command; option bits (MT/MFM/SK) share
//! the opcode byte, so matching is done under a per-command mask. Opcodes
//! that match nothing decode to [`Command::Invalid`], which produces the
//! classic single 0x80 result byte.

/// One entry per implemented opcode, plus the Invalid placeholder.
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display, strum::EnumIter)]
pub enum Command {
    ReadTrack,
    Specify,
    SenseDriveStatus,
    WriteData,
    ReadData,
    Recalibrate,
    SenseInterrupt,
    WriteDeletedData,
    ReadId,
    ReadDeletedData,
    FormatTrack,
    Dumpreg,
    Seek,
    Version,
    ScanEqual,
    Perpendicular,
    Configure,
    Lock,
    ScanLowOrEqual,
    ScanHighOrEqual,
    Invalid,
}

/// (mask, value) pairs - an opcode byte `b` selects the first entry where
/// `b & mask == value`.
const DECODE_TABLE: &[(u8, u8, Command)] = &[
    (0xBF, 0x02, Command::ReadTrack),
    (0xFF, 0x03, Command::Specify),
    (0xFF, 0x04, Command::SenseDriveStatus),
    (0x3F, 0x05, Command::WriteData),
    (0x1F, 0x06, Command::ReadData),
    (0xFF, 0x07, Command::Recalibrate),
    (0xFF, 0x08, Command::SenseInterrupt),
    (0x3F, 0x09, Command::WriteDeletedData),
    (0xBF, 0x0A, Command::ReadId),
    (0x1F, 0x0C, Command::ReadDeletedData),
    (0xBF, 0x0D, Command::FormatTrack),
    (0xFF, 0x0E, Command::Dumpreg),
    (0xFF, 0x0F, Command::Seek),
    (0xFF, 0x10, Command::Version),
    (0x1F, 0x11, Command::ScanEqual),
    (0xFF, 0x12, Command::Perpendicular),
    (0xFF, 0x13, Command::Configure),
    (0x7F, 0x14, Command::Lock),
    (0x1F, 0x19, Command::ScanLowOrEqual),
    (0x1F, 0x1D, Command::ScanHighOrEqual),
];

impl Command {
    pub fn decode(opcode: u8) -> Command {
        DECODE_TABLE
            .iter()
            .find(|(mask, value, _)| opcode & mask == *value)
            .map(|(_, _, cmd)| *cmd)
            .unwrap_or(Command::Invalid)
    }

    /// Total command-phase length in bytes, including the opcode byte itself.
    pub fn param_bytes(&self) -> usize {
        use Command::*;
        match self {
            ReadTrack | WriteData | ReadData | WriteDeletedData | ReadDeletedData => 9,
            ScanEqual | ScanLowOrEqual | ScanHighOrEqual => 9,
            FormatTrack => 6,
            Configure => 4,
            Specify | Seek => 3,
            SenseDriveStatus | Recalibrate | ReadId | Perpendicular => 2,
            SenseInterrupt | Dumpreg | Version | Lock | Invalid => 1,
        }
    }

    /// Fixed result-phase length in bytes. Zero means the command has no
    /// result phase at all.
    pub fn result_bytes(&self) -> usize {
        use Command::*;
        match self {
            Dumpreg => 10,
            ReadTrack | WriteData | ReadData | WriteDeletedData | ReadDeletedData => 7,
            ScanEqual | ScanLowOrEqual | ScanHighOrEqual => 7,
            FormatTrack | ReadId => 7,
            SenseInterrupt => 2,
            SenseDriveStatus | Version | Lock | Invalid => 1,
            Specify | Seek | Recalibrate | Configure | Perpendicular => 0,
        }
    }

    /// True for the commands whose execution phase transfers data through
    /// the FIFO.
    pub fn is_transfer(&self) -> bool {
        use Command::*;
        matches!(
            self,
            ReadTrack
                | WriteData
                | ReadData
                | WriteDeletedData
                | ReadDeletedData
                | FormatTrack
                | ScanEqual
                | ScanLowOrEqual
                | ScanHighOrEqual
        )
    }
}
