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

//! CRC-CCITT (polynomial 0x1021, MSB first) as used by the IBM System 34
//! track layout for ID and data field integrity. The live engine accumulates
//! the CRC bit-at-a-time as data bits fall out of the separator; the byte
//! form is used when generating fields.

pub const CRC_CCITT_INIT: u16 = 0xFFFF;

pub const fn crc_ccitt_bit(crc: u16, bit: bool) -> u16 {
    let fed = crc ^ if bit { 0x8000 } else { 0x0000 };
    if fed & 0x8000 != 0 {
        (crc << 1) ^ 0x1021
    }
    else {
        crc << 1
    }
}

pub const fn crc_ccitt_byte(mut crc: u16, byte: u8) -> u16 {
    let mut i = 0;
    while i < 8 {
        crc = crc_ccitt_bit(crc, byte & (0x80 >> i) != 0);
        i += 1;
    }
    crc
}

pub fn crc_ccitt(mut crc: u16, data: &[u8]) -> u16 {
    for byte in data {
        crc = crc_ccitt_byte(crc, *byte);
    }
    crc
}

// CRC residues left after the sync/mark prefix of each field type. When the
// live engine recognizes a mark in the shift register the mark bytes have
// already gone by, so the accumulator is reloaded with the residue instead
// of CRC_CCITT_INIT.

/// Residue after one MFM 0xA1 sync byte (the two remaining 0xA1s and the mark
/// byte are accumulated as they are read/written).
pub const MFM_A1_CRC: u16 = crc_ccitt_byte(CRC_CCITT_INIT, 0xA1);
/// Residue after the FM ID address mark (0xFE, clock 0xC7).
pub const FM_IDAM_CRC: u16 = crc_ccitt_byte(CRC_CCITT_INIT, 0xFE);
/// Residue after the FM data address mark (0xFB, clock 0xC7).
pub const FM_DAM_CRC: u16 = crc_ccitt_byte(CRC_CCITT_INIT, 0xFB);
/// Residue after the FM deleted data address mark (0xF8, clock 0xC7).
pub const FM_DDAM_CRC: u16 = crc_ccitt_byte(CRC_CCITT_INIT, 0xF8);
