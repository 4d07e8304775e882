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
use std::fmt::Display;

use crate::MAXIMUM_SECTOR_SIZE;

/// A sector ID quad as recorded in a track's ID fields: cylinder, head,
/// sector number and sector size code. The controller compares these against
/// the values programmed in a command's parameter bytes while scanning.
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiskChsn {
    c: u8,
    h: u8,
    s: u8,
    n: u8,
}

impl From<(u8, u8, u8, u8)> for DiskChsn {
    fn from((c, h, s, n): (u8, u8, u8, u8)) -> Self {
        Self { c, h, s, n }
    }
}

impl From<[u8; 4]> for DiskChsn {
    fn from(buf: [u8; 4]) -> Self {
        Self {
            c: buf[0],
            h: buf[1],
            s: buf[2],
            n: buf[3],
        }
    }
}

impl Display for DiskChsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{} h:{} s:{} n:{}]", self.c, self.h, self.s, self.n)
    }
}

#[allow(dead_code)]
impl DiskChsn {
    pub fn new(c: u8, h: u8, s: u8, n: u8) -> Self {
        Self { c, h, s, n }
    }

    pub fn get(&self) -> (u8, u8, u8, u8) {
        (self.c, self.h, self.s, self.n)
    }
    pub fn c(&self) -> u8 {
        self.c
    }
    pub fn h(&self) -> u8 {
        self.h
    }
    pub fn s(&self) -> u8 {
        self.s
    }
    pub fn n(&self) -> u8 {
        self.n
    }

    /// Return the size of the 'n' parameter in bytes.
    /// The formula for calculating size from n is (128 * 2^n)
    /// We enforce a maximum size of 8192 bytes for a single sector.
    pub fn n_size(&self) -> usize {
        Self::n_to_bytes(self.n)
    }

    pub fn n_to_bytes(n: u8) -> usize {
        std::cmp::min(MAXIMUM_SECTOR_SIZE, 128usize.overflowing_shl(n as u32).0)
    }

    pub fn bytes_to_n(size: usize) -> u8 {
        let mut n = 0;
        let mut size = size;
        while size > 128 {
            size >>= 1;
            n += 1;
        }
        n
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        [self.c, self.h, self.s, self.n]
    }
}
