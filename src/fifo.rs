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

//! The controller's 16-byte data FIFO. The live engine pushes/pops on the
//! "internal" side as bytes come off or go onto the medium; the host (or the
//! DMA controller) services the other side. A configurable threshold decides
//! when the transfer request signal should be active; the threshold is
//! effectively zero when the FIFO is disabled (the chip's default state),
//! degenerating to byte-at-a-time service.

use crate::FIFO_SIZE;

/// Faults raised by internal-side access against a still-expecting transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FifoFault {
    /// Internal push with the buffer full: the host fell behind a read.
    Overrun,
    /// Internal pop with the buffer empty: the host fell behind a write.
    Underrun,
}

#[derive(Clone, Debug, Default)]
pub struct Fifo {
    data: [u8; FIFO_SIZE],
    len: usize,
    /// Bytes the current transfer still expects to move through the FIFO.
    expected: usize,
    /// Direction of the current transfer: true = host to disk.
    write: bool,
    /// Service threshold in bytes (0 when the FIFO is disabled).
    threshold: usize,
}

impl Fifo {
    pub fn reset(&mut self) {
        self.len = 0;
        self.expected = 0;
        self.write = false;
    }

    pub fn set_threshold(&mut self, threshold: usize) {
        self.threshold = threshold.min(FIFO_SIZE - 1);
    }

    /// Begin a transfer of `count` bytes in the given direction.
    pub fn expect(&mut self, count: usize, write: bool) {
        self.len = 0;
        self.expected = count;
        self.write = write;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Direction of the current transfer: true = host to disk.
    pub fn write_dir(&self) -> bool {
        self.write
    }

    /// Stop expecting further bytes (terminal count, fault abort).
    pub fn end_transfer(&mut self) {
        self.expected = 0;
    }

    /// True when the host side should be serviced (DRQ / RQM active).
    pub fn wants_service(&self) -> bool {
        if self.write {
            self.expected > 0 && FIFO_SIZE - self.len > self.threshold
        }
        else {
            // Drain the tail even after the last byte was accounted for.
            self.len > self.threshold || (self.expected == 0 && self.len > 0)
        }
    }

    pub fn push(&mut self, data: u8, internal: bool) -> Result<(), FifoFault> {
        if self.len == FIFO_SIZE {
            if internal && self.expected > 0 {
                return Err(FifoFault::Overrun);
            }
            log::warn!("Fifo::push(): dropping byte pushed into a full FIFO");
            return Ok(());
        }
        self.data[self.len] = data;
        self.len += 1;
        if internal {
            self.expected = self.expected.saturating_sub(1);
        }
        Ok(())
    }

    pub fn pop(&mut self, internal: bool) -> Result<u8, FifoFault> {
        if self.len == 0 {
            if internal && self.expected > 0 {
                return Err(FifoFault::Underrun);
            }
            log::warn!("Fifo::pop(): popping from an empty FIFO");
            return Ok(0);
        }
        let data = self.data[0];
        self.data.copy_within(1..self.len, 0);
        self.len -= 1;
        if internal {
            self.expected = self.expected.saturating_sub(1);
        }
        Ok(data)
    }
}
