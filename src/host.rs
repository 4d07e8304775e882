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

//! Host machine collaborator traits. The controller never owns time, the
//! interrupt line or the DMA request line - the host injects these at
//! construction. Everything is single threaded and cooperative: the
//! controller registers future wake-ups on the [`Scheduler`] and the host
//! calls back into [`crate::Fdc`] when they elapse.

use std::{cell::RefCell, rc::Rc};

/// Identifies one of the controller's one-shot timers. The controller uses
/// one timer per drive slot, so the id is simply the drive index.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(pub usize);

/// The host's virtual clock and one-shot timer service, in seconds of
/// emulated time. When an armed timer elapses, the host must call
/// [`crate::Fdc::timer_expired`] with the same [`TimerId`].
///
/// Time never runs backwards, and `time()` must not advance during a single
/// controller call - every controller entry point runs atomically at one
/// instant of virtual time.
pub trait Scheduler {
    fn time(&self) -> f64;
    /// (Re)arm a one-shot timer `delay` seconds from now. Re-arming an
    /// already pending timer replaces its deadline.
    fn arm(&mut self, timer: TimerId, delay: f64);
    fn cancel(&mut self, timer: TimerId);
}

/// A single named interrupt line.
pub trait InterruptLine {
    fn set_irq(&mut self, state: bool);
}

/// The DMA controller's request line for the FDC's channel. Byte transfers
/// themselves flow through [`crate::Fdc::dma_read`] / [`crate::Fdc::dma_write`],
/// which the host calls while the request line is asserted.
pub trait DmaLine {
    fn set_drq(&mut self, state: bool);
}

pub type SchedulerLock = Rc<RefCell<dyn Scheduler>>;
pub type InterruptLock = Rc<RefCell<dyn InterruptLine>>;
pub type DmaLock = Rc<RefCell<dyn DmaLine>>;
