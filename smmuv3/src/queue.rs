//! Command and event queue protocol
//!
//! Drives the wrap-bit rings against the hardware index registers. The
//! command queue is driver-produced and hardware-consumed: an enqueue
//! retries while the ring is full, publishes the new producer index
//! behind a release barrier, then waits for the hardware to drain up to
//! it. The event queue is hardware-produced and driver-consumed.
//!
//! Waiting is always a bounded poll: [`POLL_SAMPLES`] samples spaced by a
//! fixed busy-spin (~1 ms total budget). An exhausted budget surfaces as
//! [`SmmuError::Timeout`] and is never retried at this layer.

use smmuv3_mmio::ring::{is_empty, is_full};
use smmuv3_mmio::{write_barrier, RegisterIo, Ring, RingIndex};

use crate::cmd::{CommandEntry, FaultRecord};
use crate::error::SmmuError;
use crate::registers::{
    SMMU_CMDQ_CONS, SMMU_CMDQ_PROD, SMMU_EVENTQ_CONS, SMMU_EVENTQ_PROD,
};
use crate::PAGE_SIZE;

/// Samples taken by every bounded wait before giving up.
pub(crate) const POLL_SAMPLES: u32 = 10;

/// Busy-spin between samples, roughly 100 microseconds on contemporary
/// cores; ten samples give the documented ~1 ms budget. A fixed spin
/// stands in for a timer-backed delay, which is not necessarily available
/// this early in boot.
const SAMPLE_DELAY_SPINS: u32 = 4096;

/// Delay one sampling interval.
pub(crate) fn sample_delay() {
    for _ in 0..SAMPLE_DELAY_SPINS {
        core::hint::spin_loop();
    }
}

/// Driver-produced, hardware-consumed command ring.
pub struct CommandQueue {
    ring: Ring<CommandEntry>,
    base: u64,
    log2size: u32,
}

impl CommandQueue {
    /// Wrap zeroed queue memory at physical address `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to zeroed, page-aligned memory covering
    /// `pages_for(log2size)` pages, valid for the queue's lifetime.
    #[inline]
    #[must_use]
    pub const unsafe fn new(base: u64, log2size: u32) -> Self {
        Self {
            // SAFETY: Forwarded from the caller's contract.
            ring: unsafe { Ring::new(base as *mut CommandEntry, log2size) },
            base,
            log2size,
        }
    }

    /// Pages needed for a queue of `2^log2size` entries.
    #[inline]
    #[must_use]
    pub const fn pages_for(log2size: u32) -> usize {
        Ring::<CommandEntry>::memory_size(log2size).div_ceil(PAGE_SIZE)
    }

    /// Physical base address of the queue memory.
    #[inline]
    #[must_use]
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Log2 of the entry count.
    #[inline]
    #[must_use]
    pub const fn log2size(&self) -> u32 {
        self.log2size
    }

    fn indices<R: RegisterIo>(&self, regs: &R) -> (RingIndex, RingIndex) {
        (
            RingIndex::new(regs.read32(SMMU_CMDQ_PROD), self.log2size),
            RingIndex::new(regs.read32(SMMU_CMDQ_CONS), self.log2size),
        )
    }

    /// Send one command and wait for the hardware to consume it.
    ///
    /// Commands are applied in submission order; completion of a
    /// [`CommandEntry::sync_no_interrupt`] additionally guarantees every
    /// prior command has taken effect.
    pub fn send<R: RegisterIo>(&self, regs: &R, command: &CommandEntry) -> Result<(), SmmuError> {
        let (mut prod, mut cons) = self.indices(regs);

        // Bounded retry while the ring is full. Hardware consuming any
        // entry frees a slot.
        let mut samples = POLL_SAMPLES;
        while is_full(prod, cons) {
            if samples == 0 {
                log::error!("command queue full, timeout");
                return Err(SmmuError::Timeout);
            }
            samples -= 1;
            sample_delay();
            (prod, cons) = self.indices(regs);
        }

        self.ring.write_slot(prod.index(), command);

        // Entry contents must be visible before the index that publishes
        // them.
        write_barrier();

        let next = prod.advance();
        regs.write32(SMMU_CMDQ_PROD, next.raw());

        // Wait until the consumer index reaches the new producer value.
        let mut samples = POLL_SAMPLES;
        loop {
            let cons = RingIndex::new(regs.read32(SMMU_CMDQ_CONS), self.log2size);
            if cons.raw() == next.raw() {
                return Ok(());
            }
            if samples == 0 {
                log::error!(
                    "timeout waiting for command consumption, cons={:#x} prod={:#x}",
                    cons.raw(),
                    next.raw()
                );
                return Err(SmmuError::Timeout);
            }
            samples -= 1;
            sample_delay();
        }
    }
}

/// Hardware-produced, driver-consumed fault ring.
pub struct EventQueue {
    ring: Ring<FaultRecord>,
    base: u64,
    log2size: u32,
}

impl EventQueue {
    /// Wrap zeroed queue memory at physical address `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to zeroed, page-aligned memory covering
    /// `pages_for(log2size)` pages, valid for the queue's lifetime.
    #[inline]
    #[must_use]
    pub const unsafe fn new(base: u64, log2size: u32) -> Self {
        Self {
            // SAFETY: Forwarded from the caller's contract.
            ring: unsafe { Ring::new(base as *mut FaultRecord, log2size) },
            base,
            log2size,
        }
    }

    /// Pages needed for a queue of `2^log2size` entries.
    #[inline]
    #[must_use]
    pub const fn pages_for(log2size: u32) -> usize {
        Ring::<FaultRecord>::memory_size(log2size).div_ceil(PAGE_SIZE)
    }

    /// Physical base address of the queue memory.
    #[inline]
    #[must_use]
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Log2 of the entry count.
    #[inline]
    #[must_use]
    pub const fn log2size(&self) -> u32 {
        self.log2size
    }

    /// Take one fault record off the queue, or report it empty.
    pub fn pop<R: RegisterIo>(&self, regs: &R) -> Option<FaultRecord> {
        let prod = RingIndex::new(regs.read32(SMMU_EVENTQ_PROD), self.log2size);
        let cons = RingIndex::new(regs.read32(SMMU_EVENTQ_CONS), self.log2size);

        if is_empty(prod, cons) {
            return None;
        }

        let record = self.ring.read_slot(cons.index());

        // The record must be fully read before the consumer index hands
        // the slot back to the hardware.
        write_barrier();
        regs.write32(SMMU_EVENTQ_CONS, cons.advance().raw());

        Some(record)
    }
}
