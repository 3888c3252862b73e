//! Memory Barrier Helpers
//!
//! Provides memory barrier operations for device drivers. These ensure
//! proper ordering of memory operations, which is critical for:
//!
//! - Device register accesses (producer/consumer queues)
//! - DMA buffer visibility
//! - Translation table updates the hardware walks
//!
//! # Usage Patterns
//!
//! ## Producer Queue (Driver writes, Device reads)
//!
//! ```ignore
//! // Write the command into the ring slot
//! ring.write_slot(prod.index(), &cmd);
//! write_barrier();                 // Entry visible before index update
//! regs.write32(CMDQ_PROD, prod.advance().raw());
//! ```
//!
//! ## Consumer Queue (Device writes, Driver reads)
//!
//! ```ignore
//! read_barrier();                  // See the latest fault records
//! let record = ring.read_slot(cons.index());
//! ```
//!
//! The portable fences below are what the driver core calls, so the logic
//! runs unmodified under the host test harness. On AArch64 the module also
//! exposes the architectural `dsb`/`isb` instructions for embedders that
//! need completion (not just ordering) guarantees.

use core::sync::atomic::{fence, Ordering};

/// Read barrier (acquire semantics).
///
/// Ensures all loads before this barrier complete before any loads after.
/// Use before reading shared memory that may have been written by a device.
#[inline]
pub fn read_barrier() {
    fence(Ordering::Acquire);
}

/// Write barrier (release semantics).
///
/// Ensures all stores before this barrier complete before any stores after.
/// Use before publishing a queue index to notify a device of new data.
#[inline]
pub fn write_barrier() {
    fence(Ordering::Release);
}

/// Full memory barrier.
///
/// Ensures all memory operations before this barrier complete before any
/// operations after. Use when both loads and stores must be ordered, such
/// as around control-register writes that change translation behaviour.
#[inline]
pub fn full_barrier() {
    fence(Ordering::SeqCst);
}

/// Data Synchronisation Barrier (DSB SY).
///
/// Ensures all memory accesses (including device memory) complete before
/// continuing. Stronger than a compiler fence: it affects the CPU's memory
/// system directly.
#[cfg(target_arch = "aarch64")]
#[inline]
pub fn dsb() {
    // SAFETY: DSB is always safe to execute
    unsafe {
        core::arch::asm!("dsb sy", options(nostack, preserves_flags));
    }
}

/// Instruction Synchronisation Barrier (ISB).
///
/// Flushes the processor pipeline, ensuring all preceding instructions
/// complete and subsequent instructions are fetched fresh.
#[cfg(target_arch = "aarch64")]
#[inline]
pub fn isb() {
    // SAFETY: ISB is always safe to execute
    unsafe {
        core::arch::asm!("isb", options(nostack, preserves_flags));
    }
}

/// Outer-shareable DSB (DSB OSH).
///
/// Ensures memory operations are visible to other agents in the
/// outer-shareable domain, which is where SMMU table walks observe memory.
#[cfg(target_arch = "aarch64")]
#[inline]
pub fn dsb_osh() {
    // SAFETY: DSB OSH is always safe to execute
    unsafe {
        core::arch::asm!("dsb osh", options(nostack, preserves_flags));
    }
}
