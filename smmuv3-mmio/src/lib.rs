//! MMIO Building Blocks for the SMMUv3 Driver
//!
//! This crate provides the reusable pieces the driver core is built on:
//!
//! - [`region`]: the [`RegisterIo`] access trait and a volatile, offset-based
//!   [`MmioRegion`] implementation for real hardware
//! - [`barrier`]: memory barrier helpers for device memory ordering
//! - [`ring`]: the wrap-bit producer/consumer ring engine shared by the
//!   command and event queues
//!
//! # Example
//!
//! ```ignore
//! use smmuv3_mmio::{MmioRegion, RegisterIo, barrier};
//!
//! // Register bank mapped at 0x0900_0000 (two 64 KiB register pages)
//! let regs = unsafe { MmioRegion::new(0x0900_0000, 0x2_0000) };
//!
//! let idr0 = regs.read32(0x00);
//! regs.write64(0x80, strtab_base);
//! barrier::write_barrier();
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(test)]
extern crate std;

pub mod barrier;
pub mod region;
pub mod ring;

// Re-exports for convenience
pub use barrier::{full_barrier, read_barrier, write_barrier};
pub use region::{MmioRegion, RegisterIo};
pub use ring::{QueueEntry, Ring, RingIndex};
