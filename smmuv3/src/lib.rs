//! ARM SMMUv3 driver
//!
//! Configures a System MMU (SMMUv3) to remap and protect DMA issued by PCI
//! bus masters, and exposes the remapping through a map/unmap/set-attribute
//! API consumed by bus-master drivers.
//!
//! # Architecture
//!
//! SMMUv3 uses several key data structures, all owned by [`SmmuDevice`]:
//! - **Stream Table**: maps each StreamID to a Stream Table Entry (STE);
//!   one linear table, every entry replicated from a single stage-2
//!   template
//! - **Stage-2 page tables**: a 4-level radix tree the SMMU walks on every
//!   DMA access, maintained identity-mapped (IOVA == PA)
//! - **Command Queue**: driver-to-hardware commands (configuration and TLB
//!   invalidation)
//! - **Event Queue**: hardware-to-driver fault records
//!
//! # Environment
//!
//! The driver targets a cooperative, interrupt-sparse pre-OS environment:
//! single-threaded run-to-completion calls, bounded polling instead of
//! interrupt-driven waits, and a flat identity-mapped physical address
//! space. Physical pages come from the platform through the
//! [`PageAllocator`] trait; registers are reached through the
//! [`smmuv3_mmio::RegisterIo`] seam so the core stays testable without
//! hardware.
//!
//! # Bring-up
//!
//! [`SmmuDevice::bring_up`] sequences the unit from reset/abort into an
//! active translating state without ever exposing a half-configured unit
//! to live DMA; see [`device`] for the state machine. Teardown disables
//! translation and forces global abort before releasing memory.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(test)]
extern crate std;

pub mod cmd;
pub mod config;
pub mod device;
pub mod error;
pub mod iommu;
pub mod page_table;
pub mod queue;
pub mod registers;
pub mod ste;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use cmd::{CommandEntry, FaultRecord};
pub use config::SmmuConfig;
pub use device::{BringUpStage, SmmuDevice};
pub use error::SmmuError;
pub use iommu::{DmaAccess, DmaDirection, MappingHandle};
pub use traits::PageAllocator;

/// Page size constant (4KB granule)
pub const PAGE_SIZE: usize = 4096;

// Compile-time verification of the translation constants
const _: () = assert!(PAGE_SIZE.is_power_of_two(), "PAGE_SIZE must be a power of two");
const _: () = assert!(
    PAGE_SIZE / core::mem::size_of::<u64>() == page_table::ENTRIES_PER_TABLE,
    "4KB granule requires 512 entries per table"
);
