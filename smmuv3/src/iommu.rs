//! Mapping lifecycle
//!
//! The map/unmap/set-attribute surface bus-master drivers reach through
//! their adapter layer. Each call translates into page-table engine
//! operations plus, on unmap, TLB invalidation commands through the
//! command queue. The address space is identity mapped: the device
//! address handed back by `map` is the host physical address unchanged.

use smmuv3_mmio::{write_barrier, RegisterIo};

use crate::cmd::CommandEntry;
use crate::device::SmmuDevice;
use crate::error::SmmuError;
use crate::page_table::{PTE_DEFAULT_FLAGS, PTE_READ, PTE_WRITE};
use crate::traits::PageAllocator;

/// Direction of a DMA operation, as seen from the bus master.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmaDirection {
    /// The device reads from system memory.
    DeviceRead,
    /// The device writes to system memory.
    DeviceWrite,
    /// Common buffer: the device reads and writes.
    Bidirectional,
}

impl DmaDirection {
    /// Leaf permission bits [7:6] for this direction.
    #[inline]
    #[must_use]
    pub(crate) const fn permissions(self) -> u64 {
        match self {
            Self::DeviceRead => PTE_READ,
            Self::DeviceWrite => PTE_WRITE,
            Self::Bidirectional => PTE_READ | PTE_WRITE,
        }
    }
}

/// Access mask for permission-only updates of an existing mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmaAccess {
    /// Revoke both permissions.
    None,
    /// Device may read.
    Read,
    /// Device may write.
    Write,
    /// Device may read and write.
    ReadWrite,
}

impl DmaAccess {
    /// Leaf permission bits [7:6] for this access mask; zero clears them.
    #[inline]
    #[must_use]
    pub(crate) const fn permissions(self) -> u64 {
        match self {
            Self::None => 0,
            Self::Read => PTE_READ,
            Self::Write => PTE_WRITE,
            Self::ReadWrite => PTE_READ | PTE_WRITE,
        }
    }
}

/// Opaque record of one live mapping, created by
/// [`SmmuDevice::map`] and consumed by [`SmmuDevice::unmap`].
#[derive(Debug)]
pub struct MappingHandle {
    bytes: usize,
    device_address: u64,
    physical_address: u64,
}

impl MappingHandle {
    /// Length of the mapped range in bytes.
    #[inline]
    #[must_use]
    pub const fn bytes(&self) -> usize {
        self.bytes
    }

    /// Address the device uses; equal to the physical address under
    /// identity mapping.
    #[inline]
    #[must_use]
    pub const fn device_address(&self) -> u64 {
        self.device_address
    }

    /// Host physical address of the buffer.
    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> u64 {
        self.physical_address
    }
}

impl<R: RegisterIo, A: PageAllocator> SmmuDevice<R, A> {
    /// Grant the device access to `[host_address, host_address + bytes)`.
    ///
    /// Returns the device address (the host address unchanged) and the
    /// handle the caller later passes to [`unmap`](Self::unmap).
    pub fn map(
        &mut self,
        host_address: u64,
        bytes: usize,
        direction: DmaDirection,
    ) -> Result<(u64, MappingHandle), SmmuError> {
        if bytes == 0 {
            return Err(SmmuError::InvalidParameter);
        }

        let flags = PTE_DEFAULT_FLAGS | direction.permissions();
        self.page_tables
            .update_range(&mut self.alloc, host_address, bytes, flags, true, false)?;

        Ok((
            host_address,
            MappingHandle {
                bytes,
                device_address: host_address,
                physical_address: host_address,
            },
        ))
    }

    /// Revoke a mapping and flush it from the translation caches.
    ///
    /// The synchronising command at the tail guarantees the
    /// invalidations have completed before the buffer is reused.
    pub fn unmap(&mut self, mapping: MappingHandle) -> Result<(), SmmuError> {
        self.page_tables.update_range(
            &mut self.alloc,
            mapping.physical_address,
            mapping.bytes,
            0,
            false,
            false,
        )?;

        // The cleared descriptors must be visible before the hardware
        // re-walks the tables.
        write_barrier();

        self.send_command(&CommandEntry::tlbi_nsnh_all())?;
        self.send_command(&CommandEntry::tlbi_el2_all())?;
        self.send_command(&CommandEntry::sync_no_interrupt())?;

        Ok(())
    }

    /// Change a live mapping's read/write permissions without remapping.
    ///
    /// Validity is untouched: this is a flags-only page-table update.
    pub fn set_attribute(
        &mut self,
        mapping: &MappingHandle,
        access: DmaAccess,
    ) -> Result<(), SmmuError> {
        self.page_tables.update_range(
            &mut self.alloc,
            mapping.physical_address,
            mapping.bytes,
            access.permissions(),
            false,
            true,
        )
    }
}
