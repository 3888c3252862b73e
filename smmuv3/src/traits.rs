//! Platform allocation seam
//!
//! The driver never talks to the platform's physical memory manager
//! directly: stream table, page tables, and both queues are allocated
//! through this trait. The embedding platform implements it over its page
//! allocator; the tests implement it over the host heap.

/// Trait for allocating physical pages
///
/// Implementations must provide zeroed, page-aligned, physically
/// contiguous memory.
pub trait PageAllocator {
    /// Allocate `count` contiguous 4 KiB pages.
    ///
    /// Returns the physical base address of the allocation, or `None` if
    /// allocation fails. The memory must be:
    /// - Zeroed
    /// - 4 KiB aligned
    /// - Reachable by the SMMU's table walker and by the CPU at the same
    ///   address (flat identity mapping)
    fn allocate_pages(&mut self, count: usize) -> Option<u64>;

    /// Release pages previously returned by [`allocate_pages`].
    ///
    /// `count` must match the original allocation.
    ///
    /// [`allocate_pages`]: PageAllocator::allocate_pages
    fn free_pages(&mut self, base: u64, count: usize);
}
