//! Wrap-Bit Ring Engine
//!
//! Generic producer/consumer ring arithmetic for hardware queues whose
//! index registers carry one extra "wrap" bit above the addressing bits.
//! The SMMU command queue (driver produces, hardware consumes) and event
//! queue (hardware produces, driver consumes) both use this scheme.
//!
//! # Queue Model
//!
//! A queue of `2^log2size` fixed-size entries is paired with a producer
//! index and a consumer index. Each raw index value occupies
//! `log2size + 1` bits: the low `log2size` bits address a slot, the next
//! bit is the wrap bit, toggled every time the index passes the end of
//! the ring.
//!
//! - empty: indices equal AND wrap bits equal
//! - full:  indices equal AND wrap bits differ
//!
//! # Memory Requirements
//!
//! Queue memory must be physically contiguous (the device reads it by
//! physical address), zeroed, and aligned to the entry size. The engine
//! itself only does slot arithmetic and volatile slot access; register
//! publication and barriers are the caller's concern.

use core::ptr::{read_volatile, write_volatile};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Trait for queue entries that can be safely shared with a device.
///
/// Entries must be POD (Plain Old Data) types that can be safely copied
/// to/from device-visible buffers and reinterpreted as raw bytes.
pub trait QueueEntry:
    Copy + Default + Sized + FromBytes + IntoBytes + Immutable + KnownLayout
{
    /// Size of this entry type in bytes.
    const SIZE: usize = core::mem::size_of::<Self>();
}

// Blanket implementation for any type meeting the requirements
impl<T> QueueEntry for T where
    T: Copy + Default + Sized + FromBytes + IntoBytes + Immutable + KnownLayout
{
}

/// A producer or consumer position in a wrap-bit ring.
///
/// Wraps the raw register value together with the ring's `log2size` so the
/// slot index and wrap bit can be extracted consistently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingIndex {
    raw: u32,
    log2size: u32,
}

impl RingIndex {
    /// Interpret a raw index register value for a ring of `2^log2size`
    /// entries. Bits above the wrap bit are ignored.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32, log2size: u32) -> Self {
        Self {
            raw: raw & ((1 << (log2size + 1)) - 1),
            log2size,
        }
    }

    /// Number of entries in the ring.
    #[inline]
    #[must_use]
    pub const fn capacity(self) -> u32 {
        1 << self.log2size
    }

    /// Slot index, bits `[log2size-1:0]` of the raw value.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.raw & (self.capacity() - 1)
    }

    /// Wrap bit, bit `[log2size]` of the raw value (kept in place so two
    /// positions can be compared without shifting).
    #[inline]
    #[must_use]
    pub const fn wrap(self) -> u32 {
        self.raw & self.capacity()
    }

    /// The raw value to publish back to the index register.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.raw
    }

    /// Advance by one slot, wrapping the index and toggling the wrap bit
    /// together at the end of the ring.
    #[inline]
    #[must_use]
    pub const fn advance(self) -> Self {
        Self {
            raw: (self.raw + 1) & ((self.capacity() << 1) - 1),
            log2size: self.log2size,
        }
    }
}

/// A queue is empty iff producer and consumer agree on both index and wrap.
#[inline]
#[must_use]
pub const fn is_empty(prod: RingIndex, cons: RingIndex) -> bool {
    prod.index() == cons.index() && prod.wrap() == cons.wrap()
}

/// A queue is full iff the indices match but the wrap bits differ: the
/// producer has lapped the consumer exactly once.
#[inline]
#[must_use]
pub const fn is_full(prod: RingIndex, cons: RingIndex) -> bool {
    prod.index() == cons.index() && prod.wrap() != cons.wrap()
}

/// Fixed-size entry storage for a wrap-bit ring.
///
/// Owns nothing: the entry array lives in caller-provided queue memory.
pub struct Ring<E: QueueEntry> {
    entries: *mut E,
    log2size: u32,
}

impl<E: QueueEntry> Ring<E> {
    /// Memory required for a ring of `2^log2size` entries.
    #[inline]
    #[must_use]
    pub const fn memory_size(log2size: u32) -> usize {
        (1usize << log2size) * E::SIZE
    }

    /// Create a ring over existing queue memory.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - `base` points to valid, zeroed memory of at least
    ///   `memory_size(log2size)` bytes, aligned for `E`
    /// - The memory remains valid for the lifetime of this ring
    #[inline]
    #[must_use]
    pub const unsafe fn new(base: *mut E, log2size: u32) -> Self {
        Self {
            entries: base,
            log2size,
        }
    }

    /// Number of entries in the ring.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        1 << self.log2size
    }

    /// Log2 of the number of entries.
    #[inline]
    #[must_use]
    pub const fn log2size(&self) -> u32 {
        self.log2size
    }

    /// Volatile-write an entry into the given slot.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the slot is out of bounds.
    #[inline]
    pub fn write_slot(&self, slot: u32, entry: &E) {
        debug_assert!(slot < self.capacity(), "ring slot out of bounds");
        // SAFETY: entries pointer is valid per the `new` contract, slot is
        // within bounds
        unsafe { write_volatile(self.entries.add(slot as usize), *entry) };
    }

    /// Volatile-read the entry at the given slot.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the slot is out of bounds.
    #[inline]
    #[must_use]
    pub fn read_slot(&self, slot: u32) -> E {
        debug_assert!(slot < self.capacity(), "ring slot out of bounds");
        // SAFETY: entries pointer is valid per the `new` contract, slot is
        // within bounds
        unsafe { read_volatile(self.entries.add(slot as usize)) }
    }
}

// SAFETY: Ring can be sent between threads if the entry memory is valid and
// the receiver upholds the single-owner access discipline.
unsafe impl<E: QueueEntry + Send> Send for Ring<E> {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn advance_wraps_index_and_toggles_wrap_bit() {
        let mut idx = RingIndex::new(0, 2); // 4 entries, wrap bit is bit 2

        for step in 0u32..4 {
            assert_eq!(idx.index(), step);
            assert_eq!(idx.wrap(), 0);
            idx = idx.advance();
        }
        // First lap complete: index back to zero, wrap bit set
        assert_eq!(idx.index(), 0);
        assert_eq!(idx.wrap(), 4);
        assert_eq!(idx.raw(), 4);

        for _ in 0..4 {
            idx = idx.advance();
        }
        // Second lap: wrap bit toggles back
        assert_eq!(idx.index(), 0);
        assert_eq!(idx.wrap(), 0);
        assert_eq!(idx.raw(), 0);
    }

    #[test]
    fn empty_and_full_predicates() {
        let log2 = 3;
        let cons = RingIndex::new(5, log2);

        let same = RingIndex::new(5, log2);
        assert!(is_empty(same, cons));
        assert!(!is_full(same, cons));

        // Same index, opposite wrap bit: the producer has lapped the consumer
        let lapped = RingIndex::new(5 | 8, log2);
        assert!(is_full(lapped, cons));
        assert!(!is_empty(lapped, cons));

        // Different index: neither empty nor full
        let ahead = RingIndex::new(6, log2);
        assert!(!is_empty(ahead, cons));
        assert!(!is_full(ahead, cons));
    }

    #[test]
    fn high_bits_of_raw_register_value_are_ignored() {
        let idx = RingIndex::new(0xFFFF_0005, 3);
        assert_eq!(idx.index(), 5);
        assert_eq!(idx.wrap(), 0);
    }

    #[test]
    fn slot_storage_roundtrip() {
        #[repr(C)]
        #[derive(
            Clone,
            Copy,
            Debug,
            Default,
            PartialEq,
            zerocopy::FromBytes,
            zerocopy::IntoBytes,
            zerocopy::Immutable,
            zerocopy::KnownLayout,
        )]
        struct Entry {
            words: [u64; 2],
        }

        let mut backing = [Entry::default(); 4];
        let ring = unsafe { Ring::new(backing.as_mut_ptr(), 2) };

        let e = Entry {
            words: [0x46, 0xABCD],
        };
        ring.write_slot(3, &e);
        assert_eq!(ring.read_slot(3), e);
        assert_eq!(ring.read_slot(0), Entry::default());
    }

    proptest! {
        /// The wrap-bit predicates must agree with a reference model that
        /// simply counts outstanding entries, for any sequence of
        /// enqueue/dequeue operations that never exceeds capacity.
        #[test]
        fn predicates_match_counting_model(
            log2size in 1u32..6,
            ops in proptest::collection::vec(any::<bool>(), 0..256),
        ) {
            let capacity = 1u32 << log2size;
            let mut prod = RingIndex::new(0, log2size);
            let mut cons = RingIndex::new(0, log2size);
            let mut outstanding = 0u32;

            for &enqueue in &ops {
                prop_assert_eq!(is_empty(prod, cons), outstanding == 0);
                prop_assert_eq!(is_full(prod, cons), outstanding == capacity);

                if enqueue {
                    if !is_full(prod, cons) {
                        prod = prod.advance();
                        outstanding += 1;
                    }
                } else if !is_empty(prod, cons) {
                    cons = cons.advance();
                    outstanding -= 1;
                }
            }

            prop_assert_eq!(is_empty(prod, cons), outstanding == 0);
            prop_assert_eq!(is_full(prod, cons), outstanding == capacity);
        }
    }
}
