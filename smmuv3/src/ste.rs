//! Stream table entries
//!
//! Every StreamID resolves through one Stream Table Entry (STE) in a
//! linear table. This driver runs every stream through the same stage-2
//! identity translation, so a single template entry is built from the
//! platform configuration and the capability registers, then replicated
//! into every slot.

use core::ptr::write_volatile;

use crate::config::SmmuConfig;
use crate::registers::{
    decode_address_width, encode_address_width, Idr0, Idr1, Idr5, RGN_CACHE_NONE,
    RGN_CACHE_WRITEBACK, SH_INNER, SH_OUTER,
};
use crate::PAGE_SIZE;

/// Highest input/output address width usable with the 4 KiB granule.
/// Larger stage-2 outputs require a 64 KiB granule, which this driver
/// does not support.
const MAX_ADDRESS_WIDTH: u32 = 48;

/// Stream Table Entry - 64 bytes
#[repr(C, align(64))]
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamTableEntry {
    dwords: [u64; 8],
}

impl StreamTableEntry {
    /// Size of an STE in bytes.
    pub const SIZE: usize = 64;

    /// An invalid STE; transactions for the stream are aborted.
    #[inline]
    #[must_use]
    pub const fn invalid() -> Self {
        Self { dwords: [0; 8] }
    }

    /// Build the stage-2-translate / stage-1-bypass template entry.
    ///
    /// `page_table_root` is the physical address of the level-0 stage-2
    /// translation table every stream shares.
    #[must_use]
    pub fn stage2_template(
        config: &SmmuConfig,
        idr0: Idr0,
        idr1: Idr1,
        idr5: Idr5,
        page_table_root: u64,
    ) -> Self {
        let mut ste = Self::invalid();

        // The maximum address width with AArch64 format is given by
        // IDR5.OAS and capped at 48 bits for the 4 KiB granule even if
        // the hardware advertises more.
        let oas_width = decode_address_width(idr5.output_address_size());
        let output_width = if oas_width < MAX_ADDRESS_WIDTH {
            oas_width
        } else {
            MAX_ADDRESS_WIDTH
        };
        let input_width = oas_width;

        // Word 0: V [0], Config [3:1] = 0b110 (stage-2 translate,
        // stage-1 bypass)
        ste.dwords[0] = 1 | 0b110 << 1;

        // Word 1: EATS [29:28] = 0 (ATS not used for these streams).
        // SHCFG [45:44] / MTCFG [36] / MEMATTR [35:32] override the
        // incoming attributes, honoured only when IDR1 advertises
        // attribute override.
        if idr1.attr_types_override() {
            ste.dwords[1] = 0x1 << 44; // SHCFG = incoming shareability
            if config.wants_memattr_override() {
                ste.dwords[1] = (0xF << 32)   // MEMATTR = inner+outer write-back
                    | (1 << 36)               // MTCFG = replace memory type
                    | (0x3 << 44); // SHCFG = inner shareable
            }
        }

        // Word 2: stage-2 translation control
        let (ir0, or0, sh0) = if config.coherent_access {
            (RGN_CACHE_WRITEBACK, RGN_CACHE_WRITEBACK, SH_INNER)
        } else {
            (RGN_CACHE_NONE, RGN_CACHE_NONE, SH_OUTER)
        };
        ste.dwords[2] = 1                                        // S2VMID [15:0], non-zero
            | ((64 - input_width) as u64) << 32                  // S2T0SZ [37:32]
            | 0b10 << 38                                         // S2SL0 [39:38], walk starts at level 0
            | (ir0 as u64) << 40                                 // S2IR0 [41:40]
            | (or0 as u64) << 42                                 // S2OR0 [43:42]
            | (sh0 as u64) << 44                                 // S2SH0 [45:44]
            | 0b00 << 46                                         // S2TG [47:46], 4 KiB granule
            | encode_address_width(output_width) << 48           // S2PS [50:48]
            | 1 << 51                                            // S2AA64 [51]
            | 1 << 58; // S2R [58], record faults

        if idr0.stage1_supported() && idr0.stage2_supported() {
            ste.dwords[2] |= 1 << 54; // S2PTW [54]
        }

        // Word 3: S2TTB [51:4], the stage-2 translation table base
        ste.dwords[3] = page_table_root & 0x000F_FFFF_FFFF_FFF0;

        ste
    }

    /// V, word 0 bit [0].
    #[inline]
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.dwords[0] & 1 != 0
    }

    /// Config, word 0 bits [3:1].
    #[inline]
    #[must_use]
    pub const fn config(&self) -> u64 {
        (self.dwords[0] >> 1) & 0x7
    }

    /// S2VMID, word 2 bits [15:0].
    #[inline]
    #[must_use]
    pub const fn vmid(&self) -> u64 {
        self.dwords[2] & 0xFFFF
    }

    /// S2T0SZ, word 2 bits [37:32].
    #[inline]
    #[must_use]
    pub const fn s2_t0sz(&self) -> u64 {
        (self.dwords[2] >> 32) & 0x3F
    }

    /// S2PS, word 2 bits [50:48].
    #[inline]
    #[must_use]
    pub const fn s2_ps(&self) -> u64 {
        (self.dwords[2] >> 48) & 0x7
    }

    /// S2SH0, word 2 bits [45:44].
    #[inline]
    #[must_use]
    pub const fn s2_sh0(&self) -> u64 {
        (self.dwords[2] >> 44) & 0x3
    }

    /// S2R, word 2 bit [58]: faults are recorded to the event queue.
    #[inline]
    #[must_use]
    pub const fn records_faults(&self) -> bool {
        self.dwords[2] & (1 << 58) != 0
    }

    /// S2TTB, word 3 bits [51:4], already positioned as an address.
    #[inline]
    #[must_use]
    pub const fn translation_table_base(&self) -> u64 {
        self.dwords[3] & 0x000F_FFFF_FFFF_FFF0
    }
}

/// The linear stream table: one STE per StreamID.
pub struct StreamTable {
    base: u64,
    log2size: u32,
    pages: usize,
}

impl StreamTable {
    /// Describe a stream table living in `pages` pages of zeroed memory
    /// at physical address `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to zeroed, page-aligned memory covering
    /// `pages_for(log2size)` pages, valid for the table's lifetime.
    #[inline]
    #[must_use]
    pub const unsafe fn new(base: u64, log2size: u32) -> Self {
        Self {
            base,
            log2size,
            pages: Self::pages_for(log2size),
        }
    }

    /// Pages needed for a table of `2^log2size` entries, rounded up to
    /// the hardware page size.
    #[inline]
    #[must_use]
    pub const fn pages_for(log2size: u32) -> usize {
        ((1usize << log2size) * StreamTableEntry::SIZE).div_ceil(PAGE_SIZE)
    }

    /// Physical base address of the table.
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

    /// Number of entries.
    #[inline]
    #[must_use]
    pub const fn entries(&self) -> usize {
        1 << self.log2size
    }

    /// Pages backing the table.
    #[inline]
    #[must_use]
    pub const fn pages(&self) -> usize {
        self.pages
    }

    /// Replicate one template entry into every slot.
    pub fn fill(&self, template: &StreamTableEntry) {
        for slot in 0..self.entries() {
            let ptr = (self.base as usize + slot * StreamTableEntry::SIZE)
                as *mut StreamTableEntry;
            // SAFETY: The `new` contract guarantees the backing memory
            // covers every slot; entries are 64-byte aligned within a
            // page-aligned table.
            unsafe { write_volatile(ptr, *template) };
        }
    }

    /// Read back one slot.
    #[must_use]
    pub fn entry(&self, slot: usize) -> StreamTableEntry {
        debug_assert!(slot < self.entries(), "stream table slot out of bounds");
        let ptr =
            (self.base as usize + slot * StreamTableEntry::SIZE) as *const StreamTableEntry;
        // SAFETY: Slot is within the table per the `new` contract.
        unsafe { core::ptr::read_volatile(ptr) }
    }
}
