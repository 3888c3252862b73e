//! ARM SMMUv3 register definitions
//!
//! Based on ARM System Memory Management Unit Architecture Specification
//! SMMU v3.0 to v3.3 (ARM IHI 0070). Bit-field registers are modelled as
//! thin `u32` newtypes with one mask/shift accessor per field; every
//! accessor documents the bit range it decodes.

// -- Register Offsets (page 0 unless noted)

/// Identification Register 0
pub const SMMU_IDR0: usize = 0x000;
/// Identification Register 1
pub const SMMU_IDR1: usize = 0x004;
/// Identification Register 5
pub const SMMU_IDR5: usize = 0x014;
/// Control Register 0
pub const SMMU_CR0: usize = 0x020;
/// Control Register 0 Acknowledgement
pub const SMMU_CR0ACK: usize = 0x024;
/// Control Register 1 (table/queue memory attributes)
pub const SMMU_CR1: usize = 0x028;
/// Control Register 2
pub const SMMU_CR2: usize = 0x02C;
/// Global Bypass Attribute
pub const SMMU_GBPA: usize = 0x044;
/// Interrupt Control
pub const SMMU_IRQ_CTRL: usize = 0x050;
/// Interrupt Control Acknowledgement
pub const SMMU_IRQ_CTRLACK: usize = 0x054;
/// Global Error status
pub const SMMU_GERROR: usize = 0x060;
/// Global Error acknowledgement (toggle-to-ack)
pub const SMMU_GERRORN: usize = 0x064;
/// Stream Table Base
pub const SMMU_STRTAB_BASE: usize = 0x080;
/// Stream Table Base Configuration
pub const SMMU_STRTAB_BASE_CFG: usize = 0x088;
/// Command Queue Base
pub const SMMU_CMDQ_BASE: usize = 0x090;
/// Command Queue Producer Index
pub const SMMU_CMDQ_PROD: usize = 0x098;
/// Command Queue Consumer Index
pub const SMMU_CMDQ_CONS: usize = 0x09C;
/// Event Queue Base
pub const SMMU_EVENTQ_BASE: usize = 0x0A0;

/// Displacement of register page 1 from the bank base. The event queue
/// index registers live there rather than alongside the command queue's.
pub const SMMU_PAGE1_OFFSET: usize = 0x10000;
/// Event Queue Producer Index (page 1)
pub const SMMU_EVENTQ_PROD: usize = SMMU_PAGE1_OFFSET + 0xA8;
/// Event Queue Consumer Index (page 1)
pub const SMMU_EVENTQ_CONS: usize = SMMU_PAGE1_OFFSET + 0xAC;

// -- CR0 Register Bits

/// SMMU Enable, bit [0]
pub const CR0_SMMUEN: u32 = 1 << 0;
/// PRI Queue Enable, bit [1]
pub const CR0_PRIQEN: u32 = 1 << 1;
/// Event Queue Enable, bit [2]
pub const CR0_EVENTQEN: u32 = 1 << 2;
/// Command Queue Enable, bit [3]
pub const CR0_CMDQEN: u32 = 1 << 3;
/// ATS translated-traffic check, bit [4]
pub const CR0_ATSCHK: u32 = 1 << 4;
/// VMID wildcard matching, bits [8:6]
pub const CR0_VMW_MASK: u32 = 0x7 << 6;
/// Every enable bit: SMMUEN | PRIQEN | EVENTQEN | CMDQEN
pub const CR0_ALL_EN_MASK: u32 = 0xF;
/// The two queue enables asserted before any command is issued
pub const CR0_QUEUE_EN_MASK: u32 = CR0_CMDQEN | CR0_EVENTQEN;
/// All writable CR0 fields the driver manages
pub const CR0_VALID_MASK: u32 = CR0_ALL_EN_MASK | CR0_ATSCHK | CR0_VMW_MASK;

// -- CR1 Register Fields (queue memory attributes)

/// Writable CR1 fields, bits [11:0]
pub const CR1_VALID_MASK: u32 = 0xFFF;

/// Compose the CR1 queue attribute fields: inner cacheability QUEUE_IC
/// bits [1:0], outer cacheability QUEUE_OC bits [3:2], shareability
/// QUEUE_SH bits [5:4].
#[inline]
#[must_use]
pub const fn cr1_queue_attrs(ic: u32, oc: u32, sh: u32) -> u32 {
    (ic & 0x3) | (oc & 0x3) << 2 | (sh & 0x3) << 4
}

// -- CR2 Register Bits

/// EL2-E2H translation regime, bit [0]
pub const CR2_E2H: u32 = 1 << 0;
/// Record C_BAD_STREAMID for invalid input streams, bit [1]
pub const CR2_RECINVSID: u32 = 1 << 1;
/// Private TLB maintenance, bit [2]; only valid when IDR0 reports
/// broadcast TLB maintenance support
pub const CR2_PTM: u32 = 1 << 2;
/// Writable CR2 fields, bits [2:0]
pub const CR2_VALID_MASK: u32 = 0x7;

// -- GBPA Register Bits

/// Abort all incoming transactions, bit [20]
pub const GBPA_ABORT: u32 = 1 << 20;
/// Update handshake flag, bit [31]; hardware clears it when the new
/// attributes have taken effect
pub const GBPA_UPDATE: u32 = 1 << 31;

// -- IRQ_CTRL Register Bits

/// Global error interrupt enable, bit [0]
pub const IRQ_CTRL_GERROR_EN: u32 = 1 << 0;
/// PRI queue interrupt enable, bit [1]
pub const IRQ_CTRL_PRIQ_EN: u32 = 1 << 1;
/// Event queue interrupt enable, bit [2]
pub const IRQ_CTRL_EVENTQ_EN: u32 = 1 << 2;
/// All three interrupt enables, bits [2:0]
pub const IRQ_CTRL_EN_MASK: u32 = 0x7;

// -- GERROR

/// Bits of GERROR that can report an error condition (bit [1] is
/// reserved): CMDQ_ERR [0], EVTQ_ABT_ERR [2], PRIQ_ABT_ERR [3],
/// MSI abort errors [7:4], SFM_ERR [8].
pub const GERROR_VALID_MASK: u32 = 0x1FD;

// -- Identification Registers

/// SMMU_IDR0 capability fields.
#[derive(Clone, Copy, Debug)]
pub struct Idr0(pub u32);

impl Idr0 {
    /// S2P, bit [0]: stage-2 translation supported.
    #[inline]
    #[must_use]
    pub const fn stage2_supported(self) -> bool {
        self.0 & (1 << 0) != 0
    }

    /// S1P, bit [1]: stage-1 translation supported.
    #[inline]
    #[must_use]
    pub const fn stage1_supported(self) -> bool {
        self.0 & (1 << 1) != 0
    }

    /// TTF, bits [3:2]: translation table formats. 0b10 and 0b11 include
    /// AArch64 tables.
    #[inline]
    #[must_use]
    pub const fn aarch64_tables(self) -> bool {
        let ttf = (self.0 >> 2) & 0x3;
        ttf == 0b10 || ttf == 0b11
    }

    /// COHACC, bit [4]: coherent access to tables and queues supported.
    #[inline]
    #[must_use]
    pub const fn coherent_access(self) -> bool {
        self.0 & (1 << 4) != 0
    }

    /// BTM, bit [5]: broadcast TLB maintenance supported.
    #[inline]
    #[must_use]
    pub const fn broadcast_tlb_maintenance(self) -> bool {
        self.0 & (1 << 5) != 0
    }

    /// ATS, bit [10]: PCIe Address Translation Services supported.
    #[inline]
    #[must_use]
    pub const fn ats_supported(self) -> bool {
        self.0 & (1 << 10) != 0
    }
}

/// SMMU_IDR1 sizing fields.
#[derive(Clone, Copy, Debug)]
pub struct Idr1(pub u32);

impl Idr1 {
    /// SIDSIZE, bits [5:0]: supported StreamID width in bits.
    #[inline]
    #[must_use]
    pub const fn stream_id_bits(self) -> u32 {
        self.0 & 0x3F
    }

    /// EVENTQS, bits [20:16]: log2 of the maximum event queue entries.
    #[inline]
    #[must_use]
    pub const fn event_queue_log2(self) -> u32 {
        (self.0 >> 16) & 0x1F
    }

    /// CMDQS, bits [25:21]: log2 of the maximum command queue entries.
    #[inline]
    #[must_use]
    pub const fn command_queue_log2(self) -> u32 {
        (self.0 >> 21) & 0x1F
    }

    /// ATTR_TYPES_OVR, bit [27]: STEs may override incoming memory type
    /// and shareability attributes.
    #[inline]
    #[must_use]
    pub const fn attr_types_override(self) -> bool {
        self.0 & (1 << 27) != 0
    }
}

/// SMMU_IDR5 address-size fields.
#[derive(Clone, Copy, Debug)]
pub struct Idr5(pub u32);

impl Idr5 {
    /// OAS, bits [2:0]: encoded output address size.
    #[inline]
    #[must_use]
    pub const fn output_address_size(self) -> u32 {
        self.0 & 0x7
    }

    /// GRAN4K, bit [4]: 4 KiB translation granule supported.
    #[inline]
    #[must_use]
    pub const fn gran4k(self) -> bool {
        self.0 & (1 << 4) != 0
    }
}

// -- Address size encoding

/// Decode an OAS/PS address-size encoding to a width in bits. Unknown
/// encodings decode to 0.
#[inline]
#[must_use]
pub const fn decode_address_width(encoding: u32) -> u32 {
    match encoding {
        0 => 32,
        1 => 36,
        2 => 40,
        3 => 42,
        4 => 44,
        5 => 48,
        6 => 52,
        _ => 0,
    }
}

/// Encode an address width in bits as an OAS/PS field value. Unknown
/// widths encode to 0 (32-bit).
#[inline]
#[must_use]
pub const fn encode_address_width(width: u32) -> u64 {
    match width {
        32 => 0,
        36 => 1,
        40 => 2,
        42 => 3,
        44 => 4,
        48 => 5,
        52 => 6,
        _ => 0,
    }
}

// -- Memory attribute encodings shared by STE fields and CR1

/// Region cacheability: non-cacheable
pub const RGN_CACHE_NONE: u32 = 0;
/// Region cacheability: write-back, read/write-allocate
pub const RGN_CACHE_WRITEBACK: u32 = 1;
/// Shareability: outer shareable
pub const SH_OUTER: u32 = 2;
/// Shareability: inner shareable
pub const SH_INNER: u32 = 3;

// -- Base register composition

/// STRTAB_BASE address field mask, bits [51:6].
const STRTAB_BASE_ADDR_MASK: u64 = 0x000F_FFFF_FFFF_FFC0;
/// CMDQ_BASE/EVENTQ_BASE address field mask, bits [51:5].
const QUEUE_BASE_ADDR_MASK: u64 = 0x000F_FFFF_FFFF_FFE0;
/// Read/write-allocate hint in the base registers, bit [62].
const BASE_ALLOC_HINT: u64 = 1 << 62;

/// Compose STRTAB_BASE: table physical address (bits [51:6]) plus the
/// read-allocate hint (bit [62]).
#[inline]
#[must_use]
pub const fn strtab_base(table_pa: u64, read_allocate: bool) -> u64 {
    let hint = if read_allocate { BASE_ALLOC_HINT } else { 0 };
    (table_pa & STRTAB_BASE_ADDR_MASK) | hint
}

/// Compose STRTAB_BASE_CFG: LOG2SIZE in bits [5:0], FMT in bits [17:16]
/// left zero for the linear format.
#[inline]
#[must_use]
pub const fn strtab_base_cfg(log2size: u32) -> u32 {
    log2size & 0x3F
}

/// Compose CMDQ_BASE/EVENTQ_BASE: LOG2SIZE in bits [4:0], queue physical
/// address in bits [51:5], allocate hint (RA or WA) in bit [62].
#[inline]
#[must_use]
pub const fn queue_base(queue_pa: u64, log2size: u32, allocate_hint: bool) -> u64 {
    let hint = if allocate_hint { BASE_ALLOC_HINT } else { 0 };
    (queue_pa & QUEUE_BASE_ADDR_MASK) | (log2size as u64 & 0x1F) | hint
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idr_field_extraction() {
        // S2P + S1P + AArch64 TTF + COHACC + BTM + ATS
        let idr0 = Idr0(0b10 << 2 | 1 | 1 << 1 | 1 << 4 | 1 << 5 | 1 << 10);
        assert!(idr0.stage2_supported());
        assert!(idr0.stage1_supported());
        assert!(idr0.aarch64_tables());
        assert!(idr0.coherent_access());
        assert!(idr0.broadcast_tlb_maintenance());
        assert!(idr0.ats_supported());

        assert!(!Idr0(0b01 << 2).aarch64_tables());

        let idr1 = Idr1(21 | 8 << 16 | 11 << 21 | 1 << 27);
        assert_eq!(idr1.stream_id_bits(), 21);
        assert_eq!(idr1.event_queue_log2(), 8);
        assert_eq!(idr1.command_queue_log2(), 11);
        assert!(idr1.attr_types_override());

        let idr5 = Idr5(5 | 1 << 4);
        assert_eq!(idr5.output_address_size(), 5);
        assert!(idr5.gran4k());
    }

    #[test]
    fn address_width_codec() {
        for width in [32, 36, 40, 42, 44, 48, 52] {
            assert_eq!(decode_address_width(encode_address_width(width) as u32), width);
        }
        assert_eq!(decode_address_width(7), 0);
    }

    #[test]
    fn base_register_composition() {
        let base = strtab_base(0x8000_1000, true);
        assert_eq!(base & STRTAB_BASE_ADDR_MASK, 0x8000_1000);
        assert_ne!(base & BASE_ALLOC_HINT, 0);

        let base = queue_base(0x8000_2000, 8, false);
        assert_eq!(base & QUEUE_BASE_ADDR_MASK, 0x8000_2000);
        assert_eq!(base & 0x1F, 8);
        assert_eq!(base & BASE_ALLOC_HINT, 0);
    }

    #[test]
    fn cr1_queue_attr_packing() {
        let cr1 = cr1_queue_attrs(RGN_CACHE_WRITEBACK, RGN_CACHE_WRITEBACK, SH_INNER);
        assert_eq!(cr1, 0b11_01_01);
        assert_eq!(cr1 & !CR1_VALID_MASK, 0);
    }
}
