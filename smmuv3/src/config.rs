//! Platform configuration input
//!
//! The platform hands the driver one [`SmmuConfig`] at bring-up, distilled
//! from its firmware topology description (base address and StreamID span
//! of the SMMU node, coherency flags of the SMMU and root-complex nodes).
//! Parsing that description is the platform's job; the driver only
//! consumes the result, once.

use crate::error::SmmuError;

/// One SMMU instance's boot-time configuration.
#[derive(Debug, Clone, Copy)]
pub struct SmmuConfig {
    /// Physical base address of the SMMU register bank (two 64 KiB
    /// register pages).
    pub base_address: u64,
    /// Largest StreamID any device behind this SMMU emits. Sizes the
    /// linear stream table.
    pub max_stream_id: u32,
    /// Number of StreamIDs in the mapped span.
    pub stream_id_count: u32,
    /// The SMMU's coherent-access-capable flag (COHAC override). Selects
    /// write-back/inner-shareable table and queue attributes when set,
    /// non-cacheable/outer-shareable otherwise.
    pub coherent_access: bool,
    /// Root complex cache-coherent attribute (CCA).
    pub rc_cache_coherent: bool,
    /// Root complex coherent-path-to-memory flag (CPM).
    pub rc_coherent_path: bool,
    /// Root complex device-attribute-cacheable flag (DACS).
    pub rc_device_access_cached: bool,
}

impl SmmuConfig {
    /// Log2 of the stream table entry count: the smallest power of two
    /// covering every configured StreamID.
    ///
    /// A maximum StreamID of 31 (32 identifiers) yields `log2size == 5`,
    /// a 32-entry table.
    #[inline]
    #[must_use]
    pub const fn stream_table_log2size(&self) -> u32 {
        let entries = self.max_stream_id as u64 + 1;
        entries.next_power_of_two().trailing_zeros()
    }

    /// Whether the stream table entries should carry the full memory-type
    /// override (incoming attributes replaced with inner+outer write-back
    /// cacheable, inner shareable). Only meaningful where the hardware
    /// also advertises attribute override support.
    #[inline]
    #[must_use]
    pub const fn wants_memattr_override(&self) -> bool {
        self.rc_cache_coherent && self.rc_coherent_path && !self.rc_device_access_cached
    }

    /// Reject configurations the driver cannot act on.
    pub fn validate(&self) -> Result<(), SmmuError> {
        if self.base_address == 0 || self.stream_id_count == 0 {
            return Err(SmmuError::InvalidParameter);
        }
        Ok(())
    }
}
