//! Test doubles for the register seam and the platform allocator.
//!
//! `MockSmmu` models just enough acknowledgement behaviour to drive the
//! bring-up sequence: CR0ACK and IRQ_CTRLACK mirror writes (individual
//! bits can be frozen to fake a non-acknowledging unit), the GBPA UPDATE
//! handshake self-clears, and command-queue producer writes are consumed
//! immediately with each command's opcode captured in submission order.
//!
//! `TestAllocator` hands out real host pages and tracks the balance so
//! tests can assert that every failure path releases what it allocated.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::vec::Vec;

use smmuv3_mmio::RegisterIo;

use crate::registers::{
    GBPA_UPDATE, SMMU_CMDQ_BASE, SMMU_CMDQ_CONS, SMMU_CMDQ_PROD, SMMU_CR0, SMMU_CR0ACK,
    SMMU_GBPA, SMMU_GERROR, SMMU_IDR0, SMMU_IDR1, SMMU_IDR5, SMMU_IRQ_CTRL, SMMU_IRQ_CTRLACK,
    CR0_SMMUEN,
};
use crate::traits::PageAllocator;
use crate::PAGE_SIZE;

#[derive(Default)]
struct AllocState {
    live: BTreeMap<u64, usize>,
    allocations: usize,
    fail_after: Option<usize>,
}

/// Page allocator over the host heap with balance tracking.
pub(crate) struct TestAllocator {
    state: Rc<RefCell<AllocState>>,
}

impl TestAllocator {
    pub(crate) fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(AllocState::default())),
        }
    }

    /// A second handle onto the same balance, for asserting after the
    /// allocator itself moved into the device.
    pub(crate) fn handle(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }

    /// Make every allocation after the next `n` fail.
    pub(crate) fn fail_after(&self, n: usize) {
        self.state.borrow_mut().fail_after = Some(n);
    }

    /// Pages currently allocated and not yet freed.
    pub(crate) fn outstanding_pages(&self) -> usize {
        self.state.borrow().live.values().sum()
    }
}

impl PageAllocator for TestAllocator {
    fn allocate_pages(&mut self, count: usize) -> Option<u64> {
        if count == 0 {
            return None;
        }
        {
            let mut state = self.state.borrow_mut();
            if let Some(budget) = state.fail_after {
                if state.allocations >= budget {
                    return None;
                }
            }
            state.allocations += 1;
        }

        let layout = Layout::from_size_align(count * PAGE_SIZE, PAGE_SIZE).ok()?;
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return None;
        }
        self.state.borrow_mut().live.insert(ptr as u64, count);
        Some(ptr as u64)
    }

    fn free_pages(&mut self, base: u64, count: usize) {
        let recorded = self.state.borrow_mut().live.remove(&base);
        assert_eq!(recorded, Some(count), "free_pages does not match allocation");
        let layout = Layout::from_size_align(count * PAGE_SIZE, PAGE_SIZE).unwrap();
        // SAFETY: `base` was returned by alloc_zeroed with this layout and
        // is freed exactly once (the balance map just verified both).
        unsafe { dealloc(base as *mut u8, layout) };
    }
}

/// Scripted SMMU register file.
pub(crate) struct MockSmmu {
    regs: RefCell<BTreeMap<usize, u64>>,
    captured: RefCell<Vec<u8>>,
    cr0_ack_mask: Cell<u32>,
    irq_ack_mask: Cell<u32>,
    gbpa_update_stuck: Cell<bool>,
    gerror_on_enable: Cell<Option<u32>>,
    cmdq: Cell<Option<(u64, u32)>>,
}

impl MockSmmu {
    pub(crate) fn new() -> Self {
        let mock = Self {
            regs: RefCell::new(BTreeMap::new()),
            captured: RefCell::new(Vec::new()),
            cr0_ack_mask: Cell::new(u32::MAX),
            irq_ack_mask: Cell::new(u32::MAX),
            gbpa_update_stuck: Cell::new(false),
            gerror_on_enable: Cell::new(None),
            cmdq: Cell::new(None),
        };
        // Capabilities: stage-1 + stage-2, AArch64 tables
        mock.set32(SMMU_IDR0, 0b10 << 2 | 0b11);
        // Queue capacities: command 2^8, event 2^7
        mock.set32(SMMU_IDR1, 8 << 21 | 7 << 16);
        // 48-bit output, 4 KiB granule
        mock.set32(SMMU_IDR5, 5 | 1 << 4);
        mock
    }

    /// Preset a register value without triggering write behaviour.
    pub(crate) fn set32(&self, offset: usize, value: u32) {
        self.regs.borrow_mut().insert(offset, value as u64);
    }

    /// Freeze the given CR0ACK bits at their current value.
    pub(crate) fn freeze_cr0_ack(&self, bits: u32) {
        self.cr0_ack_mask.set(!bits);
    }

    /// Freeze the given IRQ_CTRLACK bits at their current value.
    pub(crate) fn freeze_irq_ack(&self, bits: u32) {
        self.irq_ack_mask.set(!bits);
    }

    /// Make the GBPA UPDATE handshake hang.
    pub(crate) fn stick_gbpa_update(&self) {
        self.gbpa_update_stuck.set(true);
    }

    /// Raise the given GERROR bits as soon as translation is enabled.
    pub(crate) fn raise_gerror_on_enable(&self, bits: u32) {
        self.gerror_on_enable.set(Some(bits));
    }

    /// Point the consuming side at command queue memory. Normally learned
    /// from the CMDQ_BASE write during bring-up; queue-level tests attach
    /// explicitly.
    pub(crate) fn attach_command_queue(&self, base: u64, log2size: u32) {
        self.cmdq.set(Some((base, log2size)));
    }

    /// Opcodes of every consumed command, in submission order.
    pub(crate) fn captured_opcodes(&self) -> Vec<u8> {
        self.captured.borrow().clone()
    }

    pub(crate) fn clear_captured(&self) {
        self.captured.borrow_mut().clear();
    }

    fn get(&self, offset: usize) -> u64 {
        self.regs.borrow().get(&offset).copied().unwrap_or(0)
    }

    /// Consume every command between the current consumer index and the
    /// newly published producer index.
    fn drain_command_queue(&self, prod_raw: u32) {
        let Some((base, log2size)) = self.cmdq.get() else {
            return;
        };
        let entries = 1u32 << log2size;
        let raw_mask = (entries << 1) - 1;
        let mut cons = self.get(SMMU_CMDQ_CONS) as u32 & raw_mask;
        let prod = prod_raw & raw_mask;

        while cons != prod {
            let slot = cons & (entries - 1);
            let ptr = (base as usize + slot as usize * 16) as *const u64;
            // SAFETY: The attached queue memory covers `entries` slots.
            let word0 = unsafe { core::ptr::read_volatile(ptr) };
            self.captured.borrow_mut().push((word0 & 0xFF) as u8);
            cons = (cons + 1) & raw_mask;
        }
        self.set32(SMMU_CMDQ_CONS, cons);
    }
}

impl RegisterIo for MockSmmu {
    fn read32(&self, offset: usize) -> u32 {
        self.get(offset) as u32
    }

    fn write32(&self, offset: usize, value: u32) {
        match offset {
            SMMU_CR0 => {
                self.set32(SMMU_CR0, value);
                let mask = self.cr0_ack_mask.get();
                let ack = (value & mask) | (self.read32(SMMU_CR0ACK) & !mask);
                self.set32(SMMU_CR0ACK, ack);
                if value & CR0_SMMUEN != 0 {
                    if let Some(bits) = self.gerror_on_enable.get() {
                        self.set32(SMMU_GERROR, bits);
                    }
                }
            }
            SMMU_IRQ_CTRL => {
                self.set32(SMMU_IRQ_CTRL, value);
                let mask = self.irq_ack_mask.get();
                let ack = (value & mask) | (self.read32(SMMU_IRQ_CTRLACK) & !mask);
                self.set32(SMMU_IRQ_CTRLACK, ack);
            }
            SMMU_GBPA => {
                if self.gbpa_update_stuck.get() {
                    self.set32(offset, value);
                } else {
                    self.set32(offset, value & !GBPA_UPDATE);
                }
            }
            SMMU_CMDQ_PROD => {
                self.set32(SMMU_CMDQ_PROD, value);
                self.drain_command_queue(value);
            }
            _ => self.set32(offset, value),
        }
    }

    fn read64(&self, offset: usize) -> u64 {
        self.get(offset)
    }

    fn write64(&self, offset: usize, value: u64) {
        self.regs.borrow_mut().insert(offset, value);
        if offset == SMMU_CMDQ_BASE {
            // Learn where the queue lives, as the hardware would.
            let base = value & 0x000F_FFFF_FFFF_FFE0;
            let log2size = (value & 0x1F) as u32;
            self.cmdq.set(Some((base, log2size)));
        }
    }
}
