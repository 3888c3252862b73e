//! Device context and bring-up state machine
//!
//! [`SmmuDevice`] owns everything one SMMU instance needs: the register
//! accessor, the platform allocator, the stream table, the stage-2 page
//! tables, and both hardware queues. [`SmmuDevice::bring_up`] walks the
//! unit through a strict sequence of stages - no stage is skipped, every
//! hardware acknowledgement is polled with a bounded budget, and a failed
//! stage releases every allocated resource and leaves the unit disabled
//! and aborting rather than half-configured.
//!
//! The standalone register sequences (`disable_translation`,
//! `global_abort`, `set_global_bypass`) are exposed on their own so an
//! embedder can quiesce a unit it has not (or no longer has) a full
//! device context for.

use smmuv3_mmio::{full_barrier, RegisterIo};

use crate::cmd::{CommandEntry, FaultRecord};
use crate::config::SmmuConfig;
use crate::error::SmmuError;
use crate::page_table::PageTables;
use crate::queue::{sample_delay, CommandQueue, EventQueue, POLL_SAMPLES};
use crate::registers::{
    cr1_queue_attrs, decode_address_width, queue_base, strtab_base, strtab_base_cfg, Idr0, Idr1,
    Idr5, CR0_ALL_EN_MASK, CR0_ATSCHK, CR0_CMDQEN, CR0_EVENTQEN, CR0_QUEUE_EN_MASK, CR0_SMMUEN,
    CR0_VALID_MASK, CR1_VALID_MASK, CR2_PTM, CR2_RECINVSID, CR2_VALID_MASK, GBPA_ABORT,
    GBPA_UPDATE, GERROR_VALID_MASK, IRQ_CTRL_EN_MASK, IRQ_CTRL_EVENTQ_EN, IRQ_CTRL_GERROR_EN,
    RGN_CACHE_WRITEBACK, SH_INNER, SMMU_CMDQ_BASE, SMMU_CMDQ_CONS, SMMU_CMDQ_PROD, SMMU_CR0,
    SMMU_CR0ACK, SMMU_CR1, SMMU_CR2, SMMU_EVENTQ_BASE, SMMU_EVENTQ_CONS, SMMU_EVENTQ_PROD,
    SMMU_GBPA, SMMU_GERROR, SMMU_GERRORN, SMMU_IDR0, SMMU_IDR1, SMMU_IDR5, SMMU_IRQ_CTRL,
    SMMU_IRQ_CTRLACK, SMMU_STRTAB_BASE, SMMU_STRTAB_BASE_CFG,
};
use crate::ste::{StreamTable, StreamTableEntry};
use crate::traits::PageAllocator;

/// Software cap on command queue entries (2^8 = 256), applied on top of
/// the hardware-advertised capacity.
pub const COMMAND_QUEUE_LOG2_ENTRIES: u32 = 8;

/// Software cap on event queue entries (2^7 = 128).
pub const EVENT_QUEUE_LOG2_ENTRIES: u32 = 7;

/// Fault records drained per [`SmmuDevice::log_faults`] call.
const FAULT_DRAIN_LIMIT: usize = 64;

/// Bring-up progress. Transitions are strictly sequential; a failure at
/// any stage aborts the whole sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUpStage {
    /// Nothing touched yet; global error checkpoint.
    Reset,
    /// Translation, queues, and interrupts being turned off.
    Disabling,
    /// Stream table, page-table root, and queues allocated and
    /// initialised.
    ResourcesAllocated,
    /// Table and queue base registers programmed, indices zeroed.
    BaseProgrammed,
    /// Global-error and event-queue interrupt lines enabled.
    InterruptsEnabled,
    /// Command and event queues enabled and acknowledged.
    QueuesEnabled,
    /// Configuration and TLB invalidated, synchronised.
    Invalidated,
    /// SMMU translating; final global error checkpoint passed.
    TranslationEnabled,
}

fn stage(which: BringUpStage) {
    log::debug!("bring-up stage: {:?}", which);
}

/// Poll `offset` until `(value & mask) == expected`.
///
/// Budget: [`POLL_SAMPLES`] reads at fixed ~100 us intervals, about 1 ms
/// in total. Exhausting it is a [`SmmuError::Timeout`].
pub fn poll_register<R: RegisterIo>(
    regs: &R,
    offset: usize,
    mask: u32,
    expected: u32,
) -> Result<(), SmmuError> {
    let mut value = 0;
    for _ in 0..POLL_SAMPLES {
        value = regs.read32(offset);
        if value & mask == expected {
            return Ok(());
        }
        sample_delay();
    }
    log::error!(
        "timeout polling register {:#x}: read {:#x}, wanted {:#x} under mask {:#x}",
        offset,
        value,
        expected,
        mask
    );
    Err(SmmuError::Timeout)
}

/// Fail with [`SmmuError::HardwareFault`] if any global error is pending.
fn check_global_errors<R: RegisterIo>(regs: &R) -> Result<(), SmmuError> {
    let gerror = regs.read32(SMMU_GERROR) & GERROR_VALID_MASK;
    if gerror != 0 {
        log::error!("global error register non-zero: {:#x}", gerror);
        return Err(SmmuError::HardwareFault);
    }
    Ok(())
}

/// Clear every enable bit in CR0 and wait for the acknowledgement.
pub fn disable_translation<R: RegisterIo>(regs: &R) -> Result<(), SmmuError> {
    let cr0 = regs.read32(SMMU_CR0);
    if cr0 & CR0_ALL_EN_MASK != 0 {
        regs.write32(SMMU_CR0, cr0 & !CR0_ALL_EN_MASK);
        poll_register(regs, SMMU_CR0ACK, CR0_ALL_EN_MASK, 0)?;
    }
    Ok(())
}

/// Mask all interrupt sources and optionally acknowledge stale errors.
fn disable_interrupts<R: RegisterIo>(regs: &R, clear_stale: bool) -> Result<(), SmmuError> {
    let irq = regs.read32(SMMU_IRQ_CTRL);
    if irq & IRQ_CTRL_EN_MASK != 0 {
        regs.write32(SMMU_IRQ_CTRL, irq & !IRQ_CTRL_EN_MASK);
        poll_register(regs, SMMU_IRQ_CTRLACK, IRQ_CTRL_EN_MASK, 0)?;
    }

    if clear_stale {
        let stale = regs.read32(SMMU_GERROR) & GERROR_VALID_MASK;
        if stale != 0 {
            // Toggling the bits in GERRORN acknowledges them.
            regs.write32(SMMU_GERRORN, stale);
        }
    }

    Ok(())
}

/// Enable the global-error and event-queue interrupt lines.
fn enable_interrupts<R: RegisterIo>(regs: &R) -> Result<(), SmmuError> {
    let enables = IRQ_CTRL_GERROR_EN | IRQ_CTRL_EVENTQ_EN;
    let irq = regs.read32(SMMU_IRQ_CTRL) & !IRQ_CTRL_EN_MASK;
    regs.write32(SMMU_IRQ_CTRL, irq | enables);
    poll_register(regs, SMMU_IRQ_CTRLACK, enables, enables)
}

/// Force the unit to abort all incoming transactions while translation
/// is disabled.
pub fn global_abort<R: RegisterIo>(regs: &R) -> Result<(), SmmuError> {
    // A previous attribute update must have completed (UPDATE reads 0).
    poll_register(regs, SMMU_GBPA, GBPA_UPDATE, 0)?;

    let gbpa = regs.read32(SMMU_GBPA);
    regs.write32(SMMU_GBPA, gbpa | GBPA_ABORT | GBPA_UPDATE);

    // The new attributes have taken effect once UPDATE self-clears.
    poll_register(regs, SMMU_GBPA, GBPA_UPDATE, 0)?;
    poll_register(regs, SMMU_GBPA, GBPA_ABORT, GBPA_ABORT)
}

/// Let transactions bypass the unit while translation is disabled, for
/// handing live DMA to a successor environment.
pub fn set_global_bypass<R: RegisterIo>(regs: &R) -> Result<(), SmmuError> {
    poll_register(regs, SMMU_GBPA, GBPA_UPDATE, 0)?;

    let gbpa = regs.read32(SMMU_GBPA) & !GBPA_ABORT;
    regs.write32(SMMU_GBPA, gbpa | GBPA_UPDATE);

    poll_register(regs, SMMU_GBPA, GBPA_UPDATE, 0)
}

/// One SMMU instance in the translating state.
///
/// Created by [`bring_up`](Self::bring_up), destroyed by
/// [`teardown`](Self::teardown). The context is explicitly owned and
/// passed by reference; there is no process-global instance.
pub struct SmmuDevice<R: RegisterIo, A: PageAllocator> {
    pub(crate) regs: R,
    pub(crate) alloc: A,
    pub(crate) stream_table: StreamTable,
    pub(crate) page_tables: PageTables,
    pub(crate) cmdq: CommandQueue,
    pub(crate) evtq: EventQueue,
}

impl<R: RegisterIo, A: PageAllocator> SmmuDevice<R, A> {
    /// Sequence the unit from reset/abort into the translating state.
    ///
    /// On failure every resource allocated along the way is released and
    /// the unit is, best effort, left disabled with global abort set.
    pub fn bring_up(regs: R, mut alloc: A, config: &SmmuConfig) -> Result<Self, SmmuError> {
        config.validate()?;

        stage(BringUpStage::Reset);
        check_global_errors(&regs)?;

        stage(BringUpStage::Disabling);
        disable_translation(&regs)?;
        disable_interrupts(&regs, true)?;

        let idr0 = Idr0(regs.read32(SMMU_IDR0));
        let idr1 = Idr1(regs.read32(SMMU_IDR1));
        let idr5 = Idr5(regs.read32(SMMU_IDR5));
        log::info!(
            "capabilities: IDR0={:#010x} IDR1={:#010x} IDR5={:#010x} \
             aarch64={} s2={} cohacc={} gran4k={} OAS={} bits",
            idr0.0,
            idr1.0,
            idr5.0,
            idr0.aarch64_tables(),
            idr0.stage2_supported(),
            idr0.coherent_access(),
            idr5.gran4k(),
            decode_address_width(idr5.output_address_size())
        );

        stage(BringUpStage::ResourcesAllocated);
        let st_log2 = config.stream_table_log2size();
        let st_pages = StreamTable::pages_for(st_log2);
        let Some(st_base) = alloc.allocate_pages(st_pages) else {
            return Err(SmmuError::OutOfResources);
        };
        // SAFETY: Freshly allocated, zeroed pages covering the table.
        let stream_table = unsafe { StreamTable::new(st_base, st_log2) };

        let page_tables = match PageTables::new(&mut alloc) {
            Ok(tables) => tables,
            Err(e) => {
                alloc.free_pages(st_base, st_pages);
                return Err(e);
            }
        };

        let cmdq_log2 = idr1.command_queue_log2().min(COMMAND_QUEUE_LOG2_ENTRIES);
        let cmdq_pages = CommandQueue::pages_for(cmdq_log2);
        let Some(cmdq_base) = alloc.allocate_pages(cmdq_pages) else {
            page_tables.release(&mut alloc);
            alloc.free_pages(st_base, st_pages);
            return Err(SmmuError::OutOfResources);
        };
        // SAFETY: Freshly allocated, zeroed pages covering the ring.
        let cmdq = unsafe { CommandQueue::new(cmdq_base, cmdq_log2) };

        let evtq_log2 = idr1.event_queue_log2().min(EVENT_QUEUE_LOG2_ENTRIES);
        let evtq_pages = EventQueue::pages_for(evtq_log2);
        let Some(evtq_base) = alloc.allocate_pages(evtq_pages) else {
            alloc.free_pages(cmdq_base, cmdq_pages);
            page_tables.release(&mut alloc);
            alloc.free_pages(st_base, st_pages);
            return Err(SmmuError::OutOfResources);
        };
        // SAFETY: Freshly allocated, zeroed pages covering the ring.
        let evtq = unsafe { EventQueue::new(evtq_base, evtq_log2) };

        let template =
            StreamTableEntry::stage2_template(config, idr0, idr1, idr5, page_tables.root());
        stream_table.fill(&template);

        match Self::program_and_enable(&regs, config, idr0, &stream_table, &cmdq, &evtq) {
            Ok(()) => {
                log::info!(
                    "translation enabled: {} streams, cmdq {} entries, evtq {} entries",
                    stream_table.entries(),
                    1u32 << cmdq.log2size(),
                    1u32 << evtq.log2size()
                );
                Ok(Self {
                    regs,
                    alloc,
                    stream_table,
                    page_tables,
                    cmdq,
                    evtq,
                })
            }
            Err(e) => {
                // Best effort: the unit must not keep translating through
                // tables that are about to be freed.
                let _ = disable_translation(&regs);
                let _ = global_abort(&regs);
                Self::release_owned(&mut alloc, stream_table, page_tables, cmdq, evtq);
                Err(e)
            }
        }
    }

    /// Stages `BaseProgrammed` through `TranslationEnabled`.
    fn program_and_enable(
        regs: &R,
        config: &SmmuConfig,
        idr0: Idr0,
        stream_table: &StreamTable,
        cmdq: &CommandQueue,
        evtq: &EventQueue,
    ) -> Result<(), SmmuError> {
        let allocate_hint = config.coherent_access;

        stage(BringUpStage::BaseProgrammed);
        regs.write32(SMMU_STRTAB_BASE_CFG, strtab_base_cfg(stream_table.log2size()));
        regs.write64(
            SMMU_STRTAB_BASE,
            strtab_base(stream_table.base(), allocate_hint),
        );

        regs.write64(
            SMMU_CMDQ_BASE,
            queue_base(cmdq.base(), cmdq.log2size(), allocate_hint),
        );
        regs.write32(SMMU_CMDQ_PROD, 0);
        regs.write32(SMMU_CMDQ_CONS, 0);

        regs.write64(
            SMMU_EVENTQ_BASE,
            queue_base(evtq.base(), evtq.log2size(), allocate_hint),
        );
        regs.write32(SMMU_EVENTQ_PROD, 0);
        regs.write32(SMMU_EVENTQ_CONS, 0);

        stage(BringUpStage::InterruptsEnabled);
        enable_interrupts(regs)?;

        stage(BringUpStage::QueuesEnabled);
        let mut cr1 = regs.read32(SMMU_CR1) & !CR1_VALID_MASK;
        if config.coherent_access {
            cr1 |= cr1_queue_attrs(RGN_CACHE_WRITEBACK, RGN_CACHE_WRITEBACK, SH_INNER);
        }
        regs.write32(SMMU_CR1, cr1);

        let mut cr2 = regs.read32(SMMU_CR2) & !CR2_VALID_MASK;
        // Record C_BAD_STREAMID for out-of-range input streams
        cr2 |= CR2_RECINVSID;
        // PTM is only valid when broadcast TLB maintenance is supported
        if idr0.broadcast_tlb_maintenance() {
            cr2 |= CR2_PTM;
        }
        regs.write32(SMMU_CR2, cr2);

        full_barrier();
        let cr0 = regs.read32(SMMU_CR0) | CR0_CMDQEN | CR0_EVENTQEN;
        regs.write32(SMMU_CR0, cr0);
        poll_register(regs, SMMU_CR0ACK, CR0_QUEUE_EN_MASK, CR0_QUEUE_EN_MASK)?;

        stage(BringUpStage::Invalidated);
        cmdq.send(regs, &CommandEntry::cfgi_all())?;
        cmdq.send(regs, &CommandEntry::tlbi_nsnh_all())?;
        cmdq.send(regs, &CommandEntry::tlbi_el2_all())?;
        // The sync guarantees the invalidations above have completed
        // before translation is trusted.
        cmdq.send(regs, &CommandEntry::sync_no_interrupt())?;

        stage(BringUpStage::TranslationEnabled);
        let cr0 = regs.read32(SMMU_CR0);
        full_barrier();
        // Clearing the valid fields drops PRIQEN and VMID wildcard
        // matching; the queue enables are re-asserted alongside SMMUEN.
        let mut cr0 = (cr0 & !CR0_VALID_MASK) | CR0_SMMUEN | CR0_EVENTQEN | CR0_CMDQEN;
        if idr0.ats_supported() {
            // No bypass for ATS translated traffic
            cr0 |= CR0_ATSCHK;
        }
        regs.write32(SMMU_CR0, cr0);
        poll_register(regs, SMMU_CR0ACK, CR0_SMMUEN, CR0_SMMUEN)?;

        full_barrier();
        check_global_errors(regs)
    }

    fn release_owned(
        alloc: &mut A,
        stream_table: StreamTable,
        page_tables: PageTables,
        cmdq: CommandQueue,
        evtq: EventQueue,
    ) {
        page_tables.release(alloc);
        alloc.free_pages(cmdq.base(), CommandQueue::pages_for(cmdq.log2size()));
        alloc.free_pages(evtq.base(), EventQueue::pages_for(evtq.log2size()));
        alloc.free_pages(stream_table.base(), stream_table.pages());
    }

    /// Disable translation, force global abort, and release every owned
    /// resource. Quiesce failures are logged, not propagated: the memory
    /// is released regardless.
    pub fn teardown(self) -> A {
        let Self {
            regs,
            mut alloc,
            stream_table,
            page_tables,
            cmdq,
            evtq,
        } = self;

        if let Err(e) = disable_translation(&regs) {
            log::error!("teardown: failed to disable translation: {}", e);
        }
        if let Err(e) = global_abort(&regs) {
            log::error!("teardown: failed to force global abort: {}", e);
        }

        Self::release_owned(&mut alloc, stream_table, page_tables, cmdq, evtq);
        alloc
    }

    /// The stream table, for embedders that publish its location.
    #[inline]
    #[must_use]
    pub fn stream_table(&self) -> &StreamTable {
        &self.stream_table
    }

    /// Physical address of the stage-2 page-table root.
    #[inline]
    #[must_use]
    pub fn page_table_root(&self) -> u64 {
        self.page_tables.root()
    }

    /// The register accessor.
    #[inline]
    #[must_use]
    pub fn registers(&self) -> &R {
        &self.regs
    }

    /// Switch the unit to global bypass (translation stays disabled by
    /// the caller first; see [`disable_translation`]).
    pub fn set_global_bypass(&self) -> Result<(), SmmuError> {
        set_global_bypass(&self.regs)
    }

    pub(crate) fn send_command(&self, command: &CommandEntry) -> Result<(), SmmuError> {
        self.cmdq.send(&self.regs, command)
    }

    /// Take one pending fault record off the event queue.
    pub fn drain_fault(&self) -> Option<FaultRecord> {
        self.evtq.pop(&self.regs)
    }

    /// Drain and log pending fault records (bounded per call), then log
    /// any pending global errors. Returns the number of records drained.
    pub fn log_faults(&self) -> usize {
        let mut drained = 0;
        while drained < FAULT_DRAIN_LIMIT {
            let Some(record) = self.drain_fault() else {
                break;
            };
            drained += 1;

            if record.is_translation_fault() {
                log::error!(
                    "translation fault: stream={:#x} type={:#x} addr={:#x}",
                    record.stream_id(),
                    record.event_type(),
                    record.address()
                );
            } else if record.is_permission_fault() {
                log::error!(
                    "permission fault: stream={:#x} type={:#x} addr={:#x}",
                    record.stream_id(),
                    record.event_type(),
                    record.address()
                );
            } else {
                log::warn!(
                    "event: type={:#x} stream={:#x}",
                    record.event_type(),
                    record.stream_id()
                );
            }
        }

        let gerror = self.regs.read32(SMMU_GERROR) & GERROR_VALID_MASK;
        if gerror != 0 {
            log::error!("global errors pending: {:#x}", gerror);
        }

        drained
    }
}
