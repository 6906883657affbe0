use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bus::{Address, Bus, IrqSource};
use crate::tickable::{Tickable, Ticks};
use crate::types::{LatchingEvent, Word};

use super::access::{AccessStrategy, select_strategy};
use super::cache::{InstructionCache, M68000_PIPELINE_DEPTH, CPU_PIPELINE_MAX, PrefetchPipeline};
use super::config::{CpuConfig, CpuModel, FidelityMode};
use super::dispatch::{OpcodeTable, TableKey};
use super::exception::{
    AccessFault, ExceptionFrame, PendingFault, VECTOR_ADDRESS_ERROR, VECTOR_BUS_ERROR,
    VECTOR_RESET_PC, VECTOR_RESET_SP,
};
use super::fpu::FpuState;
use super::jit::BlockCache;
use super::mmu::Mmu;
use super::regs::RegisterFile;
use super::snapshot::TraceRecord;
use super::spcflags::SpecialFlags;

/// Cycles spent per step while the processor is stopped or halted
pub const STOPPED_IDLE_CYCLES: Ticks = 4;

/// Upper bound of wait states on a single bus cycle before the access is
/// considered hung.
pub(in crate::cpu_m68k) const MAX_WAIT_STATES: Ticks = 1_000_000;

/// Access faults, raised by the access primitives and turned into
/// exceptions by the execution loop.
#[derive(Error, Debug, Clone, Copy)]
pub enum CpuError {
    /// Misaligned word/long access or odd instruction address
    #[error("Address error at {:08X}", .0.address)]
    AddressError(AccessFault),

    /// BERR asserted by the bus
    #[error("Bus error at {:08X}", .0.address)]
    BusError(AccessFault),

    /// Translation failed in the MMU
    #[error("MMU fault at {:08X}", .0.address)]
    MmuFault(AccessFault),
}

impl CpuError {
    pub fn fault(&self) -> &AccessFault {
        match self {
            Self::AddressError(f) | Self::BusError(f) | Self::MmuFault(f) => f,
        }
    }

    pub fn vector(&self) -> u8 {
        match self {
            Self::AddressError(_) => VECTOR_ADDRESS_ERROR,
            Self::BusError(_) | Self::MmuFault(_) => VECTOR_BUS_ERROR,
        }
    }
}

/// Run state of the processor
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display, strum::IntoStaticStr,
)]
pub enum ExecutionState {
    #[default]
    Running,
    /// Waiting for an interrupt after STOP
    Stopped,
    /// Double fault, only a reset continues
    Halted,
}

/// Representation of the program counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PcMode {
    /// Logical address only
    #[default]
    Indirect,
    /// Logical address plus host location of the instruction stream
    Direct,
}

/// Interrupt line change, sent from other threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptEvent {
    Assert(u8),
    Release(u8),
}

/// Handle for raising interrupts from another thread. Events are picked
/// up by the CPU between instructions.
#[derive(Debug, Clone)]
pub struct InterruptSender {
    tx: Sender<InterruptEvent>,
}

impl InterruptSender {
    fn send(&self, ev: InterruptEvent) -> Result<()> {
        match self.tx.try_send(ev) {
            Ok(()) => Ok(()),
            Err(TrySendError::Disconnected(_)) => anyhow::bail!("CPU has gone away"),
            Err(TrySendError::Full(_)) => anyhow::bail!("Interrupt queue full"),
        }
    }

    pub fn assert(&self, level: u8) -> Result<()> {
        self.send(InterruptEvent::Assert(level))
    }

    pub fn release(&self, level: u8) -> Result<()> {
        self.send(InterruptEvent::Release(level))
    }
}

/// Bus breakpoint types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusBreakpoint {
    Read,
    Write,
    ReadWrite,
}

/// Debugger breakpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Breakpoint {
    Execution(Address),
    Bus(BusBreakpoint, Address),
    /// Exception vector number
    Exception(u8),
}

/// Motorola 680x0
pub struct CpuM68k<TBus: Bus<Address, u8> + IrqSource> {
    /// External address/data bus
    pub bus: TBus,

    /// Register state
    pub regs: RegisterFile,

    /// Total cycle counter
    pub cycles: Ticks,

    /// Cycles spent on MMU/FPU initiated bus traffic
    pub coprocessor_cycles: Ticks,

    /// Set when a breakpoint or single step completes
    pub breakpoint_hit: LatchingEvent,

    pub(in crate::cpu_m68k) config: CpuConfig,
    pub(in crate::cpu_m68k) address_mask: Address,
    pub(in crate::cpu_m68k) access: Arc<dyn AccessStrategy>,
    pub(in crate::cpu_m68k) pc_mode: PcMode,
    /// Direct PC representation currently points into host memory
    pub(in crate::cpu_m68k) pc_mapped: bool,

    table: Arc<OpcodeTable<TBus>>,
    tables: HashMap<TableKey, Arc<OpcodeTable<TBus>>>,

    pub(in crate::cpu_m68k) state: ExecutionState,
    pub(in crate::cpu_m68k) spcflags: SpecialFlags,
    pub(in crate::cpu_m68k) deferred_cycles: Ticks,

    pub(in crate::cpu_m68k) prefetch: PrefetchPipeline,
    pub(in crate::cpu_m68k) icache: InstructionCache,
    pub(in crate::cpu_m68k) mmu: Mmu,
    pub(in crate::cpu_m68k) fpu: FpuState,
    pub(in crate::cpu_m68k) jit: BlockCache,

    /// Address register changes of the current instruction, undone when
    /// the instruction is restarted after a fault.
    pub(in crate::cpu_m68k) ea_fixups: arrayvec::ArrayVec<(usize, Address), 2>,
    /// Current access is part of a read-modify-write cycle
    pub(in crate::cpu_m68k) rmw: bool,
    /// End of the instruction stream fetched by the current instruction
    pub(in crate::cpu_m68k) fetch_end: Address,

    pub(in crate::cpu_m68k) pending_fault: Option<PendingFault>,
    pub(in crate::cpu_m68k) processing_fault: bool,
    /// Vector of the exception taken during the current step
    pub(in crate::cpu_m68k) last_exception: Option<u8>,
    /// Current instruction was rejected before it executed (illegal,
    /// privilege violation, unimplemented), so it is not traced
    pub(in crate::cpu_m68k) rejected: bool,

    irq_tx: Sender<InterruptEvent>,
    irq_rx: Receiver<InterruptEvent>,
    /// Asserted interrupt lines from the channel, bit n = level n
    pub(in crate::cpu_m68k) irq_lines: u8,
    /// Interrupt level sampled at the previous checkpoint
    pub(in crate::cpu_m68k) last_ipl: u8,

    pub(in crate::cpu_m68k) breakpoints: Vec<Breakpoint>,
    pub(in crate::cpu_m68k) forced: VecDeque<u8>,

    pub(in crate::cpu_m68k) tracer: Option<Vec<TraceRecord>>,
    pub(in crate::cpu_m68k) trace_current: Option<TraceRecord>,
}

impl<TBus> CpuM68k<TBus>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    pub fn new(bus: TBus, config: CpuConfig) -> Result<Self> {
        config.validate()?;

        let key = TableKey::from(&config);
        let table = Arc::new(OpcodeTable::build(key));
        let (irq_tx, irq_rx) = crossbeam_channel::bounded(64);

        let mut cpu = Self {
            bus,
            regs: RegisterFile::new(),
            cycles: 0,
            coprocessor_cycles: 0,
            breakpoint_hit: LatchingEvent::default(),
            address_mask: config.address_mask(),
            access: select_strategy(&config),
            pc_mode: PcMode::Indirect,
            pc_mapped: false,
            tables: HashMap::from([(key, Arc::clone(&table))]),
            table,
            state: ExecutionState::Running,
            spcflags: SpecialFlags::default(),
            deferred_cycles: 0,
            prefetch: PrefetchPipeline::new(CPU_PIPELINE_MAX),
            icache: InstructionCache::None,
            mmu: Mmu::default(),
            fpu: FpuState::default(),
            jit: BlockCache::default(),
            ea_fixups: arrayvec::ArrayVec::new(),
            rmw: false,
            fetch_end: 0,
            pending_fault: None,
            processing_fault: false,
            last_exception: None,
            rejected: false,
            irq_tx,
            irq_rx,
            irq_lines: 0,
            last_ipl: 0,
            breakpoints: vec![],
            forced: VecDeque::new(),
            tracer: None,
            trace_current: None,
            config,
        };
        cpu.wire();
        Ok(cpu)
    }

    /// Rewires strategy, caches and PC representation after a
    /// configuration change.
    fn wire(&mut self) {
        self.address_mask = self.config.address_mask();
        self.access = select_strategy(&self.config);
        self.pc_mode = self.access.pc_mode();
        self.prefetch = PrefetchPipeline::new(if self.config.model.is_020_or_later() {
            CPU_PIPELINE_MAX
        } else {
            M68000_PIPELINE_DEPTH
        });
        self.icache = InstructionCache::for_model(self.config.model);
        self.jit.clear();
        let pc = self.regs.get_pc();
        self.set_pc_normal(pc);
    }

    /// Switches model, mode, address width, FPU or MMU. Rebuilds (or
    /// reuses) the opcode table and selects the matching access strategy.
    pub fn reconfigure(&mut self, config: CpuConfig) -> Result<()> {
        config.validate()?;
        self.flush_deferred_cycles()?;

        let key = TableKey::from(&config);
        self.table = Arc::clone(
            self.tables
                .entry(key)
                .or_insert_with(|| Arc::new(OpcodeTable::build(key))),
        );
        info!(
            "CPU reconfigured: {} {} ({}-bit{}{}), strategy: {}",
            config.model,
            config.mode,
            if config.address_space_24 { 24 } else { 32 },
            config
                .fpu
                .map(|f| format!(", FPU {}", f))
                .unwrap_or_default(),
            if config.mmu { ", MMU" } else { "" },
            select_strategy(&config).name()
        );
        self.config = config;
        self.wire();
        Ok(())
    }

    pub fn config(&self) -> &CpuConfig {
        &self.config
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn pc_mode(&self) -> PcMode {
        self.pc_mode
    }

    pub fn strategy_name(&self) -> &'static str {
        self.access.name()
    }

    pub(in crate::cpu_m68k) fn table(&self) -> &OpcodeTable<TBus> {
        &self.table
    }

    /// Resets the CPU, loads reset vector and initial SP
    pub fn reset(&mut self) -> Result<()> {
        self.regs = RegisterFile::new();
        self.cycles = 0;
        self.coprocessor_cycles = 0;
        self.deferred_cycles = 0;
        self.state = ExecutionState::Running;
        self.spcflags = SpecialFlags::default();
        self.pending_fault = None;
        self.processing_fault = false;
        self.forced.clear();
        self.last_ipl = 0;
        self.mmu.reset();
        self.fpu = FpuState::default();
        self.icache.clear();
        self.jit.clear();

        self.regs.sr.set_supervisor(true);
        self.regs.sr.set_int_prio_mask(7);
        if self.config.model == CpuModel::M68060 {
            // Revision 1, pipelines enabled
            self.regs.pcr = 0x04300100;
        }

        let init_ssp = self.read_ticks(Address::from(VECTOR_RESET_SP) * 4)?;
        let init_pc = self.read_ticks(Address::from(VECTOR_RESET_PC) * 4)?;

        info!("Reset - SSP: {:08X}, PC: {:08X}", init_ssp, init_pc);
        self.regs.isp = init_ssp;
        self.set_pc(init_pc)?;
        self.prefetch_refill()?;
        self.flush_deferred_cycles()?;
        Ok(())
    }

    /// Composes the status register
    pub fn make_sr(&self) -> Word {
        self.regs.sr.sr()
    }

    /// Writes the status register, dropping bits the model does not have.
    /// Stack pointer selection follows S and M.
    pub fn set_sr(&mut self, sr: Word) {
        self.regs.sr.set_sr(sr & self.config.model.sr_mask());
    }

    /// Logical program counter
    pub fn get_pc(&self) -> Address {
        self.regs.get_pc()
    }

    /// Sets the program counter in the active representation and flushes
    /// the prefetch pipeline.
    pub fn set_pc(&mut self, pc: Address) -> Result<()> {
        self.set_pc_normal(pc);
        self.prefetch.restart(pc);
        Ok(())
    }

    /// Sets the PC in the active representation, without touching the
    /// prefetch pipeline.
    pub fn set_pc_normal(&mut self, pc: Address) {
        match self.pc_mode {
            PcMode::Indirect => self.set_pci(pc),
            PcMode::Direct => {
                let real = self.bus.real_address(pc & self.bus_mask());
                self.pc_mapped = real.is_some();
                match real {
                    Some(r) => self.regs.set_pc_direct(pc, r),
                    None => self.regs.set_pc_indirect(pc),
                }
            }
        }
    }

    /// Advances the PC in the active representation
    pub fn inc_pc_normal(&mut self, offset: Address) {
        match self.pc_mode {
            PcMode::Direct if self.pc_mapped => self.inc_pc(offset),
            _ => self.inc_pci(offset),
        }
    }

    /// Advances the direct representation
    pub fn inc_pc(&mut self, offset: Address) {
        debug_assert_eq!(self.pc_mode, PcMode::Direct);
        self.regs.inc_pc_direct(offset);
    }

    pub fn set_pci(&mut self, pc: Address) {
        self.pc_mapped = false;
        self.regs.set_pc_indirect(pc);
    }

    pub fn get_pci(&self) -> Address {
        self.regs.pc
    }

    pub fn inc_pci(&mut self, offset: Address) {
        self.regs.inc_pc_indirect(offset);
    }

    pub(in crate::cpu_m68k) fn bus_mask(&self) -> Address {
        self.address_mask & self.bus.get_mask()
    }

    /// Fills the instruction pipeline from the current PC
    pub fn prefetch_refill(&mut self) -> Result<()> {
        self.refill_pipeline()?;
        self.flush_deferred_cycles()
    }

    pub(in crate::cpu_m68k) fn refill_pipeline(&mut self) -> Result<()> {
        let access = Arc::clone(&self.access);
        access.refill(self)
    }

    /// Charges internal cycles through the active strategy
    pub(in crate::cpu_m68k) fn internal_cycles(&mut self, ticks: Ticks) -> Result<()> {
        if ticks == 0 {
            return Ok(());
        }
        let access = Arc::clone(&self.access);
        access.internal(self, ticks)
    }

    /// Advances by the given amount of cycles
    pub(in crate::cpu_m68k) fn advance_cycles(&mut self, ticks: Ticks) -> Result<()> {
        for _ in 0..ticks {
            self.cycles += 1;
            self.bus.tick(1)?;
        }
        Ok(())
    }

    /// Hands cycles accumulated by a non cycle-exact strategy to the bus
    pub(in crate::cpu_m68k) fn flush_deferred_cycles(&mut self) -> Result<()> {
        let ticks = std::mem::take(&mut self.deferred_cycles);
        self.advance_cycles(ticks)
    }

    /// Executes a single CPU step.
    pub fn step(&mut self) -> Result<()> {
        match self.state {
            ExecutionState::Halted => {
                if self.spcflags.reset() {
                    return self.checkpoint();
                }
                return self.advance_cycles(STOPPED_IDLE_CYCLES);
            }
            ExecutionState::Stopped => {
                self.advance_cycles(STOPPED_IDLE_CYCLES)?;
                return self.checkpoint();
            }
            ExecutionState::Running => (),
        }

        self.execute_instruction()?;
        self.flush_deferred_cycles()?;
        self.checkpoint()
    }

    /// Runs until at least `budget` cycles passed, the processor halted or
    /// a breakpoint was hit. Returns the cycles spent.
    pub fn run(&mut self, budget: Ticks) -> Result<Ticks> {
        let start = self.cycles;
        while self.cycles.wrapping_sub(start) < budget {
            self.step()?;
            if self.state == ExecutionState::Halted || self.breakpoint_hit.peek() {
                break;
            }
        }
        Ok(self.cycles - start)
    }

    fn execute_instruction(&mut self) -> Result<()> {
        self.last_exception = None;
        self.rejected = false;
        self.ea_fixups.clear();
        self.rmw = false;

        let start_pc = self.get_pc();
        self.regs.instruction_pc = start_pc;
        self.fetch_end = start_pc;
        let tracing = self.regs.sr.trace();
        let trace_flow = self.regs.sr.t0();

        if self
            .breakpoints
            .contains(&Breakpoint::Execution(start_pc))
        {
            info!("Breakpoint hit (execution): ${:08X}", start_pc);
            self.breakpoint_hit.set();
        }
        if self.tracer.is_some() {
            self.trace_current = Some(TraceRecord::new(self.cycles, start_pc, &self.regs));
        }

        let result = if self.config.mode == FidelityMode::Jit && !self.jit.disabled {
            self.jit_execute()
        } else {
            self.fetch_execute()
        };

        let ends_block = match result {
            Ok((ticks, ends_block)) => {
                self.internal_cycles(ticks)?;
                ends_block
            }
            Err(e) => match e.downcast_ref::<CpuError>() {
                Some(ce) => {
                    self.pending_fault = Some(PendingFault {
                        vector: ce.vector(),
                        fault: *ce.fault(),
                    });
                    self.spcflags.set_fault(true);
                    false
                }
                None => {
                    return Err(e).context(format!(
                        "PC: {:08X} opcode: {:04X}",
                        start_pc, self.regs.ir
                    ));
                }
            },
        };

        // Traps taken by the instruction are traced, faults are not
        if !self.rejected
            && self.pending_fault.is_none()
            && (tracing || (trace_flow && ends_block))
        {
            self.spcflags.set_dotrace(true);
        }
        if let (Some(tracer), Some(mut rec)) = (self.tracer.as_mut(), self.trace_current.take()) {
            rec.opcode = self.regs.ir;
            tracer.push(rec);
        }
        Ok(())
    }

    /// Interpreter: fetch through the active strategy, look up, execute.
    /// Returns the internal cycles and whether the instruction changes flow.
    fn fetch_execute(&mut self) -> Result<(Ticks, bool)> {
        let opcode = self.next_iword()?;
        self.regs.ir = opcode;
        let entry = self.table.entry(opcode);
        let ticks = (entry.handler)(self, opcode)?;
        Ok((ticks, entry.ends_block))
    }

    /// Samples the interrupt inputs: bus IPL and lines raised over the
    /// interrupt channel.
    fn sample_ipl(&mut self) -> u8 {
        for ev in self.irq_rx.try_iter() {
            match ev {
                InterruptEvent::Assert(l @ 1..=7) => self.irq_lines |= 1 << l,
                InterruptEvent::Release(l @ 1..=7) => self.irq_lines &= !(1 << l),
                ev => warn!("Ignoring invalid interrupt event {:?}", ev),
            }
        }
        let lines = self.irq_lines & 0xFE;
        let channel = if lines == 0 {
            0
        } else {
            7 - lines.leading_zeros() as u8
        };
        let bus = self.bus.get_irq().unwrap_or(0).min(7);
        channel.max(bus)
    }

    /// Handles a fault raised while delivering an exception
    fn delivered(&mut self, result: Result<()>) -> Result<()> {
        match result {
            Err(e) => match e.downcast_ref::<CpuError>() {
                Some(ce) => {
                    let pending = PendingFault {
                        vector: ce.vector(),
                        fault: *ce.fault(),
                    };
                    self.deliver_fault(pending)?;
                    self.flush_deferred_cycles()
                }
                None => Err(e),
            },
            Ok(()) => self.flush_deferred_cycles(),
        }
    }

    /// Samples the interrupt inputs and flags an interrupt above the mask.
    /// Level 7 is edge triggered. Returns the sampled level.
    fn poll_interrupts(&mut self) -> u8 {
        let level = self.sample_ipl();
        let nmi = level == 7 && self.last_ipl != 7;
        self.last_ipl = level;
        self.spcflags
            .set_int(level > 0 && (nmi || level > self.regs.sr.int_prio_mask()));
        level
    }

    /// Handles deferred work between instructions. Order: reset, access
    /// fault, trace, interrupt, debugger-forced exceptions.
    fn checkpoint(&mut self) -> Result<()> {
        let level = match self.state {
            ExecutionState::Halted => 0,
            _ => self.poll_interrupts(),
        };

        if self.spcflags.any() {
            if self.spcflags.reset() {
                self.spcflags.set_reset(false);
                return self.reset();
            }
            if self.state == ExecutionState::Halted {
                return Ok(());
            }

            if let Some(pending) = self.pending_fault.take() {
                self.spcflags.set_fault(false);
                self.spcflags.set_dotrace(false);
                let r = self.deliver_fault(pending);
                self.delivered(r)?;
                if self.state == ExecutionState::Halted {
                    return Ok(());
                }
            }

            if self.spcflags.dotrace() {
                self.spcflags.set_dotrace(false);
                let r = self.deliver_trace();
                self.delivered(r)?;
            }

            if self.spcflags.int() {
                self.spcflags.set_int(false);
                let r = self.deliver_interrupt(level);
                self.delivered(r)?;
            }

            if self.spcflags.forced() && self.state == ExecutionState::Running {
                if let Some(vector) = self.forced.pop_front() {
                    debug!("Forced exception vector {}", vector);
                    let pc = self.get_pc();
                    let r = self.raise_exception(vector, pc, ExceptionFrame::Normal);
                    self.delivered(r)?;
                }
                self.spcflags.set_forced(!self.forced.is_empty());
            }

            if self.spcflags.single_step() {
                self.spcflags.set_single_step(false);
                self.breakpoint_hit.set();
            }
            if self.spcflags.brk() {
                self.spcflags.set_brk(false);
                self.breakpoint_hit.set();
            }
        }

        if let Some(vector) = self.last_exception {
            if self.breakpoints.contains(&Breakpoint::Exception(vector)) {
                info!("Breakpoint hit (exception): vector {}", vector);
                self.breakpoint_hit.set();
            }
        }
        Ok(())
    }

    /// Requests a hard reset at the next checkpoint
    pub fn request_reset(&mut self) {
        self.spcflags.set_reset(true);
    }

    /// Stops after the next instruction
    pub fn request_single_step(&mut self) {
        self.spcflags.set_single_step(true);
    }

    /// Requests a break at the next checkpoint
    pub fn request_break(&mut self) {
        self.spcflags.set_brk(true);
    }

    pub fn set_breakpoint(&mut self, bp: Breakpoint) {
        if !self.breakpoints.contains(&bp) {
            self.breakpoints.push(bp);
        }
    }

    pub fn clear_breakpoint(&mut self, bp: Breakpoint) {
        self.breakpoints.retain(|b| *b != bp);
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// Queues an exception to be taken at the next checkpoint
    pub fn force_exception(&mut self, vector: u8) {
        self.forced.push_back(vector);
        self.spcflags.set_forced(true);
    }

    /// Handle to raise interrupts from other threads
    pub fn interrupt_sender(&self) -> InterruptSender {
        InterruptSender {
            tx: self.irq_tx.clone(),
        }
    }

    /// Asserts or releases an interrupt line directly
    pub fn set_irq_line(&mut self, level: u8, asserted: bool) {
        if !(1..=7).contains(&level) {
            warn!("Ignoring interrupt line {}", level);
            return;
        }
        if asserted {
            self.irq_lines |= 1 << level;
        } else {
            self.irq_lines &= !(1 << level);
        }
    }

    /// Enables or disables instruction tracing
    pub fn enable_trace(&mut self, enable: bool) {
        self.tracer = enable.then(Vec::new);
        self.trace_current = None;
    }

    /// Switches block translation off or back on. Blocks recorded so far
    /// are dropped either way.
    pub fn set_jit_enabled(&mut self, enabled: bool) {
        self.jit.clear();
        self.jit.disabled = !enabled;
    }

    /// Takes the trace records collected so far
    pub fn take_trace(&mut self) -> Vec<TraceRecord> {
        self.tracer.as_mut().map(std::mem::take).unwrap_or_default()
    }
}

impl<TBus> Tickable for CpuM68k<TBus>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    fn tick(&mut self, _ticks: Ticks) -> Result<Ticks> {
        self.step()?;
        Ok(1)
    }
}
