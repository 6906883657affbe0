//! M68k CPU - save states and execution traces

use std::collections::VecDeque;

use anyhow::Result;
use arrayvec::ArrayVec;
use log::*;
use serde::{Deserialize, Serialize};

use crate::bus::{Address, Bus, IrqSource};
use crate::tickable::Ticks;
use crate::types::{Long, Word};

use super::access::AccessSize;
use super::cache::{InstructionCache, PrefetchPipeline};
use super::config::CpuConfig;
use super::cpu::{CpuM68k, ExecutionState};
use super::exception::PendingFault;
use super::fpu::FpuState;
use super::mmu::Mmu;
use super::regs::RegisterFile;
use super::spcflags::SpecialFlags;

/// Maximum bus accesses kept per traced instruction
pub const TRACE_MAX_ACCESSES: usize = 128;

/// Complete processor state. Restoring it reproduces the same execution,
/// given the same bus contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub config: CpuConfig,
    pub regs: RegisterFile,
    pub cycles: Ticks,
    pub coprocessor_cycles: Ticks,
    pub state: ExecutionState,
    pub spcflags: SpecialFlags,
    pub deferred_cycles: Ticks,
    pub prefetch: PrefetchPipeline,
    pub icache: InstructionCache,
    pub mmu: Mmu,
    pub fpu: FpuState,
    pub jit_disabled: bool,
    pub pending_fault: Option<PendingFault>,
    pub processing_fault: bool,
    pub irq_lines: u8,
    pub last_ipl: u8,
    pub forced: VecDeque<u8>,
}

/// Bus access performed by a traced instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceAccess {
    pub address: Address,
    pub value: Long,
    pub size: AccessSize,
    pub write: bool,
}

/// One executed instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Cycle counter at the start of the instruction
    pub cycles: Ticks,
    pub pc: Address,
    pub opcode: Word,
    /// Registers before execution
    pub regs: RegisterFile,
    pub accesses: ArrayVec<TraceAccess, TRACE_MAX_ACCESSES>,
}

impl TraceRecord {
    pub fn new(cycles: Ticks, pc: Address, regs: &RegisterFile) -> Self {
        Self {
            cycles,
            pc,
            opcode: 0,
            regs: regs.clone(),
            accesses: ArrayVec::new(),
        }
    }
}

impl<TBus> CpuM68k<TBus>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    /// Captures the processor state
    pub fn snapshot(&self) -> CpuSnapshot {
        CpuSnapshot {
            config: self.config,
            regs: self.regs.clone(),
            cycles: self.cycles,
            coprocessor_cycles: self.coprocessor_cycles,
            state: self.state,
            spcflags: self.spcflags,
            deferred_cycles: self.deferred_cycles,
            prefetch: self.prefetch.clone(),
            icache: self.icache.clone(),
            mmu: self.mmu.clone(),
            fpu: self.fpu.clone(),
            jit_disabled: self.jit.disabled,
            pending_fault: self.pending_fault,
            processing_fault: self.processing_fault,
            irq_lines: self.irq_lines,
            last_ipl: self.last_ipl,
            forced: self.forced.clone(),
        }
    }

    /// Restores a state captured by `snapshot`. The JIT block cache is
    /// dropped and the PC representation is derived again.
    pub fn restore(&mut self, snapshot: CpuSnapshot) -> Result<()> {
        if snapshot.config != self.config {
            self.reconfigure(snapshot.config)?;
        }
        self.regs = snapshot.regs;
        self.cycles = snapshot.cycles;
        self.coprocessor_cycles = snapshot.coprocessor_cycles;
        self.state = snapshot.state;
        self.spcflags = snapshot.spcflags;
        self.deferred_cycles = snapshot.deferred_cycles;
        self.prefetch = snapshot.prefetch;
        self.icache = snapshot.icache;
        self.mmu = snapshot.mmu;
        self.fpu = snapshot.fpu;
        self.pending_fault = snapshot.pending_fault;
        self.processing_fault = snapshot.processing_fault;
        self.irq_lines = snapshot.irq_lines;
        self.last_ipl = snapshot.last_ipl;
        self.forced = snapshot.forced;

        self.set_jit_enabled(!snapshot.jit_disabled);
        self.ea_fixups.clear();
        self.trace_current = None;

        // Host pointers of the saved direct PC are meaningless here
        let pc = self.regs.get_pc();
        self.set_pc_normal(pc);
        debug!("CPU state restored, PC {:08X}, cycle {}", pc, self.cycles);
        Ok(())
    }

    /// Serializes the processor state
    #[cfg(feature = "savestates")]
    pub fn save_state(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(&self.snapshot())?)
    }

    /// Loads a state produced by `save_state`
    #[cfg(feature = "savestates")]
    pub fn load_state(&mut self, data: &[u8]) -> Result<()> {
        let snapshot: CpuSnapshot = postcard::from_bytes(data)?;
        self.restore(snapshot)
    }
}
