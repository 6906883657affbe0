//! M68k CPU - JIT block cache
//!
//! Straight-line runs of opcodes are recorded into blocks keyed by their
//! source address and replayed without going through instruction fetch.
//! Stores overlapping a block's source range drop the block before the
//! next instruction starts.

use std::collections::HashMap;

use anyhow::Result;
use log::*;

use crate::bus::{Address, Bus, IrqSource};
use crate::cpu_m68k::access::AccessPort;
use crate::cpu_m68k::cache::CPU020_MEM_CYCLE;
use crate::cpu_m68k::cpu::CpuM68k;
use crate::tickable::Ticks;
use crate::types::Word;

/// Maximum amount of instructions in a block
pub const JIT_MAX_BLOCK_LEN: usize = 64;

/// Recorded straight-line run of instructions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub start: Address,
    /// End of the instruction stream (exclusive), including extension words
    pub end: Address,
    pub ops: Vec<(Address, Word)>,
}

impl Block {
    fn new(start: Address) -> Self {
        Self {
            start,
            end: start,
            ops: Vec::with_capacity(8),
        }
    }

    fn overlaps(&self, addr: Address, len: usize) -> bool {
        let end = addr.wrapping_add(len as Address);
        addr < self.end && end > self.start
    }
}

#[derive(Debug, Default)]
enum Cursor {
    #[default]
    Idle,
    /// Replaying `blocks[start]`, next instruction at `idx`
    Replay { start: Address, idx: usize },
    Record(Block),
}

#[derive(Debug, Default)]
pub struct BlockCache {
    blocks: HashMap<Address, Block>,
    cursor: Cursor,
    /// Blocks entered from the cache
    pub hits: u64,
    /// Blocks recorded
    pub misses: u64,
    /// Blocks dropped by stores
    pub invalidations: u64,
    /// Translation switched off, instructions run through the interpreter
    pub disabled: bool,
}

impl BlockCache {
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, start: Address) -> Option<&Block> {
        self.blocks.get(&start)
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.cursor = Cursor::Idle;
    }

    fn close(&mut self) {
        if let Cursor::Record(b) = std::mem::take(&mut self.cursor) {
            if !b.ops.is_empty() {
                trace!(
                    "JIT block {:08X}-{:08X}, {} instructions",
                    b.start,
                    b.end,
                    b.ops.len()
                );
                self.blocks.insert(b.start, b);
            }
        }
    }

    /// Opcode at `pc` from a cached block, if any
    pub fn fetch(&mut self, pc: Address) -> Option<Word> {
        match self.cursor {
            Cursor::Replay { start, idx } => {
                if let Some(&(a, op)) = self.blocks.get(&start).and_then(|b| b.ops.get(idx)) {
                    if a == pc {
                        self.cursor = Cursor::Replay {
                            start,
                            idx: idx + 1,
                        };
                        return Some(op);
                    }
                }
                self.cursor = Cursor::Idle;
            }
            Cursor::Record(_) if self.blocks.contains_key(&pc) => self.close(),
            Cursor::Record(_) => return None,
            Cursor::Idle => (),
        }

        let op = self.blocks.get(&pc)?.ops.first()?.1;
        self.hits += 1;
        self.cursor = Cursor::Replay { start: pc, idx: 1 };
        Some(op)
    }

    /// Records an opcode fetched from memory at `pc`
    pub fn record(&mut self, pc: Address, opcode: Word) {
        if let Cursor::Record(b) = &self.cursor {
            if b.end != pc {
                self.close();
            }
        }
        if !matches!(self.cursor, Cursor::Record(_)) {
            self.misses += 1;
            self.cursor = Cursor::Record(Block::new(pc));
        }
        if let Cursor::Record(b) = &mut self.cursor {
            b.ops.push((pc, opcode));
            b.end = pc.wrapping_add(2);
        }
    }

    /// Finishes the current instruction
    pub fn complete(&mut self, next_pc: Address, fetch_end: Address, ends_block: bool) {
        match &mut self.cursor {
            Cursor::Replay { start, idx } => {
                let continues = self
                    .blocks
                    .get(start)
                    .and_then(|b| b.ops.get(*idx))
                    .is_some_and(|&(a, _)| a == next_pc);
                if ends_block || !continues {
                    self.cursor = Cursor::Idle;
                }
            }
            Cursor::Record(b) => {
                b.end = b.end.max(fetch_end);
                if ends_block || b.ops.len() >= JIT_MAX_BLOCK_LEN || next_pc != fetch_end {
                    self.close();
                }
            }
            Cursor::Idle => (),
        }
    }

    /// Drops blocks overlapping a store
    pub fn invalidate(&mut self, addr: Address, len: usize) -> bool {
        let before = self.blocks.len();
        self.blocks.retain(|_, b| !b.overlaps(addr, len));
        let dropped = before - self.blocks.len();
        self.invalidations += dropped as u64;

        let cursor_hit = match &self.cursor {
            Cursor::Replay { start, .. } => !self.blocks.contains_key(start),
            Cursor::Record(b) => b.overlaps(addr, len),
            Cursor::Idle => false,
        };
        if cursor_hit {
            self.cursor = Cursor::Idle;
        }
        dropped > 0 || cursor_hit
    }
}

impl<TBus> CpuM68k<TBus>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    /// JIT mode step: opcode from a cached block or fetched and recorded,
    /// then dispatched through the table.
    pub(in crate::cpu_m68k) fn jit_execute(&mut self) -> Result<(Ticks, bool)> {
        let pc = self.get_pc();
        let opcode = match self.jit.fetch(pc) {
            Some(op) => {
                // Same cost as the fetch it replaces
                self.advance_pc(2);
                self.defer_cycles(CPU020_MEM_CYCLE);
                op
            }
            None => {
                let op = self.next_iword()?;
                self.jit.record(pc, op);
                op
            }
        };

        self.regs.ir = opcode;
        let entry = self.table().entry(opcode);
        let ticks = (entry.handler)(self, opcode)?;

        let next_pc = self.get_pc();
        let fetch_end = self.fetch_end;
        self.jit.complete(next_pc, fetch_end, entry.ends_block);
        Ok((ticks, entry.ends_block))
    }
}
