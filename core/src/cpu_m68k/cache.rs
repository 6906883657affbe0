//! Instruction cache and prefetch pipeline emulation.

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use crate::bus::Address;
use crate::cpu_m68k::config::CpuModel;
use crate::tickable::Ticks;
use crate::types::{Long, Word};

/// Maximum depth of the instruction prefetch pipeline, in words
pub const CPU_PIPELINE_MAX: usize = 4;

/// 68000/68010 prefetch depth (IRC + IRD)
pub const M68000_PIPELINE_DEPTH: usize = 2;

/// Cycles of one 68000/68010 bus cycle
pub const CPU000_MEM_CYCLE: Ticks = 4;

/// Cycles of one 68020/68030 bus cycle
pub const CPU020_MEM_CYCLE: Ticks = 3;

/// Cycles of one 68040/68060 bus cycle as seen by the integer unit
pub const CPU040_MEM_CYCLE: Ticks = 2;

/// Cycles of one wait state (DTACK not asserted)
pub const WAIT_STATE_CYCLES: Ticks = 2;

/// Instruction cache hit
pub const CACHE_HIT_CYCLES: Ticks = 1;

/// Instruction cache miss, on top of the bus cycle of the fill
pub const CACHE_MISS_CYCLES: Ticks = 1;

/// Lines in the 68020 instruction cache, one longword each
pub const CACHELINES020: usize = 64;

/// Lines in the 68030 instruction cache, four longwords each
pub const CACHELINES030: usize = 16;

// CACR bits shared by the 68020 and 68030 instruction cache
pub const CACR_ENABLE: Long = 1 << 0;
pub const CACR_FREEZE: Long = 1 << 1;
pub const CACR_CLEAR_ENTRY: Long = 1 << 2;
pub const CACR_CLEAR: Long = 1 << 3;

/// 68040/68060 CACR instruction cache enable
pub const CACR_040_IE: Long = 1 << 15;

/// Sets in the 68040/68060 instruction cache
pub const CACHESETS040: usize = 64;

/// Ways per set
pub const CACHEWAYS040: usize = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cache020Line {
    pub tag: Long,
    pub data: Long,
    pub valid: bool,
}

/// 68020 instruction cache: 64 direct mapped longwords
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cache020 {
    #[serde(with = "BigArray")]
    pub lines: [Cache020Line; CACHELINES020],
}

impl Cache020 {
    pub fn new() -> Self {
        Self {
            lines: [Cache020Line::default(); CACHELINES020],
        }
    }

    pub const fn index(addr: Address) -> usize {
        ((addr >> 2) as usize) & (CACHELINES020 - 1)
    }

    pub const fn tag(addr: Address, supervisor: bool) -> Long {
        (addr & !(((CACHELINES020 as Long) << 2) - 1)) | supervisor as Long
    }

    pub fn lookup(&self, addr: Address, supervisor: bool) -> Option<Long> {
        let line = &self.lines[Self::index(addr)];
        (line.valid && line.tag == Self::tag(addr, supervisor)).then_some(line.data)
    }

    pub fn fill(&mut self, addr: Address, supervisor: bool, data: Long) {
        self.lines[Self::index(addr)] = Cache020Line {
            tag: Self::tag(addr, supervisor),
            data,
            valid: true,
        };
    }

    /// Invalidates the line the address maps to, regardless of its tag
    pub fn invalidate(&mut self, addr: Address) -> bool {
        let line = &mut self.lines[Self::index(addr)];
        std::mem::replace(&mut line.valid, false)
    }

    pub fn clear(&mut self) {
        self.lines.iter_mut().for_each(|l| l.valid = false);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cache030Line {
    pub tag: Long,
    pub data: [Long; 4],
    pub valid: [bool; 4],
}

/// 68030 instruction cache: 16 lines of 4 longwords, one tag per line
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cache030 {
    pub lines: [Cache030Line; CACHELINES030],
}

impl Cache030 {
    pub fn new() -> Self {
        Self {
            lines: [Cache030Line::default(); CACHELINES030],
        }
    }

    pub const fn index(addr: Address) -> usize {
        ((addr >> 4) as usize) & (CACHELINES030 - 1)
    }

    pub const fn long_index(addr: Address) -> usize {
        ((addr >> 2) & 3) as usize
    }

    pub const fn tag(addr: Address, supervisor: bool) -> Long {
        (addr & !(((CACHELINES030 as Long) << 4) - 1)) | supervisor as Long
    }

    pub fn lookup(&self, addr: Address, supervisor: bool) -> Option<Long> {
        let line = &self.lines[Self::index(addr)];
        let lws = Self::long_index(addr);
        (line.valid[lws] && line.tag == Self::tag(addr, supervisor)).then_some(line.data[lws])
    }

    pub fn fill(&mut self, addr: Address, supervisor: bool, data: Long) {
        let tag = Self::tag(addr, supervisor);
        let line = &mut self.lines[Self::index(addr)];
        if line.tag != tag {
            line.valid = [false; 4];
            line.tag = tag;
        }
        let lws = Self::long_index(addr);
        line.data[lws] = data;
        line.valid[lws] = true;
    }

    /// Invalidates the whole line the address maps to, regardless of its tag
    pub fn invalidate(&mut self, addr: Address) -> bool {
        let line = &mut self.lines[Self::index(addr)];
        let was_valid = line.valid.iter().any(|&v| v);
        line.valid = [false; 4];
        was_valid
    }

    pub fn clear(&mut self) {
        self.lines.iter_mut().for_each(|l| l.valid = [false; 4]);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cache040Line {
    pub tag: Long,
    pub data: [Long; 4],
    pub valid: [bool; 4],
}

impl Cache040Line {
    fn any_valid(&self) -> bool {
        self.valid.iter().any(|&v| v)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cache040Set {
    pub ways: [Cache040Line; CACHEWAYS040],
    /// Next way to replace when all are in use
    pub victim: u8,
}

/// 68040/68060 instruction cache: 64 sets of four 16-byte lines,
/// physically tagged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cache040 {
    #[serde(with = "BigArray")]
    pub sets: [Cache040Set; CACHESETS040],
}

impl Cache040 {
    pub fn new() -> Self {
        Self {
            sets: [Cache040Set::default(); CACHESETS040],
        }
    }

    pub const fn index(addr: Address) -> usize {
        ((addr >> 4) as usize) & (CACHESETS040 - 1)
    }

    pub const fn long_index(addr: Address) -> usize {
        ((addr >> 2) & 3) as usize
    }

    pub const fn tag(addr: Address) -> Long {
        addr & !(((CACHESETS040 as Long) << 4) - 1)
    }

    fn way(&self, addr: Address) -> Option<usize> {
        let tag = Self::tag(addr);
        self.sets[Self::index(addr)]
            .ways
            .iter()
            .position(|l| l.any_valid() && l.tag == tag)
    }

    pub fn lookup(&self, addr: Address) -> Option<Long> {
        let way = self.way(addr)?;
        let line = &self.sets[Self::index(addr)].ways[way];
        let lws = Self::long_index(addr);
        line.valid[lws].then_some(line.data[lws])
    }

    pub fn fill(&mut self, addr: Address, data: Long) {
        let way = match self.way(addr) {
            Some(w) => w,
            None => {
                let set = &mut self.sets[Self::index(addr)];
                let w = match set.ways.iter().position(|l| !l.any_valid()) {
                    Some(w) => w,
                    None => {
                        let w = usize::from(set.victim);
                        set.victim = ((w + 1) % CACHEWAYS040) as u8;
                        w
                    }
                };
                set.ways[w] = Cache040Line {
                    tag: Self::tag(addr),
                    ..Default::default()
                };
                w
            }
        };
        let line = &mut self.sets[Self::index(addr)].ways[way];
        let lws = Self::long_index(addr);
        line.data[lws] = data;
        line.valid[lws] = true;
    }

    /// Invalidates the line holding the address, if cached
    pub fn invalidate(&mut self, addr: Address) -> bool {
        match self.way(addr) {
            Some(w) => {
                self.sets[Self::index(addr)].ways[w].valid = [false; 4];
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.sets
            .iter_mut()
            .flat_map(|s| s.ways.iter_mut())
            .for_each(|l| l.valid = [false; 4]);
    }

    pub fn valid_longs(&self) -> usize {
        self.sets
            .iter()
            .flat_map(|s| s.ways.iter())
            .flat_map(|l| l.valid)
            .filter(|&v| v)
            .count()
    }
}

/// Emulated on-chip instruction cache of the configured model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstructionCache {
    None,
    M68020(Box<Cache020>),
    M68030(Box<Cache030>),
    M68040(Box<Cache040>),
}

impl InstructionCache {
    /// Instruction cache emulated for a model
    pub fn for_model(model: CpuModel) -> Self {
        match model {
            CpuModel::M68000 | CpuModel::M68010 => Self::None,
            CpuModel::M68020 => Self::M68020(Box::new(Cache020::new())),
            CpuModel::M68030 => Self::M68030(Box::new(Cache030::new())),
            CpuModel::M68040 | CpuModel::M68060 => Self::M68040(Box::new(Cache040::new())),
        }
    }

    pub fn lookup(&self, addr: Address, supervisor: bool) -> Option<Long> {
        match self {
            Self::None => None,
            Self::M68020(c) => c.lookup(addr, supervisor),
            Self::M68030(c) => c.lookup(addr, supervisor),
            Self::M68040(c) => c.lookup(addr),
        }
    }

    pub fn fill(&mut self, addr: Address, supervisor: bool, data: Long) {
        match self {
            Self::None => (),
            Self::M68020(c) => c.fill(addr, supervisor, data),
            Self::M68030(c) => c.fill(addr, supervisor, data),
            Self::M68040(c) => c.fill(addr, data),
        }
    }

    /// Invalidates every line a store of `len` bytes at `addr` touches.
    /// Returns true if a valid line was dropped.
    pub fn invalidate(&mut self, addr: Address, len: usize) -> bool {
        let first = addr & !3;
        let last = addr.wrapping_add(len as Address - 1) & !3;
        let mut dropped = false;
        let mut a = first;
        loop {
            dropped |= match self {
                Self::None => false,
                Self::M68020(c) => c.invalidate(a),
                Self::M68030(c) => c.invalidate(a),
                Self::M68040(c) => c.invalidate(a),
            };
            if a == last {
                break;
            }
            a = a.wrapping_add(4);
        }
        dropped
    }

    pub fn clear(&mut self) {
        match self {
            Self::None => (),
            Self::M68020(c) => c.clear(),
            Self::M68030(c) => c.clear(),
            Self::M68040(c) => c.clear(),
        }
    }
}

/// Instruction prefetch pipeline: a queue of words read ahead of the
/// program counter, oldest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchPipeline {
    /// Address of the oldest queued word
    addr: Address,
    words: [Word; CPU_PIPELINE_MAX],
    len: usize,
    depth: usize,
}

impl PrefetchPipeline {
    pub fn new(depth: usize) -> Self {
        Self {
            addr: 0,
            words: [0; CPU_PIPELINE_MAX],
            len: 0,
            depth: depth.min(CPU_PIPELINE_MAX),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.depth
    }

    pub fn flush(&mut self) {
        self.len = 0;
    }

    /// Discards the queue and restarts it at `addr`
    pub fn restart(&mut self, addr: Address) {
        self.len = 0;
        self.addr = addr;
    }

    /// Address of the next word to be queued
    pub fn next_fetch_addr(&self) -> Address {
        self.addr.wrapping_add(2 * self.len as Address)
    }

    /// Address of the oldest queued word, if any
    pub fn front_addr(&self) -> Option<Address> {
        (!self.is_empty()).then_some(self.addr)
    }

    pub fn push(&mut self, word: Word) {
        debug_assert!(self.len < self.depth);
        if self.len < self.depth {
            self.words[self.len] = word;
            self.len += 1;
        }
    }

    pub fn pop(&mut self) -> Option<Word> {
        if self.is_empty() {
            return None;
        }
        let w = self.words[0];
        self.words.copy_within(1..self.len, 0);
        self.len -= 1;
        self.addr = self.addr.wrapping_add(2);
        Some(w)
    }

    /// Drops the queue if a store of `len` bytes at `addr` overlaps it.
    /// Returns true if the queue was dropped.
    pub fn invalidate(&mut self, addr: Address, len: usize) -> bool {
        if self.is_empty() {
            return false;
        }
        let start = self.addr;
        let qlen = 2 * self.len as Address;
        let overlaps = addr.wrapping_sub(start) < qlen
            || start.wrapping_sub(addr) < len as Address;
        if overlaps {
            self.flush();
        }
        overlaps
    }

    pub fn words(&self) -> &[Word] {
        &self.words[..self.len]
    }
}
