//! Programs executed on a sparse test bus

mod basics;
mod cache;
mod exceptions;
mod jit;
mod mmu;
mod snapshot;

use crate::bus::Address;
use crate::bus::testbus::Testbus;
use crate::cpu_m68k::{ADDRESS_MASK_32, CpuConfig, CpuM68k};
use crate::types::{Long, Word};

pub type TestCpu = CpuM68k<Testbus<Address, u8>>;

pub const INITIAL_SSP: Address = 0x1F00;
pub const INITIAL_PC: Address = 0x1000;

/// Initialize a test system with code at a given PC, in supervisor mode
/// with interrupts masked.
pub fn testcpu_at(config: CpuConfig, initial_ssp: Address, initial_pc: Address, code: &[Word]) -> TestCpu {
    let bus = Testbus::new(ADDRESS_MASK_32);
    let mut cpu = TestCpu::new(bus, config).expect("invalid test configuration");

    for (i, &word) in code.iter().enumerate() {
        write_word(&mut cpu, initial_pc + (i as Address * 2), word);
    }

    cpu.regs.isp = initial_ssp;
    cpu.regs.sr.set_supervisor(true);
    cpu.regs.sr.set_int_prio_mask(7);

    cpu.set_pc(initial_pc).expect("set_pc failed");
    cpu.prefetch_refill().expect("prefetch_refill failed");
    cpu
}

pub fn testcpu(config: CpuConfig, code: &[Word]) -> TestCpu {
    testcpu_at(config, INITIAL_SSP, INITIAL_PC, code)
}

/// Write a word (big-endian) to memory
pub fn write_word(cpu: &mut TestCpu, addr: Address, value: Word) {
    cpu.bus.mem.insert(addr, (value >> 8) as u8);
    cpu.bus.mem.insert(addr + 1, value as u8);
}

/// Write a long (big-endian) to memory
pub fn write_long(cpu: &mut TestCpu, addr: Address, value: Long) {
    write_word(cpu, addr, (value >> 16) as Word);
    write_word(cpu, addr + 2, value as Word);
}

/// Read a word (big-endian) from memory
pub fn read_word(cpu: &TestCpu, addr: Address) -> Word {
    let hi = *cpu.bus.mem.get(&addr).unwrap_or(&0) as Word;
    let lo = *cpu.bus.mem.get(&(addr + 1)).unwrap_or(&0) as Word;
    (hi << 8) | lo
}

/// Read a long (big-endian) from memory
pub fn read_long(cpu: &TestCpu, addr: Address) -> Long {
    (Long::from(read_word(cpu, addr)) << 16) | Long::from(read_word(cpu, addr + 2))
}

/// Points an exception vector at a handler made of NOPs
pub fn install_handler(cpu: &mut TestCpu, vector: u8, handler: Address) {
    write_long(cpu, Address::from(vector) * 4, handler);
    for i in 0..4 {
        write_word(cpu, handler + 2 * i, 0x4E71);
    }
}

/// Active stack pointer
pub fn sp(cpu: &TestCpu) -> Address {
    cpu.regs.read_a(7)
}

pub fn steps(cpu: &mut TestCpu, n: usize) {
    for _ in 0..n {
        cpu.step().expect("step failed");
    }
}
