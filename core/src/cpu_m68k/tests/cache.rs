use crate::cpu_m68k::cache::{CACR_040_IE, InstructionCache};
use crate::cpu_m68k::{CpuConfig, CpuModel};

use super::*;

/// NOP; NOP; BRA.S $1000
const LOOP: [u16; 3] = [0x4E71, 0x4E71, 0x60FA];

fn valid_lines(cpu: &TestCpu) -> usize {
    match &cpu.icache {
        InstructionCache::M68020(c) => c.lines.iter().filter(|l| l.valid).count(),
        InstructionCache::M68030(c) => c.lines.iter().flat_map(|l| l.valid).filter(|&v| v).count(),
        InstructionCache::M68040(c) => c.valid_longs(),
        InstructionCache::None => 0,
    }
}

fn iteration(cpu: &mut TestCpu) -> u64 {
    let start = cpu.cycles;
    steps(cpu, 3);
    assert_eq!(cpu.get_pc(), INITIAL_PC);
    cpu.cycles - start
}

#[test]
fn loop_runs_from_cache() {
    let configs = [
        CpuConfig::for_model(CpuModel::M68020),
        CpuConfig::for_model(CpuModel::M68030),
        // Translation configured but switched off
        CpuConfig::for_model(CpuModel::M68030).with_mmu(true),
    ];
    for config in configs {
        let mut cpu = testcpu(config, &LOOP);
        cpu.regs.cacr = 1;

        let first = iteration(&mut cpu);
        let second = iteration(&mut cpu);
        assert!(second < first, "{}: {} >= {}", cpu.strategy_name(), second, first);
        assert!(valid_lines(&cpu) > 0);
        assert_eq!(iteration(&mut cpu), second);
    }
}

#[test]
fn loop_runs_from_040_cache() {
    for model in [CpuModel::M68040, CpuModel::M68060] {
        let mut cpu = testcpu(CpuConfig::for_model(model), &LOOP);
        let uncached = iteration(&mut cpu);
        assert_eq!(iteration(&mut cpu), uncached);
        assert_eq!(valid_lines(&cpu), 0);

        cpu.regs.cacr = CACR_040_IE;
        let first = iteration(&mut cpu);
        let second = iteration(&mut cpu);
        assert!(second < first, "{}: {} >= {}", model, second, first);
        assert!(second < uncached);
        // The miss loaded the whole line
        assert_eq!(valid_lines(&cpu), 4);
        assert_eq!(iteration(&mut cpu), second);
    }
}

#[test]
fn cinv_all_040() {
    // NOP; NOP; CINVA IC
    let mut cpu = testcpu(
        CpuConfig::for_model(CpuModel::M68040),
        &[0x4E71, 0x4E71, 0xF498, 0x4E71],
    );
    cpu.regs.cacr = CACR_040_IE;
    steps(&mut cpu, 2);
    assert!(valid_lines(&cpu) > 0);
    cpu.step().unwrap();
    assert_eq!(valid_lines(&cpu), 0);
}

#[test]
fn cinv_line_040() {
    // CINVL IC,(A0)
    let mut cpu = testcpu(CpuConfig::for_model(CpuModel::M68060), &[0xF488, 0x4E71]);
    cpu.regs.cacr = CACR_040_IE;
    cpu.icache.fill(0x4000, false, 0x4E714E71);
    cpu.icache.fill(0x4010, false, 0x4E714E71);
    cpu.regs.a[0] = 0x4008;
    cpu.step().unwrap();

    assert!(cpu.icache.lookup(0x4000, false).is_none());
    assert!(cpu.icache.lookup(0x4010, false).is_some());
    // Opcode line itself survives
    assert!(cpu.icache.lookup(INITIAL_PC, false).is_some());
}

#[test]
fn disabled_cache_stays_empty() {
    let mut cpu = testcpu(CpuConfig::for_model(CpuModel::M68020), &LOOP);
    let first = iteration(&mut cpu);
    let second = iteration(&mut cpu);
    assert_eq!(first, second);
    assert_eq!(valid_lines(&cpu), 0);
}

#[test]
fn cacr_write_clears() {
    // MOVEC D0,CACR
    let mut cpu = testcpu(
        CpuConfig::for_model(CpuModel::M68020),
        &[0x4E7B, 0x0002, 0x4E71, 0x4E71, 0x4E71],
    );
    cpu.regs.cacr = 1;
    cpu.icache.fill(0x4000, true, 0x4E714E71);
    cpu.regs.d[0] = 0xFFFFFFFF;
    cpu.step().unwrap();

    // Clear bits read as zero
    assert_eq!(cpu.regs.cacr, 0b0011);
    assert!(cpu.icache.lookup(0x4000, true).is_none());
}

#[test]
fn self_modifying_code() {
    // MOVE.W #$7005,$1006.W; MOVEQ #1,D0
    let code = [0x31FC, 0x7005, 0x1006, 0x7001, 0x4E71, 0x4E71];

    for model in [CpuModel::M68000, CpuModel::M68010, CpuModel::M68020, CpuModel::M68030] {
        let mut cpu = testcpu(CpuConfig::for_model(model), &code);
        cpu.regs.cacr = 1;
        steps(&mut cpu, 2);
        assert_eq!(read_word(&cpu, 0x1006), 0x7005);
        assert_eq!(cpu.regs.d[0], 5, "{}", model);
    }
}

#[test]
fn store_into_cached_loop() {
    let mut cpu = testcpu(CpuConfig::for_model(CpuModel::M68020), &LOOP);
    cpu.regs.cacr = 1;
    iteration(&mut cpu);
    assert!(cpu.icache.lookup(INITIAL_PC, true).is_some());

    // Replace the first NOP by MOVEQ #3,D0 through the data path
    cpu.regs.a[0] = INITIAL_PC;
    cpu.regs.d[1] = 0x7003;
    write_word(&mut cpu, 0x1100, 0x3081); // MOVE.W D1,(A0)
    write_word(&mut cpu, 0x1102, 0x60FE);
    cpu.set_pc(0x1100).unwrap();
    cpu.step().unwrap();
    assert!(cpu.icache.lookup(INITIAL_PC, true).is_none());

    cpu.set_pc(INITIAL_PC).unwrap();
    cpu.step().unwrap();
    assert_eq!(cpu.regs.d[0], 3);
}
