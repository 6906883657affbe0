use crate::cpu_m68k::{CpuConfig, CpuModel, FidelityMode};

use super::*;

fn jit_config() -> CpuConfig {
    CpuConfig::for_model(CpuModel::M68020).with_mode(FidelityMode::Jit)
}

/// MOVEQ #1,D0; DBRA D1,$1000; MOVE.W #$7005,$1000.W; BRA.S $1000
const PATCHING_LOOP: [u16; 7] = [0x7001, 0x51C9, 0xFFFC, 0x31FC, 0x7005, 0x1000, 0x60F2];

#[test]
fn replays_recorded_block() {
    let mut cpu = testcpu(jit_config(), &PATCHING_LOOP);
    cpu.regs.d[1] = 3;

    steps(&mut cpu, 2);
    assert_eq!(cpu.get_pc(), INITIAL_PC);
    let block = cpu.jit.get(INITIAL_PC).expect("no block recorded");
    assert_eq!(block.ops.len(), 2);
    assert_eq!(block.end, 0x1006);

    steps(&mut cpu, 2);
    assert_eq!(cpu.get_pc(), INITIAL_PC);
    assert!(cpu.jit.hits >= 1);
    assert_eq!(cpu.regs.d[0], 1);
    assert_eq!(cpu.regs.d[1], 1);
}

#[test]
fn store_invalidates_block() {
    let mut cpu = testcpu(jit_config(), &PATCHING_LOOP);
    cpu.regs.d[1] = 1;

    steps(&mut cpu, 7);
    assert_eq!(read_word(&cpu, INITIAL_PC), 0x7005);
    assert_eq!(cpu.regs.d[0], 5);
    assert!(cpu.jit.hits >= 1);
    assert!(cpu.jit.invalidations >= 1);
    assert_eq!(cpu.regs.d[1] & 0xFFFF, 0xFFFF);
}

#[test]
fn same_result_as_interpreter() {
    let mut jit = testcpu(jit_config(), &PATCHING_LOOP);
    let mut interp = testcpu(CpuConfig::for_model(CpuModel::M68020), &PATCHING_LOOP);
    jit.regs.d[1] = 10;
    interp.regs.d[1] = 10;

    for _ in 0..40 {
        jit.step().unwrap();
        interp.step().unwrap();
        assert_eq!(jit.get_pc(), interp.get_pc());
        assert_eq!(jit.regs.d, interp.regs.d);
        assert_eq!(jit.regs.sr, interp.regs.sr);
    }
}

#[test]
fn disable_drops_blocks() {
    let mut cpu = testcpu(jit_config(), &PATCHING_LOOP);
    cpu.regs.d[1] = 5;
    steps(&mut cpu, 4);
    assert!(!cpu.jit.is_empty());

    cpu.set_jit_enabled(false);
    assert!(cpu.jit.is_empty());
    steps(&mut cpu, 4);
    assert!(cpu.jit.is_empty());
    assert_eq!(cpu.regs.d[1], 1);

    cpu.set_jit_enabled(true);
    steps(&mut cpu, 2);
    assert!(!cpu.jit.is_empty());
}
