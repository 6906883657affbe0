//! Configuration, cycle accounting and program counter handling

use crate::bus::Address;
use crate::bus::testbus::Testbus;
use crate::cpu_m68k::{
    ADDRESS_MASK_32, ConfigError, CpuConfig, CpuModel, ExecutionState, FidelityMode, PcMode,
};

use super::*;

#[test]
fn nop_costs_one_bus_cycle() {
    for mode in [FidelityMode::Fast, FidelityMode::CycleExact] {
        let mut cpu = testcpu(CpuConfig::default().with_mode(mode), &[0x4E71, 0x4E71, 0x4E71]);
        let start = cpu.cycles;
        cpu.step().unwrap();
        assert_eq!(cpu.cycles - start, 4, "{}", mode);
        assert_eq!(cpu.get_pc(), 0x1002);
        assert_eq!(cpu.bus.get_cycles(), cpu.cycles);
    }
}

#[test]
fn wait_states_cycle_exact_only() {
    let mut fast = testcpu(CpuConfig::default(), &[0x4E71, 0x4E71, 0x4E71]);
    let mut exact = testcpu(
        CpuConfig::default().with_mode(FidelityMode::CycleExact),
        &[0x4E71, 0x4E71, 0x4E71],
    );
    fast.bus.wait_states = 1;
    exact.bus.wait_states = 1;

    let (f, e) = (fast.cycles, exact.cycles);
    fast.step().unwrap();
    exact.step().unwrap();

    // One word fetched, one wait state per byte
    assert_eq!(fast.cycles - f, 4);
    assert_eq!(exact.cycles - e, 8);
}

#[test]
fn long_read_68000() {
    // MOVE.L $3000.W,D0
    let mut cpu = testcpu(CpuConfig::default(), &[0x2038, 0x3000, 0x4E71, 0x4E71]);
    write_long(&mut cpu, 0x3000, 0xDEADBEEF);
    let start = cpu.cycles;
    cpu.step().unwrap();
    assert_eq!(cpu.regs.d[0], 0xDEADBEEF);
    assert!(cpu.regs.sr.n());
    // Opcode and extension refetched, two bus cycles for the operand
    assert_eq!(cpu.cycles - start, 16);
}

#[test]
fn address_space_24bit() {
    // MOVE.L $FF003000,D0
    let code = [0x2039, 0xFF00, 0x3000, 0x4E71, 0x4E71];

    let mut cpu = testcpu(CpuConfig::default(), &code);
    write_long(&mut cpu, 0x3000, 0xDEADBEEF);
    write_long(&mut cpu, 0xFF003000, 0x12345678);
    cpu.step().unwrap();
    assert_eq!(cpu.regs.d[0], 0xDEADBEEF);

    let mut cpu = testcpu(
        CpuConfig::for_model(CpuModel::M68020).with_address_space_24(true),
        &code,
    );
    write_long(&mut cpu, 0x3000, 0xDEADBEEF);
    cpu.step().unwrap();
    assert_eq!(cpu.regs.d[0], 0xDEADBEEF);
}

#[test]
fn address_space_32bit() {
    let mut cpu = testcpu(
        CpuConfig::for_model(CpuModel::M68020),
        &[0x2039, 0xFF00, 0x3000, 0x4E71, 0x4E71],
    );
    write_long(&mut cpu, 0x3000, 0xDEADBEEF);
    write_long(&mut cpu, 0xFF003000, 0x12345678);
    cpu.step().unwrap();
    assert_eq!(cpu.regs.d[0], 0x12345678);
}

#[test]
fn rejects_invalid_config() {
    let cases = [
        CpuConfig::default().with_mode(FidelityMode::Jit),
        CpuConfig::for_model(CpuModel::M68030).with_address_space_24(true),
        CpuConfig::for_model(CpuModel::M68020).with_mmu(true),
    ];
    for config in cases {
        let r = TestCpu::new(Testbus::new(ADDRESS_MASK_32), config);
        let Some(err) = r.err() else {
            panic!("{:?} accepted", config);
        };
        assert!(err.downcast_ref::<ConfigError>().is_some(), "{:?}", config);
    }
}

#[test]
fn reconfigure_keeps_registers() {
    let mut cpu = testcpu(CpuConfig::default(), &[0x4E71, 0x4E71, 0x4E71, 0x4E71]);
    cpu.regs.d[3] = 0x55AA;
    assert_eq!(cpu.strategy_name(), "prefetch");

    cpu.reconfigure(CpuConfig::for_model(CpuModel::M68020)).unwrap();
    assert_eq!(cpu.strategy_name(), "cached");
    assert_eq!(cpu.regs.d[3], 0x55AA);
    assert_eq!(cpu.get_pc(), INITIAL_PC);
    cpu.step().unwrap();
    assert_eq!(cpu.get_pc(), INITIAL_PC + 2);

    let bad = CpuConfig::for_model(CpuModel::M68040).with_mode(FidelityMode::CycleExact);
    assert!(cpu.reconfigure(bad).is_err());
    assert_eq!(cpu.config().model, CpuModel::M68020);
}

#[test]
fn reset_loads_vectors() {
    let mut cpu = testcpu(CpuConfig::default(), &[0x4E71]);
    write_long(&mut cpu, 0, 0x2000);
    write_long(&mut cpu, 4, 0x1000);
    cpu.regs.d[0] = 1;
    cpu.regs.sr.set_supervisor(false);

    cpu.reset().unwrap();
    assert_eq!(sp(&cpu), 0x2000);
    assert_eq!(cpu.get_pc(), 0x1000);
    assert_eq!(cpu.regs.d[0], 0);
    assert!(cpu.regs.sr.supervisor());
    assert_eq!(cpu.regs.sr.int_prio_mask(), 7);
    assert_eq!(cpu.state(), ExecutionState::Running);
}

#[test]
fn reset_instruction() {
    let mut cpu = testcpu(CpuConfig::default(), &[0x4E70, 0x4E71, 0x4E71]);
    cpu.step().unwrap();
    assert_eq!(cpu.bus.resets, 1);
    assert_eq!(cpu.get_pc(), 0x1002);
}

#[test]
fn pc_representation() {
    let cpu = testcpu(CpuConfig::default(), &[0x4E71]);
    assert_eq!(cpu.pc_mode(), PcMode::Indirect);

    let jit = CpuConfig::for_model(CpuModel::M68020).with_mode(FidelityMode::Jit);
    let cpu = testcpu(jit, &[0x4E71]);
    assert_eq!(cpu.pc_mode(), PcMode::Direct);
    assert_eq!(cpu.get_pc(), INITIAL_PC);
}

#[test]
fn direct_pc_falls_back_when_unmapped() {
    let jit = CpuConfig::for_model(CpuModel::M68020).with_mode(FidelityMode::Jit);
    // MOVEQ #5,D0; MOVEQ #7,D1; BRA.S *
    let mut cpu = testcpu(jit, &[0x7005, 0x7207, 0x60FE]);
    cpu.bus.direct_mapping = false;
    cpu.set_pc(INITIAL_PC).unwrap();

    steps(&mut cpu, 3);
    assert_eq!(cpu.regs.d[0], 5);
    assert_eq!(cpu.regs.d[1], 7);
    assert_eq!(cpu.get_pc(), 0x1004);
}

#[test]
fn run_budget() {
    // BRA.S *
    let mut cpu = testcpu(CpuConfig::default(), &[0x60FE]);
    let spent = cpu.run(100).unwrap();
    assert!(spent >= 100);
    assert_eq!(cpu.get_pc(), INITIAL_PC);
}

#[test]
fn movec_vbr() {
    // MOVEC D0,VBR; MOVEC VBR,D1
    let mut cpu = testcpu(
        CpuConfig::for_model(CpuModel::M68010),
        &[0x4E7B, 0x0801, 0x4E7A, 0x1801, 0x4E71, 0x4E71],
    );
    cpu.regs.d[0] = 0x4000;
    steps(&mut cpu, 2);
    assert_eq!(cpu.regs.vbr, 0x4000);
    assert_eq!(cpu.regs.d[1], 0x4000);
}

#[test]
fn movec_unknown_register() {
    // MOVEC CACR,D0 does not exist on the 68010
    let mut cpu = testcpu(
        CpuConfig::for_model(CpuModel::M68010),
        &[0x4E7A, 0x0002, 0x4E71],
    );
    install_handler(&mut cpu, 4, 0x2000);
    cpu.step().unwrap();
    assert_eq!(cpu.get_pc(), 0x2000);
    assert_eq!(read_long(&cpu, sp(&cpu) + 2), INITIAL_PC as Address);
}
