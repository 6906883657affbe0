use crate::cpu_m68k::cpu::Breakpoint;
use crate::cpu_m68k::{CpuConfig, CpuModel, ExecutionState};

use super::*;

#[test]
fn illegal_68000() {
    let mut cpu = testcpu(CpuConfig::default(), &[0x4AFC, 0x4E71]);
    install_handler(&mut cpu, 4, 0x2000);
    cpu.step().unwrap();

    assert_eq!(cpu.get_pc(), 0x2000);
    assert_eq!(sp(&cpu), INITIAL_SSP - 6);
    assert_eq!(read_word(&cpu, sp(&cpu)), 0x2700);
    assert_eq!(read_long(&cpu, sp(&cpu) + 2), INITIAL_PC);
}

#[test]
fn illegal_68010() {
    let mut cpu = testcpu(CpuConfig::for_model(CpuModel::M68010), &[0x4AFC, 0x4E71]);
    install_handler(&mut cpu, 4, 0x2000);
    cpu.step().unwrap();

    assert_eq!(cpu.get_pc(), 0x2000);
    assert_eq!(sp(&cpu), INITIAL_SSP - 8);
    assert_eq!(read_long(&cpu, sp(&cpu) + 2), INITIAL_PC);
    assert_eq!(read_word(&cpu, sp(&cpu) + 6), 0x0010);
}

#[test]
fn illegal_relative_to_vbr() {
    let mut cpu = testcpu(CpuConfig::for_model(CpuModel::M68010), &[0x4AFC, 0x4E71]);
    cpu.regs.vbr = 0x4000;
    write_long(&mut cpu, 0x4000 + 4 * 4, 0x2400);
    cpu.step().unwrap();
    assert_eq!(cpu.get_pc(), 0x2400);
}

#[test]
fn privilege_violation() {
    for model in [CpuModel::M68000, CpuModel::M68020] {
        // MOVE #$2700,SR
        let mut cpu = testcpu(CpuConfig::for_model(model), &[0x46FC, 0x2700, 0x4E71]);
        install_handler(&mut cpu, 8, 0x2000);
        cpu.regs.usp = 0x1800;
        cpu.regs.sr.set_supervisor(false);
        cpu.step().unwrap();

        assert_eq!(cpu.get_pc(), 0x2000, "{}", model);
        assert!(cpu.regs.sr.supervisor());
        assert_eq!(cpu.regs.usp, 0x1800);
        let stacked_sr = read_word(&cpu, sp(&cpu));
        assert_eq!(stacked_sr & 0x2000, 0, "{}", model);
        assert_eq!(read_long(&cpu, sp(&cpu) + 2), INITIAL_PC);
    }
}

#[test]
fn trace_68000() {
    let mut cpu = testcpu(CpuConfig::default(), &[0x4E71, 0x4E71]);
    install_handler(&mut cpu, 9, 0x2000);
    cpu.regs.sr.set_trace(true);
    cpu.step().unwrap();

    assert_eq!(cpu.get_pc(), 0x2000);
    assert!(!cpu.regs.sr.trace());
    assert_eq!(sp(&cpu), INITIAL_SSP - 6);
    assert_ne!(read_word(&cpu, sp(&cpu)) & 0x8000, 0);
    assert_eq!(read_long(&cpu, sp(&cpu) + 2), INITIAL_PC + 2);
}

#[test]
fn trace_68020() {
    let mut cpu = testcpu(CpuConfig::for_model(CpuModel::M68020), &[0x4E71, 0x4E71]);
    install_handler(&mut cpu, 9, 0x2000);
    cpu.regs.sr.set_trace(true);
    cpu.step().unwrap();

    assert_eq!(cpu.get_pc(), 0x2000);
    assert_eq!(sp(&cpu), INITIAL_SSP - 12);
    assert_eq!(read_long(&cpu, sp(&cpu) + 2), INITIAL_PC + 2);
    assert_eq!(read_word(&cpu, sp(&cpu) + 6), 0x2024);
    assert_eq!(read_long(&cpu, sp(&cpu) + 8), INITIAL_PC);
}

#[test]
fn trace_on_flow_only() {
    // NOP; BRA.S +2; NOP; NOP
    let mut cpu = testcpu(
        CpuConfig::for_model(CpuModel::M68020),
        &[0x4E71, 0x6002, 0x4E71, 0x4E71],
    );
    install_handler(&mut cpu, 9, 0x2000);
    cpu.regs.sr.set_t0(true);

    cpu.step().unwrap();
    assert_eq!(cpu.get_pc(), 0x1002);
    cpu.step().unwrap();
    assert_eq!(cpu.get_pc(), 0x2000);
    assert_eq!(read_long(&cpu, sp(&cpu) + 2), 0x1006);
}

#[test]
fn address_error_68000() {
    // MOVE.W $1001.W,D0
    let mut cpu = testcpu(CpuConfig::default(), &[0x3038, 0x1001, 0x4E71, 0x4E71]);
    install_handler(&mut cpu, 3, 0x2000);
    cpu.step().unwrap();

    assert_eq!(cpu.get_pc(), 0x2000);
    let sp = sp(&cpu);
    assert_eq!(sp, INITIAL_SSP - 14);
    // Data read in supervisor state
    assert_eq!(read_word(&cpu, sp) & 0x1F, 0x1D);
    assert_eq!(read_long(&cpu, sp + 2), 0x1001);
    assert_eq!(read_word(&cpu, sp + 6), 0x3038);
    assert_eq!(read_word(&cpu, sp + 8), 0x2700);
    assert_eq!(read_long(&cpu, sp + 10), 0x1004);
}

#[test]
fn odd_data_access_68020() {
    // MOVE.W $1001.W,D0 is fine from the 68020 on
    let mut cpu = testcpu(
        CpuConfig::for_model(CpuModel::M68020),
        &[0x3038, 0x1001, 0x4E71, 0x4E71],
    );
    cpu.step().unwrap();
    // Straddles the opcode and extension word
    assert_eq!(read_word(&cpu, 0x1001), 0x3810);
    assert_eq!(cpu.regs.d[0] & 0xFFFF, 0x3810);
    assert_eq!(cpu.get_pc(), 0x1004);
}

#[test]
fn bus_error_68010() {
    // MOVE.W $3000.W,D0
    let mut cpu = testcpu(
        CpuConfig::for_model(CpuModel::M68010),
        &[0x3038, 0x3000, 0x4E71, 0x4E71],
    );
    install_handler(&mut cpu, 2, 0x2000);
    cpu.bus.bus_errors.push(0x3000..0x3002);
    cpu.step().unwrap();

    assert_eq!(cpu.get_pc(), 0x2000);
    assert_eq!(sp(&cpu), INITIAL_SSP - 58);
    // Restarted on return
    assert_eq!(read_long(&cpu, sp(&cpu) + 2), INITIAL_PC);
    assert_eq!(read_word(&cpu, sp(&cpu) + 6), 0x8008);
    assert_eq!(read_long(&cpu, sp(&cpu) + 10), 0x3000);
}

#[test]
fn double_fault_halts() {
    // MOVE.W $3000.W,D0
    let mut cpu = testcpu(CpuConfig::default(), &[0x3038, 0x3000, 0x4E71, 0x4E71]);
    install_handler(&mut cpu, 2, 0x2000);
    cpu.bus.bus_errors.push(0x1E00..0x2000);
    cpu.bus.bus_errors.push(0x3000..0x3002);
    cpu.step().unwrap();
    assert_eq!(cpu.state(), ExecutionState::Halted);

    // Only a reset gets out
    let pc = cpu.get_pc();
    let cycles = cpu.cycles;
    cpu.step().unwrap();
    assert_eq!(cpu.state(), ExecutionState::Halted);
    assert_eq!(cpu.get_pc(), pc);
    assert!(cpu.cycles > cycles);

    write_long(&mut cpu, 0, 0x0800);
    write_long(&mut cpu, 4, 0x1000);
    cpu.request_reset();
    cpu.step().unwrap();
    assert_eq!(cpu.state(), ExecutionState::Running);
    assert_eq!(sp(&cpu), 0x0800);
    assert_eq!(cpu.get_pc(), 0x1000);
}

#[test]
fn trap() {
    // TRAP #3
    let mut cpu = testcpu(CpuConfig::default(), &[0x4E43, 0x4E71]);
    install_handler(&mut cpu, 35, 0x2000);
    cpu.step().unwrap();
    assert_eq!(cpu.get_pc(), 0x2000);
    assert_eq!(read_long(&cpu, sp(&cpu) + 2), INITIAL_PC + 2);
}

#[test]
fn divide_by_zero() {
    // DIVU D1,D0
    let mut cpu = testcpu(CpuConfig::default(), &[0x80C1, 0x4E71]);
    install_handler(&mut cpu, 5, 0x2000);
    cpu.regs.d[0] = 100;
    cpu.step().unwrap();
    assert_eq!(cpu.get_pc(), 0x2000);
    assert_eq!(cpu.regs.d[0], 100);
    assert_eq!(read_long(&cpu, sp(&cpu) + 2), INITIAL_PC + 2);

    let mut cpu = testcpu(CpuConfig::for_model(CpuModel::M68020), &[0x80C1, 0x4E71]);
    install_handler(&mut cpu, 5, 0x2000);
    cpu.step().unwrap();
    assert_eq!(read_word(&cpu, sp(&cpu) + 6), 0x2014);
    assert_eq!(read_long(&cpu, sp(&cpu) + 8), INITIAL_PC);
}

#[test]
fn rte_68010() {
    let mut cpu = testcpu(CpuConfig::for_model(CpuModel::M68010), &[0x4E73]);
    cpu.regs.usp = 0x1800;
    write_word(&mut cpu, INITIAL_SSP, 0x0004);
    write_long(&mut cpu, INITIAL_SSP + 2, 0x1010);
    write_word(&mut cpu, INITIAL_SSP + 6, 0x0000);
    write_word(&mut cpu, 0x1010, 0x4E71);
    cpu.step().unwrap();

    assert_eq!(cpu.get_pc(), 0x1010);
    assert!(!cpu.regs.sr.supervisor());
    assert!(cpu.regs.sr.z());
    assert_eq!(cpu.regs.isp, INITIAL_SSP + 8);
    assert_eq!(sp(&cpu), 0x1800);
}

#[test]
fn rte_format_error() {
    let mut cpu = testcpu(CpuConfig::for_model(CpuModel::M68010), &[0x4E73]);
    install_handler(&mut cpu, 14, 0x2000);
    write_word(&mut cpu, INITIAL_SSP, 0x0000);
    write_long(&mut cpu, INITIAL_SSP + 2, 0x1010);
    // Format A only exists on the 68020/68030
    write_word(&mut cpu, INITIAL_SSP + 6, 0xA008);
    cpu.step().unwrap();

    assert_eq!(cpu.get_pc(), 0x2000);
    assert_eq!(sp(&cpu), INITIAL_SSP - 8);
    assert_eq!(read_long(&cpu, sp(&cpu) + 2), INITIAL_PC);
    assert_eq!(read_word(&cpu, sp(&cpu) + 6), 0x0038);
}

#[test]
fn exception_breakpoint() {
    let mut cpu = testcpu(CpuConfig::default(), &[0x4AFC]);
    install_handler(&mut cpu, 4, 0x2000);
    cpu.set_breakpoint(Breakpoint::Exception(4));
    cpu.step().unwrap();
    assert!(cpu.breakpoint_hit.get_clear());
    assert!(!cpu.breakpoint_hit.get_clear());

    cpu.clear_breakpoint(Breakpoint::Exception(4));
    assert!(cpu.breakpoints().is_empty());
}

#[test]
fn execution_breakpoint_stops_run() {
    let mut cpu = testcpu(
        CpuConfig::default(),
        &[0x4E71, 0x4E71, 0x4E71, 0x4E71, 0x60FE],
    );
    cpu.set_breakpoint(Breakpoint::Execution(0x1004));
    cpu.run(10000).unwrap();
    assert!(cpu.breakpoint_hit.get_clear());
    assert_eq!(cpu.get_pc(), 0x1006);
}

#[test]
fn single_step_request() {
    let mut cpu = testcpu(CpuConfig::default(), &[0x4E71, 0x4E71, 0x60FE]);
    cpu.request_single_step();
    cpu.run(10000).unwrap();
    assert!(cpu.breakpoint_hit.get_clear());
    assert_eq!(cpu.get_pc(), 0x1002);
}

#[test]
fn forced_exception() {
    let mut cpu = testcpu(CpuConfig::default(), &[0x4E71, 0x4E71]);
    install_handler(&mut cpu, 40, 0x2000);
    cpu.force_exception(40);
    cpu.step().unwrap();
    assert_eq!(cpu.get_pc(), 0x2000);
    assert_eq!(read_long(&cpu, sp(&cpu) + 2), INITIAL_PC + 2);
}

#[test]
fn trace_after_trap() {
    // TRAP #0
    let mut cpu = testcpu(CpuConfig::default(), &[0x4E40, 0x4E71]);
    install_handler(&mut cpu, 32, 0x2000);
    install_handler(&mut cpu, 9, 0x2100);
    cpu.regs.sr.set_trace(true);
    cpu.step().unwrap();

    // Trace taken with the trap handler as return address
    assert_eq!(cpu.get_pc(), 0x2100);
    let sp = sp(&cpu);
    assert_eq!(sp, INITIAL_SSP - 12);
    assert_eq!(read_word(&cpu, sp) & 0x8000, 0);
    assert_eq!(read_long(&cpu, sp + 2), 0x2000);
    assert_ne!(read_word(&cpu, sp + 6) & 0x8000, 0);
    assert_eq!(read_long(&cpu, sp + 8), INITIAL_PC + 2);
}

#[test]
fn illegal_not_traced() {
    let mut cpu = testcpu(CpuConfig::default(), &[0x4AFC, 0x4E71]);
    install_handler(&mut cpu, 4, 0x2000);
    install_handler(&mut cpu, 9, 0x2100);
    cpu.regs.sr.set_trace(true);
    cpu.step().unwrap();

    assert_eq!(cpu.get_pc(), 0x2000);
    assert_eq!(sp(&cpu), INITIAL_SSP - 6);
}

#[test]
fn partial_write_drops_cached_line() {
    // MOVE.L D0,$3000.W
    let mut cpu = testcpu(
        CpuConfig::for_model(CpuModel::M68020),
        &[0x21C0, 0x3000, 0x4E71, 0x4E71],
    );
    install_handler(&mut cpu, 2, 0x2000);
    cpu.regs.cacr = 1;
    cpu.icache.fill(0x3000, true, 0x4E714E71);
    cpu.bus.bus_errors.push(0x3002..0x3004);
    cpu.regs.d[0] = 0x12345678;
    cpu.step().unwrap();

    assert_eq!(cpu.get_pc(), 0x2000);
    // First word reached memory before the fault
    assert_eq!(read_word(&cpu, 0x3000), 0x1234);
    assert_eq!(cpu.icache.lookup(0x3000, true), None);
}
