use crate::cpu_m68k::snapshot::CpuSnapshot;
use crate::cpu_m68k::{CpuConfig, CpuModel, FidelityMode, FpuModel};

use super::*;

/// ADDQ.L #1,D0; BRA.S *-2
const COUNTER: [u16; 2] = [0x5280, 0x60FC];

fn configs() -> [CpuConfig; 4] {
    [
        CpuConfig::default(),
        CpuConfig::for_model(CpuModel::M68020).with_mode(FidelityMode::CycleExact),
        CpuConfig::for_model(CpuModel::M68030).with_mode(FidelityMode::Jit),
        CpuConfig::for_model(CpuModel::M68040).with_fpu(Some(FpuModel::M68040)),
    ]
}

#[test]
fn restore_replays() {
    for config in configs() {
        let mut cpu = testcpu(config, &COUNTER);
        steps(&mut cpu, 50);
        let snap = cpu.snapshot();

        steps(&mut cpu, 50);
        let expected = (cpu.regs.d[0], cpu.get_pc(), cpu.cycles);

        cpu.restore(snap.clone()).unwrap();
        assert_eq!(cpu.regs.d, snap.regs.d);
        assert_eq!(cpu.get_pc(), snap.regs.get_pc());
        steps(&mut cpu, 50);
        assert_eq!((cpu.regs.d[0], cpu.get_pc(), cpu.cycles), expected, "{:?}", config);
    }
}

#[test]
fn restore_other_config() {
    let mut a = testcpu(CpuConfig::for_model(CpuModel::M68020), &COUNTER);
    steps(&mut a, 10);
    let snap = a.snapshot();

    let mut b = testcpu(CpuConfig::default(), &COUNTER);
    b.restore(snap).unwrap();
    assert_eq!(b.config().model, CpuModel::M68020);
    assert_eq!(b.strategy_name(), "cached");
    assert_eq!(b.regs.d[0], a.regs.d[0]);

    steps(&mut a, 10);
    steps(&mut b, 10);
    assert_eq!(a.regs.d[0], b.regs.d[0]);
    assert_eq!(a.cycles, b.cycles);
}

#[test]
fn json_round_trip() {
    let mut cpu = testcpu(
        CpuConfig::for_model(CpuModel::M68030).with_fpu(Some(FpuModel::M68882)),
        &COUNTER,
    );
    steps(&mut cpu, 5);
    let snap = cpu.snapshot();
    let json = serde_json::to_string(&snap).unwrap();
    let back: CpuSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(back, snap);
}

#[cfg(feature = "savestates")]
#[test]
fn save_load_state() {
    let mut cpu = testcpu(CpuConfig::for_model(CpuModel::M68010), &COUNTER);
    steps(&mut cpu, 25);
    let state = cpu.save_state().unwrap();
    steps(&mut cpu, 25);

    let mut fresh = testcpu(CpuConfig::for_model(CpuModel::M68010), &COUNTER);
    fresh.load_state(&state).unwrap();
    steps(&mut fresh, 25);
    assert_eq!(fresh.regs.d[0], cpu.regs.d[0]);
    assert_eq!(fresh.get_pc(), cpu.get_pc());
    assert_eq!(fresh.cycles, cpu.cycles);
}

#[test]
fn trace_records() {
    let mut cpu = testcpu(CpuConfig::default(), &COUNTER);
    cpu.enable_trace(true);
    steps(&mut cpu, 4);

    let trace = cpu.take_trace();
    assert_eq!(trace.len(), 4);
    assert_eq!(trace[0].pc, INITIAL_PC);
    assert_eq!(trace[0].opcode, 0x5280);
    assert_eq!(trace[1].opcode, 0x60FC);
    assert_eq!(trace[2].regs.d[0], 1);
    assert!(trace[1].cycles > trace[0].cycles);
    assert!(cpu.take_trace().is_empty());

    cpu.enable_trace(false);
    cpu.step().unwrap();
    assert!(cpu.take_trace().is_empty());
}
