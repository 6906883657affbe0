use crate::cpu_m68k::mmu::regs::{RootPointerReg, Tcr040, TcReg, Ttr040};
use crate::cpu_m68k::{CpuConfig, CpuModel};

use super::*;

const ROOT_TABLE: Address = 0x10000;
const PAGE_TABLE: Address = 0x11000;

/// 4K pages, two levels of 10 bits. 0x0000-0x2FFF identity mapped,
/// 0x3000 to 0x50000, 0x4000 write protected to 0x60000, the rest invalid.
fn mmu_cpu(code: &[u16]) -> TestCpu {
    let config = CpuConfig::for_model(CpuModel::M68030).with_mmu(true);
    let mut cpu = testcpu(config, code);

    write_long(&mut cpu, ROOT_TABLE, PAGE_TABLE | 2);
    write_long(&mut cpu, PAGE_TABLE, 0x0000_0001);
    write_long(&mut cpu, PAGE_TABLE + 4, 0x0000_1001);
    write_long(&mut cpu, PAGE_TABLE + 8, 0x0000_2001);
    write_long(&mut cpu, PAGE_TABLE + 12, 0x0005_0001);
    write_long(&mut cpu, PAGE_TABLE + 16, 0x0006_0005);
    install_handler(&mut cpu, 2, 0x2000);
    cpu
}

fn enable(cpu: &mut TestCpu) {
    cpu.regs.mmu.crp = RootPointerReg(0x7FFF_0002_0000_0000 | u64::from(ROOT_TABLE));
    cpu.regs.mmu.tc = TcReg(0x80C0_AA00);
    assert!(cpu.regs.mmu.tc.is_valid());
}

#[test]
fn translated_read() {
    // MOVE.L $3004.W,D0
    let mut cpu = mmu_cpu(&[0x2038, 0x3004, 0x4E71, 0x4E71]);
    enable(&mut cpu);
    write_long(&mut cpu, 0x3004, 0x11111111);
    write_long(&mut cpu, 0x50004, 0xCAFEBABE);
    cpu.step().unwrap();

    assert_eq!(cpu.regs.d[0], 0xCAFEBABE);
    assert_eq!(cpu.get_pc(), 0x1004);
    // Used bits of both levels
    assert_eq!(read_long(&cpu, ROOT_TABLE), PAGE_TABLE | 0xA);
    assert_eq!(read_long(&cpu, PAGE_TABLE + 12), 0x0005_0009);
    assert!(
        cpu.mmu
            .entries()
            .iter()
            .any(|e| e.logical == 0x3000 && e.physical == 0x50000 && !e.modified)
    );
    assert!(cpu.mmu.misses > 0);
}

#[test]
fn translated_write_sets_modified() {
    // MOVE.L D0,$3008.W; MOVE.L D0,$300C.W
    let mut cpu = mmu_cpu(&[0x21C0, 0x3008, 0x21C0, 0x300C, 0x4E71, 0x4E71]);
    enable(&mut cpu);
    cpu.regs.d[0] = 0x12345678;
    cpu.step().unwrap();

    assert_eq!(read_long(&cpu, 0x50008), 0x12345678);
    assert_eq!(read_long(&cpu, 0x3008), 0);
    assert_eq!(read_long(&cpu, PAGE_TABLE + 12), 0x0005_0019);

    let hits = cpu.mmu.hits;
    cpu.step().unwrap();
    assert_eq!(read_long(&cpu, 0x5000C), 0x12345678);
    assert!(cpu.mmu.hits > hits);
}

#[test]
fn invalid_page_faults() {
    // MOVE.L $5000.W,D0
    let mut cpu = mmu_cpu(&[0x2038, 0x5000, 0x4E71, 0x4E71]);
    enable(&mut cpu);
    cpu.step().unwrap();

    assert_eq!(cpu.get_pc(), 0x2000);
    assert_eq!(cpu.mmu.faults, 1);
    // Format A short bus cycle fault frame
    assert_eq!(sp(&cpu), INITIAL_SSP - 32);
    assert_eq!(read_long(&cpu, sp(&cpu) + 2), INITIAL_PC);
    assert_eq!(read_word(&cpu, sp(&cpu) + 6), 0xA008);
    assert_eq!(read_long(&cpu, sp(&cpu) + 16), 0x5000);
}

#[test]
fn write_protected_page() {
    // MOVE.L D0,$4000.W; MOVE.L $4000.W,D1
    let mut cpu = mmu_cpu(&[0x21C0, 0x4000, 0x2238, 0x4000, 0x4E71]);
    enable(&mut cpu);
    write_long(&mut cpu, 0x60000, 0x55555555);
    cpu.regs.d[0] = 1;
    cpu.step().unwrap();

    assert_eq!(cpu.get_pc(), 0x2000);
    assert_eq!(read_long(&cpu, 0x60000), 0x55555555);
    assert_eq!(read_word(&cpu, sp(&cpu) + 6), 0xA008);

    // Reads are fine
    cpu.set_pc(0x1004).unwrap();
    cpu.step().unwrap();
    assert_eq!(cpu.regs.d[1], 0x55555555);
}

#[test]
fn disabled_passes_through() {
    let mut cpu = mmu_cpu(&[0x2038, 0x5000, 0x4E71]);
    write_long(&mut cpu, 0x5000, 0xAAAA5555);
    cpu.step().unwrap();
    assert_eq!(cpu.regs.d[0], 0xAAAA5555);
    assert!(cpu.mmu.entries().is_empty());
}

#[test]
fn pmove_loads_registers() {
    // PMOVE (A0)+,CRP; PMOVE (A0)+,TC; MOVE.L $3004.W,D0
    let mut cpu = mmu_cpu(&[0xF018, 0x4C00, 0xF018, 0x4000, 0x2038, 0x3004, 0x4E71, 0x4E71]);
    cpu.regs.a[0] = 0x8000;
    write_long(&mut cpu, 0x8000, 0x7FFF_0002);
    write_long(&mut cpu, 0x8004, ROOT_TABLE);
    write_long(&mut cpu, 0x8008, 0x80C0_AA00);
    write_long(&mut cpu, 0x50004, 0xCAFEBABE);
    steps(&mut cpu, 3);

    assert_eq!(cpu.regs.a[0], 0x800C);
    assert_eq!(cpu.regs.mmu.crp.table_base(), ROOT_TABLE);
    assert!(cpu.regs.mmu.tc.enable());
    assert_eq!(cpu.regs.mmu.tc.ps(), 12);
    assert_eq!(cpu.regs.d[0], 0xCAFEBABE);
}

#[test]
fn pmove_invalid_tc() {
    // PMOVE (A0),TC with 8K pages, fields covering 33 bits
    let mut cpu = mmu_cpu(&[0xF010, 0x4000, 0x4E71]);
    install_handler(&mut cpu, 56, 0x2400);
    cpu.regs.a[0] = 0x8000;
    write_long(&mut cpu, 0x8000, 0x80D0_AA00);
    cpu.step().unwrap();

    assert_eq!(cpu.get_pc(), 0x2400);
    assert!(!cpu.regs.mmu.tc.enable());
}

#[test]
fn ptest() {
    // PTEST #5,(A0),#7
    let mut cpu = mmu_cpu(&[0xF010, 0x9E15, 0xF010, 0x9E15, 0x4E71]);
    enable(&mut cpu);

    cpu.regs.a[0] = 0x3004;
    cpu.step().unwrap();
    assert_eq!(cpu.regs.mmu.mmusr.level(), 2);
    assert!(!cpu.regs.mmu.mmusr.invalid());
    // Searches without updating the tables
    assert_eq!(read_long(&cpu, PAGE_TABLE + 12), 0x0005_0001);

    cpu.regs.a[0] = 0x5000;
    cpu.step().unwrap();
    assert_eq!(cpu.regs.mmu.mmusr.0, 0x0402);
}

#[test]
fn pflusha() {
    // MOVE.L $3004.W,D0; PFLUSHA
    let mut cpu = mmu_cpu(&[0x2038, 0x3004, 0xF000, 0x2400, 0x4E71]);
    enable(&mut cpu);
    cpu.step().unwrap();
    assert!(!cpu.mmu.entries().is_empty());
    cpu.step().unwrap();
    assert!(cpu.mmu.entries().iter().all(|e| e.logical != 0x3000));
}

#[test]
fn user_mode_privilege() {
    // PMOVE in user mode
    let mut cpu = mmu_cpu(&[0xF010, 0x4000]);
    install_handler(&mut cpu, 8, 0x2400);
    cpu.regs.usp = 0x1800;
    cpu.regs.sr.set_supervisor(false);
    cpu.step().unwrap();
    assert_eq!(cpu.get_pc(), 0x2400);
}

#[test]
fn cached_code_page() {
    let mut cpu = mmu_cpu(&[]);
    enable(&mut cpu);
    // NOP; NOP; BRA.S at logical $3000, physical $50000
    for (i, w) in [0x4E71, 0x4E71, 0x60FA].into_iter().enumerate() {
        write_word(&mut cpu, 0x50000 + 2 * i as Address, w);
    }
    cpu.regs.cacr = 1;
    cpu.set_pc(0x3000).unwrap();

    let iteration = |cpu: &mut TestCpu| {
        let start = cpu.cycles;
        let lookups = cpu.mmu.hits + cpu.mmu.misses;
        steps(cpu, 3);
        assert_eq!(cpu.get_pc(), 0x3000);
        (cpu.cycles - start, cpu.mmu.hits + cpu.mmu.misses - lookups)
    };
    let (first, first_lookups) = iteration(&mut cpu);
    assert!(first_lookups > 0);
    let (second, second_lookups) = iteration(&mut cpu);
    assert!(second < first);
    // Logically tagged lines hit without a translation
    assert_eq!(second_lookups, 0);
    assert_eq!(cpu.icache.lookup(0x3000, true), Some(0x4E714E71));
}

const ROOT_040: Address = 0x10000;
const POINTER_040: Address = 0x10200;
const PAGES_040: Address = 0x10400;
const INDIRECT_040: Address = 0x10600;

/// 68040/68060 tables with 4K pages: 0x0000-0x2FFF identity mapped,
/// 0x3000 to 0x50000, 0x4000 write protected to 0x60000, 0x5000 invalid
/// and 0x6000 through an indirect descriptor to 0x70000.
fn mmu040_cpu(model: CpuModel, code: &[u16]) -> TestCpu {
    let mut cpu = testcpu(CpuConfig::for_model(model).with_mmu(true), code);
    write_long(&mut cpu, ROOT_040, POINTER_040 | 3);
    write_long(&mut cpu, POINTER_040, PAGES_040 | 3);
    let pages = [
        0x0000_0001,
        0x0000_1001,
        0x0000_2001,
        0x0005_0001,
        0x0006_0005,
        0,
        INDIRECT_040 | 2,
    ];
    for (i, desc) in pages.into_iter().enumerate() {
        write_long(&mut cpu, PAGES_040 + 4 * i as Address, desc);
    }
    write_long(&mut cpu, INDIRECT_040, 0x0007_0001);
    install_handler(&mut cpu, 2, 0x2000);

    cpu.regs.mmu.urp = ROOT_040;
    cpu.regs.mmu.srp_040 = ROOT_040;
    cpu.regs.mmu.tcr = Tcr040(0x8000);
    cpu
}

#[test]
fn walk_040_4k() {
    // MOVE.L $3004.W,D0
    let mut cpu = mmu040_cpu(CpuModel::M68040, &[0x2038, 0x3004, 0x4E71]);
    write_long(&mut cpu, 0x3004, 0x11111111);
    write_long(&mut cpu, 0x50004, 0xCAFEBABE);
    cpu.step().unwrap();

    assert_eq!(cpu.regs.d[0], 0xCAFEBABE);
    assert_eq!(cpu.get_pc(), 0x1004);
    // Used bits on all three levels
    assert_eq!(read_long(&cpu, ROOT_040), 0x0001_020B);
    assert_eq!(read_long(&cpu, POINTER_040), 0x0001_040B);
    assert_eq!(read_long(&cpu, PAGES_040 + 12), 0x0005_0009);
    assert!(
        cpu.mmu
            .entries()
            .iter()
            .any(|e| e.fc == 5 && e.logical == 0x3000 && e.physical == 0x50000 && e.page_mask == 0xFFF)
    );
}

#[test]
fn walk_040_8k() {
    // MOVE.L $3004.W,D0
    let mut cpu = mmu040_cpu(CpuModel::M68040, &[0x2038, 0x3004, 0x4E71]);
    let pages_8k = 0x10480;
    write_long(&mut cpu, POINTER_040, pages_8k | 3);
    write_long(&mut cpu, pages_8k, 0x0000_0001);
    write_long(&mut cpu, pages_8k + 4, 0x0005_0001);
    cpu.regs.mmu.tcr = Tcr040(0xC000);
    write_long(&mut cpu, 0x51004, 0x8BADF00D);
    cpu.step().unwrap();

    assert_eq!(cpu.regs.d[0], 0x8BADF00D);
    assert_eq!(read_long(&cpu, pages_8k + 4), 0x0005_0009);
    assert!(
        cpu.mmu
            .entries()
            .iter()
            .any(|e| e.logical == 0x2000 && e.physical == 0x50000 && e.page_mask == 0x1FFF)
    );
}

#[test]
fn walk_040_indirect() {
    // MOVE.L $6008.W,D1
    let mut cpu = mmu040_cpu(CpuModel::M68040, &[0x2238, 0x6008, 0x4E71]);
    write_long(&mut cpu, 0x70008, 0x600DF00D);
    cpu.step().unwrap();

    assert_eq!(cpu.regs.d[1], 0x600DF00D);
    // History bits go to the target descriptor
    assert_eq!(read_long(&cpu, PAGES_040 + 24), INDIRECT_040 | 2);
    assert_eq!(read_long(&cpu, INDIRECT_040), 0x0007_0009);
}

#[test]
fn write_fault_040_frame() {
    // MOVE.L D0,$4000.W
    let mut cpu = mmu040_cpu(CpuModel::M68040, &[0x21C0, 0x4000, 0x4E71]);
    write_long(&mut cpu, 0x60000, 0x55555555);
    cpu.regs.d[0] = 0x12345678;
    cpu.step().unwrap();

    assert_eq!(cpu.get_pc(), 0x2000);
    assert_eq!(read_long(&cpu, 0x60000), 0x55555555);
    let sp = sp(&cpu);
    // Format 7 access error, 30 words
    assert_eq!(sp, INITIAL_SSP - 60);
    assert_eq!(read_long(&cpu, sp + 2), INITIAL_PC);
    assert_eq!(read_word(&cpu, sp + 6), 0x7008);
    // Effective address
    assert_eq!(read_long(&cpu, sp + 8), 0x4000);
    // SSW: ATC fault, write, long, supervisor data
    assert_eq!(read_word(&cpu, sp + 12), 0x0405);
    // WB3S valid, long, FC 5
    assert_eq!(read_word(&cpu, sp + 14), 0x0085);
    assert_eq!(read_word(&cpu, sp + 16), 0);
    assert_eq!(read_word(&cpu, sp + 18), 0);
    // Fault address, WB3A and WB3D
    assert_eq!(read_long(&cpu, sp + 20), 0x4000);
    assert_eq!(read_long(&cpu, sp + 24), 0x4000);
    assert_eq!(read_long(&cpu, sp + 28), 0x12345678);
}

#[test]
fn read_fault_060_frame() {
    // MOVE.L $5000.W,D0
    let mut cpu = mmu040_cpu(CpuModel::M68060, &[0x2038, 0x5000, 0x4E71]);
    cpu.step().unwrap();

    assert_eq!(cpu.get_pc(), 0x2000);
    assert_eq!(cpu.mmu.faults, 1);
    let sp = sp(&cpu);
    // Format 4 access error
    assert_eq!(sp, INITIAL_SSP - 16);
    assert_eq!(read_long(&cpu, sp + 2), INITIAL_PC);
    assert_eq!(read_word(&cpu, sp + 6), 0x4008);
    assert_eq!(read_long(&cpu, sp + 8), 0x5000);
    // FSLW: read, long, FC 5, page fault
    assert_eq!(read_long(&cpu, sp + 12), 0x0105_0400);
}

#[test]
fn ptest_pflush_040() {
    // PTESTR (A0); PTESTW (A0); PFLUSH (A0); PFLUSHA
    let mut cpu = mmu040_cpu(CpuModel::M68040, &[0xF568, 0xF548, 0xF508, 0xF518]);
    cpu.regs.dfc = 5;

    cpu.regs.a[0] = 0x3004;
    cpu.step().unwrap();
    let sr = cpu.regs.mmu.mmusr_040;
    assert_eq!(sr.phys(), 0x50);
    assert!(sr.resident());
    assert!(!sr.write_protected());
    assert!(!sr.transparent());
    assert!(cpu.mmu.entries().iter().any(|e| e.fc == 5 && e.logical == 0x3000));

    cpu.regs.a[0] = 0x5000;
    cpu.step().unwrap();
    assert_eq!(cpu.regs.mmu.mmusr_040.0, 0);

    cpu.regs.a[0] = 0x3004;
    cpu.step().unwrap();
    assert!(cpu.mmu.entries().iter().all(|e| e.logical != 0x3000));
    assert!(!cpu.mmu.entries().is_empty());

    cpu.step().unwrap();
    assert!(cpu.mmu.entries().is_empty());
}

#[test]
fn transparent_windows_040() {
    // MOVE.L $80001000,D0; MOVE.L D0,$90000000
    let mut cpu = mmu040_cpu(
        CpuModel::M68040,
        &[0x2039, 0x8000, 0x1000, 0x23C0, 0x9000, 0x0000, 0x4E71],
    );
    // $80xxxxxx both modes, $90xxxxxx write protected
    cpu.regs.mmu.dtt0 = Ttr040(0x8000_C000);
    cpu.regs.mmu.dtt1 = Ttr040(0x9000_C004);
    write_long(&mut cpu, 0x8000_1000, 0xFEEDFACE);

    cpu.step().unwrap();
    assert_eq!(cpu.regs.d[0], 0xFEEDFACE);
    assert!(cpu.mmu.entries().iter().all(|e| e.logical != 0x8000_1000));

    cpu.step().unwrap();
    assert_eq!(cpu.get_pc(), 0x2000);
    assert_eq!(read_long(&cpu, 0x9000_0000), 0);
    assert_eq!(read_word(&cpu, sp(&cpu) + 6), 0x7008);
}

#[test]
fn instruction_window_040() {
    let mut cpu = mmu040_cpu(CpuModel::M68040, &[]);
    write_word(&mut cpu, 0x4000_0000, 0x4E71);

    // Instruction fetches only match the ITTs
    cpu.regs.mmu.dtt0 = Ttr040(0x4000_C000);
    cpu.set_pc(0x4000_0000).unwrap();
    cpu.step().unwrap();
    assert_eq!(cpu.get_pc(), 0x2000);
    assert_eq!(read_long(&cpu, sp(&cpu) + 8), 0x4000_0000);

    cpu.regs.mmu.itt0 = Ttr040(0x4000_C000);
    cpu.set_pc(0x4000_0000).unwrap();
    cpu.step().unwrap();
    assert_eq!(cpu.get_pc(), 0x4000_0002);
}
