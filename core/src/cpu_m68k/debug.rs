//! M68k CPU - debugger property views

use crate::bus::{Address, Bus, IrqSource};
use crate::debuggable::*;
use crate::{
    dbgprop_bool, dbgprop_enum, dbgprop_ext, dbgprop_group, dbgprop_header, dbgprop_long,
    dbgprop_quad, dbgprop_str, dbgprop_string, dbgprop_udec, dbgprop_word,
};

use super::cache::InstructionCache;
use super::config::CpuModel;
use super::cpu::CpuM68k;
use super::fpu::storage::BitsExtReal;

impl<TBus> CpuM68k<TBus>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    fn debug_cache(&self) -> DebuggableProperties {
        let mut props = vec![
            dbgprop_long!("CACR", self.regs.cacr),
            dbgprop_long!("CAAR", self.regs.caar),
            dbgprop_udec!("Prefetch depth", self.prefetch.depth()),
            dbgprop_udec!("Prefetch queued", self.prefetch.len()),
        ];
        match &self.icache {
            InstructionCache::None => props.push(dbgprop_str!("Instruction cache", "none")),
            InstructionCache::M68020(c) => {
                let valid = c.lines.iter().filter(|l| l.valid).count();
                props.push(dbgprop_str!("Instruction cache", "68020"));
                props.push(dbgprop_udec!("Valid lines", valid));
            }
            InstructionCache::M68030(c) => {
                let valid = c.lines.iter().flat_map(|l| l.valid).filter(|&v| v).count();
                props.push(dbgprop_str!("Instruction cache", "68030"));
                props.push(dbgprop_udec!("Valid longwords", valid));
            }
            InstructionCache::M68040(c) => {
                props.push(dbgprop_str!("Instruction cache", "68040"));
                props.push(dbgprop_udec!("Valid longwords", c.valid_longs()));
            }
        }
        props.push(dbgprop_header!("JIT"));
        props.push(dbgprop_bool!("Disabled", self.jit.disabled));
        props.push(dbgprop_udec!("Blocks", self.jit.len()));
        props.push(dbgprop_udec!("Hits", self.jit.hits));
        props.push(dbgprop_udec!("Misses", self.jit.misses));
        props.push(dbgprop_udec!("Invalidations", self.jit.invalidations));
        props
    }

    fn debug_mmu(&self) -> DebuggableProperties {
        let r = &self.regs.mmu;
        let mut props = if self.config.model == CpuModel::M68030 {
            vec![
                dbgprop_long!("TC", r.tc.0),
                dbgprop_quad!("CRP", r.crp.0),
                dbgprop_quad!("SRP", r.srp.0),
                dbgprop_long!("TT0", r.tt0.0),
                dbgprop_long!("TT1", r.tt1.0),
                dbgprop_word!("MMUSR", r.mmusr.0),
            ]
        } else {
            vec![
                dbgprop_word!("TCR", r.tcr.0),
                dbgprop_long!("URP", r.urp),
                dbgprop_long!("SRP", r.srp_040),
                dbgprop_long!("ITT0", r.itt0.0),
                dbgprop_long!("ITT1", r.itt1.0),
                dbgprop_long!("DTT0", r.dtt0.0),
                dbgprop_long!("DTT1", r.dtt1.0),
                dbgprop_long!("MMUSR", r.mmusr_040.0),
            ]
        };
        props.push(dbgprop_udec!("ATC hits", self.mmu.hits));
        props.push(dbgprop_udec!("ATC misses", self.mmu.misses));
        props.push(dbgprop_udec!("Faults", self.mmu.faults));
        props.push(dbgprop_group!(
            "ATC",
            self.mmu
                .entries()
                .iter()
                .map(|e| {
                    dbgprop_string!(
                        format!("FC{} {:08X}", e.fc, e.logical),
                        format!(
                            "{:08X}{}{}{}",
                            e.physical,
                            if e.write_protected { " WP" } else { "" },
                            if e.supervisor_only { " S" } else { "" },
                            if e.modified { " M" } else { "" }
                        )
                    )
                })
                .collect()
        ));
        props
    }

    fn debug_fpu(&self) -> DebuggableProperties {
        let f = &self.regs.fpu;
        let mut props: DebuggableProperties = f
            .fp
            .iter()
            .enumerate()
            .map(|(i, v)| {
                dbgprop_ext!(format!("FP{}", i), BitsExtReal::from(v).to_longs(), v.as_f64())
            })
            .collect();
        props.extend([
            dbgprop_long!("FPCR", f.fpcr.0),
            dbgprop_long!("FPSR", f.fpsr.0),
            dbgprop_long!("FPIAR", f.fpiar),
            dbgprop_bool!("Initialized", self.fpu.initialized),
            dbgprop_udec!("Operations", self.fpu.operations),
            dbgprop_udec!("Exceptions", self.fpu.exceptions),
        ]);
        match &self.fpu.pending {
            None => props.push(dbgprop_str!("Pending", "none")),
            Some(op) => props.push(dbgprop_group!(
                "Pending",
                vec![
                    dbgprop_word!("Opcode", op.opcode),
                    dbgprop_word!("Extension", op.ext),
                    dbgprop_udec!("Vector", op.vector),
                    dbgprop_string!("Class", op.class.to_string()),
                    dbgprop_long!("EA", op.ea),
                ]
            )),
        }
        props
    }
}

impl<TBus> Debuggable for CpuM68k<TBus>
where
    TBus: Bus<Address, u8> + IrqSource,
{
    fn get_debug_properties(&self) -> DebuggableProperties {
        let mut props = vec![
            dbgprop_enum!("Model", self.config.model),
            dbgprop_enum!("Mode", self.config.mode),
            dbgprop_str!("Strategy", self.strategy_name()),
            dbgprop_enum!("State", self.state),
            dbgprop_udec!("Cycles", self.cycles),
            dbgprop_udec!("Co-processor cycles", self.coprocessor_cycles),
            dbgprop_long!("PC", self.get_pc()),
            dbgprop_word!("SR", self.regs.sr.sr()),
            dbgprop_long!("VBR", self.regs.vbr),
            dbgprop_group!("Caches", self.debug_cache()),
        ];
        if self.config.mmu {
            props.push(dbgprop_group!("MMU", self.debug_mmu()));
        }
        if self.config.fpu.is_some() {
            props.push(dbgprop_group!("FPU", self.debug_fpu()));
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use crate::cpu_m68k::tests::testcpu;
    use crate::cpu_m68k::{CpuConfig, CpuModel, FpuModel};
    use crate::debuggable::*;

    #[test]
    fn groups_follow_config() {
        let cpu = testcpu(CpuConfig::default(), &[0x4E71]);
        let props = cpu.get_debug_properties();
        assert_eq!(
            find_property(&props, &["Model"]),
            Some(&DebuggablePropertyValue::StaticStr("68000"))
        );
        assert_eq!(
            find_property(&props, &["Caches", "Instruction cache"]),
            Some(&DebuggablePropertyValue::StaticStr("none"))
        );
        assert!(find_property(&props, &["MMU"]).is_none());
        assert!(find_property(&props, &["FPU"]).is_none());
    }

    #[test]
    fn mmu_and_fpu_views() {
        let config = CpuConfig::for_model(CpuModel::M68030)
            .with_mmu(true)
            .with_fpu(Some(FpuModel::M68882));
        let mut cpu = testcpu(config, &[0x4E71]);
        cpu.regs.mmu.crp.0 = 0x7FFF_0002_0001_0000;
        let props = cpu.get_debug_properties();

        assert_eq!(
            find_property(&props, &["MMU", "CRP"]),
            Some(&DebuggablePropertyValue::Quad(0x7FFF_0002_0001_0000))
        );
        let Some(DebuggablePropertyValue::Extended(longs, _)) =
            find_property(&props, &["FPU", "FP0"])
        else {
            panic!("FP0 missing");
        };
        // Reset value is a non-signaling NaN
        assert_eq!(longs[0] & 0x7FFF_0000, 0x7FFF_0000);

        let mut text = String::new();
        render_properties(&props, &mut text).unwrap();
        assert!(text.contains("  CRP: 7FFF000200010000\n"));
    }
}
